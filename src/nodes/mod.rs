//! Built-in node implementations.
//!
//! This module contains pre-built node types that can be used directly,
//! registered by name in a [`NodeRegistry`](crate::registry::NodeRegistry),
//! or read as references for implementing custom nodes.
//!
//! # Available Nodes
//!
//! ## Basic Nodes (mock)
//! - [`GeneratorNode`] - Emits a numbered message every period
//! - [`RelayNode`] - Forwards messages without delay
//! - [`CounterNode`] - Counts messages and publishes the count as flow
//!
//! ## Delay Nodes
//! - [`DelayNode`] - Holds messages for a fixed duration
//! - [`ProbabilisticDelayNode`] - Holds messages for a sampled duration (uniform, normal, exponential)
//!
//! ## Flow Nodes
//! - [`FunctionNode`] - Computes flow outputs from flow inputs
//! - [`ParameterNode`] - Publishes a constant
//! - [`StatisticNode`] - Captures a flow value at finalization

pub mod delay;
pub mod function;
pub mod mock;
pub mod parameter;
pub mod probabilistic;
pub mod statistic;

// Re-export mock nodes
pub use mock::{CounterNode, GeneratorNode, RelayNode};

// Re-export delay nodes
pub use delay::DelayNode;
pub use probabilistic::{DelayDistribution, ProbabilisticDelayNode};

// Re-export flow nodes
pub use function::FunctionNode;
pub use parameter::ParameterNode;
pub use statistic::{StatisticHandle, StatisticNode};
