//! Core type definitions for the simulation kernel.

/// Payload carried over ports.
///
/// Port values are JSON values so that heterogeneous models, configuration
/// files and external producers can exchange data without a shared type.
pub type Value = serde_json::Value;

/// Index of a child within its parent, in declaration order.
///
/// Ties between simultaneous children are always broken by this index.
pub type ChildIndex = usize;

/// Serial number of a collection agent.
///
/// Serials grow with every insertion and are never reused, so they double as
/// the insertion order of the population.
pub type AgentSerial = u64;
