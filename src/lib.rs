//! # devskit
//!
//! A hierarchical discrete-event simulation kernel in the DEVS tradition.
//!
//! ## Design Principles
//!
//! - **Superdense time**: every event happens at a `(t, c)` coordinate.
//!   Simultaneous events are ordered by the micro-step `c`, so zero-delay
//!   cascades still have a total order.
//! - **Uniform nodes**: atomic, composite, collection and function nodes all
//!   implement the same [`Node`] lifecycle (initialize, unplanned, planned,
//!   finalize). Containers delegate to their children.
//! - **Flow and message ports**: flow ports hold a current value that is
//!   pulled on demand; message ports carry values for one micro-step.
//! - **Single-threaded dispatch**: one event and its cascade are processed at
//!   a time. The real-time bridge is the only place threads meet.
//!
//! ## Quick Start
//!
//! ```rust
//! use devskit::composite::CompositeBuilder;
//! use devskit::nodes::{CounterNode, DelayNode, GeneratorNode};
//! use devskit::port::{Interface, ValueType};
//! use devskit::simulation::{SimOptions, Simulation};
//! use devskit::time::Duration;
//!
//! let model = CompositeBuilder::new(Interface::new().message_output("done", ValueType::Any))
//!     .child("gen", GeneratorNode::new(Duration::millis(100)).with_limit(5))
//!     .child("link", DelayNode::new(Duration::millis(30)))
//!     .child("count", CounterNode::new())
//!     .link("gen.output", "link.input")
//!     .link("link.output", "count.input")
//!     .link("link.output", "self.done")
//!     .build()
//!     .unwrap();
//!
//! let options = SimOptions::default().with_seed(42);
//! let mut sim = Simulation::new("top", Box::new(model), options).unwrap();
//! sim.process_remaining_events().unwrap();
//!
//! assert_eq!(sim.take_observations().len(), 5);
//! println!("{}", sim.stats().summary());
//! ```
//!
//! ## Configuration-Driven Setup
//!
//! ```rust,ignore
//! use devskit::{create_default_registry, SimConfig, Simulation};
//!
//! let config = SimConfig::from_yaml_file("model.yaml")?;
//! devskit::init_logging(&config.simulation.log_level);
//! let mut sim = Simulation::from_config("top", &config, &create_default_registry())?;
//! sim.process_remaining_events()?;
//! ```

pub mod types;
pub mod time;
pub mod error;
pub mod port;
pub mod print;
pub mod context;
pub mod node;
pub mod component;
pub mod composite;
pub mod collection;
pub mod nodes;
pub mod simulation;
pub mod realtime;
pub mod config;
pub mod registry;
pub mod stats;

// Re-export commonly used types
pub use types::Value;
pub use time::{Duration, Scale, SuperdenseTime, TimeError, TimePoint, TimeQueue};
pub use error::{SimError, SimResult};
pub use port::{Interface, PortKind, PortSpec, ValueType};
pub use print::{PrintSink, RecordingSink, TracingSink};
pub use context::NodeContext;
pub use node::{Node, NodeIo, NodeKind};
pub use component::Component;
pub use composite::{CompositeBuilder, CompositeNode};
pub use collection::{Agents, CollectionBuilder, CollectionModel, CollectionNode, IdentityPolicy, Prototype};
pub use simulation::{Observation, SimOptions, Simulation, StopHandle};
pub use realtime::{Injector, RealTimeSimulation, Wake};
pub use config::{SimConfig, SimConfigBuilder, ConfigError};
pub use registry::{NodeRegistry, create_default_registry};
pub use stats::{SimulationStats, StatsCollector, Timer};

/// Initialize the tracing subscriber for logging.
///
/// Call this at the start of your program to enable logging. `RUST_LOG`
/// overrides `level` when set.
///
/// # Example
///
/// ```rust,ignore
/// devskit::init_logging("info");
/// ```
pub fn init_logging(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
