//! Stateless flow computations.

use crate::error::SimResult;
use crate::node::{Node, NodeIo, NodeKind};
use crate::port::Interface;
use crate::time::Duration;

type Compute = Box<dyn FnMut(&mut NodeIo<'_>) -> SimResult<()> + Send>;

/// A node whose flow outputs are a pure function of its flow inputs.
///
/// The closure reads inputs with [`NodeIo::flow_input`] and writes outputs
/// with [`NodeIo::set_flow_output`]. It runs lazily, at most once per time
/// coordinate, whenever a consumer needs one of the outputs.
///
/// # Example
///
/// ```
/// use devskit::nodes::function::FunctionNode;
/// use devskit::port::{Interface, ValueType};
///
/// let double = FunctionNode::new(
///     Interface::new()
///         .flow_input("x", ValueType::Float)
///         .flow_output("y", ValueType::Float),
///     |io| {
///         let x: f64 = io.flow_input_as("x")?;
///         io.set_flow_output("y", 2.0 * x)
///     },
/// );
/// # let _ = double;
/// ```
pub struct FunctionNode {
    interface: Interface,
    compute: Compute,
}

impl FunctionNode {
    pub fn new<F>(interface: Interface, compute: F) -> Self
    where
        F: FnMut(&mut NodeIo<'_>) -> SimResult<()> + Send + 'static,
    {
        Self {
            interface,
            compute: Box::new(compute),
        }
    }
}

impl std::fmt::Debug for FunctionNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionNode")
            .field("interface", &self.interface)
            .finish_non_exhaustive()
    }
}

impl Node for FunctionNode {
    fn kind(&self) -> NodeKind {
        NodeKind::Function
    }

    fn interface(&self) -> Interface {
        self.interface.clone()
    }

    fn initialization_event(&mut self, _io: &mut NodeIo<'_>) -> SimResult<Duration> {
        Ok(Duration::INFINITE)
    }

    fn refresh_flow(&mut self, io: &mut NodeIo<'_>) -> SimResult<()> {
        (self.compute)(io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Component;
    use crate::context::NodeContext;
    use crate::port::ValueType;
    use crate::time::{SuperdenseTime, TimePoint};
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_computes_once_per_coordinate() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let node = FunctionNode::new(
            Interface::new()
                .flow_input("x", ValueType::Int)
                .flow_output("y", ValueType::Int),
            move |io| {
                counter.fetch_add(1, Ordering::SeqCst);
                let x: i64 = io.flow_input_as("x")?;
                io.set_flow_output("y", x + 1)
            },
        );
        let mut c = Component::new("f", Box::new(node)).unwrap();
        c.bind_root(NodeContext::detached("f")).unwrap();

        let mut clock = SuperdenseTime::default();
        assert_eq!(c.initialize(&mut clock).unwrap(), Duration::INFINITE);
        c.set_flow_input(0, Some(json!(1)));
        c.refresh_flow(&mut clock).unwrap();
        let mut step = clock.next();
        c.refresh_flow(&mut step).unwrap();
        assert_eq!(c.port_value(1), Some(&json!(2)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let mut later = SuperdenseTime::at(TimePoint::from_origin(Duration::secs(1)).unwrap());
        c.set_flow_input(0, Some(json!(5)));
        c.refresh_flow(&mut later).unwrap();
        assert_eq!(c.port_value(1), Some(&json!(6)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unconnected_input_is_misuse() {
        let node = FunctionNode::new(
            Interface::new()
                .flow_input("x", ValueType::Int)
                .flow_output("y", ValueType::Int),
            |io| {
                let x = io.flow_input("x")?.clone();
                io.set_flow_output("y", x)
            },
        );
        let mut c = Component::new("f", Box::new(node)).unwrap();
        let mut clock = SuperdenseTime::default();
        c.initialize(&mut clock).unwrap();
        assert!(c.refresh_flow(&mut clock).is_err());
    }
}
