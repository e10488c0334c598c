//! Flow sinks read back after a run.
//!
//! A [`StatisticNode`] captures the value on its flow input when it is
//! finalized. The [`StatisticHandle`] returned at construction stays valid
//! after the node has been moved into a model, so callers can read the
//! result once the simulation is over.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;

use crate::error::SimResult;
use crate::node::{Node, NodeIo, NodeKind};
use crate::port::{Interface, ValueType};
use crate::time::Duration;
use crate::types::Value;

/// Shared slot holding a captured statistic.
#[derive(Clone, Debug, Default)]
pub struct StatisticHandle(Arc<Mutex<Option<Value>>>);

impl StatisticHandle {
    /// The captured value, or `None` before finalization.
    pub fn value(&self) -> Option<Value> {
        self.0.lock().clone()
    }

    pub fn value_as<T: DeserializeOwned>(&self) -> Option<Result<T, serde_json::Error>> {
        self.value().map(serde_json::from_value)
    }

    pub fn is_captured(&self) -> bool {
        self.0.lock().is_some()
    }

    fn store(&self, value: Value) {
        *self.0.lock() = Some(value);
    }
}

/// Captures the flow input `statistic` at finalization.
#[derive(Debug)]
pub struct StatisticNode {
    ty: ValueType,
    handle: StatisticHandle,
}

impl StatisticNode {
    pub const PORT: &'static str = "statistic";

    pub fn new() -> (Self, StatisticHandle) {
        Self::typed(ValueType::Any)
    }

    /// A statistic whose input only accepts values of `ty`.
    pub fn typed(ty: ValueType) -> (Self, StatisticHandle) {
        let handle = StatisticHandle::default();
        (
            Self {
                ty,
                handle: handle.clone(),
            },
            handle,
        )
    }

    pub fn handle(&self) -> StatisticHandle {
        self.handle.clone()
    }
}

impl Node for StatisticNode {
    fn kind(&self) -> NodeKind {
        NodeKind::Statistic
    }

    fn interface(&self) -> Interface {
        Interface::new().flow_input(Self::PORT, self.ty)
    }

    fn initialization_event(&mut self, _io: &mut NodeIo<'_>) -> SimResult<Duration> {
        Ok(Duration::INFINITE)
    }

    fn finalization_event(&mut self, _elapsed: Duration, io: &mut NodeIo<'_>) -> SimResult<()> {
        let value = io.flow_input(Self::PORT)?.clone();
        self.handle.store(value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Component;
    use crate::time::SuperdenseTime;
    use serde_json::json;

    #[test]
    fn test_captures_at_finalization() {
        let (node, handle) = StatisticNode::new();
        let mut c = Component::new("s", Box::new(node)).unwrap();
        let mut clock = SuperdenseTime::default();
        c.initialize(&mut clock).unwrap();
        c.set_flow_input(0, Some(json!(42)));
        assert!(!handle.is_captured());

        c.finalize(&mut clock).unwrap();
        assert_eq!(handle.value(), Some(json!(42)));
        assert_eq!(handle.value_as::<u32>().unwrap().unwrap(), 42);
    }

    #[test]
    fn test_unconnected_statistic_fails() {
        let (node, handle) = StatisticNode::new();
        let mut c = Component::new("s", Box::new(node)).unwrap();
        let mut clock = SuperdenseTime::default();
        c.initialize(&mut clock).unwrap();
        assert!(c.finalize(&mut clock).is_err());
        assert_eq!(handle.value(), None);
    }
}
