//! Constant flow sources.

use crate::error::SimResult;
use crate::node::{Node, NodeIo, NodeKind};
use crate::port::{Interface, ValueType};
use crate::time::Duration;
use crate::types::Value;

/// Publishes a fixed value on the flow output `parameter`.
#[derive(Clone, Debug)]
pub struct ParameterNode {
    value: Value,
}

impl ParameterNode {
    pub const PORT: &'static str = "parameter";

    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
        }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }
}

impl Node for ParameterNode {
    fn kind(&self) -> NodeKind {
        NodeKind::Parameter
    }

    fn interface(&self) -> Interface {
        Interface::new().flow_output(Self::PORT, ValueType::Any)
    }

    fn initialization_event(&mut self, io: &mut NodeIo<'_>) -> SimResult<Duration> {
        io.set_flow_output(Self::PORT, &self.value)?;
        Ok(Duration::INFINITE)
    }
}
