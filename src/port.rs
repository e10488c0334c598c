//! Ports: typed, directional endpoints on a node.
//!
//! A port is either a **flow** port, holding one current value that readers
//! pull, or a **message** port, carrying values that live for exactly one
//! micro-step. Combined with a direction that gives the four [`PortKind`]s.
//! A node declares its ports once through an [`Interface`]; at run time the
//! owning component keeps one [`PortSlot`] per declared port.

use serde::{Deserialize, Serialize};

use crate::types::Value;

/// Pull (flow) or push (message) semantics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortMode {
    Flow,
    Message,
}

/// Direction of a port relative to its node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortGoal {
    Input,
    Output,
}

/// The four port variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortKind {
    FlowInput,
    FlowOutput,
    MessageInput,
    MessageOutput,
}

impl PortKind {
    pub fn new(mode: PortMode, goal: PortGoal) -> Self {
        match (mode, goal) {
            (PortMode::Flow, PortGoal::Input) => PortKind::FlowInput,
            (PortMode::Flow, PortGoal::Output) => PortKind::FlowOutput,
            (PortMode::Message, PortGoal::Input) => PortKind::MessageInput,
            (PortMode::Message, PortGoal::Output) => PortKind::MessageOutput,
        }
    }

    pub fn mode(self) -> PortMode {
        match self {
            PortKind::FlowInput | PortKind::FlowOutput => PortMode::Flow,
            PortKind::MessageInput | PortKind::MessageOutput => PortMode::Message,
        }
    }

    pub fn goal(self) -> PortGoal {
        match self {
            PortKind::FlowInput | PortKind::MessageInput => PortGoal::Input,
            PortKind::FlowOutput | PortKind::MessageOutput => PortGoal::Output,
        }
    }
}

/// Runtime type carried by a port.
///
/// Payloads are JSON values; the declared type is checked whenever a value
/// crosses a port so that a mismatched coupling fails where it happens.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    #[default]
    Any,
    Bool,
    Int,
    Float,
    Text,
    Array,
    Object,
}

impl ValueType {
    /// Returns true if `value` is acceptable for this type.
    ///
    /// Integers are accepted where floats are expected.
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            ValueType::Any => true,
            ValueType::Bool => value.is_boolean(),
            ValueType::Int => value.is_i64() || value.is_u64(),
            ValueType::Float => value.is_number(),
            ValueType::Text => value.is_string(),
            ValueType::Array => value.is_array(),
            ValueType::Object => value.is_object(),
        }
    }
}

/// Declaration of a single port.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSpec {
    pub name: String,
    pub kind: PortKind,
    #[serde(default)]
    pub ty: ValueType,
}

impl PortSpec {
    pub fn new(name: impl Into<String>, kind: PortKind, ty: ValueType) -> Self {
        Self {
            name: name.into(),
            kind,
            ty,
        }
    }
}

/// The set of ports a node exposes, in declaration order.
///
/// # Example
///
/// ```rust
/// use devskit::port::{Interface, PortKind, ValueType};
///
/// let interface = Interface::new()
///     .message_input("job", ValueType::Object)
///     .message_output("done", ValueType::Object)
///     .flow_output("load", ValueType::Float);
///
/// assert_eq!(interface.len(), 3);
/// assert_eq!(interface.index_of("done"), Some(1));
/// assert_eq!(interface.get(2).unwrap().kind, PortKind::FlowOutput);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interface {
    ports: Vec<PortSpec>,
}

impl Interface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_port(mut self, spec: PortSpec) -> Self {
        self.ports.push(spec);
        self
    }

    pub fn flow_input(self, name: impl Into<String>, ty: ValueType) -> Self {
        self.with_port(PortSpec::new(name, PortKind::FlowInput, ty))
    }

    pub fn flow_output(self, name: impl Into<String>, ty: ValueType) -> Self {
        self.with_port(PortSpec::new(name, PortKind::FlowOutput, ty))
    }

    pub fn message_input(self, name: impl Into<String>, ty: ValueType) -> Self {
        self.with_port(PortSpec::new(name, PortKind::MessageInput, ty))
    }

    pub fn message_output(self, name: impl Into<String>, ty: ValueType) -> Self {
        self.with_port(PortSpec::new(name, PortKind::MessageOutput, ty))
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.ports.iter().position(|p| p.name == name)
    }

    pub fn get(&self, index: usize) -> Option<&PortSpec> {
        self.ports.get(index)
    }

    pub fn find(&self, name: &str) -> Option<&PortSpec> {
        self.ports.iter().find(|p| p.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PortSpec> {
        self.ports.iter()
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    /// Indices of all ports of the given kind.
    pub fn indices_of(&self, kind: PortKind) -> impl Iterator<Item = usize> + '_ {
        self.ports
            .iter()
            .enumerate()
            .filter(move |(_, p)| p.kind == kind)
            .map(|(i, _)| i)
    }

    /// Returns the first name declared more than once.
    pub fn duplicate_name(&self) -> Option<&str> {
        self.ports.iter().enumerate().find_map(|(i, p)| {
            self.ports[..i]
                .iter()
                .any(|q| q.name == p.name)
                .then_some(p.name.as_str())
        })
    }
}

/// Runtime state of one port.
#[derive(Clone, Debug, PartialEq)]
pub enum PortSlot {
    /// Value resolved from the connected flow source, if any.
    FlowInput(Option<Value>),
    /// Most recently published value.
    FlowOutput(Option<Value>),
    /// Value delivered for the current micro-step.
    MessageInput(Option<Value>),
    /// Posts go to the owner's outbox, in posting order.
    MessageOutput,
}

impl PortSlot {
    fn empty(kind: PortKind) -> Self {
        match kind {
            PortKind::FlowInput => PortSlot::FlowInput(None),
            PortKind::FlowOutput => PortSlot::FlowOutput(None),
            PortKind::MessageInput => PortSlot::MessageInput(None),
            PortKind::MessageOutput => PortSlot::MessageOutput,
        }
    }

    /// Current value of a flow port, or the delivered value of a message input.
    pub fn read(&self) -> Option<&Value> {
        match self {
            PortSlot::FlowInput(v) | PortSlot::FlowOutput(v) | PortSlot::MessageInput(v) => {
                v.as_ref()
            }
            PortSlot::MessageOutput => None,
        }
    }
}

/// All port slots of one component plus its outgoing message buffer.
#[derive(Clone, Debug)]
pub struct PortBuffers {
    interface: Interface,
    slots: Vec<PortSlot>,
    outbox: Vec<(usize, Value)>,
}

impl PortBuffers {
    pub fn new(interface: Interface) -> Self {
        let slots = interface.iter().map(|p| PortSlot::empty(p.kind)).collect();
        Self {
            interface,
            slots,
            outbox: Vec::new(),
        }
    }

    pub fn interface(&self) -> &Interface {
        &self.interface
    }

    pub fn slot(&self, index: usize) -> Option<&PortSlot> {
        self.slots.get(index)
    }

    pub fn read(&self, index: usize) -> Option<&Value> {
        self.slots.get(index).and_then(PortSlot::read)
    }

    /// Stores a flow value (input resolution or output publication).
    pub fn set_flow(&mut self, index: usize, value: Option<Value>) {
        match self.slots.get_mut(index) {
            Some(PortSlot::FlowInput(slot)) | Some(PortSlot::FlowOutput(slot)) => *slot = value,
            _ => {}
        }
    }

    /// Delivers a message for the current micro-step.
    ///
    /// Gives the value back if the port already holds one or is not a
    /// message input.
    pub fn deliver(&mut self, index: usize, value: Value) -> Result<(), Value> {
        match self.slots.get_mut(index) {
            Some(PortSlot::MessageInput(slot @ None)) => {
                *slot = Some(value);
                Ok(())
            }
            _ => Err(value),
        }
    }

    pub fn is_occupied(&self, index: usize) -> bool {
        matches!(self.slots.get(index), Some(PortSlot::MessageInput(Some(_))))
    }

    pub fn post(&mut self, index: usize, value: Value) {
        self.outbox.push((index, value));
    }

    /// Drains messages posted since the last call.
    pub fn take_outbox(&mut self) -> Vec<(usize, Value)> {
        std::mem::take(&mut self.outbox)
    }

    pub fn has_outbox(&self) -> bool {
        !self.outbox.is_empty()
    }

    pub fn clear_message_inputs(&mut self) {
        for slot in &mut self.slots {
            if let PortSlot::MessageInput(v) = slot {
                *v = None;
            }
        }
    }

    /// Indices of message inputs holding a value this micro-step.
    pub fn active_inputs(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| matches!(s, PortSlot::MessageInput(Some(_))))
            .map(|(i, _)| i)
            .collect()
    }
}
