//! Node definitions and the `Node` trait.
//!
//! Every model type (atomic, composite, collection and the function,
//! parameter and statistic leaves) implements the same lifecycle protocol.
//! The engine drives nodes only through this trait, handing each call a
//! [`NodeIo`] for reading inputs, writing outputs and reaching run services.

use rand_chacha::ChaCha8Rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::context::NodeContext;
use crate::error::{SimError, SimResult};
use crate::port::{Interface, PortBuffers, PortKind};
use crate::stats::ComponentStats;
use crate::time::{Duration, SuperdenseTime};
use crate::types::Value;

/// The kind of a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    /// Primitive event-driven behavior
    Atomic,
    /// Fixed children and static couplings
    Composite,
    /// Runtime population of identity-keyed agents
    Collection,
    /// Stateless flow computation
    Function,
    /// Constant flow source
    Parameter,
    /// Flow sink captured at finalization
    Statistic,
}

/// Which lifecycle call a [`NodeIo`] was created for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventPhase {
    Initialization,
    Unplanned,
    Planned,
    Finalization,
    Flow,
}

impl EventPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            EventPhase::Initialization => "initialization",
            EventPhase::Unplanned => "unplanned",
            EventPhase::Planned => "planned",
            EventPhase::Finalization => "finalization",
            EventPhase::Flow => "flow",
        }
    }
}

/// The lifecycle protocol shared by all nodes.
///
/// A node is initialized once, then receives any number of unplanned and
/// planned events, then is finalized once. Each event returns the planned
/// duration until the node's next internal event; [`Duration::INFINITE`]
/// means there is none.
///
/// - `unplanned_event` runs when message inputs arrived before the planned
///   duration elapsed. If input arrives exactly when the plan elapses this
///   call takes precedence and the planned event is not fired separately.
/// - `planned_event` runs when the planned duration elapsed with no input;
///   `elapsed` then equals the planned duration.
pub trait Node: Send {
    fn kind(&self) -> NodeKind {
        NodeKind::Atomic
    }

    /// Ports this node exposes. Called once when the node is wrapped.
    fn interface(&self) -> Interface;

    /// Called when the node receives its context; containers bind children here.
    fn bind(&mut self, _cx: &NodeContext) -> SimResult<()> {
        Ok(())
    }

    fn initialization_event(&mut self, io: &mut NodeIo<'_>) -> SimResult<Duration>;

    fn unplanned_event(&mut self, _elapsed: Duration, _io: &mut NodeIo<'_>) -> SimResult<Duration> {
        Ok(Duration::INFINITE)
    }

    fn planned_event(&mut self, _elapsed: Duration, _io: &mut NodeIo<'_>) -> SimResult<Duration> {
        Ok(Duration::INFINITE)
    }

    fn finalization_event(&mut self, _elapsed: Duration, _io: &mut NodeIo<'_>) -> SimResult<()> {
        Ok(())
    }

    /// Recomputes flow outputs from flow inputs.
    ///
    /// The parent calls this lazily, at most once per time coordinate for
    /// function and composite nodes.
    fn refresh_flow(&mut self, _io: &mut NodeIo<'_>) -> SimResult<()> {
        Ok(())
    }

    /// Appends statistics of nested components.
    fn visit_stats(&self, _out: &mut Vec<ComponentStats>) {}
}

/// Handle passed to every lifecycle call.
pub struct NodeIo<'a> {
    cx: &'a NodeContext,
    ports: &'a mut PortBuffers,
    clock: &'a mut SuperdenseTime,
    rng: &'a mut ChaCha8Rng,
    phase: EventPhase,
}

impl<'a> NodeIo<'a> {
    pub(crate) fn new(
        cx: &'a NodeContext,
        ports: &'a mut PortBuffers,
        clock: &'a mut SuperdenseTime,
        rng: &'a mut ChaCha8Rng,
        phase: EventPhase,
    ) -> Self {
        Self {
            cx,
            ports,
            clock,
            rng,
            phase,
        }
    }

    /// Current superdense time.
    pub fn time(&self) -> SuperdenseTime {
        *self.clock
    }

    pub fn full_name(&self) -> &str {
        self.cx.full_name()
    }

    pub fn context(&self) -> &NodeContext {
        self.cx
    }

    pub fn phase(&self) -> EventPhase {
        self.phase
    }

    /// This node's deterministic random stream.
    pub fn rng(&mut self) -> &mut ChaCha8Rng {
        &mut *self.rng
    }

    /// Sends `text` to the run's print sink.
    pub fn print(&self, text: &str) {
        self.cx.print(*self.clock, text);
    }

    /// Builds a model error attributed to this node.
    pub fn fail(&self, message: impl Into<String>) -> SimError {
        SimError::Model {
            node: self.cx.full_name().to_string(),
            message: message.into(),
        }
    }

    fn port_index(&self, port: &str, kind: PortKind) -> SimResult<usize> {
        let interface = self.ports.interface();
        let index = interface
            .index_of(port)
            .ok_or_else(|| SimError::port(self.cx.full_name(), port, "no such port"))?;
        match interface.get(index) {
            Some(spec) if spec.kind == kind => Ok(index),
            Some(spec) => Err(SimError::port(
                self.cx.full_name(),
                port,
                format!("port is {:?}, not {:?}", spec.kind, kind),
            )),
            None => Err(SimError::port(self.cx.full_name(), port, "no such port")),
        }
    }

    fn encode(&self, port: &str, value: impl Serialize) -> SimResult<Value> {
        serde_json::to_value(value).map_err(|source| SimError::Payload {
            node: self.cx.full_name().to_string(),
            port: port.to_string(),
            source,
        })
    }

    fn decode<T: DeserializeOwned>(&self, port: &str, value: &Value) -> SimResult<T> {
        T::deserialize(value).map_err(|source| SimError::Payload {
            node: self.cx.full_name().to_string(),
            port: port.to_string(),
            source,
        })
    }

    fn check_type(&self, index: usize, value: &Value) -> SimResult<()> {
        match self.ports.interface().get(index) {
            Some(spec) if !spec.ty.accepts(value) => Err(SimError::port(
                self.cx.full_name(),
                &spec.name,
                format!("value {} is not of type {:?}", value, spec.ty),
            )),
            _ => Ok(()),
        }
    }

    /// Value of a flow input. Reading an unconnected input is port misuse.
    pub fn flow_input(&self, port: &str) -> SimResult<&Value> {
        let index = self.port_index(port, PortKind::FlowInput)?;
        self.ports.read(index).ok_or_else(|| {
            SimError::port(self.cx.full_name(), port, "flow input has no connected value")
        })
    }

    pub fn flow_input_as<T: DeserializeOwned>(&self, port: &str) -> SimResult<T> {
        let value = self.flow_input(port)?;
        self.decode(port, value)
    }

    /// Publishes a flow output value.
    pub fn set_flow_output(&mut self, port: &str, value: impl Serialize) -> SimResult<()> {
        let index = self.port_index(port, PortKind::FlowOutput)?;
        let value = self.encode(port, value)?;
        self.check_type(index, &value)?;
        self.ports.set_flow(index, Some(value));
        Ok(())
    }

    /// Current value of one of this node's own flow outputs.
    pub fn flow_output(&self, port: &str) -> SimResult<Option<&Value>> {
        let index = self.port_index(port, PortKind::FlowOutput)?;
        Ok(self.ports.read(index))
    }

    /// Returns true if a message arrived on `port` this micro-step.
    pub fn received(&self, port: &str) -> bool {
        self.port_index(port, PortKind::MessageInput)
            .map(|index| self.ports.is_occupied(index))
            .unwrap_or(false)
    }

    /// The message delivered on `port` this micro-step.
    pub fn message(&self, port: &str) -> SimResult<&Value> {
        let index = self.port_index(port, PortKind::MessageInput)?;
        self.ports.read(index).ok_or_else(|| {
            SimError::port(
                self.cx.full_name(),
                port,
                "no message was delivered in this micro-step",
            )
        })
    }

    pub fn message_as<T: DeserializeOwned>(&self, port: &str) -> SimResult<T> {
        let value = self.message(port)?;
        self.decode(port, value)
    }

    /// Names of message inputs holding a value, in declaration order.
    pub fn active_inputs(&self) -> Vec<&str> {
        self.ports
            .active_inputs()
            .into_iter()
            .filter_map(|i| self.ports.interface().get(i).map(|p| p.name.as_str()))
            .collect()
    }

    /// Posts a message on an output port.
    ///
    /// Only allowed from unplanned and planned events.
    pub fn post(&mut self, port: &str, value: impl Serialize) -> SimResult<()> {
        let index = self.port_index(port, PortKind::MessageOutput)?;
        let value = self.encode(port, value)?;
        self.post_value(index, value)
    }

    pub(crate) fn post_value(&mut self, index: usize, value: Value) -> SimResult<()> {
        if !matches!(self.phase, EventPhase::Unplanned | EventPhase::Planned) {
            let name = self
                .ports
                .interface()
                .get(index)
                .map(|p| p.name.clone())
                .unwrap_or_default();
            return Err(SimError::port(
                self.cx.full_name(),
                &name,
                format!("messages cannot be posted during {}", self.phase.as_str()),
            ));
        }
        self.check_type(index, &value)?;
        self.ports.post(index, value);
        Ok(())
    }

    pub(crate) fn ports(&self) -> &PortBuffers {
        &*self.ports
    }

    pub(crate) fn ports_mut(&mut self) -> &mut PortBuffers {
        &mut *self.ports
    }

    pub(crate) fn clock_mut(&mut self) -> &mut SuperdenseTime {
        &mut *self.clock
    }
}
