//! Owned node handles that enforce the lifecycle contract.
//!
//! A parent never calls a [`Node`] directly. It wraps each child in a
//! [`Component`], which owns the child's ports and random stream, tracks
//! the time of its last event and its planned duration, and rejects any
//! call that breaks the state machine:
//!
//! ```text
//! Uninitialized --initialize--> Active --(unplanned | planned)*--> Active --finalize--> Finalized
//! ```
//!
//! Elapsed durations are computed here from the parent's clock, so a node
//! can only ever observe `0 <= elapsed <= planned` for unplanned events and
//! `elapsed == planned` for planned ones.

use rand_chacha::ChaCha8Rng;

use crate::context::NodeContext;
use crate::error::{SimError, SimResult};
use crate::node::{EventPhase, Node, NodeIo, NodeKind};
use crate::port::{Interface, PortBuffers};
use crate::stats::ComponentStats;
use crate::time::{Duration, SuperdenseTime, TimePoint};
use crate::types::Value;

/// Lifecycle state of a component.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    Active,
    Finalized,
}

/// A node together with its runtime bookkeeping.
pub struct Component {
    name: String,
    cx: NodeContext,
    kind: NodeKind,
    node: Box<dyn Node>,
    ports: PortBuffers,
    rng: ChaCha8Rng,
    phase: Phase,
    last_event: TimePoint,
    planned: Duration,
    flow_stamp: Option<TimePoint>,
    stats: ComponentStats,
}

impl Component {
    /// Wraps `node` under `name`. The node is unbound until [`bind`](Self::bind).
    pub fn new(name: impl Into<String>, node: Box<dyn Node>) -> SimResult<Self> {
        let name = name.into();
        if name.is_empty() || name.contains('.') {
            return Err(SimError::Structure(format!(
                "invalid node name '{}': names must be non-empty and contain no '.'",
                name
            )));
        }
        let interface = node.interface();
        if let Some(duplicate) = interface.duplicate_name() {
            return Err(SimError::Structure(format!(
                "node '{}' declares port '{}' more than once",
                name, duplicate
            )));
        }
        let cx = NodeContext::detached(name.clone());
        let kind = node.kind();
        Ok(Self {
            rng: cx.rng(),
            stats: ComponentStats::new(cx.full_name(), kind),
            name,
            cx,
            kind,
            node,
            ports: PortBuffers::new(interface),
            phase: Phase::Uninitialized,
            last_event: TimePoint::ZERO,
            planned: Duration::INFINITE,
            flow_stamp: None,
        })
    }

    /// Places this component inside `parent`'s naming scope.
    pub fn bind(&mut self, parent: &NodeContext) -> SimResult<()> {
        let cx = parent.child(&self.name);
        self.attach(cx)
    }

    /// Makes this component a root with the given context.
    pub fn bind_root(&mut self, cx: NodeContext) -> SimResult<()> {
        self.attach(cx)
    }

    fn attach(&mut self, cx: NodeContext) -> SimResult<()> {
        self.rng = cx.rng();
        self.stats.full_name = cx.full_name().to_string();
        self.node.bind(&cx)?;
        self.cx = cx;
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn full_name(&self) -> &str {
        self.cx.full_name()
    }

    pub fn context(&self) -> &NodeContext {
        &self.cx
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_active(&self) -> bool {
        self.phase == Phase::Active
    }

    pub fn interface(&self) -> &Interface {
        self.ports.interface()
    }

    /// Planned duration returned by the last event.
    pub fn planned_duration(&self) -> Duration {
        self.planned
    }

    /// Coordinate of the last event.
    pub fn last_event(&self) -> TimePoint {
        self.last_event
    }

    fn violation(&self, time: SuperdenseTime, reason: impl Into<String>) -> SimError {
        SimError::contract(self.cx.full_name(), time, reason)
    }

    fn require_active(&self, time: SuperdenseTime, what: &str) -> SimResult<()> {
        match self.phase {
            Phase::Active => Ok(()),
            Phase::Uninitialized => Err(self.violation(
                time,
                format!("{} before initialization", what),
            )),
            Phase::Finalized => Err(self.violation(time, format!("{} after finalization", what))),
        }
    }

    fn check_planned(&self, time: SuperdenseTime, dt: Duration) -> SimResult<Duration> {
        if dt.is_negative() {
            return Err(self.violation(time, format!("returned negative planned duration {}", dt)));
        }
        Ok(dt)
    }

    fn elapsed(&self, time: SuperdenseTime) -> SimResult<Duration> {
        let elapsed = time.t().gap(self.last_event);
        if elapsed.is_negative() {
            return Err(self.violation(
                time,
                format!("negative elapsed duration {}", elapsed),
            ));
        }
        if elapsed > self.planned {
            return Err(self.violation(
                time,
                format!(
                    "elapsed duration {} exceeds planned duration {}",
                    elapsed, self.planned
                ),
            ));
        }
        Ok(elapsed)
    }

    fn io<'a>(
        cx: &'a NodeContext,
        ports: &'a mut PortBuffers,
        clock: &'a mut SuperdenseTime,
        rng: &'a mut ChaCha8Rng,
        phase: EventPhase,
    ) -> NodeIo<'a> {
        NodeIo::new(cx, ports, clock, rng, phase)
    }

    /// Runs the initialization event and returns the first planned duration.
    pub fn initialize(&mut self, clock: &mut SuperdenseTime) -> SimResult<Duration> {
        let time = *clock;
        if self.phase != Phase::Uninitialized {
            return Err(self.violation(time, "initialized more than once"));
        }
        self.cx.print_event(time, EventPhase::Initialization.as_str());
        let mut io = Self::io(&self.cx, &mut self.ports, clock, &mut self.rng, EventPhase::Initialization);
        let dt = self.node.initialization_event(&mut io)?;
        let dt = self.check_planned(time, dt)?;
        self.phase = Phase::Active;
        self.last_event = time.t();
        self.planned = dt;
        Ok(dt)
    }

    /// Runs an unplanned event for the messages delivered to this component.
    pub fn unplanned(&mut self, clock: &mut SuperdenseTime) -> SimResult<Duration> {
        let time = *clock;
        self.require_active(time, "unplanned event")?;
        let elapsed = self.elapsed(time)?;
        self.cx.print_event(time, EventPhase::Unplanned.as_str());
        let mut io = Self::io(&self.cx, &mut self.ports, clock, &mut self.rng, EventPhase::Unplanned);
        let result = self.node.unplanned_event(elapsed, &mut io);
        self.ports.clear_message_inputs();
        let dt = self.check_planned(time, result?)?;
        self.stats.unplanned_events += 1;
        self.last_event = time.t();
        self.planned = dt;
        Ok(dt)
    }

    /// Runs the planned event. The planned duration must have elapsed exactly.
    pub fn planned(&mut self, clock: &mut SuperdenseTime) -> SimResult<Duration> {
        let time = *clock;
        self.require_active(time, "planned event")?;
        let elapsed = time.t().gap(self.last_event);
        if self.planned.is_infinite() || elapsed != self.planned {
            return Err(self.violation(
                time,
                format!(
                    "planned event after {} but planned duration is {}",
                    elapsed, self.planned
                ),
            ));
        }
        self.cx.print_event(time, EventPhase::Planned.as_str());
        let mut io = Self::io(&self.cx, &mut self.ports, clock, &mut self.rng, EventPhase::Planned);
        let result = self.node.planned_event(elapsed, &mut io);
        self.ports.clear_message_inputs();
        let dt = self.check_planned(time, result?)?;
        self.stats.planned_events += 1;
        self.last_event = time.t();
        self.planned = dt;
        Ok(dt)
    }

    /// Runs the finalization event. No event is accepted afterwards.
    pub fn finalize(&mut self, clock: &mut SuperdenseTime) -> SimResult<()> {
        let time = *clock;
        self.require_active(time, "finalization")?;
        let elapsed = self.elapsed(time)?;
        self.phase = Phase::Finalized;
        self.cx.print_event(time, EventPhase::Finalization.as_str());
        let mut io = Self::io(&self.cx, &mut self.ports, clock, &mut self.rng, EventPhase::Finalization);
        self.node.finalization_event(elapsed, &mut io)?;
        self.last_event = time.t();
        self.planned = Duration::INFINITE;
        Ok(())
    }

    /// Brings flow outputs up to date for the current coordinate.
    ///
    /// Function nodes compute at most once per coordinate; other kinds are
    /// asked every time since their outputs may change between micro-steps.
    pub fn refresh_flow(&mut self, clock: &mut SuperdenseTime) -> SimResult<()> {
        let now = clock.t();
        if self.kind == NodeKind::Function && self.flow_stamp == Some(now) {
            return Ok(());
        }
        let mut io = Self::io(&self.cx, &mut self.ports, clock, &mut self.rng, EventPhase::Flow);
        self.node.refresh_flow(&mut io)?;
        self.flow_stamp = Some(now);
        self.stats.flow_refreshes += 1;
        Ok(())
    }

    /// Delivers a message for the next event.
    ///
    /// Returns the value back when the port already holds one this
    /// micro-step, so the caller can defer it.
    pub fn deliver(&mut self, index: usize, value: Value) -> SimResult<Option<Value>> {
        let Some(spec) = self.ports.interface().get(index) else {
            return Err(SimError::port(self.cx.full_name(), &index.to_string(), "no such port"));
        };
        if !spec.ty.accepts(&value) {
            return Err(SimError::port(
                self.cx.full_name(),
                &spec.name,
                format!("value {} is not of type {:?}", value, spec.ty),
            ));
        }
        if self.phase != Phase::Active {
            return Err(SimError::port(
                self.cx.full_name(),
                &spec.name,
                "message delivered to an inactive node",
            ));
        }
        Ok(self.ports.deliver(index, value).err())
    }

    /// True if any message input holds a value.
    pub fn has_input(&self) -> bool {
        !self.ports.active_inputs().is_empty()
    }

    pub fn set_flow_input(&mut self, index: usize, value: Option<Value>) {
        self.ports.set_flow(index, value);
    }

    pub fn port_value(&self, index: usize) -> Option<&Value> {
        self.ports.read(index)
    }

    /// Drains messages posted by the last event.
    pub fn take_outbox(&mut self) -> Vec<(usize, Value)> {
        let outbox = self.ports.take_outbox();
        self.stats.messages_posted += outbox.len() as u64;
        outbox
    }

    pub fn stats(&self) -> &ComponentStats {
        &self.stats
    }

    /// Appends this component's counters and those of everything it contains.
    pub fn collect_stats(&self, out: &mut Vec<ComponentStats>) {
        out.push(self.stats.clone());
        self.node.visit_stats(out);
    }
}

impl std::fmt::Debug for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Component")
            .field("full_name", &self.cx.full_name())
            .field("kind", &self.kind)
            .field("phase", &self.phase)
            .field("last_event", &self.last_event)
            .field("planned", &self.planned)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::ValueType;
    use serde_json::json;

    /// Plans a fixed sequence of durations and echoes input.
    struct Scripted {
        plans: Vec<Duration>,
        seen: Vec<(EventPhase, Duration)>,
    }

    impl Node for Scripted {
        fn interface(&self) -> Interface {
            Interface::new()
                .message_input("in", ValueType::Any)
                .message_output("out", ValueType::Any)
        }

        fn initialization_event(&mut self, _io: &mut NodeIo<'_>) -> SimResult<Duration> {
            Ok(self.plans.remove(0))
        }

        fn unplanned_event(&mut self, elapsed: Duration, io: &mut NodeIo<'_>) -> SimResult<Duration> {
            self.seen.push((io.phase(), elapsed));
            let value = io.message("in")?.clone();
            io.post("out", value)?;
            Ok(self.plans.remove(0))
        }

        fn planned_event(&mut self, elapsed: Duration, io: &mut NodeIo<'_>) -> SimResult<Duration> {
            self.seen.push((io.phase(), elapsed));
            Ok(self.plans.remove(0))
        }
    }

    fn at(ms: i64) -> SuperdenseTime {
        SuperdenseTime::at(TimePoint::from_origin(Duration::millis(ms)).unwrap())
    }

    fn component(plans: Vec<Duration>) -> Component {
        let node = Scripted {
            plans,
            seen: Vec::new(),
        };
        let mut c = Component::new("n", Box::new(node)).unwrap();
        c.bind(&NodeContext::detached("top")).unwrap();
        c
    }

    #[test]
    fn test_lifecycle() {
        let mut c = component(vec![Duration::millis(100), Duration::millis(50), Duration::INFINITE]);
        assert_eq!(c.full_name(), "top.n");

        let mut clock = at(0);
        assert_eq!(c.initialize(&mut clock).unwrap(), Duration::millis(100));

        let mut clock = at(40);
        assert_eq!(c.deliver(0, json!("x")).unwrap(), None);
        assert_eq!(c.deliver(0, json!("y")).unwrap(), Some(json!("y")));
        assert_eq!(c.unplanned(&mut clock).unwrap(), Duration::millis(50));
        assert_eq!(c.take_outbox(), vec![(1, json!("x"))]);
        assert!(!c.has_input());

        let mut clock = at(90);
        assert_eq!(c.planned(&mut clock).unwrap(), Duration::INFINITE);
        c.finalize(&mut at(500)).unwrap();

        assert_eq!(c.phase(), Phase::Finalized);
        assert_eq!(c.stats().unplanned_events, 1);
        assert_eq!(c.stats().planned_events, 1);
        assert_eq!(c.stats().messages_posted, 1);
    }

    #[test]
    fn test_double_initialize_is_violation() {
        let mut c = component(vec![Duration::INFINITE, Duration::INFINITE]);
        c.initialize(&mut at(0)).unwrap();
        assert!(matches!(
            c.initialize(&mut at(0)),
            Err(SimError::ContractViolation { .. })
        ));
    }

    #[test]
    fn test_event_before_initialize_is_violation() {
        let mut c = component(vec![Duration::INFINITE]);
        assert!(matches!(
            c.planned(&mut at(0)),
            Err(SimError::ContractViolation { .. })
        ));
    }

    #[test]
    fn test_early_planned_event_is_violation() {
        let mut c = component(vec![Duration::millis(100), Duration::INFINITE]);
        c.initialize(&mut at(0)).unwrap();
        let err = c.planned(&mut at(99)).unwrap_err();
        assert!(err.is_contract_violation());
        assert!(err.to_string().contains("top.n"));
    }

    #[test]
    fn test_late_unplanned_event_is_violation() {
        let mut c = component(vec![Duration::millis(100), Duration::INFINITE]);
        c.initialize(&mut at(0)).unwrap();
        c.deliver(0, json!(1)).unwrap();
        assert!(c.unplanned(&mut at(101)).unwrap_err().is_contract_violation());
    }

    #[test]
    fn test_negative_plan_is_violation() {
        let mut c = component(vec![Duration::millis(-5)]);
        assert!(c.initialize(&mut at(0)).unwrap_err().is_contract_violation());
    }

    #[test]
    fn test_finalize_once() {
        let mut c = component(vec![Duration::INFINITE]);
        c.initialize(&mut at(0)).unwrap();
        c.finalize(&mut at(10)).unwrap();
        assert!(c.finalize(&mut at(10)).unwrap_err().is_contract_violation());
        assert!(c.deliver(0, json!(1)).is_err());
    }

    #[test]
    fn test_invalid_names() {
        let node = Scripted {
            plans: vec![],
            seen: vec![],
        };
        assert!(matches!(
            Component::new("a.b", Box::new(node)),
            Err(SimError::Structure(_))
        ));
    }
}
