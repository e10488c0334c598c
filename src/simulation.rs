//! The simulation driver.
//!
//! A [`Simulation`] owns the root node of a model and advances it one
//! driver event at a time. Each event goes to the earliest of the root's
//! planned time and any externally scheduled message. The root, usually a
//! composite, resolves the whole cascade at that coordinate before control
//! returns.
//!
//! ```rust
//! use devskit::composite::CompositeBuilder;
//! use devskit::nodes::{CounterNode, GeneratorNode};
//! use devskit::port::{Interface, ValueType};
//! use devskit::simulation::{SimOptions, Simulation};
//! use devskit::time::{Duration, TimePoint};
//!
//! let model = CompositeBuilder::new(Interface::new().message_output("out", ValueType::Any))
//!     .child("gen", GeneratorNode::new(Duration::millis(10)).with_limit(3))
//!     .child("count", CounterNode::new())
//!     .link("gen.output", "count.input")
//!     .link("gen.output", "self.out")
//!     .build()
//!     .unwrap();
//!
//! let mut sim = Simulation::new("top", Box::new(model), SimOptions::default()).unwrap();
//! sim.process_remaining_events().unwrap();
//!
//! assert!(sim.finished());
//! assert_eq!(sim.take_observations().len(), 3);
//! assert_eq!(sim.time().t(), TimePoint::from_origin(Duration::millis(30)).unwrap());
//! ```

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::component::Component;
use crate::composite::CompositeNode;
use crate::config::SimConfig;
use crate::context::NodeContext;
use crate::error::{SimError, SimResult};
use crate::node::Node;
use crate::port::{PortKind, PortMode};
use crate::print::{PrintSink, TracingSink};
use crate::registry::NodeRegistry;
use crate::stats::{SimulationStats, StatsCollector};
use crate::time::{Duration, SuperdenseTime, TimePoint};
use crate::types::Value;

/// Options of a simulation run.
#[derive(Clone)]
pub struct SimOptions {
    /// Time of initialization
    pub start: TimePoint,
    /// Events at or after this time are not processed
    pub end: Option<TimePoint>,
    /// Finish as soon as nothing is scheduled
    pub can_end_early: bool,
    pub seed: u64,
    /// Cap on micro-steps per cascade
    pub max_micro_steps: Option<u64>,
    /// Receives lifecycle notifications
    pub sink: Arc<dyn PrintSink>,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            start: TimePoint::ZERO,
            end: None,
            can_end_early: true,
            seed: 0,
            max_micro_steps: None,
            sink: Arc::new(TracingSink),
        }
    }
}

impl SimOptions {
    /// Driver options from the `simulation` section of a configuration.
    pub fn from_config(config: &SimConfig) -> SimResult<Self> {
        let params = &config.simulation;
        let end = match params.end_time.filter(|d| d.is_finite()) {
            Some(offset) => Some(TimePoint::from_origin(offset)?),
            None => None,
        };
        Ok(Self {
            start: TimePoint::from_origin(params.start_time)?,
            end,
            can_end_early: params.can_end_early,
            seed: params.seed,
            max_micro_steps: params.max_micro_steps,
            sink: Arc::new(TracingSink),
        })
    }

    pub fn with_start(mut self, offset: Duration) -> SimResult<Self> {
        self.start = TimePoint::from_origin(offset)?;
        Ok(self)
    }

    pub fn with_end(mut self, offset: Duration) -> SimResult<Self> {
        self.end = Some(TimePoint::from_origin(offset)?);
        Ok(self)
    }

    pub fn with_can_end_early(mut self, enable: bool) -> Self {
        self.can_end_early = enable;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_max_micro_steps(mut self, limit: u64) -> Self {
        self.max_micro_steps = Some(limit);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn PrintSink>) -> Self {
        self.sink = sink;
        self
    }
}

impl fmt::Debug for SimOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimOptions")
            .field("start", &self.start)
            .field("end", &self.end)
            .field("can_end_early", &self.can_end_early)
            .field("seed", &self.seed)
            .field("max_micro_steps", &self.max_micro_steps)
            .finish()
    }
}

/// A message the root emitted on one of its outputs.
///
/// `time` is the coordinate at which the driver dispatched the root event
/// that produced the message, not the inner micro-step it was posted at.
/// Messages from one root event keep their posting order.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Observation {
    pub time: SuperdenseTime,
    pub port: String,
    pub value: Value,
}

/// Requests cooperative cancellation of a run.
///
/// The flag is checked between driver events; the root is still finalized.
#[derive(Clone, Debug, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What the next call to `process_next_event` will do.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Next {
    Event(SuperdenseTime),
    Finish(SuperdenseTime),
    Idle,
}

/// Drives a root node through its lifecycle.
pub struct Simulation {
    root: Component,
    start: TimePoint,
    end: Option<TimePoint>,
    can_end_early: bool,
    started: bool,
    finished: bool,
    /// Time of the last dispatched event
    now: SuperdenseTime,
    /// Clock after the last dispatch; later than `now` when the root cascaded
    frontier: SuperdenseTime,
    root_plan: Option<SuperdenseTime>,
    pending: BTreeMap<(SuperdenseTime, u64), (usize, Value)>,
    seq: u64,
    observations: Vec<Observation>,
    stop: StopHandle,
    stats: StatsCollector,
}

impl Simulation {
    /// Wraps `root` under `name`.
    ///
    /// The root may declare message inputs (injection points) and message
    /// outputs (observations) but no flow ports.
    pub fn new(name: &str, root: Box<dyn Node>, options: SimOptions) -> SimResult<Self> {
        if let Some(end) = options.end {
            if end <= options.start {
                return Err(SimError::Structure(format!(
                    "end time {} is not after start time {}",
                    end, options.start
                )));
            }
        }

        let mut root = Component::new(name, root)?;
        if let Some(port) = root.interface().iter().find(|p| p.kind.mode() == PortMode::Flow) {
            return Err(SimError::Structure(format!(
                "root node '{}' declares flow port '{}'",
                name, port.name
            )));
        }
        root.bind_root(NodeContext::new(
            name,
            options.seed,
            options.sink,
            options.max_micro_steps,
        ))?;

        let mut stats = StatsCollector::new();
        stats.set_identity(name, options.seed);
        let now = SuperdenseTime::at(options.start);

        Ok(Self {
            root,
            start: options.start,
            end: options.end,
            can_end_early: options.can_end_early,
            started: false,
            finished: false,
            now,
            frontier: now,
            root_plan: None,
            pending: BTreeMap::new(),
            seq: 0,
            observations: Vec::new(),
            stop: StopHandle::default(),
            stats,
        })
    }

    /// Builds the configured model through `registry` and wraps it.
    pub fn from_config(name: &str, config: &SimConfig, registry: &NodeRegistry) -> SimResult<Self> {
        let model = config
            .model
            .as_ref()
            .ok_or_else(|| SimError::Structure("configuration has no model".to_string()))?;
        let root = CompositeNode::from_config(model, registry)?;
        Self::new(name, Box::new(root), SimOptions::from_config(config)?)
    }

    pub fn name(&self) -> &str {
        self.root.full_name()
    }

    pub fn root(&self) -> &Component {
        &self.root
    }

    /// Time of the last processed event, or the start time before any.
    pub fn time(&self) -> SuperdenseTime {
        self.now
    }

    pub fn start_time(&self) -> TimePoint {
        self.start
    }

    pub fn end_time(&self) -> Option<TimePoint> {
        self.end
    }

    pub fn started(&self) -> bool {
        self.started
    }

    /// True when the next call will finalize instead of dispatching.
    pub fn finishing(&self) -> bool {
        self.started && !self.finished && matches!(self.next_action(), Next::Finish(_))
    }

    pub fn finished(&self) -> bool {
        self.finished
    }

    /// A handle other code can use to stop the run between events.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Time of the next event or of finalization, `None` when idle.
    pub fn next_event_time(&self) -> Option<SuperdenseTime> {
        if self.finished {
            return None;
        }
        match self.next_action() {
            Next::Event(at) | Next::Finish(at) => Some(at),
            Next::Idle => None,
        }
    }

    /// Coordinate distance from the current time to the next event.
    pub fn imminent_duration(&self) -> Duration {
        self.next_event_time()
            .map_or(Duration::INFINITE, |at| at.t().gap(self.now.t()))
    }

    /// Earliest time an external message may still be scheduled at.
    fn earliest_next(&self) -> SuperdenseTime {
        if self.frontier > self.now {
            self.frontier
        } else {
            self.now.next()
        }
    }

    fn clamp(&self, at: SuperdenseTime) -> SuperdenseTime {
        at.max(self.frontier)
    }

    fn next_action(&self) -> Next {
        if !self.started {
            return Next::Event(self.now);
        }
        let pending = self.pending.keys().next().map(|(at, _)| *at);
        let imminent = match (self.root_plan, pending) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        match (imminent, self.end) {
            (Some(at), Some(end)) if at.t() >= end => Next::Finish(self.clamp(SuperdenseTime::at(end))),
            (Some(at), _) => Next::Event(at),
            (None, _) if self.can_end_early => Next::Finish(self.frontier),
            (None, Some(end)) => Next::Finish(self.clamp(SuperdenseTime::at(end))),
            (None, None) => Next::Idle,
        }
    }

    /// Queues a message for root input `port` at time `at`.
    ///
    /// Times at or before the current coordinate are moved to the first
    /// micro-step that has not been processed yet. Returns the time the
    /// message will be delivered at.
    pub fn schedule_message(
        &mut self,
        port: &str,
        value: impl Serialize,
        at: TimePoint,
    ) -> SimResult<SuperdenseTime> {
        let name = self.root.full_name().to_string();
        if self.finished {
            return Err(SimError::port(&name, port, "simulation already finished"));
        }
        let index = self
            .root
            .interface()
            .index_of(port)
            .ok_or_else(|| SimError::port(&name, port, "no such port"))?;
        let spec = self.root.interface().get(index).cloned();
        let Some(spec) = spec.filter(|s| s.kind == PortKind::MessageInput) else {
            return Err(SimError::port(&name, port, "not a message input"));
        };
        let value = serde_json::to_value(value).map_err(|source| SimError::Payload {
            node: name.clone(),
            port: port.to_string(),
            source,
        })?;
        if !spec.ty.accepts(&value) {
            return Err(SimError::port(
                &name,
                port,
                format!("value {} is not of type {:?}", value, spec.ty),
            ));
        }

        let time = if at > self.now.t() {
            SuperdenseTime::at(at)
        } else {
            self.earliest_next()
        };
        self.push_pending(time, index, value);
        self.stats.record_injection();
        tracing::debug!(root = %name, port, %time, "message scheduled");
        Ok(time)
    }

    fn push_pending(&mut self, at: SuperdenseTime, port: usize, value: Value) {
        self.pending.insert((at, self.seq), (port, value));
        self.seq += 1;
    }

    /// Messages the root emitted so far that have not been taken yet.
    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn take_observations(&mut self) -> Vec<Observation> {
        std::mem::take(&mut self.observations)
    }

    /// Initializes the root at the start time.
    pub fn initialize(&mut self) -> SimResult<SuperdenseTime> {
        if self.started {
            return Err(SimError::contract(
                self.root.full_name(),
                self.now,
                "simulation initialized more than once",
            ));
        }
        self.started = true;
        self.stats.start(self.now);
        tracing::info!(root = self.root.full_name(), start = %self.start, "simulation started");

        self.guard(|sim| {
            let mut clock = sim.now;
            let dt = sim.root.initialize(&mut clock)?;
            sim.settle(clock, dt)?;
            Ok(sim.now)
        })
    }

    /// Processes the next event, initializing first if needed, and returns
    /// the new current time.
    ///
    /// When the end time is reached, or nothing is left to do, the root is
    /// finalized instead.
    pub fn process_next_event(&mut self) -> SimResult<SuperdenseTime> {
        if self.finished {
            return Ok(self.now);
        }
        if !self.started {
            return self.initialize();
        }
        match self.next_action() {
            Next::Event(at) => self.guard(|sim| sim.dispatch(at)),
            Next::Finish(at) => {
                self.finish(at)?;
                Ok(self.now)
            }
            Next::Idle => {
                let at = self.frontier;
                self.finish(at)?;
                Ok(self.now)
            }
        }
    }

    /// Processes every event at the next time coordinate.
    pub fn process_next_events(&mut self) -> SimResult<SuperdenseTime> {
        let first = self.process_next_event()?;
        while !self.finished {
            match self.next_action() {
                Next::Event(at) if at.t() == first.t() => {
                    self.process_next_event()?;
                }
                _ => break,
            }
        }
        Ok(self.now)
    }

    /// Processes events, and finalization, scheduled at or before `t`.
    pub fn process_events_until(&mut self, t: TimePoint) -> SimResult<SuperdenseTime> {
        while !self.finished {
            if self.stop.is_stopped() {
                self.finalize()?;
                break;
            }
            match self.next_action() {
                Next::Event(at) | Next::Finish(at) if at.t() <= t => {
                    self.process_next_event()?;
                }
                _ => break,
            }
        }
        Ok(self.now)
    }

    /// Processes events until the run is finished or stopped.
    pub fn process_remaining_events(&mut self) -> SimResult<SuperdenseTime> {
        while !self.finished {
            if self.stop.is_stopped() {
                tracing::info!(root = self.root.full_name(), time = %self.now, "stop requested");
                self.finalize()?;
                break;
            }
            self.process_next_event()?;
        }
        Ok(self.now)
    }

    /// Finalizes the root now, or at the end time if that was reached.
    pub fn finalize(&mut self) -> SimResult<()> {
        if self.finished {
            return Ok(());
        }
        if !self.started {
            self.finished = true;
            return Ok(());
        }
        let at = match self.next_action() {
            Next::Finish(at) => at,
            _ => self.frontier,
        };
        self.finish(at)
    }

    fn dispatch(&mut self, at: SuperdenseTime) -> SimResult<SuperdenseTime> {
        self.now = at;
        let mut deferred = Vec::new();
        while let Some(entry) = self.pending.first_entry() {
            if entry.key().0 != at {
                break;
            }
            let (port, value) = entry.remove();
            if let Some(value) = self.root.deliver(port, value)? {
                deferred.push((port, value));
            }
        }

        let mut clock = at;
        let result = if self.root.has_input() {
            self.root.unplanned(&mut clock)
        } else {
            self.root.planned(&mut clock)
        };
        self.frontier = clock;
        let dt = result?;
        let steps = if clock.t() == at.t() {
            clock.c().saturating_sub(at.c())
        } else {
            0
        };
        self.settle(clock, dt)?;

        // Fan-in on a root input continues at the next free micro-step.
        let retry = self.earliest_next();
        for (port, value) in deferred {
            self.push_pending(retry, port, value);
        }

        self.stats.record_event(at, steps);
        tracing::debug!(root = self.root.full_name(), time = %at, planned = %dt, steps, "event processed");
        Ok(at)
    }

    /// Records the state after an event returned `dt`.
    fn settle(&mut self, clock: SuperdenseTime, dt: Duration) -> SimResult<()> {
        self.frontier = clock;
        self.root_plan = if dt.is_infinite() {
            None
        } else if dt.is_zero() {
            Some(self.earliest_next())
        } else {
            Some(SuperdenseTime::at(self.now.t().checked_add(dt)?))
        };
        self.collect_outputs();
        Ok(())
    }

    fn collect_outputs(&mut self) {
        let outbox = self.root.take_outbox();
        if outbox.is_empty() {
            return;
        }
        self.stats.record_observations(outbox.len());
        for (port, value) in outbox {
            let port = self
                .root
                .interface()
                .get(port)
                .map_or_else(|| port.to_string(), |spec| spec.name.clone());
            self.observations.push(Observation {
                time: self.now,
                port,
                value,
            });
        }
    }

    fn finish(&mut self, at: SuperdenseTime) -> SimResult<()> {
        self.guard(|sim| {
            sim.now = at;
            let mut clock = at;
            sim.root.finalize(&mut clock)?;
            sim.collect_outputs();
            sim.finished = true;
            sim.close_stats();
            tracing::info!(root = sim.root.full_name(), time = %at, "simulation finished");
            Ok(())
        })
    }

    /// Applies the abort policy when `f` fails.
    fn guard<T>(&mut self, f: impl FnOnce(&mut Self) -> SimResult<T>) -> SimResult<T> {
        match f(self) {
            Ok(value) => Ok(value),
            Err(err) => Err(self.abort(err)),
        }
    }

    /// Stops the run after `err`, finalizing what can still be trusted.
    fn abort(&mut self, err: SimError) -> SimError {
        tracing::warn!(root = self.root.full_name(), time = %self.now, error = %err, "simulation aborted");
        self.stats.record_abort();
        if !err.is_contract_violation() && self.root.is_active() {
            let mut clock = self.frontier.max(self.now);
            if let Err(secondary) = self.root.finalize(&mut clock) {
                tracing::warn!(root = self.root.full_name(), error = %secondary, "finalization after abort failed");
            }
        }
        self.finished = true;
        self.close_stats();
        err
    }

    fn close_stats(&mut self) {
        self.stats.record_final_time(self.now);
        self.stats
            .stop(self.now.t().gap(self.start).as_secs_f64());
    }

    /// Run totals plus the current per-component counters.
    pub fn stats(&self) -> SimulationStats {
        let mut stats = self.stats.stats().clone();
        let mut components = Vec::new();
        self.root.collect_stats(&mut components);
        stats.components = components;
        stats
    }

    /// Statistics as JSON.
    pub fn export_stats(&self) -> serde_json::Value {
        serde_json::to_value(self.stats()).unwrap_or(Value::Null)
    }
}

impl fmt::Debug for Simulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Simulation")
            .field("root", &self.root)
            .field("now", &self.now)
            .field("started", &self.started)
            .field("finished", &self.finished)
            .field("pending", &self.pending.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composite::CompositeBuilder;
    use crate::node::NodeIo;
    use crate::nodes::{CounterNode, GeneratorNode, RelayNode};
    use crate::port::{Interface, ValueType};
    use crate::print::RecordingSink;
    use serde_json::json;

    fn ms(n: i64) -> TimePoint {
        TimePoint::from_origin(Duration::millis(n)).unwrap()
    }

    fn relay_model() -> Box<dyn Node> {
        let model = CompositeBuilder::new(
            Interface::new()
                .message_input("in", ValueType::Any)
                .message_output("out", ValueType::Any),
        )
        .child("relay", RelayNode::new())
        .link("self.in", "relay.input")
        .link("relay.output", "self.out")
        .build()
        .unwrap();
        Box::new(model)
    }

    #[test]
    fn test_generator_run() {
        let model = CompositeBuilder::new(Interface::new().message_output("out", ValueType::Any))
            .child("gen", GeneratorNode::new(Duration::millis(5)).with_limit(2))
            .link("gen.output", "self.out")
            .build()
            .unwrap();
        let mut sim = Simulation::new("top", Box::new(model), SimOptions::default()).unwrap();

        assert_eq!(sim.process_next_event().unwrap(), SuperdenseTime::at(ms(0)));
        assert!(sim.started());
        assert_eq!(sim.imminent_duration(), Duration::millis(5));

        assert_eq!(sim.process_next_event().unwrap(), SuperdenseTime::at(ms(5)));
        assert_eq!(sim.process_next_event().unwrap(), SuperdenseTime::at(ms(10)));
        assert!(sim.finishing());
        sim.process_next_event().unwrap();
        assert!(sim.finished());

        let seqs: Vec<_> = sim.take_observations().into_iter().map(|o| o.value["seq"].clone()).collect();
        assert_eq!(seqs, vec![json!(1), json!(2)]);
        assert_eq!(sim.stats().run.events_processed, 2);
    }

    #[test]
    fn test_end_time_stops_before_event() {
        let model = CompositeBuilder::new(Interface::new())
            .child("gen", GeneratorNode::new(Duration::millis(10)))
            .build()
            .unwrap();
        let options = SimOptions::default().with_end(Duration::millis(30)).unwrap();
        let mut sim = Simulation::new("top", Box::new(model), options).unwrap();

        sim.process_remaining_events().unwrap();
        assert_eq!(sim.time(), SuperdenseTime::at(ms(30)));
        assert_eq!(sim.stats().run.events_processed, 2);
    }

    #[test]
    fn test_scheduled_message_clamped() {
        let mut sim = Simulation::new("top", relay_model(), SimOptions::default()).unwrap();
        let first = sim.schedule_message("in", "early", ms(0)).unwrap();
        assert_eq!(first, SuperdenseTime::new(ms(0), 1));

        sim.process_next_event().unwrap();
        assert_eq!(sim.process_next_event().unwrap(), first);
        let observed = sim.take_observations();
        assert_eq!(observed.len(), 1);
        assert_eq!(observed[0].port, "out");
        assert_eq!(observed[0].value, json!("early"));

        let late = sim.schedule_message("in", 7, ms(0)).unwrap();
        assert!(late > first);
    }

    #[test]
    fn test_schedule_message_rejects_bad_port() {
        let mut sim = Simulation::new("top", relay_model(), SimOptions::default()).unwrap();
        assert!(matches!(
            sim.schedule_message("out", 1, ms(1)),
            Err(SimError::PortMisuse { .. })
        ));
        assert!(matches!(
            sim.schedule_message("missing", 1, ms(1)),
            Err(SimError::PortMisuse { .. })
        ));
    }

    #[test]
    fn test_root_flow_port_rejected() {
        let model = CompositeBuilder::new(Interface::new().flow_output("count", ValueType::Int))
            .child("c", CounterNode::new())
            .link("c.count", "self.count")
            .build()
            .unwrap();
        assert!(matches!(
            Simulation::new("top", Box::new(model), SimOptions::default()),
            Err(SimError::Structure(_))
        ));
    }

    #[test]
    fn test_stop_handle_finalizes() {
        let sink = Arc::new(RecordingSink::new());
        let model = CompositeBuilder::new(Interface::new())
            .child("gen", GeneratorNode::new(Duration::millis(1)))
            .build()
            .unwrap();
        let options = SimOptions::default().with_sink(sink.clone());
        let mut sim = Simulation::new("top", Box::new(model), options).unwrap();

        sim.process_next_events().unwrap();
        sim.process_next_events().unwrap();
        sim.stop_handle().stop();
        sim.process_remaining_events().unwrap();

        assert!(sim.finished());
        let lines = sink.lines_for("top.gen");
        assert_eq!(lines.last().map(String::as_str), Some("1 ms|1|top.gen$finalization"));
    }

    /// Fails on its first planned event.
    struct Faulty;

    impl Node for Faulty {
        fn interface(&self) -> Interface {
            Interface::new()
        }

        fn initialization_event(&mut self, _io: &mut NodeIo<'_>) -> SimResult<Duration> {
            Ok(Duration::millis(1))
        }

        fn planned_event(&mut self, _elapsed: Duration, io: &mut NodeIo<'_>) -> SimResult<Duration> {
            Err(io.fail("broken"))
        }
    }

    #[test]
    fn test_model_error_aborts_and_finalizes() {
        let sink = Arc::new(RecordingSink::new());
        let model = CompositeBuilder::new(Interface::new())
            .child("bad", Faulty)
            .build()
            .unwrap();
        let options = SimOptions::default().with_sink(sink.clone());
        let mut sim = Simulation::new("top", Box::new(model), options).unwrap();

        let err = sim.process_remaining_events().unwrap_err();
        assert!(matches!(err, SimError::Model { .. }));
        assert!(sim.finished());
        assert!(sim.stats().run.aborted);
        assert!(sink
            .lines_for("top")
            .iter()
            .any(|l| l.ends_with("top$finalization")));
    }

    #[test]
    fn test_initialize_twice_rejected() {
        let mut sim = Simulation::new("top", relay_model(), SimOptions::default()).unwrap();
        sim.initialize().unwrap();
        assert!(sim.initialize().unwrap_err().is_contract_violation());
    }
}
