//! Collection tests driven through a full simulation.
//!
//! Most tests use the collection as the root node, so spawn and kill
//! requests arrive as scheduled messages and gathered agent output shows up
//! as observations. The last one nests a collection inside a composite.

use std::collections::HashMap;
use std::sync::Arc;

use devskit::collection::{
    Agents, CollectionBuilder, CollectionModel, CollectionNode, IdentityPolicy, Prototype,
};
use devskit::composite::CompositeBuilder;
use devskit::node::NodeIo;
use devskit::nodes::GeneratorNode;
use devskit::port::{Interface, ValueType};
use devskit::print::RecordingSink;
use devskit::simulation::{Observation, SimOptions, Simulation};
use devskit::time::{Duration, SuperdenseTime, TimePoint};
use devskit::{create_default_registry, SimError, SimResult, Value};
use parking_lot::Mutex;
use serde_json::json;

// ============================================================================
// Test Model
// ============================================================================

type Seen = Arc<Mutex<Vec<(String, Value)>>>;

/// Adds and removes agents on request, reports the population size on a
/// fixed period and records what the agents emit.
#[derive(Default)]
struct Registrar {
    census_period: Option<Duration>,
    seen: Seen,
}

impl Registrar {
    fn next_census(&self) -> Duration {
        self.census_period.unwrap_or(Duration::INFINITE)
    }
}

impl CollectionModel<String> for Registrar {
    fn macro_initialization_event(
        &mut self,
        _agents: &mut Agents<'_, String>,
        _io: &mut NodeIo<'_>,
    ) -> SimResult<Duration> {
        Ok(self.next_census())
    }

    fn macro_unplanned_event(
        &mut self,
        elapsed: Duration,
        agents: &mut Agents<'_, String>,
        io: &mut NodeIo<'_>,
    ) -> SimResult<Duration> {
        if io.received("spawn") {
            agents.add(io.message_as("spawn")?)?;
        }
        if io.received("kill") {
            agents.remove(&io.message_as("kill")?)?;
        }
        // Keep the census on its period.
        Ok(self
            .census_period
            .and_then(|period| period.checked_sub(elapsed))
            .unwrap_or(Duration::INFINITE))
    }

    fn macro_planned_event(
        &mut self,
        _elapsed: Duration,
        agents: &mut Agents<'_, String>,
        io: &mut NodeIo<'_>,
    ) -> SimResult<Duration> {
        io.post("census", agents.len())?;
        Ok(self.next_census())
    }

    fn agent_output(
        &mut self,
        id: &String,
        _port: &str,
        value: &Value,
        _agents: &mut Agents<'_, String>,
        _io: &mut NodeIo<'_>,
    ) -> SimResult<Option<Duration>> {
        self.seen.lock().push((id.clone(), value.clone()));
        Ok(None)
    }
}

fn point(ms: i64) -> TimePoint {
    TimePoint::from_origin(Duration::millis(ms)).unwrap()
}

fn pool(model: Registrar, policy: IdentityPolicy) -> CollectionNode<String, Registrar> {
    let prototype = Prototype::new(
        Interface::new().message_output("output", ValueType::Object),
        |_: &String| GeneratorNode::new(Duration::millis(10)).with_limit(2),
    );
    CollectionBuilder::new(
        Interface::new()
            .message_input("spawn", ValueType::Text)
            .message_input("kill", ValueType::Text)
            .message_output("output", ValueType::Any)
            .message_output("census", ValueType::Int),
        prototype,
    )
    .policy(policy)
    .link("agent.output", "self.output")
    .build(model)
    .unwrap()
}

fn simulation(model: Registrar, policy: IdentityPolicy, options: SimOptions) -> Simulation {
    Simulation::new("pool", Box::new(pool(model, policy)), options).unwrap()
}

fn times_on(observations: &[Observation], port: &str) -> Vec<TimePoint> {
    observations
        .iter()
        .filter(|o| o.port == port)
        .map(|o| o.time.t())
        .collect()
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn test_agents_run_from_their_spawn_time() {
    let seen = Seen::default();
    let model = Registrar {
        seen: seen.clone(),
        ..Default::default()
    };
    let mut sim = simulation(model, IdentityPolicy::Strict, SimOptions::default());
    sim.schedule_message("spawn", "a", point(1)).unwrap();
    sim.schedule_message("spawn", "b", point(5)).unwrap();
    sim.process_remaining_events().unwrap();

    let observations = sim.take_observations();
    assert_eq!(
        times_on(&observations, "output"),
        vec![point(11), point(15), point(21), point(25)]
    );
    assert_eq!(
        *seen.lock(),
        vec![
            ("a".to_string(), json!({ "seq": 1 })),
            ("b".to_string(), json!({ "seq": 1 })),
            ("a".to_string(), json!({ "seq": 2 })),
            ("b".to_string(), json!({ "seq": 2 })),
        ]
    );
}

#[test]
fn test_killed_agent_is_finalized_and_silent() {
    let sink = Arc::new(RecordingSink::new());
    let seen = Seen::default();
    let model = Registrar {
        seen: seen.clone(),
        ..Default::default()
    };
    let options = SimOptions::default().with_sink(sink.clone());
    let mut sim = simulation(model, IdentityPolicy::Strict, options);
    sim.schedule_message("spawn", "a", point(1)).unwrap();
    sim.schedule_message("kill", "a", point(15)).unwrap();
    sim.process_remaining_events().unwrap();

    assert_eq!(times_on(sim.observations(), "output"), vec![point(11)]);
    assert_eq!(seen.lock().len(), 1);
    assert_eq!(
        sink.lines_for("pool.a"),
        vec![
            "1 ms|0|pool.a$initialization".to_string(),
            "11 ms|0|pool.a$planned".to_string(),
            "15 ms|0|pool.a$finalization".to_string(),
        ]
    );
}

#[test]
fn test_readded_agent_starts_fresh() {
    let seen = Seen::default();
    let model = Registrar {
        seen: seen.clone(),
        ..Default::default()
    };
    let mut sim = simulation(model, IdentityPolicy::Strict, SimOptions::default());
    sim.schedule_message("spawn", "a", point(1)).unwrap();
    sim.schedule_message("kill", "a", point(15)).unwrap();
    sim.schedule_message("spawn", "a", point(17)).unwrap();
    sim.process_remaining_events().unwrap();

    assert_eq!(
        times_on(sim.observations(), "output"),
        vec![point(11), point(27), point(37)]
    );
    let sequence: Vec<Value> = seen.lock().iter().map(|(_, v)| v["seq"].clone()).collect();
    assert_eq!(sequence, vec![json!(1), json!(1), json!(2)]);
}

#[test]
fn test_macro_plan_survives_membership_changes() {
    let model = Registrar {
        census_period: Some(Duration::millis(10)),
        ..Default::default()
    };
    let options = SimOptions::default().with_end(Duration::millis(35)).unwrap();
    let mut sim = simulation(model, IdentityPolicy::Strict, options);
    sim.schedule_message("spawn", "a", point(1)).unwrap();
    sim.schedule_message("spawn", "b", point(12)).unwrap();
    sim.process_remaining_events().unwrap();

    let census: Vec<(TimePoint, Value)> = sim
        .observations()
        .iter()
        .filter(|o| o.port == "census")
        .map(|o| (o.time.t(), o.value.clone()))
        .collect();
    assert_eq!(
        census,
        vec![(point(10), json!(1)), (point(20), json!(2)), (point(30), json!(2))]
    );
    assert_eq!(sim.time(), SuperdenseTime::at(point(35)));
}

// ============================================================================
// Identity Policy
// ============================================================================

#[test]
fn test_strict_duplicate_aborts_run() {
    let sink = Arc::new(RecordingSink::new());
    let options = SimOptions::default().with_sink(sink.clone());
    let mut sim = simulation(Registrar::default(), IdentityPolicy::Strict, options);
    sim.schedule_message("spawn", "a", point(1)).unwrap();
    sim.schedule_message("spawn", "a", point(2)).unwrap();

    let err = sim.process_remaining_events().unwrap_err();
    match err {
        SimError::Identity { node, agent, .. } => {
            assert_eq!(node, "pool");
            assert_eq!(agent, "a");
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(sim.finished());
    assert!(sim.stats().run.aborted);
    // The error is not a contract violation, so the population is finalized.
    let last = sink.lines_for("pool.a").pop().unwrap();
    assert!(last.ends_with("$finalization"), "{}", last);
}

#[test]
fn test_lenient_ignores_bad_requests() {
    let seen = Seen::default();
    let model = Registrar {
        seen: seen.clone(),
        ..Default::default()
    };
    let mut sim = simulation(model, IdentityPolicy::Lenient, SimOptions::default());
    sim.schedule_message("spawn", "a", point(1)).unwrap();
    sim.schedule_message("spawn", "a", point(2)).unwrap();
    sim.schedule_message("kill", "ghost", point(3)).unwrap();
    sim.process_remaining_events().unwrap();

    // The duplicate did not reset the first agent's plan.
    assert_eq!(
        times_on(sim.observations(), "output"),
        vec![point(11), point(21)]
    );
    assert!(!sim.stats().run.aborted);
}

#[test]
fn test_agent_stats_are_reported() {
    let mut sim = simulation(Registrar::default(), IdentityPolicy::Strict, SimOptions::default());
    sim.schedule_message("spawn", "a", point(1)).unwrap();
    sim.schedule_message("spawn", "b", point(2)).unwrap();
    sim.process_events_until(point(12)).unwrap();

    let stats = sim.stats();
    let names: Vec<&str> = stats.components.iter().map(|c| c.full_name.as_str()).collect();
    assert_eq!(names, vec!["pool", "pool.a", "pool.b"]);
    let a = &stats.components[1];
    assert_eq!(a.planned_events, 1);
    assert_eq!(a.messages_posted, 1);
}

#[test]
fn test_agent_stats_survive_the_run() {
    let mut sim = simulation(Registrar::default(), IdentityPolicy::Strict, SimOptions::default());
    sim.schedule_message("spawn", "a", point(1)).unwrap();
    sim.schedule_message("spawn", "b", point(2)).unwrap();
    sim.schedule_message("kill", "a", point(15)).unwrap();
    sim.process_remaining_events().unwrap();

    let stats = sim.stats();
    let names: Vec<&str> = stats.components.iter().map(|c| c.full_name.as_str()).collect();
    assert_eq!(names, vec!["pool", "pool.a", "pool.b"]);
    // a was removed after its first output, b ran to its limit.
    assert_eq!(stats.components[1].planned_events, 1);
    assert_eq!(stats.components[2].planned_events, 2);
    assert_eq!(stats.components[2].messages_posted, 2);
}

// ============================================================================
// Nesting
// ============================================================================

/// Adds the requested agent, restarting it if it already exists.
struct Recycler;

impl CollectionModel<String> for Recycler {
    fn macro_initialization_event(
        &mut self,
        _agents: &mut Agents<'_, String>,
        _io: &mut NodeIo<'_>,
    ) -> SimResult<Duration> {
        Ok(Duration::INFINITE)
    }

    fn macro_unplanned_event(
        &mut self,
        _elapsed: Duration,
        agents: &mut Agents<'_, String>,
        io: &mut NodeIo<'_>,
    ) -> SimResult<Duration> {
        let id: String = io.message_as("restart")?;
        if agents.contains(&id) {
            agents.remove(&id)?;
        }
        agents.add(id)?;
        Ok(Duration::INFINITE)
    }
}

#[test]
fn test_registry_built_collection_inside_composite() {
    let registry = create_default_registry();
    let prototype = Prototype::from_registry(
        &registry,
        "Generator",
        HashMap::from([
            ("period".to_string(), json!("10 ms")),
            ("limit".to_string(), json!(2)),
        ]),
    )
    .unwrap();
    let pool = CollectionBuilder::new(
        Interface::new()
            .message_input("restart", ValueType::Text)
            .message_output("output", ValueType::Any),
        prototype,
    )
    .link("agent.output", "self.output")
    .build(Recycler)
    .unwrap();
    let model = CompositeBuilder::new(
        Interface::new()
            .message_input("cmd", ValueType::Text)
            .message_output("out", ValueType::Any),
    )
    .child("pool", pool)
    .link("self.cmd", "pool.restart")
    .link("pool.output", "self.out")
    .build()
    .unwrap();

    let sink = Arc::new(RecordingSink::new());
    let options = SimOptions::default().with_sink(sink.clone());
    let mut sim = Simulation::new("top", Box::new(model), options).unwrap();
    sim.schedule_message("cmd", "a", point(1)).unwrap();
    sim.schedule_message("cmd", "a", point(15)).unwrap();
    sim.process_remaining_events().unwrap();

    // Remove and re-add in one hook: the old agent is finalized, the new
    // one starts its own schedule from 15 ms.
    assert_eq!(
        times_on(sim.observations(), "out"),
        vec![point(11), point(25), point(35)]
    );
    let sequence: Vec<Value> = sim.observations().iter().map(|o| o.value["seq"].clone()).collect();
    assert_eq!(sequence, vec![json!(1), json!(1), json!(2)]);
    assert_eq!(
        sink.lines_for("top.pool.a")[..6].to_vec(),
        vec![
            "1 ms|0|top.pool.a$initialization".to_string(),
            "11 ms|0|top.pool.a$planned".to_string(),
            "15 ms|0|top.pool.a$finalization".to_string(),
            "15 ms|0|top.pool.a$initialization".to_string(),
            "25 ms|0|top.pool.a$planned".to_string(),
            "35 ms|0|top.pool.a$planned".to_string(),
        ]
    );

    // Both incarnations keep their counters.
    let stats = sim.stats();
    let agents: Vec<u64> = stats
        .components
        .iter()
        .filter(|c| c.full_name == "top.pool.a")
        .map(|c| c.planned_events)
        .collect();
    assert_eq!(agents, vec![1, 2]);
}
