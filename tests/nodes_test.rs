//! Tests for the built-in nodes running inside a simulation.
//!
//! Tests DelayNode, ProbabilisticDelayNode, CounterNode and StatisticNode.

use devskit::composite::CompositeBuilder;
use devskit::nodes::probabilistic::{DelayDistribution, ProbabilisticDelayNode};
use devskit::nodes::{CounterNode, DelayNode, GeneratorNode, StatisticNode};
use devskit::port::{Interface, ValueType};
use devskit::simulation::{SimOptions, Simulation};
use devskit::time::{Duration, TimePoint};
use serde_json::json;

fn point(ms: i64) -> TimePoint {
    TimePoint::from_origin(Duration::millis(ms)).unwrap()
}

fn out_interface() -> Interface {
    Interface::new().message_output("out", ValueType::Any)
}

fn observed_times(sim: &Simulation) -> Vec<TimePoint> {
    sim.observations().iter().map(|o| o.time.t()).collect()
}

// ============================================================================
// DelayNode Tests
// ============================================================================

#[test]
fn test_delay_chain_adds_up() {
    let model = CompositeBuilder::new(out_interface())
        .child("gen", GeneratorNode::new(Duration::millis(10)).with_limit(3))
        .child("d1", DelayNode::new(Duration::millis(5)))
        .child("d2", DelayNode::new(Duration::millis(7)))
        .link("gen.output", "d1.input")
        .link("d1.output", "d2.input")
        .link("d2.output", "self.out")
        .build()
        .unwrap();
    let mut sim = Simulation::new("top", Box::new(model), SimOptions::default()).unwrap();
    sim.process_remaining_events().unwrap();

    assert_eq!(observed_times(&sim), vec![point(22), point(32), point(42)]);
    let seqs: Vec<_> = sim.observations().iter().map(|o| o.value["seq"].clone()).collect();
    assert_eq!(seqs, vec![json!(1), json!(2), json!(3)]);
}

#[test]
fn test_delay_holds_overlapping_messages() {
    // Period shorter than the delay, so several messages are in flight.
    let model = CompositeBuilder::new(out_interface())
        .child("gen", GeneratorNode::new(Duration::millis(2)).with_limit(4))
        .child("link", DelayNode::new(Duration::millis(5)))
        .link("gen.output", "link.input")
        .link("link.output", "self.out")
        .build()
        .unwrap();
    let mut sim = Simulation::new("top", Box::new(model), SimOptions::default()).unwrap();
    sim.process_remaining_events().unwrap();

    assert_eq!(
        observed_times(&sim),
        vec![point(7), point(9), point(11), point(13)]
    );
}

#[test]
fn test_simultaneous_releases_keep_arrival_order() {
    let model = CompositeBuilder::new(out_interface())
        .child("g1", GeneratorNode::new(Duration::millis(10)).with_limit(1))
        .child("g2", GeneratorNode::new(Duration::millis(10)).with_limit(2))
        .child("link", DelayNode::new(Duration::millis(5)))
        .link("g1.output", "link.input")
        .link("g2.output", "link.input")
        .link("link.output", "self.out")
        .build()
        .unwrap();
    let mut sim = Simulation::new("top", Box::new(model), SimOptions::default()).unwrap();
    sim.process_remaining_events().unwrap();

    // g1 and g2 both arrive at 10 ms (one micro-step apart) and leave together.
    assert_eq!(observed_times(&sim), vec![point(15), point(15), point(25)]);
}

// ============================================================================
// ProbabilisticDelayNode Tests
// ============================================================================

fn jitter_model(extra_random_node: bool) -> Box<dyn devskit::Node> {
    let uniform = DelayDistribution::Uniform {
        min: Duration::millis(1),
        max: Duration::millis(100),
    };
    let mut builder = CompositeBuilder::new(out_interface())
        .child("gen", GeneratorNode::new(Duration::millis(1)).with_limit(20))
        .child("jitter", ProbabilisticDelayNode::new(uniform.clone()))
        .link("gen.output", "jitter.input")
        .link("jitter.output", "self.out");
    if extra_random_node {
        builder = builder
            .child("noise", ProbabilisticDelayNode::new(uniform))
            .link("gen.output", "noise.input");
    }
    Box::new(builder.build().unwrap())
}

fn jitter_times(seed: u64, extra_random_node: bool) -> Vec<TimePoint> {
    let options = SimOptions::default().with_seed(seed);
    let mut sim = Simulation::new("top", jitter_model(extra_random_node), options).unwrap();
    sim.process_remaining_events().unwrap();
    observed_times(&sim)
}

#[test]
fn test_probabilistic_delay_reproducible() {
    let first = jitter_times(42, false);
    assert_eq!(first.len(), 20);
    assert_eq!(first, jitter_times(42, false));
    assert_ne!(first, jitter_times(43, false));
}

#[test]
fn test_random_streams_are_per_node() {
    // Another node drawing numbers does not shift this node's samples.
    assert_eq!(jitter_times(42, false), jitter_times(42, true));
}

#[test]
fn test_probabilistic_delay_within_bounds() {
    let times = jitter_times(7, false);
    let earliest = point(1 + 1);
    let latest = point(20 + 100);
    for t in &times {
        assert!(*t >= earliest && *t <= latest, "{} out of range", t);
    }
    // Output order follows release time.
    assert!(times.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn test_exponential_delay_is_non_negative() {
    let model = CompositeBuilder::new(out_interface())
        .child("gen", GeneratorNode::new(Duration::millis(1)).with_limit(50))
        .child(
            "svc",
            ProbabilisticDelayNode::new(DelayDistribution::Exponential {
                mean: Duration::millis(3),
            }),
        )
        .link("gen.output", "svc.input")
        .link("svc.output", "self.out")
        .build()
        .unwrap();
    let mut sim = Simulation::new("top", Box::new(model), SimOptions::default().with_seed(3)).unwrap();
    sim.process_remaining_events().unwrap();

    let observations = sim.take_observations();
    assert_eq!(observations.len(), 50);
    for o in observations {
        let seq = o.value["seq"].as_i64().unwrap();
        assert!(o.time.t() >= point(seq));
    }
}

// ============================================================================
// Flow Nodes
// ============================================================================

#[test]
fn test_statistic_captures_counter_at_finalization() {
    let (statistic, handle) = StatisticNode::new();
    let model = CompositeBuilder::new(Interface::new())
        .child("gen", GeneratorNode::new(Duration::millis(3)).with_limit(4))
        .child("count", CounterNode::new())
        .child("stat", statistic)
        .link("gen.output", "count.input")
        .link("count.count", "stat.statistic")
        .build()
        .unwrap();
    let mut sim = Simulation::new("top", Box::new(model), SimOptions::default()).unwrap();
    sim.process_remaining_events().unwrap();

    assert!(handle.is_captured());
    assert_eq!(handle.value_as::<u64>().unwrap().unwrap(), 4);
}

#[test]
fn test_statistic_captures_value_at_end_time() {
    let (statistic, handle) = StatisticNode::new();
    let model = CompositeBuilder::new(Interface::new())
        .child("gen", GeneratorNode::new(Duration::millis(10)))
        .child("count", CounterNode::new())
        .child("stat", statistic)
        .link("gen.output", "count.input")
        .link("count.count", "stat.statistic")
        .build()
        .unwrap();
    let options = SimOptions::default().with_end(Duration::millis(45)).unwrap();
    let mut sim = Simulation::new("top", Box::new(model), options).unwrap();
    sim.process_remaining_events().unwrap();

    assert_eq!(handle.value_as::<u64>().unwrap().unwrap(), 4);
}
