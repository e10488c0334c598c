//! Probabilistic delay node implementation.
//!
//! The `ProbabilisticDelayNode` holds each message for a duration drawn
//! from a [`DelayDistribution`], simulating variable latency components.
//! Samples come from the node's own random stream, so a run is reproducible
//! from its seed and independent of how many other nodes draw numbers.

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::delay::DelayLine;
use crate::error::SimResult;
use crate::node::{Node, NodeIo};
use crate::port::{Interface, ValueType};
use crate::time::{Duration, Scale};

/// Distribution type for probabilistic delays.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DelayDistribution {
    /// Fixed delay (deterministic)
    Fixed { delay: Duration },
    /// Uniform distribution between min and max
    Uniform { min: Duration, max: Duration },
    /// Normal distribution with mean and standard deviation.
    /// Samples are clamped to be non-negative.
    Normal { mean: Duration, std_dev: Duration },
    /// Exponential distribution with the given mean
    Exponential { mean: Duration },
}

impl DelayDistribution {
    /// Scale samples are rounded to: one level finer than the finest parameter.
    fn resolution(&self) -> Scale {
        match self {
            DelayDistribution::Fixed { delay } => delay.precision(),
            DelayDistribution::Uniform { min, max } => min.precision().min(max.precision()).finer(),
            DelayDistribution::Normal { mean, std_dev } => {
                mean.precision().min(std_dev.precision()).finer()
            }
            DelayDistribution::Exponential { mean } => mean.precision().finer(),
        }
    }

    /// Draws one delay.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let resolution = self.resolution();
        match self {
            DelayDistribution::Fixed { delay } => *delay,
            DelayDistribution::Uniform { min, max } => {
                if min >= max {
                    return *min;
                }
                let (lo, hi) = (min.as_secs_f64(), max.as_secs_f64());
                let value = lo + rng.gen::<f64>() * (hi - lo);
                Duration::from_secs_f64(value, resolution).clamp(*min, *max)
            }
            DelayDistribution::Normal { mean, std_dev } => {
                // Box-Muller
                let u1 = 1.0 - rng.gen::<f64>();
                let u2 = rng.gen::<f64>();
                let z0 = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
                let value = mean.as_secs_f64() + std_dev.as_secs_f64() * z0;
                Duration::from_secs_f64(value.max(0.0), resolution)
            }
            DelayDistribution::Exponential { mean } => {
                let u = 1.0 - rng.gen::<f64>();
                let value = -mean.as_secs_f64() * u.ln();
                Duration::from_secs_f64(value.max(0.0), resolution)
            }
        }
    }
}

/// A node that adds a random delay to each message.
///
/// This node simulates variable-latency components like:
/// - Service stations with random processing times
/// - Network links with congestion
/// - Arrival processes fed by a single trigger
///
/// # Example
///
/// ```rust
/// use devskit::nodes::probabilistic::{DelayDistribution, ProbabilisticDelayNode};
/// use devskit::time::Duration;
///
/// let node = ProbabilisticDelayNode::new(DelayDistribution::Uniform {
///     min: Duration::millis(5),
///     max: Duration::millis(15),
/// });
/// assert_eq!(node.messages_received, 0);
/// ```
#[derive(Debug)]
pub struct ProbabilisticDelayNode {
    /// The delay distribution
    pub distribution: DelayDistribution,
    /// Statistics: total messages received
    pub messages_received: u64,
    /// Statistics: sum of all sampled delays
    pub total_delay: Duration,
    /// Statistics: minimum delay sampled
    pub min_delay: Option<Duration>,
    /// Statistics: maximum delay sampled
    pub max_delay: Option<Duration>,
    line: DelayLine,
}

impl ProbabilisticDelayNode {
    pub fn new(distribution: DelayDistribution) -> Self {
        Self {
            distribution,
            messages_received: 0,
            total_delay: Duration::ZERO,
            min_delay: None,
            max_delay: None,
            line: DelayLine::default(),
        }
    }

    /// Returns statistics about the node's operation.
    pub fn stats(&self) -> serde_json::Value {
        let average = if self.messages_received > 0 {
            self.total_delay.as_secs_f64() / self.messages_received as f64
        } else {
            0.0
        };

        serde_json::json!({
            "messages_received": self.messages_received,
            "total_delay": self.total_delay.to_string(),
            "average_delay_secs": average,
            "min_delay": self.min_delay.map(|d| d.to_string()),
            "max_delay": self.max_delay.map(|d| d.to_string()),
        })
    }

    fn update_stats(&mut self, delay: Duration) {
        self.total_delay = self.total_delay + delay;
        self.min_delay = Some(self.min_delay.map_or(delay, |d| d.min(delay)));
        self.max_delay = Some(self.max_delay.map_or(delay, |d| d.max(delay)));
    }

    fn step(&mut self, io: &mut NodeIo<'_>) -> SimResult<Duration> {
        let now = io.time().t();
        if io.received("input") {
            let value = io.message("input")?.clone();
            let delay = self.distribution.sample(io.rng());
            self.update_stats(delay);
            self.line.push(now.checked_add(delay)?, value);
            self.messages_received += 1;
        }
        for value in self.line.release(now) {
            io.post("output", value)?;
        }
        Ok(self.line.plan(now))
    }
}

impl Node for ProbabilisticDelayNode {
    fn interface(&self) -> Interface {
        Interface::new()
            .message_input("input", ValueType::Any)
            .message_output("output", ValueType::Any)
    }

    fn initialization_event(&mut self, _io: &mut NodeIo<'_>) -> SimResult<Duration> {
        self.messages_received = 0;
        self.total_delay = Duration::ZERO;
        self.min_delay = None;
        self.max_delay = None;
        self.line.clear();
        Ok(Duration::INFINITE)
    }

    fn unplanned_event(&mut self, _elapsed: Duration, io: &mut NodeIo<'_>) -> SimResult<Duration> {
        self.step(io)
    }

    fn planned_event(&mut self, _elapsed: Duration, io: &mut NodeIo<'_>) -> SimResult<Duration> {
        self.step(io)
    }
}
