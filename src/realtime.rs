//! Real-time execution.
//!
//! [`RealTimeSimulation`] paces a [`Simulation`] against the wall clock.
//! Before each event it sleeps until the event's wall-clock deadline, which
//! is the simulated distance from a synchronization point divided by the
//! time advancement rate. Producer threads wake it early by injecting
//! messages through an [`Injector`].
//!
//! The simulation itself stays on one thread. The only shared state is the
//! [`InjectionBuffer`], a mutex-protected queue with a condition variable;
//! the wait re-checks the queue under the lock, so an injection racing with
//! the decision to sleep is never missed.
//!
//! ```rust,no_run
//! use devskit::realtime::RealTimeSimulation;
//! # use devskit::simulation::{SimOptions, Simulation};
//! # fn model() -> Box<dyn devskit::node::Node> { unimplemented!() }
//!
//! let sim = Simulation::new("top", model(), SimOptions::default()).unwrap();
//! let mut rt = RealTimeSimulation::new(sim, 1.0).unwrap();
//! let injector = rt.injector();
//!
//! std::thread::spawn(move || {
//!     injector.inject_now(42, "in").unwrap();
//!     injector.stop();
//! });
//! rt.run().unwrap();
//! ```

use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use crate::config::SimConfig;
use crate::error::{SimError, SimResult};
use crate::registry::NodeRegistry;
use crate::simulation::Simulation;
use crate::time::{Duration, Scale, SuperdenseTime, TimePoint};
use crate::types::Value;

/// Why a wait ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Wake {
    /// The next event's wall-clock deadline passed
    Deadline,
    /// A producer injected at least one message
    Injection,
    /// A stop was requested
    Stopped,
}

/// A message handed over by a producer thread.
#[derive(Clone, Debug)]
pub struct Injection {
    pub port: String,
    pub value: Value,
    /// Wall-clock time the message is considered to have arrived
    pub arrival: Instant,
}

#[derive(Debug, Default)]
struct BufferState {
    queue: VecDeque<Injection>,
    stopped: bool,
}

/// Hand-off buffer between producer threads and the simulation thread.
#[derive(Debug, Default)]
pub struct InjectionBuffer {
    state: Mutex<BufferState>,
    ready: Condvar,
}

impl InjectionBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, injection: Injection) {
        self.state.lock().queue.push_back(injection);
        self.ready.notify_all();
    }

    pub fn stop(&self) {
        self.state.lock().stopped = true;
        self.ready.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }

    /// Removes every queued injection in arrival order.
    pub fn drain(&self) -> Vec<Injection> {
        self.state.lock().queue.drain(..).collect()
    }

    /// Blocks until stopped, until something is queued, or until `deadline`.
    ///
    /// `None` waits without a deadline. Stop takes precedence over queued
    /// injections, which take precedence over the deadline.
    pub fn wait_until(&self, deadline: Option<Instant>) -> Wake {
        let mut state = self.state.lock();
        loop {
            if state.stopped {
                return Wake::Stopped;
            }
            if !state.queue.is_empty() {
                return Wake::Injection;
            }
            match deadline {
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        return Wake::Deadline;
                    }
                    self.ready.wait_until(&mut state, deadline);
                }
                None => self.ready.wait(&mut state),
            }
        }
    }
}

/// Producer-side handle. Cheap to clone and safe to send to other threads.
#[derive(Clone, Debug)]
pub struct Injector {
    buffer: Arc<InjectionBuffer>,
}

impl Injector {
    /// Queues `value` for root input `port`, arriving at `arrival`.
    pub fn inject(&self, value: impl Serialize, port: &str, arrival: Instant) -> SimResult<()> {
        let value = serde_json::to_value(value).map_err(|source| SimError::Payload {
            node: "injector".to_string(),
            port: port.to_string(),
            source,
        })?;
        self.buffer.push(Injection {
            port: port.to_string(),
            value,
            arrival,
        });
        Ok(())
    }

    /// Queues `value` arriving now.
    pub fn inject_now(&self, value: impl Serialize, port: &str) -> SimResult<()> {
        self.inject(value, port, Instant::now())
    }

    /// Asks the simulation thread to finalize and return.
    pub fn stop(&self) {
        self.buffer.stop();
    }
}

/// Corresponding wall-clock and simulated instants.
#[derive(Clone, Copy, Debug)]
struct Anchor {
    wall: Instant,
    sim: TimePoint,
}

/// A simulation paced by the wall clock.
#[derive(Debug)]
pub struct RealTimeSimulation {
    sim: Simulation,
    buffer: Arc<InjectionBuffer>,
    rate: f64,
    anchor: Anchor,
}

fn check_rate(rate: f64) -> SimResult<()> {
    if rate.is_nan() || rate <= 0.0 {
        return Err(SimError::Structure(format!(
            "time advancement rate must be positive, got {}",
            rate
        )));
    }
    Ok(())
}

impl RealTimeSimulation {
    /// Paces `sim` at `rate` simulated seconds per wall-clock second.
    /// An infinite rate runs as fast as possible.
    pub fn new(sim: Simulation, rate: f64) -> SimResult<Self> {
        check_rate(rate)?;
        let anchor = Anchor {
            wall: Instant::now(),
            sim: sim.time().t(),
        };
        Ok(Self {
            sim,
            buffer: Arc::new(InjectionBuffer::new()),
            rate,
            anchor,
        })
    }

    /// Builds the configured model and paces it at the configured rate.
    pub fn from_config(name: &str, config: &SimConfig, registry: &NodeRegistry) -> SimResult<Self> {
        let sim = Simulation::from_config(name, config, registry)?;
        Self::new(sim, config.realtime.time_advancement_rate)
    }

    pub fn injector(&self) -> Injector {
        Injector {
            buffer: Arc::clone(&self.buffer),
        }
    }

    pub fn simulation(&self) -> &Simulation {
        &self.sim
    }

    pub fn simulation_mut(&mut self) -> &mut Simulation {
        &mut self.sim
    }

    pub fn into_simulation(self) -> Simulation {
        self.sim
    }

    pub fn time_advancement_rate(&self) -> f64 {
        self.rate
    }

    /// Changes the rate, re-synchronizing at the current instant so the
    /// simulated time already covered is kept.
    pub fn set_time_advancement_rate(&mut self, rate: f64) -> SimResult<()> {
        check_rate(rate)?;
        let now = Instant::now();
        self.anchor = Anchor {
            wall: now,
            sim: self.sim_point_at(now),
        };
        self.rate = rate;
        tracing::debug!(rate, sim = %self.anchor.sim, "time advancement rate changed");
        Ok(())
    }

    /// Simulated time corresponding to wall-clock `instant`, never earlier
    /// than the current simulated time.
    fn sim_point_at(&self, instant: Instant) -> TimePoint {
        let current = self.sim.time().t();
        if !self.rate.is_finite() {
            return current;
        }
        let wall = instant.saturating_duration_since(self.anchor.wall);
        let offset = Duration::from_secs_f64(wall.as_secs_f64() * self.rate, Scale::NANO);
        match self.anchor.sim.checked_add(offset) {
            Ok(point) => point.max(current),
            Err(_) => current,
        }
    }

    /// Wall-clock deadline of simulated time `t`; `None` if unrepresentable.
    fn deadline_for(&self, t: TimePoint) -> Option<Instant> {
        let secs = t.gap(self.anchor.sim).as_secs_f64() / self.rate;
        if secs.is_nan() || secs <= 0.0 {
            return Some(self.anchor.wall);
        }
        std::time::Duration::try_from_secs_f64(secs)
            .ok()
            .and_then(|d| self.anchor.wall.checked_add(d))
    }

    /// Waits for the next deadline or injection and handles it.
    ///
    /// Returns `None` once the simulation is finished. A deadline processes
    /// one event; injections are only scheduled, so they are dispatched by
    /// a following frame in time order.
    pub fn process_frame(&mut self) -> SimResult<Option<Wake>> {
        if self.sim.finished() {
            return Ok(None);
        }
        if !self.sim.started() {
            self.anchor = Anchor {
                wall: Instant::now(),
                sim: self.sim.start_time(),
            };
            self.sim.initialize()?;
            return Ok(Some(Wake::Deadline));
        }

        let deadline = self
            .sim
            .next_event_time()
            .and_then(|at| self.deadline_for(at.t()));
        let wake = self.buffer.wait_until(deadline);
        match wake {
            Wake::Stopped => {
                tracing::info!(time = %self.sim.time(), "real-time run stopped");
                self.sim.finalize()?;
            }
            Wake::Injection => {
                for injection in self.buffer.drain() {
                    let port = injection.port.clone();
                    // A bad injection is the producer's fault; the run goes on.
                    if let Err(err) = self.schedule(injection) {
                        tracing::warn!(port = %port, error = %err, "injection dropped");
                    }
                }
            }
            Wake::Deadline => {
                self.sim.process_next_event()?;
            }
        }
        Ok(Some(wake))
    }

    fn schedule(&mut self, injection: Injection) -> SimResult<SuperdenseTime> {
        let at = self.sim_point_at(injection.arrival);
        self.sim
            .schedule_message(&injection.port, injection.value, at)
    }

    /// Processes frames until the simulation finishes or is stopped.
    pub fn run(&mut self) -> SimResult<SuperdenseTime> {
        while let Some(wake) = self.process_frame()? {
            if wake == Wake::Stopped {
                break;
            }
        }
        Ok(self.sim.time())
    }
}
