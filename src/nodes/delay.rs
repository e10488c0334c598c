//! Fixed delay node implementation.
//!
//! The `DelayNode` holds every message it receives for a fixed duration
//! before forwarding it. Messages due at the same coordinate leave in
//! arrival order.

use std::collections::BTreeMap;

use crate::error::SimResult;
use crate::node::{Node, NodeIo};
use crate::port::{Interface, ValueType};
use crate::time::{Duration, TimePoint};
use crate::types::Value;

/// Messages waiting for their release time.
#[derive(Debug, Default)]
pub(crate) struct DelayLine {
    pending: BTreeMap<(TimePoint, u64), Value>,
    seq: u64,
}

impl DelayLine {
    pub(crate) fn push(&mut self, due: TimePoint, value: Value) {
        self.pending.insert((due, self.seq), value);
        self.seq += 1;
    }

    /// Removes and returns every message due at or before `now`.
    pub(crate) fn release(&mut self, now: TimePoint) -> Vec<Value> {
        let mut released = Vec::new();
        while let Some(entry) = self.pending.first_entry() {
            if entry.key().0 > now {
                break;
            }
            released.push(entry.remove());
        }
        released
    }

    /// Duration from `now` until the earliest pending release.
    pub(crate) fn plan(&self, now: TimePoint) -> Duration {
        self.pending
            .keys()
            .next()
            .map_or(Duration::INFINITE, |(due, _)| due.gap(now))
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn clear(&mut self) {
        self.pending.clear();
        self.seq = 0;
    }
}

/// A node that delays messages by a fixed duration.
///
/// A message arriving on `input` at time `t` is posted on `output` at
/// `t + delay`. This is useful for modeling fixed-latency components like
/// transport links or service times.
///
/// # Example
///
/// ```rust
/// use devskit::nodes::delay::DelayNode;
/// use devskit::time::Duration;
///
/// let node = DelayNode::new(Duration::millis(10));
/// assert_eq!(node.delay, Duration::millis(10));
/// ```
#[derive(Debug)]
pub struct DelayNode {
    /// The fixed delay added to each message
    pub delay: Duration,
    /// Number of messages received
    pub messages_received: u64,
    /// Number of messages forwarded
    pub messages_forwarded: u64,
    line: DelayLine,
}

impl DelayNode {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            messages_received: 0,
            messages_forwarded: 0,
            line: DelayLine::default(),
        }
    }

    /// Number of messages currently held.
    pub fn in_flight(&self) -> usize {
        self.line.len()
    }

    /// Returns statistics about the node's operation.
    pub fn stats(&self) -> serde_json::Value {
        serde_json::json!({
            "delay": self.delay.to_string(),
            "messages_received": self.messages_received,
            "messages_forwarded": self.messages_forwarded,
            "in_flight": self.line.len(),
        })
    }

    fn step(&mut self, io: &mut NodeIo<'_>) -> SimResult<Duration> {
        let now = io.time().t();
        if io.received("input") {
            let value = io.message("input")?.clone();
            self.line.push(now.checked_add(self.delay)?, value);
            self.messages_received += 1;
        }
        for value in self.line.release(now) {
            io.post("output", value)?;
            self.messages_forwarded += 1;
        }
        Ok(self.line.plan(now))
    }
}

impl Node for DelayNode {
    fn interface(&self) -> Interface {
        Interface::new()
            .message_input("input", ValueType::Any)
            .message_output("output", ValueType::Any)
    }

    fn initialization_event(&mut self, _io: &mut NodeIo<'_>) -> SimResult<Duration> {
        self.messages_received = 0;
        self.messages_forwarded = 0;
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
