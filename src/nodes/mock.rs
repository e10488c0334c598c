//! Simple atomic nodes for tests and examples.
//!
//! These nodes provide small, predictable behaviors: a periodic message
//! source, a zero-delay relay and a message counter.

use serde_json::json;

use crate::error::SimResult;
use crate::node::{Node, NodeIo};
use crate::port::{Interface, ValueType};
use crate::time::Duration;

/// Emits `{"seq": n}` on `output` once every `period`.
///
/// The first message is sent one period after initialization. With a limit
/// the generator goes passive after that many messages.
#[derive(Debug)]
pub struct GeneratorNode {
    /// Time between messages
    pub period: Duration,
    /// Maximum number of messages, if any
    pub limit: Option<u64>,
    /// Number of messages sent
    pub generated: u64,
}

impl GeneratorNode {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            limit: None,
            generated: 0,
        }
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    fn next_plan(&self) -> Duration {
        match self.limit {
            Some(limit) if self.generated >= limit => Duration::INFINITE,
            _ => self.period,
        }
    }
}

impl Node for GeneratorNode {
    fn interface(&self) -> Interface {
        Interface::new().message_output("output", ValueType::Object)
    }

    fn initialization_event(&mut self, _io: &mut NodeIo<'_>) -> SimResult<Duration> {
        self.generated = 0;
        Ok(self.next_plan())
    }

    fn planned_event(&mut self, _elapsed: Duration, io: &mut NodeIo<'_>) -> SimResult<Duration> {
        self.generated += 1;
        io.post("output", json!({ "seq": self.generated }))?;
        Ok(self.next_plan())
    }
}

/// Forwards every message from `input` to `output` without delay.
#[derive(Debug, Default)]
pub struct RelayNode {
    /// Number of messages forwarded
    pub forwarded: u64,
}

impl RelayNode {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Node for RelayNode {
    fn interface(&self) -> Interface {
        Interface::new()
            .message_input("input", ValueType::Any)
            .message_output("output", ValueType::Any)
    }

    fn initialization_event(&mut self, _io: &mut NodeIo<'_>) -> SimResult<Duration> {
        Ok(Duration::INFINITE)
    }

    fn unplanned_event(&mut self, _elapsed: Duration, io: &mut NodeIo<'_>) -> SimResult<Duration> {
        let value = io.message("input")?.clone();
        io.post("output", value)?;
        self.forwarded += 1;
        Ok(Duration::INFINITE)
    }
}

/// Counts messages on `input` and publishes the count on flow output `count`.
#[derive(Debug, Default)]
pub struct CounterNode {
    /// Number of messages received
    pub count: u64,
}

impl CounterNode {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Node for CounterNode {
    fn interface(&self) -> Interface {
        Interface::new()
            .message_input("input", ValueType::Any)
            .flow_output("count", ValueType::Int)
    }

    fn initialization_event(&mut self, io: &mut NodeIo<'_>) -> SimResult<Duration> {
        self.count = 0;
        io.set_flow_output("count", self.count)?;
        Ok(Duration::INFINITE)
    }

    fn unplanned_event(&mut self, _elapsed: Duration, io: &mut NodeIo<'_>) -> SimResult<Duration> {
        self.count += 1;
        io.set_flow_output("count", self.count)?;
        Ok(Duration::INFINITE)
    }
}
