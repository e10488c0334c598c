//! Statistics collection and export.
//!
//! The driver keeps run totals while it dispatches; per-component event
//! counters are gathered from the hierarchy on demand. Both export to JSON,
//! CSV and a human-readable summary.

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

use crate::node::NodeKind;

/// Aggregate statistics for a simulation run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SimulationStats {
    /// Simulation metadata
    pub metadata: SimulationMetadata,

    /// Driver-level totals
    pub run: RunStats,

    /// Per-component counters, in hierarchy order
    pub components: Vec<ComponentStats>,

    /// Timing statistics
    pub timing: TimingStats,
}

/// Metadata about the simulation run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SimulationMetadata {
    /// Name of the root node
    pub name: String,

    /// Start time (wall clock)
    pub start_time: Option<String>,

    /// End time (wall clock)
    pub end_time: Option<String>,

    /// Crate version
    pub version: String,

    /// Run seed
    pub seed: u64,
}

/// Driver-level totals.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RunStats {
    /// Simulated start time
    pub start_time: String,

    /// Simulated time of the last processed event or of finalization
    pub final_time: String,

    /// Driver events (root invocations) processed
    pub events_processed: u64,

    /// Micro-steps spent in the deepest cascade
    pub peak_micro_steps: u64,

    /// External messages scheduled into the root
    pub messages_injected: u64,

    /// Messages the root emitted on its outputs
    pub messages_observed: u64,

    /// True if the run stopped on an error
    pub aborted: bool,
}

/// Event counters of one component.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentStats {
    pub full_name: String,
    pub kind: NodeKind,
    pub unplanned_events: u64,
    pub planned_events: u64,
    pub messages_posted: u64,
    pub flow_refreshes: u64,
}

impl ComponentStats {
    pub fn new(full_name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            full_name: full_name.into(),
            kind,
            unplanned_events: 0,
            planned_events: 0,
            messages_posted: 0,
            flow_refreshes: 0,
        }
    }

    pub fn events(&self) -> u64 {
        self.unplanned_events + self.planned_events
    }
}

/// Timing/performance statistics.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TimingStats {
    /// Total wall-clock time in milliseconds
    pub total_wall_time_ms: f64,

    /// Simulated seconds per wall-clock second
    pub sim_time_per_second: f64,

    /// Driver events processed per second
    pub events_per_second: f64,
}

impl SimulationStats {
    /// Creates a new empty statistics container.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the simulation name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.metadata.name = name.into();
        self
    }

    /// Records the start time.
    pub fn record_start(&mut self) {
        self.metadata.start_time = Some(wall_clock_now());
    }

    /// Records the end time.
    pub fn record_end(&mut self) {
        self.metadata.end_time = Some(wall_clock_now());
    }

    /// Updates timing statistics from the wall-clock time and the simulated
    /// span covered by the run.
    pub fn compute_timing(&mut self, wall_time_ms: f64, simulated_secs: f64) {
        self.timing.total_wall_time_ms = wall_time_ms;

        if wall_time_ms > 0.0 {
            let seconds = wall_time_ms / 1000.0;
            self.timing.sim_time_per_second = simulated_secs / seconds;
            self.timing.events_per_second = self.run.events_processed as f64 / seconds;
        }
    }

    /// Sum of unplanned and planned events over all components.
    pub fn total_component_events(&self) -> u64 {
        self.components.iter().map(ComponentStats::events).sum()
    }

    /// Exports statistics to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Exports statistics to JSON file.
    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let json = self
            .to_json()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }

    /// Exports summary statistics to CSV.
    pub fn to_csv(&self) -> String {
        let mut csv = String::new();

        csv.push_str("metric,value\n");

        csv.push_str(&format!("start_time,{}\n", self.run.start_time));
        csv.push_str(&format!("final_time,{}\n", self.run.final_time));
        csv.push_str(&format!("events_processed,{}\n", self.run.events_processed));
        csv.push_str(&format!("peak_micro_steps,{}\n", self.run.peak_micro_steps));
        csv.push_str(&format!("messages_injected,{}\n", self.run.messages_injected));
        csv.push_str(&format!("messages_observed,{}\n", self.run.messages_observed));
        csv.push_str(&format!("component_count,{}\n", self.components.len()));

        csv.push_str(&format!("wall_time_ms,{:.2}\n", self.timing.total_wall_time_ms));
        csv.push_str(&format!("sim_time_per_second,{:.2}\n", self.timing.sim_time_per_second));
        csv.push_str(&format!("events_per_second,{:.2}\n", self.timing.events_per_second));

        csv
    }

    /// Exports summary statistics to CSV file.
    pub fn to_csv_file<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        std::fs::write(path, self.to_csv())
    }

    /// Exports per-component statistics to CSV.
    pub fn components_to_csv(&self) -> String {
        let mut csv = String::new();

        csv.push_str("full_name,kind,unplanned_events,planned_events,messages_posted,flow_refreshes\n");

        for c in &self.components {
            csv.push_str(&format!(
                "{},{:?},{},{},{},{}\n",
                c.full_name,
                c.kind,
                c.unplanned_events,
                c.planned_events,
                c.messages_posted,
                c.flow_refreshes,
            ));
        }

        csv
    }

    /// Exports per-component statistics to CSV file.
    pub fn components_to_csv_file<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        std::fs::write(path, self.components_to_csv())
    }

    /// Writes a human-readable summary to a writer.
    pub fn write_summary<W: Write>(&self, mut w: W) -> std::io::Result<()> {
        writeln!(w, "=== Simulation Statistics ===")?;
        writeln!(w)?;

        if !self.metadata.name.is_empty() {
            writeln!(w, "Name: {}", self.metadata.name)?;
        }
        writeln!(w, "Seed: {}", self.metadata.seed)?;
        if let Some(ref start) = self.metadata.start_time {
            writeln!(w, "Started: {}", start)?;
        }
        if let Some(ref end) = self.metadata.end_time {
            writeln!(w, "Ended: {}", end)?;
        }
        writeln!(w)?;

        writeln!(w, "--- Run ---")?;
        writeln!(w, "Simulated span: {} .. {}", self.run.start_time, self.run.final_time)?;
        writeln!(w, "Events processed: {}", self.run.events_processed)?;
        writeln!(w, "Peak micro-steps: {}", self.run.peak_micro_steps)?;
        writeln!(w, "Messages injected: {}", self.run.messages_injected)?;
        writeln!(w, "Messages observed: {}", self.run.messages_observed)?;
        if self.run.aborted {
            writeln!(w, "Run aborted on error")?;
        }
        writeln!(w)?;

        writeln!(w, "--- Timing ---")?;
        writeln!(w, "Wall time: {:.2} ms", self.timing.total_wall_time_ms)?;
        writeln!(w, "Sim time/sec: {:.2}", self.timing.sim_time_per_second)?;
        writeln!(w, "Events/sec: {:.2}", self.timing.events_per_second)?;
        writeln!(w)?;

        writeln!(w, "--- Components ---")?;
        for c in &self.components {
            writeln!(w, "{} ({:?}):", c.full_name, c.kind)?;
            writeln!(
                w,
                "  Unplanned: {}, Planned: {}, Posted: {}",
                c.unplanned_events, c.planned_events, c.messages_posted
            )?;
        }

        Ok(())
    }

    /// Returns a summary string.
    pub fn summary(&self) -> String {
        let mut buf = Vec::new();
        // writing into a Vec cannot fail
        let _ = self.write_summary(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    }
}

/// A simple timer for measuring wall-clock time.
#[derive(Debug)]
pub struct Timer {
    start: std::time::Instant,
}

impl Timer {
    /// Starts a new timer.
    pub fn start() -> Self {
        Self {
            start: std::time::Instant::now(),
        }
    }

    /// Returns elapsed time in milliseconds.
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Returns elapsed time in seconds.
    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::start()
    }
}

fn wall_clock_now() -> String {
    let now = std::time::SystemTime::now();
    let duration = now.duration_since(std::time::UNIX_EPOCH).unwrap_or_default();
    format!("{}s", duration.as_secs())
}

/// Statistics collector owned by the driver.
#[derive(Debug, Default)]
pub struct StatsCollector {
    stats: SimulationStats,
    timer: Option<Timer>,
}

impl StatsCollector {
    /// Creates a new collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the simulation name and seed.
    pub fn set_identity(&mut self, name: impl Into<String>, seed: u64) {
        self.stats.metadata.name = name.into();
        self.stats.metadata.seed = seed;
        self.stats.metadata.version = env!("CARGO_PKG_VERSION").to_string();
    }

    /// Starts timing.
    pub fn start(&mut self, start_time: impl ToString) {
        self.timer = Some(Timer::start());
        self.stats.record_start();
        self.stats.run.start_time = start_time.to_string();
        self.stats.run.final_time = self.stats.run.start_time.clone();
    }

    /// Stops timing and computes final statistics.
    pub fn stop(&mut self, simulated_secs: f64) {
        self.stats.record_end();
        if let Some(ref timer) = self.timer {
            self.stats.compute_timing(timer.elapsed_ms(), simulated_secs);
        }
    }

    /// Records one driver event and the micro-steps its cascade used.
    pub fn record_event(&mut self, time: impl ToString, micro_steps: u64) {
        self.stats.run.events_processed += 1;
        self.stats.run.final_time = time.to_string();
        self.stats.run.peak_micro_steps = self.stats.run.peak_micro_steps.max(micro_steps);
    }

    pub fn record_final_time(&mut self, time: impl ToString) {
        self.stats.run.final_time = time.to_string();
    }

    pub fn record_injection(&mut self) {
        self.stats.run.messages_injected += 1;
    }

    pub fn record_observations(&mut self, count: usize) {
        self.stats.run.messages_observed += count as u64;
    }

    pub fn record_abort(&mut self) {
        self.stats.run.aborted = true;
    }

    /// Replaces the per-component counters.
    pub fn set_components(&mut self, components: Vec<ComponentStats>) {
        self.stats.components = components;
    }

    /// Returns the collected statistics.
    pub fn stats(&self) -> &SimulationStats {
        &self.stats
    }

    /// Consumes the collector and returns the statistics.
    pub fn into_stats(self) -> SimulationStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_creation() {
        let stats = SimulationStats::new().with_name("Test Simulation");

        assert_eq!(stats.metadata.name, "Test Simulation");
    }

    #[test]
    fn test_stats_json_export() {
        let mut stats = SimulationStats::new();
        stats.run.final_time = "1500 ms".to_string();
        stats.run.events_processed = 100;

        let json = stats.to_json().unwrap();
        assert!(json.contains("1500 ms"));
        assert!(json.contains("100"));
    }

    #[test]
    fn test_stats_csv_export() {
        let mut stats = SimulationStats::new();
        stats.run.final_time = "10 s".to_string();
        stats.run.events_processed = 500;

        let csv = stats.to_csv();
        assert!(csv.contains("final_time,10 s"));
        assert!(csv.contains("events_processed,500"));
    }

    #[test]
    fn test_component_stats_csv() {
        let mut stats = SimulationStats::new();

        let mut c = ComponentStats::new("top.gen", NodeKind::Atomic);
        c.planned_events = 4;
        c.messages_posted = 4;
        stats.components.push(c);

        let csv = stats.components_to_csv();
        assert!(csv.contains("top.gen,Atomic,0,4,4,0"));
        assert_eq!(stats.total_component_events(), 4);
    }

    #[test]
    fn test_timer() {
        let timer = Timer::start();
        std::thread::sleep(std::time::Duration::from_millis(10));
        let elapsed = timer.elapsed_ms();
        assert!(elapsed >= 10.0);
    }

    #[test]
    fn test_stats_collector() {
        let mut collector = StatsCollector::new();
        collector.set_identity("Test", 9);
        collector.start("0 s");

        collector.record_event("1 s", 3);
        collector.record_event("2 s", 1);
        collector.record_injection();
        collector.record_observations(2);
        std::thread::sleep(std::time::Duration::from_millis(5));

        collector.stop(2.0);

        let stats = collector.stats();
        assert_eq!(stats.metadata.name, "Test");
        assert_eq!(stats.metadata.seed, 9);
        assert_eq!(stats.run.events_processed, 2);
        assert_eq!(stats.run.peak_micro_steps, 3);
        assert_eq!(stats.run.final_time, "2 s");
        assert_eq!(stats.run.messages_injected, 1);
        assert_eq!(stats.run.messages_observed, 2);
        assert!(stats.timing.total_wall_time_ms >= 5.0);
    }

    #[test]
    fn test_summary_output() {
        let mut stats = SimulationStats::new().with_name("Summary Test");
        stats.run.final_time = "1000 ms".to_string();
        stats.run.events_processed = 100;

        let summary = stats.summary();
        assert!(summary.contains("Summary Test"));
        assert!(summary.contains("Events processed: 100"));
    }
}
