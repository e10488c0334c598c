//! Configuration system for simulation runs.
//!
//! This module provides YAML/JSON configuration file support for defining
//! runs, and optionally their model, declaratively.
//!
//! # Configuration File Structure
//!
//! ```yaml
//! simulation:
//!   start_time: "0 s"
//!   end_time: "10 s"
//!   can_end_early: true
//!   seed: 42
//!   max_micro_steps: 10000
//!   log_level: info
//!
//! realtime:
//!   time_advancement_rate: 1.0
//!
//! model:
//!   ports:
//!     - { name: trigger, kind: message_input }
//!     - { name: count, kind: message_output }
//!   nodes:
//!     - name: gen
//!       type: Generator
//!       attrs:
//!         period: "1 s"
//!         limit: 3
//!     - name: sink
//!       type: Counter
//!   links:
//!     - { from: gen.output, to: sink.input }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use thiserror::Error;

use crate::composite::BOUNDARY;
use crate::port::PortSpec;
use crate::time::Duration;
use crate::types::Value;

/// Seeds must stay below this bound.
pub const MAX_SEED: u64 = 4_000_000_000;

/// Errors that can occur during configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown file format: {0}")]
    UnknownFormat(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Run parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimulationParams {
    /// Offset of the start time from the zero time point
    #[serde(default)]
    pub start_time: Duration,

    /// Offset of the end time; absent means unbounded
    #[serde(default)]
    pub end_time: Option<Duration>,

    /// Finish as soon as nothing is scheduled
    #[serde(default = "default_can_end_early")]
    pub can_end_early: bool,

    /// Seed of every random stream in the run
    #[serde(default)]
    pub seed: u64,

    /// Cap on micro-steps per cascade
    #[serde(default)]
    pub max_micro_steps: Option<u64>,

    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_can_end_early() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            start_time: Duration::ZERO,
            end_time: None,
            can_end_early: default_can_end_early(),
            seed: 0,
            max_micro_steps: None,
            log_level: default_log_level(),
        }
    }
}

/// Real-time pacing parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RealtimeParams {
    /// Simulated seconds per wall-clock second; infinite runs unpaced
    #[serde(default = "default_rate")]
    pub time_advancement_rate: f64,
}

fn default_rate() -> f64 {
    1.0
}

impl Default for RealtimeParams {
    fn default() -> Self {
        Self {
            time_advancement_rate: default_rate(),
        }
    }
}

/// Configuration for a node of a declarative model.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Name, unique within the model
    pub name: String,

    /// Registered node type
    #[serde(rename = "type")]
    pub node_type: String,

    /// Attributes passed to the factory
    #[serde(default)]
    pub attrs: HashMap<String, Value>,
}

/// A coupling between two `node.port` endpoints.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkConfig {
    pub from: String,
    pub to: String,
}

/// A composite described as data.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Boundary ports of the composite
    #[serde(default)]
    pub ports: Vec<PortSpec>,

    #[serde(default)]
    pub nodes: Vec<NodeConfig>,

    #[serde(default)]
    pub links: Vec<LinkConfig>,
}

impl ModelConfig {
    /// Checks names and link endpoints. Port existence on nodes is checked
    /// when the composite is built.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut ports = HashSet::new();
        for port in &self.ports {
            if !ports.insert(port.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "Duplicate model port: {}",
                    port.name
                )));
            }
        }

        let mut names = HashSet::new();
        for node in &self.nodes {
            if node.name.is_empty() || node.name.contains('.') || node.name == BOUNDARY {
                return Err(ConfigError::Validation(format!(
                    "Invalid node name: '{}'",
                    node.name
                )));
            }
            if !names.insert(node.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "Duplicate node name: {}",
                    node.name
                )));
            }
        }

        for link in &self.links {
            for endpoint in [&link.from, &link.to] {
                let Some((node, port)) = endpoint.split_once('.') else {
                    return Err(ConfigError::Validation(format!(
                        "Link endpoint must be 'node.port': {}",
                        endpoint
                    )));
                };
                if node == BOUNDARY {
                    if !ports.contains(port) {
                        return Err(ConfigError::Validation(format!(
                            "Link references non-existent model port: {}",
                            endpoint
                        )));
                    }
                } else if !names.contains(node) {
                    return Err(ConfigError::Validation(format!(
                        "Link references non-existent node: {}",
                        endpoint
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Complete run configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SimConfig {
    /// Run parameters
    #[serde(default)]
    pub simulation: SimulationParams,

    /// Real-time pacing
    #[serde(default)]
    pub realtime: RealtimeParams,

    /// Optional declarative model
    #[serde(default)]
    pub model: Option<ModelConfig>,
}

impl SimConfig {
    /// Creates a new default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a YAML file.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Loads configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> ConfigResult<Self> {
        let config: SimConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Loads configuration from a JSON string.
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        let config: SimConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a file, auto-detecting format.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");

        match ext.to_lowercase().as_str() {
            "yaml" | "yml" => Self::from_yaml_file(path),
            "json" => Self::from_json_file(path),
            _ => Err(ConfigError::UnknownFormat(ext.to_string())),
        }
    }

    /// Validates the entire configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        let sim = &self.simulation;
        if sim.start_time.is_infinite() {
            return Err(ConfigError::Validation(
                "start_time must be finite".to_string(),
            ));
        }
        if let Some(end) = sim.end_time {
            if end <= sim.start_time {
                return Err(ConfigError::Validation(format!(
                    "end_time {} must be after start_time {}",
                    end, sim.start_time
                )));
            }
        }
        if sim.seed >= MAX_SEED {
            return Err(ConfigError::Validation(format!(
                "seed {} must be below {}",
                sim.seed, MAX_SEED
            )));
        }
        if sim.max_micro_steps == Some(0) {
            return Err(ConfigError::Validation(
                "max_micro_steps must be positive".to_string(),
            ));
        }
        if !matches!(
            sim.log_level.to_lowercase().as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        ) {
            tracing::warn!("Unknown log level '{}' (using info)", sim.log_level);
        }

        let rate = self.realtime.time_advancement_rate;
        if rate.is_nan() || rate <= 0.0 {
            return Err(ConfigError::Validation(format!(
                "time_advancement_rate must be positive, got {}",
                rate
            )));
        }

        if let Some(model) = &self.model {
            model.validate()?;
        }
        Ok(())
    }

    /// Saves configuration to a YAML file.
    pub fn to_yaml_file<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Saves configuration to a JSON file.
    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Converts to YAML string.
    pub fn to_yaml(&self) -> ConfigResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Converts to JSON string.
    pub fn to_json(&self) -> ConfigResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Returns the number of model nodes.
    pub fn node_count(&self) -> usize {
        self.model.as_ref().map_or(0, |m| m.nodes.len())
    }

    /// Returns the number of model links.
    pub fn link_count(&self) -> usize {
        self.model.as_ref().map_or(0, |m| m.links.len())
    }

    /// Finds a model node by name.
    pub fn find_node(&self, name: &str) -> Option<&NodeConfig> {
        self.model
            .as_ref()
            .and_then(|m| m.nodes.iter().find(|n| n.name == name))
    }
}

/// Builder for creating SimConfig programmatically.
#[derive(Default)]
pub struct SimConfigBuilder {
    config: SimConfig,
}

impl SimConfigBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_time(mut self, offset: Duration) -> Self {
        self.config.simulation.start_time = offset;
        self
    }

    pub fn end_time(mut self, offset: Duration) -> Self {
        self.config.simulation.end_time = Some(offset);
        self
    }

    pub fn can_end_early(mut self, enable: bool) -> Self {
        self.config.simulation.can_end_early = enable;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.config.simulation.seed = seed;
        self
    }

    pub fn max_micro_steps(mut self, limit: u64) -> Self {
        self.config.simulation.max_micro_steps = Some(limit);
        self
    }

    /// Sets the log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.simulation.log_level = level.into();
        self
    }

    pub fn time_advancement_rate(mut self, rate: f64) -> Self {
        self.config.realtime.time_advancement_rate = rate;
        self
    }

    /// Adds a boundary port to the model.
    pub fn add_port(mut self, spec: PortSpec) -> Self {
        self.config.model.get_or_insert_with(Default::default).ports.push(spec);
        self
    }

    /// Adds a model node without attributes.
    pub fn add_node(self, name: impl Into<String>, node_type: impl Into<String>) -> Self {
        self.add_node_with_attrs(name, node_type, HashMap::new())
    }

    /// Adds a model node.
    pub fn add_node_with_attrs(
        mut self,
        name: impl Into<String>,
        node_type: impl Into<String>,
        attrs: HashMap<String, Value>,
    ) -> Self {
        self.config
            .model
            .get_or_insert_with(Default::default)
            .nodes
            .push(NodeConfig {
                name: name.into(),
                node_type: node_type.into(),
                attrs,
            });
        self
    }

    /// Adds a model link between `node.port` endpoints.
    pub fn add_link(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.config
            .model
            .get_or_insert_with(Default::default)
            .links
            .push(LinkConfig {
                from: from.into(),
                to: to.into(),
            });
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> ConfigResult<SimConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
