//! Error types for simulation runs.
//!
//! Every error here is fatal to the run that raised it: the driver stops
//! dispatching, finalizes what it still can and hands the error back.

use thiserror::Error;

use crate::time::{SuperdenseTime, TimeError};

/// Errors raised while building or running a model.
#[derive(Error, Debug)]
pub enum SimError {
    /// A node's time bookkeeping disagrees with the engine's.
    #[error("contract violation in {node} at {time}: {reason}")]
    ContractViolation {
        node: String,
        time: SuperdenseTime,
        reason: String,
    },

    /// A port was read or written in a way its kind does not allow.
    #[error("port misuse on {node}.{port}: {reason}")]
    PortMisuse {
        node: String,
        port: String,
        reason: String,
    },

    /// A cascade did not reach a fixed point within the micro-step cap.
    #[error("{node} did not settle within {limit} micro-steps at {time}")]
    NonQuiescent {
        node: String,
        time: SuperdenseTime,
        limit: u64,
    },

    /// A collection was asked to add an existing agent or remove a missing one.
    #[error("identity error in {node} for agent {agent}: {reason}")]
    Identity {
        node: String,
        agent: String,
        reason: String,
    },

    /// Raised by model code through `NodeIo::fail`.
    #[error("model error in {node}: {message}")]
    Model { node: String, message: String },

    /// The model structure is invalid (bad links, duplicate names, flow cycles).
    #[error("invalid structure: {0}")]
    Structure(String),

    /// A port value could not be converted to or from the requested type.
    #[error("payload conversion failed on {node}.{port}: {source}")]
    Payload {
        node: String,
        port: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Time(#[from] TimeError),
}

/// Result type for simulation operations.
pub type SimResult<T> = Result<T, SimError>;

impl SimError {
    pub(crate) fn contract(node: &str, time: SuperdenseTime, reason: impl Into<String>) -> Self {
        SimError::ContractViolation {
            node: node.to_string(),
            time,
            reason: reason.into(),
        }
    }

    pub(crate) fn port(node: &str, port: &str, reason: impl Into<String>) -> Self {
        SimError::PortMisuse {
            node: node.to_string(),
            port: port.to_string(),
            reason: reason.into(),
        }
    }

    /// Returns true when the error means node bookkeeping can no longer be
    /// trusted, so finalization must be skipped.
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, SimError::ContractViolation { .. })
    }
}
