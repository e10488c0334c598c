//! Simulated time.
//!
//! Durations and time points are exact scaled integers; [`SuperdenseTime`]
//! adds a micro-step index so that simultaneous events still have a total
//! order. [`TimeQueue`] and [`TimeCache`] are the two bookkeeping structures
//! every container node uses to schedule its children.

pub mod cache;
pub mod duration;
pub mod point;
pub mod queue;
pub mod scale;
pub mod superdense;

use thiserror::Error;

pub use cache::TimeCache;
pub use duration::{Duration, MAX_MULTIPLIER};
pub use point::TimePoint;
pub use queue::TimeQueue;
pub use scale::Scale;
pub use superdense::SuperdenseTime;

/// Errors raised by time arithmetic.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimeError {
    #[error("negative duration {0} cannot be planned")]
    NegativeDuration(Duration),

    #[error("an infinite duration has no time coordinate")]
    InfiniteDuration,

    #[error("time coordinate overflow")]
    Overflow,

    #[error("time cannot move backwards from {from} to {to}")]
    Regression {
        from: SuperdenseTime,
        to: SuperdenseTime,
    },

    #[error("cannot parse time value: {0}")]
    Parse(String),
}
