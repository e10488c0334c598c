//! Superdense time: a coordinate plus a micro-step index.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::duration::Duration;
use super::point::TimePoint;
use super::TimeError;

/// A `(coordinate, micro_step)` pair ordered lexicographically.
///
/// Simultaneous events at one coordinate are told apart by the micro-step,
/// which grows with every zero-duration hop and restarts at zero whenever the
/// coordinate moves forward.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SuperdenseTime {
    t: TimePoint,
    c: u64,
}

impl SuperdenseTime {
    pub fn new(t: TimePoint, c: u64) -> Self {
        Self { t, c }
    }

    /// The first micro-step at coordinate `t`.
    pub fn at(t: TimePoint) -> Self {
        Self { t, c: 0 }
    }

    /// Physical time coordinate.
    pub fn t(&self) -> TimePoint {
        self.t
    }

    /// Micro-step index within the coordinate.
    pub fn c(&self) -> u64 {
        self.c
    }

    /// Moves to the next micro-step at the same coordinate.
    pub fn advance(&mut self) {
        self.c += 1;
    }

    /// Returns the next micro-step at the same coordinate.
    pub fn next(self) -> Self {
        Self {
            t: self.t,
            c: self.c + 1,
        }
    }

    /// Returns the time `dt` after this one.
    ///
    /// A zero duration yields the next micro-step; a positive duration a new
    /// coordinate at micro-step zero.
    pub fn after(self, dt: Duration) -> Result<Self, TimeError> {
        if dt.is_negative() {
            return Err(TimeError::NegativeDuration(dt));
        }
        if dt.is_zero() {
            return Ok(self.next());
        }
        Ok(Self::at(self.t.checked_add(dt)?))
    }
}

impl fmt::Display for SuperdenseTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.t, self.c)
    }
}
