//! Absolute time coordinates.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use super::duration::Duration;
use super::scale::{canonical, cmp_scaled, rescale, Scale};
use super::TimeError;

/// A point on the simulated timeline.
///
/// Stored as an exact tick count at whatever precision the durations added to
/// it so far required. Adding a finer duration refines the precision, so a
/// coordinate never drifts; if the refined tick count no longer fits, the
/// addition fails with [`TimeError::Overflow`] instead of rounding.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimePoint {
    ticks: i128,
    precision: Scale,
}

impl TimePoint {
    /// The origin of simulated time.
    pub const ZERO: TimePoint = TimePoint {
        ticks: 0,
        precision: Scale::UNIT,
    };

    /// Returns the time point `dt` after the origin.
    pub fn from_origin(dt: Duration) -> Result<Self, TimeError> {
        Self::ZERO.checked_add(dt)
    }

    pub fn precision(&self) -> Scale {
        self.precision
    }

    /// Advances by `dt`. Infinite durations have no coordinate.
    pub fn checked_add(self, dt: Duration) -> Result<Self, TimeError> {
        if dt.is_infinite() {
            return Err(TimeError::InfiniteDuration);
        }
        let fine = self.precision.min(dt.precision());
        let levels = (i16::from(self.precision.level()) - i16::from(fine.level())) as u32;
        let base = rescale(self.ticks, levels).ok_or(TimeError::Overflow)?;
        let offset = dt.ticks_at(fine).ok_or(TimeError::Overflow)?;
        let ticks = base.checked_add(offset).ok_or(TimeError::Overflow)?;
        let (ticks, precision) = canonical(ticks, fine);
        Ok(Self { ticks, precision })
    }

    /// Returns `self - earlier` as a duration.
    pub fn gap(self, earlier: TimePoint) -> Duration {
        let fine = self.precision.min(earlier.precision);
        let shift = |p: TimePoint| {
            rescale(p.ticks, (i16::from(p.precision.level()) - i16::from(fine.level())) as u32)
        };
        match (shift(self), shift(earlier)) {
            (Some(a), Some(b)) => match a.checked_sub(b) {
                Some(diff) => Duration::from_wide(diff, fine),
                None => Duration::from_secs_f64(self.as_secs_f64() - earlier.as_secs_f64(), fine),
            },
            _ => Duration::from_secs_f64(
                self.as_secs_f64() - earlier.as_secs_f64(),
                self.precision.max(earlier.precision),
            ),
        }
    }

    /// Approximate position in seconds from the origin.
    pub fn as_secs_f64(&self) -> f64 {
        self.ticks as f64 * self.precision.approx()
    }
}

impl Default for TimePoint {
    fn default() -> Self {
        Self::ZERO
    }
}

impl Ord for TimePoint {
    fn cmp(&self, other: &Self) -> Ordering {
        cmp_scaled(self.ticks, self.precision, other.ticks, other.precision)
    }
}

impl PartialOrd for TimePoint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for TimePoint {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for TimePoint {}

impl Hash for TimePoint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        canonical(self.ticks, self.precision).hash(state);
    }
}

impl fmt::Display for TimePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (ticks, precision) = canonical(self.ticks, self.precision);
        write!(f, "{} {}", ticks, precision)
    }
}

impl TryFrom<String> for TimePoint {
    type Error = TimeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        TimePoint::from_origin(value.parse()?)
    }
}

impl From<TimePoint> for String {
    fn from(value: TimePoint) -> Self {
        value.to_string()
    }
}
