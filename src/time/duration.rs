//! Scaled-integer durations.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Add;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::scale::{canonical, cmp_scaled, rescale, round_coarser, Scale};
use super::TimeError;

/// Largest multiplier magnitude a finite duration holds before it is coarsened.
pub const MAX_MULTIPLIER: i64 = 999_999_999_999_999;

const INFINITE_MULTIPLIER: i64 = i64::MAX;

/// A span of simulated time: a signed multiplier at a [`Scale`], or infinity.
///
/// Infinity means "never" and is what a node returns when it has no internal
/// event planned. Durations of different precisions compare and add exactly;
/// when a sum no longer fits [`MAX_MULTIPLIER`] it is re-expressed at a
/// coarser scale, rounding half away from zero.
///
/// # Example
///
/// ```rust
/// use devskit::time::{Duration, Scale};
///
/// let a = Duration::secs(1);
/// let b = Duration::new(1000, Scale::MILLI);
/// assert_eq!(a, b);
/// assert_eq!(a + Duration::millis(250), Duration::millis(1250));
/// assert!(Duration::INFINITE > Duration::secs(1_000_000));
/// ```
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Duration {
    multiplier: i64,
    precision: Scale,
}

impl Duration {
    pub const ZERO: Duration = Duration {
        multiplier: 0,
        precision: Scale::UNIT,
    };

    pub const INFINITE: Duration = Duration {
        multiplier: INFINITE_MULTIPLIER,
        precision: Scale::UNIT,
    };

    /// Creates a duration of `multiplier` units of `precision`.
    pub fn new(multiplier: i64, precision: Scale) -> Self {
        Self::from_wide(i128::from(multiplier), precision)
    }

    pub fn secs(n: i64) -> Self {
        Self::new(n, Scale::UNIT)
    }

    pub fn millis(n: i64) -> Self {
        Self::new(n, Scale::MILLI)
    }

    pub fn micros(n: i64) -> Self {
        Self::new(n, Scale::MICRO)
    }

    pub fn nanos(n: i64) -> Self {
        Self::new(n, Scale::NANO)
    }

    pub fn minutes(n: i64) -> Self {
        Self::from_wide(i128::from(n) * 60, Scale::UNIT)
    }

    pub fn hours(n: i64) -> Self {
        Self::from_wide(i128::from(n) * 3600, Scale::UNIT)
    }

    pub(crate) fn from_wide(mut value: i128, mut precision: Scale) -> Self {
        while value.unsigned_abs() > MAX_MULTIPLIER as u128 {
            if precision.level() == i8::MAX {
                return if value > 0 {
                    Self::INFINITE
                } else {
                    Self {
                        multiplier: -MAX_MULTIPLIER,
                        precision,
                    }
                };
            }
            value = round_coarser(value);
            precision = precision.coarser();
        }
        Self {
            multiplier: value as i64,
            precision,
        }
    }

    /// Converts seconds to a duration at `precision`, rounding to the nearest unit.
    pub fn from_secs_f64(secs: f64, precision: Scale) -> Self {
        if secs.is_nan() {
            return Self::ZERO;
        }
        if secs == f64::INFINITY {
            return Self::INFINITE;
        }
        let units = (secs / precision.approx()).round();
        Self::from_wide(units as i128, precision)
    }

    /// Converts a wall-clock duration at nanosecond precision.
    pub fn from_std(duration: std::time::Duration) -> Self {
        Self::from_wide(duration.as_nanos() as i128, Scale::NANO)
    }

    /// Returns the multiplier. Infinity reports `i64::MAX`.
    pub fn multiplier(&self) -> i64 {
        self.multiplier
    }

    pub fn precision(&self) -> Scale {
        self.precision
    }

    pub fn is_finite(&self) -> bool {
        self.multiplier != INFINITE_MULTIPLIER
    }

    pub fn is_infinite(&self) -> bool {
        !self.is_finite()
    }

    pub fn is_zero(&self) -> bool {
        self.multiplier == 0
    }

    pub fn is_negative(&self) -> bool {
        self.multiplier < 0
    }

    /// Returns true for durations strictly greater than zero, infinity included.
    pub fn is_positive(&self) -> bool {
        self.multiplier > 0
    }

    /// Exact number of `precision` units, when `precision` is at least as fine.
    pub(crate) fn ticks_at(&self, precision: Scale) -> Option<i128> {
        if self.is_infinite() || precision > self.precision {
            return None;
        }
        let levels = (i16::from(self.precision.level()) - i16::from(precision.level())) as u32;
        rescale(i128::from(self.multiplier), levels)
    }

    /// Approximate length in seconds.
    pub fn as_secs_f64(&self) -> f64 {
        if self.is_infinite() {
            f64::INFINITY
        } else {
            self.multiplier as f64 * self.precision.approx()
        }
    }

    /// Converts to a wall-clock duration. `None` for negative or infinite values.
    pub fn to_std(&self) -> Option<std::time::Duration> {
        if self.is_infinite() || self.is_negative() {
            return None;
        }
        match self.ticks_at(Scale::NANO) {
            Some(ns) => u64::try_from(ns).ok().map(std::time::Duration::from_nanos),
            None if self.precision < Scale::NANO => {
                Some(std::time::Duration::from_secs_f64(self.as_secs_f64()))
            }
            None => None,
        }
    }

    /// Subtracts `rhs`. `None` when `rhs` is infinite.
    pub fn checked_sub(self, rhs: Duration) -> Option<Duration> {
        if rhs.is_infinite() {
            return None;
        }
        Some(self + rhs.negated())
    }

    fn negated(self) -> Duration {
        Duration {
            multiplier: -self.multiplier,
            precision: self.precision,
        }
    }
}

impl Add for Duration {
    type Output = Duration;

    fn add(self, rhs: Duration) -> Duration {
        if self.is_infinite() || rhs.is_infinite() {
            return Duration::INFINITE;
        }
        let fine = self.precision.min(rhs.precision);
        if let (Some(a), Some(b)) = (self.ticks_at(fine), rhs.ticks_at(fine)) {
            if let Some(sum) = a.checked_add(b) {
                return Duration::from_wide(sum, fine);
            }
        }
        // The finer term vanishes next to the coarser one; add at the coarse level.
        let (coarse, finer) = if self.precision > rhs.precision {
            (self, rhs)
        } else {
            (rhs, self)
        };
        let mut value = i128::from(finer.multiplier);
        let mut level = finer.precision;
        while level < coarse.precision && value != 0 {
            value = round_coarser(value);
            level = level.coarser();
        }
        Duration::from_wide(value + i128::from(coarse.multiplier), coarse.precision)
    }
}

impl Ord for Duration {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.is_infinite(), other.is_infinite()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => cmp_scaled(
                i128::from(self.multiplier),
                self.precision,
                i128::from(other.multiplier),
                other.precision,
            ),
        }
    }
}

impl PartialOrd for Duration {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Duration {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Duration {}

impl Hash for Duration {
    fn hash<H: Hasher>(&self, state: &mut H) {
        if self.is_infinite() {
            state.write_u8(1);
        } else {
            state.write_u8(0);
            canonical(i128::from(self.multiplier), self.precision).hash(state);
        }
    }
}

impl Default for Duration {
    fn default() -> Self {
        Self::ZERO
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_infinite() {
            write!(f, "inf")
        } else {
            write!(f, "{} {}", self.multiplier, self.precision)
        }
    }
}

impl FromStr for Duration {
    type Err = TimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        if matches!(text, "inf" | "infinity" | "never") {
            return Ok(Duration::INFINITE);
        }
        let split = text
            .char_indices()
            .find(|(i, c)| !(c.is_ascii_digit() || (*i == 0 && (*c == '-' || *c == '+'))))
            .map(|(i, _)| i)
            .unwrap_or(text.len());
        let (number, unit) = text.split_at(split);
        let multiplier: i64 = number
            .parse()
            .map_err(|_| TimeError::Parse(s.to_string()))?;
        let unit = unit.trim();
        if unit.is_empty() {
            return if multiplier == 0 {
                Ok(Duration::ZERO)
            } else {
                Err(TimeError::Parse(s.to_string()))
            };
        }
        let prefix = unit
            .strip_suffix('s')
            .ok_or_else(|| TimeError::Parse(s.to_string()))?;
        let precision = Scale::from_symbol(prefix).ok_or_else(|| TimeError::Parse(s.to_string()))?;
        Ok(Duration::new(multiplier, precision))
    }
}

impl TryFrom<String> for Duration {
    type Error = TimeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Duration> for String {
    fn from(value: Duration) -> Self {
        value.to_string()
    }
}
