//! Order-of-magnitude tags for time values.
//!
//! A `Scale` is a power of 1000 expressed as a signed level: level 0 is one
//! second, level -1 a millisecond, level 1 a kilosecond and so on. Every
//! duration carries one, which is what lets values of different precisions
//! be compared and added exactly.

use std::fmt;

use serde::{Deserialize, Serialize};

const SYMBOLS: [&str; 17] = [
    "y", "z", "a", "f", "p", "n", "u", "m", "", "k", "M", "G", "T", "P", "E", "Z", "Y",
];

/// A base-1000 precision level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Scale(i8);

impl Scale {
    pub const YOCTO: Scale = Scale(-8);
    pub const ZEPTO: Scale = Scale(-7);
    pub const ATTO: Scale = Scale(-6);
    pub const FEMTO: Scale = Scale(-5);
    pub const PICO: Scale = Scale(-4);
    pub const NANO: Scale = Scale(-3);
    pub const MICRO: Scale = Scale(-2);
    pub const MILLI: Scale = Scale(-1);
    pub const UNIT: Scale = Scale(0);
    pub const KILO: Scale = Scale(1);
    pub const MEGA: Scale = Scale(2);
    pub const GIGA: Scale = Scale(3);
    pub const TERA: Scale = Scale(4);
    pub const PETA: Scale = Scale(5);
    pub const EXA: Scale = Scale(6);
    pub const ZETTA: Scale = Scale(7);
    pub const YOTTA: Scale = Scale(8);

    /// Creates a scale from its level (power of 1000).
    pub const fn new(level: i8) -> Self {
        Self(level)
    }

    /// Returns the level of this scale.
    pub const fn level(self) -> i8 {
        self.0
    }

    /// Returns the SI prefix symbol, if the level has one.
    pub fn symbol(self) -> Option<&'static str> {
        let index = i16::from(self.0) + 8;
        if (0..17).contains(&index) {
            Some(SYMBOLS[index as usize])
        } else {
            None
        }
    }

    /// Looks up a scale by SI prefix symbol (`"m"` for milli, `""` for unit).
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        SYMBOLS
            .iter()
            .position(|s| *s == symbol)
            .map(|i| Scale(i as i8 - 8))
    }

    /// Returns the approximate magnitude in seconds.
    pub fn approx(self) -> f64 {
        1000f64.powi(i32::from(self.0))
    }

    /// Returns the next coarser scale, saturating at the largest level.
    pub fn coarser(self) -> Self {
        Scale(self.0.saturating_add(1))
    }

    /// Returns the next finer scale, saturating at the smallest level.
    pub fn finer(self) -> Self {
        Scale(self.0.saturating_sub(1))
    }
}

impl Default for Scale {
    fn default() -> Self {
        Scale::UNIT
    }
}

impl fmt::Display for Scale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.symbol() {
            Some(symbol) => write!(f, "{}s", symbol),
            None => write!(f, "[{}]s", self.0),
        }
    }
}

/// Multiplies `value` by 1000^`levels`, returning `None` on overflow.
pub(crate) fn rescale(value: i128, levels: u32) -> Option<i128> {
    if value == 0 {
        return Some(0);
    }
    1000i128.checked_pow(levels)?.checked_mul(value)
}

/// Divides `value` by 1000, rounding half away from zero.
pub(crate) fn round_coarser(value: i128) -> i128 {
    let quotient = value / 1000;
    let remainder = value % 1000;
    if remainder >= 500 {
        quotient + 1
    } else if remainder <= -500 {
        quotient - 1
    } else {
        quotient
    }
}

/// Compares `a` at level `pa` with `b` at level `pb` exactly.
pub(crate) fn cmp_scaled(a: i128, pa: Scale, b: i128, pb: Scale) -> std::cmp::Ordering {
    use std::cmp::Ordering;

    match pa.cmp(&pb) {
        Ordering::Equal => a.cmp(&b),
        Ordering::Greater => match rescale(a, (pa.0 as i16 - pb.0 as i16) as u32) {
            Some(a) => a.cmp(&b),
            // `a` is non-zero and larger in magnitude than anything `b` can hold
            None if a > 0 => Ordering::Greater,
            None => Ordering::Less,
        },
        Ordering::Less => cmp_scaled(b, pb, a, pa).reverse(),
    }
}

/// Strips trailing factors of 1000, returning the coarsest exact form.
pub(crate) fn canonical(mut value: i128, mut precision: Scale) -> (i128, Scale) {
    if value == 0 {
        return (0, Scale::UNIT);
    }
    while value % 1000 == 0 && precision.0 < i8::MAX {
        value /= 1000;
        precision = precision.coarser();
    }
    (value, precision)
}
