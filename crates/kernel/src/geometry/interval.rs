use serde::{Deserialize, Serialize};
use std::ops::{BitAnd, BitOr};

/// A closed range of real numbers; either bound may be infinite.
///
/// An interval whose low bound exceeds its high bound is empty. The empty and the
/// infinite interval are distinct values and both are meaningful to callers:
/// convexity uses "empty" for *not evaluated* and "infinite" for *unknown*.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    low: f64,
    high: f64,
}

impl Default for Interval {
    fn default() -> Self {
        Self::empty()
    }
}

impl Interval {
    /// Interval spanning `a` and `b` in either order.
    pub fn new(a: f64, b: f64) -> Self {
        if a <= b {
            Self { low: a, high: b }
        } else {
            Self { low: b, high: a }
        }
    }

    pub fn point(t: f64) -> Self {
        Self { low: t, high: t }
    }

    pub fn empty() -> Self {
        Self {
            low: f64::INFINITY,
            high: f64::NEG_INFINITY,
        }
    }

    pub fn infinite() -> Self {
        Self {
            low: f64::NEG_INFINITY,
            high: f64::INFINITY,
        }
    }

    pub fn low(&self) -> f64 {
        self.low
    }

    pub fn high(&self) -> f64 {
        self.high
    }

    pub fn is_empty(&self) -> bool {
        !(self.low <= self.high)
    }

    pub fn is_infinite(&self) -> bool {
        self.low == f64::NEG_INFINITY && self.high == f64::INFINITY
    }

    pub fn is_finite(&self) -> bool {
        !self.is_empty() && self.low.is_finite() && self.high.is_finite()
    }

    pub fn length(&self) -> f64 {
        if self.is_empty() {
            0.0
        } else {
            self.high - self.low
        }
    }

    pub fn mid(&self) -> f64 {
        0.5 * (self.low + self.high)
    }

    /// Parameter at fraction `s` of the way from low to high.
    pub fn interpolate(&self, s: f64) -> f64 {
        self.low + s * (self.high - self.low)
    }

    pub fn contains(&self, t: f64, tol: f64) -> bool {
        !self.is_empty() && t >= self.low - tol && t <= self.high + tol
    }

    pub fn contains_interval(&self, other: &Interval, tol: f64) -> bool {
        other.is_empty() || (self.contains(other.low, tol) && self.contains(other.high, tol))
    }

    /// Whether the interval overlaps `[-tol, tol]`.
    pub fn straddles_zero(&self, tol: f64) -> bool {
        self.contains(0.0, tol)
    }

    /// Grow to include `t`.
    pub fn extend(&mut self, t: f64) {
        if self.is_empty() {
            *self = Self::point(t);
        } else {
            self.low = self.low.min(t);
            self.high = self.high.max(t);
        }
    }

    /// Widen both ends by `amount` (no effect on an empty interval).
    pub fn widened(&self, amount: f64) -> Self {
        if self.is_empty() {
            *self
        } else {
            Self {
                low: self.low - amount,
                high: self.high + amount,
            }
        }
    }

    /// Clamp `t` into the interval.
    pub fn clamp(&self, t: f64) -> f64 {
        if self.is_empty() {
            t
        } else {
            t.clamp(self.low, self.high)
        }
    }

    pub fn reversed(&self) -> Self {
        if self.is_empty() {
            *self
        } else {
            Self {
                low: -self.high,
                high: -self.low,
            }
        }
    }
}

/// Smallest interval containing both.
impl BitOr for Interval {
    type Output = Interval;
    fn bitor(self, rhs: Self) -> Self::Output {
        if self.is_empty() {
            return rhs;
        }
        if rhs.is_empty() {
            return self;
        }
        Interval {
            low: self.low.min(rhs.low),
            high: self.high.max(rhs.high),
        }
    }
}

/// Intersection (possibly empty).
impl BitAnd for Interval {
    type Output = Interval;
    fn bitand(self, rhs: Self) -> Self::Output {
        if self.is_empty() || rhs.is_empty() {
            return Interval::empty();
        }
        Interval {
            low: self.low.max(rhs.low),
            high: self.high.min(rhs.high),
        }
    }
}
