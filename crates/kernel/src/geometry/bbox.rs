use serde::{Deserialize, Serialize};

use super::interval::Interval;
use super::Point3;

/// Axis-aligned box, the product of three intervals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: Interval,
    pub y: Interval,
    pub z: Interval,
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self::empty()
    }
}

impl BoundingBox {
    pub fn empty() -> Self {
        Self {
            x: Interval::empty(),
            y: Interval::empty(),
            z: Interval::empty(),
        }
    }

    /// The unbounded box; contains everything.
    pub fn infinite() -> Self {
        Self {
            x: Interval::infinite(),
            y: Interval::infinite(),
            z: Interval::infinite(),
        }
    }

    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Point3>) -> Self {
        let mut bb = Self::empty();
        for p in points {
            bb.expand_to_include(p);
        }
        bb
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty() || self.y.is_empty() || self.z.is_empty()
    }

    pub fn expand_to_include(&mut self, p: &Point3) {
        self.x.extend(p.x);
        self.y.extend(p.y);
        self.z.extend(p.z);
    }

    pub fn enlarged(&self, amount: f64) -> Self {
        Self {
            x: self.x.widened(amount),
            y: self.y.widened(amount),
            z: self.z.widened(amount),
        }
    }

    pub fn contains_point(&self, p: &Point3, tol: f64) -> bool {
        self.x.contains(p.x, tol) && self.y.contains(p.y, tol) && self.z.contains(p.z, tol)
    }

    pub fn intersects(&self, other: &Self) -> bool {
        !(self.x & other.x).is_empty()
            && !(self.y & other.y).is_empty()
            && !(self.z & other.z).is_empty()
    }

    pub fn union(&self, other: &Self) -> Self {
        Self {
            x: self.x | other.x,
            y: self.y | other.y,
            z: self.z | other.z,
        }
    }

    /// Length of the main diagonal (zero for an empty box).
    pub fn diagonal(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        let (dx, dy, dz) = (self.x.length(), self.y.length(), self.z.length());
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}
