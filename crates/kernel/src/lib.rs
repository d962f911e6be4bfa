pub mod geometry;
pub mod topology;

use thiserror::Error;

pub use geometry::bbox::BoundingBox;
pub use geometry::curves::{BoundedCurve, Curve};
pub use geometry::interval::Interval;
pub use geometry::surfaces::{OrientedSurface, Surface};
pub use geometry::{Point3, Vec3};
pub use topology::brep::{EntityRef, EntityStore};

/// Absolute resolutions shared by every geometric comparison in the kernel.
///
/// Callers never invent their own tolerance scale: everything is expressed as a
/// multiple of one of these three values.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Tolerance {
    /// Positional resolution: points closer than this are the same point.
    pub resabs: f64,
    /// Normal resolution: unit vectors closer than this are the same direction.
    pub resnor: f64,
    /// Fitting tolerance used for approximations and near-miss acceptance.
    pub resfit: f64,
}

impl Default for Tolerance {
    fn default() -> Self {
        Self {
            resabs: 1e-6,
            resnor: 1e-10,
            resfit: 1e-3,
        }
    }
}

impl Tolerance {
    pub fn points_coincident(&self, a: &Point3, b: &Point3) -> bool {
        nalgebra::distance(a, b) < self.resabs
    }

    pub fn is_zero_length(&self, length: f64) -> bool {
        length.abs() < self.resabs
    }

    pub fn is_zero_angle(&self, angle: f64) -> bool {
        angle.abs() < self.resnor
    }

    /// Parameter-space resolution equivalent to `resabs` on a curve whose
    /// parametric speed is `speed` (the `respar` of a segment end test).
    pub fn param_resolution(&self, speed: f64) -> f64 {
        if speed > self.resnor {
            self.resabs / speed
        } else {
            self.resabs
        }
    }
}

/// Default resolutions.
pub fn default_tolerance() -> Tolerance {
    Tolerance::default()
}

/// Failures raised by kernel queries and constructors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum KernelError {
    #[error("entity {0:?} does not exist in the store")]
    MissingEntity(EntityRef),

    #[error("degenerate geometry: {reason}")]
    Degenerate { reason: String },

    #[error("{operation} is not supported between {first} and {second}")]
    Unsupported {
        operation: &'static str,
        first: &'static str,
        second: &'static str,
    },

    #[error("edges do not form a closed loop")]
    OpenLoop,

    #[error("serialization failed: {0}")]
    Serialization(String),
}
