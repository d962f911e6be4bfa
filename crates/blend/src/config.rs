use cad_kernel::Tolerance;
use serde::{Deserialize, Serialize};

/// Knobs for one blending session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlendConfig {
    /// Kernel resolutions all comparisons are expressed in.
    pub tolerance: Tolerance,
    /// Angle (radians) below which an edge's dihedral counts as tangent when
    /// a convexity is instantiated for blending.
    pub angle_tol: f64,
    /// Angle (radians) below which a lateral edge is near-tangent, which
    /// relaxes the segment-end join test.
    pub near_tangent_angle: f64,
    /// Sample count for adaptive convexity bounds along an edge.
    pub adaptive_samples: usize,
    /// Golden-section iterations for precise convexity extrema.
    pub precise_iterations: usize,
    /// Retryable failures allowed per attribute before it fails permanently.
    pub max_attempts: i32,
    /// How far from planar a gap between segments may be and still be bridged.
    pub fill_gap_planarity: f64,
}

impl Default for BlendConfig {
    fn default() -> Self {
        Self {
            tolerance: Tolerance::default(),
            angle_tol: 1e-6,
            near_tangent_angle: 0.05,
            adaptive_samples: 9,
            precise_iterations: 60,
            max_attempts: 3,
            fill_gap_planarity: 1e-6,
        }
    }
}

impl BlendConfig {
    /// Tight resolutions and a single attempt per blend.
    pub fn strict() -> Self {
        Self {
            tolerance: Tolerance {
                resabs: 1e-8,
                resnor: 1e-12,
                resfit: 1e-5,
            },
            angle_tol: 1e-8,
            near_tangent_angle: 0.01,
            max_attempts: 1,
            fill_gap_planarity: 1e-8,
            ..Self::default()
        }
    }

    /// Loose resolutions for imported, tolerant models.
    pub fn tolerant() -> Self {
        Self {
            tolerance: Tolerance {
                resabs: 1e-5,
                resnor: 1e-8,
                resfit: 1e-2,
            },
            angle_tol: 1e-4,
            near_tangent_angle: 0.1,
            adaptive_samples: 17,
            max_attempts: 5,
            fill_gap_planarity: 1e-4,
            ..Self::default()
        }
    }

    pub fn resabs(&self) -> f64 {
        self.tolerance.resabs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_order_tolerances() {
        let strict = BlendConfig::strict();
        let default = BlendConfig::default();
        let tolerant = BlendConfig::tolerant();
        assert!(strict.resabs() < default.resabs());
        assert!(default.resabs() < tolerant.resabs());
        assert!(strict.max_attempts <= default.max_attempts);
        assert!(tolerant.adaptive_samples > default.adaptive_samples);
    }
}
