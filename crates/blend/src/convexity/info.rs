use cad_kernel::Interval;
use serde::{Deserialize, Serialize};

use super::cvty::Cvty;

/// Classify an angle range at `tol`, falling back to `tangent_cvty` for the
/// part of the range inside the tangent band.
fn classify(angles: Interval, tangent_cvty: Cvty, tol: f64) -> Cvty {
    if angles.is_empty() {
        return Cvty::UNSET;
    }
    if angles.is_infinite() {
        return Cvty::UNKNOWN;
    }
    let tol = tol.abs();
    let (lo, hi) = (angles.low(), angles.high());
    let reaches_convex = hi > 0.0 && hi >= tol;
    let reaches_concave = lo < 0.0 && -lo >= tol;
    match (reaches_convex, reaches_concave) {
        (true, true) => Cvty::MIXED,
        (true, false) if lo > 0.0 && lo >= tol => Cvty::CONVEX,
        (false, true) if hi < 0.0 && -hi >= tol => Cvty::CONCAVE,
        (true, false) => Cvty::CONVEX | Cvty::TANGENT,
        (false, true) => Cvty::CONCAVE | Cvty::TANGENT,
        (false, false) => tangent_cvty.tangent_subclass() | Cvty::TANGENT,
    }
}

/// Convexity at one point of an edge, held as the raw dihedral angle so it
/// can be judged at any tolerance later.
///
/// An empty angle interval means *unset*, an infinite one *unknown*.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PtCvtyInfo {
    angles: Interval,
    /// Sub-classification of the tangent case from surface curvatures.
    tangent_cvty: Cvty,
    default_tol: Option<f64>,
}

impl Default for PtCvtyInfo {
    fn default() -> Self {
        Self::unset_info()
    }
}

impl PtCvtyInfo {
    pub fn new(angle: f64, tangent_cvty: Cvty, default_tol: Option<f64>) -> Self {
        Self {
            angles: Interval::point(angle),
            tangent_cvty,
            default_tol,
        }
    }

    pub fn unset_info() -> Self {
        Self {
            angles: Interval::empty(),
            tangent_cvty: Cvty::UNSET,
            default_tol: None,
        }
    }

    pub fn unknown_info() -> Self {
        Self {
            angles: Interval::infinite(),
            tangent_cvty: Cvty::UNKNOWN,
            default_tol: None,
        }
    }

    pub fn unset(&self) -> bool {
        self.angles.is_empty()
    }

    pub fn unknown(&self) -> bool {
        self.angles.is_infinite()
    }

    /// Signed dihedral angle, positive when convex. Zero when unset or unknown.
    pub fn angle(&self) -> f64 {
        if self.unset() || self.unknown() {
            0.0
        } else {
            self.angles.low()
        }
    }

    pub fn tangent_cvty(&self) -> Cvty {
        self.tangent_cvty
    }

    pub fn default_tol(&self) -> Option<f64> {
        self.default_tol
    }

    pub fn instantiate(&self, tol: f64) -> Cvty {
        classify(self.angles, self.tangent_cvty, tol)
    }

    /// Instantiate at the tolerance the evaluation recorded; `None` when the
    /// evaluation skipped curvatures and recorded no tolerance.
    pub fn instantiate_default(&self) -> Option<Cvty> {
        self.default_tol.map(|tol| self.instantiate(tol))
    }
}

/// Convexity over a parameter range of an edge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EdCvtyInfo {
    angles: Interval,
    tangent_cvty: Cvty,
    default_tol: Option<f64>,
    range: Interval,
    /// Whether the angle bounds are exact extrema rather than sampled bounds.
    precise: bool,
}

impl EdCvtyInfo {
    pub fn new(angles: Interval, tangent_cvty: Cvty, default_tol: Option<f64>, range: Interval, precise: bool) -> Self {
        Self {
            angles,
            tangent_cvty,
            default_tol,
            range,
            precise,
        }
    }

    pub fn unknown_info(range: Interval) -> Self {
        Self::new(Interval::infinite(), Cvty::UNKNOWN, None, range, false)
    }

    pub fn unset(&self) -> bool {
        self.angles.is_empty()
    }

    pub fn unknown(&self) -> bool {
        self.angles.is_infinite()
    }

    pub fn angles(&self) -> Interval {
        self.angles
    }

    pub fn range(&self) -> Interval {
        self.range
    }

    pub fn is_precise(&self) -> bool {
        self.precise
    }

    pub fn default_tol(&self) -> Option<f64> {
        self.default_tol
    }

    pub fn instantiate(&self, tol: f64) -> Cvty {
        classify(self.angles, self.tangent_cvty, tol)
    }

    pub fn instantiate_default(&self) -> Option<Cvty> {
        self.default_tol.map(|tol| self.instantiate(tol))
    }

    /// Whether the bounds leave the verdict open at `tol`: they straddle
    /// zero or touch the tangent band.
    pub fn ambiguous(&self, tol: f64) -> bool {
        !self.unset() && !self.unknown() && self.angles.straddles_zero(tol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_info_instantiation() {
        let convex = PtCvtyInfo::new(0.5, Cvty::UNSET, None);
        assert!(convex.instantiate(0.1).convex());
        assert!(convex.instantiate(0.5).convex());
        assert!(convex.instantiate(0.6).tangent());
        let concave = PtCvtyInfo::new(-0.5, Cvty::UNSET, None);
        assert!(concave.instantiate(0.1).concave());
        assert!(!concave.instantiate(0.1).tangent());
    }

    #[test]
    fn test_unset_and_unknown_states() {
        let unset = PtCvtyInfo::unset_info();
        assert!(unset.unset() && !unset.unknown());
        assert!(unset.instantiate(0.1).unset());
        let unknown = PtCvtyInfo::unknown_info();
        assert!(unknown.unknown() && !unknown.unset());
        assert!(unknown.instantiate(0.1).unknown());
    }

    #[test]
    fn test_tangent_subclass() {
        let info = PtCvtyInfo::new(1e-9, Cvty::CONVEX, Some(1e-6));
        let c = info.instantiate_default().unwrap();
        assert!(c.tangent());
        assert!(c.convex());
        assert!(PtCvtyInfo::new(1e-9, Cvty::UNSET, None).instantiate_default().is_none());
    }

    #[test]
    fn test_edge_info_ranges() {
        let full = Interval::new(0.0, 1.0);
        let convex = EdCvtyInfo::new(Interval::new(0.2, 0.4), Cvty::UNSET, None, full, true);
        assert_eq!(convex.instantiate(0.1), Cvty::CONVEX);
        let mixed = EdCvtyInfo::new(Interval::new(-0.2, 0.4), Cvty::UNSET, None, full, true);
        assert!(mixed.instantiate(0.1).mixed());
        assert!(mixed.ambiguous(0.1));
        let partly = EdCvtyInfo::new(Interval::new(0.01, 0.4), Cvty::UNSET, None, full, true);
        let c = partly.instantiate(0.1);
        assert!(c.convex() && c.tangent());
        assert!(!convex.ambiguous(0.1));
    }
}
