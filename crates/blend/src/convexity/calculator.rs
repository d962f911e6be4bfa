use std::cell::OnceCell;

use cad_kernel::geometry::curves::BoundedCurve;
use cad_kernel::topology::brep::EdgeId;
use cad_kernel::{Curve, EntityStore, Interval, OrientedSurface, Point3};
use tracing::{debug, instrument};

use super::cvty::Cvty;
use super::info::{EdCvtyInfo, PtCvtyInfo};
use crate::error::{BlendError, BlendResult, Side};

/// Curvatures smaller than this count as flat when sub-classifying a tangent
/// junction.
const FLAT_CURVATURE: f64 = 1e-9;

/// Golden ratio conjugate used by the extremum search.
const INV_PHI: f64 = 0.618_033_988_749_894_8;

/// Which curve an evaluation point is taken from on a tolerant edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvalSide {
    #[default]
    Nominal,
    Left,
    Right,
}

/// One support surface of the edge, with the curve along which it actually
/// meets the edge when that differs from the nominal edge curve.
#[derive(Debug, Clone)]
pub struct SupportTrack {
    pub surface: OrientedSurface,
    pub curve: Option<BoundedCurve>,
}

impl SupportTrack {
    pub fn exact(surface: OrientedSurface) -> Self {
        Self { surface, curve: None }
    }
}

/// Evaluates the dihedral angle between two surfaces along a curve.
///
/// The angle is positive where the material between the surfaces is convex.
/// No tolerance is applied here: callers instantiate the returned infos at
/// whatever angular tolerance they need.
#[derive(Debug)]
pub struct CvtyCalculator {
    curve: Curve,
    range: Interval,
    left: SupportTrack,
    right: SupportTrack,
    samples: usize,
    iterations: usize,
    default_tol: f64,
    common: OnceCell<Interval>,
}

impl CvtyCalculator {
    /// Track curves, where given, must run the same way as `curve`.
    pub fn new(curve: Curve, range: Interval, left: SupportTrack, right: SupportTrack) -> BlendResult<Self> {
        for (side, track) in [(Side::Left, &left), (Side::Right, &right)] {
            let Some(bc) = &track.curve else { continue };
            let t = bc.range.mid();
            let p = bc.curve.position(t);
            let own = curve.param_of_near(&p, range.mid());
            let along = bc.curve.derivative(t).dot(&curve.derivative(own));
            if along <= 0.0 {
                return Err(BlendError::UnsupportedGeometry {
                    what: format!("{side:?} track curve running against the edge"),
                });
            }
        }
        Ok(Self {
            curve,
            range,
            left,
            right,
            samples: 9,
            iterations: 60,
            default_tol: 1e-6,
            common: OnceCell::new(),
        })
    }

    /// Calculator for a two-sided edge: the left support is the face of the
    /// coedge running with the edge.
    pub fn from_edge(store: &EntityStore, edge: EdgeId) -> BlendResult<Self> {
        let (fwd, bwd) = store.edge_coedge_pair(edge)?;
        let (Some(fwd), Some(bwd)) = (fwd, bwd) else {
            let side = if fwd.is_none() { Side::Left } else { Side::Right };
            return Err(BlendError::MissingSupport { side });
        };
        let left = store.oriented_surface(store.coedge_face(fwd)?)?;
        let right = store.oriented_surface(store.coedge_face(bwd)?)?;
        let e = store.edge(edge)?;
        Self::new(e.curve.clone(), e.range, SupportTrack::exact(left), SupportTrack::exact(right))
    }

    /// Sampling density, refinement depth and the tolerance recorded on
    /// curvature-aware results.
    pub fn with_settings(mut self, samples: usize, iterations: usize, default_tol: f64) -> Self {
        self.samples = samples.max(2);
        self.iterations = iterations;
        self.default_tol = default_tol;
        self
    }

    pub fn range(&self) -> Interval {
        self.range
    }

    fn point_on(&self, param: f64, side: EvalSide) -> Point3 {
        let nominal = self.curve.position(param);
        let track = match side {
            EvalSide::Nominal => None,
            EvalSide::Left => self.left.curve.as_ref(),
            EvalSide::Right => self.right.curve.as_ref(),
        };
        match track {
            Some(bc) => bc.curve.closest_point(&nominal).0,
            None => nominal,
        }
    }

    /// Convexity at one parameter of the curve.
    pub fn eval(&self, param: f64, use_curvatures: bool, side: EvalSide) -> PtCvtyInfo {
        let Some(tangent) = self.curve.tangent(param) else {
            return PtCvtyInfo::unknown_info();
        };
        let p = self.point_on(param, side);
        let n_l = self.left.surface.normal(&p);
        let n_r = self.right.surface.normal(&p);
        let angle = n_l.cross(&n_r).dot(&tangent).atan2(n_l.dot(&n_r));
        if !use_curvatures {
            return PtCvtyInfo::new(angle, Cvty::UNSET, None);
        }
        // Directions pointing into each face, away from the edge.
        let into_left = n_l.cross(&tangent);
        let into_right = tangent.cross(&n_r);
        let curvatures = self
            .left
            .surface
            .normal_curvature(&p, &into_left)
            .zip(self.right.surface.normal_curvature(&p, &into_right));
        let Some((k_l, k_r)) = curvatures else {
            return PtCvtyInfo::unknown_info();
        };
        PtCvtyInfo::new(angle, tangent_subclass(k_l, k_r), Some(self.default_tol))
    }

    fn sample_params(&self, range: Interval) -> Vec<f64> {
        let n = self.samples;
        (0..=n).map(|i| range.interpolate(i as f64 / n as f64)).collect()
    }

    /// Cheap bound on the angle over `range`. The interval is widened by the
    /// largest change seen between neighbouring samples, so it contains the
    /// true extremes for well-behaved edges without being tight.
    pub fn eval_adaptive(&self, range: Interval, use_curvatures: bool) -> EdCvtyInfo {
        let infos: Vec<PtCvtyInfo> = self
            .sample_params(range)
            .into_iter()
            .map(|t| self.eval(t, use_curvatures, EvalSide::Nominal))
            .collect();
        if infos.iter().any(PtCvtyInfo::unknown) {
            return EdCvtyInfo::unknown_info(range);
        }
        let mut angles = Interval::empty();
        let mut tangent_cvty = Cvty::UNSET;
        let mut step = 0.0_f64;
        for pair in infos.windows(2) {
            step = step.max((pair[1].angle() - pair[0].angle()).abs());
        }
        for info in &infos {
            angles.extend(info.angle());
            tangent_cvty = tangent_cvty.merge(info.tangent_cvty());
        }
        let default_tol = use_curvatures.then_some(self.default_tol);
        EdCvtyInfo::new(angles.widened(0.5 * step), tangent_cvty, default_tol, range, false)
    }

    /// Exact angle extremes over `range` by golden-section refinement around
    /// the best samples.
    #[instrument(skip(self))]
    pub fn eval_precise(&self, range: Interval, use_curvatures: bool) -> EdCvtyInfo {
        let params = self.sample_params(range);
        let mut infos = Vec::with_capacity(params.len());
        for &t in &params {
            let info = self.eval(t, use_curvatures, EvalSide::Nominal);
            if info.unknown() {
                return EdCvtyInfo::unknown_info(range);
            }
            infos.push(info);
        }
        let angle_at = |t: f64| self.eval(t, false, EvalSide::Nominal).angle();
        let mut angles = Interval::empty();
        let mut tangent_cvty = Cvty::UNSET;
        for info in &infos {
            angles.extend(info.angle());
            tangent_cvty = tangent_cvty.merge(info.tangent_cvty());
        }
        for sign in [1.0, -1.0] {
            let best = (0..infos.len())
                .max_by(|&a, &b| (sign * infos[a].angle()).total_cmp(&(sign * infos[b].angle())))
                .unwrap_or(0);
            let lo = params[best.saturating_sub(1)];
            let hi = params[(best + 1).min(params.len() - 1)];
            let t = golden_section(|t| sign * angle_at(t), lo, hi, self.iterations);
            angles.extend(angle_at(t));
        }
        debug!(low = angles.low(), high = angles.high(), "precise convexity bounds");
        let default_tol = use_curvatures.then_some(self.default_tol);
        EdCvtyInfo::new(angles, tangent_cvty, default_tol, range, true)
    }

    /// Sub-range of the nominal range over which every track curve runs
    /// alongside the nominal curve. Computed once.
    pub fn common_range(&self) -> Interval {
        *self.common.get_or_init(|| {
            let mut common = self.range;
            for track in [&self.left.curve, &self.right.curve].into_iter().flatten() {
                let a = self.curve.param_of_near(&track.start(), self.range.low());
                let b = self.curve.param_of_near(&track.end(), self.range.high());
                common = common & Interval::new(a, b);
            }
            common
        })
    }
}

/// Classify a tangent junction by how each face bends away from the edge.
fn tangent_subclass(k_left: f64, k_right: f64) -> Cvty {
    let bends = |k: f64| if k > FLAT_CURVATURE { 1 } else if k < -FLAT_CURVATURE { -1 } else { 0 };
    match (bends(k_left), bends(k_right)) {
        (1, -1) | (-1, 1) => Cvty::INFLECT,
        _ if k_left + k_right > FLAT_CURVATURE => Cvty::CONVEX,
        _ if k_left + k_right < -FLAT_CURVATURE => Cvty::CONCAVE,
        _ => Cvty::UNSET,
    }
}

/// Parameter of the maximum of `f` on `[a, b]`.
fn golden_section(f: impl Fn(f64) -> f64, mut a: f64, mut b: f64, iterations: usize) -> f64 {
    let mut c = b - INV_PHI * (b - a);
    let mut d = a + INV_PHI * (b - a);
    let (mut fc, mut fd) = (f(c), f(d));
    for _ in 0..iterations {
        if fc > fd {
            b = d;
            d = c;
            fd = fc;
            c = b - INV_PHI * (b - a);
            fc = f(c);
        } else {
            a = c;
            c = d;
            fc = fd;
            d = a + INV_PHI * (b - a);
            fd = f(d);
        }
    }
    0.5 * (a + b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use cad_kernel::geometry::surfaces::{Cylinder, Plane};
    use cad_kernel::topology::primitives::make_block;
    use cad_kernel::{Surface, Vec3};
    use std::f64::consts::FRAC_PI_2;

    fn plane(origin: Point3, normal: Vec3) -> SupportTrack {
        SupportTrack::exact(OrientedSurface::new(Surface::Plane(Plane::new(origin, normal).unwrap()), false))
    }

    #[test]
    fn test_block_edges_are_convex() {
        let mut store = EntityStore::new();
        let body = make_block(&mut store, Point3::origin(), Point3::new(2.0, 2.0, 2.0)).unwrap();
        for edge in store.body_edges(body).unwrap() {
            let calc = CvtyCalculator::from_edge(&store, edge).unwrap();
            let info = calc.eval(calc.range().mid(), true, EvalSide::Nominal);
            assert_relative_eq!(info.angle(), FRAC_PI_2, epsilon = 1e-9);
            assert!(info.instantiate(1e-3).sharp_convex());
        }
    }

    #[test]
    fn test_swapping_supports_flips_sign() {
        let curve = Curve::Line(cad_kernel::geometry::curves::Line3d::new(Point3::origin(), Vec3::x()).unwrap());
        let top = plane(Point3::origin(), Vec3::z());
        let front = plane(Point3::origin(), -Vec3::y());
        let range = Interval::new(0.0, 1.0);
        let convex = CvtyCalculator::new(curve.clone(), range, top.clone(), front.clone()).unwrap();
        let concave = CvtyCalculator::new(curve, range, front, top).unwrap();
        assert!(convex.eval(0.5, false, EvalSide::Nominal).angle() > 0.0);
        assert!(concave.eval(0.5, false, EvalSide::Nominal).angle() < 0.0);
        assert!(concave.eval(0.5, false, EvalSide::Nominal).default_tol().is_none());
    }

    #[test]
    fn test_tangent_plane_on_cylinder_is_convex_tangent() {
        // Plane y = 1 touching the cylinder of radius 1 along x = 0, y = 1.
        let cyl = Surface::Cylinder(Cylinder::new(Point3::origin(), Vec3::z(), 1.0).unwrap());
        let line = Curve::Line(cad_kernel::geometry::curves::Line3d::new(Point3::new(0.0, 1.0, 0.0), Vec3::z()).unwrap());
        let calc = CvtyCalculator::new(
            line,
            Interval::new(0.0, 1.0),
            SupportTrack::exact(OrientedSurface::new(cyl, false)),
            plane(Point3::new(0.0, 1.0, 0.0), Vec3::y()),
        )
        .unwrap();
        let info = calc.eval(0.5, true, EvalSide::Nominal);
        assert_relative_eq!(info.angle(), 0.0, epsilon = 1e-12);
        let c = info.instantiate_default().unwrap();
        assert!(c.tangent() && c.convex());
    }

    #[test]
    fn test_adaptive_and_precise_bound_the_angle() {
        let mut store = EntityStore::new();
        let body = make_block(&mut store, Point3::origin(), Point3::new(1.0, 1.0, 1.0)).unwrap();
        let edge = store.body_edges(body).unwrap()[0];
        let calc = CvtyCalculator::from_edge(&store, edge).unwrap();
        let adaptive = calc.eval_adaptive(calc.range(), false);
        let precise = calc.eval_precise(calc.range(), false);
        assert!(adaptive.angles().contains(FRAC_PI_2, 1e-9));
        assert!(precise.is_precise());
        assert_relative_eq!(precise.angles().low(), FRAC_PI_2, epsilon = 1e-9);
        assert_eq!(calc.common_range(), calc.range());
    }

    #[test]
    fn test_golden_section_finds_peak() {
        let t = golden_section(|t| -(t - 0.3) * (t - 0.3), 0.0, 1.0, 80);
        assert_relative_eq!(t, 0.3, epsilon = 1e-6);
    }
}
