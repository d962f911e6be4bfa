//! Shared, lazily filled blend geometry: spine, spring curves and the blend
//! surface, plus the projection used to derive springs from a spine.

use std::cell::{Cell, RefCell};
use std::f64::consts::TAU;
use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

use cad_kernel::geometry::curves::{Circle3d, Line3d};
use cad_kernel::geometry::intersection::intersect_curve_surface;
use cad_kernel::geometry::surfaces::Plane;
use cad_kernel::{BoundedCurve, BoundingBox, Curve, Interval, OrientedSurface, Point3, Surface};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{BlendError, BlendResult, Side};

/// Samples taken along a curve when projecting it.
const PROJECTION_SAMPLES: usize = 8;

/// Single-threaded shared handle with explicit `add` / `remove`.
///
/// The value is dropped exactly once, when the last handle is removed.
/// `remove` consumes the handle, so a handle cannot be released twice.
pub struct Shared<T>(Rc<T>);

impl<T> Shared<T> {
    pub fn new(value: T) -> Self {
        Self(Rc::new(value))
    }

    /// Another handle to the same value.
    pub fn add(&self) -> Self {
        Self(Rc::clone(&self.0))
    }

    /// Release this handle.
    pub fn remove(self) {
        drop(self)
    }

    pub fn use_count(&self) -> usize {
        Rc::strong_count(&self.0)
    }

    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Rc::ptr_eq(&a.0, &b.0)
    }
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        self.add()
    }
}

impl<T> Deref for Shared<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T: fmt::Debug> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("use_count", &self.use_count())
            .field("value", &*self.0)
            .finish()
    }
}

/// A result that may be a curve, a degenerate point, not yet computed, or
/// known impossible.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum PointCur {
    #[default]
    Unset,
    Curve {
        curve: BoundedCurve,
        /// Tangent-plane companion surface for slope-continuous blends.
        aux_surface: Option<OrientedSurface>,
    },
    Point(Point3),
    Impossible,
}

impl PointCur {
    pub fn curve(curve: BoundedCurve) -> Self {
        PointCur::Curve { curve, aux_surface: None }
    }

    pub fn is_set(&self) -> bool {
        !matches!(self, PointCur::Unset)
    }

    pub fn is_impossible(&self) -> bool {
        matches!(self, PointCur::Impossible)
    }

    pub fn as_curve(&self) -> Option<&BoundedCurve> {
        match self {
            PointCur::Curve { curve, .. } => Some(curve),
            _ => None,
        }
    }

    pub fn as_point(&self) -> Option<Point3> {
        match self {
            PointCur::Point(p) => Some(*p),
            _ => None,
        }
    }

    /// Reverse the sense of a curve in place. Points are unchanged.
    pub fn negate(&mut self) {
        if let PointCur::Curve { curve, .. } = self {
            *curve = curve.reversed();
        }
    }

    pub fn is_straight(&self) -> bool {
        self.as_curve().is_some_and(|c| c.curve.is_straight())
    }

    pub fn is_circle(&self) -> bool {
        self.as_curve().is_some_and(|c| c.curve.is_circle())
    }

    /// First position, if there is any geometry.
    pub fn start(&self) -> Option<Point3> {
        match self {
            PointCur::Curve { curve, .. } => Some(curve.start()),
            PointCur::Point(p) => Some(*p),
            _ => None,
        }
    }

    pub fn end(&self) -> Option<Point3> {
        match self {
            PointCur::Curve { curve, .. } => Some(curve.end()),
            PointCur::Point(p) => Some(*p),
            _ => None,
        }
    }
}

/// One level up from [`PointCur`]: an untrimmed surface may also be the answer.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum PointCurSurf {
    #[default]
    Unset,
    Surface(OrientedSurface),
    PointCur(PointCur),
    Impossible,
}

impl PointCurSurf {
    pub fn is_impossible(&self) -> bool {
        match self {
            PointCurSurf::Impossible => true,
            PointCurSurf::PointCur(pc) => pc.is_impossible(),
            _ => false,
        }
    }

    pub fn as_surface(&self) -> Option<&OrientedSurface> {
        match self {
            PointCurSurf::Surface(s) => Some(s),
            _ => None,
        }
    }
}

/// Whether the end of a spring curve has been checked for crossing a
/// neighbouring curve, and where.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum CcXInfo {
    #[default]
    NotChecked,
    NotFound,
    Found { param: f64, position: Point3 },
}

impl CcXInfo {
    pub fn checked(&self) -> bool {
        !matches!(self, CcXInfo::NotChecked)
    }
}

/// Geometry of one face-face blend, shared between the attribute and every
/// segment end that refers to it.
#[derive(Debug, Default)]
pub struct FfblendGeom {
    surface: RefCell<PointCurSurf>,
    spine: RefCell<PointCur>,
    left_spring: RefCell<PointCur>,
    right_spring: RefCell<PointCur>,
    start_x: Cell<CcXInfo>,
    end_x: Cell<CcXInfo>,
    impossible: Cell<bool>,
}

pub type FfblendGeomRef = Shared<FfblendGeom>;

impl FfblendGeom {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> FfblendGeomRef {
        Shared::new(Self::new())
    }

    pub fn surface(&self) -> PointCurSurf {
        self.surface.borrow().clone()
    }

    pub fn set_surface(&self, surface: PointCurSurf) {
        if surface.is_impossible() {
            self.declare_impossible();
        }
        *self.surface.borrow_mut() = surface;
    }

    pub fn spine(&self) -> PointCur {
        self.spine.borrow().clone()
    }

    pub fn set_spine(&self, spine: PointCur) {
        if spine.is_impossible() {
            self.declare_impossible();
        }
        *self.spine.borrow_mut() = spine;
    }

    pub fn spring(&self, side: Side) -> PointCur {
        match side {
            Side::Left => self.left_spring.borrow().clone(),
            Side::Right => self.right_spring.borrow().clone(),
        }
    }

    pub fn set_spring(&self, side: Side, spring: PointCur) {
        if spring.is_impossible() {
            self.declare_impossible();
        }
        let slot = match side {
            Side::Left => &self.left_spring,
            Side::Right => &self.right_spring,
        };
        *slot.borrow_mut() = spring;
    }

    pub fn cc_x_info(&self, at_start: bool) -> CcXInfo {
        if at_start { self.start_x.get() } else { self.end_x.get() }
    }

    pub fn set_cc_x_info(&self, at_start: bool, info: CcXInfo) {
        if at_start {
            self.start_x.set(info);
        } else {
            self.end_x.set(info);
        }
    }

    /// Latch the record impossible. There is no way back.
    pub fn declare_impossible(&self) {
        self.impossible.set(true);
    }

    pub fn is_impossible(&self) -> bool {
        self.impossible.get()
            || self.spine.borrow().is_impossible()
            || self.left_spring.borrow().is_impossible()
            || self.right_spring.borrow().is_impossible()
            || self.surface.borrow().is_impossible()
    }

    /// Whether spine and both springs have been computed.
    pub fn complete(&self) -> bool {
        self.spine.borrow().is_set() && self.left_spring.borrow().is_set() && self.right_spring.borrow().is_set()
    }
}

/// Project a point or curve onto a surface.
///
/// With `offset_base`, the projection is onto `offset_base` offset by
/// `offset` along its normal (negative for concave blends); the answer must
/// then still lie on `on_surface`. Where the projection has several
/// branches, the one nearest `help` wins. The result is trimmed to the
/// positive side of `forward_plane` and must meet `bounds`; anything else is
/// impossible.
#[allow(clippy::too_many_arguments)]
pub fn project_pc(
    projectee: &PointCur,
    on_surface: &OrientedSurface,
    offset_base: Option<&OrientedSurface>,
    offset: f64,
    forward_plane: Option<&Plane>,
    bounds: &BoundingBox,
    tol: f64,
    help: Option<&Point3>,
) -> BlendResult<PointCur> {
    let target = match offset_base {
        Some(base) => match base.offset(offset) {
            Some(s) => s,
            None => return Ok(PointCur::Impossible),
        },
        None => on_surface.clone(),
    };
    let project = |p: &Point3| -> Point3 {
        let candidates = target.surface.foot_candidates(p);
        let reference = help.unwrap_or(p);
        candidates
            .into_iter()
            .map(|c| c.point)
            .min_by(|a, b| nalgebra::distance(a, reference).total_cmp(&nalgebra::distance(b, reference)))
            .unwrap_or(*p)
    };
    let projected = match projectee {
        PointCur::Unset => return Ok(PointCur::Unset),
        PointCur::Impossible => return Ok(PointCur::Impossible),
        PointCur::Point(p) => {
            let q = project(p);
            if on_surface.signed_distance(&q).abs() > tol || (!bounds.is_empty() && !bounds.contains_point(&q, tol)) {
                return Ok(PointCur::Impossible);
            }
            if let Some(plane) = forward_plane {
                if plane.signed_distance(&q) < -tol {
                    return Ok(PointCur::Impossible);
                }
            }
            return Ok(PointCur::Point(q));
        }
        PointCur::Curve { curve, .. } => {
            let samples: Vec<Point3> = curve.sample(PROJECTION_SAMPLES).iter().map(&project).collect();
            if samples.iter().any(|q| on_surface.signed_distance(q).abs() > tol) {
                debug!("projection leaves the target surface");
                return Ok(PointCur::Impossible);
            }
            let closed = curve.curve.period().is_some_and(|p| curve.range.length() >= p - 1e-9);
            fit_projection(&samples, closed, tol)?
        }
    };
    let trimmed = match forward_plane {
        Some(plane) => match trim_forward(projected, plane, tol) {
            Some(bc) => bc,
            None => return Ok(PointCur::Impossible),
        },
        None => projected,
    };
    if !bounds.is_empty() && !trimmed.sample(PROJECTION_SAMPLES).iter().any(|p| bounds.contains_point(p, tol)) {
        return Ok(PointCur::Impossible);
    }
    Ok(PointCur::curve(trimmed))
}

/// A line or circle through projected samples, running the same way.
fn fit_projection(samples: &[Point3], closed: bool, tol: f64) -> BlendResult<BoundedCurve> {
    let n = samples.len();
    let (first, last) = (samples[0], samples[n - 1]);
    let unsupported = || BlendError::UnsupportedGeometry {
        what: "projection that is neither a line nor a circle".into(),
    };
    let fits = |curve: &Curve| samples.iter().all(|p| curve.distance_to(p) < tol);

    if !closed {
        if let Some(line) = Line3d::through(first, last).map(Curve::Line) {
            if fits(&line) {
                let range = Interval::new(line.param_of(&first), line.param_of(&last));
                return Ok(BoundedCurve::new(line, range));
            }
        }
    }
    let circle = Circle3d::through_points(&samples[0], &samples[n / 3], &samples[2 * n / 3])
        .map(Curve::Circle)
        .ok_or_else(unsupported)?;
    if !fits(&circle) {
        return Err(unsupported());
    }
    if closed {
        let t0 = circle.param_of(&first);
        return Ok(BoundedCurve::new(circle, Interval::new(t0, t0 + TAU)));
    }
    Ok(BoundedCurve::between(circle, &first, &last, &samples[n / 2]))
}

/// Drop the part of `curve` behind `plane`.
fn trim_forward(curve: BoundedCurve, plane: &Plane, tol: f64) -> Option<BoundedCurve> {
    let start_ahead = plane.signed_distance(&curve.start()) >= -tol;
    let end_ahead = plane.signed_distance(&curve.end()) >= -tol;
    if start_ahead && end_ahead {
        return Some(curve);
    }
    let hits = intersect_curve_surface(&curve.curve, curve.range, &Surface::Plane(*plane), tol);
    let cut = hits.first()?.param;
    let range = if start_ahead {
        Interval::new(curve.range.low(), cut)
    } else {
        Interval::new(cut, curve.range.high())
    };
    (range.length() > tol).then(|| BoundedCurve::new(curve.curve, range))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use cad_kernel::geometry::surfaces::Cylinder;
    use cad_kernel::Vec3;
    use std::cell::Cell as StdCell;

    struct DropCounter<'a>(&'a StdCell<usize>);

    impl Drop for DropCounter<'_> {
        fn drop(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[test]
    fn test_shared_value_dropped_exactly_once() {
        let drops = StdCell::new(0);
        let first = Shared::new(DropCounter(&drops));
        let second = first.add();
        let third = second.clone();
        assert_eq!(first.use_count(), 3);
        first.remove();
        second.remove();
        assert_eq!(drops.get(), 0);
        assert_eq!(third.use_count(), 1);
        third.remove();
        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn test_impossibility_is_sticky() {
        let geom = FfblendGeom::shared();
        let other = geom.add();
        geom.set_spring(Side::Left, PointCur::Impossible);
        assert!(other.is_impossible());
        geom.set_spring(Side::Left, PointCur::Point(Point3::origin()));
        assert!(other.is_impossible());
        geom.remove();
        assert!(other.is_impossible());
    }

    #[test]
    fn test_point_cur_classifiers_on_non_curves() {
        assert!(!PointCur::Unset.is_straight());
        assert!(!PointCur::Point(Point3::origin()).is_circle());
        let mut pc = PointCur::curve(BoundedCurve::segment(Point3::origin(), Point3::new(1.0, 0.0, 0.0)).unwrap());
        assert!(pc.is_straight());
        pc.negate();
        assert_relative_eq!(pc.start().unwrap(), Point3::new(1.0, 0.0, 0.0), epsilon = 1e-12);
    }

    #[test]
    fn test_cc_x_info_states() {
        let geom = FfblendGeom::new();
        assert!(!geom.cc_x_info(true).checked());
        geom.set_cc_x_info(true, CcXInfo::NotFound);
        assert!(geom.cc_x_info(true).checked());
        assert_eq!(geom.cc_x_info(false), CcXInfo::NotChecked);
    }

    #[test]
    fn test_project_line_onto_plane() {
        let plane = OrientedSurface::new(Surface::Plane(Plane::new(Point3::origin(), Vec3::z()).unwrap()), false);
        let spine = PointCur::curve(BoundedCurve::segment(Point3::new(0.0, 0.0, 2.0), Point3::new(3.0, 0.0, 2.0)).unwrap());
        let spring = project_pc(&spine, &plane, None, 0.0, None, &BoundingBox::infinite(), 1e-6, None).unwrap();
        let curve = spring.as_curve().unwrap();
        assert_relative_eq!(curve.start(), Point3::origin(), epsilon = 1e-9);
        assert_relative_eq!(curve.end(), Point3::new(3.0, 0.0, 0.0), epsilon = 1e-9);
    }

    #[test]
    fn test_forward_plane_trims() {
        let plane = OrientedSurface::new(Surface::Plane(Plane::new(Point3::origin(), Vec3::z()).unwrap()), false);
        let spine = PointCur::curve(BoundedCurve::segment(Point3::new(-1.0, 0.0, 2.0), Point3::new(3.0, 0.0, 2.0)).unwrap());
        let forward = Plane::new(Point3::origin(), Vec3::x()).unwrap();
        let spring = project_pc(&spine, &plane, None, 0.0, Some(&forward), &BoundingBox::infinite(), 1e-6, None).unwrap();
        assert_relative_eq!(spring.start().unwrap().x, 0.0, epsilon = 1e-9);
        let behind = PointCur::Point(Point3::new(-1.0, 0.0, 2.0));
        let none = project_pc(&behind, &plane, None, 0.0, Some(&forward), &BoundingBox::infinite(), 1e-6, None).unwrap();
        assert!(none.is_impossible());
    }

    #[test]
    fn test_offset_projection_onto_cylinder_uses_help_point() {
        let axis_line = |x: f64| {
            PointCur::curve(BoundedCurve::segment(Point3::new(x, 0.0, 0.0), Point3::new(x, 0.0, 4.0)).unwrap())
        };
        let on = OrientedSurface::new(Surface::Cylinder(Cylinder::new(Point3::origin(), Vec3::z(), 2.0).unwrap()), false);
        let base = OrientedSurface::new(Surface::Cylinder(Cylinder::new(Point3::origin(), Vec3::z(), 3.0).unwrap()), false);
        let project = |help: Point3| {
            project_pc(&axis_line(0.5), &on, Some(&base), -1.0, None, &BoundingBox::infinite(), 1e-6, Some(&help)).unwrap()
        };
        let east = project(Point3::new(5.0, 0.0, 2.0));
        let west = project(Point3::new(-5.0, 0.0, 2.0));
        assert_relative_eq!(east.start().unwrap().x, 2.0, epsilon = 1e-9);
        assert_relative_eq!(west.start().unwrap().x, -2.0, epsilon = 1e-9);
        assert!(east.is_straight() && west.is_straight());
    }

    #[test]
    fn test_projection_off_target_is_impossible() {
        let on = OrientedSurface::new(Surface::Cylinder(Cylinder::new(Point3::origin(), Vec3::z(), 2.0).unwrap()), false);
        let base = OrientedSurface::new(Surface::Cylinder(Cylinder::new(Point3::origin(), Vec3::z(), 5.0).unwrap()), false);
        let spine = PointCur::Point(Point3::new(1.0, 0.0, 0.0));
        let pc = project_pc(&spine, &on, Some(&base), -1.0, None, &BoundingBox::infinite(), 1e-6, None).unwrap();
        assert!(pc.is_impossible());
    }
}
