//! Explicit blend geometry along one edge: spine, springs and blend surface,
//! and the plane sections that finish a blend at its ends.

use std::f64::consts::TAU;

use cad_kernel::geometry::intersection::{intersect_curve_surface, intersect_surfaces, plane_section};
use cad_kernel::geometry::surfaces::{Cone, Cylinder, Plane, Torus};
use cad_kernel::geometry::unit;
use cad_kernel::topology::brep::{EdgeId, FaceId, VertexId};
use cad_kernel::{BoundedCurve, BoundingBox, Curve, EntityStore, Interval, OrientedSurface, Point3, Surface, Tolerance, Vec3};
use tracing::{debug, instrument};

use crate::attrib::BlendAttrib;
use crate::error::{BlendError, BlendResult, Side};
use crate::geom_cache::{project_pc, FfblendGeom, FfblendGeomRef, PointCur, PointCurSurf};
use crate::law::{BlendProfile, Law};

/// The blended edge with its two supports, in the sense the blend runs.
#[derive(Debug, Clone)]
pub(crate) struct EdgeFrame {
    pub edge: EdgeId,
    pub curve: BoundedCurve,
    pub start: VertexId,
    pub end: VertexId,
    pub left: FaceId,
    pub right: FaceId,
    pub left_surf: OrientedSurface,
    pub right_surf: OrientedSurface,
    pub convex: bool,
}

impl EdgeFrame {
    pub fn new(store: &EntityStore, attrib: &BlendAttrib) -> BlendResult<Self> {
        let edge = attrib.owner_edge().ok_or_else(|| BlendError::UnsupportedGeometry {
            what: "face-face blend without a blended edge".into(),
        })?;
        let data = store.edge(edge)?;
        let supports = attrib.supports();
        Ok(Self {
            edge,
            curve: BoundedCurve::new(data.curve.clone(), data.range),
            start: data.start,
            end: data.end,
            left: supports.left,
            right: supports.right,
            left_surf: store.oriented_surface(supports.left)?,
            right_surf: store.oriented_surface(supports.right)?,
            convex: attrib.cvty().convex(),
        })
    }

    /// A closed edge has one vertex at both ends.
    pub fn closed(&self) -> bool {
        self.start == self.end
    }

    pub fn vertex(&self, at_start: bool) -> VertexId {
        if at_start { self.start } else { self.end }
    }

    pub fn point(&self, at_start: bool) -> Point3 {
        if at_start { self.curve.start() } else { self.curve.end() }
    }

    /// Unit direction from the end at `at_start` into the edge.
    pub fn inward(&self, at_start: bool) -> Option<Vec3> {
        let t = if at_start { self.curve.range.low() } else { self.curve.range.high() };
        let d = self.curve.curve.tangent(t)?;
        Some(if at_start { d } else { -d })
    }

    pub fn surf(&self, side: Side) -> &OrientedSurface {
        match side {
            Side::Left => &self.left_surf,
            Side::Right => &self.right_surf,
        }
    }

    pub fn face(&self, side: Side) -> FaceId {
        match side {
            Side::Left => self.left,
            Side::Right => self.right,
        }
    }

    pub fn length(&self) -> f64 {
        self.curve.approximate_length(32)
    }
}

/// Spine, springs and surface of a blend, read out of its geometry cache.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct BlendCurves {
    pub spine: BoundedCurve,
    pub left: BoundedCurve,
    pub right: BoundedCurve,
    pub surface: OrientedSurface,
}

impl BlendCurves {
    pub fn from_geom(geom: &FfblendGeom) -> BlendResult<Self> {
        let curve = |pc: PointCur| pc.as_curve().cloned().ok_or(BlendError::ImpossibleGeometry);
        Ok(Self {
            spine: curve(geom.spine())?,
            left: curve(geom.spring(Side::Left))?,
            right: curve(geom.spring(Side::Right))?,
            surface: geom.surface().as_surface().cloned().ok_or(BlendError::ImpossibleGeometry)?,
        })
    }

    pub fn spring(&self, side: Side) -> &BoundedCurve {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }

    /// The same blend restricted to the fraction `[s0, s1]` of its length.
    pub fn portion(&self, s0: f64, s1: f64) -> Self {
        let part = |bc: &BoundedCurve| {
            BoundedCurve::new(bc.curve.clone(), Interval::new(bc.range.interpolate(s0), bc.range.interpolate(s1)))
        };
        Self {
            spine: part(&self.spine),
            left: part(&self.left),
            right: part(&self.right),
            surface: self.surface.clone(),
        }
    }

    /// A fresh geometry record holding these curves.
    pub fn to_geom(&self) -> FfblendGeomRef {
        let geom = FfblendGeom::shared();
        self.store(&geom);
        geom
    }

    fn store(&self, geom: &FfblendGeom) {
        geom.set_spine(PointCur::curve(self.spine.clone()));
        geom.set_spring(Side::Left, PointCur::curve(self.left.clone()));
        geom.set_spring(Side::Right, PointCur::curve(self.right.clone()));
        geom.set_surface(PointCurSurf::Surface(self.surface.clone()));
    }
}

/// Compute spine, springs and blend surface of the blend on `frame`.
///
/// Geometry that cannot exist (supports folding back on each other, a radius
/// that swallows a support) leaves the cache marked impossible; geometry this
/// crate has no construction for is an error.
#[instrument(skip_all, fields(edge = ?frame.edge))]
pub(crate) fn compute_ffblend_geom(frame: &EdgeFrame, profile: &BlendProfile, tol: &Tolerance) -> BlendResult<FfblendGeomRef> {
    let geom = FfblendGeom::shared();
    let curves = match profile {
        BlendProfile::Round { radius: Law::Constant(r) } => round_curves(frame, *r, tol),
        BlendProfile::Round { radius: Law::Linear { start, end } } if start == end => round_curves(frame, *start, tol),
        BlendProfile::Round { radius: Law::Linear { start, end } } => variable_round_curves(frame, *start, *end),
        BlendProfile::Chamfer { left, right } => chamfer_curves(frame, *left, *right),
    };
    match curves {
        Ok(curves) => curves.store(&geom),
        Err(BlendError::ImpossibleGeometry) => {
            debug!("blend geometry impossible");
            geom.declare_impossible();
        }
        Err(err) => return Err(err),
    }
    Ok(geom)
}

fn planar_supports(frame: &EdgeFrame, what: &str) -> BlendResult<()> {
    let planes = frame.left_surf.surface.is_planar() && frame.right_surf.surface.is_planar();
    if planes && frame.curve.curve.is_straight() {
        return Ok(());
    }
    Err(BlendError::UnsupportedGeometry {
        what: format!("{what} on a {} edge between {} and {}", frame.curve.curve.curve_type_name(),
            frame.left_surf.surface.surface_type_name(), frame.right_surf.surface.surface_type_name()),
    })
}

/// Where the ball centre sits for a ball of `radius` touching both supports
/// near `p`: exact for planes, a first guess otherwise.
pub(crate) fn ball_centre(left: &Vec3, right: &Vec3, p: &Point3, radius: f64, convex: bool) -> Option<Point3> {
    let k = left.dot(right);
    if 1.0 + k < 1e-9 {
        return None;
    }
    let sigma = if convex { -1.0 } else { 1.0 };
    Some(p + (left + right) * (sigma * radius / (1.0 + k)))
}

fn round_curves(frame: &EdgeFrame, radius: f64, tol: &Tolerance) -> BlendResult<BlendCurves> {
    let d = if frame.convex { -radius } else { radius };
    let off_left = frame.left_surf.offset(d).ok_or(BlendError::ImpossibleGeometry)?;
    let off_right = frame.right_surf.offset(d).ok_or(BlendError::ImpossibleGeometry)?;
    let mid = frame.curve.mid();
    let expected = ball_centre(&frame.left_surf.normal(&mid), &frame.right_surf.normal(&mid), &mid, radius, frame.convex)
        .ok_or(BlendError::ImpossibleGeometry)?;

    let spine_curve = intersect_surfaces(&off_left.surface, &off_right.surface)?
        .into_iter()
        .min_by(|a, b| a.distance_to(&expected).total_cmp(&b.distance_to(&expected)))
        .ok_or(BlendError::ImpossibleGeometry)?;

    let spine = if frame.closed() {
        full_loop(spine_curve, frame)?
    } else {
        let c0 = spine_curve.closest_point(&frame.point(true)).0;
        let c1 = spine_curve.closest_point(&frame.point(false)).0;
        let cm = spine_curve.closest_point(&mid).0;
        BoundedCurve::between(spine_curve, &c0, &c1, &cm)
    };

    let spring = |side: Side| -> BlendResult<BoundedCurve> {
        let projected = project_pc(
            &PointCur::curve(spine.clone()),
            frame.surf(side),
            None,
            0.0,
            None,
            &BoundingBox::infinite(),
            tol.resfit,
            None,
        )?;
        projected.as_curve().cloned().ok_or(BlendError::ImpossibleGeometry)
    };
    let left = spring(Side::Left)?;
    let right = spring(Side::Right)?;

    let surface = match &spine.curve {
        Curve::Line(l) => Surface::Cylinder(Cylinder::new(l.origin, l.direction, radius).ok_or(BlendError::ImpossibleGeometry)?),
        Curve::Circle(c) => Surface::Torus(Torus::new(c.center, c.normal, c.radius, radius).ok_or(BlendError::ImpossibleGeometry)?),
        Curve::Ellipse(_) => {
            return Err(BlendError::UnsupportedGeometry {
                what: "round along an elliptical spine".into(),
            })
        }
    };
    Ok(BlendCurves {
        spine,
        left,
        right,
        surface: OrientedSurface::new(surface, !frame.convex),
    })
}

/// The whole of a periodic spine, running the same way as the closed edge.
fn full_loop(curve: Curve, frame: &EdgeFrame) -> BlendResult<BoundedCurve> {
    let start = frame.point(true);
    let along = frame.inward(true).ok_or(BlendError::ImpossibleGeometry)?;
    let t0 = curve.param_of(&start);
    let tangent = curve.tangent(t0).ok_or(BlendError::ImpossibleGeometry)?;
    let curve = if tangent.dot(&along) < 0.0 { curve.negated() } else { curve };
    let t0 = curve.param_of(&start);
    Ok(BoundedCurve::new(curve, Interval::new(t0, t0 + TAU)))
}

/// Linearly varying radius between planes: the ball centres run along a
/// line and the blend surface is the cone enveloping the balls.
fn variable_round_curves(frame: &EdgeFrame, r0: f64, r1: f64) -> BlendResult<BlendCurves> {
    planar_supports(frame, "variable round")?;
    let (e0, e1) = (frame.point(true), frame.point(false));
    let (n_l, n_r) = (frame.left_surf.normal(&e0), frame.right_surf.normal(&e0));
    let sigma = if frame.convex { -1.0 } else { 1.0 };
    let c0 = ball_centre(&n_l, &n_r, &e0, r0, frame.convex).ok_or(BlendError::ImpossibleGeometry)?;
    let c1 = ball_centre(&n_l, &n_r, &e1, r1, frame.convex).ok_or(BlendError::ImpossibleGeometry)?;
    let foot = |c: &Point3, r: f64, n: &Vec3| c - n * (sigma * r);

    let segment = |a: Point3, b: Point3| BoundedCurve::segment(a, b).ok_or(BlendError::ImpossibleGeometry);
    let spine = segment(c0, c1)?;
    let left = segment(foot(&c0, r0, &n_l), foot(&c1, r1, &n_l))?;
    let right = segment(foot(&c0, r0, &n_r), foot(&c1, r1, &n_r))?;

    let length = nalgebra::distance(&c0, &c1);
    let slope = (r1 - r0) / length;
    if slope.abs() >= 1.0 {
        return Err(BlendError::ImpossibleGeometry);
    }
    let u = unit(&(c1 - c0)).ok_or(BlendError::ImpossibleGeometry)?;
    let apex = c0 - u * (r0 / slope);
    let axis = if slope > 0.0 { u } else { -u };
    let cone = Cone::new(apex, axis, slope.abs().asin()).ok_or(BlendError::ImpossibleGeometry)?;
    Ok(BlendCurves {
        spine,
        left,
        right,
        surface: OrientedSurface::new(Surface::Cone(cone), !frame.convex),
    })
}

/// Flat chamfer between planes, cut `left` and `right` into the supports.
fn chamfer_curves(frame: &EdgeFrame, left: f64, right: f64) -> BlendResult<BlendCurves> {
    planar_supports(frame, "chamfer")?;
    let (e0, e1) = (frame.point(true), frame.point(false));
    let t = unit(&(e1 - e0)).ok_or(BlendError::ImpossibleGeometry)?;
    let (n_l, n_r) = (frame.left_surf.normal(&e0), frame.right_surf.normal(&e0));
    let w_l = unit(&n_l.cross(&t)).ok_or(BlendError::ImpossibleGeometry)?;
    let w_r = unit(&t.cross(&n_r)).ok_or(BlendError::ImpossibleGeometry)?;

    let shifted = |v: Vec3| BoundedCurve::segment(e0 + v, e1 + v).ok_or(BlendError::ImpossibleGeometry);
    let left_spring = shifted(w_l * left)?;
    let right_spring = shifted(w_r * right)?;
    let spine = shifted((w_l * left + w_r * right) * 0.5)?;

    let across = right_spring.start() - left_spring.start();
    let mut normal = unit(&t.cross(&across)).ok_or(BlendError::ImpossibleGeometry)?;
    if normal.dot(&(n_l + n_r)) < 0.0 {
        normal = -normal;
    }
    let plane = Plane::new(left_spring.start(), normal).ok_or(BlendError::ImpossibleGeometry)?;
    Ok(BlendCurves {
        spine,
        left: left_spring,
        right: right_spring,
        surface: OrientedSurface::new(Surface::Plane(plane), false),
    })
}

/// Section of a blend by one cutting plane.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct EndCut {
    /// The plane actually cut by; cones are cut square to their axis.
    pub plane: Plane,
    pub spine_param: f64,
    pub spine_point: Point3,
    pub left: (f64, Point3),
    pub right: (f64, Point3),
    /// Runs from the left contact to the right; `None` where they meet.
    pub cross: Option<BoundedCurve>,
}

impl EndCut {
    pub fn contact(&self, side: Side) -> (f64, Point3) {
        match side {
            Side::Left => self.left,
            Side::Right => self.right,
        }
    }

    pub fn pointy(&self) -> bool {
        self.cross.is_none()
    }
}

/// Parameter range of `bc` grown by `reach` of arc length each way. Periodic
/// curves never grow to a full turn.
fn extended_range(bc: &BoundedCurve, reach: f64) -> Interval {
    let speed = bc.curve.derivative(bc.range.mid()).norm().max(1e-12);
    let mut dt = reach / speed;
    if bc.curve.period().is_some() {
        dt = dt.min(((TAU - bc.range.length()) * 0.5 - 1e-6).max(0.0));
    }
    Interval::new(bc.range.low() - dt, bc.range.high() + dt)
}

fn nearest_hit(bc: &BoundedCurve, plane: &Plane, near: f64, reach: f64, tol: &Tolerance) -> BlendResult<f64> {
    intersect_curve_surface(&bc.curve, extended_range(bc, reach), &Surface::Plane(*plane), tol.resabs)
        .into_iter()
        .map(|hit| hit.param)
        .min_by(|a, b| (a - near).abs().total_cmp(&(b - near).abs()))
        .ok_or(BlendError::ImpossibleGeometry)
}

/// Cut the blend by `plane` near the fraction `near` of its length. The
/// springs are followed past their ends by up to `reach`; `reference` is the
/// edge (or face intersection) the blend rounds off, which tells the cross
/// curve which way to bend.
pub(crate) fn section_at(
    curves: &BlendCurves,
    plane: &Plane,
    near: f64,
    reference: &Curve,
    reach: f64,
    tol: &Tolerance,
) -> BlendResult<EndCut> {
    let spine_param = nearest_hit(&curves.spine, plane, curves.spine.range.interpolate(near), reach, tol)?;
    let spine_point = curves.spine.curve.position(spine_param);
    let plane = match &curves.surface.surface {
        Surface::Cone(cone) => {
            let foot = curves.left.curve.closest_point(&spine_point).0;
            Plane::new(foot, cone.axis).ok_or(BlendError::ImpossibleGeometry)?
        }
        _ => *plane,
    };
    let contact = |bc: &BoundedCurve| -> BlendResult<(f64, Point3)> {
        let t = nearest_hit(bc, &plane, bc.range.interpolate(near), reach, tol)?;
        Ok((t, bc.curve.position(t)))
    };
    let left = contact(&curves.left)?;
    let right = contact(&curves.right)?;

    let cross = if nalgebra::distance(&left.1, &right.1) < tol.resabs {
        None
    } else {
        let via = if curves.surface.surface.is_planar() {
            nalgebra::center(&left.1, &right.1)
        } else {
            let e = reference.closest_point(&spine_point).0;
            let reach_out = nalgebra::distance(&spine_point, &left.1);
            match unit(&(e - spine_point)) {
                Some(d) => spine_point + d * reach_out,
                None => nalgebra::center(&left.1, &right.1),
            }
        };
        Some(cross_curve(&curves.surface, &plane, &left.1, &right.1, &via, tol)?)
    };
    Ok(EndCut {
        plane,
        spine_param,
        spine_point,
        left,
        right,
        cross,
    })
}

/// The arc of the section of `surface` by `plane` from `a` to `b`.
pub(crate) fn cross_curve(
    surface: &OrientedSurface,
    plane: &Plane,
    a: &Point3,
    b: &Point3,
    via: &Point3,
    tol: &Tolerance,
) -> BlendResult<BoundedCurve> {
    let gap = |c: &Curve| c.distance_to(a) + c.distance_to(b);
    let best = plane_section(&surface.surface, plane)?
        .into_iter()
        .min_by(|x, y| gap(x).total_cmp(&gap(y)))
        .ok_or(BlendError::ImpossibleGeometry)?;
    if best.distance_to(a) > tol.resfit || best.distance_to(b) > tol.resfit {
        debug!(gap = gap(&best), "section misses the contacts");
        return Err(BlendError::ImpossibleGeometry);
    }
    Ok(BoundedCurve::between(best, a, b, via))
}

/// Plane through `origin` square to `direction`.
pub(crate) fn square_plane(origin: Point3, direction: &Vec3) -> BlendResult<Plane> {
    Plane::new(origin, *direction).ok_or(BlendError::ImpossibleGeometry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrib::SupportEntity;
    use crate::convexity::Cvty;
    use approx::assert_relative_eq;
    use cad_kernel::topology::primitives::{make_block, make_cylinder};

    /// Frame on the block edge along +x at y = 0, z = 4 of a 4-cube.
    fn top_front_frame(store: &mut EntityStore) -> EdgeFrame {
        let body = make_block(store, Point3::origin(), Point3::new(4.0, 4.0, 4.0)).unwrap();
        let edge = store
            .body_edges(body)
            .unwrap()
            .into_iter()
            .find(|e| {
                let bc = store.edge_bounded_curve(*e).unwrap();
                let (a, b) = (bc.start(), bc.end());
                a.y.abs() < 1e-9 && b.y.abs() < 1e-9 && (a.z - 4.0).abs() < 1e-9 && (b.z - 4.0).abs() < 1e-9
            })
            .unwrap();
        let (fwd, bwd) = store.edge_coedge_pair(edge).unwrap();
        let supports = SupportEntity {
            left: store.coedge_face(fwd.unwrap()).unwrap(),
            right: store.coedge_face(bwd.unwrap()).unwrap(),
        };
        let attrib = BlendAttrib::face_face(edge, supports, BlendProfile::round(1.0), Cvty::CONVEX);
        EdgeFrame::new(store, &attrib).unwrap()
    }

    #[test]
    fn test_constant_round_on_block_edge() {
        let mut store = EntityStore::new();
        let frame = top_front_frame(&mut store);
        let geom = compute_ffblend_geom(&frame, &BlendProfile::round(1.0), &Tolerance::default()).unwrap();
        assert!(geom.complete());
        let curves = BlendCurves::from_geom(&geom).unwrap();
        let mid = curves.spine.mid();
        assert_relative_eq!(mid.y, 1.0, epsilon = 1e-9);
        assert_relative_eq!(mid.z, 3.0, epsilon = 1e-9);
        for side in [Side::Left, Side::Right] {
            let spring = curves.spring(side);
            assert!(frame.surf(side).signed_distance(&spring.mid()).abs() < 1e-9);
            assert_relative_eq!(nalgebra::distance(&spring.mid(), &mid), 1.0, epsilon = 1e-6);
        }
        assert!(matches!(curves.surface.surface, Surface::Cylinder(_)));
        assert!(!curves.surface.reversed);
        // The spine runs the same way as the edge.
        let along = frame.inward(true).unwrap();
        assert!((curves.spine.end() - curves.spine.start()).dot(&along) > 0.0);
    }

    #[test]
    fn test_square_cut_gives_quarter_arc() {
        let mut store = EntityStore::new();
        let frame = top_front_frame(&mut store);
        let geom = compute_ffblend_geom(&frame, &BlendProfile::round(1.0), &Tolerance::default()).unwrap();
        let curves = BlendCurves::from_geom(&geom).unwrap();
        let plane = square_plane(frame.point(true), &frame.inward(true).unwrap()).unwrap();
        let cut = section_at(&curves, &plane, 0.0, &frame.curve.curve, 1.0, &Tolerance::default()).unwrap();
        let cross = cut.cross.unwrap();
        assert_relative_eq!(cross.approximate_length(64), std::f64::consts::FRAC_PI_2, epsilon = 1e-3);
        assert!(nalgebra::distance(&cross.start(), &cut.left.1) < 1e-6);
        assert!(nalgebra::distance(&cross.end(), &cut.right.1) < 1e-6);
        // The arc bulges toward the edge, not away from it.
        let edge_point = frame.point(true);
        assert!(nalgebra::distance(&cross.mid(), &edge_point) < nalgebra::distance(&cut.spine_point, &edge_point));
    }

    #[test]
    fn test_variable_round_is_a_cone_pointed_at_zero_radius() {
        let mut store = EntityStore::new();
        let frame = top_front_frame(&mut store);
        let geom = compute_ffblend_geom(&frame, &BlendProfile::variable_round(0.0, 1.0), &Tolerance::default()).unwrap();
        let curves = BlendCurves::from_geom(&geom).unwrap();
        let Surface::Cone(cone) = &curves.surface.surface else {
            panic!("expected a cone");
        };
        assert!(nalgebra::distance(&cone.apex, &frame.point(true)) < 1e-9);
        assert!(nalgebra::distance(&curves.left.start(), &curves.right.start()) < 1e-9);
        let plane = square_plane(frame.point(true), &frame.inward(true).unwrap()).unwrap();
        let cut = section_at(&curves, &plane, 0.0, &frame.curve.curve, 1.0, &Tolerance::default()).unwrap();
        assert!(cut.pointy());
        let far = square_plane(frame.point(false), &frame.inward(false).unwrap()).unwrap();
        let cut = section_at(&curves, &far, 1.0, &frame.curve.curve, 1.0, &Tolerance::default()).unwrap();
        assert!(!cut.pointy());
    }

    #[test]
    fn test_chamfer_plane_faces_out() {
        let mut store = EntityStore::new();
        let frame = top_front_frame(&mut store);
        let geom = compute_ffblend_geom(&frame, &BlendProfile::chamfer(1.0, 0.5), &Tolerance::default()).unwrap();
        let curves = BlendCurves::from_geom(&geom).unwrap();
        let Surface::Plane(plane) = &curves.surface.surface else {
            panic!("expected a plane");
        };
        assert!(plane.normal.y < 0.0 && plane.normal.z > 0.0);
        let gap = nalgebra::distance(&curves.left.start(), &curves.right.start());
        assert_relative_eq!(gap, (1.0f64 + 0.25).sqrt(), epsilon = 1e-9);
    }

    #[test]
    fn test_round_on_cylinder_rim_is_a_torus_ring() {
        let mut store = EntityStore::new();
        let body = make_cylinder(&mut store, Point3::origin(), 2.0, 3.0).unwrap();
        let rim = store
            .body_edges(body)
            .unwrap()
            .into_iter()
            .find(|e| store.edge_bounded_curve(*e).unwrap().start().z > 1.0)
            .unwrap();
        let (fwd, bwd) = store.edge_coedge_pair(rim).unwrap();
        let supports = SupportEntity {
            left: store.coedge_face(fwd.unwrap()).unwrap(),
            right: store.coedge_face(bwd.unwrap()).unwrap(),
        };
        let attrib = BlendAttrib::face_face(rim, supports, BlendProfile::round(0.5), Cvty::CONVEX);
        let frame = EdgeFrame::new(&store, &attrib).unwrap();
        assert!(frame.closed());
        let geom = compute_ffblend_geom(&frame, &BlendProfile::round(0.5), &Tolerance::default()).unwrap();
        let curves = BlendCurves::from_geom(&geom).unwrap();
        let Surface::Torus(torus) = &curves.surface.surface else {
            panic!("expected a torus");
        };
        assert_relative_eq!(torus.major_radius, 1.5, epsilon = 1e-9);
        assert_relative_eq!(torus.minor_radius, 0.5, epsilon = 1e-9);
        assert_relative_eq!(curves.spine.range.length(), TAU, epsilon = 1e-9);
        for p in curves.left.sample(8).iter().chain(curves.right.sample(8).iter()) {
            let radial = p.coords.xy().norm() - torus.major_radius;
            assert_relative_eq!(radial.hypot(p.z - torus.center.z), torus.minor_radius, epsilon = 1e-6);
        }
        let top = curves.left.mid();
        let side = curves.right.mid();
        assert_relative_eq!(top.z, 3.0, epsilon = 1e-6);
        assert_relative_eq!(side.z, 2.5, epsilon = 1e-6);
        assert_relative_eq!(top.coords.xy().norm(), 1.5, epsilon = 1e-6);
        assert_relative_eq!(side.coords.xy().norm(), 2.0, epsilon = 1e-6);

        let variable = compute_ffblend_geom(&frame, &BlendProfile::variable_round(0.5, 0.25), &Tolerance::default());
        assert!(matches!(variable, Err(BlendError::UnsupportedGeometry { .. })));
    }

    #[test]
    fn test_ball_centre_between_square_planes() {
        let c = ball_centre(&Vec3::y(), &Vec3::z(), &Point3::origin(), 2.0, true).unwrap();
        assert_relative_eq!(c, Point3::new(0.0, -2.0, -2.0), epsilon = 1e-12);
        assert!(ball_centre(&Vec3::z(), &-Vec3::z(), &Point3::origin(), 1.0, true).is_none());
    }
}
