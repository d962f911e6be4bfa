//! Blends between two named faces that need not share an edge.
//!
//! Only constant rounds between planes are built: the ball centres run
//! along the line where the two offset planes meet, and the sheet covers
//! the stretch of that line where both springs lie in their faces.

use cad_kernel::geometry::curves::Line3d;
use cad_kernel::geometry::intersection::intersect_surfaces;
use cad_kernel::geometry::surfaces::{Cylinder, Plane};
use cad_kernel::topology::brep::{FaceId, ShellId};
use cad_kernel::{BoundedCurve, Curve, EntityStore, Interval, OrientedSurface, Point3, Surface, Tolerance};
use tracing::{debug, instrument};

use crate::attrib::BlendAttrib;
use crate::error::{BlendError, BlendResult, Side};
use crate::stage1::ffints::in_face;
use crate::stage1::geometry::{section_at, square_plane, BlendCurves};
use crate::stage1::sheet::{build_sheet_face, SheetFace};

const SAMPLES: usize = 64;
const BISECTIONS: usize = 40;

fn planar(store: &EntityStore, face: FaceId) -> BlendResult<(OrientedSurface, Plane)> {
    let surface = store.oriented_surface(face)?;
    let plane = match &surface.surface {
        Surface::Plane(plane) => *plane,
        other => {
            return Err(BlendError::UnsupportedGeometry {
                what: format!("face blend on a {} support", other.surface_type_name()),
            })
        }
    };
    Ok((surface, plane))
}

fn single_line(curves: Vec<Curve>) -> BlendResult<Line3d> {
    curves
        .into_iter()
        .find_map(|c| match c {
            Curve::Line(l) => Some(l),
            _ => None,
        })
        .ok_or(BlendError::ImpossibleGeometry)
}

/// Range of `line` within which `at(t)` lies in `face`: the longest run of
/// samples inside, with its ends refined by bisection.
fn inside_range(
    store: &EntityStore,
    face: FaceId,
    at: impl Fn(f64) -> Point3,
    span: Interval,
    tol: &Tolerance,
) -> BlendResult<Option<Interval>> {
    let ts: Vec<f64> = (0..=SAMPLES).map(|i| span.interpolate(i as f64 / SAMPLES as f64)).collect();
    let mut flags = Vec::with_capacity(ts.len());
    for &t in &ts {
        flags.push(in_face(store, face, &at(t), tol)?);
    }
    let mut best: Option<(usize, usize)> = None;
    let mut i = 0;
    while i < flags.len() {
        if !flags[i] {
            i += 1;
            continue;
        }
        let j = (i..flags.len()).take_while(|&k| flags[k]).last().unwrap_or(i);
        if best.is_none_or(|(a, b)| j - i > b - a) {
            best = Some((i, j));
        }
        i = j + 1;
    }
    let Some((a, b)) = best else {
        return Ok(None);
    };

    let refine = |mut inside: f64, mut outside: f64| -> BlendResult<f64> {
        for _ in 0..BISECTIONS {
            let mid = 0.5 * (inside + outside);
            if in_face(store, face, &at(mid), tol)? {
                inside = mid;
            } else {
                outside = mid;
            }
        }
        Ok(inside)
    };
    let low = if a > 0 { refine(ts[a], ts[a - 1])? } else { ts[a] };
    let high = if b + 1 < ts.len() { refine(ts[b], ts[b + 1])? } else { ts[b] };
    Ok(Some(Interval::new(low, high)))
}

/// Geometry of a face blend over the stretch where it touches both faces.
#[instrument(skip(store, attrib, tol))]
pub(crate) fn face_blend_curves(
    store: &EntityStore,
    attrib: &BlendAttrib,
    tol: &Tolerance,
) -> BlendResult<(BlendCurves, Curve)> {
    let radius = attrib.profile().constant_radius().ok_or_else(|| BlendError::UnsupportedGeometry {
        what: "face blend with a varying profile".into(),
    })?;
    let supports = attrib.supports();
    let convex = attrib.cvty().convex();
    let (left_surf, left) = planar(store, supports.left)?;
    let (right_surf, right) = planar(store, supports.right)?;

    let d = if convex { -radius } else { radius };
    let off_left = left_surf.offset(d).ok_or(BlendError::ImpossibleGeometry)?;
    let off_right = right_surf.offset(d).ok_or(BlendError::ImpossibleGeometry)?;
    let spine = single_line(intersect_surfaces(&off_left.surface, &off_right.surface)?)?;
    let reference = single_line(intersect_surfaces(&left_surf.surface, &right_surf.surface)?)?;

    let reach = store.face_bounding_box(supports.left)?.union(&store.face_bounding_box(supports.right)?);
    let mut span = Interval::empty();
    for x in [reach.x.low(), reach.x.high()] {
        for y in [reach.y.low(), reach.y.high()] {
            for z in [reach.z.low(), reach.z.high()] {
                span.extend(spine.param_of(&Point3::new(x, y, z)));
            }
        }
    }
    if span.is_empty() || span.length() < tol.resabs {
        return Err(BlendError::ImpossibleGeometry);
    }

    let foot = |plane: &Plane, t: f64| plane.project_point(&spine.position(t));
    let on_left = inside_range(store, supports.left, |t| foot(&left, t), span, tol)?;
    let on_right = inside_range(store, supports.right, |t| foot(&right, t), span, tol)?;
    let range = match (on_left, on_right) {
        (None, _) => return Err(BlendError::SpringOffFace { side: Side::Left }),
        (_, None) => return Err(BlendError::SpringOffFace { side: Side::Right }),
        (Some(l), Some(r)) => l & r,
    };
    if range.is_empty() || range.length() < tol.resabs {
        debug!("springs never both on their faces");
        return Err(BlendError::SpringOffFace { side: Side::Left });
    }
    debug!(low = range.low(), high = range.high(), "face blend range");

    let spring = |plane: &Plane| -> BlendResult<BoundedCurve> {
        let line = Line3d::new(plane.project_point(&spine.origin), spine.direction).ok_or(BlendError::ImpossibleGeometry)?;
        Ok(BoundedCurve::new(Curve::Line(line), range))
    };
    let cylinder = Cylinder::new(spine.origin, spine.direction, radius).ok_or(BlendError::ImpossibleGeometry)?;
    let curves = BlendCurves {
        spine: BoundedCurve::new(Curve::Line(spine), range),
        left: spring(&left)?,
        right: spring(&right)?,
        surface: OrientedSurface::new(Surface::Cylinder(cylinder), !convex),
    };
    Ok((curves, Curve::Line(reference)))
}

/// Build the sheet face of a face blend, cut square at both ends.
pub(crate) fn build_face_blend_sheet(
    store: &mut EntityStore,
    shell: ShellId,
    curves: &BlendCurves,
    reference: &Curve,
    tol: &Tolerance,
) -> BlendResult<SheetFace> {
    let cut = |at_start: bool| {
        let (p, t) = if at_start {
            (curves.spine.start(), curves.spine.range.low())
        } else {
            (curves.spine.end(), curves.spine.range.high())
        };
        let direction = curves.spine.curve.tangent(t).ok_or(BlendError::ImpossibleGeometry)?;
        let plane = square_plane(p, &direction)?;
        section_at(curves, &plane, if at_start { 0.0 } else { 1.0 }, reference, 0.0, tol)
    };
    let (start, end) = (cut(true)?, cut(false)?);
    build_sheet_face(
        store,
        shell,
        &curves.surface,
        &curves.left,
        &curves.right,
        start.cross.as_ref(),
        end.cross.as_ref(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrib::SupportEntity;
    use crate::convexity::Cvty;
    use crate::law::BlendProfile;
    use approx::assert_relative_eq;
    use cad_kernel::topology::brep::BodyKind;
    use cad_kernel::topology::primitives::make_block;
    use cad_kernel::Vec3;

    fn face_facing(store: &EntityStore, normal: Vec3) -> FaceId {
        store
            .faces
            .iter()
            .find(|(id, f)| matches!(f.surface, Surface::Plane(_)) && store.face_normal(*id, &Point3::origin()).unwrap().dot(&normal) > 0.99)
            .map(|(id, _)| id)
            .unwrap()
    }

    fn top_and_front(store: &mut EntityStore, size: Point3, radius: f64) -> BlendAttrib {
        make_block(store, Point3::origin(), size).unwrap();
        let supports = SupportEntity {
            left: face_facing(store, Vec3::z()),
            right: face_facing(store, -Vec3::y()),
        };
        BlendAttrib::face_only(supports, BlendProfile::round(radius), Cvty::CONVEX)
    }

    #[test]
    fn test_face_blend_covers_shared_stretch() {
        let mut store = EntityStore::new();
        let attrib = top_and_front(&mut store, Point3::new(4.0, 4.0, 4.0), 1.0);
        let tol = Tolerance::default();
        let (curves, reference) = face_blend_curves(&store, &attrib, &tol).unwrap();
        assert_relative_eq!(curves.spine.range.length(), 4.0, epsilon = 1e-6);
        let mid = curves.spine.mid();
        assert_relative_eq!(mid.y, 1.0, epsilon = 1e-9);
        assert_relative_eq!(mid.z, 3.0, epsilon = 1e-9);

        let (_, shell) = store.add_body(BodyKind::Sheet);
        let sheet = build_face_blend_sheet(&mut store, shell, &curves, &reference, &tol).unwrap();
        assert!(sheet.start_cross.is_some() && sheet.end_cross.is_some());
        assert_eq!(store.euler_characteristic(shell).unwrap(), 1);
    }

    #[test]
    fn test_face_blend_too_big_runs_off() {
        let mut store = EntityStore::new();
        let attrib = top_and_front(&mut store, Point3::new(4.0, 4.0, 1.0), 3.0);
        let result = face_blend_curves(&store, &attrib, &Tolerance::default());
        assert!(matches!(result, Err(BlendError::SpringOffFace { .. })));
    }
}
