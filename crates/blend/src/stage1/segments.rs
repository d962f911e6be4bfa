//! Splitting one blend into the stretches where both springs lie on their
//! supports, and bridging the gaps between consecutive stretches.

use cad_kernel::topology::brep::{FaceId, ShellId};
use cad_kernel::{EntityRef, EntityStore, Interval, Tolerance};
use tracing::{debug, instrument};

use crate::chain::{FfSegment, FfSegmentChain};
use crate::error::{BlendError, BlendResult, Side};
use crate::geom_cache::FfblendGeomRef;
use crate::intercept::{FaceFaceInt, Intercept};
use crate::segend::{Segend, SpineInfo};
use crate::stage1::ffints::{coedge_in_face, spring_end_incpt, SpringCrossings};
use crate::stage1::geometry::{section_at, square_plane, BlendCurves, EdgeFrame};
use crate::stage1::sheet::{build_bridge_face, build_sheet_face, corner_planarity, SheetFace};

/// Shortest stretch, as a fraction of the blend, worth a sheet face.
const MIN_STRETCH: f64 = 1e-9;

/// What a run of segments is built from. `curves` is already trimmed to the
/// two end cuts.
pub(crate) struct SegmentPlan<'a> {
    pub frame: &'a EdgeFrame,
    pub curves: &'a BlendCurves,
    pub geom: &'a FfblendGeomRef,
    pub ruled: bool,
    /// How far past their ends the springs may be followed when cutting.
    pub reach: f64,
}

/// Segments of one blend with their sheet faces, index for index.
#[derive(Debug)]
pub(crate) struct SegmentRun {
    pub chain: FfSegmentChain,
    pub sheets: Vec<SheetFace>,
}

impl SegmentRun {
    /// The first segment's start and the last segment's end, the two ends
    /// the blend meets its neighbours with.
    pub fn into_ends(self) -> BlendResult<(Segend, Segend, Vec<SheetFace>)> {
        let mut segments = self.chain.into_segments().into_iter();
        let first = segments.next().ok_or(BlendError::ImpossibleGeometry)?;
        let (start, first_end) = first.into_segends();
        let end = match segments.last() {
            Some(last) => last.into_segends().1,
            None => first_end,
        };
        Ok((start, end, self.sheets))
    }
}

fn crossings_of<'a>(side: Side, left: &'a SpringCrossings, right: &'a SpringCrossings) -> &'a SpringCrossings {
    match side {
        Side::Left => left,
        Side::Right => right,
    }
}

/// Segend where a spring crosses out of or into its face at `fraction`.
fn interior_segend(
    store: &EntityStore,
    plan: &SegmentPlan<'_>,
    fraction: f64,
    side: Side,
    ffi: &FaceFaceInt,
    entering: bool,
    tol: &Tolerance,
) -> BlendResult<Segend> {
    let spine = &plan.curves.spine;
    let t = spine.range.interpolate(fraction);
    let direction = spine.curve.tangent(t).ok_or(BlendError::ImpossibleGeometry)?;
    let plane = square_plane(spine.curve.position(t), &direction)?;
    let cut = section_at(plan.curves, &plane, fraction, &plan.frame.curve.curve, plan.reach, tol)?;

    let incpt = |s: Side| -> BlendResult<Intercept> {
        if s == side {
            return Ok(Intercept::from_face_face_int(ffi, entering));
        }
        let (param, p) = cut.contact(s);
        let along = plan.curves.spring(s).curve.tangent(param);
        spring_end_incpt(store, plan.frame.face(s), Some(plan.frame.edge), p, along, tol)
    };
    let mut segend = Segend::new(incpt(Side::Left)?, incpt(Side::Right)?)
        .with_owner(EntityRef::Edge(plan.frame.edge))
        .with_geom(plan.geom.add())
        .with_ruled(plan.ruled)
        .with_spine(SpineInfo {
            param: cut.spine_param,
            position: cut.spine_point,
            direction,
        });
    segend.set_cross_cur(cut.cross);
    Ok(segend)
}

/// Cut the blend into segments at the crossings of its springs, build a
/// sheet face for each, and bridge whatever gaps remain between them.
///
/// Every face built is pushed onto `built` as soon as it exists, so a
/// caller can take the sheet down again after a failure.
#[instrument(skip_all, fields(edge = ?plan.frame.edge))]
#[allow(clippy::too_many_arguments)]
pub(crate) fn edge_ffblend_segments(
    store: &mut EntityStore,
    shell: ShellId,
    plan: &SegmentPlan<'_>,
    left: &SpringCrossings,
    right: &SpringCrossings,
    start: Segend,
    end: Segend,
    fill_gap_planarity: f64,
    tol: &Tolerance,
    built: &mut Vec<FaceId>,
) -> BlendResult<SegmentRun> {
    for side in [Side::Left, Side::Right] {
        let crossings = crossings_of(side, left, right);
        if !crossings.inside.first().copied().unwrap_or(false) || !crossings.inside.last().copied().unwrap_or(false) {
            debug!(?side, "spring runs off its face at an end");
            return Err(BlendError::SpringOffFace { side });
        }
    }

    let mut events: Vec<(f64, Side, usize)> = Vec::new();
    for side in [Side::Left, Side::Right] {
        let crossings = crossings_of(side, left, right);
        events.extend((0..crossings.ffis.len()).map(|i| (crossings.fraction(i), side, i)));
    }
    events.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut inside = [true, true];
    let mut open: Option<(f64, Segend)> = Some((0.0, start));
    let mut pieces: Vec<(f64, Segend, f64, Segend)> = Vec::new();
    for (fraction, side, i) in events {
        let crossings = crossings_of(side, left, right);
        let was_on = inside[0] && inside[1];
        inside[side.index()] = crossings.inside[i + 1];
        let now_on = inside[0] && inside[1];
        let ffi = &crossings.ffis[i];
        if was_on && !now_on {
            let (a, from) = open.take().ok_or(BlendError::ImpossibleGeometry)?;
            let to = interior_segend(store, plan, fraction, side, ffi, false, tol)?;
            pieces.push((a, from, fraction, to));
        } else if !was_on && now_on {
            open = Some((fraction, interior_segend(store, plan, fraction, side, ffi, true, tol)?));
        }
    }
    let (a, from) = open.ok_or(BlendError::ImpossibleGeometry)?;
    pieces.push((a, from, 1.0, end));
    pieces.retain(|(a, _, b, _)| b - a > MIN_STRETCH);
    if pieces.is_empty() {
        return Err(BlendError::ImpossibleGeometry);
    }
    debug!(segments = pieces.len(), "blend segments");

    let mut run = SegmentRun {
        chain: FfSegmentChain::new(),
        sheets: Vec::with_capacity(pieces.len()),
    };
    for (a, mut from, b, mut to) in pieces {
        let part = plan.curves.portion(a, b);
        let sheet = build_sheet_face(
            store,
            shell,
            &part.surface,
            &part.left,
            &part.right,
            from.cross_cur(),
            to.cross_cur(),
        )?;
        built.push(sheet.face);
        for (end, cross) in [(&mut from, sheet.start_cross), (&mut to, sheet.end_cross)] {
            if let Some(cross) = cross {
                end.set_sheet_coedge(coedge_in_face(store, cross, sheet.face)?);
            }
        }
        let mut segment = FfSegment::new(from, to, plan.frame.left, plan.frame.right, Interval::new(a, b))
            .with_segsides(left.segside(), right.segside())
            .with_geom(plan.geom.add());
        segment.set_sheet_face(sheet.face);
        run.chain.push(segment);
        run.sheets.push(sheet);
    }

    for index in run.chain.gaps(tol).into_iter().rev() {
        let bridged = fill_gap_in_chain(
            store,
            shell,
            &mut run,
            index,
            plan.curves,
            plan.frame.convex,
            fill_gap_planarity,
            tol,
            built,
        )?;
        if !bridged {
            return Err(BlendError::GapNotBridged);
        }
    }
    Ok(run)
}

/// The face on the far side of the model edge an intercept crosses.
fn face_beyond(store: &EntityStore, incpt: &Intercept) -> BlendResult<Option<FaceId>> {
    let (Some(edge), Some(face)) = (incpt.edge(store), incpt.face()) else {
        return Ok(None);
    };
    for &c in &store.edge(edge)?.coedges {
        let other = store.coedge_face(c)?;
        if other != face {
            return Ok(Some(other));
        }
    }
    Ok(None)
}

/// One end of a bridge face, carrying the contacts of the segment end it
/// meets, matched to the bridge's own springs.
fn bridge_segend(
    store: &EntityStore,
    sheet: &SheetFace,
    source: &Segend,
    at_start: bool,
    geom: &FfblendGeomRef,
    convex: bool,
) -> BlendResult<Segend> {
    let contact = |side: Side| -> BlendResult<Intercept> {
        let incpt = source.incpt(side).clone();
        Ok(match coedge_in_face(store, sheet.spring(side), sheet.face)? {
            Some(c) => incpt.with_sheet_coedge(c),
            None => incpt,
        })
    };
    let mut segend = Segend::new(contact(Side::Left)?, contact(Side::Right)?)
        .with_geom(geom.add())
        .with_ruled(source.ruled());
    if let Some(owner) = source.owner() {
        segend = segend.with_owner(owner);
    }
    if let Some(cross) = sheet.cross(at_start) {
        segend.set_sheet_coedge(coedge_in_face(store, cross, sheet.face)?);
    }
    if !segend.update_spine_info(convex, at_start, None) {
        debug!(at_start, "bridge end has no spine");
    }
    Ok(segend)
}

/// Bridge the gap after segment `index` with a patch of the blend surface,
/// when the gap's four corners are coplanar and both facing cross edges
/// exist. Returns whether the gap was bridged.
///
/// Where a spring leaves its support across a model edge square to the
/// spine, the bridge is a bi-blend: on that side it runs over the face
/// beyond the edge.
#[instrument(skip(store, run, curves, built, tol))]
#[allow(clippy::too_many_arguments)]
pub(crate) fn fill_gap_in_chain(
    store: &mut EntityStore,
    shell: ShellId,
    run: &mut SegmentRun,
    index: usize,
    curves: &BlendCurves,
    convex: bool,
    planarity: f64,
    tol: &Tolerance,
    built: &mut Vec<FaceId>,
) -> BlendResult<bool> {
    let Some(next) = run.chain.next(index) else {
        return Ok(false);
    };
    let (Some(before), Some(after)) = (run.chain.get(index), run.chain.get(next)) else {
        return Ok(false);
    };
    let (end, start) = (before.end(), after.start());
    let corners = [
        end.left_incpt().position(),
        end.right_incpt().position(),
        start.right_incpt().position(),
        start.left_incpt().position(),
    ];
    let flatness = corner_planarity(&corners);
    if flatness > planarity {
        debug!(flatness, "gap too far from planar to bridge");
        return Ok(false);
    }
    let (Some(end_cross), Some(start_cross)) = (run.sheets[index].end_cross, run.sheets[next].start_cross) else {
        debug!("gap has a pointy side");
        return Ok(false);
    };

    let (a, b) = (before.range().high(), after.range().low());
    let part = curves.portion(a, b);
    let sheet = build_bridge_face(store, shell, &part.surface, &part.left, &part.right, end_cross, start_cross)?;
    built.push(sheet.face);

    let geom = part.to_geom();
    let from = bridge_segend(store, &sheet, end, true, &geom, convex)?;
    let to = bridge_segend(store, &sheet, start, false, &geom, convex)?;
    let mut supports = [before.face(Side::Left), before.face(Side::Right)];
    if let Some(spine) = from.spine() {
        for side in [Side::Left, Side::Right] {
            let incpt = from.incpt(side);
            if incpt.at_bi_blend(&spine.position, tol.resfit) {
                if let Some(face) = face_beyond(store, incpt)? {
                    debug!(?side, ?face, "bi-blend across the gap");
                    supports[side.index()] = face;
                }
            }
        }
    }
    let mut bridge = FfSegment::new(from, to, supports[0], supports[1], Interval::new(a, b)).with_geom(geom);
    bridge.set_sheet_face(sheet.face);
    let at = run.chain.insert_after(index, bridge);
    run.sheets.insert(at, sheet);
    debug!(at, "gap bridged");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom_cache::FfblendGeom;
    use cad_kernel::geometry::surfaces::Plane;
    use cad_kernel::topology::brep::BodyKind;
    use cad_kernel::{BoundedCurve, OrientedSurface, Point3, Surface, Vec3};

    fn strip() -> BlendCurves {
        let plane = Plane::new(Point3::origin(), Vec3::z()).unwrap();
        BlendCurves {
            spine: BoundedCurve::segment(Point3::new(0.0, 0.5, 0.0), Point3::new(4.0, 0.5, 0.0)).unwrap(),
            left: BoundedCurve::segment(Point3::origin(), Point3::new(4.0, 0.0, 0.0)).unwrap(),
            right: BoundedCurve::segment(Point3::new(0.0, 1.0, 0.0), Point3::new(4.0, 1.0, 0.0)).unwrap(),
            surface: OrientedSurface::new(Surface::Plane(plane), false),
        }
    }

    fn segend_at(curves: &BlendCurves, s: f64) -> Segend {
        let part = curves.portion(s, s);
        let mut end = Segend::new(
            Intercept::from_position(part.left.start(), None, None, None),
            Intercept::from_position(part.right.start(), None, None, None),
        );
        end.set_cross_cur(BoundedCurve::segment(part.left.start(), part.right.start()));
        end
    }

    /// Two sheet faces over `[0, 0.25]` and `[0.75, 1]` of a flat strip.
    fn broken_run(store: &mut EntityStore, shell: ShellId, curves: &BlendCurves) -> SegmentRun {
        let mut faces = store.faces.keys();
        let (l, r) = (faces.next().unwrap(), faces.next().unwrap());
        broken_run_on(store, shell, curves, l, r)
    }

    fn broken_run_on(store: &mut EntityStore, shell: ShellId, curves: &BlendCurves, l: FaceId, r: FaceId) -> SegmentRun {
        let geom = FfblendGeom::shared();
        let mut run = SegmentRun {
            chain: FfSegmentChain::new(),
            sheets: Vec::new(),
        };
        for (a, b) in [(0.0, 0.25), (0.75, 1.0)] {
            let (from, to) = (segend_at(curves, a), segend_at(curves, b));
            let part = curves.portion(a, b);
            let sheet = build_sheet_face(store, shell, &part.surface, &part.left, &part.right, from.cross_cur(), to.cross_cur())
                .unwrap();
            let mut segment = FfSegment::new(from, to, l, r, Interval::new(a, b)).with_geom(geom.add());
            segment.set_sheet_face(sheet.face);
            run.chain.push(segment);
            run.sheets.push(sheet);
        }
        run
    }

    fn sheet_store() -> (EntityStore, ShellId) {
        let mut store = EntityStore::new();
        cad_kernel::topology::primitives::make_block(&mut store, Point3::new(0.0, 0.0, -2.0), Point3::new(1.0, 1.0, -1.0))
            .unwrap();
        let (_, shell) = store.add_body(BodyKind::Sheet);
        (store, shell)
    }

    #[test]
    fn test_fill_gap_bridges_flat_gap() {
        let (mut store, shell) = sheet_store();
        let curves = strip();
        let mut run = broken_run(&mut store, shell, &curves);
        let tol = Tolerance::default();
        assert_eq!(run.chain.gaps(&tol), vec![0]);

        let mut built = Vec::new();
        assert!(fill_gap_in_chain(&mut store, shell, &mut run, 0, &curves, true, 1e-6, &tol, &mut built).unwrap());
        assert_eq!(built.len(), 1);
        assert_eq!(run.chain.len(), 3);
        assert!(run.chain.gaps(&tol).is_empty());
        assert_eq!(run.sheets[1].start_cross, run.sheets[0].end_cross);
        assert_eq!(run.sheets[1].end_cross, run.sheets[2].start_cross);
        // Three faces sharing two cross edges make one strip.
        assert_eq!(store.euler_characteristic(shell).unwrap(), 1);
        let bridge = run.chain.get(1).unwrap();
        assert_eq!(bridge.range(), Interval::new(0.25, 0.75));
        assert_eq!(bridge.face(Side::Left), run.chain.get(0).unwrap().face(Side::Left));
        let spine = bridge.start().spine().unwrap();
        approx::assert_relative_eq!(spine.position, Point3::new(1.0, 0.5, 0.0), epsilon = 1e-12);
        assert!(bridge.end().spine_info_set());
        let own = bridge.start().sheet_coedge().unwrap();
        assert_eq!(store.coedge_face(own).unwrap(), built[0]);
        assert!(!bridge.start().is_external());
    }

    #[test]
    fn test_fill_gap_refuses_pointy_side() {
        let (mut store, shell) = sheet_store();
        let curves = strip();
        let mut run = broken_run(&mut store, shell, &curves);
        run.sheets[1].start_cross = None;
        let mut built = Vec::new();
        let tol = Tolerance::default();
        assert!(!fill_gap_in_chain(&mut store, shell, &mut run, 0, &curves, true, 1e-6, &tol, &mut built).unwrap());
        assert!(built.is_empty());
        assert_eq!(run.chain.len(), 2);
    }

    fn face_with_normal_at(store: &EntityStore, normal: Vec3, p: Point3) -> FaceId {
        store
            .faces
            .iter()
            .find(|(_, f)| match &f.surface {
                Surface::Plane(plane) => plane.normal.cross(&normal).norm() < 1e-9 && plane.signed_distance(&p).abs() < 1e-9,
                _ => false,
            })
            .map(|(id, _)| id)
            .unwrap()
    }

    #[test]
    fn test_fill_gap_hands_stretch_to_face_beyond() {
        // The left spring leaves the block's top face over its x = 1 edge.
        let mut store = EntityStore::new();
        cad_kernel::topology::primitives::make_block(&mut store, Point3::new(1.0, -1.0, -1.0), Point3::new(3.0, 0.5, 0.0))
            .unwrap();
        let (_, shell) = store.add_body(BodyKind::Sheet);
        let curves = strip();
        let top = face_with_normal_at(&store, Vec3::z(), Point3::new(2.0, 0.0, 0.0));
        let beyond = face_with_normal_at(&store, Vec3::x(), Point3::new(1.0, 0.0, -0.5));
        let mut run = broken_run_on(&mut store, shell, &curves, top, top);
        let tol = Tolerance::default();
        let crossing = Point3::new(1.0, 0.0, 0.0);
        let edge = store
            .face_edges(top)
            .unwrap()
            .into_iter()
            .find(|e| beyond_edge(&store, *e, beyond))
            .unwrap();
        let ffi = FaceFaceInt {
            position: crossing,
            spring_param: 1.0,
            face: top,
            coedge: coedge_in_face(&store, edge, top).unwrap(),
            edge_param: store.point_on_edge(edge, &crossing, 1e-9).unwrap(),
            vertex: None,
            direction: Some(Vec3::x()),
            tolerance: 0.0,
        };
        let before = run.chain.get_mut(0).unwrap();
        let right = before.end().right_incpt().clone();
        let mut end = Segend::new(Intercept::from_face_face_int(&ffi, false), right);
        end.set_cross_cur(BoundedCurve::segment(crossing, Point3::new(1.0, 1.0, 0.0)));
        *before.end_mut() = end;

        let mut built = Vec::new();
        assert!(fill_gap_in_chain(&mut store, shell, &mut run, 0, &curves, true, 1e-6, &tol, &mut built).unwrap());
        let bridge = run.chain.get(1).unwrap();
        assert_eq!(bridge.face(Side::Left), beyond);
        assert_eq!(bridge.face(Side::Right), top);
        assert!(bridge.start().left_incpt().sheet_coedge().is_some());
    }

    fn beyond_edge(store: &EntityStore, edge: cad_kernel::topology::brep::EdgeId, face: FaceId) -> bool {
        store
            .edge(edge)
            .unwrap()
            .coedges
            .iter()
            .any(|c| store.coedge_face(*c).unwrap() == face)
    }

    #[test]
    fn test_run_ends_are_outermost_segends() {
        let (mut store, shell) = sheet_store();
        let curves = strip();
        let run = broken_run(&mut store, shell, &curves);
        let (start, end, sheets) = run.into_ends().unwrap();
        assert_eq!(sheets.len(), 2);
        approx::assert_relative_eq!(start.left_incpt().position().x, 0.0, epsilon = 1e-12);
        approx::assert_relative_eq!(end.left_incpt().position().x, 4.0, epsilon = 1e-12);
    }
}
