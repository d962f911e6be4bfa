//! Topology of the blend sheet: faces bounded by springs and cross curves.

use cad_kernel::geometry::{centroid, newell_normal};
use cad_kernel::topology::brep::{EdgeId, FaceId, ShellId, VertexId};
use cad_kernel::{BoundedCurve, EntityStore, OrientedSurface, Point3};

use crate::error::{BlendError, BlendResult, Side};

/// Entities of one built sheet face. Cross edges run from the left spring
/// to the right one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SheetFace {
    pub face: FaceId,
    pub left: EdgeId,
    pub right: EdgeId,
    pub start_cross: Option<EdgeId>,
    pub end_cross: Option<EdgeId>,
}

impl SheetFace {
    pub fn cross(&self, at_start: bool) -> Option<EdgeId> {
        if at_start { self.start_cross } else { self.end_cross }
    }

    pub fn spring(&self, side: Side) -> EdgeId {
        match side {
            Side::Left => self.left,
            Side::Right => self.right,
        }
    }
}

fn add_edge(store: &mut EntityStore, bc: &BoundedCurve, start: VertexId, end: VertexId) -> BlendResult<EdgeId> {
    Ok(store.add_edge(bc.curve.clone(), bc.range, start, end)?)
}

/// Points round a loop of `(edge, forward)` runs in travel order.
pub(crate) fn loop_points(store: &EntityStore, run: &[(EdgeId, bool)]) -> BlendResult<Vec<Point3>> {
    let mut points = Vec::new();
    for &(edge, forward) in run {
        let mut samples = store.edge_bounded_curve(edge)?.sample(8);
        if !forward {
            samples.reverse();
        }
        samples.pop();
        points.extend(samples);
    }
    Ok(points)
}

/// `run` turned round where it would run clockwise about the surface normal.
pub(crate) fn orient_loop(
    store: &EntityStore,
    surface: &OrientedSurface,
    run: Vec<(EdgeId, bool)>,
) -> BlendResult<Vec<(EdgeId, bool)>> {
    let points = loop_points(store, &run)?;
    let normal = surface.normal(&centroid(&points));
    if newell_normal(&points).dot(&normal) >= 0.0 {
        return Ok(run);
    }
    Ok(run.into_iter().rev().map(|(e, forward)| (e, !forward)).collect())
}

/// Build one sheet face on `surface` between two springs. A missing cross
/// curve means the springs meet at that end.
pub(crate) fn build_sheet_face(
    store: &mut EntityStore,
    shell: ShellId,
    surface: &OrientedSurface,
    left: &BoundedCurve,
    right: &BoundedCurve,
    start_cross: Option<&BoundedCurve>,
    end_cross: Option<&BoundedCurve>,
) -> BlendResult<SheetFace> {
    if start_cross.is_none() && end_cross.is_none() {
        return Err(BlendError::ImpossibleGeometry);
    }
    let ls = store.add_vertex(left.start());
    let le = store.add_vertex(left.end());
    let rs = if start_cross.is_some() { store.add_vertex(right.start()) } else { ls };
    let re = if end_cross.is_some() { store.add_vertex(right.end()) } else { le };

    let e_left = add_edge(store, left, ls, le)?;
    let e_right = add_edge(store, right, rs, re)?;
    let e_start = start_cross.map(|c| add_edge(store, c, ls, rs)).transpose()?;
    let e_end = end_cross.map(|c| add_edge(store, c, le, re)).transpose()?;

    let mut run = vec![(e_left, true)];
    run.extend(e_end.map(|e| (e, true)));
    run.push((e_right, false));
    run.extend(e_start.map(|e| (e, false)));
    let run = orient_loop(store, surface, run)?;
    let face = store.add_face(shell, surface.surface.clone(), surface.reversed, &[run])?;
    Ok(SheetFace {
        face,
        left: e_left,
        right: e_right,
        start_cross: e_start,
        end_cross: e_end,
    })
}

/// Sheet face of a blend running right round a closed edge: two spring
/// loops and no cross curves.
pub(crate) fn build_ring_face(
    store: &mut EntityStore,
    shell: ShellId,
    surface: &OrientedSurface,
    left: &BoundedCurve,
    right: &BoundedCurve,
) -> BlendResult<SheetFace> {
    let vl = store.add_vertex(left.start());
    let vr = store.add_vertex(right.start());
    let e_left = add_edge(store, left, vl, vl)?;
    let e_right = add_edge(store, right, vr, vr)?;
    // Each loop keeps the face, which lies toward the other spring, on its left.
    let forward = |bc: &BoundedCurve, toward: Point3| -> BlendResult<bool> {
        let p = bc.start();
        let d = bc.curve.tangent(bc.range.low()).ok_or(BlendError::ImpossibleGeometry)?;
        Ok(surface.normal(&p).cross(&d).dot(&(toward - p)) > 0.0)
    };
    let loops = [
        vec![(e_left, forward(left, right.start())?)],
        vec![(e_right, forward(right, left.start())?)],
    ];
    let face = store.add_face(shell, surface.surface.clone(), surface.reversed, &loops)?;
    Ok(SheetFace {
        face,
        left: e_left,
        right: e_right,
        start_cross: None,
        end_cross: None,
    })
}

/// Patch of the blend surface spanning the gap between two sheet faces,
/// sharing their cross edges.
pub(crate) fn build_bridge_face(
    store: &mut EntityStore,
    shell: ShellId,
    surface: &OrientedSurface,
    left: &BoundedCurve,
    right: &BoundedCurve,
    start_cross: EdgeId,
    end_cross: EdgeId,
) -> BlendResult<SheetFace> {
    let (ls, rs) = {
        let e = store.edge(start_cross)?;
        (e.start, e.end)
    };
    let (le, re) = {
        let e = store.edge(end_cross)?;
        (e.start, e.end)
    };
    let e_left = add_edge(store, left, ls, le)?;
    let e_right = add_edge(store, right, rs, re)?;
    let run = vec![(e_left, true), (end_cross, true), (e_right, false), (start_cross, false)];
    let run = orient_loop(store, surface, run)?;
    let face = store.add_face(shell, surface.surface.clone(), surface.reversed, &[run])?;
    Ok(SheetFace {
        face,
        left: e_left,
        right: e_right,
        start_cross: Some(start_cross),
        end_cross: Some(end_cross),
    })
}

/// Largest distance of any corner from the plane through the others.
pub(crate) fn corner_planarity(corners: &[Point3; 4]) -> f64 {
    let normal = newell_normal(corners);
    let Some(normal) = cad_kernel::geometry::unit(&normal) else {
        return f64::INFINITY;
    };
    let c = centroid(corners);
    corners
        .iter()
        .map(|p| (p - c).dot(&normal).abs())
        .fold(0.0, f64::max)
}
