//! How a face-face blend is finished where its edge ends at a vertex.
//!
//! Each end gets an [`EndPlan`]: the plane the sheet is cut by there and,
//! where a neighbouring blend is involved, which one. The plans are tried
//! in a fixed order (setback, smooth run, vertex sphere, cuspate vertex,
//! mitre, smaller neighbour, cap) and the first that applies wins.

use cad_kernel::geometry::intersection::three_plane_point;
use cad_kernel::geometry::surfaces::{Plane, Sphere};
use cad_kernel::geometry::unit;
use cad_kernel::topology::brep::{EdgeId, FaceId, VertexId};
use cad_kernel::{EntityStore, Surface, Tolerance, Vec3};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::attrib::{AttribId, BlendGraph, BlendKind, EndCondition, SupportEntity};
use crate::config::BlendConfig;
use crate::convexity::{ConvexityCache, Cvty};
use crate::error::{BlendError, BlendResult, Side};
use crate::intercept::Intercept;
use crate::law::BlendProfile;
use crate::session::VertexSphere;
use crate::stage1::geometry::{square_plane, BlendCurves, EdgeFrame, EndCut};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndPlanKind {
    /// The blend runs right round a closed edge.
    Ring,
    /// Stopped short of the vertex by a setback.
    Open,
    /// Runs on tangentially into a neighbouring blend.
    Smooth,
    /// Closes on a sphere shared by every blend at the vertex.
    VertexBlend,
    /// Cut at a vertex where convex and concave edges meet, leaving the
    /// corner to a vertex blend.
    Cuspate,
    /// Meets an equal neighbour on the plane bisecting the two edges.
    Mitred,
    /// Runs over a smaller neighbour that was built first.
    Reordered,
    /// Capped by a third face of the model.
    Capped,
}

impl EndPlanKind {
    /// The end condition recorded for an end finished this way.
    pub fn condition(self) -> EndCondition {
        match self {
            EndPlanKind::Ring | EndPlanKind::Smooth => EndCondition::InternalClosed,
            EndPlanKind::Open => EndCondition::Open,
            EndPlanKind::VertexBlend | EndPlanKind::Cuspate => EndCondition::VertexBlend,
            EndPlanKind::Mitred => EndCondition::Mitred,
            EndPlanKind::Reordered => EndCondition::Reordered,
            EndPlanKind::Capped => EndCondition::Closed,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct EndPlan {
    pub kind: EndPlanKind,
    pub plane: Plane,
    pub mate: Option<AttribId>,
    /// Model face capping the end, if there is one.
    pub cap: Option<FaceId>,
    pub sphere: Option<VertexSphere>,
}

impl EndPlan {
    fn new(kind: EndPlanKind, plane: Plane) -> Self {
        Self {
            kind,
            plane,
            mate: None,
            cap: None,
            sphere: None,
        }
    }

    fn with_mate(mut self, mate: AttribId) -> Self {
        self.mate = Some(mate);
        self
    }
}

/// A face-face blend on another edge at the same vertex.
#[derive(Debug, Clone)]
pub(crate) struct Neighbour {
    pub attrib: AttribId,
    pub edge: EdgeId,
    /// Unit tangent leaving the vertex along the neighbour's edge.
    pub leaving: Vec3,
    pub supports: SupportEntity,
    pub cvty: Cvty,
    pub profile: BlendProfile,
    /// Size of the neighbour at this vertex.
    pub size: f64,
    pub done: bool,
    pub failed: bool,
}

impl Neighbour {
    fn shared_supports(&self, ours: &SupportEntity) -> usize {
        [self.supports.left, self.supports.right]
            .iter()
            .filter(|f| **f == ours.left || **f == ours.right)
            .count()
    }
}

/// Blend size at one end: the radius there for rounds.
pub(crate) fn end_size(profile: &BlendProfile, at_start: bool) -> f64 {
    profile.end_radius(at_start).unwrap_or_else(|| profile.size())
}

fn leaving(store: &EntityStore, edge: EdgeId, vertex: VertexId) -> BlendResult<Option<(Vec3, bool)>> {
    let data = store.edge(edge)?;
    let (t, at_start, sign) = if data.start == vertex {
        (data.range.low(), true, 1.0)
    } else if data.end == vertex {
        (data.range.high(), false, -1.0)
    } else {
        return Ok(None);
    };
    Ok(data.curve.tangent(t).map(|d| (d * sign, at_start)))
}

/// Face-face blends on the other edges at `vertex`.
pub(crate) fn neighbours(
    store: &EntityStore,
    graph: &BlendGraph,
    vertex: VertexId,
    own: EdgeId,
) -> BlendResult<Vec<Neighbour>> {
    let mut found = Vec::new();
    for edge in store.vertex_edges(vertex) {
        if edge == own {
            continue;
        }
        let Some((attrib, data)) = graph.of_edge(edge) else {
            continue;
        };
        if data.kind() != BlendKind::FaceFace {
            continue;
        }
        let Some((direction, at_start)) = leaving(store, edge, vertex)? else {
            continue;
        };
        found.push(Neighbour {
            attrib,
            edge,
            leaving: direction,
            supports: data.supports(),
            cvty: data.cvty(),
            profile: data.profile().clone(),
            size: end_size(data.profile(), at_start),
            done: data.done(),
            failed: data.failed(),
        });
    }
    Ok(found)
}

/// Whether every sharp edge at `vertex` has the same convexity. Tangent
/// edges take no part.
pub(crate) fn vertex_univex(
    store: &EntityStore,
    cvty_cache: &mut ConvexityCache,
    vertex: VertexId,
    config: &BlendConfig,
) -> BlendResult<bool> {
    let mut sense = None;
    for edge in store.vertex_edges(vertex) {
        let cvty = cvty_cache.edge_convexity(store, edge, config)?;
        let convex = if cvty.sharp_convex() {
            true
        } else if cvty.sharp_concave() {
            false
        } else if cvty.tangent() {
            continue;
        } else {
            return Ok(false);
        };
        match sense {
            None => sense = Some(convex),
            Some(s) if s != convex => return Ok(false),
            Some(_) => {}
        }
    }
    Ok(true)
}

/// A neighbour our blend can share a mitre plane with: same sense, same
/// size at the vertex, and exactly one support face in common.
pub(crate) fn find_vertex_mate(
    neighbours: &[Neighbour],
    supports: &SupportEntity,
    cvty: Cvty,
    size: f64,
    tol: &Tolerance,
) -> Option<AttribId> {
    neighbours
        .iter()
        .find(|n| {
            !n.failed && n.cvty.same_sense(cvty) && (n.size - size).abs() < tol.resabs && n.shared_supports(supports) == 1
        })
        .map(|n| n.attrib)
}

/// The opposite-sense neighbour sharing a support that a cuspate end is cut
/// against; the largest if there are several.
pub(crate) fn find_cuspate_vertex_mate(neighbours: &[Neighbour], supports: &SupportEntity, cvty: Cvty) -> Option<AttribId> {
    neighbours
        .iter()
        .filter(|n| !n.failed && !n.cvty.same_sense(cvty) && n.shared_supports(supports) > 0)
        .fold(None::<&Neighbour>, |best, n| match best {
            Some(b) if b.size >= n.size => Some(b),
            _ => Some(n),
        })
        .map(|n| n.attrib)
}

/// Where a contact of our end cut lies on the edge of a cuspate mate, as an
/// intercept on the support face the edge bounds.
pub(crate) fn find_cuspate_incpt(
    store: &EntityStore,
    frame: &EdgeFrame,
    mate_edge: EdgeId,
    cut: &EndCut,
    tol: &Tolerance,
) -> BlendResult<Option<(Side, Intercept)>> {
    let mate_faces = store.edge_faces(mate_edge)?;
    for side in [Side::Left, Side::Right] {
        let face = frame.face(side);
        if !mate_faces.contains(&face) {
            continue;
        }
        let (_, p) = cut.contact(side);
        let Some(t) = store.point_on_edge(mate_edge, &p, tol.resfit)? else {
            continue;
        };
        for &coedge in &store.edge(mate_edge)?.coedges {
            if store.coedge_face(coedge)? == face {
                return Ok(Some((side, Intercept::on_coedge(store, coedge, p, t, tol.resfit)?)));
            }
        }
    }
    Ok(None)
}

/// Sphere touching the three planar faces at a corner, offset by `radius`
/// to the blended side.
fn corner_sphere(store: &EntityStore, vertex: VertexId, radius: f64, convex: bool) -> BlendResult<Option<Sphere>> {
    let mut faces: Vec<FaceId> = Vec::new();
    for edge in store.vertex_edges(vertex) {
        for face in store.edge_faces(edge)? {
            if !faces.contains(&face) {
                faces.push(face);
            }
        }
    }
    if faces.len() != 3 {
        return Ok(None);
    }
    let d = if convex { -radius } else { radius };
    let mut planes = Vec::with_capacity(3);
    for face in faces {
        match store.oriented_surface(face)?.offset(d).map(|s| s.surface) {
            Some(Surface::Plane(p)) => planes.push(p),
            _ => return Ok(None),
        }
    }
    Ok(three_plane_point(&planes[0], &planes[1], &planes[2]).map(|centre| Sphere::new(centre, radius)))
}

/// The planar face at the vertex, other than the supports, that meets the
/// edge most squarely, with its plane facing into the blend.
fn cap_plane(store: &EntityStore, frame: &EdgeFrame, at_start: bool, inward: &Vec3) -> BlendResult<Option<(Plane, FaceId)>> {
    let vertex = frame.vertex(at_start);
    let p = frame.point(at_start);
    let mut best: Option<(f64, Vec3, FaceId)> = None;
    for edge in store.vertex_edges(vertex) {
        if edge == frame.edge {
            continue;
        }
        for face in store.edge_faces(edge)? {
            if face == frame.left || face == frame.right {
                continue;
            }
            let surface = store.oriented_surface(face)?;
            if !surface.surface.is_planar() {
                continue;
            }
            let n = surface.normal(&p);
            let square = n.dot(inward).abs();
            if square > 1e-3 && best.as_ref().is_none_or(|(s, _, _)| square > *s) {
                let n = if n.dot(inward) < 0.0 { -n } else { n };
                best = Some((square, n, face));
            }
        }
    }
    Ok(match best {
        Some((_, n, face)) => Plane::new(p, n).map(|plane| (plane, face)),
        None => None,
    })
}

/// Open end: the plane is moved in by the setback and tilted so the left
/// contact lies `setback_diff` further in than the right.
fn open_plane(
    attrib_plane: Option<&Plane>,
    frame: &EdgeFrame,
    curves: &BlendCurves,
    at_start: bool,
    inward: &Vec3,
    setback: f64,
    diff: Option<f64>,
) -> BlendResult<Plane> {
    let origin = frame.point(at_start) + inward * setback;
    if let Some(def) = attrib_plane {
        let n = if def.normal.dot(inward) < 0.0 { -def.normal } else { def.normal };
        return square_plane(origin, &n);
    }
    let (l, r) = if at_start {
        (curves.left.start(), curves.right.start())
    } else {
        (curves.left.end(), curves.right.end())
    };
    let mut across = l - r;
    across -= inward * across.dot(inward);
    let width = across.norm();
    let normal = match (diff, unit(&across)) {
        (Some(delta), Some(across)) if width > 1e-12 => unit(&(inward - across * (delta / width))).unwrap_or(*inward),
        _ => *inward,
    };
    square_plane(origin, &normal)
}

/// Everything about the blend and its surroundings the planner reads.
pub(crate) struct EndContext<'a> {
    pub store: &'a EntityStore,
    pub graph: &'a BlendGraph,
    pub config: &'a BlendConfig,
    pub id: AttribId,
    pub frame: &'a EdgeFrame,
    pub curves: &'a BlendCurves,
}

/// Decide how the end at `at_start` of the blend is finished.
pub(crate) fn plan_end(ctx: &EndContext<'_>, cvty_cache: &mut ConvexityCache, at_start: bool) -> BlendResult<EndPlan> {
    let EndContext {
        store,
        graph,
        config,
        id,
        frame,
        curves,
    } = *ctx;
    let tol = &config.tolerance;
    let attrib = graph.get(id)?;
    let vertex = frame.vertex(at_start);
    let p = frame.point(at_start);
    let inward = frame.inward(at_start).ok_or(BlendError::ImpossibleGeometry)?;
    let supports = attrib.supports();
    let cvty = attrib.cvty();
    let size = end_size(attrib.profile(), at_start);

    let setback = attrib.setback(at_start);
    if setback > tol.resabs {
        let plane = open_plane(attrib.def_plane(), frame, curves, at_start, &inward, setback, attrib.setback_diff(at_start))?;
        return Ok(EndPlan::new(EndPlanKind::Open, plane));
    }

    let neighbours = neighbours(store, graph, vertex, frame.edge)?;
    let continuing = -config.near_tangent_angle.cos();
    if let Some(n) = neighbours.iter().find(|n| {
        n.leaving.dot(&inward) < continuing && n.cvty.same_sense(cvty) && (n.size - size).abs() < tol.resabs && !n.failed
    }) {
        debug!(mate = ?n.attrib, "smooth continuation");
        return Ok(EndPlan::new(EndPlanKind::Smooth, square_plane(p, &inward)?).with_mate(n.attrib));
    }

    let univex = vertex_univex(store, cvty_cache, vertex, config)?;
    let valence = store.vertex_edges(vertex).len();
    let all_round = neighbours.len() == 2
        && attrib.profile().constant_radius().is_some()
        && neighbours.iter().all(|n| {
            !n.failed && n.cvty.same_sense(cvty) && n.profile.constant_radius().is_some_and(|r| (r - size).abs() < tol.resabs)
        });
    if univex && valence == 3 && all_round {
        if let Some(sphere) = corner_sphere(store, vertex, size, frame.convex)? {
            let mut members: Vec<AttribId> = neighbours.iter().map(|n| n.attrib).collect();
            members.push(id);
            members.sort();
            let mut plan = EndPlan::new(EndPlanKind::VertexBlend, square_plane(sphere.center, &inward)?);
            plan.sphere = Some(VertexSphere {
                sphere,
                convex: frame.convex,
                members,
                face: None,
            });
            return Ok(plan);
        }
    }

    if !univex && !neighbours.is_empty() {
        let mut plan = EndPlan::new(EndPlanKind::Cuspate, square_plane(p, &inward)?);
        plan.mate = find_cuspate_vertex_mate(&neighbours, &supports, cvty);
        return Ok(plan);
    }

    if let Some(mate) = find_vertex_mate(&neighbours, &supports, cvty, size, tol) {
        let theirs = neighbours.iter().find(|n| n.attrib == mate).map(|n| n.leaving).unwrap_or(-inward);
        let normal = unit(&(inward - theirs)).ok_or(BlendError::MitreFailed)?;
        return Ok(EndPlan::new(EndPlanKind::Mitred, square_plane(p, &normal)?).with_mate(mate));
    }

    let capped = cap_plane(store, frame, at_start, &inward)?;
    let smaller = neighbours.iter().find(|n| {
        n.done && n.cvty.same_sense(cvty) && n.size < size - tol.resabs && n.shared_supports(&supports) > 0
    });
    let (plane, cap) = match capped {
        Some((plane, face)) => (plane, Some(face)),
        None => (square_plane(p, &inward)?, None),
    };
    let mut plan = match smaller {
        Some(n) => EndPlan::new(EndPlanKind::Reordered, plane).with_mate(n.attrib),
        None => EndPlan::new(EndPlanKind::Capped, plane),
    };
    plan.cap = cap;
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cad_kernel::topology::primitives::{make_block, make_prism};
    use cad_kernel::Point3;

    fn l_prism(store: &mut EntityStore) {
        let profile = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(4.0, 0.0, 0.0),
            Point3::new(4.0, 2.0, 0.0),
            Point3::new(2.0, 2.0, 0.0),
            Point3::new(2.0, 4.0, 0.0),
            Point3::new(0.0, 4.0, 0.0),
        ];
        make_prism(store, &profile, 3.0).unwrap();
    }

    fn vertex_at(store: &EntityStore, p: Point3) -> VertexId {
        store
            .vertices
            .iter()
            .find(|(_, v)| nalgebra::distance(&v.point, &p) < 1e-9)
            .map(|(id, _)| id)
            .unwrap()
    }

    #[test]
    fn test_block_corner_is_univex() {
        let mut store = EntityStore::new();
        make_block(&mut store, Point3::origin(), Point3::new(1.0, 1.0, 1.0)).unwrap();
        let mut cache = ConvexityCache::new();
        let corner = vertex_at(&store, Point3::new(1.0, 1.0, 1.0));
        assert!(vertex_univex(&store, &mut cache, corner, &BlendConfig::default()).unwrap());
    }

    #[test]
    fn test_re_entrant_corner_is_not_univex() {
        let mut store = EntityStore::new();
        l_prism(&mut store);
        let mut cache = ConvexityCache::new();
        let config = BlendConfig::default();
        let inner_top = vertex_at(&store, Point3::new(2.0, 2.0, 3.0));
        assert!(!vertex_univex(&store, &mut cache, inner_top, &config).unwrap());
        let outer_top = vertex_at(&store, Point3::new(4.0, 0.0, 3.0));
        assert!(vertex_univex(&store, &mut cache, outer_top, &config).unwrap());
    }

    #[test]
    fn test_end_plan_conditions() {
        assert_eq!(EndPlanKind::Capped.condition(), EndCondition::Closed);
        assert_eq!(EndPlanKind::Smooth.condition(), EndCondition::InternalClosed);
        assert_eq!(EndPlanKind::Cuspate.condition(), EndCondition::VertexBlend);
        assert!(EndPlanKind::Cuspate.condition().is_terminal());
        assert!(EndPlanKind::Mitred.condition().is_terminal());
    }

    #[test]
    fn test_corner_sphere_of_block() {
        let mut store = EntityStore::new();
        make_block(&mut store, Point3::origin(), Point3::new(4.0, 4.0, 4.0)).unwrap();
        let corner = vertex_at(&store, Point3::new(4.0, 4.0, 4.0));
        let sphere = corner_sphere(&store, corner, 1.0, true).unwrap().unwrap();
        approx::assert_relative_eq!(sphere.center, Point3::new(3.0, 3.0, 3.0), epsilon = 1e-9);
        let concave = corner_sphere(&store, corner, 1.0, false).unwrap().unwrap();
        approx::assert_relative_eq!(concave.center, Point3::new(5.0, 5.0, 5.0), epsilon = 1e-9);
    }

    fn neighbour(attrib: AttribId, supports: SupportEntity, cvty: Cvty, size: f64) -> Neighbour {
        Neighbour {
            attrib,
            edge: EdgeId::default(),
            leaving: Vec3::x(),
            supports,
            cvty,
            profile: BlendProfile::round(size),
            size,
            done: false,
            failed: false,
        }
    }

    #[test]
    fn test_mate_selection() {
        let mut ids: slotmap::SlotMap<AttribId, ()> = slotmap::SlotMap::with_key();
        let mut faces: slotmap::SlotMap<FaceId, ()> = slotmap::SlotMap::with_key();
        let (a, b, c, d) = (faces.insert(()), faces.insert(()), faces.insert(()), faces.insert(()));
        let (m1, m2, m3) = (ids.insert(()), ids.insert(()), ids.insert(()));
        let ours = SupportEntity { left: a, right: b };
        let tol = Tolerance::default();

        let list = vec![
            neighbour(m1, SupportEntity { left: c, right: d }, Cvty::CONVEX, 1.0),
            neighbour(m2, SupportEntity { left: b, right: c }, Cvty::CONVEX, 2.0),
            neighbour(m3, SupportEntity { left: b, right: c }, Cvty::CONVEX, 1.0),
        ];
        assert_eq!(find_vertex_mate(&list, &ours, Cvty::CONVEX, 1.0, &tol), Some(m3));
        assert_eq!(find_vertex_mate(&list, &ours, Cvty::CONCAVE, 1.0, &tol), None);

        let mixed = vec![
            neighbour(m1, SupportEntity { left: a, right: c }, Cvty::CONCAVE, 0.5),
            neighbour(m2, SupportEntity { left: b, right: d }, Cvty::CONCAVE, 1.5),
            neighbour(m3, SupportEntity { left: c, right: d }, Cvty::CONCAVE, 3.0),
        ];
        assert_eq!(find_cuspate_vertex_mate(&mixed, &ours, Cvty::CONVEX), Some(m2));
    }
}
