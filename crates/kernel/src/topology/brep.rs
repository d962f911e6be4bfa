use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use slotmap::{new_key_type, SlotMap};

use crate::geometry::bbox::BoundingBox;
use crate::geometry::curves::{BoundedCurve, Curve};
use crate::geometry::interval::Interval;
use crate::geometry::surfaces::{OrientedSurface, Surface};
use crate::geometry::{Point3, Vec3};
use crate::KernelError;

// ─── Entity Keys ─────────────────────────────────────────────────────────────

new_key_type! {
    pub struct VertexId;
    pub struct EdgeId;
    pub struct CoedgeId;
    pub struct LoopId;
    pub struct FaceId;
    pub struct ShellId;
    pub struct BodyId;
}

/// A reference to any topological entity, the element type of entity lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityRef {
    Vertex(VertexId),
    Edge(EdgeId),
    Coedge(CoedgeId),
    Loop(LoopId),
    Face(FaceId),
    Shell(ShellId),
    Body(BodyId),
}

// ─── Topological Entities ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vertex {
    pub point: Point3,
    /// Set on tolerant vertices: the radius within which the vertex is exact.
    pub tolerance: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub curve: Curve,
    /// Parameter range; `start` sits at the low end.
    pub range: Interval,
    pub start: VertexId,
    pub end: VertexId,
    pub coedges: Vec<CoedgeId>,
    /// Set on tolerant edges: the gap the edge is allowed to bridge.
    pub tolerance: Option<f64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Coedge {
    pub edge: EdgeId,
    /// true if the coedge runs along the edge curve's direction.
    pub forward: bool,
    pub loop_id: LoopId,
    pub next: CoedgeId,
    pub prev: CoedgeId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Loop {
    pub coedges: Vec<CoedgeId>,
    pub face: FaceId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Face {
    pub surface: Surface,
    /// true if the face normal opposes the surface normal.
    pub reversed: bool,
    /// Outer loop first, then holes.
    pub loops: Vec<LoopId>,
    pub shell: ShellId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shell {
    pub faces: Vec<FaceId>,
    pub body: BodyId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BodyKind {
    Solid,
    /// Open, zero-thickness body; its boundary edges carry one coedge.
    Sheet,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Body {
    pub shells: Vec<ShellId>,
    pub kind: BodyKind,
}

/// Where a point lies relative to a face.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointFaceContainment {
    Inside,
    Boundary,
    Outside,
}

// ─── Entity Store ────────────────────────────────────────────────────────────

/// Arena-based storage for all topological entities.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityStore {
    pub vertices: SlotMap<VertexId, Vertex>,
    pub edges: SlotMap<EdgeId, Edge>,
    pub coedges: SlotMap<CoedgeId, Coedge>,
    pub loops: SlotMap<LoopId, Loop>,
    pub faces: SlotMap<FaceId, Face>,
    pub shells: SlotMap<ShellId, Shell>,
    pub bodies: SlotMap<BodyId, Body>,
}

macro_rules! getter {
    ($name:ident, $field:ident, $id:ty, $ty:ty, $variant:ident) => {
        pub fn $name(&self, id: $id) -> Result<&$ty, KernelError> {
            self.$field
                .get(id)
                .ok_or(KernelError::MissingEntity(EntityRef::$variant(id)))
        }
    };
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    getter!(vertex, vertices, VertexId, Vertex, Vertex);
    getter!(edge, edges, EdgeId, Edge, Edge);
    getter!(coedge, coedges, CoedgeId, Coedge, Coedge);
    getter!(loop_data, loops, LoopId, Loop, Loop);
    getter!(face, faces, FaceId, Face, Face);
    getter!(shell, shells, ShellId, Shell, Shell);
    getter!(body, bodies, BodyId, Body, Body);

    pub fn contains(&self, entity: EntityRef) -> bool {
        match entity {
            EntityRef::Vertex(id) => self.vertices.contains_key(id),
            EntityRef::Edge(id) => self.edges.contains_key(id),
            EntityRef::Coedge(id) => self.coedges.contains_key(id),
            EntityRef::Loop(id) => self.loops.contains_key(id),
            EntityRef::Face(id) => self.faces.contains_key(id),
            EntityRef::Shell(id) => self.shells.contains_key(id),
            EntityRef::Body(id) => self.bodies.contains_key(id),
        }
    }

    // ─── Construction ───────────────────────────────────────────────────────

    pub fn add_body(&mut self, kind: BodyKind) -> (BodyId, ShellId) {
        let body = self.bodies.insert(Body {
            shells: vec![],
            kind,
        });
        let shell = self.shells.insert(Shell {
            faces: vec![],
            body,
        });
        self.bodies[body].shells.push(shell);
        (body, shell)
    }

    pub fn add_vertex(&mut self, point: Point3) -> VertexId {
        self.vertices.insert(Vertex {
            point,
            tolerance: None,
        })
    }

    pub fn add_tolerant_vertex(&mut self, point: Point3, tolerance: f64) -> VertexId {
        self.vertices.insert(Vertex {
            point,
            tolerance: Some(tolerance),
        })
    }

    /// Add an edge running over `range` of `curve` from `start` to `end`.
    pub fn add_edge(
        &mut self,
        curve: Curve,
        range: Interval,
        start: VertexId,
        end: VertexId,
    ) -> Result<EdgeId, KernelError> {
        self.vertex(start)?;
        self.vertex(end)?;
        if range.is_empty() {
            return Err(KernelError::Degenerate {
                reason: "edge with an empty parameter range".into(),
            });
        }
        Ok(self.edges.insert(Edge {
            curve,
            range,
            start,
            end,
            coedges: vec![],
            tolerance: None,
        }))
    }

    /// Straight edge between two existing vertices.
    pub fn add_line_edge(&mut self, start: VertexId, end: VertexId) -> Result<EdgeId, KernelError> {
        let (a, b) = (self.vertex(start)?.point, self.vertex(end)?.point);
        let segment = BoundedCurve::segment(a, b).ok_or_else(|| KernelError::Degenerate {
            reason: "straight edge between coincident vertices".into(),
        })?;
        self.add_edge(segment.curve, segment.range, start, end)
    }

    /// Add a face to `shell` whose loops are given as `(edge, forward)` runs.
    /// Each run must close on itself.
    pub fn add_face(
        &mut self,
        shell: ShellId,
        surface: Surface,
        reversed: bool,
        loops: &[Vec<(EdgeId, bool)>],
    ) -> Result<FaceId, KernelError> {
        self.shell(shell)?;
        for run in loops {
            self.check_closed(run)?;
        }
        let face = self.faces.insert(Face {
            surface,
            reversed,
            loops: vec![],
            shell,
        });
        for run in loops {
            let loop_id = self.loops.insert(Loop {
                coedges: vec![],
                face,
            });
            let ids: Vec<CoedgeId> = run
                .iter()
                .map(|&(edge, forward)| {
                    let id = self.coedges.insert(Coedge {
                        edge,
                        forward,
                        loop_id,
                        next: CoedgeId::default(),
                        prev: CoedgeId::default(),
                    });
                    self.edges[edge].coedges.push(id);
                    id
                })
                .collect();
            let n = ids.len();
            for (i, &id) in ids.iter().enumerate() {
                let c = &mut self.coedges[id];
                c.next = ids[(i + 1) % n];
                c.prev = ids[(i + n - 1) % n];
            }
            self.loops[loop_id].coedges = ids;
            self.faces[face].loops.push(loop_id);
        }
        self.shells[shell].faces.push(face);
        Ok(face)
    }

    fn check_closed(&self, run: &[(EdgeId, bool)]) -> Result<(), KernelError> {
        if run.is_empty() {
            return Err(KernelError::OpenLoop);
        }
        let ends = |&(edge, forward): &(EdgeId, bool)| -> Result<(VertexId, VertexId), KernelError> {
            let e = self.edge(edge)?;
            Ok(if forward { (e.start, e.end) } else { (e.end, e.start) })
        };
        for i in 0..run.len() {
            let (_, end) = ends(&run[i])?;
            let (next_start, _) = ends(&run[(i + 1) % run.len()])?;
            if end != next_start {
                return Err(KernelError::OpenLoop);
            }
        }
        Ok(())
    }

    /// Remove a face with its loops and coedges. Edges and vertices left
    /// without users are removed too.
    pub fn delete_face(&mut self, face: FaceId) -> Result<(), KernelError> {
        let data = self
            .faces
            .remove(face)
            .ok_or(KernelError::MissingEntity(EntityRef::Face(face)))?;
        if let Some(shell) = self.shells.get_mut(data.shell) {
            shell.faces.retain(|f| *f != face);
        }
        for loop_id in data.loops {
            let Some(lp) = self.loops.remove(loop_id) else {
                continue;
            };
            for coedge in lp.coedges {
                let Some(c) = self.coedges.remove(coedge) else {
                    continue;
                };
                let orphan = match self.edges.get_mut(c.edge) {
                    Some(edge) => {
                        edge.coedges.retain(|x| *x != coedge);
                        edge.coedges.is_empty()
                    }
                    None => false,
                };
                if orphan {
                    self.delete_edge_and_orphans(c.edge);
                }
            }
        }
        Ok(())
    }

    fn delete_edge_and_orphans(&mut self, edge: EdgeId) {
        let Some(e) = self.edges.remove(edge) else {
            return;
        };
        for v in [e.start, e.end] {
            if !self.edges.values().any(|other| other.start == v || other.end == v) {
                self.vertices.remove(v);
            }
        }
    }

    /// Redirect every use of `drop` to `keep` and remove `drop`.
    pub fn merge_vertices(&mut self, keep: VertexId, drop: VertexId) -> Result<(), KernelError> {
        self.vertex(keep)?;
        self.vertex(drop)?;
        if keep == drop {
            return Ok(());
        }
        for edge in self.edges.values_mut() {
            if edge.start == drop {
                edge.start = keep;
            }
            if edge.end == drop {
                edge.end = keep;
            }
        }
        self.vertices.remove(drop);
        Ok(())
    }

    /// Make the coedges of `drop` use `keep` instead, then remove `drop`.
    /// The two edges must trace the same points; end vertices are merged.
    pub fn merge_edges(&mut self, keep: EdgeId, drop: EdgeId) -> Result<(), KernelError> {
        if keep == drop {
            return Ok(());
        }
        let (k_start, k_end, k_tangent) = {
            let e = self.edge(keep)?;
            (e.start, e.end, self.edge_tangent(keep, e.range.mid())?)
        };
        let (d_start, d_end, d_tangent, d_coedges) = {
            let e = self.edge(drop)?;
            (e.start, e.end, self.edge_tangent(drop, e.range.mid())?, e.coedges.clone())
        };
        let same_sense = k_tangent.dot(&d_tangent) > 0.0;
        for &c in &d_coedges {
            let coedge = &mut self.coedges[c];
            coedge.edge = keep;
            if !same_sense {
                coedge.forward = !coedge.forward;
            }
        }
        self.edges[keep].coedges.extend(d_coedges);
        self.edges.remove(drop);
        let (to_start, to_end) = if same_sense { (d_start, d_end) } else { (d_end, d_start) };
        if to_start != k_start && self.vertices.contains_key(to_start) {
            self.merge_vertices(k_start, to_start)?;
        }
        if to_end != k_end && self.vertices.contains_key(to_end) {
            self.merge_vertices(k_end, to_end)?;
        }
        Ok(())
    }

    // ─── Edge / Coedge Queries ──────────────────────────────────────────────

    pub fn edge_position(&self, edge: EdgeId, t: f64) -> Result<Point3, KernelError> {
        Ok(self.edge(edge)?.curve.position(t))
    }

    /// Unit tangent along the edge curve direction.
    pub fn edge_tangent(&self, edge: EdgeId, t: f64) -> Result<Vec3, KernelError> {
        self.edge(edge)?
            .curve
            .tangent(t)
            .ok_or_else(|| KernelError::Degenerate {
                reason: "edge tangent vanishes".into(),
            })
    }

    pub fn edge_param_of(&self, edge: EdgeId, p: &Point3) -> Result<f64, KernelError> {
        let e = self.edge(edge)?;
        Ok(e.curve.param_of_near(p, e.range.mid()))
    }

    pub fn edge_bounded_curve(&self, edge: EdgeId) -> Result<BoundedCurve, KernelError> {
        let e = self.edge(edge)?;
        Ok(BoundedCurve::new(e.curve.clone(), e.range))
    }

    pub fn edge_length(&self, edge: EdgeId) -> Result<f64, KernelError> {
        let bc = self.edge_bounded_curve(edge)?;
        Ok(if bc.curve.is_straight() {
            bc.range.length()
        } else {
            bc.approximate_length(64)
        })
    }

    /// Parameter of `p` on `edge` when `p` lies on the edge within `tol`.
    pub fn point_on_edge(&self, edge: EdgeId, p: &Point3, tol: f64) -> Result<Option<f64>, KernelError> {
        let e = self.edge(edge)?;
        let t = e.curve.param_of_near(p, e.range.mid());
        let tol = tol.max(e.tolerance.unwrap_or(0.0));
        let speed = e.curve.derivative(t).norm().max(1e-12);
        let on = nalgebra::distance(&e.curve.position(t), p) < tol && e.range.contains(t, tol / speed);
        Ok(on.then(|| e.range.clamp(t)))
    }

    pub fn coedge_start(&self, coedge: CoedgeId) -> Result<VertexId, KernelError> {
        let c = self.coedge(coedge)?;
        let e = self.edge(c.edge)?;
        Ok(if c.forward { e.start } else { e.end })
    }

    pub fn coedge_end(&self, coedge: CoedgeId) -> Result<VertexId, KernelError> {
        let c = self.coedge(coedge)?;
        let e = self.edge(c.edge)?;
        Ok(if c.forward { e.end } else { e.start })
    }

    pub fn coedge_face(&self, coedge: CoedgeId) -> Result<FaceId, KernelError> {
        let c = self.coedge(coedge)?;
        Ok(self.loop_data(c.loop_id)?.face)
    }

    /// The other coedge on the same edge, if the edge is two-sided.
    pub fn partner(&self, coedge: CoedgeId) -> Result<Option<CoedgeId>, KernelError> {
        let c = self.coedge(coedge)?;
        Ok(self.edge(c.edge)?.coedges.iter().copied().find(|x| *x != coedge))
    }

    /// Unit tangent of the coedge in its own sense of travel.
    pub fn coedge_tangent(&self, coedge: CoedgeId, t: f64) -> Result<Vec3, KernelError> {
        let c = self.coedge(coedge)?;
        let tangent = self.edge_tangent(c.edge, t)?;
        Ok(if c.forward { tangent } else { -tangent })
    }

    /// The coedge of `edge` running with the edge direction, and the one against.
    pub fn edge_coedge_pair(&self, edge: EdgeId) -> Result<(Option<CoedgeId>, Option<CoedgeId>), KernelError> {
        let e = self.edge(edge)?;
        let mut fwd = None;
        let mut bwd = None;
        for &c in &e.coedges {
            if self.coedge(c)?.forward {
                fwd.get_or_insert(c);
            } else {
                bwd.get_or_insert(c);
            }
        }
        Ok((fwd, bwd))
    }

    /// Next coedge into the end vertex of `coedge`: the partner of the coedge
    /// that follows it in its loop.
    pub fn next_around_vertex(&self, coedge: CoedgeId) -> Result<Option<CoedgeId>, KernelError> {
        let next = self.coedge(coedge)?.next;
        self.partner(next)
    }

    /// Coedges ending at the end vertex of `start`, in fan order, beginning
    /// with `start`. Stops at an open boundary.
    pub fn vertex_fan(&self, start: CoedgeId) -> Result<Vec<CoedgeId>, KernelError> {
        let mut fan = vec![start];
        let mut current = start;
        while let Some(next) = self.next_around_vertex(current)? {
            if next == start || fan.len() > self.coedges.len() {
                break;
            }
            fan.push(next);
            current = next;
        }
        Ok(fan)
    }

    // ─── Vertex / Face Queries ──────────────────────────────────────────────

    pub fn vertex_point(&self, vertex: VertexId) -> Result<Point3, KernelError> {
        Ok(self.vertex(vertex)?.point)
    }

    pub fn vertex_edges(&self, vertex: VertexId) -> Vec<EdgeId> {
        self.edges
            .iter()
            .filter(|(_, e)| e.start == vertex || e.end == vertex)
            .map(|(id, _)| id)
            .collect()
    }

    /// A coedge of `edge` whose end vertex is `vertex`.
    pub fn coedge_into_vertex(&self, edge: EdgeId, vertex: VertexId) -> Result<Option<CoedgeId>, KernelError> {
        for &c in &self.edge(edge)?.coedges {
            if self.coedge_end(c)? == vertex {
                return Ok(Some(c));
            }
        }
        Ok(None)
    }

    pub fn face_coedges(&self, face: FaceId) -> Result<Vec<CoedgeId>, KernelError> {
        let mut out = Vec::new();
        for &l in &self.face(face)?.loops {
            out.extend(self.loop_data(l)?.coedges.iter().copied());
        }
        Ok(out)
    }

    pub fn face_edges(&self, face: FaceId) -> Result<Vec<EdgeId>, KernelError> {
        self.face_coedges(face)?
            .into_iter()
            .map(|c| Ok(self.coedge(c)?.edge))
            .collect()
    }

    pub fn face_vertices(&self, face: FaceId) -> Result<Vec<VertexId>, KernelError> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for c in self.face_coedges(face)? {
            let v = self.coedge_start(c)?;
            if seen.insert(v) {
                out.push(v);
            }
        }
        Ok(out)
    }

    pub fn edge_faces(&self, edge: EdgeId) -> Result<Vec<FaceId>, KernelError> {
        self.edge(edge)?
            .coedges
            .iter()
            .map(|&c| self.coedge_face(c))
            .collect()
    }

    /// Outward face normal at the foot of `p`.
    pub fn face_normal(&self, face: FaceId, p: &Point3) -> Result<Vec3, KernelError> {
        let f = self.face(face)?;
        let n = f.surface.foot_point(p).normal;
        Ok(if f.reversed { -n } else { n })
    }

    /// Surface of `face` oriented so its normal is the outward face normal.
    pub fn face_surface(&self, face: FaceId) -> Result<Surface, KernelError> {
        let f = self.face(face)?;
        if !f.reversed {
            return Ok(f.surface.clone());
        }
        Ok(match &f.surface {
            Surface::Plane(p) => Surface::Plane(crate::geometry::surfaces::Plane {
                normal: -p.normal,
                v_axis: -p.v_axis,
                ..*p
            }),
            other => {
                return Err(KernelError::Unsupported {
                    operation: "reversed face surface",
                    first: other.surface_type_name(),
                    second: "Face",
                })
            }
        })
    }

    /// Surface of `face` together with the face's sense.
    pub fn oriented_surface(&self, face: FaceId) -> Result<OrientedSurface, KernelError> {
        let f = self.face(face)?;
        Ok(OrientedSurface::new(f.surface.clone(), f.reversed))
    }

    pub fn face_bounding_box(&self, face: FaceId) -> Result<BoundingBox, KernelError> {
        let mut bb = BoundingBox::empty();
        for c in self.face_coedges(face)? {
            for p in self.edge_bounded_curve(self.coedge(c)?.edge)?.sample(8) {
                bb.expand_to_include(&p);
            }
        }
        Ok(bb)
    }

    pub fn body_bounding_box(&self, body: BodyId) -> Result<BoundingBox, KernelError> {
        let mut bb = BoundingBox::empty();
        for &shell in &self.body(body)?.shells {
            for &face in &self.shell(shell)?.faces {
                bb = bb.union(&self.face_bounding_box(face)?);
            }
        }
        Ok(bb)
    }

    pub fn body_faces(&self, body: BodyId) -> Result<Vec<FaceId>, KernelError> {
        let mut out = Vec::new();
        for &shell in &self.body(body)?.shells {
            out.extend(self.shell(shell)?.faces.iter().copied());
        }
        Ok(out)
    }

    pub fn body_edges(&self, body: BodyId) -> Result<Vec<EdgeId>, KernelError> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for face in self.body_faces(body)? {
            for e in self.face_edges(face)? {
                if seen.insert(e) {
                    out.push(e);
                }
            }
        }
        Ok(out)
    }

    /// Closed polyline of one loop in its direction of travel.
    fn loop_polyline(&self, loop_id: LoopId) -> Result<Vec<Point3>, KernelError> {
        let mut pts = Vec::new();
        for &c in &self.loop_data(loop_id)?.coedges {
            let coedge = self.coedge(c)?;
            let bc = self.edge_bounded_curve(coedge.edge)?;
            let n = if bc.curve.is_straight() { 1 } else { 16 };
            let mut samples = bc.sample(n);
            if !coedge.forward {
                samples.reverse();
            }
            samples.pop();
            pts.extend(samples);
        }
        Ok(pts)
    }

    /// Classify `p` against the face by its boundary, in surface parameters.
    pub fn classify_point_in_face(
        &self,
        face: FaceId,
        p: &Point3,
        tol: f64,
    ) -> Result<PointFaceContainment, KernelError> {
        let f = self.face(face)?;
        if f.surface.signed_distance(p).abs() > tol {
            return Ok(PointFaceContainment::Outside);
        }
        for edge in self.face_edges(face)? {
            if self.point_on_edge(edge, p, tol)?.is_some() {
                return Ok(PointFaceContainment::Boundary);
            }
        }
        let (pu, pv) = f.surface.param_of(p);
        let mut winding = 0.0;
        for &l in &f.loops {
            let poly = self.loop_polyline(l)?;
            let uv = unwrap_params(&f.surface, &poly, pu);
            for i in 0..uv.len() {
                let a = (uv[i].0 - pu, uv[i].1 - pv);
                let b = (uv[(i + 1) % uv.len()].0 - pu, uv[(i + 1) % uv.len()].1 - pv);
                winding += (a.0 * b.1 - a.1 * b.0).atan2(a.0 * b.0 + a.1 * b.1);
            }
        }
        Ok(if winding.abs() > std::f64::consts::PI {
            PointFaceContainment::Inside
        } else {
            PointFaceContainment::Outside
        })
    }

    /// Euler characteristic `V - E + F` over one shell.
    pub fn euler_characteristic(&self, shell: ShellId) -> Result<i64, KernelError> {
        let shell = self.shell(shell)?;
        let mut edges = HashSet::new();
        let mut verts = HashSet::new();
        for &face in &shell.faces {
            for e in self.face_edges(face)? {
                edges.insert(e);
                let edge = self.edge(e)?;
                verts.insert(edge.start);
                verts.insert(edge.end);
            }
        }
        Ok(verts.len() as i64 - edges.len() as i64 + shell.faces.len() as i64)
    }

    /// JSON dump of the whole store, for diagnostics.
    pub fn snapshot_json(&self) -> Result<String, KernelError> {
        serde_json::to_string(self).map_err(|e| KernelError::Serialization(e.to_string()))
    }
}

/// Parameters of `points` on `surface`, with periodic `u` unwrapped into a
/// continuous run starting near `u_ref`.
fn unwrap_params(surface: &Surface, points: &[Point3], u_ref: f64) -> Vec<(f64, f64)> {
    let periodic = !matches!(surface, Surface::Plane(_));
    let mut out: Vec<(f64, f64)> = Vec::with_capacity(points.len());
    for p in points {
        let (mut u, v) = surface.param_of(p);
        if periodic {
            let prev = out.last().map(|q| q.0).unwrap_or(u_ref);
            u += std::f64::consts::TAU * ((prev - u) / std::f64::consts::TAU).round();
        }
        out.push((u, v));
    }
    out
}
