//! Where a spring curve crosses the boundary of the faces it runs over.

use cad_kernel::topology::brep::{CoedgeId, EdgeId, FaceId, VertexId};
use cad_kernel::{EntityStore, Point3, Vec3};
use serde::{Deserialize, Serialize};

use crate::error::BlendResult;

/// How a spring curve meets a face boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SpringIntRel {
    #[default]
    Unknown,
    InFace,
    OnEdge,
    AtVertex,
    AlongEdge,
    OutFace,
}

impl SpringIntRel {
    /// Relations located by an edge parameter.
    pub fn uses_edge_par(self) -> bool {
        matches!(self, SpringIntRel::OnEdge | SpringIntRel::AlongEdge | SpringIntRel::AtVertex)
    }

    /// Relations located by face parameters.
    pub fn uses_face_pars(self) -> bool {
        matches!(self, SpringIntRel::InFace | SpringIntRel::OutFace)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
enum Param {
    #[default]
    None,
    Edge(f64),
    Face(f64, f64),
}

/// A crossing of a spring curve through the boundary of its support face,
/// as found by intersecting the spring with the faces around it.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceFaceInt {
    pub position: Point3,
    /// Parameter on the spring curve.
    pub spring_param: f64,
    /// The support face the spring runs over.
    pub face: FaceId,
    /// Boundary coedge of `face` crossed, if any.
    pub coedge: Option<CoedgeId>,
    pub edge_param: Option<f64>,
    pub vertex: Option<VertexId>,
    /// Spring direction at the crossing.
    pub direction: Option<Vec3>,
    pub tolerance: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Intercept {
    rel: SpringIntRel,
    face: Option<FaceId>,
    coedge: Option<CoedgeId>,
    edge: Option<EdgeId>,
    vertex: Option<VertexId>,
    param: Param,
    position: Point3,
    direction: Option<Vec3>,
    entering: Option<bool>,
    sheet_coedge: Option<CoedgeId>,
    tolerance: f64,
}

impl Default for Intercept {
    fn default() -> Self {
        Self {
            rel: SpringIntRel::Unknown,
            face: None,
            coedge: None,
            edge: None,
            vertex: None,
            param: Param::None,
            position: Point3::origin(),
            direction: None,
            entering: None,
            sheet_coedge: None,
            tolerance: 0.0,
        }
    }
}

impl Intercept {
    /// An intercept with nothing known about it.
    pub fn blank() -> Self {
        Self::default()
    }

    /// A crossing found directly in a face, or out of every face when `face`
    /// is `None`.
    pub fn from_position(
        position: Point3,
        face: Option<FaceId>,
        direction: Option<Vec3>,
        face_pars: Option<(f64, f64)>,
    ) -> Self {
        let rel = if face.is_some() { SpringIntRel::InFace } else { SpringIntRel::OutFace };
        Self {
            rel,
            face,
            position,
            direction,
            param: face_pars.map_or(Param::None, |(u, v)| Param::Face(u, v)),
            ..Self::default()
        }
    }

    /// From a face/face intersection record. `entering` says whether the
    /// spring runs into the support face here.
    pub fn from_face_face_int(ffi: &FaceFaceInt, entering: bool) -> Self {
        let (rel, param) = match (ffi.vertex, ffi.coedge, ffi.edge_param) {
            (Some(_), _, Some(t)) => (SpringIntRel::AtVertex, Param::Edge(t)),
            (Some(_), _, None) => (SpringIntRel::AtVertex, Param::None),
            (None, Some(_), Some(t)) => (SpringIntRel::OnEdge, Param::Edge(t)),
            _ => (SpringIntRel::InFace, Param::None),
        };
        Self {
            rel,
            face: Some(ffi.face),
            coedge: ffi.coedge,
            vertex: ffi.vertex,
            param,
            position: ffi.position,
            direction: ffi.direction,
            entering: Some(entering),
            tolerance: ffi.tolerance,
            ..Self::default()
        }
    }

    /// A crossing known to be on `coedge` at edge parameter `param`. Lands on
    /// a vertex when `position` is one of the coedge's ends.
    pub fn on_coedge(store: &EntityStore, coedge: CoedgeId, position: Point3, param: f64, tol: f64) -> BlendResult<Self> {
        let edge_id = store.coedge(coedge)?.edge;
        let edge = store.edge(edge_id)?;
        let mut tolerance = edge.tolerance.unwrap_or(0.0);
        let mut vertex = None;
        for v in [edge.start, edge.end] {
            let data = store.vertex(v)?;
            let reach = tol.max(data.tolerance.unwrap_or(0.0));
            if nalgebra::distance(&data.point, &position) < reach {
                vertex = Some(v);
                tolerance = tolerance.max(data.tolerance.unwrap_or(0.0));
            }
        }
        Ok(Self {
            rel: if vertex.is_some() { SpringIntRel::AtVertex } else { SpringIntRel::OnEdge },
            face: Some(store.coedge_face(coedge)?),
            coedge: Some(coedge),
            edge: Some(edge_id),
            vertex,
            param: Param::Edge(param),
            position,
            tolerance,
            ..Self::default()
        })
    }

    /// The spring runs along `coedge` rather than across it.
    pub fn along_coedge(store: &EntityStore, coedge: CoedgeId, position: Point3, param: f64) -> BlendResult<Self> {
        let edge = store.coedge(coedge)?.edge;
        Ok(Self {
            rel: SpringIntRel::AlongEdge,
            face: Some(store.coedge_face(coedge)?),
            coedge: Some(coedge),
            edge: Some(edge),
            param: Param::Edge(param),
            position,
            tolerance: store.edge(edge)?.tolerance.unwrap_or(0.0),
            ..Self::default()
        })
    }

    pub fn with_sheet_coedge(mut self, coedge: CoedgeId) -> Self {
        self.sheet_coedge = Some(coedge);
        self
    }

    pub fn with_edge(mut self, edge: EdgeId) -> Self {
        self.edge = Some(edge);
        self
    }

    pub fn rel(&self) -> SpringIntRel {
        self.rel
    }

    pub fn position(&self) -> Point3 {
        self.position
    }

    pub fn direction(&self) -> Option<Vec3> {
        self.direction
    }

    pub fn entering(&self) -> Option<bool> {
        self.entering
    }

    pub fn face(&self) -> Option<FaceId> {
        self.face
    }

    pub fn coedge(&self) -> Option<CoedgeId> {
        self.coedge
    }

    pub fn vertex(&self) -> Option<VertexId> {
        self.vertex
    }

    pub fn sheet_coedge(&self) -> Option<CoedgeId> {
        self.sheet_coedge
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    pub fn edge_par_set(&self) -> bool {
        matches!(self.param, Param::Edge(_))
    }

    pub fn face_pars_set(&self) -> bool {
        matches!(self.param, Param::Face(..))
    }

    /// Edge parameter, only for relations located on an edge.
    pub fn edge_par(&self) -> Option<f64> {
        match self.param {
            Param::Edge(t) if self.rel.uses_edge_par() => Some(t),
            _ => None,
        }
    }

    /// Face parameters, only for relations located in a face.
    pub fn face_pars(&self) -> Option<(f64, f64)> {
        match self.param {
            Param::Face(u, v) if self.rel.uses_face_pars() => Some((u, v)),
            _ => None,
        }
    }

    /// Sits on an entity with its own tolerance.
    pub fn tolerant(&self) -> bool {
        self.tolerance > 0.0
    }

    /// The model edge crossed, resolving it from the coedge if needed.
    pub fn edge(&self, store: &EntityStore) -> Option<EdgeId> {
        self.edge
            .or_else(|| self.coedge.and_then(|c| store.coedge(c).ok().map(|c| c.edge)))
    }

    /// Whether `face` touches this intercept.
    pub fn is_lateral_face(&self, store: &EntityStore, face: FaceId) -> bool {
        if self.face == Some(face) {
            return true;
        }
        match self.rel {
            SpringIntRel::OnEdge | SpringIntRel::AlongEdge => self
                .edge(store)
                .and_then(|e| store.edge_faces(e).ok())
                .is_some_and(|faces| faces.contains(&face)),
            SpringIntRel::AtVertex => self.vertex.is_some_and(|v| {
                store
                    .vertex_edges(v)
                    .into_iter()
                    .filter_map(|e| store.edge_faces(e).ok())
                    .any(|faces| faces.contains(&face))
            }),
            _ => false,
        }
    }

    fn reach(&self, other: &Intercept, tol: f64) -> f64 {
        tol.max(self.tolerance).max(other.tolerance)
    }

    /// Whether two intercepts found by neighbouring blends lie on the same
    /// boundary between supports, walking round `blank_vertex` (or the vertex
    /// the two boundary edges share) in the given sense. Answers whether this
    /// one is the farther from that vertex, or `None` when not adjacent.
    pub fn adjacent(
        &self,
        other: &Intercept,
        store: &EntityStore,
        search_clockwise: bool,
        blank_vertex: Option<VertexId>,
    ) -> Option<bool> {
        if !self.rel.uses_edge_par() || !other.rel.uses_edge_par() {
            return None;
        }
        if let (Some(a), Some(b)) = (self.vertex, other.vertex) {
            if a == b {
                return Some(false);
            }
        }
        let (ea, eb) = (self.edge(store)?, other.edge(store)?);
        let vertex = match blank_vertex {
            Some(v) => v,
            None => shared_vertex(store, ea, eb)?,
        };
        let origin = store.vertex_point(vertex).ok()?;
        let farther = nalgebra::distance(&self.position, &origin) > nalgebra::distance(&other.position, &origin);
        if ea == eb {
            return Some(farther);
        }
        let into = store.coedge_into_vertex(ea, vertex).ok()??;
        let mut fan: Vec<EdgeId> = store
            .vertex_fan(into)
            .ok()?
            .into_iter()
            .filter_map(|c| store.coedge(c).ok().map(|c| c.edge))
            .collect();
        if search_clockwise {
            fan[1..].reverse();
        }
        (fan.get(1) == Some(&eb)).then_some(farther)
    }

    /// Whether two intercepts land at the same boundary point.
    pub fn coincident(&self, other: &Intercept, store: &EntityStore, tol: f64) -> bool {
        if nalgebra::distance(&self.position, &other.position) >= self.reach(other, tol) {
            return false;
        }
        match (self.rel, other.rel) {
            (SpringIntRel::AtVertex, SpringIntRel::AtVertex) => self.vertex == other.vertex,
            (a, b) if a.uses_edge_par() && b.uses_edge_par() => {
                self.edge(store) == other.edge(store) || self.vertex.is_some() || other.vertex.is_some()
            }
            _ => true,
        }
    }

    /// Whether a neighbouring blend's sheet has been matched here, crossing
    /// the boundary in the cross-section through `spine_pos`.
    pub fn at_bi_blend(&self, spine_pos: &Point3, tol: f64) -> bool {
        if self.sheet_coedge.is_none() || !self.rel.uses_edge_par() {
            return false;
        }
        self.direction
            .is_some_and(|d| d.dot(&(self.position - spine_pos)).abs() < tol.max(self.tolerance))
    }

    /// Fill whatever this intercept lacks from `other`, found for the same
    /// crossing by a neighbouring blend.
    pub fn copy_blank_info(&mut self, other: &Intercept) {
        if self.rel == SpringIntRel::Unknown {
            self.rel = other.rel;
            self.param = other.param;
            self.coedge = other.coedge;
            self.edge = other.edge;
            self.vertex = other.vertex;
            self.position = other.position;
        }
        self.face = self.face.or(other.face);
        self.sheet_coedge = self.sheet_coedge.or(other.sheet_coedge);
        self.direction = self.direction.or(other.direction);
        self.tolerance = self.tolerance.max(other.tolerance);
    }
}

fn shared_vertex(store: &EntityStore, a: EdgeId, b: EdgeId) -> Option<VertexId> {
    let (ea, eb) = (store.edge(a).ok()?, store.edge(b).ok()?);
    [ea.start, ea.end]
        .into_iter()
        .find(|v| *v == eb.start || *v == eb.end)
}

/// The crossings along one side of a segment, in spring order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Segside {
    incpts: Vec<Intercept>,
    cur_null: bool,
}

impl Segside {
    /// `cur_null` says whether the pattern starts with a gap rather than a
    /// stretch of curve inside the face.
    pub fn new(incpts: Vec<Intercept>, cur_null: bool) -> Self {
        Self { incpts, cur_null }
    }

    pub fn n_incpts(&self) -> usize {
        self.incpts.len()
    }

    pub fn incpts(&self) -> &[Intercept] {
        &self.incpts
    }

    pub fn cur_null(&self) -> bool {
        self.cur_null
    }

    /// Whether the stretch after intercept `i` (or before the first, for
    /// `None`) is a curve portion.
    pub fn curve_after(&self, i: Option<usize>) -> bool {
        let index = i.map_or(0, |i| i + 1);
        (index % 2 == 0) != self.cur_null
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cad_kernel::topology::primitives::make_block;

    fn block() -> EntityStore {
        let mut store = EntityStore::new();
        make_block(&mut store, Point3::origin(), Point3::new(2.0, 2.0, 2.0)).unwrap();
        store
    }

    #[test]
    fn test_field_access_follows_relation() {
        let store = block();
        let (_, e) = store.edges.iter().next().unwrap();
        let coedge = e.coedges[0];
        let mid = store.edge_bounded_curve(store.coedge(coedge).unwrap().edge).unwrap();
        let on = Intercept::on_coedge(&store, coedge, mid.mid(), mid.range.mid(), 1e-6).unwrap();
        assert_eq!(on.rel(), SpringIntRel::OnEdge);
        assert!(on.edge_par().is_some());
        assert!(on.face_pars().is_none());

        let inside = Intercept::from_position(Point3::new(1.0, 1.0, 2.0), on.face(), None, Some((0.5, 0.5)));
        assert_eq!(inside.face_pars(), Some((0.5, 0.5)));
        assert!(inside.edge_par().is_none());
        assert!(!inside.tolerant());

        let blank = Intercept::blank();
        assert!(blank.edge_par().is_none() && blank.face_pars().is_none());
    }

    #[test]
    fn test_on_coedge_at_end_is_at_vertex() {
        let store = block();
        let (_, e) = store.edges.iter().next().unwrap();
        let coedge = e.coedges[0];
        let p = store.vertex_point(e.start).unwrap();
        let i = Intercept::on_coedge(&store, coedge, p, e.range.low(), 1e-6).unwrap();
        assert_eq!(i.rel(), SpringIntRel::AtVertex);
        assert_eq!(i.vertex(), Some(e.start));
    }

    #[test]
    fn test_adjacent_on_same_edge_reports_farther() {
        let store = block();
        let (_, e) = store.edges.iter().next().unwrap();
        let curve = store.edge_bounded_curve(store.coedge(e.coedges[0]).unwrap().edge).unwrap();
        let near = curve.curve.position(curve.range.interpolate(0.25));
        let far = curve.curve.position(curve.range.interpolate(0.5));
        let a = Intercept::on_coedge(&store, e.coedges[0], far, curve.range.interpolate(0.5), 1e-6).unwrap();
        let b = Intercept::on_coedge(&store, e.coedges[1], near, curve.range.interpolate(0.25), 1e-6).unwrap();
        assert_eq!(a.adjacent(&b, &store, false, Some(e.start)), Some(true));
        assert_eq!(b.adjacent(&a, &store, false, Some(e.start)), Some(false));
        assert!(!a.coincident(&b, &store, 1e-6));
        assert!(a.coincident(&a.clone(), &store, 1e-6));
    }

    #[test]
    fn test_copy_blank_info_fills_missing_fields() {
        let store = block();
        let (_, e) = store.edges.iter().next().unwrap();
        let p = store.vertex_point(e.end).unwrap();
        let known = Intercept::on_coedge(&store, e.coedges[0], p, e.range.high(), 1e-6).unwrap();
        let mut blank = Intercept::blank();
        blank.copy_blank_info(&known);
        assert_eq!(blank.rel(), SpringIntRel::AtVertex);
        assert_eq!(blank.edge_par(), known.edge_par());
        assert!(blank.is_lateral_face(&store, known.face().unwrap()));
    }

    #[test]
    fn test_segside_curve_pattern() {
        let side = Segside::new(vec![Intercept::blank(), Intercept::blank()], false);
        assert_eq!(side.n_incpts(), 2);
        assert!(side.curve_after(None));
        assert!(!side.curve_after(Some(0)));
        assert!(side.curve_after(Some(1)));
        let gapped = Segside::new(vec![Intercept::blank()], true);
        assert!(!gapped.curve_after(None));
    }
}
