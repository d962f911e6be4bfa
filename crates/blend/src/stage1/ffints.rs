//! Where the spring curves leave and re-enter their support faces.

use cad_kernel::geometry::intersection::intersect_curve_surface;
use cad_kernel::topology::brep::{CoedgeId, EdgeId, FaceId, PointFaceContainment};
use cad_kernel::{BoundedCurve, EntityStore, Point3, Tolerance, Vec3};
use tracing::{debug, instrument};

use crate::error::BlendResult;
use crate::intercept::{FaceFaceInt, Intercept, Segside};

/// Crossings of one spring through the boundary of its support face, in
/// spring order, with whether each stretch between them lies in the face.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SpringCrossings {
    pub spring: BoundedCurve,
    pub ffis: Vec<FaceFaceInt>,
    /// One more entry than `ffis`: the stretch before each crossing, then
    /// the stretch after the last.
    pub inside: Vec<bool>,
}

impl SpringCrossings {
    pub fn fully_inside(&self) -> bool {
        self.ffis.is_empty() && self.inside.first().copied().unwrap_or(false)
    }

    /// Fraction along the spring at which crossing `i` lies.
    pub fn fraction(&self, i: usize) -> f64 {
        let range = self.spring.range;
        if range.length() <= 0.0 {
            return 0.0;
        }
        (self.ffis[i].spring_param - range.low()) / range.length()
    }

    pub fn segside(&self) -> Segside {
        let incpts = self
            .ffis
            .iter()
            .enumerate()
            .map(|(i, ffi)| Intercept::from_face_face_int(ffi, self.inside[i + 1]))
            .collect();
        Segside::new(incpts, !self.inside[0])
    }
}

pub(crate) fn coedge_in_face(store: &EntityStore, edge: EdgeId, face: FaceId) -> BlendResult<Option<CoedgeId>> {
    for &c in &store.edge(edge)?.coedges {
        if store.coedge_face(c)? == face {
            return Ok(Some(c));
        }
    }
    Ok(None)
}

/// Whether a point of a spring counts as lying in `face`. Curved faces are
/// judged by their box only.
pub(crate) fn in_face(store: &EntityStore, face: FaceId, p: &Point3, tol: &Tolerance) -> BlendResult<bool> {
    let surface = &store.face(face)?.surface;
    if surface.is_planar() {
        let class = store.classify_point_in_face(face, p, tol.resfit)?;
        return Ok(class != PointFaceContainment::Outside);
    }
    Ok(surface.signed_distance(p).abs() < tol.resfit && store.face_bounding_box(face)?.contains_point(p, tol.resfit))
}

/// Sort crossings along the spring and merge those closer than the parameter
/// resolution, keeping one that lands on a vertex where there is one.
/// Crossings at the very ends of the spring are dropped.
pub(crate) fn standardise_ffi_list(list: &mut Vec<FaceFaceInt>, spring: &BoundedCurve, tol: &Tolerance) {
    let speed = spring.curve.derivative(spring.range.mid()).norm();
    let respar = tol.param_resolution(speed);
    list.retain(|f| {
        f.spring_param > spring.range.low() + respar && f.spring_param < spring.range.high() - respar
    });
    list.sort_by(|a, b| a.spring_param.total_cmp(&b.spring_param));
    let mut merged: Vec<FaceFaceInt> = Vec::with_capacity(list.len());
    for ffi in list.drain(..) {
        match merged.last_mut() {
            Some(last) if (ffi.spring_param - last.spring_param).abs() < respar => {
                if last.vertex.is_none() && ffi.vertex.is_some() {
                    *last = ffi;
                }
            }
            _ => merged.push(ffi),
        }
    }
    *list = merged;
}

/// Intersect `spring`, lying on `face`, with the faces across each boundary
/// edge of `face` other than the blended `skip_edge`, and classify the
/// stretches between the crossings.
#[instrument(skip(store, spring, tol), fields(face = ?face))]
pub(crate) fn process_ffints(
    store: &EntityStore,
    face: FaceId,
    skip_edge: Option<EdgeId>,
    spring: &BoundedCurve,
    tol: &Tolerance,
) -> BlendResult<SpringCrossings> {
    let mut ffis = Vec::new();
    for edge in store.face_edges(face)? {
        if Some(edge) == skip_edge {
            continue;
        }
        let Some(coedge) = coedge_in_face(store, edge, face)? else {
            continue;
        };
        let data = store.edge(edge)?;
        for partner in store.edge_faces(edge)? {
            if partner == face {
                continue;
            }
            let surface = &store.face(partner)?.surface;
            for hit in intersect_curve_surface(&spring.curve, spring.range, surface, tol.resabs) {
                let Some(edge_param) = store.point_on_edge(edge, &hit.point, tol.resabs)? else {
                    continue;
                };
                let vertex = [data.start, data.end].into_iter().find(|v| {
                    store
                        .vertex(*v)
                        .is_ok_and(|d| nalgebra::distance(&d.point, &hit.point) < tol.resabs.max(d.tolerance.unwrap_or(0.0)))
                });
                ffis.push(FaceFaceInt {
                    position: hit.point,
                    spring_param: hit.param,
                    face,
                    coedge: Some(coedge),
                    edge_param: Some(edge_param),
                    vertex,
                    direction: spring.curve.tangent(hit.param),
                    tolerance: data.tolerance.unwrap_or(0.0),
                });
            }
        }
    }
    standardise_ffi_list(&mut ffis, spring, tol);

    let mut bounds = vec![spring.range.low()];
    bounds.extend(ffis.iter().map(|f| f.spring_param));
    bounds.push(spring.range.high());
    let mut inside = Vec::with_capacity(bounds.len() - 1);
    for pair in bounds.windows(2) {
        let mid = spring.curve.position(0.5 * (pair[0] + pair[1]));
        inside.push(in_face(store, face, &mid, tol)?);
    }

    // A crossing with the face on both sides only touches the boundary.
    let mut i = 0;
    while i < ffis.len() {
        if inside[i] == inside[i + 1] {
            ffis.remove(i);
            inside.remove(i + 1);
        } else {
            i += 1;
        }
    }
    debug!(crossings = ffis.len(), starts_inside = inside[0], "spring crossings");
    Ok(SpringCrossings {
        spring: spring.clone(),
        ffis,
        inside,
    })
}

/// Intercept for a spring end at `p`: on a boundary edge of `face` if it
/// lands on one, otherwise inside the face.
pub(crate) fn spring_end_incpt(
    store: &EntityStore,
    face: FaceId,
    skip_edge: Option<EdgeId>,
    p: Point3,
    direction: Option<Vec3>,
    tol: &Tolerance,
) -> BlendResult<Intercept> {
    for edge in store.face_edges(face)? {
        if Some(edge) == skip_edge {
            continue;
        }
        if let Some(t) = store.point_on_edge(edge, &p, tol.resabs)? {
            if let Some(coedge) = coedge_in_face(store, edge, face)? {
                return Intercept::on_coedge(store, coedge, p, t, tol.resabs);
            }
        }
    }
    let uv = store.face(face)?.surface.param_of(&p);
    Ok(Intercept::from_position(p, Some(face), direction, Some(uv)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intercept::SpringIntRel;
    use cad_kernel::topology::primitives::{make_block, make_prism};
    use cad_kernel::Surface;

    /// The horizontal planar face at height `z`.
    fn top_face(store: &EntityStore, z: f64) -> FaceId {
        store
            .faces
            .iter()
            .find(|(_, f)| match &f.surface {
                Surface::Plane(p) => p.normal.z.abs() > 0.5 && p.signed_distance(&Point3::new(0.0, 0.0, z)).abs() < 1e-9,
                _ => false,
            })
            .map(|(id, _)| id)
            .unwrap()
    }

    fn line(a: [f64; 3], b: [f64; 3]) -> BoundedCurve {
        BoundedCurve::segment(Point3::new(a[0], a[1], a[2]), Point3::new(b[0], b[1], b[2])).unwrap()
    }

    #[test]
    fn test_spring_inside_face_has_no_crossings() {
        let mut store = EntityStore::new();
        make_block(&mut store, Point3::origin(), Point3::new(4.0, 4.0, 4.0)).unwrap();
        let top = top_face(&store, 4.0);
        let crossings = process_ffints(&store, top, None, &line([0.5, 1.0, 4.0], [3.5, 1.0, 4.0]), &Tolerance::default()).unwrap();
        assert!(crossings.fully_inside());
        let side = crossings.segside();
        assert_eq!(side.n_incpts(), 0);
        assert!(side.curve_after(None));
    }

    #[test]
    fn test_spring_running_off_a_notched_face() {
        // L-shaped top face: the line y = 3 leaves it at x = 2.
        let mut store = EntityStore::new();
        let profile = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(4.0, 0.0, 0.0),
            Point3::new(4.0, 2.0, 0.0),
            Point3::new(2.0, 2.0, 0.0),
            Point3::new(2.0, 4.0, 0.0),
            Point3::new(0.0, 4.0, 0.0),
        ];
        make_prism(&mut store, &profile, 3.0).unwrap();
        let top = top_face(&store, 3.0);
        let tol = Tolerance::default();
        let crossings = process_ffints(&store, top, None, &line([0.5, 3.0, 3.0], [3.5, 3.0, 3.0]), &tol).unwrap();
        assert_eq!(crossings.ffis.len(), 1);
        assert_eq!(crossings.inside, vec![true, false]);
        approx::assert_relative_eq!(crossings.ffis[0].position.x, 2.0, epsilon = 1e-9);
        approx::assert_relative_eq!(crossings.fraction(0), 0.5, epsilon = 1e-9);
        let side = crossings.segside();
        assert!(side.curve_after(None));
        assert!(!side.curve_after(Some(0)));
        assert_eq!(side.incpts()[0].rel(), SpringIntRel::OnEdge);
        assert_eq!(side.incpts()[0].entering(), Some(false));
    }

    #[test]
    fn test_spring_through_corner_keeps_the_vertex() {
        let mut store = EntityStore::new();
        let profile = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(4.0, 0.0, 0.0),
            Point3::new(4.0, 2.0, 0.0),
            Point3::new(2.0, 2.0, 0.0),
            Point3::new(2.0, 4.0, 0.0),
            Point3::new(0.0, 4.0, 0.0),
        ];
        make_prism(&mut store, &profile, 3.0).unwrap();
        let top = top_face(&store, 3.0);
        // Through the re-entrant corner (2, 2): inside before, outside after.
        let crossings =
            process_ffints(&store, top, None, &line([1.0, 1.0, 3.0], [3.0, 3.0, 3.0]), &Tolerance::default()).unwrap();
        assert_eq!(crossings.ffis.len(), 1);
        assert!(crossings.ffis[0].vertex.is_some());
        assert_eq!(crossings.segside().incpts()[0].rel(), SpringIntRel::AtVertex);
    }

    #[test]
    fn test_standardise_merges_and_drops_ends() {
        let spring = line([0.0, 0.0, 0.0], [4.0, 0.0, 0.0]);
        let mut store = EntityStore::new();
        make_block(&mut store, Point3::origin(), Point3::new(1.0, 1.0, 1.0)).unwrap();
        let face = store.faces.keys().next().unwrap();
        let ffi = |t: f64| FaceFaceInt {
            position: Point3::new(t, 0.0, 0.0),
            spring_param: t,
            face,
            coedge: None,
            edge_param: None,
            vertex: None,
            direction: None,
            tolerance: 0.0,
        };
        let mut list = vec![ffi(3.0), ffi(0.0), ffi(1.0), ffi(1.0 + 1e-9), ffi(4.0)];
        standardise_ffi_list(&mut list, &spring, &Tolerance::default());
        let params: Vec<f64> = list.iter().map(|f| f.spring_param).collect();
        assert_eq!(params, vec![1.0, 3.0]);
    }

    #[test]
    fn test_spring_end_on_boundary_edge() {
        let mut store = EntityStore::new();
        make_block(&mut store, Point3::origin(), Point3::new(4.0, 4.0, 4.0)).unwrap();
        let top = top_face(&store, 4.0);
        let tol = Tolerance::default();
        let on_edge = spring_end_incpt(&store, top, None, Point3::new(0.0, 1.0, 4.0), None, &tol).unwrap();
        assert_eq!(on_edge.rel(), SpringIntRel::OnEdge);
        let inside = spring_end_incpt(&store, top, None, Point3::new(2.0, 1.0, 4.0), Some(Vec3::x()), &tol).unwrap();
        assert_eq!(inside.rel(), SpringIntRel::InFace);
        assert!(inside.face_pars().is_some());
    }
}
