use std::collections::HashMap;
use std::f64::consts::TAU;

use tracing::{info, instrument};

use super::brep::*;
use crate::geometry::curves::{Circle3d, Curve};
use crate::geometry::interval::Interval;
use crate::geometry::surfaces::{Cylinder, Plane, Surface};
use crate::geometry::{newell_normal, Point3, Vec3};
use crate::KernelError;

/// Builds planar polygon faces into one shell, sharing edges between faces
/// that use the same vertex pair.
pub struct PolygonShellBuilder<'a> {
    store: &'a mut EntityStore,
    shell: ShellId,
    edges: HashMap<(VertexId, VertexId), EdgeId>,
}

impl<'a> PolygonShellBuilder<'a> {
    pub fn new(store: &'a mut EntityStore, shell: ShellId) -> Self {
        Self {
            store,
            shell,
            edges: HashMap::new(),
        }
    }

    /// Add a planar face bounded by `verts`, ordered counter-clockwise about
    /// the outward normal.
    pub fn face(&mut self, verts: &[VertexId]) -> Result<FaceId, KernelError> {
        let points: Vec<Point3> = verts
            .iter()
            .map(|&v| self.store.vertex_point(v))
            .collect::<Result<_, _>>()?;
        let plane = Plane::new(points[0], newell_normal(&points)).ok_or_else(|| KernelError::Degenerate {
            reason: "polygon face with zero area".into(),
        })?;
        let mut run = Vec::with_capacity(verts.len());
        for i in 0..verts.len() {
            let (a, b) = (verts[i], verts[(i + 1) % verts.len()]);
            run.push(self.edge(a, b)?);
        }
        self.store.add_face(self.shell, Surface::Plane(plane), false, &[run])
    }

    fn edge(&mut self, a: VertexId, b: VertexId) -> Result<(EdgeId, bool), KernelError> {
        if let Some(&e) = self.edges.get(&(b, a)) {
            return Ok((e, false));
        }
        let e = self.store.add_line_edge(a, b)?;
        self.edges.insert((a, b), e);
        Ok((e, true))
    }
}

/// Extrude a planar profile, counter-clockwise about +Z in the plane `z = base_z`,
/// by `height` along +Z into a closed solid.
#[instrument(skip(store, profile), fields(sides = profile.len()))]
pub fn make_prism(store: &mut EntityStore, profile: &[Point3], height: f64) -> Result<BodyId, KernelError> {
    if profile.len() < 3 || height <= 0.0 {
        return Err(KernelError::Degenerate {
            reason: "prism needs three profile points and a positive height".into(),
        });
    }
    info!(height, "creating prism primitive");
    let (body, shell) = store.add_body(BodyKind::Solid);
    let bottom: Vec<VertexId> = profile.iter().map(|p| store.add_vertex(*p)).collect();
    let top: Vec<VertexId> = profile
        .iter()
        .map(|p| store.add_vertex(p + Vec3::z() * height))
        .collect();

    let mut builder = PolygonShellBuilder::new(store, shell);
    let reversed_bottom: Vec<VertexId> = bottom.iter().rev().copied().collect();
    builder.face(&reversed_bottom)?;
    builder.face(&top)?;
    let n = profile.len();
    for i in 0..n {
        let j = (i + 1) % n;
        builder.face(&[bottom[i], bottom[j], top[j], top[i]])?;
    }
    Ok(body)
}

/// Axis-aligned block between two corners.
pub fn make_block(store: &mut EntityStore, min: Point3, max: Point3) -> Result<BodyId, KernelError> {
    let profile = [
        Point3::new(min.x, min.y, min.z),
        Point3::new(max.x, min.y, min.z),
        Point3::new(max.x, max.y, min.z),
        Point3::new(min.x, max.y, min.z),
    ];
    make_prism(store, &profile, max.z - min.z)
}

/// Upright cylinder on a base circle centred at `center`, with true circular
/// edges and a cylindrical side face.
#[instrument(skip(store), fields(center = ?[center.x, center.y, center.z]))]
pub fn make_cylinder(store: &mut EntityStore, center: Point3, radius: f64, height: f64) -> Result<BodyId, KernelError> {
    if radius <= 0.0 || height <= 0.0 {
        return Err(KernelError::Degenerate {
            reason: "cylinder needs a positive radius and height".into(),
        });
    }
    info!(radius, height, "creating cylinder primitive");
    let (body, shell) = store.add_body(BodyKind::Solid);
    let top_center = center + Vec3::z() * height;
    let circle = |c: Point3| {
        Circle3d::with_x_axis(c, Vec3::z(), Vec3::x(), radius).ok_or_else(|| KernelError::Degenerate {
            reason: "cylinder cap circle".into(),
        })
    };
    let full = Interval::new(0.0, TAU);

    let vb = store.add_vertex(center + Vec3::x() * radius);
    let vt = store.add_vertex(top_center + Vec3::x() * radius);
    let bottom_edge = store.add_edge(Curve::Circle(circle(center)?), full, vb, vb)?;
    let top_edge = store.add_edge(Curve::Circle(circle(top_center)?), full, vt, vt)?;

    let plane = |origin: Point3, normal: Vec3| {
        Plane::new(origin, normal).ok_or_else(|| KernelError::Degenerate {
            reason: "cylinder cap plane".into(),
        })
    };
    store.add_face(shell, Surface::Plane(plane(center, -Vec3::z())?), false, &[vec![(bottom_edge, false)]])?;
    store.add_face(shell, Surface::Plane(plane(top_center, Vec3::z())?), false, &[vec![(top_edge, true)]])?;
    let mut side = Cylinder::new(center, Vec3::z(), radius).ok_or_else(|| KernelError::Degenerate {
        reason: "cylinder side".into(),
    })?;
    side.ref_dir = Vec3::x();
    store.add_face(
        shell,
        Surface::Cylinder(side),
        false,
        &[vec![(bottom_edge, true)], vec![(top_edge, false)]],
    )?;
    Ok(body)
}

/// Mark every vertex and edge of `body` tolerant with the given tolerance.
pub fn make_tolerant(store: &mut EntityStore, body: BodyId, tolerance: f64) -> Result<(), KernelError> {
    for e in store.body_edges(body)? {
        let (start, end) = {
            let edge = store.edge(e)?;
            (edge.start, edge.end)
        };
        store.edges[e].tolerance = Some(tolerance);
        for v in [start, end] {
            store.vertices[v].tolerance = Some(tolerance);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_topology() {
        let mut store = EntityStore::new();
        let body = make_block(&mut store, Point3::origin(), Point3::new(1.0, 2.0, 3.0)).unwrap();
        let shell = store.body(body).unwrap().shells[0];
        assert_eq!(store.shell(shell).unwrap().faces.len(), 6);
        assert_eq!(store.edges.len(), 12);
        assert_eq!(store.vertices.len(), 8);
        assert_eq!(store.euler_characteristic(shell).unwrap(), 2);
        for (_, e) in &store.edges {
            assert_eq!(e.coedges.len(), 2);
        }
    }

    #[test]
    fn test_block_normals_point_outward() {
        let mut store = EntityStore::new();
        let body = make_block(&mut store, Point3::origin(), Point3::new(2.0, 2.0, 2.0)).unwrap();
        let center = Point3::new(1.0, 1.0, 1.0);
        for face in store.body_faces(body).unwrap() {
            let verts = store.face_vertices(face).unwrap();
            let p = store.vertex_point(verts[0]).unwrap();
            let n = store.face_normal(face, &p).unwrap();
            assert!(n.dot(&(p - center)) > 0.0);
        }
    }

    #[test]
    fn test_partners_run_opposite() {
        let mut store = EntityStore::new();
        make_block(&mut store, Point3::origin(), Point3::new(1.0, 1.0, 1.0)).unwrap();
        for (_, e) in &store.edges {
            let a = store.coedge(e.coedges[0]).unwrap().forward;
            let b = store.coedge(e.coedges[1]).unwrap().forward;
            assert_ne!(a, b);
        }
    }

    #[test]
    fn test_vertex_fan_of_block_corner() {
        let mut store = EntityStore::new();
        make_block(&mut store, Point3::origin(), Point3::new(1.0, 1.0, 1.0)).unwrap();
        let (_, e) = store.edges.iter().next().unwrap();
        let fan = store.vertex_fan(e.coedges[0]).unwrap();
        assert_eq!(fan.len(), 3);
    }

    #[test]
    fn test_cylinder_faces() {
        let mut store = EntityStore::new();
        let body = make_cylinder(&mut store, Point3::origin(), 1.0, 2.0).unwrap();
        assert_eq!(store.body_faces(body).unwrap().len(), 3);
        assert_eq!(store.edges.len(), 2);
        for (_, e) in &store.edges {
            assert_eq!(e.coedges.len(), 2);
        }
    }

    #[test]
    fn test_make_tolerant() {
        let mut store = EntityStore::new();
        let body = make_block(&mut store, Point3::origin(), Point3::new(1.0, 1.0, 1.0)).unwrap();
        make_tolerant(&mut store, body, 1e-4).unwrap();
        assert!(store.edges.values().all(|e| e.tolerance == Some(1e-4)));
        assert!(store.vertices.values().all(|v| v.tolerance == Some(1e-4)));
    }
}
