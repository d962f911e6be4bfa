use serde::{Deserialize, Serialize};

use super::{any_perpendicular, unit, Point3, Vec3};

/// All surface types the kernel evaluates. Every variant carries an outward
/// parametric normal; faces flip it with their `reversed` flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Surface {
    Plane(Plane),
    Cylinder(Cylinder),
    Cone(Cone),
    Sphere(Sphere),
    Torus(Torus),
}

/// The closest point of a surface to some query point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfacePoint {
    pub point: Point3,
    pub normal: Vec3,
    pub uv: (f64, f64),
}

/// An infinite plane.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Plane {
    pub origin: Point3,
    pub normal: Vec3,
    pub u_axis: Vec3,
    pub v_axis: Vec3,
}

impl Plane {
    pub fn new(origin: Point3, normal: Vec3) -> Option<Self> {
        let normal = unit(&normal)?;
        let u_axis = any_perpendicular(&normal);
        Some(Self {
            origin,
            normal,
            u_axis,
            v_axis: normal.cross(&u_axis),
        })
    }

    pub fn position(&self, u: f64, v: f64) -> Point3 {
        self.origin + self.u_axis * u + self.v_axis * v
    }

    pub fn signed_distance(&self, p: &Point3) -> f64 {
        (p - self.origin).dot(&self.normal)
    }

    pub fn project_point(&self, p: &Point3) -> Point3 {
        p - self.normal * self.signed_distance(p)
    }

    pub fn param_of(&self, p: &Point3) -> (f64, f64) {
        let v = p - self.origin;
        (v.dot(&self.u_axis), v.dot(&self.v_axis))
    }
}

/// A cylinder, infinite along its axis. `u` is the angle, `v` the height.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Cylinder {
    pub origin: Point3,
    pub axis: Vec3,
    pub radius: f64,
    pub ref_dir: Vec3,
}

impl Cylinder {
    pub fn new(origin: Point3, axis: Vec3, radius: f64) -> Option<Self> {
        let axis = unit(&axis)?;
        Some(Self {
            origin,
            axis,
            radius,
            ref_dir: any_perpendicular(&axis),
        })
    }

    fn y_dir(&self) -> Vec3 {
        self.axis.cross(&self.ref_dir)
    }

    pub fn position(&self, u: f64, v: f64) -> Point3 {
        self.origin
            + (self.ref_dir * u.cos() + self.y_dir() * u.sin()) * self.radius
            + self.axis * v
    }

    pub fn normal_at(&self, u: f64, _v: f64) -> Vec3 {
        self.ref_dir * u.cos() + self.y_dir() * u.sin()
    }

    /// Axial height and unit radial direction of `p`.
    fn axial_frame(&self, p: &Point3) -> (f64, Vec3) {
        let d = p - self.origin;
        let h = d.dot(&self.axis);
        let radial = unit(&(d - self.axis * h)).unwrap_or(self.ref_dir);
        (h, radial)
    }

    fn param_of_dir(&self, radial: &Vec3, h: f64) -> (f64, f64) {
        (radial.dot(&self.y_dir()).atan2(radial.dot(&self.ref_dir)), h)
    }
}

/// A right circular cone. `v` is the axial distance from the apex.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Cone {
    pub apex: Point3,
    pub axis: Vec3,
    pub half_angle: f64,
    pub ref_dir: Vec3,
}

impl Cone {
    pub fn new(apex: Point3, axis: Vec3, half_angle: f64) -> Option<Self> {
        let axis = unit(&axis)?;
        if !(half_angle > 0.0 && half_angle < std::f64::consts::FRAC_PI_2) {
            return None;
        }
        Some(Self {
            apex,
            axis,
            half_angle,
            ref_dir: any_perpendicular(&axis),
        })
    }

    fn y_dir(&self) -> Vec3 {
        self.axis.cross(&self.ref_dir)
    }

    pub fn position(&self, u: f64, v: f64) -> Point3 {
        let r = v * self.half_angle.tan();
        self.apex + self.axis * v + (self.ref_dir * u.cos() + self.y_dir() * u.sin()) * r
    }

    pub fn normal_at(&self, u: f64, _v: f64) -> Vec3 {
        let radial = self.ref_dir * u.cos() + self.y_dir() * u.sin();
        radial * self.half_angle.cos() - self.axis * self.half_angle.sin()
    }
}

/// A sphere. `u` is longitude, `v` latitude, both in the global frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sphere {
    pub center: Point3,
    pub radius: f64,
}

impl Sphere {
    pub fn new(center: Point3, radius: f64) -> Self {
        Self { center, radius }
    }

    pub fn position(&self, u: f64, v: f64) -> Point3 {
        self.center + Vec3::new(v.cos() * u.cos(), v.cos() * u.sin(), v.sin()) * self.radius
    }

    pub fn normal_at(&self, u: f64, v: f64) -> Vec3 {
        Vec3::new(v.cos() * u.cos(), v.cos() * u.sin(), v.sin())
    }

    fn param_of_dir(dir: &Vec3) -> (f64, f64) {
        (dir.y.atan2(dir.x), dir.z.clamp(-1.0, 1.0).asin())
    }
}

/// A torus. `u` is the angle around the axis, `v` the angle around the tube.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Torus {
    pub center: Point3,
    pub axis: Vec3,
    pub major_radius: f64,
    pub minor_radius: f64,
    pub ref_dir: Vec3,
}

impl Torus {
    pub fn new(center: Point3, axis: Vec3, major_radius: f64, minor_radius: f64) -> Option<Self> {
        let axis = unit(&axis)?;
        Some(Self {
            center,
            axis,
            major_radius,
            minor_radius,
            ref_dir: any_perpendicular(&axis),
        })
    }

    fn ring_dir(&self, u: f64) -> Vec3 {
        self.ref_dir * u.cos() + self.axis.cross(&self.ref_dir) * u.sin()
    }

    pub fn position(&self, u: f64, v: f64) -> Point3 {
        let e = self.ring_dir(u);
        self.center + e * self.major_radius + (e * v.cos() + self.axis * v.sin()) * self.minor_radius
    }

    pub fn normal_at(&self, u: f64, v: f64) -> Vec3 {
        let e = self.ring_dir(u);
        e * v.cos() + self.axis * v.sin()
    }

    /// Unit radial direction of `p` in the equatorial plane and the matching ring centre.
    fn ring_frame(&self, p: &Point3) -> (Vec3, Point3) {
        let d = p - self.center;
        let e = unit(&(d - self.axis * d.dot(&self.axis))).unwrap_or(self.ref_dir);
        (e, self.center + e * self.major_radius)
    }
}

impl Surface {
    pub fn position(&self, u: f64, v: f64) -> Point3 {
        match self {
            Surface::Plane(p) => p.position(u, v),
            Surface::Cylinder(c) => c.position(u, v),
            Surface::Cone(c) => c.position(u, v),
            Surface::Sphere(s) => s.position(u, v),
            Surface::Torus(t) => t.position(u, v),
        }
    }

    /// Outward parametric normal at `(u, v)`.
    pub fn normal_at(&self, u: f64, v: f64) -> Vec3 {
        match self {
            Surface::Plane(p) => p.normal,
            Surface::Cylinder(c) => c.normal_at(u, v),
            Surface::Cone(c) => c.normal_at(u, v),
            Surface::Sphere(s) => s.normal_at(u, v),
            Surface::Torus(t) => t.normal_at(u, v),
        }
    }

    /// The closest surface point to `p`.
    pub fn foot_point(&self, p: &Point3) -> SurfacePoint {
        match self {
            Surface::Plane(pl) => SurfacePoint {
                point: pl.project_point(p),
                normal: pl.normal,
                uv: pl.param_of(p),
            },
            Surface::Cylinder(c) => {
                let (h, radial) = c.axial_frame(p);
                SurfacePoint {
                    point: c.origin + c.axis * h + radial * c.radius,
                    normal: radial,
                    uv: c.param_of_dir(&radial, h),
                }
            }
            Surface::Cone(c) => {
                let d = p - c.apex;
                let h = d.dot(&c.axis);
                let e = unit(&(d - c.axis * h)).unwrap_or(c.ref_dir);
                let (sin_a, cos_a) = c.half_angle.sin_cos();
                let generator = e * sin_a + c.axis * cos_a;
                let s = d.dot(&generator).max(0.0);
                let u = e.dot(&c.y_dir()).atan2(e.dot(&c.ref_dir));
                SurfacePoint {
                    point: c.apex + generator * s,
                    normal: e * cos_a - c.axis * sin_a,
                    uv: (u, s * cos_a),
                }
            }
            Surface::Sphere(s) => {
                let dir = unit(&(p - s.center)).unwrap_or_else(Vec3::z);
                SurfacePoint {
                    point: s.center + dir * s.radius,
                    normal: dir,
                    uv: Sphere::param_of_dir(&dir),
                }
            }
            Surface::Torus(t) => {
                let (e, ring) = t.ring_frame(p);
                let dir = unit(&(p - ring)).unwrap_or(e);
                let u = e.dot(&t.axis.cross(&t.ref_dir)).atan2(e.dot(&t.ref_dir));
                let v = dir.dot(&t.axis).atan2(dir.dot(&e));
                SurfacePoint {
                    point: ring + dir * t.minor_radius,
                    normal: dir,
                    uv: (u, v),
                }
            }
        }
    }

    /// Every stationary point of the distance from `p` to the surface that the
    /// analytic forms expose: the near foot plus, for closed cross-sections, the
    /// far foot on the opposite side of the axis or centre.
    pub fn foot_candidates(&self, p: &Point3) -> Vec<SurfacePoint> {
        let near = self.foot_point(p);
        match self {
            Surface::Plane(_) | Surface::Cone(_) => vec![near],
            Surface::Cylinder(c) => {
                let (h, radial) = c.axial_frame(p);
                let far_dir = -radial;
                let far = SurfacePoint {
                    point: c.origin + c.axis * h + far_dir * c.radius,
                    normal: far_dir,
                    uv: c.param_of_dir(&far_dir, h),
                };
                vec![near, far]
            }
            Surface::Sphere(s) => {
                let far_dir = -near.normal;
                let far = SurfacePoint {
                    point: s.center + far_dir * s.radius,
                    normal: far_dir,
                    uv: Sphere::param_of_dir(&far_dir),
                };
                vec![near, far]
            }
            Surface::Torus(t) => {
                let (_, ring) = t.ring_frame(p);
                let far_dir = -near.normal;
                let far = SurfacePoint {
                    point: ring + far_dir * t.minor_radius,
                    normal: far_dir,
                    uv: (near.uv.0, far_dir.dot(&t.axis).atan2(far_dir.dot(&(ring - t.center)))),
                };
                vec![near, far]
            }
        }
    }

    pub fn param_of(&self, p: &Point3) -> (f64, f64) {
        self.foot_point(p).uv
    }

    /// Distance from the surface along its outward normal (negative inside).
    pub fn signed_distance(&self, p: &Point3) -> f64 {
        let foot = self.foot_point(p);
        (p - foot.point).dot(&foot.normal)
    }

    /// The surface displaced by `distance` along its outward normal, or `None`
    /// where the offset degenerates (radius shrinking through zero).
    pub fn offset(&self, distance: f64) -> Option<Surface> {
        match self {
            Surface::Plane(p) => Some(Surface::Plane(Plane {
                origin: p.origin + p.normal * distance,
                ..*p
            })),
            Surface::Cylinder(c) => {
                let radius = c.radius + distance;
                (radius > 0.0).then(|| Surface::Cylinder(Cylinder { radius, ..*c }))
            }
            Surface::Cone(c) => Some(Surface::Cone(Cone {
                apex: c.apex - c.axis * (distance / c.half_angle.sin()),
                ..*c
            })),
            Surface::Sphere(s) => {
                let radius = s.radius + distance;
                (radius > 0.0).then(|| Surface::Sphere(Sphere::new(s.center, radius)))
            }
            Surface::Torus(t) => {
                let minor_radius = t.minor_radius + distance;
                (minor_radius > 0.0).then(|| Surface::Torus(Torus { minor_radius, ..*t }))
            }
        }
    }

    /// Normal curvature at the foot of `p` in tangent direction `dir`, positive
    /// where the surface bends away from its outward normal.
    pub fn normal_curvature(&self, p: &Point3, dir: &Vec3) -> Option<f64> {
        let foot = self.foot_point(p);
        let t = unit(&(dir - foot.normal * dir.dot(&foot.normal)))?;
        match self {
            Surface::Plane(_) => Some(0.0),
            Surface::Sphere(s) => Some(1.0 / s.radius),
            Surface::Cylinder(c) => {
                let along = t.dot(&c.axis);
                Some((1.0 - along * along) / c.radius)
            }
            Surface::Cone(c) => {
                let d = foot.point - c.apex;
                let rho = (d - c.axis * d.dot(&c.axis)).norm();
                if rho < 1e-12 {
                    return None;
                }
                let generator = unit(&d)?;
                let along = t.dot(&generator);
                Some((1.0 - along * along) * c.half_angle.cos() / rho)
            }
            Surface::Torus(_) => {
                let h = 1e-5;
                let ahead = self.foot_point(&(foot.point + t * h)).normal;
                let behind = self.foot_point(&(foot.point - t * h)).normal;
                Some((ahead - behind).dot(&t) / (2.0 * h))
            }
        }
    }

    pub fn is_planar(&self) -> bool {
        matches!(self, Surface::Plane(_))
    }

    pub fn surface_type_name(&self) -> &'static str {
        match self {
            Surface::Plane(_) => "Plane",
            Surface::Cylinder(_) => "Cylinder",
            Surface::Cone(_) => "Cone",
            Surface::Sphere(_) => "Sphere",
            Surface::Torus(_) => "Torus",
        }
    }
}

/// A surface paired with the sense a face uses it in. Reversed surfaces have
/// their normal, offsets and curvatures negated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrientedSurface {
    pub surface: Surface,
    pub reversed: bool,
}

impl OrientedSurface {
    pub fn new(surface: Surface, reversed: bool) -> Self {
        Self { surface, reversed }
    }

    fn sign(&self) -> f64 {
        if self.reversed { -1.0 } else { 1.0 }
    }

    /// Oriented normal at the foot of `p`.
    pub fn normal(&self, p: &Point3) -> Vec3 {
        self.surface.foot_point(p).normal * self.sign()
    }

    pub fn foot_point(&self, p: &Point3) -> SurfacePoint {
        let mut foot = self.surface.foot_point(p);
        foot.normal *= self.sign();
        foot
    }

    pub fn signed_distance(&self, p: &Point3) -> f64 {
        self.surface.signed_distance(p) * self.sign()
    }

    /// Offset by `distance` along the oriented normal.
    pub fn offset(&self, distance: f64) -> Option<OrientedSurface> {
        Some(Self::new(self.surface.offset(distance * self.sign())?, self.reversed))
    }

    pub fn normal_curvature(&self, p: &Point3, dir: &Vec3) -> Option<f64> {
        Some(self.surface.normal_curvature(p, dir)? * self.sign())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_plane_foot_and_distance() {
        let p = Surface::Plane(Plane::new(Point3::origin(), Vec3::z()).unwrap());
        let q = Point3::new(1.0, 2.0, 3.0);
        assert_relative_eq!(p.signed_distance(&q), 3.0);
        let foot = p.foot_point(&q);
        assert_relative_eq!(foot.point.z, 0.0);
        let (u, v) = p.param_of(&q);
        let back = p.position(u, v);
        assert_relative_eq!(back.x, 1.0, epsilon = 1e-12);
        assert_relative_eq!(back.y, 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_cylinder_candidates_are_antipodal() {
        let c = Surface::Cylinder(Cylinder::new(Point3::origin(), Vec3::z(), 2.0).unwrap());
        let q = Point3::new(5.0, 0.0, 1.0);
        let cands = c.foot_candidates(&q);
        assert_eq!(cands.len(), 2);
        assert_relative_eq!(cands[0].point.x, 2.0, epsilon = 1e-12);
        assert_relative_eq!(cands[1].point.x, -2.0, epsilon = 1e-12);
        assert_relative_eq!(c.signed_distance(&q), 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_cylinder_param_roundtrip() {
        let c = Surface::Cylinder(Cylinder::new(Point3::new(1.0, 1.0, 0.0), Vec3::x(), 0.5).unwrap());
        let p = c.position(0.8, 2.0);
        let (u, v) = c.param_of(&p);
        assert_relative_eq!(u, 0.8, epsilon = 1e-12);
        assert_relative_eq!(v, 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_cone_foot_point_lies_on_cone() {
        let cone = Cone::new(Point3::origin(), Vec3::z(), 0.4).unwrap();
        let s = Surface::Cone(cone);
        let on = cone.position(1.1, 3.0);
        assert!(s.signed_distance(&on).abs() < 1e-12);
        let off = on + cone.normal_at(1.1, 3.0) * 0.25;
        assert_relative_eq!(s.signed_distance(&off), 0.25, epsilon = 1e-12);
    }

    #[test]
    fn test_cone_offset_keeps_distance() {
        let s = Surface::Cone(Cone::new(Point3::origin(), Vec3::z(), 0.3).unwrap());
        let off = s.offset(0.5).unwrap();
        let p = s.position(0.2, 4.0);
        let n = s.normal_at(0.2, 4.0);
        assert!(off.signed_distance(&(p + n * 0.5)).abs() < 1e-12);
    }

    #[test]
    fn test_offset_through_zero_degenerates() {
        let s = Surface::Sphere(Sphere::new(Point3::origin(), 1.0));
        assert!(s.offset(-1.5).is_none());
        let t = Surface::Torus(Torus::new(Point3::origin(), Vec3::z(), 5.0, 1.0).unwrap());
        assert!(t.offset(0.5).is_some());
    }

    #[test]
    fn test_torus_foot_point() {
        let t = Surface::Torus(Torus::new(Point3::origin(), Vec3::z(), 5.0, 1.0).unwrap());
        let q = Point3::new(7.0, 0.0, 0.0);
        let foot = t.foot_point(&q);
        assert_relative_eq!(foot.point.x, 6.0, epsilon = 1e-12);
        assert_relative_eq!(t.signed_distance(&q), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_normal_curvature_signs() {
        let sphere = Surface::Sphere(Sphere::new(Point3::origin(), 2.0));
        let p = Point3::new(0.0, 0.0, 2.0);
        assert_relative_eq!(sphere.normal_curvature(&p, &Vec3::x()).unwrap(), 0.5);

        let cyl = Surface::Cylinder(Cylinder::new(Point3::origin(), Vec3::z(), 4.0).unwrap());
        let q = Point3::new(4.0, 0.0, 0.0);
        assert_relative_eq!(cyl.normal_curvature(&q, &Vec3::y()).unwrap(), 0.25, epsilon = 1e-12);
        assert_relative_eq!(cyl.normal_curvature(&q, &Vec3::z()).unwrap(), 0.0, epsilon = 1e-12);

        let torus = Surface::Torus(Torus::new(Point3::origin(), Vec3::z(), 5.0, 1.0).unwrap());
        let outer = Point3::new(6.0, 0.0, 0.0);
        assert_relative_eq!(torus.normal_curvature(&outer, &Vec3::z()).unwrap(), 1.0, epsilon = 1e-4);
    }

    #[test]
    fn test_reversed_cylinder_flips_normal_and_offset() {
        let cyl = Surface::Cylinder(Cylinder::new(Point3::origin(), Vec3::z(), 2.0).unwrap());
        let hole = OrientedSurface::new(cyl, true);
        let p = Point3::new(2.0, 0.0, 1.0);
        assert_relative_eq!(hole.normal(&p), -Vec3::x(), epsilon = 1e-12);
        let grown = hole.offset(0.5).unwrap();
        assert_relative_eq!(grown.foot_point(&Point3::new(5.0, 0.0, 0.0)).point.x, 1.5, epsilon = 1e-12);
        assert!(hole.normal_curvature(&p, &Vec3::y()).unwrap() < 0.0);
    }
}
