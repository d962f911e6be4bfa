pub mod bbox;
pub mod curves;
pub mod intersection;
pub mod interval;
pub mod surfaces;

/// A point in 3D Euclidean space.
pub type Point3 = nalgebra::Point3<f64>;

/// A vector in 3D Euclidean space.
pub type Vec3 = nalgebra::Vector3<f64>;

/// Lengths below this are treated as zero when normalizing.
pub const NORMALIZE_EPS: f64 = 1e-15;

/// Normalize `v`, or `None` when it has (near) zero length.
pub fn unit(v: &Vec3) -> Option<Vec3> {
    v.try_normalize(NORMALIZE_EPS)
}

/// Any unit vector perpendicular to `v` (which must be unit length).
pub fn any_perpendicular(v: &Vec3) -> Vec3 {
    let seed = if v.x.abs() < 0.9 { Vec3::x() } else { Vec3::y() };
    unit(&seed.cross(v)).unwrap_or_else(Vec3::z)
}

/// Signed angle from `a` to `b` measured about `axis` (all unit vectors), in (-PI, PI].
pub fn signed_angle(a: &Vec3, b: &Vec3, axis: &Vec3) -> f64 {
    let sin = a.cross(b).dot(axis);
    let cos = a.dot(b);
    sin.atan2(cos)
}

/// Newell normal of a closed polygon; its length is twice the polygon area.
pub fn newell_normal(points: &[Point3]) -> Vec3 {
    let mut n = Vec3::zeros();
    let count = points.len();
    for i in 0..count {
        let a = points[i];
        let b = points[(i + 1) % count];
        n.x += (a.y - b.y) * (a.z + b.z);
        n.y += (a.z - b.z) * (a.x + b.x);
        n.z += (a.x - b.x) * (a.y + b.y);
    }
    n
}

/// Centroid of a point set (origin for an empty set).
pub fn centroid(points: &[Point3]) -> Point3 {
    if points.is_empty() {
        return Point3::origin();
    }
    let sum = points.iter().fold(Vec3::zeros(), |acc, p| acc + p.coords);
    Point3::from(sum / points.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn test_signed_angle_orientation() {
        let a = Vec3::x();
        let b = Vec3::y();
        assert_relative_eq!(signed_angle(&a, &b, &Vec3::z()), FRAC_PI_2);
        assert_relative_eq!(signed_angle(&a, &b, &-Vec3::z()), -FRAC_PI_2);
    }

    #[test]
    fn test_newell_normal_of_unit_square() {
        let square = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(1.0, 1.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
        ];
        let n = newell_normal(&square);
        assert_relative_eq!(n.z, 2.0);
        assert_relative_eq!(n.x, 0.0);
    }

    #[test]
    fn test_any_perpendicular_is_perpendicular() {
        for v in [Vec3::x(), Vec3::y(), Vec3::z(), Vec3::new(1.0, 1.0, 1.0).normalize()] {
            let p = any_perpendicular(&v);
            assert!(p.dot(&v).abs() < 1e-12);
            assert_relative_eq!(p.norm(), 1.0, epsilon = 1e-12);
        }
    }
}
