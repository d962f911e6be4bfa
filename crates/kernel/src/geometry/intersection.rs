//! Curve/surface and surface/surface intersection for the analytic pairs the
//! kernel supports. Unsupported pairs report `KernelError::Unsupported` rather
//! than guessing.

use tracing::debug;

use super::curves::{Circle3d, Curve, Ellipse3d, Line3d};
use super::interval::Interval;
use super::surfaces::{Plane, Surface};
use super::{unit, Point3, Vec3};
use crate::KernelError;

/// Below this the sine of the angle between two directions counts as zero.
const PARALLEL_EPS: f64 = 1e-12;

/// Samples used by the fallback curve/surface root search.
const MARCH_SAMPLES: usize = 64;

/// One crossing of a curve through a surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurveSurfaceHit {
    pub param: f64,
    pub point: Point3,
}

/// Intersect `curve` restricted to `range` with `surface`.
///
/// Hits are sorted by parameter. Periodic curves report parameters shifted by
/// whole periods into `range` where possible.
pub fn intersect_curve_surface(
    curve: &Curve,
    range: Interval,
    surface: &Surface,
    tol: f64,
) -> Vec<CurveSurfaceHit> {
    let raw: Vec<f64> = match (curve, surface) {
        (Curve::Line(l), Surface::Plane(p)) => line_plane(l, p).into_iter().collect(),
        (Curve::Circle(c), Surface::Plane(p)) => circle_plane(c, p),
        (Curve::Ellipse(e), Surface::Plane(p)) => ellipse_plane(e, p),
        _ => march_roots(curve, range, surface, tol),
    };

    let mut hits: Vec<CurveSurfaceHit> = raw
        .into_iter()
        .filter_map(|t| {
            let t = shift_into(curve, t, range, tol)?;
            let point = curve.position(t);
            (surface.signed_distance(&point).abs() < tol.max(1e-9)).then_some(CurveSurfaceHit { param: t, point })
        })
        .collect();
    hits.sort_by(|a, b| a.param.total_cmp(&b.param));
    hits.dedup_by(|a, b| nalgebra::distance(&a.point, &b.point) < tol);
    hits
}

fn shift_into(curve: &Curve, t: f64, range: Interval, tol: f64) -> Option<f64> {
    if range.is_infinite() {
        return Some(t);
    }
    match curve.period() {
        Some(period) => {
            let k = ((range.low() - t) / period).ceil();
            let mut shifted = t + k * period;
            if shifted - period >= range.low() - tol {
                shifted -= period;
            }
            range.contains(shifted, tol).then_some(shifted)
        }
        None => range.contains(t, tol).then_some(t),
    }
}

fn line_plane(line: &Line3d, plane: &Plane) -> Option<f64> {
    let denom = line.direction.dot(&plane.normal);
    if denom.abs() < PARALLEL_EPS {
        return None;
    }
    Some(-plane.signed_distance(&line.origin) / denom)
}

/// Roots of `a cos t + b sin t + c = 0`.
fn trig_roots(a: f64, b: f64, c: f64) -> Vec<f64> {
    let amplitude = a.hypot(b);
    if amplitude < PARALLEL_EPS {
        return Vec::new();
    }
    let ratio = -c / amplitude;
    if ratio.abs() > 1.0 + 1e-12 {
        return Vec::new();
    }
    let phase = b.atan2(a);
    let spread = ratio.clamp(-1.0, 1.0).acos();
    if spread < 1e-12 {
        vec![phase]
    } else {
        vec![phase - spread, phase + spread]
    }
}

fn circle_plane(circle: &Circle3d, plane: &Plane) -> Vec<f64> {
    let y_axis = circle.normal.cross(&circle.x_axis);
    trig_roots(
        circle.radius * circle.x_axis.dot(&plane.normal),
        circle.radius * y_axis.dot(&plane.normal),
        plane.signed_distance(&circle.center),
    )
}

fn ellipse_plane(ellipse: &Ellipse3d, plane: &Plane) -> Vec<f64> {
    let minor_axis = ellipse.normal.cross(&ellipse.major_axis);
    trig_roots(
        ellipse.major_radius * ellipse.major_axis.dot(&plane.normal),
        ellipse.minor_radius * minor_axis.dot(&plane.normal),
        plane.signed_distance(&ellipse.center),
    )
}

/// Sign changes of the signed distance along the curve, refined by bisection.
fn march_roots(curve: &Curve, range: Interval, surface: &Surface, tol: f64) -> Vec<f64> {
    let range = if range.is_finite() {
        range
    } else {
        match curve.period() {
            Some(period) => Interval::new(0.0, period),
            None => return Vec::new(),
        }
    };
    let f = |t: f64| surface.signed_distance(&curve.position(t));
    let mut roots = Vec::new();
    let mut t0 = range.low();
    let mut f0 = f(t0);
    for i in 1..=MARCH_SAMPLES {
        let t1 = range.interpolate(i as f64 / MARCH_SAMPLES as f64);
        let f1 = f(t1);
        if f0.abs() < tol {
            roots.push(t0);
        } else if f0 * f1 < 0.0 {
            let (mut lo, mut hi, mut flo) = (t0, t1, f0);
            for _ in 0..60 {
                let mid = 0.5 * (lo + hi);
                let fm = f(mid);
                if fm.abs() < tol * 1e-3 {
                    lo = mid;
                    hi = mid;
                    break;
                }
                if flo * fm < 0.0 {
                    hi = mid;
                } else {
                    lo = mid;
                    flo = fm;
                }
            }
            roots.push(0.5 * (lo + hi));
        }
        t0 = t1;
        f0 = f1;
    }
    if f0.abs() < tol {
        roots.push(t0);
    }
    debug!(count = roots.len(), surface = surface.surface_type_name(), "marched curve/surface roots");
    roots
}

/// Intersection curves of two surfaces. One of them must be a plane, or both
/// spheres sharing no centre.
pub fn intersect_surfaces(a: &Surface, b: &Surface) -> Result<Vec<Curve>, KernelError> {
    match (a, b) {
        (Surface::Plane(p), other) | (other, Surface::Plane(p)) => plane_section(other, p),
        _ => Err(KernelError::Unsupported {
            operation: "surface/surface intersection",
            first: a.surface_type_name(),
            second: b.surface_type_name(),
        }),
    }
}

/// Section of `surface` by `plane`. An empty result means the two miss.
pub fn plane_section(surface: &Surface, plane: &Plane) -> Result<Vec<Curve>, KernelError> {
    let n = plane.normal;
    match surface {
        Surface::Plane(other) => {
            let Some(direction) = unit(&other.normal.cross(&n)) else {
                return Ok(Vec::new());
            };
            let k = other.normal.dot(&n);
            let h1 = other.origin.coords.dot(&other.normal);
            let h2 = plane.origin.coords.dot(&n);
            let det = 1.0 - k * k;
            let origin = Point3::from(
                other.normal * ((h1 - h2 * k) / det) + n * ((h2 - h1 * k) / det),
            );
            Ok(Line3d::new(origin, direction).map(Curve::Line).into_iter().collect())
        }
        Surface::Cylinder(cyl) => {
            let cos = cyl.axis.dot(&n);
            if cos.abs() < PARALLEL_EPS {
                let d = plane.signed_distance(&cyl.origin);
                if d.abs() > cyl.radius {
                    return Ok(Vec::new());
                }
                let foot = cyl.origin - n * d;
                let across = n.cross(&cyl.axis);
                let half = (cyl.radius * cyl.radius - d * d).max(0.0).sqrt();
                let offsets: &[f64] = if half < 1e-12 { &[0.0] } else { &[-1.0, 1.0] };
                return Ok(offsets
                    .iter()
                    .filter_map(|s| Line3d::new(foot + across * (s * half), cyl.axis))
                    .map(Curve::Line)
                    .collect());
            }
            let t = -plane.signed_distance(&cyl.origin) / cos;
            let center = cyl.origin + cyl.axis * t;
            if (1.0 - cos.abs()) < PARALLEL_EPS {
                return Ok(Circle3d::with_x_axis(center, n, cyl.ref_dir, cyl.radius)
                    .map(Curve::Circle)
                    .into_iter()
                    .collect());
            }
            let major = cyl.axis - n * cos;
            Ok(Ellipse3d::new(center, n, major, cyl.radius / cos.abs(), cyl.radius)
                .map(Curve::Ellipse)
                .into_iter()
                .collect())
        }
        Surface::Sphere(s) => {
            let d = plane.signed_distance(&s.center);
            if d.abs() > s.radius {
                return Ok(Vec::new());
            }
            let radius = (s.radius * s.radius - d * d).max(0.0).sqrt();
            Ok(Circle3d::new(s.center - n * d, n, radius)
                .map(Curve::Circle)
                .into_iter()
                .collect())
        }
        Surface::Cone(cone) => {
            let cos = cone.axis.dot(&n);
            if (1.0 - cos.abs()) > PARALLEL_EPS {
                return Err(KernelError::Unsupported {
                    operation: "oblique plane section",
                    first: "Cone",
                    second: "Plane",
                });
            }
            let v = -plane.signed_distance(&cone.apex) / cos;
            if v <= 0.0 {
                return Ok(Vec::new());
            }
            let center = cone.apex + cone.axis * v;
            Ok(Circle3d::with_x_axis(center, n, cone.ref_dir, v * cone.half_angle.tan())
                .map(Curve::Circle)
                .into_iter()
                .collect())
        }
        Surface::Torus(torus) => {
            let cos = torus.axis.dot(&n);
            if cos.abs() < PARALLEL_EPS && plane.signed_distance(&torus.center).abs() < 1e-9 {
                // Meridian plane: two tube circles either side of the axis.
                let Some(e) = unit(&n.cross(&torus.axis)) else {
                    return Ok(Vec::new());
                };
                return Ok([1.0, -1.0]
                    .iter()
                    .filter_map(|s| {
                        Circle3d::with_x_axis(torus.center + e * (s * torus.major_radius), n, e, torus.minor_radius)
                    })
                    .map(Curve::Circle)
                    .collect());
            }
            if (1.0 - cos.abs()) > PARALLEL_EPS {
                return Err(KernelError::Unsupported {
                    operation: "oblique plane section",
                    first: "Torus",
                    second: "Plane",
                });
            }
            let h = -plane.signed_distance(&torus.center) * cos.signum();
            if h.abs() > torus.minor_radius {
                return Ok(Vec::new());
            }
            let spread = (torus.minor_radius * torus.minor_radius - h * h).max(0.0).sqrt();
            let center = torus.center + torus.axis * h;
            let radii = [torus.major_radius - spread, torus.major_radius + spread];
            Ok(radii
                .iter()
                .filter(|r| **r > 1e-12)
                .filter_map(|r| Circle3d::with_x_axis(center, n, torus.ref_dir, *r))
                .map(Curve::Circle)
                .collect())
        }
    }
}

/// Point where three planes meet, `None` when two of them are parallel.
pub fn three_plane_point(a: &Plane, b: &Plane, c: &Plane) -> Option<Point3> {
    let det = a.normal.dot(&b.normal.cross(&c.normal));
    if det.abs() < PARALLEL_EPS {
        return None;
    }
    let ha = a.origin.coords.dot(&a.normal);
    let hb = b.origin.coords.dot(&b.normal);
    let hc = c.origin.coords.dot(&c.normal);
    let v: Vec3 = b.normal.cross(&c.normal) * ha
        + c.normal.cross(&a.normal) * hb
        + a.normal.cross(&b.normal) * hc;
    Some(Point3::from(v / det))
}
