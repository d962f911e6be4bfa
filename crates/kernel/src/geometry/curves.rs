use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;

use super::interval::Interval;
use super::{any_perpendicular, unit, Point3, Vec3};

/// Analytic curve representations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Curve {
    Line(Line3d),
    Circle(Circle3d),
    Ellipse(Ellipse3d),
}

/// An infinite straight line, parametrized by arc length from `origin`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Line3d {
    pub origin: Point3,
    pub direction: Vec3,
}

impl Line3d {
    /// `direction` is normalized; `None` if it has zero length.
    pub fn new(origin: Point3, direction: Vec3) -> Option<Self> {
        Some(Self {
            origin,
            direction: unit(&direction)?,
        })
    }

    pub fn through(a: Point3, b: Point3) -> Option<Self> {
        Self::new(a, b - a)
    }

    pub fn position(&self, t: f64) -> Point3 {
        self.origin + self.direction * t
    }

    pub fn param_of(&self, p: &Point3) -> f64 {
        (p - self.origin).dot(&self.direction)
    }
}

/// A full circle. `position(t) = center + r (cos t x_axis + sin t (normal x x_axis))`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Circle3d {
    pub center: Point3,
    pub normal: Vec3,
    pub x_axis: Vec3,
    pub radius: f64,
}

impl Circle3d {
    pub fn new(center: Point3, normal: Vec3, radius: f64) -> Option<Self> {
        let normal = unit(&normal)?;
        Some(Self {
            center,
            normal,
            x_axis: any_perpendicular(&normal),
            radius,
        })
    }

    /// Circle whose zero parameter lies in the direction of `x_hint` (projected into the plane).
    pub fn with_x_axis(center: Point3, normal: Vec3, x_hint: Vec3, radius: f64) -> Option<Self> {
        let normal = unit(&normal)?;
        let x_axis = unit(&(x_hint - normal * x_hint.dot(&normal)))?;
        Some(Self {
            center,
            normal,
            x_axis,
            radius,
        })
    }

    /// Circle through three points, running from `a` through `b` to `c` with
    /// its zero parameter at `a`. `None` if the points are collinear.
    pub fn through_points(a: &Point3, b: &Point3, c: &Point3) -> Option<Self> {
        let ab = b - a;
        let ac = c - a;
        let n = ab.cross(&ac);
        let n2 = n.norm_squared();
        if n2 < 1e-24 {
            return None;
        }
        let offset = (n.cross(&ab) * ac.norm_squared() + ac.cross(&n) * ab.norm_squared()) / (2.0 * n2);
        let center = a + offset;
        Self::with_x_axis(center, n, a - center, offset.norm())
    }

    fn y_axis(&self) -> Vec3 {
        self.normal.cross(&self.x_axis)
    }

    pub fn position(&self, t: f64) -> Point3 {
        self.center + (self.x_axis * t.cos() + self.y_axis() * t.sin()) * self.radius
    }

    pub fn derivative(&self, t: f64) -> Vec3 {
        (self.x_axis * -t.sin() + self.y_axis() * t.cos()) * self.radius
    }

    pub fn second_derivative(&self, t: f64) -> Vec3 {
        (self.x_axis * -t.cos() - self.y_axis() * t.sin()) * self.radius
    }

    pub fn param_of(&self, p: &Point3) -> f64 {
        let v = p - self.center;
        v.dot(&self.y_axis()).atan2(v.dot(&self.x_axis))
    }
}

/// A full ellipse in its plane.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ellipse3d {
    pub center: Point3,
    pub normal: Vec3,
    pub major_axis: Vec3,
    pub major_radius: f64,
    pub minor_radius: f64,
}

impl Ellipse3d {
    pub fn new(
        center: Point3,
        normal: Vec3,
        major_axis: Vec3,
        major_radius: f64,
        minor_radius: f64,
    ) -> Option<Self> {
        let normal = unit(&normal)?;
        let major_axis = unit(&(major_axis - normal * major_axis.dot(&normal)))?;
        Some(Self {
            center,
            normal,
            major_axis,
            major_radius,
            minor_radius,
        })
    }

    fn minor_axis(&self) -> Vec3 {
        self.normal.cross(&self.major_axis)
    }

    pub fn position(&self, t: f64) -> Point3 {
        self.center
            + self.major_axis * (self.major_radius * t.cos())
            + self.minor_axis() * (self.minor_radius * t.sin())
    }

    pub fn derivative(&self, t: f64) -> Vec3 {
        self.major_axis * (-self.major_radius * t.sin())
            + self.minor_axis() * (self.minor_radius * t.cos())
    }

    pub fn second_derivative(&self, t: f64) -> Vec3 {
        self.major_axis * (-self.major_radius * t.cos())
            - self.minor_axis() * (self.minor_radius * t.sin())
    }

    /// Foot parameter by eccentric-angle guess refined with Newton steps.
    pub fn param_of(&self, p: &Point3) -> f64 {
        let v = p - self.center;
        let a = v.dot(&self.major_axis);
        let b = v.dot(&self.minor_axis());
        let mut t = (b * self.major_radius).atan2(a * self.minor_radius);
        for _ in 0..8 {
            let d = self.position(t) - p;
            let d1 = self.derivative(t);
            let d2 = self.second_derivative(t);
            let f = d.dot(&d1);
            let df = d1.dot(&d1) + d.dot(&d2);
            if df.abs() < 1e-30 {
                break;
            }
            t -= f / df;
        }
        t
    }
}

impl Curve {
    pub fn position(&self, t: f64) -> Point3 {
        match self {
            Curve::Line(l) => l.position(t),
            Curve::Circle(c) => c.position(t),
            Curve::Ellipse(e) => e.position(t),
        }
    }

    pub fn derivative(&self, t: f64) -> Vec3 {
        match self {
            Curve::Line(l) => l.direction,
            Curve::Circle(c) => c.derivative(t),
            Curve::Ellipse(e) => e.derivative(t),
        }
    }

    pub fn second_derivative(&self, t: f64) -> Vec3 {
        match self {
            Curve::Line(_) => Vec3::zeros(),
            Curve::Circle(c) => c.second_derivative(t),
            Curve::Ellipse(e) => e.second_derivative(t),
        }
    }

    /// Unit tangent, `None` where the derivative vanishes.
    pub fn tangent(&self, t: f64) -> Option<Vec3> {
        unit(&self.derivative(t))
    }

    /// Parameter of the closest point; periodic curves answer in (-PI, PI].
    pub fn param_of(&self, p: &Point3) -> f64 {
        match self {
            Curve::Line(l) => l.param_of(p),
            Curve::Circle(c) => c.param_of(p),
            Curve::Ellipse(e) => e.param_of(p),
        }
    }

    /// Parameter of the closest point, shifted by whole periods to lie nearest `near`.
    pub fn param_of_near(&self, p: &Point3, near: f64) -> f64 {
        let t = self.param_of(p);
        match self.period() {
            Some(period) => t + period * ((near - t) / period).round(),
            None => t,
        }
    }

    pub fn closest_point(&self, p: &Point3) -> (Point3, f64) {
        let t = self.param_of(p);
        (self.position(t), t)
    }

    pub fn distance_to(&self, p: &Point3) -> f64 {
        nalgebra::distance(&self.closest_point(p).0, p)
    }

    pub fn period(&self) -> Option<f64> {
        match self {
            Curve::Line(_) => None,
            Curve::Circle(_) | Curve::Ellipse(_) => Some(TAU),
        }
    }

    /// The same point set traversed the other way: `negated().position(-t) == position(t)`.
    pub fn negated(&self) -> Curve {
        match self {
            Curve::Line(l) => Curve::Line(Line3d {
                origin: l.origin,
                direction: -l.direction,
            }),
            Curve::Circle(c) => Curve::Circle(Circle3d {
                normal: -c.normal,
                ..*c
            }),
            Curve::Ellipse(e) => Curve::Ellipse(Ellipse3d {
                normal: -e.normal,
                ..*e
            }),
        }
    }

    pub fn is_straight(&self) -> bool {
        matches!(self, Curve::Line(_))
    }

    pub fn is_circle(&self) -> bool {
        matches!(self, Curve::Circle(_))
    }

    /// Curvature magnitude at `t` (zero where the curve is degenerate).
    pub fn curvature(&self, t: f64) -> f64 {
        let d1 = self.derivative(t);
        let speed = d1.norm();
        if speed < 1e-15 {
            return 0.0;
        }
        d1.cross(&self.second_derivative(t)).norm() / (speed * speed * speed)
    }

    pub fn curve_type_name(&self) -> &'static str {
        match self {
            Curve::Line(_) => "Line",
            Curve::Circle(_) => "Circle",
            Curve::Ellipse(_) => "Ellipse",
        }
    }
}

/// A curve restricted to a finite parameter range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundedCurve {
    pub curve: Curve,
    pub range: Interval,
}

impl BoundedCurve {
    pub fn new(curve: Curve, range: Interval) -> Self {
        Self { curve, range }
    }

    /// Straight segment from `a` to `b`; `None` if they coincide.
    pub fn segment(a: Point3, b: Point3) -> Option<Self> {
        let line = Line3d::through(a, b)?;
        let length = nalgebra::distance(&a, &b);
        Some(Self::new(Curve::Line(line), Interval::new(0.0, length)))
    }

    pub fn start(&self) -> Point3 {
        self.curve.position(self.range.low())
    }

    pub fn end(&self) -> Point3 {
        self.curve.position(self.range.high())
    }

    pub fn mid(&self) -> Point3 {
        self.curve.position(self.range.mid())
    }

    pub fn reversed(&self) -> Self {
        Self {
            curve: self.curve.negated(),
            range: self.range.reversed(),
        }
    }

    /// `n + 1` points from start to end inclusive.
    pub fn sample(&self, n: usize) -> Vec<Point3> {
        let n = n.max(1);
        (0..=n)
            .map(|i| self.curve.position(self.range.interpolate(i as f64 / n as f64)))
            .collect()
    }

    pub fn approximate_length(&self, samples: usize) -> f64 {
        self.sample(samples)
            .windows(2)
            .map(|w| nalgebra::distance(&w[0], &w[1]))
            .sum()
    }

    /// Arc of a periodic curve from the parameter of `a` to that of `b`, choosing the
    /// branch whose midpoint lies closest to `via`. Non-periodic curves just take the
    /// range between the two parameters.
    pub fn between(curve: Curve, a: &Point3, b: &Point3, via: &Point3) -> Self {
        let ta = curve.param_of(a);
        let tb = curve.param_of_near(b, ta);
        if curve.period().is_none() {
            let range = Interval::new(ta, tb);
            let bc = Self::new(curve, range);
            return if ta <= tb { bc } else { bc.reversed() };
        }
        // Two candidate arcs leave `a` in opposite directions.
        let (fwd_end, bwd_end) = if tb >= ta { (tb, tb - TAU) } else { (tb + TAU, tb) };
        let fwd_mid = curve.position(0.5 * (ta + fwd_end));
        let bwd_mid = curve.position(0.5 * (ta + bwd_end));
        if nalgebra::distance(&fwd_mid, via) <= nalgebra::distance(&bwd_mid, via) {
            Self::new(curve, Interval::new(ta, fwd_end))
        } else {
            // Run the other way round so the range still increases from `a` to `b`.
            let negated = curve.negated();
            Self::new(negated, Interval::new(-ta, -bwd_end))
        }
    }
}

/// Whether two bounded curves trace the same points, in either direction.
pub fn curves_coincident(a: &BoundedCurve, b: &BoundedCurve, tol: f64) -> bool {
    let ends_match = (nalgebra::distance(&a.start(), &b.start()) < tol
        && nalgebra::distance(&a.end(), &b.end()) < tol)
        || (nalgebra::distance(&a.start(), &b.end()) < tol
            && nalgebra::distance(&a.end(), &b.start()) < tol);
    ends_match && b.curve.distance_to(&a.mid()) < tol
}
