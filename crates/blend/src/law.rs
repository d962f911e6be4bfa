//! Radius laws and blend cross-section profiles.
//!
//! Laws are evaluated over the normalised blend parameter `s` in `[0, 1]`,
//! running from the start of the blended edge to its end.

use serde::{Deserialize, Serialize};

/// A scalar function of the blend parameter with a derivative.
pub trait RadiusLaw {
    fn eval(&self, s: f64) -> f64;
    fn derivative(&self) -> Law;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Law {
    Constant(f64),
    Linear { start: f64, end: f64 },
}

impl RadiusLaw for Law {
    fn eval(&self, s: f64) -> f64 {
        match self {
            Law::Constant(v) => *v,
            Law::Linear { start, end } => start + (end - start) * s,
        }
    }

    fn derivative(&self) -> Law {
        match self {
            Law::Constant(_) => Law::Constant(0.0),
            Law::Linear { start, end } => Law::Constant(end - start),
        }
    }
}

impl Law {
    pub fn is_constant(&self) -> bool {
        match self {
            Law::Constant(_) => true,
            Law::Linear { start, end } => start == end,
        }
    }

    /// Largest value over `[0, 1]`.
    pub fn max_value(&self) -> f64 {
        self.eval(0.0).max(self.eval(1.0))
    }

    /// Smallest value over `[0, 1]`.
    pub fn min_value(&self) -> f64 {
        self.eval(0.0).min(self.eval(1.0))
    }

    /// The same law run from `s = 1` back to `s = 0`.
    pub fn reversed(&self) -> Law {
        match self {
            Law::Constant(v) => Law::Constant(*v),
            Law::Linear { start, end } => Law::Linear {
                start: *end,
                end: *start,
            },
        }
    }
}

/// Cross-section recipe of a face-face blend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BlendProfile {
    /// Rolling-ball round, constant or variable radius.
    Round { radius: Law },
    /// Flat chamfer set back `left` and `right` from the blended edge.
    Chamfer { left: f64, right: f64 },
}

impl BlendProfile {
    pub fn round(radius: f64) -> Self {
        BlendProfile::Round {
            radius: Law::Constant(radius),
        }
    }

    pub fn variable_round(start: f64, end: f64) -> Self {
        BlendProfile::Round {
            radius: Law::Linear { start, end },
        }
    }

    pub fn chamfer(left: f64, right: f64) -> Self {
        BlendProfile::Chamfer { left, right }
    }

    /// Offset of the spine from the left and right supports at `s`.
    pub fn offsets(&self, s: f64) -> (f64, f64) {
        match self {
            BlendProfile::Round { radius } => {
                let r = radius.eval(s);
                (r, r)
            }
            BlendProfile::Chamfer { left, right } => (*left, *right),
        }
    }

    /// Ruled profiles have no rolling-ball spine to take offsets from.
    pub fn is_ruled(&self) -> bool {
        matches!(self, BlendProfile::Chamfer { .. })
    }

    /// Constant rolling-ball radius, if the profile has one.
    pub fn constant_radius(&self) -> Option<f64> {
        match self {
            BlendProfile::Round { radius } if radius.is_constant() => Some(radius.eval(0.0)),
            _ => None,
        }
    }

    /// Radius at one end, `None` for chamfers.
    pub fn end_radius(&self, at_start: bool) -> Option<f64> {
        match self {
            BlendProfile::Round { radius } => Some(radius.eval(if at_start { 0.0 } else { 1.0 })),
            BlendProfile::Chamfer { .. } => None,
        }
    }

    /// Size used to compare neighbouring blends.
    pub fn size(&self) -> f64 {
        match self {
            BlendProfile::Round { radius } => radius.max_value(),
            BlendProfile::Chamfer { left, right } => left.max(*right),
        }
    }

    /// Valid when every offset is positive, except that a variable radius may
    /// shrink to zero at one end.
    pub fn is_valid(&self) -> bool {
        match self {
            BlendProfile::Round { radius } => radius.min_value() >= 0.0 && radius.max_value() > 0.0,
            BlendProfile::Chamfer { left, right } => *left > 0.0 && *right > 0.0,
        }
    }

    /// The profile seen running the other way along the edge.
    pub fn reversed(&self) -> Self {
        match self {
            BlendProfile::Round { radius } => BlendProfile::Round {
                radius: radius.reversed(),
            },
            BlendProfile::Chamfer { left, right } => BlendProfile::Chamfer {
                left: *right,
                right: *left,
            },
        }
    }
}
