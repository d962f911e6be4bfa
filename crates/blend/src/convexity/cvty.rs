use std::fmt;
use std::ops::BitOr;

use serde::{Deserialize, Serialize};

/// Convexity classification as a bit set.
///
/// The primary bits (`CONVEX`, `CONCAVE`) never appear together; combining
/// them yields `MIXED`. `TANGENT` and `INFLECT` qualify a primary bit. The
/// empty set means *not evaluated* and is distinct from the `UNKNOWN` bit.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Cvty(u8);

impl Cvty {
    pub const UNSET: Cvty = Cvty(0);
    pub const CONVEX: Cvty = Cvty(1);
    pub const CONCAVE: Cvty = Cvty(1 << 1);
    pub const TANGENT: Cvty = Cvty(1 << 2);
    pub const INFLECT: Cvty = Cvty(1 << 3);
    pub const MIXED: Cvty = Cvty(1 << 4);
    pub const KNIFE: Cvty = Cvty(1 << 5);
    pub const UNKNOWN: Cvty = Cvty(1 << 6);

    const PRIMARY: u8 = Self::CONVEX.0 | Self::CONCAVE.0;

    pub fn bits(self) -> u8 {
        self.0
    }

    fn has(self, flag: Cvty) -> bool {
        self.0 & flag.0 == flag.0 && flag.0 != 0
    }

    pub fn unset(self) -> bool {
        self.0 == 0
    }

    pub fn unknown(self) -> bool {
        self.has(Self::UNKNOWN)
    }

    pub fn convex(self) -> bool {
        self.has(Self::CONVEX)
    }

    pub fn concave(self) -> bool {
        self.has(Self::CONCAVE)
    }

    pub fn tangent(self) -> bool {
        self.has(Self::TANGENT)
    }

    pub fn inflect(self) -> bool {
        self.has(Self::INFLECT)
    }

    pub fn mixed(self) -> bool {
        self.has(Self::MIXED)
    }

    pub fn knife(self) -> bool {
        self.has(Self::KNIFE)
    }

    /// Strictly convex: convex and not merely tangent.
    pub fn sharp_convex(self) -> bool {
        self.convex() && !self.tangent()
    }

    pub fn sharp_concave(self) -> bool {
        self.concave() && !self.tangent()
    }

    /// A new value with `flag` added. Adding a primary bit that conflicts with
    /// the existing one yields `MIXED` instead.
    pub fn with(self, flag: Cvty) -> Cvty {
        let primary = (self.0 | flag.0) & Self::PRIMARY;
        if primary == Self::PRIMARY {
            Cvty((self.0 | flag.0) & !Self::PRIMARY | Self::MIXED.0)
        } else {
            Cvty(self.0 | flag.0)
        }
    }

    /// Only the bits that sub-classify a tangent junction.
    pub fn tangent_subclass(self) -> Cvty {
        Cvty(self.0 & (Self::PRIMARY | Self::INFLECT.0))
    }

    /// Combine judgements made at different points of one edge.
    pub fn merge(self, other: Cvty) -> Cvty {
        if self.unset() {
            return other;
        }
        if other.unset() {
            return self;
        }
        if self.unknown() || other.unknown() {
            return Self::UNKNOWN;
        }
        self.with(other)
    }

    /// Whether two edges have compatible convexity for sharing a blend vertex.
    pub fn same_sense(self, other: Cvty) -> bool {
        (self.convex() && other.convex()) || (self.concave() && other.concave())
    }
}

impl BitOr for Cvty {
    type Output = Cvty;
    fn bitor(self, rhs: Cvty) -> Cvty {
        self.with(rhs)
    }
}

impl fmt::Debug for Cvty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.unset() {
            return write!(f, "Cvty(unset)");
        }
        let names = [
            (Self::CONVEX, "convex"),
            (Self::CONCAVE, "concave"),
            (Self::TANGENT, "tangent"),
            (Self::INFLECT, "inflect"),
            (Self::MIXED, "mixed"),
            (Self::KNIFE, "knife"),
            (Self::UNKNOWN, "unknown"),
        ];
        let set: Vec<&str> = names
            .iter()
            .filter(|(flag, _)| self.has(*flag))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "Cvty({})", set.join("|"))
    }
}
