use cad_kernel::{EntityRef, KernelError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result of one stage-1 step: success, retry after other blends have been
/// computed, or give up on this blend for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlendOutcome {
    Success,
    RetryLater,
    Impossible,
}

impl BlendOutcome {
    /// Integer form: `1`, `0` or `-1`.
    pub fn code(self) -> i32 {
        match self {
            BlendOutcome::Success => 1,
            BlendOutcome::RetryLater => 0,
            BlendOutcome::Impossible => -1,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(BlendOutcome::Success),
            0 => Some(BlendOutcome::RetryLater),
            -1 => Some(BlendOutcome::Impossible),
            _ => None,
        }
    }

    pub fn is_success(self) -> bool {
        self == BlendOutcome::Success
    }

    /// The worse of two outcomes.
    pub fn and(self, other: Self) -> Self {
        if self.code() <= other.code() { self } else { other }
    }
}

/// Which support of a face-face blend a message refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn other(self) -> Self {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }

    pub fn index(self) -> usize {
        match self {
            Side::Left => 0,
            Side::Right => 1,
        }
    }
}

/// Error recorded on a blend attribute when it fails.
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
pub enum BlendError {
    #[error("blend has no {side:?} support")]
    MissingSupport { side: Side },

    #[error("convexity of the blended edge could not be determined")]
    UnknownConvexity,

    #[error("blended edge is smooth")]
    TangentEdge,

    #[error("blended edge changes convexity along its length")]
    MixedConvexity,

    #[error("cannot blend {what}")]
    UnsupportedGeometry { what: String },

    #[error("blend size {size} is too large for the model (limit {limit})")]
    SizeTooLarge { size: f64, limit: f64 },

    #[error("{side:?} spring curve does not lie on its support face")]
    SpringOffFace { side: Side },

    #[error("mitre between neighbouring blends failed")]
    MitreFailed,

    #[error("gap between blend segments could not be bridged")]
    GapNotBridged,

    #[error("blend geometry is impossible")]
    ImpossibleGeometry,

    #[error("blend end does not match its neighbour")]
    MateMismatch,

    #[error("gave up after {attempts} attempts")]
    AttemptsExhausted { attempts: i32 },

    #[error("entity {0:?} is missing")]
    MissingEntity(EntityRef),

    #[error("no live blend attribute with that id")]
    UnknownAttribute,

    #[error("entity {0:?} already carries a blend")]
    AlreadyBlended(EntityRef),

    #[error("blend profile is not valid")]
    InvalidProfile,

    #[error("kernel error: {0}")]
    Kernel(String),
}

impl From<KernelError> for BlendError {
    fn from(err: KernelError) -> Self {
        match err {
            KernelError::MissingEntity(entity) => BlendError::MissingEntity(entity),
            KernelError::Unsupported { operation, first, second } => BlendError::UnsupportedGeometry {
                what: format!("{operation} between {first} and {second}"),
            },
            other => BlendError::Kernel(other.to_string()),
        }
    }
}

impl BlendError {
    /// Whether the failure may go away once neighbouring blends exist.
    pub fn outcome(&self) -> BlendOutcome {
        match self {
            BlendError::GapNotBridged | BlendError::MateMismatch | BlendError::MitreFailed => BlendOutcome::RetryLater,
            _ => BlendOutcome::Impossible,
        }
    }
}

pub type BlendResult<T> = Result<T, BlendError>;
