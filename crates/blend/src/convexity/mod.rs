//! Convexity of the junction between two surfaces along a curve.
//!
//! Judgements are kept as raw angles ([`PtCvtyInfo`], [`EdCvtyInfo`]) and only
//! turned into a [`Cvty`] when a caller instantiates them at its own angular
//! tolerance.

pub mod cache;
pub mod calculator;
pub mod cvty;
pub mod info;

pub use cache::{ConvexityCache, EdgePoint};
pub use calculator::{CvtyCalculator, EvalSide, SupportTrack};
pub use cvty::Cvty;
pub use info::{EdCvtyInfo, PtCvtyInfo};
