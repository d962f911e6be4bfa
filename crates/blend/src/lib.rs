//! Stage 1 of edge blending: from blend requests on a B-rep model to the
//! sheet body of blend faces that a later stage will sew into the solid.
//!
//! A caller opens a [`BlendSession`], asks for edges (or pairs of faces) to
//! be blended, and runs [`run_stage1`]. Each request becomes an attribute in
//! the session's [`attrib::BlendGraph`]; stage 1 builds its sheet faces in the
//! kernel's [`cad_kernel::EntityStore`], deferring and retrying blends that
//! depend on their neighbours, and reports what happened.

pub mod attrib;
pub mod chain;
pub mod config;
pub mod convexity;
pub mod error;
pub mod geom_cache;
pub mod history;
pub mod intercept;
pub mod law;
pub mod segend;
pub mod session;
pub mod stage1;

pub use attrib::{AttribId, BlendAttrib, BlendGraph, BlendInfo, BlendKind, BlendStatus, EndCondition, SupportEntity};
pub use config::BlendConfig;
pub use convexity::{ConvexityCache, Cvty, CvtyCalculator, EdCvtyInfo, PtCvtyInfo};
pub use error::{BlendError, BlendOutcome, BlendResult, Side};
pub use geom_cache::{FfblendGeom, FfblendGeomRef, PointCur, PointCurSurf};
pub use history::{BlendHistory, HistoryMark};
pub use intercept::{Intercept, Segside, SpringIntRel};
pub use law::{BlendProfile, Law};
pub use segend::Segend;
pub use session::BlendSession;
pub use stage1::{
    make_sheet_faces, move_bl_attrib_to_list_end, run_stage1, AttribReport, EndPlanKind, EndPlanRecord, Stage1Report,
};
