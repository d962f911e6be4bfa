//! The context one blending run works in.
//!
//! A [`BlendSession`] owns everything that would otherwise be global: the
//! attribute graph with its history, convexity judgements, the infos
//! attached to built sheet entities, and sheet ends still waiting for a
//! neighbour. Dropping the session (or calling [`BlendSession::clear`])
//! releases all of it.

use std::collections::BTreeMap;

use cad_kernel::geometry::surfaces::{Plane, Sphere};
use cad_kernel::topology::brep::{BodyId, BodyKind, EdgeId, FaceId, ShellId, VertexId};
use cad_kernel::{EntityRef, EntityStore};
use tracing::{debug, instrument};

use crate::attrib::info::InfoTable;
use crate::attrib::{AttribId, AttribMut, BlendAttrib, BlendGraph, BlendInfo, SupportEntity};
use crate::config::BlendConfig;
use crate::convexity::{ConvexityCache, Cvty};
use crate::error::{BlendError, BlendResult, Side};
use crate::history::BlendHistory;
use crate::law::BlendProfile;
use crate::segend::Segend;
use crate::stage1::EndPlanRecord;

/// How a sheet end left waiting at a vertex expects to be finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingKind {
    /// Continues smoothly into the neighbour's sheet.
    Smooth,
    /// Meets the neighbour on a shared mitre plane.
    Mitre,
    /// One of the sheets closing on a vertex sphere.
    Sphere,
    /// Cut at a mixed-convexity vertex.
    Cuspate,
}

/// A built sheet end at a model vertex whose partner has not been built yet.
#[derive(Debug)]
pub struct PendingEnd {
    pub attrib: AttribId,
    pub kind: PendingKind,
    pub segend: Segend,
    pub cross_edge: Option<EdgeId>,
    pub face: FaceId,
}

/// Sphere shared by the sheets meeting at an all-blended corner.
#[derive(Debug, Clone, PartialEq)]
pub struct VertexSphere {
    pub sphere: Sphere,
    pub convex: bool,
    /// Attributes expected to close on the sphere.
    pub members: Vec<AttribId>,
    pub face: Option<FaceId>,
}

#[derive(Debug, Default)]
pub struct BlendSession {
    config: BlendConfig,
    pub graph: BlendGraph,
    pub history: BlendHistory,
    pub cvty_cache: ConvexityCache,
    pub infos: InfoTable,
    pub(crate) pending: BTreeMap<VertexId, Vec<PendingEnd>>,
    pub(crate) spheres: BTreeMap<VertexId, VertexSphere>,
    pub(crate) end_plans: Vec<EndPlanRecord>,
    sheet: Option<(BodyId, ShellId)>,
}

impl BlendSession {
    pub fn new(config: BlendConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &BlendConfig {
        &self.config
    }

    /// Write access to one attribute, backed up first.
    pub fn edit(&mut self, id: AttribId) -> BlendResult<AttribMut<'_>> {
        self.graph.edit(id, &mut self.history)
    }

    /// Ask for `edge` to be blended with `profile`. The edge must be sharp
    /// and of one convexity along its length.
    #[instrument(skip(self, store, profile))]
    pub fn request_blend(&mut self, store: &EntityStore, edge: EdgeId, profile: BlendProfile) -> BlendResult<AttribId> {
        if !profile.is_valid() {
            return Err(BlendError::InvalidProfile);
        }
        let (fwd, bwd) = store.edge_coedge_pair(edge)?;
        let fwd = fwd.ok_or(BlendError::MissingSupport { side: Side::Left })?;
        let bwd = bwd.ok_or(BlendError::MissingSupport { side: Side::Right })?;
        let supports = SupportEntity {
            left: store.coedge_face(fwd)?,
            right: store.coedge_face(bwd)?,
        };
        let cvty = self.cvty_cache.edge_convexity(store, edge, &self.config)?;
        check_blendable(cvty)?;
        let id = self
            .graph
            .add(BlendAttrib::face_face(edge, supports, profile, cvty), &mut self.history)?;
        self.note_supports(EntityRef::Edge(edge), supports);
        debug!(?id, ?cvty, "blend requested");
        Ok(id)
    }

    /// Constant-radius round on `edge`.
    pub fn request_round(&mut self, store: &EntityStore, edge: EdgeId, radius: f64) -> BlendResult<AttribId> {
        self.request_blend(store, edge, BlendProfile::round(radius))
    }

    /// Blend between two named faces that need not share an edge.
    #[instrument(skip(self, store, profile))]
    pub fn request_face_blend(
        &mut self,
        store: &EntityStore,
        left: FaceId,
        right: FaceId,
        profile: BlendProfile,
        convex: bool,
    ) -> BlendResult<AttribId> {
        if !profile.is_valid() {
            return Err(BlendError::InvalidProfile);
        }
        store.face(left)?;
        store.face(right)?;
        let supports = SupportEntity { left, right };
        let cvty = if convex { Cvty::CONVEX } else { Cvty::CONCAVE };
        let id = self
            .graph
            .add(BlendAttrib::face_only(supports, profile, cvty), &mut self.history)?;
        self.note_supports(EntityRef::Face(left), supports);
        Ok(id)
    }

    /// Set both setbacks of a face-face blend.
    pub fn set_setbacks(&mut self, id: AttribId, start: f64, end: f64) -> BlendResult<()> {
        let mut attrib = self.edit(id)?;
        attrib.set_setback(true, start);
        attrib.set_setback(false, end);
        Ok(())
    }

    pub fn set_def_plane(&mut self, id: AttribId, plane: Option<Plane>) -> BlendResult<()> {
        self.edit(id)?.set_def_plane(plane);
        Ok(())
    }

    fn note_supports(&mut self, blended: EntityRef, supports: SupportEntity) {
        for side in [Side::Left, Side::Right] {
            self.infos.attach(
                EntityRef::Face(supports.face(side)),
                BlendInfo::Support { entity: blended, side },
            );
        }
    }

    /// Shell of the sheet body, created on first use.
    pub fn sheet_shell(&mut self, store: &mut EntityStore) -> ShellId {
        if let Some((body, shell)) = self.sheet {
            if store.contains(EntityRef::Body(body)) && store.contains(EntityRef::Shell(shell)) {
                return shell;
            }
        }
        let (body, shell) = store.add_body(BodyKind::Sheet);
        self.sheet = Some((body, shell));
        shell
    }

    /// The sheet body, if anything has been built yet.
    pub fn sheet_body(&self) -> Option<BodyId> {
        self.sheet.map(|(body, _)| body)
    }

    pub fn end_plans(&self) -> &[EndPlanRecord] {
        &self.end_plans
    }

    pub fn vertex_sphere(&self, vertex: VertexId) -> Option<&VertexSphere> {
        self.spheres.get(&vertex)
    }

    /// Sheet ends still waiting at `vertex`.
    pub fn pending_at(&self, vertex: VertexId) -> &[PendingEnd] {
        self.pending.get(&vertex).map(Vec::as_slice).unwrap_or(&[])
    }

    /// End of session: drop every cache, pool and log.
    pub fn clear(&mut self) {
        self.cvty_cache.clear();
        self.infos.clear();
        self.pending.clear();
        self.spheres.clear();
        self.end_plans.clear();
        self.history.clear();
    }
}

/// Convexities a face-face blend can be built on.
pub(crate) fn check_blendable(cvty: Cvty) -> BlendResult<()> {
    if cvty.unknown() || cvty.unset() {
        return Err(BlendError::UnknownConvexity);
    }
    if cvty.mixed() {
        return Err(BlendError::MixedConvexity);
    }
    if cvty.tangent() {
        return Err(BlendError::TangentEdge);
    }
    Ok(())
}
