//! The blend request graph: one attribute per blended entity, carrying the
//! state stage 1 needs to suspend, retry and resolve conflicts.
//!
//! Attributes are only mutable through an [`AttribMut`] guard, and the guard
//! can only be had from [`BlendGraph::edit`], which snapshots the attribute
//! into the history first.

pub mod info;
pub mod reorder;

use std::collections::HashMap;
use std::ops::Deref;

use cad_kernel::geometry::surfaces::Plane;
use cad_kernel::topology::brep::{EdgeId, FaceId};
use cad_kernel::EntityRef;
use serde::{Deserialize, Serialize};
use slotmap::{new_key_type, SlotMap};
use tracing::debug;

pub use info::{BlendInfo, InfoTable};
pub use reorder::{ReorderInfo, ReorderSide};

use crate::convexity::Cvty;
use crate::error::{BlendError, BlendOutcome, BlendResult, Side};
use crate::geom_cache::FfblendGeomRef;
use crate::history::{BlendHistory, Bulletin, HistoryMark};
use crate::law::BlendProfile;

new_key_type! {
    pub struct AttribId;
}

/// Whether cached explicit geometry still matches the blend recipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BlendStatus {
    #[default]
    Unset,
    Agree,
    Disagree,
}

/// How one end of a face-face blend is finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EndCondition {
    #[default]
    Unset,
    /// Capped against a face of the model.
    Closed,
    /// Runs on into more of the same blend sequence.
    InternalClosed,
    /// Meets a vertex blend.
    VertexBlend,
    /// Meets a neighbouring blend on a mitre.
    Mitred,
    /// Stops short of the vertex at a setback.
    Open,
    /// Finished against a smaller neighbouring blend computed first.
    Reordered,
    /// Not enough context: entity-entity blends.
    Unknown,
}

impl EndCondition {
    pub fn is_terminal(self) -> bool {
        !matches!(self, EndCondition::Unset | EndCondition::Unknown)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BlendHow {
    #[default]
    Default,
    RollOn,
    Capped,
}

/// Smoothness of the blend surface against one support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Continuity {
    Unset,
    Position,
    Slope,
    Curvature,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlendKind {
    /// Rolling-ball blend of the two faces either side of an edge.
    FaceFace,
    /// Blend between two named faces, not necessarily adjacent.
    FaceOnly,
}

/// The left and right supports of a blend at one stage of its computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportEntity {
    pub left: FaceId,
    pub right: FaceId,
}

impl SupportEntity {
    pub fn face(&self, side: Side) -> FaceId {
        match side {
            Side::Left => self.left,
            Side::Right => self.right,
        }
    }

    pub fn swapped(&self) -> Self {
        Self {
            left: self.right,
            right: self.left,
        }
    }
}

/// Face-face blend recipe and its per-end bookkeeping.
#[derive(Debug, Clone)]
pub struct FfBlend {
    cvty: Cvty,
    profile: BlendProfile,
    setbacks: [f64; 2],
    setback_diffs: [Option<f64>; 2],
    how: BlendHow,
    def_plane: Option<Plane>,
    ends: [EndCondition; 2],
    supports: Vec<SupportEntity>,
    reorder: Option<ReorderInfo>,
    geom: Option<FfblendGeomRef>,
}

fn end_index(at_start: bool) -> usize {
    if at_start { 0 } else { 1 }
}

/// One blend request.
#[derive(Debug, Clone)]
pub struct BlendAttrib {
    owner: Option<EntityRef>,
    kind: BlendKind,
    sheet_faces: Vec<FaceId>,
    status: BlendStatus,
    error: Option<BlendError>,
    outcome: Option<BlendOutcome>,
    suspended: bool,
    num_attempts: i32,
    primary: bool,
    split_child: bool,
    reversed: bool,
    deleted: bool,
    blend: FfBlend,
}

impl BlendAttrib {
    fn with_kind(owner: EntityRef, kind: BlendKind, supports: SupportEntity, profile: BlendProfile, cvty: Cvty) -> Self {
        let end = match kind {
            BlendKind::FaceFace => EndCondition::Unset,
            BlendKind::FaceOnly => EndCondition::Unknown,
        };
        Self {
            owner: Some(owner),
            kind,
            sheet_faces: Vec::new(),
            status: BlendStatus::Unset,
            error: None,
            outcome: None,
            suspended: false,
            num_attempts: 0,
            primary: true,
            split_child: false,
            reversed: false,
            deleted: false,
            blend: FfBlend {
                cvty,
                profile,
                setbacks: [0.0; 2],
                setback_diffs: [None; 2],
                how: BlendHow::Default,
                def_plane: None,
                ends: [end; 2],
                supports: vec![supports],
                reorder: None,
                geom: None,
            },
        }
    }

    pub fn face_face(edge: EdgeId, supports: SupportEntity, profile: BlendProfile, cvty: Cvty) -> Self {
        Self::with_kind(EntityRef::Edge(edge), BlendKind::FaceFace, supports, profile, cvty)
    }

    pub fn face_only(supports: SupportEntity, profile: BlendProfile, cvty: Cvty) -> Self {
        Self::with_kind(EntityRef::Face(supports.left), BlendKind::FaceOnly, supports, profile, cvty)
    }

    /// A copy carrying only the recipe: no owner, no results, fresh counters.
    pub fn copy_implicit(&self) -> Self {
        let mut blend = self.blend.clone();
        blend.geom = None;
        blend.reorder = None;
        blend.supports.truncate(1);
        if self.kind == BlendKind::FaceFace {
            blend.ends = [EndCondition::Unset; 2];
        }
        Self {
            owner: None,
            kind: self.kind,
            sheet_faces: Vec::new(),
            status: BlendStatus::Unset,
            error: None,
            outcome: None,
            suspended: false,
            num_attempts: 0,
            primary: self.primary,
            split_child: self.split_child,
            reversed: self.reversed,
            deleted: false,
            blend,
        }
    }

    pub fn owner(&self) -> Option<EntityRef> {
        self.owner
    }

    pub fn owner_edge(&self) -> Option<EdgeId> {
        match self.owner {
            Some(EntityRef::Edge(e)) => Some(e),
            _ => None,
        }
    }

    pub fn kind(&self) -> BlendKind {
        self.kind
    }

    pub fn sheet_faces(&self) -> &[FaceId] {
        &self.sheet_faces
    }

    pub fn status(&self) -> BlendStatus {
        self.status
    }

    /// The first error recorded, even if later attempts failed differently.
    pub fn error(&self) -> Option<&BlendError> {
        self.error.as_ref()
    }

    pub fn outcome(&self) -> Option<BlendOutcome> {
        self.outcome
    }

    pub fn done(&self) -> bool {
        self.outcome == Some(BlendOutcome::Success)
    }

    pub fn failed(&self) -> bool {
        self.outcome == Some(BlendOutcome::Impossible)
    }

    pub fn suspended(&self) -> bool {
        self.suspended
    }

    /// Seen by stage 1 but never attempted.
    pub fn seen(&self) -> bool {
        self.num_attempts < 0
    }

    pub fn times_attempted(&self) -> i32 {
        self.num_attempts.max(0)
    }

    pub fn primary(&self) -> bool {
        self.primary
    }

    pub fn split_child(&self) -> bool {
        self.split_child
    }

    pub fn reversed(&self) -> bool {
        self.reversed
    }

    pub fn deleted(&self) -> bool {
        self.deleted
    }

    pub fn cvty(&self) -> Cvty {
        self.blend.cvty
    }

    pub fn profile(&self) -> &BlendProfile {
        &self.blend.profile
    }

    pub fn setback(&self, at_start: bool) -> f64 {
        self.blend.setbacks[end_index(at_start)]
    }

    pub fn setback_diff(&self, at_start: bool) -> Option<f64> {
        self.blend.setback_diffs[end_index(at_start)]
    }

    pub fn how(&self) -> BlendHow {
        self.blend.how
    }

    pub fn def_plane(&self) -> Option<&Plane> {
        self.blend.def_plane.as_ref()
    }

    pub fn end_condition(&self, at_start: bool) -> EndCondition {
        self.blend.ends[end_index(at_start)]
    }

    /// The support pair currently in use: the top of the stack.
    pub fn supports(&self) -> SupportEntity {
        // The stack is never emptied below its first entry.
        self.blend.supports[self.blend.supports.len() - 1]
    }

    pub fn support_stack(&self) -> &[SupportEntity] {
        &self.blend.supports
    }

    pub fn cached_reorder(&self) -> Option<ReorderInfo> {
        self.blend.reorder
    }

    pub fn geom(&self) -> Option<&FfblendGeomRef> {
        self.blend.geom.as_ref()
    }

    pub fn continuity(&self, _side: Side) -> Continuity {
        if self.blend.profile.is_ruled() { Continuity::Position } else { Continuity::Slope }
    }
}

/// Write access to one attribute. Exists only after the attribute has been
/// backed up.
pub struct AttribMut<'a> {
    attrib: &'a mut BlendAttrib,
}

impl Deref for AttribMut<'_> {
    type Target = BlendAttrib;
    fn deref(&self) -> &BlendAttrib {
        self.attrib
    }
}

impl AttribMut<'_> {
    /// Move to agree or disagree. There is no way back to unset.
    pub fn set_status(&mut self, status: BlendStatus) -> bool {
        if status == BlendStatus::Unset {
            return false;
        }
        self.attrib.status = status;
        true
    }

    /// Keep `error` only if nothing was recorded before.
    pub fn record_error(&mut self, error: BlendError) {
        if self.attrib.error.is_none() {
            self.attrib.error = Some(error);
        }
    }

    pub fn set_outcome(&mut self, outcome: BlendOutcome) {
        self.attrib.outcome = Some(outcome);
    }

    pub fn suspend(&mut self) {
        self.attrib.suspended = true;
    }

    pub fn lift_suspension(&mut self) {
        self.attrib.suspended = false;
    }

    pub fn note_seen(&mut self) {
        if self.attrib.num_attempts == 0 {
            self.attrib.num_attempts = -1;
        }
    }

    pub fn note_attempt(&mut self) {
        self.attrib.num_attempts = self.attrib.num_attempts.max(0) + 1;
    }

    pub fn set_primary(&mut self, primary: bool) {
        self.attrib.primary = primary;
    }

    pub fn set_split_child(&mut self, split_child: bool) {
        self.attrib.split_child = split_child;
    }

    pub fn set_reversed(&mut self, reversed: bool) {
        self.attrib.reversed = reversed;
    }

    pub fn set_cvty(&mut self, cvty: Cvty) {
        self.attrib.blend.cvty = cvty;
    }

    pub fn set_profile(&mut self, profile: BlendProfile) {
        self.attrib.blend.profile = profile;
    }

    pub fn set_setback(&mut self, at_start: bool, setback: f64) {
        self.attrib.blend.setbacks[end_index(at_start)] = setback.max(0.0);
    }

    pub fn set_setback_diff(&mut self, at_start: bool, diff: Option<f64>) {
        self.attrib.blend.setback_diffs[end_index(at_start)] = diff;
    }

    pub fn set_how(&mut self, how: BlendHow) {
        self.attrib.blend.how = how;
    }

    pub fn set_def_plane(&mut self, plane: Option<Plane>) {
        self.attrib.blend.def_plane = plane;
    }

    /// Resolve one end. A terminal condition, once set, is kept: asking for a
    /// different one returns `false` and changes nothing.
    pub fn set_end_condition(&mut self, at_start: bool, condition: EndCondition) -> bool {
        let slot = &mut self.attrib.blend.ends[end_index(at_start)];
        if slot.is_terminal() && *slot != condition {
            debug!(current = ?*slot, requested = ?condition, "end condition already resolved");
            return false;
        }
        *slot = condition;
        true
    }

    pub fn push_supports(&mut self, supports: SupportEntity) {
        self.attrib.blend.supports.push(supports);
    }

    /// Pop back to the previous pair. The first pair is never popped.
    pub fn pop_supports(&mut self) -> Option<SupportEntity> {
        if self.attrib.blend.supports.len() > 1 {
            self.attrib.blend.supports.pop()
        } else {
            None
        }
    }

    pub fn set_reorder(&mut self, info: Option<ReorderInfo>) {
        self.attrib.blend.reorder = info;
    }

    pub fn set_geom(&mut self, geom: Option<FfblendGeomRef>) {
        self.attrib.blend.geom = geom;
    }

    pub fn add_sheet_face(&mut self, face: FaceId) {
        if !self.attrib.sheet_faces.contains(&face) {
            self.attrib.sheet_faces.push(face);
        }
    }

    pub fn forget_sheet_face(&mut self, face: FaceId) {
        self.attrib.sheet_faces.retain(|f| *f != face);
    }

    /// Drop every stage-1 result so the blend can be computed afresh.
    pub fn reset_results(&mut self) {
        self.attrib.sheet_faces.clear();
        self.attrib.outcome = None;
        self.attrib.blend.geom = None;
        self.attrib.blend.reorder = None;
    }
}

/// Every blend attribute of one session, indexed by owner.
#[derive(Debug, Default)]
pub struct BlendGraph {
    attribs: SlotMap<AttribId, BlendAttrib>,
    by_owner: HashMap<EntityRef, AttribId>,
}

impl BlendGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live attributes.
    pub fn len(&self) -> usize {
        self.attribs.values().filter(|a| !a.deleted).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: AttribId) -> BlendResult<&BlendAttrib> {
        match self.attribs.get(id) {
            Some(a) if !a.deleted => Ok(a),
            _ => Err(BlendError::UnknownAttribute),
        }
    }

    pub fn ids(&self) -> impl Iterator<Item = AttribId> + '_ {
        self.attribs.iter().filter(|(_, a)| !a.deleted).map(|(id, _)| id)
    }

    /// The live attribute owned by `entity`.
    pub fn of_owner(&self, entity: EntityRef) -> Option<AttribId> {
        let id = *self.by_owner.get(&entity)?;
        self.get(id).ok().map(|_| id)
    }

    pub fn of_edge(&self, edge: EdgeId) -> Option<(AttribId, &BlendAttrib)> {
        let id = self.of_owner(EntityRef::Edge(edge))?;
        Some((id, self.get(id).ok()?))
    }

    pub fn add(&mut self, attrib: BlendAttrib, history: &mut BlendHistory) -> BlendResult<AttribId> {
        if let Some(owner) = attrib.owner {
            if self.of_owner(owner).is_some() {
                return Err(BlendError::AlreadyBlended(owner));
            }
        }
        let owner = attrib.owner;
        let id = self.attribs.insert(attrib);
        if let Some(owner) = owner {
            self.by_owner.insert(owner, id);
        }
        history.record(Bulletin::Created { id });
        Ok(id)
    }

    /// Back the attribute up, then hand out write access to it.
    pub fn edit<'a>(&'a mut self, id: AttribId, history: &mut BlendHistory) -> BlendResult<AttribMut<'a>> {
        let attrib = match self.attribs.get_mut(id) {
            Some(a) if !a.deleted => a,
            _ => return Err(BlendError::UnknownAttribute),
        };
        history.record(Bulletin::Changed {
            id,
            before: Box::new(attrib.clone()),
        });
        Ok(AttribMut { attrib })
    }

    /// Detach the attribute from its owner. Undone by rolling back.
    pub fn delete_blend(&mut self, id: AttribId, history: &mut BlendHistory) -> BlendResult<()> {
        let mut guard = self.edit(id, history)?;
        guard.attrib.deleted = true;
        guard.attrib.blend.geom = None;
        Ok(())
    }

    /// Undo every change recorded after `mark`.
    pub fn roll_back(&mut self, history: &mut BlendHistory, mark: HistoryMark) {
        for bulletin in history.unwind_to(mark) {
            match bulletin {
                Bulletin::Changed { id, before } => {
                    if let Some(slot) = self.attribs.get_mut(id) {
                        *slot = *before;
                    }
                }
                Bulletin::Created { id } => {
                    if let Some(attrib) = self.attribs.remove(id) {
                        if let Some(owner) = attrib.owner {
                            if self.by_owner.get(&owner) == Some(&id) {
                                self.by_owner.remove(&owner);
                            }
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cad_kernel::topology::primitives::make_block;
    use cad_kernel::{EntityStore, Point3};

    fn graph_with_one() -> (BlendGraph, BlendHistory, AttribId) {
        let mut store = EntityStore::new();
        let body = make_block(&mut store, Point3::origin(), Point3::new(1.0, 1.0, 1.0)).unwrap();
        let edge = store.body_edges(body).unwrap()[0];
        let faces = store.edge_faces(edge).unwrap();
        let supports = SupportEntity {
            left: faces[0],
            right: faces[1],
        };
        let mut graph = BlendGraph::new();
        let mut history = BlendHistory::new();
        let id = graph
            .add(BlendAttrib::face_face(edge, supports, BlendProfile::round(0.1), Cvty::CONVEX), &mut history)
            .unwrap();
        (graph, history, id)
    }

    #[test]
    fn test_every_edit_backs_up_first() {
        let (mut graph, mut history, id) = graph_with_one();
        assert_eq!(history.backups_of(id), 0);
        graph.edit(id, &mut history).unwrap().note_seen();
        graph.edit(id, &mut history).unwrap().note_attempt();
        assert_eq!(history.backups_of(id), 2);
        assert_eq!(graph.get(id).unwrap().times_attempted(), 1);
    }

    #[test]
    fn test_attempt_counter_semantics() {
        let (mut graph, mut history, id) = graph_with_one();
        assert!(!graph.get(id).unwrap().seen());
        graph.edit(id, &mut history).unwrap().note_seen();
        let a = graph.get(id).unwrap();
        assert!(a.seen());
        assert_eq!(a.times_attempted(), 0);
        let mut guard = graph.edit(id, &mut history).unwrap();
        guard.note_attempt();
        guard.note_attempt();
        guard.note_seen();
        assert_eq!(guard.times_attempted(), 2);
        drop(guard);
        assert!(!graph.get(id).unwrap().seen());
    }

    #[test]
    fn test_status_never_returns_to_unset() {
        let (mut graph, mut history, id) = graph_with_one();
        let mut guard = graph.edit(id, &mut history).unwrap();
        assert!(guard.set_status(BlendStatus::Agree));
        assert!(!guard.set_status(BlendStatus::Unset));
        assert_eq!(guard.status(), BlendStatus::Agree);
    }

    #[test]
    fn test_first_error_is_kept() {
        let (mut graph, mut history, id) = graph_with_one();
        let mut guard = graph.edit(id, &mut history).unwrap();
        guard.record_error(BlendError::GapNotBridged);
        guard.record_error(BlendError::ImpossibleGeometry);
        assert_eq!(guard.error(), Some(&BlendError::GapNotBridged));
    }

    #[test]
    fn test_terminal_end_conditions_are_sticky() {
        let (mut graph, mut history, id) = graph_with_one();
        let mut guard = graph.edit(id, &mut history).unwrap();
        assert!(guard.set_end_condition(true, EndCondition::Mitred));
        assert!(guard.set_end_condition(true, EndCondition::Mitred));
        assert!(!guard.set_end_condition(true, EndCondition::Open));
        assert_eq!(guard.end_condition(true), EndCondition::Mitred);
        assert_eq!(guard.end_condition(false), EndCondition::Unset);
    }

    #[test]
    fn test_support_stack_keeps_first_pair() {
        let (mut graph, mut history, id) = graph_with_one();
        let first = graph.get(id).unwrap().supports();
        let mut guard = graph.edit(id, &mut history).unwrap();
        guard.push_supports(first.swapped());
        assert_eq!(guard.supports(), first.swapped());
        assert_eq!(guard.support_stack().len(), 2);
        assert_eq!(guard.pop_supports(), Some(first.swapped()));
        assert_eq!(guard.pop_supports(), None);
        assert_eq!(guard.supports(), first);
    }

    #[test]
    fn test_roll_back_restores_and_removes() {
        let (mut graph, mut history, id) = graph_with_one();
        let mark = history.mark();
        graph.edit(id, &mut history).unwrap().suspend();
        let owner = graph.get(id).unwrap().owner().unwrap();
        graph.delete_blend(id, &mut history).unwrap();
        assert!(graph.get(id).is_err());
        assert!(graph.of_owner(owner).is_none());
        graph.roll_back(&mut history, mark);
        assert!(!graph.get(id).unwrap().suspended());
        assert_eq!(graph.of_owner(owner), Some(id));

        graph.roll_back(&mut history, BlendHistory::new().mark());
        assert!(graph.is_empty());
    }

    #[test]
    fn test_copy_implicit_drops_owner_and_results() {
        let (mut graph, mut history, id) = graph_with_one();
        {
            let mut guard = graph.edit(id, &mut history).unwrap();
            guard.note_attempt();
            guard.record_error(BlendError::MitreFailed);
            guard.set_end_condition(false, EndCondition::Closed);
        }
        let copy = graph.get(id).unwrap().copy_implicit();
        assert!(copy.owner().is_none());
        assert!(copy.error().is_none());
        assert_eq!(copy.times_attempted(), 0);
        assert_eq!(copy.end_condition(false), EndCondition::Unset);
        assert_eq!(copy.profile(), &BlendProfile::round(0.1));
        assert_eq!(copy.continuity(Side::Left), Continuity::Slope);
    }

    #[test]
    fn test_duplicate_request_rejected() {
        let (mut graph, mut history, id) = graph_with_one();
        let copy = graph.get(id).unwrap().clone();
        assert!(matches!(graph.add(copy, &mut history), Err(BlendError::AlreadyBlended(_))));
    }
}
