//! Whether a face-face blend must wait for a smaller neighbour.

use cad_kernel::topology::brep::{CoedgeId, EdgeId, FaceId};
use cad_kernel::EntityStore;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{AttribId, BlendGraph, BlendKind};
use crate::error::BlendResult;

/// Reorder requirement on one side of a blend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReorderSide {
    #[default]
    NotNeeded,
    Needed,
    /// A smaller neighbour exists but has failed, so waiting for it is pointless.
    Impossible,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReorderInfo {
    pub left: ReorderSide,
    pub right: ReorderSide,
    /// Set on blends whose left and right have been swapped.
    pub rev: bool,
}

impl ReorderInfo {
    pub fn new(left: ReorderSide, right: ReorderSide, rev: bool) -> Self {
        Self { left, right, rev }
    }

    /// Number of sides needing a reorder. On reversed blends none and one
    /// swap places; any impossible side gives 0.
    pub fn reorder_no(&self) -> i32 {
        if self.left == ReorderSide::Impossible || self.right == ReorderSide::Impossible {
            return 0;
        }
        let base = [self.left, self.right]
            .iter()
            .filter(|s| **s == ReorderSide::Needed)
            .count() as i32;
        if self.rev { 1 - base } else { base }
    }

    pub fn needs_reorder(&self) -> bool {
        self.reorder_no() != 0
    }
}

fn coedge_on_face(store: &EntityStore, edge: EdgeId, face: FaceId) -> BlendResult<Option<CoedgeId>> {
    for &c in &store.edge(edge)?.coedges {
        if store.coedge_face(c)? == face {
            return Ok(Some(c));
        }
    }
    Ok(None)
}

/// Judge one support face: the edges either side of the blended edge in
/// that face are the neighbours that may shadow it.
fn side_info(
    graph: &BlendGraph,
    store: &EntityStore,
    id: AttribId,
    face: FaceId,
    tol: f64,
) -> BlendResult<ReorderSide> {
    let attrib = graph.get(id)?;
    let Some(edge) = attrib.owner_edge() else {
        return Ok(ReorderSide::NotNeeded);
    };
    let Some(coedge) = coedge_on_face(store, edge, face)? else {
        return Ok(ReorderSide::NotNeeded);
    };
    let c = store.coedge(coedge)?;
    let mut side = ReorderSide::NotNeeded;
    for neighbour in [c.prev, c.next] {
        let n_edge = store.coedge(neighbour)?.edge;
        if n_edge == edge {
            continue;
        }
        let Some((_, other)) = graph.of_edge(n_edge) else {
            continue;
        };
        if !other.cvty().same_sense(attrib.cvty()) || other.profile().size() >= attrib.profile().size() - tol {
            continue;
        }
        if other.failed() {
            return Ok(ReorderSide::Impossible);
        }
        if !other.done() {
            side = ReorderSide::Needed;
        }
    }
    Ok(side)
}

/// Reorder requirement of the blend `id` against its current neighbours.
pub fn reorder(graph: &BlendGraph, store: &EntityStore, id: AttribId, tol: f64) -> BlendResult<ReorderInfo> {
    let attrib = graph.get(id)?;
    if attrib.kind() != BlendKind::FaceFace {
        return Ok(ReorderInfo::default());
    }
    let supports = attrib.supports();
    let info = ReorderInfo::new(
        side_info(graph, store, id, supports.left, tol)?,
        side_info(graph, store, id, supports.right, tol)?,
        attrib.reversed(),
    );
    debug!(?id, ?info, number = info.reorder_no(), "reorder info");
    Ok(info)
}
