//! Bookkeeping attached to the entities stage 1 builds, recording where each
//! piece of the blend sheet came from.

use std::collections::BTreeMap;
use std::mem::discriminant;

use cad_kernel::topology::brep::{EdgeId, FaceId, VertexId};
use cad_kernel::{EntityRef, Point3};
use serde::{Deserialize, Serialize};

use super::AttribId;
use crate::error::Side;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BlendInfo {
    /// The owner is a support of a blend on the given side.
    Support { entity: EntityRef, side: Side },
    /// Sheet face capped against a model face.
    CapFace { cap: FaceId },
    /// Sheet face built explicitly for one attribute.
    ExplicitBlend { attrib: AttribId },
    /// Sheet edge lying on a support face.
    Spring { support: FaceId, side: Side },
    /// Sheet edge running along a model edge.
    AdjEdge { edge: EdgeId },
    /// Sheet face ending against a model face or a neighbouring blend.
    AdjFace { face: FaceId },
    /// Sheet edge closing a blend end, with the model vertex it replaces.
    CrossEdge { vertex: Option<VertexId> },
    /// Cross edge across which the blend continues smoothly.
    TanCrossEdge { vertex: Option<VertexId> },
    PointVertexXRef { model_vertex: VertexId },
    EdgeVertexXRef { model_vertex: VertexId },
    /// Sheet edge coincident with a model edge.
    EdgeCoincidence { model_edge: EdgeId },
    /// Where a cross edge crosses the model.
    CrossPosition { position: Point3 },
}

/// Infos by the sheet entity that owns them.
#[derive(Debug, Clone, Default)]
pub struct InfoTable {
    by_owner: BTreeMap<EntityRef, Vec<BlendInfo>>,
}

impl InfoTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Support infos are kept at the front of the owner's list.
    pub fn attach(&mut self, owner: EntityRef, info: BlendInfo) {
        let list = self.by_owner.entry(owner).or_default();
        if list.contains(&info) {
            return;
        }
        let support = matches!(info, BlendInfo::Support { .. });
        list.push(info);
        if support {
            normalise_supports(list);
        }
    }

    pub fn infos_of(&self, owner: EntityRef) -> &[BlendInfo] {
        self.by_owner.get(&owner).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn owners(&self) -> impl Iterator<Item = EntityRef> + '_ {
        self.by_owner.keys().copied()
    }

    pub fn detach_all(&mut self, owner: EntityRef) -> Vec<BlendInfo> {
        self.by_owner.remove(&owner).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.by_owner.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.by_owner.clear();
    }
}

/// Model entities the info refers to.
pub fn supports(info: &BlendInfo) -> Vec<EntityRef> {
    match info {
        BlendInfo::Support { entity, .. } => vec![*entity],
        BlendInfo::CapFace { cap } => vec![EntityRef::Face(*cap)],
        BlendInfo::Spring { support, .. } => vec![EntityRef::Face(*support)],
        BlendInfo::AdjEdge { edge } => vec![EntityRef::Edge(*edge)],
        BlendInfo::AdjFace { face } => vec![EntityRef::Face(*face)],
        BlendInfo::CrossEdge { vertex } | BlendInfo::TanCrossEdge { vertex } => {
            vertex.map(EntityRef::Vertex).into_iter().collect()
        }
        BlendInfo::PointVertexXRef { model_vertex } | BlendInfo::EdgeVertexXRef { model_vertex } => {
            vec![EntityRef::Vertex(*model_vertex)]
        }
        BlendInfo::EdgeCoincidence { model_edge } => vec![EntityRef::Edge(*model_edge)],
        BlendInfo::ExplicitBlend { .. } | BlendInfo::CrossPosition { .. } => Vec::new(),
    }
}

/// Whether two infos play the same role, so a patterned copy of one may
/// stand in for the other.
pub fn pattern_compatible(a: &BlendInfo, b: &BlendInfo) -> bool {
    if discriminant(a) != discriminant(b) {
        return false;
    }
    match (a, b) {
        (BlendInfo::Support { side: sa, .. }, BlendInfo::Support { side: sb, .. })
        | (BlendInfo::Spring { side: sa, .. }, BlendInfo::Spring { side: sb, .. }) => sa == sb,
        (BlendInfo::CrossEdge { vertex: va }, BlendInfo::CrossEdge { vertex: vb })
        | (BlendInfo::TanCrossEdge { vertex: va }, BlendInfo::TanCrossEdge { vertex: vb }) => {
            va.is_some() == vb.is_some()
        }
        _ => true,
    }
}

/// The owner has been split into `parts`: each part carries a copy of every
/// info the old owner had.
pub fn split_owner(table: &mut InfoTable, old: EntityRef, parts: &[EntityRef]) {
    let infos = table.detach_all(old);
    for &part in parts {
        for info in &infos {
            table.attach(part, info.clone());
        }
    }
}

/// `gone` has been merged into `keep`. Infos of `gone` that duplicate the
/// role of one already on `keep` are dropped.
pub fn merge_owner(table: &mut InfoTable, keep: EntityRef, gone: EntityRef) {
    for info in table.detach_all(gone) {
        let duplicate = table
            .infos_of(keep)
            .iter()
            .any(|k| pattern_compatible(k, &info) && supports(k) == supports(&info));
        if !duplicate {
            table.attach(keep, info);
        }
    }
}

/// Put support infos first, left before right, without duplicates.
pub fn normalise_supports(list: &mut Vec<BlendInfo>) {
    let rank = |info: &BlendInfo| match info {
        BlendInfo::Support { side: Side::Left, .. } => 0,
        BlendInfo::Support { side: Side::Right, .. } => 1,
        _ => 2,
    };
    list.sort_by_key(rank);
    let mut seen: Vec<BlendInfo> = Vec::with_capacity(list.len());
    list.retain(|info| {
        if matches!(info, BlendInfo::Support { .. }) && seen.contains(info) {
            return false;
        }
        seen.push(info.clone());
        true
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    fn faces(n: usize) -> Vec<FaceId> {
        let mut map: SlotMap<FaceId, ()> = SlotMap::with_key();
        (0..n).map(|_| map.insert(())).collect()
    }

    #[test]
    fn test_supports_lists_model_entities() {
        let f = faces(1);
        assert_eq!(supports(&BlendInfo::CapFace { cap: f[0] }), vec![EntityRef::Face(f[0])]);
        assert!(supports(&BlendInfo::CrossEdge { vertex: None }).is_empty());
        assert!(supports(&BlendInfo::CrossPosition { position: Point3::origin() }).is_empty());
    }

    #[test]
    fn test_pattern_compatibility() {
        let f = faces(2);
        let left = BlendInfo::Spring { support: f[0], side: Side::Left };
        assert!(pattern_compatible(&left, &BlendInfo::Spring { support: f[1], side: Side::Left }));
        assert!(!pattern_compatible(&left, &BlendInfo::Spring { support: f[0], side: Side::Right }));
        assert!(!pattern_compatible(&left, &BlendInfo::AdjFace { face: f[0] }));
    }

    #[test]
    fn test_merge_owner_drops_duplicate_roles() {
        let f = faces(4);
        let (a, b) = (EntityRef::Face(f[2]), EntityRef::Face(f[3]));
        let mut table = InfoTable::new();
        table.attach(a, BlendInfo::CapFace { cap: f[0] });
        table.attach(b, BlendInfo::CapFace { cap: f[0] });
        table.attach(b, BlendInfo::AdjFace { face: f[1] });
        merge_owner(&mut table, a, b);
        assert!(table.infos_of(b).is_empty());
        assert_eq!(table.infos_of(a).len(), 2);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_split_then_merge_owner() {
        let f = faces(4);
        let (old, a, b) = (EntityRef::Face(f[1]), EntityRef::Face(f[2]), EntityRef::Face(f[3]));
        let mut table = InfoTable::new();
        table.attach(old, BlendInfo::CapFace { cap: f[0] });
        split_owner(&mut table, old, &[a, b]);
        assert!(table.infos_of(old).is_empty());
        assert_eq!(table.infos_of(a), table.infos_of(b));
        merge_owner(&mut table, a, b);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_attach_keeps_supports_first() {
        let f = faces(3);
        let owner = EntityRef::Face(f[2]);
        let mut table = InfoTable::new();
        let left = BlendInfo::Support { entity: EntityRef::Face(f[0]), side: Side::Left };
        let right = BlendInfo::Support { entity: EntityRef::Face(f[1]), side: Side::Right };
        table.attach(owner, BlendInfo::AdjFace { face: f[0] });
        table.attach(owner, right.clone());
        table.attach(owner, left.clone());
        table.attach(owner, right.clone());
        assert_eq!(table.infos_of(owner), &[left, right, BlendInfo::AdjFace { face: f[0] }][..]);
    }

    #[test]
    fn test_normalise_supports_orders_and_dedupes() {
        let f = faces(2);
        let right = BlendInfo::Support { entity: EntityRef::Face(f[1]), side: Side::Right };
        let left = BlendInfo::Support { entity: EntityRef::Face(f[0]), side: Side::Left };
        let mut list = vec![BlendInfo::AdjFace { face: f[0] }, right.clone(), left.clone(), right.clone()];
        normalise_supports(&mut list);
        assert_eq!(list, vec![left, right, BlendInfo::AdjFace { face: f[0] }]);
    }
}
