//! Roll-back log for blend attributes.
//!
//! Every change to an attribute is preceded by a snapshot of it, so a run of
//! stage 1 can be undone back to any earlier mark.

use crate::attrib::{AttribId, BlendAttrib};

/// A point in the log to roll back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct HistoryMark(usize);

#[derive(Debug, Clone)]
pub(crate) enum Bulletin {
    /// The attribute as it was before a change.
    Changed { id: AttribId, before: Box<BlendAttrib> },
    Created { id: AttribId },
}

impl Bulletin {
    fn id(&self) -> AttribId {
        match self {
            Bulletin::Changed { id, .. } | Bulletin::Created { id } => *id,
        }
    }
}

#[derive(Debug, Default)]
pub struct BlendHistory {
    bulletins: Vec<Bulletin>,
}

impl BlendHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&self) -> HistoryMark {
        HistoryMark(self.bulletins.len())
    }

    pub fn len(&self) -> usize {
        self.bulletins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bulletins.is_empty()
    }

    /// How many snapshots of `id` have been taken.
    pub fn backups_of(&self, id: AttribId) -> usize {
        self.bulletins
            .iter()
            .filter(|b| matches!(b, Bulletin::Changed { .. }) && b.id() == id)
            .count()
    }

    pub fn clear(&mut self) {
        self.bulletins.clear();
    }

    pub(crate) fn record(&mut self, bulletin: Bulletin) {
        self.bulletins.push(bulletin);
    }

    /// Bulletins after `mark`, newest first, removed from the log.
    pub(crate) fn unwind_to(&mut self, mark: HistoryMark) -> Vec<Bulletin> {
        let mut tail = self.bulletins.split_off(mark.0.min(self.bulletins.len()));
        tail.reverse();
        tail
    }
}
