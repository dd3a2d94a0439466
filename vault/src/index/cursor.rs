//! Restartable iteration positions.
//!
//! A cursor remembers the next hash to visit, not a leaf, so it stays valid
//! when leaves split or merge between two steps.

use std::collections::VecDeque;

use crate::index::HashRange;
use crate::types::Slot;

/// Position of a leaf-by-leaf traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeCursor {
    next: Option<u64>,
}

impl Default for NodeCursor {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeCursor {
    /// A cursor at the start of the hash space.
    #[must_use]
    pub const fn new() -> Self {
        Self { next: Some(0) }
    }

    /// Next hash to visit, or `None` when the traversal is complete.
    #[must_use]
    pub const fn position(&self) -> Option<u64> {
        self.next
    }

    #[must_use]
    pub const fn is_done(&self) -> bool {
        self.next.is_none()
    }

    /// Move past the end of `range`.
    pub(crate) const fn advance_past(&mut self, range: HashRange) {
        self.next = range.end().checked_add(1);
    }
}

/// Position of an entry-by-entry traversal.
#[derive(Debug, Default)]
pub struct EntryCursor {
    pub(crate) nodes: NodeCursor,
    pub(crate) buffered: VecDeque<(String, Slot)>,
}

impl EntryCursor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether every entry has been returned.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.nodes.is_done() && self.buffered.is_empty()
    }
}
