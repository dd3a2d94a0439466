//! LRU bookkeeping of resident leaf payloads.

use std::collections::{HashMap, VecDeque};

use crate::index::HashRange;

/// Tracks which ranges are resident, their sizes, and their recency.
///
/// Front of `order` is least recently used.
#[derive(Debug, Default)]
pub struct ResidencyTracker {
    order: VecDeque<HashRange>,
    sizes: HashMap<HashRange, usize>,
    total: usize,
}

impl ResidencyTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a use of `range`, now holding `bytes`.
    pub fn mark_used(&mut self, range: HashRange, bytes: usize) {
        if let Some(old) = self.sizes.insert(range, bytes) {
            self.total -= old;
            self.order.retain(|r| *r != range);
        }
        self.total += bytes;
        self.order.push_back(range);
    }

    /// Forget `range`. Returns the bytes it held.
    pub fn mark_unloaded(&mut self, range: HashRange) -> usize {
        let Some(bytes) = self.sizes.remove(&range) else {
            return 0;
        };
        self.order.retain(|r| *r != range);
        self.total -= bytes;
        bytes
    }

    /// Remove and return the least recently used range accepted by `can_evict`.
    pub fn evict_one(&mut self, can_evict: impl Fn(HashRange) -> bool) -> Option<HashRange> {
        let position = self.order.iter().position(|r| can_evict(*r))?;
        let range = self.order.remove(position)?;
        if let Some(bytes) = self.sizes.remove(&range) {
            self.total -= bytes;
        }
        Some(range)
    }

    #[cfg(test)]
    fn is_resident(&self, range: HashRange) -> bool {
        self.sizes.contains_key(&range)
    }

    #[must_use]
    pub const fn resident_bytes(&self) -> usize {
        self.total
    }

    #[must_use]
    pub fn resident_count(&self) -> usize {
        self.sizes.len()
    }

    /// Ranges from least to most recently used.
    #[cfg(test)]
    fn lru_order(&self) -> impl Iterator<Item = HashRange> + '_ {
        self.order.iter().copied()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.sizes.clear();
        self.total = 0;
    }
}
