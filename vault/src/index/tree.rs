//! In-memory binary space partition over the hash space.
//!
//! The tree is a binary trie of `HashRange`s: every internal node has exactly
//! the two `split()` halves of its own range as children, and the leaves
//! always form an exact partition of `[0, 2^64 - 1]`. Each leaf owns a payload
//! map from stored key text to a `Slot`, plus a running estimate of the
//! payload's serialized size.
//!
//! Leaves split when an add would push them to `max_bin_width` and merge back
//! into their parent when a remove leaves them under half of it. Every data
//! change is recorded as a pending change/delete event; events are collapsed
//! by range and handed to the `FragmentSink` when the caller flushes.
//!
//! A leaf is either resident (payload loaded) or a placeholder for a
//! fragment that has not been read yet. Reads and writes through `add`,
//! `remove` and `lookup` require a resident leaf; the only time the tree
//! loads on its own is when a merge needs a non-resident sibling.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::constants::ENTRY_OVERHEAD;
use crate::index::{HashRange, KeyHasher};
use crate::storage::FragmentError;
use crate::types::{Slot, Value, render_number};

/// Payload of one leaf, keyed by stored key text.
pub type Payload = BTreeMap<String, Slot>;

/// Bytes of JSON framing around a tagged value (`{"type":..,"value":..}`).
const VALUE_OVERHEAD: usize = 26;

/// Receives the tree's structural and data events.
///
/// `on_change` and `on_delete` are delivered on flush, collapsed by range;
/// `on_node_added` and `on_node_removed` are delivered immediately when a
/// leaf range comes into or goes out of existence.
pub trait FragmentSink {
    fn on_change(&mut self, range: HashRange, payload: &Payload);
    fn on_delete(&mut self, range: HashRange);
    fn on_node_added(&mut self, range: HashRange);
    fn on_node_removed(&mut self, range: HashRange);
}

/// Reads the persisted payload of a leaf range.
pub trait FragmentLoader: Send + Sync {
    fn load(&self, range: HashRange) -> Result<Payload, FragmentError>;
}

/// What an index does when a key is added twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollisionPolicy {
    /// One value per key; a second add fails unless it replaces.
    Unique,
    /// An ordered list of distinct values per key.
    Multi,
}

/// Construction parameters shared by `new` and `restore`.
#[derive(Debug)]
pub struct TreeConfig {
    pub hasher: KeyHasher,
    pub policy: CollisionPolicy,
    pub max_bin_width: usize,
}

/// Errors produced by tree operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    /// The key already holds a value and `replace` was not set.
    NotUnique { key: String },
    /// The leaf covering the key has not been loaded.
    NotResident(HashRange),
    /// The range is not a leaf and cannot be carved out of a placeholder.
    UnknownRange(HashRange),
    /// An internal invariant does not hold. Unrecoverable.
    Corruption(String),
}

impl std::fmt::Display for TreeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotUnique { key } => write!(f, "key {key:?} is not unique"),
            Self::NotResident(range) => write!(f, "leaf {range} is not resident"),
            Self::UnknownRange(range) => write!(f, "range {range} is not a leaf of the tree"),
            Self::Corruption(msg) => write!(f, "index corruption: {msg}"),
        }
    }
}

impl std::error::Error for TreeError {}

/// A read-only view of one leaf.
#[derive(Debug, Clone, Copy)]
pub struct LeafRef<'a> {
    pub range: HashRange,
    pub payload: &'a Payload,
    pub size: usize,
    pub resident: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingEvent {
    Change(HashRange),
    Delete(HashRange),
}

impl PendingEvent {
    const fn range(self) -> HashRange {
        match self {
            Self::Change(range) | Self::Delete(range) => range,
        }
    }
}

#[derive(Debug)]
struct Leaf {
    payload: Payload,
    size: usize,
    resident: bool,
}

#[derive(Debug)]
enum NodeKind {
    Leaf(Leaf),
    Internal(Box<[Node; 2]>),
}

#[derive(Debug)]
struct Node {
    range: HashRange,
    kind: NodeKind,
}

impl Node {
    const fn leaf(range: HashRange, payload: Payload, size: usize) -> Self {
        Self {
            range,
            kind: NodeKind::Leaf(Leaf {
                payload,
                size,
                resident: true,
            }),
        }
    }

    const fn placeholder(range: HashRange) -> Self {
        Self {
            range,
            kind: NodeKind::Leaf(Leaf {
                payload: BTreeMap::new(),
                size: 0,
                resident: false,
            }),
        }
    }

    const fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf(_))
    }

    /// The leaf covering `hash` and its range.
    fn find_leaf(&self, hash: u64) -> (HashRange, &Leaf) {
        match &self.kind {
            NodeKind::Internal(children) => children[child_index(children, hash)].find_leaf(hash),
            NodeKind::Leaf(leaf) => (self.range, leaf),
        }
    }

    fn find_mut(&mut self, hash: u64) -> &mut Self {
        match self.kind {
            NodeKind::Internal(ref mut children) => {
                let i = child_index(children, hash);
                children[i].find_mut(hash)
            }
            NodeKind::Leaf(_) => self,
        }
    }

    /// The internal node whose child is the leaf covering `hash`.
    ///
    /// `None` when the root itself is that leaf.
    fn parent_of_leaf_mut(&mut self, hash: u64) -> Option<&mut Self> {
        let NodeKind::Internal(children) = &self.kind else {
            return None;
        };
        let i = child_index(children, hash);
        if children[i].is_leaf() {
            return Some(self);
        }
        match self.kind {
            NodeKind::Internal(ref mut children) => children[i].parent_of_leaf_mut(hash),
            NodeKind::Leaf(_) => None,
        }
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<LeafRef<'a>>) {
        match &self.kind {
            NodeKind::Leaf(leaf) => out.push(LeafRef {
                range: self.range,
                payload: &leaf.payload,
                size: leaf.size,
                resident: leaf.resident,
            }),
            NodeKind::Internal(children) => {
                children[0].collect_leaves(out);
                children[1].collect_leaves(out);
            }
        }
    }
}

fn child_index(children: &[Node; 2], hash: u64) -> usize {
    usize::from(!children[0].range.contains(hash))
}

fn value_size(value: &Value) -> usize {
    VALUE_OVERHEAD
        + match value {
            Value::String(s) => s.len() + 2,
            Value::Number(n) => render_number(*n).len(),
            Value::Date(ms) => ms.to_string().len(),
            Value::Boolean(b) => {
                if *b {
                    4
                } else {
                    5
                }
            }
            Value::Buffer(bytes) => bytes.len() * 4 + 2,
        }
}

fn slot_size(slot: &Slot) -> usize {
    match slot {
        Slot::Single(value) => value_size(value),
        Slot::Many(values) => 2 + values.iter().map(|v| value_size(v) + 1).sum::<usize>(),
    }
}

/// Estimated serialized size of one payload entry.
fn entry_size(key: &str, slot: &Slot) -> usize {
    key.len() + ENTRY_OVERHEAD + slot_size(slot)
}

/// Estimated serialized size of a payload.
#[must_use]
pub fn payload_size(payload: &Payload) -> usize {
    payload.iter().map(|(k, s)| entry_size(k, s)).sum()
}

/// Keep only the latest event per range, in first-occurrence order.
fn collapse(events: Vec<PendingEvent>) -> Vec<PendingEvent> {
    let mut order: Vec<PendingEvent> = Vec::with_capacity(events.len());
    let mut positions: HashMap<HashRange, usize> = HashMap::new();
    for event in events {
        match positions.entry(event.range()) {
            Entry::Occupied(slot) => order[*slot.get()] = event,
            Entry::Vacant(slot) => {
                slot.insert(order.len());
                order.push(event);
            }
        }
    }
    order
}

/// The partition tree of one index.
///
/// # Invariants
///
/// - Leaf ranges form an exact partition of the hash space.
/// - Every key in a resident leaf hashes into that leaf's range.
/// - Non-resident leaves hold an empty payload.
/// - Pending `Change` events name ranges that are leaves at flush time.
pub struct PartitionedTree<S> {
    root: Node,
    sink: S,
    loader: Arc<dyn FragmentLoader>,
    hasher: KeyHasher,
    policy: CollisionPolicy,
    max_bin_width: usize,
    pending: Vec<PendingEvent>,
}

impl<S: FragmentSink> PartitionedTree<S> {
    /// An empty tree: a single resident leaf covering the hash space.
    pub fn new(config: TreeConfig, sink: S, loader: Arc<dyn FragmentLoader>) -> Self {
        Self::with_root(config, Node::leaf(HashRange::UNIVERSAL, Payload::new(), 0), sink, loader)
    }

    /// A tree of non-resident placeholders for previously persisted ranges.
    ///
    /// # Errors
    ///
    /// `Corruption` if `ranges` is not an exact partition reachable by
    /// splitting the universal range.
    pub fn restore(
        config: TreeConfig,
        ranges: &[HashRange],
        sink: S,
        loader: Arc<dyn FragmentLoader>,
    ) -> Result<Self, TreeError> {
        let mut tree =
            Self::with_root(config, Node::placeholder(HashRange::UNIVERSAL), sink, loader);

        let mut expected = ranges.to_vec();
        expected.sort_unstable();
        expected.dedup();
        for &range in &expected {
            tree.insert_placeholder(range).map_err(|e| match e {
                TreeError::UnknownRange(r) => {
                    TreeError::Corruption(format!("persisted range {r} does not fit the partition"))
                }
                other => other,
            })?;
        }

        if tree.leaf_ranges() != expected {
            return Err(TreeError::Corruption(
                "persisted ranges do not partition the hash space".to_owned(),
            ));
        }
        Ok(tree)
    }

    fn with_root(config: TreeConfig, root: Node, sink: S, loader: Arc<dyn FragmentLoader>) -> Self {
        Self {
            root,
            sink,
            loader,
            hasher: config.hasher,
            policy: config.policy,
            max_bin_width: config.max_bin_width,
            pending: Vec::new(),
        }
    }

    #[must_use]
    pub const fn hasher(&self) -> &KeyHasher {
        &self.hasher
    }

    #[must_use]
    pub const fn policy(&self) -> CollisionPolicy {
        self.policy
    }

    #[must_use]
    pub const fn sink(&self) -> &S {
        &self.sink
    }

    #[allow(clippy::missing_const_for_fn)] // mutable references can't be const
    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Add `value` under `key`.
    ///
    /// # Pre-conditions
    ///
    /// - `hash` is the hash of `key`.
    /// - The leaf covering `hash` is resident.
    ///
    /// # Post-conditions
    ///
    /// - Unique: `key` maps to `value` (or the call failed with `NotUnique`).
    /// - Multi: `key`'s list contains `value` exactly once.
    /// - If `defer` is false, all pending events have been flushed, even
    ///   when the add itself failed.
    pub fn add(
        &mut self,
        key: &str,
        hash: u64,
        value: Value,
        defer: bool,
        replace: bool,
    ) -> Result<(), TreeError> {
        let result = self.add_entry(key, hash, value, replace);
        self.finish(defer, result)
    }

    /// Remove `value` from `key`, or the whole key when `value` is `None`.
    ///
    /// Returns whether anything was removed.
    pub fn remove(
        &mut self,
        key: &str,
        hash: u64,
        value: Option<&Value>,
        defer: bool,
    ) -> Result<bool, TreeError> {
        let result = self.remove_entry(key, hash, value);
        self.finish(defer, result)
    }

    /// Look up the slot stored under `key`.
    pub fn lookup(&self, key: &str, hash: u64) -> Result<Option<&Slot>, TreeError> {
        let (range, leaf) = self.root.find_leaf(hash);
        if leaf.resident {
            Ok(leaf.payload.get(key))
        } else {
            Err(TreeError::NotResident(range))
        }
    }

    /// Materialize a loaded payload as the leaf for `range`.
    ///
    /// In-memory only: emits no change or delete events. A non-resident
    /// placeholder that covers `range` is split down to it.
    ///
    /// Returns the leaf's estimated size.
    pub fn insert_range(&mut self, range: HashRange, payload: Payload) -> Result<usize, TreeError> {
        check_payload(&self.hasher, range, &payload)?;
        let node = carve(&mut self.root, range, &mut self.sink)?;
        let size = payload_size(&payload);
        match &mut node.kind {
            NodeKind::Leaf(leaf) => {
                leaf.payload = payload;
                leaf.size = size;
                leaf.resident = true;
                Ok(size)
            }
            NodeKind::Internal(_) => Err(TreeError::UnknownRange(range)),
        }
    }

    /// Ensure a (possibly non-resident) leaf exists for `range`.
    pub fn insert_placeholder(&mut self, range: HashRange) -> Result<(), TreeError> {
        let node = carve(&mut self.root, range, &mut self.sink)?;
        if node.is_leaf() {
            Ok(())
        } else {
            Err(TreeError::UnknownRange(range))
        }
    }

    /// Unload the payload of the leaf for `range`, keeping it as a placeholder.
    ///
    /// In-memory only. The caller must make sure the payload is persisted
    /// and that no pending event names the range. Returns the freed size.
    pub fn trim_range(&mut self, range: HashRange) -> Result<usize, TreeError> {
        let node = self.root.find_mut(range.start());
        if node.range != range {
            return Err(TreeError::UnknownRange(range));
        }
        match &mut node.kind {
            NodeKind::Leaf(leaf) => {
                let freed = leaf.size;
                leaf.payload = Payload::new();
                leaf.size = 0;
                leaf.resident = false;
                Ok(freed)
            }
            NodeKind::Internal(_) => Err(TreeError::UnknownRange(range)),
        }
    }

    /// Deliver pending events to the sink, collapsed by range.
    ///
    /// Change payloads are read at flush time, so a range changed several
    /// times is delivered once with its latest contents.
    pub fn flush(&mut self) -> Result<(), TreeError> {
        for event in collapse(std::mem::take(&mut self.pending)) {
            match event {
                PendingEvent::Delete(range) => self.sink.on_delete(range),
                PendingEvent::Change(range) => {
                    let (found, leaf) = self.root.find_leaf(range.start());
                    if found != range {
                        return Err(TreeError::Corruption(format!(
                            "change event for {range}, which is no longer a leaf"
                        )));
                    }
                    self.sink.on_change(range, &leaf.payload);
                }
            }
        }
        Ok(())
    }

    /// Whether an unflushed event names `range`.
    #[must_use]
    pub fn has_pending(&self, range: HashRange) -> bool {
        self.pending.iter().any(|e| e.range() == range)
    }

    /// All leaves, left to right.
    #[must_use]
    pub fn leaves(&self) -> Vec<LeafRef<'_>> {
        let mut out = Vec::new();
        self.root.collect_leaves(&mut out);
        out
    }

    /// All leaf ranges, left to right.
    #[must_use]
    pub fn leaf_ranges(&self) -> Vec<HashRange> {
        self.leaves().iter().map(|leaf| leaf.range).collect()
    }

    /// The leaf whose range is exactly `range`.
    #[must_use]
    pub fn leaf(&self, range: HashRange) -> Option<LeafRef<'_>> {
        let leaf = self.leaf_for(range.start());
        (leaf.range == range).then_some(leaf)
    }

    /// The leaf covering `hash`.
    #[must_use]
    pub fn leaf_for(&self, hash: u64) -> LeafRef<'_> {
        let (range, leaf) = self.root.find_leaf(hash);
        LeafRef {
            range,
            payload: &leaf.payload,
            size: leaf.size,
            resident: leaf.resident,
        }
    }

    fn finish<T>(&mut self, defer: bool, result: Result<T, TreeError>) -> Result<T, TreeError> {
        if defer {
            return result;
        }
        let flushed = self.flush();
        let value = result?;
        flushed.map(|()| value)
    }

    fn add_entry(
        &mut self,
        key: &str,
        hash: u64,
        value: Value,
        replace: bool,
    ) -> Result<(), TreeError> {
        let node = self.root.find_mut(hash);
        let range = node.range;
        let NodeKind::Leaf(leaf) = &mut node.kind else {
            return Err(TreeError::Corruption(format!("descent for {hash:#x} stopped at {range}")));
        };
        if !leaf.resident {
            return Err(TreeError::NotResident(range));
        }

        let existing = leaf.payload.get(key);
        let old_size = existing.map_or(0, |slot| entry_size(key, slot));
        let slot = match (self.policy, existing) {
            (CollisionPolicy::Unique, Some(_)) if !replace => {
                return Err(TreeError::NotUnique {
                    key: key.to_owned(),
                });
            }
            (CollisionPolicy::Unique, _) => Slot::Single(value),
            (CollisionPolicy::Multi, Some(current)) if !replace => {
                if current.contains(&value) {
                    return Ok(());
                }
                let mut values = current.as_slice().to_vec();
                values.push(value);
                Slot::Many(values)
            }
            (CollisionPolicy::Multi, _) => Slot::Many(vec![value]),
        };

        let projected = leaf.size - old_size + entry_size(key, &slot);
        if projected < self.max_bin_width || range.width() == 0 {
            leaf.payload.insert(key.to_owned(), slot);
            leaf.size = projected;
            self.pending.push(PendingEvent::Change(range));
            return Ok(());
        }

        // Split: decide every key's side before touching the leaf so a
        // corrupt key leaves the tree intact.
        let Some((left, right)) = range.split() else {
            return Err(TreeError::Corruption(format!("{range} cannot split")));
        };
        let mut goes_left = Vec::with_capacity(leaf.payload.len());
        for stored in leaf.payload.keys() {
            let h = self.hasher.hash_stored(stored).map_err(|e| {
                TreeError::Corruption(format!("stored key {stored:?} in {range}: {e}"))
            })?;
            if !range.contains(h) {
                return Err(TreeError::Corruption(format!(
                    "key {stored:?} hashes outside its leaf {range}"
                )));
            }
            goes_left.push(left.contains(h));
        }

        let mut left_payload = Payload::new();
        let mut right_payload = Payload::new();
        for ((k, s), to_left) in std::mem::take(&mut leaf.payload).into_iter().zip(goes_left) {
            if to_left {
                left_payload.insert(k, s);
            } else {
                right_payload.insert(k, s);
            }
        }
        if left.contains(hash) {
            left_payload.insert(key.to_owned(), slot);
        } else {
            right_payload.insert(key.to_owned(), slot);
        }

        tracing::debug!(
            %range,
            left = left_payload.len(),
            right = right_payload.len(),
            "splitting leaf"
        );
        let left_size = payload_size(&left_payload);
        let right_size = payload_size(&right_payload);
        node.kind = NodeKind::Internal(Box::new([
            Node::leaf(left, left_payload, left_size),
            Node::leaf(right, right_payload, right_size),
        ]));

        self.sink.on_node_removed(range);
        self.sink.on_node_added(left);
        self.sink.on_node_added(right);
        self.pending.push(PendingEvent::Delete(range));
        self.pending.push(PendingEvent::Change(left));
        self.pending.push(PendingEvent::Change(right));
        Ok(())
    }

    fn remove_entry(
        &mut self,
        key: &str,
        hash: u64,
        value: Option<&Value>,
    ) -> Result<bool, TreeError> {
        let node = self.root.find_mut(hash);
        let range = node.range;
        let NodeKind::Leaf(leaf) = &mut node.kind else {
            return Err(TreeError::Corruption(format!("descent for {hash:#x} stopped at {range}")));
        };
        if !leaf.resident {
            return Err(TreeError::NotResident(range));
        }
        let Some(slot) = leaf.payload.get_mut(key) else {
            return Ok(false);
        };

        let old_size = entry_size(key, slot);
        let drop_key = match (value, &mut *slot) {
            (None, _) => true,
            (Some(v), Slot::Single(current)) => {
                if current != v {
                    return Ok(false);
                }
                true
            }
            (Some(v), Slot::Many(values)) => {
                let before = values.len();
                values.retain(|x| x != v);
                if values.len() == before {
                    return Ok(false);
                }
                values.is_empty()
            }
        };
        let new_size = if drop_key {
            leaf.payload.remove(key);
            0
        } else {
            entry_size(key, slot)
        };
        leaf.size = leaf.size - old_size + new_size;
        let remaining = leaf.size;
        self.pending.push(PendingEvent::Change(range));

        if range != HashRange::UNIVERSAL && remaining < self.max_bin_width / 2 {
            self.try_merge(hash)?;
        }
        Ok(true)
    }

    /// Merge the leaf covering `hash` with its sibling, if the sibling is a
    /// leaf. A non-resident sibling is loaded first.
    fn try_merge(&mut self, hash: u64) -> Result<(), TreeError> {
        let Some(parent) = self.root.parent_of_leaf_mut(hash) else {
            return Ok(());
        };
        let parent_range = parent.range;
        let NodeKind::Internal(children) = &mut parent.kind else {
            return Ok(());
        };
        let i = child_index(children, hash);
        let [first, second] = &mut **children;
        let (this, sibling) = if i == 0 {
            (first, second)
        } else {
            (second, first)
        };
        let (this_range, sibling_range) = (this.range, sibling.range);
        let (NodeKind::Leaf(this_leaf), NodeKind::Leaf(sibling_leaf)) =
            (&mut this.kind, &mut sibling.kind)
        else {
            return Ok(());
        };

        if !sibling_leaf.resident {
            match self.loader.load(sibling_range) {
                Ok(payload) => {
                    check_payload(&self.hasher, sibling_range, &payload)?;
                    sibling_leaf.size = payload_size(&payload);
                    sibling_leaf.payload = payload;
                    sibling_leaf.resident = true;
                }
                Err(FragmentError::Missing(missing)) => {
                    return Err(TreeError::Corruption(format!(
                        "fragment {missing} is required for a merge but missing"
                    )));
                }
                Err(e) => {
                    tracing::warn!(%sibling_range, "skipping merge, sibling failed to load: {e}");
                    return Ok(());
                }
            }
        }

        // Keys hash to exactly one side, under either policy.
        let shared = sibling_leaf
            .payload
            .keys()
            .find(|k| this_leaf.payload.contains_key(*k));
        if let Some(key) = shared {
            return Err(TreeError::Corruption(format!(
                "key {key:?} present in both {this_range} and {sibling_range}"
            )));
        }

        let mut merged = std::mem::take(&mut this_leaf.payload);
        merged.append(&mut sibling_leaf.payload);

        tracing::debug!(%this_range, %sibling_range, entries = merged.len(), "merging leaves");
        let size = payload_size(&merged);
        parent.kind = NodeKind::Leaf(Leaf {
            payload: merged,
            size,
            resident: true,
        });

        self.sink.on_node_removed(this_range);
        self.sink.on_node_removed(sibling_range);
        self.sink.on_node_added(parent_range);
        self.pending.push(PendingEvent::Delete(this_range));
        self.pending.push(PendingEvent::Delete(sibling_range));
        self.pending.push(PendingEvent::Change(parent_range));
        Ok(())
    }
}

/// Split non-resident placeholders until a node with exactly `range` exists.
fn carve<'a, S: FragmentSink>(
    node: &'a mut Node,
    range: HashRange,
    sink: &mut S,
) -> Result<&'a mut Node, TreeError> {
    let node = node.find_mut(range.start());
    if node.range == range {
        return Ok(node);
    }
    if !node.range.contains_range(&range) {
        return Err(TreeError::UnknownRange(range));
    }
    match &node.kind {
        NodeKind::Leaf(leaf) if !leaf.resident => {}
        _ => return Err(TreeError::UnknownRange(range)),
    }
    let Some((left, right)) = node.range.split() else {
        return Err(TreeError::UnknownRange(range));
    };
    sink.on_node_removed(node.range);
    sink.on_node_added(left);
    sink.on_node_added(right);
    node.kind = NodeKind::Internal(Box::new([Node::placeholder(left), Node::placeholder(right)]));
    carve(node, range, sink)
}

/// Check that every key of a loaded payload hashes into `range`.
fn check_payload(hasher: &KeyHasher, range: HashRange, payload: &Payload) -> Result<(), TreeError> {
    for key in payload.keys() {
        let hash = hasher
            .hash_stored(key)
            .map_err(|e| TreeError::Corruption(format!("stored key {key:?} in {range}: {e}")))?;
        if !range.contains(hash) {
            return Err(TreeError::Corruption(format!(
                "key {key:?} hashes outside its fragment {range}"
            )));
        }
    }
    Ok(())
}
