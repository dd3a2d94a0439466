//! Fragment-backed index.
//!
//! `FragmentStore` owns a `PartitionedTree` and maps its leaves onto sealed
//! fragment files. Leaves are loaded lazily: opening an index reads only the
//! directory listing, and a leaf's fragment is read the first time an
//! operation needs it.
//!
//! Every operation that may touch storage goes through a per-range task
//! queue. Tree events turn into `Persist` and `Delete` tasks on the queue of
//! the range they name, and a non-deferred mutation is acknowledged only
//! after the persistence tasks its flush produced have run. At most one task
//! runs at a time.
//!
//! # Failure model
//!
//! - A failing task fails only its own caller; later tasks still run.
//! - Invariant violations (corruption) poison the index: every later
//!   mutation fails with `IndexError::Poisoned` until the index is dropped.

use std::borrow::Cow;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::oneshot;

use crate::config::IndexOptions;
use crate::index::cursor::{EntryCursor, NodeCursor};
use crate::index::queue::TaskQueue;
use crate::index::residency::ResidencyTracker;
use crate::index::{
    CollisionPolicy, FragmentLoader, FragmentSink, HashError, HashRange, KeyHasher, PartitionedTree,
    Payload, PreparedKey, TreeConfig, TreeError,
};
use crate::storage::{Backend, FragmentError, FragmentFiles};
use crate::types::{Slot, Value};

/// Reply channel of a submitted operation.
pub type Reply<T> = oneshot::Sender<Result<T, IndexError>>;

/// Errors returned by index operations.
#[derive(Debug)]
pub enum IndexError {
    /// The key cannot be hashed or has the wrong type, or the hashing
    /// options are invalid.
    Hash(HashError),
    /// The key already exists in a unique index.
    NotUnique { key: String },
    /// A value or option that cannot be stored.
    InvalidValue(String),
    /// Reading or writing a fragment failed.
    Fragment(FragmentError),
    /// A fragment the index requires is not on disk.
    MissingFragment(HashRange),
    /// An invariant violation was detected.
    Corruption(String),
    /// A previous corruption stopped all mutation of this index.
    Poisoned(String),
    /// The operation is not available on this kind of index.
    Unsupported(&'static str),
    /// The index task went away before replying.
    Closed,
}

impl std::fmt::Display for IndexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hash(e) => write!(f, "invalid key: {e}"),
            Self::NotUnique { key } => write!(f, "key {key:?} is not unique"),
            Self::InvalidValue(msg) => write!(f, "invalid value: {msg}"),
            Self::Fragment(e) => write!(f, "{e}"),
            Self::MissingFragment(range) => write!(f, "required fragment {range} is missing"),
            Self::Corruption(msg) => write!(f, "index corruption: {msg}"),
            Self::Poisoned(msg) => write!(f, "index is poisoned after corruption: {msg}"),
            Self::Unsupported(what) => write!(f, "{what} is not supported by this index"),
            Self::Closed => write!(f, "index is closed"),
        }
    }
}

impl std::error::Error for IndexError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Hash(e) => Some(e),
            Self::Fragment(e) => Some(e),
            _ => None,
        }
    }
}

impl From<HashError> for IndexError {
    fn from(e: HashError) -> Self {
        Self::Hash(e)
    }
}

impl From<FragmentError> for IndexError {
    fn from(e: FragmentError) -> Self {
        match e {
            FragmentError::Missing(range) => Self::MissingFragment(range),
            other => Self::Fragment(other),
        }
    }
}

/// A request against the index.
#[derive(Debug)]
pub enum Operation {
    Lookup {
        key: Value,
        reply: Reply<Option<Slot>>,
    },
    Add {
        key: Value,
        value: Value,
        defer: bool,
        replace: bool,
        reply: Reply<()>,
    },
    /// Remove `value` from `key`, or the whole key when `value` is `None`.
    /// Replies whether anything was removed.
    Remove {
        key: Value,
        value: Option<Value>,
        defer: bool,
        reply: Reply<bool>,
    },
}

impl Operation {
    const fn key(&self) -> &Value {
        match self {
            Self::Lookup { key, .. } | Self::Add { key, .. } | Self::Remove { key, .. } => key,
        }
    }

    const fn is_mutation(&self) -> bool {
        !matches!(self, Self::Lookup { .. })
    }

    fn fail(self, error: IndexError) {
        // A dropped receiver means the caller stopped waiting.
        match self {
            Self::Lookup { reply, .. } => {
                let _ = reply.send(Err(error));
            }
            Self::Add { reply, .. } => {
                let _ = reply.send(Err(error));
            }
            Self::Remove { reply, .. } => {
                let _ = reply.send(Err(error));
            }
        }
    }
}

/// Counters describing the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub known_ranges: usize,
    pub resident_ranges: usize,
    pub resident_bytes: usize,
    pub persisted_ranges: usize,
    pub pending_tasks: usize,
    pub poisoned: bool,
}

#[derive(Debug)]
enum SinkEvent {
    Change(HashRange, Payload),
    Delete(HashRange),
    NodeAdded(HashRange),
    NodeRemoved(HashRange),
}

/// Collects tree events until the store turns them into tasks.
#[derive(Debug, Default)]
pub struct EventBuffer {
    events: Vec<SinkEvent>,
}

impl FragmentSink for EventBuffer {
    #[allow(clippy::disallowed_methods)] // Persist tasks need a snapshot of the payload
    fn on_change(&mut self, range: HashRange, payload: &Payload) {
        self.events.push(SinkEvent::Change(range, payload.clone()));
    }

    fn on_delete(&mut self, range: HashRange) {
        self.events.push(SinkEvent::Delete(range));
    }

    fn on_node_added(&mut self, range: HashRange) {
        self.events.push(SinkEvent::NodeAdded(range));
    }

    fn on_node_removed(&mut self, range: HashRange) {
        self.events.push(SinkEvent::NodeRemoved(range));
    }
}

type Finish = Box<dyn FnOnce(Result<(), IndexError>) + Send>;

/// An acknowledgement waiting for persistence tasks.
struct Ticket {
    remaining: usize,
    error: Option<IndexError>,
    finish: Finish,
}

#[derive(Debug)]
struct PendingOp {
    key: PreparedKey,
    op: Operation,
}

#[derive(Debug)]
enum Task {
    Load,
    Apply(Box<PendingOp>),
    Persist { payload: Payload, ticket: u64 },
    Delete { ticket: u64 },
}

/// A lazily loaded, fragment-backed index.
pub struct FragmentStore {
    collection: String,
    index: String,
    files: Arc<FragmentFiles>,
    tree: PartitionedTree<EventBuffer>,
    max_bin_width: usize,
    memory_ceiling: Option<usize>,
    persisted: HashSet<HashRange>,
    residency: ResidencyTracker,
    queue: TaskQueue<Task>,
    tickets: HashMap<u64, Ticket>,
    next_ticket: u64,
    poisoned: Option<String>,
}

impl std::fmt::Debug for FragmentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FragmentStore")
            .field("collection", &self.collection)
            .field("index", &self.index)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl FragmentStore {
    /// Open an index from the fragments in its collection directory.
    ///
    /// Only the directory listing is read. Every listed fragment becomes a
    /// non-resident leaf; with no fragments the index starts as one empty
    /// resident leaf.
    ///
    /// # Errors
    ///
    /// - `InvalidValue` for a zero fragment size.
    /// - `Hash` for a non-positive granularity.
    /// - `Corruption` if the fragment ranges do not partition the hash space.
    pub fn open(options: IndexOptions, backend: Arc<dyn Backend>) -> Result<Self, IndexError> {
        if options.max_fragment_bytes == 0 {
            return Err(IndexError::InvalidValue(
                "max fragment bytes must be positive".to_owned(),
            ));
        }
        let IndexOptions {
            collection,
            index,
            key,
            seed,
            key_type,
            unique,
            max_fragment_bytes,
            memory_ceiling,
            number_granularity,
            date_granularity_ms,
            codec,
        } = options;

        let files = Arc::new(FragmentFiles::new(backend, codec, key, &collection, &index));
        let hasher = KeyHasher::new(seed, key_type)
            .with_granularity(number_granularity, date_granularity_ms)?;
        let config = TreeConfig {
            hasher,
            policy: if unique {
                CollisionPolicy::Unique
            } else {
                CollisionPolicy::Multi
            },
            max_bin_width: max_fragment_bytes,
        };

        #[allow(clippy::disallowed_methods)] // Arc::clone shares the fragment files with the tree
        let loader: Arc<dyn FragmentLoader> = Arc::clone(&files) as Arc<dyn FragmentLoader>;
        let ranges = files.list_ranges()?;
        let mut residency = ResidencyTracker::new();
        let mut tree = if ranges.is_empty() {
            residency.mark_used(HashRange::UNIVERSAL, 0);
            PartitionedTree::new(config, EventBuffer::default(), loader)
        } else {
            PartitionedTree::restore(config, &ranges, EventBuffer::default(), loader).map_err(
                |e| match e {
                    TreeError::Corruption(msg) => IndexError::Corruption(msg),
                    other => IndexError::Corruption(other.to_string()),
                },
            )?
        };
        // Placeholder carving is not a change to persist.
        tree.sink_mut().events.clear();

        tracing::info!(
            collection = %collection,
            index = %index,
            fragments = ranges.len(),
            "opened index"
        );

        Ok(Self {
            collection,
            index,
            files,
            tree,
            max_bin_width: max_fragment_bytes,
            memory_ceiling,
            persisted: ranges.into_iter().collect(),
            residency,
            queue: TaskQueue::new(),
            tickets: HashMap::new(),
            next_ticket: 0,
            poisoned: None,
        })
    }

    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.index
    }

    #[must_use]
    pub const fn hasher(&self) -> &KeyHasher {
        self.tree.hasher()
    }

    /// Every leaf range, resident or not, left to right.
    #[must_use]
    pub fn known_ranges(&self) -> Vec<HashRange> {
        self.tree.leaf_ranges()
    }

    #[must_use]
    pub fn is_resident(&self, range: HashRange) -> bool {
        self.tree.leaf(range).is_some_and(|leaf| leaf.resident)
    }

    #[must_use]
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            known_ranges: self.tree.leaf_ranges().len(),
            resident_ranges: self.residency.resident_count(),
            resident_bytes: self.residency.resident_bytes(),
            persisted_ranges: self.persisted.len(),
            pending_tasks: self.queue.len(),
            poisoned: self.poisoned.is_some(),
        }
    }

    /// Queue an operation. Its reply is sent once it and any persistence it
    /// waits for have run, which may require `run_pending`.
    ///
    /// An operation on a resident range runs immediately when no queued
    /// work covers its key. Otherwise it waits behind the last queue holding
    /// work for its key, which may belong to a range that has since split or
    /// merged. A fresh queue on a non-resident range starts with a load.
    pub fn submit(&mut self, op: Operation) {
        if op.is_mutation() {
            if let Some(reason) = &self.poisoned {
                let reason = reason.as_str().to_owned();
                op.fail(IndexError::Poisoned(reason));
                return;
            }
        }
        if let Operation::Add { value, .. } = &op {
            if !value.is_storable() {
                op.fail(IndexError::InvalidValue("non-finite number".to_owned()));
                return;
            }
        }
        let key = match self.tree.hasher().prepare(op.key()) {
            Ok(key) => key,
            Err(e) => {
                op.fail(e.into());
                return;
            }
        };

        let leaf = self.tree.leaf_for(key.hash);
        let (range, resident) = (leaf.range, leaf.resident);
        let queued = self.queue.last_containing(key.hash);
        let task = Task::Apply(Box::new(PendingOp { key, op }));
        match queued {
            Some(queued) => self.queue.push(queued, task),
            None if resident => self.execute(range, task),
            None => {
                self.queue.push(range, Task::Load);
                self.queue.push(range, task);
            }
        }
    }

    /// Run queued tasks until the queue is empty, then enforce the memory
    /// ceiling.
    pub fn run_pending(&mut self) {
        while let Some((range, task)) = self.queue.pop() {
            self.execute(range, task);
        }
        self.check_memory_usage();
    }

    /// Look up the values stored under `key`.
    pub fn lookup(&mut self, key: Value) -> Result<Option<Slot>, IndexError> {
        let (reply, rx) = oneshot::channel();
        self.submit(Operation::Lookup { key, reply });
        self.run_pending();
        Self::receive(rx)
    }

    /// Add `value` under `key`.
    ///
    /// With `defer`, the change stays in memory until a later non-deferred
    /// mutation flushes it. Without it, returns after the resulting
    /// fragment writes and deletes have completed.
    pub fn add(
        &mut self,
        key: Value,
        value: Value,
        defer: bool,
        replace: bool,
    ) -> Result<(), IndexError> {
        let (reply, rx) = oneshot::channel();
        self.submit(Operation::Add {
            key,
            value,
            defer,
            replace,
            reply,
        });
        self.run_pending();
        Self::receive(rx)
    }

    /// Remove `value` from `key`, or the whole key when `value` is `None`.
    pub fn remove(
        &mut self,
        key: Value,
        value: Option<Value>,
        defer: bool,
    ) -> Result<bool, IndexError> {
        let (reply, rx) = oneshot::channel();
        self.submit(Operation::Remove {
            key,
            value,
            defer,
            reply,
        });
        self.run_pending();
        Self::receive(rx)
    }

    fn receive<T>(mut rx: oneshot::Receiver<Result<T, IndexError>>) -> Result<T, IndexError> {
        rx.try_recv().map_err(|_| IndexError::Closed)?
    }

    /// Visit every leaf left to right, loading non-resident ones.
    ///
    /// `f` receives each leaf's payload, borrowed when `for_query` is set and
    /// deep-copied otherwise, and returns how many results it produced.
    /// Stops once `limit` results have been produced. Returns the total.
    #[allow(clippy::disallowed_methods)] // Clone is the deep copy handed out for mutation
    pub fn map<F>(
        &mut self,
        limit: Option<usize>,
        for_query: bool,
        mut f: F,
    ) -> Result<usize, IndexError>
    where
        F: FnMut(HashRange, Cow<'_, Payload>) -> usize,
    {
        self.run_pending();
        let mut produced = 0;
        for range in self.tree.leaf_ranges() {
            if limit.is_some_and(|limit| produced >= limit) {
                break;
            }
            self.ensure_resident(range)?;
            if let Some(leaf) = self.tree.leaf(range) {
                let payload = if for_query {
                    Cow::Borrowed(leaf.payload)
                } else {
                    Cow::Owned(leaf.payload.clone())
                };
                produced += f(range, payload);
            }
            self.check_memory_usage();
        }
        Ok(produced)
    }

    /// A cursor over leaves.
    pub const fn node_iterator(&self) -> Result<NodeCursor, IndexError> {
        Ok(NodeCursor::new())
    }

    /// A cursor over entries.
    pub fn iterator(&self) -> Result<EntryCursor, IndexError> {
        Ok(EntryCursor::new())
    }

    /// The leaf at the cursor, then advance past it.
    ///
    /// If the tree changed shape since the previous step, entries hashing
    /// before the cursor are left out so none is returned twice.
    #[allow(clippy::disallowed_methods)] // Clone hands out a snapshot of the leaf
    pub fn next_node(
        &mut self,
        cursor: &mut NodeCursor,
    ) -> Result<Option<(HashRange, Payload)>, IndexError> {
        let Some(position) = cursor.position() else {
            return Ok(None);
        };
        self.run_pending();

        let range = self.tree.leaf_for(position).range;
        self.ensure_resident(range)?;
        let payload = match self.tree.leaf(range) {
            Some(leaf) if range.start() == position => leaf.payload.clone(),
            Some(leaf) => {
                let hasher = self.tree.hasher();
                leaf.payload
                    .iter()
                    .filter(|(key, _)| hasher.hash_stored(key).is_ok_and(|h| h >= position))
                    .map(|(key, slot)| (key.clone(), slot.clone()))
                    .collect()
            }
            None => Payload::new(),
        };
        cursor.advance_past(range);
        self.check_memory_usage();
        Ok(Some((range, payload)))
    }

    /// The next `(stored key, slot)` entry at the cursor.
    pub fn next_entry(
        &mut self,
        cursor: &mut EntryCursor,
    ) -> Result<Option<(String, Slot)>, IndexError> {
        loop {
            if let Some(entry) = cursor.buffered.pop_front() {
                return Ok(Some(entry));
            }
            match self.next_node(&mut cursor.nodes)? {
                Some((_, payload)) => cursor.buffered.extend(payload),
                None => return Ok(None),
            }
        }
    }

    /// Delete every fragment of the index and reset it to empty.
    ///
    /// Clears poisoning. Returns the first delete failure, after attempting
    /// every delete.
    #[allow(clippy::disallowed_methods)] // the fresh tree keeps the same hasher
    pub fn drop_index(&mut self) -> Result<(), IndexError> {
        self.run_pending();

        let mut ranges: BTreeSet<HashRange> = self.persisted.drain().collect();
        match self.files.list_ranges() {
            Ok(listed) => ranges.extend(listed),
            Err(e) => tracing::warn!(index = %self.index, "listing fragments to drop failed: {e}"),
        }
        let mut first_error = None;
        for range in ranges {
            if let Err(e) = self.files.delete(range) {
                tracing::error!(index = %self.index, %range, "failed to delete fragment: {e}");
                first_error.get_or_insert(e);
            }
        }

        let config = TreeConfig {
            hasher: self.tree.hasher().clone(),
            policy: self.tree.policy(),
            max_bin_width: self.max_bin_width,
        };
        #[allow(clippy::disallowed_methods)] // Arc::clone shares the fragment files with the tree
        let loader: Arc<dyn FragmentLoader> = Arc::clone(&self.files) as Arc<dyn FragmentLoader>;
        self.tree = PartitionedTree::new(config, EventBuffer::default(), loader);
        self.residency.clear();
        self.residency.mark_used(HashRange::UNIVERSAL, 0);
        self.poisoned = None;
        tracing::info!(collection = %self.collection, index = %self.index, "dropped index");

        first_error.map_or(Ok(()), |e| Err(e.into()))
    }

    /// Unload least recently used fragments while resident bytes exceed the
    /// memory ceiling. Only ranges that are persisted, have no queued tasks
    /// and no unflushed events are unloaded. Returns how many were unloaded.
    pub fn check_memory_usage(&mut self) -> usize {
        let Some(ceiling) = self.memory_ceiling else {
            return 0;
        };
        let mut evicted = 0;
        while self.residency.resident_bytes() > ceiling {
            let Self {
                residency,
                persisted,
                queue,
                tree,
                ..
            } = self;
            let candidate = residency.evict_one(|range| {
                persisted.contains(&range) && queue.is_idle(range) && !tree.has_pending(range)
            });
            let Some(range) = candidate else {
                break;
            };
            match self.tree.trim_range(range) {
                Ok(freed) => tracing::debug!(%range, freed, "evicted fragment"),
                Err(e) => tracing::warn!(%range, "eviction skipped: {e}"),
            }
            evicted += 1;
        }
        evicted
    }

    fn execute(&mut self, range: HashRange, task: Task) {
        match task {
            Task::Load => {
                if let Err(e) = self.ensure_resident(range) {
                    tracing::warn!(index = %self.index, %range, "fragment load failed: {e}");
                }
            }
            Task::Apply(pending) => self.apply(*pending),
            Task::Persist { payload, ticket } => {
                let result = self.files.write(range, &payload).map_err(IndexError::from);
                if result.is_ok() {
                    self.persisted.insert(range);
                } else {
                    // The file on disk, if any, no longer matches memory.
                    self.persisted.remove(&range);
                }
                self.complete(ticket, range, result);
            }
            Task::Delete { ticket } => {
                let result = self.files.delete(range).map_err(IndexError::from);
                if result.is_ok() {
                    self.persisted.remove(&range);
                }
                self.complete(ticket, range, result);
            }
        }
    }

    /// Load `range`'s fragment unless it is resident or no longer a leaf.
    fn ensure_resident(&mut self, range: HashRange) -> Result<(), IndexError> {
        match self.tree.leaf(range) {
            None => return Ok(()),
            Some(leaf) if leaf.resident => {
                let size = leaf.size;
                self.residency.mark_used(range, size);
                return Ok(());
            }
            Some(_) => {}
        }

        let payload = self.files.read(range)?;
        let size = self
            .tree
            .insert_range(range, payload)
            .map_err(|e| self.tree_error(e))?;
        self.residency.mark_used(range, size);
        Ok(())
    }

    fn apply(&mut self, pending: PendingOp) {
        let PendingOp { key, op } = pending;
        if op.is_mutation() {
            if let Some(reason) = &self.poisoned {
                let reason = reason.as_str().to_owned();
                op.fail(IndexError::Poisoned(reason));
                return;
            }
        }

        // The leaf may have split or merged since the operation was queued.
        let range = self.tree.leaf_for(key.hash).range;
        if let Err(e) = self.ensure_resident(range) {
            op.fail(e);
            return;
        }

        match op {
            Operation::Lookup { reply, .. } => {
                #[allow(clippy::disallowed_methods)] // lookups return an owned copy
                let result = self
                    .tree
                    .lookup(&key.text, key.hash)
                    .map(|slot| slot.cloned())
                    .map_err(|e| self.tree_error(e));
                let _ = reply.send(result);
            }
            Operation::Add {
                value,
                defer,
                replace,
                reply,
                ..
            } => {
                let result = self.tree.add(&key.text, key.hash, value, defer, replace);
                self.after_mutation(
                    range,
                    result,
                    Box::new(move |r| {
                        let _ = reply.send(r);
                    }),
                );
            }
            Operation::Remove {
                value, defer, reply, ..
            } => {
                let result = self.tree.remove(&key.text, key.hash, value.as_ref(), defer);
                let removed = matches!(result, Ok(true));
                self.after_mutation(
                    range,
                    result.map(|_| ()),
                    Box::new(move |r| {
                        let _ = reply.send(r.map(|()| removed));
                    }),
                );
            }
        }
    }

    /// Turn flushed events into tasks and acknowledge the caller once they
    /// have run.
    fn after_mutation(&mut self, range: HashRange, result: Result<(), TreeError>, finish: Finish) {
        if let Some(leaf) = self.tree.leaf(range) {
            if leaf.resident {
                let size = leaf.size;
                self.residency.mark_used(range, size);
            }
        }

        // A failed operation may still flush earlier deferred changes. The
        // caller waits for those too and sees a persistence error in place of
        // the tree error.
        let finish: Finish = match result {
            Ok(()) => finish,
            Err(e) => {
                let error = self.tree_error(e);
                Box::new(move |persisted: Result<(), IndexError>| {
                    finish(Err(persisted.err().unwrap_or(error)));
                })
            }
        };

        let id = self.next_ticket;
        self.next_ticket += 1;
        let count = self.queue_events(id);
        if count == 0 {
            finish(Ok(()));
        } else {
            self.tickets.insert(
                id,
                Ticket {
                    remaining: count,
                    error: None,
                    finish,
                },
            );
        }
    }

    /// Drain the event buffer into tasks. Returns how many persistence
    /// tasks were queued.
    fn queue_events(&mut self, ticket: u64) -> usize {
        let mut queued = 0;
        for event in std::mem::take(&mut self.tree.sink_mut().events) {
            match event {
                SinkEvent::Change(range, payload) => {
                    self.queue.push(range, Task::Persist { payload, ticket });
                    queued += 1;
                }
                SinkEvent::Delete(range) => {
                    self.queue.push(range, Task::Delete { ticket });
                    queued += 1;
                }
                SinkEvent::NodeAdded(range) => {
                    if let Some(leaf) = self.tree.leaf(range) {
                        if leaf.resident {
                            let size = leaf.size;
                            self.residency.mark_used(range, size);
                        }
                    }
                }
                SinkEvent::NodeRemoved(range) => {
                    self.residency.mark_unloaded(range);
                }
            }
        }
        queued
    }

    fn complete(&mut self, id: u64, range: HashRange, result: Result<(), IndexError>) {
        if let Err(e) = &result {
            tracing::error!(index = %self.index, %range, "fragment persistence failed: {e}");
        }
        let Some(waiting) = self.tickets.get_mut(&id) else {
            return;
        };
        waiting.remaining -= 1;
        if let Err(e) = result {
            waiting.error.get_or_insert(e);
        }
        if waiting.remaining == 0 {
            if let Some(done) = self.tickets.remove(&id) {
                (done.finish)(done.error.map_or(Ok(()), Err));
            }
        }
    }

    /// Convert a tree error, poisoning the index on corruption.
    fn tree_error(&mut self, error: TreeError) -> IndexError {
        match error {
            TreeError::NotUnique { key } => IndexError::NotUnique { key },
            other => {
                let reason = other.to_string();
                if self.poisoned.is_none() {
                    tracing::error!(
                        collection = %self.collection,
                        index = %self.index,
                        "index poisoned: {reason}"
                    );
                    self.poisoned = Some(reason.as_str().to_owned());
                }
                IndexError::Corruption(reason)
            }
        }
    }
}
