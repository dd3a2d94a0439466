//! Async front-end of a `FragmentStore`.
//!
//! ```text
//! callers ──▶ mpsc (bounded) ──▶ index task
//!                                  recv_many → submit each → run_pending
//!             ◀── oneshot replies ──┘
//! ```
//!
//! The task owns the store. Each batch of received requests is queued on
//! the store before the queue is drained, so requests that arrive together
//! share fragment loads and run in per-range order.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::constants::HANDLE_CHANNEL_CAPACITY;
use crate::index::cursor::{EntryCursor, NodeCursor};
use crate::index::store::{FragmentStore, IndexError, Operation, StoreStats};
use crate::index::{HashRange, Payload};
use crate::types::{Slot, Value};

type NodeReply = oneshot::Sender<Result<(NodeCursor, Option<(HashRange, Payload)>), IndexError>>;

enum Request {
    Op(Operation),
    NextNode {
        cursor: NodeCursor,
        reply: NodeReply,
    },
    CollectEntries {
        limit: Option<usize>,
        reply: oneshot::Sender<Result<Vec<(String, Slot)>, IndexError>>,
    },
    Stats {
        reply: oneshot::Sender<StoreStats>,
    },
    Drop {
        reply: oneshot::Sender<Result<(), IndexError>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable handle to an index running on its own task.
#[derive(Debug, Clone)]
#[allow(clippy::disallowed_methods)] // Sender clones share the index task
pub struct IndexHandle {
    sender: mpsc::Sender<Request>,
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Op(op) => return op.fmt(f),
            Self::NextNode { .. } => "NextNode",
            Self::CollectEntries { .. } => "CollectEntries",
            Self::Stats { .. } => "Stats",
            Self::Drop { .. } => "Drop",
            Self::Shutdown { .. } => "Shutdown",
        };
        f.write_str(name)
    }
}

impl IndexHandle {
    /// Move `store` onto a new task.
    ///
    /// Must be called within a tokio runtime. The task stops on `shutdown`
    /// or once every handle is dropped.
    #[must_use]
    pub fn spawn(store: FragmentStore) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(HANDLE_CHANNEL_CAPACITY);
        let task = tokio::spawn(run(store, receiver));
        (Self { sender }, task)
    }

    async fn send(&self, request: Request) -> Result<(), IndexError> {
        self.sender
            .send(request)
            .await
            .map_err(|_| IndexError::Closed)
    }

    async fn call<T>(
        &self,
        request: Request,
        rx: oneshot::Receiver<Result<T, IndexError>>,
    ) -> Result<T, IndexError> {
        self.send(request).await?;
        rx.await.map_err(|_| IndexError::Closed)?
    }

    pub async fn lookup(&self, key: Value) -> Result<Option<Slot>, IndexError> {
        let (reply, rx) = oneshot::channel();
        self.call(Request::Op(Operation::Lookup { key, reply }), rx)
            .await
    }

    /// See `FragmentStore::add`.
    pub async fn add(
        &self,
        key: Value,
        value: Value,
        defer: bool,
        replace: bool,
    ) -> Result<(), IndexError> {
        let (reply, rx) = oneshot::channel();
        let op = Operation::Add {
            key,
            value,
            defer,
            replace,
            reply,
        };
        self.call(Request::Op(op), rx).await
    }

    pub async fn remove(
        &self,
        key: Value,
        value: Option<Value>,
        defer: bool,
    ) -> Result<bool, IndexError> {
        let (reply, rx) = oneshot::channel();
        let op = Operation::Remove {
            key,
            value,
            defer,
            reply,
        };
        self.call(Request::Op(op), rx).await
    }

    /// The leaf at `cursor`, advancing it.
    pub async fn next_node(
        &self,
        cursor: &mut NodeCursor,
    ) -> Result<Option<(HashRange, Payload)>, IndexError> {
        let (reply, rx) = oneshot::channel();
        let request = Request::NextNode {
            cursor: *cursor,
            reply,
        };
        let (advanced, node) = self.call(request, rx).await?;
        *cursor = advanced;
        Ok(node)
    }

    /// Up to `limit` entries in hash order, or all of them.
    pub async fn collect_entries(
        &self,
        limit: Option<usize>,
    ) -> Result<Vec<(String, Slot)>, IndexError> {
        let (reply, rx) = oneshot::channel();
        self.call(Request::CollectEntries { limit, reply }, rx)
            .await
    }

    pub async fn stats(&self) -> Result<StoreStats, IndexError> {
        let (reply, rx) = oneshot::channel();
        self.send(Request::Stats { reply }).await?;
        rx.await.map_err(|_| IndexError::Closed)
    }

    pub async fn drop_index(&self) -> Result<(), IndexError> {
        let (reply, rx) = oneshot::channel();
        self.call(Request::Drop { reply }, rx).await
    }

    /// Finish queued work and stop the task. Requests sent after this fail
    /// with `IndexError::Closed`.
    pub async fn shutdown(&self) -> Result<(), IndexError> {
        let (reply, rx) = oneshot::channel();
        self.send(Request::Shutdown { reply }).await?;
        rx.await.map_err(|_| IndexError::Closed)
    }
}

async fn run(mut store: FragmentStore, mut receiver: mpsc::Receiver<Request>) {
    let mut batch = Vec::with_capacity(HANDLE_CHANNEL_CAPACITY);
    let mut stopping = None;
    while stopping.is_none() {
        if receiver.recv_many(&mut batch, HANDLE_CHANNEL_CAPACITY).await == 0 {
            break;
        }
        tracing::trace!(requests = batch.len(), "index batch");
        for request in batch.drain(..) {
            if stopping.is_some() {
                // Dropping the request closes its reply channel.
                continue;
            }
            match request {
                Request::Op(op) => store.submit(op),
                Request::Shutdown { reply } => {
                    receiver.close();
                    stopping = Some(reply);
                }
                control => {
                    // Control requests observe every operation sent before them.
                    store.run_pending();
                    answer(&mut store, control);
                }
            }
        }
        store.run_pending();
    }

    tracing::debug!(
        collection = store.collection(),
        index = store.name(),
        "index task stopped"
    );
    if let Some(reply) = stopping {
        let _ = reply.send(());
    }
}

fn answer(store: &mut FragmentStore, request: Request) {
    match request {
        Request::NextNode { mut cursor, reply } => {
            let result = store.next_node(&mut cursor).map(|node| (cursor, node));
            let _ = reply.send(result);
        }
        Request::CollectEntries { limit, reply } => {
            let _ = reply.send(collect(store, limit));
        }
        Request::Stats { reply } => {
            let _ = reply.send(store.stats());
        }
        Request::Drop { reply } => {
            let _ = reply.send(store.drop_index());
        }
        Request::Op(op) => store.submit(op),
        Request::Shutdown { reply } => {
            let _ = reply.send(());
        }
    }
}

fn collect(
    store: &mut FragmentStore,
    limit: Option<usize>,
) -> Result<Vec<(String, Slot)>, IndexError> {
    let mut cursor = EntryCursor::new();
    let mut entries = Vec::new();
    while limit.is_none_or(|limit| entries.len() < limit) {
        match store.next_entry(&mut cursor)? {
            Some(entry) => entries.push(entry),
            None => break,
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::IndexOptions;
    use crate::constants::KEY_LEN;
    use crate::crypto::CollectionKey;
    use crate::index::Seed;
    use crate::storage::{Backend, MemoryBackend};
    use crate::types::KeyType;
    use futures::future::join_all;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn spawn(backend: &Arc<MemoryBackend>, unique: bool) -> (IndexHandle, JoinHandle<()>) {
        let options = IndexOptions::new(
            "people",
            "email",
            CollectionKey::new([1; KEY_LEN]),
            Seed::generate_with(&mut StdRng::seed_from_u64(8)),
            KeyType::String,
        )
        .unique(unique)
        .max_fragment_bytes(500);
        let store = FragmentStore::open(options, Arc::clone(backend) as Arc<dyn Backend>)
            .expect("open");
        IndexHandle::spawn(store)
    }

    #[tokio::test]
    async fn test_concurrent_adds() {
        let backend = Arc::new(MemoryBackend::new());
        let (handle, task) = spawn(&backend, true);

        let adds = (0..100).map(|i| {
            let handle = handle.clone();
            async move {
                handle
                    .add(
                        Value::from(format!("user{i}@example.com")),
                        Value::from(format!("doc-{i}")),
                        false,
                        false,
                    )
                    .await
            }
        });
        for result in join_all(adds).await {
            result.expect("add");
        }

        let stats = handle.stats().await.expect("stats");
        assert!(stats.known_ranges > 1);
        assert_eq!(stats.pending_tasks, 0);
        assert_eq!(
            backend.list("people").expect("list").len(),
            stats.known_ranges
        );

        let entries = handle.collect_entries(None).await.expect("entries");
        assert_eq!(entries.len(), 100);
        assert_eq!(handle.collect_entries(Some(7)).await.expect("some").len(), 7);

        handle.shutdown().await.expect("shutdown");
        task.await.expect("join");
    }

    #[tokio::test]
    async fn test_duplicate_in_one_batch() {
        let backend = Arc::new(MemoryBackend::new());
        let (handle, _task) = spawn(&backend, true);

        let key = || Value::from("same@example.com");
        let (first, second) = tokio::join!(
            handle.add(key(), Value::from("a"), false, false),
            handle.add(key(), Value::from("b"), false, false),
        );
        assert!(first.is_ok() != second.is_ok());
        assert!(matches!(
            first.err().or(second.err()),
            Some(IndexError::NotUnique { .. })
        ));
        assert!(handle.lookup(key()).await.expect("lookup").is_some());
    }

    #[tokio::test]
    async fn test_reopen_and_iterate() {
        let backend = Arc::new(MemoryBackend::new());
        let (handle, task) = spawn(&backend, false);
        for i in 0..60 {
            handle
                .add(Value::from(format!("k{i}")), Value::from("v"), i % 10 != 9, false)
                .await
                .expect("add");
        }
        assert!(handle.remove(Value::from("k3"), None, false).await.expect("remove"));
        handle.shutdown().await.expect("shutdown");
        task.await.expect("join");

        let (handle, _task) = spawn(&backend, false);
        assert_eq!(handle.stats().await.expect("stats").resident_ranges, 0);
        let mut cursor = NodeCursor::new();
        let mut keys = 0;
        while let Some((_, payload)) = handle.next_node(&mut cursor).await.expect("node") {
            keys += payload.len();
        }
        assert_eq!(keys, 59);
        assert_eq!(handle.lookup(Value::from("k3")).await.expect("lookup"), None);
    }

    #[tokio::test]
    async fn test_closed_after_shutdown() {
        let backend = Arc::new(MemoryBackend::new());
        let (handle, task) = spawn(&backend, true);
        handle.shutdown().await.expect("shutdown");
        task.await.expect("join");
        assert!(matches!(
            handle.lookup(Value::from("x")).await,
            Err(IndexError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_drop_index_through_handle() {
        let backend = Arc::new(MemoryBackend::new());
        let (handle, _task) = spawn(&backend, true);
        handle
            .add(Value::from("a@b.c"), Value::from("1"), false, false)
            .await
            .expect("add");
        handle.drop_index().await.expect("drop");
        assert!(backend.list("people").expect("list").is_empty());
        assert_eq!(handle.lookup(Value::from("a@b.c")).await.expect("lookup"), None);
    }
}
