//! Hash-partitioned indexes.
//!
//! Keys are hashed into a 64-bit space that a binary tree splits into
//! leaves. Each leaf is persisted as one sealed fragment file and loaded
//! only when an operation needs it.

mod boolean;
mod cursor;
mod handle;
mod hasher;
mod queue;
mod range;
mod residency;
mod store;
mod tree;

pub use boolean::BooleanIndex;
pub use cursor::{EntryCursor, NodeCursor};
pub use handle::IndexHandle;
pub use hasher::{HashError, KeyHasher, PreparedKey, SEED_LEN, Seed};
pub use queue::TaskQueue;
pub use range::{HashRange, RangeError};
pub use residency::ResidencyTracker;
pub use store::{EventBuffer, FragmentStore, IndexError, Operation, Reply, StoreStats};
pub use tree::{
    CollisionPolicy, FragmentLoader, FragmentSink, LeafRef, PartitionedTree, Payload, TreeConfig,
    TreeError, payload_size,
};
