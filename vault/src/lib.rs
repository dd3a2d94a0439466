#![cfg_attr(
    test,
    allow(clippy::expect_used, clippy::unwrap_used, clippy::disallowed_methods)
)]
// Life of a lookup:
// 1. The key is canonicalized and hashed with the collection's seed
// 2. The tree finds the leaf whose range covers the hash
// 3. If the leaf is not resident:
//     - Queue a load on the leaf's range
//     - Read the fragment file, open the envelope, parse the payload
// 4. Read the slot under the stored key
//
// Life of an add:
// 1-3. As above
// 4. Insert into the leaf, splitting it if it grew past the fragment size
// 5. Flush: changed and deleted ranges become persist/delete tasks
// 6. Reply once those tasks have run
//
// On-disk layout:
//  {data_directory}/{collection}/_meta                  seed + declared indexes
//  {data_directory}/{collection}/_{index}_{start}_{end} one fragment per leaf

pub mod config;
pub mod constants;
pub mod crypto;
pub mod index;
pub mod meta;
pub mod storage;
pub mod types;

#[cfg(test)]
mod scenario_tests;

pub use config::{ConfigError, IndexOptions, StoreConfig};
pub use index::{BooleanIndex, FragmentStore, HashRange, IndexError, IndexHandle};
pub use meta::{CollectionMeta, IndexSpec, MetaError};
pub use types::{KeyType, Slot, Value};
