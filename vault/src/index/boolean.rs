//! Boolean field index.
//!
//! Booleans have no hash, so the index is stored inverted: a unique
//! string index from document id to the document's boolean value. Finding
//! the documents with a given value is a scan over every leaf.

use std::sync::Arc;

use crate::config::IndexOptions;
use crate::index::cursor::{EntryCursor, NodeCursor};
use crate::index::store::{FragmentStore, IndexError};
use crate::storage::Backend;
use crate::types::{KeyType, Slot, Value};

/// Maps document ids to a boolean.
#[derive(Debug)]
pub struct BooleanIndex {
    store: FragmentStore,
}

impl BooleanIndex {
    /// Open the index. The key type and uniqueness of `options` are
    /// overridden.
    pub fn open(options: IndexOptions, backend: Arc<dyn Backend>) -> Result<Self, IndexError> {
        let mut options = options.unique(true);
        options.key_type = KeyType::String;
        Ok(Self {
            store: FragmentStore::open(options, backend)?,
        })
    }

    /// Record `value` for `doc_id`, replacing any previous value.
    pub fn set(&mut self, doc_id: &str, value: bool) -> Result<(), IndexError> {
        self.store
            .add(Value::from(doc_id), Value::Boolean(value), false, true)
    }

    /// Forget `doc_id`. Returns whether it had a value.
    pub fn unset(&mut self, doc_id: &str) -> Result<bool, IndexError> {
        self.store.remove(Value::from(doc_id), None, false)
    }

    /// The value recorded for `doc_id`.
    pub fn get(&mut self, doc_id: &str) -> Result<Option<bool>, IndexError> {
        let slot = self.store.lookup(Value::from(doc_id))?;
        Ok(slot.and_then(|slot| match slot {
            Slot::Single(Value::Boolean(b)) => Some(b),
            _ => None,
        }))
    }

    /// Every document id whose value is `value`, in hash order.
    pub fn lookup(&mut self, value: bool) -> Result<Vec<String>, IndexError> {
        let mut found = Vec::new();
        self.store.map(None, true, |_, payload| {
            let before = found.len();
            found.extend(payload.iter().filter_map(|(doc_id, slot)| {
                matches!(slot, Slot::Single(Value::Boolean(b)) if *b == value)
                    .then(|| doc_id.as_str().to_owned())
            }));
            found.len() - before
        })?;
        Ok(found)
    }

    /// Boolean indexes can only be scanned through `lookup`.
    pub const fn node_iterator(&self) -> Result<NodeCursor, IndexError> {
        Err(IndexError::Unsupported("node iteration"))
    }

    /// Boolean indexes can only be scanned through `lookup`.
    pub const fn iterator(&self) -> Result<EntryCursor, IndexError> {
        Err(IndexError::Unsupported("entry iteration"))
    }

    pub fn drop_index(&mut self) -> Result<(), IndexError> {
        self.store.drop_index()
    }

    /// The underlying document id index.
    #[must_use]
    pub const fn store(&self) -> &FragmentStore {
        &self.store
    }
}
