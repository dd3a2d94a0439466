//! Common helpers for scenario tests.

use std::sync::Arc;

use tempfile::TempDir;

use crate::config::IndexOptions;
use crate::constants::KEY_LEN;
use crate::crypto::{CollectionKey, EnvelopeCodec};
use crate::index::FragmentStore;
use crate::meta::{CollectionMeta, IndexSpec};
use crate::storage::{Backend, DirBackend};
use crate::types::{KeyType, Value};

pub const COLLECTION: &str = "people";

/// A collection in a temporary directory, removed on drop.
pub struct TestCollection {
    pub dir: TempDir,
    pub backend: Arc<DirBackend>,
    pub key: CollectionKey,
    pub meta: CollectionMeta,
}

impl TestCollection {
    /// A fresh collection declaring `email` (unique string) and `age`
    /// (multi number) besides the primary index.
    #[must_use]
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let backend = Arc::new(DirBackend::new(dir.path().to_path_buf()));
        let key = CollectionKey::new([42; KEY_LEN]);
        let codec = EnvelopeCodec::default();

        let mut meta = CollectionMeta::load_or_create(backend.as_ref(), &codec, &key, COLLECTION)
            .expect("Failed to create metadata");
        meta.declare(IndexSpec {
            name: "email".to_owned(),
            key_type: KeyType::String,
            unique: true,
        });
        meta.declare(IndexSpec {
            name: "age".to_owned(),
            key_type: KeyType::Number,
            unique: false,
        });
        meta.save(backend.as_ref(), &codec, &key, COLLECTION)
            .expect("Failed to save metadata");

        Self {
            dir,
            backend,
            key,
            meta,
        }
    }

    #[must_use]
    pub fn backend(&self) -> Arc<dyn Backend> {
        Arc::clone(&self.backend) as Arc<dyn Backend>
    }

    #[must_use]
    pub fn options(&self, index: &str, max_fragment_bytes: usize) -> IndexOptions {
        self.meta
            .index_options(COLLECTION, index, self.key.clone())
            .expect("Index should be declared")
            .max_fragment_bytes(max_fragment_bytes)
    }

    #[must_use]
    pub fn open(&self, index: &str, max_fragment_bytes: usize) -> FragmentStore {
        self.open_with(self.options(index, max_fragment_bytes))
    }

    #[must_use]
    pub fn open_with(&self, options: IndexOptions) -> FragmentStore {
        FragmentStore::open(options, self.backend()).expect("Failed to open index")
    }

    /// Fragment file names of `index`, sorted.
    #[must_use]
    pub fn fragment_names(&self, index: &str) -> Vec<String> {
        let prefix = format!("_{index}_");
        let mut names: Vec<String> = std::fs::read_dir(self.dir.path().join(COLLECTION))
            .expect("Collection directory should exist")
            .map(|entry| {
                entry
                    .expect("Failed to read entry")
                    .file_name()
                    .to_string_lossy()
                    .into_owned()
            })
            .filter(|name| name.starts_with(&prefix))
            .collect();
        names.sort();
        names
    }
}

pub fn email(i: usize) -> Value {
    Value::from(format!("user{i}@example.com"))
}

pub fn doc(i: usize) -> Value {
    Value::from(format!("doc-{i:04}"))
}

/// Add `count` unique emails, flushing each.
pub fn add_emails(store: &mut FragmentStore, count: usize) {
    for i in 0..count {
        store
            .add(email(i), doc(i), false, false)
            .expect("Failed to add email");
    }
}
