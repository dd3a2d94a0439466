//! Collection metadata.
//!
//! Each collection directory holds one `_meta` file, sealed with the
//! collection key, recording the hashing seed and the declared indexes.
//! The seed decides which fragment every key lands in, so it is generated
//! once when the collection is created and never again.

use serde::{Deserialize, Serialize};

use crate::config::IndexOptions;
use crate::crypto::{CodecError, CollectionKey, EnvelopeCodec};
use crate::index::{HashError, Seed};
use crate::storage::{Backend, BackendError};
use crate::types::KeyType;

/// File name of the metadata inside a collection directory.
pub const META_FILE: &str = "_meta";

/// Errors produced while reading or writing collection metadata.
#[derive(Debug)]
pub enum MetaError {
    Backend(BackendError),
    Codec(CodecError),
    Parse(serde_json::Error),
    /// The persisted seed is not valid.
    Seed(HashError),
    /// No index with this name is declared.
    UnknownIndex(String),
}

impl std::fmt::Display for MetaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Backend(e) => write!(f, "metadata storage error: {e}"),
            Self::Codec(e) => write!(f, "metadata envelope error: {e}"),
            Self::Parse(e) => write!(f, "metadata is not valid JSON: {e}"),
            Self::Seed(e) => write!(f, "metadata seed: {e}"),
            Self::UnknownIndex(name) => write!(f, "index {name:?} is not declared"),
        }
    }
}

impl std::error::Error for MetaError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Backend(e) => Some(e),
            Self::Codec(e) => Some(e),
            Self::Parse(e) => Some(e),
            Self::Seed(e) => Some(e),
            Self::UnknownIndex(_) => None,
        }
    }
}

impl From<BackendError> for MetaError {
    fn from(e: BackendError) -> Self {
        Self::Backend(e)
    }
}

impl From<CodecError> for MetaError {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}

impl From<serde_json::Error> for MetaError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e)
    }
}

impl From<HashError> for MetaError {
    fn from(e: HashError) -> Self {
        Self::Seed(e)
    }
}

/// A declared index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::disallowed_methods)] // Clone for handing specs to callers
pub struct IndexSpec {
    pub name: String,
    pub key_type: KeyType,
    pub unique: bool,
}

/// Persisted description of a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::disallowed_methods)] // Clone for handing metadata to callers
pub struct CollectionMeta {
    /// Hex encoding of the seed permutation.
    seed: String,
    pub indexes: Vec<IndexSpec>,
}

impl CollectionMeta {
    /// Fresh metadata with a new random seed and the unique primary index.
    #[must_use]
    pub fn new() -> Self {
        Self::with_seed(&Seed::generate())
    }

    #[must_use]
    pub fn with_seed(seed: &Seed) -> Self {
        Self {
            seed: hex::encode(seed.as_bytes()),
            indexes: vec![IndexSpec {
                name: IndexOptions::PRIMARY.to_owned(),
                key_type: KeyType::String,
                unique: true,
            }],
        }
    }

    pub fn seed(&self) -> Result<Seed, MetaError> {
        let bytes = hex::decode(&self.seed)
            .map_err(|e| HashError::InvalidSeed(format!("seed is not hex: {e}")))?;
        Ok(Seed::from_bytes(&bytes)?)
    }

    #[must_use]
    pub fn index(&self, name: &str) -> Option<&IndexSpec> {
        self.indexes.iter().find(|spec| spec.name == name)
    }

    /// Declare an index. Returns `false` if one with the same name exists.
    pub fn declare(&mut self, spec: IndexSpec) -> bool {
        if self.index(&spec.name).is_some() {
            return false;
        }
        self.indexes.push(spec);
        true
    }

    /// Options for opening the declared index `name`.
    pub fn index_options(
        &self,
        collection: &str,
        name: &str,
        key: CollectionKey,
    ) -> Result<IndexOptions, MetaError> {
        let spec = self
            .index(name)
            .ok_or_else(|| MetaError::UnknownIndex(name.to_owned()))?;
        Ok(IndexOptions::new(collection, name, key, self.seed()?, spec.key_type).unique(spec.unique))
    }

    /// Read the metadata of `collection`, if it has any.
    pub fn load(
        backend: &dyn Backend,
        codec: &EnvelopeCodec,
        key: &CollectionKey,
        collection: &str,
    ) -> Result<Option<Self>, MetaError> {
        let sealed = match backend.read(collection, META_FILE) {
            Ok(sealed) => sealed,
            Err(BackendError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let plaintext = codec.open_with_key(&sealed, key)?;
        let meta: Self = serde_json::from_slice(&plaintext)?;
        // Reject a bad seed here rather than on first index open.
        meta.seed()?;
        Ok(Some(meta))
    }

    pub fn save(
        &self,
        backend: &dyn Backend,
        codec: &EnvelopeCodec,
        key: &CollectionKey,
        collection: &str,
    ) -> Result<(), MetaError> {
        let plaintext = serde_json::to_vec(self)?;
        let sealed = codec.seal_with_key(&plaintext, key)?;
        backend.write(collection, META_FILE, &sealed)?;
        tracing::debug!(collection, indexes = self.indexes.len(), "saved collection metadata");
        Ok(())
    }

    /// Load the metadata, creating and saving it on first use.
    pub fn load_or_create(
        backend: &dyn Backend,
        codec: &EnvelopeCodec,
        key: &CollectionKey,
        collection: &str,
    ) -> Result<Self, MetaError> {
        if let Some(meta) = Self::load(backend, codec, key, collection)? {
            return Ok(meta);
        }
        let meta = Self::new();
        meta.save(backend, codec, key, collection)?;
        tracing::info!(collection, "created collection metadata");
        Ok(meta)
    }
}

impl Default for CollectionMeta {
    fn default() -> Self {
        Self::new()
    }
}
