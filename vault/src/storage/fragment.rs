//! Fragment files of one index.
//!
//! A fragment is the sealed JSON encoding of one leaf payload, stored in the
//! collection directory as `_<index>_<start>_<end>` with the leaf range in
//! its canonical form.

use std::sync::Arc;

use crate::crypto::{CodecError, CollectionKey, EnvelopeCodec};
use crate::index::{FragmentLoader, HashRange, Payload};
use crate::storage::{Backend, BackendError};

/// Errors reading or writing fragments.
#[derive(Debug)]
pub enum FragmentError {
    /// A fragment the index requires is not on disk.
    Missing(HashRange),
    /// Backend failure.
    Backend(BackendError),
    /// The envelope could not be opened or sealed.
    Codec(CodecError),
    /// The plaintext is not a valid payload.
    Parse(serde_json::Error),
}

impl std::fmt::Display for FragmentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing(range) => write!(f, "fragment {range} is missing"),
            Self::Backend(e) => write!(f, "fragment storage error: {e}"),
            Self::Codec(e) => write!(f, "fragment codec error: {e}"),
            Self::Parse(e) => write!(f, "fragment payload is malformed: {e}"),
        }
    }
}

impl std::error::Error for FragmentError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Missing(_) => None,
            Self::Backend(e) => Some(e),
            Self::Codec(e) => Some(e),
            Self::Parse(e) => Some(e),
        }
    }
}

impl From<BackendError> for FragmentError {
    fn from(e: BackendError) -> Self {
        Self::Backend(e)
    }
}

impl From<CodecError> for FragmentError {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}

impl From<serde_json::Error> for FragmentError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e)
    }
}

/// Reads and writes the fragments of a single index.
pub struct FragmentFiles {
    backend: Arc<dyn Backend>,
    codec: EnvelopeCodec,
    key: CollectionKey,
    collection: String,
    prefix: String,
}

impl std::fmt::Debug for FragmentFiles {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FragmentFiles")
            .field("collection", &self.collection)
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl FragmentFiles {
    #[must_use]
    pub fn new(
        backend: Arc<dyn Backend>,
        codec: EnvelopeCodec,
        key: CollectionKey,
        collection: &str,
        index: &str,
    ) -> Self {
        Self {
            backend,
            codec,
            key,
            collection: collection.to_owned(),
            prefix: format!("_{index}_"),
        }
    }

    /// File name of the fragment for `range`.
    #[must_use]
    pub fn file_name(&self, range: HashRange) -> String {
        format!("{}{range}", self.prefix)
    }

    /// Ranges of every fragment of this index on disk, in hash order.
    ///
    /// Reads only the directory listing. Files of other indexes, including
    /// ones whose name shares this index's prefix, are skipped.
    pub fn list_ranges(&self) -> Result<Vec<HashRange>, FragmentError> {
        let mut ranges: Vec<HashRange> = self
            .backend
            .list(&self.collection)?
            .iter()
            .filter_map(|name| name.strip_prefix(self.prefix.as_str()))
            .filter_map(|suffix| suffix.parse().ok())
            .collect();
        ranges.sort_unstable();
        Ok(ranges)
    }

    /// Read, open and parse the fragment for `range`.
    pub fn read(&self, range: HashRange) -> Result<Payload, FragmentError> {
        let sealed = match self.backend.read(&self.collection, &self.file_name(range)) {
            Ok(sealed) => sealed,
            Err(BackendError::NotFound(_)) => return Err(FragmentError::Missing(range)),
            Err(e) => return Err(e.into()),
        };
        let plaintext = self.codec.open_with_key(&sealed, &self.key)?;
        let payload = serde_json::from_slice(&plaintext)?;
        tracing::debug!(
            collection = %self.collection,
            %range,
            bytes = sealed.len(),
            "loaded fragment"
        );
        Ok(payload)
    }

    /// Serialize, seal and store the fragment for `range`.
    pub fn write(&self, range: HashRange, payload: &Payload) -> Result<(), FragmentError> {
        let plaintext = serde_json::to_vec(payload)?;
        let sealed = self.codec.seal_with_key(&plaintext, &self.key)?;
        self.backend
            .write(&self.collection, &self.file_name(range), &sealed)?;
        tracing::debug!(
            collection = %self.collection,
            %range,
            entries = payload.len(),
            bytes = sealed.len(),
            "wrote fragment"
        );
        Ok(())
    }

    /// Delete the fragment for `range`.
    ///
    /// A fragment that was never written is not an error.
    pub fn delete(&self, range: HashRange) -> Result<(), FragmentError> {
        match self.backend.remove(&self.collection, &self.file_name(range)) {
            Ok(()) => {
                tracing::debug!(collection = %self.collection, %range, "deleted fragment");
                Ok(())
            }
            Err(BackendError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl FragmentLoader for FragmentFiles {
    fn load(&self, range: HashRange) -> Result<Payload, FragmentError> {
        self.read(range)
    }
}
