//! Encryption at rest.
//!
//! Every persisted artifact (index fragments, collection metadata) is sealed
//! in the envelope defined in `envelope.rs`.

mod cipher;
mod envelope;
mod key;

pub use cipher::{Cipher, XChaCha20Poly1305Cipher};
pub use envelope::{EnvelopeCodec, EnvelopeParts, HEADER_LEN, KdfParams, LEGACY_VERSION, VERSION};
pub use key::CollectionKey;

/// Errors produced while sealing or opening an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The envelope is malformed. Detected before any crypto runs.
    Format(&'static str),
    /// Wrong key or corrupted data. Deliberately undistinguished.
    InvalidKey,
    /// The cipher refused to encrypt.
    EncryptFailed,
    /// Parameters passed to `seal` cannot be encoded.
    InvalidParams(&'static str),
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Format(msg) => write!(f, "invalid envelope format: {msg}"),
            Self::InvalidKey => write!(f, "wrong key or corrupted data"),
            Self::EncryptFailed => write!(f, "encryption failed"),
            Self::InvalidParams(msg) => write!(f, "invalid envelope parameters: {msg}"),
        }
    }
}

impl std::error::Error for CodecError {}
