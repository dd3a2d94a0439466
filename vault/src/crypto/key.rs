//! Collection key material.

use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::constants::KEY_LEN;
use crate::crypto::CodecError;

/// The 32-byte key every artifact of a collection is sealed with.
///
/// Zeroized on drop. `Debug` never prints the bytes.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
#[allow(clippy::disallowed_methods)] // Clone hands the key to each index of a collection
pub struct CollectionKey([u8; KEY_LEN]);

impl CollectionKey {
    /// Wrap raw key bytes.
    #[must_use]
    pub const fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Generate a random key.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        rand::rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Parse a key from 64 hex characters.
    pub fn from_hex(text: &str) -> Result<Self, CodecError> {
        let mut decoded = hex::decode(text.trim()).map_err(|_| CodecError::InvalidKey)?;
        let result = <[u8; KEY_LEN]>::try_from(decoded.as_slice())
            .map(Self)
            .map_err(|_| CodecError::InvalidKey);
        decoded.zeroize();
        result
    }

    /// Expose the key bytes to a cipher.
    pub(crate) const fn expose_secret(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for CollectionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CollectionKey([REDACTED])")
    }
}
