//! Authenticated ciphers usable by the envelope codec.
//!
//! The codec never names a concrete cipher; it is handed a `Cipher` when a
//! store is constructed. `XChaCha20Poly1305Cipher` is the default: a
//! secret-box style construction with a 24-byte random nonce and a 16-byte
//! MAC appended to the ciphertext.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};

use crate::constants::KEY_LEN;
use crate::crypto::CodecError;

/// A symmetric authenticated cipher with a fixed nonce size.
pub trait Cipher: Send + Sync {
    /// Nonce length in bytes.
    fn nonce_len(&self) -> usize;

    /// MAC length in bytes (ciphertext = plaintext + MAC).
    fn mac_len(&self) -> usize;

    /// Encrypt and authenticate `plaintext`.
    fn seal(&self, key: &[u8; KEY_LEN], nonce: &[u8], plaintext: &[u8])
    -> Result<Vec<u8>, CodecError>;

    /// Verify and decrypt `ciphertext`.
    ///
    /// Any authentication failure is `CodecError::InvalidKey`.
    fn open(&self, key: &[u8; KEY_LEN], nonce: &[u8], ciphertext: &[u8])
    -> Result<Vec<u8>, CodecError>;
}

/// XChaCha20-Poly1305.
#[derive(Debug, Default, Clone, Copy)]
pub struct XChaCha20Poly1305Cipher;

impl XChaCha20Poly1305Cipher {
    const NONCE_LEN: usize = 24;
    const MAC_LEN: usize = 16;

    fn check_nonce(nonce: &[u8]) -> Result<&XNonce, CodecError> {
        if nonce.len() != Self::NONCE_LEN {
            return Err(CodecError::Format("nonce length does not match cipher"));
        }
        Ok(XNonce::from_slice(nonce))
    }
}

impl Cipher for XChaCha20Poly1305Cipher {
    fn nonce_len(&self) -> usize {
        Self::NONCE_LEN
    }

    fn mac_len(&self) -> usize {
        Self::MAC_LEN
    }

    fn seal(
        &self,
        key: &[u8; KEY_LEN],
        nonce: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CodecError> {
        let nonce = Self::check_nonce(nonce)?;
        XChaCha20Poly1305::new(Key::from_slice(key))
            .encrypt(nonce, plaintext)
            .map_err(|_| CodecError::EncryptFailed)
    }

    fn open(
        &self,
        key: &[u8; KEY_LEN],
        nonce: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CodecError> {
        let nonce = Self::check_nonce(nonce)?;
        XChaCha20Poly1305::new(Key::from_slice(key))
            .decrypt(nonce, ciphertext)
            .map_err(|_| CodecError::InvalidKey)
    }
}
