//! Versioned envelope for sealed artifacts.
//!
//! ```text
//! offset 0          1 byte   format version (0x00 legacy, 0x01 current)
//! offset 1          2 bytes  scrypt r
//! offset 3          2 bytes  scrypt p
//! offset 5          4 bytes  scrypt ops limit (N)
//! offset 9          2 bytes  salt length (sn)
//! offset 11         2 bytes  nonce length (ss)
//! offset 13         4 bytes  ciphertext length (x), MAC included
//! offset 17         sn bytes salt
//! offset 17+sn      ss bytes nonce
//! offset 17+sn+ss   x bytes  ciphertext
//! ```
//!
//! All integers are big-endian. The header is validated completely before
//! any key derivation or decryption is attempted, so a malformed envelope is
//! always a `CodecError::Format` and never a key error.

use std::sync::Arc;

use rand::RngCore;
use zeroize::Zeroizing;

use crate::constants::{KEY_LEN, MAX_OPS_LIMIT};
use crate::crypto::{Cipher, CodecError, CollectionKey, XChaCha20Poly1305Cipher};

/// Version written by this codec.
pub const VERSION: u8 = 0x01;

/// Version written by older stores; same layout.
pub const LEGACY_VERSION: u8 = 0x00;

const VERSION_OFFSET: usize = 0;
const R_OFFSET: usize = 1;
const P_OFFSET: usize = 3;
const OPS_OFFSET: usize = 5;
const SALT_LEN_OFFSET: usize = 9;
const NONCE_LEN_OFFSET: usize = 11;
const CIPHERTEXT_LEN_OFFSET: usize = 13;

/// Fixed header length.
pub const HEADER_LEN: usize = 17;

/// Key derivation parameters stored in every envelope.
///
/// An `ops_limit` of 0 means the secret already is a 32-byte key and is used
/// directly; this is how fragments and metadata are sealed with the
/// collection key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    pub ops_limit: u32,
    pub r: u16,
    pub p: u16,
}

impl KdfParams {
    /// Use the secret as the key.
    pub const RAW_KEY: Self = Self {
        ops_limit: 0,
        r: 0,
        p: 0,
    };

    /// Scrypt with the given cost.
    #[must_use]
    pub const fn scrypt(ops_limit: u32, r: u16, p: u16) -> Self {
        Self { ops_limit, r, p }
    }

    /// Reject parameters that no envelope may carry.
    fn validate(self) -> Result<(), &'static str> {
        if self.ops_limit > MAX_OPS_LIMIT {
            return Err("ops limit exceeds the maximum");
        }
        if self.ops_limit == 0 {
            return Ok(());
        }
        if self.ops_limit < 2 || !self.ops_limit.is_power_of_two() {
            return Err("ops limit is not a power of two");
        }
        if self.r == 0 || self.p == 0 {
            return Err("scrypt r and p must be positive");
        }
        // scrypt requires N < 2^(16 r) and r * p < 2^30.
        if self.ops_limit.trailing_zeros() >= 16 * u32::from(self.r) {
            return Err("ops limit too large for r");
        }
        if u64::from(self.r) * u64::from(self.p) >= 1 << 30 {
            return Err("scrypt r * p too large");
        }
        Ok(())
    }

    /// Derive the 32-byte encryption key from `secret` and `salt`.
    fn derive(self, secret: &[u8], salt: &[u8]) -> Result<Zeroizing<[u8; KEY_LEN]>, CodecError> {
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        if self.ops_limit == 0 {
            if secret.len() != KEY_LEN {
                return Err(CodecError::InvalidKey);
            }
            key.copy_from_slice(secret);
            return Ok(key);
        }

        // validate() guarantees a power of two no larger than 2^22
        #[allow(clippy::cast_possible_truncation)]
        let log_n = self.ops_limit.trailing_zeros() as u8;
        let params = scrypt::Params::new(log_n, u32::from(self.r), u32::from(self.p), KEY_LEN)
            .map_err(|_| CodecError::InvalidParams("scrypt rejected r/p"))?;
        scrypt::scrypt(secret, salt, &params, key.as_mut_slice())
            .map_err(|_| CodecError::InvalidParams("scrypt output length"))?;
        Ok(key)
    }
}

/// A parsed, length-checked envelope borrowing its input.
#[derive(Debug, Clone, Copy)]
pub struct EnvelopeParts<'a> {
    pub version: u8,
    pub kdf: KdfParams,
    pub salt: &'a [u8],
    pub nonce: &'a [u8],
    pub ciphertext: &'a [u8],
}

/// Seals and opens envelopes with an injected cipher.
#[derive(Clone)]
#[allow(clippy::disallowed_methods)] // Clone shares the cipher between stores of a collection
pub struct EnvelopeCodec {
    cipher: Arc<dyn Cipher>,
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self::new(Arc::new(XChaCha20Poly1305Cipher))
    }
}

impl std::fmt::Debug for EnvelopeCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvelopeCodec")
            .field("nonce_len", &self.cipher.nonce_len())
            .field("mac_len", &self.cipher.mac_len())
            .finish()
    }
}

impl EnvelopeCodec {
    #[must_use]
    pub fn new(cipher: Arc<dyn Cipher>) -> Self {
        Self { cipher }
    }

    /// Seal `plaintext` with a key derived from `secret`.
    ///
    /// A fresh random nonce is drawn for every call.
    pub fn seal(
        &self,
        plaintext: &[u8],
        secret: &[u8],
        salt: &[u8],
        kdf: KdfParams,
    ) -> Result<Vec<u8>, CodecError> {
        kdf.validate().map_err(CodecError::InvalidParams)?;
        let salt_len =
            u16::try_from(salt.len()).map_err(|_| CodecError::InvalidParams("salt too long"))?;
        let nonce_len = u16::try_from(self.cipher.nonce_len())
            .map_err(|_| CodecError::InvalidParams("cipher nonce too long"))?;

        let key = kdf.derive(secret, salt)?;
        let mut nonce = vec![0u8; self.cipher.nonce_len()];
        rand::rng().fill_bytes(&mut nonce);
        let ciphertext = self.cipher.seal(&key, &nonce, plaintext)?;
        let ciphertext_len = u32::try_from(ciphertext.len())
            .map_err(|_| CodecError::InvalidParams("plaintext too long"))?;

        let mut out = Vec::with_capacity(HEADER_LEN + salt.len() + nonce.len() + ciphertext.len());
        out.push(VERSION);
        out.extend_from_slice(&kdf.r.to_be_bytes());
        out.extend_from_slice(&kdf.p.to_be_bytes());
        out.extend_from_slice(&kdf.ops_limit.to_be_bytes());
        out.extend_from_slice(&salt_len.to_be_bytes());
        out.extend_from_slice(&nonce_len.to_be_bytes());
        out.extend_from_slice(&ciphertext_len.to_be_bytes());
        out.extend_from_slice(salt);
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Open an envelope sealed by [`Self::seal`].
    pub fn open(&self, envelope: &[u8], secret: &[u8]) -> Result<Vec<u8>, CodecError> {
        let parts = self.parse(envelope)?;
        let key = parts.kdf.derive(secret, parts.salt)?;
        self.cipher.open(&key, parts.nonce, parts.ciphertext)
    }

    /// Seal with the collection key used directly.
    pub fn seal_with_key(&self, plaintext: &[u8], key: &CollectionKey) -> Result<Vec<u8>, CodecError> {
        self.seal(plaintext, key.expose_secret(), &[], KdfParams::RAW_KEY)
    }

    /// Open with the collection key used directly.
    pub fn open_with_key(&self, envelope: &[u8], key: &CollectionKey) -> Result<Vec<u8>, CodecError> {
        self.open(envelope, key.expose_secret())
    }

    /// Validate the header and split the envelope into its parts.
    pub fn parse<'a>(&self, envelope: &'a [u8]) -> Result<EnvelopeParts<'a>, CodecError> {
        if envelope.len() < HEADER_LEN {
            return Err(CodecError::Format("envelope shorter than its header"));
        }

        let version = envelope[VERSION_OFFSET];
        if version != VERSION && version != LEGACY_VERSION {
            return Err(CodecError::Format("unsupported envelope version"));
        }

        let kdf = KdfParams {
            r: read_u16(envelope, R_OFFSET),
            p: read_u16(envelope, P_OFFSET),
            ops_limit: read_u32(envelope, OPS_OFFSET),
        };
        kdf.validate().map_err(CodecError::Format)?;

        let salt_len = usize::from(read_u16(envelope, SALT_LEN_OFFSET));
        let nonce_len = usize::from(read_u16(envelope, NONCE_LEN_OFFSET));
        if nonce_len != self.cipher.nonce_len() {
            return Err(CodecError::Format("nonce length does not match cipher"));
        }
        let ciphertext_len = usize::try_from(read_u32(envelope, CIPHERTEXT_LEN_OFFSET))
            .map_err(|_| CodecError::Format("ciphertext length overflows"))?;
        if ciphertext_len < self.cipher.mac_len() {
            return Err(CodecError::Format("ciphertext shorter than the MAC"));
        }

        let salt_end = HEADER_LEN + salt_len;
        let nonce_end = salt_end + nonce_len;
        let body_end = nonce_end
            .checked_add(ciphertext_len)
            .ok_or(CodecError::Format("ciphertext length overflows"))?;
        if envelope.len() < body_end {
            return Err(CodecError::Format("envelope truncated"));
        }
        if envelope.len() > body_end {
            return Err(CodecError::Format("trailing bytes after ciphertext"));
        }

        Ok(EnvelopeParts {
            version,
            kdf,
            salt: &envelope[HEADER_LEN..salt_end],
            nonce: &envelope[salt_end..nonce_end],
            ciphertext: &envelope[nonce_end..body_end],
        })
    }
}

fn read_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([buf[offset], buf[offset + 1]])
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> CollectionKey {
        CollectionKey::new([0x11; KEY_LEN])
    }

    #[test]
    fn test_roundtrip_with_collection_key() {
        let codec = EnvelopeCodec::default();
        for plaintext in [&b""[..], b"x", &[0u8, 255, 1, 254][..], &[7u8; 4096][..]] {
            let sealed = codec.seal_with_key(plaintext, &key()).expect("seal");
            assert_eq!(sealed.len(), HEADER_LEN + 24 + plaintext.len() + 16);
            let opened = codec.open_with_key(&sealed, &key()).expect("open");
            assert_eq!(opened, plaintext);
        }
    }

    #[test]
    fn test_roundtrip_with_scrypt() {
        let codec = EnvelopeCodec::default();
        let kdf = KdfParams::scrypt(1024, 8, 1);
        let sealed = codec
            .seal(b"registry", b"correct horse", b"salty", kdf)
            .expect("seal");
        let parts = codec.parse(&sealed).expect("parse");
        assert_eq!(parts.kdf, kdf);
        assert_eq!(parts.salt, b"salty");
        assert_eq!(parts.version, VERSION);

        let opened = codec.open(&sealed, b"correct horse").expect("open");
        assert_eq!(opened, b"registry");
        assert!(matches!(
            codec.open(&sealed, b"wrong horse"),
            Err(CodecError::InvalidKey)
        ));
    }

    #[test]
    fn test_header_layout() {
        let codec = EnvelopeCodec::default();
        let sealed = codec
            .seal(b"abc", &[0x11; KEY_LEN], b"s", KdfParams::RAW_KEY)
            .expect("seal");
        assert_eq!(sealed[0], 0x01);
        assert_eq!(&sealed[1..9], &[0, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(&sealed[9..11], &[0, 1]);
        assert_eq!(&sealed[11..13], &[0, 24]);
        assert_eq!(&sealed[13..17], &[0, 0, 0, 19]);
        assert_eq!(sealed[17], b's');
    }

    #[test]
    fn test_every_truncation_is_a_format_error() {
        let codec = EnvelopeCodec::default();
        let sealed = codec.seal_with_key(b"fragment", &key()).expect("seal");
        for len in 0..sealed.len() {
            assert!(
                matches!(codec.open_with_key(&sealed[..len], &key()), Err(CodecError::Format(_))),
                "length {len} should be a format error"
            );
        }
    }

    #[test]
    fn test_wrong_key_is_key_error() {
        let codec = EnvelopeCodec::default();
        let sealed = codec.seal_with_key(b"fragment", &key()).expect("seal");
        let other = CollectionKey::new([0x22; KEY_LEN]);
        assert!(matches!(
            codec.open_with_key(&sealed, &other),
            Err(CodecError::InvalidKey)
        ));

        let mut tampered = sealed;
        let last = tampered.len() - 1;
        tampered[last] ^= 1;
        assert!(matches!(
            codec.open_with_key(&tampered, &key()),
            Err(CodecError::InvalidKey)
        ));
    }

    #[test]
    fn test_header_rejections() {
        let codec = EnvelopeCodec::default();
        let sealed = codec.seal_with_key(b"fragment", &key()).expect("seal");

        let mut bad_version = sealed.clone();
        bad_version[0] = 0x02;
        assert!(matches!(codec.parse(&bad_version), Err(CodecError::Format(_))));

        let mut legacy = sealed.clone();
        legacy[0] = LEGACY_VERSION;
        assert_eq!(codec.open_with_key(&legacy, &key()).expect("legacy"), b"fragment");

        let mut bad_nonce = sealed.clone();
        bad_nonce[11..13].copy_from_slice(&12u16.to_be_bytes());
        assert!(matches!(codec.parse(&bad_nonce), Err(CodecError::Format(_))));

        let mut big_ops = sealed.clone();
        big_ops[5..9].copy_from_slice(&(MAX_OPS_LIMIT * 2).to_be_bytes());
        assert!(matches!(codec.parse(&big_ops), Err(CodecError::Format(_))));

        let derived = codec
            .seal(b"fragment", b"pw", b"salt", KdfParams::scrypt(1024, 8, 1))
            .expect("seal");
        let mut zero_r = derived.clone();
        zero_r[1..3].copy_from_slice(&0u16.to_be_bytes());
        assert!(matches!(codec.parse(&zero_r), Err(CodecError::Format(_))));
        assert!(matches!(codec.open(&zero_r, b"pw"), Err(CodecError::Format(_))));
        let mut zero_p = derived;
        zero_p[3..5].copy_from_slice(&0u16.to_be_bytes());
        assert!(matches!(codec.parse(&zero_p), Err(CodecError::Format(_))));

        let mut short_ct = sealed.clone();
        short_ct[13..17].copy_from_slice(&4u32.to_be_bytes());
        assert!(matches!(codec.parse(&short_ct), Err(CodecError::Format(_))));

        let mut trailing = sealed;
        trailing.push(0);
        assert!(matches!(codec.parse(&trailing), Err(CodecError::Format(_))));
    }

    #[test]
    fn test_seal_rejects_bad_params() {
        let codec = EnvelopeCodec::default();
        assert!(matches!(
            codec.seal(b"x", b"pw", b"salt", KdfParams::scrypt(1000, 8, 1)),
            Err(CodecError::InvalidParams(_))
        ));
        assert!(matches!(
            codec.seal(b"x", b"pw", b"salt", KdfParams::scrypt(1024, 0, 1)),
            Err(CodecError::InvalidParams(_))
        ));
        assert!(matches!(
            codec.seal(b"x", b"short", b"", KdfParams::RAW_KEY),
            Err(CodecError::InvalidKey)
        ));
    }
}
