//! Seeded Pearson hashing of index keys.
//!
//! Every key is canonicalized to bytes and hashed to an 8-byte digest by
//! running the classic Pearson chain eight times, each time starting from a
//! different offset of the first byte. The digest, read big-endian, decides
//! which leaf range owns the key.
//!
//! # Canonicalization
//!
//! - strings: UTF-8 bytes as-is
//! - numbers: rounded to the number granularity, rendered as decimal ASCII
//! - dates: millisecond timestamp rounded to the date granularity, decimal
//! - buffers: raw bytes
//!
//! Booleans and non-finite numbers are not hashable.

use std::borrow::Cow;

use rand::Rng;

use crate::types::{KeyType, Value, render_number};

/// Number of entries in a seed table.
pub const SEED_LEN: usize = 256;

/// A permutation of the 256 byte values; the only parameter of the hash.
///
/// # Invariants
///
/// - Every byte value appears exactly once.
/// - A seed is generated once per index and must never change while the
///   index holds data: a different seed maps keys to different ranges.
#[derive(Clone, PartialEq, Eq)]
#[allow(clippy::disallowed_methods)] // Clone needed to hand the table to each index
pub struct Seed([u8; SEED_LEN]);

impl Seed {
    /// Generate a fresh seed from the thread RNG.
    #[must_use]
    pub fn generate() -> Self {
        Self::generate_with(&mut rand::rng())
    }

    /// Generate a seed by sorting the byte values on random weights.
    pub fn generate_with<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let mut weighted: Vec<(u32, u8)> = (0..=u8::MAX).map(|b| (rng.random(), b)).collect();
        weighted.sort_by_key(|&(weight, _)| weight);

        let mut table = [0u8; SEED_LEN];
        for (slot, (_, b)) in table.iter_mut().zip(weighted) {
            *slot = b;
        }
        Self(table)
    }

    /// Rebuild a seed from persisted bytes, checking it is a permutation.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, HashError> {
        let table: [u8; SEED_LEN] = bytes
            .try_into()
            .map_err(|_| HashError::InvalidSeed(format!("expected {SEED_LEN} bytes, got {}", bytes.len())))?;

        let mut seen = [false; SEED_LEN];
        for &b in &table {
            let slot = &mut seen[usize::from(b)];
            if *slot {
                return Err(HashError::InvalidSeed(format!("byte {b} appears twice")));
            }
            *slot = true;
        }
        Ok(Self(table))
    }

    /// The raw permutation table.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; SEED_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for Seed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Seed").field(&&self.0[..4]).finish_non_exhaustive()
    }
}

/// A key ready for the tree: the text it is stored under and its hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedKey {
    pub text: String,
    pub hash: u64,
}

/// Hashes keys of one index.
#[derive(Debug, Clone)]
#[allow(clippy::disallowed_methods)] // Clone shares one hasher between the store and its tree
pub struct KeyHasher {
    seed: Seed,
    key_type: KeyType,
    number_granularity: f64,
    date_granularity_ms: i64,
}

impl KeyHasher {
    /// Create a hasher with the default granularities (1 and 1ms).
    #[must_use]
    pub const fn new(seed: Seed, key_type: KeyType) -> Self {
        Self {
            seed,
            key_type,
            number_granularity: 1.0,
            date_granularity_ms: 1,
        }
    }

    /// Override the rounding granularities. Both must be strictly positive.
    pub fn with_granularity(mut self, number: f64, date_ms: i64) -> Result<Self, HashError> {
        if !number.is_finite() || number <= 0.0 {
            return Err(HashError::InvalidGranularity("number"));
        }
        if date_ms <= 0 {
            return Err(HashError::InvalidGranularity("date"));
        }
        self.number_granularity = number;
        self.date_granularity_ms = date_ms;
        Ok(self)
    }

    /// The key type this hasher was built for.
    #[must_use]
    pub const fn key_type(&self) -> KeyType {
        self.key_type
    }

    /// Canonicalize and hash a key value.
    pub fn hash_value(&self, value: &Value) -> Result<u64, HashError> {
        let bytes = self.canonical_bytes(value)?;
        self.digest(&bytes)
    }

    /// Hash a key given in its stored text form.
    ///
    /// Used when a leaf redistributes its payload after a split.
    pub fn hash_stored(&self, text: &str) -> Result<u64, HashError> {
        let value = self
            .key_type
            .parse_stored(text)
            .ok_or_else(|| HashError::UnparsableKey(text.to_owned()))?;
        self.hash_value(&value)
    }

    /// Validate a key against the index key type and compute its stored
    /// text and hash.
    pub fn prepare(&self, value: &Value) -> Result<PreparedKey, HashError> {
        if !self.key_type.accepts(value) {
            return Err(HashError::WrongKeyType {
                expected: self.key_type,
                found: value.key_type(),
            });
        }
        let hash = self.hash_value(value)?;
        Ok(PreparedKey {
            text: KeyType::stored_key(value),
            hash,
        })
    }

    /// The bytes a value contributes to the hash.
    pub fn canonical_bytes<'a>(&self, value: &'a Value) -> Result<Cow<'a, [u8]>, HashError> {
        match value {
            Value::String(s) => Ok(Cow::Borrowed(s.as_bytes())),
            Value::Buffer(bytes) => Ok(Cow::Borrowed(bytes)),
            Value::Number(n) => {
                if !n.is_finite() {
                    return Err(HashError::UnsupportedType("non-finite number"));
                }
                // Halves round toward positive infinity: -2.5 buckets with -2.
                let rounded = (n / self.number_granularity + 0.5).floor() * self.number_granularity;
                Ok(Cow::Owned(render_number(rounded).into_bytes()))
            }
            Value::Date(ms) => {
                let g = self.date_granularity_ms;
                let rounded = ms.saturating_add(g / 2).div_euclid(g) * g;
                Ok(Cow::Owned(rounded.to_string().into_bytes()))
            }
            Value::Boolean(_) => Err(HashError::UnsupportedType("boolean")),
        }
    }

    /// Pearson digest of raw bytes, read as a big-endian `u64`.
    pub fn digest(&self, bytes: &[u8]) -> Result<u64, HashError> {
        let (&first, rest) = bytes.split_first().ok_or(HashError::Empty)?;
        let table = &self.seed.0;

        let mut out = [0u8; 8];
        for (j, byte) in out.iter_mut().enumerate() {
            let mut h = table[(usize::from(first) + j) % SEED_LEN];
            for &b in rest {
                h = table[usize::from(h ^ b)];
            }
            *byte = h;
        }
        Ok(u64::from_be_bytes(out))
    }
}

/// Errors produced while hashing keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashError {
    /// The value has no canonical byte form.
    UnsupportedType(&'static str),
    /// Empty strings and buffers cannot be hashed.
    Empty,
    /// The key does not match the index key type.
    WrongKeyType { expected: KeyType, found: KeyType },
    /// A stored key could not be parsed back for its key type.
    UnparsableKey(String),
    /// Persisted seed bytes are not a permutation.
    InvalidSeed(String),
    /// A rounding granularity is zero, negative or not finite.
    InvalidGranularity(&'static str),
}

impl std::fmt::Display for HashError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsupportedType(what) => write!(f, "cannot hash a {what}"),
            Self::Empty => write!(f, "cannot hash an empty key"),
            Self::WrongKeyType { expected, found } => {
                write!(f, "expected a {expected} key, got a {found}")
            }
            Self::UnparsableKey(text) => write!(f, "stored key {text:?} does not parse"),
            Self::InvalidSeed(msg) => write!(f, "invalid seed: {msg}"),
            Self::InvalidGranularity(kind) => write!(f, "{kind} granularity must be positive"),
        }
    }
}

impl std::error::Error for HashError {}
