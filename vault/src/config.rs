//! Store configuration.
//!
//! `StoreConfig` is loaded from environment variables; `IndexOptions` carries
//! the per-index parameters a `FragmentStore` is opened with.
//!
//! # Environment Variables
//!
//! - `VAULT_DATA_DIRECTORY`: Directory holding one subdirectory per collection (default: `./data`)
//! - `VAULT_MAX_FRAGMENT_BYTES`: Leaf size at which a fragment splits (default: `53248`)
//! - `VAULT_MEMORY_CEILING`: Resident payload bytes above which fragments are evicted (default: unset, no eviction)
//! - `VAULT_NUMBER_GRANULARITY`: Rounding step for number keys before hashing (default: `1`)
//! - `VAULT_DATE_GRANULARITY_MS`: Rounding step for date keys before hashing (default: `1`)
//!
//! # Invariants
//!
//! - `max_fragment_bytes` is always positive
//! - both granularities are always finite and positive

use std::path::PathBuf;

use crate::constants::DEFAULT_MAX_BIN_WIDTH;
use crate::crypto::{CollectionKey, EnvelopeCodec};
use crate::index::Seed;
use crate::types::KeyType;

/// Store configuration.
///
/// # Post-conditions
///
/// When constructed via `from_env()`:
/// - `max_fragment_bytes > 0`
/// - `number_granularity` is finite and `> 0`
/// - `date_granularity_ms > 0`
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Root of the on-disk layout.
    /// Each collection's files live in `{data_directory}/{collection}/`.
    pub data_directory: PathBuf,
    /// Estimated serialized leaf size that triggers a split.
    pub max_fragment_bytes: usize,
    /// Resident bytes per index above which least recently used fragments
    /// are unloaded. `None` disables eviction.
    pub memory_ceiling: Option<usize>,
    pub number_granularity: f64,
    pub date_granularity_ms: i64,
}

/// Error returned when loading configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable is missing.
    MissingEnvVar(String),
    /// An environment variable has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingEnvVar(name) => {
                write!(f, "missing required environment variable: {name}")
            }
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_directory: PathBuf::from(Self::DEFAULT_DATA_DIRECTORY),
            max_fragment_bytes: DEFAULT_MAX_BIN_WIDTH,
            memory_ceiling: None,
            number_granularity: 1.0,
            date_granularity_ms: 1,
        }
    }
}

impl StoreConfig {
    /// Default data directory.
    pub const DEFAULT_DATA_DIRECTORY: &'static str = "./data";

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but does not parse, or parses to
    /// a value outside its valid range.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let data_directory = lookup("VAULT_DATA_DIRECTORY").map_or(defaults.data_directory, PathBuf::from);

        let max_fragment_bytes = match lookup("VAULT_MAX_FRAGMENT_BYTES") {
            Some(value) => parse_positive_usize("VAULT_MAX_FRAGMENT_BYTES", &value)?,
            None => defaults.max_fragment_bytes,
        };

        let memory_ceiling = lookup("VAULT_MEMORY_CEILING")
            .map(|value| parse_positive_usize("VAULT_MEMORY_CEILING", &value))
            .transpose()?;

        let number_granularity = match lookup("VAULT_NUMBER_GRANULARITY") {
            Some(value) => {
                let parsed = value.parse::<f64>().map_err(|_| ConfigError::InvalidValue {
                    name: "VAULT_NUMBER_GRANULARITY".to_string(),
                    message: format!("'{value}' is not a number"),
                })?;
                if !parsed.is_finite() || parsed <= 0.0 {
                    return Err(ConfigError::InvalidValue {
                        name: "VAULT_NUMBER_GRANULARITY".to_string(),
                        message: "must be a positive finite number".to_string(),
                    });
                }
                parsed
            }
            None => defaults.number_granularity,
        };

        let date_granularity_ms = match lookup("VAULT_DATE_GRANULARITY_MS") {
            Some(value) => match value.parse::<i64>() {
                Ok(parsed) if parsed > 0 => parsed,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        name: "VAULT_DATE_GRANULARITY_MS".to_string(),
                        message: format!("'{value}' is not a positive integer"),
                    });
                }
            },
            None => defaults.date_granularity_ms,
        };

        Ok(Self {
            data_directory,
            max_fragment_bytes,
            memory_ceiling,
            number_granularity,
            date_granularity_ms,
        })
    }
}

/// Read the collection key from `VAULT_COLLECTION_KEY` (64 hex characters).
///
/// # Errors
///
/// Returns an error if the variable is not set or is not a 32-byte hex key.
pub fn collection_key_from_env() -> Result<CollectionKey, ConfigError> {
    let text = std::env::var("VAULT_COLLECTION_KEY")
        .map_err(|_| ConfigError::MissingEnvVar("VAULT_COLLECTION_KEY".to_string()))?;
    CollectionKey::from_hex(&text).map_err(|_| ConfigError::InvalidValue {
        name: "VAULT_COLLECTION_KEY".to_string(),
        message: "must be 64 hex characters".to_string(),
    })
}

fn parse_positive_usize(name: &str, value: &str) -> Result<usize, ConfigError> {
    match value.parse::<usize>() {
        Ok(parsed) if parsed > 0 => Ok(parsed),
        _ => Err(ConfigError::InvalidValue {
            name: name.to_string(),
            message: format!("'{value}' is not a positive integer"),
        }),
    }
}

/// Parameters of one index.
///
/// # Pre-conditions
///
/// - `seed` is the seed persisted for this index; a different seed maps
///   existing keys to different fragments.
#[derive(Debug)]
pub struct IndexOptions {
    pub collection: String,
    /// Index name; `index` is the primary key index.
    pub index: String,
    pub key: CollectionKey,
    pub seed: Seed,
    pub key_type: KeyType,
    pub unique: bool,
    pub max_fragment_bytes: usize,
    pub memory_ceiling: Option<usize>,
    pub number_granularity: f64,
    pub date_granularity_ms: i64,
    pub codec: EnvelopeCodec,
}

impl IndexOptions {
    /// Name of the primary key index.
    pub const PRIMARY: &'static str = "index";

    /// Options with default sizing and granularity, non-unique.
    #[must_use]
    pub fn new(collection: &str, index: &str, key: CollectionKey, seed: Seed, key_type: KeyType) -> Self {
        let defaults = StoreConfig::default();
        Self {
            collection: collection.to_owned(),
            index: index.to_owned(),
            key,
            seed,
            key_type,
            unique: false,
            max_fragment_bytes: defaults.max_fragment_bytes,
            memory_ceiling: defaults.memory_ceiling,
            number_granularity: defaults.number_granularity,
            date_granularity_ms: defaults.date_granularity_ms,
            codec: EnvelopeCodec::default(),
        }
    }

    #[must_use]
    pub const fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    #[must_use]
    pub const fn max_fragment_bytes(mut self, bytes: usize) -> Self {
        self.max_fragment_bytes = bytes;
        self
    }

    #[must_use]
    pub const fn memory_ceiling(mut self, ceiling: Option<usize>) -> Self {
        self.memory_ceiling = ceiling;
        self
    }

    #[must_use]
    pub fn codec(mut self, codec: EnvelopeCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Take sizing, eviction and granularity from the store configuration.
    #[must_use]
    pub fn with_config(mut self, config: &StoreConfig) -> Self {
        self.max_fragment_bytes = config.max_fragment_bytes;
        self.memory_ceiling = config.memory_ceiling;
        self.number_granularity = config.number_granularity;
        self.date_granularity_ms = config.date_granularity_ms;
        self
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_default_values() {
        let config = StoreConfig::from_lookup(lookup(&[])).expect("defaults");
        assert_eq!(config.data_directory, PathBuf::from("./data"));
        assert_eq!(config.max_fragment_bytes, 53_248);
        assert_eq!(config.memory_ceiling, None);
        assert!((config.number_granularity - 1.0).abs() < f64::EPSILON);
        assert_eq!(config.date_granularity_ms, 1);
    }

    #[test]
    fn test_values_from_environment() {
        let config = StoreConfig::from_lookup(lookup(&[
            ("VAULT_DATA_DIRECTORY", "/var/lib/vault"),
            ("VAULT_MAX_FRAGMENT_BYTES", "4096"),
            ("VAULT_MEMORY_CEILING", "1000000"),
            ("VAULT_NUMBER_GRANULARITY", "0.5"),
            ("VAULT_DATE_GRANULARITY_MS", "1000"),
        ]))
        .expect("config");
        assert_eq!(config.data_directory, PathBuf::from("/var/lib/vault"));
        assert_eq!(config.max_fragment_bytes, 4096);
        assert_eq!(config.memory_ceiling, Some(1_000_000));
        assert!((config.number_granularity - 0.5).abs() < f64::EPSILON);
        assert_eq!(config.date_granularity_ms, 1000);
    }

    #[test]
    fn test_invalid_values() {
        for (name, value) in [
            ("VAULT_MAX_FRAGMENT_BYTES", "0"),
            ("VAULT_MAX_FRAGMENT_BYTES", "lots"),
            ("VAULT_MEMORY_CEILING", "-1"),
            ("VAULT_NUMBER_GRANULARITY", "0"),
            ("VAULT_NUMBER_GRANULARITY", "inf"),
            ("VAULT_DATE_GRANULARITY_MS", "0"),
        ] {
            let err = StoreConfig::from_lookup(lookup(&[(name, value)])).expect_err(value);
            assert!(
                matches!(&err, ConfigError::InvalidValue { name: n, .. } if n == name),
                "{name}={value} gave {err}"
            );
        }
    }

    #[test]
    fn test_config_error_display_missing() {
        let error = ConfigError::MissingEnvVar("TEST_VAR".to_string());
        assert_eq!(
            error.to_string(),
            "missing required environment variable: TEST_VAR"
        );
    }

    #[test]
    fn test_config_error_display_invalid() {
        let error = ConfigError::InvalidValue {
            name: "TEST_VAR".to_string(),
            message: "bad value".to_string(),
        };
        assert_eq!(error.to_string(), "invalid value for TEST_VAR: bad value");
    }
}
