// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Serializable cache settings.
//!
//! Hooks (id mapping, transformers, updaters, redirects) are code and live on
//! [`CacheContext`](crate::CacheContext); everything that can be expressed as
//! data lives here and can be loaded from JSON.
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for loading or saving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O error while reading or writing.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization/deserialization failure.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Data-only cache settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Verify reference integrity of every committed snapshot.
    /// Defaults to on in debug builds.
    pub freeze_snapshots: bool,
    /// Log reads and writes through the default tracer.
    pub verbose: bool,
    /// Select `__typename` in every nested selection set before parsing.
    pub add_typename: bool,
    /// Field read by the default entity id mapper.
    pub id_field: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            freeze_snapshots: cfg!(debug_assertions),
            verbose: false,
            add_typename: false,
            id_field: "id".into(),
        }
    }
}

impl CacheConfig {
    /// Deserializes settings from JSON bytes; missing keys take defaults.
    ///
    /// # Errors
    /// [`ConfigError::Serde`] on malformed JSON or unknown keys.
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self, ConfigError> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Reads settings from a JSON file.
    ///
    /// # Errors
    /// [`ConfigError::Io`] when the file cannot be read, otherwise as
    /// [`CacheConfig::from_json_slice`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let bytes = std::fs::read(path)?;
        Self::from_json_slice(&bytes)
    }

    /// Writes settings as pretty JSON.
    ///
    /// # Errors
    /// [`ConfigError::Io`] or [`ConfigError::Serde`].
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let data = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, data)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let Ok(config) = CacheConfig::from_json_slice(br#"{ "verbose": true, "id_field": "uuid" }"#)
        else {
            unreachable!("valid config rejected");
        };
        assert!(config.verbose);
        assert_eq!(config.id_field, "uuid");
        assert!(!config.add_typename);
        assert_eq!(config.freeze_snapshots, cfg!(debug_assertions));
    }

    #[test]
    fn empty_input_is_default_and_unknown_keys_fail() {
        assert!(matches!(CacheConfig::from_json_slice(b"  \n"), Ok(c) if c == CacheConfig::default()));
        assert!(matches!(
            CacheConfig::from_json_slice(br#"{ "freeze": true }"#),
            Err(ConfigError::Serde(_))
        ));
    }
}
