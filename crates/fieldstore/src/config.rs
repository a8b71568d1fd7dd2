// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! fieldstore Global Configuration - Single Source of Truth
//!
//! This module centralizes the storage-engine constants and the small amount of
//! runtime configuration the engine reads. **NEVER hardcode elsewhere!**
//!
//! # Architecture
//!
//! - **Level 1 (Static)**: Compile-time constants (block granularity, dof capacity,
//!   index sizing, archive header)
//! - **Level 2 (Dynamic)**: [`StoreConfig`] for defaults chosen at model setup
//!   (buffer depth, initial index size), optionally from env or YAML
//!
//! # Example
//!
//! ```
//! use fieldstore::config::{StoreConfig, BLOCK_SIZE};
//!
//! assert_eq!(BLOCK_SIZE, 8);
//! let config = StoreConfig::default().with_buffer_depth(3);
//! assert_eq!(config.buffer_depth, 3);
//! ```

use crate::error::{Error, Result};

// =======================================================================
// Block layout
// =======================================================================

/// Size in bytes of one storage block.
///
/// Every variable footprint inside a schema is rounded up to a whole number of
/// blocks, and all offsets handed out by a schema are counted in blocks.
pub const BLOCK_SIZE: usize = 8;

/// Alignment guaranteed for every block (and therefore every stored value).
///
/// Value types with a stricter alignment are rejected at compile time.
pub const BLOCK_ALIGN: usize = 8;

/// Number of blocks needed to hold `size_bytes`.
#[inline]
pub const fn blocks_for(size_bytes: usize) -> usize {
    (size_bytes + BLOCK_SIZE - 1) / BLOCK_SIZE
}

// =======================================================================
// Schema limits
// =======================================================================

/// Maximum number of degree-of-freedom slots per schema.
pub const MAX_DOFS: usize = 64;

/// Number of shift values tried for a given table size before it is doubled.
pub const MAX_HASH_FUNCTION_INDEX: u32 = 32;

/// Index table size allocated by the first insertion (power of two).
pub const INITIAL_INDEX_SIZE: usize = 2;

/// Position marker for an unassigned index slot.
pub const UNASSIGNED_POSITION: usize = usize::MAX;

// =======================================================================
// Records
// =======================================================================

/// Buffer depth used when none is requested.
pub const DEFAULT_BUFFER_DEPTH: usize = 1;

/// Environment variable overriding [`StoreConfig::buffer_depth`].
pub const ENV_BUFFER_DEPTH: &str = "FIELDSTORE_BUFFER_DEPTH";

// =======================================================================
// Archive header
// =======================================================================

/// Magic bytes opening every archive produced by [`crate::archive::Serializer`].
pub const ARCHIVE_MAGIC: [u8; 4] = *b"FSTR";

/// Archive format version.
pub const ARCHIVE_VERSION: u16 = 1;

/// Setup-time defaults for schemas and records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "config-loaders", derive(serde::Deserialize))]
#[cfg_attr(feature = "config-loaders", serde(default, deny_unknown_fields))]
pub struct StoreConfig {
    /// Number of time steps buffered by each record.
    pub buffer_depth: usize,
    /// Index table size reserved up front by schema builders.
    pub initial_index_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            buffer_depth: DEFAULT_BUFFER_DEPTH,
            initial_index_size: INITIAL_INDEX_SIZE,
        }
    }
}

impl StoreConfig {
    /// Defaults, with `FIELDSTORE_BUFFER_DEPTH` applied when set.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var(ENV_BUFFER_DEPTH) {
            config.buffer_depth = parse_depth(&raw)?;
            log::debug!("[config] buffer depth from env: {}", config.buffer_depth);
        }
        config.validate()?;
        Ok(config)
    }

    /// Parse a YAML document such as `buffer_depth: 3`.
    #[cfg(feature = "config-loaders")]
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let mut config: Self =
            serde_yaml::from_str(yaml).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    #[must_use]
    pub fn with_buffer_depth(mut self, depth: usize) -> Self {
        self.buffer_depth = depth;
        self
    }

    #[must_use]
    pub fn with_initial_index_size(mut self, size: usize) -> Self {
        self.initial_index_size = size;
        self
    }

    /// Reject a zero depth and round the index size up to a power of two.
    pub fn validate(&mut self) -> Result<()> {
        if self.buffer_depth == 0 {
            return Err(Error::InvalidBufferDepth(0));
        }
        self.initial_index_size = self.initial_index_size.max(1).next_power_of_two();
        Ok(())
    }
}

fn parse_depth(raw: &str) -> Result<usize> {
    raw.trim().parse::<usize>().map_err(|_| {
        Error::InvalidConfig(format!("{} must be a positive integer, got {:?}", ENV_BUFFER_DEPTH, raw))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocks_for_rounds_up() {
        assert_eq!(blocks_for(0), 0);
        assert_eq!(blocks_for(1), 1);
        assert_eq!(blocks_for(8), 1);
        assert_eq!(blocks_for(9), 2);
        assert_eq!(blocks_for(24), 3);
    }

    #[test]
    fn test_validate_rejects_zero_depth() {
        let mut config = StoreConfig::default().with_buffer_depth(0);
        assert!(matches!(config.validate(), Err(Error::InvalidBufferDepth(0))));
    }

    #[test]
    fn test_validate_rounds_index_size() {
        let mut config = StoreConfig::default().with_initial_index_size(5);
        config.validate().expect("valid config");
        assert_eq!(config.initial_index_size, 8);
    }

    #[test]
    fn test_parse_depth() {
        assert_eq!(parse_depth(" 3 ").expect("parse"), 3);
        assert!(matches!(parse_depth("three"), Err(Error::InvalidConfig(_))));
    }

    #[cfg(feature = "config-loaders")]
    #[test]
    fn test_from_yaml() {
        let config = StoreConfig::from_yaml_str("buffer_depth: 3\n").expect("yaml");
        assert_eq!(config.buffer_depth, 3);
        assert_eq!(config.initial_index_size, INITIAL_INDEX_SIZE);
        assert!(StoreConfig::from_yaml_str("buffer_depth: 0\n").is_err());
    }
}
