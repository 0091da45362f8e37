//! Engine configuration.

use crate::error::{CoreError, CoreResult};
use docmerge_codec::DEFAULT_COMPRESSION_LEVEL;

/// Highest level a document can be compacted to.
pub const TOP_MERGE_LEVEL: u8 = 7;

/// Smallest accepted `size_limit`.
pub const MIN_SIZE_LIMIT: usize = 64;

/// Configuration for an [`crate::Engine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Hard ceiling on a stored blob, in bytes. Every blob stays strictly below it.
    pub size_limit: usize,

    /// zstd level used for every blob.
    pub compression_level: i32,

    /// Highest target accepted by `merge_documents`.
    pub max_merge_level: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            size_limit: 1 << 20, // 1 MiB
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            max_merge_level: TOP_MERGE_LEVEL,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the blob size ceiling.
    #[must_use]
    pub const fn size_limit(mut self, size: usize) -> Self {
        self.size_limit = size;
        self
    }

    /// Sets the zstd compression level.
    #[must_use]
    pub const fn compression_level(mut self, level: i32) -> Self {
        self.compression_level = level;
        self
    }

    /// Sets the highest accepted merge target.
    #[must_use]
    pub const fn max_merge_level(mut self, level: u8) -> Self {
        self.max_merge_level = level;
        self
    }

    /// Raw-byte interval at which the chunk writer checks compressed size.
    pub(crate) fn chunk_step(&self) -> usize {
        (self.size_limit / 8).max(1)
    }

    /// Compressed size at which a chunk may close.
    pub(crate) fn chunk_target(&self) -> usize {
        self.size_limit / 2
    }

    /// Checks the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] if `size_limit` is below
    /// [`MIN_SIZE_LIMIT`] or `max_merge_level` is above [`TOP_MERGE_LEVEL`].
    pub fn validate(&self) -> CoreResult<()> {
        if self.size_limit < MIN_SIZE_LIMIT {
            return Err(CoreError::invalid_config(format!(
                "size_limit {} is below the minimum of {MIN_SIZE_LIMIT}",
                self.size_limit
            )));
        }
        if self.max_merge_level > TOP_MERGE_LEVEL {
            return Err(CoreError::invalid_config(format!(
                "max_merge_level {} exceeds {TOP_MERGE_LEVEL}",
                self.max_merge_level
            )));
        }
        Ok(())
    }
}
