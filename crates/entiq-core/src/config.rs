//! Engine configuration for the iterable result cache.

use crate::error::InternalError;
use serde::Deserialize;

///
/// CONSTANTS
///

/// Default number of cached instances held across all partitions.
pub const DEFAULT_CACHE_SIZE: usize = 8192;

/// Largest accepted `cache_size`.
pub const MAX_CACHE_SIZE: usize = 1 << 30;

/// Default materialization cutoff; larger results are served uncached.
pub const DEFAULT_MAX_CACHED_INSTANCE_SIZE: usize = 100_000;

///
/// CacheConfig
///
/// Sizing policy for one `EntityIterableCache`.
/// The materialization cutoff is engine-wide; call sites cannot override it.
///

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Total entry capacity, split evenly across partitions.
    pub cache_size: usize,

    /// Results with more ids than this are computed but never published.
    pub max_cached_instance_size: usize,

    /// Disable caching entirely; every query computes fresh.
    pub enabled: bool,
}

impl CacheConfig {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            cache_size: DEFAULT_CACHE_SIZE,
            max_cached_instance_size: DEFAULT_MAX_CACHED_INSTANCE_SIZE,
            enabled: true,
        }
    }

    #[must_use]
    pub const fn with_cache_size(mut self, cache_size: usize) -> Self {
        self.cache_size = cache_size;
        self
    }

    #[must_use]
    pub const fn with_max_cached_instance_size(mut self, max: usize) -> Self {
        self.max_cached_instance_size = max;
        self
    }

    #[must_use]
    pub const fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Reject configurations that cannot hold a single entry.
    pub fn validate(&self) -> Result<(), InternalError> {
        if self.cache_size == 0 {
            return Err(InternalError::config_unsupported(
                "cache_size must be greater than zero",
            ));
        }
        if self.cache_size > MAX_CACHE_SIZE {
            return Err(InternalError::config_unsupported(format!(
                "cache_size must not exceed {MAX_CACHE_SIZE}, found {}",
                self.cache_size
            )));
        }
        if self.max_cached_instance_size == 0 {
            return Err(InternalError::config_unsupported(
                "max_cached_instance_size must be greater than zero",
            ));
        }

        Ok(())
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::new()
    }
}

///
/// TESTS
///
