//! Result caching: chunked storage, materialized instances, and the
//! iterable cache that keeps them current across transactions.

mod chunked;
mod instance;
mod iterable_cache;

#[cfg(test)]
mod tests;

pub use chunked::{ChunkedCache, MIN_SIZE, compute_number_of_chunks};
pub use instance::{CachedInstance, IdSnapshot};
pub(crate) use instance::PatchOutcome;
pub use iterable_cache::{CacheStats, EntityIterableCache};
