//! Module: db::txn
//! Responsibility: bind one collaborator transaction to the optional result cache.
//! Does not own: snapshot management or cache policy.
//! Boundary: every iterable operation receives a `QueryTxn`.

use crate::db::{cache::EntityIterableCache, store::StoreTransaction};

///
/// QueryTxn
///
/// Borrowed execution context for iterable operations. Cheap to copy.
///

#[derive(Clone, Copy)]
pub struct QueryTxn<'a> {
    store: &'a dyn StoreTransaction,
    cache: Option<&'a EntityIterableCache>,
}

impl<'a> QueryTxn<'a> {
    /// Execute directly against the store; nothing is cached.
    #[must_use]
    pub const fn new(store: &'a dyn StoreTransaction) -> Self {
        Self { store, cache: None }
    }

    /// Execute against the store, reusing and publishing cached results.
    #[must_use]
    pub const fn with_cache(store: &'a dyn StoreTransaction, cache: &'a EntityIterableCache) -> Self {
        Self {
            store,
            cache: Some(cache),
        }
    }

    #[must_use]
    pub const fn store(&self) -> &'a dyn StoreTransaction {
        self.store
    }

    #[must_use]
    pub const fn cache(&self) -> Option<&'a EntityIterableCache> {
        self.cache
    }

    #[must_use]
    pub fn snapshot_version(&self) -> u64 {
        self.store.snapshot_version()
    }
}

impl std::fmt::Debug for QueryTxn<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryTxn")
            .field("snapshot_version", &self.snapshot_version())
            .field("cached", &self.cache.is_some())
            .finish()
    }
}
