//! Core runtime for entiq: composable entity iterables, their structural
//! handles, and the chunked cache of materialized results kept current
//! across transactions.

pub mod config;
pub mod db;
pub mod error;
pub mod obs;

// test
#[cfg(test)]
pub(crate) mod test_support;

///
/// Prelude
///
/// Query-building vocabulary only. Errors, caches, and metrics stay at
/// their module paths.
///

pub mod prelude {
    pub use crate::db::{
        EntityId, EntityTypeId, LinkId, QueryTxn,
        iterate::{EntityIterable, EntityIterator},
    };
}
