pub mod cache;
pub mod codec;
pub mod identity;
pub mod iterate;
pub mod store;
pub mod txn;

// re-exports
pub use identity::{EntityId, EntityTypeId, LinkId};
pub use store::{IndexCursor, IndexCursorBox, StoreTransaction};
pub use txn::QueryTxn;
