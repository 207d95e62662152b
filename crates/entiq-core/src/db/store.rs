//! Module: db::store
//! Responsibility: collaborator contracts consumed by iterable execution.
//! Does not own: index storage, snapshot isolation, or schema persistence.
//! Boundary: everything below these traits belongs to the storage engine.

use crate::{
    db::identity::{EntityTypeId, LinkId},
    error::InternalError,
};

///
/// IndexCursor
///
/// Bidirectional positional reader over one sorted key/value index.
///
/// A fresh cursor is positioned before the first entry: `move_next` lands on
/// the first entry and `move_prev` lands on the last one. `key`/`value` are
/// only meaningful after a move returned `true`.
///

pub trait IndexCursor {
    fn move_next(&mut self) -> Result<bool, InternalError>;

    fn move_prev(&mut self) -> Result<bool, InternalError>;

    fn key(&self) -> &[u8];

    fn value(&self) -> &[u8];

    /// Release the underlying storage handle. Called exactly once.
    fn close(&mut self);
}

pub type IndexCursorBox<'a> = Box<dyn IndexCursor + 'a>;

///
/// StoreTransaction
///
/// One read transaction of the storage collaborator. Every cursor it opens
/// observes the same snapshot, identified by `snapshot_version`.
///
/// Contract with the cache: before any transaction can observe version `v`,
/// the store must have delivered every notification for version `v`.
///

pub trait StoreTransaction {
    fn snapshot_version(&self) -> u64;

    /// Cursor over the entity index of `type_id` (keys: encoded local ids).
    fn open_entities_cursor(
        &self,
        type_id: EntityTypeId,
    ) -> Result<IndexCursorBox<'_>, InternalError>;

    /// Cursor over the outgoing-link index of `type_id` for `link_id`
    /// (keys: source local ids, values: encoded target ids; duplicates allowed).
    fn open_links_cursor(
        &self,
        type_id: EntityTypeId,
        link_id: LinkId,
    ) -> Result<IndexCursorBox<'_>, InternalError>;

    /// Direct cardinality of the entity index of `type_id`.
    fn count_entities(&self, type_id: EntityTypeId) -> Result<u64, InternalError>;

    /// Map a link name to its id; `None` when unknown and `create` is false.
    fn resolve_link_id(&self, name: &str, create: bool) -> Result<Option<LinkId>, InternalError>;
}
