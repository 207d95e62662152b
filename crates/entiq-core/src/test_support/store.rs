//! In-memory, instrumented `StoreTransaction` for core tests.
//!
//! Counts every cursor opened, closed, and stepped, and every direct count
//! call. With `fail_on_access` set, any index access fails, which proves a
//! code path is served entirely from the cache.

use crate::{
    db::{
        codec::{encode_link_target, encode_local_id},
        identity::{EntityId, EntityTypeId, LinkId},
        store::{IndexCursor, IndexCursorBox, StoreTransaction},
    },
    error::InternalError,
};
use std::{
    cell::Cell,
    collections::{BTreeMap, BTreeSet},
};

///
/// StoreCounters
///

#[derive(Debug, Default)]
pub struct StoreCounters {
    pub cursors_opened: Cell<u64>,
    pub cursors_closed: Cell<u64>,
    pub cursor_steps: Cell<u64>,
    pub count_calls: Cell<u64>,
}

impl StoreCounters {
    fn bump(cell: &Cell<u64>) {
        cell.set(cell.get() + 1);
    }

    #[must_use]
    pub fn open_cursors(&self) -> u64 {
        self.cursors_opened.get() - self.cursors_closed.get()
    }

    #[must_use]
    pub fn index_accesses(&self) -> u64 {
        self.cursors_opened.get() + self.count_calls.get()
    }
}

///
/// MemoryStore
///

#[derive(Debug, Default)]
pub struct MemoryStore {
    entities: BTreeMap<EntityTypeId, BTreeSet<u64>>,
    // (type, link) -> (source local id, target), sorted; parallel edges allowed
    links: BTreeMap<(EntityTypeId, LinkId), Vec<(u64, EntityId)>>,
    link_names: BTreeMap<String, LinkId>,
    version: u64,
    fail_on_access: Cell<bool>,
    pub counters: StoreCounters,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_entities(mut self, type_id: EntityTypeId, local_ids: impl IntoIterator<Item = u64>) -> Self {
        self.entities.entry(type_id).or_default().extend(local_ids);
        self
    }

    #[must_use]
    pub fn with_link(mut self, source: EntityId, link_name: &str, target: EntityId) -> Self {
        self.add_link(source, link_name, target);
        self
    }

    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    pub const fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    pub fn set_fail_on_access(&self, fail: bool) {
        self.fail_on_access.set(fail);
    }

    pub fn link_id(&mut self, link_name: &str) -> LinkId {
        let next = u32::try_from(self.link_names.len()).expect("link id fits u32") + 1;
        *self.link_names.entry(link_name.to_string()).or_insert(next)
    }

    /// Id of an already registered link name.
    #[must_use]
    pub fn resolve_link(&self, link_name: &str) -> LinkId {
        *self.link_names.get(link_name).expect("link name registered")
    }

    pub fn add_entity(&mut self, id: EntityId) {
        self.entities
            .entry(id.type_id())
            .or_default()
            .insert(id.local_id());
    }

    pub fn remove_entity(&mut self, id: EntityId) {
        if let Some(ids) = self.entities.get_mut(&id.type_id()) {
            ids.remove(&id.local_id());
        }
        for ((type_id, _), edges) in &mut self.links {
            if *type_id == id.type_id() {
                edges.retain(|(source, _)| *source != id.local_id());
            }
        }
    }

    pub fn add_link(&mut self, source: EntityId, link_name: &str, target: EntityId) -> LinkId {
        let link_id = self.link_id(link_name);
        let edges = self.links.entry((source.type_id(), link_id)).or_default();
        edges.push((source.local_id(), target));
        edges.sort();

        link_id
    }

    fn check_access(&self) -> Result<(), InternalError> {
        if self.fail_on_access.get() {
            return Err(InternalError::store_io("index access while fail_on_access is set"));
        }

        Ok(())
    }

    fn open(&self, entries: Vec<(Vec<u8>, Vec<u8>)>) -> IndexCursorBox<'_> {
        StoreCounters::bump(&self.counters.cursors_opened);

        Box::new(MemoryCursor {
            entries,
            position: Position::BeforeFirst,
            counters: &self.counters,
        })
    }
}

impl StoreTransaction for MemoryStore {
    fn snapshot_version(&self) -> u64 {
        self.version
    }

    fn open_entities_cursor(
        &self,
        type_id: EntityTypeId,
    ) -> Result<IndexCursorBox<'_>, InternalError> {
        self.check_access()?;
        let entries = self
            .entities
            .get(&type_id)
            .into_iter()
            .flatten()
            .map(|local_id| (encode_local_id(*local_id).to_vec(), Vec::new()))
            .collect();

        Ok(self.open(entries))
    }

    fn open_links_cursor(
        &self,
        type_id: EntityTypeId,
        link_id: LinkId,
    ) -> Result<IndexCursorBox<'_>, InternalError> {
        self.check_access()?;
        let entries = self
            .links
            .get(&(type_id, link_id))
            .into_iter()
            .flatten()
            .map(|(source, target)| {
                (
                    encode_local_id(*source).to_vec(),
                    encode_link_target(*target).to_vec(),
                )
            })
            .collect();

        Ok(self.open(entries))
    }

    fn count_entities(&self, type_id: EntityTypeId) -> Result<u64, InternalError> {
        self.check_access()?;
        StoreCounters::bump(&self.counters.count_calls);

        Ok(self.entities.get(&type_id).map_or(0, |ids| ids.len() as u64))
    }

    fn resolve_link_id(&self, name: &str, create: bool) -> Result<Option<LinkId>, InternalError> {
        assert!(!create, "queries never create link ids");
        Ok(self.link_names.get(name).copied())
    }
}

///
/// MemoryCursor
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Position {
    BeforeFirst,
    At(usize),
    AfterLast,
}

struct MemoryCursor<'a> {
    entries: Vec<(Vec<u8>, Vec<u8>)>,
    position: Position,
    counters: &'a StoreCounters,
}

impl MemoryCursor<'_> {
    fn current(&self) -> Option<&(Vec<u8>, Vec<u8>)> {
        match self.position {
            Position::At(index) => self.entries.get(index),
            Position::BeforeFirst | Position::AfterLast => None,
        }
    }
}

impl IndexCursor for MemoryCursor<'_> {
    fn move_next(&mut self) -> Result<bool, InternalError> {
        StoreCounters::bump(&self.counters.cursor_steps);
        let next = match self.position {
            Position::BeforeFirst => 0,
            Position::At(index) => index + 1,
            Position::AfterLast => return Ok(false),
        };
        if next < self.entries.len() {
            self.position = Position::At(next);
            Ok(true)
        } else {
            self.position = Position::AfterLast;
            Ok(false)
        }
    }

    fn move_prev(&mut self) -> Result<bool, InternalError> {
        StoreCounters::bump(&self.counters.cursor_steps);
        let previous = match self.position {
            Position::BeforeFirst | Position::AfterLast => self.entries.len().checked_sub(1),
            Position::At(index) => index.checked_sub(1),
        };
        match previous {
            Some(index) => {
                self.position = Position::At(index);
                Ok(true)
            }
            None => {
                self.position = Position::BeforeFirst;
                Ok(false)
            }
        }
    }

    fn key(&self) -> &[u8] {
        self.current().map(|(key, _)| key.as_slice()).unwrap_or_default()
    }

    fn value(&self) -> &[u8] {
        self.current().map(|(_, value)| value.as_slice()).unwrap_or_default()
    }

    fn close(&mut self) {
        StoreCounters::bump(&self.counters.cursors_closed);
    }
}
