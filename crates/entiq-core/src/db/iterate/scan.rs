//! Module: db::iterate::scan
//! Responsibility: iterators that walk one collaborator index directly.
//! Does not own: cursor lifecycle policy (see `CursorProbe`) or key layouts (see `codec`).
//! Boundary: raw index order in, decoded `EntityId`s out.

use crate::{
    db::{
        codec::{decode_entity_key, decode_link_target},
        identity::{EntityId, EntityTypeId},
        iterate::iterator::{CursorProbe, EntityIterator},
        store::IndexCursorBox,
    },
    error::InternalError,
};

///
/// EntitiesOfTypeIterator
///
/// Ascending walk over the entity index of one type.
///

pub struct EntitiesOfTypeIterator<'a> {
    type_id: EntityTypeId,
    probe: CursorProbe<'a>,
}

impl<'a> EntitiesOfTypeIterator<'a> {
    #[must_use]
    pub fn new(type_id: EntityTypeId, cursor: IndexCursorBox<'a>) -> Self {
        Self {
            type_id,
            probe: CursorProbe::new(cursor),
        }
    }
}

impl EntityIterator for EntitiesOfTypeIterator<'_> {
    fn has_next(&mut self) -> Result<bool, InternalError> {
        self.probe.has_next()
    }

    fn next_id(&mut self) -> Result<Option<EntityId>, InternalError> {
        let type_id = self.type_id;
        match self.probe.advance()? {
            Some(cursor) => decode_entity_key(type_id, cursor.key()).map(Some),
            None => Ok(None),
        }
    }

    fn last(&mut self) -> Result<Option<EntityId>, InternalError> {
        let type_id = self.type_id;
        match self.probe.step_back()? {
            Some(cursor) => decode_entity_key(type_id, cursor.key()).map(Some),
            None => Ok(None),
        }
    }

    fn dispose(&mut self) -> bool {
        self.probe.dispose()
    }
}

///
/// LinksIterator
///
/// Walk over the outgoing-link index of one (type, link) pair. Yields source
/// ids in index order, one per edge, so parallel edges repeat a source.
/// The target of the most recently yielded edge stays readable.
///

pub struct LinksIterator<'a> {
    type_id: EntityTypeId,
    probe: CursorProbe<'a>,
    target: Option<EntityId>,
}

impl<'a> LinksIterator<'a> {
    #[must_use]
    pub fn new(type_id: EntityTypeId, cursor: IndexCursorBox<'a>) -> Self {
        Self {
            type_id,
            probe: CursorProbe::new(cursor),
            target: None,
        }
    }

    /// Target of the edge last returned by `next_id`.
    #[must_use]
    pub const fn target_id(&self) -> Option<EntityId> {
        self.target
    }
}

impl EntityIterator for LinksIterator<'_> {
    fn has_next(&mut self) -> Result<bool, InternalError> {
        self.probe.has_next()
    }

    fn next_id(&mut self) -> Result<Option<EntityId>, InternalError> {
        let type_id = self.type_id;
        let Some(cursor) = self.probe.advance()? else {
            self.target = None;
            return Ok(None);
        };
        let source = decode_entity_key(type_id, cursor.key())?;
        let target = decode_link_target(cursor.value())?;
        self.target = Some(target);

        Ok(Some(source))
    }

    fn last(&mut self) -> Result<Option<EntityId>, InternalError> {
        let type_id = self.type_id;
        let Some(cursor) = self.probe.step_back()? else {
            return Ok(None);
        };
        let source = decode_entity_key(type_id, cursor.key())?;
        let target = decode_link_target(cursor.value())?;
        self.target = Some(target);

        Ok(Some(source))
    }

    fn dispose(&mut self) -> bool {
        self.probe.dispose()
    }
}

///
/// EntitiesWithLinkIterator
///
/// Distinct sources of one links index. Parallel edges are adjacent in
/// index order, so dropping repeats of the previous id is enough.
///

pub struct EntitiesWithLinkIterator<'a> {
    links: LinksIterator<'a>,
    previous: Option<EntityId>,
    lookahead: Option<EntityId>,
}

impl<'a> EntitiesWithLinkIterator<'a> {
    #[must_use]
    pub const fn new(links: LinksIterator<'a>) -> Self {
        Self {
            links,
            previous: None,
            lookahead: None,
        }
    }

    fn fill(&mut self) -> Result<(), InternalError> {
        if self.lookahead.is_some() {
            return Ok(());
        }
        while let Some(source) = self.links.next_id()? {
            if self.previous != Some(source) {
                self.lookahead = Some(source);
                break;
            }
        }

        Ok(())
    }
}

impl EntityIterator for EntitiesWithLinkIterator<'_> {
    fn has_next(&mut self) -> Result<bool, InternalError> {
        self.fill()?;
        Ok(self.lookahead.is_some())
    }

    fn next_id(&mut self) -> Result<Option<EntityId>, InternalError> {
        self.fill()?;
        let id = self.lookahead.take();
        if id.is_some() {
            self.previous = id;
        }

        Ok(id)
    }

    fn last(&mut self) -> Result<Option<EntityId>, InternalError> {
        self.lookahead = None;
        self.links.last()
    }

    fn dispose(&mut self) -> bool {
        self.lookahead = None;
        self.links.dispose()
    }
}
