//! Module: db::iterate::join
//! Responsibility: link-target semi-join ("entities whose link points into a set").
//! Does not own: materialization of the target set or link-name resolution.
//! Boundary: preserves link-index order, yields each source id at most once.

use crate::{
    db::{
        cache::IdSnapshot,
        identity::EntityId,
        iterate::{iterator::EntityIterator, scan::LinksIterator},
    },
    error::InternalError,
};
use std::{collections::HashSet, sync::Arc};

///
/// LinkJoinIterator
///
/// Walks one links index and keeps sources whose target is a member of
/// `targets`. Owns the link cursor and the accumulating distinct-id set.
///

pub struct LinkJoinIterator<'a> {
    links: LinksIterator<'a>,
    targets: Arc<IdSnapshot>,
    distinct: HashSet<EntityId>,
    lookahead: Option<EntityId>,
    done: bool,
}

impl<'a> LinkJoinIterator<'a> {
    #[must_use]
    pub fn new(links: LinksIterator<'a>, targets: Arc<IdSnapshot>) -> Self {
        Self {
            links,
            targets,
            distinct: HashSet::new(),
            lookahead: None,
            done: false,
        }
    }

    fn next_available(&mut self) -> Result<Option<EntityId>, InternalError> {
        while let Some(source) = self.links.next_id()? {
            if self.distinct.contains(&source) {
                continue;
            }
            let Some(target) = self.links.target_id() else {
                return Err(InternalError::iterator_invariant(
                    "links iterator yielded a source without a target",
                ));
            };
            if self.targets.contains(target) {
                return Ok(Some(source));
            }
        }

        Ok(None)
    }

    fn fill(&mut self) -> Result<(), InternalError> {
        if self.done || self.lookahead.is_some() {
            return Ok(());
        }

        match self.next_available()? {
            Some(id) => self.lookahead = Some(id),
            None => self.done = true,
        }

        Ok(())
    }
}

impl EntityIterator for LinkJoinIterator<'_> {
    fn has_next(&mut self) -> Result<bool, InternalError> {
        self.fill()?;
        Ok(self.lookahead.is_some())
    }

    fn next_id(&mut self) -> Result<Option<EntityId>, InternalError> {
        self.fill()?;
        let Some(id) = self.lookahead.take() else {
            return Ok(None);
        };
        self.distinct.insert(id);

        Ok(Some(id))
    }

    fn dispose(&mut self) -> bool {
        self.lookahead = None;
        self.links.dispose()
    }
}
