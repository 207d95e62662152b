//! Module: db::iterate::composite
//! Responsibility: union/intersection over two id-ordered child iterators.
//! Does not own: child construction or cache lookups.
//! Boundary: children must be non-decreasing by `EntityId`; output is strictly increasing.

use crate::{
    db::{
        identity::EntityId,
        iterate::iterator::{EntityIterator, EntityIteratorBox},
    },
    error::InternalError,
};
use std::cmp::Ordering;

///
/// SideState
///
/// Per-side lookahead state for one ordered child iterator.
/// Tracks the pending id, exhaustion, and the monotonicity witness.
///

struct SideState<'a> {
    iter: EntityIteratorBox<'a>,
    item: Option<EntityId>,
    done: bool,
    last: Option<EntityId>,
    name: &'static str,
}

impl<'a> SideState<'a> {
    fn new(iter: EntityIteratorBox<'a>, name: &'static str) -> Self {
        Self {
            iter,
            item: None,
            done: false,
            last: None,
            name,
        }
    }

    // Ensure one lookahead item is available for this side.
    fn ensure_item(&mut self, combinator: &'static str) -> Result<(), InternalError> {
        if self.done || self.item.is_some() {
            return Ok(());
        }

        match self.iter.next_id()? {
            Some(id) => {
                if let Some(previous) = self.last
                    && previous > id
                {
                    return Err(InternalError::iterator_invariant(format!(
                        "{combinator} {} child emitted out-of-order id (previous: {previous}, current: {id})",
                        self.name,
                    )));
                }
                self.item = Some(id);
            }
            None => self.done = true,
        }

        Ok(())
    }

    fn take_item(&mut self) -> Option<EntityId> {
        let id = self.item.take()?;
        self.last = Some(id);

        Some(id)
    }
}

///
/// OrderedPair
///
/// Shared two-sided state for merge/intersection, plus the one-slot output
/// lookahead that makes `has_next` idempotent.
///

struct OrderedPair<'a> {
    left: SideState<'a>,
    right: SideState<'a>,
    last_emitted: Option<EntityId>,
    pending: Option<Option<EntityId>>,
}

impl<'a> OrderedPair<'a> {
    fn new(left: EntityIteratorBox<'a>, right: EntityIteratorBox<'a>) -> Self {
        Self {
            left: SideState::new(left, "left"),
            right: SideState::new(right, "right"),
            last_emitted: None,
            pending: None,
        }
    }

    // Record one candidate; returns it unless it repeats the previous output.
    fn emit(&mut self, id: EntityId) -> Option<EntityId> {
        if self.last_emitted == Some(id) {
            return None;
        }
        self.last_emitted = Some(id);

        Some(id)
    }

    fn dispose(&mut self) -> bool {
        self.pending = None;
        let left = self.left.iter.dispose();
        let right = self.right.iter.dispose();

        left || right
    }
}

///
/// UnionIterator
///
/// Ordered merge of two children, suppressing duplicates.
///

pub struct UnionIterator<'a> {
    pair: OrderedPair<'a>,
}

impl<'a> UnionIterator<'a> {
    #[must_use]
    pub fn new(left: EntityIteratorBox<'a>, right: EntityIteratorBox<'a>) -> Self {
        Self {
            pair: OrderedPair::new(left, right),
        }
    }

    fn fetch(&mut self) -> Result<Option<EntityId>, InternalError> {
        let pair = &mut self.pair;
        loop {
            pair.left.ensure_item("union")?;
            pair.right.ensure_item("union")?;

            let candidate = match (pair.left.item, pair.right.item) {
                (None, None) => return Ok(None),
                (Some(_), None) => pair.left.take_item(),
                (None, Some(_)) => pair.right.take_item(),
                (Some(left), Some(right)) => match left.cmp(&right) {
                    Ordering::Less => pair.left.take_item(),
                    Ordering::Greater => pair.right.take_item(),
                    Ordering::Equal => {
                        pair.right.take_item();
                        pair.left.take_item()
                    }
                },
            };

            if let Some(id) = candidate.and_then(|id| pair.emit(id)) {
                return Ok(Some(id));
            }
        }
    }
}

impl EntityIterator for UnionIterator<'_> {
    fn has_next(&mut self) -> Result<bool, InternalError> {
        if self.pair.pending.is_none() {
            self.pair.pending = Some(self.fetch()?);
        }

        Ok(matches!(self.pair.pending, Some(Some(_))))
    }

    fn next_id(&mut self) -> Result<Option<EntityId>, InternalError> {
        match self.pair.pending.take() {
            Some(pending) => Ok(pending),
            None => self.fetch(),
        }
    }

    fn dispose(&mut self) -> bool {
        self.pair.dispose()
    }
}

///
/// IntersectIterator
///
/// Ordered intersection of two children. Stops polling as soon as either
/// side is exhausted.
///

pub struct IntersectIterator<'a> {
    pair: OrderedPair<'a>,
}

impl<'a> IntersectIterator<'a> {
    #[must_use]
    pub fn new(left: EntityIteratorBox<'a>, right: EntityIteratorBox<'a>) -> Self {
        Self {
            pair: OrderedPair::new(left, right),
        }
    }

    fn fetch(&mut self) -> Result<Option<EntityId>, InternalError> {
        let pair = &mut self.pair;
        loop {
            pair.left.ensure_item("intersect")?;
            if pair.left.done {
                return Ok(None);
            }
            pair.right.ensure_item("intersect")?;
            if pair.right.done {
                return Ok(None);
            }

            let (Some(left), Some(right)) = (pair.left.item, pair.right.item) else {
                return Ok(None);
            };
            match left.cmp(&right) {
                Ordering::Less => {
                    pair.left.take_item();
                }
                Ordering::Greater => {
                    pair.right.take_item();
                }
                Ordering::Equal => {
                    pair.left.take_item();
                    pair.right.take_item();
                    if let Some(id) = pair.emit(left) {
                        return Ok(Some(id));
                    }
                }
            }
        }
    }
}

impl EntityIterator for IntersectIterator<'_> {
    fn has_next(&mut self) -> Result<bool, InternalError> {
        if self.pair.pending.is_none() {
            self.pair.pending = Some(self.fetch()?);
        }

        Ok(matches!(self.pair.pending, Some(Some(_))))
    }

    fn next_id(&mut self) -> Result<Option<EntityId>, InternalError> {
        match self.pair.pending.take() {
            Some(pending) => Ok(pending),
            None => self.fetch(),
        }
    }

    fn dispose(&mut self) -> bool {
        self.pair.dispose()
    }
}
