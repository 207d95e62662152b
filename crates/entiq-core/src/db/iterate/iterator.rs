//! Module: db::iterate::iterator
//! Responsibility: the pull-based entity iteration contract and its cursor plumbing.
//! Does not own: query composition or cache lookups.
//! Boundary: every concrete iterator implements `EntityIterator`.

use crate::{
    db::{
        cache::IdSnapshot,
        identity::EntityId,
        store::{IndexCursor, IndexCursorBox},
    },
    error::InternalError,
};
use std::sync::Arc;

///
/// EntityIterator
///
/// Single-pass, lazy traversal over entity ids.
///
/// `has_next` is idempotent until the following `next_id`. Once `next_id`
/// returns `None` it keeps returning `None`. Dropping an iterator releases
/// its cursor; `dispose` does the same eagerly.
///

pub trait EntityIterator {
    fn has_next(&mut self) -> Result<bool, InternalError>;

    fn next_id(&mut self) -> Result<Option<EntityId>, InternalError>;

    /// Step one position backwards from the current position. On a fresh
    /// iterator this yields the maximal element.
    fn last(&mut self) -> Result<Option<EntityId>, InternalError> {
        Err(InternalError::iterable_unsupported(
            "iterator does not support reverse probing",
        ))
    }

    /// Release bound resources. Returns true if anything was still held.
    fn dispose(&mut self) -> bool;

    /// Adapt into a standard iterator of fallible ids.
    fn ids(self) -> Ids<Self>
    where
        Self: Sized,
    {
        Ids {
            inner: self,
            failed: false,
        }
    }
}

pub type EntityIteratorBox<'a> = Box<dyn EntityIterator + 'a>;

impl<T> EntityIterator for Box<T>
where
    T: EntityIterator + ?Sized,
{
    fn has_next(&mut self) -> Result<bool, InternalError> {
        self.as_mut().has_next()
    }

    fn next_id(&mut self) -> Result<Option<EntityId>, InternalError> {
        self.as_mut().next_id()
    }

    fn last(&mut self) -> Result<Option<EntityId>, InternalError> {
        self.as_mut().last()
    }

    fn dispose(&mut self) -> bool {
        self.as_mut().dispose()
    }
}

///
/// Ids
///
/// `std::iter::Iterator` view of an `EntityIterator`. Stops after the first
/// error.
///

pub struct Ids<I> {
    inner: I,
    failed: bool,
}

impl<I> Iterator for Ids<I>
where
    I: EntityIterator,
{
    type Item = Result<EntityId, InternalError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        match self.inner.next_id() {
            Ok(Some(id)) => Some(Ok(id)),
            Ok(None) => None,
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}

/// Drain an iterator into a vector, disposing it afterwards.
pub fn collect_ids(mut iter: impl EntityIterator) -> Result<Vec<EntityId>, InternalError> {
    let mut out = Vec::new();
    while let Some(id) = iter.next_id()? {
        out.push(id);
    }
    iter.dispose();

    Ok(out)
}

///
/// CursorSlot
///
/// Owning slot for one collaborator cursor. The cursor is closed exactly
/// once, on `close` or on drop; any access afterwards is an invariant
/// violation.
///

pub(crate) struct CursorSlot<'a> {
    cursor: Option<IndexCursorBox<'a>>,
}

impl<'a> CursorSlot<'a> {
    pub(crate) fn new(cursor: IndexCursorBox<'a>) -> Self {
        Self {
            cursor: Some(cursor),
        }
    }

    pub(crate) fn cursor(&self) -> Result<&(dyn IndexCursor + 'a), InternalError> {
        self.cursor
            .as_deref()
            .ok_or_else(|| InternalError::iterator_invariant("cursor used after close"))
    }

    pub(crate) fn cursor_mut(&mut self) -> Result<&mut (dyn IndexCursor + 'a), InternalError> {
        self.cursor
            .as_deref_mut()
            .ok_or_else(|| InternalError::iterator_invariant("cursor used after close"))
    }

    pub(crate) fn close(&mut self) -> bool {
        match self.cursor.take() {
            Some(mut cursor) => {
                cursor.close();
                true
            }
            None => false,
        }
    }
}

impl Drop for CursorSlot<'_> {
    fn drop(&mut self) {
        self.close();
    }
}

///
/// CursorProbe
///
/// Forward-probe state over one cursor slot. Memoizes the last `move_next`
/// answer so `has_next` never consumes an entry twice.
///

pub(crate) struct CursorProbe<'a> {
    slot: CursorSlot<'a>,
    probe: Option<bool>,
    exhausted: bool,
}

impl<'a> CursorProbe<'a> {
    pub(crate) fn new(cursor: IndexCursorBox<'a>) -> Self {
        Self {
            slot: CursorSlot::new(cursor),
            probe: None,
            exhausted: false,
        }
    }

    pub(crate) fn has_next(&mut self) -> Result<bool, InternalError> {
        if self.exhausted {
            return Ok(false);
        }
        if let Some(probe) = self.probe {
            return Ok(probe);
        }

        let probe = self.slot.cursor_mut()?.move_next()?;
        self.probe = Some(probe);
        if !probe {
            self.exhausted = true;
        }

        Ok(probe)
    }

    /// Consume the probed entry and return the cursor positioned on it.
    pub(crate) fn advance(&mut self) -> Result<Option<&(dyn IndexCursor + 'a)>, InternalError> {
        if !self.has_next()? {
            return Ok(None);
        }
        self.probe = None;

        self.slot.cursor().map(Some)
    }

    /// Move one entry backwards and return the cursor positioned on it.
    pub(crate) fn step_back(&mut self) -> Result<Option<&(dyn IndexCursor + 'a)>, InternalError> {
        self.probe = None;
        if !self.slot.cursor_mut()?.move_prev()? {
            return Ok(None);
        }

        self.slot.cursor().map(Some)
    }

    pub(crate) fn dispose(&mut self) -> bool {
        self.slot.close()
    }
}

///
/// EmptyIterator
///

#[derive(Debug, Default)]
pub struct EmptyIterator;

impl EntityIterator for EmptyIterator {
    fn has_next(&mut self) -> Result<bool, InternalError> {
        Ok(false)
    }

    fn next_id(&mut self) -> Result<Option<EntityId>, InternalError> {
        Ok(None)
    }

    fn last(&mut self) -> Result<Option<EntityId>, InternalError> {
        Ok(None)
    }

    fn dispose(&mut self) -> bool {
        false
    }
}

///
/// SnapshotIterator
///
/// Iterator over an immutable materialized id snapshot. Positions like an
/// index cursor under `CursorProbe`: `has_next` moves onto the probed
/// element, so `last` answers the same whether or not a query was served
/// from the cache.
///

pub struct SnapshotIterator {
    snapshot: Option<Arc<IdSnapshot>>,
    // `None` before the first element; `len` once past the end.
    position: Option<usize>,
    // `has_next` moved onto `position` and `next_id` has not consumed it.
    probed: bool,
}

impl SnapshotIterator {
    #[must_use]
    pub const fn new(snapshot: Arc<IdSnapshot>) -> Self {
        Self {
            snapshot: Some(snapshot),
            position: None,
            probed: false,
        }
    }

    fn snapshot(&self) -> Result<&IdSnapshot, InternalError> {
        self.snapshot
            .as_deref()
            .ok_or_else(|| InternalError::iterator_invariant("snapshot iterator used after dispose"))
    }

    fn current(&self) -> Result<Option<EntityId>, InternalError> {
        let snapshot = self.snapshot()?;

        Ok(self
            .position
            .and_then(|position| snapshot.get(position).copied()))
    }

    fn step_forward(&mut self) -> Result<(), InternalError> {
        let len = self.snapshot()?.len();
        let next = self.position.map_or(0, |position| position.saturating_add(1));
        self.position = Some(next.min(len));

        Ok(())
    }
}

impl EntityIterator for SnapshotIterator {
    fn has_next(&mut self) -> Result<bool, InternalError> {
        if !self.probed {
            self.step_forward()?;
            self.probed = true;
        }

        Ok(self.current()?.is_some())
    }

    fn next_id(&mut self) -> Result<Option<EntityId>, InternalError> {
        if self.probed {
            self.probed = false;
        } else {
            self.step_forward()?;
        }

        self.current()
    }

    fn last(&mut self) -> Result<Option<EntityId>, InternalError> {
        let len = self.snapshot()?.len();
        self.probed = false;
        // Before the first element wraps to the maximum, as a fresh cursor does.
        self.position = match self.position {
            None => len.checked_sub(1),
            Some(position) => position.min(len).checked_sub(1),
        };

        self.current()
    }

    fn dispose(&mut self) -> bool {
        self.snapshot.take().is_some()
    }
}
