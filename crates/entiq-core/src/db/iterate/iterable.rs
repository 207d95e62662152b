//! Module: db::iterate::iterable
//! Responsibility: composable query nodes and their execution against a transaction.
//! Does not own: cursor decoding (see `scan`) or cache policy (see `EntityIterableCache`).
//! Boundary: the public entry point for building and running entity queries.
//!
//! Nodes are immutable once built and share their children. A node's handle
//! is derived on first use and memoized.

use crate::{
    db::{
        cache::{CachedInstance, EntityIterableCache, IdSnapshot},
        identity::{EntityId, EntityTypeId, LinkId},
        iterate::{
            composite::{IntersectIterator, UnionIterator},
            description::IterableDescription,
            handle::{HandleParam, IterableHandle},
            iterator::{EmptyIterator, EntityIterator, EntityIteratorBox, SnapshotIterator, collect_ids},
            join::LinkJoinIterator,
            kind::IterableKind,
            scan::{EntitiesOfTypeIterator, EntitiesWithLinkIterator, LinksIterator},
        },
        txn::QueryTxn,
    },
    error::InternalError,
    obs::sink::{self, MetricsEvent, ScanKind},
};
use std::sync::{Arc, OnceLock};
use tracing::debug;

///
/// IterableNode
///

#[derive(Debug)]
enum IterableNode {
    Empty,
    EntitiesOfType {
        type_id: EntityTypeId,
    },
    EntitiesWithLink {
        type_id: EntityTypeId,
        link_id: LinkId,
    },
    // Entities of `type_id` whose `link_id` points into `other`.
    LinkJoin {
        type_id: EntityTypeId,
        link_id: LinkId,
        other: EntityIterable,
    },
    Union {
        left: EntityIterable,
        right: EntityIterable,
    },
    Intersect {
        left: EntityIterable,
        right: EntityIterable,
    },
}

///
/// EntityIterable
///
/// Lazy, composable description of a set of entity ids. Cloning shares
/// the node and its memoized handle.
///

#[derive(Clone)]
pub struct EntityIterable {
    inner: Arc<IterableInner>,
}

struct IterableInner {
    node: IterableNode,
    handle: OnceLock<IterableHandle>,
}

impl EntityIterable {
    fn from_node(node: IterableNode) -> Self {
        Self {
            inner: Arc::new(IterableInner {
                node,
                handle: OnceLock::new(),
            }),
        }
    }

    ///
    /// CONSTRUCTORS
    ///

    #[must_use]
    pub fn empty() -> Self {
        Self::from_node(IterableNode::Empty)
    }

    #[must_use]
    pub fn entities_of_type(type_id: EntityTypeId) -> Self {
        Self::from_node(IterableNode::EntitiesOfType { type_id })
    }

    /// Entities of `type_id` having at least one `link_id` link.
    #[must_use]
    pub fn entities_with_link(type_id: EntityTypeId, link_id: LinkId) -> Self {
        Self::from_node(IterableNode::EntitiesWithLink { type_id, link_id })
    }

    /// Entities of `type_id` whose `link_id` link targets a member of `other`.
    #[must_use]
    pub fn filter_links(type_id: EntityTypeId, link_id: LinkId, other: &Self) -> Self {
        if other.is_empty_node() {
            return Self::empty();
        }

        Self::from_node(IterableNode::LinkJoin {
            type_id,
            link_id,
            other: other.clone(),
        })
    }

    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        if self.is_empty_node() {
            return other.clone();
        }
        if other.is_empty_node() {
            return self.clone();
        }

        Self::from_node(IterableNode::Union {
            left: self.clone(),
            right: other.clone(),
        })
    }

    #[must_use]
    pub fn intersect(&self, other: &Self) -> Self {
        if self.is_empty_node() || other.is_empty_node() {
            return Self::empty();
        }

        Self::from_node(IterableNode::Intersect {
            left: self.clone(),
            right: other.clone(),
        })
    }

    ///
    /// CAPABILITIES
    ///

    #[must_use]
    pub fn kind(&self) -> IterableKind {
        match &self.inner.node {
            IterableNode::Empty => IterableKind::Empty,
            IterableNode::EntitiesOfType { .. } => IterableKind::AllEntities,
            IterableNode::EntitiesWithLink { .. } => IterableKind::EntitiesWithLink,
            IterableNode::LinkJoin { .. } => IterableKind::FilterLinks,
            IterableNode::Union { .. } => IterableKind::Union,
            IterableNode::Intersect { .. } => IterableKind::Intersect,
        }
    }

    /// Every iterator of this node yields strictly ascending ids.
    #[must_use]
    pub const fn is_sorted_by_id(&self) -> bool {
        true
    }

    #[must_use]
    pub fn can_be_cached(&self) -> bool {
        match &self.inner.node {
            IterableNode::Empty | IterableNode::LinkJoin { .. } => false,
            IterableNode::EntitiesOfType { .. } | IterableNode::EntitiesWithLink { .. } => true,
            IterableNode::Union { left, right } | IterableNode::Intersect { left, right } => {
                left.can_be_cached() && right.can_be_cached()
            }
        }
    }

    /// Size and emptiness are answerable without opening a cursor.
    #[must_use]
    pub fn has_fast_count_and_is_empty(&self) -> bool {
        matches!(
            self.inner.node,
            IterableNode::Empty | IterableNode::EntitiesOfType { .. }
        )
    }

    /// The single entity type every result belongs to, when there is one.
    #[must_use]
    pub fn entity_type_id(&self) -> Option<EntityTypeId> {
        match &self.inner.node {
            IterableNode::Empty => None,
            IterableNode::EntitiesOfType { type_id }
            | IterableNode::EntitiesWithLink { type_id, .. }
            | IterableNode::LinkJoin { type_id, .. } => Some(*type_id),
            IterableNode::Union { left, right } => match (left.entity_type_id(), right.entity_type_id()) {
                (Some(l), Some(r)) if l == r => Some(l),
                _ => None,
            },
            IterableNode::Intersect { left, right } => {
                left.entity_type_id().or_else(|| right.entity_type_id())
            }
        }
    }

    fn is_empty_node(&self) -> bool {
        matches!(self.inner.node, IterableNode::Empty)
    }

    /// Structural identity of this node; computed once.
    pub fn handle(&self) -> &IterableHandle {
        self.inner.handle.get_or_init(|| self.compute_handle())
    }

    fn compute_handle(&self) -> IterableHandle {
        match &self.inner.node {
            IterableNode::Empty => IterableHandle::new(IterableKind::Empty, Vec::new()),
            IterableNode::EntitiesOfType { type_id } => IterableHandle::new(
                IterableKind::AllEntities,
                vec![HandleParam::TypeId(*type_id)],
            ),
            IterableNode::EntitiesWithLink { type_id, link_id } => with_link_handle(*type_id, *link_id),
            IterableNode::LinkJoin {
                type_id,
                link_id,
                other,
            } => IterableHandle::decorated(
                IterableKind::FilterLinks,
                with_link_handle(*type_id, *link_id),
                other.handle().clone(),
            ),
            IterableNode::Union { left, right } => IterableHandle::new(
                IterableKind::Union,
                vec![
                    HandleParam::Child(left.handle().clone()),
                    HandleParam::Child(right.handle().clone()),
                ],
            ),
            IterableNode::Intersect { left, right } => IterableHandle::new(
                IterableKind::Intersect,
                vec![
                    HandleParam::Child(left.handle().clone()),
                    HandleParam::Child(right.handle().clone()),
                ],
            ),
        }
    }

    ///
    /// EXECUTION
    ///

    /// Fresh traversal bound to `txn`. Served from a valid cached instance
    /// when the transaction carries the cache.
    pub fn get_iterator<'a>(&self, txn: QueryTxn<'a>) -> Result<EntityIteratorBox<'a>, InternalError> {
        if let Some(cache) = self.cache_for(txn) {
            let instance = self.cached_instance(txn, cache)?;
            return Ok(Box::new(SnapshotIterator::new(instance.to_set())));
        }

        self.raw_iterator(txn)
    }

    // Execute against live cursors; children may still be served from the cache.
    fn raw_iterator<'a>(&self, txn: QueryTxn<'a>) -> Result<EntityIteratorBox<'a>, InternalError> {
        let store = txn.store();
        match &self.inner.node {
            IterableNode::Empty => Ok(Box::new(EmptyIterator)),
            IterableNode::EntitiesOfType { type_id } => {
                let cursor = store.open_entities_cursor(*type_id)?;
                sink::record(MetricsEvent::IndexScan {
                    kind: ScanKind::Entities,
                });

                Ok(Box::new(EntitiesOfTypeIterator::new(*type_id, cursor)))
            }
            IterableNode::EntitiesWithLink { type_id, link_id } => {
                let cursor = store.open_links_cursor(*type_id, *link_id)?;
                sink::record(MetricsEvent::IndexScan {
                    kind: ScanKind::Links,
                });

                Ok(Box::new(EntitiesWithLinkIterator::new(LinksIterator::new(
                    *type_id, cursor,
                ))))
            }
            IterableNode::LinkJoin {
                type_id,
                link_id,
                other,
            } => {
                let targets = other.to_set(txn)?;
                if targets.is_empty() {
                    return Ok(Box::new(EmptyIterator));
                }
                let cursor = store.open_links_cursor(*type_id, *link_id)?;
                sink::record(MetricsEvent::IndexScan {
                    kind: ScanKind::Links,
                });

                Ok(Box::new(LinkJoinIterator::new(
                    LinksIterator::new(*type_id, cursor),
                    targets,
                )))
            }
            IterableNode::Union { left, right } => Ok(Box::new(UnionIterator::new(
                left.get_iterator(txn)?,
                right.get_iterator(txn)?,
            ))),
            IterableNode::Intersect { left, right } => Ok(Box::new(IntersectIterator::new(
                left.get_iterator(txn)?,
                right.get_iterator(txn)?,
            ))),
        }
    }

    fn cached_instance(
        &self,
        txn: QueryTxn<'_>,
        cache: &EntityIterableCache,
    ) -> Result<Arc<CachedInstance>, InternalError> {
        cache.get_or_compute(self.handle(), txn.snapshot_version(), || {
            self.materialize_uncached(txn)
        })
    }

    // The cache, when this node may be served from or published to it.
    fn cache_for<'a>(&self, txn: QueryTxn<'a>) -> Option<&'a EntityIterableCache> {
        if self.can_be_cached() {
            txn.cache()
        } else {
            None
        }
    }

    fn lookup_cached(&self, txn: QueryTxn<'_>) -> Option<Arc<CachedInstance>> {
        self.cache_for(txn)
            .and_then(|cache| cache.lookup(self.handle(), txn.snapshot_version()))
    }

    // Cardinality without opening a cursor, for nodes that support it.
    fn fast_count(&self, txn: QueryTxn<'_>) -> Option<Result<u64, InternalError>> {
        match &self.inner.node {
            IterableNode::Empty => Some(Ok(0)),
            IterableNode::EntitiesOfType { type_id } => {
                sink::record(MetricsEvent::FastCount);
                Some(txn.store().count_entities(*type_id))
            }
            _ => None,
        }
    }

    fn materialize_uncached(&self, txn: QueryTxn<'_>) -> Result<Vec<EntityId>, InternalError> {
        collect_ids(self.raw_iterator(txn)?)
    }

    /// All ids in ascending order.
    pub fn materialize(&self, txn: QueryTxn<'_>) -> Result<Vec<EntityId>, InternalError> {
        collect_ids(self.get_iterator(txn)?)
    }

    /// Materialized membership view.
    pub fn to_set(&self, txn: QueryTxn<'_>) -> Result<Arc<IdSnapshot>, InternalError> {
        if let Some(cache) = self.cache_for(txn) {
            return Ok(self.cached_instance(txn, cache)?.to_set());
        }

        Ok(Arc::new(IdSnapshot::from_unsorted(self.materialize_uncached(txn)?)))
    }

    pub fn is_empty(&self, txn: QueryTxn<'_>) -> Result<bool, InternalError> {
        if let Some(instance) = self.lookup_cached(txn) {
            return Ok(instance.is_empty());
        }
        if let Some(count) = self.fast_count(txn) {
            return Ok(count? == 0);
        }

        let mut iter = self.raw_iterator(txn)?;
        let has_next = iter.has_next()?;
        iter.dispose();

        Ok(!has_next)
    }

    /// Number of distinct ids. Each call consults the cache for this
    /// handle at most once.
    pub fn count(&self, txn: QueryTxn<'_>) -> Result<u64, InternalError> {
        if let Some(cache) = self.cache_for(txn) {
            if !self.has_fast_count_and_is_empty() {
                return Ok(self.cached_instance(txn, cache)?.count());
            }
            if let Some(instance) = cache.lookup(self.handle(), txn.snapshot_version()) {
                return Ok(instance.count());
            }
        }
        if let Some(count) = self.fast_count(txn) {
            return count;
        }

        let mut iter = self.raw_iterator(txn)?;
        let mut count = 0u64;
        let mut previous = None;
        while let Some(id) = iter.next_id()? {
            if previous != Some(id) {
                count += 1;
                previous = Some(id);
            }
        }
        iter.dispose();

        Ok(count)
    }

    ///
    /// LINKS
    ///

    /// Entities of this iterable whose `link_name` link targets a member of
    /// `other`. An unknown link name yields the empty iterable without
    /// touching any index.
    pub fn find_links(
        &self,
        txn: QueryTxn<'_>,
        other: &Self,
        link_name: &str,
    ) -> Result<Self, InternalError> {
        if self.is_empty_node() {
            return Ok(Self::empty());
        }
        let Some(link_id) = txn.store().resolve_link_id(link_name, false)? else {
            debug!(link_name, "unknown link name; find_links is empty");
            return Ok(Self::empty());
        };

        if let IterableNode::EntitiesOfType { type_id } = &self.inner.node {
            return Ok(Self::filter_links(*type_id, link_id, other));
        }

        match self.entity_type_id() {
            Some(type_id) => {
                let joined = Self::filter_links(type_id, link_id, other);
                Ok(self.intersect(&joined))
            }
            None => Err(InternalError::iterable_unsupported(format!(
                "find_links needs a single-type receiver, got {}",
                self.handle()
            ))),
        }
    }

    ///
    /// DESCRIPTION
    ///

    #[must_use]
    pub fn describe(&self) -> IterableDescription {
        let tag = self.kind().tag();
        match &self.inner.node {
            IterableNode::Empty => IterableDescription::new(tag, Vec::new(), Vec::new()),
            IterableNode::EntitiesOfType { type_id } => {
                IterableDescription::new(tag, vec![*type_id], Vec::new())
            }
            IterableNode::EntitiesWithLink { type_id, link_id } => {
                IterableDescription::new(tag, vec![*type_id, *link_id], Vec::new())
            }
            IterableNode::LinkJoin {
                type_id,
                link_id,
                other,
            } => IterableDescription::new(tag, vec![*type_id, *link_id], vec![other.describe()]),
            IterableNode::Union { left, right } | IterableNode::Intersect { left, right } => {
                IterableDescription::new(tag, Vec::new(), vec![left.describe(), right.describe()])
            }
        }
    }

    /// Rebuild an iterable from its description.
    pub fn instantiate(description: &IterableDescription) -> Result<Self, InternalError> {
        let kind = IterableKind::from_tag(description.tag)?;
        let factory: Factory = match kind {
            IterableKind::Empty => instantiate_empty,
            IterableKind::AllEntities => instantiate_all_entities,
            IterableKind::EntitiesWithLink => instantiate_entities_with_link,
            IterableKind::FilterLinks => instantiate_filter_links,
            IterableKind::Union => instantiate_union,
            IterableKind::Intersect => instantiate_intersect,
        };

        factory(description)
    }
}

fn with_link_handle(type_id: EntityTypeId, link_id: LinkId) -> IterableHandle {
    IterableHandle::new(
        IterableKind::EntitiesWithLink,
        vec![HandleParam::TypeId(type_id), HandleParam::LinkId(link_id)],
    )
}

///
/// FACTORIES
///

type Factory = fn(&IterableDescription) -> Result<EntityIterable, InternalError>;

fn expect_arity(
    description: &IterableDescription,
    params: usize,
    children: usize,
) -> Result<(), InternalError> {
    if description.params.len() == params && description.children.len() == children {
        return Ok(());
    }

    Err(InternalError::iterable_unsupported(format!(
        "description tag {:#04x} expects {params} params and {children} children, found {} and {}",
        description.tag,
        description.params.len(),
        description.children.len(),
    )))
}

fn instantiate_empty(description: &IterableDescription) -> Result<EntityIterable, InternalError> {
    expect_arity(description, 0, 0)?;
    Ok(EntityIterable::empty())
}

fn instantiate_all_entities(
    description: &IterableDescription,
) -> Result<EntityIterable, InternalError> {
    expect_arity(description, 1, 0)?;
    Ok(EntityIterable::entities_of_type(description.params[0]))
}

fn instantiate_entities_with_link(
    description: &IterableDescription,
) -> Result<EntityIterable, InternalError> {
    expect_arity(description, 2, 0)?;
    Ok(EntityIterable::entities_with_link(
        description.params[0],
        description.params[1],
    ))
}

fn instantiate_filter_links(
    description: &IterableDescription,
) -> Result<EntityIterable, InternalError> {
    expect_arity(description, 2, 1)?;
    let other = EntityIterable::instantiate(&description.children[0])?;

    Ok(EntityIterable::filter_links(
        description.params[0],
        description.params[1],
        &other,
    ))
}

fn instantiate_union(description: &IterableDescription) -> Result<EntityIterable, InternalError> {
    expect_arity(description, 0, 2)?;
    let left = EntityIterable::instantiate(&description.children[0])?;
    let right = EntityIterable::instantiate(&description.children[1])?;

    Ok(left.union(&right))
}

fn instantiate_intersect(
    description: &IterableDescription,
) -> Result<EntityIterable, InternalError> {
    expect_arity(description, 0, 2)?;
    let left = EntityIterable::instantiate(&description.children[0])?;
    let right = EntityIterable::instantiate(&description.children[1])?;

    Ok(left.intersect(&right))
}

impl std::fmt::Debug for EntityIterable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("EntityIterable").field(self.handle()).finish()
    }
}
