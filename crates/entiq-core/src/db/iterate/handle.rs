//! Module: db::iterate::handle
//! Responsibility: structural identity of iterables (cache key + invalidation predicate).
//! Does not own: cache storage or patch application.
//! Boundary: pure values; computing, hashing, and comparing handles never locks.
//!
//! Invariants:
//! - Equal handles denote results that are interchangeable for caching.
//! - Children compare by content, never by identity.
//! - Affecting sets are supersets of the types/links that can change a result.

use crate::db::{
    identity::{EntityId, EntityTypeId, LinkId},
    iterate::kind::IterableKind,
};
use entiq_utils::StableHasher;
use std::{
    collections::BTreeSet,
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
};

const PARAM_TYPE_TAG: u8 = 0x01;
const PARAM_LINK_TAG: u8 = 0x02;
const PARAM_CHILD_TAG: u8 = 0x03;

///
/// HandleParam
///
/// One ordered parameter of a handle.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum HandleParam {
    TypeId(EntityTypeId),
    LinkId(LinkId),
    Child(IterableHandle),
}

impl HandleParam {
    fn write_hash(&self, hasher: &mut StableHasher) {
        match self {
            Self::TypeId(type_id) => {
                hasher.write_tag(PARAM_TYPE_TAG);
                hasher.write_u32(*type_id);
            }
            Self::LinkId(link_id) => {
                hasher.write_tag(PARAM_LINK_TAG);
                hasher.write_u32(*link_id);
            }
            Self::Child(child) => {
                hasher.write_tag(PARAM_CHILD_TAG);
                hasher.write_u64(child.stable_hash());
            }
        }
    }
}

///
/// PatchAction
///
/// What a cached instance must do in response to one mutation.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PatchAction {
    Ignore,
    Insert,
    Remove,
    Invalidate,
}

///
/// IterableHandle
///
/// Content-addressed identity of one iterable. Cheap to clone.
///

#[derive(Clone)]
pub struct IterableHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    kind: IterableKind,
    params: Vec<HandleParam>,
    decoration: Option<IterableHandle>,
    hash: u64,
    canonical: String,
    affecting_types: BTreeSet<EntityTypeId>,
    affecting_links: BTreeSet<LinkId>,
}

impl IterableHandle {
    /// Build a handle from its kind and parameters.
    ///
    /// Children of commutative kinds are put in canonical order first.
    #[must_use]
    pub fn new(kind: IterableKind, mut params: Vec<HandleParam>) -> Self {
        if kind.is_commutative() {
            params.sort_by(canonical_param_cmp);
        }

        Self::build(kind, params, None)
    }

    /// Build a handle that decorates `base` with `decoration`.
    ///
    /// The decoration is hashed after a delimiter and rendered after `-`, so
    /// two decorations of one base stay distinct.
    #[must_use]
    pub fn decorated(kind: IterableKind, base: Self, decoration: Self) -> Self {
        Self::build(kind, vec![HandleParam::Child(base)], Some(decoration))
    }

    fn build(kind: IterableKind, params: Vec<HandleParam>, decoration: Option<Self>) -> Self {
        let mut hasher = StableHasher::new();
        hasher.write_tag(kind.tag());
        hasher.write_u32(u32::try_from(params.len()).unwrap_or(u32::MAX));
        for param in &params {
            param.write_hash(&mut hasher);
        }
        if let Some(decoration) = &decoration {
            hasher.write_delimiter();
            hasher.write_u64(decoration.stable_hash());
        }

        let mut affecting_types = BTreeSet::new();
        let mut affecting_links = BTreeSet::new();
        for param in &params {
            match param {
                HandleParam::TypeId(type_id) => {
                    affecting_types.insert(*type_id);
                }
                HandleParam::LinkId(link_id) => {
                    affecting_links.insert(*link_id);
                }
                HandleParam::Child(child) => {
                    affecting_types.extend(child.affecting_creation_type_ids());
                    affecting_links.extend(child.affecting_link_ids());
                }
            }
        }
        if let Some(decoration) = &decoration {
            affecting_types.extend(decoration.affecting_creation_type_ids());
            affecting_links.extend(decoration.affecting_link_ids());
        }

        let canonical = render_canonical(kind, &params, decoration.as_ref());

        Self {
            inner: Arc::new(HandleInner {
                kind,
                params,
                decoration,
                hash: hasher.finish(),
                canonical,
                affecting_types,
                affecting_links,
            }),
        }
    }

    #[must_use]
    pub fn kind(&self) -> IterableKind {
        self.inner.kind
    }

    #[must_use]
    pub fn params(&self) -> &[HandleParam] {
        &self.inner.params
    }

    #[must_use]
    pub fn decoration(&self) -> Option<&Self> {
        self.inner.decoration.as_ref()
    }

    /// Memoized structural hash; stable across processes.
    #[must_use]
    pub fn stable_hash(&self) -> u64 {
        self.inner.hash
    }

    /// Deterministic text rendering for diagnostics and dedup.
    #[must_use]
    pub fn canonical(&self) -> &str {
        &self.inner.canonical
    }

    pub fn affecting_creation_type_ids(&self) -> impl Iterator<Item = EntityTypeId> + '_ {
        self.inner.affecting_types.iter().copied()
    }

    pub fn affecting_link_ids(&self) -> impl Iterator<Item = LinkId> + '_ {
        self.inner.affecting_links.iter().copied()
    }

    #[must_use]
    pub fn matches_added(&self, added: EntityId) -> bool {
        self.inner.affecting_types.contains(&added.type_id())
    }

    #[must_use]
    pub fn matches_deleted(&self, deleted: EntityId) -> bool {
        self.inner.affecting_types.contains(&deleted.type_id())
    }

    #[must_use]
    pub fn matches_link(&self, type_id: EntityTypeId, link_id: LinkId) -> bool {
        self.inner.affecting_links.contains(&link_id)
            && self.inner.affecting_types.contains(&type_id)
    }

    /// Decide how a cached result for this handle reacts to `added` appearing.
    #[must_use]
    pub fn added_action(&self, added: EntityId) -> PatchAction {
        if !self.matches_added(added) {
            return PatchAction::Ignore;
        }

        match self.kind() {
            IterableKind::Empty => PatchAction::Ignore,
            IterableKind::AllEntities => PatchAction::Insert,
            // A freshly created entity carries no links yet.
            IterableKind::EntitiesWithLink => PatchAction::Ignore,
            IterableKind::FilterLinks => PatchAction::Invalidate,
            IterableKind::Union => {
                combine_any(self.children().map(|child| child.added_action(added)), PatchAction::Insert)
            }
            IterableKind::Intersect => {
                let actions: Vec<PatchAction> =
                    self.children().map(|child| child.added_action(added)).collect();
                if actions.contains(&PatchAction::Invalidate) {
                    PatchAction::Invalidate
                } else if !actions.is_empty() && actions.iter().all(|a| *a == PatchAction::Insert) {
                    PatchAction::Insert
                } else {
                    PatchAction::Ignore
                }
            }
        }
    }

    /// Decide how a cached result for this handle reacts to `deleted` vanishing.
    #[must_use]
    pub fn deleted_action(&self, deleted: EntityId) -> PatchAction {
        if !self.matches_deleted(deleted) {
            return PatchAction::Ignore;
        }

        match self.kind() {
            IterableKind::Empty => PatchAction::Ignore,
            IterableKind::AllEntities | IterableKind::EntitiesWithLink => PatchAction::Remove,
            IterableKind::FilterLinks => PatchAction::Invalidate,
            IterableKind::Union | IterableKind::Intersect => combine_any(
                self.children().map(|child| child.deleted_action(deleted)),
                PatchAction::Remove,
            ),
        }
    }

    /// Decide how a cached result reacts to links `link_id` of `type_id` changing.
    #[must_use]
    pub fn link_action(&self, type_id: EntityTypeId, link_id: LinkId) -> PatchAction {
        if self.matches_link(type_id, link_id) {
            PatchAction::Invalidate
        } else {
            PatchAction::Ignore
        }
    }

    fn children(&self) -> impl Iterator<Item = &Self> + '_ {
        self.inner
            .params
            .iter()
            .filter_map(|param| match param {
                HandleParam::Child(child) => Some(child),
                HandleParam::TypeId(_) | HandleParam::LinkId(_) => None,
            })
            .chain(self.inner.decoration.iter())
    }
}

// Invalidate dominates; otherwise `found` wins if any child produced it.
fn combine_any(actions: impl Iterator<Item = PatchAction>, found: PatchAction) -> PatchAction {
    let mut result = PatchAction::Ignore;
    for action in actions {
        if action == PatchAction::Invalidate {
            return PatchAction::Invalidate;
        }
        if action == found {
            result = found;
        }
    }

    result
}

fn canonical_param_cmp(left: &HandleParam, right: &HandleParam) -> std::cmp::Ordering {
    const fn rank(param: &HandleParam) -> u8 {
        match param {
            HandleParam::TypeId(_) => 0,
            HandleParam::LinkId(_) => 1,
            HandleParam::Child(_) => 2,
        }
    }

    match (left, right) {
        (HandleParam::TypeId(l), HandleParam::TypeId(r))
        | (HandleParam::LinkId(l), HandleParam::LinkId(r)) => l.cmp(r),
        (HandleParam::Child(l), HandleParam::Child(r)) => l.canonical().cmp(r.canonical()),
        _ => rank(left).cmp(&rank(right)),
    }
}

fn render_canonical(
    kind: IterableKind,
    params: &[HandleParam],
    decoration: Option<&IterableHandle>,
) -> String {
    let mut out = String::from(kind.label());
    let mut children = Vec::new();
    for param in params {
        match param {
            HandleParam::TypeId(type_id) => {
                out.push(':');
                out.push_str(&type_id.to_string());
            }
            HandleParam::LinkId(link_id) => {
                out.push_str(":l");
                out.push_str(&link_id.to_string());
            }
            HandleParam::Child(child) => children.push(child.canonical()),
        }
    }
    if !children.is_empty() {
        out.push('(');
        out.push_str(&children.join(","));
        out.push(')');
    }
    if let Some(decoration) = decoration {
        out.push('-');
        out.push_str(decoration.canonical());
    }

    out
}

impl PartialEq for IterableHandle {
    fn eq(&self, other: &Self) -> bool {
        if Arc::ptr_eq(&self.inner, &other.inner) {
            return true;
        }

        self.inner.hash == other.inner.hash
            && self.inner.kind == other.inner.kind
            && self.inner.params == other.inner.params
            && self.inner.decoration == other.inner.decoration
    }
}

impl Eq for IterableHandle {}

impl Hash for IterableHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.inner.hash);
    }
}

impl fmt::Debug for IterableHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("IterableHandle")
            .field(&self.inner.canonical)
            .finish()
    }
}

impl fmt::Display for IterableHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner.canonical)
    }
}
