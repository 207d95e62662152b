//! Entity iterables: composition, structural handles, and the iterator protocol.

mod composite;
mod description;
mod handle;
mod iterable;
mod iterator;
mod join;
mod kind;
mod scan;


pub use composite::{IntersectIterator, UnionIterator};
pub use description::IterableDescription;
pub use handle::{HandleParam, IterableHandle, PatchAction};
pub use iterable::EntityIterable;
pub use iterator::{EmptyIterator, EntityIterator, EntityIteratorBox, Ids, SnapshotIterator, collect_ids};
pub use join::LinkJoinIterator;
pub use kind::IterableKind;
pub use scan::{EntitiesOfTypeIterator, EntitiesWithLinkIterator, LinksIterator};
