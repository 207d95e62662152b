//! Small deterministic helpers shared by the entiq crates.

pub mod hash;
pub mod prime;

pub use hash::{StableHasher, route_hash};
pub use prime::{ceiling_prime, is_prime};
