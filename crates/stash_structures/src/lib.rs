//! # stash_structures - Ordered Containers and Filters
//!
//! Data structures the storage engine is built on:
//! - SortedIndex: Key-ordered array with binary search and a write lock
//! - PredicateTuple: Immutable, invertible predicate lists

extern crate alloc;

pub mod predicate;
pub mod sorted_index;

pub use predicate::{Predicate, PredicateTuple};
pub use sorted_index::{IndexGuard, Keyed, SortedIndex};

pub mod prelude {
    pub use crate::predicate::{Predicate, PredicateTuple};
    pub use crate::sorted_index::{IndexGuard, Keyed, SortedIndex};
}
