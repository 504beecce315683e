//! PredicateTuple - Immutable, composable filter over elements
//!
//! A tuple is an ordered list of predicates evaluated with AND ([`test_all`]) or OR
//! ([`test_any`]). Builders never mutate: [`by`] returns a new tuple, so a shared prefix
//! can be reused for several filters. [`invert`] flips the result of the whole tuple,
//! not each predicate.
//!
//! [`test_all`]: PredicateTuple::test_all
//! [`test_any`]: PredicateTuple::test_any
//! [`by`]: PredicateTuple::by
//! [`invert`]: PredicateTuple::invert

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

/// A test applied to one element
pub trait Predicate<E: ?Sized>: Send + Sync {
    /// Run the test
    fn exec(&self, element: &E) -> bool;
}

impl<E: ?Sized, F> Predicate<E> for F
where
    F: Fn(&E) -> bool + Send + Sync,
{
    fn exec(&self, element: &E) -> bool {
        self(element)
    }
}

/// Ordered, shareable list of predicates
pub struct PredicateTuple<E: ?Sized> {
    predicates: Vec<Arc<dyn Predicate<E>>>,
    inverted: bool,
}

impl<E: ?Sized> PredicateTuple<E> {
    /// Create an empty tuple. It passes every element under [`test_all`](Self::test_all).
    pub fn new() -> Self {
        Self {
            predicates: Vec::new(),
            inverted: false,
        }
    }

    /// New tuple with `predicate` appended
    pub fn by<P>(&self, predicate: P) -> Self
    where
        P: Predicate<E> + 'static,
    {
        self.by_shared(Arc::new(predicate))
    }

    /// New tuple with an already shared predicate appended
    pub fn by_shared(&self, predicate: Arc<dyn Predicate<E>>) -> Self {
        let mut predicates = self.predicates.clone();
        predicates.push(predicate);
        Self {
            predicates,
            inverted: self.inverted,
        }
    }

    /// New tuple whose result is the negation of this one
    pub fn invert(&self) -> Self {
        Self {
            predicates: self.predicates.clone(),
            inverted: !self.inverted,
        }
    }

    /// Whether results are negated
    pub fn is_inverted(&self) -> bool {
        self.inverted
    }

    /// True when every predicate passes (negated if inverted)
    pub fn test_all(&self, element: &E) -> bool {
        self.predicates.iter().all(|p| p.exec(element)) != self.inverted
    }

    /// True when any predicate passes (negated if inverted)
    pub fn test_any(&self, element: &E) -> bool {
        self.predicates.iter().any(|p| p.exec(element)) != self.inverted
    }

    /// Number of predicates
    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    /// Check if there are no predicates
    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }
}

impl<E: ?Sized> Clone for PredicateTuple<E> {
    fn clone(&self) -> Self {
        Self {
            predicates: self.predicates.clone(),
            inverted: self.inverted,
        }
    }
}

impl<E: ?Sized> Default for PredicateTuple<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: ?Sized> fmt::Debug for PredicateTuple<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PredicateTuple")
            .field("len", &self.predicates.len())
            .field("inverted", &self.inverted)
            .finish()
    }
}
