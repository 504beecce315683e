//! SortedIndex - Key-ordered storage with binary search lookup
//!
//! Elements live in one contiguous array ordered by key. Appending a key larger than every
//! stored key is O(1); lookups are O(log n). Structural changes (append, insert, remove,
//! sort, clear) panic while any write lock on the index is held.

use core::fmt;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicU32, Ordering};

use alloc::vec::Vec;
use serde::{Deserialize, Deserializer, Serialize};

/// An element that carries its own sort key
pub trait Keyed {
    /// Key type, compared to keep the index ordered
    type Key: Ord + Copy + fmt::Debug;

    /// This element's key
    fn key(&self) -> Self::Key;
}

/// Array of elements kept in strictly ascending key order
#[derive(Serialize)]
#[serde(transparent)]
pub struct SortedIndex<T> {
    elements: Vec<T>,
    #[serde(skip)]
    write_lock: AtomicU32,
}

impl<T: Keyed> SortedIndex<T> {
    /// Create a new empty index
    pub fn new() -> Self {
        Self {
            elements: Vec::new(),
            write_lock: AtomicU32::new(0),
        }
    }

    /// Create with initial capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            elements: Vec::with_capacity(capacity),
            write_lock: AtomicU32::new(0),
        }
    }

    /// Position of `key`, or `None` if absent
    pub fn index_of(&self, key: T::Key) -> Option<usize> {
        self.elements.binary_search_by(|e| e.key().cmp(&key)).ok()
    }

    /// Get a reference to the element with `key`
    pub fn find(&self, key: T::Key) -> Option<&T> {
        self.index_of(key).map(|idx| &self.elements[idx])
    }

    /// Check if the index contains `key`
    pub fn contains(&self, key: T::Key) -> bool {
        self.index_of(key).is_some()
    }

    /// Key of the element at `index`
    pub fn get_key_at(&self, index: usize) -> Option<T::Key> {
        self.elements.get(index).map(Keyed::key)
    }

    /// Element at `index`
    pub fn element_at(&self, index: usize) -> Option<&T> {
        self.elements.get(index)
    }

    /// Key of the last (largest) element
    pub fn last_key(&self) -> Option<T::Key> {
        self.elements.last().map(Keyed::key)
    }

    /// Add an element whose key is larger than every stored key.
    ///
    /// # Panics
    /// If the key is not past the last stored key, or a write lock is held.
    pub fn append(&mut self, element: T) -> usize {
        self.assert_unlocked("append");

        if let Some(last) = self.elements.last() {
            assert!(
                last.key() < element.key(),
                "SortedIndex::append: key {:?} is not past last key {:?}; use insert instead",
                element.key(),
                last.key()
            );
        }

        self.elements.push(element);
        self.elements.len() - 1
    }

    /// Add an element at the end without checking order. Call [`sort`](Self::sort)
    /// afterwards if keys may be out of order.
    ///
    /// # Panics
    /// If a write lock is held.
    pub fn append_unsafe(&mut self, element: T) -> usize {
        self.assert_unlocked("append_unsafe");
        self.elements.push(element);
        self.elements.len() - 1
    }

    /// Insert in key order. An element with an equal key is overwritten, not merged.
    /// Returns the element's position.
    ///
    /// # Panics
    /// If a write lock is held.
    pub fn insert(&mut self, element: T) -> usize {
        self.assert_unlocked("insert");

        let key = element.key();
        let upper = self.elements.partition_point(|e| e.key() <= key);

        if upper > 0 && self.elements[upper - 1].key() == key {
            self.elements[upper - 1] = element;
            upper - 1
        } else {
            self.elements.insert(upper, element);
            upper
        }
    }

    /// Remove the element with `key`, calling `pre_removal` on it first
    ///
    /// # Panics
    /// If a write lock is held.
    pub fn remove<F>(&mut self, key: T::Key, pre_removal: F) -> Option<T>
    where
        F: FnOnce(&T),
    {
        self.assert_unlocked("remove");

        let idx = self.index_of(key)?;
        pre_removal(&self.elements[idx]);
        Some(self.elements.remove(idx))
    }

    /// Restore key order after unchecked appends. Of several elements sharing a key only
    /// the first appended is kept. Returns how many were dropped.
    ///
    /// # Panics
    /// If a write lock is held.
    pub fn sort(&mut self) -> usize {
        self.assert_unlocked("sort");
        let before = self.elements.len();
        self.elements.sort_by_key(Keyed::key);
        self.elements.dedup_by_key(|element| element.key());
        before - self.elements.len()
    }

    /// Check that keys are strictly ascending
    pub fn is_sorted(&self) -> bool {
        self.elements.windows(2).all(|w| w[0].key() < w[1].key())
    }

    /// Remove all elements
    ///
    /// # Panics
    /// If a write lock is held.
    pub fn clear(&mut self) {
        self.assert_unlocked("clear");
        self.elements.clear();
    }

    /// Remove elements failing `keep`, preserving order
    ///
    /// # Panics
    /// If a write lock is held.
    pub fn retain<F>(&mut self, keep: F)
    where
        F: FnMut(&T) -> bool,
    {
        self.assert_unlocked("retain");
        self.elements.retain(keep);
    }

    /// Mutable access to the element with `key`. The index is write-locked until the
    /// guard drops.
    pub fn guard(&mut self, key: T::Key) -> Option<IndexGuard<'_, T>> {
        let idx = self.index_of(key)?;
        Some(self.guard_at(idx))
    }

    /// Mutable access to the element at `index`
    ///
    /// # Panics
    /// If `index` is out of bounds.
    pub fn guard_at(&mut self, index: usize) -> IndexGuard<'_, T> {
        let lock = &self.write_lock;
        let element = &mut self.elements[index];
        lock.fetch_add(1, Ordering::AcqRel);
        IndexGuard { element, lock, index }
    }

    /// Keys in order
    pub fn keys(&self) -> impl Iterator<Item = T::Key> + '_ {
        self.elements.iter().map(Keyed::key)
    }

    /// Consume the index, yielding its elements in order
    pub fn into_vec(self) -> Vec<T> {
        self.elements
    }
}

impl<T> SortedIndex<T> {
    /// Get the number of elements
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Iterate over elements in key order
    pub fn iter(&self) -> core::slice::Iter<'_, T> {
        self.elements.iter()
    }

    /// Elements as a slice
    pub fn as_slice(&self) -> &[T] {
        &self.elements
    }

    /// Raise the write lock manually, e.g. around an external iteration
    pub fn lock_write_access(&self) {
        self.write_lock.fetch_add(1, Ordering::AcqRel);
    }

    /// Release a lock taken with [`lock_write_access`](Self::lock_write_access)
    ///
    /// # Panics
    /// If no lock is held.
    pub fn unlock_write_access(&self) {
        let previous = self.write_lock.fetch_sub(1, Ordering::AcqRel);
        assert!(previous > 0, "SortedIndex::unlock_write_access without a matching lock");
    }

    /// Current write lock depth
    pub fn write_lock(&self) -> u32 {
        self.write_lock.load(Ordering::Acquire)
    }

    /// Check if any write lock is held
    pub fn is_write_locked(&self) -> bool {
        self.write_lock() > 0
    }

    fn assert_unlocked(&self, op: &str) {
        let depth = self.write_lock();
        assert!(
            depth == 0,
            "SortedIndex::{op}: structural mutation while write-locked (depth {depth})"
        );
    }
}

impl<T: Keyed> Default for SortedIndex<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Clone for SortedIndex<T> {
    fn clone(&self) -> Self {
        Self {
            elements: self.elements.clone(),
            write_lock: AtomicU32::new(0),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for SortedIndex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SortedIndex")
            .field("elements", &self.elements)
            .field("write_lock", &self.write_lock.load(Ordering::Relaxed))
            .finish()
    }
}

// Serialized data may come from anywhere, so it is put in order on the way in
impl<'de, T: Keyed + Deserialize<'de>> Deserialize<'de> for SortedIndex<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let elements = Vec::<T>::deserialize(deserializer)?;
        Ok(elements.into_iter().collect())
    }
}

impl<T: Keyed> FromIterator<T> for SortedIndex<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut index = Self::new();
        index.elements.extend(iter);
        index.sort();
        index
    }
}

impl<'a, T> IntoIterator for &'a SortedIndex<T> {
    type Item = &'a T;
    type IntoIter = core::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.elements.iter()
    }
}

/// Scoped mutable access to one element. Holds the index's write lock until dropped.
pub struct IndexGuard<'a, T> {
    element: &'a mut T,
    lock: &'a AtomicU32,
    index: usize,
}

impl<'a, T> IndexGuard<'a, T> {
    /// Position of the guarded element
    pub fn index(&self) -> usize {
        self.index
    }

    /// Current write lock depth, including this guard
    pub fn write_lock(&self) -> u32 {
        self.lock.load(Ordering::Acquire)
    }
}

impl<'a, T> Deref for IndexGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.element
    }
}

impl<'a, T> DerefMut for IndexGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.element
    }
}

impl<'a, T> Drop for IndexGuard<'a, T> {
    fn drop(&mut self) {
        self.lock.fetch_sub(1, Ordering::AcqRel);
    }
}
