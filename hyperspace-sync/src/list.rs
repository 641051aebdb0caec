//! Reader-writer protected ordered sequence

use std::sync::RwLock;

use crate::{read, write};

/// An ordered sequence protected by a reader-writer lock.
///
/// Mutations take the exclusive lock. Iteration copies the backing storage
/// under the shared lock and walks the copy outside it, so the closures
/// passed to [`for_each`](Self::for_each) and [`first`](Self::first) may
/// call back into the list.
pub struct ConcurrentList<T> {
    items: RwLock<Vec<T>>,
}

impl<T: Clone + PartialEq> ConcurrentList<T> {
    /// Create an empty list.
    pub fn new() -> Self {
        Self {
            items: RwLock::new(Vec::new()),
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        read(&self.items).len()
    }

    /// Whether the list holds no elements.
    pub fn is_empty(&self) -> bool {
        read(&self.items).is_empty()
    }

    /// Whether the list contains an element equal to `item`.
    pub fn contains(&self, item: &T) -> bool {
        read(&self.items).iter().any(|x| x == item)
    }

    /// Append an element unconditionally.
    pub fn push(&self, item: T) {
        write(&self.items).push(item);
    }

    /// Append an element if no equal element is present.
    ///
    /// Returns `true` if the element was inserted.
    pub fn push_absent(&self, item: T) -> bool {
        let mut items = write(&self.items);
        if items.contains(&item) {
            return false;
        }
        items.push(item);
        true
    }

    /// Append every element of `iter` that is not already present.
    ///
    /// Returns the number of elements inserted.
    pub fn extend_absent(&self, iter: impl IntoIterator<Item = T>) -> usize {
        let mut items = write(&self.items);
        let mut inserted = 0;
        for item in iter {
            if !items.contains(&item) {
                items.push(item);
                inserted += 1;
            }
        }
        inserted
    }

    /// Remove the first element equal to `item`.
    ///
    /// Returns `true` if an element was removed.
    pub fn remove(&self, item: &T) -> bool {
        let mut items = write(&self.items);
        match items.iter().position(|x| x == item) {
            Some(pos) => {
                items.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Remove every element equal to any element of `iter`.
    ///
    /// Returns the number of elements removed.
    pub fn remove_all(&self, iter: impl IntoIterator<Item = T>) -> usize {
        let to_remove: Vec<T> = iter.into_iter().collect();
        let mut items = write(&self.items);
        let before = items.len();
        items.retain(|x| !to_remove.contains(x));
        before - items.len()
    }

    /// Remove every element.
    pub fn clear(&self) {
        write(&self.items).clear();
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> Vec<T> {
        read(&self.items).clone()
    }

    /// Visit each element of a snapshot in order.
    pub fn for_each(&self, mut f: impl FnMut(&T)) {
        for item in &self.snapshot() {
            f(item);
        }
    }

    /// Return the first element of a snapshot matching `pred`.
    pub fn first(&self, pred: impl FnMut(&T) -> bool) -> Option<T> {
        let mut pred = pred;
        self.snapshot().into_iter().find(|item| pred(item))
    }
}

impl<T: Clone + PartialEq> Default for ConcurrentList<T> {
    fn default() -> Self {
        Self::new()
    }
}
