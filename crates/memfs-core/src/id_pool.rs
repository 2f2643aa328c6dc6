// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Recycling integer identifier pool
//!
//! Backs both the inode table and the descriptor table. Released ids are
//! reused lowest-first, so descriptor and inode numbers stay small and
//! deterministic.

use std::collections::{BTreeSet, HashMap};

#[derive(Debug)]
pub(crate) struct IdPool<T> {
    next: u64,
    released: BTreeSet<u64>,
    items: HashMap<u64, T>,
}

impl<T> IdPool<T> {
    pub(crate) fn new(start: u64) -> Self {
        Self {
            next: start,
            released: BTreeSet::new(),
            items: HashMap::new(),
        }
    }

    pub(crate) fn allocate(&mut self, item: T) -> u64 {
        let id = match self.released.pop_first() {
            Some(id) => id,
            None => {
                let id = self.next;
                self.next += 1;
                id
            }
        };
        self.items.insert(id, item);
        id
    }

    /// Allocate an id and build the item from it.
    pub(crate) fn allocate_with(&mut self, make: impl FnOnce(u64) -> T) -> u64 {
        let id = self.released.first().copied().unwrap_or(self.next);
        let item = make(id);
        self.allocate(item)
    }

    pub(crate) fn get(&self, id: u64) -> Option<&T> {
        self.items.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: u64) -> Option<&mut T> {
        self.items.get_mut(&id)
    }

    /// Remove the item and return its id to the free list.
    pub(crate) fn release(&mut self, id: u64) -> Option<T> {
        let item = self.items.remove(&id)?;
        self.released.insert(id);
        Some(item)
    }

    /// Keep a released id off the free list. Returns whether it was free.
    pub(crate) fn hold(&mut self, id: u64) -> bool {
        self.released.remove(&id)
    }

    /// Return a held id to the free list.
    pub(crate) fn unhold(&mut self, id: u64) {
        if id < self.next && !self.items.contains_key(&id) {
            self.released.insert(id);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (u64, &T)> {
        self.items.iter().map(|(id, item)| (*id, item))
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (u64, &mut T)> {
        self.items.iter_mut().map(|(id, item)| (*id, item))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocates_from_offset() {
        let mut pool = IdPool::new(1001);
        assert_eq!(pool.allocate("a"), 1001);
        assert_eq!(pool.allocate("b"), 1002);
        assert_eq!(pool.get(1001), Some(&"a"));
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_reuses_lowest_released() {
        let mut pool = IdPool::new(10);
        for name in ["a", "b", "c", "d"] {
            pool.allocate(name);
        }
        assert_eq!(pool.release(12), Some("c"));
        assert_eq!(pool.release(11), Some("b"));
        assert!(pool.get(11).is_none());

        assert_eq!(pool.allocate("e"), 11);
        assert_eq!(pool.allocate("f"), 12);
        assert_eq!(pool.allocate("g"), 14);
    }

    #[test]
    fn test_release_unknown_is_noop() {
        let mut pool: IdPool<u8> = IdPool::new(1);
        assert_eq!(pool.release(5), None);
        assert_eq!(pool.allocate(0), 1);
    }

    #[test]
    fn test_allocate_with_sees_its_id() {
        let mut pool = IdPool::new(7);
        pool.allocate(0);
        pool.release(7);
        let id = pool.allocate_with(|id| id * 2);
        assert_eq!(id, 7);
        assert_eq!(pool.get(7), Some(&14));
    }

    #[test]
    fn test_held_id_is_skipped_until_unheld() {
        let mut pool = IdPool::new(1);
        pool.allocate("a");
        pool.allocate("b");
        pool.release(1);
        assert!(pool.hold(1));
        assert!(!pool.hold(2));

        assert_eq!(pool.allocate("c"), 3);
        pool.unhold(1);
        assert_eq!(pool.allocate("d"), 1);
        pool.unhold(1);
        assert_eq!(pool.allocate("e"), 4);
    }
}
