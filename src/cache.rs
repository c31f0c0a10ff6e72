// Copyright 2017-2021 Sean Gillespie.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The search's evaluation cache: a fixed-capacity, thread-safe LRU mapping a position's full
//! key to a cached policy/value pair.
//!
//! Rather than a process-wide singleton, this cache is an owned, explicitly-passed-around value -
//! one per [`crate::search::Engine`]. A single [`std::sync::Mutex`] guards the whole structure,
//! including reads: the expected hit-path critical section is short (hash lookup plus a handful
//! of pointer swaps), and a single lock avoids the bookkeeping a reader-writer split would need to
//! keep pin counts and LRU order consistent.

use std::sync::Mutex;

/// A move identifier in the network's fixed move-id space; see [`crate::network`].
pub type MoveId = u16;

/// An immutable (after construction) cached evaluation: the value of the position from the
/// side-to-move's perspective, and the prior assigned to each move the network considered.
#[derive(Clone, Debug, PartialEq)]
pub struct CachedEval {
    pub value: f32,
    pub policy: Vec<(MoveId, f32)>,
}

/// An opaque handle to an entry that is currently pinned. A handle obtained from [`EvalCache::lookup`]
/// or [`EvalCache::insert`] keeps its entry alive - even past logical eviction - until it is passed to
/// [`EvalCache::unpin`].
#[derive(Debug)]
pub struct PinnedHandle(usize);

struct Slot {
    key: u64,
    value: CachedEval,
    pins: u32,
    /// True once this slot has fallen off the LRU list (by eviction, or by being displaced by a
    /// fresh insert under the same key) while still pinned. An evicted, unpinned slot is freed
    /// immediately instead of lingering with this flag set.
    evicted: bool,
    bucket_next: Option<usize>,
    lru_prev: Option<usize>,
    lru_next: Option<usize>,
}

struct Inner {
    slots: Vec<Option<Slot>>,
    free: Vec<usize>,
    buckets: Vec<Option<usize>>,
    lru_head: Option<usize>,
    lru_tail: Option<usize>,
    live: usize,
    capacity: usize,
}

fn bucket_count_for(capacity: usize) -> usize {
    (((capacity as f64) * 1.33).ceil() as usize) + 1
}

impl Inner {
    fn new(capacity: usize) -> Inner {
        Inner {
            slots: Vec::new(),
            free: Vec::new(),
            buckets: vec![None; bucket_count_for(capacity)],
            lru_head: None,
            lru_tail: None,
            live: 0,
            capacity,
        }
    }

    fn bucket_of(&self, key: u64) -> usize {
        (key as usize) % self.buckets.len()
    }

    fn find(&self, key: u64) -> Option<usize> {
        let mut cursor = self.buckets[self.bucket_of(key)];
        while let Some(idx) = cursor {
            let slot = self.slots[idx].as_ref().expect("chained slot must be live");
            if slot.key == key {
                return Some(idx);
            }
            cursor = slot.bucket_next;
        }
        None
    }

    fn unlink_from_bucket(&mut self, idx: usize) {
        let key = self.slots[idx].as_ref().unwrap().key;
        let bucket = self.bucket_of(key);
        let target_next = self.slots[idx].as_ref().unwrap().bucket_next;

        if self.buckets[bucket] == Some(idx) {
            self.buckets[bucket] = target_next;
            return;
        }

        let mut cursor = self.buckets[bucket];
        while let Some(candidate) = cursor {
            let candidate_next = self.slots[candidate].as_ref().unwrap().bucket_next;
            if candidate_next == Some(idx) {
                self.slots[candidate].as_mut().unwrap().bucket_next = target_next;
                return;
            }
            cursor = candidate_next;
        }
    }

    fn push_lru_head(&mut self, idx: usize) {
        self.slots[idx].as_mut().unwrap().lru_prev = None;
        self.slots[idx].as_mut().unwrap().lru_next = self.lru_head;
        if let Some(head) = self.lru_head {
            self.slots[head].as_mut().unwrap().lru_prev = Some(idx);
        }
        self.lru_head = Some(idx);
        if self.lru_tail.is_none() {
            self.lru_tail = Some(idx);
        }
    }

    fn unlink_from_lru(&mut self, idx: usize) {
        let (prev, next) = {
            let slot = self.slots[idx].as_ref().unwrap();
            (slot.lru_prev, slot.lru_next)
        };
        match prev {
            Some(p) => self.slots[p].as_mut().unwrap().lru_next = next,
            None => self.lru_head = next,
        }
        match next {
            Some(n) => self.slots[n].as_mut().unwrap().lru_prev = prev,
            None => self.lru_tail = prev,
        }
    }

    /// Detaches the slot at `idx` from the table and LRU list. If it's pinned, it's kept in the
    /// arena under the `evicted` flag (any outstanding handle remains valid); otherwise it's freed
    /// outright.
    fn evict(&mut self, idx: usize) {
        self.unlink_from_bucket(idx);
        self.unlink_from_lru(idx);
        self.live -= 1;

        let pinned = self.slots[idx].as_ref().unwrap().pins > 0;
        if pinned {
            self.slots[idx].as_mut().unwrap().evicted = true;
        } else {
            self.slots[idx] = None;
            self.free.push(idx);
        }
    }

    fn alloc(&mut self, slot: Slot) -> usize {
        if let Some(idx) = self.free.pop() {
            self.slots[idx] = Some(slot);
            idx
        } else {
            self.slots.push(Some(slot));
            self.slots.len() - 1
        }
    }

    fn insert(&mut self, key: u64, value: CachedEval, pin: bool) -> usize {
        if let Some(existing) = self.find(key) {
            self.evict(existing);
        }

        let idx = self.alloc(Slot {
            key,
            value,
            pins: if pin { 1 } else { 0 },
            evicted: false,
            bucket_next: None,
            lru_prev: None,
            lru_next: None,
        });

        let bucket = self.bucket_of(key);
        self.slots[idx].as_mut().unwrap().bucket_next = self.buckets[bucket];
        self.buckets[bucket] = Some(idx);
        self.push_lru_head(idx);
        self.live += 1;

        // Evict from the tail until we're back within capacity; this also covers a capacity of 0,
        // where the entry we just inserted is itself the tail and is evicted (and, if unpinned,
        // freed) before ever becoming externally visible.
        while self.live > self.capacity {
            match self.lru_tail {
                Some(victim) => self.evict(victim),
                None => break,
            }
        }

        idx
    }

    fn rehash(&mut self, new_capacity: usize) {
        self.buckets = vec![None; bucket_count_for(new_capacity)];
        self.capacity = new_capacity;

        let mut cursor = self.lru_head;
        while let Some(idx) = cursor {
            let bucket = self.bucket_of(self.slots[idx].as_ref().unwrap().key);
            self.slots[idx].as_mut().unwrap().bucket_next = self.buckets[bucket];
            self.buckets[bucket] = Some(idx);
            cursor = self.slots[idx].as_ref().unwrap().lru_next;
        }

        while self.live > self.capacity {
            match self.lru_tail {
                Some(victim) => self.evict(victim),
                None => break,
            }
        }
    }
}

/// A thread-safe, fixed-capacity LRU cache of position evaluations, keyed by full key (see
/// [`crate::history::BoardHistory::full_key`]).
pub struct EvalCache {
    inner: Mutex<Inner>,
}

impl EvalCache {
    pub fn new(capacity: usize) -> EvalCache {
        EvalCache {
            inner: Mutex::new(Inner::new(capacity)),
        }
    }

    /// Looks up `key`. If present, the returned handle pins the entry - it will not be freed
    /// until passed to [`EvalCache::unpin`], even if it's logically evicted in the meantime. Does
    /// not alter the entry's LRU position.
    pub fn lookup(&self, key: u64) -> Option<PinnedHandle> {
        let mut inner = self.inner.lock().unwrap();
        let idx = inner.find(key)?;
        inner.slots[idx].as_mut().unwrap().pins += 1;
        Some(PinnedHandle(idx))
    }

    /// Inserts `value` under `key`, displacing any prior entry for the same key and evicting from
    /// the LRU tail if over capacity. If `pin` is true, the returned handle pins the new entry;
    /// otherwise the handle is a plain identity reference that may already have been evicted by
    /// the time it's read back.
    pub fn insert(&self, key: u64, value: CachedEval, pin: bool) -> PinnedHandle {
        let mut inner = self.inner.lock().unwrap();
        PinnedHandle(inner.insert(key, value, pin))
    }

    /// Releases one pin held by `handle`. If the entry was logically evicted while pinned and
    /// this was its last pin, it is freed now. A handle from an unpinned `insert` may already
    /// refer to a freed slot (an immediately-evicted entry, e.g. in a zero-capacity cache); that
    /// case is a harmless no-op.
    pub fn unpin(&self, handle: PinnedHandle) {
        let mut inner = self.inner.lock().unwrap();
        let idx = handle.0;
        let Some(slot) = inner.slots[idx].as_mut() else {
            return;
        };
        slot.pins = slot.pins.saturating_sub(1);
        let (pins, evicted) = (slot.pins, slot.evicted);
        if pins == 0 && evicted {
            inner.slots[idx] = None;
            inner.free.push(idx);
        }
    }

    /// Reads the value behind `handle`, cloning it out under the lock.
    pub fn read(&self, handle: &PinnedHandle) -> CachedEval {
        let inner = self.inner.lock().unwrap();
        inner.slots[handle.0]
            .as_ref()
            .expect("pinned handle always refers to a live slot")
            .value
            .clone()
    }

    pub fn contains(&self, key: u64) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.find(key).is_some()
    }

    pub fn size(&self) -> usize {
        self.inner.lock().unwrap().live
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().unwrap().capacity
    }

    /// Changes the cache's capacity, rehashing the bucket table and evicting from the LRU tail if
    /// the cache is now over capacity. Calling this twice in a row with the same value is a no-op.
    pub fn set_capacity(&self, capacity: usize) {
        let mut inner = self.inner.lock().unwrap();
        if inner.capacity == capacity {
            return;
        }
        inner.rehash(capacity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(v: f32) -> CachedEval {
        CachedEval {
            value: v,
            policy: vec![(0, 1.0)],
        }
    }

    #[test]
    fn lookup_miss_on_empty_cache() {
        let cache = EvalCache::new(4);
        assert!(cache.lookup(1).is_none());
    }

    #[test]
    fn insert_then_lookup_hits() {
        let cache = EvalCache::new(4);
        let h = cache.insert(1, eval(0.5), false);
        cache.unpin(h);
        let h2 = cache.lookup(1).expect("should hit");
        assert_eq!(0.5, cache.read(&h2).value);
        cache.unpin(h2);
    }

    #[test]
    fn capacity_zero_behaves_as_empty() {
        let cache = EvalCache::new(0);
        let h = cache.insert(1, eval(0.5), false);
        cache.unpin(h);
        assert_eq!(0, cache.size());
        assert!(cache.lookup(1).is_none());
    }

    #[test]
    fn eviction_from_lru_tail() {
        let cache = EvalCache::new(2);
        let h1 = cache.insert(1, eval(0.1), false);
        cache.unpin(h1);
        let h2 = cache.insert(2, eval(0.2), false);
        cache.unpin(h2);
        let h3 = cache.insert(3, eval(0.3), false);
        cache.unpin(h3);

        assert_eq!(2, cache.size());
        assert!(!cache.contains(1), "oldest entry should have been evicted");
        assert!(cache.contains(2));
        assert!(cache.contains(3));
    }

    #[test]
    fn lookup_does_not_change_lru_position() {
        let cache = EvalCache::new(2);
        let h1 = cache.insert(1, eval(0.1), false);
        cache.unpin(h1);
        let h2 = cache.insert(2, eval(0.2), false);
        cache.unpin(h2);

        // Touch key 1 via lookup; since lookup doesn't refresh LRU order, key 1 should still be
        // the next eviction victim.
        let hit = cache.lookup(1).unwrap();
        cache.unpin(hit);

        let h3 = cache.insert(3, eval(0.3), false);
        cache.unpin(h3);

        assert!(!cache.contains(1));
        assert!(cache.contains(2));
    }

    #[test]
    fn pinned_entry_survives_logical_eviction() {
        let cache = EvalCache::new(1);
        let pinned = cache.insert(1, eval(0.9), true);
        // This eviction would normally free key 1's slot, but it's pinned.
        let h2 = cache.insert(2, eval(0.2), false);
        cache.unpin(h2);

        assert!(!cache.contains(1), "evicted from the table, so no longer discoverable by key");
        assert_eq!(0.9, cache.read(&pinned).value, "but the pinned handle still resolves");
        cache.unpin(pinned);
    }

    #[test]
    fn set_capacity_is_idempotent() {
        let cache = EvalCache::new(4);
        cache.set_capacity(8);
        cache.set_capacity(8);
        assert_eq!(8, cache.capacity());
    }

    #[test]
    fn displacing_same_key_drops_old_value() {
        let cache = EvalCache::new(4);
        let h1 = cache.insert(1, eval(0.1), false);
        cache.unpin(h1);
        let h2 = cache.insert(1, eval(0.9), false);
        assert_eq!(1, cache.size());
        assert_eq!(0.9, cache.read(&h2).value);
        cache.unpin(h2);
    }
}
