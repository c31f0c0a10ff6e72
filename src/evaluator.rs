// Copyright 2017-2021 Sean Gillespie.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The batching evaluator: glue between [`crate::search::node::SearchNode::create_children`] and
//! a single [`crate::network::Computation`] batch, with [`crate::cache::EvalCache`] short-circuit
//! and deduplication.
//!
//! One `BatchEvaluator` is built per forward pass. A playout worker (or, for the root's synchronous
//! expansion, the controller itself) calls [`BatchEvaluator::add`] once per leaf position it wants
//! evaluated; positions already in the cache never touch the network. [`BatchEvaluator::compute_blocking`]
//! runs the batch once and backfills the cache; [`BatchEvaluator::q`]/[`BatchEvaluator::p`] then read
//! results back uniformly regardless of whether a given sample was a cache hit or a fresh network
//! evaluation.

use std::cell::RefCell;

use crate::cache::{CachedEval, EvalCache, MoveId, PinnedHandle};
use crate::network::{Computation, Planes};

enum Source {
    Cached(PinnedHandle),
    Network {
        batch_index: usize,
        moves_to_cache: Vec<MoveId>,
    },
}

struct Entry {
    key: u64,
    source: Source,
}

/// One batch's worth of positions queued for evaluation, backed by a single
/// [`crate::network::Computation`] and the shared [`EvalCache`].
pub struct BatchEvaluator<'a> {
    cache: &'a EvalCache,
    computation: Box<dyn Computation>,
    entries: Vec<Entry>,
    // Caches the most recently read `CachedEval` so repeated `p()` calls against the same sample
    // (the common access pattern: read every move's prior for the position just expanded) don't
    // re-lock the cache or re-clone its policy vector each time.
    last: RefCell<Option<(usize, CachedEval)>>,
}

impl<'a> BatchEvaluator<'a> {
    pub fn new(cache: &'a EvalCache, computation: Box<dyn Computation>) -> BatchEvaluator<'a> {
        BatchEvaluator {
            cache,
            computation,
            entries: Vec::new(),
            last: RefCell::new(None),
        }
    }

    /// Number of positions queued so far (cached and pending alike).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Looks `key` up in the cache. On a hit, records a [`Source::Cached`] entry (pinning it, so
    /// it survives logical eviction until this evaluator is dropped) and returns `true`; on a
    /// miss, returns `false` without recording anything.
    pub fn add_by_hash(&mut self, key: u64) -> bool {
        match self.cache.lookup(key) {
            Some(handle) => {
                self.entries.push(Entry {
                    key,
                    source: Source::Cached(handle),
                });
                true
            }
            None => false,
        }
    }

    /// Queues the position at `key` for evaluation. A cache hit short-circuits and no network
    /// work is scheduled; otherwise `planes` is pushed into the underlying computation's batch and
    /// `moves_to_cache` records which move ids this position's priors should be read (and cached)
    /// for once the batch resolves.
    pub fn add(&mut self, key: u64, planes: &Planes, moves_to_cache: Vec<MoveId>) {
        if self.add_by_hash(key) {
            return;
        }
        let batch_index = self.computation.add_input(planes);
        self.entries.push(Entry {
            key,
            source: Source::Network {
                batch_index,
                moves_to_cache,
            },
        });
    }

    /// Abandons the most recently added entry, unpinning it if it was a cache hit. Used to undo a
    /// speculative prefetch that turned out not to be needed.
    pub fn pop_last_hit(&mut self) {
        if let Some(entry) = self.entries.pop() {
            if let Source::Cached(handle) = entry.source {
                self.cache.unpin(handle);
            }
        }
    }

    /// Runs the underlying computation if any entries were queued as [`Source::Network`], then
    /// inserts a [`CachedEval`] for each of them into the cache.
    pub fn compute_blocking(&mut self) {
        let has_network_entries = self
            .entries
            .iter()
            .any(|e| matches!(e.source, Source::Network { .. }));
        if has_network_entries {
            self.computation.compute_blocking();
        }

        for entry in &self.entries {
            if let Source::Network {
                batch_index,
                moves_to_cache,
            } = &entry.source
            {
                let value = self.computation.q(*batch_index);
                let policy = moves_to_cache
                    .iter()
                    .map(|&m| (m, self.computation.p(*batch_index, m)))
                    .collect();
                self.cache
                    .insert(entry.key, CachedEval { value, policy }, false);
            }
        }
    }

    fn cached(&self, sample: usize, handle: &PinnedHandle) -> CachedEval {
        let mut last = self.last.borrow_mut();
        if let Some((idx, cached)) = last.as_ref() {
            if *idx == sample {
                return cached.clone();
            }
        }
        let cached = self.cache.read(handle);
        *last = Some((sample, cached.clone()));
        cached
    }

    /// The value of sample `sample`, from the perspective of the side to move in that sample's
    /// position. Valid for `Cached` samples immediately; for `Network` samples only after
    /// [`Self::compute_blocking`] has run.
    pub fn q(&self, sample: usize) -> f32 {
        match &self.entries[sample].source {
            Source::Cached(handle) => self.cached(sample, handle).value,
            Source::Network { batch_index, .. } => self.computation.q(*batch_index),
        }
    }

    /// The prior for `move_id` in sample `sample`'s position. A move id outside the set this
    /// position was evaluated for reads back as `0.0`.
    pub fn p(&self, sample: usize, move_id: MoveId) -> f32 {
        match &self.entries[sample].source {
            Source::Cached(handle) => self
                .cached(sample, handle)
                .policy
                .iter()
                .find(|&&(m, _)| m == move_id)
                .map(|&(_, p)| p)
                .unwrap_or(0.0),
            Source::Network { batch_index, .. } => self.computation.p(*batch_index, move_id),
        }
    }
}

impl<'a> Drop for BatchEvaluator<'a> {
    fn drop(&mut self) {
        for entry in self.entries.drain(..) {
            if let Source::Cached(handle) = entry.source {
                self.cache.unpin(handle);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{Network, UniformNetwork};

    #[test]
    fn fresh_entry_reads_back_from_network() {
        let cache = EvalCache::new(16);
        let net = UniformNetwork::new(0.6);
        let mut evaluator = BatchEvaluator::new(&cache, net.new_computation());

        let planes = vec![0.0f32; 1];
        evaluator.add(1, &planes, vec![0, 1]);
        evaluator.compute_blocking();

        assert_eq!(0.6, evaluator.q(0));
        assert_eq!(1.0, evaluator.p(0, 0));
        assert!(cache.contains(1));
    }

    #[test]
    fn repeated_key_is_a_cache_hit_not_a_second_network_call() {
        let cache = EvalCache::new(16);
        let net = UniformNetwork::new(0.6);

        {
            let mut evaluator = BatchEvaluator::new(&cache, net.new_computation());
            evaluator.add(1, &vec![0.0f32; 1], vec![0]);
            evaluator.compute_blocking();
        }

        let mut evaluator = BatchEvaluator::new(&cache, net.new_computation());
        assert!(evaluator.add_by_hash(1));
        assert_eq!(0, evaluator.computation.batch_size());
        assert_eq!(0.6, evaluator.q(0));
    }

    #[test]
    fn pop_last_hit_unpins_and_drops_entry() {
        let cache = EvalCache::new(16);
        let net = UniformNetwork::new(0.6);
        {
            let mut evaluator = BatchEvaluator::new(&cache, net.new_computation());
            evaluator.add(1, &vec![0.0f32; 1], vec![0]);
            evaluator.compute_blocking();
        }

        let mut evaluator = BatchEvaluator::new(&cache, net.new_computation());
        assert!(evaluator.add_by_hash(1));
        evaluator.pop_last_hit();
        assert_eq!(0, evaluator.len());
    }

    #[test]
    fn missing_move_id_reads_back_zero() {
        let cache = EvalCache::new(16);
        let net = UniformNetwork::new(0.6);
        let mut evaluator = BatchEvaluator::new(&cache, net.new_computation());
        evaluator.add(1, &vec![0.0f32; 1], vec![7]);
        evaluator.compute_blocking();
        assert_eq!(0.0, evaluator.p(0, 42));
    }
}
