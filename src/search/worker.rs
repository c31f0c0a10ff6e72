// Copyright 2017-2021 Sean Gillespie.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The playout worker: one selection/expansion/back-propagation cycle per simulation, run in a
//! loop by every thread the controller spawns for a `think()` call.
//!
//! Descent is implemented as plain recursion rather than an explicit stack: each stack frame
//! holds exactly one node's read lock on its children for exactly as long as it needs a borrowed
//! reference to the selected child, which is the natural Rust shape of "own children strongly, no
//! parent pointers, descend via a stack of borrowed references" - the frames of the call stack
//! are that stack.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use crate::cache::EvalCache;
use crate::config::SearchConfig;
use crate::core::Color;
use crate::evaluator::BatchEvaluator;
use crate::history::BoardHistory;
use crate::movegen;
use crate::network::Network;
use crate::search::node::{terminal_value, SearchNode};

/// One selection/expansion/back-propagation cycle, descending from `node` at recursion depth
/// `depth` (0 at the root). `seldepth` records the deepest `depth` any simulation has reached
/// since the controller reset it, via `fetch_max`, so `think()` can report it alongside the
/// average (playout-derived) depth.
///
/// `pub(crate)` rather than private: the controller's main thread runs simulations directly
/// (interleaved with its own halt checks and info reporting) rather than going through
/// [`PlayoutWorker::run`]'s background loop.
#[allow(clippy::too_many_arguments)]
pub(crate) fn simulate_at(
    node: &SearchNode,
    history: &mut BoardHistory,
    cache: &EvalCache,
    network: &dyn Network,
    config: &SearchConfig,
    nodes_used: &AtomicU64,
    max_tree_size: u64,
    is_root: bool,
    skip_root_fpu_reduction: bool,
    depth: u32,
    seldepth: &AtomicU32,
) -> Option<f32> {
    seldepth.fetch_max(depth, Ordering::Relaxed);

    if !node.has_children() {
        let legal_moves = movegen::generate_legal_moves(history.current());
        let color = history.current().side_to_move();

        if let Some(stm_value) = terminal_value(history, &legal_moves) {
            let white_value = if color == Color::White {
                stm_value
            } else {
                1.0 - stm_value
            };
            node.update(white_value);
            return Some(white_value);
        }

        if nodes_used.load(Ordering::Relaxed) >= max_tree_size {
            // TreeSizeExceeded: silently stop expanding; this simulation yields no result.
            return None;
        }

        let computation = network.new_computation();
        let mut evaluator = BatchEvaluator::new(cache, computation);
        return match node.create_children(history, &mut evaluator, config) {
            Some(white_value) => {
                nodes_used.fetch_add(node.children().len() as u64, Ordering::Relaxed);
                node.update(white_value);
                Some(white_value)
            }
            // ExpansionLostRace: another thread is expanding (or already expanded) this node.
            None => None,
        };
    }

    node.virtual_loss_add(config.virtual_loss_count);
    let idx = match node.uct_select_child(
        color_to_move(history),
        config,
        is_root && skip_root_fpu_reduction,
    ) {
        Some(idx) => idx,
        None => {
            // Every child is pruned (root-only); nothing to descend into.
            node.virtual_loss_undo(config.virtual_loss_count);
            return None;
        }
    };

    let guard = node.children();
    history.do_move(guard[idx].mov());
    let child = &guard[idx];
    let result = simulate_at(
        child,
        history,
        cache,
        network,
        config,
        nodes_used,
        max_tree_size,
        false,
        skip_root_fpu_reduction,
        depth + 1,
        seldepth,
    );
    drop(guard);

    node.virtual_loss_undo(config.virtual_loss_count);
    if let Some(white_value) = result {
        node.update(white_value);
    }
    result
}

fn color_to_move(history: &BoardHistory) -> Color {
    history.current().side_to_move()
}

/// Runs playouts against a shared root until told to stop. Holds only borrowed references to the
/// resources every simulation needs (cache, network, config); the tree itself and the playout
/// counters live on the caller's side so many `PlayoutWorker`s can share them.
pub struct PlayoutWorker<'a> {
    cache: &'a EvalCache,
    network: &'a dyn Network,
    config: &'a SearchConfig,
}

impl<'a> PlayoutWorker<'a> {
    pub fn new(
        cache: &'a EvalCache,
        network: &'a dyn Network,
        config: &'a SearchConfig,
    ) -> PlayoutWorker<'a> {
        PlayoutWorker {
            cache,
            network,
            config,
        }
    }

    /// Loops `while !stop.load(..)`, running one simulation per iteration against `root`.
    /// `base_history` is never mutated; each simulation clones its last 8 positions (all the
    /// network's input encoding ever needs) and plays moves forward from there. Every simulation
    /// that yields a result increments `playouts`; `nodes_used` is updated by successful
    /// expansions so the controller (and other workers) can observe the tree approaching
    /// `max_tree_size`; `seldepth` records the deepest recursion any simulation reached.
    #[allow(clippy::too_many_arguments)]
    pub fn run(
        &self,
        root: &SearchNode,
        base_history: &BoardHistory,
        nodes_used: &AtomicU64,
        max_tree_size: u64,
        playouts: &AtomicU64,
        seldepth: &AtomicU32,
        skip_root_fpu_reduction: bool,
        stop: &AtomicBool,
    ) {
        while !stop.load(Ordering::Relaxed) {
            let mut history = base_history.shallow_clone(8);
            let result = simulate_at(
                root,
                &mut history,
                self.cache,
                self.network,
                self.config,
                nodes_used,
                max_tree_size,
                true,
                skip_root_fpu_reduction,
                0,
                seldepth,
            );
            if result.is_some() {
                playouts.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::UniformNetwork;

    #[test]
    fn single_simulation_from_an_unexpanded_root_visits_it_once() {
        let history = BoardHistory::from_start_position();
        let root = SearchNode::new_root(0.5);
        let cache = EvalCache::new(64);
        let net = UniformNetwork::new(0.5);
        let config = SearchConfig::default();
        let nodes_used = AtomicU64::new(1);
        let seldepth = AtomicU32::new(0);

        let mut h = history.shallow_clone(8);
        let result = simulate_at(
            &root, &mut h, &cache, &net, &config, &nodes_used, 1000, true, false, 0, &seldepth,
        );

        assert!(result.is_some());
        assert_eq!(1, root.visits());
        assert!(root.has_children());
        assert_eq!(20, root.children().len());
        assert_eq!(0, seldepth.load(Ordering::Relaxed));
    }

    #[test]
    fn simulation_against_a_checkmate_position_scores_a_white_win() {
        use crate::position::Position;
        let pos = Position::from_fen(
            "r1bqkbnr/pppp1Qpp/2n5/4p3/2B1P3/8/PPPP1PPP/RNB1K1NR b KQkq - 0 3",
        )
        .unwrap();
        let history = BoardHistory::new(pos);
        let root = SearchNode::new_root(0.5);
        let cache = EvalCache::new(64);
        let net = UniformNetwork::new(0.5);
        let config = SearchConfig::default();
        let nodes_used = AtomicU64::new(1);
        let seldepth = AtomicU32::new(0);

        let mut h = history.shallow_clone(8);
        let result = simulate_at(
            &root, &mut h, &cache, &net, &config, &nodes_used, 1000, true, false, 0, &seldepth,
        );

        assert_eq!(Some(1.0), result);
        assert!(!root.has_children());
    }

    #[test]
    fn worker_run_stops_promptly_once_the_flag_is_set() {
        let history = BoardHistory::from_start_position();
        let root = SearchNode::new_root(0.5);
        let cache = EvalCache::new(64);
        let net = UniformNetwork::new(0.5);
        let config = SearchConfig::default();
        let nodes_used = AtomicU64::new(1);
        let playouts = AtomicU64::new(0);
        let seldepth = AtomicU32::new(0);
        let stop = AtomicBool::new(true);

        let worker = PlayoutWorker::new(&cache, &net, &config);
        worker.run(
            &root, &history, &nodes_used, 1000, &playouts, &seldepth, false, &stop,
        );

        assert_eq!(0, playouts.load(Ordering::Relaxed));
    }
}
