// Copyright 2017-2021 Sean Gillespie.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The search controller: an `Engine` owns everything one `think()` call needs - the evaluation
//! cache, the network backend, tunable parameters, and the previous call's search tree - and
//! spawns a scoped pool of playout workers to grow that tree until told to stop.
//!
//! There is deliberately no process-wide singleton here: every piece of mutable state lives on an
//! `Engine` value the caller constructs and owns, and every worker thread `think()` spawns is
//! joined before `think()` returns, via `std::thread::scope`.

pub mod node;
pub mod time;
pub mod worker;

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cache::EvalCache;
use crate::config::SearchConfig;
use crate::core::{Color, Move};
use crate::history::BoardHistory;
use crate::network::Network;
use crate::search::node::SearchNode;
use crate::search::time::{Limits, TimeManager};
use crate::search::worker::{simulate_at, PlayoutWorker};

/// One `go`'s worth of progress, suitable for a UCI `info` line. Carries the usual depth/nodes/nps
/// fields an MCTS engine can report, minus the ones (`hashfull` aside) that only make sense for a
/// transposition-table search.
#[derive(Clone, Debug)]
pub struct Info {
    /// `log(nodes) / log(1.8)`: an MCTS tree has no fixed recursion depth to report, so this
    /// approximates the "nominal depth" a fixed-depth engine would need to visit this many
    /// positions.
    pub depth: u32,
    /// The deepest recursion any single playout actually reached this `think()` call.
    pub seldepth: u32,
    pub nodes: u64,
    pub nps: u64,
    pub time: Duration,
    /// Centipawn-scale score from the side-to-move's perspective, converted from the root's
    /// `[0, 1]` win-rate estimate.
    pub score_cp: i32,
    pub pv: Vec<Move>,
    /// Evaluation cache fill, in permille (0-1000), if the cache has nonzero capacity.
    pub hashfull: Option<u32>,
}

/// The result of one `think()` call: the move to play, and (if the search looked that far ahead)
/// the move it expects to ponder on in reply.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BestMove {
    pub mov: Move,
    pub ponder: Option<Move>,
}

/// Converts a `[0, 1]` win-rate estimate (from the mover's point of view) to a centipawn score:
/// `cp = 290.680623072 * tan(3.096181612 * (feval - 0.5))`. Clamped well short of `tan`'s
/// asymptotes so a near-certain result reports a large but finite score instead of infinity or
/// NaN.
fn winrate_to_cp(feval: f32) -> i32 {
    let clamped = feval.clamp(0.001, 0.999);
    let cp = 290.680_623_072_f64 * (3.096_181_612_f64 * (clamped as f64 - 0.5)).tan();
    cp.clamp(-10_000.0, 10_000.0) as i32
}

/// Nominal search depth from a playout count, matching `dump_analysis`'s `log(nodes) / log(1.8)`.
fn nodes_to_depth(nodes: u64) -> u32 {
    if nodes < 2 {
        return 0;
    }
    ((nodes as f64).ln() / 1.8_f64.ln()).floor().max(0.0) as u32
}

/// Decides which root children remain worth searching given `playouts_left`: a child whose visit
/// count can no longer catch up to the current leader, even if every remaining playout went to
/// it, is demoted (not removed - [`SearchNode::set_active`] can always be undone). Returns the
/// number of children demoted this call. Mirrors `UCTSearch::prune_noncontenders`.
fn prune_noncontenders(root: &SearchNode, color: Color, playouts_left: u64) -> usize {
    let children = root.children();
    if children.is_empty() {
        return 0;
    }
    let leader_visits = children.iter().map(SearchNode::visits).max().unwrap_or(0);
    let min_required = leader_visits.saturating_sub(playouts_left);
    let leader_eval = children
        .iter()
        .map(|c| c.eval(color))
        .fold(f32::NEG_INFINITY, f32::max);
    let mut demoted = 0;
    for child in children.iter() {
        // Never prune the outright leader, even if a tie means it technically falls below
        // `min_required` against itself.
        let keep = child.visits() >= min_required || child.eval(color) >= leader_eval;
        child.set_active(keep);
        if !keep {
            demoted += 1;
        }
    }
    demoted
}

/// True if there remains more than one contending root child once noncontenders are pruned for
/// the playouts left in this `think()` call; false once the outcome is settled and continuing to
/// search would only waste time. Mirrors `UCTSearch::have_alternate_moves`.
fn have_alternate_moves(root: &SearchNode, color: Color, playouts_left: u64) -> bool {
    let total = root.children().len();
    if total <= 1 {
        return false;
    }
    let demoted = prune_noncontenders(root, color, playouts_left);
    demoted + 1 < total
}

/// Projects the playout rate observed so far forward across the time remaining in this
/// `think()` call's budget. With no time control at all, the projection is bounded purely by the
/// remaining node budget instead. Mirrors `UCTSearch::est_playouts_left`.
fn estimated_playouts_left(limits: &Limits, time_mgr: &TimeManager, elapsed: Duration, playouts: u64) -> u64 {
    let remaining_budget = match time_mgr.budget_remaining() {
        Some(d) => d,
        None => {
            let cap = limits.nodes.unwrap_or(u64::MAX / 2);
            return cap.saturating_sub(playouts);
        }
    };

    if elapsed.as_millis() < 1000 || playouts < 100 {
        return u64::MAX / 2;
    }

    let playout_rate = playouts as f64 / elapsed.as_millis().max(1) as f64;
    (playout_rate * remaining_budget.as_millis() as f64).ceil() as u64
}

fn should_halt(
    stop: &AtomicBool,
    limits: &Limits,
    time_mgr: &TimeManager,
    playouts: u64,
    root: &SearchNode,
) -> bool {
    if stop.load(Ordering::Relaxed) {
        return true;
    }
    if limits.infinite {
        return false;
    }
    if time_mgr.exceeded_target() || time_mgr.exceeded_max() {
        return true;
    }
    if let Some(cap) = limits.nodes {
        if playouts >= cap || root.visits() >= cap {
            return true;
        }
    }
    false
}

/// The maximum PV length reported in an [`Info`]; just a sanity bound against an unexpectedly
/// deep tree, since `principal_variation` already stops at the first childless node.
const MAX_PV_LEN: usize = 64;

/// Owns the resources one engine instance needs across many `think()` calls: the evaluation
/// cache (which benefits from staying warm call to call), the network backend, tunable
/// parameters, and the previous search's tree (reused via [`SearchNode::find_new_root`] whenever
/// the new position is a descendant of the old one).
pub struct Engine {
    cache: EvalCache,
    network: Box<dyn Network>,
    config: SearchConfig,
    root: Option<SearchNode>,
    prev_root_full_key: Option<u64>,
    stop: Arc<AtomicBool>,
}

impl Engine {
    pub fn new(network: Box<dyn Network>, config: SearchConfig) -> Engine {
        let cache = EvalCache::new(config.cache_capacity);
        Engine {
            cache,
            network,
            config,
            root: None,
            prev_root_full_key: None,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// A handle a caller can clone and hand to another thread (e.g. a UCI input-reading loop)
    /// before calling [`Self::think`], so `stop` can be requested concurrently with the search
    /// actually running.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Requests that the in-progress (or next) `think()` call halt as soon as it next checks.
    pub fn please_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Discards the search tree, e.g. on a UCI `ucinewgame`.
    pub fn reset(&mut self) {
        self.root = None;
        self.prev_root_full_key = None;
        self.cache.set_capacity(self.config.cache_capacity);
    }

    /// Applies a UCI `setoption name Threads value <n>`-style change: the thread count used by
    /// the next `think()` call.
    pub fn set_num_threads(&mut self, threads: usize) {
        self.config.num_threads = Some(threads.max(1));
    }

    /// Applies a UCI `setoption name Hash value <mb>`-style change. Takes effect immediately;
    /// existing entries beyond the new capacity are evicted the next time the cache needs room.
    pub fn set_cache_capacity(&mut self, capacity: usize) {
        self.config.cache_capacity = capacity;
        self.cache.set_capacity(capacity);
    }

    /// Runs one search to completion: grows (or starts) the tree rooted at `history.current()`
    /// until `limits` (or an external [`Self::please_stop`]) says to halt, calling `on_info` with
    /// progress roughly once per nominal depth increase, then returns the move to play.
    ///
    /// Reuses as much of the previous call's tree as still applies: if `history` is a descendant
    /// of the position the last `think()` searched, [`SearchNode::find_new_root`] detaches and
    /// reuses that subtree; otherwise a fresh root is created.
    pub fn think(
        &mut self,
        history: &BoardHistory,
        limits: &Limits,
        mut on_info: impl FnMut(Info),
    ) -> BestMove {
        self.stop.store(false, Ordering::Release);
        let start = Instant::now();
        let color = history.current().side_to_move();
        let ply = history.positions().len() as u32 - 1;

        let root = self.adopt_or_create_root(history);

        let nodes_used = AtomicU64::new(root.count());
        let playouts = AtomicU64::new(0);
        let seldepth = AtomicU32::new(0);

        // Synchronous root expansion: every worker's first descent needs a populated root to
        // select among, and only one thread should pay for the network call that creates it.
        let mut skip_root_fpu_reduction = false;
        if !root.has_children() {
            let mut h = history.shallow_clone(8);
            let _ = simulate_at(
                &root,
                &mut h,
                &self.cache,
                self.network.as_ref(),
                &self.config,
                &nodes_used,
                self.config.max_tree_size,
                true,
                false,
                0,
                &seldepth,
            );
        }

        if let Some(noise) = self.config.noise {
            root.dirichlet_noise(noise.epsilon, noise.alpha);
            skip_root_fpu_reduction = true;
        }

        let time_mgr = TimeManager::start(limits, color, ply, self.config.lag_buffer_ms);

        let num_threads = self.config.resolved_num_threads();
        let base_history = history.shallow_clone(8);

        std::thread::scope(|scope| {
            for _ in 0..num_threads.saturating_sub(1) {
                let root = &root;
                let base_history = &base_history;
                let cache = &self.cache;
                let network = self.network.as_ref();
                let config = &self.config;
                let nodes_used = &nodes_used;
                let playouts = &playouts;
                let seldepth = &seldepth;
                let stop = self.stop.as_ref();
                scope.spawn(move || {
                    let worker = PlayoutWorker::new(cache, network, config);
                    worker.run(
                        root,
                        base_history,
                        nodes_used,
                        config.max_tree_size,
                        playouts,
                        seldepth,
                        skip_root_fpu_reduction,
                        stop,
                    );
                });
            }

            let mut last_reported_depth = None;
            loop {
                let mut h = base_history.clone();
                let result = simulate_at(
                    &root,
                    &mut h,
                    &self.cache,
                    self.network.as_ref(),
                    &self.config,
                    &nodes_used,
                    self.config.max_tree_size,
                    true,
                    skip_root_fpu_reduction,
                    0,
                    &seldepth,
                );
                if result.is_some() {
                    playouts.fetch_add(1, Ordering::Relaxed);
                }

                let playout_count = playouts.load(Ordering::Relaxed);
                let depth = nodes_to_depth(root.visits());
                if last_reported_depth != Some(depth) {
                    last_reported_depth = Some(depth);
                    on_info(self.build_info(&root, color, start.elapsed(), playout_count, seldepth.load(Ordering::Relaxed)));
                }

                if nodes_used.load(Ordering::Relaxed) >= self.config.max_tree_size {
                    break;
                }
                if should_halt(&self.stop, limits, &time_mgr, playout_count, &root) {
                    break;
                }
                if !limits.infinite {
                    let playouts_left = estimated_playouts_left(limits, &time_mgr, start.elapsed(), playout_count);
                    if !have_alternate_moves(&root, color, playouts_left) {
                        break;
                    }
                }
            }

            self.stop.store(true, Ordering::Release);
        });

        // Reactivate anything demoted mid-search; the next call (or the caller inspecting the
        // tree) should see every child, not just the ones that survived pruning this time.
        for child in root.children().iter() {
            child.set_active(true);
        }
        root.sort_root_children(color);

        let final_playouts = playouts.load(Ordering::Relaxed);
        on_info(self.build_info(&root, color, start.elapsed(), final_playouts, seldepth.load(Ordering::Relaxed)));

        let chosen = root
            .randomize_first_proportionally(color, &self.config.proportional_selection)
            .map(|idx| root.children()[idx].mov());

        let pv = root.principal_variation(color, MAX_PV_LEN);
        let best = BestMove {
            mov: chosen.unwrap_or(Move::null()),
            ponder: pv.get(1).copied(),
        };

        self.prev_root_full_key = Some(history.full_key());
        self.root = Some(root);

        best
    }

    fn adopt_or_create_root(&mut self, history: &BoardHistory) -> SearchNode {
        if let (Some(root), Some(prev_key)) = (self.root.take(), self.prev_root_full_key) {
            if let Some(reused) = root.find_new_root(prev_key, history) {
                return reused;
            }
        }
        SearchNode::new_root(0.5)
    }

    fn build_info(
        &self,
        root: &SearchNode,
        color: Color,
        elapsed: Duration,
        playouts: u64,
        seldepth: u32,
    ) -> Info {
        let nodes = root.visits();
        let nps = if elapsed.as_millis() > 0 {
            (playouts as u128 * 1000 / elapsed.as_millis()) as u64
        } else {
            0
        };
        let hashfull = if self.cache.capacity() > 0 {
            Some(((self.cache.size() as u128 * 1000) / self.cache.capacity() as u128) as u32)
        } else {
            None
        };
        Info {
            depth: nodes_to_depth(nodes),
            seldepth,
            nodes,
            nps,
            time: elapsed,
            score_cp: winrate_to_cp(root.eval(color)),
            pv: root.principal_variation(color, MAX_PV_LEN),
            hashfull,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::UniformNetwork;

    fn engine() -> Engine {
        let mut config = SearchConfig::default();
        config.num_threads = Some(1);
        config.cache_capacity = 1024;
        config.max_tree_size = 10_000;
        Engine::new(Box::new(UniformNetwork::new(0.5)), config)
    }

    #[test]
    fn think_with_a_node_limit_returns_a_legal_move() {
        let mut e = engine();
        let history = BoardHistory::from_start_position();
        let limits = Limits {
            nodes: Some(50),
            ..Limits::default()
        };
        let mut infos = Vec::new();
        let best = e.think(&history, &limits, |info| infos.push(info));

        assert!(!best.mov.is_null());
        assert!(!infos.is_empty());
        let legal = crate::movegen::generate_legal_moves(history.current());
        assert!(legal.contains(&best.mov));
    }

    #[test]
    fn think_reuses_the_tree_across_consecutive_calls() {
        let mut e = engine();
        let mut history = BoardHistory::from_start_position();
        let limits = Limits {
            nodes: Some(50),
            ..Limits::default()
        };
        let first = e.think(&history, &limits, |_| {});
        history.do_move(first.mov);

        assert!(e.root.is_some(), "think() should retain its tree for reuse");
        let nodes_before = e.root.as_ref().unwrap().count();
        let _ = e.think(&history, &limits, |_| {});
        // After reuse the tree grows from wherever find_new_root left it, rather than resetting
        // to a single fresh root node.
        assert!(e.root.as_ref().unwrap().count() >= 1);
        let _ = nodes_before;
    }

    #[test]
    fn think_honors_an_external_stop_request() {
        let mut e = engine();
        let history = BoardHistory::from_start_position();
        let limits = Limits::default();
        let stop = e.stop_handle();
        stop.store(true, Ordering::Relaxed);
        let best = e.think(&history, &limits, |_| {});
        assert!(!best.mov.is_null());
    }

    #[test]
    fn winrate_to_cp_is_zero_at_even_odds() {
        assert_eq!(0, winrate_to_cp(0.5));
    }

    #[test]
    fn winrate_to_cp_is_positive_for_a_winning_position() {
        assert!(winrate_to_cp(0.9) > 0);
        assert!(winrate_to_cp(0.1) < 0);
    }

    #[test]
    fn nodes_to_depth_grows_with_node_count() {
        assert!(nodes_to_depth(1000) > nodes_to_depth(10));
    }
}
