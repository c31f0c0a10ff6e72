// Copyright 2017-2021 Sean Gillespie.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The search tree node: a position reached by one move from its parent, visited concurrently by
//! every playout worker.
//!
//! Nodes own their children outright (`RwLock<Vec<SearchNode>>`) rather than linking back to a
//! parent - descent walks down a borrowed-reference stack the caller keeps, never up a pointer
//! graph, so there is nothing to keep alive once a subtree is dropped. A `RwLock` rather than a
//! plain mutex lets concurrent selection take only read locks while descending; only
//! `create_children` (expansion) and the root-only maintenance operations ever need the write
//! side.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, Ordering};
use std::sync::RwLockReadGuard;
use std::sync::RwLock;

use rand::Rng;
use rand_distr::{Dirichlet, Distribution};

use crate::config::{ProportionalSelectionConfig, SearchConfig};
use crate::core::{Color, Move};
use crate::evaluator::BatchEvaluator;
use crate::history::BoardHistory;
use crate::movegen;
use crate::network;

/// A node's `visits`/`virtual_loss`/`white_evals` are updated by every playout worker touching it
/// concurrently, so they're plain atomics rather than fields behind a lock; `prior` is also atomic
/// since root noise and nothing else mutates it after creation. `children`/`has_children`/
/// `is_expanding` together implement single-writer expansion: a thread claims the right to expand
/// by winning a CAS on `is_expanding`, and publishes the result by setting `has_children` with
/// `Release` ordering, which every reader observes with `Acquire`.
pub struct SearchNode {
    mov: Move,
    prior: AtomicU32,
    /// The parent's evaluated value (this node's own side-to-move perspective) at the moment this
    /// node was created, used as the first-play-urgency baseline before this node has any visits
    /// of its own. Never mutated after construction.
    init_eval: f32,
    visits: AtomicU64,
    virtual_loss: AtomicI32,
    /// Sum of every backed-up evaluation so far, from White's point of view, as `f64` bits.
    /// Accumulated with a CAS loop since `AtomicU64` has no native float-add.
    white_evals: AtomicU64,
    children: RwLock<Vec<SearchNode>>,
    has_children: AtomicBool,
    is_expanding: AtomicBool,
    /// Root-only: a child demoted by the controller (e.g. once another child proves to be a
    /// forced win) is excluded from selection without being removed from the tree, so it can be
    /// reactivated later. Always `true` for non-root nodes.
    active: AtomicBool,
}

fn atomic_f64_add(cell: &AtomicU64, delta: f64) {
    let mut current = cell.load(Ordering::Relaxed);
    loop {
        let next = (f64::from_bits(current) + delta).to_bits();
        match cell.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Relaxed) {
            Ok(_) => return,
            Err(actual) => current = actual,
        }
    }
}

fn normalize_priors(priors: &mut [f32]) {
    if priors.is_empty() {
        return;
    }
    let sum: f32 = priors.iter().sum();
    if sum > 0.0 {
        for p in priors.iter_mut() {
            *p /= sum;
        }
    } else {
        let uniform = 1.0 / priors.len() as f32;
        priors.fill(uniform);
    }
}

/// Side-to-move-POV terminal value for the position at the end of `history`, or `None` if the
/// position isn't terminal and should be expanded instead. `legal_moves` is passed in rather than
/// recomputed, since every caller has already generated it to decide whether to call this at all.
pub fn terminal_value(history: &BoardHistory, legal_moves: &[Move]) -> Option<f32> {
    let pos = history.current();
    if legal_moves.is_empty() {
        return Some(if pos.is_check(pos.side_to_move()) {
            0.0
        } else {
            0.5
        });
    }
    if history.is_draw() {
        return Some(0.5);
    }
    None
}

fn better_rank(a: (u64, f32), b: (u64, f32)) -> bool {
    match a.0.cmp(&b.0) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => a.1 > b.1,
    }
}

impl SearchNode {
    pub fn new(mov: Move, prior: f32, init_eval: f32) -> SearchNode {
        SearchNode {
            mov,
            prior: AtomicU32::new(prior.to_bits()),
            init_eval,
            visits: AtomicU64::new(0),
            virtual_loss: AtomicI32::new(0),
            white_evals: AtomicU64::new(0.0f64.to_bits()),
            children: RwLock::new(Vec::new()),
            has_children: AtomicBool::new(false),
            is_expanding: AtomicBool::new(false),
            active: AtomicBool::new(true),
        }
    }

    /// A fresh root node, with no incoming move and no prior (nothing ever reads a root's own
    /// prior; `uct_select_child` only reads its children's).
    pub fn new_root(init_eval: f32) -> SearchNode {
        SearchNode::new(Move::null(), 1.0, init_eval)
    }

    pub fn mov(&self) -> Move {
        self.mov
    }

    pub fn prior(&self) -> f32 {
        f32::from_bits(self.prior.load(Ordering::Relaxed))
    }

    pub fn visits(&self) -> u64 {
        self.visits.load(Ordering::Relaxed)
    }

    pub fn has_children(&self) -> bool {
        self.has_children.load(Ordering::Acquire)
    }

    pub fn children(&self) -> RwLockReadGuard<'_, Vec<SearchNode>> {
        self.children.read().unwrap()
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Relaxed);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    fn init_eval_for(&self, color: Color) -> f32 {
        if color == Color::White {
            self.init_eval
        } else {
            1.0 - self.init_eval
        }
    }

    /// This node's current value from `color`'s point of view: the running average of every
    /// backed-up evaluation so far, with in-flight virtual losses counted against the side
    /// currently searching. Before this node has received any real visit (`visits + virtual_loss
    /// == 0`), falls back to [`Self::init_eval_for`].
    pub fn eval(&self, color: Color) -> f32 {
        let vl = self.virtual_loss.load(Ordering::Relaxed).max(0) as u64;
        let n = self.visits.load(Ordering::Relaxed) + vl;
        if n == 0 {
            return self.init_eval_for(color);
        }
        let white_evals = f64::from_bits(self.white_evals.load(Ordering::Relaxed));
        let w = if color == Color::Black {
            white_evals + vl as f64
        } else {
            white_evals
        };
        let score = (w / n as f64) as f32;
        if color == Color::White {
            score
        } else {
            1.0 - score
        }
    }

    /// Backs up one simulation's result. `eval_white_pov` is always in White's perspective,
    /// regardless of which side was to move in the position that produced it.
    pub fn update(&self, eval_white_pov: f32) {
        self.visits.fetch_add(1, Ordering::AcqRel);
        atomic_f64_add(&self.white_evals, eval_white_pov as f64);
    }

    pub fn virtual_loss_add(&self, amount: i32) {
        self.virtual_loss.fetch_add(amount, Ordering::AcqRel);
    }

    pub fn virtual_loss_undo(&self, amount: i32) {
        self.virtual_loss.fetch_sub(amount, Ordering::AcqRel);
    }

    /// PUCT selection among this node's children, from `color`'s point of view: `argmax Q +
    /// c_puct * P * sqrt(N) / (1 + n)`, where `N` is this node's total visit count (including
    /// in-flight virtual losses) and `n` is the candidate child's. Unvisited children use a
    /// first-play-urgency baseline (`parent eval - fpu_reduction * sqrt(visited policy mass)`)
    /// instead of their own `Q`, so an unvisited child with a strong prior can still be chosen
    /// over a visited one with a weak one; `skip_fpu_reduction` is set by the controller for the
    /// root immediately after Dirichlet noise was mixed in, so the reduction doesn't fight the
    /// noise's exploration push. Children demoted by [`Self::set_active`] are skipped entirely.
    /// Returns `None` for a childless or fully-inactive node.
    pub fn uct_select_child(
        &self,
        color: Color,
        config: &SearchConfig,
        skip_fpu_reduction: bool,
    ) -> Option<usize> {
        let children = self.children.read().unwrap();
        if children.is_empty() {
            return None;
        }

        let parent_n = self.visits.load(Ordering::Relaxed)
            + self.virtual_loss.load(Ordering::Relaxed).max(0) as u64;
        let sqrt_parent_n = (parent_n.max(1) as f32).sqrt();

        let visited_policy_mass: f32 = children
            .iter()
            .filter(|c| c.visits.load(Ordering::Relaxed) > 0)
            .map(SearchNode::prior)
            .sum();
        // Every child's `init_eval` was set to this node's own net value at the moment it was
        // expanded (see `create_children`), so any child - visited or not - reads it back.
        let parent_net_eval = children[0].init_eval_for(color);
        let parent_eval = if config.fpu_dynamic_eval {
            self.eval(color)
        } else {
            parent_net_eval
        };
        let fpu_reduction = if skip_fpu_reduction {
            0.0
        } else {
            config.fpu_reduction * visited_policy_mass.max(0.0).sqrt()
        };
        let fpu_eval = parent_eval - fpu_reduction;

        let mut best_index = None;
        let mut best_score = f32::NEG_INFINITY;
        for (i, child) in children.iter().enumerate() {
            if !child.is_active() {
                continue;
            }
            let n = child.visits.load(Ordering::Relaxed)
                + child.virtual_loss.load(Ordering::Relaxed).max(0) as u64;
            let q = if n == 0 { fpu_eval } else { child.eval(color) };
            let u = config.c_puct * child.prior() * sqrt_parent_n / (1.0 + n as f32);
            let score = q + u;
            if score > best_score {
                best_score = score;
                best_index = Some(i);
            }
        }
        best_index
    }

    /// Expands this (leaf) node: generates its legal moves, runs a single network evaluation of
    /// its position through `evaluator`, and populates [`Self::children`] with one child per
    /// legal move, priors rescaled to sum to 1. Only one caller ever wins the expansion race - a
    /// CAS on `is_expanding` - so on a lost race (another thread is expanding this node, or
    /// already has) this returns `None` and does nothing further; the caller should treat the
    /// simulation as if it had read this node's current [`Self::eval`] instead.
    ///
    /// Callers must have already established (via [`terminal_value`]) that this position is not
    /// terminal; `legal_moves` is assumed non-empty.
    pub fn create_children(
        &self,
        history: &BoardHistory,
        evaluator: &mut BatchEvaluator,
        _config: &SearchConfig,
    ) -> Option<f32> {
        if self
            .is_expanding
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            return None;
        }

        if self.has_children.load(Ordering::Acquire) {
            self.is_expanding.store(false, Ordering::Release);
            return None;
        }

        let pos = history.current();
        let color = pos.side_to_move();
        let legal_moves = movegen::generate_legal_moves(pos);
        debug_assert!(!legal_moves.is_empty(), "create_children called on a terminal position");

        let key = history.full_key();
        let planes = network::encode_planes(history);
        let move_ids: Vec<_> = legal_moves
            .iter()
            .map(|&m| network::MOVE_INDEX.lookup(m, color))
            .collect();
        evaluator.add(key, &planes, move_ids.clone());
        evaluator.compute_blocking();

        let sample = evaluator.len() - 1;
        let value_stm = evaluator.q(sample);

        let mut priors: Vec<f32> = move_ids.iter().map(|&id| evaluator.p(sample, id)).collect();
        normalize_priors(&mut priors);

        let mut children: Vec<SearchNode> = legal_moves
            .into_iter()
            .zip(priors.into_iter())
            .map(|(m, p)| SearchNode::new(m, p, value_stm))
            .collect();
        children.sort_by(|a, b| b.prior().total_cmp(&a.prior()));

        {
            let mut guard = self.children.write().unwrap();
            *guard = children;
        }
        self.has_children.store(true, Ordering::Release);
        self.is_expanding.store(false, Ordering::Release);

        Some(if color == Color::White {
            value_stm
        } else {
            1.0 - value_stm
        })
    }

    /// Mixes Dirichlet noise into this (root) node's children's priors in place:
    /// `p <- (1 - epsilon) * p + epsilon * eta`, `eta ~ Dir(alpha)`. A no-op on a childless root
    /// or one with fewer than two children (nothing to perturb the balance of).
    pub fn dirichlet_noise(&self, epsilon: f32, alpha: f32) {
        let children = self.children.write().unwrap();
        if children.len() < 2 {
            return;
        }
        let concentrations = vec![alpha as f64; children.len()];
        let dirichlet =
            Dirichlet::new(&concentrations).expect("dirichlet alpha parameters must be positive");
        let noise: Vec<f64> = dirichlet.sample(&mut rand::thread_rng());
        for (child, eta) in children.iter().zip(noise.into_iter()) {
            let mixed = (1.0 - epsilon) * child.prior() + epsilon * eta as f32;
            child.prior.store(mixed.to_bits(), Ordering::Relaxed);
        }
    }

    fn best_child_index(children: &[SearchNode], color: Color) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (i, child) in children.iter().enumerate() {
            if !child.is_active() {
                continue;
            }
            let key = (child.visits(), child.eval(color));
            best = match best {
                None => Some(i),
                Some(b) if better_rank(key, (children[b].visits(), children[b].eval(color))) => {
                    Some(i)
                }
                Some(b) => Some(b),
            };
        }
        best
    }

    /// Picks the move to report as this (root) node's choice. When proportional selection is
    /// disabled, or no child besides the most-visited one clears the `visit_floor`/`eval_maxdiff`
    /// eligibility bars, simply returns the most-visited active child. Otherwise samples among
    /// the eligible children with probability proportional to `visits^(1/tau)`, matching
    /// AlphaZero's temperature-based move selection for more varied (but still strong) play.
    pub fn randomize_first_proportionally(
        &self,
        color: Color,
        config: &ProportionalSelectionConfig,
    ) -> Option<usize> {
        let children = self.children.read().unwrap();
        let best = Self::best_child_index(&children, color)?;
        if !config.enabled {
            return Some(best);
        }

        let best_visits = children[best].visits() as f32;
        let best_eval = children[best].eval(color);
        let tau = config.tau.max(1e-6);

        let eligible: Vec<(usize, f32)> = children
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_active())
            .filter(|(_, c)| {
                let visits = c.visits() as f32;
                visits >= config.visit_floor * best_visits
                    && (best_eval - c.eval(color)).abs() <= config.eval_maxdiff
            })
            .map(|(i, c)| (i, c.visits().max(1) as f32))
            .map(|(i, visits)| (i, visits.powf(1.0 / tau)))
            .collect();

        let total: f32 = eligible.iter().map(|&(_, w)| w).sum();
        if eligible.is_empty() || total <= 0.0 {
            return Some(best);
        }

        let mut r = rand::thread_rng().gen_range(0.0..total);
        for &(i, w) in &eligible {
            if r < w {
                return Some(i);
            }
            r -= w;
        }
        eligible.last().map(|&(i, _)| i)
    }

    /// Sorts this (root) node's children in place, most-visited first (ties broken by `color`'s
    /// eval). Run once at the end of `think()` so PV/info reporting and UCI's `multipv`-less best
    /// move selection both see a stable, intuitive ordering.
    pub fn sort_root_children(&self, color: Color) {
        let mut children = self.children.write().unwrap();
        children.sort_by(|a, b| {
            b.visits()
                .cmp(&a.visits())
                .then_with(|| b.eval(color).total_cmp(&a.eval(color)))
        });
    }

    /// Total number of nodes in this subtree, including `self`.
    pub fn count(&self) -> u64 {
        let children = self.children.read().unwrap();
        1 + children.iter().map(SearchNode::count).sum::<u64>()
    }

    /// Detaches and returns the subtree of `self` rooted at the position in `new_history` whose
    /// full key matches `prev_root_full_key`, reusing however much of the previous search tree is
    /// still relevant after `new_history` advanced past the old root by zero or more moves.
    /// Returns `None` if no such position exists in `new_history` (the old tree shares no common
    /// ancestor with the new one - e.g. the game was reset, or the tree was discarded) or if a
    /// played move's destination isn't among `self`'s children (the position was never expanded
    /// that far), in which case the caller should build a fresh root instead.
    ///
    /// `new_history` stores positions, not moves, so the move connecting each consecutive pair of
    /// positions is recovered by generating `from`'s legal moves and finding the one whose result
    /// matches `to`'s zobrist hash.
    pub fn find_new_root(self, prev_root_full_key: u64, new_history: &BoardHistory) -> Option<SearchNode> {
        let positions = new_history.positions();
        let mut start = None;
        for idx in (0..positions.len()).rev() {
            let prefix = BoardHistory::from_positions(positions[..=idx].to_vec());
            if prefix.full_key() == prev_root_full_key {
                start = Some(idx);
                break;
            }
        }
        let start = start?;

        let mut current = self;
        for idx in start..positions.len().saturating_sub(1) {
            let from_pos = &positions[idx];
            let to_pos = &positions[idx + 1];
            let mov = movegen::generate_legal_moves(from_pos)
                .into_iter()
                .find(|&m| from_pos.clone_and_make_move(m).zobrist_hash() == to_pos.zobrist_hash())?;

            let mut children = current.children.into_inner().unwrap();
            let pos = children.iter().position(|c| c.mov == mov)?;
            current = children.swap_remove(pos);
        }

        Some(current)
    }

    /// The principal variation from this (root) node: the move to `self.best_child_index()`,
    /// then recursively the PV of that child, alternating `color` at each ply, up to `max_len`
    /// moves or until a childless (or fully inactive) node is reached.
    pub fn principal_variation(&self, color: Color, max_len: usize) -> Vec<Move> {
        if max_len == 0 {
            return Vec::new();
        }
        let children = self.children.read().unwrap();
        let idx = match Self::best_child_index(&children, color) {
            Some(idx) => idx,
            None => return Vec::new(),
        };
        let mut pv = Vec::with_capacity(max_len);
        pv.push(children[idx].mov());
        pv.extend(children[idx].principal_variation(color.toggle(), max_len - 1));
        pv
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::EvalCache;
    use crate::core::*;
    use crate::network::{Network, UniformNetwork};

    #[test]
    fn eval_falls_back_to_init_eval_before_any_visits() {
        let node = SearchNode::new(Move::null(), 1.0, 0.7);
        assert_eq!(0.7, node.eval(Color::White));
        assert_eq!(1.0 - 0.7, node.eval(Color::Black));
    }

    #[test]
    fn update_accumulates_in_white_pov() {
        let node = SearchNode::new(Move::null(), 1.0, 0.5);
        node.update(0.9);
        assert_eq!(0.9, node.eval(Color::White));
        assert!(node.eval(Color::Black) < 0.5);
    }

    #[test]
    fn virtual_loss_makes_a_node_look_worse_and_undo_restores_it() {
        let node = SearchNode::new(Move::null(), 1.0, 0.5);
        node.update(0.8);
        let before = node.eval(Color::White);
        node.virtual_loss_add(3);
        assert!(node.eval(Color::White) < before);
        node.virtual_loss_undo(3);
        assert_eq!(before, node.eval(Color::White));
    }

    #[test]
    fn uct_select_child_prefers_higher_prior_when_unvisited() {
        let parent = SearchNode::new_root(0.5);
        {
            let mut children = parent.children.write().unwrap();
            children.push(SearchNode::new(Move::quiet(E2, E4), 0.1, 0.5));
            children.push(SearchNode::new(Move::quiet(D2, D4), 0.9, 0.5));
        }
        let config = SearchConfig::default();
        let idx = parent
            .uct_select_child(Color::White, &config, false)
            .expect("root has children");
        assert_eq!(Move::quiet(D2, D4), parent.children()[idx].mov());
    }

    #[test]
    fn uct_select_child_skips_inactive_children() {
        let parent = SearchNode::new_root(0.5);
        {
            let mut children = parent.children.write().unwrap();
            children.push(SearchNode::new(Move::quiet(E2, E4), 0.9, 0.5));
            children.push(SearchNode::new(Move::quiet(D2, D4), 0.1, 0.5));
        }
        parent.children()[0].set_active(false);
        let config = SearchConfig::default();
        let idx = parent
            .uct_select_child(Color::White, &config, false)
            .expect("one active child remains");
        assert_eq!(Move::quiet(D2, D4), parent.children()[idx].mov());
    }

    #[test]
    fn create_children_expands_a_leaf_from_the_network() {
        let history = BoardHistory::from_start_position();
        let leaf = SearchNode::new_root(0.5);
        let cache = EvalCache::new(16);
        let net = UniformNetwork::new(0.5);
        let mut evaluator = BatchEvaluator::new(&cache, net.new_computation());
        let config = SearchConfig::default();

        let value = leaf.create_children(&history, &mut evaluator, &config);
        assert!(value.is_some());
        assert!(leaf.has_children());
        assert_eq!(20, leaf.children().len());
    }

    #[test]
    fn create_children_loses_the_race_against_a_prior_expansion() {
        let history = BoardHistory::from_start_position();
        let leaf = SearchNode::new_root(0.5);
        let cache = EvalCache::new(16);
        let net = UniformNetwork::new(0.5);
        let config = SearchConfig::default();

        let mut first = BatchEvaluator::new(&cache, net.new_computation());
        assert!(leaf.create_children(&history, &mut first, &config).is_some());

        let mut second = BatchEvaluator::new(&cache, net.new_computation());
        assert!(leaf.create_children(&history, &mut second, &config).is_none());
    }

    #[test]
    fn sort_root_children_orders_descending_by_visits() {
        let root = SearchNode::new_root(0.5);
        {
            let mut children = root.children.write().unwrap();
            let a = SearchNode::new(Move::quiet(E2, E4), 0.5, 0.5);
            a.update(0.5);
            let b = SearchNode::new(Move::quiet(D2, D4), 0.5, 0.5);
            b.update(0.5);
            b.update(0.5);
            children.push(a);
            children.push(b);
        }
        root.sort_root_children(Color::White);
        assert_eq!(Move::quiet(D2, D4), root.children()[0].mov());
    }

    #[test]
    fn dirichlet_noise_changes_priors_but_keeps_them_summing_to_one() {
        let root = SearchNode::new_root(0.5);
        {
            let mut children = root.children.write().unwrap();
            children.push(SearchNode::new(Move::quiet(E2, E4), 0.5, 0.5));
            children.push(SearchNode::new(Move::quiet(D2, D4), 0.5, 0.5));
        }
        root.dirichlet_noise(0.25, 0.3);
        let sum: f32 = root.children().iter().map(SearchNode::prior).sum();
        assert!((sum - 1.0).abs() < 1e-3);
    }

    #[test]
    fn terminal_value_scores_checkmate_as_a_loss_for_the_mated_side() {
        use crate::position::Position;
        let pos = Position::from_fen("r1bqkbnr/pppp1Qpp/2n5/4p3/2B1P3/8/PPPP1PPP/RNB1K1NR b KQkq - 0 3")
            .unwrap();
        let history = BoardHistory::new(pos);
        let legal_moves = movegen::generate_legal_moves(history.current());
        assert!(legal_moves.is_empty());
        assert_eq!(Some(0.0), terminal_value(&history, &legal_moves));
    }

    #[test]
    fn terminal_value_scores_stalemate_as_a_draw() {
        use crate::position::Position;
        let pos = Position::from_fen("7k/5Q2/6K1/8/8/8/8/8 b - - 0 1").unwrap();
        let history = BoardHistory::new(pos);
        let legal_moves = movegen::generate_legal_moves(history.current());
        assert!(legal_moves.is_empty());
        assert_eq!(Some(0.5), terminal_value(&history, &legal_moves));
    }

    #[test]
    fn find_new_root_walks_forward_through_a_played_move() {
        let mut history = BoardHistory::from_start_position();
        let root = SearchNode::new_root(0.5);
        {
            let mut children = root.children.write().unwrap();
            children.push(SearchNode::new(Move::quiet(E2, E4), 0.5, 0.5));
            children.push(SearchNode::new(Move::quiet(D2, D4), 0.5, 0.5));
        }
        let prev_key = history.full_key();
        history.do_move(Move::quiet(E2, E4));

        let new_root = root
            .find_new_root(prev_key, &history)
            .expect("the previous root's key is a prefix of the new history");
        assert_eq!(Move::quiet(E2, E4), new_root.mov());
    }

    #[test]
    fn principal_variation_follows_the_most_visited_child_at_each_ply() {
        let root = SearchNode::new_root(0.5);
        {
            let mut children = root.children.write().unwrap();
            let e4 = SearchNode::new(Move::quiet(E2, E4), 0.5, 0.5);
            e4.update(0.6);
            let reply = SearchNode::new(Move::quiet(E7, E5), 0.5, 0.5);
            reply.update(0.6);
            {
                let mut grandchildren = e4.children.write().unwrap();
                grandchildren.push(reply);
            }
            e4.has_children.store(true, Ordering::Relaxed);
            children.push(e4);
            children.push(SearchNode::new(Move::quiet(D2, D4), 0.5, 0.5));
        }
        let pv = root.principal_variation(Color::White, 5);
        assert_eq!(vec![Move::quiet(E2, E4), Move::quiet(E7, E5)], pv);
    }

    #[test]
    fn principal_variation_is_empty_for_a_childless_node() {
        let root = SearchNode::new_root(0.5);
        assert!(root.principal_variation(Color::White, 5).is_empty());
    }

    #[test]
    fn find_new_root_returns_none_for_an_unrelated_history() {
        let root = SearchNode::new_root(0.5);
        let unrelated = BoardHistory::new(
            crate::position::Position::from_fen("8/8/8/4k3/1N6/8/2K5/8 w - - 0 1").unwrap(),
        );
        assert!(root.find_new_root(0xDEAD_BEEF, &unrelated).is_none());
    }
}
