// Copyright 2017-2021 Sean Gillespie.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Search limits and the dynamic time manager that turns them into a target/max budget for one
//! `think()` call.

use std::time::{Duration, Instant};

use crate::core::Color;

/// One side's remaining clock, in a `[Color; 2]`-shaped pair.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct PerColor<T> {
    pub white: T,
    pub black: T,
}

impl<T: Copy> PerColor<T> {
    pub fn of(&self, color: Color) -> T {
        match color {
            Color::White => self.white,
            Color::Black => self.black,
        }
    }
}

/// Search limits as handed down from a UCI `go` command (or an equivalent front-end call). `depth`
/// is accepted but not enforced, matching the UCI spec's own reserved-but-unused option.
#[derive(Copy, Clone, Debug, Default)]
pub struct Limits {
    /// Cap on the number of completed playouts. `None` for no cap.
    pub nodes: Option<u64>,
    /// Remaining time for each side, in milliseconds.
    pub time: PerColor<Option<u32>>,
    /// Increment per move for each side, in milliseconds.
    pub inc: PerColor<u32>,
    /// Moves remaining until the next time control; `0` (or unset) means sudden death.
    pub movestogo: Option<u32>,
    /// Fixed milliseconds to spend on this move, overriding dynamic time management entirely.
    pub movetime: Option<u32>,
    /// Reserved; not enforced by the search.
    pub depth: Option<u32>,
    /// Run until `please_stop()`, ignoring every other bound.
    pub infinite: bool,
}

/// How many hypothetical moves-to-go to evaluate when `movestogo` isn't given by the caller:
/// `h ∈ [1, min(given_or_50, 50)]`.
const MAX_HYPOTHETICAL_MOVESTOGO: u32 = 50;

const MAX_RATIO_T_MAX: f64 = 7.3;
const MAX_RATIO_STEAL: f64 = 0.34;

fn move_importance(ply: f64) -> f64 {
    (1.0 + ((ply - 64.5) / 6.85).exp()).powf(-0.171)
}

/// One hypothesis's contribution to the optimum/max ratio sums: `Σ_{i≥1} importance(ply + 2i)`
/// out to the hypothesis's own horizon `h`.
fn importance_sum(ply: u32, h: u32) -> f64 {
    (1..h)
        .map(|i| move_importance((ply + 2 * i) as f64))
        .sum()
}

/// `ratio(t_max_coef, steal_coef, this_move, other_moves) = min(t_max_coef*m/(m+Σ), (m +
/// steal_coef*Σ)/(m+Σ))`. With `(1, 0)` both terms collapse to the same value - the optimum
/// ratio; with `(7.3, 0.34)` they diverge - the max ratio, which may "steal" time from future
/// moves up to `T_max` as long as it doesn't exceed the steal-adjusted share.
fn ratio(t_max_coef: f64, steal_coef: f64, this_move: f64, other_moves: f64) -> f64 {
    let total = this_move + other_moves;
    let r1 = t_max_coef * this_move / total;
    let r2 = (this_move + steal_coef * other_moves) / total;
    r1.min(r2)
}

fn optimum_ratio(ply: u32, h: u32) -> f64 {
    ratio(1.0, 0.0, move_importance(ply as f64), importance_sum(ply, h))
}

fn max_ratio(ply: u32, h: u32) -> f64 {
    ratio(
        MAX_RATIO_T_MAX,
        MAX_RATIO_STEAL,
        move_importance(ply as f64),
        importance_sum(ply, h),
    )
}

/// Computes the target/max time budget (in milliseconds) for one `think()` call, per the
/// specification's §4.7 formulas. `ply` counts half-moves from the game's start.
fn dynamic_budget_ms(limits: &Limits, us: Color, ply: u32) -> (f64, f64) {
    let time = limits.time.of(us).unwrap_or(0) as f64;
    let inc = limits.inc.of(us) as f64;
    let horizon = limits
        .movestogo
        .filter(|&m| m > 0)
        .unwrap_or(MAX_HYPOTHETICAL_MOVESTOGO)
        .min(MAX_HYPOTHETICAL_MOVESTOGO);

    let mut target = f64::INFINITY;
    let mut max = f64::INFINITY;
    for h in 1..=horizon.max(1) {
        let hyp = (time + inc * (h - 1) as f64 - 30.0 * (2 + h.min(40)) as f64).max(0.0);
        target = target.min(optimum_ratio(ply, h) * hyp);
        max = max.min(max_ratio(ply, h) * hyp);
    }

    (target, max)
}

/// Turns a [`Limits`] into a concrete target/max budget and tracks elapsed wall-clock time for
/// one `think()` call.
pub struct TimeManager {
    start: Instant,
    movetime: Option<Duration>,
    target: Option<Duration>,
    max: Option<Duration>,
    infinite: bool,
}

impl TimeManager {
    /// Starts the clock and computes the budget for a search beginning at ply `ply`, for the side
    /// `us`, under `limits`. `lag_buffer_ms` is subtracted from both `target` and `max` to reserve
    /// slack against scheduling jitter and the time it takes to actually emit the chosen move.
    pub fn start(limits: &Limits, us: Color, ply: u32, lag_buffer_ms: u32) -> TimeManager {
        let start = Instant::now();

        if limits.infinite {
            return TimeManager {
                start,
                movetime: None,
                target: None,
                max: None,
                infinite: true,
            };
        }

        if let Some(movetime) = limits.movetime {
            let ms = movetime.saturating_sub(lag_buffer_ms).max(1);
            return TimeManager {
                start,
                movetime: Some(Duration::from_millis(ms as u64)),
                target: None,
                max: None,
                infinite: false,
            };
        }

        if limits.time.of(us).is_none() {
            // No clock at all and no movetime: treat as infinite, bounded only by the node cap
            // the controller applies separately.
            return TimeManager {
                start,
                movetime: None,
                target: None,
                max: None,
                infinite: true,
            };
        }

        let (target, max) = dynamic_budget_ms(limits, us, ply);
        let reduce = |ms: f64| Duration::from_millis((ms - lag_buffer_ms as f64).max(0.0) as u64);
        TimeManager {
            start,
            movetime: None,
            target: Some(reduce(target)),
            max: Some(reduce(max)),
            infinite: false,
        }
    }

    /// A `TimeManager` with no bound at all: useful for the controller's synchronous root
    /// expansion, which runs a single evaluation regardless of the time budget.
    pub fn infinite() -> TimeManager {
        TimeManager {
            start: Instant::now(),
            movetime: None,
            target: None,
            max: None,
            infinite: true,
        }
    }

    pub fn elapsed(&self) -> Duration {
        Instant::now().saturating_duration_since(self.start)
    }

    /// True once the elapsed time has passed the *target* budget - the soft bound that the
    /// controller's `have_alternate_moves` / early-exit logic consults. For a `movetime` or
    /// infinite search, always false (those are governed by [`Self::exceeded_max`] or an external
    /// stop only).
    pub fn exceeded_target(&self) -> bool {
        match self.target {
            Some(target) => self.elapsed() >= target,
            None => false,
        }
    }

    /// True once the elapsed time has passed the hard bound: `movetime` if set, else the dynamic
    /// `max`. Always false for an infinite search.
    pub fn exceeded_max(&self) -> bool {
        if self.infinite {
            return false;
        }
        if let Some(movetime) = self.movetime {
            return self.elapsed() >= movetime;
        }
        match self.max {
            Some(max) => self.elapsed() >= max,
            None => false,
        }
    }

    pub fn is_infinite(&self) -> bool {
        self.infinite
    }

    /// Time left in this search's hard budget (`movetime` if set, else the dynamic `max`), or
    /// `None` if the search has no time bound at all. Used to project a playout rate forward into
    /// an estimate of how many more playouts will complete before the budget runs out.
    pub fn budget_remaining(&self) -> Option<Duration> {
        if self.infinite {
            return None;
        }
        let bound = self.movetime.or(self.max)?;
        Some(bound.saturating_sub(self.elapsed()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn movetime_is_a_hard_cap_with_no_soft_target() {
        let limits = Limits {
            movetime: Some(1000),
            ..Limits::default()
        };
        let tm = TimeManager::start(&limits, Color::White, 0, 0);
        assert!(!tm.exceeded_target());
        assert!(!tm.exceeded_max());
        assert!(!tm.is_infinite());
    }

    #[test]
    fn infinite_search_never_reports_exceeded() {
        let limits = Limits {
            infinite: true,
            ..Limits::default()
        };
        let tm = TimeManager::start(&limits, Color::White, 0, 100);
        assert!(tm.is_infinite());
        assert!(!tm.exceeded_max());
        assert!(!tm.exceeded_target());
    }

    #[test]
    fn no_clock_and_no_movetime_is_treated_as_infinite() {
        let limits = Limits::default();
        let tm = TimeManager::start(&limits, Color::White, 10, 100);
        assert!(tm.is_infinite());
    }

    #[test]
    fn dynamic_budget_grows_with_more_remaining_time() {
        let mut limits = Limits::default();
        limits.time.white = Some(10_000);
        limits.time.black = Some(10_000);
        let (short_target, _) = dynamic_budget_ms(&limits, Color::White, 0);

        limits.time.white = Some(60_000);
        let (long_target, _) = dynamic_budget_ms(&limits, Color::White, 0);

        assert!(long_target > short_target);
    }

    #[test]
    fn budget_remaining_is_none_when_infinite() {
        let limits = Limits {
            infinite: true,
            ..Limits::default()
        };
        let tm = TimeManager::start(&limits, Color::White, 0, 0);
        assert_eq!(None, tm.budget_remaining());
    }

    #[test]
    fn budget_remaining_tracks_movetime() {
        let limits = Limits {
            movetime: Some(1000),
            ..Limits::default()
        };
        let tm = TimeManager::start(&limits, Color::White, 0, 0);
        assert!(tm.budget_remaining().unwrap() <= Duration::from_millis(1000));
    }

    #[test]
    fn move_importance_is_always_positive() {
        for ply in [0u32, 1, 40, 64, 65, 200] {
            assert!(move_importance(ply as f64) > 0.0);
        }
    }
}
