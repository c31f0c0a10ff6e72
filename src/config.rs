// Copyright 2017-2021 Sean Gillespie.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Tunable parameters for the search, gathered into one `serde`-deserializable struct rather than
//! a set of `cfg_*` globals set once at startup by `UCIOption`-style handlers. `SearchConfig` is
//! built with [`Default`] and threaded explicitly through [`crate::search::Engine`]; nothing here
//! is a process-wide global.

use serde::{Deserialize, Serialize};

/// Exploration constant in the PUCT formula `Q + c_puct * P * sqrt(N) / (1 + n)`.
pub const DEFAULT_C_PUCT: f32 = 0.85;

/// Scales the `sqrt(total_visited_policy)` subtracted from a parent's eval to produce the
/// first-play-urgency baseline for its unvisited children; see
/// [`crate::search::node::SearchNode::uct_select_child`].
pub const DEFAULT_FPU_REDUCTION: f32 = 0.25;

/// In-flight-visit penalty added to a node on descent and removed on back-propagation.
pub const VIRTUAL_LOSS_COUNT: i32 = 3;

/// Hard cap on the number of expanded nodes a single search tree may hold, scaled for a
/// single-process engine rather than a long-running self-play worker.
pub const DEFAULT_MAX_TREE_SIZE: u64 = 4_000_000;

/// Default capacity (in entries) of the evaluation cache.
pub const DEFAULT_CACHE_CAPACITY: usize = 2_000_000;

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NoiseConfig {
    /// Dirichlet noise mixing weight applied to root priors: `p <- (1 - epsilon) * p + epsilon * eta`.
    pub epsilon: f32,
    /// Dirichlet concentration parameter.
    pub alpha: f32,
}

impl Default for NoiseConfig {
    fn default() -> NoiseConfig {
        NoiseConfig {
            epsilon: 0.25,
            alpha: 0.3,
        }
    }
}

/// Parameters for `randomize_first_proportionally`: which root children are eligible to be
/// promoted ahead of the most-visited one, and how sharply visit counts are exponentiated.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProportionalSelectionConfig {
    pub enabled: bool,
    /// Softmax-style temperature; lower values concentrate selection on the best child.
    pub tau: f32,
    /// A child must have at least this fraction of the best child's visits to be eligible.
    pub visit_floor: f32,
    /// A child's eval must be within this much of the best child's eval to be eligible.
    pub eval_maxdiff: f32,
}

impl Default for ProportionalSelectionConfig {
    fn default() -> ProportionalSelectionConfig {
        ProportionalSelectionConfig {
            enabled: false,
            tau: 1.0,
            visit_floor: 0.1,
            eval_maxdiff: 0.1,
        }
    }
}

/// All tunables for a single [`crate::search::Engine`]. Constructible from JSON via `serde_json`
/// or overridden field-by-field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    pub c_puct: f32,
    pub fpu_reduction: f32,
    /// If true, the FPU baseline uses the parent's raw (not net) eval; see
    /// [`crate::search::node::SearchNode::uct_select_child`].
    pub fpu_dynamic_eval: bool,
    pub virtual_loss_count: i32,
    pub max_tree_size: u64,
    pub cache_capacity: usize,
    /// Number of worker threads used by `think`. `None` defers to `num_cpus::get()`.
    pub num_threads: Option<usize>,
    /// Dirichlet root noise, applied once per `think()` call when `Some`.
    pub noise: Option<NoiseConfig>,
    pub proportional_selection: ProportionalSelectionConfig,
    /// Milliseconds of wall-clock slack reserved against scheduling jitter and the time it takes
    /// to actually emit the chosen move, subtracted from both the time manager's target and max.
    pub lag_buffer_ms: u32,
}

impl Default for SearchConfig {
    fn default() -> SearchConfig {
        SearchConfig {
            c_puct: DEFAULT_C_PUCT,
            fpu_reduction: DEFAULT_FPU_REDUCTION,
            fpu_dynamic_eval: false,
            virtual_loss_count: VIRTUAL_LOSS_COUNT,
            max_tree_size: DEFAULT_MAX_TREE_SIZE,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            num_threads: None,
            noise: None,
            proportional_selection: ProportionalSelectionConfig::default(),
            lag_buffer_ms: 100,
        }
    }
}

impl SearchConfig {
    /// Resolves [`Self::num_threads`] against the host's CPU count via `num_cpus::get()`.
    pub fn resolved_num_threads(&self) -> usize {
        self.num_threads.unwrap_or_else(num_cpus::get).max(1)
    }

    pub fn from_json(text: &str) -> serde_json::Result<SearchConfig> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_json() {
        let config = SearchConfig::default();
        let text = serde_json::to_string(&config).unwrap();
        let parsed = SearchConfig::from_json(&text).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn resolved_num_threads_defaults_to_cpu_count() {
        let config = SearchConfig::default();
        assert_eq!(num_cpus::get().max(1), config.resolved_num_threads());
    }

    #[test]
    fn resolved_num_threads_honors_override() {
        let mut config = SearchConfig::default();
        config.num_threads = Some(1);
        assert_eq!(1, config.resolved_num_threads());
    }
}
