// Copyright 2017-2021 Sean Gillespie.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Fatal, process-level errors surfaced by the library boundary, in the same style already used
//! for FEN parsing (`position::FenParseError`, a `thiserror` enum): library code returns a typed
//! error, and the binaries that embed it (`a4`, `a4-search`, ...) wrap those in `anyhow::Result`
//! at the process boundary. Conditions like a tree-size cap, a lost expansion race, or a cache
//! miss are normal, expected return values rather than errors (see [`crate::search::worker`] and
//! [`crate::evaluator`]); only genuinely exceptional, unrecoverable conditions surface here.

use thiserror::Error;

/// Fatal errors that can prevent the engine from starting or from running a search at all.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The FEN handed to the engine at startup (or via a UCI `position fen ...` command) could
    /// not be parsed.
    #[error("invalid FEN: {0}")]
    InvalidFen(#[from] crate::position::FenParseError),

    /// The configured neural network backend failed to initialize (e.g. a missing or malformed
    /// weights file). Fatal: the engine cannot search without a network.
    #[error("network backend failed to initialize: {0}")]
    NetworkBackendInitFailure(String),
}
