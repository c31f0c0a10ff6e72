// Copyright 2021 Sean Gillespie.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Ad-hoc offline search, analogous to `a4-eval` but running the full MCTS engine against the
//! reference material network rather than a single static evaluation.

use a4::config::SearchConfig;
use a4::history::BoardHistory;
use a4::network::MaterialNetwork;
use a4::search::time::Limits;
use a4::search::Engine;
use a4::Position;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
struct Options {
    /// FEN representation of the position to analyze.
    #[structopt(name = "FEN")]
    fen: String,
    /// Number of playouts to run before returning a move.
    #[structopt(short, long, default_value = "10000")]
    nodes: u64,
    /// If present, serializes the output as json.
    #[structopt(long)]
    json: bool,
}

fn main() {
    let ops = Options::from_args();
    let pos = Position::from_fen(ops.fen).unwrap();
    let history = BoardHistory::new(pos);

    let mut config = SearchConfig::default();
    config.num_threads = Some(num_cpus::get().max(1));
    let mut engine = Engine::new(Box::new(MaterialNetwork), config);

    let limits = Limits {
        nodes: Some(ops.nodes),
        ..Limits::default()
    };

    let best = engine.think(&history, &limits, |info| {
        if !ops.json {
            eprintln!(
                "info depth {} nodes {} score cp {}",
                info.depth, info.nodes, info.score_cp
            );
        }
    });

    if ops.json {
        println!("{{\"best_move\": \"{}\"}}", best.mov.as_uci());
    } else {
        println!("{}", best.mov.as_uci());
    }
}
