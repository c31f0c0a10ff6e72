// Copyright 2021 Sean Gillespie.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A minimal implementation of the UCI protocol for a4, driving the search engine defined in
//! [`crate::search`]. See [here](http://wbec-ridderkerk.nl/html/UCIProtocol.html) for full
//! documentation on the protocol; this module handles enough of it to play a game (`position`,
//! `go`, `stop`, `isready`, `ucinewgame`, a couple of `setoption`s) rather than the whole surface.
//!
//! `go` runs on a dedicated worker thread that owns the [`Engine`] for the lifetime of the
//! process, so the line-reading loop stays responsive to `stop` while a search is in progress:
//! `stop` only ever touches the engine's cloned stop handle (a bare `Arc<AtomicBool>`), never the
//! engine itself, so there's no need to interrupt the worker thread to deliver it.

use std::io::{self, BufRead};
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::thread;

use crate::config::SearchConfig;
use crate::core::Move;
use crate::history::BoardHistory;
use crate::movegen;
use crate::network::MaterialNetwork;
use crate::position::Position;
use crate::search::time::Limits;
use crate::search::{BestMove, Engine, Info};

enum WorkerCommand {
    Go(BoardHistory, Limits),
    NewGame,
    SetNumThreads(usize),
    SetHashMb(usize),
}

/// Roughly converts a UCI `Hash` option (megabytes) to an entry count for the evaluation cache; a
/// cached entry (key, value, a handful of `(move id, prior)` pairs) is on the order of 100 bytes.
fn mb_to_cache_entries(mb: usize) -> usize {
    (mb.max(1) * 1024 * 1024 / 100).max(1)
}

pub fn run() -> io::Result<()> {
    let engine = Engine::new(Box::new(MaterialNetwork), SearchConfig::default());
    let stop = engine.stop_handle();

    let (tx, rx) = mpsc::channel::<WorkerCommand>();
    let worker = thread::spawn(move || engine_thread(engine, rx));

    let mut history = BoardHistory::from_start_position();

    let stdin = io::stdin();
    for maybe_line in stdin.lock().lines() {
        let line = maybe_line?;
        let components: Vec<_> = line.split_whitespace().collect();
        let (&command, arguments) = match components.split_first() {
            Some(parts) => parts,
            None => continue,
        };

        match command {
            "uci" => handle_uci(),
            "isready" => uci_output!("readyok"),
            "ucinewgame" => {
                history = BoardHistory::from_start_position();
                let _ = tx.send(WorkerCommand::NewGame);
            }
            "position" => history = handle_position(arguments),
            "go" => {
                let limits = parse_go(arguments);
                let _ = tx.send(WorkerCommand::Go(history.clone(), limits));
            }
            "stop" => stop.store(true, Ordering::Release),
            "setoption" => handle_setoption(arguments, &tx),
            "quit" => break,
            _ => uci_output!("unrecognized command: {} {:?}", command, arguments),
        }
    }

    drop(tx);
    let _ = worker.join();
    Ok(())
}

fn handle_uci() {
    uci_output!(
        "id name {} {}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );
    uci_output!("id author {}", env!("CARGO_PKG_AUTHORS"));
    uci_output!("option name Threads type spin default 1 min 1 max 512");
    uci_output!("option name Hash type spin default 128 min 1 max 65536");
    uci_output!("uciok");
}

/// Runs forever on a dedicated thread, owning `engine` exclusively so `think()` never has to
/// share it with the line-reading loop. Exits once `rx` disconnects (the main thread dropped
/// `tx`, i.e. `quit` was received).
fn engine_thread(mut engine: Engine, rx: mpsc::Receiver<WorkerCommand>) {
    for cmd in rx {
        match cmd {
            WorkerCommand::Go(history, limits) => {
                let best = engine.think(&history, &limits, |info| print_info(&info));
                print_bestmove(best);
            }
            WorkerCommand::NewGame => engine.reset(),
            WorkerCommand::SetNumThreads(n) => engine.set_num_threads(n),
            WorkerCommand::SetHashMb(mb) => engine.set_cache_capacity(mb_to_cache_entries(mb)),
        }
    }
}

fn print_info(info: &Info) {
    let mut line = format!(
        "info depth {} seldepth {} nodes {} nps {} time {} score cp {}",
        info.depth,
        info.seldepth,
        info.nodes,
        info.nps,
        info.time.as_millis(),
        info.score_cp
    );
    if let Some(hashfull) = info.hashfull {
        line.push_str(&format!(" hashfull {}", hashfull));
    }
    if !info.pv.is_empty() {
        let pv: Vec<String> = info.pv.iter().map(|m| m.as_uci()).collect();
        line.push_str(" pv ");
        line.push_str(&pv.join(" "));
    }
    uci_output!("{}", line);
}

fn print_bestmove(best: BestMove) {
    match best.ponder {
        Some(ponder) => uci_output!("bestmove {} ponder {}", best.mov.as_uci(), ponder.as_uci()),
        None => uci_output!("bestmove {}", best.mov.as_uci()),
    }
}

/// Parses a `position [startpos | fen <fen>] [moves <move>...]` command. Falls back to the
/// starting position if `fen` doesn't parse, rather than failing the whole command - a
/// malformed `position` line shouldn't wedge the engine for the rest of the game.
fn handle_position(args: &[&str]) -> BoardHistory {
    let (mut history, rest) = match args.first() {
        Some(&"startpos") => (BoardHistory::from_start_position(), &args[1..]),
        Some(&"fen") => {
            let moves_at = args[1..]
                .iter()
                .position(|&t| t == "moves")
                .map(|i| i + 1)
                .unwrap_or(args.len() - 1)
                + 1;
            let fen = args[1..moves_at].join(" ");
            let history = Position::from_fen(&fen)
                .map(BoardHistory::new)
                .unwrap_or_else(|_| BoardHistory::from_start_position());
            (history, &args[moves_at..])
        }
        _ => (BoardHistory::from_start_position(), &[][..]),
    };

    if let Some((&"moves", moves)) = rest.split_first() {
        for mov_str in moves {
            match find_move(history.current(), mov_str) {
                Some(mov) => history.do_move(mov),
                // An illegal or malformed move token: stop applying further moves rather than
                // silently skip ahead to one that might make sense out of context.
                None => break,
            }
        }
    }

    history
}

fn find_move(pos: &Position, uci: &str) -> Option<Move> {
    movegen::generate_legal_moves(pos)
        .into_iter()
        .find(|m| m.as_uci() == uci)
}

/// Parses a `go [infinite | movetime <ms> | nodes <n> | depth <d> | wtime <ms> btime <ms> [winc
/// <ms> binc <ms>] [movestogo <n>]]` command. Unrecognized tokens (and `ponder`, ignored for now
/// since this driver never ponders in the first place) are skipped.
fn parse_go(args: &[&str]) -> Limits {
    let mut limits = Limits::default();
    let mut iter = args.iter();
    while let Some(&token) = iter.next() {
        macro_rules! next_parsed {
            () => {
                iter.next().and_then(|s| s.parse().ok())
            };
        }
        match token {
            "infinite" => limits.infinite = true,
            "movetime" => limits.movetime = next_parsed!(),
            "nodes" => limits.nodes = next_parsed!(),
            "depth" => limits.depth = next_parsed!(),
            "movestogo" => limits.movestogo = next_parsed!(),
            "wtime" => limits.time.white = next_parsed!(),
            "btime" => limits.time.black = next_parsed!(),
            "winc" => limits.inc.white = next_parsed!().unwrap_or(0),
            "binc" => limits.inc.black = next_parsed!().unwrap_or(0),
            _ => {}
        }
    }
    limits
}

fn handle_setoption(args: &[&str], tx: &mpsc::Sender<WorkerCommand>) {
    let name_at = match args.iter().position(|&t| t == "name") {
        Some(i) => i,
        None => return,
    };
    let value_at = args.iter().position(|&t| t == "value");
    let name = args[name_at + 1..value_at.unwrap_or(args.len())].join(" ");
    let value = value_at.map(|i| args[i + 1..].join(" ")).unwrap_or_default();

    let cmd = match name.as_str() {
        "Threads" => value.parse().ok().map(WorkerCommand::SetNumThreads),
        "Hash" => value.parse().ok().map(WorkerCommand::SetHashMb),
        _ => None,
    };
    if let Some(cmd) = cmd {
        let _ = tx.send(cmd);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_position_applies_moves_from_startpos() {
        let history = handle_position(&["startpos", "moves", "e2e4", "e7e5"]);
        assert_eq!(3, history.positions().len());
    }

    #[test]
    fn handle_position_parses_a_fen_with_trailing_moves() {
        let history = handle_position(&[
            "fen", "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR", "b", "KQkq", "e3", "0", "1",
            "moves", "e7e5",
        ]);
        assert_eq!(2, history.positions().len());
    }

    #[test]
    fn handle_position_falls_back_to_startpos_on_bad_fen() {
        let history = handle_position(&["fen", "not", "a", "fen"]);
        assert_eq!(1, history.positions().len());
        assert_eq!(
            Position::from_start_position().as_fen(),
            history.current().as_fen()
        );
    }

    #[test]
    fn parse_go_reads_every_field() {
        let limits = parse_go(&[
            "wtime", "60000", "btime", "50000", "winc", "500", "binc", "400", "movestogo", "20",
        ]);
        assert_eq!(Some(60000), limits.time.white);
        assert_eq!(Some(50000), limits.time.black);
        assert_eq!(500, limits.inc.white);
        assert_eq!(400, limits.inc.black);
        assert_eq!(Some(20), limits.movestogo);
    }

    #[test]
    fn parse_go_infinite_sets_the_flag() {
        assert!(parse_go(&["infinite"]).infinite);
    }

    #[test]
    fn parse_go_movetime_and_nodes() {
        let limits = parse_go(&["movetime", "1000"]);
        assert_eq!(Some(1000), limits.movetime);
        let limits = parse_go(&["nodes", "12345"]);
        assert_eq!(Some(12345), limits.nodes);
    }
}
