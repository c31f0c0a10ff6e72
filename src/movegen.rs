// Copyright 2017-2021 Sean Gillespie.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Pseudo-legal move generation, built on the ray-attack tables in [`crate::core`]. Generated
//! moves still need to be filtered through [`crate::position::Position::is_legal_given_pseudolegal`]
//! before being played, since this module does not check whether the moving side's king ends up
//! in check (with the exception of castling, whose legality depends on squares the king passes
//! through and cannot be recovered after the fact).

use crate::core::*;
use crate::position::Position;

/// Appends every pseudo-legal move available to `side` in `pos` to `moves`.
pub fn generate_moves(side: Color, pos: &Position, moves: &mut Vec<Move>) {
    generate_pawn_moves(side, pos, moves);
    generate_knight_moves(side, pos, moves);
    generate_sliding_moves(side, pos, PieceKind::Bishop, moves);
    generate_sliding_moves(side, pos, PieceKind::Rook, moves);
    generate_sliding_moves(side, pos, PieceKind::Queen, moves);
    generate_king_moves(side, pos, moves);
    generate_castles(side, pos, moves);
}

fn is_attacked(pos: &Position, attacker: Color, target: Square) -> bool {
    !pos.squares_attacking(attacker, target).is_empty()
}

fn promotion_rank(side: Color) -> Rank {
    match side {
        Color::White => RANK_8,
        Color::Black => RANK_1,
    }
}

fn starting_pawn_rank(side: Color) -> Rank {
    match side {
        Color::White => RANK_2,
        Color::Black => RANK_7,
    }
}

fn pawn_push_direction(side: Color) -> Direction {
    match side {
        Color::White => Direction::North,
        Color::Black => Direction::South,
    }
}

fn push_moves(source: Square, dest: Square, side: Color, moves: &mut Vec<Move>) {
    if dest.rank() == promotion_rank(side) {
        for kind in [
            PieceKind::Knight,
            PieceKind::Bishop,
            PieceKind::Rook,
            PieceKind::Queen,
        ] {
            moves.push(Move::promotion(source, dest, kind));
        }
    } else {
        moves.push(Move::quiet(source, dest));
    }
}

fn capture_moves(source: Square, dest: Square, side: Color, moves: &mut Vec<Move>) {
    if dest.rank() == promotion_rank(side) {
        for kind in [
            PieceKind::Knight,
            PieceKind::Bishop,
            PieceKind::Rook,
            PieceKind::Queen,
        ] {
            moves.push(Move::promotion_capture(source, dest, kind));
        }
    } else {
        moves.push(Move::capture(source, dest));
    }
}

fn generate_pawn_moves(side: Color, pos: &Position, moves: &mut Vec<Move>) {
    let occupancy = pos.pieces(Color::White) | pos.pieces(Color::Black);
    let enemy = pos.pieces(side.toggle());
    let push_dir = pawn_push_direction(side);

    for source in pos.pawns(side) {
        let one_step = source.towards(push_dir);
        if !occupancy.contains(one_step) {
            push_moves(source, one_step, side, moves);

            if source.rank() == starting_pawn_rank(side) {
                let two_step = one_step.towards(push_dir);
                if !occupancy.contains(two_step) {
                    moves.push(Move::double_pawn_push(source, two_step));
                }
            }
        }

        for dest in pawn_attacks(source, side) & enemy {
            capture_moves(source, dest, side, moves);
        }

        if let Some(ep_square) = pos.en_passant_square() {
            if pawn_attacks(source, side).contains(ep_square) {
                moves.push(Move::en_passant(source, ep_square));
            }
        }
    }
}

fn generate_knight_moves(side: Color, pos: &Position, moves: &mut Vec<Move>) {
    let own = pos.pieces(side);
    let enemy = pos.pieces(side.toggle());
    for source in pos.knights(side) {
        for dest in knight_attacks(source) & !own {
            if enemy.contains(dest) {
                moves.push(Move::capture(source, dest));
            } else {
                moves.push(Move::quiet(source, dest));
            }
        }
    }
}

fn generate_sliding_moves(side: Color, pos: &Position, kind: PieceKind, moves: &mut Vec<Move>) {
    let occupancy = pos.pieces(Color::White) | pos.pieces(Color::Black);
    let own = pos.pieces(side);
    let enemy = pos.pieces(side.toggle());
    for source in pos.pieces_of_kind(side, kind) {
        for dest in attacks(kind, side, source, occupancy) & !own {
            if enemy.contains(dest) {
                moves.push(Move::capture(source, dest));
            } else {
                moves.push(Move::quiet(source, dest));
            }
        }
    }
}

fn generate_king_moves(side: Color, pos: &Position, moves: &mut Vec<Move>) {
    let own = pos.pieces(side);
    let enemy = pos.pieces(side.toggle());
    if let Some(source) = pos.king(side) {
        for dest in king_attacks(source) & !own {
            if enemy.contains(dest) {
                moves.push(Move::capture(source, dest));
            } else {
                moves.push(Move::quiet(source, dest));
            }
        }
    }
}

fn generate_castles(side: Color, pos: &Position, moves: &mut Vec<Move>) {
    let king = match pos.king(side) {
        Some(sq) => sq,
        None => return,
    };

    let occupancy = pos.pieces(Color::White) | pos.pieces(Color::Black);
    let opponent = side.toggle();
    if is_attacked(pos, opponent, king) {
        // Cannot castle out of check.
        return;
    }

    let (kingside_empty, kingside_safe, kingside_dest): (&[Square], &[Square], Square) =
        match side {
            Color::White => (&[F1, G1], &[F1, G1], G1),
            Color::Black => (&[F8, G8], &[F8, G8], G8),
        };

    if pos.can_castle_kingside(side)
        && kingside_empty.iter().all(|&sq| !occupancy.contains(sq))
        && kingside_safe.iter().all(|&sq| !is_attacked(pos, opponent, sq))
    {
        moves.push(Move::kingside_castle(king, kingside_dest));
    }

    let (queenside_empty, queenside_safe, queenside_dest): (&[Square], &[Square], Square) =
        match side {
            Color::White => (&[B1, C1, D1], &[C1, D1], C1),
            Color::Black => (&[B8, C8, D8], &[C8, D8], C8),
        };

    if pos.can_castle_queenside(side)
        && queenside_empty.iter().all(|&sq| !occupancy.contains(sq))
        && queenside_safe
            .iter()
            .all(|&sq| !is_attacked(pos, opponent, sq))
    {
        moves.push(Move::queenside_castle(king, queenside_dest));
    }
}

/// Generates every fully legal move available to the side to move in `pos`.
pub fn generate_legal_moves(pos: &Position) -> Vec<Move> {
    let mut pseudo = Vec::new();
    generate_moves(pos.side_to_move(), pos, &mut pseudo);
    pseudo.retain(|&mov| pos.is_legal_given_pseudolegal(mov));
    pseudo
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::Position;

    #[test]
    fn start_position_has_twenty_moves() {
        let pos = Position::from_start_position();
        let moves = generate_legal_moves(&pos);
        assert_eq!(moves.len(), 20);
    }

    #[test]
    fn kiwipete_perft_one_move_count() {
        // The "kiwipete" position, a standard move-generator torture test with castling,
        // en passant, and promotions all in reach.
        let pos = Position::from_fen(
            "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
        )
        .unwrap();
        let moves = generate_legal_moves(&pos);
        assert_eq!(moves.len(), 48);
    }

    #[test]
    fn checkmate_position_has_no_moves() {
        let pos =
            Position::from_fen("r1bqkbnr/pppp1Qpp/2n5/4p3/2B1P3/8/PPPP1PPP/RNB1K1NR b KQkq - 0 3")
                .unwrap();
        assert!(generate_legal_moves(&pos).is_empty());
    }

    #[test]
    fn stalemate_position_has_no_moves() {
        let pos = Position::from_fen("7k/5Q2/6K1/8/8/8/8/8 b - - 0 1").unwrap();
        assert!(generate_legal_moves(&pos).is_empty());
    }

    #[test]
    fn en_passant_is_generated_when_available() {
        let pos = Position::from_fen("8/8/8/3pP3/8/8/8/4K2k w - d6 0 1").unwrap();
        let moves = generate_legal_moves(&pos);
        assert!(moves.iter().any(|m| m.is_en_passant()));
    }

    #[test]
    fn cannot_castle_through_check() {
        // Black rook on e8-file attacks e1; white king cannot be on e1 and castle anyway here,
        // but this position instead attacks f1 via a rook on f8, forbidding kingside castling.
        let pos = Position::from_fen("4r2k/8/8/8/8/8/8/R3K2R w KQ - 0 1").unwrap();
        let moves = generate_legal_moves(&pos);
        assert!(!moves.iter().any(|m| m.is_kingside_castle()));
        assert!(moves.iter().any(|m| m.is_queenside_castle()));
    }
}
