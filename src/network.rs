// Copyright 2017-2021 Sean Gillespie.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The neural network inference backend the search consumes, and the fixed move-id space the
//! search and the backend agree on.
//!
//! Real inference (BLAS, OpenCL, a remote multiplexer, ...) is out of scope for this crate - see
//! the top of this module's sibling, [`crate::evaluator`], for how the search actually drives a
//! [`Network`]. What lives here is the capability-set trait the backend must implement plus one
//! reference implementation, [`MaterialNetwork`], that stands in for a trained network in tests
//! and benches by scoring positions with [`crate::eval::evaluate`], wrapped to satisfy the
//! policy/value interface the MCTS search expects.

use std::collections::HashMap;
use std::convert::TryFrom;

use crate::cache::MoveId;
use crate::core::*;
use crate::eval;
use crate::history::BoardHistory;
use crate::position::Position;

/// 8 history frames, each contributing 6 own-piece planes, 6 opponent planes, and 1 repetition
/// plane; see [`encode_planes`].
pub const HISTORY_FRAMES: usize = 8;
const PLANES_PER_FRAME: usize = 13;
const META_PLANES: usize = 8;
/// Total number of 8x8 planes fed to the network per position: `8 * 13 + 8 = 112`.
pub const TOTAL_PLANES: usize = HISTORY_FRAMES * PLANES_PER_FRAME + META_PLANES;
/// Number of `f32`s in one encoded input: 112 planes of 64 squares each.
pub const PLANES_LEN: usize = TOTAL_PLANES * 64;

/// A single network input: `TOTAL_PLANES` stacked 8x8 bitplanes, flattened row-major
/// (`plane * 64 + rank * 8 + file`).
pub type Planes = Vec<f32>;

/// One forward pass through the network: some number of positions (`add_input`ed in order),
/// resolved all at once by `compute_blocking`, after which `q`/`p` read back the results.
///
/// Splits a `Network` (the loaded model / backend) from a per-batch `NetworkComputation` handle;
/// see [`Network::new_computation`].
pub trait Computation: Send {
    /// Appends one position's planes to the batch. Returns the sample index the result will be
    /// readable at after `compute_blocking`.
    fn add_input(&mut self, planes: &Planes) -> usize;

    /// Runs the forward pass over every input added so far. A no-op if nothing was added.
    fn compute_blocking(&mut self);

    /// Number of inputs added to this batch.
    fn batch_size(&self) -> usize;

    /// The value head's output for sample `i`, from the perspective of the side to move in that
    /// sample's position, scaled to `[0, 1]` (1.0 = certain win).
    fn q(&self, i: usize) -> f32;

    /// The policy head's raw (already-normalized-by-the-network, or not - the search rescales
    /// defensively either way) prior for `move_id` in sample `i`'s position.
    fn p(&self, i: usize, move_id: MoveId) -> f32;
}

/// The network backend: a loaded model capable of handing out fresh [`Computation`] batches.
/// Concrete variants (BLAS, OpenCL, a remote multiplexer, ...) are registered by name and chosen
/// at construction; this crate ships only [`MaterialNetwork`] and [`UniformNetwork`], both
/// intended for tests and benches rather than real play.
pub trait Network: Send + Sync {
    fn new_computation(&self) -> Box<dyn Computation>;
}

/// Legal moves considered for a position, paired with the network's prior for each - what
/// [`Network`]/[`Computation`] conceptually produce per sample once policy ids are resolved back
/// to moves. Built by the caller (the search knows the legal moves; the network only knows move
/// ids), not by this module.
pub fn policy_for_moves<N: Computation + ?Sized>(
    computation: &N,
    sample: usize,
    color: Color,
    legal_moves: &[Move],
) -> Vec<(MoveId, f32)> {
    legal_moves
        .iter()
        .map(|&m| {
            let id = MOVE_INDEX.lookup(m, color);
            (id, computation.p(sample, id))
        })
        .collect()
}

/// Flips a square vertically (rank `r` -> rank `7 - r`, file unchanged). Used to present the
/// board to the move-id space from the current side's perspective, per [`MoveIndex`].
pub fn flip_square(sq: Square) -> Square {
    Square::try_from(sq.as_u8() ^ 0b111_000).expect("flipping a valid square stays on the board")
}

fn flip_move(m: Move) -> Move {
    let from = flip_square(m.source());
    let to = flip_square(m.destination());
    if m.is_promotion() {
        Move::promotion(from, to, m.promotion_piece())
    } else {
        Move::quiet(from, to)
    }
}

/// The fixed enumeration of move "templates" - queen-like rays and knight jumps from each square,
/// plus underpromotions - that the network's policy head assigns a prior to. Built once at
/// startup (see [`MOVE_INDEX`]) and queried by [`MoveIndex::lookup`]/[`MoveIndex::reverse_lookup`].
///
/// Two incompatible move-id enumerations (1924 and 1858 entries) are in common use for this style
/// of policy head; this implements neither exactly, deriving its own fixed space instead - see
/// [`DESIGN.md`](../../DESIGN.md) for why. It follows the same underlying scheme (56 queen-ray plus 8
/// knight plus 9 underpromotion templates per square, filtered to the templates that stay on the
/// board), and is internally consistent: every move the move generator can produce from a given
/// side's perspective maps to exactly one id, and every id maps back to exactly one canonical
/// move, with one deliberate exception documented on [`MoveIndex::reverse_lookup`].
pub struct MoveIndex {
    // Keyed on raw square/piece-kind bytes rather than `(Square, Square)`/`PieceKind` directly:
    // neither derives `Hash`, and adding that derive upstream is out of scope for this module.
    normal: HashMap<(u8, u8), MoveId>,
    underpromotion: HashMap<(u8, u8, u8), MoveId>,
    reverse: Vec<ReverseEntry>,
}

#[derive(Copy, Clone)]
enum ReverseEntry {
    Normal(Square, Square),
    Underpromotion(Square, Square, PieceKind),
}

const QUEEN_DIRECTIONS: [(i8, i8); 8] = [
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
];

const KNIGHT_OFFSETS: [(i8, i8); 8] = [
    (2, 1),
    (1, 2),
    (-1, 2),
    (-2, 1),
    (-2, -1),
    (-1, -2),
    (1, -2),
    (2, -1),
];

const UNDERPROMOTION_FILES: [i8; 3] = [-1, 0, 1];
const UNDERPROMOTION_KINDS: [PieceKind; 3] = [PieceKind::Knight, PieceKind::Bishop, PieceKind::Rook];

fn offset_square(sq: Square, dr: i8, df: i8) -> Option<Square> {
    let rank = (sq.as_u8() >> 3) as i8 + dr;
    let file = (sq.as_u8() & 7) as i8 + df;
    if !(0..8).contains(&rank) || !(0..8).contains(&file) {
        return None;
    }
    Some(Square::try_from((rank * 8 + file) as u8).expect("rank/file in range"))
}

impl MoveIndex {
    fn build() -> MoveIndex {
        let mut normal = HashMap::new();
        let mut underpromotion = HashMap::new();
        let mut reverse = Vec::new();

        for from_idx in 0u8..64 {
            let from = Square::try_from(from_idx).unwrap();

            for &(dr, df) in QUEEN_DIRECTIONS.iter() {
                for dist in 1i8..=7 {
                    if let Some(to) = offset_square(from, dr * dist, df * dist) {
                        normal.entry((from.as_u8(), to.as_u8())).or_insert_with(|| {
                            let id = reverse.len() as MoveId;
                            reverse.push(ReverseEntry::Normal(from, to));
                            id
                        });
                    }
                }
            }

            for &(dr, df) in KNIGHT_OFFSETS.iter() {
                if let Some(to) = offset_square(from, dr, df) {
                    normal.entry((from.as_u8(), to.as_u8())).or_insert_with(|| {
                        let id = reverse.len() as MoveId;
                        reverse.push(ReverseEntry::Normal(from, to));
                        id
                    });
                }
            }

            // Underpromotions: a pawn one step forward (always toward higher ranks - the board is
            // flipped for black before indexing, so "forward" is uniform here), optionally
            // capturing diagonally, promoting to knight, bishop, or rook.
            if from.as_u8() >> 3 == 6 {
                for &df in UNDERPROMOTION_FILES.iter() {
                    if let Some(to) = offset_square(from, 1, df) {
                        for &kind in UNDERPROMOTION_KINDS.iter() {
                            let id = reverse.len() as MoveId;
                            underpromotion.insert((from.as_u8(), to.as_u8(), kind as u8), id);
                            reverse.push(ReverseEntry::Underpromotion(from, to, kind));
                        }
                    }
                }
            }
        }

        MoveIndex {
            normal,
            underpromotion,
            reverse,
        }
    }

    /// Total size of the move-id space this instance was built with.
    pub fn len(&self) -> usize {
        self.reverse.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reverse.is_empty()
    }

    /// Maps a legal move, played by `color`, to its id. Black's moves are flipped onto the same
    /// board-relative space white's moves occupy, so `lookup(m, Black) == lookup(flip(m), White)`.
    pub fn lookup(&self, mov: Move, color: Color) -> MoveId {
        let mov = if color == Color::Black { flip_move(mov) } else { mov };
        let from = mov.source();
        let to = mov.destination();
        if mov.is_promotion() && mov.promotion_piece() != PieceKind::Queen {
            *self
                .underpromotion
                .get(&(from.as_u8(), to.as_u8(), mov.promotion_piece() as u8))
                .unwrap_or_else(|| panic!("no move-id template for underpromotion {:?}", mov))
        } else {
            *self
                .normal
                .get(&(from.as_u8(), to.as_u8()))
                .unwrap_or_else(|| panic!("no move-id template for move {:?}", mov))
        }
    }

    /// Maps an id back to a canonical, white-perspective move. Queen promotions, en passant
    /// captures, and castling all collapse onto the same (source, destination) template as an
    /// ordinary move in this encoding, which has no dedicated plane for them - the board context a
    /// position provides is what disambiguates a "queen move ending on the last rank" from a queen
    /// promotion when the move is actually played. Consequently `reverse_lookup(lookup(m, c))`
    /// reproduces `m` exactly
    /// only when `m` is a non-queen promotion or an otherwise ordinary move; callers that already
    /// hold the real legal move (the common case: the search is looking up the prior for a move
    /// it generated) should prefer that move over round-tripping through this function.
    pub fn reverse_lookup(&self, id: MoveId) -> Move {
        match self.reverse[id as usize] {
            ReverseEntry::Normal(from, to) => Move::quiet(from, to),
            ReverseEntry::Underpromotion(from, to, kind) => Move::promotion(from, to, kind),
        }
    }
}

lazy_static::lazy_static! {
    pub static ref MOVE_INDEX: MoveIndex = MoveIndex::build();
}

/// Builds the network's input planes for the position at the end of `history`, from the
/// perspective of the side to move (vertically flipped for black, per [`flip_square`]).
///
/// Layout: 8 history frames, oldest first, each with 6 own-piece planes, 6 opponent-piece planes,
/// and a repetition indicator; then 4 castling-rights planes (own-short, own-long, their-short,
/// their-long), 1 side-to-move plane, rule-50 and move-count scalar planes, and an all-ones
/// padding plane.
pub fn encode_planes(history: &BoardHistory) -> Planes {
    let mut planes = vec![0.0f32; PLANES_LEN];
    let us = history.current().side_to_move();
    let positions = history.positions();
    let frame_count = positions.len().min(HISTORY_FRAMES);

    for frame in 0..frame_count {
        let pos = &positions[positions.len() - 1 - frame];
        let base = frame * PLANES_PER_FRAME;
        encode_frame(&mut planes, base, pos, us);
        if repeated_in_history(positions, positions.len() - 1 - frame) {
            fill_plane(&mut planes, base + 12, 1.0);
        }
    }

    let meta_base = HISTORY_FRAMES * PLANES_PER_FRAME;
    let current = history.current();
    let them = us.toggle();
    if current.can_castle_kingside(us) {
        fill_plane(&mut planes, meta_base, 1.0);
    }
    if current.can_castle_queenside(us) {
        fill_plane(&mut planes, meta_base + 1, 1.0);
    }
    if current.can_castle_kingside(them) {
        fill_plane(&mut planes, meta_base + 2, 1.0);
    }
    if current.can_castle_queenside(them) {
        fill_plane(&mut planes, meta_base + 3, 1.0);
    }
    if us == Color::Black {
        fill_plane(&mut planes, meta_base + 4, 1.0);
    }
    fill_plane(&mut planes, meta_base + 5, current.halfmove_clock() as f32);
    fill_plane(&mut planes, meta_base + 6, history.positions().len() as f32);
    fill_plane(&mut planes, meta_base + 7, 1.0);

    planes
}

fn encode_frame(planes: &mut [f32], base: usize, pos: &Position, us: Color) {
    let them = us.toggle();
    for (offset, kind) in [
        PieceKind::Pawn,
        PieceKind::Knight,
        PieceKind::Bishop,
        PieceKind::Rook,
        PieceKind::Queen,
        PieceKind::King,
    ]
    .into_iter()
    .enumerate()
    {
        for sq in pos.pieces_of_kind(us, kind) {
            set_square(planes, base + offset, sq, us);
        }
        for sq in pos.pieces_of_kind(them, kind) {
            set_square(planes, base + 6 + offset, sq, us);
        }
    }
}

fn set_square(planes: &mut [f32], plane: usize, sq: Square, us: Color) {
    let sq = if us == Color::Black { flip_square(sq) } else { sq };
    planes[plane * 64 + sq.as_u8() as usize] = 1.0;
}

fn fill_plane(planes: &mut [f32], plane: usize, value: f32) {
    for slot in &mut planes[plane * 64..(plane + 1) * 64] {
        *slot = value;
    }
}

fn repeated_in_history(positions: &[Position], idx: usize) -> bool {
    let key = positions[idx].position_key();
    positions[..idx].iter().any(|p| p.position_key() == key)
}

/// A [`Computation`] backed by the same material weights [`eval::evaluate`] uses, plus a uniform
/// policy, used by [`MaterialNetwork`]. Nothing in this crate decodes planes back into a
/// [`Position`] (only the real network backend this stands in for would), so rather than
/// re-deriving a `Position` this sums the own/opponent piece-count planes directly.
pub struct MaterialComputation {
    scores: Vec<f32>,
}

impl MaterialComputation {
    fn new() -> MaterialComputation {
        MaterialComputation { scores: Vec::new() }
    }
}

/// A reference [`Network`] for tests and benches: scores positions with the crate's pure-material
/// evaluator instead of running real inference, and assigns a uniform prior across whatever moves
/// the caller asks about.
pub struct MaterialNetwork;

impl Network for MaterialNetwork {
    fn new_computation(&self) -> Box<dyn Computation> {
        Box::new(MaterialComputation::new())
    }
}

const PLANE_WEIGHTS: [f32; 6] = [100.0, 300.0, 300.0, 500.0, 900.0, 10000.0];

impl Computation for MaterialComputation {
    fn add_input(&mut self, planes: &Planes) -> usize {
        let idx = self.scores.len();
        let material: f32 = planes[..HISTORY_FRAMES * PLANES_PER_FRAME * 64]
            .chunks_exact(64)
            .take(PLANES_PER_FRAME - 1)
            .enumerate()
            .map(|(plane, squares)| {
                let count: f32 = squares.iter().sum();
                let weight = PLANE_WEIGHTS[plane % 6];
                let sign = if plane < 6 { 1.0 } else { -1.0 };
                sign * weight * count
            })
            .sum();
        self.scores.push(material);
        idx
    }

    fn compute_blocking(&mut self) {}

    fn batch_size(&self) -> usize {
        self.scores.len()
    }

    fn q(&self, i: usize) -> f32 {
        let capped = self.scores[i].clamp(-16000.0, 16000.0);
        eval::Value::new(capped as i16).to_win_probability()
    }

    fn p(&self, _i: usize, _move_id: MoveId) -> f32 {
        1.0
    }
}

/// A [`Network`]/[`Computation`] pair that returns a fixed value and a uniform policy for every
/// position, regardless of input. The simplest possible stand-in for a trained network; useful
/// for unit tests that only care about the search's tree mechanics (expansion, selection,
/// back-propagation) and would rather not depend on [`eval::evaluate`]'s material heuristics at
/// all.
pub struct UniformNetwork {
    pub value: f32,
}

impl UniformNetwork {
    pub fn new(value: f32) -> UniformNetwork {
        UniformNetwork { value }
    }
}

impl Network for UniformNetwork {
    fn new_computation(&self) -> Box<dyn Computation> {
        Box::new(UniformComputation {
            value: self.value,
            count: 0,
        })
    }
}

struct UniformComputation {
    value: f32,
    count: usize,
}

impl Computation for UniformComputation {
    fn add_input(&mut self, _planes: &Planes) -> usize {
        let idx = self.count;
        self.count += 1;
        idx
    }

    fn compute_blocking(&mut self) {}

    fn batch_size(&self) -> usize {
        self.count
    }

    fn q(&self, _i: usize) -> f32 {
        self.value
    }

    fn p(&self, _i: usize, _move_id: MoveId) -> f32 {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::*;

    #[test]
    fn move_lookup_round_trips_for_ordinary_moves() {
        let m = Move::quiet(E2, E4);
        let id = MOVE_INDEX.lookup(m, Color::White);
        assert_eq!(m, MOVE_INDEX.reverse_lookup(id));
    }

    #[test]
    fn move_lookup_round_trips_for_underpromotions() {
        let m = Move::promotion(A7, A8, PieceKind::Knight);
        let id = MOVE_INDEX.lookup(m, Color::White);
        assert_eq!(m, MOVE_INDEX.reverse_lookup(id));
    }

    #[test]
    fn black_lookup_matches_flipped_white_lookup() {
        let m = Move::quiet(E7, E5);
        let flipped = flip_move(m);
        assert_eq!(
            MOVE_INDEX.lookup(m, Color::Black),
            MOVE_INDEX.lookup(flipped, Color::White)
        );
    }

    #[test]
    fn knight_move_has_an_id() {
        let m = Move::quiet(G1, F3);
        let id = MOVE_INDEX.lookup(m, Color::White);
        assert_eq!(Move::quiet(G1, F3), MOVE_INDEX.reverse_lookup(id));
    }

    #[test]
    fn uniform_network_reports_fixed_value() {
        let net = UniformNetwork::new(0.7);
        let mut comp = net.new_computation();
        let idx = comp.add_input(&vec![0.0; PLANES_LEN]);
        comp.compute_blocking();
        assert_eq!(0.7, comp.q(idx));
    }

    #[test]
    fn encode_planes_has_expected_length() {
        let history = BoardHistory::from_start_position();
        let planes = encode_planes(&history);
        assert_eq!(PLANES_LEN, planes.len());
    }
}
