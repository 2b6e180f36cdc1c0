use shakmaty::fen::Fen;
use shakmaty::zobrist::{Zobrist64, ZobristHash};
use shakmaty::{CastlingMode, Chess, Color, EnPassantMode, Move, MoveList, Position as _, Role, Square};

use crate::types::{MAX_PLY, PackedMove};

/// One canonical position plus the line that led to it. Search frames call
/// `make_move`/`unmake_move` around recursion; the ancestor keys double as
/// the repetition-detection line (game prefix included).
#[derive(Clone)]
pub struct Position {
    cur: Chess,
    cur_key: u64,
    parents: Vec<Chess>,
    keys: Vec<u64>,
    line: Vec<PackedMove>,
}

fn hash_of(pos: &Chess) -> u64 {
    pos.zobrist_hash::<Zobrist64>(EnPassantMode::Legal).0
}

impl Position {
    pub fn startpos() -> Self {
        Self::from_chess(Chess::default())
    }

    pub fn from_chess(chess: Chess) -> Self {
        let key = hash_of(&chess);
        Self {
            cur: chess,
            cur_key: key,
            parents: Vec::with_capacity(MAX_PLY),
            keys: Vec::with_capacity(MAX_PLY),
            line: Vec::with_capacity(MAX_PLY),
        }
    }

    /// Parse a FEN. Invalid input is rejected here, before any search starts.
    pub fn from_fen(fen: &str) -> Option<Self> {
        let parsed: Fen = fen.parse().ok()?;
        let chess: Chess = parsed.into_position(CastlingMode::Standard).ok()?;
        Some(Self::from_chess(chess))
    }

    /// Forget the distinction between game history and search line: every
    /// position reached so far becomes pre-root history. The driver calls
    /// this after replaying the `position ... moves` list.
    pub fn rebase(&mut self) {
        self.parents.clear();
        self.line.clear();
    }

    pub fn current(&self) -> &Chess {
        &self.cur
    }

    pub fn key(&self) -> u64 {
        self.cur_key
    }

    /// Search ply relative to the root (0 at the root).
    pub fn sply(&self) -> usize {
        self.parents.len()
    }

    pub fn turn(&self) -> Color {
        self.cur.turn()
    }

    pub fn in_check(&self) -> bool {
        self.cur.is_check()
    }

    pub fn legal_moves(&self) -> MoveList {
        self.cur.legal_moves()
    }

    pub fn is_legal(&self, m: &Move) -> bool {
        self.cur.legal_moves().contains(m)
    }

    /// The move that led to the current position, if any.
    pub fn last_move(&self) -> PackedMove {
        self.line.last().copied().unwrap_or(PackedMove::NONE)
    }

    pub fn make_move(&mut self, m: &Move) {
        self.parents.push(self.cur.clone());
        self.keys.push(self.cur_key);
        self.line.push(PackedMove::from_move(m));
        self.cur.play_unchecked(m);
        self.cur_key = hash_of(&self.cur);
    }

    pub fn unmake_move(&mut self) {
        if let Some(parent) = self.parents.pop() {
            self.cur = parent;
            self.cur_key = self.keys.pop().unwrap_or_else(|| hash_of(&self.cur));
            self.line.pop();
        }
    }

    /// Pass the turn without moving a piece. Fails (and leaves the position
    /// untouched) when the resulting position would be illegal.
    pub fn make_null_move(&mut self) -> bool {
        match self.cur.clone().swap_turn() {
            Ok(next) => {
                self.parents.push(self.cur.clone());
                self.keys.push(self.cur_key);
                self.line.push(PackedMove::NONE);
                self.cur = next;
                self.cur_key = hash_of(&self.cur);
                true
            }
            Err(_) => false,
        }
    }

    pub fn unmake_null_move(&mut self) {
        self.unmake_move();
    }

    /// Has the current position occurred earlier in the line? A single prior
    /// occurrence already scores as a draw inside the search tree.
    pub fn is_repetition(&self) -> bool {
        self.keys.iter().rev().any(|&k| k == self.cur_key)
    }

    pub fn is_fifty_move_draw(&self) -> bool {
        self.cur.halfmoves() >= 100
    }

    /// Does the side to move have anything besides pawns and the king?
    /// Null-move and reverse-futility logic stays away from pure pawn
    /// endings, where zugzwang breaks their assumptions.
    pub fn has_non_pawn_material(&self) -> bool {
        let board = self.cur.board();
        let ours = board.by_color(self.cur.turn());
        (ours & !(board.by_role(Role::Pawn) | board.by_role(Role::King))).any()
    }

    pub fn piece_count(&self) -> u32 {
        self.cur.board().occupied().count() as u32
    }

    /// Find the legal move matching a UCI string like "e2e4" or "a7a8q".
    pub fn parse_uci_move(&self, s: &str) -> Option<Move> {
        self.cur
            .legal_moves()
            .iter()
            .find(|m| move_to_uci(m) == s)
            .cloned()
    }
}

/// Format a move as UCI coordinates. Castling prints king-from/king-to
/// (e1g1), not the internal king/rook encoding.
pub fn move_to_uci(m: &Move) -> String {
    match *m {
        Move::Castle { king, rook } => {
            let file = if rook.file() > king.file() {
                shakmaty::File::G
            } else {
                shakmaty::File::C
            };
            format!("{}{}", king, Square::from_coords(file, king.rank()))
        }
        Move::Normal { from, to, promotion, .. } => match promotion {
            Some(role) => format!("{}{}{}", from, to, role.char()),
            None => format!("{}{}", from, to),
        },
        Move::EnPassant { from, to } => format!("{}{}", from, to),
        Move::Put { .. } => String::from("0000"),
    }
}
