use shakmaty::{Color, Square};

use crate::types::{HISTORY_MAX, MAX_PLY, PackedMove, Score};

fn color_index(color: Color) -> usize {
    match color {
        Color::White => 0,
        Color::Black => 1,
    }
}

fn square_index(sq: Square) -> usize {
    u32::from(sq) as usize
}

/// Two quiet refutation moves per ply, most recent first. Callers only add
/// non-captures; a move already in slot 0 is not shifted into both slots.
pub struct KillerTable {
    slots: [[PackedMove; 2]; MAX_PLY],
}

impl KillerTable {
    pub fn new() -> Self {
        Self { slots: [[PackedMove::NONE; 2]; MAX_PLY] }
    }

    pub fn add(&mut self, ply: usize, mv: PackedMove) {
        if ply >= MAX_PLY || self.slots[ply][0] == mv {
            return;
        }
        self.slots[ply][1] = self.slots[ply][0];
        self.slots[ply][0] = mv;
    }

    pub fn get(&self, ply: usize) -> [PackedMove; 2] {
        if ply < MAX_PLY { self.slots[ply] } else { [PackedMove::NONE; 2] }
    }

    pub fn clear(&mut self) {
        self.slots = [[PackedMove::NONE; 2]; MAX_PLY];
    }
}

impl Default for KillerTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Butterfly history: cutoff counts for quiet moves, indexed by side and
/// from/to squares. Once any cell climbs past the cap the whole table is
/// halved, so old successes decay instead of dominating forever.
pub struct HistoryTable {
    scores: Box<[[[Score; 64]; 64]; 2]>,
}

impl HistoryTable {
    pub fn new() -> Self {
        Self { scores: Box::new([[[0; 64]; 64]; 2]) }
    }

    pub fn get(&self, side: Color, from: Square, to: Square) -> Score {
        self.scores[color_index(side)][square_index(from)][square_index(to)]
    }

    pub fn bump(&mut self, side: Color, from: Square, to: Square, depth: i32) {
        let cell =
            &mut self.scores[color_index(side)][square_index(from)][square_index(to)];
        *cell += depth;
        if *cell > HISTORY_MAX {
            self.halve();
        }
    }

    fn halve(&mut self) {
        for side in self.scores.iter_mut() {
            for from in side.iter_mut() {
                for cell in from.iter_mut() {
                    *cell /= 2;
                }
            }
        }
    }

    pub fn clear(&mut self) {
        self.scores = Box::new([[[0; 64]; 64]; 2]);
    }
}

impl Default for HistoryTable {
    fn default() -> Self {
        Self::new()
    }
}

/// For each opponent move (side, from, to): the move that most recently
/// refuted it with a beta cutoff at ply >= 1.
pub struct CounterTable {
    moves: Box<[[[PackedMove; 64]; 64]; 2]>,
}

impl CounterTable {
    pub fn new() -> Self {
        Self { moves: Box::new([[[PackedMove::NONE; 64]; 64]; 2]) }
    }

    pub fn get(&self, side: Color, prev: PackedMove) -> PackedMove {
        if prev.is_none() {
            return PackedMove::NONE;
        }
        self.moves[color_index(side)][square_index(prev.from_sq())][square_index(prev.to_sq())]
    }

    pub fn store(&mut self, side: Color, prev: PackedMove, mv: PackedMove) {
        if prev.is_none() {
            return;
        }
        self.moves[color_index(side)][square_index(prev.from_sq())]
            [square_index(prev.to_sq())] = mv;
    }

    pub fn clear(&mut self) {
        self.moves = Box::new([[[PackedMove::NONE; 64]; 64]; 2]);
    }
}

impl Default for CounterTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_killer_shift() {
        let mut killers = KillerTable::new();
        let (a, b, c) = (PackedMove(1), PackedMove(2), PackedMove(3));

        killers.add(4, a);
        killers.add(4, b);
        assert_eq!(killers.get(4), [b, a], "most recent killer sits in slot 0");

        killers.add(4, c);
        assert_eq!(killers.get(4), [c, b]);
    }

    #[test]
    fn test_killer_no_duplicate() {
        let mut killers = KillerTable::new();
        let (a, b) = (PackedMove(1), PackedMove(2));
        killers.add(2, a);
        killers.add(2, b);
        killers.add(2, b);
        assert_eq!(killers.get(2), [b, a], "re-adding slot 0 must not clone it into slot 1");
    }

    #[test]
    fn test_killer_plies_independent() {
        let mut killers = KillerTable::new();
        killers.add(0, PackedMove(7));
        assert_eq!(killers.get(1), [PackedMove::NONE; 2]);
    }

    #[test]
    fn test_history_bump_and_get() {
        let mut history = HistoryTable::new();
        history.bump(Color::White, Square::E2, Square::E4, 6);
        history.bump(Color::White, Square::E2, Square::E4, 4);
        assert_eq!(history.get(Color::White, Square::E2, Square::E4), 10);
        assert_eq!(history.get(Color::Black, Square::E2, Square::E4), 0);
    }

    #[test]
    fn test_history_halves_past_cap() {
        let mut history = HistoryTable::new();
        history.bump(Color::White, Square::A1, Square::A2, 5);
        for _ in 0..20_000 {
            history.bump(Color::Black, Square::G8, Square::F6, 1);
        }
        let hot = history.get(Color::Black, Square::G8, Square::F6);
        assert!(hot <= HISTORY_MAX, "no cell may exceed the cap after an update, got {}", hot);
        assert!(hot > 0);
        // The cold cell decayed along with the hot one
        assert!(history.get(Color::White, Square::A1, Square::A2) < 5);
    }

    #[test]
    fn test_counter_roundtrip() {
        let mut counters = CounterTable::new();
        let prev = PackedMove(0x0abc);
        let reply = PackedMove(0x0123);
        counters.store(Color::Black, prev, reply);
        assert_eq!(counters.get(Color::Black, prev), reply);
        assert_eq!(counters.get(Color::White, prev), PackedMove::NONE);
    }

    #[test]
    fn test_counter_ignores_nomove_key() {
        let mut counters = CounterTable::new();
        counters.store(Color::White, PackedMove::NONE, PackedMove(0x0123));
        assert_eq!(counters.get(Color::White, PackedMove::NONE), PackedMove::NONE);
    }
}
