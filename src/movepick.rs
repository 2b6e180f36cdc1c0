use arrayvec::ArrayVec;
use shakmaty::{Chess, Move, Position as _};

use crate::heuristics::HistoryTable;
use crate::pst::{MVV_VALUE, role_index};
use crate::see::see;
use crate::types::{PackedMove, Score};

struct ScoredMove {
    mv: Move,
    score: Score,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Phase {
    TtMove,
    Captures,
    Killer0,
    Killer1,
    Counter,
    QuietsInit,
    Quiets,
    BadCaptures,
    Done,
}

fn mvv_lva(m: &Move) -> Score {
    let victim = m.capture().map_or(0, |r| MVV_VALUE[role_index(r)]);
    victim * 10 - role_index(m.role()) as Score
}

fn is_tactical(m: &Move) -> bool {
    m.is_capture() || m.promotion().is_some()
}

/// Phased move selection for one node. Moves come out in the order most
/// likely to cause a cutoff: TT move, winning/equal captures by SEE, the two
/// killers, the counter move, quiets by history, then losing captures.
/// Every legal move is yielded at most once; duplicates between phases are
/// filtered against the already-emitted specials.
///
/// In quiescence (not in check) only the TT move (if tactical) and captures
/// are emitted; in check every evasion comes out.
pub struct MovePicker {
    phase: Phase,
    tt_move: PackedMove,
    killers: [PackedMove; 2],
    counter: PackedMove,
    quiescence: bool,
    in_check: bool,
    generated: bool,
    buf: ArrayVec<ScoredMove, 256>,
    cap_end: usize,
    cap_idx: usize,
    quiet_idx: usize,
    emitted: ArrayVec<PackedMove, 4>,
}

impl MovePicker {
    pub fn new(tt_move: PackedMove, killers: [PackedMove; 2], counter: PackedMove) -> Self {
        Self {
            phase: Phase::TtMove,
            tt_move,
            killers,
            counter,
            quiescence: false,
            in_check: false,
            generated: false,
            buf: ArrayVec::new(),
            cap_end: 0,
            cap_idx: 0,
            quiet_idx: 0,
            emitted: ArrayVec::new(),
        }
    }

    pub fn new_quiescence(tt_move: PackedMove, in_check: bool) -> Self {
        let mut picker = Self::new(tt_move, [PackedMove::NONE; 2], PackedMove::NONE);
        picker.quiescence = true;
        picker.in_check = in_check;
        picker
    }

    fn generate(&mut self, pos: &Chess) {
        if self.generated {
            return;
        }
        self.generated = true;
        let legal = pos.legal_moves();
        for m in legal.iter().filter(|m| is_tactical(m)) {
            self.buf.push(ScoredMove { mv: m.clone(), score: 0 });
        }
        self.cap_end = self.buf.len();
        self.cap_idx = 0;
        for m in legal.iter().filter(|m| !is_tactical(m)) {
            self.buf.push(ScoredMove { mv: m.clone(), score: 0 });
        }
        self.quiet_idx = self.cap_end;
    }

    fn score_captures(&mut self, pos: &Chess) {
        for entry in &mut self.buf[..self.cap_end] {
            // SEE decides the bucket, MVV-LVA breaks ties inside it
            entry.score = see(pos, &entry.mv) * 10_000 + mvv_lva(&entry.mv);
        }
    }

    fn score_quiets(&mut self, pos: &Chess, history: &HistoryTable) {
        let side = pos.turn();
        for entry in &mut self.buf[self.cap_end..] {
            let packed = PackedMove::from_move(&entry.mv);
            entry.score = history.get(side, packed.from_sq(), packed.to_sq());
        }
    }

    fn already_emitted(&self, m: &Move) -> bool {
        self.emitted.iter().any(|p| p.matches(m))
    }

    /// Bring the best-scored move in `range` to its front slot and return
    /// its index, or None when the range is exhausted.
    fn select_best(&mut self, start: usize, end: usize) -> Option<usize> {
        if start >= end {
            return None;
        }
        let mut best = start;
        for i in start + 1..end {
            if self.buf[i].score > self.buf[best].score {
                best = i;
            }
        }
        self.buf.swap(start, best);
        Some(start)
    }

    /// Find a quiet move matching `packed` that has not been emitted yet.
    fn take_special(&mut self, packed: PackedMove) -> Option<Move> {
        if packed.is_none() || packed == self.tt_move || self.emitted.contains(&packed) {
            return None;
        }
        let found = self.buf[self.cap_end..]
            .iter()
            .find(|entry| packed.matches(&entry.mv))
            .map(|entry| entry.mv.clone());
        if found.is_some() {
            let _ = self.emitted.try_push(packed);
        }
        found
    }

    pub fn next(&mut self, pos: &Chess, history: &HistoryTable) -> Option<Move> {
        loop {
            match self.phase {
                Phase::TtMove => {
                    self.generate(pos);
                    self.phase = Phase::Captures;
                    if self.tt_move.is_some() {
                        let found = self
                            .buf
                            .iter()
                            .find(|entry| self.tt_move.matches(&entry.mv))
                            .map(|entry| entry.mv.clone());
                        if let Some(m) = found {
                            if !self.quiescence || self.in_check || is_tactical(&m) {
                                let _ = self.emitted.try_push(self.tt_move);
                                return Some(m);
                            }
                        }
                    }
                }
                Phase::Captures => {
                    if self.cap_idx == 0 {
                        self.score_captures(pos);
                    }
                    match self.select_best(self.cap_idx, self.cap_end) {
                        None => {
                            self.phase = if self.quiescence && !self.in_check {
                                Phase::Done
                            } else if self.quiescence {
                                Phase::QuietsInit
                            } else {
                                Phase::Killer0
                            };
                        }
                        Some(idx) => {
                            // Losing captures wait until every quiet has had
                            // its chance (not in quiescence, which takes all)
                            if !self.quiescence && self.buf[idx].score < 0 {
                                self.phase = Phase::Killer0;
                                continue;
                            }
                            self.cap_idx = idx + 1;
                            if self.already_emitted(&self.buf[idx].mv) {
                                continue;
                            }
                            return Some(self.buf[idx].mv.clone());
                        }
                    }
                }
                Phase::Killer0 => {
                    self.phase = Phase::Killer1;
                    if let Some(m) = self.take_special(self.killers[0]) {
                        return Some(m);
                    }
                }
                Phase::Killer1 => {
                    self.phase = Phase::Counter;
                    if let Some(m) = self.take_special(self.killers[1]) {
                        return Some(m);
                    }
                }
                Phase::Counter => {
                    self.phase = Phase::QuietsInit;
                    if let Some(m) = self.take_special(self.counter) {
                        return Some(m);
                    }
                }
                Phase::QuietsInit => {
                    self.score_quiets(pos, history);
                    self.phase = Phase::Quiets;
                }
                Phase::Quiets => match self.select_best(self.quiet_idx, self.buf.len()) {
                    None => {
                        self.phase = if self.quiescence {
                            Phase::Done
                        } else {
                            Phase::BadCaptures
                        };
                    }
                    Some(idx) => {
                        self.quiet_idx = idx + 1;
                        if self.already_emitted(&self.buf[idx].mv) {
                            continue;
                        }
                        return Some(self.buf[idx].mv.clone());
                    }
                },
                Phase::BadCaptures => match self.select_best(self.cap_idx, self.cap_end) {
                    None => self.phase = Phase::Done,
                    Some(idx) => {
                        self.cap_idx = idx + 1;
                        if self.already_emitted(&self.buf[idx].mv) {
                            continue;
                        }
                        return Some(self.buf[idx].mv.clone());
                    }
                },
                Phase::Done => return None,
            }
        }
    }
}


// Phase order: TT move, winning/equal captures by SEE, killers, counter,
// quiets by history, losing captures. Scoring is deferred per phase: if the
// TT move cuts off, nothing pays for SEE or history lookups.
