use std::thread;
use std::time::Duration;

use shakmaty::{Color, Move, Role};

use crate::evaluation::evaluate;
use crate::movepick::MovePicker;
use crate::position::{Position, move_to_uci};
use crate::see::see_ge;
use crate::smp::{GameState, WorkerTables};
use crate::tt::Bound;
use crate::types::{
    FORCED_MATE, KNOWN_WIN, MAX_PLY, PackedMove, SCORE_INFINITY, SCORE_MATE, Score,
};

/// Sentinel propagated through the recursion when the search must unwind:
/// time is up, a stop arrived, or an abort cancelled the iteration. Each
/// frame unmakes its in-flight move before passing it on, so the board is
/// back at the root by the time it reaches the iteration loop.
pub struct Stopped;

const RFP_MARGIN: [Score; 4] = [0, 300, 500, 900];
const RAZOR_MARGIN: [Score; 4] = [0, 100, 200, 400];
const LMP_COUNT: [i32; 6] = [0, 5, 10, 20, 35, 55];
const SEE_MARGIN: [Score; 5] = [0, -100, -200, -300, -400];
const PROBCUT_MARGIN: Score = 210;
const ASPIRATION_WINDOW: [Score; 6] = [25, 50, 100, 200, 400, SCORE_INFINITY];

/// Triangular table of principal variations, one line per ply.
struct PvTable {
    lines: Vec<Vec<Move>>,
}

impl PvTable {
    fn new() -> Self {
        Self { lines: vec![Vec::new(); MAX_PLY + 1] }
    }

    fn clear_line(&mut self, ply: usize) {
        if let Some(line) = self.lines.get_mut(ply) {
            line.clear();
        }
    }

    /// `m` heads the line at `ply`, followed by the line found one ply down.
    fn update(&mut self, ply: usize, m: Move) {
        if ply + 1 > MAX_PLY {
            return;
        }
        let (head, tail) = self.lines.split_at_mut(ply + 1);
        let line = &mut head[ply];
        line.clear();
        line.push(m);
        line.extend_from_slice(&tail[0]);
    }

    fn line(&self, ply: usize) -> &[Move] {
        self.lines.get(ply).map_or(&[], Vec::as_slice)
    }
}

fn is_pawn_push(m: &Move, side: Color) -> bool {
    m.role() == Role::Pawn
        && match side {
            Color::White => u32::from(m.to().rank()) >= 5,
            Color::Black => u32::from(m.to().rank()) <= 2,
        }
}

/// Format a score for UCI output (centipawns or mate-in-N).
pub fn format_score(score: Score) -> String {
    if score.abs() >= FORCED_MATE {
        let mate_ply = SCORE_MATE - score.abs();
        let mate_moves = (mate_ply + 1) / 2;
        if score > 0 {
            format!("score mate {mate_moves}")
        } else {
            format!("score mate -{mate_moves}")
        }
    } else {
        format!("score cp {score}")
    }
}

/// One search worker. Owns its replay stack, PV table, and heuristic
/// tables; shares the transposition table and stop protocol through
/// `GameState`.
pub struct Searcher<'a> {
    id: usize,
    state: &'a GameState,
    pos: Position,
    tables: &'a mut WorkerTables,
    pv: PvTable,
    root_moves: Vec<Move>,
    nodes: u64,
    seldepth: usize,
    resolving_root_fail: bool,
}

impl<'a> Searcher<'a> {
    pub fn new(id: usize, state: &'a GameState, tables: &'a mut WorkerTables) -> Self {
        Self {
            id,
            state,
            pos: state.root.clone(),
            tables,
            pv: PvTable::new(),
            root_moves: state.root_moves.clone(),
            nodes: 0,
            seldepth: 0,
            resolving_root_fail: false,
        }
    }

    /// Iterative deepening from the shared root. Workers start at staggered
    /// depths (`1 + id % 2`) so they diverge through the shared table.
    pub fn find_best_move(&mut self) {
        let mut depth = (1 + (self.id % 2) as i32).min(self.state.sd);
        let mut prev_score = 0;

        loop {
            if depth > self.state.sd {
                break;
            }
            let Ok(score) = self.aspiration(depth, prev_score) else {
                break;
            };
            prev_score = score;

            let pv = self.pv.line(0).to_vec();
            self.state.update_best(depth, score, self.seldepth, &pv);
            let (next_depth, first) = self.state.complete_iteration(depth);
            if first {
                self.report_iteration(depth, score, &pv);
            }

            if score.abs() > KNOWN_WIN && self.state.exit_on_mate && !self.state.is_pondering()
            {
                self.state.stop_all(false);
                break;
            }
            if self.state.should_stop().0 {
                break;
            }
            if !self.state.allow_new_iteration() {
                self.state.stop_all(false);
                break;
            }
            depth = next_depth;
        }

        // Worker 0 keeps the search alive until the GUI resolves a ponder
        if self.id == 0 {
            while self.state.is_pondering() && !self.state.should_stop().0 {
                thread::sleep(Duration::from_millis(1));
            }
        }
        self.state.flush_nodes(self.id, self.nodes);
    }

    /// Search one depth inside a window around the previous score, widening
    /// only the failing side on a fail-low/high. While a fail is being
    /// resolved, soft stops are deferred (aborts are not) so the final score
    /// is not a bare bound.
    fn aspiration(&mut self, depth: i32, prev: Score) -> Result<Score, Stopped> {
        self.seldepth = 0;

        if depth <= 5 || prev.abs() >= KNOWN_WIN {
            return self.root_search(depth, -SCORE_INFINITY, SCORE_INFINITY);
        }

        let mut lo = 0;
        let mut hi = 0;
        let last = ASPIRATION_WINDOW.len() - 1;
        loop {
            let alpha = (prev.saturating_sub(ASPIRATION_WINDOW[lo])).max(-SCORE_INFINITY);
            let beta = (prev.saturating_add(ASPIRATION_WINDOW[hi])).min(SCORE_INFINITY);

            let score = match self.root_search(depth, alpha, beta) {
                Ok(score) => score,
                Err(stopped) => {
                    self.resolving_root_fail = false;
                    return Err(stopped);
                }
            };

            if score <= alpha && lo < last {
                lo += 1;
                self.resolving_root_fail = true;
            } else if score >= beta && hi < last {
                hi += 1;
                self.resolving_root_fail = true;
            } else {
                self.resolving_root_fail = false;
                return Ok(score);
            }
        }
    }

    fn root_search(&mut self, depth: i32, mut alpha: Score, beta: Score) -> Result<Score, Stopped> {
        self.pv.clear_line(0);
        let key = self.pos.key();
        let in_check = self.pos.in_check();

        let moves = self.root_moves.clone();
        if moves.is_empty() {
            return Ok(if in_check { -SCORE_MATE } else { 0 });
        }

        let orig_alpha = alpha;
        let mut best_score = -SCORE_INFINITY;
        let mut best_move = PackedMove::NONE;

        for m in &moves {
            self.pos.make_move(m);
            let gives_check = self.pos.in_check();
            let new_depth = depth - 1 + i32::from(gives_check);

            let score = if best_score == -SCORE_INFINITY {
                self.recurse(new_depth, -beta, -alpha, true)?
            } else {
                let zw = self.recurse(new_depth, -alpha - 1, -alpha, true)?;
                if zw > alpha {
                    self.recurse(new_depth, -beta, -alpha, true)?
                } else {
                    zw
                }
            };
            self.pos.unmake_move();

            if score > best_score {
                best_score = score;
                best_move = PackedMove::from_move(m);
                if score > alpha {
                    alpha = score;
                    self.pv.update(0, m.clone());
                    self.promote_root_move(m);
                    self.state.update_best(depth, score, self.seldepth, self.pv.line(0));
                    if score >= beta {
                        break;
                    }
                }
            }
        }

        let bound = if best_score >= beta {
            Bound::Lower
        } else if best_score <= orig_alpha {
            Bound::Upper
        } else {
            Bound::Exact
        };
        self.state.tt.store(key, best_move, depth, best_score, bound, 0);
        Ok(best_score)
    }

    /// Move the new best to the front so the next iteration tries it first.
    fn promote_root_move(&mut self, m: &Move) {
        if let Some(idx) = self.root_moves.iter().position(|rm| rm == m) {
            let best = self.root_moves.remove(idx);
            self.root_moves.insert(0, best);
        }
    }

    /// Main alpha-beta search, fail-soft.
    fn search(
        &mut self,
        depth: i32,
        mut alpha: Score,
        beta: Score,
        try_null: bool,
    ) -> Result<Score, Stopped> {
        if depth <= 0 {
            return self.quiescence(alpha, beta);
        }

        self.visit_node()?;

        let sply = self.pos.sply().min(MAX_PLY);
        self.pv.clear_line(sply);
        self.seldepth = self.seldepth.max(sply);
        if sply >= MAX_PLY {
            return Ok(evaluate(self.pos.current()));
        }
        if self.pos.is_repetition() || self.pos.is_fifty_move_draw() {
            return Ok(0);
        }

        let is_pv = beta - alpha > 1;
        let key = self.pos.key();
        let probe = self.state.tt.probe(key, depth, alpha, beta, sply);
        if let Some(score) = probe.cutoff {
            return Ok(score);
        }
        let tt_move = probe.mv;

        if self.state.probe_wdl
            && let Some(prober) = self.state.syzygy.as_deref()
            && self.pos.piece_count() as usize <= prober.max_pieces()
            && let Some(score) = prober.probe_wdl(self.pos.current(), sply)
        {
            return Ok(score);
        }

        let in_check = self.pos.in_check();
        let static_eval = evaluate(self.pos.current());

        // Reverse futility: a quiet position already far above beta at
        // shallow depth is not going to fall back under it.
        if !is_pv
            && !in_check
            && depth <= 3
            && self.pos.has_non_pawn_material()
            && static_eval - RFP_MARGIN[depth as usize] >= beta
        {
            return Ok(static_eval);
        }

        // Razoring: hopelessly below alpha at shallow depth, check with
        // quiescence instead of a full search.
        if !is_pv
            && !in_check
            && depth <= 3
            && tt_move.is_none()
            && static_eval + RAZOR_MARGIN[depth as usize] <= alpha
        {
            if depth == 1 {
                return self.quiescence(alpha, beta);
            }
            let ralpha = alpha - RAZOR_MARGIN[depth as usize];
            let value = self.quiescence(ralpha, ralpha + 1)?;
            if value <= ralpha {
                return Ok(value);
            }
        }

        // Null move: hand the opponent a free move; if the position still
        // beats beta, a real move will too. Off in pawn endings (zugzwang)
        // and never twice in a row.
        if try_null
            && self.state.use_null
            && !in_check
            && depth > 3
            && self.pos.has_non_pawn_material()
        {
            let r = 2 + depth / 6;
            if self.pos.make_null_move() {
                let score = self.recurse(depth - r - 1, -beta, -beta + 1, false)?;
                self.pos.unmake_null_move();
                if score >= beta {
                    // A mate "found" with a passed move is not to be trusted
                    return Ok(if score >= FORCED_MATE { beta } else { score });
                }
            }
        }

        // ProbCut: a capture that clears beta by a margin at reduced depth
        // is good enough to cut here.
        if !is_pv
            && !in_check
            && depth >= 5
            && self.pos.has_non_pawn_material()
            && beta.abs() < KNOWN_WIN
        {
            let threshold = beta + PROBCUT_MARGIN;
            let captures: Vec<Move> = self
                .pos
                .legal_moves()
                .iter()
                .filter(|m| m.is_capture())
                .cloned()
                .collect();
            for m in captures {
                if !see_ge(self.pos.current(), &m, threshold - static_eval) {
                    continue;
                }
                self.pos.make_move(&m);
                let score = self.recurse(depth - 4, -threshold, -threshold + 1, true)?;
                self.pos.unmake_move();
                if score >= threshold {
                    return Ok(score);
                }
            }
        }

        let futile = depth <= 3 && static_eval + RAZOR_MARGIN[depth as usize] <= alpha;

        let side = self.pos.turn();
        let prev = self.pos.last_move();
        let counter = self.tables.counters.get(side, prev);
        let killers = self.tables.killers.get(sply);
        let mut picker = MovePicker::new(tt_move, killers, counter);

        let orig_alpha = alpha;
        let mut best_score = -SCORE_INFINITY;
        let mut best_move = PackedMove::NONE;
        let mut move_number = 0;

        while let Some(m) = picker.next(self.pos.current(), &self.tables.history) {
            move_number += 1;
            let packed = PackedMove::from_move(&m);
            let quiet = !(m.is_capture() || m.promotion().is_some());
            let hist = if quiet {
                self.tables.history.get(side, packed.from_sq(), packed.to_sq())
            } else {
                0
            };
            let killer_member = packed == killers[0] || packed == killers[1];
            let pawn_push = is_pawn_push(&m, side);
            let prunable_by_see =
                !is_pv && depth < 5 && !in_check && packed != tt_move && best_score > -SCORE_INFINITY;
            let see_too_low =
                prunable_by_see && !see_ge(self.pos.current(), &m, SEE_MARGIN[depth as usize]);

            self.pos.make_move(&m);
            let gives_check = self.pos.in_check();
            let tactical = !quiet || in_check || gives_check;

            // Futility: deep in a lost cause, only tactics can save us
            if futile && move_number > 1 && !tactical {
                self.pos.unmake_move();
                continue;
            }

            // Late-move pruning: quiet afterthoughts with no history
            if !is_pv
                && depth < 6
                && !tactical
                && !pawn_push
                && !killer_member
                && move_number > LMP_COUNT[depth as usize]
                && alpha.abs() < KNOWN_WIN
                && hist == 0
            {
                self.pos.unmake_move();
                continue;
            }

            // SEE pruning: moves that lose too much material outright
            if see_too_low && !gives_check {
                self.pos.unmake_move();
                continue;
            }

            let new_depth = depth + i32::from(gives_check);
            let mut reduction = 0;
            if move_number > 3 && depth > 3 && !tactical {
                reduction = 1;
                if move_number > 6 {
                    reduction = 2;
                }
            }

            let score = if best_score == -SCORE_INFINITY {
                self.recurse(new_depth - 1, -beta, -alpha, true)?
            } else {
                let mut zw = self.recurse(new_depth - reduction - 1, -alpha - 1, -alpha, true)?;
                if zw > alpha && reduction > 0 {
                    zw = self.recurse(new_depth - 1, -alpha - 1, -alpha, true)?;
                }
                if is_pv && zw > alpha && zw < beta {
                    zw = self.recurse(new_depth - 1, -beta, -alpha, true)?;
                }
                zw
            };
            self.pos.unmake_move();

            if score > best_score {
                best_score = score;
                best_move = packed;
                if score > alpha {
                    alpha = score;
                    self.pv.update(sply, m.clone());
                }
            }
            if score >= beta {
                if quiet {
                    self.tables.killers.add(sply, packed);
                    self.tables.counters.store(side, prev, packed);
                    self.tables.history.bump(side, packed.from_sq(), packed.to_sq(), depth);
                }
                break;
            }
        }

        if move_number == 0 {
            return Ok(if in_check { -SCORE_MATE + sply as Score } else { 0 });
        }
        if best_score == -SCORE_INFINITY {
            // Every candidate was pruned away; fail low on the window
            best_score = alpha;
        }

        let bound = if best_score >= beta {
            Bound::Lower
        } else if best_score <= orig_alpha {
            Bound::Upper
        } else {
            Bound::Exact
        };
        self.state.tt.store(key, best_move, depth, best_score, bound, sply);
        Ok(best_score)
    }

    /// Horizon-stabilising search: captures only (plus every evasion when in
    /// check), with the static eval as a stand-pat floor.
    fn quiescence(&mut self, mut alpha: Score, beta: Score) -> Result<Score, Stopped> {
        self.visit_node()?;

        let sply = self.pos.sply().min(MAX_PLY);
        self.pv.clear_line(sply);
        self.seldepth = self.seldepth.max(sply);
        if sply >= MAX_PLY {
            return Ok(evaluate(self.pos.current()));
        }
        if self.pos.is_repetition() || self.pos.is_fifty_move_draw() {
            return Ok(0);
        }

        let key = self.pos.key();
        let probe = self.state.tt.probe(key, 0, alpha, beta, sply);
        if let Some(score) = probe.cutoff {
            return Ok(score);
        }
        let tt_move = probe.mv;

        let in_check = self.pos.in_check();
        let mut best_score = -SCORE_INFINITY;

        if !in_check {
            // Stand pat: doing nothing is always an option outside check
            let stand_pat = evaluate(self.pos.current());
            best_score = stand_pat;
            if stand_pat >= beta {
                self.state.tt.store(key, PackedMove::NONE, 0, stand_pat, Bound::Lower, sply);
                return Ok(stand_pat);
            }
            if stand_pat > alpha {
                alpha = stand_pat;
            }
        }

        let orig_alpha = alpha;
        let mut best_move = PackedMove::NONE;
        let mut any_legal = false;
        let mut picker = MovePicker::new_quiescence(tt_move, in_check);

        while let Some(m) = picker.next(self.pos.current(), &self.tables.history) {
            any_legal = true;
            // Captures that lose material cannot rescue a stand-pat deficit
            if !in_check && m.is_capture() && !see_ge(self.pos.current(), &m, 0) {
                continue;
            }
            self.pos.make_move(&m);
            let score = self.recurse_q(-beta, -alpha)?;
            self.pos.unmake_move();

            if score > best_score {
                best_score = score;
                if score > alpha {
                    alpha = score;
                    best_move = PackedMove::from_move(&m);
                }
            }
            if score >= beta {
                break;
            }
        }

        if in_check && !any_legal {
            return Ok(-SCORE_MATE + sply as Score);
        }

        let bound = if best_score >= beta {
            Bound::Lower
        } else if best_score <= orig_alpha {
            Bound::Upper
        } else {
            Bound::Exact
        };
        self.state.tt.store(key, best_move, 0, best_score, bound, sply);
        Ok(best_score)
    }

    /// Run the child search for the move currently made on the board and
    /// negate its score. On a stop the in-flight move is unmade before the
    /// unwind continues, so every frame leaves the board as it found it.
    fn recurse(
        &mut self,
        depth: i32,
        alpha: Score,
        beta: Score,
        try_null: bool,
    ) -> Result<Score, Stopped> {
        match self.search(depth, alpha, beta, try_null) {
            Ok(score) => Ok(-score),
            Err(stopped) => {
                self.pos.unmake_move();
                Err(stopped)
            }
        }
    }

    fn recurse_q(&mut self, alpha: Score, beta: Score) -> Result<Score, Stopped> {
        match self.quiescence(alpha, beta) {
            Ok(score) => Ok(-score),
            Err(stopped) => {
                self.pos.unmake_move();
                Err(stopped)
            }
        }
    }

    /// Count the node and, every 2048 nodes, consult the clock and the stop
    /// protocol. Soft stops are deferred while this worker resolves a root
    /// fail; hard aborts and the hard time budget are not.
    fn visit_node(&mut self) -> Result<(), Stopped> {
        self.nodes += 1;
        if self.nodes & 2047 == 0 {
            self.state.flush_nodes(self.id, self.nodes);
            let (stop, abort) = self.state.should_stop();
            if stop && (abort || !self.resolving_root_fail) {
                return Err(Stopped);
            }
            if !self.state.within_hard_budget() {
                self.state.stop_all(false);
                return Err(Stopped);
            }
        }
        Ok(())
    }

    fn report_iteration(&self, depth: i32, score: Score, pv: &[Move]) {
        if self.state.silent {
            return;
        }
        let elapsed = self.state.elapsed_ms().max(1);
        let nodes = self.state.nodes().max(self.nodes);
        let nps = nodes * 1000 / elapsed;
        let pv_str: Vec<String> = pv.iter().map(move_to_uci).collect();
        println!(
            "info depth {} seldepth {} {} nodes {} time {} nps {} pv {}",
            depth,
            self.seldepth,
            format_score(score),
            nodes,
            elapsed,
            nps,
            pv_str.join(" ")
        );
    }
}


// Stop handling: visit_node returns Err(Stopped) once the stop flag is up
// or the hard budget is gone, and every recursion level unmakes its move
// before passing the error on. By the time find_best_move sees it, the
// board is the root position again and best-so-far is already published.

// Soft stop vs abort: a worker widening an aspiration window after a fail
// ignores soft stops until the re-search resolves, so the reported score is
// never a bare bound. An abort (or running out of hard time) cuts through.
