use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use shakmaty::Move;

use crate::heuristics::{CounterTable, HistoryTable, KillerTable};
use crate::position::Position;
use crate::search::Searcher;
use crate::syzygy::SyzygyProber;
use crate::time::TimeManager;
use crate::tt::TranspositionTable;
use crate::types::{MAX_PLY, Score, SCORE_INFINITY, SearchResult};

/// Per-worker search tables. They live in the driver between searches so
/// killers/history/counters survive from move to move and are only wiped on
/// a new game.
pub struct WorkerTables {
    pub killers: KillerTable,
    pub history: HistoryTable,
    pub counters: CounterTable,
}

impl WorkerTables {
    pub fn new() -> Self {
        Self {
            killers: KillerTable::new(),
            history: HistoryTable::new(),
            counters: CounterTable::new(),
        }
    }

    pub fn clear(&mut self) {
        self.killers.clear();
        self.history.clear();
        self.counters.clear();
    }
}

impl Default for WorkerTables {
    fn default() -> Self {
        Self::new()
    }
}

/// Best line published so far across all workers.
pub struct BestLine {
    pub depth: i32,
    pub score: Score,
    pub seldepth: usize,
    pub pv: Vec<Move>,
}

struct DepthLadder {
    /// How many workers have completed each depth.
    counts: [u8; MAX_PLY + 1],
    /// Deepest depth announced so far; each depth is announced exactly once.
    reported: i32,
}

/// Everything the workers share for one search: the root, the limits, the
/// transposition table, and the stop protocol. Only atomics and two short
/// mutexes are touched while the search runs.
pub struct GameState {
    pub root: Position,
    pub root_moves: Vec<Move>,
    /// Depth limit for iterative deepening.
    pub sd: i32,
    pub n_workers: usize,
    pub exit_on_mate: bool,
    pub silent: bool,
    /// Null-move pruning switch; off for zugzwang-heavy test positions.
    pub use_null: bool,
    pub tt: Arc<TranspositionTable>,
    pub syzygy: Option<Arc<SyzygyProber>>,
    pub probe_wdl: bool,
    timeman: Mutex<TimeManager>,
    pondering: AtomicBool,
    stop: AtomicBool,
    abort: AtomicBool,
    completed_depth: AtomicI32,
    node_counters: Vec<AtomicU64>,
    best: Mutex<BestLine>,
    ladder: Mutex<DepthLadder>,
}

impl GameState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        root: Position,
        root_moves: Vec<Move>,
        sd: i32,
        n_workers: usize,
        tt: Arc<TranspositionTable>,
        syzygy: Option<Arc<SyzygyProber>>,
        timeman: TimeManager,
        pondering: bool,
    ) -> Self {
        let n_workers = n_workers.max(1);
        Self {
            root,
            root_moves,
            sd: sd.clamp(1, MAX_PLY as i32 - 1),
            n_workers,
            exit_on_mate: true,
            silent: false,
            use_null: true,
            tt,
            probe_wdl: syzygy.is_some(),
            syzygy,
            timeman: Mutex::new(timeman),
            pondering: AtomicBool::new(pondering),
            stop: AtomicBool::new(false),
            abort: AtomicBool::new(false),
            completed_depth: AtomicI32::new(0),
            node_counters: (0..n_workers).map(|_| AtomicU64::new(0)).collect(),
            best: Mutex::new(BestLine {
                depth: 0,
                score: -SCORE_INFINITY,
                seldepth: 0,
                pv: Vec::new(),
            }),
            ladder: Mutex::new(DepthLadder { counts: [0; MAX_PLY + 1], reported: 0 }),
        }
    }

    /// Consulted at every checkup: (stop requested, hard abort).
    pub fn should_stop(&self) -> (bool, bool) {
        (self.stop.load(Ordering::Relaxed), self.abort.load(Ordering::Relaxed))
    }

    /// Ask every worker to wind down. An abort also cancels in-flight
    /// aspiration re-searches; a plain stop lets them resolve first.
    pub fn stop_all(&self, abort: bool) {
        if abort {
            self.abort.store(true, Ordering::Relaxed);
        }
        self.stop.store(true, Ordering::Relaxed);
    }

    pub fn is_pondering(&self) -> bool {
        self.pondering.load(Ordering::Relaxed)
    }

    /// Ponderhit: the pondered move was played, the clock starts now.
    pub fn ponderhit(&self) {
        self.timeman.lock().unwrap().restart();
        self.pondering.store(false, Ordering::Relaxed);
    }

    /// Hard time check. While pondering the clock never expires.
    pub fn within_hard_budget(&self) -> bool {
        self.is_pondering() || self.timeman.lock().unwrap().check_time()
    }

    /// Is there budget left to start another depth?
    pub fn allow_new_iteration(&self) -> bool {
        self.is_pondering() || self.timeman.lock().unwrap().new_iteration()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.timeman.lock().unwrap().elapsed_ms()
    }

    pub fn flush_nodes(&self, worker: usize, nodes: u64) {
        if let Some(counter) = self.node_counters.get(worker) {
            counter.store(nodes, Ordering::Relaxed);
        }
    }

    pub fn nodes(&self) -> u64 {
        self.node_counters.iter().map(|c| c.load(Ordering::Relaxed)).sum()
    }

    pub fn completed_depth(&self) -> i32 {
        self.completed_depth.load(Ordering::Relaxed)
    }

    /// Publish a root improvement. Deeper results win; at equal depth the
    /// better score wins.
    pub fn update_best(&self, depth: i32, score: Score, seldepth: usize, pv: &[Move]) {
        if pv.is_empty() {
            return;
        }
        let mut best = self.best.lock().unwrap();
        if depth > best.depth || (depth == best.depth && score > best.score) {
            best.depth = depth;
            best.score = score;
            best.seldepth = best.seldepth.max(seldepth);
            best.pv.clear();
            best.pv.extend(pv.iter().cloned());
        }
    }

    pub fn best_line(&self) -> BestLine {
        let best = self.best.lock().unwrap();
        BestLine {
            depth: best.depth,
            score: best.score,
            seldepth: best.seldepth,
            pv: best.pv.clone(),
        }
    }

    /// Record that `depth` finished on some worker. Returns the next depth
    /// this worker should take (skipping depths that enough workers already
    /// claimed, to spread them out) and whether this worker was the first to
    /// finish `depth` (the one that announces it).
    pub fn complete_iteration(&self, depth: i32) -> (i32, bool) {
        let mut ladder = self.ladder.lock().unwrap();
        let idx = depth.clamp(0, MAX_PLY as i32) as usize;
        ladder.counts[idx] = ladder.counts[idx].saturating_add(1);

        let first = depth > ladder.reported;
        if first {
            ladder.reported = depth;
            self.completed_depth.store(depth, Ordering::Relaxed);
        }

        let crowd = (self.n_workers as u8).div_ceil(2);
        let mut next = idx + 1;
        while next < MAX_PLY && ladder.counts[next] >= crowd {
            next += 1;
        }
        (next as i32, first)
    }
}

/// Stack size for search threads: the recursion keeps per-frame move
/// buffers, so the default thread stack is too tight.
const WORKER_STACK: usize = 8 * 1024 * 1024;

/// Run one search to completion: spawn `n_workers` identical workers
/// sharing the state (worker 0 on the calling thread), join them, and
/// collect the best published line. Blocks until every worker returns.
pub fn start_search(state: &GameState, tables: &mut [WorkerTables]) -> SearchResult {
    state.tt.age();

    // Mated or stalemated at the root: nothing to search
    if state.root_moves.is_empty() {
        let score = if state.root.in_check() { -crate::types::SCORE_MATE } else { 0 };
        return SearchResult {
            best_move: None,
            ponder_move: None,
            score,
            depth: 0,
            seldepth: 0,
            nodes: 0,
        };
    }

    if let Some((first, rest)) = tables.split_first_mut() {
        thread::scope(|s| {
            for (offset, worker_tables) in rest.iter_mut().enumerate() {
                let id = offset + 1;
                thread::Builder::new()
                    .name(format!("search-{id}"))
                    .stack_size(WORKER_STACK)
                    .spawn_scoped(s, move || {
                        Searcher::new(id, state, worker_tables).find_best_move();
                    })
                    .expect("failed to spawn search worker");
            }
            Searcher::new(0, state, first).find_best_move();
        });
    }

    let best = state.best_line();
    // A stopped search still answers with a legal move: fall back to the
    // first root move if no iteration completed.
    let best_move = best
        .pv
        .first()
        .cloned()
        .or_else(|| state.root_moves.first().cloned());
    let ponder_move = best.pv.get(1).cloned();

    SearchResult {
        best_move,
        ponder_move,
        score: best.score,
        depth: state.completed_depth(),
        seldepth: best.seldepth,
        nodes: state.nodes(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn test_state(n_workers: usize) -> GameState {
        let root = Position::startpos();
        let root_moves: Vec<Move> = root.legal_moves().iter().cloned().collect();
        GameState::new(
            root,
            root_moves,
            8,
            n_workers,
            Arc::new(TranspositionTable::new(1)),
            None,
            TimeManager::infinite(),
            false,
        )
    }

    #[test]
    fn test_stop_protocol() {
        let state = test_state(1);
        assert_eq!(state.should_stop(), (false, false));
        state.stop_all(false);
        assert_eq!(state.should_stop(), (true, false));
        state.stop_all(true);
        assert_eq!(state.should_stop(), (true, true));
    }

    #[test]
    fn test_ponderhit_clears_flag() {
        let root = Position::startpos();
        let root_moves: Vec<Move> = root.legal_moves().iter().cloned().collect();
        let state = GameState::new(
            root,
            root_moves,
            8,
            1,
            Arc::new(TranspositionTable::new(1)),
            None,
            TimeManager::fixed(1000),
            true,
        );
        assert!(state.is_pondering());
        assert!(state.within_hard_budget(), "pondering suspends the clock");
        state.ponderhit();
        assert!(!state.is_pondering());
    }

    #[test]
    fn test_update_best_prefers_depth_then_score() {
        let state = test_state(1);
        let m1 = state.root.parse_uci_move("e2e4").unwrap();
        let m2 = state.root.parse_uci_move("d2d4").unwrap();

        state.update_best(4, 10, 4, &[m1.clone()]);
        state.update_best(3, 500, 3, &[m2.clone()]);
        assert_eq!(state.best_line().score, 10, "shallower result must not win");

        state.update_best(4, 25, 4, &[m2.clone()]);
        assert_eq!(state.best_line().score, 25, "better score at equal depth wins");

        state.update_best(5, -5, 5, &[m1.clone()]);
        assert_eq!(state.best_line().depth, 5, "deeper result always wins");
    }

    #[test]
    fn test_complete_iteration_reports_once() {
        let state = test_state(2);
        let (_, first_a) = state.complete_iteration(3);
        let (_, first_b) = state.complete_iteration(3);
        assert!(first_a, "first finisher announces the depth");
        assert!(!first_b, "second finisher stays quiet");
        assert_eq!(state.completed_depth(), 3);
    }

    #[test]
    fn test_complete_iteration_spreads_depths() {
        let state = test_state(2);
        // Both workers finished depth 4 -> a third completion of depth 3
        // should be steered past the crowded depth 4.
        state.complete_iteration(4);
        state.complete_iteration(4);
        let (next, _) = state.complete_iteration(3);
        assert!(next > 4, "next depth must skip one already claimed by enough workers");
    }

    #[test]
    fn test_node_counters_sum() {
        let state = test_state(2);
        state.flush_nodes(0, 100);
        state.flush_nodes(1, 250);
        assert_eq!(state.nodes(), 350);
    }
}

// Lazy SMP: all workers run the same iterative deepening on the same root
// and communicate only through the transposition table. Helpers start one
// ply apart and the depth ladder steers them away from depths enough
// workers already finished, so they explore different parts of the tree.

// search threads get an 8 MB stack because each recursion frame keeps a
// move buffer; the platform default is not guaranteed to fit 128 plies.
