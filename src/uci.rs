use std::io::{self, BufRead};
use std::sync::Arc;
use std::thread;

use shakmaty::{Color, Move};

use crate::position::{Position, move_to_uci};
use crate::smp::{self, GameState, WorkerTables};
use crate::syzygy::SyzygyProber;
use crate::time::TimeManager;
use crate::tt::TranspositionTable;
use crate::types::{DEFAULT_DEPTH, EngineConfig, MAX_PLY, MAX_THREADS};

const ENGINE_NAME: &str = "cinder";

/// The driver: owns the game position, the transposition table, and the
/// per-worker tables between searches, and hands them to the SMP
/// coordinator on `go`. The search runs on its own thread; `stop`,
/// `ponderhit` and `quit` talk to it through the shared state.
struct Engine {
    pos: Position,
    config: EngineConfig,
    tt: Arc<TranspositionTable>,
    syzygy: Option<Arc<SyzygyProber>>,
    tables: Vec<WorkerTables>,
    active: Option<(Arc<GameState>, thread::JoinHandle<Vec<WorkerTables>>)>,
}

impl Engine {
    fn new() -> Self {
        let config = EngineConfig::default();
        Self {
            pos: Position::startpos(),
            tt: Arc::new(TranspositionTable::new(config.hash_mb)),
            syzygy: None,
            tables: vec![WorkerTables::new()],
            active: None,
            config,
        }
    }

    /// Join a finished (or stopping) search and recover the worker tables.
    fn wait_for_search(&mut self) {
        if let Some((_, handle)) = self.active.take() {
            match handle.join() {
                Ok(tables) => self.tables = tables,
                Err(_) => {
                    // The search thread panicked; start from fresh tables
                    self.tables = (0..self.config.threads).map(|_| WorkerTables::new()).collect();
                }
            }
        }
    }

    fn stop_search(&mut self, abort: bool) {
        if let Some((state, _)) = &self.active {
            state.stop_all(abort);
        }
        self.wait_for_search();
    }

    fn sync_table_count(&mut self) {
        while self.tables.len() < self.config.threads {
            self.tables.push(WorkerTables::new());
        }
        self.tables.truncate(self.config.threads);
    }

    fn go(&mut self, params: GoParams) {
        self.wait_for_search();
        self.sync_table_count();

        let root = self.pos.clone();
        let mut root_moves: Vec<Move> = root.legal_moves().iter().cloned().collect();
        if !params.searchmoves.is_empty() {
            root_moves.retain(|m| params.searchmoves.contains(&move_to_uci(m)));
        }

        let timeman = params.time_manager(root.turn());
        let sd = match params.depth {
            Some(d) => d,
            None if params.has_limit() => MAX_PLY as i32 - 1,
            None => DEFAULT_DEPTH,
        };

        let state = Arc::new(GameState::new(
            root,
            root_moves,
            sd,
            self.config.threads,
            Arc::clone(&self.tt),
            self.syzygy.clone(),
            timeman,
            params.ponder,
        ));

        let worker_state = Arc::clone(&state);
        let mut tables = std::mem::take(&mut self.tables);
        let handle = thread::Builder::new()
            .name("search".into())
            .stack_size(8 * 1024 * 1024)
            .spawn(move || {
                let result = smp::start_search(&worker_state, &mut tables);
                match result.best_move {
                    Some(best) => match result.ponder_move {
                        Some(ponder) => println!(
                            "bestmove {} ponder {}",
                            move_to_uci(&best),
                            move_to_uci(&ponder)
                        ),
                        None => println!("bestmove {}", move_to_uci(&best)),
                    },
                    None => println!("bestmove 0000"),
                }
                tables
            })
            .expect("failed to spawn search thread");

        self.active = Some((state, handle));
    }

    fn ponderhit(&self) {
        if let Some((state, _)) = &self.active {
            state.ponderhit();
        }
    }

    fn new_game(&mut self) {
        self.wait_for_search();
        self.pos = Position::startpos();
        self.tt.clear();
        for tables in &mut self.tables {
            tables.clear();
        }
    }

    fn set_option(&mut self, name: &str, value: &str) {
        match name.to_lowercase().as_str() {
            "hash" => {
                if let Ok(mb) = value.parse::<usize>() {
                    self.config.hash_mb = mb.clamp(1, 4096);
                    self.tt = Arc::new(TranspositionTable::new(self.config.hash_mb));
                }
            }
            "threads" => {
                if let Ok(n) = value.parse::<usize>() {
                    self.config.threads = n.clamp(1, MAX_THREADS);
                    self.sync_table_count();
                }
            }
            "ponder" => {
                self.config.ponder = value.eq_ignore_ascii_case("true");
            }
            "syzygypath" => {
                if value.is_empty() || value == "<empty>" {
                    self.config.syzygy_path = None;
                    self.syzygy = None;
                } else {
                    self.config.syzygy_path = Some(value.to_string());
                    self.syzygy = SyzygyProber::new(value).map(Arc::new);
                }
            }
            _ => {}
        }
    }
}

pub fn run() {
    let stdin = io::stdin();
    let mut engine = Engine::new();

    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some(&command) = tokens.first() else { continue };

        match command {
            "uci" => {
                println!("id name {ENGINE_NAME}");
                println!("id author cinder team");
                println!("option name Hash type spin default 64 min 1 max 4096");
                println!("option name Threads type spin default 1 min 1 max {MAX_THREADS}");
                println!("option name Ponder type check default false");
                println!("option name SyzygyPath type string default <empty>");
                println!("uciok");
            }
            "isready" => println!("readyok"),
            "ucinewgame" => engine.new_game(),
            "position" => {
                engine.wait_for_search();
                parse_position(&tokens, &mut engine.pos);
            }
            "go" => {
                let params = parse_go(&tokens);
                engine.go(params);
            }
            "stop" => engine.stop_search(true),
            "ponderhit" => engine.ponderhit(),
            "setoption" => {
                engine.wait_for_search();
                if let Some((name, value)) = parse_setoption(&tokens) {
                    engine.set_option(&name, &value);
                }
            }
            "quit" => {
                engine.stop_search(true);
                break;
            }
            _ => {}
        }
    }
}

/// Parsed `go` command parameters.
#[derive(Default)]
struct GoParams {
    depth: Option<i32>,
    movetime: Option<u64>,
    wtime: Option<u64>,
    btime: Option<u64>,
    winc: Option<u64>,
    binc: Option<u64>,
    moves_to_go: Option<u64>,
    infinite: bool,
    ponder: bool,
    searchmoves: Vec<String>,
}

impl GoParams {
    /// Is the search constrained by anything other than the default depth?
    fn has_limit(&self) -> bool {
        self.infinite
            || self.ponder
            || self.movetime.is_some()
            || self.wtime.is_some()
            || self.btime.is_some()
    }

    fn time_manager(&self, side: Color) -> TimeManager {
        if self.infinite {
            return TimeManager::infinite();
        }
        if let Some(ms) = self.movetime {
            return TimeManager::fixed(ms);
        }
        let (time, inc) = match side {
            Color::White => (self.wtime, self.winc.unwrap_or(0)),
            Color::Black => (self.btime, self.binc.unwrap_or(0)),
        };
        match time {
            Some(remaining) => TimeManager::from_clock(remaining, inc, self.moves_to_go),
            // No clock given: the depth limit is the only constraint
            None => TimeManager::infinite(),
        }
    }
}

fn looks_like_move(token: &str) -> bool {
    let b = token.as_bytes();
    (4..=5).contains(&b.len())
        && b[0].is_ascii_lowercase()
        && (b'a'..=b'h').contains(&b[0])
        && (b'1'..=b'8').contains(&b[1])
        && (b'a'..=b'h').contains(&b[2])
        && (b'1'..=b'8').contains(&b[3])
}

fn parse_go(tokens: &[&str]) -> GoParams {
    let mut params = GoParams::default();
    let mut i = 1;

    while i < tokens.len() {
        match tokens[i] {
            "depth" => {
                i += 1;
                params.depth = tokens.get(i).and_then(|t| t.parse().ok());
            }
            "movetime" => {
                i += 1;
                params.movetime = tokens.get(i).and_then(|t| t.parse().ok());
            }
            "wtime" => {
                i += 1;
                params.wtime = tokens.get(i).and_then(|t| t.parse().ok());
            }
            "btime" => {
                i += 1;
                params.btime = tokens.get(i).and_then(|t| t.parse().ok());
            }
            "winc" => {
                i += 1;
                params.winc = tokens.get(i).and_then(|t| t.parse().ok());
            }
            "binc" => {
                i += 1;
                params.binc = tokens.get(i).and_then(|t| t.parse().ok());
            }
            "movestogo" => {
                i += 1;
                params.moves_to_go = tokens.get(i).and_then(|t| t.parse().ok());
            }
            "infinite" => params.infinite = true,
            "ponder" => params.ponder = true,
            "searchmoves" => {
                // Everything shaped like a coordinate move until the next keyword
                while let Some(t) = tokens.get(i + 1) {
                    if !looks_like_move(t) {
                        break;
                    }
                    params.searchmoves.push((*t).to_string());
                    i += 1;
                }
            }
            _ => {}
        }
        i += 1;
    }

    params
}

/// `position [startpos | fen <fen>] [moves ...]`. An unparsable FEN or an
/// illegal move leaves the current position alone from that point on.
fn parse_position(tokens: &[&str], pos: &mut Position) {
    if tokens.len() < 2 {
        return;
    }

    let mut idx = 1;
    let mut next = match tokens[idx] {
        "startpos" => {
            idx += 1;
            Position::startpos()
        }
        "fen" => {
            idx += 1;
            let mut fen_parts: Vec<&str> = Vec::new();
            while idx < tokens.len() && tokens[idx] != "moves" && fen_parts.len() < 6 {
                fen_parts.push(tokens[idx]);
                idx += 1;
            }
            match Position::from_fen(&fen_parts.join(" ")) {
                Some(p) => p,
                None => return,
            }
        }
        _ => return,
    };

    if tokens.get(idx) == Some(&"moves") {
        for token in &tokens[idx + 1..] {
            match next.parse_uci_move(token) {
                Some(m) => next.make_move(&m),
                None => break,
            }
        }
    }

    // The played line becomes game history for repetition detection
    next.rebase();
    *pos = next;
}

fn parse_setoption(tokens: &[&str]) -> Option<(String, String)> {
    let name_idx = tokens.iter().position(|&t| t == "name")?;
    let value_idx = tokens.iter().position(|&t| t == "value")?;
    if value_idx <= name_idx {
        return None;
    }
    Some((
        tokens[name_idx + 1..value_idx].join(" "),
        tokens[value_idx + 1..].join(" "),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_position_startpos() {
        let mut pos = Position::startpos();
        parse_position(&["position", "startpos"], &mut pos);
        assert_eq!(pos.key(), Position::startpos().key());
    }

    #[test]
    fn test_parse_position_with_moves() {
        let mut pos = Position::startpos();
        parse_position(&["position", "startpos", "moves", "e2e4", "e7e5"], &mut pos);
        assert_ne!(pos.key(), Position::startpos().key());
        assert_eq!(pos.sply(), 0, "played moves become history, not search plies");
    }

    #[test]
    fn test_parse_position_fen() {
        let mut pos = Position::startpos();
        let tokens = [
            "position", "fen", "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR", "b", "KQkq",
            "-", "0", "1",
        ];
        parse_position(&tokens, &mut pos);
        assert_eq!(pos.turn(), Color::Black);
    }

    #[test]
    fn test_parse_position_bad_fen_keeps_old() {
        let mut pos = Position::startpos();
        let before = pos.key();
        parse_position(&["position", "fen", "garbage"], &mut pos);
        assert_eq!(pos.key(), before, "an invalid FEN must not clobber the position");
    }

    #[test]
    fn test_parse_go_depth() {
        let params = parse_go(&["go", "depth", "6"]);
        assert_eq!(params.depth, Some(6));
        assert!(!params.has_limit());
    }

    #[test]
    fn test_parse_go_clock() {
        let params = parse_go(&[
            "go", "wtime", "60000", "btime", "59000", "winc", "1000", "binc", "900",
        ]);
        assert_eq!(params.wtime, Some(60_000));
        assert_eq!(params.btime, Some(59_000));
        assert_eq!(params.winc, Some(1_000));
        assert_eq!(params.binc, Some(900));
        assert!(params.has_limit());
    }

    #[test]
    fn test_parse_go_ponder_infinite() {
        let params = parse_go(&["go", "ponder", "wtime", "1000", "btime", "1000"]);
        assert!(params.ponder);
        let params = parse_go(&["go", "infinite"]);
        assert!(params.infinite);
    }

    #[test]
    fn test_parse_go_searchmoves() {
        let params = parse_go(&["go", "searchmoves", "e2e4", "d2d4", "depth", "3"]);
        assert_eq!(params.searchmoves, vec!["e2e4", "d2d4"]);
        assert_eq!(params.depth, Some(3));
    }

    #[test]
    fn test_parse_setoption() {
        let parsed = parse_setoption(&["setoption", "name", "Hash", "value", "128"]);
        assert_eq!(parsed, Some(("Hash".to_string(), "128".to_string())));

        let parsed = parse_setoption(&["setoption", "name", "Syzygy", "Path", "value", "x"]);
        assert_eq!(parsed, Some(("Syzygy Path".to_string(), "x".to_string())));
    }

    #[test]
    fn test_time_manager_without_clock_is_infinite() {
        let params = parse_go(&["go", "depth", "5"]);
        let tm = params.time_manager(Color::White);
        assert!(tm.check_time());
        assert!(tm.new_iteration());
    }
}
