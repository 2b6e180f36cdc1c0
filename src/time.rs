use std::time::Instant;

/// How the clock constrains this search.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeMode {
    /// Search until told to stop
    Infinite,
    /// Exactly the given time per move
    FixedTime,
    /// Whole game on the clock, no increment
    SuddenDeath,
    /// Base time plus per-move increment
    Fischer,
    /// N moves to reach the next control
    Tournament,
}

/// Per-move budgets: an ideal budget that gates new iterations and a hard
/// budget that aborts the search outright.
#[derive(Clone, Copy, Debug)]
pub struct TimeManager {
    mode: TimeMode,
    start: Instant,
    ideal_ms: u64,
    hard_ms: u64,
}

/// Assumed moves remaining when the GUI gives no move counter.
const DEFAULT_HORIZON: u64 = 30;

impl TimeManager {
    pub fn infinite() -> Self {
        Self { mode: TimeMode::Infinite, start: Instant::now(), ideal_ms: 0, hard_ms: 0 }
    }

    pub fn fixed(ms: u64) -> Self {
        Self { mode: TimeMode::FixedTime, start: Instant::now(), ideal_ms: ms, hard_ms: ms }
    }

    /// Budget a move from clock state: base share of the remaining time plus
    /// three quarters of the increment, with the hard budget capped so a
    /// single move can never burn more than 80% of the clock.
    pub fn from_clock(remaining: u64, increment: u64, movestogo: Option<u64>) -> Self {
        let mode = match (movestogo, increment) {
            (Some(_), _) => TimeMode::Tournament,
            (None, 0) => TimeMode::SuddenDeath,
            (None, _) => TimeMode::Fischer,
        };
        let horizon = movestogo.unwrap_or(DEFAULT_HORIZON).max(1);
        let ideal = (remaining / horizon + increment * 3 / 4).max(1);
        let hard = (ideal * 4).min(remaining * 4 / 5).max(1);
        Self { mode, start: Instant::now(), ideal_ms: ideal.min(hard), hard_ms: hard }
    }

    /// Re-arm the clock, e.g. at search start or on ponderhit.
    pub fn restart(&mut self) {
        self.start = Instant::now();
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// Is there enough budget left to make starting another depth worthwhile?
    /// An iteration that begins after half the ideal budget rarely finishes.
    pub fn new_iteration(&self) -> bool {
        match self.mode {
            TimeMode::Infinite => true,
            _ => self.elapsed_ms() <= self.ideal_ms / 2,
        }
    }

    /// False once the hard budget is exhausted; the search must stop now.
    pub fn check_time(&self) -> bool {
        match self.mode {
            TimeMode::Infinite => true,
            _ => self.elapsed_ms() < self.hard_ms,
        }
    }
}
