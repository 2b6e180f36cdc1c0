pub mod evaluation;
pub mod heuristics;
pub mod movepick;
pub mod position;
pub mod pst;
pub mod search;
pub mod see;
pub mod smp;
pub mod syzygy;
pub mod time;
pub mod tt;
pub mod types;
pub mod uci;

pub use position::Position;
pub use smp::{GameState, WorkerTables, start_search};
pub use time::TimeManager;
pub use tt::TranspositionTable;
pub use types::{EngineConfig, SearchResult};
