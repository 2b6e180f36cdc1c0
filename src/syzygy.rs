use std::path::Path;

use shakmaty::Chess;
use shakmaty_syzygy::{SyzygyError, Tablebase, Wdl};

use crate::types::{Score, TABLEBASE_WIN};

/// Win/draw/loss probe into Syzygy tables. Probe misses degrade to `None`;
/// the search treats every failure as "no tablebase knowledge".
pub struct SyzygyProber {
    tablebase: Tablebase<Chess>,
}

impl SyzygyProber {
    /// Load tables from a directory. Returns None if the path is not a
    /// directory or contains no usable tables.
    pub fn new(path: &str) -> Option<Self> {
        if !Path::new(path).is_dir() {
            return None;
        }
        let mut tablebase = Tablebase::new();
        if tablebase.add_directory(path).is_err() {
            return None;
        }
        if tablebase.max_pieces() == 0 {
            return None;
        }
        Some(Self { tablebase })
    }

    /// Largest piece count the loaded tables cover.
    pub fn max_pieces(&self) -> usize {
        self.tablebase.max_pieces()
    }

    /// WDL score for the side to move, scaled by ply so earlier conversions
    /// into a tablebase win rank higher. Cursed wins and blessed losses are
    /// draws under the fifty-move rule and score near zero.
    pub fn probe_wdl(&self, pos: &Chess, sply: usize) -> Option<Score> {
        match self.tablebase.probe_wdl_after_zeroing(pos) {
            Ok(wdl) => Some(match wdl {
                Wdl::Win => TABLEBASE_WIN - sply as Score,
                Wdl::Loss => -(TABLEBASE_WIN - sply as Score),
                Wdl::CursedWin => 100,
                Wdl::BlessedLoss => -100,
                Wdl::Draw => 0,
            }),
            Err(SyzygyError::MissingTable { .. }) => None,
            Err(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_path_rejected() {
        assert!(SyzygyProber::new("/nonexistent/path").is_none());
    }

    #[test]
    fn test_file_path_rejected() {
        assert!(SyzygyProber::new("Cargo.toml").is_none(), "a file is not a table directory");
    }
}
