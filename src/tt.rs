use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use crate::types::{FORCED_MATE, PackedMove, Score};

/// Bound kind stored with a score.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Bound {
    None = 0,
    Exact = 1,
    /// Beta cutoff (score >= beta)
    Lower = 2,
    /// Failed low (score <= alpha)
    Upper = 3,
}

impl Bound {
    const fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            1 => Bound::Exact,
            2 => Bound::Lower,
            3 => Bound::Upper,
            _ => Bound::None,
        }
    }
}

/// Result of probing the table.
pub struct TtProbe {
    /// Score usable for an immediate return against the probe window.
    pub cutoff: Option<Score>,
    /// Stored best move, usable for ordering even without a cutoff.
    pub mv: PackedMove,
}

/// Mate scores are path-dependent (`SCORE_MATE - ply`). They are stored as
/// distance-from-node so entries stay valid wherever the position reappears.
fn score_to_tt(score: Score, sply: usize) -> i16 {
    let adjusted = if score > FORCED_MATE {
        score + sply as Score
    } else if score < -FORCED_MATE {
        score - sply as Score
    } else {
        score
    };
    adjusted as i16
}

fn score_from_tt(score: i16, sply: usize) -> Score {
    let score = Score::from(score);
    if score > FORCED_MATE {
        score - sply as Score
    } else if score < -FORCED_MATE {
        score + sply as Score
    } else {
        score
    }
}

// Two atomic words form one 16-byte entry; four entries form one
// cache-line bucket.
//
// word0: [63:32] key32 | [31:26] generation | [25:24] bound
//        | [23:16] depth (i8) | [15:0] packed move
// word1: [63:32] checksum = key32 ^ (word0 & 0xFFFF_FFFF) | [31:16] score
//
// A torn write leaves the checksum inconsistent with word0, so a reader
// treats the entry as a miss: safe loss, never corruption.
struct Entry {
    word0: AtomicU64,
    word1: AtomicU64,
}

impl Entry {
    const fn new() -> Self {
        Self { word0: AtomicU64::new(0), word1: AtomicU64::new(0) }
    }

    fn pack_word0(key32: u32, generation: u8, bound: Bound, depth: i8, mv: PackedMove) -> u64 {
        (u64::from(key32) << 32)
            | (u64::from(generation & 0x3f) << 26)
            | (u64::from(bound as u8) << 24)
            | (u64::from(depth as u8) << 16)
            | u64::from(mv.0)
    }

    fn pack_word1(w0: u64, score: i16) -> u64 {
        let checksum = ((w0 >> 32) as u32) ^ (w0 & 0xffff_ffff) as u32;
        (u64::from(checksum) << 32) | (u64::from(score as u16) << 16)
    }

    fn decode_w0(w0: u64) -> (u32, u8, Bound, i8, PackedMove) {
        (
            (w0 >> 32) as u32,
            ((w0 >> 26) & 0x3f) as u8,
            Bound::from_bits(((w0 >> 24) & 0x03) as u8),
            ((w0 >> 16) & 0xff) as u8 as i8,
            PackedMove((w0 & 0xffff) as u16),
        )
    }

    /// Load and verify against `key`. None on mismatch or torn write.
    fn load(&self, key: u64) -> Option<(Bound, i8, PackedMove, i16)> {
        let w0 = self.word0.load(Ordering::Relaxed);
        let w1 = self.word1.load(Ordering::Relaxed);

        let expected = ((w0 >> 32) as u32) ^ (w0 & 0xffff_ffff) as u32;
        if expected != (w1 >> 32) as u32 {
            return None;
        }

        let (key32, _, bound, depth, mv) = Self::decode_w0(w0);
        if key32 != (key >> 32) as u32 || bound == Bound::None {
            return None;
        }
        Some((bound, depth, mv, ((w1 >> 16) & 0xffff) as u16 as i16))
    }
}

/// Shared lock-free transposition table. All receivers are `&self`; workers
/// share it without any synchronisation beyond the atomics themselves.
pub struct TranspositionTable {
    entries: Box<[Entry]>,
    bucket_mask: u64,
    generation: AtomicU8,
}

pub const BUCKET_SIZE: usize = 4;
const MIN_BUCKETS: usize = 256;

impl TranspositionTable {
    /// Allocate with the given size in megabytes. Sizes too small for even
    /// one bucket fall back to the smallest supported table.
    pub fn new(mb: usize) -> Self {
        let bucket_bytes = BUCKET_SIZE * std::mem::size_of::<Entry>();
        let requested = (mb * 1024 * 1024) / bucket_bytes;
        let buckets = (requested.next_power_of_two() / 2).max(MIN_BUCKETS);

        let entries: Box<[Entry]> = (0..buckets * BUCKET_SIZE).map(|_| Entry::new()).collect();
        Self {
            entries,
            bucket_mask: (buckets - 1) as u64,
            generation: AtomicU8::new(0),
        }
    }

    fn bucket(&self, key: u64) -> &[Entry] {
        let start = (key & self.bucket_mask) as usize * BUCKET_SIZE;
        &self.entries[start..start + BUCKET_SIZE]
    }

    /// Advance the generation; entries from earlier searches become the
    /// preferred replacement victims.
    pub fn age(&self) {
        let g = self.generation.load(Ordering::Relaxed);
        self.generation.store(g.wrapping_add(1) & 0x3f, Ordering::Relaxed);
    }

    pub fn clear(&self) {
        for entry in self.entries.iter() {
            entry.word0.store(0, Ordering::Relaxed);
            entry.word1.store(0, Ordering::Relaxed);
        }
        self.generation.store(0, Ordering::Relaxed);
    }

    /// Probe for `key`. A stored score produces a cutoff only when its depth
    /// covers the request and its bound justifies a return against (alpha,
    /// beta): exact always, lower only when `s >= beta`, upper only when
    /// `s <= alpha`. The stored move comes back either way.
    pub fn probe(&self, key: u64, depth: i32, alpha: Score, beta: Score, sply: usize) -> TtProbe {
        for entry in self.bucket(key) {
            if let Some((bound, edepth, mv, raw)) = entry.load(key) {
                let score = score_from_tt(raw, sply);
                let cutoff = if i32::from(edepth) >= depth {
                    match bound {
                        Bound::Exact => Some(score),
                        Bound::Lower if score >= beta => Some(score),
                        Bound::Upper if score <= alpha => Some(score),
                        _ => None,
                    }
                } else {
                    None
                };
                return TtProbe { cutoff, mv };
            }
        }
        TtProbe { cutoff: None, mv: PackedMove::NONE }
    }

    /// Store an entry. Within the bucket, an empty slot is preferred, then a
    /// slot holding the same key, then the stalest/shallowest slot among
    /// those the new entry is allowed to evict.
    pub fn store(
        &self,
        key: u64,
        mv: PackedMove,
        depth: i32,
        score: Score,
        bound: Bound,
        sply: usize,
    ) {
        let generation = self.generation.load(Ordering::Relaxed);
        let key32 = (key >> 32) as u32;
        let bucket = self.bucket(key);

        let mut victim: Option<&Entry> = None;
        let mut victim_badness = -1i32;
        let mut keep_move = PackedMove::NONE;

        for entry in bucket {
            let w0 = entry.word0.load(Ordering::Relaxed);
            let (ekey32, egen, ebound, edepth, emv) = Entry::decode_w0(w0);

            if ebound == Bound::None {
                victim = Some(entry);
                keep_move = PackedMove::NONE;
                break;
            }
            if ekey32 == key32 {
                victim = Some(entry);
                keep_move = emv;
                break;
            }
            let age_diff = i32::from(generation.wrapping_sub(egen) & 0x3f);
            if age_diff > 0 || i32::from(edepth) < depth {
                // Oldest first, then shallowest
                let badness = age_diff * 256 + (255 - i32::from(edepth));
                if badness > victim_badness {
                    victim_badness = badness;
                    victim = Some(entry);
                }
            }
        }

        let Some(entry) = victim else {
            return;
        };

        // A store without a best move keeps the move already known here
        let mv = if mv.is_none() { keep_move } else { mv };

        let w0 = Entry::pack_word0(key32, generation, bound, depth as i8, mv);
        let w1 = Entry::pack_word1(w0, score_to_tt(score, sply));
        entry.word0.store(w0, Ordering::Relaxed);
        entry.word1.store(w1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SCORE_INFINITY, SCORE_MATE};

    const WIDE: (Score, Score) = (-SCORE_INFINITY, SCORE_INFINITY);

    #[test]
    fn test_store_and_probe_roundtrip() {
        let tt = TranspositionTable::new(1);
        let key = 0xDEAD_BEEF_1234_5678u64;
        let mv = PackedMove(0x0123);

        tt.store(key, mv, 5, 100, Bound::Exact, 0);

        let probe = tt.probe(key, 5, WIDE.0, WIDE.1, 0);
        assert_eq!(probe.cutoff, Some(100));
        assert_eq!(probe.mv, mv);
    }

    #[test]
    fn test_probe_miss() {
        let tt = TranspositionTable::new(1);
        let probe = tt.probe(0x1234_5678_9ABC_DEF0, 1, WIDE.0, WIDE.1, 0);
        assert!(probe.cutoff.is_none());
        assert!(probe.mv.is_none());
    }

    #[test]
    fn test_shallow_entry_gives_move_but_no_cutoff() {
        let tt = TranspositionTable::new(1);
        let key = 0xAAAA_0000_1111_2222u64;
        let mv = PackedMove(0x0456);
        tt.store(key, mv, 3, 50, Bound::Exact, 0);

        let probe = tt.probe(key, 6, WIDE.0, WIDE.1, 0);
        assert!(probe.cutoff.is_none(), "depth 3 entry cannot answer a depth 6 probe");
        assert_eq!(probe.mv, mv, "the move is still usable for ordering");
    }

    #[test]
    fn test_bound_gating() {
        let tt = TranspositionTable::new(1);
        let key = 0xBBBB_0000_2222_3333u64;
        tt.store(key, PackedMove::NONE, 4, 80, Bound::Lower, 0);

        // Lower bound of 80 only cuts when beta <= 80
        assert!(tt.probe(key, 4, 0, 50, 0).cutoff.is_some());
        assert!(tt.probe(key, 4, 0, 200, 0).cutoff.is_none());

        tt.store(key, PackedMove::NONE, 4, -80, Bound::Upper, 0);
        assert!(tt.probe(key, 4, -50, 50, 0).cutoff.is_some());
        assert!(tt.probe(key, 4, -200, 50, 0).cutoff.is_none());
    }

    #[test]
    fn test_mate_score_adjustment() {
        let tt = TranspositionTable::new(1);
        let key = 0xCCCC_0000_3333_4444u64;

        // Mate found 3 plies into the search, stored from sply 3
        tt.store(key, PackedMove::NONE, 10, SCORE_MATE - 6, Bound::Exact, 3);

        // Read back at sply 5: mate is now measured from the new node
        let probe = tt.probe(key, 10, WIDE.0, WIDE.1, 5);
        assert_eq!(probe.cutoff, Some(SCORE_MATE - 8));
    }

    #[test]
    fn test_same_key_replaces_and_keeps_move() {
        let tt = TranspositionTable::new(1);
        let key = 0xDDDD_0000_4444_5555u64;
        let mv = PackedMove(0x0789);

        tt.store(key, mv, 6, 75, Bound::Exact, 0);
        // A later store without a move must not wipe the known best move
        tt.store(key, PackedMove::NONE, 7, 90, Bound::Lower, 0);

        let probe = tt.probe(key, 7, 0, 50, 0);
        assert_eq!(probe.cutoff, Some(90));
        assert_eq!(probe.mv, mv);
    }

    #[test]
    fn test_bucket_holds_four_keys() {
        let tt = TranspositionTable::new(1);
        // Same bucket (identical low bits), distinct 32-bit tags
        let keys: Vec<u64> = (1..=4u64).map(|i| (i << 32) | 0x42).collect();
        for (i, &key) in keys.iter().enumerate() {
            tt.store(key, PackedMove(i as u16 + 1), 5, i as Score, Bound::Exact, 0);
        }
        for (i, &key) in keys.iter().enumerate() {
            let probe = tt.probe(key, 5, WIDE.0, WIDE.1, 0);
            assert_eq!(probe.cutoff, Some(i as Score), "all four bucket slots must survive");
        }
    }

    #[test]
    fn test_aged_entries_are_preferred_victims() {
        let tt = TranspositionTable::new(1);
        let keys: Vec<u64> = (1..=4u64).map(|i| (i << 32) | 0x99).collect();
        for &key in &keys {
            tt.store(key, PackedMove::NONE, 10, 1, Bound::Exact, 0);
        }
        tt.age();

        // A shallow store from the new generation evicts one stale entry
        let fresh = (9u64 << 32) | 0x99;
        tt.store(fresh, PackedMove::NONE, 1, 42, Bound::Exact, 0);
        let probe = tt.probe(fresh, 1, WIDE.0, WIDE.1, 0);
        assert_eq!(probe.cutoff, Some(42));
    }

    #[test]
    fn test_torn_write_detected() {
        let tt = TranspositionTable::new(1);
        let key = 0xEEEE_0000_5555_6666u64;
        tt.store(key, PackedMove(0x0321), 5, 100, Bound::Exact, 0);
        assert!(tt.probe(key, 5, WIDE.0, WIDE.1, 0).cutoff.is_some());

        // Corrupt the checksum to simulate a torn write
        let start = (key & tt.bucket_mask) as usize * BUCKET_SIZE;
        for entry in &tt.entries[start..start + BUCKET_SIZE] {
            let w1 = entry.word1.load(Ordering::Relaxed);
            if w1 != 0 {
                entry.word1.store(w1 ^ 0xFFFF_FFFF_0000_0000, Ordering::Relaxed);
            }
        }
        let probe = tt.probe(key, 5, WIDE.0, WIDE.1, 0);
        assert!(probe.cutoff.is_none(), "torn entry must read as a miss");
        assert!(probe.mv.is_none());
    }

    #[test]
    fn test_clear_wipes_table() {
        let tt = TranspositionTable::new(1);
        let key = 0xFFFF_0000_6666_7777u64;
        tt.store(key, PackedMove::NONE, 5, 100, Bound::Exact, 0);
        tt.clear();
        assert!(tt.probe(key, 0, WIDE.0, WIDE.1, 0).cutoff.is_none());
    }

    #[test]
    fn test_concurrent_stress_no_torn_reads() {
        use std::sync::Arc;
        use std::thread;

        let tt = Arc::new(TranspositionTable::new(2));
        thread::scope(|s| {
            for t in 0..8u64 {
                let tt = Arc::clone(&tt);
                s.spawn(move || {
                    for i in 0u64..10_000 {
                        let key = t
                            .wrapping_mul(6364136223846793005)
                            .wrapping_add(i.wrapping_mul(2862933555777941757));
                        tt.store(key, PackedMove(0x0111), 5, 100, Bound::Exact, 0);
                        if let Some(score) = tt.probe(key, 5, -200, 200, 0).cutoff {
                            assert_eq!(score, 100, "an intact hit must return the stored score");
                        }
                    }
                });
            }
        });
    }
}

// Entries are two 64-bit words written without locks. Word1 carries an XOR
// checksum of word0, so a reader that catches a half-finished write sees a
// checksum mismatch and treats the slot as empty. Worst case is a wasted
// probe, never a wrong score.

// Buckets are 4 entries = 64 bytes = one cache line. Replacement walks the
// bucket once: empty slot first, then the slot already holding this key,
// then the stalest/shallowest slot the new entry may evict.
