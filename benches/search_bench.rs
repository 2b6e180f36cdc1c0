use std::sync::Arc;

use criterion::{Criterion, criterion_group, criterion_main};
use shakmaty::Move;

use cinder::position::Position;
use cinder::smp::{GameState, WorkerTables, start_search};
use cinder::time::TimeManager;
use cinder::tt::TranspositionTable;

fn fixed_depth_search(fen: &str, depth: i32) -> u64 {
    let root = Position::from_fen(fen).expect("valid fen");
    let root_moves: Vec<Move> = root.legal_moves().iter().cloned().collect();
    let mut state = GameState::new(
        root,
        root_moves,
        depth,
        1,
        Arc::new(TranspositionTable::new(16)),
        None,
        TimeManager::infinite(),
        false,
    );
    state.silent = true;
    let mut tables = vec![WorkerTables::new()];
    start_search(&state, &mut tables).nodes
}

fn bench_search(c: &mut Criterion) {
    const STARTPOS: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";
    const KIWIPETE: &str = "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1";

    c.bench_function("search_depth_4_startpos", |b| {
        b.iter(|| fixed_depth_search(STARTPOS, 4))
    });

    c.bench_function("search_depth_4_kiwipete", |b| {
        b.iter(|| fixed_depth_search(KIWIPETE, 4))
    });

    c.bench_function("search_depth_6_startpos", |b| {
        b.iter(|| fixed_depth_search(STARTPOS, 6))
    });
}

criterion_group!(benches, bench_search);
criterion_main!(benches);
