use std::time::Instant;

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use dungeon_core::{
    build_app, GameplayConfig, LevelDefinition, ServerConfig, ServerContext, Transport,
};

/// Builtin level with every starting creature copied `copies` times.
fn crowded_context(copies: usize) -> ServerContext {
    let mut level = LevelDefinition::clone(&LevelDefinition::builtin());
    let originals = level.creatures.clone();
    for _ in 1..copies {
        level.creatures.extend(originals.iter().cloned());
    }
    let app = build_app(ServerConfig::default(), GameplayConfig::builtin(), &level)
        .expect("crowded level should install");
    let mut ctx = ServerContext::new(app, Transport::loopback());
    ctx.turns.start();
    ctx
}

fn bench_turn(c: &mut Criterion) {
    let mut group = c.benchmark_group("turn");

    for copies in [1usize, 4, 16, 32] {
        group.bench_with_input(
            BenchmarkId::new("creatures", copies * 12),
            &copies,
            |b, &copies| {
                b.iter_batched(
                    || crowded_context(copies),
                    |mut ctx| {
                        for _ in 0..8 {
                            ctx.advance(Instant::now()).expect("turn should advance");
                        }
                    },
                    BatchSize::SmallInput,
                )
            },
        );
    }

    group.finish();
}

criterion_group!(turn_benches, bench_turn);
criterion_main!(turn_benches);
