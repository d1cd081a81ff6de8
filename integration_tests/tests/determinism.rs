mod common;

use std::time::Instant;

use common::{bots, config, run_until, server, Player, SEED};
use dungeon_core::build_snapshot;

fn play(seed: u64, turns: u64) -> anyhow::Result<(u64, Vec<Vec<u8>>)> {
    let mut ctx = server(config(seed, 2))?;
    let mut players: Vec<Player> = bots(&ctx, &["alice", "bob"], Some(3));
    run_until(&mut ctx, &mut players, turns, Instant::now())?;
    for player in &mut players {
        player.pump();
    }
    let hash = build_snapshot(ctx.world_mut()).header.hash;
    Ok((hash, players.into_iter().map(|p| p.stream).collect()))
}

#[test]
fn identical_seeds_produce_identical_streams() -> anyhow::Result<()> {
    let (hash_a, streams_a) = play(SEED, 60)?;
    let (hash_b, streams_b) = play(SEED, 60)?;
    assert_eq!(hash_a, hash_b);
    assert_eq!(streams_a.len(), 2);
    for (a, b) in streams_a.iter().zip(&streams_b) {
        assert!(!a.is_empty());
        assert!(a == b, "notification streams differ");
    }
    Ok(())
}

#[test]
fn snapshot_history_hashes_repeat_across_runs() -> anyhow::Result<()> {
    let run = |seed| -> anyhow::Result<Vec<u64>> {
        let mut ctx = server(config(seed, 1))?;
        let mut players = bots(&ctx, &["solo"], Some(2));
        run_until(&mut ctx, &mut players, 25, Instant::now())?;
        Ok(ctx
            .world()
            .resource::<dungeon_core::SnapshotHistory>()
            .entries()
            .map(|entry| entry.hash)
            .collect())
    };
    let first = run(SEED)?;
    assert!(!first.is_empty());
    assert_eq!(first, run(SEED)?);
    Ok(())
}
