mod common;

use std::time::Instant;

use common::{assert_mirror_matches, bots, config, server, step, SEED};
use dungeon_core::CycleOutcome;
use dungeon_proto::ServerNotification;

#[test]
fn turn_started_closes_every_turn_in_sequence() -> anyhow::Result<()> {
    let mut ctx = server(config(SEED, 2))?;
    let mut players = bots(&ctx, &["alice", "bob"], Some(2));
    let now = Instant::now();
    let mut completed = Vec::new();
    while completed.len() < 40 {
        let (outcome, batches) = step(&mut ctx, &mut players, now)?;
        let CycleOutcome::TurnCompleted(turn) = outcome else {
            continue;
        };
        completed.push(turn);
        for batch in &batches {
            assert_eq!(
                batch.last(),
                Some(&ServerNotification::TurnStarted { turn: turn as i64 }),
                "turn {turn} not closed by TurnStarted"
            );
            let closers = batch
                .iter()
                .filter(|n| matches!(n, ServerNotification::TurnStarted { .. }))
                .count();
            assert_eq!(closers, 1);
        }
    }
    assert_eq!(completed, (1..=40).collect::<Vec<u64>>());
    Ok(())
}

#[test]
fn mirrors_follow_the_server_without_desyncs() -> anyhow::Result<()> {
    let mut ctx = server(config(SEED, 2))?;
    let mut players = bots(&ctx, &["alice", "bob"], Some(2));
    // odd turn: the last round of dig predictions has been confirmed
    common::run_until(&mut ctx, &mut players, 81, Instant::now())?;
    for player in &players {
        assert_eq!(player.mirror().desyncs(), 0);
        assert_mirror_matches(&mut ctx, player.mirror());
    }
    // the diggers made progress
    let marked = players[0]
        .received
        .iter()
        .filter(|n| matches!(n, ServerNotification::MarkTiles { mark: true, .. }))
        .count();
    assert!(marked > 0);
    Ok(())
}

#[test]
fn handshake_precedes_the_first_turn() -> anyhow::Result<()> {
    let mut ctx = server(config(SEED, 1))?;
    let mut players = bots(&ctx, &["solo"], None);
    common::run_until(&mut ctx, &mut players, 1, Instant::now())?;
    let kinds: Vec<&str> = players[0]
        .received
        .iter()
        .map(|n| n.kind().name())
        .take(6)
        .collect();
    assert_eq!(
        kinds,
        [
            "LoadLevel",
            "PickNick",
            "AddPlayers",
            "ClientAccepted",
            "StartGameMode",
            "CatchUpSnapshot"
        ]
    );
    Ok(())
}
