mod common;

use std::time::{Duration, Instant};

use common::{assert_mirror_matches, bots, config, run_until, server, step, SEED};
use dungeon_core::{CycleOutcome, SessionPhase};
use dungeon_proto::{ClientNotification, ServerNotification};

#[test]
fn silent_session_lags_and_catches_up() -> anyhow::Result<()> {
    let mut ctx = server(config(SEED, 3))?;
    let mut players = bots(&ctx, &["alice", "bob", "carol"], None);
    let now = Instant::now();
    run_until(&mut ctx, &mut players, 1, now)?;
    players[2].silent = true;

    run_until(&mut ctx, &mut players, 2, now)?;
    // carol never acked turn 2, so turn 3 waits for the timeout
    for _ in 0..4 {
        let (outcome, _) = step(&mut ctx, &mut players, now)?;
        assert_eq!(outcome, CycleOutcome::Waiting);
    }
    assert_eq!(ctx.turns.turn(), 2);

    let late = now + Duration::from_secs(6);
    let (outcome, batches) = step(&mut ctx, &mut players, late)?;
    assert_eq!(outcome, CycleOutcome::TurnCompleted(3));
    assert_eq!(players[2].phase(&ctx), Some(SessionPhase::Lagging));
    assert!(batches[2].iter().all(|n| !n.is_world_delta()));
    assert_eq!(ctx.turns.lagging().collect::<Vec<_>>(), vec![players[2].client.session()]);

    // the others are no longer held back
    run_until(&mut ctx, &mut players, 8, late)?;
    assert!(!players[2]
        .received
        .iter()
        .any(|n| matches!(n, ServerNotification::TurnStarted { turn } if *turn > 2)));

    players[2].silent = false;
    let current = ctx.turns.turn() as i64;
    players[2]
        .client
        .send(&ClientNotification::AckNewTurn { turn: current });
    step(&mut ctx, &mut players, late)?;
    assert_eq!(players[2].phase(&ctx), Some(SessionPhase::Playing));
    assert!(players[2].received.iter().any(
        |n| matches!(n, ServerNotification::CatchUpSnapshot { turn, .. } if *turn == current)
    ));

    let target = ctx.turns.turn() + 3;
    run_until(&mut ctx, &mut players, target, late)?;
    for player in &mut players {
        player.pump();
    }
    assert!(ctx.turns.lagging().next().is_none());
    for player in &players {
        assert_eq!(player.mirror().desyncs(), 0);
        assert_mirror_matches(&mut ctx, player.mirror());
    }
    Ok(())
}

#[test]
fn stale_and_duplicate_acks_do_not_advance_turns() -> anyhow::Result<()> {
    let mut ctx = server(config(SEED, 2))?;
    let mut players = bots(&ctx, &["alice", "bob"], None);
    let now = Instant::now();
    run_until(&mut ctx, &mut players, 3, now)?;
    players[1].silent = true;
    run_until(&mut ctx, &mut players, 4, now)?;

    // bob replays old acks and alice acks twice; turn 5 still waits for bob
    for turn in [1, 2, 3] {
        players[1]
            .client
            .send(&ClientNotification::AckNewTurn { turn });
    }
    players[0]
        .client
        .send(&ClientNotification::AckNewTurn { turn: 4 });
    let (outcome, _) = step(&mut ctx, &mut players, now)?;
    assert_eq!(outcome, CycleOutcome::Waiting);
    assert_eq!(ctx.turns.pending(), vec![players[1].client.session()]);

    players[1]
        .client
        .send(&ClientNotification::AckNewTurn { turn: 4 });
    let (outcome, _) = step(&mut ctx, &mut players, now)?;
    assert_eq!(outcome, CycleOutcome::TurnCompleted(5));
    Ok(())
}

#[test]
fn disconnect_releases_the_turn_gate() -> anyhow::Result<()> {
    let mut ctx = server(config(SEED, 2))?;
    let mut players = bots(&ctx, &["alice", "bob"], None);
    let now = Instant::now();
    run_until(&mut ctx, &mut players, 2, now)?;
    players[1].silent = true;
    run_until(&mut ctx, &mut players, 3, now)?;
    let (outcome, _) = step(&mut ctx, &mut players, now)?;
    assert_eq!(outcome, CycleOutcome::Waiting);

    players[1].client.disconnect();
    let (outcome, batches) = step(&mut ctx, &mut players, now)?;
    assert_eq!(outcome, CycleOutcome::TurnCompleted(4));
    assert!(batches[0]
        .iter()
        .any(|n| matches!(n, ServerNotification::RemovePlayers { .. })));
    Ok(())
}
