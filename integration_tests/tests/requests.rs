mod common;

use std::time::Instant;

use common::{bots, config, run_until, server, step, SEED};
use dungeon_core::{SeatId, SeatRegistry, TileMap};
use dungeon_proto::{ClientNotification, RoomKind, ServerNotification, TilePos};

fn chat_lines(batches: &[Vec<ServerNotification>]) -> Vec<String> {
    batches
        .iter()
        .flatten()
        .filter_map(|n| match n {
            ServerNotification::ChatServer { message } => Some(message.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn mark_batch_applies_valid_tiles_and_reports_the_rest() -> anyhow::Result<()> {
    let mut ctx = server(config(SEED, 1))?;
    let mut players = bots(&ctx, &["solo"], None);
    let now = Instant::now();
    run_until(&mut ctx, &mut players, 2, now)?;

    let seat = players[0].mirror().my_seat.expect("seated");
    let candidates = players[0].mirror().dig_candidates(seat, 3);
    assert_eq!(candidates.len(), 3);
    let rock = TilePos::new(0, 0);
    let mut tiles = candidates.clone();
    tiles.push(rock);
    tiles.push(TilePos::new(500, 500));
    players[0]
        .client
        .send(&ClientNotification::AskMarkTiles { tiles, mark: true });
    let (_, batches) = step(&mut ctx, &mut players, now)?;

    let lines = chat_lines(&batches);
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("3 applied, 2 skipped"), "{}", lines[0]);
    let map = ctx.world().resource::<TileMap>();
    for pos in &candidates {
        assert!(map.get(*pos).is_some_and(|t| t.marked_by.contains(&SeatId(seat))));
    }
    Ok(())
}

#[test]
fn resent_requests_are_not_applied_twice() -> anyhow::Result<()> {
    let mut ctx = server(config(SEED, 1))?;
    let mut players = bots(&ctx, &["solo"], None);
    let now = Instant::now();
    run_until(&mut ctx, &mut players, 2, now)?;

    let seat = players[0].mirror().my_seat.expect("seated");
    let tile = players[0].mirror().dig_candidates(seat, 1)[0];
    let creature = players[0]
        .mirror()
        .creatures
        .values()
        .find(|c| c.seat == seat)
        .map(|c| c.id)
        .expect("own creature");
    for _ in 0..2 {
        players[0].client.send(&ClientNotification::AskMarkTiles {
            tiles: vec![tile],
            mark: true,
        });
        players[0]
            .client
            .send(&ClientNotification::AskEntityPickUp { creature });
    }
    let (_, batches) = step(&mut ctx, &mut players, now)?;

    let lines = chat_lines(&batches);
    assert_eq!(lines.len(), 2, "{lines:?}");
    let hand = ctx
        .world()
        .resource::<SeatRegistry>()
        .get(SeatId(seat))
        .map(|s| s.hand.clone())
        .unwrap_or_default();
    assert_eq!(hand.iter().filter(|id| id.0 == creature).count(), 1);
    let picked = batches[0]
        .iter()
        .filter(|n| matches!(n, ServerNotification::EntityPickedUp { .. }))
        .count();
    assert_eq!(picked, 1);
    Ok(())
}

#[test]
fn room_on_foreign_ground_is_refused() -> anyhow::Result<()> {
    let mut ctx = server(config(SEED, 1))?;
    let mut players = bots(&ctx, &["solo"], None);
    let now = Instant::now();
    run_until(&mut ctx, &mut players, 1, now)?;
    let gold_before = ctx
        .world()
        .resource::<SeatRegistry>()
        .get(SeatId(1))
        .map(|s| s.gold);

    players[0].client.send(&ClientNotification::AskBuildRoom {
        room: RoomKind::Treasury,
        tiles: vec![TilePos::new(26, 8), TilePos::new(27, 8)],
    });
    let (_, batches) = step(&mut ctx, &mut players, now)?;
    let lines = chat_lines(&batches);
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("0 applied, 2 skipped") || lines[0].contains("refused"));
    assert_eq!(
        ctx.world().resource::<SeatRegistry>().get(SeatId(1)).map(|s| s.gold),
        gold_before
    );
    Ok(())
}
