#![allow(dead_code)]

use std::time::{Duration, Instant};

use anyhow::bail;
use dungeon_client::{BotOptions, BotSession, ClientMirror};
use dungeon_core::{
    build_app, build_snapshot, CycleOutcome, GameplayConfig, LevelDefinition, LoopbackClient,
    ServerConfig, ServerContext, SessionPhase, Transport,
};
use dungeon_proto::{ClientNotification, Notification, ServerNotification};

pub const SEED: u64 = 0x5EED_D0D0;

pub fn config(seed: u64, auto_start: usize) -> ServerConfig {
    ServerConfig {
        turns_per_second: 0.0,
        ack_timeout: Duration::from_secs(5),
        rng_seed: seed,
        auto_start_players: Some(auto_start),
        ..ServerConfig::default()
    }
}

pub fn server(config: ServerConfig) -> anyhow::Result<ServerContext> {
    let app = build_app(config, GameplayConfig::builtin(), &LevelDefinition::builtin())?;
    Ok(ServerContext::new(app, Transport::loopback()))
}

/// A bot on an in-process session. Everything it receives is kept, both
/// decoded and as the encoded byte stream.
pub struct Player {
    pub client: LoopbackClient,
    pub bot: BotSession,
    pub received: Vec<ServerNotification>,
    pub stream: Vec<u8>,
    /// Swallow turn acknowledgements instead of sending them.
    pub silent: bool,
}

impl Player {
    pub fn connect(ctx: &ServerContext, options: BotOptions) -> Self {
        let client = ctx.transport().connect_loopback();
        let bot = BotSession::new(options);
        client.send(&bot.hello());
        Self {
            client,
            bot,
            received: Vec::new(),
            stream: Vec::new(),
            silent: false,
        }
    }

    /// Deliver everything queued for this player and send the bot's replies.
    pub fn pump(&mut self) -> Vec<ServerNotification> {
        let batch = self.client.drain();
        for notification in &batch {
            self.stream
                .extend_from_slice(notification.encode().as_bytes());
            for reply in self.bot.on_notification(notification) {
                if self.silent && matches!(reply, ClientNotification::AckNewTurn { .. }) {
                    continue;
                }
                self.client.send(&reply);
            }
        }
        self.received.extend(batch.iter().cloned());
        batch
    }

    pub fn mirror(&self) -> &ClientMirror {
        self.bot.mirror()
    }

    pub fn phase(&self, ctx: &ServerContext) -> Option<SessionPhase> {
        ctx.sessions.get(self.client.session()).map(|s| s.phase)
    }
}

pub fn bots(ctx: &ServerContext, nicks: &[&str], auto_dig: Option<i64>) -> Vec<Player> {
    nicks
        .iter()
        .map(|nick| {
            let mut options = BotOptions::new(*nick);
            options.auto_dig_every = auto_dig;
            Player::connect(ctx, options)
        })
        .collect()
}

/// One server cycle, then every player reads its queue and answers.
pub fn step(
    ctx: &mut ServerContext,
    players: &mut [Player],
    now: Instant,
) -> anyhow::Result<(CycleOutcome, Vec<Vec<ServerNotification>>)> {
    let outcome = ctx.cycle(now)?;
    let batches = players.iter_mut().map(Player::pump).collect();
    Ok((outcome, batches))
}

/// Cycle until the server has completed `turn`.
pub fn run_until(
    ctx: &mut ServerContext,
    players: &mut [Player],
    turn: u64,
    now: Instant,
) -> anyhow::Result<()> {
    for _ in 0..(turn * 4 + 32) {
        if ctx.turns.turn() >= turn {
            return Ok(());
        }
        step(ctx, players, now)?;
    }
    bail!(
        "server stuck at turn {} waiting for {turn}",
        ctx.turns.turn()
    )
}

/// The mirror holds exactly the tiles and creatures the server holds.
pub fn assert_mirror_matches(ctx: &mut ServerContext, mirror: &ClientMirror) {
    let snapshot = build_snapshot(ctx.world_mut());
    let mut expected = snapshot.tiles;
    expected.sort_by_key(|tile| tile.pos);
    let tiles: Vec<_> = mirror.tiles.values().cloned().collect();
    assert_eq!(tiles, expected, "tiles diverged");
    let creatures: Vec<_> = mirror.creatures.values().cloned().collect();
    assert_eq!(creatures, snapshot.creatures, "creatures diverged");
    assert_eq!(mirror.turn, snapshot.header.turn as i64);
}
