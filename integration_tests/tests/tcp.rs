mod common;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use common::{config, SEED};
use dungeon_client::{replay_file, run_bot, BotOptions, BotSession, BotState};
use dungeon_core::{build_app, GameplayConfig, LevelDefinition, ServerContext, Transport};

/// Run a server on an ephemeral port until `stop` is set. Returns the last
/// completed turn.
fn spawn_server(
    players: usize,
    stop: Arc<AtomicBool>,
) -> anyhow::Result<(SocketAddr, thread::JoinHandle<anyhow::Result<u64>>)> {
    let (addr_tx, addr_rx) = mpsc::channel();
    let handle = thread::spawn(move || -> anyhow::Result<u64> {
        let mut config = config(SEED, players);
        config.bind = "127.0.0.1:0".parse()?;
        let transport = Transport::listen(config.bind, config.max_frame_len)?;
        let addr = transport.local_addr().context("listener address")?;
        let app = build_app(config, GameplayConfig::builtin(), &LevelDefinition::builtin())?;
        let mut ctx = ServerContext::new(app, transport);
        addr_tx.send(addr)?;
        while !stop.load(Ordering::SeqCst) {
            ctx.cycle(Instant::now())?;
            thread::sleep(Duration::from_millis(1));
        }
        let turn = ctx.turns.turn();
        ctx.shutdown();
        Ok(turn)
    });
    let addr = addr_rx
        .recv_timeout(Duration::from_secs(10))
        .context("server did not start")?;
    Ok((addr, handle))
}

#[test]
fn bots_play_over_tcp_and_the_recording_replays() -> anyhow::Result<()> {
    let stop = Arc::new(AtomicBool::new(false));
    let (addr, server) = spawn_server(2, Arc::clone(&stop))?;
    let endpoint = addr.to_string();
    let recording = std::env::temp_dir().join(format!("dungeon-tcp-{}.replay", std::process::id()));

    let runtime = tokio::runtime::Runtime::new()?;
    let (first, second) = runtime.block_on(async {
        let mut digger = BotOptions::new("digger");
        digger.auto_dig_every = Some(2);
        digger.max_turns = Some(15);
        let mut idler = BotOptions::new("idler");
        idler.max_turns = Some(15);
        tokio::time::timeout(Duration::from_secs(60), async {
            tokio::join!(
                run_bot(&endpoint, BotSession::new(digger), Some(recording.as_path())),
                run_bot(&endpoint, BotSession::new(idler), None),
            )
        })
        .await
    })?;
    stop.store(true, Ordering::SeqCst);
    let last_turn = server
        .join()
        .map_err(|_| anyhow::anyhow!("server thread panicked"))??;

    let (digger, first) = first?;
    let (_, second) = second?;
    for summary in [&first, &second] {
        assert_eq!(summary.state, BotState::Finished("reached turn 15".into()));
        assert_eq!(summary.turns_acked, 15);
        assert_eq!(summary.desyncs, 0);
    }
    assert!(last_turn >= 15);
    assert_eq!(first.recorded, first.frames);

    let replayed = replay_file(&recording)?;
    std::fs::remove_file(&recording).ok();
    assert_eq!(replayed.turn, 15);
    assert_eq!(replayed.desyncs(), 0);
    assert_eq!(replayed.creatures, digger.mirror().creatures);
    Ok(())
}

#[test]
fn wrong_version_is_rejected_over_tcp() -> anyhow::Result<()> {
    let stop = Arc::new(AtomicBool::new(false));
    let (addr, server) = spawn_server(1, Arc::clone(&stop))?;
    let runtime = tokio::runtime::Runtime::new()?;
    let mut options = BotOptions::new("old");
    options.version = "0.0.1".into();
    let result = runtime.block_on(async {
        tokio::time::timeout(
            Duration::from_secs(20),
            run_bot(&addr.to_string(), BotSession::new(options), None),
        )
        .await
    })?;
    stop.store(true, Ordering::SeqCst);
    server
        .join()
        .map_err(|_| anyhow::anyhow!("server thread panicked"))??;

    let (_, summary) = result?;
    assert!(matches!(summary.state, BotState::Finished(reason) if reason.starts_with("rejected")));
    Ok(())
}
