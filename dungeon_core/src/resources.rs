use std::{
    env,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use bevy::prelude::*;
use dungeon_proto::{GameMode, DEFAULT_MAX_FRAME_LEN, PROTOCOL_VERSION};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use thiserror::Error;

use crate::components::CreatureId;

/// Global configuration of the dungeon server.
#[derive(Resource, Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub admin_bind: SocketAddr,
    pub protocol_version: String,
    pub turns_per_second: f64,
    /// How long the controller waits for turn acknowledgements before
    /// advancing anyway and flagging the silent sessions as lagging.
    pub ack_timeout: Duration,
    pub max_frame_len: u32,
    pub rng_seed: u64,
    pub max_action_loops: u32,
    pub snapshot_history_limit: usize,
    pub mode: GameMode,
    /// Start the game automatically once this many players are ready.
    pub auto_start_players: Option<usize>,
    pub save_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 32222),
            admin_bind: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 32223),
            protocol_version: PROTOCOL_VERSION.to_string(),
            turns_per_second: 1.0,
            ack_timeout: Duration::from_secs(5),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            rng_seed: 0x0D0D_5EED,
            max_action_loops: 20,
            snapshot_history_limit: 32,
            mode: GameMode::Game,
            auto_start_players: None,
            save_path: PathBuf::from("saved_level.json"),
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `DUNGEON_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(bind) = env_override("DUNGEON_BIND") {
            config.bind = bind;
        }
        if let Some(bind) = env_override("DUNGEON_ADMIN_BIND") {
            config.admin_bind = bind;
        }
        if let Some(tps) = env_override::<f64>("DUNGEON_TURNS_PER_SECOND") {
            config.turns_per_second = tps;
        }
        if let Some(ms) = env_override("DUNGEON_ACK_TIMEOUT_MS") {
            config.ack_timeout = Duration::from_millis(ms);
        }
        if let Some(seed) = env_override("DUNGEON_SEED") {
            config.rng_seed = seed;
        }
        if let Some(players) = env_override("DUNGEON_AUTO_START") {
            config.auto_start_players = Some(players);
        }
        if let Some(editor) = env_override::<bool>("DUNGEON_EDITOR") {
            config.mode = if editor { GameMode::Editor } else { GameMode::Game };
        }
        if let Some(path) = env::var_os("DUNGEON_SAVE_PATH") {
            config.save_path = PathBuf::from(path);
        }
        config
    }

    /// Minimum wall time between two turns.
    pub fn turn_interval(&self) -> Duration {
        if self.turns_per_second > 0.0 {
            Duration::from_secs_f64(1.0 / self.turns_per_second)
        } else {
            Duration::ZERO
        }
    }
}

fn env_override<T: FromStr>(name: &str) -> Option<T> {
    let raw = env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(
                target: "dungeon::config",
                variable = name,
                value = %raw,
                "config.override_ignored=unparsable"
            );
            None
        }
    }
}

/// Number of the turn currently being (or last) simulated.
#[derive(Resource, Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameTurn(pub u64);

/// The single random source of the simulation. Consumed only on the
/// simulation thread, in entity iteration order.
#[derive(Resource, Debug, Clone)]
pub struct GameRng(pub ChaCha8Rng);

impl GameRng {
    pub fn from_seed(seed: u64) -> Self {
        Self(ChaCha8Rng::seed_from_u64(seed))
    }
}

/// Invariant violations detected on the simulation thread. These are
/// programming errors: the server stops instead of continuing with a world
/// it can no longer trust.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimulationFault {
    #[error("creature {creature} has an empty action stack")]
    EmptyActionStack { creature: CreatureId },
    #[error("turn counter mismatch: controller at {expected}, world at {actual}")]
    TurnMismatch { expected: u64, actual: u64 },
    #[error("turn controller cannot go from {from} to {to}")]
    IllegalTransition {
        from: &'static str,
        to: &'static str,
    },
}

#[derive(Resource, Default, Debug)]
pub struct SimulationFaults {
    faults: Vec<SimulationFault>,
}

impl SimulationFaults {
    pub fn record(&mut self, fault: SimulationFault) {
        tracing::error!(target: "dungeon::upkeep", %fault, "simulation.fault");
        self.faults.push(fault);
    }

    pub fn take_first(&mut self) -> Option<SimulationFault> {
        let first = self.faults.first().cloned();
        self.faults.clear();
        first
    }

    pub fn is_empty(&self) -> bool {
        self.faults.is_empty()
    }
}

/// Run condition: autonomous upkeep only runs outside the editor.
pub fn in_game_mode(config: Res<ServerConfig>) -> bool {
    config.mode == GameMode::Game
}
