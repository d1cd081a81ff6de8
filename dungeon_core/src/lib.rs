//! Authoritative dungeon server core.
//!
//! The world lives in a headless bevy [`App`]; one call to [`run_turn`]
//! resolves a complete turn through the chained systems configured in
//! [`build_app`]. [`ServerContext`] owns the app together with the sessions
//! and the turn controller and is driven by the server binary.

pub mod actions;
pub mod ai;
pub mod combat;
pub mod components;
pub mod context;
mod dispatch;
pub mod gameplay_config;
pub mod level;
pub mod map;
pub mod network;
pub mod outbox;
pub mod requests;
pub mod resources;
pub mod rooms;
pub mod seats;
pub mod session;
pub mod snapshot;
pub mod systems;
pub mod turn;
pub mod upkeep;

use std::sync::Arc;

use bevy::prelude::*;

pub use actions::{Action, ActionKind, ActionStack, StepOutcome};
pub use combat::CombatLedger;
pub use components::{Creature, CreatureId, CreatureIds, RemovalReason};
pub use context::{CycleOutcome, ServerContext};
pub use gameplay_config::{
    load_gameplay_config_from_env, GameplayConfig, GameplayConfigError, GameplayConfigHandle,
};
pub use level::{
    export_level, install_level, load_level_from_env, save_level, LevelDefinition, LevelError,
};
pub use map::{BfsPathOracle, PathFinder, PathOracle, Tile, TileMap};
pub use network::{InboundEvent, LoopbackClient, ProtocolError, Transport};
pub use outbox::{OutboundNotification, Outbox, Recipient};
pub use requests::{BatchOutcome, RequestError};
pub use resources::{GameRng, GameTurn, ServerConfig, SimulationFault, SimulationFaults};
pub use rooms::{GoldPiles, RoomRegistry, TrapRegistry};
pub use seats::{Seat, SeatId, SeatRegistry};
pub use session::{SessionId, SessionPhase, SessionRegistry};
pub use snapshot::{build_snapshot, SnapshotHistory, StoredSnapshot};
pub use turn::{AckError, AckOutcome, TurnController, TurnPhase, TurnPoll};

/// Construct the turn pipeline around `level`.
pub fn build_app(
    config: ServerConfig,
    gameplay: Arc<GameplayConfig>,
    level: &LevelDefinition,
) -> Result<App, LevelError> {
    let mut app = App::new();

    let snapshot_history = SnapshotHistory::with_capacity(config.snapshot_history_limit.max(1));
    app.insert_resource(GameRng::from_seed(config.rng_seed))
        .insert_resource(config)
        .insert_resource(GameplayConfigHandle::new(gameplay))
        .insert_resource(GameTurn::default())
        .insert_resource(snapshot_history)
        .insert_resource(PathFinder::default())
        .insert_resource(Outbox::default())
        .insert_resource(CombatLedger::default())
        .insert_resource(SimulationFaults::default())
        .insert_resource(upkeep::CreatureIndex::default())
        .add_plugins(MinimalPlugins)
        .add_systems(
            Update,
            (
                upkeep::creature_upkeep.run_if(resources::in_game_mode),
                systems::trap_upkeep.run_if(resources::in_game_mode),
                combat::resolve_combat,
                combat::reap_creatures,
                systems::room_upkeep,
                systems::portal_spawns.run_if(resources::in_game_mode),
                ai::ai_upkeep.run_if(resources::in_game_mode),
                systems::seat_upkeep,
                systems::sync_creatures,
                systems::refresh_dirty_tiles,
                snapshot::capture_snapshot,
            )
                .chain(),
        );

    install_level(&mut app.world, level)?;
    Ok(app)
}

/// Default configuration, builtin gameplay tuning and builtin level.
pub fn build_headless_app() -> App {
    build_app(
        ServerConfig::default(),
        GameplayConfig::builtin(),
        &LevelDefinition::builtin(),
    )
    .expect("builtin level should install")
}

/// Execute a single simulation turn.
///
/// Runs every system configured in [`build_app`] once (creatures, traps,
/// combat, rooms, portals, AI, seats, replication, snapshot). The caller
/// sets [`GameTurn`] beforehand and delivers the staged [`Outbox`].
pub fn run_turn(app: &mut App) {
    app.update();
}
