use std::{
    env, fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use bevy::prelude::Resource;
use dungeon_proto::{ResearchKind, RoomKind, SpellKind, TrapKind};
use serde::Deserialize;
use thiserror::Error;

pub const BUILTIN_GAMEPLAY_CONFIG: &str = include_str!("data/gameplay_config.json");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreatureRole {
    Worker,
    Fighter,
}

/// Static statistics of a creature class. Copied onto each creature at spawn.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CreatureClass {
    pub name: String,
    pub role: CreatureRole,
    pub max_hp: f64,
    pub attack: f64,
    pub defense: f64,
    pub attack_cooldown: u32,
    pub dig_rate: f64,
    pub claim_rate: f64,
    pub move_speed: f64,
    pub sight: i32,
    pub gold_capacity: i32,
    pub fee: i64,
    pub hunger_rate: f64,
    pub awakeness_rate: f64,
    pub heal_rate: f64,
    #[serde(default)]
    pub jobs: Vec<RoomKind>,
    /// Claimed tiles a seat needs before its portal attracts this class.
    #[serde(default)]
    pub min_claimed_tiles: i32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EconomyConfig {
    pub gold_per_fullness: f64,
    pub treasury_capacity_per_tile: i64,
    pub base_mana: f64,
    pub mana_per_claimed_tile: f64,
    pub max_mana: f64,
    pub payday_interval: u64,
    pub sell_refund_ratio: f64,
    pub max_hand_size: usize,
    pub slap_damage: f64,
    pub max_creatures_per_seat: usize,
    pub portal_spawn_interval: u64,
    pub hatchery_food_per_tile: i32,
    pub hatchery_regrow_turns: u64,
    pub research_points_per_job_turn: f64,
    pub training_xp_per_turn: f64,
    pub fighting_cooldown_turns: u64,
}

impl Default for EconomyConfig {
    fn default() -> Self {
        Self {
            gold_per_fullness: 3.0,
            treasury_capacity_per_tile: 1000,
            base_mana: 2.0,
            mana_per_claimed_tile: 0.2,
            max_mana: 5000.0,
            payday_interval: 120,
            sell_refund_ratio: 0.5,
            max_hand_size: 8,
            slap_damage: 2.0,
            max_creatures_per_seat: 24,
            portal_spawn_interval: 40,
            hatchery_food_per_tile: 2,
            hatchery_regrow_turns: 15,
            research_points_per_job_turn: 1.0,
            training_xp_per_turn: 1.5,
            fighting_cooldown_turns: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CreatureRules {
    /// A creature below `max_hp * weak_ratio` flees instead of fighting.
    pub weak_ratio: f64,
    pub flee_max_turns: u32,
    pub hunger_threshold: f64,
    pub hunger_satisfied: f64,
    pub food_value: f64,
    pub awakeness_threshold: f64,
    pub awakeness_rested: f64,
    pub sleep_recovery: f64,
    pub sleep_heal_factor: f64,
    pub xp_per_level: f64,
    pub max_level: i32,
    pub hp_per_level: f64,
    pub attack_per_level: f64,
    pub unpaid_paydays_before_leaving: u32,
    pub job_duration_turns: u32,
    pub wander_chance: f64,
    pub wander_radius: i32,
}

impl Default for CreatureRules {
    fn default() -> Self {
        Self {
            weak_ratio: 1.0 / 3.0,
            flee_max_turns: 5,
            hunger_threshold: 80.0,
            hunger_satisfied: 10.0,
            food_value: 30.0,
            awakeness_threshold: 20.0,
            awakeness_rested: 100.0,
            sleep_recovery: 4.0,
            sleep_heal_factor: 4.0,
            xp_per_level: 50.0,
            max_level: 30,
            hp_per_level: 6.0,
            attack_per_level: 0.8,
            unpaid_paydays_before_leaving: 2,
            job_duration_turns: 30,
            wander_chance: 0.25,
            wander_radius: 4,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoomConfig {
    pub kind: RoomKind,
    pub cost_per_tile: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrapConfig {
    pub kind: TrapKind,
    pub cost_per_tile: i64,
    pub damage: f64,
    /// Turns before the trap can fire again; 0 means single use.
    pub reload_turns: u32,
    /// Chebyshev reach from the trap tile; 0 only hits its own tile.
    pub range: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpellConfig {
    pub kind: SpellKind,
    pub mana_cost: f64,
    #[serde(default)]
    pub power: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResearchConfig {
    pub kind: ResearchKind,
    pub points: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GameplayConfig {
    pub worker_class: String,
    pub creature_classes: Vec<CreatureClass>,
    #[serde(default)]
    pub economy: EconomyConfig,
    #[serde(default)]
    pub creature_rules: CreatureRules,
    pub rooms: Vec<RoomConfig>,
    pub traps: Vec<TrapConfig>,
    pub spells: Vec<SpellConfig>,
    #[serde(default)]
    pub research: Vec<ResearchConfig>,
    #[serde(default)]
    pub initial_research: Vec<ResearchKind>,
}

impl GameplayConfig {
    pub fn builtin() -> Arc<Self> {
        Arc::new(
            serde_json::from_str(BUILTIN_GAMEPLAY_CONFIG)
                .expect("builtin gameplay config should parse"),
        )
    }

    pub fn from_json_str(json: &str) -> Result<Self, GameplayConfigError> {
        let config: GameplayConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, GameplayConfigError> {
        let contents =
            fs::read_to_string(path).map_err(|source| GameplayConfigError::ReadFailed {
                path: path.to_path_buf(),
                source,
            })?;
        GameplayConfig::from_json_str(&contents)
    }

    fn validate(&self) -> Result<(), GameplayConfigError> {
        match self.class(&self.worker_class) {
            Some(class) if class.role == CreatureRole::Worker => {}
            _ => {
                return Err(GameplayConfigError::MissingWorkerClass(
                    self.worker_class.clone(),
                ))
            }
        }
        for kind in RoomKind::ALL {
            if self.room(*kind).is_none() {
                return Err(GameplayConfigError::MissingEntry(format!("room {}", kind.name())));
            }
        }
        for kind in TrapKind::ALL {
            if self.trap(*kind).is_none() {
                return Err(GameplayConfigError::MissingEntry(format!("trap {}", kind.name())));
            }
        }
        for kind in SpellKind::ALL {
            if self.spell(*kind).is_none() {
                return Err(GameplayConfigError::MissingEntry(format!(
                    "spell {}",
                    kind.name()
                )));
            }
        }
        Ok(())
    }

    pub fn class(&self, name: &str) -> Option<&CreatureClass> {
        self.creature_classes.iter().find(|class| class.name == name)
    }

    pub fn worker(&self) -> Option<&CreatureClass> {
        self.class(&self.worker_class)
    }

    pub fn fighter_classes(&self) -> impl Iterator<Item = &CreatureClass> {
        self.creature_classes
            .iter()
            .filter(|class| class.role == CreatureRole::Fighter)
    }

    pub fn room(&self, kind: RoomKind) -> Option<&RoomConfig> {
        self.rooms.iter().find(|room| room.kind == kind)
    }

    pub fn trap(&self, kind: TrapKind) -> Option<&TrapConfig> {
        self.traps.iter().find(|trap| trap.kind == kind)
    }

    pub fn spell(&self, kind: SpellKind) -> Option<&SpellConfig> {
        self.spells.iter().find(|spell| spell.kind == kind)
    }

    pub fn research_cost(&self, kind: ResearchKind) -> Option<f64> {
        self.research
            .iter()
            .find(|entry| entry.kind == kind)
            .map(|entry| entry.points)
    }

    pub fn room_cost(&self, kind: RoomKind) -> i64 {
        self.room(kind).map(|room| room.cost_per_tile).unwrap_or(0)
    }

    pub fn trap_cost(&self, kind: TrapKind) -> i64 {
        self.trap(kind).map(|trap| trap.cost_per_tile).unwrap_or(0)
    }
}

#[derive(Debug, Error)]
pub enum GameplayConfigError {
    #[error("failed to parse gameplay config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read gameplay config from {path:?}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("worker class {0:?} is missing or is not a worker")]
    MissingWorkerClass(String),
    #[error("gameplay config has no entry for {0}")]
    MissingEntry(String),
}

#[derive(Resource, Debug, Clone)]
pub struct GameplayConfigHandle(pub Arc<GameplayConfig>);

impl GameplayConfigHandle {
    pub fn new(config: Arc<GameplayConfig>) -> Self {
        Self(config)
    }

    pub fn get(&self) -> Arc<GameplayConfig> {
        Arc::clone(&self.0)
    }

    pub fn config(&self) -> &GameplayConfig {
        &self.0
    }
}

impl Default for GameplayConfigHandle {
    fn default() -> Self {
        Self::new(GameplayConfig::builtin())
    }
}

/// Load the gameplay config named by `DUNGEON_GAMEPLAY_CONFIG`, falling back
/// to the builtin copy when unset or unreadable.
pub fn load_gameplay_config_from_env() -> Arc<GameplayConfig> {
    if let Some(path) = env::var_os("DUNGEON_GAMEPLAY_CONFIG").map(PathBuf::from) {
        match GameplayConfig::from_file(&path) {
            Ok(config) => {
                tracing::info!(
                    target: "dungeon::config",
                    path = %path.display(),
                    "gameplay_config.loaded=file"
                );
                return Arc::new(config);
            }
            Err(err) => {
                tracing::warn!(
                    target: "dungeon::config",
                    path = %path.display(),
                    error = %err,
                    "gameplay_config.load_failed"
                );
            }
        }
    }
    tracing::info!(target: "dungeon::config", "gameplay_config.loaded=builtin");
    GameplayConfig::builtin()
}
