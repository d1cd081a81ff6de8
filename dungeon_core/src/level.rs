use std::{
    env, fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use bevy::prelude::*;
use dungeon_proto::{RoomKind, ServerNotification, TileKind, TilePos, TrapKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::components::{creature_bundle, Creature, CreatureIds};
use crate::gameplay_config::GameplayConfigHandle;
use crate::map::{Tile, TileMap};
use crate::rooms::{GoldPiles, RoomRegistry, TrapRegistry};
use crate::seats::{Goal, GoalStatus, Seat, SeatGoal, SeatId, SeatRegistry};
use crate::systems::CreatureCache;

pub const BUILTIN_LEVEL: &str = include_str!("data/level_default.json");

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TileSpec {
    pub kind: TileKind,
    pub fullness: i32,
}

impl Default for TileSpec {
    fn default() -> Self {
        Self {
            kind: TileKind::Dirt,
            fullness: crate::map::FULLNESS_MAX,
        }
    }
}

/// Rectangle of identical tiles, applied in file order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileRegion {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub kind: TileKind,
    pub fullness: i32,
    #[serde(default)]
    pub claimed_by: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileDefinition {
    pub pos: TilePos,
    pub kind: TileKind,
    pub fullness: i32,
    #[serde(default)]
    pub claimed_by: Option<i32>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeatDefinition {
    pub id: i32,
    pub team: i32,
    pub faction: String,
    #[serde(default = "default_true")]
    pub human_playable: bool,
    #[serde(default)]
    pub starting_gold: i64,
    #[serde(default)]
    pub starting_mana: f64,
    #[serde(default)]
    pub goals: Vec<Goal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomDefinition {
    pub seat: i32,
    pub kind: RoomKind,
    pub tiles: Vec<TilePos>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrapDefinition {
    pub seat: i32,
    pub kind: TrapKind,
    pub tiles: Vec<TilePos>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatureDefinition {
    pub seat: i32,
    pub class: String,
    pub pos: TilePos,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoldPileDefinition {
    pub pos: TilePos,
    pub amount: i32,
}

/// A level file: the tile grid, its seats and everything standing on it at
/// turn zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelDefinition {
    pub name: String,
    pub width: i32,
    pub height: i32,
    #[serde(default)]
    pub fill: TileSpec,
    #[serde(default)]
    pub regions: Vec<TileRegion>,
    #[serde(default)]
    pub tiles: Vec<TileDefinition>,
    pub seats: Vec<SeatDefinition>,
    #[serde(default)]
    pub rooms: Vec<RoomDefinition>,
    #[serde(default)]
    pub traps: Vec<TrapDefinition>,
    #[serde(default)]
    pub creatures: Vec<CreatureDefinition>,
    #[serde(default)]
    pub gold_piles: Vec<GoldPileDefinition>,
}

#[derive(Debug, Error)]
pub enum LevelError {
    #[error("failed to parse level: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read level from {path:?}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write level to {path:?}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("level dimensions {width}x{height} are invalid")]
    InvalidSize { width: i32, height: i32 },
    #[error("seat {0} is declared twice")]
    DuplicateSeat(i32),
    #[error("{what} refers to unknown seat {seat}")]
    UnknownSeat { what: &'static str, seat: i32 },
    #[error("{what} tile {pos:?} is outside the map")]
    OutOfBounds { what: &'static str, pos: TilePos },
    #[error("creature class {0:?} is not in the gameplay config")]
    UnknownClass(String),
}

impl LevelDefinition {
    pub fn builtin() -> Arc<Self> {
        Arc::new(serde_json::from_str(BUILTIN_LEVEL).expect("builtin level should parse"))
    }

    pub fn from_json_str(json: &str) -> Result<Self, LevelError> {
        let level: LevelDefinition = serde_json::from_str(json)?;
        level.validate()?;
        Ok(level)
    }

    pub fn from_file(path: &Path) -> Result<Self, LevelError> {
        let contents = fs::read_to_string(path).map_err(|source| LevelError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&contents)
    }

    pub fn to_json(&self) -> Result<String, LevelError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), LevelError> {
        if self.width <= 0 || self.height <= 0 {
            return Err(LevelError::InvalidSize {
                width: self.width,
                height: self.height,
            });
        }
        let mut seen = std::collections::BTreeSet::new();
        for seat in &self.seats {
            if !seen.insert(seat.id) {
                return Err(LevelError::DuplicateSeat(seat.id));
            }
        }
        let inside = |pos: &TilePos| {
            pos.x >= 0 && pos.y >= 0 && pos.x < self.width && pos.y < self.height
        };
        let owned = [
            ("room", self.rooms.iter().map(|room| (room.seat, &room.tiles)).collect::<Vec<_>>()),
            ("trap", self.traps.iter().map(|trap| (trap.seat, &trap.tiles)).collect()),
        ];
        for (what, entries) in owned {
            for (seat, tiles) in entries {
                if !seen.contains(&seat) {
                    return Err(LevelError::UnknownSeat { what, seat });
                }
                if let Some(pos) = tiles.iter().find(|pos| !inside(pos)) {
                    return Err(LevelError::OutOfBounds { what, pos: *pos });
                }
            }
        }
        for creature in &self.creatures {
            if !seen.contains(&creature.seat) {
                return Err(LevelError::UnknownSeat {
                    what: "creature",
                    seat: creature.seat,
                });
            }
            if !inside(&creature.pos) {
                return Err(LevelError::OutOfBounds {
                    what: "creature",
                    pos: creature.pos,
                });
            }
        }
        Ok(())
    }

    fn build_map(&self) -> TileMap {
        let mut map = TileMap::new(
            self.width,
            self.height,
            Tile::new(self.fill.kind, self.fill.fullness),
        );
        let mut paint = |pos: TilePos, kind: TileKind, fullness: i32, claimed: Option<i32>| {
            if let Some(tile) = map.get_mut(pos) {
                *tile = Tile::new(kind, fullness);
                tile.claimed_by = claimed.map(SeatId);
            }
        };
        for region in &self.regions {
            for y in region.y..region.y + region.height {
                for x in region.x..region.x + region.width {
                    paint(TilePos::new(x, y), region.kind, region.fullness, region.claimed_by);
                }
            }
        }
        for tile in &self.tiles {
            paint(tile.pos, tile.kind, tile.fullness, tile.claimed_by);
        }
        map.take_dirty();
        map
    }
}

/// Name of the level currently loaded.
#[derive(Resource, Debug, Clone, Default)]
pub struct LevelInfo {
    pub name: String,
}

/// Replace the world's map, seats, buildings and creatures with `level`.
pub fn install_level(world: &mut World, level: &LevelDefinition) -> Result<(), LevelError> {
    level.validate()?;
    if !world.contains_resource::<GameplayConfigHandle>() {
        world.insert_resource(GameplayConfigHandle::default());
    }
    let gameplay = world.resource::<GameplayConfigHandle>().get();
    for creature in &level.creatures {
        if gameplay.class(&creature.class).is_none() {
            return Err(LevelError::UnknownClass(creature.class.clone()));
        }
    }

    let mut map = level.build_map();
    let mut seats = SeatRegistry::default();
    for definition in &level.seats {
        let mut seat = Seat::new(SeatId(definition.id), definition.team, definition.faction.clone());
        seat.human_playable = definition.human_playable;
        seat.gold = definition.starting_gold;
        seat.mana = definition.starting_mana;
        seat.goals = definition
            .goals
            .iter()
            .map(|goal| SeatGoal {
                goal: *goal,
                status: GoalStatus::Uncompleted,
            })
            .collect();
        seat.research.done = gameplay.initial_research.iter().copied().collect();
        seat.claimed_tiles = map.claimed_count(seat.id);
        seats.insert(seat);
    }

    let mut rooms = RoomRegistry::default();
    for room in &level.rooms {
        claim(&mut map, room.seat, &room.tiles);
        let id = rooms.build(&mut map, room.kind, SeatId(room.seat), room.tiles.clone());
        if room.kind == RoomKind::Hatchery {
            if let Some(built) = rooms.get_mut(id) {
                built.food = built.tiles.len() as i32 * gameplay.economy.hatchery_food_per_tile;
            }
        }
    }
    let mut traps = TrapRegistry::default();
    for trap in &level.traps {
        claim(&mut map, trap.seat, &trap.tiles);
        traps.build(&mut map, trap.kind, SeatId(trap.seat), trap.tiles.clone());
    }
    let mut piles = GoldPiles::default();
    for pile in &level.gold_piles {
        piles.drop_gold(pile.pos, pile.amount);
    }
    for seat in seats.iter_mut() {
        seat.claimed_tiles = map.claimed_count(seat.id);
    }
    map.take_dirty();

    let existing: Vec<Entity> = world
        .query_filtered::<Entity, With<Creature>>()
        .iter(world)
        .collect();
    for entity in existing {
        world.despawn(entity);
    }
    let mut ids = CreatureIds::default();
    for creature in &level.creatures {
        if let Some(class) = gameplay.class(&creature.class) {
            let bundle = creature_bundle(&mut ids, class, SeatId(creature.seat), creature.pos);
            world.spawn(bundle);
        }
    }

    world.insert_resource(map);
    world.insert_resource(seats);
    world.insert_resource(rooms);
    world.insert_resource(traps);
    world.insert_resource(piles);
    world.insert_resource(ids);
    world.insert_resource(CreatureCache::default());
    world.insert_resource(LevelInfo {
        name: level.name.clone(),
    });
    tracing::info!(
        target: "dungeon::server",
        level = %level.name,
        width = level.width,
        height = level.height,
        seats = level.seats.len(),
        creatures = level.creatures.len(),
        "level.installed"
    );
    Ok(())
}

fn claim(map: &mut TileMap, seat: i32, tiles: &[TilePos]) {
    for pos in tiles {
        if let Some(tile) = map.get_mut(*pos) {
            tile.claimed_by = Some(SeatId(seat));
            tile.fullness = 0;
        }
    }
}

/// Current world as a level file. Every tile is written out explicitly.
pub fn export_level(world: &mut World) -> LevelDefinition {
    let map = world.resource::<TileMap>();
    let seats = world.resource::<SeatRegistry>();
    let rooms = world.resource::<RoomRegistry>();
    let traps = world.resource::<TrapRegistry>();
    let piles = world.resource::<GoldPiles>();
    let name = world
        .get_resource::<LevelInfo>()
        .map(|info| info.name.clone())
        .unwrap_or_default();

    let mut level = LevelDefinition {
        name,
        width: map.width(),
        height: map.height(),
        fill: TileSpec::default(),
        regions: Vec::new(),
        tiles: map
            .iter()
            .map(|(pos, tile)| TileDefinition {
                pos,
                kind: tile.kind,
                fullness: tile.fullness,
                claimed_by: tile.claimed_by.map(|seat| seat.0),
            })
            .collect(),
        seats: seats
            .iter()
            .map(|seat| SeatDefinition {
                id: seat.id.0,
                team: seat.team,
                faction: seat.faction.clone(),
                human_playable: seat.human_playable,
                starting_gold: seat.gold,
                starting_mana: seat.mana,
                goals: seat.goals.iter().map(|goal| goal.goal).collect(),
            })
            .collect(),
        rooms: rooms
            .iter()
            .map(|room| RoomDefinition {
                seat: room.seat.0,
                kind: room.kind,
                tiles: room.tiles.clone(),
            })
            .collect(),
        traps: traps
            .iter()
            .map(|trap| TrapDefinition {
                seat: trap.seat.0,
                kind: trap.kind,
                tiles: trap.tiles.iter().map(|tile| tile.pos).collect(),
            })
            .collect(),
        creatures: Vec::new(),
        gold_piles: piles
            .iter()
            .filter(|pile| pile.carried_by.is_none())
            .map(|pile| GoldPileDefinition {
                pos: pile.pos,
                amount: pile.amount,
            })
            .collect(),
    };

    let mut query = world.query::<&Creature>();
    let mut creatures: Vec<&Creature> = query.iter(world).collect();
    creatures.sort_unstable_by_key(|creature| creature.id);
    level.creatures = creatures
        .into_iter()
        .map(|creature| CreatureDefinition {
            seat: creature.seat.0,
            class: creature.class.clone(),
            pos: creature.pos,
        })
        .collect();
    level
}

/// Write the current world to `path`. An existing file is kept as
/// `<path>.bak`.
pub fn save_level(world: &mut World, path: &Path) -> Result<PathBuf, LevelError> {
    let json = export_level(world).to_json()?;
    if path.exists() {
        let mut backup = path.as_os_str().to_owned();
        backup.push(".bak");
        fs::rename(path, &backup).map_err(|source| LevelError::WriteFailed {
            path: PathBuf::from(&backup),
            source,
        })?;
    }
    fs::write(path, json).map_err(|source| LevelError::WriteFailed {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::info!(target: "dungeon::server", path = %path.display(), "level.saved");
    Ok(path.to_path_buf())
}

/// `LoadLevel` for the world as it stands: the handshake sends it before the
/// client picks a nick.
pub fn load_level_notification(world: &World) -> ServerNotification {
    let map = world.resource::<TileMap>();
    ServerNotification::LoadLevel {
        name: world
            .get_resource::<LevelInfo>()
            .map(|info| info.name.clone())
            .unwrap_or_default(),
        width: map.width(),
        height: map.height(),
        seats: world.resource::<SeatRegistry>().descriptors(),
        tiles: map.tile_states(),
    }
}

/// Level named by `DUNGEON_LEVEL`, or the builtin level.
pub fn load_level_from_env() -> Arc<LevelDefinition> {
    if let Some(path) = env::var_os("DUNGEON_LEVEL").map(PathBuf::from) {
        match LevelDefinition::from_file(&path) {
            Ok(level) => {
                tracing::info!(
                    target: "dungeon::config",
                    path = %path.display(),
                    "level.loaded=file"
                );
                return Arc::new(level);
            }
            Err(err) => {
                tracing::warn!(
                    target: "dungeon::config",
                    path = %path.display(),
                    error = %err,
                    "level.load_failed"
                );
            }
        }
    }
    LevelDefinition::builtin()
}
