use std::collections::VecDeque;

use bevy::prelude::*;
use dungeon_proto::{CreatureState, SeatResearchState, SnapshotHeader, WorldSnapshot};

use crate::{
    actions::ActionStack,
    components::Creature,
    map::TileMap,
    resources::GameTurn,
    rooms::{GoldPiles, RoomRegistry, TrapRegistry},
    seats::SeatRegistry,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSnapshot {
    pub turn: u64,
    pub hash: u64,
}

/// Hashes of the most recent turns. Catch-up payloads are built on demand
/// since requests change the world between turns.
#[derive(Resource, Default)]
pub struct SnapshotHistory {
    limit: usize,
    entries: VecDeque<StoredSnapshot>,
}

impl SnapshotHistory {
    pub fn with_capacity(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            ..Default::default()
        }
    }

    pub fn update(&mut self, snapshot: &WorldSnapshot) {
        let entry = StoredSnapshot {
            turn: snapshot.header.turn,
            hash: snapshot.header.hash,
        };
        if self.entries.len() >= self.limit.max(1) {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn hash_for(&self, turn: u64) -> Option<u64> {
        self.entries
            .iter()
            .find(|entry| entry.turn == turn)
            .map(|entry| entry.hash)
    }

    pub fn entries(&self) -> impl Iterator<Item = &StoredSnapshot> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Full world state, creatures in id order.
pub fn build_snapshot(world: &mut World) -> WorldSnapshot {
    let mut query = world.query::<(&Creature, &ActionStack)>();
    let mut creatures: Vec<CreatureState> = query
        .iter(world)
        .map(|(creature, stack)| creature.state(stack))
        .collect();
    creatures.sort_unstable_by_key(|state| state.id);

    let turn = world.get_resource::<GameTurn>().map(|turn| turn.0).unwrap_or_default();
    let map = world.resource::<TileMap>();
    let seats = world.resource::<SeatRegistry>();
    let tiles = map.tile_states();

    WorldSnapshot {
        header: SnapshotHeader::new(turn, map.width(), map.height(), tiles.len(), creatures.len()),
        tiles,
        creatures,
        seats: seats.iter().map(|seat| seat.state()).collect(),
        research: seats
            .iter()
            .map(|seat| SeatResearchState {
                seat: seat.id.0,
                done: seat.research.done.iter().copied().collect(),
                queue: seat.research.queue.clone(),
            })
            .collect(),
        rooms: world.resource::<RoomRegistry>().states(),
        traps: world.resource::<TrapRegistry>().states(),
        gold_piles: world.resource::<GoldPiles>().states(),
    }
    .finalize()
}

/// Last system of the turn pipeline.
pub fn capture_snapshot(world: &mut World) {
    let snapshot = build_snapshot(world);
    tracing::trace!(
        target: "dungeon::turn",
        turn = snapshot.header.turn,
        hash = snapshot.header.hash,
        "snapshot.captured"
    );
    world.resource_mut::<SnapshotHistory>().update(&snapshot);
}
