//! Keeper AI for seats played by the server (player id 1).
//!
//! The AI is deliberately small: it keeps its workers busy by marking walls
//! on the edge of its territory and summons more workers while it has few.

use std::collections::BTreeMap;

use bevy::{ecs::system::SystemParam, prelude::*};
use dungeon_proto::{RoomKind, ServerNotification, SpellKind, TileKind, TilePos};

use crate::components::{creature_bundle, Creature, CreatureIds};
use crate::gameplay_config::{CreatureRole, GameplayConfigHandle};
use crate::map::TileMap;
use crate::outbox::Outbox;
use crate::resources::GameTurn;
use crate::seats::{SeatId, SeatRegistry};

pub const AI_THINK_INTERVAL: u64 = 5;
pub const AI_MARKS_PER_THINK: usize = 4;
pub const AI_MIN_WORKERS: usize = 4;

#[derive(SystemParam)]
pub struct AiParams<'w, 's> {
    pub commands: Commands<'w, 's>,
    pub gameplay: Res<'w, GameplayConfigHandle>,
    pub turn: Res<'w, GameTurn>,
    pub map: ResMut<'w, TileMap>,
    pub seats: ResMut<'w, SeatRegistry>,
    pub rooms: Res<'w, crate::rooms::RoomRegistry>,
    pub ids: ResMut<'w, CreatureIds>,
    pub outbox: ResMut<'w, Outbox>,
    pub creatures: Query<'w, 's, &'static Creature>,
}

pub fn ai_upkeep(mut params: AiParams) {
    let turn = params.turn.0;
    if turn == 0 || turn % AI_THINK_INTERVAL != 0 {
        return;
    }
    let gameplay = params.gameplay.get();
    let mut workers: BTreeMap<SeatId, usize> = BTreeMap::new();
    for creature in params.creatures.iter() {
        if creature.role == CreatureRole::Worker {
            *workers.entry(creature.seat).or_default() += 1;
        }
    }

    let ai_seats: Vec<SeatId> = params
        .seats
        .iter()
        .filter(|seat| seat.is_ai() && !seat.lost)
        .map(|seat| seat.id)
        .collect();

    for seat_id in ai_seats {
        let marked = mark_frontier(&mut params.map, seat_id, AI_MARKS_PER_THINK);
        if !marked.is_empty() {
            tracing::debug!(
                target: "dungeon::upkeep",
                seat = %seat_id,
                tiles = marked.len(),
                "ai.marked_tiles"
            );
            params.outbox.to_seat(
                seat_id,
                ServerNotification::MarkTiles {
                    tiles: marked,
                    mark: true,
                },
            );
        }

        if workers.get(&seat_id).copied().unwrap_or_default() >= AI_MIN_WORKERS {
            continue;
        }
        let (Some(spell), Some(class)) = (gameplay.spell(SpellKind::SummonWorker), gameplay.worker())
        else {
            continue;
        };
        let Some(spot) = summon_spot(&params.map, &params.rooms, seat_id) else {
            continue;
        };
        let Some(seat) = params.seats.get_mut(seat_id) else {
            continue;
        };
        if seat.mana < spell.mana_cost {
            continue;
        }
        seat.mana -= spell.mana_cost;
        let bundle = creature_bundle(&mut params.ids, class, seat_id, spot);
        tracing::info!(
            target: "dungeon::upkeep",
            seat = %seat_id,
            creature = %bundle.0.id,
            "ai.summoned_worker"
        );
        params.commands.spawn(bundle);
    }
}

/// Mark up to `limit` walls touching the seat's claimed ground, gold first,
/// then in row-major order. Returns the newly marked tiles.
pub fn mark_frontier(map: &mut TileMap, seat: SeatId, limit: usize) -> Vec<TilePos> {
    let mut candidates: Vec<(bool, TilePos)> = map
        .iter()
        .filter(|(_, tile)| tile.is_diggable_by(seat) && !tile.marked_by.contains(&seat))
        .filter(|(pos, _)| {
            pos.neighbors().into_iter().any(|next| {
                map.get(next)
                    .is_some_and(|tile| tile.is_claimed_ground_of(seat))
            })
        })
        .map(|(pos, tile)| (tile.kind != TileKind::Gold, pos))
        .collect();
    candidates.sort();

    let chosen: Vec<TilePos> = candidates
        .into_iter()
        .take(limit)
        .map(|(_, pos)| pos)
        .collect();
    for pos in &chosen {
        if let Some(tile) = map.get_mut(*pos) {
            tile.marked_by.insert(seat);
        }
    }
    chosen
}

/// Temple tile if the seat has one, otherwise its first claimed ground tile.
pub fn summon_spot(
    map: &TileMap,
    rooms: &crate::rooms::RoomRegistry,
    seat: SeatId,
) -> Option<TilePos> {
    rooms
        .tiles_of_kind(seat, RoomKind::DungeonTemple)
        .into_iter()
        .next()
        .or_else(|| {
            map.iter()
                .find(|(_, tile)| tile.is_claimed_ground_of(seat) && tile.room.is_none())
                .map(|(pos, _)| pos)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::Tile;
    use crate::rooms::RoomRegistry;
    use crate::seats::Seat;
    use bevy::ecs::system::RunSystemOnce;
    use dungeon_proto::PLAYER_ID_AI;

    fn map() -> TileMap {
        let mut map = TileMap::new(5, 5, Tile::new(TileKind::Dirt, 100));
        for pos in [TilePos::new(2, 2), TilePos::new(2, 3)] {
            let tile = map.get_mut(pos).expect("tile");
            tile.fullness = 0;
            tile.claimed_by = Some(SeatId(1));
        }
        map.get_mut(TilePos::new(3, 3)).expect("tile").kind = TileKind::Gold;
        map.take_dirty();
        map
    }

    #[test]
    fn frontier_marks_gold_first_and_never_twice() {
        let mut map = map();
        let first = mark_frontier(&mut map, SeatId(1), 2);
        assert_eq!(first[0], TilePos::new(3, 3));
        assert_eq!(first.len(), 2);
        let rest = mark_frontier(&mut map, SeatId(1), 10);
        assert!(rest.iter().all(|pos| !first.contains(pos)));
        assert_eq!(first.len() + rest.len(), 6);
        assert!(mark_frontier(&mut map, SeatId(1), 10).is_empty());
    }

    #[test]
    fn ai_summons_workers_when_it_has_mana() {
        let mut world = World::default();
        let mut seats = SeatRegistry::default();
        let mut seat = Seat::new(SeatId(1), 1, "Keeper");
        seat.player = PLAYER_ID_AI;
        seat.mana = 10_000.0;
        seats.insert(seat);
        world.insert_resource(seats);
        world.insert_resource(map());
        world.insert_resource(RoomRegistry::default());
        world.insert_resource(GameplayConfigHandle::default());
        world.insert_resource(GameTurn(AI_THINK_INTERVAL));
        world.insert_resource(CreatureIds::default());
        world.insert_resource(Outbox::default());

        world.run_system_once(ai_upkeep);

        let mut query = world.query::<&Creature>();
        let spawned: Vec<_> = query.iter(&world).collect();
        assert_eq!(spawned.len(), 1);
        assert_eq!(spawned[0].pos, TilePos::new(2, 2));
        let seat = world.resource::<SeatRegistry>().get(SeatId(1)).cloned().expect("seat");
        assert!(seat.mana < 10_000.0);
        assert!(!world.resource::<Outbox>().is_empty());
    }
}
