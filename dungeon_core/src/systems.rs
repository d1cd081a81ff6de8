use std::collections::BTreeMap;

use bevy::{ecs::system::SystemParam, prelude::*};
use dungeon_proto::{CreatureState, RoomKind, SeatState, ServerNotification};
use rand::Rng;

use crate::actions::ActionStack;
use crate::combat::CombatLedger;
use crate::components::{creature_bundle, Creature, CreatureId, CreatureIds};
use crate::gameplay_config::{CreatureRole, GameplayConfigHandle};
use crate::map::TileMap;
use crate::outbox::Outbox;
use crate::resources::{GameRng, GameTurn};
use crate::rooms::{RoomRegistry, TrapRegistry};
use crate::seats::{Goal, GoalStatus, SeatId, SeatRegistry};
use crate::upkeep::CreatureIndex;

/// Fire loaded traps at the nearest enemy in reach. Damage goes through the
/// combat ledger like any other hit.
pub fn trap_upkeep(
    gameplay: Res<GameplayConfigHandle>,
    seats: Res<SeatRegistry>,
    index: Res<CreatureIndex>,
    mut traps: ResMut<TrapRegistry>,
    mut map: ResMut<TileMap>,
    mut ledger: ResMut<CombatLedger>,
    mut outbox: ResMut<Outbox>,
) {
    let config = gameplay.config();
    let shots = traps.fire(
        |kind| config.trap(kind).cloned(),
        |seat, pos, range| {
            let team = seats.team_of(seat)?;
            index
                .enemies_near(team, pos, range)
                .first()
                .map(|enemy| enemy.id)
        },
    );

    for shot in shots {
        ledger.trap_hit(shot.seat, shot.target, shot.damage);
        outbox.broadcast(ServerNotification::PlaySpatialSound {
            sound: "Trap".into(),
            position: shot.pos.to_vector3(),
        });
        tracing::debug!(
            target: "dungeon::upkeep",
            trap = shot.trap.0,
            seat = %shot.seat,
            victim = %shot.target,
            "trap.fired"
        );
        if shot.spent {
            for (trap, tiles) in traps.remove_tiles(&mut map, &[shot.pos]) {
                outbox.broadcast(ServerNotification::RemoveTrapTiles {
                    trap: trap.0,
                    tiles,
                });
            }
        }
    }
}

/// Hatcheries regrow food up to a per-tile cap.
pub fn room_upkeep(
    gameplay: Res<GameplayConfigHandle>,
    turn: Res<GameTurn>,
    mut rooms: ResMut<RoomRegistry>,
) {
    let economy = &gameplay.config().economy;
    if economy.hatchery_regrow_turns == 0 || turn.0 % economy.hatchery_regrow_turns != 0 {
        return;
    }
    for room in rooms.iter_mut().filter(|room| room.kind == RoomKind::Hatchery) {
        let cap = room.tiles.len() as i32 * economy.hatchery_food_per_tile;
        room.food = (room.food + room.tiles.len() as i32).min(cap);
    }
}

#[derive(SystemParam)]
pub struct PortalParams<'w, 's> {
    pub commands: Commands<'w, 's>,
    pub gameplay: Res<'w, GameplayConfigHandle>,
    pub turn: Res<'w, GameTurn>,
    pub seats: Res<'w, SeatRegistry>,
    pub rooms: Res<'w, RoomRegistry>,
    pub ids: ResMut<'w, CreatureIds>,
    pub rng: ResMut<'w, GameRng>,
    pub creatures: Query<'w, 's, &'static Creature>,
}

/// Portals attract a fighter every few turns. Stronger classes only come to
/// seats that claimed enough of the dungeon.
pub fn portal_spawns(mut params: PortalParams) {
    let gameplay = params.gameplay.get();
    let interval = gameplay.economy.portal_spawn_interval;
    let turn = params.turn.0;
    if interval == 0 || turn == 0 || turn % interval != 0 {
        return;
    }
    let mut population: BTreeMap<SeatId, usize> = BTreeMap::new();
    for creature in params.creatures.iter() {
        *population.entry(creature.seat).or_default() += 1;
    }

    for seat in params.seats.iter().filter(|seat| seat.is_active()) {
        if population.get(&seat.id).copied().unwrap_or_default()
            >= gameplay.economy.max_creatures_per_seat
        {
            continue;
        }
        let Some(portal) = params
            .rooms
            .of_kind(seat.id, RoomKind::Portal)
            .find_map(|room| room.tiles.first().copied())
        else {
            continue;
        };
        let eligible: Vec<_> = gameplay
            .fighter_classes()
            .filter(|class| class.min_claimed_tiles <= seat.claimed_tiles)
            .collect();
        if eligible.is_empty() {
            continue;
        }
        let class = eligible[params.rng.0.gen_range(0..eligible.len())];
        let bundle = creature_bundle(&mut params.ids, class, seat.id, portal);
        tracing::info!(
            target: "dungeon::upkeep",
            seat = %seat.id,
            creature = %bundle.0.id,
            class = %class.name,
            turn,
            "portal.spawned"
        );
        params.commands.spawn(bundle);
    }
}

#[derive(SystemParam)]
pub struct SeatParams<'w, 's> {
    pub gameplay: Res<'w, GameplayConfigHandle>,
    pub turn: Res<'w, GameTurn>,
    pub map: Res<'w, TileMap>,
    pub rooms: Res<'w, RoomRegistry>,
    pub seats: ResMut<'w, SeatRegistry>,
    pub outbox: ResMut<'w, Outbox>,
    pub cache: Local<'s, BTreeMap<SeatId, (SeatState, String)>>,
    pub creatures: Query<'w, 's, &'static mut Creature>,
}

/// Per-seat bookkeeping once creatures and combat are settled.
pub fn seat_upkeep(mut params: SeatParams) {
    let gameplay = params.gameplay.get();
    let economy = &gameplay.economy;
    let turn = params.turn.0;
    let SeatParams {
        map,
        rooms,
        seats,
        outbox,
        cache,
        creatures,
        ..
    } = &mut params;

    if economy.payday_interval > 0 && turn > 0 && turn % economy.payday_interval == 0 {
        for mut creature in creatures.iter_mut() {
            if creature.role == CreatureRole::Fighter && creature.fee > 0 {
                creature.fee_owed += creature.fee;
            }
        }
        tracing::debug!(target: "dungeon::upkeep", turn, "seat.payday");
    }

    for seat in seats.iter_mut() {
        seat.claimed_tiles = map.claimed_count(seat.id);
        seat.mana_delta = economy.base_mana + f64::from(seat.claimed_tiles) * economy.mana_per_claimed_tile;
        seat.mana = (seat.mana + seat.mana_delta).min(economy.max_mana);

        if let Some(head) = seat.research.queue.first().copied() {
            let cost = gameplay.research_cost(head).unwrap_or(0.0);
            if seat.research.points >= cost {
                seat.research.points -= cost;
                seat.research.queue.remove(0);
                seat.research.done.insert(head);
                seat.research.changed = true;
                tracing::info!(
                    target: "dungeon::upkeep",
                    seat = %seat.id,
                    research = ?head,
                    "research.completed"
                );
            }
        }

        if seat.is_active() && !seat.won && !seat.lost {
            let has_temple = rooms.has_kind(seat.id, RoomKind::DungeonTemple);
            for goal in seat.goals.iter_mut() {
                if goal.status != GoalStatus::Uncompleted {
                    continue;
                }
                goal.status = match goal.goal {
                    Goal::ClaimTiles(count) if seat.claimed_tiles >= count => GoalStatus::Completed,
                    Goal::MineGold(amount) if seat.gold_mined >= amount => GoalStatus::Completed,
                    Goal::SurviveTurns(turns) if turn >= turns => GoalStatus::Completed,
                    Goal::ProtectTemple if !has_temple => GoalStatus::Failed,
                    _ => GoalStatus::Uncompleted,
                };
            }
            let temple_lost = seat
                .goals
                .iter()
                .any(|goal| goal.goal == Goal::ProtectTemple && goal.status == GoalStatus::Failed);
            let mut scored = seat
                .goals
                .iter()
                .filter(|goal| goal.goal != Goal::ProtectTemple)
                .peekable();
            let all_done = scored.peek().is_some()
                && scored.all(|goal| goal.status == GoalStatus::Completed);
            if temple_lost {
                seat.lost = true;
                outbox.broadcast(ServerNotification::PlayerLost { seat: seat.id.0 });
                tracing::info!(target: "dungeon::upkeep", seat = %seat.id, turn, "seat.lost");
            } else if all_done {
                seat.won = true;
                outbox.broadcast(ServerNotification::PlayerWon { seat: seat.id.0 });
                tracing::info!(target: "dungeon::upkeep", seat = %seat.id, turn, "seat.won");
            }
        }

        let recent = seat
            .fight
            .last_turn
            .is_some_and(|last| turn.saturating_sub(last) < economy.fighting_cooldown_turns);
        match (seat.fight.active, recent) {
            (false, true) => {
                seat.fight.active = true;
                if let Some(tile) = seat.fight.tile {
                    outbox.to_seat(
                        seat.id,
                        ServerNotification::PlayerFighting {
                            seat: seat.id.0,
                            tile,
                        },
                    );
                }
            }
            (true, false) => {
                seat.fight.active = false;
                outbox.to_seat(
                    seat.id,
                    ServerNotification::PlayerNoMoreFighting { seat: seat.id.0 },
                );
            }
            _ => {}
        }

        let state = (seat.state(), seat.goals_string());
        if cache.get(&seat.id) != Some(&state) {
            outbox.to_seat(
                seat.id,
                ServerNotification::RefreshPlayerSeat {
                    seat: state.0.clone(),
                    goals: state.1.clone(),
                },
            );
            cache.insert(seat.id, state);
        }
        if seat.research.changed {
            seat.research.changed = false;
            outbox.to_seat(
                seat.id,
                ServerNotification::RefreshResearch {
                    done: seat.research.done.iter().copied().collect(),
                    queue: seat.research.queue.clone(),
                },
            );
        }
    }
}

/// Last replicated state of every creature.
#[derive(Resource, Debug, Default)]
pub struct CreatureCache {
    states: BTreeMap<CreatureId, CreatureState>,
}

impl CreatureCache {
    pub fn clear(&mut self) {
        self.states.clear();
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

/// Broadcast creature additions, changes and removals since the last turn,
/// in id order.
pub fn sync_creatures(
    mut cache: ResMut<CreatureCache>,
    mut outbox: ResMut<Outbox>,
    creatures: Query<(&Creature, &ActionStack)>,
) {
    let current: BTreeMap<CreatureId, CreatureState> = creatures
        .iter()
        .map(|(creature, stack)| (creature.id, creature.state(stack)))
        .collect();

    let removed: Vec<CreatureId> = cache
        .states
        .keys()
        .filter(|id| !current.contains_key(id))
        .copied()
        .collect();
    for id in removed {
        cache.states.remove(&id);
        outbox.broadcast(ServerNotification::RemoveCreature { creature: id.0 });
    }

    for (id, state) in current {
        match cache.states.get(&id) {
            None => outbox.broadcast(ServerNotification::AddCreature {
                creature: state.clone(),
            }),
            Some(previous) if *previous != state => {
                outbox.broadcast(ServerNotification::CreatureRefresh {
                    creature: state.clone(),
                })
            }
            Some(_) => continue,
        }
        cache.states.insert(id, state);
    }
}

pub fn refresh_dirty_tiles(mut map: ResMut<TileMap>, mut outbox: ResMut<Outbox>) {
    if !map.has_dirty() {
        return;
    }
    let dirty = map.take_dirty();
    let tiles: Vec<_> = dirty
        .into_iter()
        .filter_map(|pos| map.tile_state(pos))
        .collect();
    if !tiles.is_empty() {
        outbox.broadcast(ServerNotification::RefreshTiles { tiles });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gameplay_config::GameplayConfig;
    use crate::map::Tile;
    use crate::outbox::{OutboundNotification, Recipient};
    use crate::seats::{Seat, SeatGoal};
    use bevy::ecs::system::RunSystemOnce;
    use dungeon_proto::{TileKind, TilePos, TrapKind};

    fn world() -> World {
        let mut world = World::default();
        let mut seats = SeatRegistry::default();
        let mut keeper = Seat::new(SeatId(1), 1, "Keeper");
        keeper.player = 2;
        seats.insert(keeper);
        let mut rival = Seat::new(SeatId(2), 2, "Keeper");
        rival.player = 3;
        seats.insert(rival);
        world.insert_resource(seats);
        world.insert_resource(GameplayConfigHandle::default());
        world.insert_resource(GameTurn(1));
        world.insert_resource(TileMap::new(8, 8, Tile::new(TileKind::Dirt, 0)));
        world.insert_resource(RoomRegistry::default());
        world.insert_resource(TrapRegistry::default());
        world.insert_resource(CombatLedger::default());
        world.insert_resource(CreatureIndex::default());
        world.insert_resource(CreatureIds::default());
        world.insert_resource(CreatureCache::default());
        world.insert_resource(GameRng::from_seed(3));
        world.insert_resource(Outbox::default());
        world
    }

    fn drain(world: &mut World) -> Vec<OutboundNotification> {
        world.resource_mut::<Outbox>().drain()
    }

    fn spawn_creature(world: &mut World, seat: i32, pos: TilePos) -> CreatureId {
        let gameplay = GameplayConfig::builtin();
        let class = gameplay.worker().expect("worker").clone();
        let bundle = {
            let mut ids = world.resource_mut::<CreatureIds>();
            creature_bundle(&mut ids, &class, SeatId(seat), pos)
        };
        let id = bundle.0.id;
        world.spawn(bundle);
        id
    }

    #[test]
    fn sync_reports_additions_changes_and_removals() {
        let mut world = world();
        let first = spawn_creature(&mut world, 1, TilePos::new(1, 1));
        let second = spawn_creature(&mut world, 2, TilePos::new(5, 5));
        world.run_system_once(sync_creatures);
        let added: Vec<_> = drain(&mut world)
            .into_iter()
            .map(|out| out.notification)
            .collect();
        assert!(matches!(&added[0], ServerNotification::AddCreature { creature } if creature.id == first.0));
        assert!(matches!(&added[1], ServerNotification::AddCreature { creature } if creature.id == second.0));

        world.run_system_once(sync_creatures);
        assert!(drain(&mut world).is_empty());

        let mut query = world.query::<(Entity, &mut Creature)>();
        let mut doomed = None;
        for (entity, mut creature) in query.iter_mut(&mut world) {
            if creature.id == first {
                creature.pos = TilePos::new(2, 1);
            } else {
                doomed = Some(entity);
            }
        }
        world.despawn(doomed.expect("second creature"));
        world.run_system_once(sync_creatures);
        let changes: Vec<_> = drain(&mut world)
            .into_iter()
            .map(|out| out.notification)
            .collect();
        assert_eq!(
            changes[0],
            ServerNotification::RemoveCreature { creature: second.0 }
        );
        assert!(matches!(&changes[1], ServerNotification::CreatureRefresh { creature } if creature.pos == TilePos::new(2, 1)));
    }

    #[test]
    fn seat_upkeep_recounts_and_refreshes_only_on_change() {
        let mut world = world();
        {
            let mut map = world.resource_mut::<TileMap>();
            for x in 0..3 {
                map.get_mut(TilePos::new(x, 0)).expect("tile").claimed_by = Some(SeatId(1));
            }
        }
        world.run_system_once(seat_upkeep);
        let seats = world.resource::<SeatRegistry>();
        let seat = seats.get(SeatId(1)).expect("seat");
        assert_eq!(seat.claimed_tiles, 3);
        assert!(seat.mana > 0.0);
        let first = drain(&mut world);
        assert!(first.iter().any(|out| out.recipient == Recipient::Seat(SeatId(1))
            && matches!(out.notification, ServerNotification::RefreshPlayerSeat { .. })));
    }

    #[test]
    fn completing_every_goal_wins_once() {
        let mut world = world();
        world
            .resource_mut::<SeatRegistry>()
            .get_mut(SeatId(1))
            .expect("seat")
            .goals = vec![SeatGoal {
            goal: Goal::SurviveTurns(1),
            status: GoalStatus::Uncompleted,
        }];
        world.run_system_once(seat_upkeep);
        let won = drain(&mut world)
            .into_iter()
            .filter(|out| out.notification == ServerNotification::PlayerWon { seat: 1 })
            .count();
        assert_eq!(won, 1);
        world.resource_mut::<GameTurn>().0 = 2;
        world.run_system_once(seat_upkeep);
        assert!(!drain(&mut world)
            .iter()
            .any(|out| out.notification == ServerNotification::PlayerWon { seat: 1 }));
    }

    #[test]
    fn losing_the_temple_loses_the_game() {
        let mut world = world();
        world
            .resource_mut::<SeatRegistry>()
            .get_mut(SeatId(1))
            .expect("seat")
            .goals = vec![SeatGoal {
            goal: Goal::ProtectTemple,
            status: GoalStatus::Uncompleted,
        }];
        world.run_system_once(seat_upkeep);
        assert!(drain(&mut world)
            .iter()
            .any(|out| out.notification == ServerNotification::PlayerLost { seat: 1 }));
        assert!(world.resource::<SeatRegistry>().get(SeatId(1)).expect("seat").lost);
    }

    #[test]
    fn single_use_traps_vanish_after_firing() {
        let mut world = world();
        spawn_creature(&mut world, 2, TilePos::new(4, 4));
        world.resource_scope(|world, mut traps: Mut<TrapRegistry>| {
            let mut map = world.resource_mut::<TileMap>();
            traps.build(&mut map, TrapKind::Boulder, SeatId(1), vec![TilePos::new(4, 4)]);
        });
        world.resource_scope(|world, mut index: Mut<CreatureIndex>| {
            let mut query = world.query::<&Creature>();
            let creatures: Vec<Creature> = query.iter(world).cloned().collect();
            index.rebuild(creatures.iter(), world.resource::<SeatRegistry>());
        });
        world.run_system_once(trap_upkeep);

        assert_eq!(world.resource::<CombatLedger>().len(), 1);
        assert_eq!(world.resource::<TrapRegistry>().iter().count(), 0);
        let removal = drain(&mut world)
            .into_iter()
            .any(|out| matches!(out.notification, ServerNotification::RemoveTrapTiles { .. }));
        assert!(removal);
    }

    #[test]
    fn portal_spawns_a_fighter_on_schedule() {
        let mut world = world();
        let interval = GameplayConfig::builtin().economy.portal_spawn_interval;
        world.resource_scope(|world, mut rooms: Mut<RoomRegistry>| {
            let mut map = world.resource_mut::<TileMap>();
            rooms.build(&mut map, RoomKind::Portal, SeatId(1), vec![TilePos::new(1, 1)]);
        });
        world.resource_mut::<GameTurn>().0 = interval;
        world.run_system_once(portal_spawns);

        let mut query = world.query::<&Creature>();
        let spawned: Vec<_> = query.iter(&world).collect();
        assert_eq!(spawned.len(), 1);
        assert_eq!(spawned[0].seat, SeatId(1));
        assert_eq!(spawned[0].role, CreatureRole::Fighter);
        assert_eq!(spawned[0].pos, TilePos::new(1, 1));
    }

    #[test]
    fn dirty_tiles_are_refreshed_once() {
        let mut world = world();
        world
            .resource_mut::<TileMap>()
            .get_mut(TilePos::new(2, 2))
            .expect("tile")
            .fullness = 50;
        world.run_system_once(refresh_dirty_tiles);
        let out = drain(&mut world);
        assert_eq!(out.len(), 1);
        assert!(matches!(&out[0].notification, ServerNotification::RefreshTiles { tiles } if tiles.len() == 1));
        world.run_system_once(refresh_dirty_tiles);
        assert!(drain(&mut world).is_empty());
    }
}
