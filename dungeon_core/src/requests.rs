//! Player and editor requests applied to the world between turns.
//!
//! Every request is validated against the current world before anything is
//! mutated. Batched requests apply their valid entries and report the rest;
//! single requests either apply completely or return a [`RequestError`].

use bevy::{
    ecs::system::{SystemParam, SystemState},
    prelude::*,
};
use dungeon_proto::{
    ResearchKind, RoomKind, ServerNotification, SpellKind, TileKind, TilePos, TrapKind,
};
use thiserror::Error;

use crate::actions::{Action, ActionKind, ActionStack};
use crate::components::{creature_bundle, Creature, CreatureId, CreatureIds, RemovalReason};
use crate::gameplay_config::{CreatureRole, GameplayConfigHandle};
use crate::map::{PathFinder, TileMap};
use crate::outbox::Outbox;
use crate::rooms::{GoldPiles, RoomRegistry, TrapRegistry};
use crate::seats::{SeatId, SeatRegistry};

/// Turns a slapped creature keeps moving at double speed.
pub const SLAP_HASTE_TURNS: u32 = 5;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RequestError {
    #[error("unknown seat {0}")]
    UnknownSeat(SeatId),
    #[error("unknown creature {0}")]
    UnknownCreature(CreatureId),
    #[error("creature {0} belongs to another seat")]
    NotOwner(CreatureId),
    #[error("tile {0:?} is outside the map")]
    OutOfBounds(TilePos),
    #[error("tile {0:?} cannot be dug")]
    NotDiggable(TilePos),
    #[error("tile {0:?} is already marked")]
    AlreadyMarked(TilePos),
    #[error("tile {0:?} is not marked")]
    NotMarked(TilePos),
    #[error("tile {0:?} is not free claimed ground")]
    NotBuildable(TilePos),
    #[error("tile {0:?} was listed twice")]
    Duplicate(TilePos),
    #[error("{0:?} cannot be built by players")]
    ReservedRoom(RoomKind),
    #[error("not enough gold: {needed} needed, {available} available")]
    NotEnoughGold { needed: i64, available: i64 },
    #[error("not enough mana: {needed} needed, {available:.0} available")]
    NotEnoughMana { needed: f64, available: f64 },
    #[error("{0:?} has not been researched")]
    NotResearched(ResearchKind),
    #[error("{0:?} cannot be researched")]
    UnknownResearch(ResearchKind),
    #[error("{0:?} is already researched or queued")]
    AlreadyResearched(ResearchKind),
    #[error("no room of yours on tile {0:?}")]
    NoRoom(TilePos),
    #[error("no trap of yours on tile {0:?}")]
    NoTrap(TilePos),
    #[error("the dungeon temple cannot be sold")]
    TempleNotSellable,
    #[error("creature {0} is already in hand")]
    AlreadyInHand(CreatureId),
    #[error("creature {0} is in hand")]
    InHand(CreatureId),
    #[error("the hand is full")]
    HandFull,
    #[error("the hand is empty")]
    HandEmpty,
    #[error("no creature available to pick up")]
    NothingToPickUp,
    #[error("cannot drop on tile {0:?}")]
    InvalidDrop(TilePos),
    #[error("no target for the spell on tile {0:?}")]
    NoSpellTarget(TilePos),
    #[error("unknown creature class {0:?}")]
    UnknownClass(String),
    #[error("unknown spell {0:?}")]
    UnknownSpell(SpellKind),
}

/// Result of a batched request: which entries were applied and why the others
/// were skipped.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome<T> {
    pub applied: Vec<T>,
    pub rejected: Vec<(T, RequestError)>,
}

impl<T> Default for BatchOutcome<T> {
    fn default() -> Self {
        Self {
            applied: Vec::new(),
            rejected: Vec::new(),
        }
    }
}

impl<T> BatchOutcome<T> {
    pub fn is_complete(&self) -> bool {
        self.rejected.is_empty()
    }

    fn reject(&mut self, entry: T, error: RequestError) {
        self.rejected.push((entry, error));
    }
}

#[derive(SystemParam)]
pub struct RequestParams<'w, 's> {
    pub commands: Commands<'w, 's>,
    pub gameplay: Res<'w, GameplayConfigHandle>,
    pub paths: Res<'w, PathFinder>,
    pub map: ResMut<'w, TileMap>,
    pub seats: ResMut<'w, SeatRegistry>,
    pub rooms: ResMut<'w, RoomRegistry>,
    pub traps: ResMut<'w, TrapRegistry>,
    pub piles: ResMut<'w, GoldPiles>,
    pub ids: ResMut<'w, CreatureIds>,
    pub outbox: ResMut<'w, Outbox>,
    pub creatures: Query<'w, 's, (&'static mut Creature, &'static mut ActionStack)>,
}

impl RequestParams<'_, '_> {
    fn creature(
        &mut self,
        id: CreatureId,
    ) -> Result<(Mut<'_, Creature>, Mut<'_, ActionStack>), RequestError> {
        self.creatures
            .iter_mut()
            .find(|(creature, _)| creature.id == id)
            .ok_or(RequestError::UnknownCreature(id))
    }

    fn seat_exists(&self, seat: SeatId) -> Result<(), RequestError> {
        if self.seats.contains(seat) {
            Ok(())
        } else {
            Err(RequestError::UnknownSeat(seat))
        }
    }

    fn check_researched(&self, seat: SeatId, kind: ResearchKind) -> Result<(), RequestError> {
        let seat = self.seats.get(seat).ok_or(RequestError::UnknownSeat(seat))?;
        if seat.research.is_done(kind) {
            Ok(())
        } else {
            Err(RequestError::NotResearched(kind))
        }
    }
}

/// Run `f` against the request view of `world`, then apply queued commands.
pub fn with_requests<R>(world: &mut World, f: impl FnOnce(&mut RequestParams) -> R) -> R {
    let mut state: SystemState<RequestParams> = SystemState::new(world);
    let result = {
        let mut params = state.get_mut(world);
        f(&mut params)
    };
    state.apply(world);
    result
}

/// Keep the first occurrence of every tile, rejecting repeats.
fn dedup_tiles(tiles: &[TilePos], outcome: &mut BatchOutcome<TilePos>) -> Vec<TilePos> {
    let mut seen = std::collections::BTreeSet::new();
    let mut unique = Vec::with_capacity(tiles.len());
    for tile in tiles {
        if seen.insert(*tile) {
            unique.push(*tile);
        } else {
            outcome.reject(*tile, RequestError::Duplicate(*tile));
        }
    }
    unique
}

pub fn mark_tiles(
    world: &mut World,
    seat: SeatId,
    tiles: &[TilePos],
    mark: bool,
) -> Result<BatchOutcome<TilePos>, RequestError> {
    with_requests(world, |params| {
        params.seat_exists(seat)?;
        let mut outcome = BatchOutcome::default();
        for pos in dedup_tiles(tiles, &mut outcome) {
            let Some(tile) = params.map.get(pos) else {
                outcome.reject(pos, RequestError::OutOfBounds(pos));
                continue;
            };
            let marked = tile.marked_by.contains(&seat);
            let error = if mark && marked {
                Some(RequestError::AlreadyMarked(pos))
            } else if mark && !tile.is_diggable_by(seat) {
                Some(RequestError::NotDiggable(pos))
            } else if !mark && !marked {
                Some(RequestError::NotMarked(pos))
            } else {
                None
            };
            if let Some(error) = error {
                outcome.reject(pos, error);
                continue;
            }
            if let Some(tile) = params.map.get_mut(pos) {
                if mark {
                    tile.marked_by.insert(seat);
                } else {
                    tile.marked_by.remove(&seat);
                }
            }
            outcome.applied.push(pos);
        }
        if !outcome.applied.is_empty() {
            params.outbox.to_seat(
                seat,
                ServerNotification::MarkTiles {
                    tiles: outcome.applied.clone(),
                    mark,
                },
            );
        }
        Ok(outcome)
    })
}

/// Build a room on the seat's free claimed ground. Tiles are paid for one by
/// one; those the treasury cannot cover are rejected.
pub fn build_room(
    world: &mut World,
    seat: SeatId,
    kind: RoomKind,
    tiles: &[TilePos],
) -> Result<BatchOutcome<TilePos>, RequestError> {
    if matches!(kind, RoomKind::DungeonTemple | RoomKind::Portal) {
        return Err(RequestError::ReservedRoom(kind));
    }
    with_requests(world, |params| {
        params.check_researched(seat, ResearchKind::Room(kind))?;
        let cost = params.gameplay.config().room_cost(kind);
        let mut outcome = BatchOutcome::default();
        let candidates = dedup_tiles(tiles, &mut outcome);
        let buildable = filter_buildable(&params.map, seat, candidates, &mut outcome);
        let paid = pay_per_tile(&mut params.seats, seat, cost, buildable, &mut outcome)?;
        if paid.is_empty() {
            return Ok(outcome);
        }
        let food = params.gameplay.config().economy.hatchery_food_per_tile;
        let id = params.rooms.build(&mut params.map, kind, seat, paid.clone());
        if let Some(room) = params.rooms.get_mut(id) {
            if kind == RoomKind::Hatchery {
                room.food = room.tiles.len() as i32 * food;
            }
            params
                .outbox
                .broadcast(ServerNotification::BuildRoom { room: room.state() });
        }
        outcome.applied = paid;
        Ok(outcome)
    })
}

pub fn build_trap(
    world: &mut World,
    seat: SeatId,
    kind: TrapKind,
    tiles: &[TilePos],
) -> Result<BatchOutcome<TilePos>, RequestError> {
    with_requests(world, |params| {
        params.check_researched(seat, ResearchKind::Trap(kind))?;
        let cost = params.gameplay.config().trap_cost(kind);
        let mut outcome = BatchOutcome::default();
        let candidates = dedup_tiles(tiles, &mut outcome);
        let buildable = filter_buildable(&params.map, seat, candidates, &mut outcome);
        let paid = pay_per_tile(&mut params.seats, seat, cost, buildable, &mut outcome)?;
        if paid.is_empty() {
            return Ok(outcome);
        }
        let id = params.traps.build(&mut params.map, kind, seat, paid.clone());
        if let Some(trap) = params.traps.get(id) {
            params
                .outbox
                .broadcast(ServerNotification::BuildTrap { trap: trap.state() });
        }
        outcome.applied = paid;
        Ok(outcome)
    })
}

fn filter_buildable(
    map: &TileMap,
    seat: SeatId,
    tiles: Vec<TilePos>,
    outcome: &mut BatchOutcome<TilePos>,
) -> Vec<TilePos> {
    tiles
        .into_iter()
        .filter(|pos| match map.get(*pos) {
            Some(tile) if tile.is_buildable_by(seat) => true,
            Some(_) => {
                outcome.reject(*pos, RequestError::NotBuildable(*pos));
                false
            }
            None => {
                outcome.reject(*pos, RequestError::OutOfBounds(*pos));
                false
            }
        })
        .collect()
}

fn pay_per_tile(
    seats: &mut SeatRegistry,
    seat: SeatId,
    cost: i64,
    tiles: Vec<TilePos>,
    outcome: &mut BatchOutcome<TilePos>,
) -> Result<Vec<TilePos>, RequestError> {
    let seat = seats.get_mut(seat).ok_or(RequestError::UnknownSeat(seat))?;
    let mut paid = Vec::with_capacity(tiles.len());
    for pos in tiles {
        if seat.gold < cost {
            outcome.reject(
                pos,
                RequestError::NotEnoughGold {
                    needed: cost,
                    available: seat.gold,
                },
            );
            continue;
        }
        seat.gold -= cost;
        paid.push(pos);
    }
    Ok(paid)
}

/// Sell room tiles back for part of their cost. The temple is never sold.
pub fn sell_room_tiles(
    world: &mut World,
    seat: SeatId,
    tiles: &[TilePos],
) -> Result<BatchOutcome<TilePos>, RequestError> {
    with_requests(world, |params| {
        params.seat_exists(seat)?;
        let config = params.gameplay.get();
        let mut outcome = BatchOutcome::default();
        let mut sellable = Vec::new();
        let mut refund = 0.0;
        for pos in dedup_tiles(tiles, &mut outcome) {
            let room = params
                .map
                .get(pos)
                .and_then(|tile| tile.room)
                .and_then(|id| params.rooms.get(id))
                .filter(|room| room.seat == seat);
            match room {
                None => outcome.reject(pos, RequestError::NoRoom(pos)),
                Some(room) if room.kind == RoomKind::DungeonTemple => {
                    outcome.reject(pos, RequestError::TempleNotSellable)
                }
                Some(room) => {
                    refund += config.room_cost(room.kind) as f64 * config.economy.sell_refund_ratio;
                    sellable.push(pos);
                }
            }
        }
        remove_room_tiles(params, &sellable);
        if let Some(owner) = params.seats.get_mut(seat) {
            owner.gold += refund.round() as i64;
        }
        outcome.applied = sellable;
        Ok(outcome)
    })
}

/// Editor: remove any room from the tiles, without refund.
pub fn destroy_room_tiles(world: &mut World, tiles: &[TilePos]) -> BatchOutcome<TilePos> {
    with_requests(world, |params| {
        let mut outcome = BatchOutcome::default();
        let mut doomed = Vec::new();
        for pos in dedup_tiles(tiles, &mut outcome) {
            if params.map.get(pos).and_then(|tile| tile.room).is_some() {
                doomed.push(pos);
            } else {
                outcome.reject(pos, RequestError::NoRoom(pos));
            }
        }
        remove_room_tiles(params, &doomed);
        outcome.applied = doomed;
        outcome
    })
}

fn remove_room_tiles(params: &mut RequestParams, tiles: &[TilePos]) {
    if tiles.is_empty() {
        return;
    }
    for (room, tiles) in params.rooms.remove_tiles(&mut params.map, tiles) {
        params
            .outbox
            .broadcast(ServerNotification::RemoveRoomTiles { room: room.0, tiles });
    }
}

pub fn sell_trap_tiles(
    world: &mut World,
    seat: SeatId,
    tiles: &[TilePos],
) -> Result<BatchOutcome<TilePos>, RequestError> {
    with_requests(world, |params| {
        params.seat_exists(seat)?;
        let config = params.gameplay.get();
        let mut outcome = BatchOutcome::default();
        let mut sellable = Vec::new();
        let mut refund = 0.0;
        for pos in dedup_tiles(tiles, &mut outcome) {
            let trap = params
                .map
                .get(pos)
                .and_then(|tile| tile.trap)
                .and_then(|id| params.traps.get(id))
                .filter(|trap| trap.seat == seat);
            match trap {
                Some(trap) => {
                    refund += config.trap_cost(trap.kind) as f64 * config.economy.sell_refund_ratio;
                    sellable.push(pos);
                }
                None => outcome.reject(pos, RequestError::NoTrap(pos)),
            }
        }
        remove_trap_tiles(params, &sellable);
        if let Some(owner) = params.seats.get_mut(seat) {
            owner.gold += refund.round() as i64;
        }
        outcome.applied = sellable;
        Ok(outcome)
    })
}

pub fn destroy_trap_tiles(world: &mut World, tiles: &[TilePos]) -> BatchOutcome<TilePos> {
    with_requests(world, |params| {
        let mut outcome = BatchOutcome::default();
        let mut doomed = Vec::new();
        for pos in dedup_tiles(tiles, &mut outcome) {
            if params.map.get(pos).and_then(|tile| tile.trap).is_some() {
                doomed.push(pos);
            } else {
                outcome.reject(pos, RequestError::NoTrap(pos));
            }
        }
        remove_trap_tiles(params, &doomed);
        outcome.applied = doomed;
        outcome
    })
}

fn remove_trap_tiles(params: &mut RequestParams, tiles: &[TilePos]) {
    if tiles.is_empty() {
        return;
    }
    for (trap, tiles) in params.traps.remove_tiles(&mut params.map, tiles) {
        params
            .outbox
            .broadcast(ServerNotification::RemoveTrapTiles { trap: trap.0, tiles });
    }
}

/// Lift a creature into the keeper's hand. Its whole action stack is
/// cancelled and anything it carried is put down.
pub fn pick_up(world: &mut World, seat: SeatId, id: CreatureId) -> Result<(), RequestError> {
    with_requests(world, |params| {
        let max_hand = params.gameplay.config().economy.max_hand_size;
        let hand_len = params
            .seats
            .get(seat)
            .ok_or(RequestError::UnknownSeat(seat))?
            .hand
            .len();
        let (mut creature, mut stack) = params.creature(id)?;
        if creature.seat != seat {
            return Err(RequestError::NotOwner(id));
        }
        if creature.in_hand {
            return Err(RequestError::AlreadyInHand(id));
        }
        if !creature.is_alive() {
            return Err(RequestError::UnknownCreature(id));
        }
        if hand_len >= max_hand {
            return Err(RequestError::HandFull);
        }
        creature.in_hand = true;
        stack.clear();
        let carried = creature.carried_pile.take();
        let pos = creature.pos;
        drop((creature, stack));

        if let Some(pile_id) = carried {
            if let Some(pile) = params.piles.get_mut(pile_id) {
                pile.carried_by = None;
                pile.pos = pos;
            }
            params
                .outbox
                .broadcast(ServerNotification::ReleaseCarriedEntity {
                    carrier: id.0,
                    pile: pile_id.0,
                });
        }
        if let Some(owner) = params.seats.get_mut(seat) {
            owner.hand.push(id);
        }
        params
            .outbox
            .broadcast(ServerNotification::AnimatedObjectClearDestinations { creature: id.0 });
        params
            .outbox
            .broadcast(ServerNotification::EntityPickedUp {
                seat: seat.0,
                creature: id.0,
            });
        Ok(())
    })
}

/// Pick up the seat's first creature of `role` that is not already held.
pub fn pick_up_role(
    world: &mut World,
    seat: SeatId,
    role: CreatureRole,
) -> Result<CreatureId, RequestError> {
    let mut query = world.query::<&Creature>();
    let mut candidates: Vec<CreatureId> = query
        .iter(world)
        .filter(|creature| {
            creature.seat == seat && creature.role == role && !creature.in_hand && creature.is_alive()
        })
        .map(|creature| creature.id)
        .collect();
    candidates.sort_unstable();
    let id = candidates
        .first()
        .copied()
        .ok_or(RequestError::NothingToPickUp)?;
    pick_up(world, seat, id)?;
    Ok(id)
}

/// Drop the most recently picked creature on `tile`. Workers get a forced
/// dig search, fighters a forced fight against whatever they see first.
pub fn hand_drop(world: &mut World, seat: SeatId, tile: TilePos) -> Result<CreatureId, RequestError> {
    with_requests(world, |params| {
        let id = params
            .seats
            .get(seat)
            .ok_or(RequestError::UnknownSeat(seat))?
            .hand
            .last()
            .copied()
            .ok_or(RequestError::HandEmpty)?;
        if params.creature(id).is_err() {
            // the held creature is gone; forget it so the next drop can proceed
            if let Some(owner) = params.seats.get_mut(seat) {
                owner.hand.pop();
            }
            return Err(RequestError::UnknownCreature(id));
        }
        let droppable = params
            .map
            .get(tile)
            .is_some_and(|target| target.is_claimed_ground_of(seat));
        if !droppable {
            return Err(RequestError::InvalidDrop(tile));
        }
        let (mut creature, mut stack) = params.creature(id)?;
        creature.in_hand = false;
        creature.pos = tile;
        stack.clear();
        let forced = if creature.is_worker() {
            ActionKind::SearchTileToDig
        } else {
            ActionKind::Fight { target: None }
        };
        stack.push(Action::forced(forced));
        drop((creature, stack));

        if let Some(owner) = params.seats.get_mut(seat) {
            owner.hand.pop();
        }
        params
            .outbox
            .broadcast(ServerNotification::EntityDropped {
                seat: seat.0,
                creature: id.0,
                tile,
            });
        Ok(id)
    })
}

pub fn slap(world: &mut World, seat: SeatId, id: CreatureId) -> Result<(), RequestError> {
    with_requests(world, |params| {
        let damage = params.gameplay.config().economy.slap_damage;
        let (mut creature, _) = params.creature(id)?;
        if creature.seat != seat {
            return Err(RequestError::NotOwner(id));
        }
        if creature.in_hand {
            return Err(RequestError::InHand(id));
        }
        if !creature.is_alive() {
            return Err(RequestError::UnknownCreature(id));
        }
        creature.hp -= damage;
        creature.slapped_turns = SLAP_HASTE_TURNS;
        if creature.hp <= 0.0 {
            creature.hp = 0.0;
            creature.pending_removal = Some(RemovalReason::Killed);
        }
        params
            .outbox
            .broadcast(ServerNotification::EntitySlapped { creature: id.0 });
        Ok(())
    })
}

/// Cast a researched spell on `tile`, paying its mana cost.
pub fn cast_spell(
    world: &mut World,
    seat: SeatId,
    spell: SpellKind,
    tile: TilePos,
) -> Result<(), RequestError> {
    with_requests(world, |params| {
        let gameplay = params.gameplay.get();
        let config = gameplay
            .spell(spell)
            .ok_or(RequestError::UnknownSpell(spell))?;
        params.check_researched(seat, ResearchKind::Spell(spell))?;
        let available = params
            .seats
            .get(seat)
            .ok_or(RequestError::UnknownSeat(seat))?
            .mana;
        if available < config.mana_cost {
            return Err(RequestError::NotEnoughMana {
                needed: config.mana_cost,
                available,
            });
        }
        let on_own_ground = params
            .map
            .get(tile)
            .ok_or(RequestError::OutOfBounds(tile))?
            .is_claimed_ground_of(seat);

        match spell {
            SpellKind::SummonWorker => {
                if !on_own_ground {
                    return Err(RequestError::NoSpellTarget(tile));
                }
                let class = gameplay
                    .worker()
                    .ok_or_else(|| RequestError::UnknownClass(gameplay.worker_class.clone()))?;
                let bundle = creature_bundle(&mut params.ids, class, seat, tile);
                params.commands.spawn(bundle);
            }
            SpellKind::Heal => {
                let mut healed = 0;
                for (mut creature, _) in params.creatures.iter_mut() {
                    if creature.seat == seat && creature.pos == tile && creature.is_alive() && !creature.in_hand {
                        creature.heal(config.power);
                        healed += 1;
                    }
                }
                if healed == 0 {
                    return Err(RequestError::NoSpellTarget(tile));
                }
            }
            SpellKind::CallToWar => {
                if !params.map.is_walkable(tile) {
                    return Err(RequestError::NoSpellTarget(tile));
                }
                let mut called = 0;
                for (creature, mut stack) in params.creatures.iter_mut() {
                    if creature.seat != seat
                        || creature.role != CreatureRole::Fighter
                        || creature.in_hand
                        || !creature.is_alive()
                    {
                        continue;
                    }
                    let Some(path) = params.paths.find_path(&params.map, creature.pos, tile) else {
                        continue;
                    };
                    stack.clear_voluntary();
                    stack.push(Action::forced(ActionKind::WalkToTile { target: tile, path }));
                    called += 1;
                }
                if called == 0 {
                    return Err(RequestError::NoSpellTarget(tile));
                }
            }
        }

        if let Some(owner) = params.seats.get_mut(seat) {
            owner.mana -= config.mana_cost;
        }
        params.outbox.broadcast(ServerNotification::PlaySpatialSound {
            sound: format!("Spell{spell:?}"),
            position: tile.to_vector3(),
        });
        Ok(())
    })
}

/// Replace the seat's research queue. Entries already researched, unknown or
/// repeated are skipped.
pub fn set_research_queue(
    world: &mut World,
    seat: SeatId,
    queue: &[ResearchKind],
) -> Result<BatchOutcome<ResearchKind>, RequestError> {
    with_requests(world, |params| {
        let gameplay = params.gameplay.get();
        let owner = params
            .seats
            .get_mut(seat)
            .ok_or(RequestError::UnknownSeat(seat))?;
        let mut outcome = BatchOutcome::default();
        for kind in queue {
            if owner.research.is_done(*kind) || outcome.applied.contains(kind) {
                outcome.reject(*kind, RequestError::AlreadyResearched(*kind));
            } else if gameplay.research_cost(*kind).is_none() {
                outcome.reject(*kind, RequestError::UnknownResearch(*kind));
            } else {
                outcome.applied.push(*kind);
            }
        }
        owner.research.queue = outcome.applied.clone();
        owner.research.changed = true;
        Ok(outcome)
    })
}

pub fn creature_info(world: &mut World, id: CreatureId) -> Result<String, RequestError> {
    let mut query = world.query::<(&Creature, &ActionStack)>();
    query
        .iter(world)
        .find(|(creature, _)| creature.id == id)
        .map(|(creature, stack)| creature.info(stack))
        .ok_or(RequestError::UnknownCreature(id))
}

/// Editor: rewrite tiles. Walls lose whatever room or trap stood on them.
pub fn change_tiles(
    world: &mut World,
    tiles: &[TilePos],
    kind: TileKind,
    fullness: i32,
) -> BatchOutcome<TilePos> {
    with_requests(world, |params| {
        let mut outcome = BatchOutcome::default();
        let mut changed = Vec::new();
        for pos in dedup_tiles(tiles, &mut outcome) {
            if !params.map.contains(pos) {
                outcome.reject(pos, RequestError::OutOfBounds(pos));
                continue;
            }
            changed.push(pos);
        }
        if fullness > 0 {
            remove_room_tiles(params, &changed);
            remove_trap_tiles(params, &changed);
        }
        for pos in &changed {
            if let Some(tile) = params.map.get_mut(*pos) {
                tile.kind = kind;
                tile.fullness = fullness.clamp(0, crate::map::FULLNESS_MAX);
                tile.claim_progress = 0.0;
                if fullness > 0 {
                    tile.claimed_by = None;
                    tile.marked_by.clear();
                }
            }
        }
        outcome.applied = changed;
        outcome
    })
}

/// Editor: build a room for any seat on walkable ground, claiming the tiles.
pub fn editor_build_room(
    world: &mut World,
    seat: SeatId,
    kind: RoomKind,
    tiles: &[TilePos],
) -> Result<BatchOutcome<TilePos>, RequestError> {
    with_requests(world, |params| {
        params.seat_exists(seat)?;
        let mut outcome = BatchOutcome::default();
        let ground = editor_ground(params, seat, tiles, &mut outcome);
        if ground.is_empty() {
            return Ok(outcome);
        }
        let id = params.rooms.build(&mut params.map, kind, seat, ground.clone());
        if let Some(room) = params.rooms.get(id) {
            params
                .outbox
                .broadcast(ServerNotification::BuildRoom { room: room.state() });
        }
        outcome.applied = ground;
        Ok(outcome)
    })
}

pub fn editor_build_trap(
    world: &mut World,
    seat: SeatId,
    kind: TrapKind,
    tiles: &[TilePos],
) -> Result<BatchOutcome<TilePos>, RequestError> {
    with_requests(world, |params| {
        params.seat_exists(seat)?;
        let mut outcome = BatchOutcome::default();
        let ground = editor_ground(params, seat, tiles, &mut outcome);
        if ground.is_empty() {
            return Ok(outcome);
        }
        let id = params.traps.build(&mut params.map, kind, seat, ground.clone());
        if let Some(trap) = params.traps.get(id) {
            params
                .outbox
                .broadcast(ServerNotification::BuildTrap { trap: trap.state() });
        }
        outcome.applied = ground;
        Ok(outcome)
    })
}

fn editor_ground(
    params: &mut RequestParams,
    seat: SeatId,
    tiles: &[TilePos],
    outcome: &mut BatchOutcome<TilePos>,
) -> Vec<TilePos> {
    let mut ground = Vec::new();
    for pos in dedup_tiles(tiles, outcome) {
        match params.map.get(pos) {
            Some(tile) if tile.is_walkable() && tile.room.is_none() && tile.trap.is_none() => {
                ground.push(pos)
            }
            Some(_) => outcome.reject(pos, RequestError::NotBuildable(pos)),
            None => outcome.reject(pos, RequestError::OutOfBounds(pos)),
        }
    }
    for pos in &ground {
        if let Some(tile) = params.map.get_mut(*pos) {
            tile.claimed_by = Some(seat);
            tile.claim_progress = 0.0;
        }
    }
    ground
}

/// Editor: spawn a creature of `class` (the worker class when `None`).
pub fn editor_create_creature(
    world: &mut World,
    seat: SeatId,
    class: Option<&str>,
    tile: TilePos,
) -> Result<CreatureId, RequestError> {
    with_requests(world, |params| {
        params.seat_exists(seat)?;
        let gameplay = params.gameplay.get();
        let class = match class {
            Some(name) => gameplay
                .class(name)
                .ok_or_else(|| RequestError::UnknownClass(name.to_string()))?,
            None => gameplay
                .worker()
                .ok_or_else(|| RequestError::UnknownClass(gameplay.worker_class.clone()))?,
        };
        if !params.map.is_walkable(tile) {
            return Err(RequestError::InvalidDrop(tile));
        }
        let bundle = creature_bundle(&mut params.ids, class, seat, tile);
        let id = bundle.0.id;
        params.commands.spawn(bundle);
        Ok(id)
    })
}
