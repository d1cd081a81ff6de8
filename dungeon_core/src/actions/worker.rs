use dungeon_proto::{RoomKind, ServerNotification, TileKind, TilePos};

use super::movement::walk_to;
use super::{Action, ActionKind, StepOutcome};
use crate::components::Creature;
use crate::map::search;
use crate::rooms::PileId;
use crate::upkeep::UpkeepCtx;

fn walk_along(forced: bool, target: TilePos, path: Vec<TilePos>) -> StepOutcome {
    if path.is_empty() {
        StepOutcome::InProgress
    } else {
        StepOutcome::Push(Action::child_of(
            forced,
            ActionKind::WalkToTile { target, path },
        ))
    }
}

fn sound(ctx: &mut UpkeepCtx, name: &str, pos: TilePos) {
    ctx.outbox.broadcast(ServerNotification::PlaySpatialSound {
        sound: name.to_string(),
        position: pos.to_vector3(),
    });
}

fn is_dig_target(ctx: &UpkeepCtx, creature: &Creature, pos: TilePos) -> bool {
    ctx.map.get(pos).is_some_and(|tile| {
        tile.marked_by.contains(&creature.seat) && tile.is_diggable_by(creature.seat)
    })
}

/// Nearest wall marked by the creature's seat that it can stand next to.
pub(super) fn find_dig_target(ctx: &UpkeepCtx, creature: &Creature) -> Option<TilePos> {
    search(ctx.map, creature.pos, usize::MAX, |pos| {
        pos.neighbors()
            .into_iter()
            .find(|next| is_dig_target(ctx, creature, *next))
    })
    .map(|(target, _)| target)
}

pub(super) fn search_tile_to_dig(
    ctx: &mut UpkeepCtx,
    creature: &mut Creature,
    forced: bool,
) -> StepOutcome {
    match find_dig_target(ctx, creature) {
        Some(tile) => StepOutcome::Replace(Action::child_of(forced, ActionKind::DigTile { tile })),
        None => StepOutcome::Complete,
    }
}

pub(super) fn dig_tile(
    ctx: &mut UpkeepCtx,
    creature: &mut Creature,
    tile: TilePos,
    forced: bool,
) -> StepOutcome {
    if !is_dig_target(ctx, creature, tile) {
        return StepOutcome::Complete;
    }
    if creature.pos.manhattan(tile) != 1 {
        return match search(ctx.map, creature.pos, usize::MAX, |pos| {
            (pos.manhattan(tile) == 1).then_some(pos)
        }) {
            Some((stand, path)) => walk_along(forced, stand, path),
            None => StepOutcome::Invalid,
        };
    }
    if creature.gold_carried >= creature.gold_capacity {
        if has_treasury_room(ctx, creature) {
            return StepOutcome::Push(Action::child_of(forced, ActionKind::DepositGold));
        }
        drop_carried_gold(ctx, creature);
    }

    let gold_per_fullness = ctx.gameplay.economy.gold_per_fullness;
    let seat = creature.seat;
    let (finished, mined) = {
        let Some(wall) = ctx.map.get_mut(tile) else {
            return StepOutcome::Invalid;
        };
        let amount = (creature.dig_rate.round() as i32).max(1).min(wall.fullness);
        wall.fullness -= amount;
        let mined = if wall.kind == TileKind::Gold {
            (f64::from(amount) * gold_per_fullness).round() as i32
        } else {
            0
        };
        let finished = wall.fullness == 0;
        if finished {
            if wall.kind == TileKind::Gold {
                wall.kind = TileKind::Dirt;
            }
            wall.marked_by.clear();
            wall.claimed_by = None;
            wall.claim_progress = 0.0;
        }
        (finished, mined)
    };
    if mined > 0 {
        creature.gold_carried += mined;
        if let Some(owner) = ctx.seats.get_mut(seat) {
            owner.gold_mined += i64::from(mined);
        }
    }
    if finished {
        sound(ctx, "Dig", tile);
        StepOutcome::Complete
    } else {
        StepOutcome::InProgress
    }
}

fn is_ground_claim_target(ctx: &UpkeepCtx, creature: &Creature, pos: TilePos) -> bool {
    let Some(tile) = ctx.map.get(pos) else {
        return false;
    };
    tile.is_walkable()
        && tile.kind == TileKind::Dirt
        && tile.claimed_by != Some(creature.seat)
        && tile.room.is_none()
        && tile.trap.is_none()
}

fn borders_territory(ctx: &UpkeepCtx, creature: &Creature, pos: TilePos) -> bool {
    pos.neighbors().into_iter().any(|next| {
        ctx.map
            .get(next)
            .is_some_and(|tile| tile.claimed_by == Some(creature.seat) && tile.is_ground())
    })
}

/// Nearest unclaimed ground tile touching the seat's territory.
pub(super) fn find_ground_claim(ctx: &UpkeepCtx, creature: &Creature) -> Option<TilePos> {
    search(ctx.map, creature.pos, usize::MAX, |pos| {
        (is_ground_claim_target(ctx, creature, pos) && borders_territory(ctx, creature, pos))
            .then_some(pos)
    })
    .map(|(tile, _)| tile)
}

pub(super) fn search_ground_tile_to_claim(
    ctx: &mut UpkeepCtx,
    creature: &mut Creature,
    forced: bool,
) -> StepOutcome {
    match find_ground_claim(ctx, creature) {
        Some(tile) => StepOutcome::Replace(Action::child_of(
            forced,
            ActionKind::ClaimGroundTile { tile },
        )),
        None => StepOutcome::Complete,
    }
}

pub(super) fn claim_ground_tile(
    ctx: &mut UpkeepCtx,
    creature: &mut Creature,
    tile: TilePos,
    forced: bool,
) -> StepOutcome {
    if !is_ground_claim_target(ctx, creature, tile) {
        return StepOutcome::Complete;
    }
    if creature.pos != tile {
        return walk_to(ctx, creature, tile, forced);
    }
    if advance_claim(ctx, creature, tile) {
        sound(ctx, "Claim", tile);
        StepOutcome::Complete
    } else {
        StepOutcome::InProgress
    }
}

fn is_wall_claim_target(ctx: &UpkeepCtx, pos: TilePos) -> bool {
    ctx.map.get(pos).is_some_and(|tile| {
        tile.fullness > 0 && tile.kind == TileKind::Dirt && tile.claimed_by.is_none()
    })
}

/// Nearest unreinforced dirt wall next to the seat's claimed ground.
pub(super) fn find_wall_claim(ctx: &UpkeepCtx, creature: &Creature) -> Option<TilePos> {
    search(ctx.map, creature.pos, usize::MAX, |pos| {
        if !ctx
            .map
            .get(pos)
            .is_some_and(|tile| tile.is_claimed_ground_of(creature.seat))
        {
            return None;
        }
        pos.neighbors()
            .into_iter()
            .find(|next| is_wall_claim_target(ctx, *next))
    })
    .map(|(tile, _)| tile)
}

pub(super) fn search_wall_tile_to_claim(
    ctx: &mut UpkeepCtx,
    creature: &mut Creature,
    forced: bool,
) -> StepOutcome {
    match find_wall_claim(ctx, creature) {
        Some(tile) => {
            StepOutcome::Replace(Action::child_of(forced, ActionKind::ClaimWallTile { tile }))
        }
        None => StepOutcome::Complete,
    }
}

pub(super) fn claim_wall_tile(
    ctx: &mut UpkeepCtx,
    creature: &mut Creature,
    tile: TilePos,
    forced: bool,
) -> StepOutcome {
    if !is_wall_claim_target(ctx, tile) {
        return StepOutcome::Complete;
    }
    if creature.pos.manhattan(tile) != 1 {
        return match search(ctx.map, creature.pos, usize::MAX, |pos| {
            (pos.manhattan(tile) == 1).then_some(pos)
        }) {
            Some((stand, path)) => walk_along(forced, stand, path),
            None => StepOutcome::Invalid,
        };
    }
    if advance_claim(ctx, creature, tile) {
        sound(ctx, "Claim", tile);
        StepOutcome::Complete
    } else {
        StepOutcome::InProgress
    }
}

/// Add the creature's claim rate to the tile. Returns true once the tile
/// changed hands.
fn advance_claim(ctx: &mut UpkeepCtx, creature: &Creature, pos: TilePos) -> bool {
    let Some(tile) = ctx.map.get_mut(pos) else {
        return false;
    };
    tile.claim_progress += creature.claim_rate;
    if tile.claim_progress < 1.0 {
        return false;
    }
    tile.claim_progress = 0.0;
    tile.claimed_by = Some(creature.seat);
    tile.marked_by.clear();
    true
}

fn free_treasury_capacity(ctx: &UpkeepCtx, creature: &Creature) -> i64 {
    let capacity = ctx
        .rooms
        .treasury_capacity(creature.seat, &ctx.gameplay.economy);
    let stored = ctx.seats.get(creature.seat).map_or(0, |seat| seat.gold);
    capacity - stored
}

pub(super) fn has_treasury_room(ctx: &UpkeepCtx, creature: &Creature) -> bool {
    free_treasury_capacity(ctx, creature) > 0
}

/// Path to the nearest tile of the seat's treasuries.
fn nearest_treasury(ctx: &UpkeepCtx, creature: &Creature) -> Option<(TilePos, Vec<TilePos>)> {
    let tiles = ctx.rooms.tiles_of_kind(creature.seat, RoomKind::Treasury);
    if tiles.is_empty() {
        return None;
    }
    search(ctx.map, creature.pos, usize::MAX, |pos| {
        tiles.contains(&pos).then_some(pos)
    })
}

fn store_gold(ctx: &mut UpkeepCtx, creature: &Creature, amount: i32) -> i32 {
    let stored = i64::from(amount).min(free_treasury_capacity(ctx, creature).max(0));
    if let Some(seat) = ctx.seats.get_mut(creature.seat) {
        seat.gold += stored;
    }
    stored as i32
}

fn drop_carried_gold(ctx: &mut UpkeepCtx, creature: &mut Creature) {
    if creature.gold_carried <= 0 {
        return;
    }
    let pile = ctx.piles.drop_gold(creature.pos, creature.gold_carried);
    creature.gold_carried = 0;
    if let Some(pile) = ctx.piles.get(pile) {
        ctx.outbox
            .broadcast(ServerNotification::AddGoldPile { pile: pile.state() });
    }
}

pub(super) fn deposit_gold(
    ctx: &mut UpkeepCtx,
    creature: &mut Creature,
    forced: bool,
) -> StepOutcome {
    if creature.gold_carried <= 0 {
        return StepOutcome::Complete;
    }
    if !has_treasury_room(ctx, creature) {
        return StepOutcome::Invalid;
    }
    let Some((treasury, path)) = nearest_treasury(ctx, creature) else {
        return StepOutcome::Invalid;
    };
    if treasury != creature.pos {
        return walk_along(forced, treasury, path);
    }
    let stored = store_gold(ctx, creature, creature.gold_carried);
    creature.gold_carried -= stored;
    sound(ctx, "Deposit", creature.pos);
    StepOutcome::Complete
}

/// Nearest loose gold pile, only worth looking for when it can be stored.
pub(super) fn find_pile(ctx: &UpkeepCtx, creature: &Creature) -> Option<PileId> {
    if !has_treasury_room(ctx, creature) {
        return None;
    }
    search(ctx.map, creature.pos, usize::MAX, |pos| {
        ctx.piles.free_at(pos).map(|pile| pile.id)
    })
    .map(|(pile, _)| pile)
}

pub(super) fn search_entity_to_carry(
    ctx: &mut UpkeepCtx,
    creature: &mut Creature,
    forced: bool,
) -> StepOutcome {
    match find_pile(ctx, creature) {
        Some(pile) => StepOutcome::Replace(Action::child_of(forced, ActionKind::CarryEntity { pile })),
        None => StepOutcome::Complete,
    }
}

pub(super) fn carry_entity(
    ctx: &mut UpkeepCtx,
    creature: &mut Creature,
    pile_id: PileId,
    forced: bool,
) -> StepOutcome {
    let Some(pile) = ctx.piles.get(pile_id) else {
        creature.carried_pile = None;
        return StepOutcome::Invalid;
    };
    let carrying = creature.carried_pile == Some(pile_id);
    if !carrying {
        if pile.carried_by.is_some() {
            return StepOutcome::Invalid;
        }
        if pile.pos != creature.pos {
            let target = pile.pos;
            return walk_to(ctx, creature, target, forced);
        }
        if let Some(pile) = ctx.piles.get_mut(pile_id) {
            pile.carried_by = Some(creature.id);
        }
        creature.carried_pile = Some(pile_id);
        ctx.outbox.broadcast(ServerNotification::CarryEntity {
            carrier: creature.id.0,
            pile: pile_id.0,
        });
    }
    if let Some(pile) = ctx.piles.get_mut(pile_id) {
        pile.pos = creature.pos;
    }

    match nearest_treasury(ctx, creature) {
        Some((treasury, _)) if treasury == creature.pos => {
            let amount = ctx.piles.get(pile_id).map_or(0, |pile| pile.amount);
            let stored = store_gold(ctx, creature, amount);
            release_pile(ctx, creature, pile_id, amount - stored);
            sound(ctx, "Deposit", creature.pos);
            StepOutcome::Complete
        }
        Some((treasury, path)) if has_treasury_room(ctx, creature) => {
            walk_along(forced, treasury, path)
        }
        _ => {
            let amount = ctx.piles.get(pile_id).map_or(0, |pile| pile.amount);
            release_pile(ctx, creature, pile_id, amount);
            StepOutcome::Invalid
        }
    }
}

/// Put a carried pile down at the carrier's feet with `remaining` gold, or
/// remove it entirely when nothing is left.
pub(crate) fn release_pile(
    ctx: &mut UpkeepCtx,
    creature: &mut Creature,
    pile_id: PileId,
    remaining: i32,
) {
    creature.carried_pile = None;
    ctx.outbox
        .broadcast(ServerNotification::ReleaseCarriedEntity {
            carrier: creature.id.0,
            pile: pile_id.0,
        });
    if remaining > 0 {
        if let Some(pile) = ctx.piles.get_mut(pile_id) {
            pile.amount = remaining;
            pile.pos = creature.pos;
            pile.carried_by = None;
        }
    } else if ctx.piles.remove(pile_id).is_some() {
        ctx.outbox
            .broadcast(ServerNotification::RemoveGoldPile { pile: pile_id.0 });
    }
}
