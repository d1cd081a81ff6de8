use dungeon_proto::{RoomKind, ServerNotification, TilePos};

use super::movement::walk_to;
use super::{Action, ActionKind, StepOutcome};
use crate::components::{Creature, RemovalReason};
use crate::map::search;
use crate::rooms::RoomId;
use crate::upkeep::UpkeepCtx;

fn animate(ctx: &mut UpkeepCtx, creature: &Creature, animation: &str, looping: bool) {
    ctx.outbox
        .broadcast(ServerNotification::SetObjectAnimationState {
            creature: creature.id.0,
            animation: animation.to_string(),
            looping,
        });
}

/// Nearest reachable tile among `tiles`.
fn nearest_of(ctx: &UpkeepCtx, creature: &Creature, tiles: &[TilePos]) -> Option<TilePos> {
    if tiles.is_empty() {
        return None;
    }
    search(ctx.map, creature.pos, usize::MAX, |pos| {
        tiles.contains(&pos).then_some(pos)
    })
    .map(|(pos, _)| pos)
}

fn own_bed(ctx: &UpkeepCtx, creature: &Creature) -> Option<TilePos> {
    let home = creature.home?;
    ctx.rooms
        .of_kind(creature.seat, RoomKind::Dormitory)
        .any(|room| room.beds.get(&home) == Some(&creature.id))
        .then_some(home)
}

pub(super) fn find_home(ctx: &mut UpkeepCtx, creature: &mut Creature, forced: bool) -> StepOutcome {
    if let Some(bed) = own_bed(ctx, creature) {
        if creature.pos == bed {
            return StepOutcome::Replace(Action::child_of(forced, ActionKind::Sleep));
        }
        return walk_to(ctx, creature, bed, forced);
    }
    creature.home = None;

    let free_beds: Vec<(RoomId, TilePos)> = ctx
        .rooms
        .of_kind(creature.seat, RoomKind::Dormitory)
        .filter_map(|room| room.free_bed().map(|bed| (room.id, bed)))
        .collect();
    let beds: Vec<TilePos> = free_beds.iter().map(|(_, bed)| *bed).collect();
    match nearest_of(ctx, creature, &beds) {
        Some(bed) => {
            if let Some((room_id, _)) = free_beds.iter().find(|(_, tile)| *tile == bed) {
                if let Some(room) = ctx.rooms.get_mut(*room_id) {
                    room.beds.insert(bed, creature.id);
                }
            }
            creature.home = Some(bed);
            StepOutcome::InProgress
        }
        // no bed anywhere: rest on the spot
        None => StepOutcome::Replace(Action::child_of(forced, ActionKind::Sleep)),
    }
}

pub(super) fn sleep(ctx: &mut UpkeepCtx, creature: &mut Creature, active: u32) -> StepOutcome {
    if active == 0 {
        animate(ctx, creature, "Sleep", true);
    }
    let rules = ctx.rules().clone();
    let in_bed = creature.home.is_some_and(|home| home == creature.pos);
    let factor = if in_bed { 1.0 } else { 0.5 };
    creature.awakeness = (creature.awakeness + rules.sleep_recovery * factor).min(100.0);
    creature.heal(creature.heal_rate * rules.sleep_heal_factor * factor);
    if creature.awakeness >= rules.awakeness_rested && creature.hp >= creature.max_hp {
        animate(ctx, creature, "Idle", true);
        StepOutcome::Complete
    } else {
        StepOutcome::InProgress
    }
}

pub(super) fn job(
    ctx: &mut UpkeepCtx,
    creature: &mut Creature,
    room_id: RoomId,
    active: u32,
    forced: bool,
) -> StepOutcome {
    let Some(room) = ctx.rooms.get(room_id) else {
        return StepOutcome::Invalid;
    };
    if room.seat != creature.seat {
        return StepOutcome::Invalid;
    }
    let kind = room.kind;
    let tiles = room.tiles.clone();
    if !tiles.contains(&creature.pos) {
        return match nearest_of(ctx, creature, &tiles) {
            Some(tile) => walk_to(ctx, creature, tile, forced),
            None => StepOutcome::Invalid,
        };
    }

    let rules = ctx.rules().clone();
    if active >= rules.job_duration_turns
        || creature.hunger >= rules.hunger_threshold
        || creature.awakeness <= rules.awakeness_threshold
    {
        return StepOutcome::Complete;
    }
    match kind {
        RoomKind::TrainingHall => {
            creature.xp += ctx.gameplay.economy.training_xp_per_turn;
        }
        RoomKind::Library => {
            let points = ctx.gameplay.economy.research_points_per_job_turn;
            if let Some(seat) = ctx.seats.get_mut(creature.seat) {
                seat.research.points += points;
            }
        }
        _ => return StepOutcome::Invalid,
    }
    if active == 0 {
        animate(ctx, creature, "Work", true);
    }
    StepOutcome::InProgress
}

pub(super) fn eat(ctx: &mut UpkeepCtx, creature: &mut Creature, forced: bool) -> StepOutcome {
    let rules = ctx.rules().clone();
    if creature.hunger <= rules.hunger_satisfied {
        return StepOutcome::Complete;
    }
    let stocked: Vec<(RoomId, Vec<TilePos>)> = ctx
        .rooms
        .of_kind(creature.seat, RoomKind::Hatchery)
        .filter(|room| room.food > 0)
        .map(|room| (room.id, room.tiles.clone()))
        .collect();
    if let Some((room_id, _)) = stocked
        .iter()
        .find(|(_, tiles)| tiles.contains(&creature.pos))
    {
        if let Some(room) = ctx.rooms.get_mut(*room_id) {
            room.food -= 1;
        }
        creature.hunger = (creature.hunger - rules.food_value).max(0.0);
        animate(ctx, creature, "Eat", false);
        return if creature.hunger <= rules.hunger_satisfied {
            StepOutcome::Complete
        } else {
            StepOutcome::InProgress
        };
    }
    let tiles: Vec<TilePos> = stocked.into_iter().flat_map(|(_, tiles)| tiles).collect();
    match nearest_of(ctx, creature, &tiles) {
        Some(tile) => walk_to(ctx, creature, tile, forced),
        None => StepOutcome::Invalid,
    }
}

/// Collect the wage owed since the last payday at a treasury. A creature
/// that cannot be paid counts the missed payday and eventually deserts.
pub(super) fn get_fee(ctx: &mut UpkeepCtx, creature: &mut Creature, forced: bool) -> StepOutcome {
    if creature.fee_owed <= 0 {
        return StepOutcome::Complete;
    }
    let limit = ctx.rules().unpaid_paydays_before_leaving;
    let treasuries = ctx.rooms.tiles_of_kind(creature.seat, RoomKind::Treasury);
    let available = ctx.seats.get(creature.seat).map_or(0, |seat| seat.gold);
    if treasuries.is_empty() || available < creature.fee_owed {
        creature.fee_owed = 0;
        creature.unpaid_paydays += 1;
        return if creature.unpaid_paydays >= limit {
            StepOutcome::Replace(Action::child_of(forced, ActionKind::LeaveDungeon))
        } else {
            StepOutcome::Complete
        };
    }
    if !treasuries.contains(&creature.pos) {
        return match nearest_of(ctx, creature, &treasuries) {
            Some(tile) => walk_to(ctx, creature, tile, forced),
            None => StepOutcome::Invalid,
        };
    }
    if let Some(seat) = ctx.seats.get_mut(creature.seat) {
        seat.gold -= creature.fee_owed;
    }
    creature.fee_owed = 0;
    creature.unpaid_paydays = 0;
    StepOutcome::Complete
}

pub(super) fn leave_dungeon(
    ctx: &mut UpkeepCtx,
    creature: &mut Creature,
    forced: bool,
) -> StepOutcome {
    if creature.gold_carried == 0 && ctx.piles.iter().any(|pile| pile.carried_by.is_none()) {
        let reachable = search(ctx.map, creature.pos, usize::MAX, |pos| {
            ctx.piles.free_at(pos).map(|_| ())
        });
        if reachable.is_some() {
            return StepOutcome::Push(Action::child_of(forced, ActionKind::StealFreeGold));
        }
    }
    let portals = ctx.rooms.tiles_of_kind(creature.seat, RoomKind::Portal);
    match nearest_of(ctx, creature, &portals) {
        Some(portal) if portal != creature.pos => walk_to(ctx, creature, portal, forced),
        _ => {
            creature.pending_removal = Some(RemovalReason::LeftDungeon);
            StepOutcome::Complete
        }
    }
}

pub(super) fn steal_free_gold(
    ctx: &mut UpkeepCtx,
    creature: &mut Creature,
    forced: bool,
) -> StepOutcome {
    if let Some(pile) = ctx.piles.free_at(creature.pos).map(|pile| pile.id) {
        if let Some(taken) = ctx.piles.remove(pile) {
            creature.gold_carried += taken.amount;
            ctx.outbox
                .broadcast(ServerNotification::RemoveGoldPile { pile: pile.0 });
        }
        return StepOutcome::Complete;
    }
    let found = search(ctx.map, creature.pos, usize::MAX, |pos| {
        ctx.piles.free_at(pos).map(|_| pos)
    });
    match found {
        Some((tile, _)) => walk_to(ctx, creature, tile, forced),
        None => StepOutcome::Invalid,
    }
}
