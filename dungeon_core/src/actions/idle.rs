use dungeon_proto::RoomKind;
use rand::Rng;

use super::worker::{find_dig_target, find_ground_claim, find_pile, find_wall_claim, has_treasury_room};
use super::{Action, ActionKind, StepOutcome};
use crate::components::Creature;
use crate::map::reachable_within;
use crate::upkeep::UpkeepCtx;

/// The floor of every stack: derive the next goal from the creature's state.
/// Order: bodily needs, wages, job, then wandering.
pub(super) fn step(ctx: &mut UpkeepCtx, creature: &mut Creature) -> StepOutcome {
    if let Some(kind) = bodily_need(ctx, creature) {
        return StepOutcome::Push(Action::new(kind));
    }
    if creature.unpaid_paydays >= ctx.rules().unpaid_paydays_before_leaving {
        return StepOutcome::Push(Action::new(ActionKind::LeaveDungeon));
    }
    if creature.fee_owed > 0 {
        return StepOutcome::Push(Action::new(ActionKind::GetFee));
    }
    let job = if creature.is_worker() {
        worker_job(ctx, creature)
    } else {
        fighter_job(ctx, creature)
    };
    if let Some(kind) = job {
        return StepOutcome::Push(Action::new(kind));
    }
    wander(ctx, creature)
}

fn bodily_need(ctx: &UpkeepCtx, creature: &Creature) -> Option<ActionKind> {
    let rules = ctx.rules();
    let fed = ctx
        .rooms
        .of_kind(creature.seat, RoomKind::Hatchery)
        .any(|room| room.food > 0);
    if creature.hunger >= rules.hunger_threshold && fed {
        return Some(ActionKind::Eat);
    }
    if creature.awakeness <= rules.awakeness_threshold
        || creature.hp < creature.max_hp * rules.weak_ratio
    {
        return Some(ActionKind::FindHome);
    }
    None
}

fn worker_job(ctx: &UpkeepCtx, creature: &Creature) -> Option<ActionKind> {
    if let Some(tile) = find_dig_target(ctx, creature) {
        return Some(ActionKind::DigTile { tile });
    }
    if creature.gold_carried > 0 && has_treasury_room(ctx, creature) {
        return Some(ActionKind::DepositGold);
    }
    if let Some(pile) = find_pile(ctx, creature) {
        return Some(ActionKind::CarryEntity { pile });
    }
    if let Some(tile) = find_ground_claim(ctx, creature) {
        return Some(ActionKind::ClaimGroundTile { tile });
    }
    find_wall_claim(ctx, creature).map(|tile| ActionKind::ClaimWallTile { tile })
}

fn fighter_job(ctx: &UpkeepCtx, creature: &Creature) -> Option<ActionKind> {
    let researching = ctx
        .seats
        .get(creature.seat)
        .is_some_and(|seat| !seat.research.queue.is_empty());
    creature.jobs.iter().find_map(|kind| {
        if *kind == RoomKind::Library && !researching {
            return None;
        }
        ctx.rooms
            .of_kind(creature.seat, *kind)
            .next()
            .map(|room| ActionKind::Job { room: room.id })
    })
}

fn wander(ctx: &mut UpkeepCtx, creature: &Creature) -> StepOutcome {
    let rules = ctx.rules();
    let chance = rules.wander_chance.clamp(0.0, 1.0);
    let radius = rules.wander_radius.max(0) as usize;
    if !ctx.rng.gen_bool(chance) {
        return StepOutcome::InProgress;
    }
    let candidates: Vec<_> = reachable_within(ctx.map, creature.pos, radius)
        .into_iter()
        .filter(|pos| *pos != creature.pos)
        .collect();
    if candidates.is_empty() {
        return StepOutcome::InProgress;
    }
    let target = candidates[ctx.rng.gen_range(0..candidates.len())];
    match ctx.find_path(creature.pos, target) {
        Some(path) if !path.is_empty() => StepOutcome::Push(Action::new(ActionKind::WalkToTile {
            target,
            path,
        })),
        _ => StepOutcome::InProgress,
    }
}
