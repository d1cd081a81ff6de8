use dungeon_proto::{ServerNotification, TilePos};

use super::{Action, ActionKind, StepOutcome};
use crate::components::Creature;
use crate::upkeep::{stage_walk, UpkeepCtx};

/// Outcome that brings `creature` to `target` before its current action
/// continues: a pushed walk, or `Invalid` when no path exists.
pub fn walk_to(
    ctx: &UpkeepCtx,
    creature: &Creature,
    target: TilePos,
    forced: bool,
) -> StepOutcome {
    match ctx.find_path(creature.pos, target) {
        Some(path) if path.is_empty() => StepOutcome::InProgress,
        Some(path) => StepOutcome::Push(Action::child_of(
            forced,
            ActionKind::WalkToTile { target, path },
        )),
        None => StepOutcome::Invalid,
    }
}

/// Walk along a precomputed path, re-checking each step against the map
/// since tiles may have changed since the path was planned.
pub(super) fn walk_step(
    ctx: &mut UpkeepCtx,
    creature: &mut Creature,
    target: TilePos,
    path: &mut Vec<TilePos>,
) -> StepOutcome {
    if path.is_empty() {
        return if creature.pos == target {
            StepOutcome::Complete
        } else {
            StepOutcome::Invalid
        };
    }
    let steps = tiles_per_turn(creature);
    for _ in 0..steps {
        let Some(next) = path.first().copied() else {
            break;
        };
        if !ctx.map.is_walkable(next) || next.manhattan(creature.pos) != 1 {
            return StepOutcome::Invalid;
        }
        path.remove(0);
        creature.pos = next;
        stage_walk(ctx.outbox, creature, next);
    }
    if path.is_empty() {
        StepOutcome::Complete
    } else {
        StepOutcome::InProgress
    }
}

fn tiles_per_turn(creature: &Creature) -> usize {
    let speed = if creature.slapped_turns > 0 {
        creature.move_speed * 2.0
    } else {
        creature.move_speed
    };
    speed.floor().max(1.0) as usize
}

/// Step away from the nearest visible enemy until none is in sight or the
/// flee budget runs out.
pub(super) fn flee(ctx: &mut UpkeepCtx, creature: &mut Creature, active: u32) -> StepOutcome {
    if active >= ctx.rules().flee_max_turns {
        return StepOutcome::Complete;
    }
    let Some(threat) = ctx
        .index
        .visible_enemies(creature)
        .first()
        .map(|enemy| enemy.pos)
    else {
        return StepOutcome::Complete;
    };

    let current = creature.pos.chebyshev(threat);
    let best = ctx
        .map
        .walkable_neighbors(creature.pos)
        .map(|next| (next.chebyshev(threat), next))
        .filter(|(distance, _)| *distance > current)
        .fold(None::<(i32, TilePos)>, |best, candidate| match best {
            Some(kept) if kept.0 >= candidate.0 => Some(kept),
            _ => Some(candidate),
        });
    if let Some((_, next)) = best {
        creature.pos = next;
        stage_walk(ctx.outbox, creature, next);
        if active == 0 {
            ctx.outbox.broadcast(ServerNotification::SetObjectAnimationState {
                creature: creature.id.0,
                animation: "Flee".into(),
                looping: true,
            });
        }
    }
    StepOutcome::InProgress
}
