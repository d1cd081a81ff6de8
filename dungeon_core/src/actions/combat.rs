use dungeon_proto::ServerNotification;

use super::{Action, ActionKind, ActionStack, StepOutcome};
use crate::components::{Creature, CreatureId};
use crate::gameplay_config::CreatureRole;
use crate::upkeep::{stage_walk, UpkeepCtx};

/// Threat response ahead of the regular step: weak creatures flee, fighters
/// engage. Only voluntary entries are discarded.
pub(super) fn priority_pass(ctx: &mut UpkeepCtx, creature: &Creature, stack: &mut ActionStack) {
    let enemies = ctx.index.visible_enemies(creature);
    let Some(nearest) = enemies.first() else {
        return;
    };
    let top = stack.top().map(|action| (action.kind.name(), action.forced));

    let weak = creature.hp < creature.max_hp * ctx.rules().weak_ratio;
    if weak {
        if !matches!(top, Some(("Flee", _))) {
            stack.clear_voluntary();
            stack.push(Action::new(ActionKind::Flee));
        }
        return;
    }

    let engages = match creature.role {
        CreatureRole::Fighter => true,
        CreatureRole::Worker => enemies
            .iter()
            .any(|enemy| enemy.role == CreatureRole::Worker),
    };
    let busy = matches!(top, Some(("Fight", _)) | Some((_, true)));
    if engages && !busy {
        let target = if creature.is_worker() {
            enemies
                .iter()
                .find(|enemy| enemy.role == CreatureRole::Worker)
                .map(|enemy| enemy.id)
        } else {
            Some(nearest.id)
        };
        stack.clear_voluntary();
        stack.push(Action::new(ActionKind::Fight { target }));
    }
}

fn current_target(ctx: &UpkeepCtx, creature: &Creature, wanted: Option<CreatureId>) -> Option<CreatureId> {
    let enemies = ctx.index.visible_enemies(creature);
    wanted
        .filter(|id| enemies.iter().any(|enemy| enemy.id == *id))
        .or_else(|| enemies.first().map(|enemy| enemy.id))
}

pub(super) fn fight(
    ctx: &mut UpkeepCtx,
    creature: &mut Creature,
    target: &mut Option<CreatureId>,
    _forced: bool,
) -> StepOutcome {
    let Some(victim_id) = current_target(ctx, creature, *target) else {
        return StepOutcome::Complete;
    };
    *target = Some(victim_id);
    let Some(victim) = ctx.index.get(victim_id).cloned() else {
        return StepOutcome::Complete;
    };

    if let Some(seat) = ctx.seats.get_mut(creature.seat) {
        seat.note_fight(ctx.turn, creature.pos);
    }
    if let Some(seat) = ctx.seats.get_mut(victim.seat) {
        seat.note_fight(ctx.turn, victim.pos);
    }

    if creature.pos.chebyshev(victim.pos) <= 1 {
        if creature.cooldown_left == 0 {
            ctx.ledger.attack(creature, victim_id, creature.attack);
            creature.cooldown_left = creature.attack_cooldown;
            ctx.outbox.broadcast(ServerNotification::PlayCreatureSound {
                creature: creature.id.0,
                sound: "Attack".into(),
            });
        }
        return StepOutcome::InProgress;
    }

    // close in one tile per turn; the target keeps moving
    match ctx.find_path(creature.pos, victim.pos) {
        Some(path) if path.len() > 1 => {
            let next = path[0];
            creature.pos = next;
            stage_walk(ctx.outbox, creature, next);
            StepOutcome::InProgress
        }
        Some(_) => StepOutcome::InProgress,
        None => StepOutcome::Invalid,
    }
}
