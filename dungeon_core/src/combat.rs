use std::collections::BTreeMap;

use bevy::{ecs::system::SystemParam, prelude::*};
use dungeon_proto::ServerNotification;

use crate::components::{Creature, CreatureId, RemovalReason};
use crate::outbox::Outbox;
use crate::resources::GameTurn;
use crate::rooms::{GoldPiles, RoomRegistry};
use crate::seats::{SeatId, SeatRegistry};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    pub attacker: Option<CreatureId>,
    pub attacker_seat: SeatId,
    pub target: CreatureId,
    pub damage: f64,
}

/// Damage recorded during upkeep. Hits are applied afterwards in the order
/// they were recorded, which is creature iteration order followed by traps.
#[derive(Resource, Debug, Clone, Default)]
pub struct CombatLedger {
    hits: Vec<Hit>,
}

impl CombatLedger {
    pub fn attack(&mut self, attacker: &Creature, target: CreatureId, damage: f64) {
        self.hits.push(Hit {
            attacker: Some(attacker.id),
            attacker_seat: attacker.seat,
            target,
            damage,
        });
    }

    pub fn trap_hit(&mut self, seat: SeatId, target: CreatureId, damage: f64) {
        self.hits.push(Hit {
            attacker: None,
            attacker_seat: seat,
            target,
            damage,
        });
    }

    pub fn drain(&mut self) -> Vec<Hit> {
        std::mem::take(&mut self.hits)
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

/// XP granted for killing a creature of `level`.
fn kill_xp(level: i32) -> f64 {
    10.0 * f64::from(level.max(1))
}

/// Apply recorded hits in order. Each hit is reduced by half the target's
/// defense but always deals at least one point.
pub fn resolve_combat(
    mut ledger: ResMut<CombatLedger>,
    mut seats: ResMut<SeatRegistry>,
    turn: Res<GameTurn>,
    mut creatures: Query<(Entity, &mut Creature)>,
) {
    let hits = ledger.drain();
    if hits.is_empty() {
        return;
    }
    let entities: BTreeMap<CreatureId, Entity> = creatures
        .iter()
        .map(|(entity, creature)| (creature.id, entity))
        .collect();

    for hit in hits {
        let Some(&target_entity) = entities.get(&hit.target) else {
            continue;
        };
        let Ok((_, mut target)) = creatures.get_mut(target_entity) else {
            continue;
        };
        if !target.is_alive() {
            continue;
        }
        let damage = (hit.damage - target.defense * 0.5).max(1.0);
        target.hp -= damage;
        let killed = target.hp <= 0.0;
        if killed {
            target.hp = 0.0;
            target.pending_removal = Some(RemovalReason::Killed);
        }
        let (level, pos, seat) = (target.level, target.pos, target.seat);

        if let Some(owner) = seats.get_mut(seat) {
            owner.note_fight(turn.0, pos);
        }
        if !killed {
            continue;
        }
        tracing::info!(
            target: "dungeon::upkeep",
            creature = %hit.target,
            seat = %seat,
            attacker_seat = %hit.attacker_seat,
            "creature.killed"
        );
        let attacker = hit.attacker.and_then(|id| entities.get(&id).copied());
        if let Some(Ok((_, mut attacker))) = attacker.map(|entity| creatures.get_mut(entity)) {
            attacker.xp += kill_xp(level);
        }
    }
}

#[derive(SystemParam)]
pub struct ReapParams<'w, 's> {
    pub commands: Commands<'w, 's>,
    pub seats: ResMut<'w, SeatRegistry>,
    pub rooms: ResMut<'w, RoomRegistry>,
    pub piles: ResMut<'w, GoldPiles>,
    pub outbox: ResMut<'w, Outbox>,
    pub creatures: Query<'w, 's, (Entity, &'static Creature)>,
}

/// Despawn creatures that died or left. Killed creatures drop what they
/// carried; deserters take their gold with them.
pub fn reap_creatures(mut params: ReapParams) {
    let mut doomed: Vec<(CreatureId, Entity)> = params
        .creatures
        .iter()
        .filter(|(_, creature)| creature.pending_removal.is_some())
        .map(|(entity, creature)| (creature.id, entity))
        .collect();
    doomed.sort_unstable_by_key(|(id, _)| *id);

    for (id, entity) in doomed {
        let Ok((_, creature)) = params.creatures.get(entity) else {
            continue;
        };
        if let Some(pile_id) = creature.carried_pile {
            if let Some(pile) = params.piles.get_mut(pile_id) {
                pile.carried_by = None;
                pile.pos = creature.pos;
            }
            params
                .outbox
                .broadcast(ServerNotification::ReleaseCarriedEntity {
                    carrier: id.0,
                    pile: pile_id.0,
                });
        }
        if creature.pending_removal == Some(RemovalReason::Killed) && creature.gold_carried > 0 {
            let pile = params.piles.drop_gold(creature.pos, creature.gold_carried);
            if let Some(pile) = params.piles.get(pile) {
                params
                    .outbox
                    .broadcast(ServerNotification::AddGoldPile { pile: pile.state() });
            }
        }
        params.rooms.release_bed(id);
        if let Some(seat) = params.seats.get_mut(creature.seat) {
            seat.hand.retain(|held| *held != id);
        }
        tracing::debug!(
            target: "dungeon::upkeep",
            creature = %id,
            reason = ?creature.pending_removal,
            "creature.removed"
        );
        params.commands.entity(entity).despawn();
    }
}
