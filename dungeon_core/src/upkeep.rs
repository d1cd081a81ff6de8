use std::collections::BTreeMap;

use bevy::{ecs::system::SystemParam, prelude::*};
use dungeon_proto::{ServerNotification, TilePos};
use rand_chacha::ChaCha8Rng;

use crate::actions::{run_creature_turn, ActionStack};
use crate::combat::CombatLedger;
use crate::components::{Creature, CreatureId};
use crate::gameplay_config::{CreatureRole, CreatureRules, GameplayConfig, GameplayConfigHandle};
use crate::map::{PathFinder, PathOracle, TileMap};
use crate::outbox::Outbox;
use crate::resources::{GameRng, GameTurn, ServerConfig, SimulationFaults};
use crate::rooms::{GoldPiles, RoomRegistry};
use crate::seats::{SeatId, SeatRegistry};

/// What other creatures can see of a creature during upkeep.
#[derive(Debug, Clone, PartialEq)]
pub struct CreatureSummary {
    pub id: CreatureId,
    pub seat: SeatId,
    pub team: i32,
    pub pos: TilePos,
    pub hp: f64,
    pub max_hp: f64,
    pub role: CreatureRole,
    pub level: i32,
    pub in_hand: bool,
    pub alive: bool,
}

impl CreatureSummary {
    fn of(creature: &Creature, team: i32) -> Self {
        Self {
            id: creature.id,
            seat: creature.seat,
            team,
            pos: creature.pos,
            hp: creature.hp,
            max_hp: creature.max_hp,
            role: creature.role,
            level: creature.level,
            in_hand: creature.in_hand,
            alive: creature.is_alive(),
        }
    }

    pub fn is_targetable(&self) -> bool {
        self.alive && !self.in_hand
    }
}

/// Read-only view of every creature for the current turn. Rebuilt before
/// creature upkeep and refreshed after each creature is stepped, so a step
/// sees the creatures before it in their post-step state.
#[derive(Resource, Debug, Clone, Default)]
pub struct CreatureIndex {
    entries: BTreeMap<CreatureId, CreatureSummary>,
}

impl CreatureIndex {
    pub fn rebuild<'a>(
        &mut self,
        creatures: impl Iterator<Item = &'a Creature>,
        seats: &SeatRegistry,
    ) {
        self.entries.clear();
        for creature in creatures {
            self.update(creature, seats);
        }
    }

    pub fn update(&mut self, creature: &Creature, seats: &SeatRegistry) {
        let team = seats.team_of(creature.seat).unwrap_or_default();
        self.entries
            .insert(creature.id, CreatureSummary::of(creature, team));
    }

    pub fn get(&self, id: CreatureId) -> Option<&CreatureSummary> {
        self.entries.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CreatureSummary> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Targetable creatures of other teams within `range` of `pos`, nearest
    /// first, ties broken by id.
    pub fn enemies_near(&self, team: i32, pos: TilePos, range: i32) -> Vec<&CreatureSummary> {
        let mut found: Vec<_> = self
            .entries
            .values()
            .filter(|other| other.team != team && other.is_targetable())
            .filter(|other| other.pos.chebyshev(pos) <= range)
            .collect();
        found.sort_by_key(|other| (other.pos.chebyshev(pos), other.id));
        found
    }

    pub fn visible_enemies(&self, creature: &Creature) -> Vec<&CreatureSummary> {
        let team = self
            .get(creature.id)
            .map(|summary| summary.team)
            .unwrap_or_default();
        self.enemies_near(team, creature.pos, creature.sight)
    }

    pub fn seat_count(&self, seat: SeatId, role: Option<CreatureRole>) -> usize {
        self.entries
            .values()
            .filter(|entry| entry.seat == seat && entry.alive)
            .filter(|entry| role.map_or(true, |role| entry.role == role))
            .count()
    }
}

/// Everything an action step may read or mutate besides its own creature.
pub struct UpkeepCtx<'a> {
    pub turn: u64,
    pub max_action_loops: u32,
    pub gameplay: &'a GameplayConfig,
    pub map: &'a mut TileMap,
    pub seats: &'a mut SeatRegistry,
    pub rooms: &'a mut RoomRegistry,
    pub piles: &'a mut GoldPiles,
    pub ledger: &'a mut CombatLedger,
    pub rng: &'a mut ChaCha8Rng,
    pub outbox: &'a mut Outbox,
    pub index: &'a CreatureIndex,
    pub paths: &'a dyn PathOracle,
}

impl UpkeepCtx<'_> {
    pub fn rules(&self) -> &CreatureRules {
        &self.gameplay.creature_rules
    }

    pub fn find_path(&self, from: TilePos, to: TilePos) -> Option<Vec<TilePos>> {
        self.paths.find_path(self.map, from, to)
    }
}

#[derive(SystemParam)]
pub struct UpkeepParams<'w, 's> {
    pub config: Res<'w, ServerConfig>,
    pub gameplay: Res<'w, GameplayConfigHandle>,
    pub turn: Res<'w, GameTurn>,
    pub map: ResMut<'w, TileMap>,
    pub seats: ResMut<'w, SeatRegistry>,
    pub rooms: ResMut<'w, RoomRegistry>,
    pub piles: ResMut<'w, GoldPiles>,
    pub ledger: ResMut<'w, CombatLedger>,
    pub rng: ResMut<'w, GameRng>,
    pub outbox: ResMut<'w, Outbox>,
    pub index: ResMut<'w, CreatureIndex>,
    pub paths: Res<'w, PathFinder>,
    pub faults: ResMut<'w, SimulationFaults>,
    pub creatures: Query<'w, 's, (Entity, &'static mut Creature, &'static mut ActionStack)>,
}

/// Step every creature once, in id order.
pub fn creature_upkeep(mut params: UpkeepParams) {
    let gameplay = params.gameplay.get();
    let turn = params.turn.0;
    let max_action_loops = params.config.max_action_loops;
    let UpkeepParams {
        map,
        seats,
        rooms,
        piles,
        ledger,
        rng,
        outbox,
        index,
        paths,
        faults,
        creatures,
        ..
    } = &mut params;

    index.rebuild(creatures.iter().map(|(_, creature, _)| creature), seats);

    let mut order: Vec<(CreatureId, Entity)> = creatures
        .iter()
        .map(|(entity, creature, _)| (creature.id, entity))
        .collect();
    order.sort_unstable_by_key(|(id, _)| *id);

    for (_, entity) in order {
        let Ok((_, mut creature, mut stack)) = creatures.get_mut(entity) else {
            continue;
        };
        if creature.in_hand || !creature.is_alive() {
            continue;
        }
        body_upkeep(&mut creature, &gameplay.creature_rules);
        let result = {
            let mut ctx = UpkeepCtx {
                turn,
                max_action_loops,
                gameplay: &gameplay,
                map: &mut **map,
                seats: &mut **seats,
                rooms: &mut **rooms,
                piles: &mut **piles,
                ledger: &mut **ledger,
                rng: &mut rng.0,
                outbox: &mut **outbox,
                index: &**index,
                paths: &*paths.0,
            };
            run_creature_turn(&mut ctx, &mut creature, &mut stack)
        };
        if let Err(fault) = result {
            faults.record(fault);
        }
        index.update(&creature, seats);
    }
}

/// Per-turn bodily drift: hunger, fatigue, cooldowns and level-ups.
pub fn body_upkeep(creature: &mut Creature, rules: &CreatureRules) {
    creature.hunger = (creature.hunger + creature.hunger_rate).min(100.0);
    creature.awakeness = (creature.awakeness - creature.awakeness_rate).max(0.0);
    creature.cooldown_left = creature.cooldown_left.saturating_sub(1);
    creature.slapped_turns = creature.slapped_turns.saturating_sub(1);

    while creature.level < rules.max_level
        && creature.xp >= rules.xp_per_level * f64::from(creature.level)
    {
        creature.xp -= rules.xp_per_level * f64::from(creature.level);
        creature.level += 1;
        creature.max_hp += rules.hp_per_level;
        creature.hp += rules.hp_per_level;
        creature.attack += rules.attack_per_level;
    }
}

pub(crate) fn stage_walk(outbox: &mut Outbox, creature: &Creature, next: TilePos) {
    outbox.broadcast(ServerNotification::AnimatedObjectAddDestination {
        creature: creature.id.0,
        destination: next.to_vector3(),
    });
}
