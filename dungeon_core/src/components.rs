use std::fmt;

use bevy::prelude::*;
use dungeon_proto::{CreatureState, RoomKind, TilePos};

use crate::actions::ActionStack;
use crate::gameplay_config::{CreatureClass, CreatureRole};
use crate::rooms::PileId;
use crate::seats::SeatId;

/// Stable creature identity. Ids are handed out in increasing order and
/// never reused, so sorting by id is the world's insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CreatureId(pub u64);

impl fmt::Display for CreatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Resource, Debug, Clone, Default)]
pub struct CreatureIds {
    next: u64,
}

impl CreatureIds {
    pub fn allocate(&mut self) -> CreatureId {
        self.next += 1;
        CreatureId(self.next)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    Killed,
    LeftDungeon,
}

/// A simulated creature. Class statistics are copied at spawn so later
/// level-ups only touch this copy.
#[derive(Component, Debug, Clone, PartialEq)]
pub struct Creature {
    pub id: CreatureId,
    pub class: String,
    pub role: CreatureRole,
    pub seat: SeatId,
    pub pos: TilePos,
    pub hp: f64,
    pub max_hp: f64,
    pub attack: f64,
    pub defense: f64,
    pub attack_cooldown: u32,
    pub cooldown_left: u32,
    pub dig_rate: f64,
    pub claim_rate: f64,
    pub move_speed: f64,
    pub sight: i32,
    pub gold_capacity: i32,
    pub fee: i64,
    pub hunger_rate: f64,
    pub awakeness_rate: f64,
    pub heal_rate: f64,
    pub jobs: Vec<RoomKind>,
    pub level: i32,
    pub xp: f64,
    /// 100 is fully rested.
    pub awakeness: f64,
    /// 0 is sated.
    pub hunger: f64,
    pub gold_carried: i32,
    pub carried_pile: Option<PileId>,
    pub home: Option<TilePos>,
    pub in_hand: bool,
    pub fee_owed: i64,
    pub unpaid_paydays: u32,
    pub slapped_turns: u32,
    pub pending_removal: Option<RemovalReason>,
}

impl Creature {
    pub fn from_class(id: CreatureId, class: &CreatureClass, seat: SeatId, pos: TilePos) -> Self {
        Self {
            id,
            class: class.name.clone(),
            role: class.role,
            seat,
            pos,
            hp: class.max_hp,
            max_hp: class.max_hp,
            attack: class.attack,
            defense: class.defense,
            attack_cooldown: class.attack_cooldown,
            cooldown_left: 0,
            dig_rate: class.dig_rate,
            claim_rate: class.claim_rate,
            move_speed: class.move_speed,
            sight: class.sight,
            gold_capacity: class.gold_capacity,
            fee: class.fee,
            hunger_rate: class.hunger_rate,
            awakeness_rate: class.awakeness_rate,
            heal_rate: class.heal_rate,
            jobs: class.jobs.clone(),
            level: 1,
            xp: 0.0,
            awakeness: 100.0,
            hunger: 0.0,
            gold_carried: 0,
            carried_pile: None,
            home: None,
            in_hand: false,
            fee_owed: 0,
            unpaid_paydays: 0,
            slapped_turns: 0,
            pending_removal: None,
        }
    }

    pub fn is_worker(&self) -> bool {
        self.role == CreatureRole::Worker
    }

    pub fn is_alive(&self) -> bool {
        self.pending_removal.is_none() && self.hp > 0.0
    }

    pub fn heal(&mut self, amount: f64) {
        self.hp = (self.hp + amount).min(self.max_hp);
    }

    pub fn state(&self, stack: &ActionStack) -> CreatureState {
        CreatureState {
            id: self.id.0,
            class: self.class.clone(),
            seat: self.seat.0,
            pos: self.pos,
            hp: self.hp,
            max_hp: self.max_hp,
            level: self.level,
            gold_carried: self.gold_carried,
            in_hand: self.in_hand,
            action: stack.top_name().to_string(),
        }
    }

    pub fn info(&self, stack: &ActionStack) -> String {
        format!(
            "{} lvl {} hp {:.0}/{:.0} xp {:.0} gold {} hunger {:.0} awake {:.0} action {}",
            self.class,
            self.level,
            self.hp,
            self.max_hp,
            self.xp,
            self.gold_carried,
            self.hunger,
            self.awakeness,
            stack.top_name()
        )
    }
}

/// Components of a freshly spawned creature.
pub fn creature_bundle(
    ids: &mut CreatureIds,
    class: &CreatureClass,
    seat: SeatId,
    pos: TilePos,
) -> (Creature, ActionStack) {
    (
        Creature::from_class(ids.allocate(), class, seat, pos),
        ActionStack::new(),
    )
}

/// Entity of the creature with `id`, if it still exists.
pub fn find_creature(world: &mut World, id: CreatureId) -> Option<Entity> {
    let mut query = world.query::<(Entity, &Creature)>();
    query
        .iter(world)
        .find(|(_, creature)| creature.id == id)
        .map(|(entity, _)| entity)
}

/// Every creature entity sorted by id.
pub fn creatures_in_order(world: &mut World) -> Vec<(CreatureId, Entity)> {
    let mut query = world.query::<(Entity, &Creature)>();
    let mut order: Vec<_> = query
        .iter(world)
        .map(|(entity, creature)| (creature.id, entity))
        .collect();
    order.sort_unstable_by_key(|(id, _)| *id);
    order
}
