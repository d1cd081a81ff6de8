//! Per-creature action stacks and the scheduler that steps them once per turn.
//!
//! The top of a creature's [`ActionStack`] is its active behaviour. Each turn
//! the scheduler evaluates the top action and applies the returned
//! [`StepOutcome`]: the action stays (`InProgress`), is popped (`Complete`,
//! `Invalid`) or hands over to a child (`Push`, `Replace`). `Idle` is the
//! floor of every stack and re-derives the next goal when it surfaces.

mod combat;
mod idle;
mod movement;
mod needs;
mod worker;

use bevy::prelude::Component;
use dungeon_proto::TilePos;

use crate::components::{Creature, CreatureId};
use crate::resources::SimulationFault;
use crate::rooms::{PileId, RoomId};
use crate::upkeep::UpkeepCtx;

pub use movement::walk_to;

#[derive(Debug, Clone, PartialEq)]
pub enum ActionKind {
    Idle,
    WalkToTile { target: TilePos, path: Vec<TilePos> },
    SearchTileToDig,
    DigTile { tile: TilePos },
    SearchGroundTileToClaim,
    ClaimGroundTile { tile: TilePos },
    SearchWallTileToClaim,
    ClaimWallTile { tile: TilePos },
    DepositGold,
    SearchEntityToCarry,
    CarryEntity { pile: PileId },
    Fight { target: Option<CreatureId> },
    Flee,
    FindHome,
    Sleep,
    Job { room: RoomId },
    Eat,
    GetFee,
    LeaveDungeon,
    StealFreeGold,
}

impl ActionKind {
    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::Idle => "Idle",
            ActionKind::WalkToTile { .. } => "WalkToTile",
            ActionKind::SearchTileToDig => "SearchTileToDig",
            ActionKind::DigTile { .. } => "DigTile",
            ActionKind::SearchGroundTileToClaim => "SearchGroundTileToClaim",
            ActionKind::ClaimGroundTile { .. } => "ClaimGroundTile",
            ActionKind::SearchWallTileToClaim => "SearchWallTileToClaim",
            ActionKind::ClaimWallTile { .. } => "ClaimWallTile",
            ActionKind::DepositGold => "DepositGold",
            ActionKind::SearchEntityToCarry => "SearchEntityToCarry",
            ActionKind::CarryEntity { .. } => "CarryEntity",
            ActionKind::Fight { .. } => "Fight",
            ActionKind::Flee => "Flee",
            ActionKind::FindHome => "FindHome",
            ActionKind::Sleep => "Sleep",
            ActionKind::Job { .. } => "Job",
            ActionKind::Eat => "Eat",
            ActionKind::GetFee => "GetFee",
            ActionKind::LeaveDungeon => "LeaveDungeon",
            ActionKind::StealFreeGold => "StealFreeGold",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub kind: ActionKind,
    /// Queued by a player command or the AI rather than chosen by the
    /// creature itself.
    pub forced: bool,
    /// Turns spent on the stack.
    pub nb_turns: u32,
    /// Turns spent as the top entry.
    pub nb_turns_active: u32,
}

impl Action {
    pub fn new(kind: ActionKind) -> Self {
        Self {
            kind,
            forced: false,
            nb_turns: 0,
            nb_turns_active: 0,
        }
    }

    pub fn forced(kind: ActionKind) -> Self {
        Self {
            forced: true,
            ..Self::new(kind)
        }
    }

    /// Child of an action inherits its forced flag.
    pub(crate) fn child_of(parent_forced: bool, kind: ActionKind) -> Self {
        Self {
            forced: parent_forced,
            ..Self::new(kind)
        }
    }
}

#[derive(Component, Debug, Clone, PartialEq)]
pub struct ActionStack {
    actions: Vec<Action>,
}

impl Default for ActionStack {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionStack {
    pub fn new() -> Self {
        Self {
            actions: vec![Action::new(ActionKind::Idle)],
        }
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn top(&self) -> Option<&Action> {
        self.actions.last()
    }

    pub fn top_mut(&mut self) -> Option<&mut Action> {
        self.actions.last_mut()
    }

    pub fn top_name(&self) -> &'static str {
        self.top().map_or("Idle", |action| action.kind.name())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Action> {
        self.actions.iter()
    }

    pub fn push(&mut self, action: Action) {
        self.actions.push(action);
    }

    /// Remove the top action. The idle floor is restored when the stack
    /// would otherwise be left empty.
    pub fn pop(&mut self) -> Option<Action> {
        let popped = self.actions.pop();
        self.ensure_floor();
        popped
    }

    pub fn replace_top(&mut self, action: Action) {
        self.pop();
        self.push(action);
    }

    /// Explicit cancellation: drops every action, forced ones included.
    pub fn clear(&mut self) {
        self.actions.clear();
        self.ensure_floor();
    }

    /// Drop self-chosen actions above the floor, keeping forced ones in order.
    pub fn clear_voluntary(&mut self) {
        let mut kept: Vec<Action> = self
            .actions
            .drain(..)
            .filter(|action| action.forced)
            .collect();
        self.actions.push(Action::new(ActionKind::Idle));
        self.actions.append(&mut kept);
    }

    pub fn begin_turn(&mut self) {
        for action in &mut self.actions {
            action.nb_turns = action.nb_turns.saturating_add(1);
        }
    }

    fn ensure_floor(&mut self) {
        if self.actions.is_empty() {
            self.actions.push(Action::new(ActionKind::Idle));
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// Keep the action on top and stop for this turn.
    InProgress,
    Complete,
    /// The target vanished or the path is blocked.
    Invalid,
    /// Run a child on top of this action, starting this turn.
    Push(Action),
    /// Pop this action and run the child in its place.
    Replace(Action),
}

/// Step `creature` for one turn: run the priority pass, then evaluate the top
/// action until one reports `InProgress` or the loop budget runs out.
pub fn run_creature_turn(
    ctx: &mut UpkeepCtx,
    creature: &mut Creature,
    stack: &mut ActionStack,
) -> Result<u32, SimulationFault> {
    if stack.is_empty() {
        return Err(SimulationFault::EmptyActionStack {
            creature: creature.id,
        });
    }
    stack.begin_turn();
    combat::priority_pass(ctx, creature, stack);
    settle_carried_pile(ctx, creature, stack);

    let mut evaluations = 0;
    while evaluations < ctx.max_action_loops {
        evaluations += 1;
        let outcome = {
            let action = stack.top_mut().ok_or(SimulationFault::EmptyActionStack {
                creature: creature.id,
            })?;
            step(ctx, creature, action)
        };
        match outcome {
            StepOutcome::InProgress => {
                if let Some(action) = stack.top_mut() {
                    action.nb_turns_active += 1;
                }
                break;
            }
            StepOutcome::Complete | StepOutcome::Invalid => {
                stack.pop();
            }
            StepOutcome::Push(child) => stack.push(child),
            StepOutcome::Replace(child) => stack.replace_top(child),
        }
        if creature.pending_removal.is_some() {
            break;
        }
    }

    if stack.is_empty() {
        return Err(SimulationFault::EmptyActionStack {
            creature: creature.id,
        });
    }
    settle_carried_pile(ctx, creature, stack);
    Ok(evaluations)
}

/// A held pile must belong to a `CarryEntity` still on the stack. When that
/// action was discarded (threat response, spell, cancelled job) the pile is
/// put down where the creature stands.
fn settle_carried_pile(ctx: &mut UpkeepCtx, creature: &mut Creature, stack: &ActionStack) {
    let Some(pile) = creature.carried_pile else {
        return;
    };
    let still_carried = stack
        .iter()
        .any(|action| action.kind == ActionKind::CarryEntity { pile });
    if still_carried {
        return;
    }
    let amount = ctx.piles.get(pile).map_or(0, |held| held.amount);
    worker::release_pile(ctx, creature, pile, amount);
}

fn step(ctx: &mut UpkeepCtx, creature: &mut Creature, action: &mut Action) -> StepOutcome {
    let forced = action.forced;
    let active = action.nb_turns_active;
    match &mut action.kind {
        ActionKind::Idle => idle::step(ctx, creature),
        ActionKind::WalkToTile { target, path } => movement::walk_step(ctx, creature, *target, path),
        ActionKind::SearchTileToDig => worker::search_tile_to_dig(ctx, creature, forced),
        ActionKind::DigTile { tile } => worker::dig_tile(ctx, creature, *tile, forced),
        ActionKind::SearchGroundTileToClaim => {
            worker::search_ground_tile_to_claim(ctx, creature, forced)
        }
        ActionKind::ClaimGroundTile { tile } => {
            worker::claim_ground_tile(ctx, creature, *tile, forced)
        }
        ActionKind::SearchWallTileToClaim => worker::search_wall_tile_to_claim(ctx, creature, forced),
        ActionKind::ClaimWallTile { tile } => worker::claim_wall_tile(ctx, creature, *tile, forced),
        ActionKind::DepositGold => worker::deposit_gold(ctx, creature, forced),
        ActionKind::SearchEntityToCarry => worker::search_entity_to_carry(ctx, creature, forced),
        ActionKind::CarryEntity { pile } => worker::carry_entity(ctx, creature, *pile, forced),
        ActionKind::Fight { target } => combat::fight(ctx, creature, target, forced),
        ActionKind::Flee => movement::flee(ctx, creature, active),
        ActionKind::FindHome => needs::find_home(ctx, creature, forced),
        ActionKind::Sleep => needs::sleep(ctx, creature, active),
        ActionKind::Job { room } => needs::job(ctx, creature, *room, active, forced),
        ActionKind::Eat => needs::eat(ctx, creature, forced),
        ActionKind::GetFee => needs::get_fee(ctx, creature, forced),
        ActionKind::LeaveDungeon => needs::leave_dungeon(ctx, creature, forced),
        ActionKind::StealFreeGold => needs::steal_free_gold(ctx, creature, forced),
    }
}
