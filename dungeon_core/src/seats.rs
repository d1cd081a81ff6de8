use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use bevy::prelude::Resource;
use dungeon_proto::{ResearchKind, SeatDescriptor, SeatState, TilePos, PLAYER_ID_AI, PLAYER_ID_INACTIVE};
use serde::{Deserialize, Serialize};

use crate::components::CreatureId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeatId(pub i32);

impl fmt::Display for SeatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Goal {
    ClaimTiles(i32),
    MineGold(i64),
    SurviveTurns(u64),
    ProtectTemple,
}

impl fmt::Display for Goal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Goal::ClaimTiles(count) => write!(f, "Claim {count} tiles"),
            Goal::MineGold(amount) => write!(f, "Mine {amount} gold"),
            Goal::SurviveTurns(turns) => write!(f, "Survive {turns} turns"),
            Goal::ProtectTemple => write!(f, "Protect your dungeon temple"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoalStatus {
    Uncompleted,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeatGoal {
    pub goal: Goal,
    pub status: GoalStatus,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResearchState {
    pub done: BTreeSet<ResearchKind>,
    pub queue: Vec<ResearchKind>,
    pub points: f64,
    pub changed: bool,
}

impl ResearchState {
    pub fn is_done(&self, kind: ResearchKind) -> bool {
        self.done.contains(&kind)
    }
}

/// Per-seat fight bookkeeping used for the `PlayerFighting` banner.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FightState {
    pub active: bool,
    pub last_turn: Option<u64>,
    pub tile: Option<TilePos>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Seat {
    pub id: SeatId,
    pub team: i32,
    pub faction: String,
    pub human_playable: bool,
    pub gold: i64,
    pub gold_mined: i64,
    pub mana: f64,
    pub mana_delta: f64,
    pub claimed_tiles: i32,
    /// Player id occupying the seat (0 inactive, 1 AI, 2+ human).
    pub player: i32,
    /// False while the human owning the seat is disconnected.
    pub live_control: bool,
    pub hand: Vec<CreatureId>,
    pub goals: Vec<SeatGoal>,
    pub research: ResearchState,
    pub fight: FightState,
    pub won: bool,
    pub lost: bool,
}

impl Seat {
    pub fn new(id: SeatId, team: i32, faction: impl Into<String>) -> Self {
        Self {
            id,
            team,
            faction: faction.into(),
            human_playable: true,
            gold: 0,
            gold_mined: 0,
            mana: 0.0,
            mana_delta: 0.0,
            claimed_tiles: 0,
            player: PLAYER_ID_INACTIVE,
            live_control: false,
            hand: Vec::new(),
            goals: Vec::new(),
            research: ResearchState::default(),
            fight: FightState::default(),
            won: false,
            lost: false,
        }
    }

    pub fn is_ai(&self) -> bool {
        self.player == PLAYER_ID_AI
    }

    pub fn is_active(&self) -> bool {
        self.player != PLAYER_ID_INACTIVE
    }

    pub fn is_human(&self) -> bool {
        self.player > PLAYER_ID_AI
    }

    pub fn note_fight(&mut self, turn: u64, tile: TilePos) {
        self.fight.last_turn = Some(turn);
        self.fight.tile = Some(tile);
    }

    pub fn descriptor(&self) -> SeatDescriptor {
        SeatDescriptor {
            seat: self.id.0,
            team: self.team,
            faction: self.faction.clone(),
            human_playable: self.human_playable,
        }
    }

    pub fn state(&self) -> SeatState {
        SeatState {
            seat: self.id.0,
            team: self.team,
            faction: self.faction.clone(),
            player_id: self.player,
            gold: self.gold,
            gold_mined: self.gold_mined,
            mana: self.mana,
            mana_delta: self.mana_delta,
            claimed_tiles: self.claimed_tiles,
            hand: self.hand.iter().map(|id| id.0).collect(),
        }
    }

    /// Goal listing sent with `RefreshPlayerSeat`: three sections, one goal
    /// per line.
    pub fn goals_string(&self) -> String {
        let mut out = String::new();
        for (title, status) in [
            ("uncompleted", GoalStatus::Uncompleted),
            ("completed", GoalStatus::Completed),
            ("failed", GoalStatus::Failed),
        ] {
            out.push_str(title);
            out.push_str(":\n");
            for goal in self.goals.iter().filter(|goal| goal.status == status) {
                out.push_str(&goal.goal.to_string());
                out.push('\n');
            }
        }
        out
    }
}

#[derive(Resource, Debug, Clone, Default)]
pub struct SeatRegistry {
    seats: BTreeMap<SeatId, Seat>,
}

impl SeatRegistry {
    pub fn insert(&mut self, seat: Seat) {
        self.seats.insert(seat.id, seat);
    }

    pub fn get(&self, id: SeatId) -> Option<&Seat> {
        self.seats.get(&id)
    }

    pub fn get_mut(&mut self, id: SeatId) -> Option<&mut Seat> {
        self.seats.get_mut(&id)
    }

    pub fn contains(&self, id: SeatId) -> bool {
        self.seats.contains_key(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Seat> {
        self.seats.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Seat> {
        self.seats.values_mut()
    }

    pub fn ids(&self) -> Vec<SeatId> {
        self.seats.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.seats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seats.is_empty()
    }

    pub fn team_of(&self, id: SeatId) -> Option<i32> {
        self.get(id).map(|seat| seat.team)
    }

    pub fn by_player(&self, player: i32) -> Option<&Seat> {
        self.seats.values().find(|seat| seat.player == player)
    }

    /// Seats on different teams are enemies; unknown seats are nobody's enemy.
    pub fn are_enemies(&self, a: SeatId, b: SeatId) -> bool {
        match (self.team_of(a), self.team_of(b)) {
            (Some(left), Some(right)) => left != right,
            _ => false,
        }
    }

    pub fn descriptors(&self) -> Vec<SeatDescriptor> {
        self.seats.values().map(Seat::descriptor).collect()
    }
}
