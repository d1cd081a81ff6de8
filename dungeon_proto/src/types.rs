//! Value types referenced by notifications and world snapshots.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::frame::{Frame, FrameError, WireDecode, WireEncode};
use crate::wire_enum;

/// Implement the wire codec for a plain struct by listing its fields in
/// transmission order.
macro_rules! wire_struct {
    ($name:ident { $($field:ident),* $(,)? }) => {
        impl WireEncode for $name {
            fn encode(&self, frame: &mut Frame) {
                $( frame.write(&self.$field); )*
            }
        }

        impl WireDecode for $name {
            fn decode(frame: &mut Frame) -> Result<Self, FrameError> {
                Ok(Self {
                    $( $field: frame.read()?, )*
                })
            }
        }
    };
}

/// Player id meaning "nobody plays this seat".
pub const PLAYER_ID_INACTIVE: i32 = 0;
/// Player id reserved for the server-side keeper AI.
pub const PLAYER_ID_AI: i32 = 1;
/// First id handed to a human player.
pub const FIRST_HUMAN_PLAYER_ID: i32 = 2;

/// Integer cell coordinate on the tile grid.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct TilePos {
    pub x: i32,
    pub y: i32,
}

impl TilePos {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// The four orthogonal neighbours in a fixed order (north, east, south, west).
    pub fn neighbors(self) -> [TilePos; 4] {
        [
            TilePos::new(self.x, self.y - 1),
            TilePos::new(self.x + 1, self.y),
            TilePos::new(self.x, self.y + 1),
            TilePos::new(self.x - 1, self.y),
        ]
    }

    pub fn manhattan(self, other: TilePos) -> i32 {
        (self.x - other.x).abs() + (self.y - other.y).abs()
    }

    pub fn chebyshev(self, other: TilePos) -> i32 {
        (self.x - other.x).abs().max((self.y - other.y).abs())
    }

    pub fn to_vector3(self) -> Vector3 {
        Vector3::new(self.x as f32, self.y as f32, 0.0)
    }
}

impl fmt::Display for TilePos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

wire_struct!(TilePos { x, y });

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector3 {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

wire_struct!(Vector3 { x, y, z });

wire_enum! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum TileKind {
        Dirt = 0,
        Gold = 1,
        Rock = 2,
        Water = 3,
        Lava = 4,
    }
}

wire_enum! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum RoomKind {
        DungeonTemple = 0,
        Treasury = 1,
        Dormitory = 2,
        Hatchery = 3,
        TrainingHall = 4,
        Library = 5,
        Portal = 6,
    }
}

wire_enum! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum TrapKind {
        Cannon = 0,
        Spike = 1,
        Boulder = 2,
    }
}

wire_enum! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum SpellKind {
        SummonWorker = 0,
        Heal = 1,
        CallToWar = 2,
    }
}

wire_enum! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum GameMode {
        Game = 0,
        Editor = 1,
    }
}

/// Something a seat can unlock through research.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchKind {
    Room(RoomKind),
    Trap(TrapKind),
    Spell(SpellKind),
}

impl fmt::Display for ResearchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResearchKind::Room(kind) => write!(f, "room:{}", kind.name()),
            ResearchKind::Trap(kind) => write!(f, "trap:{}", kind.name()),
            ResearchKind::Spell(kind) => write!(f, "spell:{}", kind.name()),
        }
    }
}

impl WireEncode for ResearchKind {
    fn encode(&self, frame: &mut Frame) {
        match self {
            ResearchKind::Room(kind) => frame.write(&0i32).write(kind),
            ResearchKind::Trap(kind) => frame.write(&1i32).write(kind),
            ResearchKind::Spell(kind) => frame.write(&2i32).write(kind),
        };
    }
}

impl WireDecode for ResearchKind {
    fn decode(frame: &mut Frame) -> Result<Self, FrameError> {
        let offset = frame.position();
        match frame.read::<i32>()? {
            0 => Ok(ResearchKind::Room(frame.read()?)),
            1 => Ok(ResearchKind::Trap(frame.read()?)),
            2 => Ok(ResearchKind::Spell(frame.read()?)),
            value => Err(FrameError::UnknownEnumValue {
                name: "ResearchKind",
                value,
                offset,
            }),
        }
    }
}

/// Seat description sent with the level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatDescriptor {
    pub seat: i32,
    pub team: i32,
    pub faction: String,
    pub human_playable: bool,
}

wire_struct!(SeatDescriptor {
    seat,
    team,
    faction,
    human_playable
});

/// One row of the lobby seat configuration. `None` fields are left unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatAssignment {
    pub seat: i32,
    pub faction: Option<i32>,
    pub player: Option<i32>,
    pub team: Option<i32>,
}

wire_struct!(SeatAssignment {
    seat,
    faction,
    player,
    team
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub player_id: i32,
    pub nick: String,
    /// Seat id, 0 while the player is still in the lobby.
    pub seat: i32,
}

wire_struct!(PlayerInfo {
    player_id,
    nick,
    seat
});

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileState {
    pub pos: TilePos,
    pub kind: TileKind,
    pub fullness: i32,
    pub claimed_by: Option<i32>,
    /// Seats that marked this tile for digging, ascending.
    pub marked_by: Vec<i32>,
}

wire_struct!(TileState {
    pos,
    kind,
    fullness,
    claimed_by,
    marked_by
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatureState {
    pub id: u64,
    pub class: String,
    pub seat: i32,
    pub pos: TilePos,
    pub hp: f64,
    pub max_hp: f64,
    pub level: i32,
    pub gold_carried: i32,
    pub in_hand: bool,
    /// Name of the action on top of the creature's stack.
    pub action: String,
}

wire_struct!(CreatureState {
    id,
    class,
    seat,
    pos,
    hp,
    max_hp,
    level,
    gold_carried,
    in_hand,
    action
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeatState {
    pub seat: i32,
    pub team: i32,
    pub faction: String,
    pub player_id: i32,
    pub gold: i64,
    pub gold_mined: i64,
    pub mana: f64,
    pub mana_delta: f64,
    pub claimed_tiles: i32,
    pub hand: Vec<u64>,
}

wire_struct!(SeatState {
    seat,
    team,
    faction,
    player_id,
    gold,
    gold_mined,
    mana,
    mana_delta,
    claimed_tiles,
    hand
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomState {
    pub id: i32,
    pub kind: RoomKind,
    pub seat: i32,
    pub tiles: Vec<TilePos>,
}

wire_struct!(RoomState {
    id,
    kind,
    seat,
    tiles
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrapState {
    pub id: i32,
    pub kind: TrapKind,
    pub seat: i32,
    pub tiles: Vec<TilePos>,
}

wire_struct!(TrapState {
    id,
    kind,
    seat,
    tiles
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoldPileState {
    pub id: u64,
    pub pos: TilePos,
    pub amount: i32,
}

wire_struct!(GoldPileState { id, pos, amount });

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn research_kind_carries_category_and_kind() {
        let mut frame = Frame::new();
        frame.write(&ResearchKind::Trap(TrapKind::Boulder));
        assert_eq!(frame.as_bytes(), &[0, 0, 0, 1, 0, 0, 0, 2]);
        assert_eq!(
            frame.read::<ResearchKind>().unwrap(),
            ResearchKind::Trap(TrapKind::Boulder)
        );
    }

    #[test]
    fn unknown_enum_code_names_the_enum() {
        let mut frame = Frame::new();
        frame.write(&42i32);
        assert_eq!(
            frame.read::<RoomKind>(),
            Err(FrameError::UnknownEnumValue {
                name: "RoomKind",
                value: 42,
                offset: 0
            })
        );
    }

    #[test]
    fn neighbors_are_in_fixed_order() {
        let pos = TilePos::new(3, 3);
        assert_eq!(
            pos.neighbors(),
            [
                TilePos::new(3, 2),
                TilePos::new(4, 3),
                TilePos::new(3, 4),
                TilePos::new(2, 3)
            ]
        );
    }
}
