use ahash::RandomState;
use serde::{Deserialize, Serialize};
use std::hash::{BuildHasher, Hasher};

use crate::types::{
    CreatureState, GoldPileState, ResearchKind, RoomState, SeatState, TileState, TrapState,
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotHeader {
    pub turn: u64,
    pub width: i32,
    pub height: i32,
    pub tile_count: u32,
    pub creature_count: u32,
    pub hash: u64,
}

impl SnapshotHeader {
    pub fn new(turn: u64, width: i32, height: i32, tile_count: usize, creature_count: usize) -> Self {
        Self {
            turn,
            width,
            height,
            tile_count: tile_count as u32,
            creature_count: creature_count as u32,
            hash: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeatResearchState {
    pub seat: i32,
    pub done: Vec<ResearchKind>,
    pub queue: Vec<ResearchKind>,
}

/// Complete authoritative world state at the end of a turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    pub header: SnapshotHeader,
    pub tiles: Vec<TileState>,
    pub creatures: Vec<CreatureState>,
    pub seats: Vec<SeatState>,
    pub research: Vec<SeatResearchState>,
    pub rooms: Vec<RoomState>,
    pub traps: Vec<TrapState>,
    pub gold_piles: Vec<GoldPileState>,
}

impl WorldSnapshot {
    pub fn finalize(mut self) -> Self {
        self.header.hash = hash_snapshot(&self);
        self
    }
}

pub fn hash_snapshot(snapshot: &WorldSnapshot) -> u64 {
    let mut clone = snapshot.clone();
    clone.header.hash = 0;
    // serializing plain data into a Vec cannot fail
    let encoded = bincode::serialize(&clone).unwrap_or_default();
    let mut hasher = RandomState::with_seeds(0, 0, 0, 0).build_hasher();
    hasher.write(&encoded);
    hasher.finish()
}

pub fn encode_snapshot(snapshot: &WorldSnapshot) -> bincode::Result<Vec<u8>> {
    bincode::serialize(snapshot)
}

pub fn decode_snapshot(bytes: &[u8]) -> bincode::Result<WorldSnapshot> {
    bincode::deserialize(bytes)
}

pub fn encode_snapshot_json(snapshot: &WorldSnapshot) -> serde_json::Result<String> {
    serde_json::to_string_pretty(snapshot)
}

pub fn decode_snapshot_json(data: &str) -> serde_json::Result<WorldSnapshot> {
    serde_json::from_str(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TileKind, TilePos};

    fn sample() -> WorldSnapshot {
        WorldSnapshot {
            header: SnapshotHeader::new(3, 2, 1, 2, 0),
            tiles: vec![
                TileState {
                    pos: TilePos::new(0, 0),
                    kind: TileKind::Dirt,
                    fullness: 0,
                    claimed_by: Some(1),
                    marked_by: vec![],
                },
                TileState {
                    pos: TilePos::new(1, 0),
                    kind: TileKind::Gold,
                    fullness: 100,
                    claimed_by: None,
                    marked_by: vec![1],
                },
            ],
            ..Default::default()
        }
        .finalize()
    }

    #[test]
    fn hash_ignores_stored_hash_and_tracks_content() {
        let snapshot = sample();
        assert_eq!(snapshot.header.hash, hash_snapshot(&snapshot));

        let mut changed = snapshot.clone();
        changed.tiles[1].fullness = 90;
        assert_ne!(hash_snapshot(&changed), snapshot.header.hash);
    }

    #[test]
    fn bincode_payload_restores_snapshot() {
        let snapshot = sample();
        let bytes = encode_snapshot(&snapshot).unwrap();
        assert_eq!(decode_snapshot(&bytes).unwrap(), snapshot);
    }
}
