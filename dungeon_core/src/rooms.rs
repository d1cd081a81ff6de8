//! Rooms, traps and loose gold: the buildings and objects seats own on the
//! tile grid.

use std::collections::BTreeMap;
use std::fmt;

use bevy::prelude::Resource;
use dungeon_proto::{GoldPileState, RoomKind, RoomState, TilePos, TrapKind, TrapState};

use crate::components::CreatureId;
use crate::gameplay_config::{EconomyConfig, TrapConfig};
use crate::map::TileMap;
use crate::seats::SeatId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomId(pub i32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrapId(pub i32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PileId(pub u64);

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for PileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Room {
    pub id: RoomId,
    pub kind: RoomKind,
    pub seat: SeatId,
    pub tiles: Vec<TilePos>,
    /// Dormitory beds, keyed by tile.
    pub beds: BTreeMap<TilePos, CreatureId>,
    /// Hatchery food available to eat.
    pub food: i32,
}

impl Room {
    pub fn state(&self) -> RoomState {
        RoomState {
            id: self.id.0,
            kind: self.kind,
            seat: self.seat.0,
            tiles: self.tiles.clone(),
        }
    }

    pub fn free_bed(&self) -> Option<TilePos> {
        self.tiles
            .iter()
            .copied()
            .find(|tile| !self.beds.contains_key(tile))
    }
}

#[derive(Resource, Debug, Clone, Default)]
pub struct RoomRegistry {
    rooms: BTreeMap<RoomId, Room>,
    next_id: i32,
}

impl RoomRegistry {
    /// Create a room over `tiles`, linking each tile to it. Callers validate
    /// the tiles first.
    pub fn build(
        &mut self,
        map: &mut TileMap,
        kind: RoomKind,
        seat: SeatId,
        tiles: Vec<TilePos>,
    ) -> RoomId {
        self.next_id += 1;
        let id = RoomId(self.next_id);
        for pos in &tiles {
            if let Some(tile) = map.get_mut(*pos) {
                tile.room = Some(id);
            }
        }
        self.rooms.insert(
            id,
            Room {
                id,
                kind,
                seat,
                tiles,
                beds: BTreeMap::new(),
                food: 0,
            },
        );
        id
    }

    /// Detach `tiles` from whatever rooms they belong to. Rooms left without
    /// tiles are deleted. Returns the removed tiles grouped by room, in room
    /// id order.
    pub fn remove_tiles(
        &mut self,
        map: &mut TileMap,
        tiles: &[TilePos],
    ) -> Vec<(RoomId, Vec<TilePos>)> {
        let mut removed: BTreeMap<RoomId, Vec<TilePos>> = BTreeMap::new();
        for pos in tiles {
            let Some(room_id) = map.get(*pos).and_then(|tile| tile.room) else {
                continue;
            };
            if let Some(tile) = map.get_mut(*pos) {
                tile.room = None;
            }
            if let Some(room) = self.rooms.get_mut(&room_id) {
                room.tiles.retain(|tile| tile != pos);
                room.beds.remove(pos);
            }
            removed.entry(room_id).or_default().push(*pos);
        }
        self.rooms.retain(|_, room| !room.tiles.is_empty());
        removed.into_iter().collect()
    }

    pub fn get(&self, id: RoomId) -> Option<&Room> {
        self.rooms.get(&id)
    }

    pub fn get_mut(&mut self, id: RoomId) -> Option<&mut Room> {
        self.rooms.get_mut(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Room> {
        self.rooms.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Room> {
        self.rooms.values_mut()
    }

    pub fn of_kind(&self, seat: SeatId, kind: RoomKind) -> impl Iterator<Item = &Room> {
        self.rooms
            .values()
            .filter(move |room| room.seat == seat && room.kind == kind)
    }

    pub fn has_kind(&self, seat: SeatId, kind: RoomKind) -> bool {
        self.of_kind(seat, kind).next().is_some()
    }

    pub fn tiles_of_kind(&self, seat: SeatId, kind: RoomKind) -> Vec<TilePos> {
        self.of_kind(seat, kind)
            .flat_map(|room| room.tiles.iter().copied())
            .collect()
    }

    pub fn treasury_capacity(&self, seat: SeatId, economy: &EconomyConfig) -> i64 {
        self.tiles_of_kind(seat, RoomKind::Treasury).len() as i64
            * economy.treasury_capacity_per_tile
    }

    pub fn release_bed(&mut self, creature: CreatureId) {
        for room in self.rooms.values_mut() {
            room.beds.retain(|_, owner| *owner != creature);
        }
    }

    pub fn states(&self) -> Vec<RoomState> {
        self.rooms.values().map(Room::state).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrapTile {
    pub pos: TilePos,
    pub reload: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Trap {
    pub id: TrapId,
    pub kind: TrapKind,
    pub seat: SeatId,
    pub tiles: Vec<TrapTile>,
}

impl Trap {
    pub fn state(&self) -> TrapState {
        TrapState {
            id: self.id.0,
            kind: self.kind,
            seat: self.seat.0,
            tiles: self.tiles.iter().map(|tile| tile.pos).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrapShot {
    pub trap: TrapId,
    pub seat: SeatId,
    pub pos: TilePos,
    pub target: CreatureId,
    pub damage: f64,
    /// Single-use traps vanish after firing.
    pub spent: bool,
}

#[derive(Resource, Debug, Clone, Default)]
pub struct TrapRegistry {
    traps: BTreeMap<TrapId, Trap>,
    next_id: i32,
}

impl TrapRegistry {
    pub fn build(
        &mut self,
        map: &mut TileMap,
        kind: TrapKind,
        seat: SeatId,
        tiles: Vec<TilePos>,
    ) -> TrapId {
        self.next_id += 1;
        let id = TrapId(self.next_id);
        for pos in &tiles {
            if let Some(tile) = map.get_mut(*pos) {
                tile.trap = Some(id);
            }
        }
        self.traps.insert(
            id,
            Trap {
                id,
                kind,
                seat,
                tiles: tiles
                    .into_iter()
                    .map(|pos| TrapTile { pos, reload: 0 })
                    .collect(),
            },
        );
        id
    }

    pub fn remove_tiles(
        &mut self,
        map: &mut TileMap,
        tiles: &[TilePos],
    ) -> Vec<(TrapId, Vec<TilePos>)> {
        let mut removed: BTreeMap<TrapId, Vec<TilePos>> = BTreeMap::new();
        for pos in tiles {
            let Some(trap_id) = map.get(*pos).and_then(|tile| tile.trap) else {
                continue;
            };
            if let Some(tile) = map.get_mut(*pos) {
                tile.trap = None;
            }
            if let Some(trap) = self.traps.get_mut(&trap_id) {
                trap.tiles.retain(|tile| tile.pos != *pos);
            }
            removed.entry(trap_id).or_default().push(*pos);
        }
        self.traps.retain(|_, trap| !trap.tiles.is_empty());
        removed.into_iter().collect()
    }

    pub fn get(&self, id: TrapId) -> Option<&Trap> {
        self.traps.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Trap> {
        self.traps.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Trap> {
        self.traps.values_mut()
    }

    pub fn states(&self) -> Vec<TrapState> {
        self.traps.values().map(Trap::state).collect()
    }

    /// Count down reload timers, then fire every loaded trap tile at the
    /// target `pick` chooses for it. Trap and tile order is fixed.
    pub fn fire(
        &mut self,
        config: impl Fn(TrapKind) -> Option<TrapConfig>,
        mut pick: impl FnMut(SeatId, TilePos, i32) -> Option<CreatureId>,
    ) -> Vec<TrapShot> {
        let mut shots = Vec::new();
        for trap in self.traps.values_mut() {
            let Some(settings) = config(trap.kind) else {
                continue;
            };
            for tile in trap.tiles.iter_mut() {
                if tile.reload > 0 {
                    tile.reload -= 1;
                    continue;
                }
                let Some(target) = pick(trap.seat, tile.pos, settings.range) else {
                    continue;
                };
                tile.reload = settings.reload_turns;
                shots.push(TrapShot {
                    trap: trap.id,
                    seat: trap.seat,
                    pos: tile.pos,
                    target,
                    damage: settings.damage,
                    spent: settings.reload_turns == 0,
                });
            }
        }
        shots
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GoldPile {
    pub id: PileId,
    pub pos: TilePos,
    pub amount: i32,
    pub carried_by: Option<CreatureId>,
}

impl GoldPile {
    pub fn state(&self) -> GoldPileState {
        GoldPileState {
            id: self.id.0,
            pos: self.pos,
            amount: self.amount,
        }
    }
}

#[derive(Resource, Debug, Clone, Default)]
pub struct GoldPiles {
    piles: BTreeMap<PileId, GoldPile>,
    next_id: u64,
}

impl GoldPiles {
    pub fn drop_gold(&mut self, pos: TilePos, amount: i32) -> PileId {
        self.next_id += 1;
        let id = PileId(self.next_id);
        self.piles.insert(
            id,
            GoldPile {
                id,
                pos,
                amount,
                carried_by: None,
            },
        );
        id
    }

    pub fn get(&self, id: PileId) -> Option<&GoldPile> {
        self.piles.get(&id)
    }

    pub fn get_mut(&mut self, id: PileId) -> Option<&mut GoldPile> {
        self.piles.get_mut(&id)
    }

    pub fn remove(&mut self, id: PileId) -> Option<GoldPile> {
        self.piles.remove(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &GoldPile> {
        self.piles.values()
    }

    pub fn free_at(&self, pos: TilePos) -> Option<&GoldPile> {
        self.piles
            .values()
            .find(|pile| pile.pos == pos && pile.carried_by.is_none())
    }

    pub fn states(&self) -> Vec<GoldPileState> {
        self.piles.values().map(GoldPile::state).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::Tile;
    use dungeon_proto::TileKind;

    fn ground() -> TileMap {
        TileMap::new(6, 6, Tile::new(TileKind::Dirt, 0))
    }

    #[test]
    fn removing_every_tile_deletes_the_room() {
        let mut map = ground();
        let mut rooms = RoomRegistry::default();
        let tiles = vec![TilePos::new(1, 1), TilePos::new(2, 1)];
        let id = rooms.build(&mut map, RoomKind::Treasury, SeatId(1), tiles.clone());
        assert_eq!(map.get(TilePos::new(2, 1)).unwrap().room, Some(id));

        let removed = rooms.remove_tiles(&mut map, &tiles[..1]);
        assert_eq!(removed, vec![(id, vec![TilePos::new(1, 1)])]);
        assert!(rooms.get(id).is_some());

        rooms.remove_tiles(&mut map, &tiles[1..]);
        assert!(rooms.get(id).is_none());
        assert_eq!(map.get(TilePos::new(2, 1)).unwrap().room, None);
    }

    #[test]
    fn single_use_traps_report_spent_shots() {
        let mut map = ground();
        let mut traps = TrapRegistry::default();
        traps.build(&mut map, TrapKind::Boulder, SeatId(1), vec![TilePos::new(3, 3)]);
        let config = |kind| {
            Some(TrapConfig {
                kind,
                cost_per_tile: 0,
                damage: 40.0,
                reload_turns: 0,
                range: 0,
            })
        };
        let shots = traps.fire(config, |_, _, _| Some(CreatureId(7)));
        assert_eq!(shots.len(), 1);
        assert!(shots[0].spent);
        assert_eq!(shots[0].target, CreatureId(7));
    }
}
