use std::collections::{BTreeSet, VecDeque};

use bevy::prelude::Resource;
use dungeon_proto::{TileKind, TilePos, TileState};

use crate::rooms::{RoomId, TrapId};
use crate::seats::SeatId;

/// Fullness of an untouched wall.
pub const FULLNESS_MAX: i32 = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct Tile {
    pub kind: TileKind,
    /// 0 is open ground, anything above is a wall that can be dug down.
    pub fullness: i32,
    pub claimed_by: Option<SeatId>,
    pub claim_progress: f64,
    pub marked_by: BTreeSet<SeatId>,
    pub room: Option<RoomId>,
    pub trap: Option<TrapId>,
}

impl Tile {
    pub fn new(kind: TileKind, fullness: i32) -> Self {
        Self {
            kind,
            fullness: fullness.clamp(0, FULLNESS_MAX),
            claimed_by: None,
            claim_progress: 0.0,
            marked_by: BTreeSet::new(),
            room: None,
            trap: None,
        }
    }

    pub fn is_ground(&self) -> bool {
        self.fullness == 0
    }

    pub fn is_walkable(&self) -> bool {
        self.is_ground() && !matches!(self.kind, TileKind::Water | TileKind::Lava)
    }

    /// Walls of dirt or gold can be dug unless another seat reinforced them.
    pub fn is_diggable_by(&self, seat: SeatId) -> bool {
        self.fullness > 0
            && matches!(self.kind, TileKind::Dirt | TileKind::Gold)
            && self.claimed_by.map_or(true, |owner| owner == seat)
    }

    pub fn is_claimed_ground_of(&self, seat: SeatId) -> bool {
        self.is_walkable() && self.claimed_by == Some(seat)
    }

    pub fn is_buildable_by(&self, seat: SeatId) -> bool {
        self.is_claimed_ground_of(seat) && self.room.is_none() && self.trap.is_none()
    }
}

/// The tile grid. Every mutation through [`TileMap::get_mut`] marks the tile
/// for the end-of-turn `RefreshTiles` broadcast.
#[derive(Resource, Debug, Clone)]
pub struct TileMap {
    width: i32,
    height: i32,
    tiles: Vec<Tile>,
    dirty: BTreeSet<TilePos>,
}

impl Default for TileMap {
    fn default() -> Self {
        Self::new(0, 0, Tile::new(TileKind::Rock, FULLNESS_MAX))
    }
}

impl TileMap {
    pub fn new(width: i32, height: i32, fill: Tile) -> Self {
        let width = width.max(0);
        let height = height.max(0);
        Self {
            width,
            height,
            tiles: vec![fill; (width * height) as usize],
            dirty: BTreeSet::new(),
        }
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn contains(&self, pos: TilePos) -> bool {
        pos.x >= 0 && pos.y >= 0 && pos.x < self.width && pos.y < self.height
    }

    fn index(&self, pos: TilePos) -> Option<usize> {
        self.contains(pos)
            .then(|| (pos.y * self.width + pos.x) as usize)
    }

    pub fn get(&self, pos: TilePos) -> Option<&Tile> {
        self.index(pos).map(|idx| &self.tiles[idx])
    }

    pub fn get_mut(&mut self, pos: TilePos) -> Option<&mut Tile> {
        let idx = self.index(pos)?;
        self.dirty.insert(pos);
        Some(&mut self.tiles[idx])
    }

    /// Row-major positions, the iteration order of every tile scan.
    pub fn positions(&self) -> impl Iterator<Item = TilePos> + '_ {
        (0..self.height).flat_map(move |y| (0..self.width).map(move |x| TilePos::new(x, y)))
    }

    pub fn iter(&self) -> impl Iterator<Item = (TilePos, &Tile)> + '_ {
        self.positions().zip(self.tiles.iter())
    }

    pub fn is_walkable(&self, pos: TilePos) -> bool {
        self.get(pos).is_some_and(Tile::is_walkable)
    }

    pub fn walkable_neighbors(&self, pos: TilePos) -> impl Iterator<Item = TilePos> + '_ {
        pos.neighbors()
            .into_iter()
            .filter(move |next| self.is_walkable(*next))
    }

    pub fn claimed_count(&self, seat: SeatId) -> i32 {
        self.tiles
            .iter()
            .filter(|tile| tile.claimed_by == Some(seat))
            .count() as i32
    }

    pub fn tile_state(&self, pos: TilePos) -> Option<TileState> {
        self.get(pos).map(|tile| TileState {
            pos,
            kind: tile.kind,
            fullness: tile.fullness,
            claimed_by: tile.claimed_by.map(|seat| seat.0),
            marked_by: tile.marked_by.iter().map(|seat| seat.0).collect(),
        })
    }

    pub fn tile_states(&self) -> Vec<TileState> {
        self.positions()
            .filter_map(|pos| self.tile_state(pos))
            .collect()
    }

    pub fn mark_dirty(&mut self, pos: TilePos) {
        if self.contains(pos) {
            self.dirty.insert(pos);
        }
    }

    pub fn take_dirty(&mut self) -> Vec<TilePos> {
        std::mem::take(&mut self.dirty).into_iter().collect()
    }

    pub fn has_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }
}

/// Black-box path search between two cells.
pub trait PathOracle: Send + Sync {
    /// Steps from `from` (excluded) to `to` (included), or `None` when
    /// unreachable. An empty path means `from == to`.
    fn find_path(&self, map: &TileMap, from: TilePos, to: TilePos) -> Option<Vec<TilePos>>;
}

/// Breadth-first search on the 4-neighbourhood, expanding neighbours in
/// their fixed order so equal-length paths always resolve the same way.
#[derive(Debug, Default, Clone, Copy)]
pub struct BfsPathOracle;

impl PathOracle for BfsPathOracle {
    fn find_path(&self, map: &TileMap, from: TilePos, to: TilePos) -> Option<Vec<TilePos>> {
        if from == to {
            return Some(Vec::new());
        }
        if !map.is_walkable(to) {
            return None;
        }
        search(map, from, usize::MAX, |pos| (pos == to).then_some(())).map(|(_, path)| path)
    }
}

#[derive(Resource)]
pub struct PathFinder(pub Box<dyn PathOracle>);

impl Default for PathFinder {
    fn default() -> Self {
        Self(Box::new(BfsPathOracle))
    }
}

impl PathFinder {
    pub fn find_path(&self, map: &TileMap, from: TilePos, to: TilePos) -> Option<Vec<TilePos>> {
        self.0.find_path(map, from, to)
    }
}

/// Breadth-first walk over walkable tiles starting at `from`, calling `visit`
/// on each reached tile (the start included) in BFS order. Returns the first
/// value `visit` produces together with the path to that tile.
pub fn search<T>(
    map: &TileMap,
    from: TilePos,
    max_steps: usize,
    mut visit: impl FnMut(TilePos) -> Option<T>,
) -> Option<(T, Vec<TilePos>)> {
    if !map.contains(from) {
        return None;
    }
    let width = map.width() as usize;
    let slot = |pos: TilePos| pos.y as usize * width + pos.x as usize;
    let mut parent: Vec<Option<TilePos>> = vec![None; map.len()];
    let mut depth: Vec<usize> = vec![usize::MAX; map.len()];
    let mut queue = VecDeque::new();
    depth[slot(from)] = 0;
    queue.push_back(from);

    while let Some(pos) = queue.pop_front() {
        if let Some(found) = visit(pos) {
            return Some((found, rebuild_path(&parent, slot, from, pos)));
        }
        let next_depth = depth[slot(pos)] + 1;
        if next_depth > max_steps {
            continue;
        }
        for next in map.walkable_neighbors(pos) {
            let idx = slot(next);
            if depth[idx] == usize::MAX {
                depth[idx] = next_depth;
                parent[idx] = Some(pos);
                queue.push_back(next);
            }
        }
    }
    None
}

/// Every walkable tile reachable from `from` within `max_steps`, in BFS order.
pub fn reachable_within(map: &TileMap, from: TilePos, max_steps: usize) -> Vec<TilePos> {
    let mut reached = Vec::new();
    let _ = search::<()>(map, from, max_steps, |pos| {
        reached.push(pos);
        None
    });
    reached
}

fn rebuild_path(
    parent: &[Option<TilePos>],
    slot: impl Fn(TilePos) -> usize,
    from: TilePos,
    to: TilePos,
) -> Vec<TilePos> {
    let mut path = Vec::new();
    let mut cursor = to;
    while cursor != from {
        path.push(cursor);
        match parent[slot(cursor)] {
            Some(previous) => cursor = previous,
            None => break,
        }
    }
    path.reverse();
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_map(width: i32, height: i32) -> TileMap {
        TileMap::new(width, height, Tile::new(TileKind::Dirt, 0))
    }

    #[test]
    fn bfs_prefers_the_first_neighbour_on_ties() {
        let map = open_map(3, 3);
        let path = BfsPathOracle
            .find_path(&map, TilePos::new(0, 0), TilePos::new(1, 1))
            .expect("reachable");
        // east is expanded before south from the origin
        assert_eq!(path, vec![TilePos::new(1, 0), TilePos::new(1, 1)]);
    }

    #[test]
    fn walls_block_paths() {
        let mut map = open_map(3, 3);
        for y in 0..3 {
            map.get_mut(TilePos::new(1, y)).unwrap().fullness = FULLNESS_MAX;
        }
        assert!(BfsPathOracle
            .find_path(&map, TilePos::new(0, 0), TilePos::new(2, 2))
            .is_none());
    }

    #[test]
    fn get_mut_marks_dirty_in_position_order() {
        let mut map = open_map(4, 4);
        map.get_mut(TilePos::new(3, 1));
        map.get_mut(TilePos::new(0, 0));
        map.get_mut(TilePos::new(3, 1));
        assert_eq!(
            map.take_dirty(),
            vec![TilePos::new(0, 0), TilePos::new(3, 1)]
        );
        assert!(!map.has_dirty());
    }

    #[test]
    fn reinforced_walls_are_not_diggable_by_others() {
        let mut tile = Tile::new(TileKind::Dirt, 60);
        tile.claimed_by = Some(SeatId(2));
        assert!(tile.is_diggable_by(SeatId(2)));
        assert!(!tile.is_diggable_by(SeatId(1)));
        assert!(!Tile::new(TileKind::Rock, 100).is_diggable_by(SeatId(1)));
    }
}
