use std::collections::{BTreeMap, BTreeSet};

use dungeon_proto::{
    decode_snapshot, CreatureState, GameMode, GoldPileState, PlayerInfo, ResearchKind, RoomState,
    SeatState, ServerNotification, TileKind, TilePos, TileState, TrapState, WorldSnapshot,
};
use tracing::warn;

/// Local copy of the server world, rebuilt from the notification stream.
#[derive(Debug, Default, Clone)]
pub struct ClientMirror {
    pub level_name: String,
    pub width: i32,
    pub height: i32,
    /// Last turn closed by `TurnStarted` (or the turn of the last snapshot).
    pub turn: i64,
    pub tiles: BTreeMap<TilePos, TileState>,
    pub creatures: BTreeMap<u64, CreatureState>,
    pub seats: BTreeMap<i32, SeatState>,
    pub goals: BTreeMap<i32, String>,
    pub rooms: BTreeMap<i32, RoomState>,
    pub traps: BTreeMap<i32, TrapState>,
    pub gold_piles: BTreeMap<u64, GoldPileState>,
    pub players: BTreeMap<i32, PlayerInfo>,
    pub research_done: Vec<ResearchKind>,
    pub research_queue: Vec<ResearchKind>,
    pub my_seat: Option<i32>,
    pub mode: Option<GameMode>,
    pub turns_per_second: f64,
    pub chat: Vec<String>,
    pub won: BTreeSet<i32>,
    pub lost: BTreeSet<i32>,
    pub exited: bool,
    /// Optimistic marks sent to the server and not yet confirmed.
    predicted_marks: BTreeMap<TilePos, bool>,
    desyncs: u64,
}

impl ClientMirror {
    pub fn desyncs(&self) -> u64 {
        self.desyncs
    }

    pub fn pending_predictions(&self) -> usize {
        self.predicted_marks.len()
    }

    /// Count a divergence between what this client believed and what the
    /// server says.
    pub fn record_desync(&mut self, what: &str) {
        self.desyncs += 1;
        warn!(target: "dungeon::client", what, turn = self.turn, desyncs = self.desyncs, "mirror.desync");
    }

    pub fn tile(&self, pos: TilePos) -> Option<&TileState> {
        self.tiles.get(&pos)
    }

    /// Mark (or unmark) tiles locally before the server confirms.
    pub fn predict_marks(&mut self, tiles: &[TilePos], mark: bool) {
        let Some(seat) = self.my_seat else {
            return;
        };
        for pos in tiles {
            if let Some(tile) = self.tiles.get_mut(pos) {
                set_mark(tile, seat, mark);
                self.predicted_marks.insert(*pos, mark);
            }
        }
    }

    /// Tiles next to `seat`'s claimed ground that still hold diggable rock,
    /// in map order.
    pub fn dig_candidates(&self, seat: i32, limit: usize) -> Vec<TilePos> {
        self.tiles
            .values()
            .filter(|tile| {
                tile.fullness > 0
                    && matches!(tile.kind, TileKind::Dirt | TileKind::Gold)
                    && tile.claimed_by.map_or(true, |owner| owner == seat)
                    && !tile.marked_by.contains(&seat)
                    && tile.pos.neighbors().iter().any(|n| {
                        self.tiles
                            .get(n)
                            .is_some_and(|t| t.fullness == 0 && t.claimed_by == Some(seat))
                    })
            })
            .map(|tile| tile.pos)
            .take(limit)
            .collect()
    }

    pub fn apply(&mut self, notification: &ServerNotification) {
        match notification {
            ServerNotification::LoadLevel {
                name,
                width,
                height,
                tiles,
                ..
            } => {
                *self = ClientMirror {
                    desyncs: self.desyncs,
                    ..ClientMirror::default()
                };
                self.level_name = name.clone();
                self.width = *width;
                self.height = *height;
                self.tiles = tiles.iter().map(|t| (t.pos, t.clone())).collect();
            }
            ServerNotification::PickNick { mode } => self.mode = Some(*mode),
            ServerNotification::AddPlayers { players } => {
                for player in players {
                    self.players.insert(player.player_id, player.clone());
                }
            }
            ServerNotification::RemovePlayers { player_ids } => {
                for id in player_ids {
                    self.players.remove(id);
                }
            }
            ServerNotification::ClientAccepted {
                turns_per_second,
                players,
            } => {
                self.turns_per_second = *turns_per_second;
                self.players = players.iter().map(|p| (p.player_id, p.clone())).collect();
            }
            ServerNotification::StartGameMode { seat, mode } => {
                self.my_seat = Some(*seat);
                self.mode = Some(*mode);
            }
            ServerNotification::Chat { nick, message } => {
                self.chat.push(format!("{nick}: {message}"));
            }
            ServerNotification::ChatServer { message } => self.chat.push(message.clone()),
            ServerNotification::PlayerWon { seat } => {
                self.won.insert(*seat);
            }
            ServerNotification::PlayerLost { seat } => {
                self.lost.insert(*seat);
            }
            ServerNotification::BuildRoom { room } => {
                self.rooms.insert(room.id, room.clone());
            }
            ServerNotification::RemoveRoomTiles { room, tiles } => {
                match self.rooms.get_mut(room) {
                    Some(state) => {
                        state.tiles.retain(|t| !tiles.contains(t));
                        if state.tiles.is_empty() {
                            self.rooms.remove(room);
                        }
                    }
                    None => self.record_desync("remove tiles of unknown room"),
                }
            }
            ServerNotification::BuildTrap { trap } => {
                self.traps.insert(trap.id, trap.clone());
            }
            ServerNotification::RemoveTrapTiles { trap, tiles } => {
                match self.traps.get_mut(trap) {
                    Some(state) => {
                        state.tiles.retain(|t| !tiles.contains(t));
                        if state.tiles.is_empty() {
                            self.traps.remove(trap);
                        }
                    }
                    None => self.record_desync("remove tiles of unknown trap"),
                }
            }
            ServerNotification::TurnStarted { turn } => self.close_turn(*turn),
            ServerNotification::SetTurnsPerSecond { turns_per_second } => {
                self.turns_per_second = *turns_per_second;
            }
            ServerNotification::EntityPickedUp { seat, creature } => {
                match self.creatures.get_mut(creature) {
                    Some(state) => state.in_hand = true,
                    None => self.record_desync("pick up of unknown creature"),
                }
                if let Some(state) = self.seats.get_mut(seat) {
                    if !state.hand.contains(creature) {
                        state.hand.push(*creature);
                    }
                }
            }
            ServerNotification::EntityDropped {
                seat,
                creature,
                tile,
            } => {
                match self.creatures.get_mut(creature) {
                    Some(state) => {
                        state.in_hand = false;
                        state.pos = *tile;
                    }
                    None => self.record_desync("drop of unknown creature"),
                }
                if let Some(state) = self.seats.get_mut(seat) {
                    state.hand.retain(|id| id != creature);
                }
            }
            // presentation only; a creature spawned this turn may animate
            // before its AddCreature arrives
            ServerNotification::AnimatedObjectAddDestination { .. }
            | ServerNotification::AnimatedObjectClearDestinations { .. }
            | ServerNotification::SetObjectAnimationState { .. }
            | ServerNotification::SetMoveSpeed { .. }
            | ServerNotification::EntitySlapped { .. }
            | ServerNotification::PlayCreatureSound { .. }
            | ServerNotification::PlayerFighting { .. }
            | ServerNotification::PlayerNoMoreFighting { .. }
            | ServerNotification::NotifyCreatureInfo { .. }
            | ServerNotification::PlaySpatialSound { .. }
            | ServerNotification::SeatConfigurationRefresh { .. }
            | ServerNotification::ClientRejected { .. } => {}
            ServerNotification::AddCreature { creature } => {
                self.creatures.insert(creature.id, creature.clone());
            }
            ServerNotification::RemoveCreature { creature } => {
                if self.creatures.remove(creature).is_none() {
                    self.record_desync("remove of unknown creature");
                }
            }
            ServerNotification::CreatureRefresh { creature } => {
                if self
                    .creatures
                    .insert(creature.id, creature.clone())
                    .is_none()
                {
                    self.record_desync("refresh of unknown creature");
                }
            }
            ServerNotification::RefreshPlayerSeat { seat, goals } => {
                self.goals.insert(seat.seat, goals.clone());
                self.seats.insert(seat.seat, seat.clone());
            }
            ServerNotification::AddGoldPile { pile } => {
                self.gold_piles.insert(pile.id, pile.clone());
            }
            ServerNotification::RemoveGoldPile { pile } => {
                if self.gold_piles.remove(pile).is_none() {
                    self.record_desync("remove of unknown gold pile");
                }
            }
            ServerNotification::MarkTiles { tiles, mark } => {
                let Some(seat) = self.my_seat else {
                    return;
                };
                for pos in tiles {
                    if self.predicted_marks.get(pos) == Some(mark) {
                        self.predicted_marks.remove(pos);
                    }
                    match self.tiles.get_mut(pos) {
                        Some(tile) => set_mark(tile, seat, *mark),
                        None => self.record_desync("mark outside the map"),
                    }
                }
            }
            ServerNotification::RefreshTiles { tiles } => {
                for tile in tiles {
                    if !self.tiles.contains_key(&tile.pos) {
                        self.record_desync("refresh outside the map");
                        continue;
                    }
                    self.tiles.insert(tile.pos, tile.clone());
                }
            }
            ServerNotification::CarryEntity { pile, .. }
            | ServerNotification::ReleaseCarriedEntity { pile, .. } => {
                if !self.gold_piles.contains_key(pile) {
                    self.record_desync("carry of unknown gold pile");
                }
            }
            ServerNotification::RefreshResearch { done, queue } => {
                self.research_done = done.clone();
                self.research_queue = queue.clone();
            }
            ServerNotification::CatchUpSnapshot { payload, .. } => match decode_snapshot(payload) {
                Ok(snapshot) => self.replace(snapshot),
                Err(err) => {
                    warn!(target: "dungeon::client", error = %err, "mirror.snapshot_undecodable");
                    self.record_desync("undecodable snapshot");
                }
            },
            ServerNotification::Exit => self.exited = true,
        }
    }

    /// End of a turn. Predictions the server did not confirm are dropped and
    /// the affected tiles wait for the server's view.
    fn close_turn(&mut self, turn: i64) {
        if turn != self.turn + 1 {
            self.record_desync("turn out of sequence");
        }
        self.turn = turn;
        if self.predicted_marks.is_empty() {
            return;
        }
        let unconfirmed = std::mem::take(&mut self.predicted_marks);
        if let Some(seat) = self.my_seat {
            for (pos, mark) in unconfirmed {
                if let Some(tile) = self.tiles.get_mut(&pos) {
                    set_mark(tile, seat, !mark);
                }
                self.record_desync("unconfirmed tile mark");
            }
        }
    }

    /// Replace everything the world holds with `snapshot`.
    pub fn replace(&mut self, snapshot: WorldSnapshot) {
        self.turn = snapshot.header.turn as i64;
        self.width = snapshot.header.width;
        self.height = snapshot.header.height;
        self.tiles = snapshot.tiles.into_iter().map(|t| (t.pos, t)).collect();
        self.creatures = snapshot.creatures.into_iter().map(|c| (c.id, c)).collect();
        self.seats = snapshot.seats.into_iter().map(|s| (s.seat, s)).collect();
        self.rooms = snapshot.rooms.into_iter().map(|r| (r.id, r)).collect();
        self.traps = snapshot.traps.into_iter().map(|t| (t.id, t)).collect();
        self.gold_piles = snapshot.gold_piles.into_iter().map(|p| (p.id, p)).collect();
        if let Some(mine) = self
            .my_seat
            .and_then(|seat| snapshot.research.into_iter().find(|r| r.seat == seat))
        {
            self.research_done = mine.done;
            self.research_queue = mine.queue;
        }
        self.predicted_marks.clear();
    }
}

fn set_mark(tile: &mut TileState, seat: i32, mark: bool) {
    if mark {
        if let Err(at) = tile.marked_by.binary_search(&seat) {
            tile.marked_by.insert(at, seat);
        }
    } else {
        tile.marked_by.retain(|s| *s != seat);
    }
}
