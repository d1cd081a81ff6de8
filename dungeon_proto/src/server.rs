//! Notifications sent by the server to one or all clients.

use crate::notification_set;
use crate::types::{
    CreatureState, GameMode, GoldPileState, PlayerInfo, ResearchKind, RoomState, SeatAssignment,
    SeatDescriptor, SeatState, TilePos, TileState, TrapState, Vector3,
};

notification_set! {
    #[derive(Debug, Clone, PartialEq)]
    pub enum ServerNotification / ServerNotificationKind {
        LoadLevel = 0 {
            name: String,
            width: i32,
            height: i32,
            seats: Vec<SeatDescriptor>,
            tiles: Vec<TileState>,
        },
        PickNick = 1 { mode: GameMode },
        AddPlayers = 2 { players: Vec<PlayerInfo> },
        RemovePlayers = 3 { player_ids: Vec<i32> },
        SeatConfigurationRefresh = 4 { seats: Vec<SeatAssignment> },
        ClientAccepted = 5 { turns_per_second: f64, players: Vec<PlayerInfo> },
        ClientRejected = 6 { reason: String },
        StartGameMode = 7 { seat: i32, mode: GameMode },
        Chat = 8 { nick: String, message: String },
        ChatServer = 9 { message: String },
        PlayerWon = 10 { seat: i32 },
        PlayerLost = 11 { seat: i32 },
        BuildRoom = 12 { room: RoomState },
        RemoveRoomTiles = 13 { room: i32, tiles: Vec<TilePos> },
        BuildTrap = 14 { trap: TrapState },
        RemoveTrapTiles = 15 { trap: i32, tiles: Vec<TilePos> },
        /// Marks the end of everything the server emitted for `turn`.
        TurnStarted = 16 { turn: i64 },
        SetTurnsPerSecond = 17 { turns_per_second: f64 },
        AnimatedObjectAddDestination = 18 { creature: u64, destination: Vector3 },
        AnimatedObjectClearDestinations = 19 { creature: u64 },
        SetObjectAnimationState = 20 { creature: u64, animation: String, looping: bool },
        SetMoveSpeed = 21 { creature: u64, speed: f64 },
        EntityPickedUp = 22 { seat: i32, creature: u64 },
        EntityDropped = 23 { seat: i32, creature: u64, tile: TilePos },
        EntitySlapped = 24 { creature: u64 },
        PlayerFighting = 25 { seat: i32, tile: TilePos },
        PlayerNoMoreFighting = 26 { seat: i32 },
        AddCreature = 27 { creature: CreatureState },
        RemoveCreature = 28 { creature: u64 },
        CreatureRefresh = 29 { creature: CreatureState },
        RefreshPlayerSeat = 30 { seat: SeatState, goals: String },
        AddGoldPile = 31 { pile: GoldPileState },
        RemoveGoldPile = 32 { pile: u64 },
        NotifyCreatureInfo = 33 { creature: u64, info: String },
        PlaySpatialSound = 34 { sound: String, position: Vector3 },
        PlayCreatureSound = 35 { creature: u64, sound: String },
        MarkTiles = 36 { tiles: Vec<TilePos>, mark: bool },
        RefreshTiles = 37 { tiles: Vec<TileState> },
        CarryEntity = 38 { carrier: u64, pile: u64 },
        ReleaseCarriedEntity = 39 { carrier: u64, pile: u64 },
        RefreshResearch = 40 { done: Vec<ResearchKind>, queue: Vec<ResearchKind> },
        /// Complete world state (bincode `WorldSnapshot`) replacing the client mirror.
        CatchUpSnapshot = 41 { turn: i64, payload: Vec<u8> },
        Exit = 42,
    }
}

impl ServerNotification {
    /// Whether the notification describes world state. World deltas are
    /// withheld from sessions that are not in sync with the turn stream.
    pub fn is_world_delta(&self) -> bool {
        !matches!(
            self.kind(),
            ServerNotificationKind::LoadLevel
                | ServerNotificationKind::PickNick
                | ServerNotificationKind::AddPlayers
                | ServerNotificationKind::RemovePlayers
                | ServerNotificationKind::SeatConfigurationRefresh
                | ServerNotificationKind::ClientAccepted
                | ServerNotificationKind::ClientRejected
                | ServerNotificationKind::StartGameMode
                | ServerNotificationKind::Chat
                | ServerNotificationKind::ChatServer
                | ServerNotificationKind::SetTurnsPerSecond
                | ServerNotificationKind::CatchUpSnapshot
                | ServerNotificationKind::Exit
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::Notification;
    use crate::types::{RoomKind, TileKind, TrapKind};

    fn creature() -> CreatureState {
        CreatureState {
            id: 0x0000_0002_8000_0001,
            class: "Kobold".into(),
            seat: 1,
            pos: TilePos::new(4, 4),
            hp: 12.5,
            max_hp: 20.0,
            level: 1,
            gold_carried: 0,
            in_hand: false,
            action: "Idle".into(),
        }
    }

    fn tile() -> TileState {
        TileState {
            pos: TilePos::new(2, 3),
            kind: TileKind::Gold,
            fullness: 100,
            claimed_by: None,
            marked_by: vec![1, 3],
        }
    }

    fn seat() -> SeatState {
        SeatState {
            seat: 1,
            team: 1,
            faction: "Keeper".into(),
            player_id: 2,
            gold: 1 << 40,
            gold_mined: 0,
            mana: 900.0,
            mana_delta: 4.5,
            claimed_tiles: 25,
            hand: vec![3, 4],
        }
    }

    #[test]
    fn every_server_tag_round_trips() {
        let players = vec![PlayerInfo {
            player_id: 2,
            nick: "alice".into(),
            seat: 0,
        }];
        let tiles = vec![TilePos::new(1, 1)];
        let samples = vec![
            ServerNotification::LoadLevel {
                name: "default".into(),
                width: 32,
                height: 32,
                seats: vec![SeatDescriptor {
                    seat: 1,
                    team: 1,
                    faction: "Keeper".into(),
                    human_playable: true,
                }],
                tiles: vec![tile()],
            },
            ServerNotification::PickNick {
                mode: GameMode::Editor,
            },
            ServerNotification::AddPlayers {
                players: players.clone(),
            },
            ServerNotification::RemovePlayers {
                player_ids: vec![2, 3],
            },
            ServerNotification::SeatConfigurationRefresh { seats: vec![] },
            ServerNotification::ClientAccepted {
                turns_per_second: 1.5,
                players,
            },
            ServerNotification::ClientRejected {
                reason: String::new(),
            },
            ServerNotification::StartGameMode {
                seat: 1,
                mode: GameMode::Game,
            },
            ServerNotification::Chat {
                nick: "alice".into(),
                message: "gg".into(),
            },
            ServerNotification::ChatServer {
                message: "welcome".into(),
            },
            ServerNotification::PlayerWon { seat: 1 },
            ServerNotification::PlayerLost { seat: 2 },
            ServerNotification::BuildRoom {
                room: RoomState {
                    id: 4,
                    kind: RoomKind::Hatchery,
                    seat: 1,
                    tiles: tiles.clone(),
                },
            },
            ServerNotification::RemoveRoomTiles {
                room: 4,
                tiles: tiles.clone(),
            },
            ServerNotification::BuildTrap {
                trap: TrapState {
                    id: 1,
                    kind: TrapKind::Cannon,
                    seat: 1,
                    tiles: tiles.clone(),
                },
            },
            ServerNotification::RemoveTrapTiles { trap: 1, tiles },
            ServerNotification::TurnStarted {
                turn: 0x1_0000_0000,
            },
            ServerNotification::SetTurnsPerSecond {
                turns_per_second: 4.0,
            },
            ServerNotification::AnimatedObjectAddDestination {
                creature: 9,
                destination: Vector3::new(1.0, 2.0, 0.0),
            },
            ServerNotification::AnimatedObjectClearDestinations { creature: 9 },
            ServerNotification::SetObjectAnimationState {
                creature: 9,
                animation: "Walk".into(),
                looping: true,
            },
            ServerNotification::SetMoveSpeed {
                creature: 9,
                speed: 1.0,
            },
            ServerNotification::EntityPickedUp {
                seat: 1,
                creature: 9,
            },
            ServerNotification::EntityDropped {
                seat: 1,
                creature: 9,
                tile: TilePos::new(3, 3),
            },
            ServerNotification::EntitySlapped { creature: 9 },
            ServerNotification::PlayerFighting {
                seat: 1,
                tile: TilePos::new(0, 1),
            },
            ServerNotification::PlayerNoMoreFighting { seat: 1 },
            ServerNotification::AddCreature {
                creature: creature(),
            },
            ServerNotification::RemoveCreature { creature: 9 },
            ServerNotification::CreatureRefresh {
                creature: creature(),
            },
            ServerNotification::RefreshPlayerSeat {
                seat: seat(),
                goals: "uncompleted:\n".into(),
            },
            ServerNotification::AddGoldPile {
                pile: GoldPileState {
                    id: 1,
                    pos: TilePos::new(1, 2),
                    amount: 250,
                },
            },
            ServerNotification::RemoveGoldPile { pile: 1 },
            ServerNotification::NotifyCreatureInfo {
                creature: 9,
                info: "hp 10/20".into(),
            },
            ServerNotification::PlaySpatialSound {
                sound: "Dig".into(),
                position: Vector3::new(1.0, 1.0, 0.0),
            },
            ServerNotification::PlayCreatureSound {
                creature: 9,
                sound: "Attack".into(),
            },
            ServerNotification::MarkTiles {
                tiles: vec![TilePos::new(7, 7)],
                mark: false,
            },
            ServerNotification::RefreshTiles {
                tiles: vec![tile()],
            },
            ServerNotification::CarryEntity {
                carrier: 9,
                pile: 1,
            },
            ServerNotification::ReleaseCarriedEntity {
                carrier: 9,
                pile: 1,
            },
            ServerNotification::RefreshResearch {
                done: vec![ResearchKind::Room(RoomKind::Treasury)],
                queue: vec![],
            },
            ServerNotification::CatchUpSnapshot {
                turn: 12,
                payload: vec![1, 2, 3],
            },
            ServerNotification::Exit,
        ];
        let covered: std::collections::HashSet<_> = samples.iter().map(|n| n.kind()).collect();
        assert_eq!(covered.len(), ServerNotificationKind::ALL.len());
        for sample in samples {
            let decoded = ServerNotification::decode(sample.encode().as_bytes()).expect("decode");
            assert_eq!(decoded, sample);
        }
    }

    #[test]
    fn turn_started_splits_the_turn_counter() {
        let frame = ServerNotification::TurnStarted {
            turn: 0x0000_0001_0000_0002,
        }
        .encode();
        assert_eq!(
            frame.as_bytes(),
            &[0, 0, 0, 16, 0, 0, 0, 1, 0, 0, 0, 2]
        );
    }

    #[test]
    fn lobby_traffic_is_not_a_world_delta() {
        assert!(!ServerNotification::Chat {
            nick: "a".into(),
            message: "b".into()
        }
        .is_world_delta());
        assert!(ServerNotification::TurnStarted { turn: 1 }.is_world_delta());
        assert!(ServerNotification::RemoveCreature { creature: 1 }.is_world_delta());
    }
}
