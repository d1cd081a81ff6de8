//! Notifications sent by clients to the server.

use crate::notification_set;
use crate::types::{ResearchKind, RoomKind, SeatAssignment, SpellKind, TileKind, TilePos, TrapKind};

notification_set! {
    #[derive(Debug, Clone, PartialEq)]
    pub enum ClientNotification / ClientNotificationKind {
        /// First message on a connection; carries the protocol version.
        Hello = 0 { version: String },
        LevelOk = 1,
        SetNick = 2 { nick: String },
        Chat = 3 { message: String },
        ReadyForSeatConfiguration = 4,
        /// Host only: final seat configuration, starts the game.
        SeatConfigurationSet = 5 { seats: Vec<SeatAssignment> },
        /// Host only: in-progress seat configuration relayed to the lobby.
        SeatConfigurationRefresh = 6 { seats: Vec<SeatAssignment> },
        AskEntityPickUp = 7 { creature: u64 },
        AskHandDrop = 8 { tile: TilePos },
        AskMarkTiles = 9 { tiles: Vec<TilePos>, mark: bool },
        AskSlapEntity = 10 { creature: u64 },
        AskBuildRoom = 11 { room: RoomKind, tiles: Vec<TilePos> },
        AskSellRoomTiles = 12 { tiles: Vec<TilePos> },
        EditorAskDestroyRoomTiles = 13 { tiles: Vec<TilePos> },
        AskBuildTrap = 14 { trap: TrapKind, tiles: Vec<TilePos> },
        AskSellTrapTiles = 15 { tiles: Vec<TilePos> },
        EditorAskDestroyTrapTiles = 16 { tiles: Vec<TilePos> },
        /// The client finished applying everything up to and including `turn`.
        AckNewTurn = 17 { turn: i64 },
        AskCreatureInfos = 18 { creature: u64, refresh_each_turn: bool },
        AskPickupWorker = 19,
        AskPickupFighter = 20,
        AskCastSpell = 21 { spell: SpellKind, tile: TilePos },
        AskSetResearchTree = 22 { queue: Vec<ResearchKind> },
        AskSaveMap = 23,
        EditorAskChangeTiles = 24 { tiles: Vec<TilePos>, kind: TileKind, fullness: i32 },
        EditorAskBuildRoom = 25 { seat: i32, room: RoomKind, tiles: Vec<TilePos> },
        EditorAskBuildTrap = 26 { seat: i32, trap: TrapKind, tiles: Vec<TilePos> },
        EditorCreateWorker = 27 { seat: i32, tile: TilePos },
        EditorCreateFighter = 28 { seat: i32, class: String, tile: TilePos },
    }
}

impl ClientNotification {
    /// Requests only honoured while the server runs in editor mode.
    pub fn is_editor_only(&self) -> bool {
        matches!(
            self.kind(),
            ClientNotificationKind::EditorAskDestroyRoomTiles
                | ClientNotificationKind::EditorAskDestroyTrapTiles
                | ClientNotificationKind::EditorAskChangeTiles
                | ClientNotificationKind::EditorAskBuildRoom
                | ClientNotificationKind::EditorAskBuildTrap
                | ClientNotificationKind::EditorCreateWorker
                | ClientNotificationKind::EditorCreateFighter
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Frame, FrameError};
    use crate::notification::Notification;

    fn round_trip(notification: ClientNotification) {
        let frame = notification.encode();
        let decoded = ClientNotification::decode(frame.as_bytes()).expect("decode");
        assert_eq!(decoded, notification);
    }

    #[test]
    fn every_client_tag_round_trips() {
        let tiles = vec![TilePos::new(1, 2), TilePos::new(-3, 40)];
        let samples = vec![
            ClientNotification::Hello {
                version: "0.8.0".into(),
            },
            ClientNotification::LevelOk,
            ClientNotification::SetNick { nick: String::new() },
            ClientNotification::Chat {
                message: "hi".into(),
            },
            ClientNotification::ReadyForSeatConfiguration,
            ClientNotification::SeatConfigurationSet {
                seats: vec![SeatAssignment {
                    seat: 1,
                    faction: Some(0),
                    player: Some(2),
                    team: None,
                }],
            },
            ClientNotification::SeatConfigurationRefresh { seats: vec![] },
            ClientNotification::AskEntityPickUp {
                creature: 0x0000_0001_FFFF_FFFF,
            },
            ClientNotification::AskHandDrop {
                tile: TilePos::new(5, 6),
            },
            ClientNotification::AskMarkTiles {
                tiles: tiles.clone(),
                mark: true,
            },
            ClientNotification::AskSlapEntity { creature: u64::MAX },
            ClientNotification::AskBuildRoom {
                room: RoomKind::Treasury,
                tiles: tiles.clone(),
            },
            ClientNotification::AskSellRoomTiles {
                tiles: tiles.clone(),
            },
            ClientNotification::EditorAskDestroyRoomTiles {
                tiles: tiles.clone(),
            },
            ClientNotification::AskBuildTrap {
                trap: TrapKind::Spike,
                tiles: tiles.clone(),
            },
            ClientNotification::AskSellTrapTiles {
                tiles: tiles.clone(),
            },
            ClientNotification::EditorAskDestroyTrapTiles { tiles: vec![] },
            ClientNotification::AckNewTurn { turn: i64::MAX },
            ClientNotification::AskCreatureInfos {
                creature: 7,
                refresh_each_turn: true,
            },
            ClientNotification::AskPickupWorker,
            ClientNotification::AskPickupFighter,
            ClientNotification::AskCastSpell {
                spell: SpellKind::CallToWar,
                tile: TilePos::new(0, 0),
            },
            ClientNotification::AskSetResearchTree {
                queue: vec![
                    ResearchKind::Room(RoomKind::Library),
                    ResearchKind::Spell(SpellKind::Heal),
                ],
            },
            ClientNotification::AskSaveMap,
            ClientNotification::EditorAskChangeTiles {
                tiles: tiles.clone(),
                kind: TileKind::Lava,
                fullness: 0,
            },
            ClientNotification::EditorAskBuildRoom {
                seat: 2,
                room: RoomKind::Portal,
                tiles: tiles.clone(),
            },
            ClientNotification::EditorAskBuildTrap {
                seat: 2,
                trap: TrapKind::Cannon,
                tiles,
            },
            ClientNotification::EditorCreateWorker {
                seat: 1,
                tile: TilePos::new(9, 9),
            },
            ClientNotification::EditorCreateFighter {
                seat: 1,
                class: "Troll".into(),
                tile: TilePos::new(9, 9),
            },
        ];
        let covered: std::collections::HashSet<_> = samples.iter().map(|n| n.kind()).collect();
        assert_eq!(covered.len(), ClientNotificationKind::ALL.len());
        for sample in samples {
            round_trip(sample);
        }
    }

    #[test]
    fn tag_is_the_first_field() {
        let frame = ClientNotification::AckNewTurn { turn: 3 }.encode();
        assert_eq!(&frame.as_bytes()[..4], &[0, 0, 0, 17]);
        assert_eq!(&frame.as_bytes()[4..], &[0, 0, 0, 0, 0, 0, 0, 3]);
    }

    #[test]
    fn unknown_tag_reports_value_and_offset() {
        let mut frame = Frame::new();
        frame.write(&999i32);
        let err = ClientNotification::decode(frame.as_bytes()).unwrap_err();
        assert_eq!(err, FrameError::UnknownTag { tag: 999, offset: 0 });
    }

    #[test]
    fn truncated_payload_is_malformed() {
        let frame = ClientNotification::SetNick {
            nick: "keeper".into(),
        }
        .encode();
        let bytes = &frame.as_bytes()[..frame.len() - 2];
        assert!(matches!(
            ClientNotification::decode(bytes),
            Err(FrameError::Truncated { .. })
        ));
    }

    #[test]
    fn trailing_bytes_are_a_desync() {
        let mut frame = ClientNotification::LevelOk.encode();
        frame.write(&0u8);
        assert!(matches!(
            ClientNotification::decode(frame.as_bytes()),
            Err(FrameError::TrailingBytes { offset: 4, .. })
        ));
    }
}
