use dungeon_proto::{ClientNotification, ServerNotification, PROTOCOL_VERSION};
use serde::Serialize;
use tracing::{debug, info};

use crate::mirror::ClientMirror;

#[derive(Debug, Clone)]
pub struct BotOptions {
    pub nick: String,
    pub version: String,
    /// Mark tiles for digging every this many turns; `None` keeps the bot
    /// passive.
    pub auto_dig_every: Option<i64>,
    pub dig_batch: usize,
    /// Stop after acknowledging this turn.
    pub max_turns: Option<i64>,
}

impl BotOptions {
    pub fn new(nick: impl Into<String>) -> Self {
        Self {
            nick: nick.into(),
            version: PROTOCOL_VERSION.to_string(),
            auto_dig_every: None,
            dig_batch: 6,
            max_turns: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum BotState {
    Connecting,
    Lobby,
    Playing,
    Finished(String),
}

/// Headless player: walks the handshake, acknowledges every turn and
/// optionally digs.
#[derive(Debug)]
pub struct BotSession {
    options: BotOptions,
    state: BotState,
    mirror: ClientMirror,
    acked: Vec<i64>,
}

impl BotSession {
    pub fn new(options: BotOptions) -> Self {
        Self {
            options,
            state: BotState::Connecting,
            mirror: ClientMirror::default(),
            acked: Vec::new(),
        }
    }

    pub fn state(&self) -> &BotState {
        &self.state
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, BotState::Finished(_))
    }

    pub fn mirror(&self) -> &ClientMirror {
        &self.mirror
    }

    pub fn mirror_mut(&mut self) -> &mut ClientMirror {
        &mut self.mirror
    }

    pub fn acked_turns(&self) -> &[i64] {
        &self.acked
    }

    pub fn finish(&mut self, reason: impl Into<String>) {
        if !self.is_finished() {
            self.state = BotState::Finished(reason.into());
        }
    }

    /// First message on a fresh connection.
    pub fn hello(&self) -> ClientNotification {
        ClientNotification::Hello {
            version: self.options.version.clone(),
        }
    }

    /// Apply `notification` to the mirror and return the replies to send.
    pub fn on_notification(&mut self, notification: &ServerNotification) -> Vec<ClientNotification> {
        self.mirror.apply(notification);
        if self.is_finished() {
            return Vec::new();
        }
        match notification {
            ServerNotification::LoadLevel { name, .. } => {
                debug!(target: "dungeon::client", level = %name, "bot.level_loaded");
                vec![ClientNotification::LevelOk]
            }
            ServerNotification::PickNick { .. } => vec![
                ClientNotification::SetNick {
                    nick: self.options.nick.clone(),
                },
                ClientNotification::ReadyForSeatConfiguration,
            ],
            ServerNotification::AddPlayers { .. } if self.state == BotState::Connecting => {
                self.state = BotState::Lobby;
                Vec::new()
            }
            ServerNotification::StartGameMode { seat, .. } => {
                info!(target: "dungeon::client", nick = %self.options.nick, seat, "bot.seated");
                self.state = BotState::Playing;
                Vec::new()
            }
            ServerNotification::ClientRejected { reason } => {
                self.finish(format!("rejected: {reason}"));
                Vec::new()
            }
            ServerNotification::Exit => {
                self.finish("server exit");
                Vec::new()
            }
            ServerNotification::TurnStarted { turn } => self.on_turn(*turn),
            _ => Vec::new(),
        }
    }

    fn on_turn(&mut self, turn: i64) -> Vec<ClientNotification> {
        // requests go out ahead of the ack so they land in the next turn
        let mut replies = Vec::new();
        if let (Some(every), Some(seat)) = (self.options.auto_dig_every, self.mirror.my_seat) {
            if every > 0 && turn % every == 0 {
                let tiles = self.mirror.dig_candidates(seat, self.options.dig_batch);
                if !tiles.is_empty() {
                    self.mirror.predict_marks(&tiles, true);
                    debug!(target: "dungeon::client", turn, tiles = tiles.len(), "bot.dig_ordered");
                    replies.push(ClientNotification::AskMarkTiles { tiles, mark: true });
                }
            }
        }
        replies.push(ClientNotification::AckNewTurn { turn });
        self.acked.push(turn);
        if self.options.max_turns.is_some_and(|max| turn >= max) {
            self.finish(format!("reached turn {turn}"));
        }
        replies
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dungeon_proto::{GameMode, TileKind, TilePos, TileState};

    fn level() -> ServerNotification {
        let tiles = (0..3)
            .map(|x| TileState {
                pos: TilePos::new(x, 0),
                kind: TileKind::Dirt,
                fullness: if x == 0 { 0 } else { 100 },
                claimed_by: (x == 0).then_some(1),
                marked_by: vec![],
            })
            .collect();
        ServerNotification::LoadLevel {
            name: "strip".into(),
            width: 3,
            height: 1,
            seats: vec![],
            tiles,
        }
    }

    #[test]
    fn walks_the_handshake() {
        let mut bot = BotSession::new(BotOptions::new("bot"));
        assert_eq!(
            bot.on_notification(&level()),
            vec![ClientNotification::LevelOk]
        );
        assert_eq!(
            bot.on_notification(&ServerNotification::PickNick {
                mode: GameMode::Game
            }),
            vec![
                ClientNotification::SetNick { nick: "bot".into() },
                ClientNotification::ReadyForSeatConfiguration
            ]
        );
        bot.on_notification(&ServerNotification::AddPlayers { players: vec![] });
        assert_eq!(bot.state(), &BotState::Lobby);
        bot.on_notification(&ServerNotification::StartGameMode {
            seat: 1,
            mode: GameMode::Game,
        });
        assert_eq!(bot.state(), &BotState::Playing);
    }

    #[test]
    fn acks_every_turn_and_digs_on_schedule() {
        let mut options = BotOptions::new("digger");
        options.auto_dig_every = Some(2);
        options.max_turns = Some(2);
        let mut bot = BotSession::new(options);
        bot.on_notification(&level());
        bot.on_notification(&ServerNotification::StartGameMode {
            seat: 1,
            mode: GameMode::Game,
        });

        assert_eq!(
            bot.on_notification(&ServerNotification::TurnStarted { turn: 1 }),
            vec![ClientNotification::AckNewTurn { turn: 1 }]
        );
        let replies = bot.on_notification(&ServerNotification::TurnStarted { turn: 2 });
        assert_eq!(
            replies,
            vec![
                ClientNotification::AskMarkTiles {
                    tiles: vec![TilePos::new(1, 0)],
                    mark: true
                },
                ClientNotification::AckNewTurn { turn: 2 },
            ]
        );
        assert!(bot.is_finished());
        assert_eq!(bot.acked_turns(), &[1, 2]);
    }

    #[test]
    fn rejection_finishes_the_bot() {
        let mut bot = BotSession::new(BotOptions::new("bot"));
        bot.on_notification(&ServerNotification::ClientRejected {
            reason: "nick taken".into(),
        });
        assert_eq!(bot.state(), &BotState::Finished("rejected: nick taken".into()));
    }

    #[test]
    fn state_serializes_with_its_reason() {
        let finished = serde_json::to_value(BotState::Finished("server exit".into())).expect("json");
        assert_eq!(
            finished,
            serde_json::json!({ "state": "finished", "reason": "server exit" })
        );
        let playing = serde_json::to_value(BotState::Playing).expect("json");
        assert_eq!(playing, serde_json::json!({ "state": "playing" }));
    }
}
