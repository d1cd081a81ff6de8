use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::SocketAddr;

use dungeon_proto::{
    NotificationQueue, PlayerInfo, ServerNotification, FIRST_HUMAN_PLAYER_ID,
};

use crate::components::CreatureId;
use crate::outbox::{OutboundNotification, Recipient};
use crate::seats::SeatId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handshake progress of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    AwaitingHello,
    AwaitingLevelOk,
    AwaitingNick,
    AwaitingReady,
    Lobby,
    Playing,
    /// Playing, but missed a turn acknowledgement. Receives no world deltas
    /// until it catches up.
    Lagging,
}

impl SessionPhase {
    pub fn name(self) -> &'static str {
        match self {
            SessionPhase::AwaitingHello => "awaiting_hello",
            SessionPhase::AwaitingLevelOk => "awaiting_level_ok",
            SessionPhase::AwaitingNick => "awaiting_nick",
            SessionPhase::AwaitingReady => "awaiting_ready",
            SessionPhase::Lobby => "lobby",
            SessionPhase::Playing => "playing",
            SessionPhase::Lagging => "lagging",
        }
    }

    /// Whether the session has picked a nick and is known to other players.
    pub fn is_joined(self) -> bool {
        matches!(
            self,
            SessionPhase::Lobby | SessionPhase::Playing | SessionPhase::Lagging
        )
    }

    pub fn in_game(self) -> bool {
        matches!(self, SessionPhase::Playing | SessionPhase::Lagging)
    }
}

#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub phase: SessionPhase,
    pub peer: Option<SocketAddr>,
    pub nick: Option<String>,
    pub player_id: Option<i32>,
    pub seat: Option<SeatId>,
    /// Creatures whose info is pushed to this session every turn.
    pub watches: BTreeSet<CreatureId>,
    queue: NotificationQueue,
}

impl Session {
    pub fn queue(&self) -> &NotificationQueue {
        &self.queue
    }

    pub fn player_info(&self) -> Option<PlayerInfo> {
        Some(PlayerInfo {
            player_id: self.player_id?,
            nick: self.nick.clone()?,
            seat: self.seat.map(|seat| seat.0).unwrap_or_default(),
        })
    }

    /// Encode and enqueue. Sends to a closed queue are dropped; the reader
    /// side reports the disconnect separately.
    pub fn send(&self, notification: &ServerNotification) -> bool {
        match self.queue.enqueue_notification(notification) {
            Ok(()) => true,
            Err(_) => {
                tracing::debug!(
                    target: "dungeon::transport",
                    session = %self.id,
                    kind = notification.kind().name(),
                    "session.send_dropped=closed"
                );
                false
            }
        }
    }
}

/// Every connected session, keyed by id. Owned by the simulation thread.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: BTreeMap<SessionId, Session>,
    host: Option<SessionId>,
    next_player_id: i32,
    /// Seat -> nick of the human that played it, kept after disconnects so
    /// the same nick can take the seat back.
    departed: BTreeMap<SeatId, String>,
}

impl SessionRegistry {
    pub fn register(&mut self, id: SessionId, queue: NotificationQueue, peer: Option<SocketAddr>) {
        self.sessions.insert(
            id,
            Session {
                id,
                phase: SessionPhase::AwaitingHello,
                peer,
                nick: None,
                player_id: None,
                seat: None,
                watches: BTreeSet::new(),
                queue,
            },
        );
    }

    /// Drop the session and close its queue. A host leaving passes the role
    /// to the oldest remaining joined session.
    pub fn remove(&mut self, id: SessionId) -> Option<Session> {
        let session = self.sessions.remove(&id)?;
        session.queue.close();
        if let (Some(seat), Some(nick)) = (session.seat, session.nick.clone()) {
            self.departed.insert(seat, nick);
        }
        if self.host == Some(id) {
            self.host = self
                .sessions
                .values()
                .find(|other| other.phase.is_joined())
                .map(|other| other.id);
        }
        Some(session)
    }

    pub fn get(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    pub fn get_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        self.sessions.get_mut(&id)
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn host(&self) -> Option<SessionId> {
        self.host
    }

    pub fn is_host(&self, id: SessionId) -> bool {
        self.host == Some(id)
    }

    pub fn nick_taken(&self, nick: &str) -> bool {
        self.sessions
            .values()
            .any(|session| session.nick.as_deref() == Some(nick))
    }

    /// Record the nick, hand out a player id and move to `AwaitingReady`.
    /// The first session to get here becomes the host.
    pub fn assign_nick(&mut self, id: SessionId, nick: String) -> Option<i32> {
        let player_id = FIRST_HUMAN_PLAYER_ID + self.next_player_id;
        let session = self.sessions.get_mut(&id)?;
        self.next_player_id += 1;
        session.nick = Some(nick);
        session.player_id = Some(player_id);
        session.phase = SessionPhase::AwaitingReady;
        if self.host.is_none() {
            self.host = Some(id);
        }
        Some(player_id)
    }

    pub fn by_player(&self, player_id: i32) -> Option<&Session> {
        self.sessions
            .values()
            .find(|session| session.player_id == Some(player_id))
    }

    pub fn by_seat(&self, seat: SeatId) -> Option<&Session> {
        self.sessions
            .values()
            .find(|session| session.seat == Some(seat) && session.phase.in_game())
    }

    /// Seat previously played under `nick` whose human has left.
    pub fn departed_seat(&self, nick: &str) -> Option<SeatId> {
        self.departed
            .iter()
            .find(|(seat, departed)| departed.as_str() == nick && self.by_seat(**seat).is_none())
            .map(|(seat, _)| *seat)
    }

    pub fn forget_departed(&mut self, seat: SeatId) {
        self.departed.remove(&seat);
    }

    pub fn players(&self) -> Vec<PlayerInfo> {
        self.sessions
            .values()
            .filter(|session| session.phase.is_joined())
            .filter_map(Session::player_info)
            .collect()
    }

    pub fn in_phase(&self, phase: SessionPhase) -> Vec<SessionId> {
        self.sessions
            .values()
            .filter(|session| session.phase == phase)
            .map(|session| session.id)
            .collect()
    }

    pub fn send(&self, id: SessionId, notification: &ServerNotification) -> bool {
        self.sessions
            .get(&id)
            .is_some_and(|session| session.send(notification))
    }

    /// Send to every session that has joined, lobby and game alike.
    pub fn send_to_joined(&self, notification: &ServerNotification) {
        for session in self.sessions.values().filter(|s| s.phase.is_joined()) {
            session.send(notification);
        }
    }

    pub fn send_to_lobby(&self, notification: &ServerNotification) {
        for session in self
            .sessions
            .values()
            .filter(|s| s.phase == SessionPhase::Lobby)
        {
            session.send(notification);
        }
    }

    /// Route one staged notification. World deltas only reach sessions that
    /// are playing and in step; lobby and lagging sessions skip them.
    pub fn deliver(&self, outbound: &OutboundNotification) -> usize {
        let world_delta = outbound.notification.is_world_delta();
        let interested = |session: &Session| {
            if world_delta {
                session.phase == SessionPhase::Playing
            } else {
                session.phase.is_joined()
            }
        };
        let mut delivered = 0;
        match outbound.recipient {
            Recipient::Broadcast => {
                for session in self.sessions.values().filter(|s| interested(s)) {
                    delivered += usize::from(session.send(&outbound.notification));
                }
            }
            Recipient::Seat(seat) => {
                if let Some(session) = self.by_seat(seat).filter(|s| interested(s)) {
                    delivered += usize::from(session.send(&outbound.notification));
                }
            }
            Recipient::Session(id) => {
                if let Some(session) = self.sessions.get(&id).filter(|s| interested(s)) {
                    delivered += usize::from(session.send(&outbound.notification));
                }
            }
        }
        delivered
    }
}
