//! Inbound event handling for [`ServerContext`]: the handshake, the lobby and
//! every in-game request. Requests are validated against the world before
//! anything is applied; refusals go back to the requester as a server chat
//! line.

use std::fmt::Debug;

use dungeon_proto::{
    ClientNotification, GameMode, SeatAssignment, ServerNotification, PLAYER_ID_AI,
    PLAYER_ID_INACTIVE,
};

use crate::components::CreatureId;
use crate::context::ServerContext;
use crate::gameplay_config::CreatureRole;
use crate::level::{load_level_notification, save_level};
use crate::network::{InboundEvent, ProtocolError};
use crate::requests::{self, BatchOutcome, RequestError};
use crate::seats::{SeatId, SeatRegistry};
use crate::session::{SessionId, SessionPhase};
use crate::turn::AckOutcome;

impl ServerContext {
    pub fn handle_event(&mut self, event: InboundEvent) {
        match event {
            InboundEvent::Connected {
                session,
                queue,
                peer,
            } => {
                tracing::debug!(target: "dungeon::server", session = %session, ?peer, "session.registered");
                self.sessions.register(session, queue, peer);
            }
            InboundEvent::Message {
                session,
                notification,
            } => self.handle_message(session, notification),
            InboundEvent::Malformed { session, error } => self.handle_malformed(session, &error),
            InboundEvent::Disconnected { session, reason } => {
                self.disconnect(session, reason.as_deref().unwrap_or("connection closed"));
            }
        }
    }

    fn handle_malformed(&mut self, session: SessionId, error: &ProtocolError) {
        tracing::warn!(
            target: "dungeon::transport",
            session = %session,
            tag = ?error.tag(),
            offset = ?error.offset(),
            error = %error,
            "protocol.error"
        );
        self.disconnect(session, "protocol error");
    }

    /// Remove the session. Its seat stays in the game without live control.
    pub fn disconnect(&mut self, session: SessionId, reason: &str) {
        let Some(removed) = self.sessions.remove(session) else {
            return;
        };
        self.turns.remove_participant(session);
        tracing::info!(
            target: "dungeon::transport",
            session = %session,
            reason,
            phase = removed.phase.name(),
            "session.disconnected"
        );
        if let Some(seat) = removed.seat {
            if let Some(seat) = self.app.world.resource_mut::<SeatRegistry>().get_mut(seat) {
                seat.live_control = false;
            }
        }
        if !removed.phase.is_joined() {
            return;
        }
        if let Some(player_id) = removed.player_id {
            self.sessions
                .send_to_joined(&ServerNotification::RemovePlayers {
                    player_ids: vec![player_id],
                });
        }
        if removed.phase.in_game() {
            let nick = removed.nick.unwrap_or_default();
            self.say(format!("{nick} left the game"));
        }
    }

    fn reject(&mut self, session: SessionId, reason: &str) {
        tracing::info!(target: "dungeon::server", session = %session, reason, "session.rejected");
        self.sessions.send(
            session,
            &ServerNotification::ClientRejected {
                reason: reason.to_string(),
            },
        );
        self.disconnect(session, reason);
    }

    fn handle_message(&mut self, session: SessionId, notification: ClientNotification) {
        let Some(phase) = self.sessions.get(session).map(|s| s.phase) else {
            return;
        };
        tracing::trace!(
            target: "dungeon::server",
            session = %session,
            phase = phase.name(),
            kind = notification.kind().name(),
            "request.received"
        );
        match (phase, notification) {
            (SessionPhase::AwaitingHello, ClientNotification::Hello { version }) => {
                self.on_hello(session, &version);
            }
            (SessionPhase::AwaitingLevelOk, ClientNotification::LevelOk) => {
                let mode = self.config().mode;
                if let Some(entry) = self.sessions.get_mut(session) {
                    entry.phase = SessionPhase::AwaitingNick;
                }
                self.sessions
                    .send(session, &ServerNotification::PickNick { mode });
            }
            (SessionPhase::AwaitingNick, ClientNotification::SetNick { nick }) => {
                self.on_nick(session, nick.trim().to_string());
            }
            (SessionPhase::AwaitingReady, ClientNotification::ReadyForSeatConfiguration) => {
                self.on_ready(session);
            }
            (phase, ClientNotification::Chat { message }) if phase.is_joined() => {
                let nick = self
                    .sessions
                    .get(session)
                    .and_then(|s| s.nick.clone())
                    .unwrap_or_default();
                self.sessions
                    .send_to_joined(&ServerNotification::Chat { nick, message });
            }
            (SessionPhase::Lobby, ClientNotification::SeatConfigurationRefresh { seats }) => {
                if self.sessions.is_host(session) {
                    for other in self.sessions.in_phase(SessionPhase::Lobby) {
                        if other != session {
                            self.sessions.send(
                                other,
                                &ServerNotification::SeatConfigurationRefresh {
                                    seats: seats.clone(),
                                },
                            );
                        }
                    }
                }
            }
            (SessionPhase::Lobby, ClientNotification::SeatConfigurationSet { seats }) => {
                if self.sessions.is_host(session) {
                    self.start_game(&seats);
                } else {
                    tracing::debug!(
                        target: "dungeon::server",
                        session = %session,
                        "request.rejected=not_host"
                    );
                }
            }
            (phase, ClientNotification::AckNewTurn { turn }) if phase.in_game() => {
                self.on_ack(session, turn);
            }
            (phase, notification) if phase.in_game() => {
                self.on_game_request(session, notification);
            }
            (phase, notification) if phase.is_joined() => {
                tracing::debug!(
                    target: "dungeon::server",
                    session = %session,
                    phase = phase.name(),
                    kind = notification.kind().name(),
                    "request.ignored=wrong_phase"
                );
            }
            (phase, notification) => {
                tracing::warn!(
                    target: "dungeon::server",
                    session = %session,
                    phase = phase.name(),
                    kind = notification.kind().name(),
                    "protocol.unexpected"
                );
                self.reject(session, "unexpected message during handshake");
            }
        }
    }

    fn on_hello(&mut self, session: SessionId, version: &str) {
        let expected = self.config().protocol_version.clone();
        if version != expected {
            self.reject(
                session,
                &format!("protocol version {version} does not match server {expected}"),
            );
            return;
        }
        if let Some(entry) = self.sessions.get_mut(session) {
            entry.phase = SessionPhase::AwaitingLevelOk;
        }
        let level = load_level_notification(&self.app.world);
        self.sessions.send(session, &level);
    }

    fn on_nick(&mut self, session: SessionId, nick: String) {
        if nick.is_empty() {
            self.reject(session, "empty nick");
            return;
        }
        if self.sessions.nick_taken(&nick) {
            self.reject(session, &format!("nick {nick} is already taken"));
            return;
        }
        if !self.game_started {
            if let Some(player_id) = self.sessions.assign_nick(session, nick.clone()) {
                tracing::info!(target: "dungeon::server", session = %session, %nick, player_id, "session.nick");
            }
            return;
        }
        match self.sessions.departed_seat(&nick) {
            Some(seat) => self.reattach(session, nick, seat),
            None => self.reject(session, "the game has already started"),
        }
    }

    /// A returning player takes their old seat back in the running game.
    fn reattach(&mut self, session: SessionId, nick: String, seat: SeatId) {
        let Some(player_id) = self.sessions.assign_nick(session, nick.clone()) else {
            return;
        };
        self.sessions.forget_departed(seat);
        if let Some(entry) = self.app.world.resource_mut::<SeatRegistry>().get_mut(seat) {
            entry.player = player_id;
            entry.live_control = true;
        }
        if let Some(entry) = self.sessions.get_mut(session) {
            entry.seat = Some(seat);
            entry.phase = SessionPhase::Playing;
        }
        tracing::info!(
            target: "dungeon::server",
            session = %session,
            %nick,
            seat = %seat,
            "session.reattached"
        );
        self.admit(session, seat);
        if let Some(info) = self.sessions.get(session).and_then(|s| s.player_info()) {
            self.sessions
                .send_to_joined(&ServerNotification::AddPlayers { players: vec![info] });
        }
    }

    fn on_ready(&mut self, session: SessionId) {
        let Some(entry) = self.sessions.get_mut(session) else {
            return;
        };
        entry.phase = SessionPhase::Lobby;
        let newcomer = entry.player_info();
        let everyone = self.sessions.players();
        self.sessions
            .send(session, &ServerNotification::AddPlayers { players: everyone });
        if let Some(info) = newcomer {
            for other in self.sessions.players() {
                if other.player_id != info.player_id {
                    if let Some(peer) = self.sessions.by_player(other.player_id) {
                        peer.send(&ServerNotification::AddPlayers {
                            players: vec![info.clone()],
                        });
                    }
                }
            }
        }
        let ready = self.sessions.in_phase(SessionPhase::Lobby).len();
        if self
            .config()
            .auto_start_players
            .is_some_and(|wanted| wanted > 0 && ready >= wanted)
        {
            self.auto_start();
        }
    }

    /// Give the lobby players, oldest first, the human playable seats in id
    /// order and start. Remaining seats stay inactive.
    pub fn auto_start(&mut self) {
        if self.game_started {
            return;
        }
        let seats: Vec<SeatId> = self
            .app
            .world
            .resource::<SeatRegistry>()
            .iter()
            .filter(|seat| seat.human_playable)
            .map(|seat| seat.id)
            .collect();
        let mut lobby = self.sessions.in_phase(SessionPhase::Lobby).into_iter();
        let assignments: Vec<SeatAssignment> = seats
            .into_iter()
            .map(|seat| SeatAssignment {
                seat: seat.0,
                faction: None,
                player: Some(
                    lobby
                        .next()
                        .and_then(|session| self.sessions.get(session))
                        .and_then(|session| session.player_id)
                        .unwrap_or(PLAYER_ID_INACTIVE),
                ),
                team: None,
            })
            .collect();
        self.start_game(&assignments);
    }

    /// Apply the host's seat configuration and start the game. Lobby players
    /// without a seat are turned away.
    pub fn start_game(&mut self, assignments: &[SeatAssignment]) {
        if self.game_started {
            return;
        }
        let mut seated: Vec<(SessionId, SeatId)> = Vec::new();
        {
            let mut registry = self.app.world.resource_mut::<SeatRegistry>();
            for assignment in assignments {
                let seat_id = SeatId(assignment.seat);
                let Some(seat) = registry.get_mut(seat_id) else {
                    tracing::debug!(
                        target: "dungeon::server",
                        seat = assignment.seat,
                        "seat_configuration.unknown_seat"
                    );
                    continue;
                };
                if let Some(team) = assignment.team {
                    seat.team = team;
                }
                match assignment.player {
                    Some(PLAYER_ID_INACTIVE) => seat.player = PLAYER_ID_INACTIVE,
                    Some(PLAYER_ID_AI) => seat.player = PLAYER_ID_AI,
                    Some(player_id) => {
                        let session = self
                            .sessions
                            .by_player(player_id)
                            .filter(|session| session.phase == SessionPhase::Lobby)
                            .map(|session| session.id);
                        let taken = seated.iter().any(|(other, _)| Some(*other) == session);
                        match session {
                            Some(session) if seat.human_playable && !taken => {
                                seat.player = player_id;
                                seat.live_control = true;
                                seated.push((session, seat_id));
                            }
                            _ => seat.player = PLAYER_ID_INACTIVE,
                        }
                    }
                    None => {}
                }
            }
        }

        self.game_started = true;
        for (session, seat) in &seated {
            if let Some(entry) = self.sessions.get_mut(*session) {
                entry.seat = Some(*seat);
                entry.phase = SessionPhase::Playing;
            }
        }
        for session in self.sessions.in_phase(SessionPhase::Lobby) {
            self.reject(session, "no seat was assigned to you");
        }
        for (session, seat) in seated.clone() {
            self.admit(session, seat);
        }
        self.turns.start();
        tracing::info!(
            target: "dungeon::server",
            players = seated.len(),
            mode = self.config().mode.name(),
            "game.started"
        );
    }

    /// Welcome a playing session: roster, mode, then the current world.
    fn admit(&mut self, session: SessionId, seat: SeatId) {
        let (turns_per_second, mode) = {
            let config = self.config();
            (config.turns_per_second, config.mode)
        };
        let players = self.sessions.players();
        self.sessions.send(
            session,
            &ServerNotification::ClientAccepted {
                turns_per_second,
                players,
            },
        );
        self.sessions.send(
            session,
            &ServerNotification::StartGameMode { seat: seat.0, mode },
        );
        self.send_catch_up(session);
        self.turns.add_participant(session);
    }

    fn on_ack(&mut self, session: SessionId, turn: i64) {
        let Ok(turn) = u64::try_from(turn) else {
            tracing::debug!(target: "dungeon::turn", session = %session, turn, "turn.ack_rejected=negative");
            return;
        };
        match self.turns.record_ack(session, turn) {
            Ok(AckOutcome::Recovered) => {
                if let Some(entry) = self.sessions.get_mut(session) {
                    entry.phase = SessionPhase::Playing;
                }
                self.send_catch_up(session);
            }
            Ok(outcome) => {
                tracing::trace!(target: "dungeon::turn", session = %session, turn, ?outcome, "turn.ack");
            }
            Err(err) => {
                tracing::debug!(
                    target: "dungeon::turn",
                    session = %session,
                    turn,
                    error = %err,
                    "turn.ack_rejected"
                );
            }
        }
    }

    fn on_game_request(&mut self, session: SessionId, request: ClientNotification) {
        let name = request.kind().name();
        if request.is_editor_only() && self.config().mode != GameMode::Editor {
            self.refuse(session, name, &"editor requests need editor mode");
            return;
        }
        let Some(seat) = self.sessions.get(session).and_then(|s| s.seat) else {
            return;
        };
        let world = &mut self.app.world;
        match request {
            ClientNotification::AskEntityPickUp { creature } => {
                let result = requests::pick_up(world, seat, CreatureId(creature));
                self.report_single(session, name, result);
            }
            ClientNotification::AskHandDrop { tile } => {
                let result = requests::hand_drop(world, seat, tile);
                self.report_single(session, name, result);
            }
            ClientNotification::AskMarkTiles { tiles, mark } => {
                let result = requests::mark_tiles(world, seat, &tiles, mark);
                self.report_batch(session, name, result);
            }
            ClientNotification::AskSlapEntity { creature } => {
                let result = requests::slap(world, seat, CreatureId(creature));
                self.report_single(session, name, result);
            }
            ClientNotification::AskBuildRoom { room, tiles } => {
                let result = requests::build_room(world, seat, room, &tiles);
                self.report_batch(session, name, result);
            }
            ClientNotification::AskSellRoomTiles { tiles } => {
                let result = requests::sell_room_tiles(world, seat, &tiles);
                self.report_batch(session, name, result);
            }
            ClientNotification::AskBuildTrap { trap, tiles } => {
                let result = requests::build_trap(world, seat, trap, &tiles);
                self.report_batch(session, name, result);
            }
            ClientNotification::AskSellTrapTiles { tiles } => {
                let result = requests::sell_trap_tiles(world, seat, &tiles);
                self.report_batch(session, name, result);
            }
            ClientNotification::AskCreatureInfos {
                creature,
                refresh_each_turn,
            } => {
                let id = CreatureId(creature);
                match requests::creature_info(world, id) {
                    Ok(info) => {
                        self.sessions.send(
                            session,
                            &ServerNotification::NotifyCreatureInfo { creature, info },
                        );
                        if let Some(entry) = self.sessions.get_mut(session) {
                            if refresh_each_turn {
                                entry.watches.insert(id);
                            } else {
                                entry.watches.remove(&id);
                            }
                        }
                    }
                    Err(err) => self.refuse(session, name, &err),
                }
            }
            ClientNotification::AskPickupWorker => {
                let result = requests::pick_up_role(world, seat, CreatureRole::Worker);
                self.report_single(session, name, result);
            }
            ClientNotification::AskPickupFighter => {
                let result = requests::pick_up_role(world, seat, CreatureRole::Fighter);
                self.report_single(session, name, result);
            }
            ClientNotification::AskCastSpell { spell, tile } => {
                let result = requests::cast_spell(world, seat, spell, tile);
                self.report_single(session, name, result);
            }
            ClientNotification::AskSetResearchTree { queue } => {
                let result = requests::set_research_queue(world, seat, &queue);
                self.report_batch(session, name, result);
            }
            ClientNotification::AskSaveMap => {
                let path = self.config().save_path.clone();
                let message = match save_level(&mut self.app.world, &path) {
                    Ok(path) => format!("map saved to {}", path.display()),
                    Err(err) => {
                        tracing::warn!(target: "dungeon::server", error = %err, "level.save_failed");
                        format!("map could not be saved: {err}")
                    }
                };
                self.sessions
                    .send(session, &ServerNotification::ChatServer { message });
            }
            ClientNotification::EditorAskDestroyRoomTiles { tiles } => {
                let result = requests::destroy_room_tiles(world, &tiles);
                self.report_batch(session, name, Ok(result));
            }
            ClientNotification::EditorAskDestroyTrapTiles { tiles } => {
                let result = requests::destroy_trap_tiles(world, &tiles);
                self.report_batch(session, name, Ok(result));
            }
            ClientNotification::EditorAskChangeTiles {
                tiles,
                kind,
                fullness,
            } => {
                let result = requests::change_tiles(world, &tiles, kind, fullness);
                self.report_batch(session, name, Ok(result));
            }
            ClientNotification::EditorAskBuildRoom { seat, room, tiles } => {
                let result = requests::editor_build_room(world, SeatId(seat), room, &tiles);
                self.report_batch(session, name, result);
            }
            ClientNotification::EditorAskBuildTrap { seat, trap, tiles } => {
                let result = requests::editor_build_trap(world, SeatId(seat), trap, &tiles);
                self.report_batch(session, name, result);
            }
            ClientNotification::EditorCreateWorker { seat, tile } => {
                let result = requests::editor_create_creature(world, SeatId(seat), None, tile);
                self.report_single(session, name, result);
            }
            ClientNotification::EditorCreateFighter { seat, class, tile } => {
                let result =
                    requests::editor_create_creature(world, SeatId(seat), Some(class.as_str()), tile);
                self.report_single(session, name, result);
            }
            other => {
                tracing::debug!(
                    target: "dungeon::server",
                    session = %session,
                    kind = other.kind().name(),
                    "request.ignored=wrong_phase"
                );
            }
        }
    }

    fn report_single<T>(&mut self, session: SessionId, request: &str, result: Result<T, RequestError>) {
        if let Err(err) = result {
            self.refuse(session, request, &err);
        }
    }

    /// Partial success: applied entries stay applied, skipped ones are
    /// counted in a single refusal line.
    fn report_batch<T: Debug>(
        &mut self,
        session: SessionId,
        request: &str,
        result: Result<BatchOutcome<T>, RequestError>,
    ) {
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(err) => {
                self.refuse(session, request, &err);
                return;
            }
        };
        let Some((entry, first)) = outcome.rejected.first() else {
            return;
        };
        tracing::debug!(
            target: "dungeon::server",
            session = %session,
            request,
            applied = outcome.applied.len(),
            skipped = outcome.rejected.len(),
            first = ?entry,
            error = %first,
            "request.partial"
        );
        let message = format!(
            "{request}: {} applied, {} skipped ({first})",
            outcome.applied.len(),
            outcome.rejected.len(),
        );
        self.sessions
            .send(session, &ServerNotification::ChatServer { message });
    }

    fn refuse(&mut self, session: SessionId, request: &str, error: &dyn std::fmt::Display) {
        tracing::debug!(
            target: "dungeon::server",
            session = %session,
            request,
            error = %error,
            "request.rejected"
        );
        self.sessions.send(
            session,
            &ServerNotification::ChatServer {
                message: format!("{request} refused: {error}"),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use dungeon_proto::{TilePos, PROTOCOL_VERSION};

    use super::*;
    use crate::gameplay_config::GameplayConfig;
    use crate::level::LevelDefinition;
    use crate::map::TileMap;
    use crate::network::{LoopbackClient, Transport};
    use crate::resources::ServerConfig;
    use crate::{build_app, CycleOutcome};

    fn context(mode: GameMode) -> ServerContext {
        let config = ServerConfig {
            turns_per_second: 0.0,
            ack_timeout: Duration::from_secs(5),
            mode,
            ..ServerConfig::default()
        };
        let app = build_app(config, GameplayConfig::builtin(), &LevelDefinition::builtin())
            .expect("builtin level");
        ServerContext::new(app, Transport::loopback())
    }

    fn join(ctx: &mut ServerContext, nick: &str, now: Instant) -> LoopbackClient {
        let client = ctx.transport().connect_loopback();
        client.send(&ClientNotification::Hello {
            version: PROTOCOL_VERSION.to_string(),
        });
        client.send(&ClientNotification::LevelOk);
        client.send(&ClientNotification::SetNick { nick: nick.into() });
        client.send(&ClientNotification::ReadyForSeatConfiguration);
        ctx.cycle(now).expect("cycle");
        client
    }

    fn seat_for(client: &LoopbackClient, ctx: &ServerContext, seat: i32) -> SeatAssignment {
        SeatAssignment {
            seat,
            faction: None,
            player: ctx
                .sessions
                .get(client.session())
                .and_then(|session| session.player_id),
            team: None,
        }
    }

    fn chat_lines(messages: &[ServerNotification]) -> Vec<String> {
        messages
            .iter()
            .filter_map(|message| match message {
                ServerNotification::ChatServer { message } => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn handshake_walks_to_the_lobby() {
        let mut ctx = context(GameMode::Game);
        let client = join(&mut ctx, "alice", Instant::now());
        let kinds: Vec<&str> = client.drain().iter().map(|n| n.kind().name()).collect();
        assert_eq!(kinds, ["LoadLevel", "PickNick", "AddPlayers"]);
        assert_eq!(
            ctx.sessions.get(client.session()).map(|s| s.phase),
            Some(SessionPhase::Lobby)
        );
        assert!(ctx.sessions.is_host(client.session()));
    }

    #[test]
    fn version_mismatch_is_rejected_and_closed() {
        let mut ctx = context(GameMode::Game);
        let client = ctx.transport().connect_loopback();
        client.send(&ClientNotification::Hello {
            version: "0.0.1".into(),
        });
        ctx.cycle(Instant::now()).expect("cycle");
        assert!(matches!(
            client.drain().as_slice(),
            [ServerNotification::ClientRejected { .. }]
        ));
        assert!(client.is_closed());
        assert!(ctx.sessions.is_empty());
    }

    #[test]
    fn game_request_before_handshake_drops_the_session() {
        let mut ctx = context(GameMode::Game);
        let client = ctx.transport().connect_loopback();
        client.send(&ClientNotification::AskPickupWorker);
        ctx.cycle(Instant::now()).expect("cycle");
        assert!(client.is_closed());
    }

    #[test]
    fn malformed_frame_disconnects() {
        let mut ctx = context(GameMode::Game);
        let client = join(&mut ctx, "alice", Instant::now());
        client.send_bytes(&[0xff, 0xff, 0xff, 0x7f]);
        ctx.cycle(Instant::now()).expect("cycle");
        assert!(client.is_closed());
        assert!(!ctx.sessions.contains(client.session()));
    }

    #[test]
    fn taken_nick_is_refused() {
        let mut ctx = context(GameMode::Game);
        let now = Instant::now();
        let _alice = join(&mut ctx, "alice", now);
        let imposter = join(&mut ctx, "alice", now);
        assert!(imposter
            .drain()
            .iter()
            .any(|n| matches!(n, ServerNotification::ClientRejected { .. })));
        assert!(imposter.is_closed());
    }

    #[test]
    fn lobby_sees_arrivals_and_departures() {
        let mut ctx = context(GameMode::Game);
        let now = Instant::now();
        let alice = join(&mut ctx, "alice", now);
        alice.drain();
        let bob = join(&mut ctx, "bob", now);
        let bob_id = ctx.sessions.get(bob.session()).and_then(|s| s.player_id);
        assert!(alice.drain().iter().any(|n| matches!(
            n,
            ServerNotification::AddPlayers { players } if players.len() == 1 && players[0].nick == "bob"
        )));

        bob.disconnect();
        ctx.cycle(now).expect("cycle");
        assert_eq!(
            alice.drain(),
            vec![ServerNotification::RemovePlayers {
                player_ids: bob_id.into_iter().collect()
            }]
        );
    }

    #[test]
    fn host_configuration_starts_the_game_and_turn_started_comes_last() {
        let mut ctx = context(GameMode::Game);
        let now = Instant::now();
        let alice = join(&mut ctx, "alice", now);
        let bob = join(&mut ctx, "bob", now);
        let seats = vec![seat_for(&alice, &ctx, 1), seat_for(&bob, &ctx, 2)];
        alice.drain();
        bob.drain();

        // only the host may configure seats
        bob.send(&ClientNotification::SeatConfigurationSet {
            seats: seats.clone(),
        });
        ctx.cycle(now).expect("cycle");
        assert!(!ctx.is_started());

        alice.send(&ClientNotification::SeatConfigurationSet { seats });
        let outcome = ctx.cycle(now).expect("cycle");
        assert_eq!(outcome, CycleOutcome::TurnCompleted(1));

        let received = alice.drain();
        let kinds: Vec<&str> = received.iter().map(|n| n.kind().name()).collect();
        assert_eq!(&kinds[..3], ["ClientAccepted", "StartGameMode", "CatchUpSnapshot"]);
        assert_eq!(
            received.last(),
            Some(&ServerNotification::TurnStarted { turn: 1 })
        );
        assert!(received.contains(&ServerNotification::StartGameMode {
            seat: 1,
            mode: GameMode::Game
        }));
        assert_eq!(
            ctx.world().resource::<SeatRegistry>().get(SeatId(2)).map(|s| s.live_control),
            Some(true)
        );
    }

    #[test]
    fn unseated_lobby_players_are_turned_away() {
        let mut ctx = context(GameMode::Game);
        let now = Instant::now();
        let alice = join(&mut ctx, "alice", now);
        let bob = join(&mut ctx, "bob", now);
        let seats = vec![seat_for(&alice, &ctx, 1)];
        alice.send(&ClientNotification::SeatConfigurationSet { seats });
        ctx.cycle(now).expect("cycle");
        assert!(bob.is_closed());
        assert!(!alice.is_closed());
    }

    #[test]
    fn acks_gate_turns_and_silence_makes_a_session_lag() {
        let mut ctx = context(GameMode::Game);
        let now = Instant::now();
        let alice = join(&mut ctx, "alice", now);
        let bob = join(&mut ctx, "bob", now);
        let seats = vec![seat_for(&alice, &ctx, 1), seat_for(&bob, &ctx, 2)];
        alice.send(&ClientNotification::SeatConfigurationSet { seats });
        ctx.cycle(now).expect("cycle");

        alice.send(&ClientNotification::AckNewTurn { turn: 1 });
        assert_eq!(ctx.cycle(now).expect("cycle"), CycleOutcome::Waiting);

        let late = now + Duration::from_secs(6);
        assert_eq!(ctx.cycle(late).expect("cycle"), CycleOutcome::TurnCompleted(2));
        assert_eq!(
            ctx.sessions.get(bob.session()).map(|s| s.phase),
            Some(SessionPhase::Lagging)
        );
        bob.drain();

        // lagging sessions get no world deltas
        alice.send(&ClientNotification::AckNewTurn { turn: 2 });
        assert_eq!(ctx.cycle(late).expect("cycle"), CycleOutcome::TurnCompleted(3));
        assert!(!bob
            .drain()
            .iter()
            .any(|n| matches!(n, ServerNotification::TurnStarted { .. })));

        bob.send(&ClientNotification::AckNewTurn { turn: 3 });
        ctx.cycle(late).expect("cycle");
        assert!(bob.drain().iter().any(
            |n| matches!(n, ServerNotification::CatchUpSnapshot { turn, .. } if *turn == 3)
        ));
        assert_eq!(
            ctx.sessions.get(bob.session()).map(|s| s.phase),
            Some(SessionPhase::Playing)
        );
    }

    #[test]
    fn catch_up_reflects_changes_made_since_the_last_turn() {
        let (mut ctx, alice, _) = started(GameMode::Game);
        if let Some(seat) = ctx.world_mut().resource_mut::<SeatRegistry>().get_mut(SeatId(1)) {
            seat.gold = 4_321;
        }
        ctx.send_catch_up(alice.session());

        let payload = alice
            .drain()
            .into_iter()
            .find_map(|n| match n {
                ServerNotification::CatchUpSnapshot { payload, .. } => Some(payload),
                _ => None,
            })
            .expect("catch-up sent");
        let snapshot = dungeon_proto::decode_snapshot(&payload).expect("decodes");
        let gold = snapshot.seats.iter().find(|seat| seat.seat == 1).map(|seat| seat.gold);
        assert_eq!(gold, Some(4_321));
    }

    fn started(mode: GameMode) -> (ServerContext, LoopbackClient, Instant) {
        let mut ctx = context(mode);
        let now = Instant::now();
        let alice = join(&mut ctx, "alice", now);
        let seats = vec![seat_for(&alice, &ctx, 1)];
        alice.send(&ClientNotification::SeatConfigurationSet { seats });
        ctx.cycle(now).expect("cycle");
        alice.drain();
        (ctx, alice, now)
    }

    #[test]
    fn mark_tiles_reports_partial_success() {
        let (mut ctx, alice, now) = started(GameMode::Game);
        let diggable = ctx
            .world()
            .resource::<TileMap>()
            .iter()
            .find(|(_, tile)| tile.is_diggable_by(SeatId(1)))
            .map(|(pos, _)| pos)
            .expect("diggable tile");
        let outside = TilePos::new(-4, -4);
        alice.send(&ClientNotification::AckNewTurn { turn: 1 });
        alice.send(&ClientNotification::AskMarkTiles {
            tiles: vec![diggable, outside, diggable],
            mark: true,
        });
        ctx.cycle(now).expect("cycle");

        let received = alice.drain();
        let lines = chat_lines(&received);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("1 applied, 2 skipped"), "{}", lines[0]);
        assert!(received.contains(&ServerNotification::MarkTiles {
            tiles: vec![diggable],
            mark: true
        }));
        assert_eq!(
            received.last(),
            Some(&ServerNotification::TurnStarted { turn: 2 })
        );
    }

    #[test]
    fn editor_requests_need_editor_mode() {
        let (mut ctx, alice, now) = started(GameMode::Game);
        alice.send(&ClientNotification::EditorCreateWorker {
            seat: 1,
            tile: TilePos::new(1, 1),
        });
        ctx.cycle(now).expect("cycle");
        let lines = chat_lines(&alice.drain());
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("refused"));
    }

    #[test]
    fn unknown_creature_is_refused_with_a_server_line() {
        let (mut ctx, alice, now) = started(GameMode::Game);
        alice.send(&ClientNotification::AskSlapEntity { creature: 999_999 });
        ctx.cycle(now).expect("cycle");
        assert_eq!(chat_lines(&alice.drain()).len(), 1);
    }

    #[test]
    fn chat_is_relayed_with_the_sender_nick() {
        let (mut ctx, alice, now) = started(GameMode::Game);
        alice.send(&ClientNotification::Chat {
            message: "hello".into(),
        });
        ctx.cycle(now).expect("cycle");
        assert!(alice.drain().contains(&ServerNotification::Chat {
            nick: "alice".into(),
            message: "hello".into()
        }));
    }

    #[test]
    fn returning_nick_takes_its_seat_back() {
        let (mut ctx, alice, now) = started(GameMode::Game);
        alice.disconnect();
        ctx.cycle(now).expect("cycle");
        assert_eq!(
            ctx.world().resource::<SeatRegistry>().get(SeatId(1)).map(|s| s.live_control),
            Some(false)
        );

        let again = ctx.transport().connect_loopback();
        again.send(&ClientNotification::Hello {
            version: PROTOCOL_VERSION.to_string(),
        });
        again.send(&ClientNotification::LevelOk);
        again.send(&ClientNotification::SetNick {
            nick: "alice".into(),
        });
        ctx.cycle(now).expect("cycle");
        assert!(again.drain().contains(&ServerNotification::StartGameMode {
            seat: 1,
            mode: GameMode::Game
        }));
        assert_eq!(
            ctx.sessions.get(again.session()).and_then(|s| s.seat),
            Some(SeatId(1))
        );
    }

    #[test]
    fn auto_start_seats_lobby_players_in_order() {
        let mut ctx = context(GameMode::Game);
        ctx.world_mut().resource_mut::<ServerConfig>().auto_start_players = Some(2);
        let now = Instant::now();
        let alice = join(&mut ctx, "alice", now);
        assert!(!ctx.is_started());
        let bob = join(&mut ctx, "bob", now);
        assert!(ctx.is_started());
        assert_eq!(ctx.sessions.get(alice.session()).and_then(|s| s.seat), Some(SeatId(1)));
        assert_eq!(ctx.sessions.get(bob.session()).and_then(|s| s.seat), Some(SeatId(2)));
        assert_eq!(
            ctx.world().resource::<SeatRegistry>().get(SeatId(3)).map(|s| s.player),
            Some(PLAYER_ID_INACTIVE)
        );
    }
}
