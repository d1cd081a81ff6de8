use std::path::{Path, PathBuf};
use std::time::Instant;

use bevy::prelude::*;
use dungeon_proto::{encode_snapshot, ServerNotification};

use crate::components::CreatureId;
use crate::level::{save_level, LevelError};
use crate::network::Transport;
use crate::outbox::Outbox;
use crate::requests::creature_info;
use crate::resources::{GameTurn, ServerConfig, SimulationFault, SimulationFaults};
use crate::session::{SessionId, SessionPhase, SessionRegistry};
use crate::snapshot::build_snapshot;
use crate::turn::{TransitionError, TurnController, TurnPoll};
use crate::{run_turn, SeatRegistry};

/// What one call to [`ServerContext::cycle`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Waiting,
    TurnCompleted(u64),
}

/// Everything the simulation thread owns: the world, the sessions talking to
/// it and the turn controller gating it.
pub struct ServerContext {
    pub app: App,
    pub sessions: SessionRegistry,
    pub turns: TurnController,
    pub(crate) transport: Transport,
    pub(crate) game_started: bool,
}

impl From<TransitionError> for SimulationFault {
    fn from(err: TransitionError) -> Self {
        SimulationFault::IllegalTransition {
            from: err.from,
            to: err.to,
        }
    }
}

impl ServerContext {
    pub fn new(app: App, transport: Transport) -> Self {
        let config = app.world.resource::<ServerConfig>();
        let turns = TurnController::new(config.turn_interval(), config.ack_timeout);
        Self {
            app,
            sessions: SessionRegistry::default(),
            turns,
            transport,
            game_started: false,
        }
    }

    pub fn world(&self) -> &World {
        &self.app.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.app.world
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn config(&self) -> &ServerConfig {
        self.app.world.resource::<ServerConfig>()
    }

    pub fn is_started(&self) -> bool {
        self.game_started
    }

    /// Drain inbound events, then start a turn if the controller allows it.
    /// Inbound processing always happens before upkeep, and upkeep before
    /// anything about the turn is sent.
    pub fn cycle(&mut self, now: Instant) -> Result<CycleOutcome, SimulationFault> {
        for event in self.transport.drain() {
            self.handle_event(event);
        }
        match self.turns.poll(now) {
            TurnPoll::Wait => Ok(CycleOutcome::Waiting),
            TurnPoll::Advance => self.advance(now).map(CycleOutcome::TurnCompleted),
            TurnPoll::AdvanceAfterTimeout { lagging } => {
                for session in lagging {
                    if let Some(session) = self.sessions.get_mut(session) {
                        session.phase = SessionPhase::Lagging;
                    }
                }
                self.advance(now).map(CycleOutcome::TurnCompleted)
            }
        }
    }

    /// Run one turn and send its notifications, ending with `TurnStarted`.
    pub fn advance(&mut self, now: Instant) -> Result<u64, SimulationFault> {
        let started = Instant::now();
        let turn = self.turns.begin_turn()?;
        self.app.world.resource_mut::<GameTurn>().0 = turn;

        run_turn(&mut self.app);

        if let Some(fault) = self
            .app
            .world
            .resource_mut::<SimulationFaults>()
            .take_first()
        {
            return Err(fault);
        }
        let world_turn = self.app.world.resource::<GameTurn>().0;
        if world_turn != turn {
            return Err(SimulationFault::TurnMismatch {
                expected: turn,
                actual: world_turn,
            });
        }

        self.stage_watches();
        self.app
            .world
            .resource_mut::<Outbox>()
            .broadcast(ServerNotification::TurnStarted { turn: turn as i64 });
        self.turns.finish_upkeep()?;
        let sent = self.flush();
        self.turns.await_acks(now)?;

        tracing::info!(
            target: "dungeon::turn",
            turn,
            notifications = sent,
            elapsed_us = started.elapsed().as_micros() as u64,
            "turn.advanced"
        );
        Ok(turn)
    }

    /// Creature info for every watch held by a playing session.
    fn stage_watches(&mut self) {
        let watches: Vec<(SessionId, CreatureId)> = self
            .sessions
            .iter()
            .filter(|session| session.phase == SessionPhase::Playing)
            .flat_map(|session| session.watches.iter().map(move |id| (session.id, *id)))
            .collect();
        for (session, creature) in watches {
            match creature_info(&mut self.app.world, creature) {
                Ok(info) => self.app.world.resource_mut::<Outbox>().to_session(
                    session,
                    ServerNotification::NotifyCreatureInfo {
                        creature: creature.0,
                        info,
                    },
                ),
                Err(_) => {
                    if let Some(session) = self.sessions.get_mut(session) {
                        session.watches.remove(&creature);
                    }
                }
            }
        }
    }

    /// Hand every staged notification to the session queues, in staging
    /// order. Returns how many frames were enqueued.
    pub fn flush(&mut self) -> usize {
        let staged = self.app.world.resource_mut::<Outbox>().drain();
        staged
            .iter()
            .map(|outbound| self.sessions.deliver(outbound))
            .sum()
    }

    /// `CatchUpSnapshot` of the current world for one session.
    pub(crate) fn send_catch_up(&mut self, session: SessionId) {
        let snapshot = build_snapshot(&mut self.app.world);
        let turn = snapshot.header.turn as i64;
        match encode_snapshot(&snapshot) {
            Ok(payload) => {
                self.sessions
                    .send(session, &ServerNotification::CatchUpSnapshot { turn, payload });
            }
            Err(err) => tracing::error!(
                target: "dungeon::server",
                session = %session,
                error = %err,
                "snapshot.encode_failed"
            ),
        }
    }

    pub fn set_turns_per_second(&mut self, turns_per_second: f64) {
        let interval = {
            let mut config = self.app.world.resource_mut::<ServerConfig>();
            config.turns_per_second = turns_per_second.max(0.0);
            config.turn_interval()
        };
        self.turns.set_interval(interval);
        self.sessions
            .send_to_joined(&ServerNotification::SetTurnsPerSecond { turns_per_second });
        tracing::info!(target: "dungeon::server", turns_per_second, "admin.turns_per_second");
    }

    /// Server chat line to everyone who has joined.
    pub fn say(&mut self, message: impl Into<String>) {
        self.sessions.send_to_joined(&ServerNotification::ChatServer {
            message: message.into(),
        });
    }

    pub fn kick(&mut self, session: SessionId) -> bool {
        if !self.sessions.contains(session) {
            return false;
        }
        self.sessions.send(
            session,
            &ServerNotification::ClientRejected {
                reason: "kicked by the server".into(),
            },
        );
        self.disconnect(session, "kicked");
        true
    }

    pub fn save_map(&mut self, path: Option<&Path>) -> Result<PathBuf, LevelError> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.config().save_path.clone());
        save_level(&mut self.app.world, &path)
    }

    pub fn snapshot_json(&mut self) -> serde_json::Result<String> {
        dungeon_proto::encode_snapshot_json(&build_snapshot(&mut self.app.world))
    }

    /// One-line summary for the admin console.
    pub fn status(&self) -> String {
        let seats = self.app.world.resource::<SeatRegistry>();
        let lagging: Vec<String> = self.turns.lagging().map(|id| id.to_string()).collect();
        format!(
            "turn={} phase={} started={} mode={} sessions={} playing={} lagging=[{}] seats={}",
            self.turns.turn(),
            self.turns.phase(),
            self.game_started,
            self.config().mode.name(),
            self.sessions.len(),
            self.sessions.in_phase(SessionPhase::Playing).len(),
            lagging.join(","),
            seats.len(),
        )
    }

    /// Tell every client to exit and close all sessions.
    pub fn shutdown(&mut self) {
        self.sessions.send_to_joined(&ServerNotification::Exit);
        for session in self.sessions.ids() {
            self.sessions.remove(session);
        }
        self.transport.shutdown();
        tracing::info!(target: "dungeon::server", "server.shutdown");
    }
}
