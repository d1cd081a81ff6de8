//! Soft lockstep turn controller.
//!
//! The controller never touches the world. [`crate::context::ServerContext`]
//! asks it whether a turn may start, runs the turn, and reports the phase
//! changes back. Acknowledgements from every participating session gate the
//! next turn until `ack_timeout` runs out; sessions that stay silent past
//! the timeout are flagged as lagging and stop gating until they catch up.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::session::SessionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Idle,
    Running { turn: u64 },
    Broadcasting { turn: u64 },
    AwaitingAcks { turn: u64, since: Instant },
}

impl TurnPhase {
    pub fn name(&self) -> &'static str {
        match self {
            TurnPhase::Idle => "idle",
            TurnPhase::Running { .. } => "running",
            TurnPhase::Broadcasting { .. } => "broadcasting",
            TurnPhase::AwaitingAcks { .. } => "awaiting_acks",
        }
    }
}

impl fmt::Display for TurnPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TurnPhase::Idle => f.write_str("idle"),
            TurnPhase::Running { turn } => write!(f, "running({turn})"),
            TurnPhase::Broadcasting { turn } => write!(f, "broadcasting({turn})"),
            TurnPhase::AwaitingAcks { turn, .. } => write!(f, "awaiting_acks({turn})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnPoll {
    Wait,
    Advance,
    /// The ack timeout ran out. The listed sessions are now lagging.
    AdvanceAfterTimeout { lagging: Vec<SessionId> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    Accepted { remaining: usize },
    AllAcknowledged,
    /// A lagging session caught up and gates turns again from the next one.
    Recovered,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AckError {
    #[error("session {session} already acknowledged turn {turn}")]
    Duplicate { session: SessionId, turn: u64 },
    #[error("session {session} acknowledged turn {turn}, which is older than turn {current}")]
    Stale {
        session: SessionId,
        turn: u64,
        current: u64,
    },
    #[error("session {session} acknowledged turn {turn} before it started (current {current})")]
    Future {
        session: SessionId,
        turn: u64,
        current: u64,
    },
    #[error("session {0} does not take part in turn gating")]
    UnknownSession(SessionId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cannot go from {from} to {to}")]
pub struct TransitionError {
    pub from: &'static str,
    pub to: &'static str,
}

#[derive(Debug, Clone)]
pub struct TurnController {
    phase: TurnPhase,
    turn: u64,
    started: bool,
    interval: Duration,
    ack_timeout: Duration,
    participants: BTreeSet<SessionId>,
    expected: BTreeSet<SessionId>,
    acked: BTreeSet<SessionId>,
    /// Lagging session -> first turn it failed to acknowledge.
    lagging: BTreeMap<SessionId, u64>,
}

impl TurnController {
    pub fn new(interval: Duration, ack_timeout: Duration) -> Self {
        Self {
            phase: TurnPhase::Idle,
            turn: 0,
            started: false,
            interval,
            ack_timeout,
            participants: BTreeSet::new(),
            expected: BTreeSet::new(),
            acked: BTreeSet::new(),
            lagging: BTreeMap::new(),
        }
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    /// Last turn that was started.
    pub fn turn(&self) -> u64 {
        self.turn
    }

    pub fn start(&mut self) {
        self.started = true;
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// The session gates turns from the next `AwaitingAcks` on.
    pub fn add_participant(&mut self, session: SessionId) {
        self.participants.insert(session);
    }

    pub fn remove_participant(&mut self, session: SessionId) {
        self.participants.remove(&session);
        self.expected.remove(&session);
        self.acked.remove(&session);
        self.lagging.remove(&session);
    }

    pub fn is_participant(&self, session: SessionId) -> bool {
        self.participants.contains(&session)
    }

    pub fn is_lagging(&self, session: SessionId) -> bool {
        self.lagging.contains_key(&session)
    }

    pub fn lagging(&self) -> impl Iterator<Item = SessionId> + '_ {
        self.lagging.keys().copied()
    }

    /// Sessions whose ack for the current turn is still outstanding.
    pub fn pending(&self) -> Vec<SessionId> {
        self.expected.difference(&self.acked).copied().collect()
    }

    pub fn begin_turn(&mut self) -> Result<u64, TransitionError> {
        match self.phase {
            TurnPhase::Idle | TurnPhase::AwaitingAcks { .. } => {
                self.turn += 1;
                self.phase = TurnPhase::Running { turn: self.turn };
                Ok(self.turn)
            }
            other => Err(TransitionError {
                from: other.name(),
                to: "running",
            }),
        }
    }

    pub fn finish_upkeep(&mut self) -> Result<(), TransitionError> {
        match self.phase {
            TurnPhase::Running { turn } => {
                self.phase = TurnPhase::Broadcasting { turn };
                Ok(())
            }
            other => Err(TransitionError {
                from: other.name(),
                to: "broadcasting",
            }),
        }
    }

    pub fn await_acks(&mut self, now: Instant) -> Result<(), TransitionError> {
        match self.phase {
            TurnPhase::Broadcasting { turn } => {
                self.expected = self
                    .participants
                    .iter()
                    .filter(|session| !self.lagging.contains_key(session))
                    .copied()
                    .collect();
                self.acked.clear();
                self.phase = TurnPhase::AwaitingAcks { turn, since: now };
                Ok(())
            }
            other => Err(TransitionError {
                from: other.name(),
                to: "awaiting_acks",
            }),
        }
    }

    /// Whether the next turn may start at `now`.
    pub fn poll(&mut self, now: Instant) -> TurnPoll {
        match self.phase {
            TurnPhase::Idle if self.started => TurnPoll::Advance,
            TurnPhase::AwaitingAcks { turn, since } if self.started => {
                let elapsed = now.saturating_duration_since(since);
                if elapsed < self.interval {
                    return TurnPoll::Wait;
                }
                if self.expected.is_subset(&self.acked) {
                    return TurnPoll::Advance;
                }
                if elapsed < self.ack_timeout {
                    return TurnPoll::Wait;
                }
                let lagging = self.pending();
                for session in &lagging {
                    self.lagging.insert(*session, turn);
                }
                tracing::warn!(
                    target: "dungeon::turn",
                    turn,
                    lagging = ?lagging,
                    waited_ms = elapsed.as_millis() as u64,
                    "turn.ack_timeout"
                );
                TurnPoll::AdvanceAfterTimeout { lagging }
            }
            _ => TurnPoll::Wait,
        }
    }

    pub fn record_ack(&mut self, session: SessionId, turn: u64) -> Result<AckOutcome, AckError> {
        if !self.participants.contains(&session) {
            return Err(AckError::UnknownSession(session));
        }
        if turn > self.turn {
            return Err(AckError::Future {
                session,
                turn,
                current: self.turn,
            });
        }
        if let Some(&missed) = self.lagging.get(&session) {
            if turn < missed {
                return Err(AckError::Stale {
                    session,
                    turn,
                    current: missed,
                });
            }
            self.lagging.remove(&session);
            tracing::info!(
                target: "dungeon::turn",
                session = %session,
                turn,
                missed,
                "turn.session_recovered"
            );
            return Ok(AckOutcome::Recovered);
        }
        if turn < self.turn {
            return Err(AckError::Stale {
                session,
                turn,
                current: self.turn,
            });
        }
        if !self.acked.insert(session) {
            return Err(AckError::Duplicate { session, turn });
        }
        let remaining = self.expected.difference(&self.acked).count();
        if remaining == 0 {
            Ok(AckOutcome::AllAcknowledged)
        } else {
            Ok(AckOutcome::Accepted { remaining })
        }
    }
}
