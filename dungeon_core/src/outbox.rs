use bevy::prelude::Resource;
use dungeon_proto::ServerNotification;

use crate::seats::SeatId;
use crate::session::SessionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    /// Every connected, interested session.
    Broadcast,
    /// The session controlling this seat, if any.
    Seat(SeatId),
    Session(SessionId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutboundNotification {
    pub recipient: Recipient,
    pub notification: ServerNotification,
}

/// Server notifications staged by the simulation thread. Nothing here is
/// visible to clients until the outbox is flushed into the session queues.
#[derive(Resource, Default, Debug)]
pub struct Outbox {
    pending: Vec<OutboundNotification>,
}

impl Outbox {
    pub fn broadcast(&mut self, notification: ServerNotification) {
        self.push(Recipient::Broadcast, notification);
    }

    pub fn to_seat(&mut self, seat: SeatId, notification: ServerNotification) {
        self.push(Recipient::Seat(seat), notification);
    }

    pub fn to_session(&mut self, session: SessionId, notification: ServerNotification) {
        self.push(Recipient::Session(session), notification);
    }

    pub fn push(&mut self, recipient: Recipient, notification: ServerNotification) {
        self.pending.push(OutboundNotification {
            recipient,
            notification,
        });
    }

    pub fn drain(&mut self) -> Vec<OutboundNotification> {
        std::mem::take(&mut self.pending)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &OutboundNotification> {
        self.pending.iter()
    }
}
