//! Wire protocol shared by the dungeon server and its clients.
//!
//! Notifications are encoded into [`Frame`]s as `[i32 tag][fields]`, queued
//! per session in a [`NotificationQueue`] and sent as length-prefixed frames.

pub mod client;
pub mod frame;
pub mod notification;
pub mod queue;
pub mod replay;
pub mod server;
pub mod snapshot;
pub mod stream;
pub mod types;

pub use client::{ClientNotification, ClientNotificationKind};
pub use frame::{join_i64, split_i64, Frame, FrameError, WireDecode, WireEncode};
pub use notification::Notification;
pub use queue::{NotificationQueue, Popped, QueueClosed};
pub use replay::{ReplayError, ReplayReader, ReplayRecord, ReplayWriter};
pub use server::{ServerNotification, ServerNotificationKind};
pub use snapshot::{
    decode_snapshot, decode_snapshot_json, encode_snapshot, encode_snapshot_json, hash_snapshot,
    SeatResearchState, SnapshotHeader, WorldSnapshot,
};
pub use stream::{read_frame, write_frame, TransportError, DEFAULT_MAX_FRAME_LEN};
pub use types::{
    CreatureState, GameMode, GoldPileState, PlayerInfo, ResearchKind, RoomKind, RoomState,
    SeatAssignment, SeatDescriptor, SeatState, SpellKind, TileKind, TilePos, TileState, TrapKind,
    TrapState, Vector3, FIRST_HUMAN_PLAYER_ID, PLAYER_ID_AI, PLAYER_ID_INACTIVE,
};

/// Protocol version exchanged in the `Hello` handshake.
pub const PROTOCOL_VERSION: &str = "0.8.0";
