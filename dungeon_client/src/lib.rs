//! Headless dungeon client: a mirror of the server world fed by the
//! notification stream, a bot that plays the handshake and acks turns, and
//! replay record/playback.

pub mod bot;
pub mod connection;
pub mod mirror;

pub use bot::{BotOptions, BotSession, BotState};
pub use connection::{record_notifications, replay_file, replay_into, run_bot, ClientError, RunSummary};
pub use mirror::ClientMirror;
