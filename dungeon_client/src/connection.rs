use std::fs::File;
use std::io::{self, BufWriter};
use std::path::Path;
use std::time::Instant;

use dungeon_proto::{
    ClientNotification, Notification, ReplayError, ReplayReader, ReplayWriter, ServerNotification,
    DEFAULT_MAX_FRAME_LEN,
};
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tracing::{debug, info, trace, warn};

use crate::bot::{BotSession, BotState};
use crate::mirror::ClientMirror;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connection I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("server frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: u32, max: u32 },
    #[error(transparent)]
    Replay(#[from] ReplayError),
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub state: BotState,
    pub last_turn: i64,
    pub turns_acked: usize,
    pub desyncs: u64,
    pub frames: u64,
    pub recorded: u64,
}

/// Drive `bot` over a TCP connection until it finishes or the server closes
/// the stream. Every received frame is appended to `record` when given.
pub async fn run_bot(
    endpoint: &str,
    mut bot: BotSession,
    record: Option<&Path>,
) -> Result<(BotSession, RunSummary), ClientError> {
    let stream = TcpStream::connect(endpoint).await?;
    stream.set_nodelay(true)?;
    info!(target: "dungeon::client", %endpoint, "client.connected");
    let (mut reader, writer) = stream.into_split();

    let (outbound, outbound_rx) = unbounded_channel::<ClientNotification>();
    let writer_task = tokio::spawn(write_loop(writer, outbound_rx));

    let mut recorder = match record {
        Some(path) => Some(ReplayWriter::create(path)?),
        None => None,
    };
    let started = Instant::now();
    let mut frames = 0u64;

    // the writer only stops once `outbound` is dropped or the socket fails
    let _ = outbound.send(bot.hello());
    while !bot.is_finished() {
        let len = match reader.read_u32().await {
            Ok(len) => len,
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
                bot.finish("server closed the connection");
                break;
            }
            Err(err) => return Err(err.into()),
        };
        if len > DEFAULT_MAX_FRAME_LEN {
            return Err(ClientError::FrameTooLarge {
                len,
                max: DEFAULT_MAX_FRAME_LEN,
            });
        }
        let mut payload = vec![0u8; len as usize];
        reader.read_exact(&mut payload).await?;
        frames += 1;

        if let Some(recorder) = recorder.as_mut() {
            let elapsed = i32::try_from(started.elapsed().as_millis()).unwrap_or(i32::MAX);
            recorder.write_record(elapsed, &payload)?;
        }

        match ServerNotification::decode(&payload) {
            Ok(notification) => {
                trace!(target: "dungeon::client", kind = notification.kind().name(), "client.received");
                for reply in bot.on_notification(&notification) {
                    if outbound.send(reply).is_err() {
                        bot.finish("writer stopped");
                        break;
                    }
                }
            }
            Err(err) => {
                warn!(
                    target: "dungeon::client",
                    tag = ?err.tag(),
                    offset = err.offset(),
                    error = %err,
                    "protocol.error"
                );
                bot.mirror_mut().record_desync("undecodable notification");
            }
        }
    }

    drop(outbound);
    if let Ok(Err(err)) = writer_task.await {
        debug!(target: "dungeon::client", error = %err, "client.writer_failed");
    }
    let recorded = match recorder {
        Some(mut recorder) => {
            recorder.flush()?;
            recorder.records()
        }
        None => 0,
    };

    let summary = RunSummary {
        state: bot.state().clone(),
        last_turn: bot.mirror().turn,
        turns_acked: bot.acked_turns().len(),
        desyncs: bot.mirror().desyncs(),
        frames,
        recorded,
    };
    info!(
        target: "dungeon::client",
        state = ?summary.state,
        last_turn = summary.last_turn,
        desyncs = summary.desyncs,
        frames,
        "client.finished"
    );
    Ok((bot, summary))
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut outbound: UnboundedReceiver<ClientNotification>,
) -> io::Result<()> {
    while let Some(notification) = outbound.recv().await {
        let frame = notification.encode();
        let len = u32::try_from(frame.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "frame too large"))?;
        writer.write_u32(len).await?;
        writer.write_all(frame.as_bytes()).await?;
        writer.flush().await?;
    }
    writer.shutdown().await
}

/// Feed a recorded session into a fresh mirror.
pub fn replay_file(path: &Path) -> Result<ClientMirror, ClientError> {
    let reader = ReplayReader::open(path)?;
    replay_into(reader, ClientMirror::default())
}

pub fn replay_into<R: io::Read>(
    mut reader: ReplayReader<R>,
    mut mirror: ClientMirror,
) -> Result<ClientMirror, ClientError> {
    let mut records = 0u64;
    while let Some(record) = reader.read_record()? {
        records += 1;
        match ServerNotification::decode(record.frame.as_bytes()) {
            Ok(notification) => mirror.apply(&notification),
            Err(err) => {
                warn!(target: "dungeon::client", record = records, error = %err, "replay.undecodable");
                mirror.record_desync("undecodable replay record");
            }
        }
    }
    info!(
        target: "dungeon::client",
        records,
        turn = mirror.turn,
        desyncs = mirror.desyncs(),
        "replay.finished"
    );
    Ok(mirror)
}

/// Record `notifications` as if they had been received, one millisecond apart.
pub fn record_notifications(
    path: &Path,
    notifications: &[ServerNotification],
) -> Result<u64, ClientError> {
    let mut writer: ReplayWriter<BufWriter<File>> = ReplayWriter::create(path)?;
    for (at, notification) in notifications.iter().enumerate() {
        let at = i32::try_from(at).unwrap_or(i32::MAX);
        writer.write_record(at, notification.encode().as_bytes())?;
    }
    writer.flush()?;
    Ok(writer.records())
}
