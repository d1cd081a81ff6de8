//! TCP transport. Network threads never touch the world: readers push
//! [`InboundEvent`]s into one channel drained by the simulation thread, and
//! writers drain each session's outbound [`NotificationQueue`].

use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use dungeon_proto::{
    read_frame, write_frame, ClientNotification, FrameError, Notification, NotificationQueue,
    Popped, ServerNotification, TransportError,
};
use thiserror::Error;

use crate::session::SessionId;

const WRITER_POLL: Duration = Duration::from_millis(50);
const ACCEPT_POLL: Duration = Duration::from_millis(20);

/// Why a session's input could not be understood. Always fatal for that
/// session only.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl ProtocolError {
    pub fn tag(&self) -> Option<i32> {
        match self {
            ProtocolError::Frame(err) => err.tag(),
            ProtocolError::Transport(_) => None,
        }
    }

    pub fn offset(&self) -> Option<usize> {
        match self {
            ProtocolError::Frame(err) => Some(err.offset()),
            ProtocolError::Transport(_) => None,
        }
    }
}

#[derive(Debug)]
pub enum InboundEvent {
    Connected {
        session: SessionId,
        queue: NotificationQueue,
        peer: Option<SocketAddr>,
    },
    Message {
        session: SessionId,
        notification: ClientNotification,
    },
    Malformed {
        session: SessionId,
        error: ProtocolError,
    },
    Disconnected {
        session: SessionId,
        reason: Option<String>,
    },
}

impl InboundEvent {
    pub fn session(&self) -> SessionId {
        match self {
            InboundEvent::Connected { session, .. }
            | InboundEvent::Message { session, .. }
            | InboundEvent::Malformed { session, .. }
            | InboundEvent::Disconnected { session, .. } => *session,
        }
    }
}

/// Inbound side of the server. Sessions come from the TCP listener, from
/// [`Transport::connect_loopback`], or both.
pub struct Transport {
    inbound: Receiver<InboundEvent>,
    sender: Sender<InboundEvent>,
    next_session: Arc<AtomicU64>,
    shutdown: Arc<AtomicBool>,
    local_addr: Option<SocketAddr>,
}

impl Transport {
    /// Transport without a listener.
    pub fn loopback() -> Self {
        let (sender, inbound) = unbounded();
        Self {
            inbound,
            sender,
            next_session: Arc::new(AtomicU64::new(0)),
            shutdown: Arc::new(AtomicBool::new(false)),
            local_addr: None,
        }
    }

    /// Bind `bind` and accept connections on a background thread.
    pub fn listen(bind: SocketAddr, max_frame_len: u32) -> io::Result<Self> {
        let listener = TcpListener::bind(bind)?;
        listener.set_nonblocking(true)?;
        let mut transport = Self::loopback();
        transport.local_addr = Some(listener.local_addr()?);

        let sender = transport.sender.clone();
        let next_session = Arc::clone(&transport.next_session);
        let shutdown = Arc::clone(&transport.shutdown);
        thread::Builder::new()
            .name("dungeon-accept".into())
            .spawn(move || accept_loop(listener, sender, next_session, shutdown, max_frame_len))?;

        tracing::info!(
            target: "dungeon::transport",
            bind = ?transport.local_addr,
            "transport.listening"
        );
        Ok(transport)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn try_recv(&self) -> Option<InboundEvent> {
        match self.inbound.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Everything received so far, in arrival order.
    pub fn drain(&self) -> Vec<InboundEvent> {
        self.inbound.try_iter().collect()
    }

    /// In-process session. Messages go through the same encode/decode path as
    /// TCP frames so codec errors surface as [`InboundEvent::Malformed`].
    pub fn connect_loopback(&self) -> LoopbackClient {
        let session = allocate_session(&self.next_session);
        let queue = NotificationQueue::new();
        // the receiver lives in `self`, so sends cannot fail
        let _ = self.sender.send(InboundEvent::Connected {
            session,
            queue: queue.clone(),
            peer: None,
        });
        LoopbackClient {
            session,
            queue,
            sender: self.sender.clone(),
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn allocate_session(counter: &AtomicU64) -> SessionId {
    SessionId(counter.fetch_add(1, Ordering::SeqCst) + 1)
}

/// Client end of an in-process session.
pub struct LoopbackClient {
    session: SessionId,
    queue: NotificationQueue,
    sender: Sender<InboundEvent>,
}

impl LoopbackClient {
    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn send(&self, notification: &ClientNotification) {
        self.send_bytes(notification.encode().as_bytes());
    }

    pub fn send_bytes(&self, bytes: &[u8]) {
        let event = match ClientNotification::decode(bytes) {
            Ok(notification) => InboundEvent::Message {
                session: self.session,
                notification,
            },
            Err(error) => InboundEvent::Malformed {
                session: self.session,
                error: error.into(),
            },
        };
        let _ = self.sender.send(event);
    }

    /// Next notification already queued for this client, if any.
    pub fn try_recv(&self) -> Option<ServerNotification> {
        match self.queue.pop_timeout(Duration::ZERO) {
            Popped::Frame(frame) => ServerNotification::decode(frame.as_bytes()).ok(),
            Popped::Empty | Popped::Closed => None,
        }
    }

    pub fn drain(&self) -> Vec<ServerNotification> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }

    pub fn disconnect(&self) {
        let _ = self.sender.send(InboundEvent::Disconnected {
            session: self.session,
            reason: Some("client closed".into()),
        });
    }
}

fn accept_loop(
    listener: TcpListener,
    sender: Sender<InboundEvent>,
    next_session: Arc<AtomicU64>,
    shutdown: Arc<AtomicBool>,
    max_frame_len: u32,
) {
    while !shutdown.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                let session = allocate_session(&next_session);
                if let Err(err) = spawn_session(stream, peer, session, &sender, max_frame_len) {
                    tracing::warn!(
                        target: "dungeon::transport",
                        %peer,
                        error = %err,
                        "session.setup_failed"
                    );
                }
            }
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL);
            }
            Err(err) => {
                tracing::warn!(target: "dungeon::transport", error = %err, "transport.accept_failed");
                thread::sleep(ACCEPT_POLL * 10);
            }
        }
    }
    tracing::debug!(target: "dungeon::transport", "transport.accept_stopped");
}

fn spawn_session(
    stream: TcpStream,
    peer: SocketAddr,
    session: SessionId,
    sender: &Sender<InboundEvent>,
    max_frame_len: u32,
) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_nodelay(true)?;
    let reader = stream.try_clone()?;
    let queue = NotificationQueue::new();

    let writer_queue = queue.clone();
    thread::Builder::new()
        .name(format!("dungeon-write-{session}"))
        .spawn(move || writer_loop(stream, writer_queue, session))?;

    // Connected must be on the channel before the reader can push anything
    tracing::info!(target: "dungeon::transport", session = %session, %peer, "session.connected");
    let _ = sender.send(InboundEvent::Connected {
        session,
        queue: queue.clone(),
        peer: Some(peer),
    });

    let reader_sender = sender.clone();
    let spawned = thread::Builder::new()
        .name(format!("dungeon-read-{session}"))
        .spawn(move || reader_loop(reader, reader_sender, session, max_frame_len));
    if let Err(err) = spawned {
        queue.close();
        let _ = sender.send(InboundEvent::Disconnected {
            session,
            reason: Some(err.to_string()),
        });
        return Err(err);
    }
    Ok(())
}

fn reader_loop(
    mut stream: TcpStream,
    sender: Sender<InboundEvent>,
    session: SessionId,
    max_frame_len: u32,
) {
    let event = loop {
        match read_frame(&mut stream, max_frame_len) {
            Ok(Some(bytes)) => match ClientNotification::decode(&bytes) {
                Ok(notification) => {
                    if sender
                        .send(InboundEvent::Message {
                            session,
                            notification,
                        })
                        .is_err()
                    {
                        return;
                    }
                }
                Err(error) => {
                    break InboundEvent::Malformed {
                        session,
                        error: error.into(),
                    };
                }
            },
            Ok(None) => {
                break InboundEvent::Disconnected {
                    session,
                    reason: None,
                };
            }
            Err(error @ TransportError::FrameTooLarge { .. }) => {
                break InboundEvent::Malformed {
                    session,
                    error: error.into(),
                };
            }
            Err(error) => {
                break InboundEvent::Disconnected {
                    session,
                    reason: Some(error.to_string()),
                };
            }
        }
    };
    let _ = sender.send(event);
}

fn writer_loop(mut stream: TcpStream, queue: NotificationQueue, session: SessionId) {
    loop {
        match queue.pop_timeout(WRITER_POLL) {
            Popped::Frame(frame) => {
                let written = write_frame(&mut stream, frame.as_bytes())
                    .and_then(|()| queue.drain_and_send(&mut stream).map(|_| ()))
                    .and_then(|()| stream.flush());
                if let Err(err) = written {
                    tracing::debug!(
                        target: "dungeon::transport",
                        session = %session,
                        error = %err,
                        "session.write_failed"
                    );
                    break;
                }
            }
            Popped::Empty => continue,
            Popped::Closed => {
                let _ = queue.drain_and_send(&mut stream);
                let _ = stream.flush();
                break;
            }
        }
    }
    let _ = stream.shutdown(Shutdown::Both);
}

#[cfg(test)]
mod tests {
    use super::*;
    use dungeon_proto::{Frame, PROTOCOL_VERSION};
    use std::io::Read;
    use std::time::Instant;

    fn next_event(transport: &Transport) -> InboundEvent {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(event) = transport.try_recv() {
                return event;
            }
            assert!(Instant::now() < deadline, "no inbound event");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn loopback_messages_pass_through_the_codec() {
        let transport = Transport::loopback();
        let client = transport.connect_loopback();
        client.send(&ClientNotification::Hello {
            version: PROTOCOL_VERSION.into(),
        });
        let mut bad = Frame::new();
        bad.write(&999i32);
        client.send_bytes(bad.as_bytes());

        let events = transport.drain();
        assert!(matches!(events[0], InboundEvent::Connected { .. }));
        assert!(matches!(
            &events[1],
            InboundEvent::Message {
                notification: ClientNotification::Hello { .. },
                ..
            }
        ));
        match &events[2] {
            InboundEvent::Malformed { error, .. } => assert_eq!(error.tag(), Some(999)),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn tcp_session_reads_frames_and_writes_queue() {
        let transport = Transport::listen("127.0.0.1:0".parse().unwrap(), 1024).unwrap();
        let addr = transport.local_addr().unwrap();
        let mut stream = TcpStream::connect(addr).unwrap();

        let (session, queue) = match next_event(&transport) {
            InboundEvent::Connected { session, queue, .. } => (session, queue),
            other => panic!("unexpected event {other:?}"),
        };
        write_frame(&mut stream, ClientNotification::LevelOk.encode().as_bytes()).unwrap();
        match next_event(&transport) {
            InboundEvent::Message {
                session: from,
                notification,
            } => {
                assert_eq!(from, session);
                assert_eq!(notification, ClientNotification::LevelOk);
            }
            other => panic!("unexpected event {other:?}"),
        }

        queue
            .enqueue_notification(&ServerNotification::TurnStarted { turn: 7 })
            .unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let bytes = read_frame(&mut stream, 1024).unwrap().unwrap();
        assert_eq!(
            ServerNotification::decode(&bytes).unwrap(),
            ServerNotification::TurnStarted { turn: 7 }
        );

        queue.close();
        let mut rest = Vec::new();
        let _ = stream.read_to_end(&mut rest);
        assert!(matches!(
            next_event(&transport),
            InboundEvent::Disconnected { .. }
        ));
    }

    #[test]
    fn oversized_frames_are_malformed() {
        let transport = Transport::listen("127.0.0.1:0".parse().unwrap(), 16).unwrap();
        let mut stream = TcpStream::connect(transport.local_addr().unwrap()).unwrap();
        let _ = next_event(&transport);
        write_frame(&mut stream, &[0u8; 64]).unwrap();
        assert!(matches!(
            next_event(&transport),
            InboundEvent::Malformed {
                error: ProtocolError::Transport(TransportError::FrameTooLarge { .. }),
                ..
            }
        ));
    }

    #[test]
    fn hello_written_on_connect_arrives_after_connected() {
        let transport = Transport::listen("127.0.0.1:0".parse().unwrap(), 1024).unwrap();
        let addr = transport.local_addr().unwrap();
        let hello = ClientNotification::Hello {
            version: PROTOCOL_VERSION.into(),
        }
        .encode();

        let clients = 64;
        let streams: Vec<TcpStream> = (0..clients)
            .map(|_| {
                let mut stream = TcpStream::connect(addr).unwrap();
                write_frame(&mut stream, hello.as_bytes()).unwrap();
                stream
            })
            .collect();

        let mut connected = std::collections::BTreeSet::new();
        let mut greeted = 0;
        while greeted < clients {
            match next_event(&transport) {
                InboundEvent::Connected { session, .. } => {
                    connected.insert(session);
                }
                InboundEvent::Message { session, .. } => {
                    assert!(connected.contains(&session), "hello from {session} before connect");
                    greeted += 1;
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert_eq!(connected.len(), clients);
        drop(streams);
    }
}
