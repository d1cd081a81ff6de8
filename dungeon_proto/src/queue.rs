//! Per-session FIFO of encoded notifications awaiting transmission.

use std::collections::VecDeque;
use std::io::{self, Write};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;

use crate::frame::Frame;
use crate::notification::Notification;
use crate::stream::write_frame;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("notification queue is closed")]
pub struct QueueClosed;

/// Result of a blocking pop.
#[derive(Debug, PartialEq, Eq)]
pub enum Popped {
    Frame(Frame),
    Empty,
    Closed,
}

#[derive(Default)]
struct QueueState {
    frames: VecDeque<Frame>,
    closed: bool,
    enqueued: u64,
}

#[derive(Default)]
struct Shared {
    state: Mutex<QueueState>,
    ready: Condvar,
}

/// Cloneable handle; every clone refers to the same queue.
#[derive(Clone, Default)]
pub struct NotificationQueue {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for NotificationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("NotificationQueue")
            .field("pending", &state.frames.len())
            .field("closed", &state.closed)
            .finish()
    }
}

impl NotificationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an encoded notification to the back of the queue.
    pub fn enqueue(&self, frame: Frame) -> Result<(), QueueClosed> {
        let mut state = self.lock();
        if state.closed {
            return Err(QueueClosed);
        }
        state.frames.push_back(frame);
        state.enqueued += 1;
        drop(state);
        self.shared.ready.notify_one();
        Ok(())
    }

    pub fn enqueue_notification<N: Notification>(&self, notification: &N) -> Result<(), QueueClosed> {
        self.enqueue(notification.encode())
    }

    pub fn try_pop(&self) -> Option<Frame> {
        self.lock().frames.pop_front()
    }

    /// Wait up to `timeout` for the next frame. Frames queued before
    /// [`close`](Self::close) are still handed out.
    pub fn pop_timeout(&self, timeout: Duration) -> Popped {
        let mut state = self.lock();
        if state.frames.is_empty() && !state.closed {
            let (guard, _) = self
                .shared
                .ready
                .wait_timeout_while(state, timeout, |state| {
                    state.frames.is_empty() && !state.closed
                })
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
        match state.frames.pop_front() {
            Some(frame) => Popped::Frame(frame),
            None if state.closed => Popped::Closed,
            None => Popped::Empty,
        }
    }

    /// Pop every frame currently queued and write them, in order, as
    /// length-prefixed frames. Returns the number of frames written.
    pub fn drain_and_send<W: Write + ?Sized>(&self, writer: &mut W) -> io::Result<usize> {
        let frames: Vec<Frame> = self.lock().frames.drain(..).collect();
        for frame in &frames {
            write_frame(writer, frame.as_bytes())?;
        }
        writer.flush()?;
        Ok(frames.len())
    }

    /// Stop accepting new frames and wake any waiting consumer.
    pub fn close(&self) {
        self.lock().closed = true;
        self.shared.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of frames ever accepted.
    pub fn enqueued_total(&self) -> u64 {
        self.lock().enqueued
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::server::ServerNotification;
    use crate::stream::read_frame;

    #[test]
    fn drain_preserves_enqueue_order() {
        let queue = NotificationQueue::new();
        for turn in 1..=5 {
            queue
                .enqueue_notification(&ServerNotification::TurnStarted { turn })
                .unwrap();
        }
        let mut wire = Vec::new();
        assert_eq!(queue.drain_and_send(&mut wire).unwrap(), 5);
        assert!(queue.is_empty());

        let mut cursor = io::Cursor::new(wire);
        let mut turns = Vec::new();
        while let Some(payload) = read_frame(&mut cursor, 1024).unwrap() {
            match ServerNotification::decode(&payload).unwrap() {
                ServerNotification::TurnStarted { turn } => turns.push(turn),
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(turns, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn closed_queue_rejects_and_drains_remaining() {
        let queue = NotificationQueue::new();
        queue.enqueue(Frame::from_bytes(vec![1])).unwrap();
        queue.close();
        assert_eq!(queue.enqueue(Frame::new()), Err(QueueClosed));
        assert_eq!(
            queue.pop_timeout(Duration::from_millis(1)),
            Popped::Frame(Frame::from_bytes(vec![1]))
        );
        assert_eq!(queue.pop_timeout(Duration::from_millis(1)), Popped::Closed);
    }

    #[test]
    fn blocked_consumer_wakes_on_enqueue() {
        let queue = NotificationQueue::new();
        let consumer = queue.clone();
        let handle = thread::spawn(move || consumer.pop_timeout(Duration::from_secs(5)));
        queue.enqueue(Frame::from_bytes(vec![7])).unwrap();
        assert_eq!(
            handle.join().unwrap(),
            Popped::Frame(Frame::from_bytes(vec![7]))
        );
    }

    #[test]
    fn empty_pop_times_out() {
        let queue = NotificationQueue::new();
        assert_eq!(queue.pop_timeout(Duration::from_millis(5)), Popped::Empty);
    }
}
