//! Connection handles.
//!
//! A [`ConnectionHandle`] is the only way the rest of the system talks to a
//! live socket. It owns the sending half of a bounded queue that a single
//! writer task drains, so every frame for one connection is written in the
//! order it was queued and never interleaved with another.

use murmur_protocol::{Envelope, ServerEvent, UserId};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Notify};

/// Counter backing [`ConnectionId::generate`].
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Create a connection ID from a raw value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Generate a process-unique connection ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw value.
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A frame queued for the writer task.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// An event, shared between every recipient of a broadcast.
    Event(Arc<Envelope>),
    /// A keepalive ping.
    Ping(Vec<u8>),
    /// Close the socket and stop writing.
    Close,
}

/// Receiving half handed to the writer task.
pub type OutboundReceiver = mpsc::Receiver<Outbound>;

/// Errors when queueing a frame for a connection.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    /// The writer task has stopped or the connection was closed.
    #[error("Connection closed")]
    Closed,

    /// The outbound queue is full; the peer is not draining it.
    #[error("Outbound queue full")]
    Full,
}

/// Shared close flag for a connection.
///
/// Triggering it wakes the receive loop waiting in [`CloseSignal::closed`].
#[derive(Debug, Clone, Default)]
pub struct CloseSignal {
    inner: Arc<CloseInner>,
}

#[derive(Debug, Default)]
struct CloseInner {
    closed: AtomicBool,
    notify: Notify,
}

impl CloseSignal {
    /// Mark the connection closed and wake its receive loop.
    pub fn trigger(&self) {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_one();
        }
    }

    /// Check if the signal has fired.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Wait until the signal fires.
    pub async fn closed(&self) {
        if self.is_triggered() {
            return;
        }
        self.inner.notify.notified().await;
    }
}

/// Handle to one live connection owned by one user session.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    user_id: UserId,
    tx: mpsc::Sender<Outbound>,
    close: CloseSignal,
}

impl ConnectionHandle {
    /// Create a handle with a fresh ID and a bounded outbound queue.
    ///
    /// Returns the handle and the receiver the writer task must drain.
    #[must_use]
    pub fn channel(user_id: UserId, capacity: usize) -> (Self, OutboundReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = Self {
            id: ConnectionId::generate(),
            user_id,
            tx,
            close: CloseSignal::default(),
        };
        (handle, rx)
    }

    /// Get the connection's unique identifier.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Get the user this connection is authenticated as.
    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Queue an envelope for this connection.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Closed`] if the connection is closing or its writer
    /// has stopped, and [`SendError::Full`] if the queue is at capacity.
    pub fn send(&self, envelope: Arc<Envelope>) -> Result<(), SendError> {
        self.enqueue(Outbound::Event(envelope))
    }

    /// Queue a single event for this connection.
    ///
    /// # Errors
    ///
    /// See [`ConnectionHandle::send`].
    pub fn send_event(&self, event: ServerEvent) -> Result<(), SendError> {
        self.send(Arc::new(Envelope::new(event)))
    }

    /// Queue a keepalive ping.
    ///
    /// # Errors
    ///
    /// See [`ConnectionHandle::send`].
    pub fn ping(&self, payload: Vec<u8>) -> Result<(), SendError> {
        self.enqueue(Outbound::Ping(payload))
    }

    /// Close the connection.
    ///
    /// Wakes the receive loop and asks the writer to send a close frame.
    /// Safe to call more than once.
    pub fn close(&self) {
        self.close.trigger();
        let _ = self.tx.try_send(Outbound::Close);
    }

    /// Check if the connection is closing or its writer has stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.close.is_triggered() || self.tx.is_closed()
    }

    /// Wait until the connection is closed by [`ConnectionHandle::close`].
    pub async fn closed(&self) {
        self.close.closed().await;
    }

    /// The close signal, for tasks that must not hold a sender.
    #[must_use]
    pub fn close_signal(&self) -> CloseSignal {
        self.close.clone()
    }

    fn enqueue(&self, frame: Outbound) -> Result<(), SendError> {
        if self.close.is_triggered() {
            return Err(SendError::Closed);
        }
        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::Full,
            mpsc::error::TrySendError::Closed(_) => SendError::Closed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_protocol::ErrorCode;
    use uuid::Uuid;

    #[test]
    fn test_connection_id_generation() {
        let id1 = ConnectionId::generate();
        let id2 = ConnectionId::generate();
        assert_ne!(id1, id2);
        assert!(id1.to_string().starts_with("conn-"));
    }

    #[tokio::test]
    async fn test_send_reaches_receiver_in_order() {
        let (handle, mut rx) = ConnectionHandle::channel(Uuid::new_v4(), 8);

        handle
            .send_event(ServerEvent::error(ErrorCode::Internal, "first"))
            .unwrap();
        handle.ping(vec![1]).unwrap();

        assert!(matches!(
            rx.recv().await,
            Some(Outbound::Event(env)) if env.event.name() == "error"
        ));
        assert!(matches!(rx.recv().await, Some(Outbound::Ping(p)) if p == vec![1]));
    }

    #[test]
    fn test_send_after_receiver_dropped() {
        let (handle, rx) = ConnectionHandle::channel(Uuid::new_v4(), 8);
        drop(rx);

        assert!(handle.is_closed());
        assert_eq!(handle.ping(vec![]), Err(SendError::Closed));
    }

    #[test]
    fn test_send_when_full() {
        let (handle, _rx) = ConnectionHandle::channel(Uuid::new_v4(), 1);
        handle.ping(vec![]).unwrap();
        assert_eq!(handle.ping(vec![]), Err(SendError::Full));
    }

    #[tokio::test]
    async fn test_close_wakes_waiter() {
        let (handle, _rx) = ConnectionHandle::channel(Uuid::new_v4(), 4);
        let waiter = handle.clone();
        let task = tokio::spawn(async move { waiter.closed().await });

        handle.close();
        handle.close();
        task.await.unwrap();

        assert!(handle.is_closed());
        assert_eq!(handle.ping(vec![]), Err(SendError::Closed));
    }
}
