//! A single live WebSocket connection as seen by the Hub.
//!
//! The socket itself stays with the handler task; the Hub and Broadcaster
//! only hold this handle, which carries the bounded outbound queue and a
//! close signal.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::domain::foundation::{ClientId, Timestamp, UserId};

static NEXT_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// A serialized outbound frame, shared by every recipient of one broadcast.
pub type Frame = Arc<str>;

/// Why a frame could not be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// The queue is at capacity: the consumer is too slow.
    #[error("send queue is full")]
    Full,

    /// The connection was already closed.
    #[error("connection is closed")]
    Closed,
}

/// Handle to a registered connection.
#[derive(Debug)]
pub struct Client {
    id: ClientId,
    user_id: UserId,
    sequence: u64,
    sender: mpsc::Sender<Frame>,
    closed: CancellationToken,
    connected_at: Timestamp,
}

impl Client {
    /// Creates a client handle and the receiving end of its send queue.
    ///
    /// The writer task owns the receiver and should stop once
    /// [`Client::closed`] resolves.
    pub fn new(user_id: UserId, queue_capacity: usize) -> (Arc<Self>, mpsc::Receiver<Frame>) {
        let (sender, receiver) = mpsc::channel(queue_capacity.max(1));
        let client = Arc::new(Self {
            id: ClientId::new(),
            user_id,
            sequence: NEXT_SEQUENCE.fetch_add(1, Ordering::Relaxed),
            sender,
            closed: CancellationToken::new(),
            connected_at: Timestamp::now(),
        });
        (client, receiver)
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn connected_at(&self) -> Timestamp {
        self.connected_at
    }

    /// How long the connection has been open.
    pub fn connected_for(&self) -> Duration {
        let millis = Timestamp::now().as_unix_millis() - self.connected_at.as_unix_millis();
        Duration::from_millis(millis.max(0) as u64)
    }

    /// Process-wide creation order; a higher value is a newer connection.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Queues a frame without waiting.
    pub fn try_send(&self, frame: Frame) -> Result<(), SendError> {
        if self.closed.is_cancelled() {
            return Err(SendError::Closed);
        }
        self.sender.try_send(frame).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => SendError::Full,
            mpsc::error::TrySendError::Closed(_) => SendError::Closed,
        })
    }

    /// Signals the writer task to stop. Idempotent.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.sender.is_closed()
    }

    /// Resolves once the connection has been closed.
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }
}
