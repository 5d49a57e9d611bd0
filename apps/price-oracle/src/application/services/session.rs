//! Connection Session
//!
//! A session is one client connection as seen by the dispatcher. Replies
//! and notifications are multiplexed onto one bounded outbound queue that
//! the transport drains. Queueing never blocks; a full queue closes the
//! session instead.
//!
//! Replies are correlated positionally: a payload's reply is queued before
//! the next payload of the same session is processed.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use crate::domain::instrument::PublisherKey;
use crate::domain::subscription::SessionId;

/// Observable session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Accepting requests and notifications.
    Connected,
    /// Terminal.
    Closed,
}

/// Result of queueing an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Message queued.
    Queued,
    /// Queue was full; the session has been closed.
    Overflow,
    /// Session already closed; message dropped.
    Closed,
}

/// Sending half of a session's outbound queue.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::Sender<String>,
    closed: CancellationToken,
}

impl Outbox {
    /// Queue a serialized message without waiting.
    pub fn deliver(&self, message: String) -> Delivery {
        if self.closed.is_cancelled() {
            return Delivery::Closed;
        }

        match self.tx.try_send(message) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(_)) => {
                self.closed.cancel();
                Delivery::Overflow
            }
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    /// Close the session.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Whether the session is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.tx.is_closed()
    }
}

/// Receiving half handed to the transport.
#[derive(Debug)]
pub struct SessionStream {
    /// Serialized outbound messages in queue order.
    pub messages: mpsc::Receiver<String>,
    /// Cancelled when the session must close.
    pub closed: CancellationToken,
}

/// Dispatcher-side view of a connection.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    publisher: Option<PublisherKey>,
    outbox: Outbox,
}

impl Session {
    /// Create a session and its outbound stream.
    #[must_use]
    pub fn new(
        id: SessionId,
        publisher: Option<PublisherKey>,
        capacity: usize,
    ) -> (Self, SessionStream) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let closed = CancellationToken::new();

        let session = Self {
            id,
            publisher,
            outbox: Outbox {
                tx,
                closed: closed.clone(),
            },
        };
        let stream = SessionStream {
            messages: rx,
            closed,
        };

        (session, stream)
    }

    /// Session identifier.
    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    /// Publisher identity presented at connect time.
    #[must_use]
    pub fn publisher(&self) -> Option<&str> {
        self.publisher.as_deref()
    }

    /// Outbound queue.
    #[must_use]
    pub const fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        if self.outbox.is_closed() {
            SessionState::Closed
        } else {
            SessionState::Connected
        }
    }

    /// Close the session.
    pub fn close(&self) {
        self.outbox.close();
    }
}
