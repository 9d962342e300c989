//! Outbound delivery.
//!
//! Each session owns a bounded queue drained by a writer task that owns the
//! session's outbound QUIC stream. Delivery never waits on a peer: frames are
//! offered with `try_send`, and a full queue is handled by the configured
//! [`BroadcastPolicy`]. A stalled client therefore cannot hold up the driver
//! lock or other recipients.

use std::collections::HashMap;

use bytes::Bytes;
use parlor_core::SessionId;
use tokio::sync::{RwLock, mpsc};

use crate::server_error::ExecutorError;

/// Default per-session queue capacity, in frames.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// What to do when a recipient's outbound queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BroadcastPolicy {
    /// Drop the frame for that recipient and log it.
    #[default]
    DropEvent,

    /// Close the slow connection.
    Disconnect,
}

/// Per-session outbound queues.
#[derive(Debug)]
pub struct OutboundRegistry {
    queues: RwLock<HashMap<SessionId, mpsc::Sender<Bytes>>>,
    capacity: usize,
    policy: BroadcastPolicy,
}

impl OutboundRegistry {
    /// Create a registry. A capacity of 0 is raised to 1.
    pub fn new(capacity: usize, policy: BroadcastPolicy) -> Self {
        Self { queues: RwLock::new(HashMap::new()), capacity: capacity.max(1), policy }
    }

    /// Create the queue for a session and return its receiving end.
    ///
    /// Registering an id again replaces the old queue; its receiver sees the
    /// channel close.
    pub async fn register(&self, session_id: SessionId) -> mpsc::Receiver<Bytes> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.queues.write().await.insert(session_id, tx);
        rx
    }

    /// Drop a session's queue. The writer drains what is left and exits.
    pub async fn unregister(&self, session_id: SessionId) -> bool {
        self.queues.write().await.remove(&session_id).is_some()
    }

    /// Offer one encoded frame to one session.
    ///
    /// # Errors
    ///
    /// - `ExecutorError::QueueFull` if the queue is at capacity
    /// - `ExecutorError::SendFailed` if the session has no live queue
    pub async fn deliver(&self, session_id: SessionId, frame: Bytes) -> Result<(), ExecutorError> {
        let queues = self.queues.read().await;
        let Some(tx) = queues.get(&session_id) else {
            return Err(ExecutorError::SendFailed {
                session_id,
                reason: "no outbound queue".to_string(),
            });
        };

        tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ExecutorError::QueueFull(session_id),
            mpsc::error::TrySendError::Closed(_) => ExecutorError::SendFailed {
                session_id,
                reason: "writer exited".to_string(),
            },
        })
    }

    /// Offer one encoded frame to many sessions.
    ///
    /// Failures affect only the failing recipient. Returns the sessions that
    /// must be closed under [`BroadcastPolicy::Disconnect`].
    pub async fn fan_out(&self, sessions: &[SessionId], frame: &Bytes) -> Vec<SessionId> {
        let mut slow = Vec::new();

        for &session_id in sessions {
            match self.deliver(session_id, frame.clone()).await {
                Ok(()) => {},
                Err(ExecutorError::QueueFull(_)) => match self.policy {
                    BroadcastPolicy::DropEvent => {
                        tracing::warn!(session_id, "outbound queue full, dropping event");
                    },
                    BroadcastPolicy::Disconnect => {
                        tracing::warn!(session_id, "outbound queue full, disconnecting");
                        slow.push(session_id);
                    },
                },
                Err(e) => tracing::debug!(session_id, error = %e, "delivery skipped"),
            }
        }

        slow
    }

    /// Number of registered sessions.
    pub async fn len(&self) -> usize {
        self.queues.read().await.len()
    }

    /// No registered sessions.
    pub async fn is_empty(&self) -> bool {
        self.queues.read().await.is_empty()
    }
}
