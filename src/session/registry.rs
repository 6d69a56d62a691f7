//! Live connection registry: user identity -> current transport handle

use dashmap::DashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;
use uuid::Uuid;

use crate::store::UserId;
use crate::ws::protocol::ServerMsg;

use super::relay::RelayError;

/// Outbound side of one live connection
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    user_id: UserId,
    connection_id: Uuid,
    tx: mpsc::Sender<ServerMsg>,
}

impl ConnectionHandle {
    pub fn new(user_id: UserId, tx: mpsc::Sender<ServerMsg>) -> Self {
        Self {
            user_id,
            connection_id: Uuid::new_v4(),
            tx,
        }
    }

    /// Handle plus the receiver its writer task drains
    pub fn channel(user_id: UserId, capacity: usize) -> (Self, mpsc::Receiver<ServerMsg>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(user_id, tx), rx)
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    /// Queue a message for this connection without waiting for room in
    /// the outbound queue. A peer that stopped reading gets `Backlogged`.
    pub fn send(&self, msg: ServerMsg) -> Result<(), RelayError> {
        self.tx.try_send(msg).map_err(|err| match err {
            TrySendError::Full(_) => RelayError::Backlogged(self.user_id),
            TrySendError::Closed(_) => RelayError::Closed(self.user_id),
        })
    }

    /// Best-effort reply to this connection's own client
    pub fn notify(&self, msg: ServerMsg) {
        if let Err(e) = self.send(msg) {
            debug!(user_id = %self.user_id, error = %e, "Reply dropped");
        }
    }
}

/// Process-wide map of live connections. Writes for the same user are
/// last-writer-wins; only the newest connection receives relayed events.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<UserId, ConnectionHandle>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the handle to its user, returning the binding it replaced
    pub fn set(&self, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        self.connections.insert(handle.user_id, handle)
    }

    pub fn get(&self, user_id: UserId) -> Option<ConnectionHandle> {
        self.connections.get(&user_id).map(|r| r.value().clone())
    }

    pub fn remove(&self, user_id: UserId) -> Option<ConnectionHandle> {
        self.connections.remove(&user_id).map(|(_, handle)| handle)
    }

    /// Remove the binding only while it still points at `connection_id`
    pub fn remove_if_current(&self, user_id: UserId, connection_id: Uuid) -> bool {
        self.connections
            .remove_if(&user_id, |_, handle| handle.connection_id == connection_id)
            .is_some()
    }

    /// Number of bound users
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
