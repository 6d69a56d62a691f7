//! Event delivery to live connections: private sends and room broadcast

use std::sync::Arc;

use tracing::{debug, warn};

use crate::store::{Room, UserId};
use crate::ws::protocol::ServerMsg;

use super::registry::ConnectionRegistry;

/// Delivery failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    #[error("No live connection for user {0}")]
    NoConnection(UserId),

    #[error("Connection for user {0} is closed")]
    Closed(UserId),

    #[error("Outbound queue for user {0} is full")]
    Backlogged(UserId),
}

/// Addressable event transport backed by the connection registry
#[derive(Clone)]
pub struct RelayChannel {
    registry: Arc<ConnectionRegistry>,
}

impl RelayChannel {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Deliver to the user's current connection. Never waits on the
    /// receiver: a full outbound queue fails with `Backlogged`.
    pub fn send_to(&self, user_id: UserId, msg: ServerMsg) -> Result<(), RelayError> {
        let handle = self
            .registry
            .get(user_id)
            .ok_or(RelayError::NoConnection(user_id))?;

        match handle.send(msg) {
            Err(RelayError::Closed(_)) => {
                // Drop the dead binding unless a reconnect already replaced it
                self.registry
                    .remove_if_current(user_id, handle.connection_id());
                Err(RelayError::Closed(user_id))
            }
            other => other,
        }
    }

    /// Deliver to every seated participant with a live connection.
    /// Returns how many connections received the message.
    pub fn broadcast_room(&self, room: &Room, msg: ServerMsg) -> usize {
        let mut delivered = 0;
        for user_id in room.participants() {
            match self.send_to(user_id, msg.clone()) {
                Ok(()) => delivered += 1,
                Err(RelayError::NoConnection(_)) => {
                    debug!(room_id = %room.room_id, user_id = %user_id, "Participant not attached, skipping broadcast");
                }
                Err(err) => {
                    warn!(room_id = %room.room_id, user_id = %user_id, error = %err, "Broadcast delivery failed");
                }
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::registry::ConnectionHandle;
    use crate::store::RoomState;
    use chrono::Utc;

    fn active_room() -> Room {
        Room {
            room_id: 3,
            player1_id: 1,
            player2_id: Some(2),
            state: RoomState::Active,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn send_to_reaches_only_current_connection() {
        let registry = Arc::new(ConnectionRegistry::new());
        let relay = RelayChannel::new(registry.clone());
        let (stale, mut stale_rx) = ConnectionHandle::channel(1, 4);
        let (fresh, mut fresh_rx) = ConnectionHandle::channel(1, 4);
        registry.set(stale);
        registry.set(fresh);

        relay.send_to(1, ServerMsg::SendSuccess).unwrap();
        assert_eq!(fresh_rx.try_recv().unwrap(), ServerMsg::SendSuccess);
        assert!(stale_rx.try_recv().is_err());
    }

    #[test]
    fn missing_target_is_reported() {
        let relay = RelayChannel::new(Arc::new(ConnectionRegistry::new()));
        let err = relay.send_to(9, ServerMsg::ShootSuccess).unwrap_err();
        assert_eq!(err, RelayError::NoConnection(9));
    }

    #[test]
    fn closed_target_is_unbound() {
        let registry = Arc::new(ConnectionRegistry::new());
        let relay = RelayChannel::new(registry.clone());
        let (handle, rx) = ConnectionHandle::channel(1, 4);
        registry.set(handle);
        drop(rx);

        let err = relay.send_to(1, ServerMsg::ShootSuccess).unwrap_err();
        assert_eq!(err, RelayError::Closed(1));
        assert!(registry.get(1).is_none());
    }

    #[test]
    fn stalled_target_is_reported_and_kept() {
        let registry = Arc::new(ConnectionRegistry::new());
        let relay = RelayChannel::new(registry.clone());
        let (handle, _rx) = ConnectionHandle::channel(2, 1);
        registry.set(handle);

        relay.send_to(2, ServerMsg::ShootSuccess).unwrap();
        let err = relay.send_to(2, ServerMsg::ShootSuccess).unwrap_err();
        assert_eq!(err, RelayError::Backlogged(2));
        // a slow reader may still catch up
        assert!(registry.get(2).is_some());

        let delivered = relay.broadcast_room(&active_room(), ServerMsg::Pong { t: 7 });
        assert_eq!(delivered, 0);
    }

    #[test]
    fn broadcast_skips_unattached_seats() {
        let registry = Arc::new(ConnectionRegistry::new());
        let relay = RelayChannel::new(registry.clone());
        let (second, mut second_rx) = ConnectionHandle::channel(2, 4);
        registry.set(second);

        let delivered = relay.broadcast_room(&active_room(), ServerMsg::Pong { t: 1 });
        assert_eq!(delivered, 1);
        assert_eq!(second_rx.try_recv().unwrap(), ServerMsg::Pong { t: 1 });
    }
}
