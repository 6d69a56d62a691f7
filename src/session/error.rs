//! Session error taxonomy

use crate::store::{RoomId, StoreError, UserId};
use crate::ws::protocol::ValidationError;

use super::relay::RelayError;

/// Failures of match-session operations. Every failure leaves prior state
/// untouched and is reported to the caller only.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Invalid request: {0}")]
    Validation(#[from] ValidationError),

    #[error("User {0} already has an open room")]
    AlreadyInRoom(UserId),

    #[error("Unknown user {0}")]
    UnknownUser(UserId),

    /// Covers both a missing room and one whose second seat is taken
    #[error("Room {0} not found or full")]
    RoomNotFound(RoomId),

    #[error("User {0} is not seated in an active room")]
    NotParticipant(UserId),

    #[error("Winner {0} is not seated in the room")]
    InvalidWinner(UserId),

    #[error("Opponent {user_id} unreachable: {source}")]
    RelayTargetMissing {
        user_id: UserId,
        #[source]
        source: RelayError,
    },

    #[error("Storage failure: {0}")]
    Storage(StoreError),
}

impl SessionError {
    /// Stable code reported to clients
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::Validation(_) | SessionError::InvalidWinner(_) => "invalid_request",
            SessionError::AlreadyInRoom(_) => "already_in_room",
            SessionError::UnknownUser(_) => "unknown_user",
            SessionError::RoomNotFound(_) => "room_not_found",
            SessionError::NotParticipant(_) => "not_in_active_room",
            SessionError::RelayTargetMissing { .. } => "relay_target_missing",
            SessionError::Storage(_) => "server_error",
        }
    }

    /// Internal failure whose details must stay in the logs
    pub fn is_internal(&self) -> bool {
        matches!(self, SessionError::Storage(_))
    }
}

impl From<StoreError> for SessionError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UserAlreadySeated(user_id) => SessionError::AlreadyInRoom(user_id),
            other => SessionError::Storage(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seated_store_conflict_maps_to_already_in_room() {
        let err: SessionError = StoreError::UserAlreadySeated(4).into();
        assert!(matches!(err, SessionError::AlreadyInRoom(4)));
        assert_eq!(err.code(), "already_in_room");
    }

    #[test]
    fn storage_failures_are_internal() {
        let err: SessionError = StoreError::Contended("rooms").into();
        assert!(err.is_internal());
        assert_eq!(err.code(), "server_error");
        assert!(!SessionError::RoomNotFound(1).is_internal());
    }
}
