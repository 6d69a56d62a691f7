//! Match session manager - room lifecycle and in-match relay

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::store::rooms::Seat;
use crate::store::{ProfileStore, Room, RoomId, RoomState, RoomStore, StoreError, UserId};
use crate::ws::protocol::{validate_balls, BallState, ServerMsg, Shot};

use super::error::SessionError;
use super::registry::{ConnectionHandle, ConnectionRegistry};
use super::relay::RelayChannel;

/// Orchestrates room creation, seat reservation, presence and turn relay.
///
/// The manager is the only writer of room state:
/// `Waiting --join--> Active --end_match--> Finished`.
pub struct MatchSessionManager {
    rooms: Arc<dyn RoomStore>,
    users: Arc<dyn ProfileStore>,
    connections: Arc<ConnectionRegistry>,
    relay: RelayChannel,
}

impl MatchSessionManager {
    pub fn new(
        rooms: Arc<dyn RoomStore>,
        users: Arc<dyn ProfileStore>,
        connections: Arc<ConnectionRegistry>,
    ) -> Self {
        let relay = RelayChannel::new(connections.clone());
        Self {
            rooms,
            users,
            connections,
            relay,
        }
    }

    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.connections
    }

    /// Reserve seat 1 of a new room. No connection is attached here; the
    /// creator attaches later with [`confirm_presence`](Self::confirm_presence).
    pub async fn create_room(&self, user_id: UserId) -> Result<RoomId, SessionError> {
        if !self.users.user_exists(user_id).await.map_err(storage_failure)? {
            warn!(user_id = %user_id, "Create room rejected: unknown user");
            return Err(SessionError::UnknownUser(user_id));
        }

        if let Some(room) = self
            .rooms
            .find_active_room_for_user(user_id)
            .await
            .map_err(storage_failure)?
        {
            warn!(user_id = %user_id, room_id = %room.room_id, "Create room rejected: user already seated");
            return Err(SessionError::AlreadyInRoom(user_id));
        }

        let room_id = self.rooms.create_room(user_id).await.map_err(storage_failure)?;
        info!(user_id = %user_id, room_id = %room_id, "Room created");
        Ok(room_id)
    }

    /// Take seat 2 of a waiting room and activate it
    pub async fn join_room(&self, user_id: UserId, room_id: RoomId) -> Result<Room, SessionError> {
        let joinable = self
            .rooms
            .get_room(room_id)
            .await
            .map_err(storage_failure)?
            .is_some_and(|room| room.state == RoomState::Waiting && room.player2_id.is_none());
        if !joinable {
            warn!(user_id = %user_id, room_id = %room_id, "Join rejected: room missing or full");
            return Err(SessionError::RoomNotFound(room_id));
        }

        if !self.users.user_exists(user_id).await.map_err(storage_failure)? {
            warn!(user_id = %user_id, room_id = %room_id, "Join rejected: unknown user");
            return Err(SessionError::UnknownUser(user_id));
        }

        if let Some(open) = self
            .rooms
            .find_active_room_for_user(user_id)
            .await
            .map_err(storage_failure)?
        {
            warn!(user_id = %user_id, room_id = %open.room_id, "Join rejected: user already seated");
            return Err(SessionError::AlreadyInRoom(user_id));
        }

        // The store write is conditional; a concurrent joiner may have won
        let room = self
            .rooms
            .assign_second_player(room_id, user_id)
            .await
            .map_err(storage_failure)?
            .ok_or_else(|| {
                warn!(user_id = %user_id, room_id = %room_id, "Join lost the seat race");
                SessionError::RoomNotFound(room_id)
            })?;

        info!(
            room_id = %room_id,
            player1_id = %room.player1_id,
            player2_id = %user_id,
            "Room active"
        );
        Ok(room)
    }

    /// Attach the caller's live connection to its reserved seat. Seat 1
    /// gets a private `ok`; seat 2 completes the pairing and the whole room
    /// receives `game_start`.
    pub async fn confirm_presence(
        &self,
        caller: &ConnectionHandle,
        room_id: RoomId,
    ) -> Result<(), SessionError> {
        let user_id = caller.user_id();
        let room = self
            .rooms
            .get_room(room_id)
            .await
            .map_err(storage_failure)?
            .ok_or(SessionError::RoomNotFound(room_id))?;

        if !room.is_open() {
            return Err(SessionError::NotParticipant(user_id));
        }
        let Some(seat) = room.seat_of(user_id) else {
            warn!(user_id = %user_id, room_id = %room_id, "Presence rejected: not seated");
            return Err(SessionError::NotParticipant(user_id));
        };

        if let Some(previous) = self.connections.set(caller.clone()) {
            debug!(
                user_id = %user_id,
                replaced = %previous.connection_id(),
                "Live connection replaced"
            );
        }

        match seat {
            Seat::First => {
                caller.notify(ServerMsg::PresenceConfirmed { room_id });
                info!(user_id = %user_id, room_id = %room_id, "Seat 1 present");
            }
            Seat::Second => {
                let start = ServerMsg::GameStart {
                    player1_id: room.player1_id,
                    player2_id: user_id,
                    room_id,
                };
                let delivered = self.relay.broadcast_room(&room, start);
                info!(room_id = %room_id, delivered, "Game started");
            }
        }
        Ok(())
    }

    /// Relay a strike to the opponent. Turn order is not enforced: either
    /// participant may shoot at any time.
    pub async fn shoot(
        &self,
        caller: &ConnectionHandle,
        angle: f64,
        power: f64,
    ) -> Result<(), SessionError> {
        let shot = Shot::new(angle, power)?;
        let (room, opponent) = self.active_opponent(caller.user_id()).await?;

        self.relay_to_opponent(
            &room,
            opponent,
            ServerMsg::OpponentHit {
                angle: shot.angle,
                power: shot.power,
            },
        )?;

        caller.notify(ServerMsg::ShootSuccess);
        debug!(room_id = %room.room_id, user_id = %caller.user_id(), "Shot relayed");
        Ok(())
    }

    /// Relay settled ball positions to the opponent. Positions are opaque.
    pub async fn send_position(
        &self,
        caller: &ConnectionHandle,
        balls: Vec<BallState>,
    ) -> Result<(), SessionError> {
        validate_balls(&balls)?;
        let (room, opponent) = self.active_opponent(caller.user_id()).await?;

        self.relay_to_opponent(&room, opponent, ServerMsg::OpponentPos { balls })?;

        caller.notify(ServerMsg::SendSuccess);
        debug!(room_id = %room.room_id, user_id = %caller.user_id(), "Positions relayed");
        Ok(())
    }

    /// Finish the caller's active room and record the result
    pub async fn end_match(
        &self,
        caller: &ConnectionHandle,
        winner_id: Option<UserId>,
    ) -> Result<(), SessionError> {
        let user_id = caller.user_id();
        let room = self.active_room_of(user_id).await?;

        if let Some(winner) = winner_id {
            if room.seat_of(winner).is_none() {
                return Err(SessionError::InvalidWinner(winner));
            }
        }

        if !self
            .rooms
            .finish_room(room.room_id)
            .await
            .map_err(storage_failure)?
        {
            // Someone else finished it first
            return Err(SessionError::NotParticipant(user_id));
        }

        info!(room_id = %room.room_id, winner_id = ?winner_id, "Room finished");
        self.relay.broadcast_room(
            &room,
            ServerMsg::GameOver {
                room_id: room.room_id,
                winner_id,
            },
        );

        for participant in room.participants() {
            let won = winner_id == Some(participant);
            if let Err(e) = self.users.record_result(participant, won).await {
                error!(user_id = %participant, error = %e, "Failed to record match result");
            }
        }
        Ok(())
    }

    /// Drop the caller's binding unless a newer connection replaced it
    pub fn disconnect(&self, caller: &ConnectionHandle) {
        if self
            .connections
            .remove_if_current(caller.user_id(), caller.connection_id())
        {
            debug!(user_id = %caller.user_id(), "Live connection released");
        }
    }

    async fn active_room_of(&self, user_id: UserId) -> Result<Room, SessionError> {
        self.rooms
            .find_active_room_for_user(user_id)
            .await
            .map_err(storage_failure)?
            .filter(|room| room.state == RoomState::Active)
            .ok_or(SessionError::NotParticipant(user_id))
    }

    async fn active_opponent(&self, user_id: UserId) -> Result<(Room, UserId), SessionError> {
        let room = self.active_room_of(user_id).await?;
        let opponent = room
            .opponent_of(user_id)
            .ok_or(SessionError::NotParticipant(user_id))?;
        Ok((room, opponent))
    }

    fn relay_to_opponent(
        &self,
        room: &Room,
        opponent: UserId,
        msg: ServerMsg,
    ) -> Result<(), SessionError> {
        self.relay.send_to(opponent, msg).map_err(|source| {
            warn!(room_id = %room.room_id, opponent = %opponent, error = %source, "Relay to opponent failed");
            SessionError::RelayTargetMissing {
                user_id: opponent,
                source,
            }
        })
    }
}

fn storage_failure(err: StoreError) -> SessionError {
    let err = SessionError::from(err);
    if err.is_internal() {
        error!(error = %err, "Storage operation failed");
    }
    err
}
