//! Room records and the persistence contract consumed by the session manager

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::supabase::SupabaseClient;
use super::{RoomId, StoreError, UserId};

const ROOMS_TABLE: &str = "rooms";

/// Room lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomState {
    /// Seat 1 reserved, seat 2 empty
    Waiting,
    /// Both seats filled
    Active,
    /// Terminal
    Finished,
}

/// One of the two player slots of a room
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seat {
    First,
    Second,
}

/// Durable room record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub room_id: RoomId,
    pub player1_id: UserId,
    pub player2_id: Option<UserId>,
    pub state: RoomState,
    pub created_at: DateTime<Utc>,
}

impl Room {
    /// Which seat, if any, the user occupies
    pub fn seat_of(&self, user_id: UserId) -> Option<Seat> {
        if self.player1_id == user_id {
            Some(Seat::First)
        } else if self.player2_id == Some(user_id) {
            Some(Seat::Second)
        } else {
            None
        }
    }

    /// The user sitting across from `user_id`
    pub fn opponent_of(&self, user_id: UserId) -> Option<UserId> {
        match self.seat_of(user_id)? {
            Seat::First => self.player2_id,
            Seat::Second => Some(self.player1_id),
        }
    }

    /// Seated users in seat order
    pub fn participants(&self) -> impl Iterator<Item = UserId> {
        std::iter::once(self.player1_id).chain(self.player2_id)
    }

    /// Not yet finished
    pub fn is_open(&self) -> bool {
        self.state != RoomState::Finished
    }
}

/// Persistence contract for rooms.
///
/// `assign_second_player` and `finish_room` are conditional writes: the
/// precondition check and the mutation must happen in one operation.
#[async_trait]
pub trait RoomStore: Send + Sync {
    /// The non-finished room seating this user, if any
    async fn find_active_room_for_user(&self, user_id: UserId)
        -> Result<Option<Room>, StoreError>;

    /// Insert a waiting room with `player1_id` in seat 1
    async fn create_room(&self, player1_id: UserId) -> Result<RoomId, StoreError>;

    async fn get_room(&self, room_id: RoomId) -> Result<Option<Room>, StoreError>;

    /// Fill seat 2 and activate the room. `Ok(None)` when the room does not
    /// exist, is not waiting, or seat 2 is already taken.
    async fn assign_second_player(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<Option<Room>, StoreError>;

    /// Move an active room to finished. `Ok(false)` when it was not active.
    async fn finish_room(&self, room_id: RoomId) -> Result<bool, StoreError>;
}

// ============================================================================
// In-memory backend
// ============================================================================

#[derive(Default)]
struct RoomTable {
    last_id: RoomId,
    rooms: BTreeMap<RoomId, Room>,
}

impl RoomTable {
    fn open_room_for(&self, user_id: UserId) -> Option<&Room> {
        self.rooms
            .values()
            .find(|room| room.is_open() && room.seat_of(user_id).is_some())
    }
}

/// Process-local room store. Every operation runs under one lock, which also
/// makes the one-open-room-per-user check atomic with the write.
#[derive(Default)]
pub struct MemoryRoomStore {
    table: Mutex<RoomTable>,
}

impl MemoryRoomStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rooms in any state
    pub fn len(&self) -> usize {
        self.table.lock().rooms.len()
    }

    #[cfg(test)]
    pub fn rooms(&self) -> Vec<Room> {
        self.table.lock().rooms.values().cloned().collect()
    }
}

#[async_trait]
impl RoomStore for MemoryRoomStore {
    async fn find_active_room_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Option<Room>, StoreError> {
        Ok(self.table.lock().open_room_for(user_id).cloned())
    }

    async fn create_room(&self, player1_id: UserId) -> Result<RoomId, StoreError> {
        let mut table = self.table.lock();
        if table.open_room_for(player1_id).is_some() {
            return Err(StoreError::UserAlreadySeated(player1_id));
        }

        table.last_id += 1;
        let room_id = table.last_id;
        table.rooms.insert(
            room_id,
            Room {
                room_id,
                player1_id,
                player2_id: None,
                state: RoomState::Waiting,
                created_at: Utc::now(),
            },
        );
        Ok(room_id)
    }

    async fn get_room(&self, room_id: RoomId) -> Result<Option<Room>, StoreError> {
        Ok(self.table.lock().rooms.get(&room_id).cloned())
    }

    async fn assign_second_player(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<Option<Room>, StoreError> {
        let mut table = self.table.lock();

        let seat_free = matches!(
            table.rooms.get(&room_id),
            Some(room) if room.state == RoomState::Waiting && room.player2_id.is_none()
        );
        if !seat_free {
            return Ok(None);
        }
        if table.open_room_for(user_id).is_some() {
            return Err(StoreError::UserAlreadySeated(user_id));
        }

        let Some(room) = table.rooms.get_mut(&room_id) else {
            return Ok(None);
        };
        room.player2_id = Some(user_id);
        room.state = RoomState::Active;
        Ok(Some(room.clone()))
    }

    async fn finish_room(&self, room_id: RoomId) -> Result<bool, StoreError> {
        let mut table = self.table.lock();
        match table.rooms.get_mut(&room_id) {
            Some(room) if room.state == RoomState::Active => {
                room.state = RoomState::Finished;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

// ============================================================================
// Supabase backend
// ============================================================================

/// New room for insertion
#[derive(Debug, Serialize)]
struct NewRoom {
    player1_id: UserId,
    state: RoomState,
}

#[derive(Debug, Serialize)]
struct SeatUpdate {
    player2_id: UserId,
    state: RoomState,
}

#[derive(Debug, Serialize)]
struct StateUpdate {
    state: RoomState,
}

/// Rooms persisted in the `rooms` table through PostgREST
#[derive(Clone)]
pub struct SupabaseRoomStore {
    client: SupabaseClient,
}

impl SupabaseRoomStore {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RoomStore for SupabaseRoomStore {
    async fn find_active_room_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Option<Room>, StoreError> {
        let query = format!(
            "or=(player1_id.eq.{user},player2_id.eq.{user})&state=neq.finished&order=room_id.desc&limit=1",
            user = user_id
        );
        let rooms: Vec<Room> = self.client.get(ROOMS_TABLE, &query).await?;
        Ok(rooms.into_iter().next())
    }

    async fn create_room(&self, player1_id: UserId) -> Result<RoomId, StoreError> {
        let room: Room = self
            .client
            .insert(
                ROOMS_TABLE,
                &NewRoom {
                    player1_id,
                    state: RoomState::Waiting,
                },
            )
            .await?;
        Ok(room.room_id)
    }

    async fn get_room(&self, room_id: RoomId) -> Result<Option<Room>, StoreError> {
        let query = format!("room_id=eq.{}", room_id);
        Ok(self.client.get_one(ROOMS_TABLE, &query).await?)
    }

    async fn assign_second_player(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<Option<Room>, StoreError> {
        let query = format!(
            "room_id=eq.{}&player2_id=is.null&state=eq.waiting",
            room_id
        );
        let update = SeatUpdate {
            player2_id: user_id,
            state: RoomState::Active,
        };
        let rooms: Vec<Room> = self
            .client
            .update_returning(ROOMS_TABLE, &query, &update)
            .await?;
        if rooms.is_empty() {
            debug!(room_id = %room_id, "Seat assignment precondition failed");
        }
        Ok(rooms.into_iter().next())
    }

    async fn finish_room(&self, room_id: RoomId) -> Result<bool, StoreError> {
        let query = format!("room_id=eq.{}&state=eq.active", room_id);
        let rooms: Vec<Room> = self
            .client
            .update_returning(
                ROOMS_TABLE,
                &query,
                &StateUpdate {
                    state: RoomState::Finished,
                },
            )
            .await?;
        Ok(!rooms.is_empty())
    }
}
