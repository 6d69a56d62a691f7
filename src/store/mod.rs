//! Data store modules: rooms, profiles and the Supabase client behind them

pub mod catalog;
pub mod profiles;
pub mod rooms;
pub mod supabase;

pub use catalog::{CueItem, PurchaseError, Wallet};
pub use profiles::{MemoryProfileStore, ProfileStore, SupabaseProfileStore, UserProfile};
pub use rooms::{MemoryRoomStore, Room, RoomState, RoomStore, SupabaseRoomStore};
pub use supabase::{SupabaseClient, SupabaseError};

/// Persistent user identifier, owned by the identity collaborator
pub type UserId = i64;

/// Room identifier assigned by the room store
pub type RoomId = i64;

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Supabase(#[from] SupabaseError),

    #[error("User {0} already occupies an open room")]
    UserAlreadySeated(UserId),

    #[error("Concurrent update on {0}")]
    Contended(&'static str),
}
