//! Application state shared across routes

use std::sync::Arc;

use tracing::warn;

use crate::config::Config;
use crate::session::{ConnectionRegistry, MatchSessionManager};
use crate::store::{
    MemoryProfileStore, MemoryRoomStore, ProfileStore, RoomStore, SupabaseClient,
    SupabaseProfileStore, SupabaseRoomStore,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub profiles: Arc<dyn ProfileStore>,
    pub connections: Arc<ConnectionRegistry>,
    pub sessions: Arc<MatchSessionManager>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        // Pick storage backend
        let (rooms, profiles): (Arc<dyn RoomStore>, Arc<dyn ProfileStore>) =
            match &config.supabase {
                Some(supabase) => {
                    let client = SupabaseClient::new(supabase);
                    (
                        Arc::new(SupabaseRoomStore::new(client.clone())),
                        Arc::new(SupabaseProfileStore::new(client)),
                    )
                }
                None => {
                    warn!("SUPABASE_URL not set, using in-memory stores (state is lost on restart)");
                    // No user directory to consult: token subjects register themselves
                    (
                        Arc::new(MemoryRoomStore::new()),
                        Arc::new(MemoryProfileStore::registering()),
                    )
                }
            };

        Self::with_stores(config, rooms, profiles)
    }

    /// Build state around explicit store implementations
    pub fn with_stores(
        config: Config,
        rooms: Arc<dyn RoomStore>,
        profiles: Arc<dyn ProfileStore>,
    ) -> Self {
        let config = Arc::new(config);

        // Initialize connection registry
        let connections = Arc::new(ConnectionRegistry::new());

        // Initialize session manager
        let sessions = Arc::new(MatchSessionManager::new(
            rooms,
            profiles.clone(),
            connections.clone(),
        ));

        Self {
            config,
            profiles,
            connections,
            sessions,
        }
    }
}
