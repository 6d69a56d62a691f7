//! Match session subsystem: room lifecycle, live connections and relay

pub mod error;
pub mod manager;
pub mod registry;
pub mod relay;

pub use error::SessionError;
pub use manager::MatchSessionManager;
pub use registry::{ConnectionHandle, ConnectionRegistry};
pub use relay::{RelayChannel, RelayError};
