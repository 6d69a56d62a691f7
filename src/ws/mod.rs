//! Real-time channel: wire protocol and WebSocket sessions

pub mod handler;
pub mod protocol;

pub use handler::ws_handler;
