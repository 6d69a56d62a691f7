//! HTTP layer: request-style operations and identity middleware

pub mod middleware;
pub mod routes;

pub use routes::build_router;
