//! HTTP handlers and routing.

pub mod admin;
pub mod auth;
pub mod heartbeat;
pub mod monitoring;
pub mod routes;

pub use routes::create_router;
