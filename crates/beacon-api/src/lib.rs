//! # Beacon API
//!
//! HTTP surface of the daemon:
//! - **Heartbeats**: public endpoint passive sources report to
//! - **Health**: notifying process status for external checkers
//! - **Admin**: live configuration, forced reload and event history,
//!   guarded by `X-API-Key` when one is configured

pub mod error;
pub mod http;
pub mod server;
pub mod state;

pub use error::ApiError;
pub use http::create_router;
pub use server::{ApiConfig, ApiServer};
pub use state::AppState;
