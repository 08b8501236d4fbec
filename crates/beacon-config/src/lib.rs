//! # Beacon Config
//!
//! Configuration management for Beacon.
//!
//! Two layers are kept apart:
//!
//! - [`BeaconConfig`]: bootstrap settings read once from `beacon.toml`
//!   (listen address, database path, log directory, supervisor timings)
//! - [`ConfigStore`]: live settings persisted in the database, changed at
//!   runtime and published to subscribers as [`ConfigChange`]s

mod duration;
mod error;
mod loader;
mod schema;
mod settings;
mod store;

pub use duration::{format_duration, parse_duration};
pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::*;
pub use settings::{AutoRestartSettings, Settings, is_secret, keys, mask_secret};
pub use store::{ConfigChange, ConfigStore};
