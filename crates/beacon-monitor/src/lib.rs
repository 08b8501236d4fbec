//! # Beacon Monitor
//!
//! Availability checking and status-change notification.
//!
//! ## Components
//!
//! - [`SourceMonitor`]: one concurrent check task per source, transition
//!   detection, durable recording, fire-and-forget notification
//! - [`Checker`]: address probes, URL probes and heartbeat grace checks
//! - [`NotificationSink`]: delivery channels ([`LogSink`], [`TelegramSink`],
//!   [`WebhookSink`]) combined by [`SinkFanout`]
//! - [`retention`]: periodic purge of old status changes

pub mod checker;
pub mod error;
pub mod message;
pub mod monitor;
pub mod retention;
pub mod sink;
pub mod telegram;
pub mod webhook;

pub use checker::Checker;
pub use error::MonitorError;
pub use message::{humanize_duration, status_change_html};
pub use monitor::{MIN_CHECK_INTERVAL, SourceMonitor};
pub use sink::{LogSink, NotificationSink, SinkFanout, dispatch};
pub use telegram::TelegramSink;
pub use webhook::{WebhookPayload, WebhookSink};
