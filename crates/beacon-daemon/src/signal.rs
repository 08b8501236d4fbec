//! OS signal bridging.
//!
//! SIGTERM and SIGINT latch a shutdown flag that stays set; SIGHUP is a
//! repeatable reload request. Both are also broadcast to subscribers.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{broadcast, watch};
use tracing::{debug, info};

use crate::error::SupervisorError;

/// Lifecycle signal delivered to the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonSignal {
    /// Graceful shutdown (SIGTERM, SIGINT).
    Shutdown,
    /// Reload configuration (SIGHUP).
    Reload,
}

impl std::fmt::Display for DaemonSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            DaemonSignal::Shutdown => "shutdown",
            DaemonSignal::Reload => "reload",
        })
    }
}

/// Fans OS signals out to the daemon.
#[derive(Clone)]
pub struct SignalHandler {
    events: broadcast::Sender<DaemonSignal>,
    stopping: Arc<watch::Sender<bool>>,
    reloads: Arc<AtomicU64>,
}

impl SignalHandler {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        let (stopping, _) = watch::channel(false);
        Self {
            events,
            stopping: Arc::new(stopping),
            reloads: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DaemonSignal> {
        self.events.subscribe()
    }

    pub fn send(&self, signal: DaemonSignal) {
        debug!("Lifecycle signal: {}", signal);
        match signal {
            DaemonSignal::Shutdown => {
                self.stopping.send_replace(true);
            }
            DaemonSignal::Reload => {
                self.reloads.fetch_add(1, Ordering::SeqCst);
            }
        }
        let _ = self.events.send(signal);
    }

    pub fn request_shutdown(&self) {
        self.send(DaemonSignal::Shutdown);
    }

    pub fn request_reload(&self) {
        self.send(DaemonSignal::Reload);
    }

    pub fn is_shutdown_requested(&self) -> bool {
        *self.stopping.borrow()
    }

    /// Reload requests received so far.
    pub fn reload_count(&self) -> u64 {
        self.reloads.load(Ordering::SeqCst)
    }

    /// Resolves once shutdown has been requested, including before the call.
    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.stopping.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|stopping| *stopping).await;
    }

    /// Install SIGTERM, SIGINT and SIGHUP handlers.
    #[cfg(unix)]
    pub fn setup_os_signals(&self) -> Result<(), SupervisorError> {
        use tokio::signal::unix::{Signal, SignalKind, signal};

        fn listen(kind: SignalKind) -> Result<Signal, SupervisorError> {
            signal(kind).map_err(|e| SupervisorError::SignalSetup(e.to_string()))
        }

        let mut sigterm = listen(SignalKind::terminate())?;
        let mut sigint = listen(SignalKind::interrupt())?;
        let mut sighup = listen(SignalKind::hangup())?;

        let handler = self.clone();
        tokio::spawn(async move {
            loop {
                let signal = tokio::select! {
                    Some(()) = sigterm.recv() => {
                        info!("Received SIGTERM");
                        DaemonSignal::Shutdown
                    }
                    Some(()) = sigint.recv() => {
                        info!("Received SIGINT");
                        DaemonSignal::Shutdown
                    }
                    Some(()) = sighup.recv() => {
                        info!("Received SIGHUP, reloading configuration");
                        DaemonSignal::Reload
                    }
                    else => break,
                };
                handler.send(signal);
            }
        });

        info!("OS signal handlers installed (SIGTERM, SIGINT, SIGHUP)");
        Ok(())
    }

    /// Install the Ctrl+C handler.
    #[cfg(not(unix))]
    pub fn setup_os_signals(&self) -> Result<(), SupervisorError> {
        let handler = self.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received Ctrl+C");
                handler.request_shutdown();
            }
        });

        info!("OS signal handlers installed (Ctrl+C only)");
        Ok(())
    }
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_signal_display() {
        assert_eq!(DaemonSignal::Shutdown.to_string(), "shutdown");
        assert_eq!(DaemonSignal::Reload.to_string(), "reload");
    }

    #[test]
    fn test_reload_is_counted_and_does_not_stop() {
        let handler = SignalHandler::new();
        handler.request_reload();
        handler.request_reload();
        assert_eq!(handler.reload_count(), 2);
        assert!(!handler.is_shutdown_requested());

        handler.request_shutdown();
        assert!(handler.is_shutdown_requested());
    }

    #[tokio::test]
    async fn test_every_subscriber_sees_reload() {
        let handler = SignalHandler::new();
        let mut first = handler.subscribe();
        let mut second = handler.clone().subscribe();

        handler.send(DaemonSignal::Reload);

        assert_eq!(first.recv().await.unwrap(), DaemonSignal::Reload);
        assert_eq!(second.recv().await.unwrap(), DaemonSignal::Reload);
    }

    #[tokio::test]
    async fn test_wait_for_shutdown_ignores_reload() {
        let handler = SignalHandler::new();
        let waiter = {
            let handler = handler.clone();
            tokio::spawn(async move { handler.wait_for_shutdown().await })
        };
        tokio::task::yield_now().await;

        handler.request_reload();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        handler.request_shutdown();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter did not finish")
            .unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_requested_earlier_is_not_missed() {
        let handler = SignalHandler::new();
        handler.request_shutdown();
        tokio::time::timeout(Duration::from_millis(100), handler.wait_for_shutdown())
            .await
            .unwrap();
    }
}
