//! Daemon initialization and startup logic for Beacon.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use beacon_api::{ApiConfig, ApiServer, AppState};
use beacon_config::{BeaconConfig, ConfigStore, LoggingConfig};
use beacon_daemon::{DaemonSignal, NotifierLauncher, RestartCoordinator, SignalHandler, Supervisor};
use beacon_storage::{Repository, SqliteStore};

/// Initialize tracing with console and file output.
///
/// Log files rotate daily under the configured directory.
pub(crate) fn init_tracing(logging: &LoggingConfig) -> anyhow::Result<()> {
    std::fs::create_dir_all(&logging.dir)
        .with_context(|| format!("creating log directory {}", logging.dir.display()))?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(logging.file_prefix.as_str())
        .max_log_files(30)
        .build(&logging.dir)?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // The guard flushes the file writer on drop, so it lives as long as the process.
    static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
        std::sync::OnceLock::new();
    let _ = GUARD.set(guard);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true).with_ansi(true))
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    Ok(())
}

/// Console-only tracing for one-off commands.
pub(crate) fn init_console_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false))
        .init();
}

/// Open the database named by the bootstrap config.
pub(crate) async fn open_repository(config: &BeaconConfig) -> anyhow::Result<Repository> {
    let path = &config.storage.path;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating storage directory {}", parent.display()))?;
    }
    let store = SqliteStore::open(path)
        .await
        .with_context(|| format!("opening database {}", path.display()))?;
    info!("Storage opened at {}", path.display());
    Ok(Repository::new(Arc::new(store)))
}

/// Run the daemon in foreground until SIGTERM/SIGINT.
pub(crate) async fn run_server(config: BeaconConfig) -> anyhow::Result<()> {
    info!("Starting Beacon v{}", env!("CARGO_PKG_VERSION"));

    let repo = open_repository(&config).await?;
    let settings = Arc::new(ConfigStore::new(repo.clone()));
    settings.load().await.context("loading live configuration")?;

    let launcher = Arc::new(NotifierLauncher::new(repo.clone()));
    let supervisor = Arc::new(Supervisor::new(launcher, &config.supervisor));
    let coordinator = RestartCoordinator::new(supervisor.clone(), settings.clone());

    let cancel = CancellationToken::new();
    let config_listener = coordinator.spawn_listener(cancel.child_token());

    // Start failures do not abort the daemon: the supervisor reports them
    // through /health and retries on its own.
    supervisor.start(settings.settings()).await?;
    if !supervisor.is_healthy() {
        warn!(
            "Notifying process failed to start: {}",
            supervisor.last_error().unwrap_or_default()
        );
    }

    let signals = SignalHandler::new();
    signals.setup_os_signals()?;
    let reload_listener = spawn_reload_listener(&signals, coordinator.clone());

    let mut server_task = if config.server.enabled {
        let state = Arc::new(AppState::new(repo, settings.clone(), coordinator.clone()));
        let server = ApiServer::new(
            ApiConfig::new(config.server.host.clone(), config.server.port),
            state,
        );
        let shutdown = cancel.child_token();
        Some(tokio::spawn(async move {
            server.run(async move { shutdown.cancelled().await }).await
        }))
    } else {
        info!("API server disabled");
        None
    };

    info!("Beacon ready");

    let mut server_error = None;
    if let Some(mut task) = server_task.take() {
        let finished = tokio::select! {
            _ = signals.wait_for_shutdown() => None,
            finished = &mut task => Some(finished),
        };
        match finished {
            None => server_task = Some(task),
            Some(Ok(Ok(()))) => server_error = Some(anyhow::anyhow!("API server exited unexpectedly")),
            Some(Ok(Err(e))) => server_error = Some(anyhow::Error::new(e).context("API server failed")),
            Some(Err(e)) => server_error = Some(anyhow::Error::new(e).context("API server task failed")),
        }
    } else {
        signals.wait_for_shutdown().await;
    }

    info!("Shutting down...");
    cancel.cancel();
    supervisor.shutdown().await;
    reload_listener.abort();
    let _ = config_listener.await;
    if let Some(task) = server_task {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("API server error during shutdown: {}", e),
            Err(e) => error!("API server task failed: {}", e),
        }
    }

    info!("Beacon stopped ({} restarts)", coordinator.restart_count());
    match server_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Turn SIGHUP into a forced reload.
fn spawn_reload_listener(
    signals: &SignalHandler,
    coordinator: Arc<RestartCoordinator>,
) -> JoinHandle<()> {
    let mut rx = signals.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(DaemonSignal::Reload) => {
                    coordinator.force_reload();
                }
                Ok(DaemonSignal::Shutdown) | Err(RecvError::Closed) => break,
                Err(RecvError::Lagged(_)) => {}
            }
        }
    })
}
