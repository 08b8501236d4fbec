//! One-off check command.

use std::sync::Arc;

use anyhow::bail;
use beacon_config::{BeaconConfig, ConfigStore};
use beacon_monitor::Checker;
use beacon_storage::{CheckKind, Repository, SourceStatus};

use crate::server::open_repository;

/// Check `target` once with the stored probe settings.
///
/// Falls back to environment and default settings when no database exists
/// yet, so probing never creates one.
pub(crate) async fn run_probe(
    config: &BeaconConfig,
    kind: &str,
    target: &str,
) -> anyhow::Result<SourceStatus> {
    let kind: CheckKind = kind.parse().map_err(anyhow::Error::msg)?;

    let repo = if config.storage.path.exists() {
        open_repository(config).await?
    } else {
        Repository::in_memory()
    };
    let store = Arc::new(ConfigStore::new(repo));
    store.load().await?;
    let checker = Checker::from_settings(&store.settings());

    let status = match kind {
        CheckKind::ProbeAddress => checker.probe_address(target).await,
        CheckKind::ProbeUrl => checker.probe_url(target).await,
        CheckKind::PassiveHeartbeat => {
            bail!("passive heartbeat sources report in on their own and cannot be probed")
        }
    };
    Ok(status)
}
