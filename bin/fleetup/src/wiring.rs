//! ---
//! fu_section: "05-networking-external-interfaces"
//! fu_subsection: "binary"
//! fu_type: "source"
//! fu_scope: "code"
//! fu_description: "Builds the update engine collaborators from configuration."
//! fu_version: "v0.0.0-prealpha"
//! fu_owner: "tbd"
//! ---
use std::sync::Arc;

use anyhow::{Context, Result};
use fleetup_common::{AppConfig, MetadataMode, VersionInfo};
use fleetup_core::status::restore_identity;
use fleetup_core::{
    DeviceFilter, DeviceGateway, IdentityHandle, LocalRuntime, PlainTargetSource,
    SignedTargetSource, TargetSource, UpdateEnv, UpdateSettings,
};
use fleetup_metrics::AgentMetrics;
use fleetup_persistence::Store;
use tracing::debug;

/// How a command needs the local runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeAccess {
    /// Takes the runtime lock; required to drive updates.
    Exclusive,
    /// Lock-free snapshot, usable while the daemon runs.
    ReadOnly,
}

/// Assemble the update environment: gateway, metadata source, local runtime and store.
pub async fn build_env(
    config: &AppConfig,
    access: RuntimeAccess,
    metrics: Option<AgentMetrics>,
) -> Result<Arc<UpdateEnv>> {
    let version = VersionInfo::current();
    let identity = IdentityHandle::new();
    let gateway = Arc::new(
        DeviceGateway::new(
            config.server.base_url.clone(),
            config.server.request_timeout,
            &version.user_agent(),
            identity.clone(),
        )
        .context("failed to build the server client")?,
    );

    let filter = DeviceFilter {
        hardware_id: config.device.hardware_id.clone(),
        tags: config.device.tags.clone(),
    };
    let plain = PlainTargetSource::new(gateway.clone(), config.targets_cache_path(), filter);
    let source: Arc<dyn TargetSource> = match config.server.metadata {
        MetadataMode::Plain => Arc::new(plain),
        MetadataMode::Signed => {
            let key = config
                .server
                .signing_key
                .as_deref()
                .context("server.signing_key is required for signed metadata")?;
            Arc::new(SignedTargetSource::new(plain, key)?)
        }
    };

    let runtime_dir = config.runtime_directory();
    let runtime = match access {
        RuntimeAccess::Exclusive => LocalRuntime::open(&runtime_dir, config.runtime.hook.clone()),
        RuntimeAccess::ReadOnly => LocalRuntime::open_read_only(&runtime_dir),
    }
    .with_context(|| format!("failed to open runtime at {}", runtime_dir.display()))?;
    let store = Store::open(&config.database_path())
        .with_context(|| format!("failed to open {}", config.database_path().display()))?;
    debug!(storage = %config.storage.directory.display(), "update engine wired");

    let mut env = UpdateEnv::new(
        Arc::new(runtime),
        source,
        gateway,
        store,
        identity,
        UpdateSettings::from_config(config),
    );
    if let Some(metrics) = metrics {
        env = env.with_metrics(metrics);
    }
    restore_identity(&env).await;
    Ok(Arc::new(env))
}
