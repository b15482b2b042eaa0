//! ---
//! fu_section: "01-core-functionality"
//! fu_subsection: "module"
//! fu_type: "source"
//! fu_scope: "code"
//! fu_description: "Device status gathering and app state reports."
//! fu_version: "v0.0.0-prealpha"
//! fu_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::context::UpdateEnv;
use crate::error::UpdateError;
use crate::runtime::{AppsStatus, ServiceStatus, UpdateStatus};
use crate::target::Target;

/// Body of `POST /apps-states`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppsStatesReport {
    pub ostree: String,
    pub device_time: DateTime<Utc>,
    pub apps: BTreeMap<String, AppStateEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppStateEntry {
    pub uri: String,
    pub state: String,
    pub services: Vec<ServiceStatus>,
}

impl AppsStatesReport {
    pub fn new(host_hash: &str, status: &AppsStatus) -> Self {
        let apps = status
            .apps
            .iter()
            .map(|app| {
                (
                    app.name.clone(),
                    AppStateEntry {
                        uri: app.uri.clone(),
                        state: app.state().to_string(),
                        services: app.services.clone(),
                    },
                )
            })
            .collect();
        Self {
            ostree: host_hash.to_string(),
            device_time: Utc::now(),
            apps,
        }
    }
}

/// Post the state of `target`'s apps to the collector; failures are logged only.
pub async fn report_apps_state(env: &UpdateEnv, target: &Target) {
    let status = match env.runtime.apps_status(&target.apps).await {
        Ok(status) => status,
        Err(err) => {
            warn!(target_id = %target.id, error = %err, "failed to read app status");
            return;
        }
    };
    let report = AppsStatesReport::new(&target.sha256, &status);
    match env.collector.post_apps_states(&report).await {
        Ok(()) => debug!(target_id = %target.id, apps = report.apps.len(), "apps state reported"),
        Err(err) => warn!(target_id = %target.id, error = %err, "failed to report apps state"),
    }
}

/// The target this device last started successfully, looked up in the cached target set.
pub async fn current_target(env: &UpdateEnv) -> Result<Option<Target>, UpdateError> {
    let Some(record) = env.store.current_install()? else {
        return Ok(None);
    };
    let targets = env.source.load_targets(false).await?;
    let target = targets
        .by_id(&record.name)
        .cloned()
        .unwrap_or_else(|| Target::new(record.name.clone(), -1, Vec::new()));
    Ok(Some(target.shortlist_apps(env.settings.enabled_apps.as_deref())))
}

/// Seed the advertised identity from local history; errors are logged only.
pub async fn restore_identity(env: &UpdateEnv) {
    match current_target(env).await {
        Ok(Some(target)) => env.identity.set_current(&target),
        Ok(None) => debug!("no installed target recorded yet"),
        Err(err) => warn!(error = %err, "failed to restore device identity"),
    }
}

/// Snapshot of what the device runs and what is queued.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceStatus {
    pub current: Option<Target>,
    pub in_flight: Option<UpdateStatus>,
    pub apps: AppsStatus,
    pub pending_events: u64,
    pub known_bad: Vec<String>,
}

impl DeviceStatus {
    pub async fn gather(env: &UpdateEnv, known_bad: Vec<String>) -> Result<Self, UpdateError> {
        let current = current_target(env).await?;
        let in_flight = env.runtime.current_update().await?;
        let apps = match &current {
            Some(target) => env.runtime.apps_status(&target.apps).await?,
            None => AppsStatus::default(),
        };
        Ok(Self {
            current,
            in_flight,
            apps,
            pending_events: env.outbox.pending()?,
            known_bad,
        })
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.current {
            Some(target) => writeln!(f, "Current target: {target}")?,
            None => writeln!(f, "Current target: none")?,
        }
        for app in &self.apps.apps {
            writeln!(f, "  {} ({}): {}", app.name, app.uri, app.state())?;
        }
        if let Some(update) = &self.in_flight {
            let to = update
                .client_ref()
                .map(|reference| reference.target_id)
                .unwrap_or_else(|| update.client_ref.clone());
            writeln!(f, "Update in progress: {to} [{}]", update.state)?;
        }
        writeln!(f, "Queued events: {}", self.pending_events)?;
        if !self.known_bad.is_empty() {
            writeln!(f, "Known bad targets: {}", self.known_bad.join(", "))?;
        }
        Ok(())
    }
}
