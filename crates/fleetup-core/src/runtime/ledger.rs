//! ---
//! fu_section: "01-core-functionality"
//! fu_subsection: "module"
//! fu_type: "source"
//! fu_scope: "code"
//! fu_description: "Bookkeeping state machine shared by runtime implementations."
//! fu_version: "v0.0.0-prealpha"
//! fu_owner: "tbd"
//! ---
use std::collections::BTreeSet;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::{AppStatus, AppsStatus, RuntimeError, RuntimeUpdateState, UpdateStatus};
use crate::target::AppRef;

use RuntimeUpdateState::*;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct LedgerUpdate {
    status: UpdateStatus,
    apps: Vec<String>,
}

/// Update progress and per-app content state of a runtime.
///
/// Long-running operations are split into `begin_*`/`finish_*` so the caller
/// can persist the intermediate state before doing the actual work.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateLedger {
    current: Option<LedgerUpdate>,
    last_successful: Option<LedgerUpdate>,
    fetched: BTreeSet<String>,
    installed: BTreeSet<String>,
    running: BTreeSet<String>,
}

impl UpdateLedger {
    pub fn current_status(&self) -> Option<UpdateStatus> {
        self.current.as_ref().map(|update| update.status.clone())
    }

    pub fn last_successful(&self) -> Option<UpdateStatus> {
        self.last_successful.as_ref().map(|update| update.status.clone())
    }

    pub fn create(&mut self, client_ref: &str) -> UpdateStatus {
        let status = UpdateStatus::created(client_ref);
        self.current = Some(LedgerUpdate {
            status: status.clone(),
            apps: Vec::new(),
        });
        status
    }

    pub fn init(&mut self, app_uris: &[String]) -> Result<(), RuntimeError> {
        let update = self.expect_state("init", &[Created, Initializing])?;
        update.apps = app_uris.to_vec();
        update.status.blobs = app_uris.len() as u32;
        transition(update, Initialized);
        Ok(())
    }

    pub fn begin_fetch(&mut self) -> Result<Vec<String>, RuntimeError> {
        let update = self.expect_state("fetch", &[Initialized, Fetching])?;
        transition(update, Fetching);
        Ok(update.apps.clone())
    }

    pub fn finish_fetch(&mut self, ok: bool) -> Result<(), RuntimeError> {
        let update = self.expect_state("fetch", &[Fetching])?;
        if ok {
            update.status.fetched_bytes = update.status.total_blobs_bytes;
            update.status.progress = 100;
            transition(update, Fetched);
            let apps = update.apps.clone();
            self.fetched.extend(apps);
        }
        Ok(())
    }

    pub fn begin_install(&mut self) -> Result<Vec<String>, RuntimeError> {
        let update = self.expect_state("install", &[Fetched, Installing])?;
        transition(update, Installing);
        Ok(update.apps.clone())
    }

    pub fn finish_install(&mut self, ok: bool) -> Result<(), RuntimeError> {
        let update = self.expect_state("install", &[Installing])?;
        if ok {
            transition(update, Installed);
            let apps = update.apps.clone();
            self.installed.extend(apps);
        }
        Ok(())
    }

    pub fn begin_start(&mut self) -> Result<Vec<String>, RuntimeError> {
        let update = self.expect_state("start", &[Installed, Starting, Started])?;
        if update.status.state != Started {
            transition(update, Starting);
        }
        Ok(update.apps.clone())
    }

    /// A failed start leaves the update's apps stopped.
    pub fn finish_start(&mut self, ok: bool) -> Result<(), RuntimeError> {
        let update = self.expect_state("start", &[Starting, Started])?;
        let apps = update.apps.clone();
        if ok {
            transition(update, Started);
            self.running.extend(apps);
        } else {
            self.running.retain(|uri| !apps.contains(uri));
        }
        Ok(())
    }

    pub fn complete(&mut self, prune: bool) -> Result<(), RuntimeError> {
        let update = self.expect_state("complete", &[Started, Completing])?;
        transition(update, Completed);
        self.last_successful = self.current.take();
        if prune {
            let running = self.running.clone();
            self.fetched.retain(|uri| running.contains(uri));
            self.installed.retain(|uri| running.contains(uri));
        }
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<(), RuntimeError> {
        let mut update = self.current.take().ok_or(RuntimeError::UpdateNotFound)?;
        transition(&mut update, Canceled);
        Ok(())
    }

    pub fn stop(&mut self, app_uris: &[String]) {
        self.running.retain(|uri| !app_uris.contains(uri));
    }

    pub fn apps_status(&self, apps: &[AppRef]) -> AppsStatus {
        AppsStatus {
            apps: apps
                .iter()
                .map(|app| AppStatus {
                    name: app.name.clone(),
                    uri: app.uri.clone(),
                    fetched: self.fetched.contains(&app.uri),
                    installed: self.installed.contains(&app.uri),
                    running: self.running.contains(&app.uri),
                    services: Vec::new(),
                })
                .collect(),
        }
    }

    /// URIs of every app currently running.
    pub fn running(&self) -> Vec<String> {
        self.running.iter().cloned().collect()
    }

    fn expect_state(
        &mut self,
        op: &'static str,
        allowed: &[RuntimeUpdateState],
    ) -> Result<&mut LedgerUpdate, RuntimeError> {
        let update = self.current.as_mut().ok_or(RuntimeError::UpdateNotFound)?;
        if !allowed.contains(&update.status.state) {
            return Err(RuntimeError::InvalidState {
                op,
                state: update.status.state,
            });
        }
        Ok(update)
    }
}

fn transition(update: &mut LedgerUpdate, state: RuntimeUpdateState) {
    update.status.state = state;
    update.status.update_time = Utc::now();
}
