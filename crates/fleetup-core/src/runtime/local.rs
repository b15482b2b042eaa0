//! ---
//! fu_section: "01-core-functionality"
//! fu_subsection: "module"
//! fu_type: "source"
//! fu_scope: "code"
//! fu_description: "File-backed runtime delegating workload actions to a hook program."
//! fu_version: "v0.0.0-prealpha"
//! fu_owner: "tbd"
//! ---
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use fleetup_persistence::{load_state, save_state, PersistenceError};
use fs2::FileExt;
use parking_lot::Mutex;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{AppsStatus, Runtime, RuntimeError, UpdateLedger, UpdateStatus};
use crate::target::AppRef;

const STATE_FILE: &str = "state.json";
const LOCK_FILE: &str = "lock";

/// Runtime that keeps its update state in a hashed JSON file.
///
/// Workload actions are delegated to an optional hook invoked as
/// `<hook> <fetch|install|start|stop> <uri>...`; without a hook the runtime
/// only does bookkeeping.
#[derive(Debug)]
pub struct LocalRuntime {
    state_path: PathBuf,
    hook: Option<PathBuf>,
    ledger: Mutex<UpdateLedger>,
    // Holds the exclusive flock; `None` for a read-only view.
    lock: Option<File>,
}

impl LocalRuntime {
    /// Open the runtime rooted at `directory`, taking its exclusive lock.
    ///
    /// A state file that fails to parse or verify is moved aside to
    /// `state.corrupt` and the runtime starts from an empty ledger.
    pub fn open(directory: &Path, hook: Option<PathBuf>) -> Result<Self, RuntimeError> {
        fs::create_dir_all(directory)?;
        let lock = acquire_lock(&directory.join(LOCK_FILE))?;
        let state_path = directory.join(STATE_FILE);
        let ledger = match read_ledger(&state_path) {
            Err(RuntimeError::State(
                err @ (PersistenceError::Json(_) | PersistenceError::HashMismatch),
            )) => {
                let quarantine = state_path.with_extension("corrupt");
                warn!(
                    path = %state_path.display(),
                    moved_to = %quarantine.display(),
                    error = %err,
                    "runtime state unreadable; starting from an empty ledger"
                );
                fs::rename(&state_path, &quarantine)?;
                UpdateLedger::default()
            }
            other => other?,
        };
        debug!(path = %state_path.display(), "local runtime opened");
        Ok(Self {
            state_path,
            hook,
            ledger: Mutex::new(ledger),
            lock: Some(lock),
        })
    }

    /// Snapshot of the runtime state for readers such as `status`.
    ///
    /// Takes no lock, so it works while a daemon owns the runtime; every
    /// mutating operation fails with [`RuntimeError::ReadOnly`].
    pub fn open_read_only(directory: &Path) -> Result<Self, RuntimeError> {
        let state_path = directory.join(STATE_FILE);
        let ledger = read_ledger(&state_path)?;
        Ok(Self {
            state_path,
            hook: None,
            ledger: Mutex::new(ledger),
            lock: None,
        })
    }

    fn mutate<T>(
        &self,
        op: impl FnOnce(&mut UpdateLedger) -> Result<T, RuntimeError>,
    ) -> Result<T, RuntimeError> {
        if self.lock.is_none() {
            return Err(RuntimeError::ReadOnly);
        }
        let mut ledger = self.ledger.lock();
        let value = op(&mut ledger)?;
        save_state(&*ledger, &self.state_path)?;
        Ok(value)
    }

    async fn run_hook(&self, action: &'static str, uris: &[String]) -> Result<(), RuntimeError> {
        let Some(hook) = &self.hook else {
            return Ok(());
        };
        if uris.is_empty() {
            return Ok(());
        }
        debug!(hook = %hook.display(), action, apps = uris.len(), "invoking runtime hook");
        let status = Command::new(hook).arg(action).args(uris).status().await?;
        if status.success() {
            Ok(())
        } else {
            Err(RuntimeError::Operation {
                op: action,
                message: format!("hook exited with {status}"),
            })
        }
    }

    async fn staged(
        &self,
        action: &'static str,
        begin: fn(&mut UpdateLedger) -> Result<Vec<String>, RuntimeError>,
        finish: fn(&mut UpdateLedger, bool) -> Result<(), RuntimeError>,
    ) -> Result<(), RuntimeError> {
        let uris = self.mutate(begin)?;
        let outcome = self.run_hook(action, &uris).await;
        self.mutate(|ledger| finish(ledger, outcome.is_ok()))?;
        outcome
    }
}

#[async_trait]
impl Runtime for LocalRuntime {
    async fn current_update(&self) -> Result<Option<UpdateStatus>, RuntimeError> {
        Ok(self.ledger.lock().current_status())
    }

    async fn last_successful_update(&self) -> Result<Option<UpdateStatus>, RuntimeError> {
        Ok(self.ledger.lock().last_successful())
    }

    async fn new_update(&self, client_ref: &str) -> Result<UpdateStatus, RuntimeError> {
        let status = self.mutate(|ledger| Ok(ledger.create(client_ref)))?;
        info!(client_ref, "runtime update created");
        Ok(status)
    }

    async fn init(&self, app_uris: &[String]) -> Result<(), RuntimeError> {
        self.mutate(|ledger| ledger.init(app_uris))
    }

    async fn fetch(&self) -> Result<(), RuntimeError> {
        self.staged("fetch", UpdateLedger::begin_fetch, UpdateLedger::finish_fetch)
            .await
    }

    async fn install(&self) -> Result<(), RuntimeError> {
        self.staged(
            "install",
            UpdateLedger::begin_install,
            UpdateLedger::finish_install,
        )
        .await
    }

    async fn start(&self) -> Result<(), RuntimeError> {
        self.staged("start", UpdateLedger::begin_start, UpdateLedger::finish_start)
            .await
    }

    async fn cancel(&self) -> Result<(), RuntimeError> {
        self.mutate(UpdateLedger::cancel)
    }

    async fn complete(&self, prune: bool) -> Result<(), RuntimeError> {
        self.mutate(|ledger| ledger.complete(prune))
    }

    async fn stop_apps(&self, app_uris: &[String]) -> Result<(), RuntimeError> {
        self.run_hook("stop", app_uris).await?;
        self.mutate(|ledger| {
            ledger.stop(app_uris);
            Ok(())
        })
    }

    async fn apps_status(&self, apps: &[AppRef]) -> Result<AppsStatus, RuntimeError> {
        Ok(self.ledger.lock().apps_status(apps))
    }
}

fn read_ledger(state_path: &Path) -> Result<UpdateLedger, RuntimeError> {
    if state_path.exists() {
        Ok(load_state(state_path)?)
    } else {
        Ok(UpdateLedger::default())
    }
}

/// Take an exclusive advisory lock on `path`; the kernel drops it with the process.
fn acquire_lock(path: &Path) -> Result<File, RuntimeError> {
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)?;
    match file.try_lock_exclusive() {
        Ok(()) => Ok(file),
        Err(err) if is_contended(&err) => Err(RuntimeError::Locked(path.to_path_buf())),
        Err(err) => Err(err.into()),
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}
