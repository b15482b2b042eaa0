//! ---
//! fu_section: "11-test-harness"
//! fu_subsection: "module"
//! fu_type: "source"
//! fu_scope: "code"
//! fu_description: "In-memory runtime with failure injection and call counters."
//! fu_version: "v0.0.0-prealpha"
//! fu_owner: "tbd"
//! ---
use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use fleetup_core::runtime::{AppsStatus, UpdateLedger};
use fleetup_core::{AppRef, Runtime, RuntimeError, UpdateStatus};
use parking_lot::Mutex;
use tracing::debug;

/// Runtime operations the fake counts and can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeOp {
    NewUpdate,
    Init,
    Fetch,
    Install,
    Start,
    Stop,
    Cancel,
    Complete,
}

impl RuntimeOp {
    fn label(self) -> &'static str {
        match self {
            Self::NewUpdate => "new_update",
            Self::Init => "init",
            Self::Fetch => "fetch",
            Self::Install => "install",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Cancel => "cancel",
            Self::Complete => "complete",
        }
    }
}

/// A [`Runtime`] backed by the same ledger the local runtime persists.
#[derive(Debug, Default)]
pub struct FakeRuntime {
    ledger: Mutex<UpdateLedger>,
    calls: Mutex<HashMap<RuntimeOp, usize>>,
    fail_next: Mutex<HashSet<RuntimeOp>>,
    broken_start: Mutex<HashSet<String>>,
    stopped: Mutex<Vec<Vec<String>>>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times `op` was invoked.
    pub fn calls(&self, op: RuntimeOp) -> usize {
        self.calls.lock().get(&op).copied().unwrap_or(0)
    }

    /// Make the next invocation of `op` fail.
    pub fn fail_next(&self, op: RuntimeOp) {
        self.fail_next.lock().insert(op);
    }

    /// Every start including `uri` fails until [`FakeRuntime::repair_start`].
    pub fn break_start(&self, uri: impl Into<String>) {
        self.broken_start.lock().insert(uri.into());
    }

    pub fn repair_start(&self, uri: &str) {
        self.broken_start.lock().remove(uri);
    }

    /// URI lists passed to `stop_apps`, in call order.
    pub fn stopped(&self) -> Vec<Vec<String>> {
        self.stopped.lock().clone()
    }

    pub fn running(&self) -> Vec<String> {
        self.ledger.lock().running()
    }

    pub fn ledger(&self) -> UpdateLedger {
        self.ledger.lock().clone()
    }

    /// Mutate the ledger directly, e.g. to stage a crash mid-update.
    pub fn with_ledger<R>(&self, f: impl FnOnce(&mut UpdateLedger) -> R) -> R {
        f(&mut *self.ledger.lock())
    }

    fn enter(&self, op: RuntimeOp) -> Result<(), RuntimeError> {
        *self.calls.lock().entry(op).or_default() += 1;
        if self.fail_next.lock().remove(&op) {
            debug!(op = op.label(), "injected runtime failure");
            return Err(injected(op));
        }
        Ok(())
    }
}

fn injected(op: RuntimeOp) -> RuntimeError {
    RuntimeError::Operation {
        op: op.label(),
        message: "injected failure".to_string(),
    }
}

#[async_trait]
impl Runtime for FakeRuntime {
    async fn current_update(&self) -> Result<Option<UpdateStatus>, RuntimeError> {
        Ok(self.ledger.lock().current_status())
    }

    async fn last_successful_update(&self) -> Result<Option<UpdateStatus>, RuntimeError> {
        Ok(self.ledger.lock().last_successful())
    }

    async fn new_update(&self, client_ref: &str) -> Result<UpdateStatus, RuntimeError> {
        self.enter(RuntimeOp::NewUpdate)?;
        Ok(self.ledger.lock().create(client_ref))
    }

    async fn init(&self, app_uris: &[String]) -> Result<(), RuntimeError> {
        self.enter(RuntimeOp::Init)?;
        self.ledger.lock().init(app_uris)
    }

    async fn fetch(&self) -> Result<(), RuntimeError> {
        let injected_failure = self.enter(RuntimeOp::Fetch).err();
        let mut ledger = self.ledger.lock();
        ledger.begin_fetch()?;
        ledger.finish_fetch(injected_failure.is_none())?;
        injected_failure.map_or(Ok(()), Err)
    }

    async fn install(&self) -> Result<(), RuntimeError> {
        let injected_failure = self.enter(RuntimeOp::Install).err();
        let mut ledger = self.ledger.lock();
        ledger.begin_install()?;
        ledger.finish_install(injected_failure.is_none())?;
        injected_failure.map_or(Ok(()), Err)
    }

    async fn start(&self) -> Result<(), RuntimeError> {
        let injected_failure = self.enter(RuntimeOp::Start).err();
        let broken = self.broken_start.lock().clone();
        let mut ledger = self.ledger.lock();
        let uris = ledger.begin_start()?;
        let failure = injected_failure.or_else(|| {
            uris.iter()
                .find(|uri| broken.contains(*uri))
                .map(|uri| RuntimeError::Operation {
                    op: "start",
                    message: format!("{uri} exited with status 1"),
                })
        });
        ledger.finish_start(failure.is_none())?;
        failure.map_or(Ok(()), Err)
    }

    async fn cancel(&self) -> Result<(), RuntimeError> {
        self.enter(RuntimeOp::Cancel)?;
        self.ledger.lock().cancel()
    }

    async fn complete(&self, prune: bool) -> Result<(), RuntimeError> {
        self.enter(RuntimeOp::Complete)?;
        self.ledger.lock().complete(prune)
    }

    async fn stop_apps(&self, app_uris: &[String]) -> Result<(), RuntimeError> {
        self.enter(RuntimeOp::Stop)?;
        self.stopped.lock().push(app_uris.to_vec());
        self.ledger.lock().stop(app_uris);
        Ok(())
    }

    async fn apps_status(&self, apps: &[AppRef]) -> Result<AppsStatus, RuntimeError> {
        Ok(self.ledger.lock().apps_status(apps))
    }
}
