//! ---
//! fu_section: "11-test-harness"
//! fu_subsection: "module"
//! fu_type: "source"
//! fu_scope: "code"
//! fu_description: "Test harness fakes, fixtures and shared exports."
//! fu_version: "v0.0.0-prealpha"
//! fu_owner: "tbd"
//! ---
//! Fakes for the collaborators of the update engine plus fixtures that wire
//! them into an [`UpdateEnv`] over a throwaway SQLite store.

use std::sync::Arc;

use anyhow::Result;
use fleetup_core::{
    AppRef, Attempt, CancelSignal, IdentityHandle, Selector, Target, TargetSet, UpdateCommand,
    UpdateEnv, UpdateRequest, UpdateRunner, UpdateSettings,
};
use fleetup_persistence::Store;
use tempfile::TempDir;

pub mod collector;
pub mod runtime;
pub mod source;

pub use collector::RecordingCollector;
pub use runtime::{FakeRuntime, RuntimeOp};
pub use source::StaticTargetSource;

/// Registry URI of `name` as shipped with target `version`.
pub fn app_uri(name: &str, version: i64) -> String {
    format!("hub.fleetup.test/factory/{name}@sha256:{version:064x}")
}

pub fn app(name: &str, version: i64) -> AppRef {
    AppRef::new(name, app_uri(name, version))
}

/// Target `id` at `version` whose apps were all built for that version.
pub fn target(id: &str, version: i64, apps: &[&str]) -> Target {
    let mut target = Target::new(
        id,
        version,
        apps.iter().map(|name| app(name, version)).collect(),
    );
    target.sha256 = format!("{:064x}", version + 0x1000);
    target.length = 1024 * apps.len() as u64;
    target
}

pub fn target_set(targets: Vec<Target>) -> TargetSet {
    TargetSet::new(1, targets)
}

/// A fully wired engine over fakes and a temporary store.
pub struct Harness {
    pub dir: TempDir,
    pub runtime: Arc<FakeRuntime>,
    pub collector: Arc<RecordingCollector>,
    pub source: Arc<StaticTargetSource>,
    pub store: Store,
    pub env: Arc<UpdateEnv>,
}

impl Harness {
    pub fn new(targets: TargetSet) -> Result<Self> {
        Self::with_settings(targets, UpdateSettings::default())
    }

    pub fn with_settings(targets: TargetSet, settings: UpdateSettings) -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let store = Store::open(&dir.path().join("sql.db"))?;
        let runtime = Arc::new(FakeRuntime::new());
        let collector = Arc::new(RecordingCollector::new());
        let source = Arc::new(StaticTargetSource::new(targets));
        let env = Arc::new(UpdateEnv::new(
            runtime.clone(),
            source.clone(),
            collector.clone(),
            store.clone(),
            IdentityHandle::new(),
            settings,
        ));
        Ok(Self {
            dir,
            runtime,
            collector,
            source,
            store,
            env,
        })
    }

    /// A fresh environment over the same store, runtime and fakes, as after a reboot.
    pub fn restart(&self) -> Arc<UpdateEnv> {
        Arc::new(UpdateEnv::new(
            self.runtime.clone(),
            self.source.clone(),
            self.collector.clone(),
            self.store.clone(),
            IdentityHandle::new(),
            self.env.settings.clone(),
        ))
    }

    pub fn runner(&self) -> UpdateRunner {
        UpdateRunner::new(self.env.clone())
    }

    pub async fn run(&self, command: UpdateCommand, selector: Selector) -> Attempt {
        self.runner()
            .run(command, UpdateRequest::new(selector), &CancelSignal::never())
            .await
    }
}

impl std::fmt::Debug for Harness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Harness")
            .field("dir", &self.dir.path())
            .field("env", &self.env)
            .finish_non_exhaustive()
    }
}
