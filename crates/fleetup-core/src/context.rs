//! ---
//! fu_section: "01-core-functionality"
//! fu_subsection: "module"
//! fu_type: "source"
//! fu_scope: "code"
//! fu_description: "Collaborators, request, and per-attempt context of an update."
//! fu_version: "v0.0.0-prealpha"
//! fu_owner: "tbd"
//! ---
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use fleetup_common::AppConfig;
use fleetup_metrics::AgentMetrics;
use fleetup_persistence::Store;
use tokio::sync::watch;

use crate::error::UpdateError;
use crate::gateway::{Collector, IdentityHandle};
use crate::metadata::TargetSource;
use crate::outbox::Outbox;
use crate::runtime::Runtime;
use crate::target::{Target, TargetSet};

/// How the caller picks the target to move to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Selector {
    /// Highest version offered; the only automatic selection.
    #[default]
    Latest,
    Version(i64),
    Name(String),
}

impl Selector {
    /// Parse a CLI argument: digits select a version, anything else a target name.
    pub fn parse(raw: &str) -> Self {
        match raw.parse::<i64>() {
            Ok(version) => Self::Version(version),
            Err(_) => Self::Name(raw.to_string()),
        }
    }

    pub fn is_automatic(&self) -> bool {
        matches!(self, Self::Latest)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latest => f.write_str("latest"),
            Self::Version(version) => write!(f, "version {version}"),
            Self::Name(name) => write!(f, "target {name}"),
        }
    }
}

/// Whether an attempt starts fresh or continues an in-flight update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolutionMode {
    #[default]
    Start,
    Resume,
}

/// Caller input for one update attempt.
#[derive(Debug, Clone, Default)]
pub struct UpdateRequest {
    pub selector: Selector,
    /// Ask the target source for a server round trip.
    pub refresh: bool,
    /// Targets automatic selection must avoid.
    pub known_bad: HashSet<String>,
}

impl UpdateRequest {
    pub fn new(selector: Selector) -> Self {
        Self {
            selector,
            ..Self::default()
        }
    }

    pub fn refreshed(mut self) -> Self {
        self.refresh = true;
        self
    }

    pub fn avoiding(mut self, known_bad: HashSet<String>) -> Self {
        self.known_bad = known_bad;
        self
    }
}

/// State carried between the phases of one attempt.
#[derive(Debug, Clone)]
pub struct UpdateContext {
    pub request: UpdateRequest,
    pub targets: TargetSet,
    pub from: Target,
    pub to: Target,
    pub mode: ResolutionMode,
    pub correlation_id: String,
}

impl UpdateContext {
    pub fn new(request: UpdateRequest) -> Self {
        Self {
            request,
            targets: TargetSet::default(),
            from: Target::unknown(),
            to: Target::unknown(),
            mode: ResolutionMode::Start,
            correlation_id: String::new(),
        }
    }

    /// `<to-id>|<correlation-id>` for the runtime update of this attempt.
    pub fn client_ref(&self) -> String {
        format!("{}|{}", self.to.id, self.correlation_id)
    }
}

/// Device-level settings the phases consult.
#[derive(Debug, Clone)]
pub struct UpdateSettings {
    pub ecu_serial: String,
    /// `None` enables every app; an empty list enables none.
    pub enabled_apps: Option<Vec<String>>,
    pub report_init: bool,
    pub max_start_attempts: u32,
}

impl UpdateSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            ecu_serial: config.device.ecu_serial().to_string(),
            enabled_apps: config.device.enabled_apps.clone(),
            report_init: config.events.report_init,
            max_start_attempts: config.daemon.max_start_attempts,
        }
    }
}

impl Default for UpdateSettings {
    fn default() -> Self {
        Self {
            ecu_serial: "local".to_string(),
            enabled_apps: None,
            report_init: false,
            max_start_attempts: 3,
        }
    }
}

/// Collaborators shared by every attempt.
pub struct UpdateEnv {
    pub runtime: Arc<dyn Runtime>,
    pub source: Arc<dyn TargetSource>,
    pub collector: Arc<dyn Collector>,
    pub store: Store,
    pub outbox: Outbox,
    pub identity: IdentityHandle,
    pub settings: UpdateSettings,
    pub metrics: Option<AgentMetrics>,
}

impl UpdateEnv {
    pub fn new(
        runtime: Arc<dyn Runtime>,
        source: Arc<dyn TargetSource>,
        collector: Arc<dyn Collector>,
        store: Store,
        identity: IdentityHandle,
        settings: UpdateSettings,
    ) -> Self {
        let outbox = Outbox::new(store.clone(), collector.clone());
        Self {
            runtime,
            source,
            collector,
            store,
            outbox,
            identity,
            settings,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: AgentMetrics) -> Self {
        self.outbox = self.outbox.with_metrics(metrics.clone());
        self.metrics = Some(metrics);
        self
    }
}

impl fmt::Debug for UpdateEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateEnv")
            .field("store", &self.store)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Sender side of a [`CancelSignal`].
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Cooperative cancellation observed by phases and the daemon loop.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    pub fn pair() -> (CancelHandle, Self) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle { tx }, Self { rx })
    }

    /// A signal that never fires.
    pub fn never() -> Self {
        Self::pair().1
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested; pends forever if it cannot be.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Drive `fut` unless cancellation arrives first.
    pub async fn race<F: Future>(&self, fut: F) -> Result<F::Output, UpdateError> {
        if self.is_cancelled() {
            return Err(UpdateError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(UpdateError::Cancelled),
            output = fut => Ok(output),
        }
    }
}
