//! ---
//! fu_section: "01-core-functionality"
//! fu_subsection: "module"
//! fu_type: "source"
//! fu_scope: "code"
//! fu_description: "Interface to the workload fetch/install/run engine."
//! fu_version: "v0.0.0-prealpha"
//! fu_owner: "tbd"
//! ---
//! The runtime owns the durable, resumable progress of an update. The
//! orchestrator only reads [`RuntimeUpdateState`] and drives transitions
//! through the [`Runtime`] trait.

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleetup_persistence::PersistenceError;
use serde::{Deserialize, Serialize};

use crate::target::AppRef;

pub mod ledger;
pub mod local;

pub use ledger::UpdateLedger;
pub use local::LocalRuntime;

/// Progress of the runtime's in-flight update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuntimeUpdateState {
    Created,
    Initializing,
    Initialized,
    Fetching,
    Fetched,
    Installing,
    Installed,
    Starting,
    Started,
    Completing,
    Completed,
    Canceling,
    Canceled,
}

impl RuntimeUpdateState {
    /// True once the update reached `Completed` or `Canceled`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Canceled)
    }

    /// States a crashed attempt is resumed from rather than restarted.
    pub fn is_resumable(self) -> bool {
        matches!(
            self,
            Self::Initializing
                | Self::Initialized
                | Self::Fetching
                | Self::Fetched
                | Self::Installing
                | Self::Installed
                | Self::Starting
                | Self::Started
                | Self::Completing
        )
    }

    /// True for the states in which initialization has not finished.
    pub fn is_uninitialized(self) -> bool {
        matches!(self, Self::Created | Self::Initializing)
    }

    /// True once the update has fetched all of its content.
    pub fn is_fetched(self) -> bool {
        matches!(
            self,
            Self::Fetched
                | Self::Installing
                | Self::Installed
                | Self::Starting
                | Self::Started
                | Self::Completing
        )
    }

    /// True once the install step has finished.
    pub fn is_installed(self) -> bool {
        matches!(
            self,
            Self::Installed | Self::Starting | Self::Started | Self::Completing
        )
    }
}

impl fmt::Display for RuntimeUpdateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Status of a runtime update as reported by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatus {
    pub state: RuntimeUpdateState,
    pub client_ref: String,
    pub total_blobs_bytes: u64,
    pub fetched_bytes: u64,
    pub blobs: u32,
    pub progress: u8,
    pub creation_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

impl UpdateStatus {
    /// A freshly created update for `client_ref`.
    pub fn created(client_ref: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            state: RuntimeUpdateState::Created,
            client_ref: client_ref.into(),
            total_blobs_bytes: 0,
            fetched_bytes: 0,
            blobs: 0,
            progress: 0,
            creation_time: now,
            update_time: now,
        }
    }

    /// The parsed client reference, if it has the expected shape.
    pub fn client_ref(&self) -> Option<ClientRef> {
        ClientRef::parse(&self.client_ref)
    }
}

/// Correlation between a runtime update and the target it moves to.
///
/// Encoded as `<target-id>|<correlation-id>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRef {
    pub target_id: String,
    pub correlation_id: String,
}

impl ClientRef {
    pub fn new(target_id: impl Into<String>, correlation_id: impl Into<String>) -> Self {
        Self {
            target_id: target_id.into(),
            correlation_id: correlation_id.into(),
        }
    }

    /// Split an encoded reference; `None` when the separator is missing.
    pub fn parse(raw: &str) -> Option<Self> {
        let (target_id, correlation_id) = raw.split_once('|')?;
        if target_id.is_empty() {
            return None;
        }
        Some(Self::new(target_id, correlation_id))
    }
}

impl fmt::Display for ClientRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.target_id, self.correlation_id)
    }
}

/// Per-service health reported inside an app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub name: String,
    pub hash: String,
    pub state: String,
    pub status: String,
    pub health: String,
    pub image: String,
}

/// Local status of one app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppStatus {
    pub name: String,
    pub uri: String,
    pub fetched: bool,
    pub installed: bool,
    pub running: bool,
    #[serde(default)]
    pub services: Vec<ServiceStatus>,
}

impl AppStatus {
    /// Single word summary used by reports.
    pub fn state(&self) -> &'static str {
        if self.running {
            "running"
        } else if self.installed {
            "installed"
        } else if self.fetched {
            "fetched"
        } else {
            "missing"
        }
    }
}

/// Status of a set of apps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppsStatus {
    pub apps: Vec<AppStatus>,
}

impl AppsStatus {
    /// True when every queried app is running.
    pub fn all_running(&self) -> bool {
        self.apps.iter().all(|app| app.running)
    }
}

/// Errors raised by runtime implementations.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("no update in progress")]
    UpdateNotFound,
    #[error("runtime is locked by another instance ({0})")]
    Locked(PathBuf),
    #[error("runtime state is opened read-only")]
    ReadOnly,
    #[error("cannot {op} an update in state {state}")]
    InvalidState {
        op: &'static str,
        state: RuntimeUpdateState,
    },
    #[error("{op} failed: {message}")]
    Operation { op: &'static str, message: String },
    #[error("runtime io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("runtime state error: {0}")]
    State(#[from] PersistenceError),
}

/// The engine that fetches, installs and runs workload bundles.
///
/// Update operations act on the runtime's single current update.
#[async_trait]
pub trait Runtime: Send + Sync {
    /// The in-flight update, if any.
    async fn current_update(&self) -> Result<Option<UpdateStatus>, RuntimeError>;

    /// The last update that reached `Completed`.
    async fn last_successful_update(&self) -> Result<Option<UpdateStatus>, RuntimeError>;

    /// Create a new update, replacing any current one.
    async fn new_update(&self, client_ref: &str) -> Result<UpdateStatus, RuntimeError>;

    /// Initialize the current update with the app URIs it moves to.
    async fn init(&self, app_uris: &[String]) -> Result<(), RuntimeError>;

    async fn fetch(&self) -> Result<(), RuntimeError>;

    async fn install(&self) -> Result<(), RuntimeError>;

    async fn start(&self) -> Result<(), RuntimeError>;

    /// Abandon the current update.
    async fn cancel(&self) -> Result<(), RuntimeError>;

    /// Finish the current update, optionally dropping content of apps no longer running.
    async fn complete(&self, prune: bool) -> Result<(), RuntimeError>;

    async fn stop_apps(&self, app_uris: &[String]) -> Result<(), RuntimeError>;

    async fn apps_status(&self, apps: &[AppRef]) -> Result<AppsStatus, RuntimeError>;
}
