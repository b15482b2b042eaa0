//! ---
//! fu_section: "01-core-functionality"
//! fu_subsection: "module"
//! fu_type: "source"
//! fu_scope: "code"
//! fu_description: "Error taxonomy for update attempts."
//! fu_version: "v0.0.0-prealpha"
//! fu_owner: "tbd"
//! ---
use fleetup_persistence::PersistenceError;

use crate::gateway::GatewayError;
use crate::metadata::MetadataError;
use crate::phases::PhaseName;
use crate::runtime::{RuntimeError, RuntimeUpdateState};

/// Errors surfaced by an update attempt.
///
/// Phases wrap what they return in [`UpdateError::InPhase`]; use
/// [`UpdateError::root`] to classify.
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    #[error("no target matches {0}")]
    TargetNotFound(String),
    #[error("an update to {in_flight} is already in progress; cancel it before selecting {requested}")]
    ResumeConflict { in_flight: String, requested: String },
    #[error("failed to initialize update to {target}: {source}")]
    InitFailed {
        target: String,
        #[source]
        source: RuntimeError,
    },
    #[error("update is not initialized (runtime state {0})")]
    NotInitialized(RuntimeUpdateState),
    #[error("{phase} cannot run while the runtime update is {state}")]
    PhaseOrdering {
        phase: PhaseName,
        state: RuntimeUpdateState,
    },
    #[error("no update in progress")]
    NoUpdateInProgress,
    #[error("target {target} failed to start: {source}")]
    StartFailed {
        target: String,
        #[source]
        source: RuntimeError,
    },
    #[error("device already runs the selected target")]
    CheckNoUpdate,
    #[error("update cancelled")]
    Cancelled,
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error(transparent)]
    Collector(#[from] GatewayError),
    #[error("{phase} phase failed: {source}")]
    InPhase {
        phase: PhaseName,
        #[source]
        source: Box<UpdateError>,
    },
}

impl UpdateError {
    /// Attach the phase that produced this error.
    pub fn in_phase(self, phase: PhaseName) -> Self {
        Self::InPhase {
            phase,
            source: Box::new(self),
        }
    }

    /// The error with every phase wrapper removed.
    pub fn root(&self) -> &UpdateError {
        let mut current = self;
        while let Self::InPhase { source, .. } = current {
            current = source.as_ref();
        }
        current
    }

    /// Name of the innermost phase the error passed through.
    pub fn phase(&self) -> Option<PhaseName> {
        let mut found = None;
        let mut current = self;
        while let Self::InPhase { phase, source } = current {
            found = Some(*phase);
            current = source.as_ref();
        }
        found
    }

    pub fn is_start_failed(&self) -> bool {
        matches!(self.root(), Self::StartFailed { .. })
    }

    /// Target that failed to start, when this is a start failure.
    pub fn failed_target(&self) -> Option<&str> {
        match self.root() {
            Self::StartFailed { target, .. } => Some(target),
            _ => None,
        }
    }

    pub fn is_no_update(&self) -> bool {
        matches!(self.root(), Self::CheckNoUpdate)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), Self::Cancelled)
    }

    /// Short label used for metrics.
    pub fn outcome(&self) -> &'static str {
        match self.root() {
            Self::CheckNoUpdate => "up_to_date",
            Self::StartFailed { .. } => "start_failed",
            Self::Cancelled => "cancelled",
            Self::TargetNotFound(_) | Self::ResumeConflict { .. } => "unresolved",
            _ => "failed",
        }
    }
}
