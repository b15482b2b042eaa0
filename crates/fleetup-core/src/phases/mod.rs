//! ---
//! fu_section: "01-core-functionality"
//! fu_subsection: "module"
//! fu_type: "source"
//! fu_scope: "code"
//! fu_description: "Idempotent update phases."
//! fu_version: "v0.0.0-prealpha"
//! fu_owner: "tbd"
//! ---
//! The update pipeline: `Check, Init, Fetch, Stop, Install, Start`.
//!
//! Every phase reads the runtime's own update state first and treats "already
//! past me" as success, so re-running a phase after a crash never repeats its
//! side effects.

use std::fmt;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::context::{CancelSignal, UpdateContext, UpdateEnv};
use crate::error::UpdateError;
use crate::events::{EventType, UpdateEvent};

mod check;
mod fetch;
mod init;
mod install;
mod start;
mod stop;

pub use check::CheckPhase;
pub use fetch::FetchPhase;
pub use init::InitPhase;
pub use install::InstallPhase;
pub use start::StartPhase;
pub use stop::StopPhase;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhaseName {
    Check,
    Init,
    Fetch,
    Stop,
    Install,
    Start,
}

impl fmt::Display for PhaseName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One step of the pipeline.
#[async_trait]
pub trait Phase: Send + Sync {
    fn name(&self) -> PhaseName;

    async fn execute(
        &self,
        env: &UpdateEnv,
        ctx: &mut UpdateContext,
        cancel: &CancelSignal,
    ) -> Result<(), UpdateError>;
}

/// Commands exposed to callers and the phases each one runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateCommand {
    Check,
    Fetch,
    Install,
    Start,
    Update,
}

impl UpdateCommand {
    pub fn phases(self) -> Vec<Box<dyn Phase>> {
        match self {
            Self::Check => vec![Box::new(CheckPhase)],
            Self::Fetch => vec![Box::new(CheckPhase), Box::new(InitPhase), Box::new(FetchPhase)],
            Self::Install => vec![Box::new(CheckPhase), Box::new(StopPhase), Box::new(InstallPhase)],
            Self::Start => vec![Box::new(CheckPhase), Box::new(StartPhase)],
            Self::Update => vec![
                Box::new(CheckPhase),
                Box::new(InitPhase),
                Box::new(FetchPhase),
                Box::new(StopPhase),
                Box::new(InstallPhase),
                Box::new(StartPhase),
            ],
        }
    }
}

/// Run `phases` in order, stopping at the first error.
///
/// The outbox is flushed between phases so the collector sees progress
/// before the attempt ends.
pub async fn run_phases(
    env: &UpdateEnv,
    ctx: &mut UpdateContext,
    phases: &[Box<dyn Phase>],
    cancel: &CancelSignal,
) -> Result<(), UpdateError> {
    for (index, phase) in phases.iter().enumerate() {
        let name = phase.name();
        if cancel.is_cancelled() {
            return Err(UpdateError::Cancelled.in_phase(name));
        }
        info!(phase = %name, target_id = %ctx.to.id, "phase started");
        if let Err(err) = phase.execute(env, ctx, cancel).await {
            if !err.is_no_update() {
                warn!(phase = %name, error = %err, "phase failed");
            }
            return Err(err.in_phase(name));
        }
        info!(phase = %name, target_id = %ctx.to.id, "phase finished");
        if name != PhaseName::Check && index + 1 < phases.len() {
            env.outbox.flush_best_effort().await;
        }
    }
    Ok(())
}

/// Queue an audit event for the attempt's To target.
pub(crate) fn emit(
    env: &UpdateEnv,
    ctx: &UpdateContext,
    kind: EventType,
    success: Option<bool>,
) -> Result<(), UpdateError> {
    let event = UpdateEvent::new(kind, &ctx.to, &ctx.correlation_id, success);
    env.outbox.append(&event)?;
    Ok(())
}

/// Same as [`emit`] with an error description attached.
pub(crate) fn emit_failure(
    env: &UpdateEnv,
    ctx: &UpdateContext,
    kind: EventType,
    details: &str,
) -> Result<(), UpdateError> {
    let event =
        UpdateEvent::new(kind, &ctx.to, &ctx.correlation_id, Some(false)).with_details(details);
    env.outbox.append(&event)?;
    Ok(())
}
