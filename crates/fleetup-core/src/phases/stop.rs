//! ---
//! fu_section: "01-core-functionality"
//! fu_subsection: "module"
//! fu_type: "source"
//! fu_scope: "code"
//! fu_description: "Stop phase: stop workloads being replaced."
//! fu_version: "v0.0.0-prealpha"
//! fu_owner: "tbd"
//! ---
use async_trait::async_trait;
use tracing::{debug, info};

use super::{emit, emit_failure, Phase, PhaseName};
use crate::context::{CancelSignal, UpdateContext, UpdateEnv};
use crate::error::UpdateError;
use crate::events::EventType;
use crate::runtime::RuntimeUpdateState::*;

#[derive(Debug, Clone, Copy, Default)]
pub struct StopPhase;

impl StopPhase {
    /// From-target apps whose URI does not survive into the To target.
    fn replaced(ctx: &UpdateContext) -> Vec<String> {
        let keep = ctx.to.app_uris();
        ctx.from
            .app_uris()
            .into_iter()
            .filter(|uri| !keep.contains(uri))
            .collect()
    }
}

#[async_trait]
impl Phase for StopPhase {
    fn name(&self) -> PhaseName {
        PhaseName::Stop
    }

    async fn execute(
        &self,
        env: &UpdateEnv,
        ctx: &mut UpdateContext,
        cancel: &CancelSignal,
    ) -> Result<(), UpdateError> {
        let status = env
            .runtime
            .current_update()
            .await?
            .ok_or(UpdateError::NoUpdateInProgress)?;
        match status.state {
            Fetched | Installing => {}
            Installed | Starting | Started | Completing => {
                debug!(state = %status.state, "workloads already switched");
                return Ok(());
            }
            state => {
                return Err(UpdateError::PhaseOrdering {
                    phase: PhaseName::Stop,
                    state,
                })
            }
        }

        emit(env, ctx, EventType::InstallationStarted, None)?;
        let replaced = Self::replaced(ctx);
        if replaced.is_empty() {
            return Ok(());
        }
        info!(apps = ?replaced, "stopping replaced apps");
        if let Err(err) = cancel.race(env.runtime.stop_apps(&replaced)).await? {
            emit_failure(env, ctx, EventType::InstallationCompleted, &err.to_string())?;
            return Err(err.into());
        }
        Ok(())
    }
}
