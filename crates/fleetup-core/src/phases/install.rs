//! ---
//! fu_section: "01-core-functionality"
//! fu_subsection: "module"
//! fu_type: "source"
//! fu_scope: "code"
//! fu_description: "Install phase: apply fetched content."
//! fu_version: "v0.0.0-prealpha"
//! fu_owner: "tbd"
//! ---
use async_trait::async_trait;
use tracing::debug;

use super::{emit, Phase, PhaseName};
use crate::context::{CancelSignal, UpdateContext, UpdateEnv};
use crate::error::UpdateError;
use crate::events::EventType;

#[derive(Debug, Clone, Copy, Default)]
pub struct InstallPhase;

#[async_trait]
impl Phase for InstallPhase {
    fn name(&self) -> PhaseName {
        PhaseName::Install
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
        if status.state.is_installed() {
            debug!(state = %status.state, "content already installed");
            return Ok(());
        }

        let outcome = cancel.race(env.runtime.install()).await?;
        // Marks that install was attempted; carries no success flag.
        emit(env, ctx, EventType::InstallationApplied, None)?;
        outcome?;
        Ok(())
    }
}
