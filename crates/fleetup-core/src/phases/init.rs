//! ---
//! fu_section: "01-core-functionality"
//! fu_subsection: "module"
//! fu_type: "source"
//! fu_scope: "code"
//! fu_description: "Init phase: create and initialize the runtime update."
//! fu_version: "v0.0.0-prealpha"
//! fu_owner: "tbd"
//! ---
use async_trait::async_trait;
use tracing::{debug, info};

use super::{emit, emit_failure, Phase, PhaseName};
use crate::context::{CancelSignal, UpdateContext, UpdateEnv};
use crate::error::UpdateError;
use crate::events::EventType;

#[derive(Debug, Clone, Copy, Default)]
pub struct InitPhase;

#[async_trait]
impl Phase for InitPhase {
    fn name(&self) -> PhaseName {
        PhaseName::Init
    }

    async fn execute(
        &self,
        env: &UpdateEnv,
        ctx: &mut UpdateContext,
        cancel: &CancelSignal,
    ) -> Result<(), UpdateError> {
        let current = env
            .runtime
            .current_update()
            .await?
            .filter(|status| !status.state.is_terminal());

        match &current {
            Some(status) if !status.state.is_uninitialized() => {
                debug!(state = %status.state, "update already initialized");
                return Ok(());
            }
            Some(status) => {
                let same_target = status
                    .client_ref()
                    .is_some_and(|reference| reference.target_id == ctx.to.id);
                if !same_target {
                    info!(
                        stale = %status.client_ref,
                        target_id = %ctx.to.id,
                        "replacing uninitialized update for another target"
                    );
                    env.runtime.cancel().await?;
                    env.runtime.new_update(&ctx.client_ref()).await?;
                }
            }
            None => {
                env.runtime.new_update(&ctx.client_ref()).await?;
            }
        }

        if env.settings.report_init {
            emit(env, ctx, EventType::UpdateInitStarted, None)?;
        }
        let outcome = cancel.race(env.runtime.init(&ctx.to.app_uris())).await?;
        if env.settings.report_init {
            match &outcome {
                Ok(()) => emit(env, ctx, EventType::UpdateInitCompleted, Some(true))?,
                Err(err) => emit_failure(env, ctx, EventType::UpdateInitCompleted, &err.to_string())?,
            }
        }
        outcome.map_err(|source| UpdateError::InitFailed {
            target: ctx.to.id.clone(),
            source,
        })?;
        info!(target_id = %ctx.to.id, apps = ctx.to.apps.len(), "update initialized");
        Ok(())
    }
}
