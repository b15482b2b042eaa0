//! ---
//! fu_section: "01-core-functionality"
//! fu_subsection: "module"
//! fu_type: "source"
//! fu_scope: "code"
//! fu_description: "Fetch phase: download the target's content."
//! fu_version: "v0.0.0-prealpha"
//! fu_owner: "tbd"
//! ---
use async_trait::async_trait;
use tracing::debug;

use super::{emit, emit_failure, Phase, PhaseName};
use crate::context::{CancelSignal, UpdateContext, UpdateEnv};
use crate::error::UpdateError;
use crate::events::EventType;
use crate::runtime::RuntimeUpdateState;

#[derive(Debug, Clone, Copy, Default)]
pub struct FetchPhase;

#[async_trait]
impl Phase for FetchPhase {
    fn name(&self) -> PhaseName {
        PhaseName::Fetch
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
            state if state.is_uninitialized() => return Err(UpdateError::NotInitialized(state)),
            state if state.is_fetched() => {
                debug!(state = %state, "content already fetched");
                return Ok(());
            }
            RuntimeUpdateState::Initialized | RuntimeUpdateState::Fetching => {}
            state => {
                return Err(UpdateError::PhaseOrdering {
                    phase: PhaseName::Fetch,
                    state,
                })
            }
        }

        emit(env, ctx, EventType::DownloadStarted, None)?;
        match cancel.race(env.runtime.fetch()).await? {
            Ok(()) => {
                emit(env, ctx, EventType::DownloadCompleted, Some(true))?;
                Ok(())
            }
            Err(err) => {
                emit_failure(env, ctx, EventType::DownloadCompleted, &err.to_string())?;
                Err(err.into())
            }
        }
    }
}
