//! ---
//! fu_section: "01-core-functionality"
//! fu_subsection: "module"
//! fu_type: "source"
//! fu_scope: "code"
//! fu_description: "Check phase: target resolution."
//! fu_version: "v0.0.0-prealpha"
//! fu_owner: "tbd"
//! ---
use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use super::{Phase, PhaseName};
use crate::context::{CancelSignal, ResolutionMode, UpdateContext, UpdateEnv};
use crate::error::UpdateError;
use crate::resolver::{resolve, ResolveInput};

/// Resolves `From`/`To` and decides whether there is anything to do.
#[derive(Debug, Clone, Copy, Default)]
pub struct CheckPhase;

#[async_trait]
impl Phase for CheckPhase {
    fn name(&self) -> PhaseName {
        PhaseName::Check
    }

    async fn execute(
        &self,
        env: &UpdateEnv,
        ctx: &mut UpdateContext,
        cancel: &CancelSignal,
    ) -> Result<(), UpdateError> {
        ctx.targets = cancel
            .race(env.source.load_targets(ctx.request.refresh))
            .await??;
        let in_flight = env.runtime.current_update().await?;
        let last = env.runtime.last_successful_update().await?;

        let resolution = resolve(&ResolveInput {
            targets: &ctx.targets,
            last_successful: last.as_ref().map(|status| status.client_ref.as_str()),
            in_flight: in_flight.as_ref(),
            selector: &ctx.request.selector,
            enabled_apps: env.settings.enabled_apps.as_deref(),
            known_bad: &ctx.request.known_bad,
        })?;

        if resolution.to.is_unknown() {
            // Only a fallback onto an unknown history lands here with targets on offer.
            if resolution.fell_back {
                return Err(UpdateError::CheckNoUpdate);
            }
            return Err(UpdateError::TargetNotFound(ctx.request.selector.to_string()));
        }

        ctx.from = resolution.from;
        ctx.to = resolution.to;
        ctx.mode = resolution.mode;

        // Reuse the correlation id of an update already created for this target.
        let existing = in_flight
            .as_ref()
            .filter(|status| !status.state.is_terminal())
            .and_then(|status| status.client_ref())
            .filter(|reference| reference.target_id == ctx.to.id);
        ctx.correlation_id = match (&resolution.in_flight, existing) {
            (Some(reference), _) => reference.correlation_id.clone(),
            (None, Some(reference)) => reference.correlation_id,
            (None, None) => format!("{}-{}", ctx.to.id, Uuid::new_v4()),
        };

        if ctx.mode == ResolutionMode::Start
            && ctx.to.id == ctx.from.id
            && ctx.to.same_apps(&ctx.from)
        {
            let status = env.runtime.apps_status(&ctx.to.apps).await?;
            if status.all_running() {
                info!(target_id = %ctx.to.id, "device already runs the selected target");
                return Err(UpdateError::CheckNoUpdate);
            }
        }

        info!(
            from = %ctx.from,
            to = %ctx.to,
            mode = ?ctx.mode,
            correlation_id = %ctx.correlation_id,
            targets = ctx.targets.len(),
            "update resolved"
        );
        Ok(())
    }
}
