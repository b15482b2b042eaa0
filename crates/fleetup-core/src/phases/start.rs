//! ---
//! fu_section: "01-core-functionality"
//! fu_subsection: "module"
//! fu_type: "source"
//! fu_scope: "code"
//! fu_description: "Start phase: bring the To target's workloads up and record the outcome."
//! fu_version: "v0.0.0-prealpha"
//! fu_owner: "tbd"
//! ---
use async_trait::async_trait;
use fleetup_persistence::InstalledVersion;
use tracing::{info, warn};

use super::{emit, emit_failure, Phase, PhaseName};
use crate::context::{CancelSignal, UpdateContext, UpdateEnv};
use crate::error::UpdateError;
use crate::events::EventType;
use crate::status::report_apps_state;

#[derive(Debug, Clone, Copy, Default)]
pub struct StartPhase;

impl StartPhase {
    fn install_record(env: &UpdateEnv, ctx: &UpdateContext) -> InstalledVersion {
        let mut record = InstalledVersion::new(
            env.settings.ecu_serial.clone(),
            ctx.to.id.clone(),
            ctx.to.sha256.clone(),
            ctx.correlation_id.clone(),
        );
        record.hashes = serde_json::json!({ "sha256": ctx.to.sha256 }).to_string();
        record.length = i64::try_from(ctx.to.length).unwrap_or(i64::MAX);
        record
    }
}

#[async_trait]
impl Phase for StartPhase {
    fn name(&self) -> PhaseName {
        PhaseName::Start
    }

    async fn execute(
        &self,
        env: &UpdateEnv,
        ctx: &mut UpdateContext,
        cancel: &CancelSignal,
    ) -> Result<(), UpdateError> {
        if env.runtime.current_update().await?.is_none() {
            return Err(UpdateError::NoUpdateInProgress);
        }

        let record_id = env.store.begin_install(&Self::install_record(env, ctx))?;

        // A target without apps leaves nothing running from the previous one.
        let prune = ctx.to.apps.is_empty() && !ctx.from.apps.is_empty();
        let pruned = ctx.from.app_uris();
        let start = async {
            if prune {
                env.runtime.stop_apps(&pruned).await?;
            }
            env.runtime.start().await
        };

        match cancel.race(start).await? {
            Ok(()) => {
                if let Err(err) = env.runtime.complete(true).await {
                    warn!(target_id = %ctx.to.id, error = %err, "failed to finalize update");
                }
                env.identity.set_current(&ctx.to);
                env.store.complete_install(record_id)?;
                emit(env, ctx, EventType::InstallationCompleted, Some(true))?;
                report_apps_state(env, &ctx.to).await;
                info!(target_id = %ctx.to.id, "target started");
                Ok(())
            }
            Err(source) => {
                env.store.fail_install(record_id)?;
                emit_failure(env, ctx, EventType::InstallationCompleted, &source.to_string())?;
                report_apps_state(env, &ctx.to).await;
                if let Some(metrics) = &env.metrics {
                    metrics.record_start_failure(&ctx.to.id);
                }
                Err(UpdateError::StartFailed {
                    target: ctx.to.id.clone(),
                    source,
                })
            }
        }
    }
}
