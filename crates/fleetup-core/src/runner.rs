//! ---
//! fu_section: "01-core-functionality"
//! fu_subsection: "module"
//! fu_type: "source"
//! fu_scope: "code"
//! fu_description: "Update runner: one attempt from resolution to final report."
//! fu_version: "v0.0.0-prealpha"
//! fu_owner: "tbd"
//! ---
use std::sync::Arc;

use tracing::{debug, info};

use crate::context::{CancelSignal, UpdateContext, UpdateEnv, UpdateRequest};
use crate::error::UpdateError;
use crate::phases::{run_phases, UpdateCommand};
use crate::runtime::UpdateStatus;
use crate::status::report_apps_state;

/// Result of one runner invocation together with what it resolved.
#[derive(Debug)]
pub struct Attempt {
    pub context: UpdateContext,
    pub result: Result<(), UpdateError>,
}

impl Attempt {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Runs update commands against a shared environment.
#[derive(Debug, Clone)]
pub struct UpdateRunner {
    env: Arc<UpdateEnv>,
}

impl UpdateRunner {
    pub fn new(env: Arc<UpdateEnv>) -> Self {
        Self { env }
    }

    pub fn env(&self) -> &UpdateEnv {
        &self.env
    }

    /// Resolve, run the command's phases, then flush the outbox and report app state.
    pub async fn run(
        &self,
        command: UpdateCommand,
        request: UpdateRequest,
        cancel: &CancelSignal,
    ) -> Attempt {
        let env = self.env.as_ref();
        let mut context = UpdateContext::new(request);
        let phases = command.phases();
        let (check, rest) = phases.split_at(1);

        let mut result = run_phases(env, &mut context, check, cancel).await;
        if result.is_ok() && !rest.is_empty() {
            report_apps_state(env, &context.from).await;
            result = run_phases(env, &mut context, rest, cancel).await;
            report_apps_state(env, &context.to).await;
        }

        env.outbox.flush_best_effort().await;

        let outcome = match &result {
            Ok(()) => "success",
            Err(err) => err.outcome(),
        };
        if let Some(metrics) = &env.metrics {
            metrics.record_attempt(outcome);
        }
        match &result {
            Ok(()) => info!(command = ?command, to = %context.to, outcome, "update attempt finished"),
            Err(err) => debug!(command = ?command, outcome, error = %err, "update attempt ended early"),
        }
        Attempt { context, result }
    }

    /// Abort the in-flight runtime update, if any.
    pub async fn cancel_update(&self) -> Result<UpdateStatus, UpdateError> {
        let status = self
            .env
            .runtime
            .current_update()
            .await?
            .filter(|status| !status.state.is_terminal())
            .ok_or(UpdateError::NoUpdateInProgress)?;
        self.env.runtime.cancel().await?;
        info!(client_ref = %status.client_ref, state = %status.state, "update cancelled");
        Ok(status)
    }
}
