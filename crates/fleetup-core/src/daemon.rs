//! ---
//! fu_section: "01-core-functionality"
//! fu_subsection: "module"
//! fu_type: "source"
//! fu_scope: "code"
//! fu_description: "Cooperative poll loop for unattended updates."
//! fu_version: "v0.0.0-prealpha"
//! fu_owner: "tbd"
//! ---
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::antiflap::UpdateAgent;
use crate::context::CancelSignal;
use crate::error::UpdateError;

/// Repeats automatic attempts until cancelled.
#[derive(Debug)]
pub struct Daemon {
    agent: UpdateAgent,
    interval: Duration,
}

impl Daemon {
    pub fn new(agent: UpdateAgent, interval: Duration) -> Self {
        Self { agent, interval }
    }

    pub fn agent(&self) -> &UpdateAgent {
        &self.agent
    }

    /// Run attempts separated by the poll interval.
    ///
    /// A failed attempt is logged and retried on the next tick. With
    /// `run_once` the loop stops after one attempt and returns its error,
    /// except for "already up to date".
    pub async fn run(&self, cancel: &CancelSignal, run_once: bool) -> Result<(), UpdateError> {
        info!(interval_secs = self.interval.as_secs(), run_once, "update daemon started");
        loop {
            let attempt = self.agent.run_automatic(cancel).await;
            match attempt.result {
                Ok(()) => info!(target_id = %attempt.context.to.id, "device converged"),
                Err(err) if err.is_no_update() => debug!("device is up to date"),
                Err(err) if err.is_cancelled() => {
                    info!("update daemon cancelled");
                    return Ok(());
                }
                Err(err) if run_once => return Err(err),
                Err(err) => warn!(error = %err, "update attempt failed"),
            }
            if run_once {
                return Ok(());
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = cancel.cancelled() => {
                    info!("update daemon stopping");
                    return Ok(());
                }
            }
        }
    }
}
