//! ---
//! fu_section: "03-persistence-logging"
//! fu_subsection: "module"
//! fu_type: "source"
//! fu_scope: "code"
//! fu_description: "Durable audit event outbox."
//! fu_version: "v0.0.0-prealpha"
//! fu_owner: "tbd"
//! ---
//! Events are appended to the local store synchronously and flushed to the
//! collector in batches. A flush deletes only the rows it read, so events
//! appended while the batch is in flight survive for the next flush.

use std::sync::Arc;

use fleetup_metrics::AgentMetrics;
use fleetup_persistence::{PersistenceError, Store};
use tracing::{debug, warn};

use crate::error::UpdateError;
use crate::events::UpdateEvent;
use crate::gateway::Collector;

/// Durable queue of audit events.
#[derive(Clone)]
pub struct Outbox {
    store: Store,
    collector: Arc<dyn Collector>,
    metrics: Option<AgentMetrics>,
}

impl Outbox {
    pub fn new(store: Store, collector: Arc<dyn Collector>) -> Self {
        Self {
            store,
            collector,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: AgentMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Durably queue `event`; returns its row id.
    pub fn append(&self, event: &UpdateEvent) -> Result<i64, UpdateError> {
        let json = serde_json::to_string(event).map_err(PersistenceError::from)?;
        let id = self.store.append_event(&json)?;
        debug!(
            row = id,
            event = %event.event_type.id,
            correlation_id = %event.event.correlation_id,
            "event queued"
        );
        Ok(id)
    }

    /// Send every queued event in one batch; returns how many were delivered.
    pub async fn flush(&self) -> Result<usize, UpdateError> {
        let stored = self.store.pending_events()?;
        let Some(max_id) = stored.iter().map(|event| event.id).max() else {
            return Ok(0);
        };
        let mut batch = Vec::with_capacity(stored.len());
        for event in &stored {
            match serde_json::from_str::<serde_json::Value>(&event.json) {
                Ok(value) => batch.push(value),
                Err(err) => warn!(row = event.id, error = %err, "dropping unreadable queued event"),
            }
        }
        if !batch.is_empty() {
            self.collector.post_events(&batch).await?;
        }
        self.store.delete_events_through(max_id)?;
        if let Some(metrics) = &self.metrics {
            metrics.record_flushed(batch.len());
        }
        debug!(delivered = batch.len(), through = max_id, "outbox flushed");
        Ok(batch.len())
    }

    /// Flush and log the outcome; failures leave events queued.
    pub async fn flush_best_effort(&self) {
        if let Err(err) = self.flush().await {
            warn!(error = %err, "event flush failed; events stay queued");
        }
        self.publish_pending();
    }

    pub fn pending(&self) -> Result<u64, UpdateError> {
        Ok(self.store.pending_event_count()?)
    }

    fn publish_pending(&self) {
        let Some(metrics) = &self.metrics else {
            return;
        };
        match self.store.pending_event_count() {
            Ok(pending) => metrics.set_outbox_pending(pending as usize),
            Err(err) => warn!(error = %err, "failed to count queued events"),
        }
    }
}

impl std::fmt::Debug for Outbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outbox")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}
