//! ---
//! fu_section: "11-test-harness"
//! fu_subsection: "module"
//! fu_type: "source"
//! fu_scope: "code"
//! fu_description: "Collector fake recording events and app state reports."
//! fu_version: "v0.0.0-prealpha"
//! fu_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use fleetup_core::status::AppsStatesReport;
use fleetup_core::{Collector, EventType, GatewayError, UpdateEvent};
use parking_lot::Mutex;

type PostHook = Box<dyn Fn() + Send + Sync>;

/// Records everything posted to it; can be switched offline.
#[derive(Default)]
pub struct RecordingCollector {
    events: Mutex<Vec<serde_json::Value>>,
    reports: Mutex<Vec<AppsStatesReport>>,
    offline: AtomicBool,
    event_posts: AtomicUsize,
    on_post: Mutex<Option<PostHook>>,
}

impl RecordingCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline every post fails and nothing is recorded.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Run `hook` inside every event post, before it is accepted.
    pub fn on_post(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.on_post.lock() = Some(Box::new(hook));
    }

    /// Number of event batches received, including failed ones.
    pub fn event_posts(&self) -> usize {
        self.event_posts.load(Ordering::SeqCst)
    }

    pub fn raw_events(&self) -> Vec<serde_json::Value> {
        self.events.lock().clone()
    }

    pub fn events(&self) -> Vec<UpdateEvent> {
        self.events
            .lock()
            .iter()
            .filter_map(|value| serde_json::from_value(value.clone()).ok())
            .collect()
    }

    pub fn event_types(&self) -> Vec<EventType> {
        self.events().iter().filter_map(UpdateEvent::kind).collect()
    }

    /// `(kind, success)` pairs in delivery order.
    pub fn event_outcomes(&self) -> Vec<(EventType, Option<bool>)> {
        self.events()
            .iter()
            .filter_map(|event| event.kind().map(|kind| (kind, event.event.success)))
            .collect()
    }

    pub fn reports(&self) -> Vec<AppsStatesReport> {
        self.reports.lock().clone()
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.events.lock().clear();
        self.reports.lock().clear();
    }

    fn check_online(&self, path: &str) -> Result<(), GatewayError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(GatewayError::Unavailable(format!("{path} is offline")));
        }
        Ok(())
    }
}

impl std::fmt::Debug for RecordingCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingCollector")
            .field("events", &self.events.lock().len())
            .field("reports", &self.reports.lock().len())
            .field("offline", &self.offline.load(Ordering::SeqCst))
            .finish()
    }
}

#[async_trait]
impl Collector for RecordingCollector {
    async fn post_events(&self, events: &[serde_json::Value]) -> Result<(), GatewayError> {
        self.event_posts.fetch_add(1, Ordering::SeqCst);
        if let Some(hook) = self.on_post.lock().as_ref() {
            hook();
        }
        self.check_online("events")?;
        self.events.lock().extend_from_slice(events);
        Ok(())
    }

    async fn post_apps_states(&self, report: &AppsStatesReport) -> Result<(), GatewayError> {
        self.check_online("apps-states")?;
        self.reports.lock().push(report.clone());
        Ok(())
    }
}
