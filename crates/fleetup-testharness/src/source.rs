//! ---
//! fu_section: "11-test-harness"
//! fu_subsection: "module"
//! fu_type: "source"
//! fu_scope: "code"
//! fu_description: "Target source serving a settable target set."
//! fu_version: "v0.0.0-prealpha"
//! fu_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use fleetup_core::{GatewayError, MetadataError, TargetSet, TargetSource};
use parking_lot::Mutex;

#[derive(Debug, Default)]
pub struct StaticTargetSource {
    targets: Mutex<TargetSet>,
    unreachable: AtomicBool,
    loads: AtomicUsize,
    refreshes: AtomicUsize,
}

impl StaticTargetSource {
    pub fn new(targets: TargetSet) -> Self {
        Self {
            targets: Mutex::new(targets),
            ..Self::default()
        }
    }

    /// Replace what the "server" offers.
    pub fn set(&self, targets: TargetSet) {
        *self.targets.lock() = targets;
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TargetSource for StaticTargetSource {
    async fn load_targets(&self, refresh: bool) -> Result<TargetSet, MetadataError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if refresh {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
        }
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(GatewayError::Unavailable("targets.json".to_string()).into());
        }
        Ok(self.targets.lock().clone())
    }
}
