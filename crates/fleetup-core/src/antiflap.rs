//! ---
//! fu_section: "01-core-functionality"
//! fu_subsection: "module"
//! fu_type: "source"
//! fu_scope: "code"
//! fu_description: "Anti-flap policy and the unattended update agent."
//! fu_version: "v0.0.0-prealpha"
//! fu_owner: "tbd"
//! ---
//! Unattended updates must not retry a target that never starts. The policy
//! counts consecutive start failures per target name; once a target reaches
//! the configured limit it is known-bad and automatic resolution falls back
//! to the target the device already runs. Explicit selection is unaffected.

use std::collections::{HashMap, HashSet};

use fleetup_persistence::{PersistenceError, Store};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::context::{CancelSignal, Selector, UpdateRequest};
use crate::phases::UpdateCommand;
use crate::runner::{Attempt, UpdateRunner};

/// Per-target consecutive start failure bookkeeping.
#[derive(Debug, Clone)]
pub struct AntiFlapPolicy {
    max_attempts: u32,
    failures: HashMap<String, u32>,
    known_bad: HashSet<String>,
}

impl AntiFlapPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            failures: HashMap::new(),
            known_bad: HashSet::new(),
        }
    }

    /// Rebuild counters from install history so a restart does not reset them.
    pub fn seed_from_store(&mut self, store: &Store) -> Result<(), PersistenceError> {
        for name in store.installed_names()? {
            let count = store.consecutive_start_failures(&name)?;
            if count > 0 {
                self.set_failures(name, count);
            }
        }
        Ok(())
    }

    /// Count a failed start of `target`; returns the consecutive total.
    pub fn record_failure(&mut self, target: &str) -> u32 {
        let count = self.failures.get(target).copied().unwrap_or(0) + 1;
        self.set_failures(target.to_string(), count);
        count
    }

    /// A successful start clears only that target's counter.
    pub fn record_success(&mut self, target: &str) {
        self.failures.remove(target);
        self.known_bad.remove(target);
    }

    pub fn failures(&self, target: &str) -> u32 {
        self.failures.get(target).copied().unwrap_or(0)
    }

    pub fn is_known_bad(&self, target: &str) -> bool {
        self.known_bad.contains(target)
    }

    pub fn known_bad(&self) -> &HashSet<String> {
        &self.known_bad
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn set_failures(&mut self, target: String, count: u32) {
        if count >= self.max_attempts && self.known_bad.insert(target.clone()) {
            warn!(target_id = %target, failures = count, "target marked known-bad");
        }
        self.failures.insert(target, count);
    }
}

/// Drives automatic update attempts under an [`AntiFlapPolicy`].
#[derive(Debug)]
pub struct UpdateAgent {
    runner: UpdateRunner,
    policy: Mutex<AntiFlapPolicy>,
}

impl UpdateAgent {
    /// Build an agent whose policy is seeded from the runner's store.
    pub fn new(runner: UpdateRunner) -> Result<Self, PersistenceError> {
        let mut policy = AntiFlapPolicy::new(runner.env().settings.max_start_attempts);
        policy.seed_from_store(&runner.env().store)?;
        if !policy.known_bad().is_empty() {
            info!(known_bad = ?policy.known_bad(), "restored known-bad targets");
        }
        let agent = Self {
            runner,
            policy: Mutex::new(policy),
        };
        agent.publish_known_bad();
        Ok(agent)
    }

    pub fn runner(&self) -> &UpdateRunner {
        &self.runner
    }

    /// Known-bad target ids, sorted.
    pub fn known_bad(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.policy.lock().known_bad().iter().cloned().collect();
        ids.sort();
        ids
    }

    pub fn failures(&self, target: &str) -> u32 {
        self.policy.lock().failures(target)
    }

    /// One unattended attempt towards the latest target the policy allows.
    pub async fn run_automatic(&self, cancel: &CancelSignal) -> Attempt {
        let known_bad = self.policy.lock().known_bad().clone();
        let request = UpdateRequest::new(Selector::Latest)
            .refreshed()
            .avoiding(known_bad);
        let attempt = self.runner.run(UpdateCommand::Update, request, cancel).await;

        match &attempt.result {
            Ok(()) => self.policy.lock().record_success(&attempt.context.to.id),
            Err(err) if err.is_start_failed() => {
                let target = err.failed_target().unwrap_or(attempt.context.to.id.as_str());
                let count = self.policy.lock().record_failure(target);
                info!(target_id = %target, failures = count, "start failure recorded");
                // Leave no half-started update behind; the next attempt re-resolves.
                if let Err(cancel_err) = self.runner.env().runtime.cancel().await {
                    warn!(error = %cancel_err, "failed to cancel update after start failure");
                }
            }
            Err(err) => debug!(error = %err, "attempt did not reach start"),
        }
        self.publish_known_bad();
        attempt
    }

    fn publish_known_bad(&self) {
        if let Some(metrics) = &self.runner.env().metrics {
            metrics.set_known_bad(self.policy.lock().known_bad().len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetup_persistence::InstalledVersion;

    #[test]
    fn reaching_the_limit_marks_known_bad() {
        let mut policy = AntiFlapPolicy::new(2);
        assert_eq!(policy.record_failure("lmp-2"), 1);
        assert!(!policy.is_known_bad("lmp-2"));
        assert_eq!(policy.record_failure("lmp-2"), 2);
        assert!(policy.is_known_bad("lmp-2"));
    }

    #[test]
    fn success_resets_only_its_own_target() {
        let mut policy = AntiFlapPolicy::new(3);
        policy.record_failure("lmp-2");
        policy.record_failure("lmp-3");
        policy.record_success("lmp-2");
        assert_eq!(policy.failures("lmp-2"), 0);
        assert_eq!(policy.failures("lmp-3"), 1);
    }

    #[test]
    fn zero_limit_is_raised_to_one() {
        let mut policy = AntiFlapPolicy::new(0);
        assert_eq!(policy.max_attempts(), 1);
        policy.record_failure("lmp-2");
        assert!(policy.is_known_bad("lmp-2"));
    }

    #[test]
    fn seeds_counters_from_install_history() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("sql.db")).unwrap();
        let good = store
            .begin_install(&InstalledVersion::new("ecu", "lmp-1", "aa", "c1"))
            .unwrap();
        store.complete_install(good).unwrap();
        for corr in ["c2", "c3"] {
            let id = store
                .begin_install(&InstalledVersion::new("ecu", "lmp-2", "bb", corr))
                .unwrap();
            store.fail_install(id).unwrap();
        }

        let mut policy = AntiFlapPolicy::new(2);
        policy.seed_from_store(&store).unwrap();
        assert_eq!(policy.failures("lmp-1"), 0);
        assert_eq!(policy.failures("lmp-2"), 2);
        assert!(policy.is_known_bad("lmp-2"));
    }
}
