//! ---
//! fu_section: "01-core-functionality"
//! fu_subsection: "module"
//! fu_type: "source"
//! fu_scope: "code"
//! fu_description: "Selection of the From/To targets for an update attempt."
//! fu_version: "v0.0.0-prealpha"
//! fu_owner: "tbd"
//! ---
use std::collections::HashSet;

use tracing::{debug, info};

use crate::context::{ResolutionMode, Selector};
use crate::error::UpdateError;
use crate::runtime::{ClientRef, UpdateStatus};
use crate::target::{Target, TargetSet};

/// Everything the resolver looks at.
#[derive(Debug, Clone, Copy)]
pub struct ResolveInput<'a> {
    pub targets: &'a TargetSet,
    /// Client reference of the runtime's last completed update.
    pub last_successful: Option<&'a str>,
    /// The runtime's current update, if any.
    pub in_flight: Option<&'a UpdateStatus>,
    pub selector: &'a Selector,
    pub enabled_apps: Option<&'a [String]>,
    pub known_bad: &'a HashSet<String>,
}

/// Outcome of a resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub from: Target,
    pub to: Target,
    pub mode: ResolutionMode,
    /// Reference of the update being resumed.
    pub in_flight: Option<ClientRef>,
    /// The selected target was known-bad and `from` was chosen instead.
    pub fell_back: bool,
}

/// Compute the `(From, To)` pair for an attempt.
pub fn resolve(input: &ResolveInput<'_>) -> Result<Resolution, UpdateError> {
    let targets = input.targets;
    let from = input
        .last_successful
        .and_then(ClientRef::parse)
        .and_then(|reference| targets.by_id(&reference.target_id).cloned())
        .unwrap_or_else(Target::unknown);

    let resumable = input
        .in_flight
        .filter(|status| status.state.is_resumable())
        .and_then(UpdateStatus::client_ref);

    let mut fell_back = false;
    let (to, mode) = match &resumable {
        Some(reference) => {
            let to = targets
                .by_id(&reference.target_id)
                .cloned()
                .ok_or_else(|| UpdateError::TargetNotFound(reference.target_id.clone()))?;
            if !selects(input.selector, &to) {
                return Err(UpdateError::ResumeConflict {
                    in_flight: to.to_string(),
                    requested: input.selector.to_string(),
                });
            }
            debug!(target_id = %to.id, "resuming in-flight update");
            (to, ResolutionMode::Resume)
        }
        None => {
            let mut to = select(targets, input.selector)?;
            if input.selector.is_automatic() && input.known_bad.contains(&to.id) {
                info!(
                    bad_target = %to.id,
                    fallback = %from.id,
                    "latest target is known bad; converging on the current target"
                );
                to = from.clone();
                fell_back = true;
            }
            (to, ResolutionMode::Start)
        }
    };

    Ok(Resolution {
        from: from.shortlist_apps(input.enabled_apps),
        to: to.shortlist_apps(input.enabled_apps),
        mode,
        in_flight: resumable,
        fell_back,
    })
}

fn select(targets: &TargetSet, selector: &Selector) -> Result<Target, UpdateError> {
    let found = match selector {
        Selector::Latest => return Ok(targets.latest().cloned().unwrap_or_else(Target::unknown)),
        Selector::Version(version) => targets.by_version(*version),
        Selector::Name(name) => targets.by_id(name),
    };
    found
        .cloned()
        .ok_or_else(|| UpdateError::TargetNotFound(selector.to_string()))
}

fn selects(selector: &Selector, target: &Target) -> bool {
    match selector {
        Selector::Latest => true,
        Selector::Version(version) => target.version == *version,
        Selector::Name(name) => &target.id == name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::RuntimeUpdateState;
    use crate::target::AppRef;

    fn set() -> TargetSet {
        let apps = |v: i64| {
            vec![
                AppRef::new("app1", format!("hub/app1@{v}")),
                AppRef::new("app2", format!("hub/app2@{v}")),
            ]
        };
        TargetSet::new(
            1,
            vec![
                Target::new("lmp-100", 100, apps(100)),
                Target::new("lmp-102", 102, apps(102)),
                Target::new("lmp-101", 101, apps(101)),
            ],
        )
    }

    fn status(client_ref: &str, state: RuntimeUpdateState) -> UpdateStatus {
        let mut status = UpdateStatus::created(client_ref);
        status.state = state;
        status
    }

    fn input<'a>(
        targets: &'a TargetSet,
        selector: &'a Selector,
        known_bad: &'a HashSet<String>,
    ) -> ResolveInput<'a> {
        ResolveInput {
            targets,
            last_successful: Some("lmp-100|c0"),
            in_flight: None,
            selector,
            enabled_apps: None,
            known_bad,
        }
    }

    #[test]
    fn latest_is_highest_version() {
        let targets = set();
        let none = HashSet::new();
        let selector = Selector::Latest;
        let first = resolve(&input(&targets, &selector, &none)).unwrap();
        let second = resolve(&input(&targets, &selector, &none)).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.to.version, 102);
        assert_eq!(first.from.id, "lmp-100");
        assert_eq!(first.mode, ResolutionMode::Start);
    }

    #[test]
    fn empty_set_yields_unknown_or_not_found() {
        let targets = TargetSet::default();
        let none = HashSet::new();
        let latest = Selector::Latest;
        let resolution = resolve(&input(&targets, &latest, &none)).unwrap();
        assert!(resolution.to.is_unknown());
        assert!(resolution.from.is_unknown());

        let explicit = Selector::Version(100);
        let err = resolve(&input(&targets, &explicit, &none)).unwrap_err();
        assert!(matches!(err, UpdateError::TargetNotFound(_)));
    }

    #[test]
    fn explicit_selection_by_version_and_name() {
        let targets = set();
        let none = HashSet::new();
        let by_version = Selector::Version(101);
        assert_eq!(resolve(&input(&targets, &by_version, &none)).unwrap().to.id, "lmp-101");
        let by_name = Selector::Name("lmp-100".into());
        assert_eq!(resolve(&input(&targets, &by_name, &none)).unwrap().to.version, 100);
    }

    #[test]
    fn missing_history_gives_unknown_from() {
        let targets = set();
        let none = HashSet::new();
        let selector = Selector::Latest;
        let mut request = input(&targets, &selector, &none);
        request.last_successful = None;
        assert!(resolve(&request).unwrap().from.is_unknown());
    }

    #[test]
    fn in_flight_update_is_resumed() {
        let targets = set();
        let none = HashSet::new();
        let selector = Selector::Latest;
        let fetching = status("lmp-101|c1", RuntimeUpdateState::Fetching);
        let mut request = input(&targets, &selector, &none);
        request.in_flight = Some(&fetching);
        let resolution = resolve(&request).unwrap();
        assert_eq!(resolution.mode, ResolutionMode::Resume);
        assert_eq!(resolution.to.id, "lmp-101");
        assert_eq!(resolution.in_flight.unwrap().correlation_id, "c1");
    }

    #[test]
    fn created_update_is_not_resumed() {
        let targets = set();
        let none = HashSet::new();
        let selector = Selector::Latest;
        let created = status("lmp-101|c1", RuntimeUpdateState::Created);
        let mut request = input(&targets, &selector, &none);
        request.in_flight = Some(&created);
        let resolution = resolve(&request).unwrap();
        assert_eq!(resolution.mode, ResolutionMode::Start);
        assert_eq!(resolution.to.id, "lmp-102");
    }

    #[test]
    fn conflicting_selector_is_rejected_during_resume() {
        let targets = set();
        let none = HashSet::new();
        let selector = Selector::Version(102);
        let fetching = status("lmp-100|c1", RuntimeUpdateState::Fetching);
        let mut request = input(&targets, &selector, &none);
        request.in_flight = Some(&fetching);
        let err = resolve(&request).unwrap_err();
        assert!(matches!(err, UpdateError::ResumeConflict { .. }));
    }

    #[test]
    fn known_bad_latest_falls_back_to_from() {
        let targets = set();
        let bad: HashSet<String> = ["lmp-102".to_string()].into_iter().collect();
        let latest = Selector::Latest;
        let resolution = resolve(&input(&targets, &latest, &bad)).unwrap();
        assert!(resolution.fell_back);
        assert_eq!(resolution.to.id, "lmp-100");

        let explicit = Selector::Version(102);
        let resolution = resolve(&input(&targets, &explicit, &bad)).unwrap();
        assert!(!resolution.fell_back);
        assert_eq!(resolution.to.id, "lmp-102");
    }

    #[test]
    fn enabled_apps_shortlist_both_sides() {
        let targets = set();
        let none = HashSet::new();
        let selector = Selector::Latest;
        let allow = vec!["app2".to_string()];
        let mut request = input(&targets, &selector, &none);
        request.enabled_apps = Some(allow.as_slice());
        let resolution = resolve(&request).unwrap();
        assert_eq!(resolution.to.app_names(), vec!["app2"]);
        assert_eq!(resolution.from.app_names(), vec!["app2"]);

        let empty: Vec<String> = Vec::new();
        request.enabled_apps = Some(empty.as_slice());
        assert!(resolve(&request).unwrap().to.apps.is_empty());
    }
}
