//! ---
//! fu_section: "15-testing-qa-runbook"
//! fu_subsection: "integration"
//! fu_type: "test"
//! fu_scope: "code"
//! fu_description: "End-to-end update scenarios driven command by command."
//! fu_version: "v0.0.0-prealpha"
//! fu_owner: "tbd"
//! ---
use fleetup_core::{
    DeviceStatus, EventType, RuntimeUpdateState, Selector, UpdateCommand, UpdateError,
};
use fleetup_testharness::{app_uri, target, target_set, Harness, RuntimeOp};

use EventType::*;

#[tokio::test]
async fn fresh_device_walks_every_command() {
    let h = Harness::new(target_set(vec![target("lmp-100", 100, &["app1", "app2"])])).unwrap();

    let check = h.run(UpdateCommand::Check, Selector::Latest).await;
    assert!(check.is_ok(), "{:?}", check.result);
    assert_eq!(check.context.targets.len(), 1);
    assert!(check.context.from.is_unknown());
    assert_eq!(check.context.to.id, "lmp-100");
    assert!(h.collector.events().is_empty());

    let fetch = h.run(UpdateCommand::Fetch, Selector::Latest).await;
    assert!(fetch.is_ok(), "{:?}", fetch.result);
    assert_eq!(
        h.collector.event_outcomes(),
        vec![(DownloadStarted, None), (DownloadCompleted, Some(true))]
    );
    h.collector.clear();

    let install = h.run(UpdateCommand::Install, Selector::Latest).await;
    assert!(install.is_ok(), "{:?}", install.result);
    assert_eq!(
        h.collector.event_types(),
        vec![InstallationStarted, InstallationApplied]
    );
    h.collector.clear();

    let start = h.run(UpdateCommand::Start, Selector::Latest).await;
    assert!(start.is_ok(), "{:?}", start.result);
    assert_eq!(
        h.collector.event_outcomes(),
        vec![(InstallationCompleted, Some(true))]
    );

    let status = DeviceStatus::gather(&h.env, Vec::new()).await.unwrap();
    let current = status.current.unwrap();
    assert_eq!(current.id, "lmp-100");
    assert_eq!(current.version, 100);
    assert!(status.apps.all_running());
    let uris: Vec<_> = status.apps.apps.iter().map(|app| app.uri.clone()).collect();
    assert_eq!(uris, vec![app_uri("app1", 100), app_uri("app2", 100)]);
    assert!(status.in_flight.is_none());
    assert_eq!(status.pending_events, 0);

    // Every command shared the correlation id of the one update it drove.
    let correlations: Vec<_> = [&fetch, &install, &start]
        .iter()
        .map(|attempt| attempt.context.correlation_id.clone())
        .collect();
    assert!(correlations.iter().all(|id| id == &correlations[0]));
}

#[tokio::test]
async fn broken_target_keeps_the_previous_identity() {
    let h = Harness::new(target_set(vec![target("lmp-100", 100, &["app1", "app2"])])).unwrap();
    assert!(h.run(UpdateCommand::Update, Selector::Latest).await.is_ok());

    h.source.set(target_set(vec![
        target("lmp-100", 100, &["app1", "app2"]),
        target("lmp-102", 102, &["app1", "app2"]),
    ]));
    h.runtime.break_start(app_uri("app1", 102));
    h.collector.clear();

    let fetch = h.run(UpdateCommand::Fetch, Selector::Latest).await;
    assert!(fetch.is_ok(), "{:?}", fetch.result);
    let install = h.run(UpdateCommand::Install, Selector::Latest).await;
    assert!(install.is_ok(), "{:?}", install.result);
    h.collector.clear();

    let start = h.run(UpdateCommand::Start, Selector::Latest).await;
    let err = start.result.unwrap_err();
    assert!(err.is_start_failed());
    assert_eq!(err.failed_target(), Some("lmp-102"));
    assert_eq!(
        h.collector.event_outcomes(),
        vec![(InstallationCompleted, Some(false))]
    );

    let status = DeviceStatus::gather(&h.env, Vec::new()).await.unwrap();
    assert_eq!(status.current.unwrap().id, "lmp-100");
    assert!(status.apps.apps.iter().all(|app| !app.running));
    assert!(h.runtime.running().is_empty());
    assert_eq!(h.env.identity.current().target_id, "lmp-100");
}

#[tokio::test]
async fn fetch_towards_another_version_leaves_the_update_alone() {
    let h = Harness::new(target_set(vec![
        target("lmp-100", 100, &["app1"]),
        target("lmp-101", 101, &["app1"]),
    ]))
    .unwrap();
    h.runtime.with_ledger(|ledger| {
        ledger.create("lmp-100|corr-1");
        ledger.init(&[app_uri("app1", 100)]).unwrap();
        ledger.begin_fetch().unwrap();
    });
    let before = h.runtime.ledger().current_status().unwrap();
    assert_eq!(before.state, RuntimeUpdateState::Fetching);

    let attempt = h.run(UpdateCommand::Fetch, Selector::Version(101)).await;
    assert!(matches!(
        attempt.result.unwrap_err().root(),
        UpdateError::ResumeConflict { .. }
    ));

    let after = h.runtime.ledger().current_status().unwrap();
    assert_eq!(after, before);
    assert_eq!(h.runtime.calls(RuntimeOp::NewUpdate), 0);
    assert_eq!(h.runtime.calls(RuntimeOp::Fetch), 0);
    assert!(h.collector.events().is_empty());
}

#[tokio::test]
async fn interrupted_fetch_resumes_towards_the_same_target() {
    let h = Harness::new(target_set(vec![
        target("lmp-100", 100, &["app1"]),
        target("lmp-101", 101, &["app1"]),
    ]))
    .unwrap();
    h.runtime.with_ledger(|ledger| {
        ledger.create("lmp-100|corr-1");
        ledger.init(&[app_uri("app1", 100)]).unwrap();
        ledger.begin_fetch().unwrap();
    });

    // Latest would be lmp-101, but the in-flight update wins.
    let attempt = h.run(UpdateCommand::Update, Selector::Latest).await;
    assert!(attempt.is_ok(), "{:?}", attempt.result);
    assert_eq!(attempt.context.to.id, "lmp-100");
    assert_eq!(attempt.context.correlation_id, "corr-1");
    assert_eq!(h.runtime.running(), vec![app_uri("app1", 100)]);
}
