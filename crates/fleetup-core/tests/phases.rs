//! ---
//! fu_section: "01-core-functionality"
//! fu_subsection: "tests"
//! fu_type: "test"
//! fu_scope: "code"
//! fu_description: "Phase idempotency and crash-resume behaviour against the fake runtime."
//! fu_version: "v0.0.0-prealpha"
//! fu_owner: "tbd"
//! ---
use fleetup_core::phases::{FetchPhase, Phase, PhaseName};
use fleetup_core::{
    CancelSignal, EventType, ResolutionMode, RuntimeUpdateState, Selector, UpdateCommand,
    UpdateContext, UpdateError, UpdateRequest, UpdateRunner, UpdateSettings,
};
use fleetup_testharness::{app_uri, target, target_set, Harness, RuntimeOp};

use EventType::*;

fn two_versions() -> Harness {
    Harness::new(target_set(vec![
        target("lmp-100", 100, &["app1", "app2"]),
        target("lmp-101", 101, &["app1", "app2"]),
    ]))
    .unwrap()
}

fn single() -> Harness {
    Harness::new(target_set(vec![target("lmp-100", 100, &["app1", "app2"])])).unwrap()
}

#[tokio::test]
async fn repeated_fetch_fetches_once() {
    let h = single();
    let first = h.run(UpdateCommand::Fetch, Selector::Latest).await;
    assert!(first.is_ok(), "{:?}", first.result);
    let second = h.run(UpdateCommand::Fetch, Selector::Latest).await;
    assert!(second.is_ok(), "{:?}", second.result);

    assert_eq!(second.context.mode, ResolutionMode::Resume);
    assert_eq!(first.context.correlation_id, second.context.correlation_id);
    assert_eq!(h.runtime.calls(RuntimeOp::NewUpdate), 1);
    assert_eq!(h.runtime.calls(RuntimeOp::Fetch), 1);
    assert_eq!(
        h.collector.event_outcomes(),
        vec![(DownloadStarted, None), (DownloadCompleted, Some(true))]
    );
}

#[tokio::test]
async fn restart_between_install_and_start_resumes_at_start() {
    let h = single();
    assert!(h.run(UpdateCommand::Fetch, Selector::Latest).await.is_ok());
    assert!(h.run(UpdateCommand::Install, Selector::Latest).await.is_ok());

    let runner = UpdateRunner::new(h.restart());
    let attempt = runner
        .run(
            UpdateCommand::Update,
            UpdateRequest::new(Selector::Latest),
            &CancelSignal::never(),
        )
        .await;
    assert!(attempt.is_ok(), "{:?}", attempt.result);

    assert_eq!(h.runtime.calls(RuntimeOp::Fetch), 1);
    assert_eq!(h.runtime.calls(RuntimeOp::Install), 1);
    assert_eq!(h.runtime.calls(RuntimeOp::Start), 1);
    assert_eq!(
        h.collector.event_types(),
        vec![
            DownloadStarted,
            DownloadCompleted,
            InstallationStarted,
            InstallationApplied,
            InstallationCompleted
        ]
    );
    let current = h.store.current_install().unwrap().unwrap();
    assert_eq!(current.name, "lmp-100");
    assert_eq!(current.correlation_id, attempt.context.correlation_id);
}

#[tokio::test]
async fn failed_fetch_is_retried_without_reinitializing() {
    let h = single();
    h.runtime.fail_next(RuntimeOp::Fetch);
    let failed = h.run(UpdateCommand::Fetch, Selector::Latest).await;
    let err = failed.result.unwrap_err();
    assert_eq!(err.phase(), Some(PhaseName::Fetch));
    assert_eq!(
        h.runtime.ledger().current_status().unwrap().state,
        RuntimeUpdateState::Fetching
    );

    let retried = h.run(UpdateCommand::Fetch, Selector::Latest).await;
    assert!(retried.is_ok(), "{:?}", retried.result);
    assert_eq!(h.runtime.calls(RuntimeOp::Init), 1);
    assert_eq!(h.runtime.calls(RuntimeOp::Fetch), 2);

    let outcomes = h.collector.event_outcomes();
    assert_eq!(
        outcomes,
        vec![
            (DownloadStarted, None),
            (DownloadCompleted, Some(false)),
            (DownloadStarted, None),
            (DownloadCompleted, Some(true)),
        ]
    );
    let failure = &h.collector.events()[1];
    assert!(failure.event.details.contains("injected failure"));
}

#[tokio::test]
async fn install_refuses_an_unfetched_update() {
    let h = single();
    h.runtime.with_ledger(|ledger| {
        ledger.create("lmp-100|corr-1");
        ledger.init(&[app_uri("app1", 100)]).unwrap();
    });

    let attempt = h.run(UpdateCommand::Install, Selector::Latest).await;
    let err = attempt.result.unwrap_err();
    assert!(matches!(
        err.root(),
        UpdateError::PhaseOrdering {
            phase: PhaseName::Stop,
            state: RuntimeUpdateState::Initialized,
        }
    ));
    assert_eq!(h.runtime.calls(RuntimeOp::Install), 0);
}

#[tokio::test]
async fn install_without_an_update_reports_nothing_in_progress() {
    let h = single();
    let attempt = h.run(UpdateCommand::Install, Selector::Latest).await;
    assert!(matches!(
        attempt.result.unwrap_err().root(),
        UpdateError::NoUpdateInProgress
    ));
}

#[tokio::test]
async fn fetch_phase_rejects_uninitialized_update() {
    let h = single();
    h.runtime.with_ledger(|ledger| {
        ledger.create("lmp-100|corr-1");
    });
    let mut ctx = UpdateContext::new(UpdateRequest::default());
    ctx.to = target("lmp-100", 100, &["app1"]);

    let err = FetchPhase
        .execute(h.env.as_ref(), &mut ctx, &CancelSignal::never())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        UpdateError::NotInitialized(RuntimeUpdateState::Created)
    ));
    assert_eq!(h.runtime.calls(RuntimeOp::Fetch), 0);
}

#[tokio::test]
async fn start_failure_still_reports_and_keeps_identity() {
    let h = two_versions();
    let first = h.run(UpdateCommand::Update, Selector::Version(100)).await;
    assert!(first.is_ok(), "{:?}", first.result);
    h.collector.clear();

    h.runtime.break_start(app_uri("app2", 101));
    let attempt = h.run(UpdateCommand::Update, Selector::Latest).await;
    let err = attempt.result.unwrap_err();
    assert!(err.is_start_failed());
    assert_eq!(err.failed_target(), Some("lmp-101"));

    assert_eq!(
        h.collector.event_outcomes(),
        vec![
            (DownloadStarted, None),
            (DownloadCompleted, Some(true)),
            (InstallationStarted, None),
            (InstallationApplied, None),
            (InstallationCompleted, Some(false)),
        ]
    );
    let report = h.collector.reports().pop().unwrap();
    assert_eq!(report.apps["app2"].state, "installed");
    assert_eq!(h.env.identity.current().target_id, "lmp-100");

    let history = h.store.install_history(Some("lmp-101")).unwrap();
    assert!(history.last().unwrap().is_failed_start());
    assert_eq!(h.store.current_install().unwrap().unwrap().name, "lmp-100");
}

#[tokio::test]
async fn cancellation_stops_before_the_first_phase() {
    let h = single();
    let (handle, signal) = CancelSignal::pair();
    handle.cancel();
    let attempt = h
        .runner()
        .run(
            UpdateCommand::Update,
            UpdateRequest::new(Selector::Latest),
            &signal,
        )
        .await;
    let err = attempt.result.unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(err.phase(), Some(PhaseName::Check));
    assert_eq!(h.runtime.calls(RuntimeOp::NewUpdate), 0);
}

#[tokio::test]
async fn conflicting_selector_requires_cancel_first() {
    let h = two_versions();
    assert!(h.run(UpdateCommand::Fetch, Selector::Version(100)).await.is_ok());

    let conflict = h.run(UpdateCommand::Update, Selector::Version(101)).await;
    assert!(matches!(
        conflict.result.unwrap_err().root(),
        UpdateError::ResumeConflict { .. }
    ));

    h.runner().cancel_update().await.unwrap();
    let attempt = h.run(UpdateCommand::Update, Selector::Version(101)).await;
    assert!(attempt.is_ok(), "{:?}", attempt.result);
    assert_eq!(attempt.context.to.id, "lmp-101");
}

#[tokio::test]
async fn cancel_without_update_fails() {
    let h = single();
    assert!(matches!(
        h.runner().cancel_update().await,
        Err(UpdateError::NoUpdateInProgress)
    ));
}

#[tokio::test]
async fn converged_device_is_up_to_date() {
    let h = single();
    assert!(h.run(UpdateCommand::Update, Selector::Latest).await.is_ok());
    let events = h.collector.events().len();

    let again = h.run(UpdateCommand::Update, Selector::Latest).await;
    assert!(again.result.unwrap_err().is_no_update());
    assert_eq!(h.runtime.calls(RuntimeOp::NewUpdate), 1);
    assert_eq!(h.collector.events().len(), events);
}

#[tokio::test]
async fn init_events_follow_the_setting() {
    let settings = UpdateSettings {
        report_init: true,
        ..UpdateSettings::default()
    };
    let h = Harness::with_settings(
        target_set(vec![target("lmp-100", 100, &["app1"])]),
        settings,
    )
    .unwrap();
    assert!(h.run(UpdateCommand::Fetch, Selector::Latest).await.is_ok());
    assert_eq!(
        h.collector.event_outcomes(),
        vec![
            (UpdateInitStarted, None),
            (UpdateInitCompleted, Some(true)),
            (DownloadStarted, None),
            (DownloadCompleted, Some(true)),
        ]
    );
}

#[tokio::test]
async fn target_without_apps_prunes_the_previous_ones() {
    let h = Harness::new(target_set(vec![
        target("lmp-100", 100, &["app1", "app2"]),
        target("lmp-101", 101, &[]),
    ]))
    .unwrap();
    assert!(h.run(UpdateCommand::Update, Selector::Version(100)).await.is_ok());
    assert_eq!(h.runtime.running().len(), 2);

    let attempt = h.run(UpdateCommand::Update, Selector::Latest).await;
    assert!(attempt.is_ok(), "{:?}", attempt.result);
    assert!(h.runtime.running().is_empty());
    let stopped = h.runtime.stopped();
    assert_eq!(
        stopped.last().unwrap(),
        &vec![app_uri("app1", 100), app_uri("app2", 100)]
    );
}

#[tokio::test]
async fn disabled_apps_are_left_alone() {
    let settings = UpdateSettings {
        enabled_apps: Some(vec!["app1".to_string()]),
        ..UpdateSettings::default()
    };
    let h = Harness::with_settings(
        target_set(vec![target("lmp-100", 100, &["app1", "app2"])]),
        settings,
    )
    .unwrap();
    let attempt = h.run(UpdateCommand::Update, Selector::Latest).await;
    assert!(attempt.is_ok(), "{:?}", attempt.result);
    assert_eq!(h.runtime.running(), vec![app_uri("app1", 100)]);
    assert_eq!(h.env.identity.current().app_names, vec!["app1".to_string()]);
}

#[tokio::test]
async fn only_fetching_commands_refresh_targets() {
    let h = single();
    let refreshed = h
        .runner()
        .run(
            UpdateCommand::Fetch,
            UpdateRequest::new(Selector::Latest).refreshed(),
            &CancelSignal::never(),
        )
        .await;
    assert!(refreshed.is_ok(), "{:?}", refreshed.result);
    assert!(h.run(UpdateCommand::Install, Selector::Latest).await.is_ok());

    assert_eq!(h.source.loads(), 2);
    assert_eq!(h.source.refreshes(), 1);
}

#[tokio::test]
async fn unreachable_server_fails_check_and_keeps_the_update() {
    let h = single();
    assert!(h.run(UpdateCommand::Fetch, Selector::Latest).await.is_ok());
    let before = h.runtime.ledger().current_status().unwrap();

    h.source.set_unreachable(true);
    let attempt = h.run(UpdateCommand::Install, Selector::Latest).await;
    let err = attempt.result.unwrap_err();
    assert_eq!(err.phase(), Some(PhaseName::Check));
    assert!(matches!(err.root(), UpdateError::Metadata(_)));
    assert_eq!(h.runtime.ledger().current_status().unwrap(), before);

    h.source.set_unreachable(false);
    let resumed = h.run(UpdateCommand::Install, Selector::Latest).await;
    assert!(resumed.is_ok(), "{:?}", resumed.result);
    assert_eq!(h.runtime.calls(RuntimeOp::Install), 1);
}

#[tokio::test]
async fn failed_prune_counts_as_a_failed_start() {
    let h = Harness::new(target_set(vec![
        target("lmp-100", 100, &["app1", "app2"]),
        target("lmp-101", 101, &[]),
    ]))
    .unwrap();
    assert!(h.run(UpdateCommand::Update, Selector::Version(100)).await.is_ok());
    assert!(h.run(UpdateCommand::Fetch, Selector::Latest).await.is_ok());
    assert!(h.run(UpdateCommand::Install, Selector::Latest).await.is_ok());
    h.collector.clear();

    h.runtime.fail_next(RuntimeOp::Stop);
    let attempt = h.run(UpdateCommand::Start, Selector::Latest).await;
    let err = attempt.result.unwrap_err();
    assert!(err.is_start_failed(), "{err}");
    assert_eq!(err.failed_target(), Some("lmp-101"));
    assert_eq!(h.runtime.calls(RuntimeOp::Start), 1);
    assert_eq!(
        h.collector.event_outcomes(),
        vec![(InstallationCompleted, Some(false))]
    );

    assert!(h.store.pending_install().unwrap().is_none());
    assert_eq!(h.store.consecutive_start_failures("lmp-101").unwrap(), 1);
    assert_eq!(h.store.current_install().unwrap().unwrap().name, "lmp-100");
}

#[tokio::test]
async fn failed_install_still_reports_the_attempt() {
    let h = single();
    assert!(h.run(UpdateCommand::Fetch, Selector::Latest).await.is_ok());
    h.collector.clear();

    h.runtime.fail_next(RuntimeOp::Install);
    let attempt = h.run(UpdateCommand::Install, Selector::Latest).await;
    let err = attempt.result.unwrap_err();
    assert_eq!(err.phase(), Some(PhaseName::Install));
    assert!(matches!(err.root(), UpdateError::Runtime(_)));
    // InstallationApplied is sent even though the install failed, and has no outcome.
    assert_eq!(
        h.collector.event_outcomes(),
        vec![(InstallationStarted, None), (InstallationApplied, None)]
    );
}

#[tokio::test]
async fn failed_stop_completes_the_installation_as_failed() {
    let h = two_versions();
    assert!(h.run(UpdateCommand::Update, Selector::Version(100)).await.is_ok());
    assert!(h.run(UpdateCommand::Fetch, Selector::Latest).await.is_ok());
    h.collector.clear();

    h.runtime.fail_next(RuntimeOp::Stop);
    let attempt = h.run(UpdateCommand::Install, Selector::Latest).await;
    let err = attempt.result.unwrap_err();
    assert_eq!(err.phase(), Some(PhaseName::Stop));
    assert_eq!(
        h.collector.event_outcomes(),
        vec![(InstallationStarted, None), (InstallationCompleted, Some(false))]
    );
    assert_eq!(h.runtime.calls(RuntimeOp::Install), 0);
    assert_eq!(
        h.runtime.running(),
        vec![app_uri("app1", 100), app_uri("app2", 100)]
    );
}
