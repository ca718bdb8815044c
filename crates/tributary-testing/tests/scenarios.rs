//! End-to-end ingestion scenarios over the in-memory harness.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tributary::{
    EventState, NewEvent, ProjectEventState, ProjectId, TrackedState, TributaryConfig,
    PROJECT_DISABLED, SOURCE_ACCOUNT_DISABLED, SOURCE_DISABLED,
};
use tributary_testing::{RunCall, Script, TestHarness};

fn ids(ids: &[&str]) -> Vec<ProjectId> {
    ids.iter().map(|id| ProjectId::from(*id)).collect()
}

/// An enabled account "acme" owning source "github".
fn harness() -> TestHarness {
    let harness = TestHarness::new();
    harness.account("acme").source("github", "acme");
    harness
}

fn push(id: &str, token: &str) -> NewEvent {
    NewEvent::new("github", token, "push").with_id(id)
}

#[tokio::test]
async fn three_bindings_split_into_active_and_ignored() {
    let harness = harness();
    harness
        .project("p1", "acme")
        .project("p2", "acme")
        .project("p3", "acme")
        .binding("p1", "github", "deploy", "repo-1")
        .binding("p2", "github", "deploy", "repo-1")
        .disabled_binding("p3", "github", "deploy", "repo-1");
    harness.projects.set_enabled(&"p2".into(), false);

    let (result, updates) = harness.track(push("evt_1", "repo-1")).await;
    result.unwrap();

    let processing = updates
        .iter()
        .find_map(|u| match u.event_state() {
            Some(EventState::Processing {
                active_project_ids,
                ignored_project_ids,
            }) => Some((active_project_ids.clone(), ignored_project_ids.clone())),
            _ => None,
        })
        .expect("processing update");
    assert_eq!(processing, (ids(&["p1"]), ids(&["p2", "p3"])));

    assert_eq!(
        harness.event_state("evt_1"),
        Some(EventState::Processed {
            all_project_ids: ids(&["p1"]),
            failed_project_ids: vec![],
        })
    );

    let states = harness.project_states("evt_1");
    assert!(matches!(states[&ProjectId::from("p1")], ProjectEventState::Completed { .. }));
    for ignored in ["p2", "p3"] {
        assert_eq!(
            states[&ProjectId::from(ignored)],
            ProjectEventState::Ignored {
                reason: PROJECT_DISABLED.to_string()
            }
        );
    }
    assert_eq!(
        harness.runner.calls(),
        vec![RunCall {
            event_id: "evt_1".into(),
            project_id: "p1".into(),
            binding_name: "deploy".into(),
        }]
    );
}

#[tokio::test]
async fn every_event_reaches_a_terminal_state() {
    let harness = harness();
    harness
        .project("p1", "acme")
        .project("p2", "acme")
        .binding("p1", "github", "deploy", "repo-1")
        .binding("p2", "github", "deploy", "repo-2");
    harness.runner.fail("p2", "build broke");

    harness.ingestor.ingest_event(push("evt_ok", "repo-1")).await.unwrap();
    harness.ingestor.ingest_event(push("evt_fail", "repo-2")).await.unwrap();
    harness.ingestor.ingest_event(push("evt_none", "repo-3")).await.unwrap();
    harness
        .ingestor
        .ingest_event(NewEvent::new("gitlab", "repo-1", "push").with_id("evt_unknown"))
        .await
        .unwrap();

    for id in ["evt_ok", "evt_fail", "evt_none", "evt_unknown"] {
        let state = harness
            .wait_for_terminal(id, Duration::from_secs(5))
            .await
            .unwrap_or_else(|| panic!("{id} has no state"));
        assert!(state.is_terminal(), "{id} stuck in {}", state.name());
    }

    assert!(matches!(
        harness.event_state("evt_unknown"),
        Some(EventState::Error { .. })
    ));
}

#[tokio::test]
async fn event_without_bindings_is_processed_with_nothing_to_run() {
    let harness = harness();

    let (result, _) = harness.track(push("evt_1", "repo-1")).await;
    result.unwrap();

    assert_eq!(
        harness.event_state("evt_1"),
        Some(EventState::Processed {
            all_project_ids: vec![],
            failed_project_ids: vec![],
        })
    );
    assert!(harness.runner.calls().is_empty());
}

#[tokio::test]
async fn disabled_source_is_ignored_without_project_states() {
    let harness = harness();
    harness
        .project("p1", "acme")
        .binding("p1", "github", "deploy", "repo-1");
    harness.sources.set_source_enabled(&"github".into(), false);

    let (result, updates) = harness.track(push("evt_1", "repo-1")).await;
    result.unwrap();

    assert_eq!(
        harness.event_state("evt_1"),
        Some(EventState::Ignored {
            reason: SOURCE_DISABLED.to_string()
        })
    );
    assert!(harness.project_states("evt_1").is_empty());
    assert!(updates
        .iter()
        .all(|u| matches!(u.state, TrackedState::Event(_))));
    assert!(harness.runner.calls().is_empty());
}

#[tokio::test]
async fn disabled_source_account_is_ignored() {
    let harness = harness();
    harness
        .project("p1", "acme")
        .binding("p1", "github", "deploy", "repo-1");
    harness.accounts.set_enabled(&"acme".into(), false);

    let (result, _) = harness.track(push("evt_1", "repo-1")).await;
    result.unwrap();

    assert_eq!(
        harness.event_state("evt_1"),
        Some(EventState::Ignored {
            reason: SOURCE_ACCOUNT_DISABLED.to_string()
        })
    );
    assert!(harness.project_states("evt_1").is_empty());
}

#[tokio::test]
async fn only_exact_association_tokens_match() {
    let harness = harness();
    harness
        .project("p1", "acme")
        .project("p2", "acme")
        .project("p3", "acme")
        .binding("p1", "github", "deploy", "repo-1")
        .binding("p2", "github", "deploy", "repo-10")
        .binding("p3", "github", "deploy", "REPO-1");

    let (result, _) = harness.track(push("evt_1", "repo-1")).await;
    result.unwrap();

    assert_eq!(
        harness.event_state("evt_1"),
        Some(EventState::Processed {
            all_project_ids: ids(&["p1"]),
            failed_project_ids: vec![],
        })
    );
    assert_eq!(harness.runner.run_counts().keys().collect::<Vec<_>>(), [&ProjectId::from("p1")]);
}

#[tokio::test]
async fn reingesting_the_same_event_runs_it_once() {
    let harness = harness();
    harness
        .project("p1", "acme")
        .project("p2", "acme")
        .binding("p1", "github", "deploy", "repo-1")
        .binding("p2", "github", "deploy", "repo-1");

    let (first, _) = harness.track(push("evt_1", "repo-1")).await;
    first.unwrap();
    let executions = harness.ingestor.engine().executions_started();
    let finished = harness.event_state("evt_1");

    let (second, _) = harness.track(push("evt_1", "repo-1")).await;
    second.unwrap();

    assert_eq!(harness.ingestor.engine().executions_started(), executions);
    assert_eq!(harness.event_state("evt_1"), finished);
    assert!(harness.runner.run_counts().values().all(|&n| n == 1));
    assert!(harness.journal.is_completed("ingest-event-evt_1"));
}

#[tokio::test]
async fn one_failing_project_does_not_affect_its_siblings() {
    let harness = harness();
    harness
        .project("p1", "acme")
        .project("p2", "acme")
        .project("p3", "acme")
        .binding("p1", "github", "deploy", "repo-1")
        .binding("p2", "github", "deploy", "repo-1")
        .binding("p3", "github", "deploy", "repo-1");
    harness.runner.script(
        "p2",
        Script::Fail {
            message: "integration exploded".into(),
            summary: Some(serde_json::json!({ "steps": 2 })),
        },
    );

    let (result, _) = harness.track(push("evt_1", "repo-1")).await;
    result.unwrap();

    assert_eq!(
        harness.event_state("evt_1"),
        Some(EventState::Processed {
            all_project_ids: ids(&["p1", "p2", "p3"]),
            failed_project_ids: ids(&["p2"]),
        })
    );

    let states = harness.project_states("evt_1");
    assert!(matches!(states[&ProjectId::from("p1")], ProjectEventState::Completed { .. }));
    assert!(matches!(states[&ProjectId::from("p3")], ProjectEventState::Completed { .. }));
    match &states[&ProjectId::from("p2")] {
        ProjectEventState::Error { cause, run_summary } => {
            assert!(cause.contains("integration exploded"));
            assert_eq!(run_summary.as_ref().unwrap().0["steps"], 2);
        }
        other => panic!("unexpected state: {other:?}"),
    }
}

#[tokio::test]
async fn slow_runs_time_out_as_project_errors() {
    let config = TributaryConfig::from_toml_str("[activity]\ntimeout_ms = 50\n").unwrap();
    let harness = TestHarness::with_config(config);
    harness
        .account("acme")
        .source("github", "acme")
        .project("p1", "acme")
        .project("p2", "acme")
        .binding("p1", "github", "deploy", "repo-1")
        .binding("p2", "github", "deploy", "repo-1");
    harness.runner.delay("p1", Duration::from_secs(2));

    let (result, _) = harness.track(push("evt_1", "repo-1")).await;
    result.unwrap();

    assert_eq!(
        harness.event_state("evt_1"),
        Some(EventState::Processed {
            all_project_ids: ids(&["p1", "p2"]),
            failed_project_ids: ids(&["p1"]),
        })
    );
    match &harness.project_states("evt_1")[&ProjectId::from("p1")] {
        ProjectEventState::Error { cause, run_summary } => {
            assert!(cause.contains("timed out"));
            assert!(run_summary.is_none());
        }
        other => panic!("unexpected state: {other:?}"),
    }
}

#[tokio::test]
async fn litterbox_tokens_override_the_binding_name() {
    let config = TributaryConfig::from_toml_str("litterbox = true\n").unwrap();
    let harness = TestHarness::with_config(config);
    harness
        .account("acme")
        .source("github", "acme")
        .project("p1", "acme")
        .binding("p1", "github", "deploy", "repo-1");

    let (result, _) = harness.track(push("evt_1", "repo-1,preview-hook")).await;
    result.unwrap();

    assert_eq!(
        harness.runner.calls(),
        vec![RunCall {
            event_id: "evt_1".into(),
            project_id: "p1".into(),
            binding_name: "preview-hook".into(),
        }]
    );
}

#[tokio::test]
async fn tracking_ends_with_the_terminal_event_state() {
    let harness = harness();
    harness
        .project("p1", "acme")
        .binding("p1", "github", "deploy", "repo-1");

    let (result, updates) = harness.track(push("evt_1", "repo-1")).await;
    result.unwrap();

    assert_eq!(updates.first().and_then(|u| u.event_state()), Some(&EventState::Pending));
    assert!(matches!(
        updates.last().and_then(|u| u.event_state()),
        Some(EventState::Processed { .. })
    ));
    assert!(updates.iter().all(|u| u.event_id.as_str() == "evt_1"));
}

#[tokio::test]
async fn project_monitor_stops_cleanly_on_cancellation() {
    let harness = std::sync::Arc::new(harness());
    harness
        .project("p1", "acme")
        .binding("p1", "github", "deploy", "repo-1");

    let (tx, mut rx) = mpsc::channel(32);
    let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
    let monitor = {
        let harness = harness.clone();
        tokio::spawn(async move {
            harness
                .ingestor
                .monitor_project_events(&"p1".into(), tx, async {
                    let _ = cancel_rx.await;
                })
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let (result, _) = harness.track(push("evt_1", "repo-1")).await;
    result.unwrap();

    let mut seen = Vec::new();
    for _ in 0..2 {
        let update = rx.recv().await.unwrap();
        assert_eq!(update.project_id.as_ref().map(|p| p.as_str()), Some("p1"));
        seen.push(update.project_state().cloned());
    }
    assert_eq!(seen[0], Some(ProjectEventState::Pending));
    assert!(matches!(seen[1], Some(ProjectEventState::Completed { .. })));

    cancel_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(1), monitor)
        .await
        .expect("monitor returns after cancellation")
        .unwrap()
        .unwrap();
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn project_monitor_stops_when_the_receiver_is_dropped() {
    let harness = std::sync::Arc::new(harness());
    let (tx, rx) = mpsc::channel(1);

    let monitor = {
        let harness = harness.clone();
        tokio::spawn(async move {
            harness
                .ingestor
                .monitor_project_events(&"p1".into(), tx, std::future::pending())
                .await
        })
    };
    drop(rx);

    tokio::time::timeout(Duration::from_secs(1), monitor)
        .await
        .expect("monitor returns once nobody listens")
        .unwrap()
        .unwrap();
}
