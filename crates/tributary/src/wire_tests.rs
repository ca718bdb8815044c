//! Wire-format tests for state updates published on tracking topics.
//!
//! Observers outside this crate parse these payloads, so the JSON shape is
//! pinned here rather than only round-tripped.

use crate::model::{EventId, ProjectId, RunSummary};
use crate::state::{EventState, ProjectEventState, StateUpdate};
use serde_json::json;

// ============================================================================
// Event-level updates
// ============================================================================

#[test]
fn test_event_update_has_no_project_field() {
    let update = StateUpdate::event(EventId::from("evt_1"), EventState::Pending);

    let value: serde_json::Value = serde_json::from_slice(&update.encode().unwrap()).unwrap();

    assert_eq!(value["event_id"], "evt_1");
    assert!(value.get("project_id").is_none());
    assert_eq!(value["state"]["event"]["state"], "pending");
}

#[test]
fn test_processing_update_lists_both_project_sets() {
    let update = StateUpdate::event(
        EventId::from("evt_1"),
        EventState::Processing {
            active_project_ids: vec![ProjectId::from("p1")],
            ignored_project_ids: vec![ProjectId::from("p2"), ProjectId::from("p3")],
        },
    );

    let value: serde_json::Value = serde_json::from_slice(&update.encode().unwrap()).unwrap();

    assert_eq!(value["state"]["event"]["state"], "processing");
    assert_eq!(value["state"]["event"]["active_project_ids"], json!(["p1"]));
    assert_eq!(value["state"]["event"]["ignored_project_ids"], json!(["p2", "p3"]));
}

// ============================================================================
// Project-level updates
// ============================================================================

#[test]
fn test_project_error_keeps_partial_summary() {
    let update = StateUpdate::project(
        EventId::from("evt_1"),
        ProjectId::from("p1"),
        ProjectEventState::Error {
            cause: "session crashed".into(),
            run_summary: Some(RunSummary::new(json!({ "steps": 3 }))),
        },
    );

    let decoded = StateUpdate::decode(&update.encode().unwrap()).unwrap();

    assert_eq!(decoded, update);
    assert_eq!(decoded.project_id.as_ref().map(ProjectId::as_str), Some("p1"));
    match decoded.project_state() {
        Some(ProjectEventState::Error { cause, run_summary }) => {
            assert_eq!(cause, "session crashed");
            assert_eq!(run_summary.as_ref().unwrap().0["steps"], 3);
        }
        other => panic!("unexpected state: {other:?}"),
    }
}

#[test]
fn test_project_error_without_summary_omits_the_field() {
    let update = StateUpdate::project(
        EventId::from("evt_1"),
        ProjectId::from("p1"),
        ProjectEventState::Error {
            cause: "timeout".into(),
            run_summary: None,
        },
    );

    let value: serde_json::Value = serde_json::from_slice(&update.encode().unwrap()).unwrap();

    assert!(value["state"]["project"].get("run_summary").is_none());
}

#[test]
fn test_decode_rejects_garbage() {
    assert!(StateUpdate::decode(b"not json").is_err());
    assert!(StateUpdate::decode(br#"{"event_id":"e","state":{"event":{"state":"bogus"}}}"#).is_err());
}
