//! Per-project execution: the child workflow that runs one project's
//! reaction to one event.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::durable::{ActivityOptions, WorkflowContext};
use crate::error::Result;
use crate::model::{Event, EventId, Project, ProjectId, RunSummary};
use crate::state::ProjectEventState;
use crate::tracking::StateTracker;

/// A failed run, with whatever summary the run produced before failing.
#[derive(Debug)]
pub struct RunFailure {
    pub error: anyhow::Error,
    pub summary: Option<RunSummary>,
}

impl RunFailure {
    pub fn with_summary(error: anyhow::Error, summary: RunSummary) -> Self {
        Self {
            error,
            summary: Some(summary),
        }
    }
}

impl From<anyhow::Error> for RunFailure {
    fn from(error: anyhow::Error) -> Self {
        Self {
            error,
            summary: None,
        }
    }
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#}", self.error)
    }
}

/// Executes a project's reaction to an event.
#[async_trait]
pub trait Runner: Send + Sync {
    async fn run(
        &self,
        event: &Event,
        project: &Project,
        binding_name: &str,
    ) -> std::result::Result<RunSummary, RunFailure>;
}

/// Input of one project child workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectRun {
    pub event: Event,
    pub project: Project,
    pub binding_name: String,
}

/// Deterministic child workflow ID for an (event, project) pair.
pub fn project_workflow_id(event_id: &EventId, project_id: &ProjectId) -> String {
    format!("ingest-event-{event_id}-project-{project_id}")
}

/// Runs one project's reaction and records its terminal state.
///
/// A failed or timed-out run is recorded as [`ProjectEventState::Error`] and
/// returned as data; it never fails the workflow, so one project cannot
/// abort its siblings.
pub struct ProjectRunner {
    runner: Arc<dyn Runner>,
    tracker: StateTracker,
    activity: ActivityOptions,
}

impl ProjectRunner {
    pub fn new(runner: Arc<dyn Runner>, tracker: StateTracker, activity: ActivityOptions) -> Self {
        Self {
            runner,
            tracker,
            activity,
        }
    }

    pub async fn execute(&self, ctx: WorkflowContext, input: ProjectRun) -> Result<ProjectEventState> {
        let event_id = input.event.id.clone();
        let project_id = input.project.id.clone();

        let outcome = ctx
            .local_activity("run", &self.activity, || self.run_once(&input))
            .await;

        let state = match outcome {
            Ok(state) => state,
            Err(err) => ProjectEventState::Error {
                cause: err.to_string(),
                run_summary: None,
            },
        };

        match &state {
            ProjectEventState::Error { cause, .. } => warn!(
                event_id = %event_id,
                project_id = %project_id,
                cause = %cause,
                "project run failed"
            ),
            _ => info!(event_id = %event_id, project_id = %project_id, "project run completed"),
        }

        let written = ctx
            .side_effect("state:final", || {
                self.tracker
                    .update_project_state(&event_id, &project_id, &state)
            })
            .await;
        if let Err(err) = written {
            warn!(
                event_id = %event_id,
                project_id = %project_id,
                error = %err,
                "failed to journal final state write"
            );
        }

        Ok(state)
    }

    async fn run_once(&self, input: &ProjectRun) -> Result<ProjectEventState> {
        let state = match self
            .runner
            .run(&input.event, &input.project, &input.binding_name)
            .await
        {
            Ok(summary) => ProjectEventState::Completed {
                run_summary: summary,
            },
            Err(failure) => ProjectEventState::Error {
                cause: failure.to_string(),
                run_summary: failure.summary,
            },
        };
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::durable::{RetryPolicy, WorkflowEngine};
    use crate::model::NewEvent;
    use crate::store::{EventStore, InMemoryEventStore};
    use std::time::Duration;

    struct Fixed(std::result::Result<serde_json::Value, &'static str>);

    #[async_trait]
    impl Runner for Fixed {
        async fn run(
            &self,
            _event: &Event,
            _project: &Project,
            binding_name: &str,
        ) -> std::result::Result<RunSummary, RunFailure> {
            match &self.0 {
                Ok(value) => Ok(RunSummary::new(serde_json::json!({
                    "binding": binding_name,
                    "value": value,
                }))),
                Err(message) => Err(RunFailure::with_summary(
                    anyhow::anyhow!(*message),
                    RunSummary::new(serde_json::json!({ "partial": true })),
                )),
            }
        }
    }

    struct Hangs;

    #[async_trait]
    impl Runner for Hangs {
        async fn run(
            &self,
            _event: &Event,
            _project: &Project,
            _binding_name: &str,
        ) -> std::result::Result<RunSummary, RunFailure> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(RunSummary::default())
        }
    }

    async fn run_with(runner: impl Runner + 'static) -> (ProjectEventState, InMemoryEventStore) {
        let store = InMemoryEventStore::new();
        let event = NewEvent::new("src", "t", "x").into_event("evt_1".into());
        store.add(&event).await.unwrap();

        let project = Project {
            id: "p1".into(),
            account: "acme".into(),
            enabled: true,
        };
        let activity = ActivityOptions::new(Duration::from_millis(50), RetryPolicy::single_shot());
        let project_runner = Arc::new(ProjectRunner::new(
            Arc::new(runner),
            StateTracker::new(Arc::new(store.clone())),
            activity,
        ));

        let engine = WorkflowEngine::in_memory();
        let input = ProjectRun {
            event,
            project,
            binding_name: "slack".into(),
        };
        let state = engine
            .start(
                project_workflow_id(&"evt_1".into(), &"p1".into()),
                move |ctx| async move { project_runner.execute(ctx, input).await },
            )
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();
        (state, store)
    }

    #[tokio::test]
    async fn success_is_recorded_as_completed() {
        let (state, store) = run_with(Fixed(Ok(serde_json::json!(1)))).await;

        match &state {
            ProjectEventState::Completed { run_summary } => {
                assert_eq!(run_summary.0["binding"], "slack");
            }
            other => panic!("unexpected state: {other:?}"),
        }
        assert_eq!(store.project_state(&"evt_1".into(), &"p1".into()), Some(state));
    }

    #[tokio::test]
    async fn failure_is_data_not_a_workflow_error() {
        let (state, store) = run_with(Fixed(Err("integration exploded"))).await;

        match &state {
            ProjectEventState::Error { cause, run_summary } => {
                assert!(cause.contains("integration exploded"));
                assert_eq!(run_summary.as_ref().unwrap().0["partial"], true);
            }
            other => panic!("unexpected state: {other:?}"),
        }
        assert!(store
            .project_state(&"evt_1".into(), &"p1".into())
            .unwrap()
            .is_error());
    }

    #[tokio::test]
    async fn timeout_is_recorded_as_error() {
        let (state, _store) = run_with(Hangs).await;

        match state {
            ProjectEventState::Error { cause, run_summary } => {
                assert!(cause.contains("timed out"));
                assert!(run_summary.is_none());
            }
            other => panic!("unexpected state: {other:?}"),
        }
    }

    #[test]
    fn workflow_ids_are_deterministic() {
        assert_eq!(
            project_workflow_id(&"evt_1".into(), &"p1".into()),
            "ingest-event-evt_1-project-p1"
        );
    }
}
