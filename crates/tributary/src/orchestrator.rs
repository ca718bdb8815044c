//! The parent workflow driving one event from resolution to its terminal
//! state.

use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::durable::{ActivityOptions, WorkflowContext};
use crate::error::Result;
use crate::model::{EventId, ProjectId, SourceId};
use crate::resolver::{BindingResolver, ResolveRequest, Resolution};
use crate::runner::{project_workflow_id, ProjectRun, ProjectRunner};
use crate::state::{EventState, ProjectEventState};
use crate::tracking::StateTracker;

/// Reason recorded for projects whose binding matched but are not live.
pub const PROJECT_DISABLED: &str = "disabled";

/// Deterministic workflow ID for an event.
pub fn event_workflow_id(event_id: &EventId) -> String {
    format!("ingest-event-{event_id}")
}

/// Input of the parent workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestInput {
    pub event_id: EventId,
    pub source_id: SourceId,
    pub association_token: String,
}

/// Resolves an event, fans out one [`ProjectRunner`] child per live project
/// and aggregates the outcome.
///
/// ```text
/// resolve ──► error ─────────────────────────────► Error{cause}
///    │
///    ├──────► ignore ────────────────────────────► Ignored{reason}
///    │
///    └──────► Processing{active, ignored}
///               ├─ ignored: project state Ignored{"disabled"}
///               └─ active:  project state Pending ──► child workflow
///                                                      │
///                            join all children ◄───────┘
///                               │
///                               └────────────────────► Processed{all, failed}
/// ```
pub struct WorkflowOrchestrator {
    resolver: Arc<BindingResolver>,
    runner: Arc<ProjectRunner>,
    tracker: StateTracker,
    activity: ActivityOptions,
}

impl WorkflowOrchestrator {
    pub fn new(
        resolver: Arc<BindingResolver>,
        runner: Arc<ProjectRunner>,
        tracker: StateTracker,
        activity: ActivityOptions,
    ) -> Self {
        Self {
            resolver,
            runner,
            tracker,
            activity,
        }
    }

    /// Run the workflow body. Returns the terminal event state.
    pub async fn execute(&self, ctx: WorkflowContext, input: IngestInput) -> Result<EventState> {
        let event_id = input.event_id.clone();
        let request = ResolveRequest {
            event_id: input.event_id,
            source_id: input.source_id,
            association_token: input.association_token,
        };

        let resolver = &self.resolver;
        let resolution = ctx
            .local_activity("resolve", &self.activity, || resolver.resolve(&request))
            .await;

        let resolved = match resolution {
            Ok(Resolution::Resolved(resolved)) => resolved,
            Ok(Resolution::Ignore { reason }) => {
                info!(event_id = %event_id, reason = %reason, "event ignored");
                let state = EventState::Ignored { reason };
                self.record_event_state(&ctx, &event_id, &state).await;
                return Ok(state);
            }
            Err(err) => {
                warn!(event_id = %event_id, error = %err, "binding resolution failed");
                let state = EventState::Error {
                    cause: err.to_string(),
                };
                self.record_event_state(&ctx, &event_id, &state).await;
                return Ok(state);
            }
        };

        let active = resolved.active_project_ids();
        let ignored = resolved.ignored_project_ids();
        info!(
            event_id = %event_id,
            active = active.len(),
            ignored = ignored.len(),
            "processing event"
        );

        self.record_event_state(
            &ctx,
            &event_id,
            &EventState::Processing {
                active_project_ids: active.clone(),
                ignored_project_ids: ignored.clone(),
            },
        )
        .await;

        for project_id in &ignored {
            let state = ProjectEventState::Ignored {
                reason: PROJECT_DISABLED.to_string(),
            };
            self.record_project_state(&ctx, &event_id, project_id, &state)
                .await;
        }

        let mut failed = Vec::new();
        let mut children = Vec::with_capacity(active.len());
        for project_id in &active {
            self.record_project_state(&ctx, &event_id, project_id, &ProjectEventState::Pending)
                .await;

            let (Some(project), Some(binding)) = (
                resolved.projects.get(project_id),
                resolved.bindings.get(project_id),
            ) else {
                warn!(
                    event_id = %event_id,
                    project_id = %project_id,
                    "active project has no binding"
                );
                let state = ProjectEventState::Error {
                    cause: "no binding for project".to_string(),
                    run_summary: None,
                };
                self.record_project_state(&ctx, &event_id, project_id, &state)
                    .await;
                failed.push(project_id.clone());
                continue;
            };

            let input = ProjectRun {
                event: resolved.event.clone(),
                project: project.clone(),
                binding_name: binding.name.clone(),
            };
            let runner = self.runner.clone();
            let child_id = project_workflow_id(&event_id, project_id);
            let parent = &ctx;
            children.push(async move {
                let outcome = parent
                    .child_workflow(&child_id, move |child_ctx| async move {
                        runner.execute(child_ctx, input).await
                    })
                    .await;
                (project_id.clone(), outcome)
            });
        }

        for (project_id, outcome) in join_all(children).await {
            match outcome {
                Ok(state) if !state.is_error() => {}
                Ok(_) => failed.push(project_id),
                Err(err) => {
                    warn!(
                        event_id = %event_id,
                        project_id = %project_id,
                        error = %err,
                        "project workflow failed"
                    );
                    failed.push(project_id);
                }
            }
        }
        failed.sort();

        let state = EventState::Processed {
            all_project_ids: active,
            failed_project_ids: failed,
        };
        info!(event_id = %event_id, "event processed");
        self.record_event_state(&ctx, &event_id, &state).await;
        Ok(state)
    }

    // State writes are journaled so replays skip them, but they are bounded
    // by the tracker's own timeout and can never fail the workflow.

    async fn record_event_state(
        &self,
        ctx: &WorkflowContext,
        event_id: &EventId,
        state: &EventState,
    ) {
        let step_id = format!("state:{}", state.name());
        let written = ctx
            .side_effect(&step_id, || self.tracker.update_state(event_id, state))
            .await;
        if let Err(err) = written {
            warn!(
                event_id = %event_id,
                step_id = %step_id,
                error = %err,
                "failed to journal state write"
            );
        }
    }

    async fn record_project_state(
        &self,
        ctx: &WorkflowContext,
        event_id: &EventId,
        project_id: &ProjectId,
        state: &ProjectEventState,
    ) {
        let step_id = format!("project-state:{project_id}:{}", state.name());
        let written = ctx
            .side_effect(&step_id, || {
                self.tracker.update_project_state(event_id, project_id, state)
            })
            .await;
        if let Err(err) = written {
            warn!(
                event_id = %event_id,
                project_id = %project_id,
                step_id = %step_id,
                error = %err,
                "failed to journal state write"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_workflow_id_is_derived_from_the_event_id() {
        assert_eq!(event_workflow_id(&"evt_1".into()), "ingest-event-evt_1");
    }
}
