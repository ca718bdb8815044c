//! Public entry point: ingest events and stream their progress.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::durable::{WorkflowEngine, WorkflowHandle};
use crate::error::Result;
use crate::model::{EventId, NewEvent, ProjectId};
use crate::orchestrator::{event_workflow_id, IngestInput, WorkflowOrchestrator};
use crate::pubsub::{event_topic, project_topic, PubSub};
use crate::state::{EventState, StateUpdate};
use crate::store::EventStore;
use crate::tracking::StateTracker;

/// Accepts normalized events from event sources and drives them through
/// the orchestrator.
///
/// Built with [`IngestorBuilder`](crate::IngestorBuilder).
pub struct EventIngestor {
    pub(crate) events: Arc<dyn EventStore>,
    pub(crate) pubsub: Arc<dyn PubSub>,
    pub(crate) engine: WorkflowEngine,
    pub(crate) orchestrator: Arc<WorkflowOrchestrator>,
    pub(crate) tracker: StateTracker,
}

impl EventIngestor {
    pub fn engine(&self) -> &WorkflowEngine {
        &self.engine
    }

    pub fn tracker(&self) -> &StateTracker {
        &self.tracker
    }

    /// Persist `event` and start processing it. Returns without waiting for
    /// the outcome.
    ///
    /// An error means processing could not even start; the event record is
    /// kept and its state is set to `Error`. Ignored events and failed
    /// project runs are visible only through state tracking.
    pub async fn ingest_event(&self, event: NewEvent) -> Result<EventId> {
        let (event_id, _handle) = self.start(event).await?;
        Ok(event_id)
    }

    /// Ingest `event` and forward every state update of it to `updates`
    /// until processing finishes. `updates` is closed on return.
    pub async fn track_ingest_event(
        &self,
        mut event: NewEvent,
        updates: mpsc::Sender<StateUpdate>,
    ) -> Result<()> {
        let event_id = event.ensure_id();

        // Subscribe first so the Pending update is not missed.
        let mut subscription = self.pubsub.subscribe(&event_topic(&event_id)).await?;

        let handle = match self.start(event).await {
            Ok((_, handle)) => handle,
            Err(err) => {
                subscription.unsubscribe();
                return Err(err);
            }
        };

        let done = handle.wait();
        tokio::pin!(done);

        // Updates are published before the workflow reports completion, so
        // preferring the subscription drains them all before `done` wins.
        let result = loop {
            tokio::select! {
                biased;
                payload = subscription.consume() => match payload {
                    Some(payload) => {
                        if !forward(&updates, &payload).await {
                            debug!(event_id = %event_id, "tracking receiver dropped");
                            break Ok(());
                        }
                    }
                    None => break Ok(()),
                },
                outcome = &mut done => {
                    break outcome.map(|state| {
                        debug!(event_id = %event_id, state = state.name(), "tracked event finished");
                    });
                }
            }
        };

        subscription.unsubscribe();
        result
    }

    /// Forward every project-event update of `project_id` to `updates` until
    /// `cancel` resolves, the receiver is dropped or the subscription ends.
    /// `updates` is closed on return; cancellation is not an error.
    pub async fn monitor_project_events(
        &self,
        project_id: &ProjectId,
        updates: mpsc::Sender<StateUpdate>,
        cancel: impl Future<Output = ()>,
    ) -> Result<()> {
        let mut subscription = self.pubsub.subscribe(&project_topic(project_id)).await?;
        tokio::pin!(cancel);

        loop {
            tokio::select! {
                biased;
                () = &mut cancel => {
                    debug!(project_id = %project_id, "project monitor cancelled");
                    break;
                }
                () = updates.closed() => break,
                payload = subscription.consume() => match payload {
                    Some(payload) => {
                        if !forward(&updates, &payload).await {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }

        subscription.unsubscribe();
        Ok(())
    }

    async fn start(&self, mut event: NewEvent) -> Result<(EventId, WorkflowHandle<EventState>)> {
        let event_id = event.ensure_id();
        let event = event.into_event(event_id);

        let event_id = self.events.add(&event).await?;
        info!(
            event_id = %event_id,
            source_id = %event.source_id,
            event_type = %event.event_type,
            "event ingested"
        );
        self.tracker.update_state(&event_id, &EventState::Pending).await;

        let input = IngestInput {
            event_id: event_id.clone(),
            source_id: event.source_id,
            association_token: event.association_token,
        };
        let orchestrator = self.orchestrator.clone();
        let started = self
            .engine
            .start(event_workflow_id(&event_id), move |ctx| async move {
                orchestrator.execute(ctx, input).await
            })
            .await;

        match started {
            Ok(handle) => Ok((event_id, handle)),
            Err(err) => {
                error!(event_id = %event_id, error = %err, "failed to start event workflow");
                let tracker = self.tracker.clone();
                let state = EventState::Error {
                    cause: err.to_string(),
                };
                let id = event_id.clone();
                tokio::spawn(async move { tracker.update_state(&id, &state).await });
                Err(err)
            }
        }
    }
}

/// Decode and forward one payload. Returns false once the receiver is gone.
async fn forward(updates: &mpsc::Sender<StateUpdate>, payload: &[u8]) -> bool {
    match StateUpdate::decode(payload) {
        Ok(update) => updates.send(update).await.is_ok(),
        Err(err) => {
            warn!(error = %err, "dropping undecodable state update");
            true
        }
    }
}
