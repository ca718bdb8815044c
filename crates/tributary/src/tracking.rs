//! State tracking: bounded, failure-tolerant state writes, and the store
//! decorator that republishes every successful write.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use smallvec::{smallvec, SmallVec};
use tracing::{debug, warn};

use crate::error::Result;
use crate::model::{Event, EventId, ProjectId};
use crate::pubsub::{event_topic, project_topic, PubSub};
use crate::state::{EventState, ProjectEventState, StateUpdate};
use crate::store::EventStore;

/// Default bound for a single state write.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Records event and project-event transitions.
///
/// Writes never fail the caller: a store error or timeout is logged and
/// dropped, so a broken observability path cannot fail a workflow.
#[derive(Clone)]
pub struct StateTracker {
    store: Arc<dyn EventStore>,
    write_timeout: Duration,
}

impl StateTracker {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self::with_timeout(store, DEFAULT_WRITE_TIMEOUT)
    }

    pub fn with_timeout(store: Arc<dyn EventStore>, write_timeout: Duration) -> Self {
        Self {
            store,
            write_timeout,
        }
    }

    /// Record the aggregate state of an event.
    pub async fn update_state(&self, event_id: &EventId, state: &EventState) {
        match tokio::time::timeout(self.write_timeout, self.store.update_state(event_id, state))
            .await
        {
            Ok(Ok(())) => debug!(event_id = %event_id, state = state.name(), "event state updated"),
            Ok(Err(err)) => warn!(
                event_id = %event_id,
                state = state.name(),
                error = %err,
                "failed to update event state"
            ),
            Err(_) => warn!(
                event_id = %event_id,
                state = state.name(),
                timeout = ?self.write_timeout,
                "event state update timed out"
            ),
        }
    }

    /// Record the state of one project's reaction to an event.
    pub async fn update_project_state(
        &self,
        event_id: &EventId,
        project_id: &ProjectId,
        state: &ProjectEventState,
    ) {
        let write = self
            .store
            .update_state_for_project(event_id, project_id, state);

        match tokio::time::timeout(self.write_timeout, write).await {
            Ok(Ok(())) => debug!(
                event_id = %event_id,
                project_id = %project_id,
                state = state.name(),
                "project event state updated"
            ),
            Ok(Err(err)) => warn!(
                event_id = %event_id,
                project_id = %project_id,
                state = state.name(),
                error = %err,
                "failed to update project event state"
            ),
            Err(_) => warn!(
                event_id = %event_id,
                project_id = %project_id,
                state = state.name(),
                timeout = ?self.write_timeout,
                "project event state update timed out"
            ),
        }
    }
}

/// [`EventStore`] decorator that publishes a [`StateUpdate`] after every
/// successful state write.
///
/// Event updates go to `event-tracking-<event_id>`. Project-event updates go
/// to the same event topic and to `project-tracking-<project_id>`. Publish
/// failures are logged; the write itself has already succeeded.
pub struct PublishingEventStore<S> {
    inner: S,
    pubsub: Arc<dyn PubSub>,
}

impl<S: EventStore> PublishingEventStore<S> {
    pub fn new(inner: S, pubsub: Arc<dyn PubSub>) -> Self {
        Self { inner, pubsub }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn publish(&self, update: StateUpdate, topics: SmallVec<[String; 2]>) {
        let payload = match update.encode() {
            Ok(payload) => payload,
            Err(err) => {
                warn!(event_id = %update.event_id, error = %err, "failed to encode state update");
                return;
            }
        };

        for topic in topics {
            if let Err(err) = self.pubsub.publish(&topic, payload.clone()).await {
                warn!(topic = %topic, error = %err, "failed to publish state update");
            }
        }
    }
}

#[async_trait]
impl<S: EventStore> EventStore for PublishingEventStore<S> {
    async fn add(&self, event: &Event) -> Result<EventId> {
        self.inner.add(event).await
    }

    async fn get(&self, id: &EventId) -> Result<Event> {
        self.inner.get(id).await
    }

    async fn update_state(&self, id: &EventId, state: &EventState) -> Result<()> {
        self.inner.update_state(id, state).await?;

        self.publish(
            StateUpdate::event(id.clone(), state.clone()),
            smallvec![event_topic(id)],
        )
        .await;
        Ok(())
    }

    async fn update_state_for_project(
        &self,
        id: &EventId,
        project_id: &ProjectId,
        state: &ProjectEventState,
    ) -> Result<()> {
        self.inner
            .update_state_for_project(id, project_id, state)
            .await?;

        self.publish(
            StateUpdate::project(id.clone(), project_id.clone(), state.clone()),
            smallvec![event_topic(id), project_topic(project_id)],
        )
        .await;
        Ok(())
    }
}
