//! Storage interfaces the core consumes.
//!
//! Concrete engines live outside this crate. [`memory`] provides in-memory
//! implementations used by tests, demos and local development.

pub mod memory;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{
    Account, AccountName, Binding, Event, EventId, EventSource, Project, ProjectId, SourceId,
};
use crate::state::{EventState, ProjectEventState};

pub use memory::{
    InMemoryAccountStore, InMemoryEventSourceStore, InMemoryEventStore, InMemoryProjectStore,
};

/// Persists events and their tracked states.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Store a new event. Adding an ID that already exists keeps the
    /// original record.
    async fn add(&self, event: &Event) -> Result<EventId>;

    async fn get(&self, id: &EventId) -> Result<Event>;

    async fn update_state(&self, id: &EventId, state: &EventState) -> Result<()>;

    async fn update_state_for_project(
        &self,
        id: &EventId,
        project_id: &ProjectId,
        state: &ProjectEventState,
    ) -> Result<()>;
}

#[async_trait]
impl<T: EventStore + ?Sized> EventStore for Arc<T> {
    async fn add(&self, event: &Event) -> Result<EventId> {
        (**self).add(event).await
    }

    async fn get(&self, id: &EventId) -> Result<Event> {
        (**self).get(id).await
    }

    async fn update_state(&self, id: &EventId, state: &EventState) -> Result<()> {
        (**self).update_state(id, state).await
    }

    async fn update_state_for_project(
        &self,
        id: &EventId,
        project_id: &ProjectId,
        state: &ProjectEventState,
    ) -> Result<()> {
        (**self).update_state_for_project(id, project_id, state).await
    }
}

/// Filter for [`EventSourceStore::get_project_bindings`].
#[derive(Debug, Clone, Default)]
pub struct BindingQuery {
    pub source_id: SourceId,
    pub project_id: Option<ProjectId>,
    pub binding_name: Option<String>,
    pub association_token: String,
    /// Only return enabled bindings.
    pub enabled_only: bool,
}

impl BindingQuery {
    pub fn for_token(source_id: SourceId, association_token: impl Into<String>) -> Self {
        Self {
            source_id,
            association_token: association_token.into(),
            ..Self::default()
        }
    }
}

#[async_trait]
pub trait EventSourceStore: Send + Sync {
    async fn get(&self, id: &SourceId) -> Result<EventSource>;

    async fn get_project_bindings(&self, query: &BindingQuery) -> Result<Vec<Binding>>;
}

#[async_trait]
pub trait ProjectStore: Send + Sync {
    /// Load the given projects. Unknown IDs are absent from the result.
    async fn batch_get(&self, ids: &[ProjectId]) -> Result<HashMap<ProjectId, Project>>;
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn get(&self, name: &AccountName) -> Result<Account>;

    /// Load the given accounts. Unknown names are absent from the result.
    async fn batch_get(&self, names: &[AccountName]) -> Result<HashMap<AccountName, Account>>;
}
