//! In-memory, thread-safe store implementations backed by `DashMap`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use super::{AccountStore, BindingQuery, EventSourceStore, EventStore, ProjectStore};
use crate::error::{Result, TributaryError};
use crate::model::{
    Account, AccountName, Binding, Event, EventId, EventSource, Project, ProjectId, SourceId,
};
use crate::state::{EventState, ProjectEventState};

#[derive(Debug, Clone)]
struct StoredEvent {
    event: Event,
    state: Option<EventState>,
    project_states: BTreeMap<ProjectId, ProjectEventState>,
}

/// Events and their states, rejecting non-monotonic transitions.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventStore {
    events: Arc<DashMap<EventId, StoredEvent>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current aggregate state of an event.
    pub fn state(&self, id: &EventId) -> Option<EventState> {
        self.events.get(id).and_then(|e| e.state.clone())
    }

    pub fn project_state(&self, id: &EventId, project_id: &ProjectId) -> Option<ProjectEventState> {
        self.events
            .get(id)
            .and_then(|e| e.project_states.get(project_id).cloned())
    }

    /// All project states recorded for an event, ordered by project ID.
    pub fn project_states(&self, id: &EventId) -> BTreeMap<ProjectId, ProjectEventState> {
        self.events
            .get(id)
            .map(|e| e.project_states.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn add(&self, event: &Event) -> Result<EventId> {
        self.events
            .entry(event.id.clone())
            .or_insert_with(|| StoredEvent {
                event: event.clone(),
                state: None,
                project_states: BTreeMap::new(),
            });
        Ok(event.id.clone())
    }

    async fn get(&self, id: &EventId) -> Result<Event> {
        self.events
            .get(id)
            .map(|e| e.event.clone())
            .ok_or_else(|| TributaryError::not_found("event", id))
    }

    async fn update_state(&self, id: &EventId, state: &EventState) -> Result<()> {
        let mut stored = self
            .events
            .get_mut(id)
            .ok_or_else(|| TributaryError::not_found("event", id))?;

        if let Some(current) = &stored.state {
            if !current.can_transition_to(state) {
                return Err(TributaryError::InvalidTransition {
                    subject: id.to_string(),
                    from: current.name(),
                    to: state.name(),
                });
            }
        }

        debug!(event_id = %id, state = state.name(), "event state stored");
        stored.state = Some(state.clone());
        Ok(())
    }

    async fn update_state_for_project(
        &self,
        id: &EventId,
        project_id: &ProjectId,
        state: &ProjectEventState,
    ) -> Result<()> {
        let mut stored = self
            .events
            .get_mut(id)
            .ok_or_else(|| TributaryError::not_found("event", id))?;

        if let Some(current) = stored.project_states.get(project_id) {
            if !current.can_transition_to(state) {
                return Err(TributaryError::InvalidTransition {
                    subject: format!("{id}/{project_id}"),
                    from: current.name(),
                    to: state.name(),
                });
            }
        }

        debug!(event_id = %id, project_id = %project_id, state = state.name(), "project state stored");
        stored
            .project_states
            .insert(project_id.clone(), state.clone());
        Ok(())
    }
}

/// Event sources and their project bindings.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventSourceStore {
    sources: Arc<DashMap<SourceId, EventSource>>,
    bindings: Arc<DashMap<SourceId, Vec<Binding>>>,
}

impl InMemoryEventSourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_source(&self, source: EventSource) {
        self.sources.insert(source.id.clone(), source);
    }

    /// Add a binding, replacing any binding with the same project and name.
    pub fn insert_binding(&self, binding: Binding) {
        let mut bindings = self.bindings.entry(binding.source_id.clone()).or_default();
        bindings.retain(|b| !(b.project_id == binding.project_id && b.name == binding.name));
        bindings.push(binding);
    }

    pub fn set_source_enabled(&self, id: &SourceId, enabled: bool) {
        if let Some(mut source) = self.sources.get_mut(id) {
            source.enabled = enabled;
        }
    }
}

#[async_trait]
impl EventSourceStore for InMemoryEventSourceStore {
    async fn get(&self, id: &SourceId) -> Result<EventSource> {
        self.sources
            .get(id)
            .map(|s| s.value().clone())
            .ok_or_else(|| TributaryError::not_found("event source", id))
    }

    async fn get_project_bindings(&self, query: &BindingQuery) -> Result<Vec<Binding>> {
        let Some(bindings) = self.bindings.get(&query.source_id) else {
            return Ok(Vec::new());
        };

        Ok(bindings
            .iter()
            .filter(|b| b.association_token == query.association_token)
            .filter(|b| query.project_id.as_ref().map_or(true, |p| &b.project_id == p))
            .filter(|b| query.binding_name.as_ref().map_or(true, |n| &b.name == n))
            .filter(|b| !query.enabled_only || b.enabled)
            .cloned()
            .collect())
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryProjectStore {
    projects: Arc<DashMap<ProjectId, Project>>,
}

impl InMemoryProjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, project: Project) {
        self.projects.insert(project.id.clone(), project);
    }

    pub fn set_enabled(&self, id: &ProjectId, enabled: bool) {
        if let Some(mut project) = self.projects.get_mut(id) {
            project.enabled = enabled;
        }
    }
}

#[async_trait]
impl ProjectStore for InMemoryProjectStore {
    async fn batch_get(&self, ids: &[ProjectId]) -> Result<HashMap<ProjectId, Project>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.projects.get(id).map(|p| (id.clone(), p.value().clone())))
            .collect())
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryAccountStore {
    accounts: Arc<DashMap<AccountName, Account>>,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, account: Account) {
        self.accounts.insert(account.name.clone(), account);
    }

    pub fn set_enabled(&self, name: &AccountName, enabled: bool) {
        if let Some(mut account) = self.accounts.get_mut(name) {
            account.enabled = enabled;
        }
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn get(&self, name: &AccountName) -> Result<Account> {
        self.accounts
            .get(name)
            .map(|a| a.value().clone())
            .ok_or_else(|| TributaryError::not_found("account", name))
    }

    async fn batch_get(&self, names: &[AccountName]) -> Result<HashMap<AccountName, Account>> {
        Ok(names
            .iter()
            .filter_map(|n| self.accounts.get(n).map(|a| (n.clone(), a.value().clone())))
            .collect())
    }
}
