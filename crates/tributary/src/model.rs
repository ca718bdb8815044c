//! Records the core reads: events, event sources, bindings, projects and
//! accounts.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::id_macro::string_id;

string_id! {
    /// Globally unique event identifier.
    EventId
}

string_id! {
    /// Identifies an event source (a webhook integration, a cron, ...).
    SourceId
}

string_id! {
    /// Identifies a project.
    ProjectId
}

string_id! {
    /// Identifies an account by name.
    AccountName
}

impl EventId {
    /// Generate a fresh, unique event ID.
    pub fn generate() -> Self {
        Self(format!("evt_{}", Uuid::new_v4().simple()))
    }
}

/// An ingested event. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub source_id: SourceId,
    /// Correlates the event with the bindings that should react to it.
    pub association_token: String,
    /// Source-native dedup key. May be empty.
    pub original_id: String,
    pub event_type: String,
    pub data: BTreeMap<String, serde_json::Value>,
    pub memo: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

/// An event as handed over by an event source, before it has an ID.
#[derive(Debug, Clone, Default)]
pub struct NewEvent {
    /// Explicit ID. Re-ingesting with the same explicit ID is idempotent.
    pub id: Option<EventId>,
    pub source_id: SourceId,
    pub association_token: String,
    pub original_id: String,
    pub event_type: String,
    pub data: BTreeMap<String, serde_json::Value>,
    pub memo: BTreeMap<String, String>,
}

impl NewEvent {
    pub fn new(
        source_id: impl Into<SourceId>,
        association_token: impl Into<String>,
        event_type: impl Into<String>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            association_token: association_token.into(),
            event_type: event_type.into(),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<EventId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_original_id(mut self, original_id: impl Into<String>) -> Self {
        self.original_id = original_id.into();
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    pub fn with_memo(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.memo.insert(key.into(), value.into());
        self
    }

    /// The explicit ID, or a freshly generated one when it is absent or
    /// empty. The chosen ID is stored back so later calls agree.
    pub fn ensure_id(&mut self) -> EventId {
        match &self.id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => {
                let id = EventId::generate();
                self.id = Some(id.clone());
                id
            }
        }
    }

    /// Materialize the event under `id`.
    pub fn into_event(self, id: EventId) -> Event {
        Event {
            id,
            source_id: self.source_id,
            association_token: self.association_token,
            original_id: self.original_id,
            event_type: self.event_type,
            data: self.data,
            memo: self.memo,
            created_at: Utc::now(),
        }
    }
}

/// An external origin of events, owned by an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSource {
    pub id: SourceId,
    pub account: AccountName,
    pub enabled: bool,
}

/// Links one project to one event source under an association token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    pub project_id: ProjectId,
    pub source_id: SourceId,
    /// Display name, passed to the run callback.
    pub name: String,
    pub association_token: String,
    /// Source-specific configuration.
    #[serde(default)]
    pub config: serde_json::Value,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub account: AccountName,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub name: AccountName,
    pub enabled: bool,
}

/// Opaque result of running a project's reaction to an event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunSummary(pub serde_json::Value);

impl RunSummary {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }
}
