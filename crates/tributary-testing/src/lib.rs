//! Testing utilities for tributary.
//!
//! [`TestHarness`] wires an [`EventIngestor`] over in-memory stores, pub/sub
//! and journal, with fixture helpers for sources, accounts, projects and
//! bindings. [`ScriptedRunner`] stands in for real project runs.
//!
//! ```ignore
//! let harness = TestHarness::new();
//! harness.account("acme").source("github", "acme").project("p1", "acme");
//! harness.binding("p1", "github", "push", "repo-1");
//!
//! let (result, updates) = harness
//!     .track(NewEvent::new("github", "repo-1", "push"))
//!     .await;
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::debug;

use tributary::durable::InMemoryJournal;
use tributary::{
    Account, Binding, Event, EventId, EventIngestor, EventSource, EventState, InMemoryAccountStore,
    InMemoryEventSourceStore, InMemoryEventStore, InMemoryProjectStore, InMemoryPubSub,
    IngestorBuilder, NewEvent, Project, ProjectEventState, ProjectId, RunFailure, RunSummary,
    Runner, StateUpdate, Stores, TributaryConfig,
};

/// What a [`ScriptedRunner`] does for one project.
#[derive(Debug, Clone)]
pub enum Script {
    /// Succeed with this summary.
    Succeed(Value),
    /// Fail with this message, optionally reporting a partial summary.
    Fail {
        message: String,
        summary: Option<Value>,
    },
    /// Sleep, then follow the inner script.
    Delay(Duration, Box<Script>),
}

/// One recorded [`Runner::run`] invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunCall {
    pub event_id: EventId,
    pub project_id: ProjectId,
    pub binding_name: String,
}

/// A [`Runner`] whose behavior is scripted per project.
///
/// Unscripted projects succeed with `{"project": <id>, "binding": <name>}`.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    scripts: DashMap<ProjectId, Script>,
    calls: Mutex<Vec<RunCall>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, project_id: impl Into<ProjectId>, script: Script) -> &Self {
        self.scripts.insert(project_id.into(), script);
        self
    }

    pub fn succeed(&self, project_id: impl Into<ProjectId>, summary: Value) -> &Self {
        self.script(project_id, Script::Succeed(summary))
    }

    pub fn fail(&self, project_id: impl Into<ProjectId>, message: impl Into<String>) -> &Self {
        self.script(
            project_id,
            Script::Fail {
                message: message.into(),
                summary: None,
            },
        )
    }

    /// Delay the project's run, keeping whatever it was scripted to do.
    pub fn delay(&self, project_id: impl Into<ProjectId>, delay: Duration) -> &Self {
        let project_id = project_id.into();
        let inner = self
            .scripts
            .remove(&project_id)
            .map(|(_, script)| script)
            .unwrap_or_else(|| Script::Succeed(Value::Null));
        self.script(project_id, Script::Delay(delay, Box::new(inner)))
    }

    pub fn calls(&self) -> Vec<RunCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of runs per project, across all events.
    pub fn run_counts(&self) -> BTreeMap<ProjectId, usize> {
        let mut counts = BTreeMap::new();
        for call in self.calls() {
            *counts.entry(call.project_id).or_default() += 1;
        }
        counts
    }

    fn record(&self, call: RunCall) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }
}

#[async_trait]
impl Runner for ScriptedRunner {
    async fn run(
        &self,
        event: &Event,
        project: &Project,
        binding_name: &str,
    ) -> Result<RunSummary, RunFailure> {
        self.record(RunCall {
            event_id: event.id.clone(),
            project_id: project.id.clone(),
            binding_name: binding_name.to_string(),
        });

        let mut script = self
            .scripts
            .get(&project.id)
            .map(|entry| entry.value().clone());

        loop {
            match script {
                None => {
                    return Ok(RunSummary::new(json!({
                        "project": project.id,
                        "binding": binding_name,
                    })))
                }
                Some(Script::Succeed(summary)) => return Ok(RunSummary::new(summary)),
                Some(Script::Fail { message, summary }) => {
                    let error = anyhow::anyhow!(message);
                    return Err(match summary {
                        Some(summary) => RunFailure::with_summary(error, RunSummary::new(summary)),
                        None => RunFailure::from(error),
                    });
                }
                Some(Script::Delay(delay, inner)) => {
                    debug!(project_id = %project.id, ?delay, "scripted run delayed");
                    tokio::time::sleep(delay).await;
                    script = Some(*inner);
                }
            }
        }
    }
}

/// In-memory wiring of an [`EventIngestor`] plus fixture helpers.
pub struct TestHarness {
    pub events: InMemoryEventStore,
    pub sources: InMemoryEventSourceStore,
    pub projects: InMemoryProjectStore,
    pub accounts: InMemoryAccountStore,
    pub pubsub: InMemoryPubSub,
    pub journal: InMemoryJournal,
    pub runner: Arc<ScriptedRunner>,
    pub ingestor: EventIngestor,
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(TributaryConfig::default())
    }

    pub fn with_config(config: TributaryConfig) -> Self {
        let events = InMemoryEventStore::new();
        let sources = InMemoryEventSourceStore::new();
        let projects = InMemoryProjectStore::new();
        let accounts = InMemoryAccountStore::new();
        let pubsub = InMemoryPubSub::with_buffer(config.tracking.subscriber_buffer);
        let journal = InMemoryJournal::new();
        let runner = Arc::new(ScriptedRunner::new());

        let stores = Stores {
            events: Arc::new(events.clone()),
            sources: Arc::new(sources.clone()),
            projects: Arc::new(projects.clone()),
            accounts: Arc::new(accounts.clone()),
        };
        let ingestor = IngestorBuilder::new(stores, Arc::new(pubsub.clone()), runner.clone())
            .with_config(config)
            .with_journal(Arc::new(journal.clone()))
            .build();

        Self {
            events,
            sources,
            projects,
            accounts,
            pubsub,
            journal,
            runner,
            ingestor,
        }
    }

    pub fn account(&self, name: &str) -> &Self {
        self.accounts.insert(Account {
            name: name.into(),
            enabled: true,
        });
        self
    }

    pub fn source(&self, id: &str, account: &str) -> &Self {
        self.sources.insert_source(EventSource {
            id: id.into(),
            account: account.into(),
            enabled: true,
        });
        self
    }

    pub fn project(&self, id: &str, account: &str) -> &Self {
        self.projects.insert(Project {
            id: id.into(),
            account: account.into(),
            enabled: true,
        });
        self
    }

    /// Bind `project` to `source` under `name`, keyed by `token`.
    pub fn binding(&self, project: &str, source: &str, name: &str, token: &str) -> &Self {
        self.sources.insert_binding(Binding {
            project_id: project.into(),
            source_id: source.into(),
            name: name.into(),
            association_token: token.into(),
            config: Value::Null,
            enabled: true,
        });
        self
    }

    pub fn disabled_binding(&self, project: &str, source: &str, name: &str, token: &str) -> &Self {
        self.sources.insert_binding(Binding {
            project_id: project.into(),
            source_id: source.into(),
            name: name.into(),
            association_token: token.into(),
            config: Value::Null,
            enabled: false,
        });
        self
    }

    /// Ingest `event` and collect every update streamed for it.
    pub async fn track(&self, event: NewEvent) -> (tributary::Result<()>, Vec<StateUpdate>) {
        let (tx, mut rx) = mpsc::channel(256);
        let collector = tokio::spawn(async move {
            let mut updates = Vec::new();
            while let Some(update) = rx.recv().await {
                updates.push(update);
            }
            updates
        });

        let result = self.ingestor.track_ingest_event(event, tx).await;
        let updates = collector.await.unwrap_or_default();
        (result, updates)
    }

    pub fn event_state(&self, event_id: &str) -> Option<EventState> {
        self.events.state(&event_id.into())
    }

    pub fn project_states(&self, event_id: &str) -> BTreeMap<ProjectId, ProjectEventState> {
        self.events.project_states(&event_id.into())
    }

    /// Poll until the event reaches a terminal state, or `timeout` passes.
    pub async fn wait_for_terminal(&self, event_id: &str, timeout: Duration) -> Option<EventState> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self.event_state(event_id) {
                Some(state) if state.is_terminal() => return Some(state),
                last if tokio::time::Instant::now() >= deadline => return last,
                _ => tokio::time::sleep(Duration::from_millis(5)).await,
            }
        }
    }
}
