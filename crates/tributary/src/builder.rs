//! Wiring for [`EventIngestor`].

use std::sync::Arc;

use tracing::debug;

use crate::config::TributaryConfig;
use crate::durable::{InMemoryJournal, WorkflowEngine, WorkflowJournal};
use crate::ingest::EventIngestor;
use crate::orchestrator::WorkflowOrchestrator;
use crate::pubsub::PubSub;
use crate::resolver::{BindingResolver, LitterboxTokens, PlainTokens, TokenDecoder};
use crate::runner::{ProjectRunner, Runner};
use crate::store::{AccountStore, EventSourceStore, EventStore, ProjectStore};
use crate::tracking::{PublishingEventStore, StateTracker};

/// The stores an ingestor reads and writes.
#[derive(Clone)]
pub struct Stores {
    pub events: Arc<dyn EventStore>,
    pub sources: Arc<dyn EventSourceStore>,
    pub projects: Arc<dyn ProjectStore>,
    pub accounts: Arc<dyn AccountStore>,
}

/// Builder for [`EventIngestor`].
///
/// ```ignore
/// let ingestor = IngestorBuilder::new(stores, pubsub, runner)
///     .with_config(config)
///     .with_journal(journal)
///     .build();
/// ```
pub struct IngestorBuilder {
    stores: Stores,
    pubsub: Arc<dyn PubSub>,
    runner: Arc<dyn Runner>,
    config: TributaryConfig,
    journal: Option<Arc<dyn WorkflowJournal>>,
    decoder: Option<Arc<dyn TokenDecoder>>,
    publish_state_updates: bool,
}

impl IngestorBuilder {
    pub fn new(stores: Stores, pubsub: Arc<dyn PubSub>, runner: Arc<dyn Runner>) -> Self {
        Self {
            stores,
            pubsub,
            runner,
            config: TributaryConfig::default(),
            journal: None,
            decoder: None,
            publish_state_updates: true,
        }
    }

    pub fn with_config(mut self, config: TributaryConfig) -> Self {
        self.config = config;
        self
    }

    /// Journal backing workflow executions. Defaults to [`InMemoryJournal`].
    pub fn with_journal(mut self, journal: Arc<dyn WorkflowJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Overrides the decoder chosen by `config.litterbox`.
    pub fn with_token_decoder(mut self, decoder: Arc<dyn TokenDecoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    /// Skip wrapping the event store with publication. Use when the
    /// supplied store already publishes its own updates.
    pub fn without_state_publishing(mut self) -> Self {
        self.publish_state_updates = false;
        self
    }

    pub fn build(self) -> EventIngestor {
        let Stores {
            events,
            sources,
            projects,
            accounts,
        } = self.stores;

        let events: Arc<dyn EventStore> = if self.publish_state_updates {
            Arc::new(PublishingEventStore::new(events, self.pubsub.clone()))
        } else {
            events
        };

        let decoder: Arc<dyn TokenDecoder> = match self.decoder {
            Some(decoder) => decoder,
            None if self.config.litterbox => Arc::new(LitterboxTokens),
            None => Arc::new(PlainTokens),
        };

        let tracker =
            StateTracker::with_timeout(events.clone(), self.config.tracking.write_timeout());
        let activity = self.config.activity.options();

        let resolver = BindingResolver::new(sources, accounts, projects, events.clone())
            .with_token_decoder(decoder);
        let project_runner = ProjectRunner::new(self.runner, tracker.clone(), activity);
        let orchestrator = WorkflowOrchestrator::new(
            Arc::new(resolver),
            Arc::new(project_runner),
            tracker.clone(),
            activity,
        );

        let journal: Arc<dyn WorkflowJournal> = match self.journal {
            Some(journal) => journal,
            None => Arc::new(InMemoryJournal::new()),
        };

        debug!(
            litterbox = self.config.litterbox,
            publishing = self.publish_state_updates,
            "event ingestor built"
        );

        EventIngestor {
            events,
            pubsub: self.pubsub,
            engine: WorkflowEngine::new(journal),
            orchestrator: Arc::new(orchestrator),
            tracker,
        }
    }
}
