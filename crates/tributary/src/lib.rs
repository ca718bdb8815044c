//! # Tributary
//!
//! Event ingestion and fan-out: external events come in from event sources,
//! are matched to the projects bound to them, and each matching project runs
//! its reaction exactly once, with progress observable as it happens.
//!
//! ## Core Concepts
//!
//! - [`Event`] = a normalized occurrence from an [`EventSource`], carrying an
//!   association token
//! - [`Binding`] = a project's subscription to a source, keyed by that token
//! - [`Runner`] = whatever executes a project's reaction
//! - [`StateUpdate`] = one observed transition of an event or project-event
//!
//! ## Architecture
//!
//! ```text
//! ingest_event() / track_ingest_event()
//!     │
//!     ├─► EventStore.add() ─► Pending
//!     │
//!     ▼ start("ingest-event-<id>")
//! WorkflowOrchestrator ─► BindingResolver.resolve()
//!     │                         │
//!     │        Ignore ◄─────────┤ source/account disabled
//!     │                         │
//!     │                  Processing{active, ignored}
//!     │                         │ no live bindings: Processed{[], []}
//!     │                         │
//!     ├─► child "ingest-event-<id>-project-P1" ─► ProjectRunner ─► Runner.run()
//!     ├─► child "ingest-event-<id>-project-P2" ─► ProjectRunner ─► Runner.run()
//!     │                         │
//!     ▼ join                    ▼
//! Processed{all, failed}   Completed / Error per project
//!
//! every state write ─► EventStore ─► PubSub
//!                                     ├─► "event-tracking-<id>"
//!                                     └─► "project-tracking-<pid>"
//! ```
//!
//! ## Key Invariants
//!
//! 1. **One execution per event** - workflow IDs derive from the event ID, so
//!    re-ingesting joins or replays instead of running again
//! 2. **One run per (event, project)** - child IDs derive from both IDs
//! 3. **Monotonic states** - terminal states are never overwritten
//! 4. **Failures are data** - a failed run marks its project, never its siblings
//! 5. **Tracking never fails work** - state write errors are logged and dropped
//!
//! ## Guarantees
//!
//! - **At-most-once per step**: journaled steps replay their recorded result
//! - **Best-effort observation**: slow subscribers may miss updates; the
//!   [`EventStore`] remains the source of truth
//! - **No replay to late subscribers**: subscribe before ingesting
//!
//! ## Example
//!
//! ```ignore
//! use tributary::{IngestorBuilder, InMemoryPubSub, NewEvent, Stores};
//!
//! let ingestor = IngestorBuilder::new(stores, Arc::new(InMemoryPubSub::new()), runner)
//!     .with_config(config)
//!     .build();
//!
//! let (tx, mut rx) = tokio::sync::mpsc::channel(64);
//! tokio::spawn(async move {
//!     while let Some(update) = rx.recv().await {
//!         println!("{update:?}");
//!     }
//! });
//!
//! ingestor
//!     .track_ingest_event(NewEvent::new("github", "repo-42", "push"), tx)
//!     .await?;
//! ```

// Core modules
mod builder;
mod error;
mod id_macro;
mod ingest;
mod model;
mod orchestrator;
mod resolver;
mod runner;
mod state;
mod tracking;

// Configuration
pub mod config;

// Durable workflow execution
pub mod durable;

// Pub/sub transport
pub mod pubsub;

// Storage interfaces and in-memory implementations
pub mod store;

// Testing utilities are in the separate tributary-testing crate


// Wire format tests (test-only)
#[cfg(test)]
mod wire_tests;

// Re-export domain types
pub use model::{
    Account, AccountName, Binding, Event, EventId, EventSource, NewEvent, Project, ProjectId,
    RunSummary, SourceId,
};

// Re-export state types
pub use state::{EventState, ProjectEventState, StateUpdate, TrackedState};

// Re-export error types
pub use error::{Result, TributaryError};

// Re-export config types
pub use config::{ConfigError, TributaryConfig};

// Re-export resolution types
pub use resolver::{
    BindingResolver, DecodedToken, LitterboxTokens, PlainTokens, Resolution, ResolveRequest,
    ResolvedBindings, TokenDecoder, SOURCE_ACCOUNT_DISABLED, SOURCE_DISABLED,
};

// Re-export execution types
pub use orchestrator::{event_workflow_id, IngestInput, WorkflowOrchestrator, PROJECT_DISABLED};
pub use runner::{project_workflow_id, ProjectRun, ProjectRunner, RunFailure, Runner};

// Re-export tracking types
pub use pubsub::{event_topic, project_topic, InMemoryPubSub, PubSub, Subscription};
pub use tracking::{PublishingEventStore, StateTracker};

// Re-export storage types
pub use store::{
    AccountStore, BindingQuery, EventSourceStore, EventStore, InMemoryAccountStore,
    InMemoryEventSourceStore, InMemoryEventStore, InMemoryProjectStore, ProjectStore,
};

// Re-export ingestor types (primary entry point)
pub use builder::{IngestorBuilder, Stores};
pub use ingest::EventIngestor;

// Re-export commonly used external types
pub use async_trait::async_trait;
