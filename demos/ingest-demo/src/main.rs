//! # Ingest Demo
//!
//! Wires an ingestor over in-memory stores, ingests a few webhook-style
//! events and prints their state updates as they stream in.
//!
//! ```text
//! RUST_LOG=tributary=debug cargo run -p ingest-demo [config.toml]
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tributary::{
    Account, Binding, Event, EventSource, InMemoryAccountStore, InMemoryEventSourceStore,
    InMemoryEventStore, InMemoryProjectStore, InMemoryPubSub, IngestorBuilder, NewEvent, Project,
    RunFailure, RunSummary, Runner, StateUpdate, Stores, TrackedState, TributaryConfig,
};

// ============================================================================
// Runner (Execution)
// ============================================================================

/// Pretends to deploy. The "legacy" project always fails halfway through.
struct DeployRunner;

#[async_trait]
impl Runner for DeployRunner {
    async fn run(
        &self,
        event: &Event,
        project: &Project,
        binding_name: &str,
    ) -> Result<RunSummary, RunFailure> {
        tokio::time::sleep(Duration::from_millis(50)).await;

        if project.id.as_str() == "legacy" {
            return Err(RunFailure::with_summary(
                anyhow::anyhow!("migration step failed"),
                RunSummary::new(serde_json::json!({ "steps_completed": 1 })),
            ));
        }

        Ok(RunSummary::new(serde_json::json!({
            "binding": binding_name,
            "ref": event.data.get("ref"),
            "steps_completed": 3,
        })))
    }
}

// ============================================================================
// Fixtures
// ============================================================================

fn seed(
    sources: &InMemoryEventSourceStore,
    projects: &InMemoryProjectStore,
    accounts: &InMemoryAccountStore,
) {
    accounts.insert(Account {
        name: "acme".into(),
        enabled: true,
    });
    sources.insert_source(EventSource {
        id: "github".into(),
        account: "acme".into(),
        enabled: true,
    });

    for (project, enabled) in [("web", true), ("legacy", true), ("archived", false)] {
        projects.insert(Project {
            id: project.into(),
            account: "acme".into(),
            enabled,
        });
        sources.insert_binding(Binding {
            project_id: project.into(),
            source_id: "github".into(),
            name: "deploy-on-push".into(),
            association_token: "acme/monorepo".into(),
            config: serde_json::Value::Null,
            enabled: true,
        });
    }
}

fn describe(update: &StateUpdate) -> String {
    match (&update.project_id, &update.state) {
        (None, TrackedState::Event(state)) => {
            format!("event   {:<10} {}", state.name(), update.event_id)
        }
        (Some(project), TrackedState::Project(state)) => {
            format!("project {:<10} {} / {}", state.name(), update.event_id, project)
        }
        (_, state) => format!("{state:?}"),
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => TributaryConfig::load(Path::new(&path))?,
        None => TributaryConfig::default(),
    };

    let events = InMemoryEventStore::new();
    let sources = InMemoryEventSourceStore::new();
    let projects = InMemoryProjectStore::new();
    let accounts = InMemoryAccountStore::new();
    seed(&sources, &projects, &accounts);

    let pubsub = InMemoryPubSub::with_buffer(config.tracking.subscriber_buffer);
    let ingestor = Arc::new(
        IngestorBuilder::new(
            Stores {
                events: Arc::new(events.clone()),
                sources: Arc::new(sources),
                projects: Arc::new(projects),
                accounts: Arc::new(accounts),
            },
            Arc::new(pubsub),
            Arc::new(DeployRunner),
        )
        .with_config(config)
        .build(),
    );

    // Watch everything that happens to the "web" project.
    let (monitor_tx, mut monitor_rx) = mpsc::channel(64);
    let (stop_monitor, stopped) = oneshot::channel::<()>();
    let monitor = {
        let ingestor = ingestor.clone();
        tokio::spawn(async move {
            ingestor
                .monitor_project_events(&"web".into(), monitor_tx, async {
                    let _ = stopped.await;
                })
                .await
        })
    };
    let monitor_printer = tokio::spawn(async move {
        while let Some(update) = monitor_rx.recv().await {
            println!("  [web monitor] {}", describe(&update));
        }
    });

    for (n, git_ref) in ["refs/heads/main", "refs/heads/release"].into_iter().enumerate() {
        let event = NewEvent::new("github", "acme/monorepo", "push")
            .with_original_id(format!("delivery-{n}"))
            .with_data("ref", serde_json::json!(git_ref))
            .with_memo("description", format!("push to {git_ref}"));

        println!("Ingesting push to {git_ref}");
        let (tx, mut rx) = mpsc::channel(64);
        let printer = tokio::spawn(async move {
            while let Some(update) = rx.recv().await {
                println!("  {}", describe(&update));
            }
        });

        ingestor.track_ingest_event(event, tx).await?;
        printer.await?;
    }

    // An event nobody is bound to still finishes, with nothing to run.
    let id = ingestor
        .ingest_event(NewEvent::new("github", "someone-else/repo", "push"))
        .await?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    info!(event_id = %id, state = ?events.state(&id), "unbound event");

    let _ = stop_monitor.send(());
    monitor.await??;
    monitor_printer.await?;

    println!("All events processed!");

    Ok(())
}
