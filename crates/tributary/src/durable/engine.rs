//! Workflow engine: starts durable workflows at most once per workflow ID.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, error, info};

use super::context::WorkflowContext;
use super::journal::{BeginOutcome, InMemoryJournal, WorkflowJournal};
use crate::error::{Result, TributaryError};

type Outcome = std::result::Result<Value, String>;
type OutcomeReceiver = watch::Receiver<Option<Outcome>>;

/// Runs workflows as tokio tasks, journaling their steps.
///
/// Starting a workflow ID that is already running joins the running
/// execution; starting one the journal has recorded as completed returns the
/// recorded output without executing anything. A workflow that failed is
/// re-executed on the next start, replaying the steps it had completed.
#[derive(Clone)]
pub struct WorkflowEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    journal: Arc<dyn WorkflowJournal>,
    inflight: DashMap<String, OutcomeReceiver>,
    executions: AtomicUsize,
}

impl WorkflowEngine {
    pub fn new(journal: Arc<dyn WorkflowJournal>) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                journal,
                inflight: DashMap::new(),
                executions: AtomicUsize::new(0),
            }),
        }
    }

    /// Engine backed by a fresh [`InMemoryJournal`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryJournal::new()))
    }

    pub fn journal(&self) -> &Arc<dyn WorkflowJournal> {
        &self.inner.journal
    }

    /// How many executions this engine has spawned, resumed ones included.
    pub fn executions_started(&self) -> usize {
        self.inner.executions.load(Ordering::SeqCst)
    }

    pub fn is_running(&self, workflow_id: &str) -> bool {
        self.inner.inflight.contains_key(workflow_id)
    }

    /// Start (or join) the workflow identified by `workflow_id`.
    pub async fn start<T, F, Fut>(
        &self,
        workflow_id: impl Into<String>,
        workflow: F,
    ) -> Result<WorkflowHandle<T>>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce(WorkflowContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let workflow_id = workflow_id.into();

        let tx = match self.inner.inflight.entry(workflow_id.clone()) {
            Entry::Occupied(mut entry) => {
                if !can_restart(entry.get()) {
                    debug!(workflow_id = %workflow_id, "joining running workflow");
                    return Ok(WorkflowHandle::new(workflow_id, entry.get().clone()));
                }
                let (tx, rx) = watch::channel(None);
                entry.insert(rx);
                tx
            }
            Entry::Vacant(entry) => {
                let (tx, rx) = watch::channel(None);
                entry.insert(rx);
                tx
            }
        };
        let rx = tx.subscribe();

        let begin = match self.inner.journal.begin(&workflow_id).await {
            Ok(begin) => begin,
            Err(err) => {
                tx.send_replace(Some(Err(err.to_string())));
                self.release(&workflow_id, &rx);
                return Err(err);
            }
        };

        match begin {
            BeginOutcome::Completed(output) => {
                debug!(workflow_id = %workflow_id, "workflow already completed");
                tx.send_replace(Some(Ok(output)));
                self.release(&workflow_id, &rx);
            }
            BeginOutcome::Started { resumed } => {
                self.inner.executions.fetch_add(1, Ordering::SeqCst);
                info!(workflow_id = %workflow_id, resumed, "workflow started");

                let ctx = WorkflowContext::new(workflow_id.clone(), self.clone());
                let engine = self.clone();
                let id = workflow_id.clone();
                let own = rx.clone();
                tokio::spawn(async move {
                    // Serialize before awaiting the journal so the task holds
                    // no reference to `T`.
                    let outcome = match workflow(ctx).await.and_then(|output| {
                        serde_json::to_value(&output).map_err(TributaryError::from)
                    }) {
                        Ok(value) => engine.finish(&id, value).await,
                        Err(err) => Err(err.to_string()),
                    };

                    match &outcome {
                        Ok(_) => info!(workflow_id = %id, "workflow completed"),
                        Err(message) => error!(workflow_id = %id, error = %message, "workflow failed"),
                    }

                    tx.send_replace(Some(outcome));
                    engine.release(&id, &own);
                });
            }
        }

        Ok(WorkflowHandle::new(workflow_id, rx))
    }

    /// Deregister `workflow_id`, unless a newer execution has replaced it.
    fn release(&self, workflow_id: &str, rx: &OutcomeReceiver) {
        self.inner
            .inflight
            .remove_if(workflow_id, |_, current| current.same_channel(rx));
    }

    async fn finish(&self, workflow_id: &str, value: Value) -> Outcome {
        self.inner
            .journal
            .complete(workflow_id, &value)
            .await
            .map_err(|err| err.to_string())?;
        Ok(value)
    }
}

/// Whether a registered execution may be replaced by a new one: it failed,
/// or its task went away without an outcome (panicked).
fn can_restart(rx: &OutcomeReceiver) -> bool {
    match &*rx.borrow() {
        Some(outcome) => outcome.is_err(),
        None => rx.has_changed().is_err(),
    }
}

/// Awaitable result of a started workflow.
pub struct WorkflowHandle<T> {
    workflow_id: String,
    rx: OutcomeReceiver,
    _output: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> WorkflowHandle<T> {
    fn new(workflow_id: String, rx: OutcomeReceiver) -> Self {
        Self {
            workflow_id,
            rx,
            _output: PhantomData,
        }
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    /// Wait for the workflow to finish and return its output.
    pub async fn wait(mut self) -> Result<T> {
        let outcome = match self.rx.wait_for(Option::is_some).await {
            Ok(outcome) => (*outcome).clone(),
            Err(_) => None,
        };

        match outcome {
            Some(Ok(value)) => Ok(serde_json::from_value(value)?),
            Some(Err(message)) => Err(TributaryError::Workflow {
                workflow_id: self.workflow_id,
                message,
            }),
            None => Err(TributaryError::Workflow {
                workflow_id: self.workflow_id,
                message: "workflow ended without a result".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_workflow_output() {
        let engine = WorkflowEngine::in_memory();
        let handle = engine
            .start("wf-1", |_ctx| async { Ok::<_, TributaryError>(41 + 1) })
            .await
            .unwrap();

        assert_eq!(handle.wait().await.unwrap(), 42);
        assert_eq!(engine.executions_started(), 1);
    }

    #[tokio::test]
    async fn outputs_only_need_to_be_send() {
        let engine = WorkflowEngine::in_memory();
        let handle = engine
            .start("wf-cell", |_ctx| async {
                Ok::<_, TributaryError>(std::cell::Cell::new(7u32))
            })
            .await
            .unwrap();

        assert_eq!(handle.wait().await.unwrap().get(), 7);
    }

    #[tokio::test]
    async fn concurrent_starts_share_one_execution() {
        let engine = WorkflowEngine::in_memory();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let first = engine
            .start("wf-1", |_ctx| async move {
                let _ = release_rx.await;
                Ok::<_, TributaryError>("first".to_string())
            })
            .await
            .unwrap();
        let second = engine
            .start("wf-1", |_ctx| async { Ok::<_, TributaryError>("second".to_string()) })
            .await
            .unwrap();

        release_tx.send(()).unwrap();

        assert_eq!(first.wait().await.unwrap(), "first");
        assert_eq!(second.wait().await.unwrap(), "first");
        assert_eq!(engine.executions_started(), 1);
    }

    #[tokio::test]
    async fn completed_workflows_are_not_executed_again() {
        let engine = WorkflowEngine::in_memory();
        engine
            .start("wf-1", |_ctx| async { Ok::<_, TributaryError>(1) })
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();

        let again = engine
            .start("wf-1", |_ctx| async { Ok::<_, TributaryError>(2) })
            .await
            .unwrap();

        assert_eq!(again.wait().await.unwrap(), 1);
        assert_eq!(engine.executions_started(), 1);
        assert!(!engine.is_running("wf-1"));
    }

    #[tokio::test]
    async fn failed_workflows_surface_as_errors_and_can_rerun() {
        let engine = WorkflowEngine::in_memory();
        let failed = engine
            .start("wf-1", |_ctx| async {
                Err::<u32, _>(TributaryError::store("boom"))
            })
            .await
            .unwrap()
            .wait()
            .await
            .unwrap_err();
        assert!(matches!(failed, TributaryError::Workflow { .. }));

        let rerun = engine
            .start("wf-1", |_ctx| async { Ok::<_, TributaryError>(7u32) })
            .await
            .unwrap();
        assert_eq!(rerun.wait().await.unwrap(), 7);
        assert_eq!(engine.executions_started(), 2);
    }
}
