//! Context handed to a running workflow.

use std::future::Future;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use super::engine::WorkflowEngine;
use super::retry::ActivityOptions;
use crate::error::{Result, TributaryError};

/// Gives a workflow journaled access to activities and child workflows.
///
/// Every call takes a step ID that must be a deterministic function of the
/// workflow's input: on re-execution, a step whose result is already in the
/// journal returns that result instead of running again.
#[derive(Clone)]
pub struct WorkflowContext {
    workflow_id: String,
    engine: WorkflowEngine,
}

impl WorkflowContext {
    pub(crate) fn new(workflow_id: String, engine: WorkflowEngine) -> Self {
        Self {
            workflow_id,
            engine,
        }
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    /// Run `activity` in-process, bounded by `options.timeout` per attempt and
    /// retried per `options.retry`. A timeout counts as a failed attempt.
    pub async fn local_activity<T, F, Fut>(
        &self,
        step_id: &str,
        options: &ActivityOptions,
        activity: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(recorded) = self.replay(step_id).await? {
            return Ok(recorded);
        }

        let mut attempt = 1;
        let output = loop {
            let result = match tokio::time::timeout(options.timeout, activity()).await {
                Ok(result) => result,
                Err(_) => Err(TributaryError::Timeout {
                    operation: format!("activity {step_id}"),
                    after: options.timeout,
                }),
            };

            match result {
                Ok(output) => break output,
                Err(err) if attempt < options.retry.max_attempts => {
                    let backoff = options.retry.backoff_for(attempt);
                    warn!(
                        workflow_id = %self.workflow_id,
                        step_id,
                        attempt,
                        backoff = ?backoff,
                        error = %err,
                        "activity failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        };

        self.record(step_id, &output).await?;
        Ok(output)
    }

    /// Run `effect` once and journal its output, with no timeout and no
    /// retries. For effects that bound themselves, such as state writes.
    pub async fn side_effect<T, F, Fut>(&self, step_id: &str, effect: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        if let Some(recorded) = self.replay(step_id).await? {
            return Ok(recorded);
        }

        let output = effect().await;
        self.record(step_id, &output).await?;
        Ok(output)
    }

    /// Run `workflow` as a child under `child_id` and wait for its output.
    ///
    /// The child gets its own journal entry, so a child that already
    /// completed is never executed twice, even when the parent is.
    pub async fn child_workflow<T, F, Fut>(&self, child_id: &str, workflow: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce(WorkflowContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let step_id = format!("child:{child_id}");
        if let Some(recorded) = self.replay(&step_id).await? {
            return Ok(recorded);
        }

        let output: T = self.engine.start(child_id, workflow).await?.wait().await?;

        self.record(&step_id, &output).await?;
        Ok(output)
    }

    async fn replay<T: DeserializeOwned>(&self, step_id: &str) -> Result<Option<T>> {
        let recorded = self
            .engine
            .journal()
            .load_step(&self.workflow_id, step_id)
            .await?;

        match recorded {
            Some(value) => {
                debug!(workflow_id = %self.workflow_id, step_id, "replaying recorded step");
                Ok(Some(serde_json::from_value(value)?))
            }
            None => Ok(None),
        }
    }

    async fn record<T: Serialize>(&self, step_id: &str, output: &T) -> Result<()> {
        let value = serde_json::to_value(output)?;
        self.engine
            .journal()
            .record_step(&self.workflow_id, step_id, &value)
            .await
    }
}
