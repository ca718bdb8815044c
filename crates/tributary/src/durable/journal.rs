//! Step journal backing durable workflow execution.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use crate::error::Result;

/// What [`WorkflowJournal::begin`] found for a workflow ID.
#[derive(Debug, Clone, PartialEq)]
pub enum BeginOutcome {
    /// The workflow should (re-)execute. `resumed` is true when a previous
    /// execution left recorded steps behind.
    Started { resumed: bool },
    /// The workflow already finished with this output.
    Completed(Value),
}

/// Durable log of workflow executions and their completed steps.
///
/// Step IDs are chosen deterministically by the workflow, so a re-executed
/// workflow finds the results of steps it already ran.
#[async_trait]
pub trait WorkflowJournal: Send + Sync {
    async fn begin(&self, workflow_id: &str) -> Result<BeginOutcome>;

    async fn load_step(&self, workflow_id: &str, step_id: &str) -> Result<Option<Value>>;

    async fn record_step(&self, workflow_id: &str, step_id: &str, output: &Value) -> Result<()>;

    async fn complete(&self, workflow_id: &str, output: &Value) -> Result<()>;
}

#[derive(Debug, Default)]
struct RunRecord {
    steps: HashMap<String, Value>,
    output: Option<Value>,
}

/// Process-local journal. Survives workflow failures but not restarts.
#[derive(Debug, Clone, Default)]
pub struct InMemoryJournal {
    runs: Arc<DashMap<String, RunRecord>>,
}

impl InMemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_completed(&self, workflow_id: &str) -> bool {
        self.runs
            .get(workflow_id)
            .is_some_and(|run| run.output.is_some())
    }

    pub fn step_count(&self, workflow_id: &str) -> usize {
        self.runs
            .get(workflow_id)
            .map(|run| run.steps.len())
            .unwrap_or(0)
    }

    /// IDs of every workflow the journal knows about, sorted.
    pub fn workflow_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.runs.iter().map(|r| r.key().clone()).collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl WorkflowJournal for InMemoryJournal {
    async fn begin(&self, workflow_id: &str) -> Result<BeginOutcome> {
        let run = self.runs.entry(workflow_id.to_string()).or_default();
        Ok(match &run.output {
            Some(output) => BeginOutcome::Completed(output.clone()),
            None => BeginOutcome::Started {
                resumed: !run.steps.is_empty(),
            },
        })
    }

    async fn load_step(&self, workflow_id: &str, step_id: &str) -> Result<Option<Value>> {
        Ok(self
            .runs
            .get(workflow_id)
            .and_then(|run| run.steps.get(step_id).cloned()))
    }

    async fn record_step(&self, workflow_id: &str, step_id: &str, output: &Value) -> Result<()> {
        self.runs
            .entry(workflow_id.to_string())
            .or_default()
            .steps
            .insert(step_id.to_string(), output.clone());
        Ok(())
    }

    async fn complete(&self, workflow_id: &str, output: &Value) -> Result<()> {
        self.runs.entry(workflow_id.to_string()).or_default().output = Some(output.clone());
        Ok(())
    }
}
