//! Durable, replayable workflow execution.
//!
//! A workflow is an async function of a [`WorkflowContext`]. Side effects go
//! through the context as *steps* (local activities and child workflows)
//! whose results are written to a [`WorkflowJournal`] under deterministic
//! step IDs. Re-executing a workflow (after a crash, or a failed attempt)
//! replays recorded steps and only runs the ones that never finished.
//!
//! Workflow IDs are chosen by the caller. The [`WorkflowEngine`] guarantees
//! at most one concurrent execution per ID, and no execution at all for an
//! ID the journal has recorded as completed.

mod context;
mod engine;
mod journal;
mod retry;

pub use context::WorkflowContext;
pub use engine::{WorkflowEngine, WorkflowHandle};
pub use journal::{BeginOutcome, InMemoryJournal, WorkflowJournal};
pub use retry::{ActivityOptions, RetryPolicy, DEFAULT_ACTIVITY_TIMEOUT};
