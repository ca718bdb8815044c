//! Event and project-event state machines, and the update message published
//! for live observers.
//!
//! ```text
//!            ┌────────────┐
//!            │  Pending   │
//!            └─────┬──────┘
//!        ┌─────────┼──────────────┐
//!        ▼         ▼              ▼
//!   ┌─────────┐ ┌────────────┐ ┌───────┐
//!   │ Ignored │ │ Processing │ │ Error │
//!   └─────────┘ └─────┬──────┘ └───────┘
//!                     ├──────────────┐
//!                     ▼              ▼
//!               ┌───────────┐    ┌───────┐
//!               │ Processed │    │ Error │
//!               └───────────┘    └───────┘
//! ```
//!
//! Terminal states never change. Writing the current state again is allowed
//! so replayed workflow steps stay harmless.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{EventId, ProjectId, RunSummary};

/// Aggregate state of one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EventState {
    Pending,
    Processing {
        active_project_ids: Vec<ProjectId>,
        ignored_project_ids: Vec<ProjectId>,
    },
    Processed {
        all_project_ids: Vec<ProjectId>,
        failed_project_ids: Vec<ProjectId>,
    },
    Ignored {
        reason: String,
    },
    Error {
        cause: String,
    },
}

impl EventState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing { .. } => "processing",
            Self::Processed { .. } => "processed",
            Self::Ignored { .. } => "ignored",
            Self::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Processed { .. } | Self::Ignored { .. } | Self::Error { .. }
        )
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// Whether moving from `self` to `next` keeps the machine monotonic.
    pub fn can_transition_to(&self, next: &EventState) -> bool {
        if self == next {
            return true;
        }
        match self {
            Self::Pending => !matches!(next, Self::Pending),
            Self::Processing { .. } => {
                matches!(next, Self::Processed { .. } | Self::Error { .. })
            }
            _ => false,
        }
    }
}

/// State of one project's reaction to one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ProjectEventState {
    Pending,
    Ignored {
        reason: String,
    },
    Completed {
        run_summary: RunSummary,
    },
    Error {
        cause: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        run_summary: Option<RunSummary>,
    },
}

impl ProjectEventState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ignored { .. } => "ignored",
            Self::Completed { .. } => "completed",
            Self::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    pub fn can_transition_to(&self, next: &ProjectEventState) -> bool {
        self == next || matches!(self, Self::Pending)
    }
}

/// The state carried by a [`StateUpdate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackedState {
    Event(EventState),
    Project(ProjectEventState),
}

/// A single recorded transition, as published on tracking topics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateUpdate {
    pub event_id: EventId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<ProjectId>,
    pub state: TrackedState,
}

impl StateUpdate {
    pub fn event(event_id: EventId, state: EventState) -> Self {
        Self {
            event_id,
            project_id: None,
            state: TrackedState::Event(state),
        }
    }

    pub fn project(event_id: EventId, project_id: ProjectId, state: ProjectEventState) -> Self {
        Self {
            event_id,
            project_id: Some(project_id),
            state: TrackedState::Project(state),
        }
    }

    /// The event-level state, if this is an event update.
    pub fn event_state(&self) -> Option<&EventState> {
        match &self.state {
            TrackedState::Event(state) => Some(state),
            TrackedState::Project(_) => None,
        }
    }

    /// The project-level state, if this is a project-event update.
    pub fn project_state(&self) -> Option<&ProjectEventState> {
        match &self.state {
            TrackedState::Project(state) => Some(state),
            TrackedState::Event(_) => None,
        }
    }

    /// Serialize for a pub/sub payload.
    pub fn encode(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    /// Parse a pub/sub payload.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn processing() -> EventState {
        EventState::Processing {
            active_project_ids: vec!["p1".into()],
            ignored_project_ids: vec![],
        }
    }

    fn processed() -> EventState {
        EventState::Processed {
            all_project_ids: vec!["p1".into()],
            failed_project_ids: vec![],
        }
    }

    #[test]
    fn event_state_moves_forward_only() {
        assert!(EventState::Pending.can_transition_to(&processing()));
        assert!(EventState::Pending.can_transition_to(&EventState::Ignored {
            reason: "event source disabled".into()
        }));
        assert!(processing().can_transition_to(&processed()));
        assert!(processing().can_transition_to(&EventState::Error { cause: "boom".into() }));

        assert!(!processing().can_transition_to(&EventState::Pending));
        assert!(!processed().can_transition_to(&EventState::Pending));
        assert!(!processed().can_transition_to(&EventState::Error { cause: "late".into() }));
        assert!(!processing().can_transition_to(&EventState::Ignored { reason: "x".into() }));
    }

    #[test]
    fn rewriting_the_same_state_is_allowed() {
        assert!(EventState::Pending.can_transition_to(&EventState::Pending));
        assert!(processed().can_transition_to(&processed()));

        let done = ProjectEventState::Completed {
            run_summary: RunSummary::default(),
        };
        assert!(done.can_transition_to(&done.clone()));
    }

    #[test]
    fn project_state_terminals_are_final() {
        let error = ProjectEventState::Error {
            cause: "boom".into(),
            run_summary: None,
        };
        assert!(ProjectEventState::Pending.can_transition_to(&error));
        assert!(!error.can_transition_to(&ProjectEventState::Pending));
        assert!(!error.can_transition_to(&ProjectEventState::Completed {
            run_summary: RunSummary::default()
        }));
        assert!(error.is_error());
        assert!(error.is_terminal());
        assert!(!ProjectEventState::Pending.is_terminal());
    }
}
