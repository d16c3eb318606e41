//! Lifecycle events and observer seams.
//!
//! Two delivery paths exist side by side: registered observers are invoked
//! synchronously by the runtime (with error isolation — a failing observer is
//! logged and counted, never propagated), while the broadcast `EventBus`
//! offers a lossy subscription stream for outer surfaces such as the server's
//! websocket endpoint.

use crate::StepResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Workflow-level lifecycle events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkflowEvent {
    WorkflowStarted {
        workflow_id: String,
        template: String,
        user_id: String,
        timestamp: DateTime<Utc>,
    },
    WorkflowCompleted {
        workflow_id: String,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    WorkflowFailed {
        workflow_id: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
    WorkflowCancelled {
        workflow_id: String,
        timestamp: DateTime<Utc>,
    },
    StepFinished {
        workflow_id: String,
        result: StepResult,
        timestamp: DateTime<Utc>,
    },
}

impl WorkflowEvent {
    /// Metric-style event name for observability sinks
    pub fn name(&self) -> &'static str {
        match self {
            WorkflowEvent::WorkflowStarted { .. } => "workflows_started",
            WorkflowEvent::WorkflowCompleted { .. } => "workflows_completed",
            WorkflowEvent::WorkflowFailed { .. } => "workflows_failed",
            WorkflowEvent::WorkflowCancelled { .. } => "workflows_cancelled",
            WorkflowEvent::StepFinished { .. } => "step_finished",
        }
    }

    pub fn workflow_id(&self) -> &str {
        match self {
            WorkflowEvent::WorkflowStarted { workflow_id, .. }
            | WorkflowEvent::WorkflowCompleted { workflow_id, .. }
            | WorkflowEvent::WorkflowFailed { workflow_id, .. }
            | WorkflowEvent::WorkflowCancelled { workflow_id, .. }
            | WorkflowEvent::StepFinished { workflow_id, .. } => workflow_id,
        }
    }

    /// Terminal events mark the point after which an execution leaves the
    /// engine's active set
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowEvent::WorkflowCompleted { .. }
                | WorkflowEvent::WorkflowFailed { .. }
                | WorkflowEvent::WorkflowCancelled { .. }
        )
    }
}

/// Observer of workflow-level lifecycle events (metrics, logging).
///
/// A returned error is swallowed by the caller after logging; it never
/// aborts the owning execution or the engine.
pub trait WorkflowObserver: Send + Sync {
    fn on_workflow_event(&self, event: &WorkflowEvent) -> anyhow::Result<()>;
}

/// Observer of per-step outcomes, notified once per recorded `StepResult`
pub trait StepObserver: Send + Sync {
    fn on_step_result(&self, workflow_id: &str, result: &StepResult) -> anyhow::Result<()>;
}

/// Lossy broadcast bus for lifecycle events
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<WorkflowEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.sender.subscribe()
    }

    /// Send never blocks; with no subscribers the event is dropped
    pub fn emit(&self, event: WorkflowEvent) {
        let _ = self.sender.send(event);
    }
}
