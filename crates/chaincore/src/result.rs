use crate::Value;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifecycle state of a single step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepState::Completed | StepState::Failed | StepState::Skipped
        )
    }
}

/// Outcome of one step within one execution.
///
/// Created when the step starts, mutated only by the owning step runner, and
/// immutable once recorded into the context. `finished_at` is set exactly
/// when the state becomes terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step_name: String,
    pub state: StepState,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub data: HashMap<String, Value>,
    pub error: Option<String>,
    pub metrics: HashMap<String, f64>,
}

impl StepResult {
    /// A freshly started result, before the work function has run
    pub fn started(step_name: impl Into<String>) -> Self {
        Self {
            step_name: step_name.into(),
            state: StepState::Running,
            started_at: Utc::now(),
            finished_at: None,
            data: HashMap::new(),
            error: None,
            metrics: HashMap::new(),
        }
    }

    /// Transition to completed with the work function's output
    pub fn complete(&mut self, data: HashMap<String, Value>) {
        self.state = StepState::Completed;
        self.finished_at = Some(Utc::now());
        self.metrics
            .insert("data_size".to_string(), data.len() as f64);
        self.data = data;
        self.metrics.insert("success".to_string(), 1.0);
        self.record_execution_time();
    }

    /// Transition to failed with a human-readable reason
    pub fn fail(&mut self, error: impl Into<String>) {
        self.state = StepState::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error.into());
        self.metrics.insert("success".to_string(), 0.0);
        self.metrics.insert("error".to_string(), 1.0);
        self.record_execution_time();
    }

    /// Transition to failed because the configured timeout fired
    pub fn fail_timeout(&mut self, timeout_secs: u64) {
        self.fail(format!("step timed out after {}s", timeout_secs));
        self.metrics.remove("error");
        self.metrics.insert("timeout".to_string(), 1.0);
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Wall-clock duration, available once terminal
    pub fn duration_secs(&self) -> Option<f64> {
        self.finished_at.map(|end| {
            (end - self.started_at).num_milliseconds() as f64 / 1000.0
        })
    }

    fn record_execution_time(&mut self) {
        if let Some(secs) = self.duration_secs() {
            self.metrics.insert("execution_time".to_string(), secs);
        }
    }
}
