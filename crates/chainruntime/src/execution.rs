use crate::{StepObservers, WorkflowTemplate};
use chaincore::{
    EngineError, EventBus, StepState, Value, WorkflowContext, WorkflowEvent,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Lifecycle state of one execution.
///
/// `Paused` is reserved; nothing in the runtime currently transitions into
/// it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionState::Completed | ExecutionState::Failed | ExecutionState::Cancelled
        )
    }
}

/// Step-chain progress of one execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Progress {
    pub total_steps: usize,
    pub completed_steps: usize,
    pub percentage: f64,
}

/// Externally observable snapshot of an execution — the status contract
/// surfaced by the query API and archived into the engine's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStatus {
    pub workflow_id: String,
    pub template: String,
    pub user_id: String,
    pub state: ExecutionState,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_secs: Option<f64>,
    pub error: Option<String>,
    pub retry_count: u32,
    pub progress: Progress,
    pub step_results: HashMap<String, chaincore::StepResult>,
    pub metadata: HashMap<String, Value>,
}

struct ExecutionInner {
    state: ExecutionState,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    error: Option<String>,
    retry_count: u32,
}

/// One run of a template against specific input.
///
/// State machine: pending → running → {completed | failed | cancelled}, with
/// no way out of a terminal state; every terminal transition goes through
/// `mark_terminal`. The execution exclusively owns its context.
pub struct WorkflowExecution {
    workflow_id: String,
    template: Arc<WorkflowTemplate>,
    user_id: String,
    context: WorkflowContext,
    inner: RwLock<ExecutionInner>,
    cancellation: CancellationToken,
    step_observers: StepObservers,
    events: EventBus,
}

impl WorkflowExecution {
    pub fn new(
        workflow_id: impl Into<String>,
        template: Arc<WorkflowTemplate>,
        user_id: impl Into<String>,
        input_data: HashMap<String, Value>,
        step_observers: StepObservers,
        events: EventBus,
    ) -> Self {
        let workflow_id = workflow_id.into();
        let user_id = user_id.into();
        let context = WorkflowContext::new(workflow_id.clone(), user_id.clone(), input_data);
        Self {
            workflow_id,
            template,
            user_id,
            context,
            inner: RwLock::new(ExecutionInner {
                state: ExecutionState::Pending,
                started_at: None,
                finished_at: None,
                error: None,
                retry_count: 0,
            }),
            cancellation: CancellationToken::new(),
            step_observers,
            events,
        }
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn template(&self) -> &Arc<WorkflowTemplate> {
        &self.template
    }

    pub fn context(&self) -> &WorkflowContext {
        &self.context
    }

    pub async fn state(&self) -> ExecutionState {
        self.inner.read().await.state
    }

    /// Run the chain to its terminal state. A no-op unless still pending.
    ///
    /// The whole walk runs under the template's total timeout; a step
    /// failure, the timeout or cancellation each end the run, and the error
    /// is re-raised so the supervising task can account for it.
    pub async fn execute(&self) -> chaincore::Result<()> {
        {
            let mut inner = self.inner.write().await;
            if inner.state != ExecutionState::Pending {
                return Ok(());
            }
            inner.state = ExecutionState::Running;
            inner.started_at = Some(Utc::now());
        }
        tracing::info!(
            workflow_id = %self.workflow_id,
            template = %self.template.name(),
            "execution started"
        );

        let total_budget = self.template.timeout();
        let outcome = match timeout(total_budget, self.walk_chain()).await {
            Ok(result) => result,
            Err(_elapsed) => Err(EngineError::ExecutionTimeout {
                timeout_secs: total_budget.as_secs(),
            }),
        };

        match outcome {
            Ok(()) => {
                self.mark_terminal(ExecutionState::Completed, None).await;
                tracing::info!(workflow_id = %self.workflow_id, "execution completed");
                Ok(())
            }
            Err(EngineError::Cancelled) => {
                // cancel() already recorded the terminal state
                tracing::info!(workflow_id = %self.workflow_id, "execution cancelled");
                Err(EngineError::Cancelled)
            }
            Err(err) => {
                self.mark_terminal(ExecutionState::Failed, Some(err.to_string()))
                    .await;
                tracing::error!(
                    workflow_id = %self.workflow_id,
                    error = %err,
                    "execution failed"
                );
                Err(err)
            }
        }
    }

    async fn walk_chain(&self) -> chaincore::Result<()> {
        for step in self.template.step_chain() {
            if self.cancellation.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            let result = tokio::select! {
                _ = self.cancellation.cancelled() => return Err(EngineError::Cancelled),
                result = step.execute(&self.context, &self.step_observers) => result,
            };

            self.events.emit(WorkflowEvent::StepFinished {
                workflow_id: self.workflow_id.clone(),
                result: result.clone(),
                timestamp: Utc::now(),
            });

            if result.state == StepState::Failed {
                return Err(EngineError::StepFailed {
                    step: step.name().to_string(),
                    message: result.error.unwrap_or_default(),
                });
            }
        }
        Ok(())
    }

    /// Cooperative cancellation: records the terminal state and fires the
    /// token so in-flight step work can observe it. Already-terminal
    /// executions are left untouched.
    pub async fn cancel(&self) {
        {
            let mut inner = self.inner.write().await;
            if inner.state.is_terminal() {
                return;
            }
            inner.state = ExecutionState::Cancelled;
            inner.finished_at = Some(Utc::now());
        }
        self.cancellation.cancel();
        tracing::info!(workflow_id = %self.workflow_id, "cancellation requested");
    }

    async fn mark_terminal(&self, state: ExecutionState, error: Option<String>) {
        let mut inner = self.inner.write().await;
        if inner.state.is_terminal() {
            return;
        }
        inner.state = state;
        inner.finished_at = Some(Utc::now());
        if error.is_some() {
            inner.error = error;
        }
    }

    pub async fn progress(&self) -> Progress {
        let total_steps = self.template.step_count();
        let completed_steps = self.context.completed_count().await;
        let percentage = if total_steps == 0 {
            0.0
        } else {
            completed_steps as f64 / total_steps as f64 * 100.0
        };
        Progress {
            total_steps,
            completed_steps,
            percentage,
        }
    }

    /// First step in template order without a terminal result, if any
    pub async fn current_step(&self) -> Option<String> {
        let results = self.context.results_snapshot().await;
        for step in self.template.step_chain() {
            match results.get(step.name()) {
                Some(result) if result.is_terminal() => continue,
                _ => return Some(step.name().to_string()),
            }
        }
        None
    }

    pub async fn status(&self) -> ExecutionStatus {
        let inner = self.inner.read().await;
        let duration_secs = match (inner.started_at, inner.finished_at) {
            (Some(start), Some(end)) => {
                Some((end - start).num_milliseconds() as f64 / 1000.0)
            }
            _ => None,
        };
        let state = inner.state;
        let started_at = inner.started_at;
        let finished_at = inner.finished_at;
        let error = inner.error.clone();
        let retry_count = inner.retry_count;
        drop(inner);

        ExecutionStatus {
            workflow_id: self.workflow_id.clone(),
            template: self.template.name().to_string(),
            user_id: self.user_id.clone(),
            state,
            started_at,
            finished_at,
            duration_secs,
            error,
            retry_count,
            progress: self.progress().await,
            step_results: self.context.results_snapshot().await,
            metadata: self.context.metadata_snapshot().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WorkflowStep;
    use async_trait::async_trait;
    use chaincore::{StepData, StepError, StepWork};

    struct EchoWork {
        key: &'static str,
    }

    #[async_trait]
    impl StepWork for EchoWork {
        fn kind(&self) -> &str {
            "test.echo"
        }

        async fn run(&self, _ctx: &WorkflowContext) -> Result<StepData, StepError> {
            let mut data = HashMap::new();
            data.insert(self.key.to_string(), Value::from(true));
            Ok(data)
        }
    }

    fn execution(template: WorkflowTemplate) -> WorkflowExecution {
        WorkflowExecution::new(
            "wf-test",
            Arc::new(template),
            "u-1",
            HashMap::new(),
            StepObservers::empty(),
            EventBus::new(16),
        )
    }

    #[tokio::test]
    async fn happy_path_reaches_completed_with_full_progress() {
        let template = WorkflowTemplate::new("two_steps")
            .with_step(WorkflowStep::new("a", Arc::new(EchoWork { key: "x" })))
            .with_step(
                WorkflowStep::new("b", Arc::new(EchoWork { key: "y" })).requires("a"),
            );
        let exec = execution(template);

        exec.execute().await.unwrap();

        assert_eq!(exec.state().await, ExecutionState::Completed);
        let progress = exec.progress().await;
        assert_eq!(progress.completed_steps, 2);
        assert_eq!(progress.percentage, 100.0);
        assert!(exec.current_step().await.is_none());

        let status = exec.status().await;
        assert!(status.finished_at.is_some());
        assert!(status.duration_secs.is_some());
        assert_eq!(status.step_results.len(), 2);
    }

    #[tokio::test]
    async fn execute_is_a_noop_once_terminal() {
        let template =
            WorkflowTemplate::new("single").with_step(WorkflowStep::new(
                "only",
                Arc::new(EchoWork { key: "v" }),
            ));
        let exec = execution(template);

        exec.execute().await.unwrap();
        let first_finish = exec.status().await.finished_at;

        // second call must not restart the chain or touch timestamps
        exec.execute().await.unwrap();
        assert_eq!(exec.status().await.finished_at, first_finish);
    }

    #[tokio::test]
    async fn failed_step_halts_the_chain_and_fails_the_execution() {
        struct BrokenWork;

        #[async_trait]
        impl StepWork for BrokenWork {
            fn kind(&self) -> &str {
                "test.broken"
            }

            async fn run(&self, _ctx: &WorkflowContext) -> Result<StepData, StepError> {
                Err(StepError::Failed("no quota left".to_string()))
            }
        }

        let template = WorkflowTemplate::new("halting")
            .with_step(WorkflowStep::new("breaks", Arc::new(BrokenWork)))
            .with_step(WorkflowStep::new("never", Arc::new(EchoWork { key: "z" })));
        let exec = execution(template);

        let err = exec.execute().await.unwrap_err();
        assert!(matches!(err, EngineError::StepFailed { ref step, .. } if step == "breaks"));
        assert_eq!(exec.state().await, ExecutionState::Failed);

        let status = exec.status().await;
        assert!(status.error.as_deref().unwrap().contains("no quota left"));
        // the step after the failure never produced a result
        assert!(!status.step_results.contains_key("never"));
        assert_eq!(exec.current_step().await.as_deref(), Some("never"));
    }

    #[tokio::test(start_paused = true)]
    async fn template_timeout_fails_the_execution() {
        struct SleepyWork;

        #[async_trait]
        impl StepWork for SleepyWork {
            fn kind(&self) -> &str {
                "test.sleepy"
            }

            async fn run(&self, _ctx: &WorkflowContext) -> Result<StepData, StepError> {
                tokio::time::sleep(tokio::time::Duration::from_secs(600)).await;
                Ok(HashMap::new())
            }
        }

        let template = WorkflowTemplate::new("slow")
            .with_timeout(tokio::time::Duration::from_secs(2))
            .with_step(WorkflowStep::new("sleepy", Arc::new(SleepyWork)));
        let exec = execution(template);

        let err = exec.execute().await.unwrap_err();
        assert!(matches!(err, EngineError::ExecutionTimeout { timeout_secs: 2 }));
        assert_eq!(exec.state().await, ExecutionState::Failed);
        assert!(exec
            .status()
            .await
            .error
            .as_deref()
            .unwrap()
            .contains("2"));
    }

    #[tokio::test]
    async fn empty_template_completes_with_zero_progress() {
        let exec = execution(WorkflowTemplate::new("empty"));
        exec.execute().await.unwrap();
        assert_eq!(exec.state().await, ExecutionState::Completed);
        let progress = exec.progress().await;
        assert_eq!(progress.total_steps, 0);
        assert_eq!(progress.percentage, 0.0);
    }

    #[tokio::test]
    async fn cancel_before_start_keeps_cancelled_state() {
        let template = WorkflowTemplate::new("never_runs")
            .with_step(WorkflowStep::new("a", Arc::new(EchoWork { key: "x" })));
        let exec = execution(template);

        exec.cancel().await;
        assert_eq!(exec.state().await, ExecutionState::Cancelled);
        assert!(exec.status().await.finished_at.is_some());

        // execute() must not resurrect a cancelled run
        exec.execute().await.unwrap();
        assert_eq!(exec.state().await, ExecutionState::Cancelled);
        assert_eq!(exec.progress().await.completed_steps, 0);
    }
}
