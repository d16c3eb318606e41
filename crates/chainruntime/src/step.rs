use chaincore::{
    RetryPolicy, StepObserver, StepResult, StepWork, WorkflowContext, DEFAULT_STEP_TIMEOUT_SECS,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, timeout, Duration};

/// Snapshot of the engine's registered step observers, attached to an
/// execution at start time. Observer failures are logged and counted; they
/// never reach the step runner's control flow.
#[derive(Clone)]
pub struct StepObservers {
    observers: Arc<Vec<Arc<dyn StepObserver>>>,
    failures: Arc<AtomicU64>,
}

impl StepObservers {
    pub fn new(observers: Vec<Arc<dyn StepObserver>>, failures: Arc<AtomicU64>) -> Self {
        Self {
            observers: Arc::new(observers),
            failures,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), Arc::new(AtomicU64::new(0)))
    }

    pub fn notify(&self, workflow_id: &str, result: &StepResult) {
        for observer in self.observers.iter() {
            if let Err(err) = observer.on_step_result(workflow_id, result) {
                self.failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    workflow_id = %workflow_id,
                    step = %result.step_name,
                    error = %err,
                    "step observer failed, continuing"
                );
            }
        }
    }

    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

/// One unit of work in a template's chain.
///
/// The runner owns everything around the opaque work function: prerequisite
/// checking, the per-step timeout, the optional retry policy and observer
/// notification. Composition over inheritance: the work itself stays a flat
/// `StepWork` trait object.
#[derive(Debug)]
pub struct WorkflowStep {
    name: String,
    required_steps: Vec<String>,
    timeout: Duration,
    retry: Option<RetryPolicy>,
    work: Arc<dyn StepWork>,
}

impl WorkflowStep {
    pub fn new(name: impl Into<String>, work: Arc<dyn StepWork>) -> Self {
        Self {
            name: name.into(),
            required_steps: Vec::new(),
            timeout: Duration::from_secs(DEFAULT_STEP_TIMEOUT_SECS),
            retry: None,
            work,
        }
    }

    pub fn requires(mut self, step_name: impl Into<String>) -> Self {
        self.required_steps.push(step_name.into());
        self
    }

    pub fn with_required_steps(mut self, names: Vec<String>) -> Self {
        self.required_steps = names;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &str {
        self.work.kind()
    }

    pub fn required_steps(&self) -> &[String] {
        &self.required_steps
    }

    /// Run this step against the context.
    ///
    /// The final `StepResult` is always recorded into the context and handed
    /// to every observer before returning, whatever the outcome. If a
    /// prerequisite has not completed the work function is never invoked and
    /// the result is failed — halting the chain beats silently skipping.
    pub async fn execute(
        &self,
        ctx: &WorkflowContext,
        observers: &StepObservers,
    ) -> StepResult {
        let mut result = StepResult::started(&self.name);
        tracing::debug!(workflow_id = %ctx.workflow_id, step = %self.name, "step starting");

        if let Some(missing) = self.unmet_prerequisite(ctx).await {
            result.fail(format!(
                "prerequisite step '{}' has not completed",
                missing
            ));
            tracing::warn!(
                workflow_id = %ctx.workflow_id,
                step = %self.name,
                prerequisite = %missing,
                "prerequisite not met, step not run"
            );
            ctx.record_result(result.clone()).await;
            observers.notify(&ctx.workflow_id, &result);
            return result;
        }

        let max_attempts = self
            .retry
            .as_ref()
            .map(|r| r.max_attempts.max(1))
            .unwrap_or(1);
        let mut attempt = 0u32;

        loop {
            match timeout(self.timeout, self.work.run(ctx)).await {
                Ok(Ok(data)) => {
                    result
                        .metrics
                        .insert("attempts".to_string(), (attempt + 1) as f64);
                    result.complete(data);
                    tracing::info!(
                        workflow_id = %ctx.workflow_id,
                        step = %self.name,
                        "step completed"
                    );
                    break;
                }
                Ok(Err(err)) => {
                    if attempt + 1 < max_attempts {
                        let delay = self
                            .retry
                            .as_ref()
                            .map(|r| r.delay_for_attempt(attempt))
                            .unwrap_or_default();
                        tracing::warn!(
                            workflow_id = %ctx.workflow_id,
                            step = %self.name,
                            attempt = attempt + 1,
                            error = %err,
                            "step attempt failed, retrying"
                        );
                        sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    result
                        .metrics
                        .insert("attempts".to_string(), (attempt + 1) as f64);
                    result.fail(err.to_string());
                    tracing::error!(
                        workflow_id = %ctx.workflow_id,
                        step = %self.name,
                        error = %err,
                        "step failed"
                    );
                    break;
                }
                Err(_elapsed) => {
                    if attempt + 1 < max_attempts {
                        let delay = self
                            .retry
                            .as_ref()
                            .map(|r| r.delay_for_attempt(attempt))
                            .unwrap_or_default();
                        tracing::warn!(
                            workflow_id = %ctx.workflow_id,
                            step = %self.name,
                            attempt = attempt + 1,
                            "step timed out, retrying"
                        );
                        sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    result
                        .metrics
                        .insert("attempts".to_string(), (attempt + 1) as f64);
                    result.fail_timeout(self.timeout.as_secs());
                    tracing::error!(
                        workflow_id = %ctx.workflow_id,
                        step = %self.name,
                        timeout_secs = self.timeout.as_secs(),
                        "step timed out"
                    );
                    break;
                }
            }
        }

        ctx.record_result(result.clone()).await;
        observers.notify(&ctx.workflow_id, &result);
        result
    }

    async fn unmet_prerequisite(&self, ctx: &WorkflowContext) -> Option<&str> {
        for required in &self.required_steps {
            if !ctx.step_completed(required).await {
                return Some(required);
            }
        }
        None
    }
}
