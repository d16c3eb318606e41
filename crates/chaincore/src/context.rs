use crate::{StepResult, StepState, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Per-execution state shared down the step chain.
///
/// Cloning is cheap: the interior maps sit behind `Arc<RwLock<...>>` so a
/// status query can read results while a step is still running. Each context
/// belongs to exactly one execution and is never shared across executions.
#[derive(Clone)]
pub struct WorkflowContext {
    pub workflow_id: String,
    pub user_id: String,
    input_data: Arc<HashMap<String, Value>>,
    shared_data: Arc<RwLock<HashMap<String, Value>>>,
    step_results: Arc<RwLock<HashMap<String, StepResult>>>,
    metadata: Arc<RwLock<HashMap<String, Value>>>,
}

impl WorkflowContext {
    pub fn new(
        workflow_id: impl Into<String>,
        user_id: impl Into<String>,
        input_data: HashMap<String, Value>,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            user_id: user_id.into(),
            input_data: Arc::new(input_data),
            shared_data: Arc::new(RwLock::new(HashMap::new())),
            step_results: Arc::new(RwLock::new(HashMap::new())),
            metadata: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Caller-supplied input, read-only for the lifetime of the execution
    pub fn input(&self) -> &HashMap<String, Value> {
        &self.input_data
    }

    pub fn input_value(&self, name: &str) -> Option<&Value> {
        self.input_data.get(name)
    }

    /// Ad hoc state passed forward between steps
    pub async fn set_shared(&self, key: impl Into<String>, value: Value) {
        self.shared_data.write().await.insert(key.into(), value);
    }

    pub async fn get_shared(&self, key: &str) -> Option<Value> {
        self.shared_data.read().await.get(key).cloned()
    }

    /// Record a step's final result. Each step name is written at most once
    /// per execution; a second write for the same name is a runner bug and is
    /// logged before replacing the entry.
    pub async fn record_result(&self, result: StepResult) {
        let mut results = self.step_results.write().await;
        if let Some(previous) = results.insert(result.step_name.clone(), result) {
            tracing::warn!(
                workflow_id = %self.workflow_id,
                step = %previous.step_name,
                "step result recorded twice, replacing earlier entry"
            );
        }
    }

    pub async fn step_result(&self, step_name: &str) -> Option<StepResult> {
        self.step_results.read().await.get(step_name).cloned()
    }

    /// Whether the named step has run to successful completion
    pub async fn step_completed(&self, step_name: &str) -> bool {
        self.step_results
            .read()
            .await
            .get(step_name)
            .map(|r| r.state == StepState::Completed)
            .unwrap_or(false)
    }

    /// Output data of a completed step, if any
    pub async fn step_data(&self, step_name: &str) -> Option<HashMap<String, Value>> {
        self.step_results
            .read()
            .await
            .get(step_name)
            .filter(|r| r.state == StepState::Completed)
            .map(|r| r.data.clone())
    }

    pub async fn completed_count(&self) -> usize {
        self.step_results
            .read()
            .await
            .values()
            .filter(|r| r.state == StepState::Completed)
            .count()
    }

    pub async fn results_snapshot(&self) -> HashMap<String, StepResult> {
        self.step_results.read().await.clone()
    }

    pub async fn set_metadata(&self, key: impl Into<String>, value: Value) {
        self.metadata.write().await.insert(key.into(), value);
    }

    pub async fn metadata_snapshot(&self) -> HashMap<String, Value> {
        self.metadata.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn step_data_is_only_visible_for_completed_steps() {
        let ctx = WorkflowContext::new("wf-1", "user-1", HashMap::new());

        let mut failed = StepResult::started("scrape");
        failed.fail("upstream 503");
        ctx.record_result(failed).await;

        assert!(ctx.step_data("scrape").await.is_none());
        assert!(!ctx.step_completed("scrape").await);

        let mut ok = StepResult::started("script");
        let mut data = HashMap::new();
        data.insert("text".to_string(), Value::from("hello"));
        ok.complete(data);
        ctx.record_result(ok).await;

        let data = ctx.step_data("script").await.unwrap();
        assert_eq!(data["text"].as_str(), Some("hello"));
        assert_eq!(ctx.completed_count().await, 1);
    }

    #[tokio::test]
    async fn shared_data_round_trips() {
        let ctx = WorkflowContext::new("wf-2", "user-1", HashMap::new());
        ctx.set_shared("cursor", Value::from(42i64)).await;
        assert_eq!(ctx.get_shared("cursor").await.unwrap().as_i64(), Some(42));
        assert!(ctx.get_shared("missing").await.is_none());
    }
}
