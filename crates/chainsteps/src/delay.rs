use async_trait::async_trait;
use chaincore::{StepData, StepError, StepWork, Value, WorkflowContext};
use chainruntime::StepFactory;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::{sleep, Duration};

/// Sleep for a configured duration, then report how long was slept
pub struct DelayStep {
    delay: Duration,
}

impl DelayStep {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl StepWork for DelayStep {
    fn kind(&self) -> &str {
        "time.delay"
    }

    async fn run(&self, ctx: &WorkflowContext) -> Result<StepData, StepError> {
        let delay_ms = self.delay.as_millis() as i64;
        tracing::debug!(workflow_id = %ctx.workflow_id, delay_ms, "delaying");
        sleep(self.delay).await;

        let mut data = HashMap::new();
        data.insert("delayed_ms".to_string(), Value::from(delay_ms));
        Ok(data)
    }
}

pub struct DelayStepFactory;

impl StepFactory for DelayStepFactory {
    fn kind(&self) -> &str {
        "time.delay"
    }

    fn create(&self, config: &HashMap<String, Value>) -> Result<Arc<dyn StepWork>, StepError> {
        let delay_ms = config
            .get("delay_ms")
            .and_then(|v| v.as_i64())
            .unwrap_or(1000);
        if delay_ms < 0 {
            return Err(StepError::Configuration(
                "delay_ms must not be negative".to_string(),
            ));
        }
        Ok(Arc::new(DelayStep::new(Duration::from_millis(
            delay_ms as u64,
        ))))
    }

    fn description(&self) -> &str {
        "Sleep for delay_ms milliseconds"
    }
}
