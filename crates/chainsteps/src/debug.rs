use async_trait::async_trait;
use chaincore::{StepData, StepError, StepWork, Value, WorkflowContext};
use chainruntime::StepFactory;
use std::collections::HashMap;
use std::sync::Arc;

/// Log a configured message plus the execution's input, for wiring checks
pub struct LogStep {
    message: String,
}

impl LogStep {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl StepWork for LogStep {
    fn kind(&self) -> &str {
        "debug.log"
    }

    async fn run(&self, ctx: &WorkflowContext) -> Result<StepData, StepError> {
        tracing::info!(
            workflow_id = %ctx.workflow_id,
            user_id = %ctx.user_id,
            "{}",
            self.message
        );
        for (key, value) in ctx.input() {
            tracing::info!(workflow_id = %ctx.workflow_id, input = %key, "  {:?}", value);
        }

        let mut data = HashMap::new();
        data.insert("message".to_string(), Value::from(self.message.clone()));
        Ok(data)
    }
}

pub struct LogStepFactory;

impl StepFactory for LogStepFactory {
    fn kind(&self) -> &str {
        "debug.log"
    }

    fn create(&self, config: &HashMap<String, Value>) -> Result<Arc<dyn StepWork>, StepError> {
        let message = config
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("(no message)")
            .to_string();
        Ok(Arc::new(LogStep::new(message)))
    }

    fn description(&self) -> &str {
        "Log a message and the run's input"
    }
}
