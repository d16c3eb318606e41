use async_trait::async_trait;
use chaincore::{StepData, StepError, StepWork, Value, WorkflowContext};
use chainruntime::StepFactory;
use std::collections::HashMap;
use std::sync::Arc;

/// Produce a fixed payload from configuration.
///
/// Useful for seeding a chain with constants and for exercising templates
/// without any external collaborator.
pub struct EmitStep {
    data: HashMap<String, Value>,
}

impl EmitStep {
    pub fn new(data: HashMap<String, Value>) -> Self {
        Self { data }
    }
}

#[async_trait]
impl StepWork for EmitStep {
    fn kind(&self) -> &str {
        "data.emit"
    }

    async fn run(&self, _ctx: &WorkflowContext) -> Result<StepData, StepError> {
        Ok(self.data.clone())
    }
}

pub struct EmitStepFactory;

impl StepFactory for EmitStepFactory {
    fn kind(&self) -> &str {
        "data.emit"
    }

    fn create(&self, config: &HashMap<String, Value>) -> Result<Arc<dyn StepWork>, StepError> {
        let data = match config.get("data") {
            Some(Value::Object(map)) => map.clone(),
            Some(_) => {
                return Err(StepError::Configuration(
                    "data must be an object".to_string(),
                ))
            }
            None => HashMap::new(),
        };
        Ok(Arc::new(EmitStep::new(data)))
    }

    fn description(&self) -> &str {
        "Emit a fixed data object"
    }
}
