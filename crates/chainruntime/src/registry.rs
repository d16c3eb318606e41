use crate::{WorkflowStep, WorkflowTemplate};
use chaincore::{StepError, StepSpec, StepWork, TemplateError, TemplateSpec, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::Duration;

/// Factory for one step kind, turning a config map into a ready work unit
pub trait StepFactory: Send + Sync {
    /// Kind identifier the factory answers for, e.g. "time.delay"
    fn kind(&self) -> &str;

    /// Build the work unit with the given static configuration
    fn create(&self, config: &HashMap<String, Value>) -> Result<Arc<dyn StepWork>, StepError>;

    fn description(&self) -> &str {
        ""
    }
}

/// Registry of available step kinds, used to build executable templates
/// from their serialized specs.
pub struct StepRegistry {
    factories: HashMap<String, Arc<dyn StepFactory>>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register(&mut self, factory: Arc<dyn StepFactory>) {
        let kind = factory.kind().to_string();
        tracing::info!(kind = %kind, "registering step kind");
        self.factories.insert(kind, factory);
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    pub fn list_kinds(&self) -> Vec<String> {
        let mut kinds: Vec<_> = self.factories.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    pub fn describe(&self, kind: &str) -> Option<&str> {
        self.factories.get(kind).map(|f| f.description())
    }

    pub fn create_work(
        &self,
        kind: &str,
        config: &HashMap<String, Value>,
    ) -> chaincore::Result<Arc<dyn StepWork>> {
        let factory = self
            .factories
            .get(kind)
            .ok_or_else(|| TemplateError::UnknownStepKind(kind.to_string()))?;
        Ok(factory.create(config)?)
    }

    /// Validate a serialized template definition and build the executable
    /// template: non-empty unique step names, known kinds, and prerequisites
    /// referring to earlier steps in the chain.
    pub fn build_template(&self, spec: &TemplateSpec) -> chaincore::Result<WorkflowTemplate> {
        let mut template =
            WorkflowTemplate::new(&spec.name).with_timeout(Duration::from_secs(spec.timeout_secs));
        if let Some(description) = &spec.description {
            template = template.with_description(description);
        }
        for step_spec in &spec.steps {
            template = template.with_step(self.build_step(step_spec)?);
        }
        template.validate()?;
        Ok(template)
    }

    fn build_step(&self, spec: &StepSpec) -> chaincore::Result<WorkflowStep> {
        let work = self.create_work(&spec.kind, &spec.config)?;
        let mut step = WorkflowStep::new(&spec.name, work)
            .with_required_steps(spec.required_steps.clone())
            .with_timeout(Duration::from_secs(spec.timeout_secs));
        if let Some(retry) = &spec.retry {
            step = step.with_retry(retry.clone());
        }
        Ok(step)
    }
}

impl Default for StepRegistry {
    fn default() -> Self {
        Self::new()
    }
}
