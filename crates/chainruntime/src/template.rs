use crate::WorkflowStep;
use chaincore::TemplateError;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::time::Duration;

/// Immutable, named definition of an ordered step chain.
///
/// Templates carry no execution state and are shared read-only (via `Arc`)
/// across every concurrent execution started from them.
#[derive(Debug)]
pub struct WorkflowTemplate {
    name: String,
    description: Option<String>,
    steps: Vec<Arc<WorkflowStep>>,
    timeout: Duration,
}

impl WorkflowTemplate {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            steps: Vec::new(),
            timeout: Duration::from_secs(3600),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_step(mut self, step: WorkflowStep) -> Self {
        self.steps.push(Arc::new(step));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Total wall-clock budget for one execution of the whole chain
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The steps in chain order. Repeated calls always yield the same order
    /// with no duplicated links.
    pub fn step_chain(&self) -> impl Iterator<Item = &Arc<WorkflowStep>> {
        self.steps.iter()
    }

    /// Head of the chain, or none for an empty template
    pub fn first_step(&self) -> Option<&Arc<WorkflowStep>> {
        self.steps.first()
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Check the structural invariants: non-empty unique step names, and
    /// every prerequisite referring to an earlier step in the chain.
    pub fn validate(&self) -> Result<(), TemplateError> {
        if self.name.trim().is_empty() {
            return Err(TemplateError::EmptyName);
        }
        let mut seen: HashSet<&str> = HashSet::new();
        for step in &self.steps {
            if step.name().trim().is_empty() {
                return Err(TemplateError::EmptyStepName);
            }
            for required in step.required_steps() {
                if !seen.contains(required.as_str()) {
                    return Err(TemplateError::UnknownPrerequisite {
                        step: step.name().to_string(),
                        required: required.clone(),
                    });
                }
            }
            if !seen.insert(step.name()) {
                return Err(TemplateError::DuplicateStepName(step.name().to_string()));
            }
        }
        Ok(())
    }
}
