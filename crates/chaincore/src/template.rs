use crate::Value;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default per-step timeout when a spec does not override it
pub const DEFAULT_STEP_TIMEOUT_SECS: u64 = 300;

fn default_step_timeout() -> u64 {
    DEFAULT_STEP_TIMEOUT_SECS
}

fn default_template_timeout() -> u64 {
    3600
}

/// Serializable definition of a workflow template.
///
/// This is what the CLI loads from disk and the server accepts over HTTP;
/// the runtime's registry turns it into an executable `WorkflowTemplate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateSpec {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub steps: Vec<StepSpec>,
    /// Total wall-clock budget for the whole chain, in seconds
    #[serde(default = "default_template_timeout")]
    pub timeout_secs: u64,
}

impl TemplateSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            steps: Vec::new(),
            timeout_secs: default_template_timeout(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_step(mut self, step: StepSpec) -> Self {
        self.steps.push(step);
        self
    }

    pub fn find_step(&self, name: &str) -> Option<&StepSpec> {
        self.steps.iter().find(|s| s.name == name)
    }
}

/// One step within a template definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSpec {
    /// Unique within the template; used for prerequisite lookups
    pub name: String,
    /// Registered step kind, e.g. "time.delay" or "http.request"
    pub kind: String,
    #[serde(default)]
    pub config: HashMap<String, Value>,
    /// Names of steps that must have completed before this one runs
    #[serde(default)]
    pub required_steps: Vec<String>,
    #[serde(default = "default_step_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
}

impl StepSpec {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            config: HashMap::new(),
            required_steps: Vec::new(),
            timeout_secs: default_step_timeout(),
            retry: None,
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn requires(mut self, step_name: impl Into<String>) -> Self {
        self.required_steps.push(step_name.into());
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_retry(mut self, max_attempts: u32, delay_ms: u64) -> Self {
        self.retry = Some(RetryPolicy {
            max_attempts,
            delay_ms,
            backoff_multiplier: 1.0,
        });
        self
    }
}

/// Retry policy applied around a step's work function
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    /// Delay before the given (zero-based) retry attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> std::time::Duration {
        let factor = self.backoff_multiplier.max(1.0).powi(attempt as i32);
        std::time::Duration::from_millis((self.delay_ms as f64 * factor) as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 1000,
            backoff_multiplier: 2.0,
        }
    }
}
