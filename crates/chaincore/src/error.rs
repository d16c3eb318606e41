use thiserror::Error;

/// Errors surfaced by the engine and the execution supervisor
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("template not found: {0}")]
    TemplateNotFound(String),

    #[error("workflow capacity exceeded: {active} active of {max} allowed")]
    CapacityExceeded { active: usize, max: usize },

    #[error("workflow already active: {0}")]
    DuplicateWorkflow(String),

    #[error("step '{step}' failed: {message}")]
    StepFailed { step: String, message: String },

    #[error("workflow timed out after {timeout_secs}s")]
    ExecutionTimeout { timeout_secs: u64 },

    #[error("workflow cancelled")]
    Cancelled,

    #[error("template error: {0}")]
    Template(#[from] TemplateError),

    #[error("step error: {0}")]
    Step(#[from] StepError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors produced by step work functions
#[derive(Error, Debug, Clone)]
pub enum StepError {
    #[error("missing required input: {0}")]
    MissingInput(String),

    #[error("invalid input for '{field}': expected {expected}")]
    InvalidInput { field: String, expected: String },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("execution failed: {0}")]
    Failed(String),

    #[error("timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("cancelled")]
    Cancelled,
}

/// Errors detected while building a template from its serialized definition
#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("template name must not be empty")]
    EmptyName,

    #[error("step name must not be empty")]
    EmptyStepName,

    #[error("duplicate step name: {0}")]
    DuplicateStepName(String),

    #[error("unknown step kind: {0}")]
    UnknownStepKind(String),

    #[error("step '{step}' requires '{required}', which is not an earlier step")]
    UnknownPrerequisite { step: String, required: String },

    #[error("invalid template: {0}")]
    Invalid(String),
}
