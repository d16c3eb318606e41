//! Core abstractions for the chainflow workflow engine
//!
//! This crate provides the fundamental types that the runtime, the standard
//! step library and the outer surfaces (server, CLI) depend on: dynamic
//! values, step results, the per-execution context, serializable template
//! definitions, the `StepWork` trait and the observer/event machinery.

mod context;
mod error;
pub mod events;
mod result;
mod template;
mod value;
mod work;

pub use context::WorkflowContext;
pub use error::{EngineError, StepError, TemplateError};
pub use events::{EventBus, StepObserver, WorkflowEvent, WorkflowObserver};
pub use result::{StepResult, StepState};
pub use template::{RetryPolicy, StepSpec, TemplateSpec, DEFAULT_STEP_TIMEOUT_SECS};
pub use value::Value;
pub use work::{StepData, StepWork};

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
