//! Workflow orchestration runtime
//!
//! This crate turns the chaincore value types into a running engine: the
//! step runner that enforces prerequisites, timeouts and retries; the
//! immutable template; the per-run execution with its state machine; the
//! process-wide engine that admits, supervises and accounts for concurrent
//! executions; and the registry that builds templates from serialized specs.

mod engine;
mod execution;
mod registry;
mod step;
mod template;

pub use engine::{EngineConfig, EngineStats, WorkflowEngine};
pub use execution::{ExecutionState, ExecutionStatus, Progress, WorkflowExecution};
pub use registry::{StepFactory, StepRegistry};
pub use step::{StepObservers, WorkflowStep};
pub use template::WorkflowTemplate;
