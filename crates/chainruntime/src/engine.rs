use crate::{ExecutionStatus, StepObservers, WorkflowExecution, WorkflowTemplate};
use chaincore::{
    EngineError, EventBus, StepObserver, Value, WorkflowEvent, WorkflowObserver,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Engine behavior, owned by the composition root — there is no ambient
/// global engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Capacity gate: admissions beyond this many active executions are
    /// rejected
    pub max_concurrent_workflows: usize,
    /// How many terminal statuses the in-memory archive retains
    pub history_limit: usize,
    pub event_buffer_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_workflows: 100,
            history_limit: 256,
            event_buffer_size: 1024,
        }
    }
}

/// Aggregate counters and registry snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStats {
    pub total_workflows: u64,
    pub completed_workflows: u64,
    pub failed_workflows: u64,
    pub cancelled_workflows: u64,
    pub active_workflows: usize,
    pub observer_failures: u64,
    pub registered_templates: Vec<String>,
    pub active_workflow_ids: Vec<String>,
}

#[derive(Default)]
struct Counters {
    total: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
}

/// Process-wide orchestrator: template registry, capacity gate and
/// supervisor of every active execution.
pub struct WorkflowEngine {
    config: EngineConfig,
    templates: RwLock<HashMap<String, Arc<WorkflowTemplate>>>,
    active: RwLock<HashMap<String, Arc<WorkflowExecution>>>,
    history: RwLock<VecDeque<ExecutionStatus>>,
    counters: Counters,
    step_observers: RwLock<Vec<Arc<dyn StepObserver>>>,
    workflow_observers: RwLock<Vec<Arc<dyn WorkflowObserver>>>,
    observer_failures: Arc<AtomicU64>,
    events: EventBus,
}

impl WorkflowEngine {
    pub fn new(config: EngineConfig) -> Self {
        let events = EventBus::new(config.event_buffer_size);
        Self {
            config,
            templates: RwLock::new(HashMap::new()),
            active: RwLock::new(HashMap::new()),
            history: RwLock::new(VecDeque::new()),
            counters: Counters::default(),
            step_observers: RwLock::new(Vec::new()),
            workflow_observers: RwLock::new(Vec::new()),
            observer_failures: Arc::new(AtomicU64::new(0)),
            events,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Register (or replace) a template under its name. Callers are
    /// responsible for the template's own invariants; `WorkflowTemplate::
    /// validate` and the registry check them at build time.
    pub async fn register_template(&self, template: WorkflowTemplate) {
        let name = template.name().to_string();
        let replaced = self
            .templates
            .write()
            .await
            .insert(name.clone(), Arc::new(template));
        if replaced.is_some() {
            tracing::info!(template = %name, "template re-registered, replacing earlier definition");
        } else {
            tracing::info!(template = %name, "template registered");
        }
    }

    pub async fn template_names(&self) -> Vec<String> {
        self.templates.read().await.keys().cloned().collect()
    }

    /// Step observers registered here are snapshotted into every execution
    /// admitted afterwards — they attach per start call, not per template.
    pub async fn register_step_observer(&self, observer: Arc<dyn StepObserver>) {
        self.step_observers.write().await.push(observer);
    }

    pub async fn register_workflow_observer(&self, observer: Arc<dyn WorkflowObserver>) {
        self.workflow_observers.write().await.push(observer);
    }

    /// Lossy broadcast stream of lifecycle events
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<WorkflowEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Admit and launch one execution of a registered template.
    ///
    /// Fire-and-forget: the workflow id is returned as soon as the execution
    /// is admitted, before any step has run. Admission fails synchronously
    /// with `TemplateNotFound` or `CapacityExceeded`.
    pub async fn start_workflow(
        self: &Arc<Self>,
        template_name: &str,
        user_id: &str,
        input_data: HashMap<String, Value>,
        workflow_id: Option<String>,
    ) -> chaincore::Result<String> {
        let template = self
            .templates
            .read()
            .await
            .get(template_name)
            .cloned()
            .ok_or_else(|| EngineError::TemplateNotFound(template_name.to_string()))?;

        let step_observers = StepObservers::new(
            self.step_observers.read().await.clone(),
            self.observer_failures.clone(),
        );

        let execution = {
            let mut active = self.active.write().await;
            if active.len() >= self.config.max_concurrent_workflows {
                return Err(EngineError::CapacityExceeded {
                    active: active.len(),
                    max: self.config.max_concurrent_workflows,
                });
            }

            let id = workflow_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            if active.contains_key(&id) {
                return Err(EngineError::DuplicateWorkflow(id));
            }

            let execution = Arc::new(WorkflowExecution::new(
                id.clone(),
                template,
                user_id,
                input_data,
                step_observers,
                self.events.clone(),
            ));
            active.insert(id, execution.clone());
            execution
        };

        self.counters.total.fetch_add(1, Ordering::Relaxed);

        let started = WorkflowEvent::WorkflowStarted {
            workflow_id: execution.workflow_id().to_string(),
            template: template_name.to_string(),
            user_id: user_id.to_string(),
            timestamp: Utc::now(),
        };
        self.notify_workflow_observers(&started).await;
        self.events.emit(started);

        tracing::info!(
            workflow_id = %execution.workflow_id(),
            template = %template_name,
            user_id = %user_id,
            "workflow admitted"
        );

        let id = execution.workflow_id().to_string();
        tokio::spawn(Self::supervise(self.clone(), execution));
        Ok(id)
    }

    /// Top of the supervision tree for one execution: awaits it, updates the
    /// aggregate counters, archives the terminal status, removes the
    /// execution from the active set and fans out the terminal event.
    /// Nothing above this re-raises.
    async fn supervise(engine: Arc<WorkflowEngine>, execution: Arc<WorkflowExecution>) {
        let workflow_id = execution.workflow_id().to_string();

        if let Err(err) = execution.execute().await {
            tracing::warn!(workflow_id = %workflow_id, error = %err, "execution ended with error");
        }

        let status = execution.status().await;
        match status.state {
            crate::ExecutionState::Completed => {
                engine.counters.completed.fetch_add(1, Ordering::Relaxed);
            }
            crate::ExecutionState::Cancelled => {
                engine.counters.cancelled.fetch_add(1, Ordering::Relaxed);
            }
            _ => {
                engine.counters.failed.fetch_add(1, Ordering::Relaxed);
            }
        }

        engine.active.write().await.remove(&workflow_id);

        if engine.config.history_limit > 0 {
            let mut history = engine.history.write().await;
            while history.len() >= engine.config.history_limit {
                history.pop_front();
            }
            history.push_back(status.clone());
        }

        let duration_ms = status
            .duration_secs
            .map(|s| (s * 1000.0) as u64)
            .unwrap_or(0);
        let event = match status.state {
            crate::ExecutionState::Completed => WorkflowEvent::WorkflowCompleted {
                workflow_id: workflow_id.clone(),
                duration_ms,
                timestamp: Utc::now(),
            },
            crate::ExecutionState::Cancelled => WorkflowEvent::WorkflowCancelled {
                workflow_id: workflow_id.clone(),
                timestamp: Utc::now(),
            },
            _ => WorkflowEvent::WorkflowFailed {
                workflow_id: workflow_id.clone(),
                error: status.error.clone().unwrap_or_default(),
                timestamp: Utc::now(),
            },
        };
        engine.notify_workflow_observers(&event).await;
        engine.events.emit(event);
    }

    async fn notify_workflow_observers(&self, event: &WorkflowEvent) {
        for observer in self.workflow_observers.read().await.iter() {
            if let Err(err) = observer.on_workflow_event(event) {
                self.observer_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    event = event.name(),
                    workflow_id = event.workflow_id(),
                    error = %err,
                    "workflow observer failed, continuing"
                );
            }
        }
    }

    /// Status of a still-active execution. Terminal executions leave this
    /// query once their supervisor finishes cleanup; see
    /// `get_workflow_history` for the archive.
    pub async fn get_workflow_status(&self, workflow_id: &str) -> Option<ExecutionStatus> {
        let execution = self.active.read().await.get(workflow_id).cloned()?;
        Some(execution.status().await)
    }

    /// Most recent archived terminal status for the given id
    pub async fn get_workflow_history(&self, workflow_id: &str) -> Option<ExecutionStatus> {
        self.history
            .read()
            .await
            .iter()
            .rev()
            .find(|status| status.workflow_id == workflow_id)
            .cloned()
    }

    /// Cooperatively cancel an active execution. Returns whether the id was
    /// active. Removal from the active set stays with the supervisor's
    /// cleanup path, so a status query issued right after cancellation still
    /// observes the cancelled state.
    pub async fn cancel_workflow(&self, workflow_id: &str) -> bool {
        let execution = match self.active.read().await.get(workflow_id).cloned() {
            Some(execution) => execution,
            None => return false,
        };
        execution.cancel().await;
        true
    }

    pub async fn get_engine_stats(&self) -> EngineStats {
        let active = self.active.read().await;
        EngineStats {
            total_workflows: self.counters.total.load(Ordering::Relaxed),
            completed_workflows: self.counters.completed.load(Ordering::Relaxed),
            failed_workflows: self.counters.failed.load(Ordering::Relaxed),
            cancelled_workflows: self.counters.cancelled.load(Ordering::Relaxed),
            active_workflows: active.len(),
            observer_failures: self.observer_failures.load(Ordering::Relaxed),
            registered_templates: self.templates.read().await.keys().cloned().collect(),
            active_workflow_ids: active.keys().cloned().collect(),
        }
    }

    /// Health predicate: active count below the configured maximum
    pub async fn has_capacity(&self) -> bool {
        self.active.read().await.len() < self.config.max_concurrent_workflows
    }

    /// Health predicate polled alongside `has_capacity`. Placeholder until a
    /// real memory probe is wired in.
    pub fn memory_ok(&self) -> bool {
        true
    }

    /// Cancel every active execution; supervisors drain the active set
    pub async fn shutdown(&self) {
        let executions: Vec<_> = self.active.read().await.values().cloned().collect();
        tracing::info!(count = executions.len(), "engine shutting down, cancelling active workflows");
        for execution in executions {
            execution.cancel().await;
        }
    }
}

impl Default for WorkflowEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}
