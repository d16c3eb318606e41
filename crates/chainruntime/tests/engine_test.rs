use async_trait::async_trait;
use chaincore::{
    EngineError, StepData, StepError, StepWork, Value, WorkflowContext, WorkflowEvent,
};
use chainruntime::{
    EngineConfig, ExecutionState, StepRegistry, WorkflowEngine, WorkflowStep, WorkflowTemplate,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast::Receiver;
use tokio::time::Duration;

/// Emits {"x": 1}
struct SeedWork;

#[async_trait]
impl StepWork for SeedWork {
    fn kind(&self) -> &str {
        "test.seed"
    }

    async fn run(&self, _ctx: &WorkflowContext) -> Result<StepData, StepError> {
        let mut data = HashMap::new();
        data.insert("x".to_string(), Value::from(1i64));
        Ok(data)
    }
}

/// Emits {"y": stepA.x + 1}
struct AddOneWork;

#[async_trait]
impl StepWork for AddOneWork {
    fn kind(&self) -> &str {
        "test.add_one"
    }

    async fn run(&self, ctx: &WorkflowContext) -> Result<StepData, StepError> {
        let upstream = ctx
            .step_data("stepA")
            .await
            .ok_or_else(|| StepError::MissingInput("stepA".to_string()))?;
        let x = upstream
            .get("x")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| StepError::MissingInput("x".to_string()))?;
        let mut data = HashMap::new();
        data.insert("y".to_string(), Value::from(x + 1));
        Ok(data)
    }
}

/// Sleeps briefly, for pacing multi-step runs
struct PacedWork {
    millis: u64,
}

#[async_trait]
impl StepWork for PacedWork {
    fn kind(&self) -> &str {
        "test.paced"
    }

    async fn run(&self, _ctx: &WorkflowContext) -> Result<StepData, StepError> {
        tokio::time::sleep(Duration::from_millis(self.millis)).await;
        Ok(HashMap::new())
    }
}

/// Sleeps for the configured number of seconds
struct SleepWork {
    secs: u64,
}

#[async_trait]
impl StepWork for SleepWork {
    fn kind(&self) -> &str {
        "test.sleep"
    }

    async fn run(&self, _ctx: &WorkflowContext) -> Result<StepData, StepError> {
        tokio::time::sleep(Duration::from_secs(self.secs)).await;
        Ok(HashMap::new())
    }
}

fn engine(max_concurrent: usize) -> Arc<WorkflowEngine> {
    Arc::new(WorkflowEngine::new(EngineConfig {
        max_concurrent_workflows: max_concurrent,
        ..EngineConfig::default()
    }))
}

async fn wait_terminal(rx: &mut Receiver<WorkflowEvent>, workflow_id: &str) -> WorkflowEvent {
    loop {
        let event = rx.recv().await.expect("event stream closed");
        if event.is_terminal() && event.workflow_id() == workflow_id {
            return event;
        }
    }
}

#[tokio::test]
async fn two_step_chain_passes_data_forward() {
    let engine = engine(10);
    engine
        .register_template(
            WorkflowTemplate::new("add_pipeline")
                .with_step(WorkflowStep::new("stepA", Arc::new(SeedWork)))
                .with_step(WorkflowStep::new("stepB", Arc::new(AddOneWork)).requires("stepA")),
        )
        .await;

    let mut events = engine.subscribe_events();
    let id = engine
        .start_workflow("add_pipeline", "user-1", HashMap::new(), None)
        .await
        .unwrap();

    let event = wait_terminal(&mut events, &id).await;
    assert_eq!(event.name(), "workflows_completed");

    let status = engine.get_workflow_history(&id).await.unwrap();
    assert_eq!(status.state, ExecutionState::Completed);
    assert_eq!(
        status.step_results["stepB"].data["y"].as_i64(),
        Some(2)
    );
    assert_eq!(status.progress.completed_steps, 2);

    // terminal executions leave the active query
    assert!(engine.get_workflow_status(&id).await.is_none());
}

#[tokio::test]
async fn unknown_template_fails_synchronously() {
    let engine = engine(10);
    let err = engine
        .start_workflow("nope", "user-1", HashMap::new(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::TemplateNotFound(name) if name == "nope"));
}

#[tokio::test]
async fn capacity_gate_rejects_exactly_the_overflow() {
    let engine = engine(2);
    engine
        .register_template(
            WorkflowTemplate::new("slow").with_step(WorkflowStep::new(
                "nap",
                Arc::new(SleepWork { secs: 60 }),
            )),
        )
        .await;

    let mut rejections = 0;
    for _ in 0..3 {
        match engine
            .start_workflow("slow", "user-1", HashMap::new(), None)
            .await
        {
            Ok(_) => {}
            Err(EngineError::CapacityExceeded { active, max }) => {
                assert_eq!(active, 2);
                assert_eq!(max, 2);
                rejections += 1;
            }
            Err(other) => panic!("unexpected admission error: {}", other),
        }
    }
    assert_eq!(rejections, 1);
    assert!(!engine.has_capacity().await);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn step_timeout_marks_the_workflow_failed() {
    let engine = engine(10);
    engine
        .register_template(
            WorkflowTemplate::new("too_slow").with_step(
                WorkflowStep::new("overdue", Arc::new(SleepWork { secs: 30 }))
                    .with_timeout(Duration::from_secs(1)),
            ),
        )
        .await;

    let mut events = engine.subscribe_events();
    let id = engine
        .start_workflow("too_slow", "user-1", HashMap::new(), None)
        .await
        .unwrap();

    let event = wait_terminal(&mut events, &id).await;
    assert_eq!(event.name(), "workflows_failed");

    let status = engine.get_workflow_history(&id).await.unwrap();
    assert_eq!(status.state, ExecutionState::Failed);
    let step = &status.step_results["overdue"];
    assert!(step.error.as_deref().unwrap().contains("1"));
    assert_eq!(step.metrics.get("timeout"), Some(&1.0));
    assert_eq!(step.metrics.get("success"), Some(&0.0));
}

#[tokio::test]
async fn cancelled_workflow_is_observable_before_cleanup() {
    let engine = engine(10);
    engine
        .register_template(
            WorkflowTemplate::new("long").with_step(WorkflowStep::new(
                "nap",
                Arc::new(SleepWork { secs: 60 }),
            )),
        )
        .await;

    let mut events = engine.subscribe_events();
    let id = engine
        .start_workflow("long", "user-1", HashMap::new(), None)
        .await
        .unwrap();

    // let the step actually start
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(engine.cancel_workflow(&id).await);

    // the execution is marked cancelled before the supervisor's cleanup
    // removes it from the active set
    if let Some(status) = engine.get_workflow_status(&id).await {
        assert_eq!(status.state, ExecutionState::Cancelled);
        assert!(status.finished_at.is_some());
    }

    let event = wait_terminal(&mut events, &id).await;
    assert_eq!(event.name(), "workflows_cancelled");

    let archived = engine.get_workflow_history(&id).await.unwrap();
    assert_eq!(archived.state, ExecutionState::Cancelled);
    assert!(archived.finished_at.is_some());

    // cancelling an unknown id reports false
    assert!(!engine.cancel_workflow("missing").await);
}

#[tokio::test]
async fn stats_track_terminal_outcomes() {
    let engine = engine(10);
    engine
        .register_template(
            WorkflowTemplate::new("quick")
                .with_step(WorkflowStep::new("stepA", Arc::new(SeedWork))),
        )
        .await;

    let mut events = engine.subscribe_events();
    let id = engine
        .start_workflow("quick", "user-2", HashMap::new(), None)
        .await
        .unwrap();
    wait_terminal(&mut events, &id).await;

    let stats = engine.get_engine_stats().await;
    assert_eq!(stats.total_workflows, 1);
    assert_eq!(stats.completed_workflows, 1);
    assert_eq!(stats.failed_workflows, 0);
    assert_eq!(stats.active_workflows, 0);
    assert!(stats
        .registered_templates
        .contains(&"quick".to_string()));
    assert!(stats.active_workflow_ids.is_empty());
}

#[tokio::test]
async fn caller_supplied_ids_must_be_unique_while_active() {
    let engine = engine(10);
    engine
        .register_template(
            WorkflowTemplate::new("long").with_step(WorkflowStep::new(
                "nap",
                Arc::new(SleepWork { secs: 60 }),
            )),
        )
        .await;

    let id = engine
        .start_workflow("long", "user-1", HashMap::new(), Some("wf-fixed".to_string()))
        .await
        .unwrap();
    assert_eq!(id, "wf-fixed");

    let err = engine
        .start_workflow("long", "user-1", HashMap::new(), Some("wf-fixed".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::DuplicateWorkflow(dup) if dup == "wf-fixed"));

    engine.shutdown().await;
}

#[tokio::test]
async fn registry_built_template_runs_through_the_engine() {
    struct SeedFactory;

    impl chainruntime::StepFactory for SeedFactory {
        fn kind(&self) -> &str {
            "test.seed"
        }

        fn create(
            &self,
            _config: &HashMap<String, Value>,
        ) -> Result<Arc<dyn StepWork>, StepError> {
            Ok(Arc::new(SeedWork))
        }
    }

    let mut registry = StepRegistry::new();
    registry.register(Arc::new(SeedFactory));

    let spec = chaincore::TemplateSpec::new("from_spec")
        .with_step(chaincore::StepSpec::new("stepA", "test.seed"));
    let template = registry.build_template(&spec).unwrap();

    let engine = engine(10);
    engine.register_template(template).await;

    let mut events = engine.subscribe_events();
    let id = engine
        .start_workflow("from_spec", "user-3", HashMap::new(), None)
        .await
        .unwrap();
    let event = wait_terminal(&mut events, &id).await;
    assert_eq!(event.name(), "workflows_completed");
}

#[tokio::test]
async fn progress_is_monotonic_and_never_exceeds_total() {
    let engine = engine(10);
    engine
        .register_template(
            WorkflowTemplate::new("paced_pipeline")
                .with_step(WorkflowStep::new("stepA", Arc::new(PacedWork { millis: 25 })))
                .with_step(WorkflowStep::new("stepB", Arc::new(PacedWork { millis: 25 }))),
        )
        .await;

    let id = engine
        .start_workflow("paced_pipeline", "user-4", HashMap::new(), None)
        .await
        .unwrap();

    let mut last = 0;
    while let Some(status) = engine.get_workflow_status(&id).await {
        let completed = status.progress.completed_steps;
        assert!(completed >= last, "progress went backwards: {completed} < {last}");
        assert!(completed <= status.progress.total_steps);
        last = completed;
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let archived = engine.get_workflow_history(&id).await.unwrap();
    assert_eq!(archived.state, ExecutionState::Completed);
    assert_eq!(archived.progress.completed_steps, 2);
    assert_eq!(archived.progress.total_steps, 2);
}
