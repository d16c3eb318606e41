use anyhow::{bail, Context, Result};
use chaincore::{StepSpec, TemplateSpec, Value, WorkflowEvent};
use chainruntime::{EngineConfig, ExecutionState, StepRegistry, WorkflowEngine};
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "chainflow")]
#[command(about = "Chainflow workflow engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a template file to completion
    Run {
        /// Path to template JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Input data as a JSON object
        #[arg(short, long)]
        input: Option<String>,

        /// User id recorded on the execution
        #[arg(short, long, default_value = "cli")]
        user: String,

        /// Show per-step events while running
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a template file against the registered step kinds
    Validate {
        /// Path to template JSON file
        file: PathBuf,
    },

    /// List available step kinds
    Steps,

    /// Write an example template file
    Init {
        /// Output file path
        #[arg(short, long, default_value = "template.json")]
        output: PathBuf,
    },
}

fn standard_registry() -> StepRegistry {
    let mut registry = StepRegistry::new();
    chainsteps::register_all(&mut registry);
    registry
}

fn load_spec(path: &PathBuf) -> Result<TemplateSpec> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid template in {}", path.display()))
}

fn parse_input(input: Option<String>) -> Result<HashMap<String, Value>> {
    let Some(raw) = input else {
        return Ok(HashMap::new());
    };
    let json: serde_json::Value = serde_json::from_str(&raw).context("input is not valid JSON")?;
    match Value::from_json(json) {
        Value::Object(map) => Ok(map),
        _ => bail!("input must be a JSON object"),
    }
}

async fn run_template(
    file: PathBuf,
    input: Option<String>,
    user: String,
    verbose: bool,
) -> Result<()> {
    let spec = load_spec(&file)?;
    let registry = standard_registry();
    let template = registry.build_template(&spec)?;
    let template_name = template.name().to_string();

    let engine = Arc::new(WorkflowEngine::new(EngineConfig::default()));
    engine.register_template(template).await;

    let mut events = engine.subscribe_events();
    let workflow_id = engine
        .start_workflow(&template_name, &user, parse_input(input)?, None)
        .await?;
    println!("started workflow {}", workflow_id);

    loop {
        let event = events.recv().await.context("event stream closed")?;
        if event.workflow_id() != workflow_id {
            continue;
        }
        if verbose {
            if let WorkflowEvent::StepFinished { result, .. } = &event {
                println!(
                    "  step {} -> {:?} ({:.3}s)",
                    result.step_name,
                    result.state,
                    result.duration_secs().unwrap_or(0.0)
                );
            }
        }
        if event.is_terminal() {
            break;
        }
    }

    let status = engine
        .get_workflow_history(&workflow_id)
        .await
        .context("terminal status missing from history")?;
    println!("{}", serde_json::to_string_pretty(&status)?);

    if status.state != ExecutionState::Completed {
        bail!(
            "workflow ended {:?}: {}",
            status.state,
            status.error.unwrap_or_default()
        );
    }
    Ok(())
}

fn validate_template(file: PathBuf) -> Result<()> {
    let spec = load_spec(&file)?;
    standard_registry()
        .build_template(&spec)
        .with_context(|| format!("template '{}' is invalid", spec.name))?;
    println!(
        "template '{}' is valid ({} steps)",
        spec.name,
        spec.steps.len()
    );
    Ok(())
}

fn list_steps() {
    let registry = standard_registry();
    println!("available step kinds:");
    for kind in registry.list_kinds() {
        let description = registry.describe(&kind).unwrap_or_default();
        println!("  {:<16} {}", kind, description);
    }
}

fn write_example(output: PathBuf) -> Result<()> {
    let spec = TemplateSpec::new("example_pipeline")
        .with_description("Seed a payload, pause, then log it")
        .with_timeout_secs(60)
        .with_step(StepSpec::new("seed", "data.emit").with_config("data", {
            let mut data = HashMap::new();
            data.insert("topic".to_string(), Value::from("hello"));
            Value::Object(data)
        }))
        .with_step(
            StepSpec::new("pause", "time.delay")
                .with_config("delay_ms", 500i64)
                .requires("seed")
                .with_timeout_secs(5),
        )
        .with_step(
            StepSpec::new("announce", "debug.log")
                .with_config("message", "pipeline finished")
                .requires("pause"),
        );

    std::fs::write(&output, serde_json::to_string_pretty(&spec)?)
        .with_context(|| format!("failed to write {}", output.display()))?;
    println!("wrote example template to {}", output.display());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Run { verbose: true, .. } => "debug",
        _ => "warn",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .init();

    match cli.command {
        Commands::Run {
            file,
            input,
            user,
            verbose,
        } => run_template(file, input, user, verbose).await,
        Commands::Validate { file } => validate_template(file),
        Commands::Steps => {
            list_steps();
            Ok(())
        }
        Commands::Init { output } => write_example(output),
    }
}
