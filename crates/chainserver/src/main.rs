use actix_cors::Cors;
use actix_web::{
    get, post, web, App, HttpResponse, HttpServer, Responder, Result as ActixResult,
};
use actix_ws::Message;
use chaincore::{EngineError, TemplateSpec, Value};
use chainruntime::{EngineConfig, StepRegistry, WorkflowEngine};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info};

/// Application state shared across handlers
struct AppState {
    engine: Arc<WorkflowEngine>,
    registry: Arc<StepRegistry>,
}

/// Request body for starting a workflow
#[derive(Debug, Deserialize)]
struct StartRequest {
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    input: HashMap<String, serde_json::Value>,
    #[serde(default)]
    workflow_id: Option<String>,
}

/// Response for a started workflow
#[derive(Debug, Serialize)]
struct StartResponse {
    workflow_id: String,
}

/// Error response with a machine-readable admission code where one exists
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
}

fn admission_error(err: EngineError) -> HttpResponse {
    match &err {
        EngineError::TemplateNotFound(_) => HttpResponse::NotFound().json(ErrorResponse {
            error: err.to_string(),
            code: Some("TEMPLATE_NOT_FOUND"),
        }),
        EngineError::CapacityExceeded { .. } => {
            HttpResponse::TooManyRequests().json(ErrorResponse {
                error: err.to_string(),
                code: Some("CAPACITY_EXCEEDED"),
            })
        }
        EngineError::DuplicateWorkflow(_) => HttpResponse::Conflict().json(ErrorResponse {
            error: err.to_string(),
            code: Some("DUPLICATE_WORKFLOW"),
        }),
        _ => HttpResponse::InternalServerError().json(ErrorResponse {
            error: err.to_string(),
            code: None,
        }),
    }
}

/// Health check: engine capacity plus the memory predicate
#[get("/health")]
async fn health_check(data: web::Data<AppState>) -> impl Responder {
    let capacity_ok = data.engine.has_capacity().await;
    let memory_ok = data.engine.memory_ok();
    let healthy = capacity_ok && memory_ok;

    let body = serde_json::json!({
        "status": if healthy { "healthy" } else { "degraded" },
        "workflow_capacity": capacity_ok,
        "memory_usage": memory_ok,
        "version": env!("CARGO_PKG_VERSION"),
        "service": "chainserver",
    });
    if healthy {
        HttpResponse::Ok().json(body)
    } else {
        HttpResponse::ServiceUnavailable().json(body)
    }
}

/// Register (or replace) a template from its serialized spec
#[post("/api/templates")]
async fn create_template(
    data: web::Data<AppState>,
    spec: web::Json<TemplateSpec>,
) -> ActixResult<impl Responder> {
    let spec = spec.into_inner();
    info!("registering template: {}", spec.name);

    match data.registry.build_template(&spec) {
        Ok(template) => {
            let name = template.name().to_string();
            data.engine.register_template(template).await;
            Ok(HttpResponse::Created().json(serde_json::json!({
                "name": name,
                "message": "Template registered",
            })))
        }
        Err(err) => {
            error!("invalid template {}: {}", spec.name, err);
            Ok(HttpResponse::BadRequest().json(ErrorResponse {
                error: err.to_string(),
                code: None,
            }))
        }
    }
}

/// List registered template names
#[get("/api/templates")]
async fn list_templates(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    let mut names = data.engine.template_names().await;
    names.sort();
    Ok(HttpResponse::Ok().json(names))
}

/// Start one execution of a registered template
#[post("/api/workflows/{template}/start")]
async fn start_workflow(
    data: web::Data<AppState>,
    path: web::Path<String>,
    req: web::Json<StartRequest>,
) -> ActixResult<impl Responder> {
    let template = path.into_inner();
    let req = req.into_inner();
    let user_id = req.user_id.unwrap_or_else(|| "anonymous".to_string());

    let input: HashMap<String, Value> = req
        .input
        .into_iter()
        .map(|(k, v)| (k, Value::from_json(v)))
        .collect();

    match data
        .engine
        .start_workflow(&template, &user_id, input, req.workflow_id)
        .await
    {
        Ok(workflow_id) => {
            info!("workflow {} started from template {}", workflow_id, template);
            Ok(HttpResponse::Accepted().json(StartResponse { workflow_id }))
        }
        Err(err) => {
            error!("admission failed for template {}: {}", template, err);
            Ok(admission_error(err))
        }
    }
}

/// Status of an execution: the active set first, then the terminal archive
#[get("/api/workflows/{id}")]
async fn get_workflow(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ActixResult<impl Responder> {
    let workflow_id = path.into_inner();

    if let Some(status) = data.engine.get_workflow_status(&workflow_id).await {
        return Ok(HttpResponse::Ok().json(status));
    }
    if let Some(status) = data.engine.get_workflow_history(&workflow_id).await {
        return Ok(HttpResponse::Ok().json(status));
    }
    Ok(HttpResponse::NotFound().json(ErrorResponse {
        error: format!("workflow {} not found", workflow_id),
        code: None,
    }))
}

/// Cooperatively cancel an active execution
#[post("/api/workflows/{id}/cancel")]
async fn cancel_workflow(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ActixResult<impl Responder> {
    let workflow_id = path.into_inner();

    if data.engine.cancel_workflow(&workflow_id).await {
        info!("workflow {} cancelled", workflow_id);
        Ok(HttpResponse::Ok().json(serde_json::json!({ "cancelled": true })))
    } else {
        Ok(HttpResponse::NotFound().json(ErrorResponse {
            error: format!("workflow {} is not active", workflow_id),
            code: None,
        }))
    }
}

/// Aggregate engine statistics
#[get("/api/stats")]
async fn get_stats(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    Ok(HttpResponse::Ok().json(data.engine.get_engine_stats().await))
}

/// List available step kinds
#[get("/api/steps")]
async fn list_steps(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    let steps: Vec<_> = data
        .registry
        .list_kinds()
        .into_iter()
        .map(|kind| {
            let description = data.registry.describe(&kind).unwrap_or_default().to_string();
            serde_json::json!({ "kind": kind, "description": description })
        })
        .collect();
    Ok(HttpResponse::Ok().json(steps))
}

/// WebSocket stream of workflow lifecycle events
#[get("/api/events")]
async fn websocket_events(
    req: actix_web::HttpRequest,
    stream: web::Payload,
    data: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let (res, mut session, mut msg_stream) = actix_ws::handle(&req, stream)?;

    info!("event stream client connected");
    let mut events = data.engine.subscribe_events();

    actix_web::rt::spawn(async move {
        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Ok(event) => {
                            if let Ok(json) = serde_json::to_string(&event) {
                                if session.text(json).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Err(_) => break,
                    }
                }

                Some(Ok(msg)) = msg_stream.recv() => {
                    match msg {
                        Message::Ping(bytes) => {
                            if session.pong(&bytes).await.is_err() {
                                break;
                            }
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }

                else => break,
            }
        }

        info!("event stream client disconnected");
        let _ = session.close(None).await;
    });

    Ok(res)
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    info!("starting chainflow server");

    let mut registry = StepRegistry::new();
    chainsteps::register_all(&mut registry);

    let engine = Arc::new(WorkflowEngine::new(EngineConfig::default()));
    info!("engine initialized with standard step kinds");

    let app_state = web::Data::new(AppState {
        engine: engine.clone(),
        registry: Arc::new(registry),
    });

    let bind_address =
        std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    info!("server listening on http://{}", bind_address);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(app_state.clone())
            .wrap(cors)
            .wrap(actix_web::middleware::Logger::default())
            .service(health_check)
            .service(create_template)
            .service(list_templates)
            .service(start_workflow)
            .service(get_workflow)
            .service(cancel_workflow)
            .service(get_stats)
            .service(list_steps)
            .service(websocket_events)
    })
    .bind(&bind_address)?
    .run()
    .await?;

    engine.shutdown().await;
    Ok(())
}
