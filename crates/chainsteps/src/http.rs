use async_trait::async_trait;
use chaincore::{StepData, StepError, StepWork, Value, WorkflowContext};
use chainruntime::StepFactory;
use std::collections::HashMap;
use std::sync::Arc;

/// Plain HTTP call against a configured URL.
///
/// This step carries no service-specific knowledge; concrete API
/// integrations belong in their own `StepWork` implementations.
pub struct HttpRequestStep {
    client: reqwest::Client,
    url: String,
    method: String,
    headers: HashMap<String, String>,
    body: Option<serde_json::Value>,
}

impl HttpRequestStep {
    fn build_request(&self) -> Result<reqwest::RequestBuilder, StepError> {
        let mut request = match self.method.as_str() {
            "GET" => self.client.get(&self.url),
            "POST" => self.client.post(&self.url),
            "PUT" => self.client.put(&self.url),
            "DELETE" => self.client.delete(&self.url),
            other => {
                return Err(StepError::Configuration(format!(
                    "unsupported method: {}",
                    other
                )))
            }
        };
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }
        if let Some(body) = &self.body {
            request = request.json(body);
        }
        Ok(request)
    }
}

#[async_trait]
impl StepWork for HttpRequestStep {
    fn kind(&self) -> &str {
        "http.request"
    }

    async fn run(&self, ctx: &WorkflowContext) -> Result<StepData, StepError> {
        tracing::info!(
            workflow_id = %ctx.workflow_id,
            method = %self.method,
            url = %self.url,
            "sending request"
        );

        let response = self
            .build_request()?
            .send()
            .await
            .map_err(|e| StepError::Failed(format!("request failed: {}", e)))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| StepError::Failed(format!("failed to read response: {}", e)))?;

        tracing::info!(workflow_id = %ctx.workflow_id, status, "response received");

        let mut data = HashMap::new();
        data.insert("status".to_string(), Value::from(status as i64));
        data.insert("ok".to_string(), Value::from(status < 400));
        data.insert("body".to_string(), Value::from(body));
        Ok(data)
    }
}

pub struct HttpRequestStepFactory;

impl StepFactory for HttpRequestStepFactory {
    fn kind(&self) -> &str {
        "http.request"
    }

    fn create(&self, config: &HashMap<String, Value>) -> Result<Arc<dyn StepWork>, StepError> {
        let url = config
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| StepError::Configuration("missing config: url".to_string()))?
            .to_string();

        let method = config
            .get("method")
            .and_then(|v| v.as_str())
            .unwrap_or("GET")
            .to_uppercase();

        let mut headers = HashMap::new();
        if let Some(Value::Object(map)) = config.get("headers") {
            for (key, value) in map {
                if let Some(text) = value.as_str() {
                    headers.insert(key.clone(), text.to_string());
                }
            }
        }

        let body = config.get("body").and_then(|v| v.as_json()).cloned();

        Ok(Arc::new(HttpRequestStep {
            client: reqwest::Client::new(),
            url,
            method,
            headers,
            body,
        }))
    }

    fn description(&self) -> &str {
        "Send an HTTP request to a configured URL"
    }
}
