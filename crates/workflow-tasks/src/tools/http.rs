//! HTTP request executor.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::TaskError;
use crate::model::{HttpTask, Task, TaskPayload, TaskType};
use crate::registry::TaskExecutor;
use crate::result::{HttpRequestRecord, HttpResponseRecord, TaskResult};
use crate::template::Expander;

/// Request body after expansion.
#[derive(Debug, Clone, PartialEq)]
enum Body {
    Json(serde_json::Value),
    Form(HashMap<String, String>),
    Raw(String),
}

impl Body {
    fn payload(&self) -> Option<String> {
        match self {
            Body::Json(value) => Some(value.to_string()),
            Body::Form(form) => Some(
                url::form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(form.iter())
                    .finish(),
            ),
            Body::Raw(raw) => Some(raw.clone()),
        }
    }
}

/// Executes `http` tasks.
pub struct HttpExecutor {
    client: reqwest::Client,
}

impl HttpExecutor {
    pub fn new() -> Self {
        let client = reqwest::Client::builder().build().unwrap_or_default();
        Self { client }
    }

    fn render_body(http: &HttpTask, expander: &Expander<'_>) -> Option<Body> {
        if let Some(json) = &http.json {
            Some(Body::Json(expander.expand_value(json)))
        } else if !http.form_data.is_empty() {
            Some(Body::Form(
                http.form_data
                    .iter()
                    .map(|(k, v)| (k.clone(), expander.expand(v)))
                    .collect(),
            ))
        } else {
            http.body.as_ref().map(|b| Body::Raw(expander.expand(b)))
        }
    }

    /// Status acceptance: the explicit list if given, otherwise any 2xx.
    fn accepts(http: &HttpTask, status: u16) -> bool {
        if http.status_codes.is_empty() {
            (200..300).contains(&status)
        } else {
            http.status_codes.contains(&status)
        }
    }

    async fn request(
        &self,
        task: &Task,
        http: &HttpTask,
        expander: &Expander<'_>,
    ) -> Result<TaskResult, TaskError> {
        let method = Method::from_bytes(http.method.to_uppercase().as_bytes()).map_err(|_| {
            TaskError::Configuration(format!("invalid HTTP method: {}", http.method))
        })?;
        let uri = expander.expand(&http.uri);
        let body = Self::render_body(http, expander);

        let record = HttpRequestRecord {
            uri: uri.clone(),
            method: method.to_string(),
            payload: body.as_ref().and_then(Body::payload),
        };

        let mut request = self.client.request(method, &uri);

        for (key, value) in &http.headers {
            request = request.header(key.as_str(), expander.expand(value));
        }

        request = match body {
            Some(Body::Json(value)) => request.json(&value),
            Some(Body::Form(form)) => request.form(&form),
            Some(Body::Raw(raw)) => request.body(raw),
            None => request,
        };

        if let Some(content_type) = &http.content_type {
            request = request.header(CONTENT_TYPE, content_type.as_str());
        }

        let timeout_ms = http.connection_timeout + http.read_timeout;
        if timeout_ms > 0 {
            request = request.timeout(Duration::from_millis(timeout_ms));
        }

        tracing::debug!(
            task = %task.name,
            method = %record.method,
            uri = %record.uri,
            "Sending HTTP request"
        );

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(task = %task.name, uri = %record.uri, error = %e, "HTTP request failed");
                let response = HttpResponseRecord {
                    status_code: 0,
                    body: String::new(),
                    error: Some(e.to_string()),
                };
                return Ok(TaskResult::from_http(task, false, record, response));
            }
        };

        let status_code = response.status().as_u16();
        let (body, error) = match response.text().await {
            Ok(text) => (text, None),
            Err(e) => (String::new(), Some(e.to_string())),
        };
        let success = error.is_none() && Self::accepts(http, status_code);

        tracing::debug!(task = %task.name, status_code, success, "HTTP response received");

        Ok(TaskResult::from_http(
            task,
            success,
            record,
            HttpResponseRecord {
                status_code,
                body,
                error,
            },
        ))
    }
}

impl Default for HttpExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskExecutor for HttpExecutor {
    fn task_type(&self) -> TaskType {
        TaskType::Http
    }

    async fn execute(
        &self,
        task: &Task,
        expander: &Expander<'_>,
    ) -> Result<TaskResult, TaskError> {
        match task.payload()? {
            TaskPayload::Http(http) => self.request(task, http, expander).await,
            _ => Err(TaskError::Definition(task.task_type)),
        }
    }
}
