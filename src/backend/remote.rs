//! Remote completion backend over the Hugging Face Inference API.
//!
//! Blocking HTTP via `ureq`. One agent is built per call so the caller's
//! timeout applies to the whole request, connect included. HTTP status
//! classes map onto the fixed error taxonomy in [`super`]; the invoker never
//! inspects status codes itself.

use std::time::Duration;

use tracing::debug;

use super::{BackendError, BackendKind, CompletionBackend, GenerationParams};

/// Public inference endpoint used when no override is configured.
pub const DEFAULT_ENDPOINT: &str = "https://api-inference.huggingface.co";

/// Default model when the caller does not pick one.
pub const DEFAULT_MODEL: &str = "deepseek-ai/DeepSeek-R1-0528";

/// Hosted text-generation API client.
#[derive(Clone)]
pub struct RemoteBackend {
    endpoint: String,
    model: String,
    credential: String,
}

impl RemoteBackend {
    /// Create a client for the default endpoint and model.
    ///
    /// Fails with `AuthError` when the credential is empty; the API rejects
    /// anonymous generation calls, better to find out before the first
    /// attempt burns a retry budget.
    pub fn new(credential: impl Into<String>) -> Result<Self, BackendError> {
        let credential = credential.into();
        if credential.trim().is_empty() {
            return Err(BackendError::AuthError {
                message: "API credential is empty; pass a token or set HF_TOKEN".to_string(),
            });
        }
        Ok(Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            credential,
        })
    }

    /// Override the endpoint base URL.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Override the model identifier.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Model identifier this client generates with.
    pub fn model(&self) -> &str {
        &self.model
    }

    fn request_url(&self) -> String {
        format!(
            "{}/models/{}",
            self.endpoint.trim_end_matches('/'),
            self.model
        )
    }

    /// Pull `generated_text` out of the API response body.
    ///
    /// The API answers with either a one-element array of generations or a
    /// bare object; both carry `generated_text`. Anything else is a
    /// malformed response.
    fn parse_completion(body: serde_json::Value) -> Result<String, BackendError> {
        if let Some(err) = body.get("error").and_then(|v| v.as_str()) {
            return Err(BackendError::MalformedResponse {
                message: format!("provider error: {err}"),
            });
        }
        let text = match &body {
            serde_json::Value::Array(items) => items
                .first()
                .and_then(|item| item.get("generated_text"))
                .and_then(|v| v.as_str()),
            other => other.get("generated_text").and_then(|v| v.as_str()),
        };
        match text {
            Some(text) => Ok(text.to_string()),
            None => Err(BackendError::MalformedResponse {
                message: "response body carries no generated_text".to_string(),
            }),
        }
    }
}

impl CompletionBackend for RemoteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    fn complete(
        &self,
        prompt: &str,
        params: &GenerationParams,
        timeout: Duration,
    ) -> Result<String, BackendError> {
        let url = self.request_url();
        debug!(model = %self.model, timeout_secs = timeout.as_secs(), "remote completion request");

        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        let response = agent
            .post(&url)
            .set("Authorization", &format!("Bearer {}", self.credential))
            .set("Content-Type", "application/json")
            .send_json(ureq::json!({
                "inputs": prompt,
                "parameters": {
                    "max_new_tokens": params.max_new_tokens,
                    "temperature": params.temperature,
                    "top_p": params.top_p,
                    "do_sample": true,
                    "return_full_text": false,
                }
            }));

        match response {
            Ok(resp) => {
                let body: serde_json::Value =
                    resp.into_json().map_err(|e| BackendError::MalformedResponse {
                        message: format!("response body is not JSON: {e}"),
                    })?;
                Self::parse_completion(body)
            }
            Err(ureq::Error::Status(401, _)) | Err(ureq::Error::Status(403, _)) => {
                Err(BackendError::AuthError {
                    message: format!("API rejected credential for model {}", self.model),
                })
            }
            Err(ureq::Error::Status(429, resp)) => {
                let retry_after_secs = resp
                    .header("retry-after")
                    .and_then(|v| v.parse::<u64>().ok());
                Err(BackendError::RateLimited { retry_after_secs })
            }
            Err(ureq::Error::Status(status, resp)) if status >= 500 => {
                let body = resp.into_string().unwrap_or_default();
                Err(BackendError::Unreachable {
                    message: format!("server error {status}: {}", truncate(&body, 200)),
                })
            }
            Err(ureq::Error::Status(status, resp)) => {
                let body = resp.into_string().unwrap_or_default();
                Err(BackendError::MalformedResponse {
                    message: format!("request rejected with status {status}: {}", truncate(&body, 200)),
                })
            }
            Err(e) => Err(BackendError::Unreachable {
                message: e.to_string(),
            }),
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
