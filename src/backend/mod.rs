//! Completion backends.
//!
//! Every way of turning a prompt into model text lives behind the
//! [`CompletionBackend`] trait: the remote inference API, the local
//! in-process model, and the scripted doubles the tests drive the invoker
//! with. All calls are synchronous; the invoker decides what to do with a
//! failure based solely on the error's [`ErrorClass`].
//!
//! # Error taxonomy
//!
//! | Kind                | Class     | Meaning                                  |
//! |---------------------|-----------|------------------------------------------|
//! | `RateLimited`       | Transient | Provider throttled the request (429)     |
//! | `Unreachable`       | Transient | Network/transport failure, timeout, 5xx  |
//! | `ResourceExhausted` | Transient | Device cannot satisfy the request        |
//! | `AuthError`         | Fatal     | Credential missing or rejected (401/403) |
//! | `MalformedResponse` | Fatal     | Request rejected or body unusable        |
//! | `ModelUnavailable`  | Fatal     | Weights cannot be located or loaded      |

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod local;
pub mod remote;

pub use local::LocalBackend;
pub use remote::RemoteBackend;

/// Which kind of backend produced (or should produce) a completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendKind {
    /// Hosted inference API reached over HTTP.
    Remote,
    /// Model loaded into this process.
    Local,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Remote => write!(f, "remote"),
            BackendKind::Local => write!(f, "local"),
        }
    }
}

/// Advisory device selection for local inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceHint {
    Cpu,
    Gpu,
}

/// Sampling parameters sent with every completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Upper bound on newly generated tokens.
    pub max_new_tokens: u32,
    /// Sampling temperature. Low by default; topology code wants precision.
    pub temperature: f32,
    /// Nucleus sampling cutoff.
    pub top_p: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_new_tokens: 1024,
            temperature: 0.1,
            top_p: 0.95,
        }
    }
}

/// Connection settings for one backend.
#[derive(Debug, Clone)]
pub enum BackendConfig {
    /// Hosted inference API.
    Remote {
        /// Base URL of the inference service.
        endpoint: String,
        /// Bearer credential. Construction fails without one.
        credential: Option<String>,
    },
    /// In-process model.
    Local {
        /// Path to the model weights.
        model_path: PathBuf,
        /// Preferred execution device.
        device_hint: Option<DeviceHint>,
    },
}

impl BackendConfig {
    /// Remote config against the default public inference endpoint.
    pub fn remote(credential: impl Into<String>) -> Self {
        BackendConfig::Remote {
            endpoint: remote::DEFAULT_ENDPOINT.to_string(),
            credential: Some(credential.into()),
        }
    }

    /// Remote config against a custom endpoint.
    pub fn remote_at(endpoint: impl Into<String>, credential: impl Into<String>) -> Self {
        BackendConfig::Remote {
            endpoint: endpoint.into(),
            credential: Some(credential.into()),
        }
    }

    /// Local config for a model weights path.
    pub fn local(model_path: impl Into<PathBuf>) -> Self {
        BackendConfig::Local {
            model_path: model_path.into(),
            device_hint: None,
        }
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            BackendConfig::Remote { .. } => BackendKind::Remote,
            BackendConfig::Local { .. } => BackendKind::Local,
        }
    }
}

/// A completion that made it back from a backend, with invocation metadata.
#[derive(Debug, Clone)]
pub struct RawCompletion {
    /// Raw model output, before extraction.
    pub text: String,
    /// Backend that answered.
    pub backend_used: BackendKind,
    /// 1-based attempt ordinal on that backend.
    pub attempt_count: u32,
    /// Wall time from first attempt to success.
    pub elapsed: Duration,
}

/// Whether an error is worth retrying on the same backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retry the same backend after a backoff delay.
    Transient,
    /// Retrying cannot help; move to the fallback backend.
    Fatal,
}

/// Failure reported by a single backend invocation.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// Provider throttled the request.
    #[error("rate limited by completion provider")]
    RateLimited {
        /// Seconds the provider asked us to wait, if it said.
        retry_after_secs: Option<u64>,
    },

    /// Transport failure, timeout, or server-side error.
    #[error("backend unreachable: {message}")]
    Unreachable { message: String },

    /// The device cannot satisfy the request right now.
    #[error("resource exhausted: {message}")]
    ResourceExhausted { message: String },

    /// Credential missing or rejected.
    #[error("authentication rejected: {message}")]
    AuthError { message: String },

    /// The request was rejected or the response body is unusable.
    #[error("malformed response: {message}")]
    MalformedResponse { message: String },

    /// Model weights cannot be located or loaded.
    #[error("model unavailable: {message}")]
    ModelUnavailable { message: String },
}

impl BackendError {
    /// Fixed transient/fatal classification. This is the only signal the
    /// invoker uses to choose between retrying and falling back.
    pub fn classification(&self) -> ErrorClass {
        match self {
            BackendError::RateLimited { .. }
            | BackendError::Unreachable { .. }
            | BackendError::ResourceExhausted { .. } => ErrorClass::Transient,
            BackendError::AuthError { .. }
            | BackendError::MalformedResponse { .. }
            | BackendError::ModelUnavailable { .. } => ErrorClass::Fatal,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.classification() == ErrorClass::Transient
    }
}

/// A synchronous completion provider.
///
/// Implementations must be shareable across threads; the local backend
/// serializes inference internally, the remote backend is stateless.
pub trait CompletionBackend: Send + Sync {
    /// Which kind of backend this is.
    fn kind(&self) -> BackendKind;

    /// Run one completion. Blocks the calling thread until the backend
    /// answers, fails, or `timeout` elapses.
    fn complete(
        &self,
        prompt: &str,
        params: &GenerationParams,
        timeout: Duration,
    ) -> Result<String, BackendError>;
}

/// Build a backend from its config.
pub fn from_config(config: &BackendConfig) -> Result<Box<dyn CompletionBackend>, BackendError> {
    match config {
        BackendConfig::Remote {
            endpoint,
            credential,
        } => {
            let credential = credential.clone().unwrap_or_default();
            let backend = RemoteBackend::new(credential)?.with_endpoint(endpoint.clone());
            Ok(Box::new(backend))
        }
        BackendConfig::Local {
            model_path,
            device_hint,
        } => {
            let mut backend = LocalBackend::new(model_path.clone());
            if let Some(hint) = device_hint {
                backend = backend.with_device(*hint);
            }
            Ok(Box::new(backend))
        }
    }
}
