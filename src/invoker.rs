//! Generation invoker.
//!
//! Drives the configured backends through a retry/fallback state machine:
//!
//! ```text
//! SelectingBackend -> Attempting -> Succeeded
//!                                 | Retrying     transient error, attempts left
//!                                 | FallingBack  fatal error or attempts spent,
//!                                 |              another backend remains
//!                                 | Exhausted    nothing left to try
//! ```
//!
//! Transitions are chosen from the error's [`ErrorClass`] plus what remains
//! of the attempt and backend budgets; nothing else about a failure is
//! consulted. Retries wait out an exponential backoff that doubles from a
//! base delay and never exceeds its ceiling.

use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

use crate::backend::{
    remote, BackendError, BackendKind, CompletionBackend, ErrorClass, GenerationParams,
    RawCompletion,
};

/// Which backends to try, and in what order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendPreference {
    /// Remote API only.
    Remote,
    /// Local model only.
    Local,
    /// Remote first, local as fallback.
    #[default]
    AutoFallback,
}

impl BackendPreference {
    /// Backend kinds in attempt order.
    pub fn order(self) -> &'static [BackendKind] {
        match self {
            BackendPreference::Remote => &[BackendKind::Remote],
            BackendPreference::Local => &[BackendKind::Local],
            BackendPreference::AutoFallback => &[BackendKind::Remote, BackendKind::Local],
        }
    }
}

/// One generation request.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Natural-language topology description.
    pub description: String,
    /// Which backends to try.
    pub backend_preference: BackendPreference,
    /// Model to generate with (remote backends).
    pub model_identifier: String,
    /// Invocation budget per backend. Values below 1 behave as 1.
    pub max_attempts: u32,
    /// Per-invocation timeout.
    pub timeout: Duration,
    /// Sampling parameters.
    pub params: GenerationParams,
}

impl GenerationRequest {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            backend_preference: BackendPreference::default(),
            model_identifier: remote::DEFAULT_MODEL.to_string(),
            max_attempts: 3,
            timeout: Duration::from_secs(60),
            params: GenerationParams::default(),
        }
    }

    pub fn with_preference(mut self, preference: BackendPreference) -> Self {
        self.backend_preference = preference;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model_identifier = model.into();
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }
}

/// Exponential backoff: `initial * 2^(attempt-1)`, never above `ceiling`.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub ceiling: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            ceiling: Duration::from_secs(8),
        }
    }
}

impl BackoffPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let doublings = attempt.saturating_sub(1).min(16);
        let delay = self.initial.saturating_mul(2u32.saturating_pow(doublings));
        delay.min(self.ceiling)
    }
}

/// What the state machine does after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    Retry,
    FallBack,
    GiveUp,
}

fn transition_for(class: ErrorClass, attempts_left: bool, backends_left: bool) -> Transition {
    match (class, attempts_left, backends_left) {
        (ErrorClass::Transient, true, _) => Transition::Retry,
        (_, _, true) => Transition::FallBack,
        (_, _, false) => Transition::GiveUp,
    }
}

/// How one backend ended up failing.
#[derive(Debug, Clone)]
pub struct BackendFailure {
    pub backend: BackendKind,
    /// Invocations spent on this backend.
    pub attempts: u32,
    /// The error observed on the final invocation.
    pub last_error: BackendError,
}

/// Every backend in the plan failed.
#[derive(Debug, Clone, Error)]
#[error("{}", summarize(.failures))]
pub struct GenerationError {
    /// One entry per backend tried, in attempt order.
    pub failures: Vec<BackendFailure>,
}

fn summarize(failures: &[BackendFailure]) -> String {
    if failures.is_empty() {
        return "no completion backends were available".to_string();
    }
    let parts: Vec<String> = failures
        .iter()
        .map(|f| {
            format!(
                "{} failed after {} attempt{} ({})",
                f.backend,
                f.attempts,
                if f.attempts == 1 { "" } else { "s" },
                f.last_error
            )
        })
        .collect();
    format!("all backends exhausted: {}", parts.join("; "))
}

/// Runs completion requests against an ordered backend plan.
#[derive(Debug, Clone, Default)]
pub struct Invoker {
    backoff: BackoffPolicy,
}

impl Invoker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Delay before the next retry. A provider's retry-after hint can raise
    /// the delay, but never past the ceiling.
    fn retry_delay(&self, attempt: u32, error: &BackendError) -> Duration {
        let mut delay = self.backoff.delay_for(attempt);
        if let BackendError::RateLimited {
            retry_after_secs: Some(secs),
        } = error
        {
            delay = delay.max(Duration::from_secs(*secs));
        }
        delay.min(self.backoff.ceiling)
    }

    /// Run `prompt` through the backends in order until one answers.
    ///
    /// Per backend: up to `request.max_attempts` invocations, retrying
    /// transient failures and abandoning the backend on a fatal one. At most
    /// one completion is ever returned.
    pub fn run(
        &self,
        backends: &[&dyn CompletionBackend],
        prompt: &str,
        request: &GenerationRequest,
    ) -> Result<RawCompletion, GenerationError> {
        let max_attempts = request.max_attempts.max(1);
        let mut failures: Vec<BackendFailure> = Vec::new();

        for (backend_idx, backend) in backends.iter().enumerate() {
            let backends_left = backend_idx + 1 < backends.len();
            let started = Instant::now();
            let mut attempt = 1u32;

            loop {
                debug!(
                    backend = %backend.kind(),
                    attempt,
                    max_attempts,
                    "attempting completion"
                );
                match backend.complete(prompt, &request.params, request.timeout) {
                    Ok(text) => {
                        debug!(
                            backend = %backend.kind(),
                            attempt,
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "completion succeeded"
                        );
                        return Ok(RawCompletion {
                            text,
                            backend_used: backend.kind(),
                            attempt_count: attempt,
                            elapsed: started.elapsed(),
                        });
                    }
                    Err(error) => {
                        let attempts_left = attempt < max_attempts;
                        match transition_for(error.classification(), attempts_left, backends_left)
                        {
                            Transition::Retry => {
                                let delay = self.retry_delay(attempt, &error);
                                warn!(
                                    backend = %backend.kind(),
                                    attempt,
                                    delay_ms = delay.as_millis() as u64,
                                    %error,
                                    "transient failure, retrying"
                                );
                                thread::sleep(delay);
                                attempt += 1;
                            }
                            Transition::FallBack => {
                                warn!(
                                    backend = %backend.kind(),
                                    attempt,
                                    %error,
                                    "abandoning backend, falling back"
                                );
                                failures.push(BackendFailure {
                                    backend: backend.kind(),
                                    attempts: attempt,
                                    last_error: error,
                                });
                                break;
                            }
                            Transition::GiveUp => {
                                failures.push(BackendFailure {
                                    backend: backend.kind(),
                                    attempts: attempt,
                                    last_error: error,
                                });
                                return Err(GenerationError { failures });
                            }
                        }
                    }
                }
            }
        }

        Err(GenerationError { failures })
    }
}
