//! Complete description → validated topology code pipeline.
//!
//! # Architecture
//!
//! ```text
//! "two hosts connected by a switch"
//!       │
//!       ▼
//! ┌─────────────────────────────────┐
//! │     PromptBuilder               │  grammar notes + exemplars
//! └─────────────┬───────────────────┘
//!               │ chat-markup prompt
//!               ▼
//! ┌─────────────────────────────────┐
//! │     Invoker                     │  retry / fallback state machine
//! │     remote ⇢ local              │
//! └─────────────┬───────────────────┘
//!               │ raw model text
//!               ▼
//! ┌─────────────────────────────────┐
//! │     extract                     │  fenced block → slice → raw
//! └─────────────┬───────────────────┘
//!               │ candidate code
//!               ▼
//! ┌─────────────────────────────────┐
//! │     Validator                   │  structural rules, never fails
//! └─────────────┬───────────────────┘
//!               │
//!               ▼
//!     (CandidateCode, ValidationReport)
//! ```
//!
//! The generator owns its backends. Nothing here reads process-global
//! state; credentials, endpoints, and model paths all arrive through
//! [`BackendConfig`] values, and the request picks the backend order.

use std::fs;
use std::io;
use std::path::Path;

use thiserror::Error;
use tracing::info;

use crate::backend::{
    self, BackendConfig, BackendError, BackendKind, CompletionBackend, RawCompletion,
    RemoteBackend,
};
use crate::extract::{extract, CandidateCode};
use crate::grammar::DomainGrammar;
use crate::invoker::{BackoffPolicy, GenerationError, GenerationRequest, Invoker};
use crate::prompt::PromptBuilder;
use crate::validate::{ValidationReport, Validator};

/// Pipeline errors.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Every backend in the plan failed.
    #[error(transparent)]
    Generation(#[from] GenerationError),
    /// A backend could not be built from its config.
    #[error("backend configuration rejected: {0}")]
    Config(#[from] BackendError),
    /// The request's preference matched no configured backend.
    #[error("no completion backend is configured for this request")]
    NoBackends,
    /// Generated code could not be written out.
    #[error("could not write '{}': {source}", path.display())]
    Save {
        path: std::path::PathBuf,
        source: io::Error,
    },
}

/// Everything one generation run produced.
#[derive(Debug)]
pub struct Generation {
    /// Extracted candidate, ready to save or inspect.
    pub code: CandidateCode,
    /// Structural validation outcome for the candidate.
    pub report: ValidationReport,
    /// Raw completion with backend and attempt metadata.
    pub completion: RawCompletion,
}

/// The remote slot keeps its concrete type so a request can swap the model
/// identifier without rebuilding the credential handshake.
enum RemoteSlot {
    Configured(RemoteBackend),
    Injected(Box<dyn CompletionBackend>),
}

/// Description → validated topology code.
pub struct TopologyGenerator {
    prompts: PromptBuilder,
    validator: Validator,
    invoker: Invoker,
    remote: Option<RemoteSlot>,
    local: Option<Box<dyn CompletionBackend>>,
}

impl TopologyGenerator {
    /// Build a generator with the default grammar and the given backends.
    ///
    /// Configs later in the slice win their slot. A remote config with a
    /// bad credential fails here rather than on the first request.
    pub fn new(configs: &[BackendConfig]) -> Result<Self, GatewayError> {
        let grammar = DomainGrammar::default();
        let mut generator = Self {
            prompts: PromptBuilder::new(&grammar),
            validator: Validator::new(grammar),
            invoker: Invoker::new(),
            remote: None,
            local: None,
        };
        for config in configs {
            match config {
                BackendConfig::Remote {
                    endpoint,
                    credential,
                } => {
                    let credential = credential.clone().unwrap_or_default();
                    let remote = RemoteBackend::new(credential)?.with_endpoint(endpoint.clone());
                    generator.remote = Some(RemoteSlot::Configured(remote));
                }
                BackendConfig::Local { .. } => {
                    generator.local = Some(backend::from_config(config)?);
                }
            }
        }
        Ok(generator)
    }

    /// Swap the grammar vocabulary. Rebuilds the prompt preamble and the
    /// validator rules to match.
    pub fn with_grammar(mut self, grammar: DomainGrammar) -> Self {
        self.prompts = PromptBuilder::new(&grammar);
        self.validator = Validator::new(grammar);
        self
    }

    /// Override the retry backoff policy.
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.invoker = Invoker::new().with_backoff(backoff);
        self
    }

    /// Install a caller-supplied backend in its kind's slot, replacing any
    /// configured one. Used to drive the pipeline with scripted backends.
    pub fn with_backend(mut self, backend: Box<dyn CompletionBackend>) -> Self {
        match backend.kind() {
            BackendKind::Remote => self.remote = Some(RemoteSlot::Injected(backend)),
            BackendKind::Local => self.local = Some(backend),
        }
        self
    }

    /// Grammar the generator prompts and validates with.
    pub fn grammar(&self) -> &DomainGrammar {
        self.validator.grammar()
    }

    /// Complete flow: description → prompt → completion → candidate → report.
    ///
    /// `Err` means no backend produced text at all. A completion that turns
    /// out to be invalid topology code is not an error; the report says so.
    pub fn generate(&self, request: &GenerationRequest) -> Result<Generation, GatewayError> {
        let prompt = self.prompts.build(&request.description);

        // A request naming a different model gets a re-modeled remote client
        // for this call only.
        let remodeled = self.remodeled_remote(request);
        let mut plan: Vec<&dyn CompletionBackend> = Vec::new();
        for kind in request.backend_preference.order() {
            match kind {
                BackendKind::Remote => {
                    if let Some(remote) = remodeled.as_ref() {
                        plan.push(remote);
                    } else {
                        match &self.remote {
                            Some(RemoteSlot::Configured(remote)) => plan.push(remote),
                            Some(RemoteSlot::Injected(backend)) => plan.push(backend.as_ref()),
                            None => {}
                        }
                    }
                }
                BackendKind::Local => {
                    if let Some(local) = &self.local {
                        plan.push(local.as_ref());
                    }
                }
            }
        }
        if plan.is_empty() {
            return Err(GatewayError::NoBackends);
        }

        let completion = self.invoker.run(&plan, &prompt, request)?;
        let code = extract(self.grammar(), &completion.text);
        let report = self.validator.validate(&code);
        info!(
            backend = %completion.backend_used,
            attempts = completion.attempt_count,
            method = %code.extraction_method,
            valid = report.is_valid,
            "generation complete"
        );
        Ok(Generation {
            code,
            report,
            completion,
        })
    }

    /// Run [`generate`](Self::generate) and write the candidate to `path`,
    /// creating parent directories as needed.
    pub fn generate_to_file(
        &self,
        request: &GenerationRequest,
        path: &Path,
    ) -> Result<Generation, GatewayError> {
        let generation = self.generate(request)?;
        write_candidate(&generation.code, path)?;
        Ok(generation)
    }

    fn remodeled_remote(&self, request: &GenerationRequest) -> Option<RemoteBackend> {
        match &self.remote {
            Some(RemoteSlot::Configured(remote)) if remote.model() != request.model_identifier => {
                Some(remote.clone().with_model(request.model_identifier.clone()))
            }
            _ => None,
        }
    }
}

/// Write candidate source to `path` with a trailing newline.
pub fn write_candidate(code: &CandidateCode, path: &Path) -> Result<(), GatewayError> {
    let save = |path: &Path| -> io::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut text = code.source_text.clone();
        if !text.ends_with('\n') {
            text.push('\n');
        }
        fs::write(path, text)
    };
    save(path).map_err(|source| GatewayError::Save {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::GenerationParams;
    use crate::extract::ExtractionMethod;
    use crate::invoker::BackendPreference;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    struct ScriptedBackend {
        kind: BackendKind,
        responses: Mutex<VecDeque<Result<String, BackendError>>>,
    }

    impl ScriptedBackend {
        fn new(kind: BackendKind, responses: Vec<Result<String, BackendError>>) -> Self {
            Self {
                kind,
                responses: Mutex::new(responses.into_iter().collect()),
            }
        }
    }

    impl CompletionBackend for ScriptedBackend {
        fn kind(&self) -> BackendKind {
            self.kind
        }

        fn complete(
            &self,
            _prompt: &str,
            _params: &GenerationParams,
            _timeout: Duration,
        ) -> Result<String, BackendError> {
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| {
                    Err(BackendError::Unreachable {
                        message: "script exhausted".to_string(),
                    })
                })
        }
    }

    fn valid_code() -> &'static str {
        "from profissa_lft.host import Host\n\
         h1 = Host('h1')\n\
         h1.instantiate()"
    }

    fn fenced(code: &str) -> String {
        format!("Here is the topology:\n```python\n{code}\n```\nEnjoy.")
    }

    fn generator_with(backend: ScriptedBackend) -> TopologyGenerator {
        TopologyGenerator::new(&[])
            .unwrap()
            .with_backend(Box::new(backend))
            .with_backoff(BackoffPolicy {
                initial: Duration::from_millis(1),
                ceiling: Duration::from_millis(4),
            })
    }

    #[test]
    fn test_full_pipeline_with_scripted_backend() {
        let backend =
            ScriptedBackend::new(BackendKind::Local, vec![Ok(fenced(valid_code()))]);
        let generator = generator_with(backend);
        let request = GenerationRequest::new("one host")
            .with_preference(BackendPreference::Local);

        let generation = generator.generate(&request).unwrap();
        assert_eq!(
            generation.code.extraction_method,
            ExtractionMethod::FencedBlock
        );
        assert_eq!(generation.code.source_text, valid_code());
        assert!(generation.report.is_valid);
        assert_eq!(generation.completion.backend_used, BackendKind::Local);
        assert!(generation.report.parsed_entities.contains("h1"));
    }

    #[test]
    fn test_invalid_completion_is_not_an_error() {
        let backend = ScriptedBackend::new(
            BackendKind::Local,
            vec![Ok("I cannot help with that request.".to_string())],
        );
        let generator = generator_with(backend);
        let request = GenerationRequest::new("one host")
            .with_preference(BackendPreference::Local);

        let generation = generator.generate(&request).unwrap();
        assert!(!generation.report.is_valid);
        assert_eq!(
            generation.code.extraction_method,
            ExtractionMethod::RawPassthrough
        );
    }

    #[test]
    fn test_auto_fallback_uses_local_when_remote_unconfigured() {
        let backend =
            ScriptedBackend::new(BackendKind::Local, vec![Ok(fenced(valid_code()))]);
        let generator = generator_with(backend);
        let request = GenerationRequest::new("one host");

        let generation = generator.generate(&request).unwrap();
        assert_eq!(generation.completion.backend_used, BackendKind::Local);
    }

    #[test]
    fn test_no_backends_for_preference() {
        let backend =
            ScriptedBackend::new(BackendKind::Local, vec![Ok(fenced(valid_code()))]);
        let generator = generator_with(backend);
        let request = GenerationRequest::new("one host")
            .with_preference(BackendPreference::Remote);

        assert!(matches!(
            generator.generate(&request),
            Err(GatewayError::NoBackends)
        ));
    }

    #[test]
    fn test_exhausted_backends_surface_generation_error() {
        let backend = ScriptedBackend::new(
            BackendKind::Local,
            vec![Err(BackendError::AuthError {
                message: "nope".to_string(),
            })],
        );
        let generator = generator_with(backend);
        let request = GenerationRequest::new("one host")
            .with_preference(BackendPreference::Local);

        match generator.generate(&request) {
            Err(GatewayError::Generation(e)) => {
                assert_eq!(e.failures.len(), 1);
                assert_eq!(e.failures[0].backend, BackendKind::Local);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_remote_slot_remodels_for_request() {
        let generator = TopologyGenerator::new(&[BackendConfig::remote("token")]).unwrap();

        let default_request = GenerationRequest::new("one host");
        assert!(generator.remodeled_remote(&default_request).is_none());

        let custom = GenerationRequest::new("one host").with_model("acme/other-model");
        let remodeled = generator.remodeled_remote(&custom).unwrap();
        assert_eq!(remodeled.model(), "acme/other-model");
    }

    #[test]
    fn test_generate_to_file_creates_parents() {
        let backend =
            ScriptedBackend::new(BackendKind::Local, vec![Ok(fenced(valid_code()))]);
        let generator = generator_with(backend);
        let request = GenerationRequest::new("one host")
            .with_preference(BackendPreference::Local);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out/topology.py");
        generator.generate_to_file(&request, &path).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, format!("{}\n", valid_code()));
    }
}
