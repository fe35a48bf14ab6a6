//! Topogen - Natural Language → Network Topology Code
//!
//! Turns a plain-English description of a network into executable topology
//! code for the Lightweight Fog Testbed framework, using a hosted inference
//! API with an in-process model as fallback, and structurally validates
//! whatever comes back.
//!
//! # Features
//!
//! - **Uniform backends**: remote HTTP inference and local in-process
//!   inference behind one synchronous [`CompletionBackend`] trait
//! - **Typed failure taxonomy**: every backend error is transient or fatal,
//!   and the retry machinery keys off that classification alone
//! - **Retry with fallback**: exponential backoff per backend, automatic
//!   remote → local fallback, full failure report when everything is down
//! - **Total extraction**: fenced block → heuristic slice → raw passthrough;
//!   some candidate always comes out
//! - **Structural validation**: never fails, reports rule violations and the
//!   device entities it found
//!
//! # Example
//!
//! ```no_run
//! use topogen::{BackendConfig, GenerationRequest, TopologyGenerator};
//!
//! let generator = TopologyGenerator::new(&[BackendConfig::remote("hf_token")])?;
//! let request = GenerationRequest::new("Create 2 hosts connected to a switch");
//! let generation = generator.generate(&request)?;
//!
//! println!("{}", generation.code.source_text);
//! print!("{}", generation.report.summary());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  Description    │  "2 hosts connected to a switch"
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │  PromptBuilder  │  grammar notes + few-shot exemplars
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐     transient error: retry w/ backoff
//! │  Invoker        │     fatal error or budget spent: fall back
//! │  remote ⇢ local │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │  extract        │  fenced block → slice → raw
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │  Validator      │  structural rules, total
//! └────────┬────────┘
//!          │
//!          ▼
//!   CandidateCode + ValidationReport
//! ```

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod extract;
pub mod generator;
pub mod grammar;
pub mod invoker;
pub mod prompt;
pub mod validate;

// Re-export commonly used types
pub use backend::{
    from_config, BackendConfig, BackendError, BackendKind, CompletionBackend, DeviceHint,
    ErrorClass, GenerationParams, LocalBackend, RawCompletion, RemoteBackend,
};
pub use extract::{extract, CandidateCode, ExtractionMethod};
pub use generator::{write_candidate, GatewayError, Generation, TopologyGenerator};
pub use grammar::{DeviceClass, DomainGrammar, MethodKind};
pub use invoker::{
    BackendFailure, BackendPreference, BackoffPolicy, GenerationError, GenerationRequest, Invoker,
};
pub use prompt::{default_exemplars, Exemplar, PromptBuilder};
pub use validate::{validate_candidate, RuleId, ValidationReport, Validator, Violation};

/// One-shot generation against the hosted API with default settings.
pub fn generate(description: &str, credential: &str) -> Result<Generation, GatewayError> {
    let generator = TopologyGenerator::new(&[BackendConfig::remote(credential)])?;
    generator.generate(&GenerationRequest::new(description))
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_shot_rejects_blank_credential() {
        let err = generate("two hosts", "  ").err().unwrap();
        assert!(matches!(err, GatewayError::Config(_)));
    }

    #[test]
    fn test_version_is_wired() {
        assert!(!VERSION.is_empty());
    }
}
