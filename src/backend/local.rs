//! Local in-process completion backend.
//!
//! The model is loaded lazily on first use and at most once per backend
//! instance; the loaded state lives in an owned `OnceCell<Mutex<..>>`, so
//! sharing one `LocalBackend` (e.g. behind an `Arc`) gives the whole process
//! a single copy of the weights without any ambient global. Inference runs
//! synchronously on the calling thread; concurrent callers serialize on the
//! model lock.
//!
//! With the `onnx` feature the weights are executed through ONNX Runtime.
//! Without it a deterministic template engine stands in, synthesizing
//! topology code from keywords in the request, so the local path stays
//! exercisable in default builds.

use std::path::{Path, PathBuf};
use std::time::Instant;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::{debug, info};

use super::{BackendError, BackendKind, CompletionBackend, DeviceHint, GenerationParams};
use crate::prompt::last_user_turn;

/// A loaded model that can continue a prompt.
trait TextModel: Send {
    fn generate(
        &mut self,
        prompt: &str,
        params: &GenerationParams,
        deadline: Instant,
    ) -> Result<String, BackendError>;

    fn info(&self) -> String;
}

/// Completion backend running a model inside this process.
pub struct LocalBackend {
    model_path: PathBuf,
    device: Option<DeviceHint>,
    model: OnceCell<Mutex<Box<dyn TextModel>>>,
}

impl LocalBackend {
    /// Backend for the weights at `model_path`. Nothing is loaded until the
    /// first completion asks for it.
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            device: None,
            model: OnceCell::new(),
        }
    }

    /// Prefer a particular execution device. Advisory; the engine may
    /// ignore it.
    pub fn with_device(mut self, device: DeviceHint) -> Self {
        self.device = Some(device);
        self
    }

    /// Whether the model has been loaded yet.
    pub fn is_loaded(&self) -> bool {
        self.model.get().is_some()
    }

    /// Engine description, if loaded.
    pub fn model_info(&self) -> Option<String> {
        self.model.get().map(|m| m.lock().info())
    }

    fn model(&self) -> Result<&Mutex<Box<dyn TextModel>>, BackendError> {
        self.model.get_or_try_init(|| {
            if !self.model_path.exists() {
                return Err(BackendError::ModelUnavailable {
                    message: format!("model weights not found: {}", self.model_path.display()),
                });
            }
            info!(
                path = %self.model_path.display(),
                device = ?self.device,
                "loading local model"
            );
            let model = load_model(&self.model_path)?;
            Ok(Mutex::new(model))
        })
    }
}

impl CompletionBackend for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn complete(
        &self,
        prompt: &str,
        params: &GenerationParams,
        timeout: std::time::Duration,
    ) -> Result<String, BackendError> {
        let model = self.model()?;
        let deadline = Instant::now() + timeout;
        // Serializes concurrent local completions on the model.
        let mut guard = model.lock();
        debug!(engine = %guard.info(), "local completion request");
        guard.generate(prompt, params, deadline)
    }
}

#[cfg(feature = "onnx")]
fn load_model(path: &Path) -> Result<Box<dyn TextModel>, BackendError> {
    Ok(Box::new(onnx_model::OnnxModel::load(path)?))
}

#[cfg(not(feature = "onnx"))]
fn load_model(path: &Path) -> Result<Box<dyn TextModel>, BackendError> {
    Ok(Box::new(TemplateModel::load(path)))
}

// ============================================================================
// Template engine (default build)
// ============================================================================

/// Deterministic stand-in engine used when no real model backend is
/// compiled in. Synthesizes topology code from device keywords and counts
/// in the request description.
pub struct TemplateModel {
    source: String,
}

impl TemplateModel {
    pub fn load(path: &Path) -> Self {
        Self {
            source: path.display().to_string(),
        }
    }
}

impl TextModel for TemplateModel {
    fn generate(
        &mut self,
        prompt: &str,
        _params: &GenerationParams,
        _deadline: Instant,
    ) -> Result<String, BackendError> {
        Ok(synthesize_topology(last_user_turn(prompt)))
    }

    fn info(&self) -> String {
        format!("template synthesizer ({})", self.source)
    }
}

struct DeviceSpec {
    class: &'static str,
    module: &'static str,
    prefix: &'static str,
    nouns: &'static [&'static str],
}

const DEVICE_SPECS: &[DeviceSpec] = &[
    DeviceSpec {
        class: "Host",
        module: "host",
        prefix: "h",
        nouns: &["host", "hosts"],
    },
    DeviceSpec {
        class: "Switch",
        module: "switch",
        prefix: "s",
        nouns: &["switch", "switches"],
    },
    DeviceSpec {
        class: "Controller",
        module: "controller",
        prefix: "c",
        nouns: &["controller", "controllers"],
    },
    DeviceSpec {
        class: "UE",
        module: "ue",
        prefix: "ue",
        nouns: &["ue", "ues"],
    },
    DeviceSpec {
        class: "EnB",
        module: "enb",
        prefix: "enb",
        nouns: &["enodeb", "enodebs", "enb", "enbs"],
    },
    DeviceSpec {
        class: "EPC",
        module: "epc",
        prefix: "epc",
        nouns: &["epc", "epcs"],
    },
];

fn parse_count(word: &str) -> Option<u32> {
    if let Ok(n) = word.parse::<u32>() {
        return Some(n);
    }
    match word {
        "a" | "an" | "one" => Some(1),
        "two" => Some(2),
        "three" => Some(3),
        "four" => Some(4),
        "five" => Some(5),
        "six" => Some(6),
        "seven" => Some(7),
        "eight" => Some(8),
        "nine" => Some(9),
        "ten" => Some(10),
        _ => None,
    }
}

fn requested_count(words: &[String], nouns: &[&str]) -> u32 {
    for (i, word) in words.iter().enumerate() {
        if nouns.contains(&word.as_str()) {
            return i
                .checked_sub(1)
                .and_then(|j| parse_count(&words[j]))
                .unwrap_or(1);
        }
    }
    0
}

/// Emit topology code for a description, exemplar-shaped: imports,
/// constructions, instantiations, links to a hub device, addresses,
/// uplink, gateways.
fn synthesize_topology(description: &str) -> String {
    let words: Vec<String> = description
        .to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect();

    let mut counts: Vec<u32> = DEVICE_SPECS
        .iter()
        .map(|spec| requested_count(&words, spec.nouns))
        .collect();

    // Nothing recognized: fall back to the minimal two-host segment.
    if counts.iter().all(|&c| c == 0) {
        counts[0] = 2;
        counts[1] = 1;
    }

    let names: Vec<Vec<String>> = DEVICE_SPECS
        .iter()
        .zip(&counts)
        .map(|(spec, &count)| {
            (1..=count)
                .map(|i| format!("{}{}", spec.prefix, i))
                .collect()
        })
        .collect();

    let mut code = String::new();

    for (spec, spec_names) in DEVICE_SPECS.iter().zip(&names) {
        if !spec_names.is_empty() {
            code.push_str(&format!(
                "from profissa_lft.{} import {}\n",
                spec.module, spec.class
            ));
        }
    }
    code.push('\n');

    for (spec, spec_names) in DEVICE_SPECS.iter().zip(&names) {
        for name in spec_names {
            code.push_str(&format!("{name} = {}('{name}')\n", spec.class));
        }
    }
    code.push('\n');

    for spec_names in &names {
        for name in spec_names {
            code.push_str(&format!("{name}.instantiate()\n"));
        }
    }
    code.push('\n');

    // Hub preference: switch, then eNodeB, then EPC, then controller.
    let hub = [1usize, 4, 5, 2]
        .iter()
        .find_map(|&idx| names[idx].first())
        .cloned();

    let endpoints: Vec<String> = names[0].iter().chain(names[3].iter()).cloned().collect();

    if let Some(hub) = &hub {
        // Everything, spare hubs included, links to the hub.
        for spec_names in &names {
            for name in spec_names {
                if name == hub {
                    continue;
                }
                code.push_str(&format!(
                    "{name}.connect({hub}, \"{name}{hub}\", \"{hub}{name}\")\n"
                ));
            }
        }
        code.push('\n');

        for (i, name) in endpoints.iter().enumerate() {
            code.push_str(&format!(
                "{name}.setIp('10.0.0.{}', 24, \"{name}{hub}\")\n",
                i + 1
            ));
        }
        if !endpoints.is_empty() {
            code.push('\n');
        }

        code.push_str(&format!(
            "{hub}.connectToInternet('10.0.0.254', 24, \"{hub}host\", \"host{hub}\")\n"
        ));
        code.push('\n');

        for name in &endpoints {
            code.push_str(&format!(
                "{name}.setDefaultGateway('10.0.0.254', \"{name}{hub}\")\n"
            ));
        }
    }

    code.trim_end().to_string()
}

// ============================================================================
// ONNX Runtime engine
// ============================================================================

#[cfg(feature = "onnx")]
mod onnx_model {
    use super::*;
    use ort::session::Session;
    use ort::value::Tensor;

    const BLOCK_SIZE: usize = 1024;
    const END_MARKER: &str = "<|im_end|>";

    /// Byte-level causal LM executed through ONNX Runtime. Prompt bytes in,
    /// greedy-decoded completion bytes out.
    pub struct OnnxModel {
        session: Session,
    }

    impl OnnxModel {
        pub fn load(path: &Path) -> Result<Self, BackendError> {
            let session = Session::builder()
                .map_err(|e| BackendError::ModelUnavailable {
                    message: format!("session builder error: {e}"),
                })?
                .commit_from_file(path)
                .map_err(|e| BackendError::ModelUnavailable {
                    message: format!("failed to load {}: {e}", path.display()),
                })?;
            Ok(Self { session })
        }
    }

    fn map_run_error(e: impl std::fmt::Display) -> BackendError {
        let message = e.to_string();
        let lowered = message.to_lowercase();
        if lowered.contains("alloc") || lowered.contains("memory") {
            BackendError::ResourceExhausted { message }
        } else {
            BackendError::MalformedResponse {
                message: format!("inference failed: {message}"),
            }
        }
    }

    impl TextModel for OnnxModel {
        fn generate(
            &mut self,
            prompt: &str,
            params: &GenerationParams,
            deadline: Instant,
        ) -> Result<String, BackendError> {
            let mut tokens: Vec<i64> = prompt.bytes().map(|b| b as i64).collect();
            let prompt_len = tokens.len();

            for _ in 0..params.max_new_tokens {
                if Instant::now() >= deadline {
                    return Err(BackendError::Unreachable {
                        message: "local inference timed out".to_string(),
                    });
                }

                let window: Vec<i64> = if tokens.len() > BLOCK_SIZE {
                    tokens[tokens.len() - BLOCK_SIZE..].to_vec()
                } else {
                    tokens.clone()
                };
                let seq_len = window.len();

                let shape = vec![1i64, seq_len as i64];
                let input = Tensor::from_array((shape, window)).map_err(map_run_error)?;

                let outputs = self.session.run(ort::inputs![input]).map_err(map_run_error)?;
                let (logits_shape, logits_data) = outputs[0]
                    .try_extract_tensor::<f32>()
                    .map_err(map_run_error)?;

                if logits_shape.len() != 3 {
                    return Err(BackendError::MalformedResponse {
                        message: format!("expected 3D logits, got {}D", logits_shape.len()),
                    });
                }
                let vocab = logits_shape[2] as usize;
                let offset = (seq_len - 1) * vocab;
                let last = &logits_data[offset..offset + vocab];

                let scale = if params.temperature > 0.0 {
                    params.temperature
                } else {
                    1.0
                };
                let mut next = 0usize;
                let mut best = f32::NEG_INFINITY;
                for (i, &logit) in last.iter().enumerate() {
                    let score = logit / scale;
                    if score > best {
                        best = score;
                        next = i;
                    }
                }

                if next == 0 {
                    break;
                }
                tokens.push(next as i64);

                let generated: Vec<u8> = tokens[prompt_len..].iter().map(|&t| t as u8).collect();
                if generated.ends_with(END_MARKER.as_bytes()) {
                    break;
                }
            }

            let generated: Vec<u8> = tokens[prompt_len..].iter().map(|&t| t as u8).collect();
            let text = String::from_utf8_lossy(&generated);
            let text = text.trim_end_matches('\0');
            let text = text.strip_suffix(END_MARKER).unwrap_or(text);
            Ok(text.trim().to_string())
        }

        fn info(&self) -> String {
            "ONNX Runtime byte-level model".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[cfg(not(feature = "onnx"))]
    use std::sync::Arc;
    use std::time::Duration;

    fn params() -> GenerationParams {
        GenerationParams::default()
    }

    #[test]
    fn test_missing_weights_is_model_unavailable() {
        let backend = LocalBackend::new("/nonexistent/weights.onnx");
        let err = backend
            .complete("prompt", &params(), Duration::from_secs(1))
            .err()
            .unwrap();
        assert!(matches!(err, BackendError::ModelUnavailable { .. }));
        assert!(!backend.is_loaded());

        // Still fails the same way on the next call; nothing got cached.
        let err = backend
            .complete("prompt", &params(), Duration::from_secs(1))
            .err()
            .unwrap();
        assert!(matches!(err, BackendError::ModelUnavailable { .. }));
    }

    #[cfg(not(feature = "onnx"))]
    #[test]
    fn test_lazy_load_happens_once() {
        let weights = tempfile::NamedTempFile::new().unwrap();
        let backend = LocalBackend::new(weights.path());
        assert!(!backend.is_loaded());

        backend
            .complete("2 hosts and a switch", &params(), Duration::from_secs(5))
            .unwrap();
        assert!(backend.is_loaded());
        let info = backend.model_info().unwrap();

        backend
            .complete("3 hosts and a switch", &params(), Duration::from_secs(5))
            .unwrap();
        assert_eq!(backend.model_info().unwrap(), info);
    }

    #[cfg(not(feature = "onnx"))]
    #[test]
    fn test_concurrent_completions_serialize() {
        let weights = tempfile::NamedTempFile::new().unwrap();
        let backend = Arc::new(LocalBackend::new(weights.path()));

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let backend = Arc::clone(&backend);
                std::thread::spawn(move || {
                    backend.complete(
                        &format!("{} hosts and a switch", i + 1),
                        &GenerationParams::default(),
                        Duration::from_secs(5),
                    )
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.join().unwrap().is_ok());
        }
        assert!(backend.is_loaded());
    }

    #[test]
    fn test_count_parsing() {
        let words = |s: &str| -> Vec<String> {
            s.split_whitespace().map(str::to_string).collect()
        };
        assert_eq!(requested_count(&words("3 hosts and a switch"), &["host", "hosts"]), 3);
        assert_eq!(requested_count(&words("3 hosts and a switch"), &["switch", "switches"]), 1);
        assert_eq!(requested_count(&words("two hosts"), &["host", "hosts"]), 2);
        assert_eq!(requested_count(&words("the switch"), &["host", "hosts"]), 0);
        assert_eq!(requested_count(&words("host"), &["host", "hosts"]), 1);
    }

    #[test]
    fn test_synthesized_topology_shape() {
        let code = synthesize_topology("Create a simple SDN topology with 2 hosts connected to a switch");
        assert!(code.contains("from profissa_lft.host import Host"));
        assert!(code.contains("h1 = Host('h1')"));
        assert!(code.contains("h2 = Host('h2')"));
        assert!(code.contains("s1 = Switch('s1')"));
        assert!(code.contains("h1.instantiate()"));
        assert!(code.contains("h1.connect(s1, \"h1s1\", \"s1h1\")"));
        assert!(code.contains("h1.setIp('10.0.0.1', 24, \"h1s1\")"));
        assert!(code.contains("s1.connectToInternet"));
        assert!(code.contains("h2.setDefaultGateway('10.0.0.254', \"h2s1\")"));
    }

    #[test]
    fn test_synthesis_is_deterministic() {
        let description = "a 4G network with 2 UEs, an eNodeB and an EPC";
        assert_eq!(
            synthesize_topology(description),
            synthesize_topology(description)
        );
    }

    #[test]
    fn test_synthesis_unrecognized_falls_back() {
        let code = synthesize_topology("make me something nice");
        assert!(code.contains("h1 = Host('h1')"));
        assert!(code.contains("s1 = Switch('s1')"));
    }
}
