//! Deterministic engine: replays scripted responses through the full
//! [`Engine`] contract.
//!
//! This is the reference consumer-side implementation of the adapter. Tests
//! drive the agent loop with it; the CLI falls back to it when no transformer
//! backend is linked, so every surface stays exercisable end to end.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::error::EngineError;
use crate::gguf::GgufInfo;

use super::{Engine, EngineInfo, EngineOptions, FinishReason, GenOutcome, GenParams};

/// Streaming chunk size in bytes (approximates per-token decoding).
const CHUNK_BYTES: usize = 16;

/// An engine that replays queued responses in order.
#[derive(Debug)]
pub struct ScriptedEngine {
    info: EngineInfo,
    context_size: usize,
    script: VecDeque<String>,
    model_path: Option<PathBuf>,
}

impl ScriptedEngine {
    /// An unloaded engine with an empty script (library/test use).
    pub fn new(context_size: usize) -> ScriptedEngine {
        ScriptedEngine {
            info: EngineInfo {
                n_ctx_train: context_size as u32,
                ..EngineInfo::default()
            },
            context_size,
            script: VecDeque::new(),
            model_path: None,
        }
    }

    /// An engine pre-loaded with responses, returned in order.
    pub fn with_script<I, S>(context_size: usize, responses: I) -> ScriptedEngine
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut engine = ScriptedEngine::new(context_size);
        engine.script = responses.into_iter().map(Into::into).collect();
        engine
    }

    /// Load model metadata from a GGUF file and build the engine around it.
    ///
    /// Validates the path and header; generation still replays the script.
    pub fn load(path: &Path, options: EngineOptions) -> Result<ScriptedEngine, EngineError> {
        if !path.is_file() {
            return Err(EngineError::ModelNotFound {
                path: path.display().to_string(),
            });
        }
        let gguf = GgufInfo::read(path)?;
        let model_size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        let file_size_mb = (model_size / (1024 * 1024)) as i64;
        let n_params =
            crate::registry::estimate_params(file_size_mb, gguf.quant) as u64;

        tracing::info!(
            path = %path.display(),
            arch = gguf.architecture.as_deref().unwrap_or("?"),
            quant = ?gguf.quant,
            context = options.context_size,
            mmap = options.mmap,
            "model metadata loaded (scripted engine)"
        );

        Ok(ScriptedEngine {
            info: EngineInfo {
                n_params,
                n_vocab: 0,
                n_ctx_train: options.context_size as u32,
                n_embd: 0,
                model_size,
            },
            context_size: options.context_size,
            script: VecDeque::new(),
            model_path: Some(path.to_path_buf()),
        })
    }

    /// Queue one more scripted response.
    pub fn push_response(&mut self, text: impl Into<String>) {
        self.script.push_back(text.into());
    }

    /// Responses not yet consumed.
    pub fn remaining(&self) -> usize {
        self.script.len()
    }

    /// The loaded model path, when constructed via [`ScriptedEngine::load`].
    pub fn model_path(&self) -> Option<&Path> {
        self.model_path.as_deref()
    }

    pub fn context_size(&self) -> usize {
        self.context_size
    }

    /// The reply used when the script runs dry. Grammar-constrained calls
    /// get a well-formed final action so the agent loop stays parseable.
    fn fallback_response(grammar: Option<&str>) -> String {
        match grammar {
            Some(g) if g.contains("tool-name") => {
                r#"{"action": "final", "answer": "No scripted response available.", "thought": "script exhausted"}"#
                    .to_string()
            }
            _ => "No scripted response available.".to_string(),
        }
    }
}

impl Engine for ScriptedEngine {
    fn info(&self) -> EngineInfo {
        self.info
    }

    fn generate(&mut self, mut params: GenParams<'_>) -> Result<GenOutcome, EngineError> {
        let start = Instant::now();
        let text = self
            .script
            .pop_front()
            .unwrap_or_else(|| Self::fallback_response(params.grammar));

        // Stream in small chunks so callback/cancellation paths are exercised
        // the way a real token decoder would drive them.
        let mut emitted = String::new();
        let mut cancelled = false;
        if let Some(cb) = params.on_token.as_mut() {
            let mut rest = text.as_str();
            while !rest.is_empty() {
                let mut cut = CHUNK_BYTES.min(rest.len());
                while !rest.is_char_boundary(cut) {
                    cut += 1;
                }
                let (chunk, tail) = rest.split_at(cut);
                emitted.push_str(chunk);
                if !cb(chunk) {
                    cancelled = true;
                    break;
                }
                rest = tail;
            }
        } else {
            emitted = text.clone();
        }

        let n_tokens = self.tokenize(&emitted).min(params.max_tokens);
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        let finish_reason = if cancelled {
            FinishReason::Cancelled
        } else if self.tokenize(&text) > params.max_tokens {
            FinishReason::Length
        } else {
            FinishReason::Stop
        };

        Ok(GenOutcome {
            text: emitted,
            n_tokens,
            elapsed_ms,
            tokens_per_s: if elapsed_ms > 0.0 {
                n_tokens as f64 / (elapsed_ms / 1000.0)
            } else {
                0.0
            },
            finish_reason,
        })
    }

    fn tokenize(&self, text: &str) -> usize {
        // ~4 bytes per token, the usual BPE rule of thumb; deterministic and
        // monotonic in text length, which is all accounting needs.
        text.len().div_ceil(4)
    }
}
