//! Inference engine adapter: the one seam between the NeuronOS core and the
//! underlying token generator.
//!
//! Everything above this module (agent, compaction, CLI) consumes the
//! [`Engine`] trait alone; nothing else may talk to a transformer backend.
//! The in-tree [`ScriptedEngine`] implements the full contract
//! deterministically and doubles as the test harness for every consumer; a
//! real transformer backend plugs in behind the same trait.

pub mod scripted;

pub use scripted::ScriptedEngine;

use crate::error::EngineError;

/// Options for loading a model.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Context window to allocate, in tokens.
    pub context_size: usize,
    /// Memory-map the weights instead of reading them up front.
    pub mmap: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            context_size: 4096,
            mmap: true,
        }
    }
}

/// Static facts about a loaded model.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineInfo {
    pub n_params: u64,
    pub n_vocab: u32,
    pub n_ctx_train: u32,
    pub n_embd: u32,
    /// Model file size in bytes.
    pub model_size: u64,
}

/// Why a generation call stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// The model emitted a natural stop.
    Stop,
    /// `max_tokens` was reached.
    Length,
    /// The token callback requested termination.
    Cancelled,
}

/// One generation request.
///
/// The callback receives decoded text chunks as they arrive; returning
/// `false` cancels the call cleanly — the engine handle stays usable.
pub struct GenParams<'a> {
    pub prompt: &'a str,
    pub max_tokens: usize,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    /// GBNF grammar constraining the sampled output.
    pub grammar: Option<&'a str>,
    pub seed: u64,
    pub on_token: Option<&'a mut dyn FnMut(&str) -> bool>,
}

impl<'a> GenParams<'a> {
    /// Request with the CLI's default sampling settings.
    pub fn new(prompt: &'a str) -> GenParams<'a> {
        GenParams {
            prompt,
            max_tokens: 256,
            temperature: 0.7,
            top_p: 0.95,
            top_k: 40,
            grammar: None,
            seed: 0,
            on_token: None,
        }
    }
}

impl std::fmt::Debug for GenParams<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenParams")
            .field("prompt_len", &self.prompt.len())
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("grammar", &self.grammar.is_some())
            .finish()
    }
}

/// Result of a generation call.
#[derive(Debug, Clone)]
pub struct GenOutcome {
    pub text: String,
    pub n_tokens: usize,
    pub elapsed_ms: f64,
    pub tokens_per_s: f64,
    pub finish_reason: FinishReason,
}

/// The engine contract.
///
/// Loading is a constructor on the concrete type (e.g.
/// [`ScriptedEngine::load`]); release happens on drop — the owning-handle
/// shape, no manual `free`.
pub trait Engine: Send {
    /// Static model facts.
    fn info(&self) -> EngineInfo;

    /// Generate a completion, streaming chunks through the callback.
    fn generate(&mut self, params: GenParams<'_>) -> Result<GenOutcome, EngineError>;

    /// Token count of a text, for context accounting.
    fn tokenize(&self, text: &str) -> usize;
}
