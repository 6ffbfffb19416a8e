//! Diagnostic error types for the NeuronOS core.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]`
//! derives, providing error codes and help text. Tool-level failures are
//! deliberately *not* represented here: they are absorbed into the agent loop
//! as observations (see `tools::ToolOutcome`) and never abort a run.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for the NeuronOS core.
///
/// Each variant wraps a subsystem-specific error, preserving the full
/// diagnostic chain (error codes, help text) through to the user.
#[derive(Debug, Error, Diagnostic)]
pub enum NeuronError {
    #[error("invalid argument: {message}")]
    #[diagnostic(
        code(neuronos::invalid_argument),
        help("Check the command usage with --help.")
    )]
    InvalidArgument { message: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Hal(#[from] HalError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Gguf(#[from] GgufError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Memory(#[from] MemoryError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Tool(#[from] ToolError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Agent(#[from] crate::agent::AgentError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Path(#[from] crate::paths::PathError),
}

// ---------------------------------------------------------------------------
// HAL errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum HalError {
    #[error("backend \"{name}\" failed to initialize: {message}")]
    #[diagnostic(
        code(neuronos::hal::backend_init),
        help(
            "The selected kernel backend could not start. Selection falls \
             through to the next backend automatically; this is fatal only \
             when the scalar reference itself fails."
        )
    )]
    BackendInit { name: &'static str, message: String },

    #[error("no usable kernel backend for feature set {features}")]
    #[diagnostic(
        code(neuronos::hal::unavailable),
        help(
            "Every registered backend (including the scalar reference) was \
             rejected. This indicates a corrupted backend table — file a bug."
        )
    )]
    BackendUnavailable { features: String },

    #[error("vector length {n} is not a multiple of the block size {block}")]
    #[diagnostic(
        code(neuronos::hal::bad_length),
        help("I2_S kernels operate on whole blocks of 128 weights. Pad the row.")
    )]
    BadLength { n: usize, block: usize },
}

// ---------------------------------------------------------------------------
// GGUF errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum GgufError {
    #[error("not a GGUF file: bad magic 0x{magic:08X}")]
    #[diagnostic(
        code(neuronos::gguf::bad_magic),
        help("The file does not start with the GGUF magic. Check the path.")
    )]
    BadMagic { magic: u32 },

    #[error("big-endian GGUF file (byte-swapped magic)")]
    #[diagnostic(
        code(neuronos::gguf::big_endian),
        help(
            "The header magic is byte-swapped, which marks a big-endian GGUF \
             export. Re-export the model little-endian."
        )
    )]
    BigEndian,

    #[error("unsupported GGUF version {version} (minimum 3)")]
    #[diagnostic(
        code(neuronos::gguf::version),
        help("Re-convert the model with a current exporter.")
    )]
    UnsupportedVersion { version: u32 },

    #[error("malformed metadata: {message}")]
    #[diagnostic(
        code(neuronos::gguf::metadata),
        help("The metadata section is truncated or corrupt.")
    )]
    Metadata { message: String },

    #[error("I/O error reading \"{path}\": {source}")]
    #[diagnostic(
        code(neuronos::gguf::io),
        help("Check that the file exists and is readable.")
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Model registry errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum RegistryError {
    #[error("models directory not found: \"{path}\"")]
    #[diagnostic(
        code(neuronos::registry::not_found),
        help("Create the directory or point --models at an existing one.")
    )]
    DirNotFound { path: String },

    #[error("no .gguf models found under \"{path}\"")]
    #[diagnostic(
        code(neuronos::registry::empty),
        help("Download a GGUF model into the models directory and re-scan.")
    )]
    NoModels { path: String },

    #[error("no model fits the {budget_mb} MB RAM budget")]
    #[diagnostic(
        code(neuronos::registry::no_fit),
        help(
            "Every scanned model needs more RAM than the budget allows. \
             Free memory, or fetch a smaller quantized model."
        )
    )]
    NoFit { budget_mb: i64 },
}

// ---------------------------------------------------------------------------
// Engine errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    #[error("model not found: \"{path}\"")]
    #[diagnostic(
        code(neuronos::engine::not_found),
        help("Check the model path, or run `neuronos scan` to list models.")
    )]
    ModelNotFound { path: String },

    #[error("model load failed: {message}")]
    #[diagnostic(
        code(neuronos::engine::load),
        help(
            "The model file exists but could not be loaded. It may be \
             corrupt, or too large for available memory."
        )
    )]
    LoadFailed { message: String },

    #[error("generation failed: {message}")]
    #[diagnostic(
        code(neuronos::engine::generate),
        help(
            "The engine returned an error mid-generation. The handle remains \
             usable; retry or reduce max_tokens."
        )
    )]
    GenerateFailed { message: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Gguf(#[from] GgufError),
}

// ---------------------------------------------------------------------------
// Memory errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum MemoryError {
    #[error("redb transaction error: {message}")]
    #[diagnostic(
        code(neuronos::memory::redb),
        help(
            "The embedded store encountered a transaction error. Writes are \
             retried once; if this persists the database may be corrupt."
        )
    )]
    Redb { message: String },

    #[error("serialization error: {message}")]
    #[diagnostic(
        code(neuronos::memory::serde),
        help("A stored record could not be encoded or decoded.")
    )]
    Serialization { message: String },

    #[error("core block \"{name}\" rejected: {message}")]
    #[diagnostic(
        code(neuronos::memory::core_block),
        help(
            "Core memory holds at most 8 named blocks of 2 KiB each. \
             Trim the value or reuse an existing block name."
        )
    )]
    CoreBlock { name: String, message: String },

    #[error("I/O error: {source}")]
    #[diagnostic(
        code(neuronos::memory::io),
        help("Check the data directory permissions and free disk space.")
    )]
    Io {
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Tool registry errors
// ---------------------------------------------------------------------------

/// Errors from tool *registration*. Execution failures never surface here —
/// they become observations inside the agent loop.
#[derive(Debug, Error, Diagnostic)]
pub enum ToolError {
    #[error("duplicate tool name: \"{name}\"")]
    #[diagnostic(
        code(neuronos::tools::duplicate),
        help("Tool names must be unique. The registry was left unchanged.")
    )]
    Duplicate { name: String },

    #[error("tool registry full: {capacity} tools")]
    #[diagnostic(
        code(neuronos::tools::capacity),
        help("The registry holds at most 64 tools. Remove unused tools.")
    )]
    CapacityExceeded { capacity: usize },
}

/// Convenience alias for functions returning NeuronOS results.
pub type NeuronResult<T> = std::result::Result<T, NeuronError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hal_error_converts_to_neuron_error() {
        let err = HalError::BadLength { n: 100, block: 128 };
        let top: NeuronError = err.into();
        assert!(matches!(top, NeuronError::Hal(HalError::BadLength { .. })));
    }

    #[test]
    fn error_display_messages_are_descriptive() {
        let err = RegistryError::NoFit { budget_mb: 3000 };
        let msg = format!("{err}");
        assert!(msg.contains("3000"));
    }
}
