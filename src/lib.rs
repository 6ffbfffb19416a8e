//! # NeuronOS
//!
//! A self-contained local agent runtime: given a quantized model on disk and a
//! natural-language task, NeuronOS selects suitable hardware kernels, runs a
//! tool-augmented reasoning loop, and persists long-term memory.
//!
//! ## Architecture
//!
//! - **HAL** (`hal`): Runtime-dispatched ternary (I2_S) × int8 kernels with a
//!   scalar reference and SIMD backends selected from detected CPU features
//! - **Hardware probe** (`hw`): CPU/RAM/SIMD-feature detection feeding both
//!   kernel selection and model scoring
//! - **Model registry** (`registry`): GGUF directory scan, resource
//!   estimation, and hardware-fit scoring
//! - **Agent** (`agent`): Single-threaded ReAct controller with
//!   grammar-constrained tool calls and context compaction
//! - **Memory** (`memory`): Core / Recall / Archival tiers in one embedded
//!   redb store with a full-text index
//! - **Engine adapter** (`engine`): The one seam to the underlying token
//!   generator
//!
//! ## Library usage
//!
//! ```no_run
//! use neuronos::hw;
//! use neuronos::registry;
//!
//! let hardware = hw::detect();
//! let models = registry::scan(std::path::Path::new("models"), &hardware).unwrap();
//! if let Some(best) = registry::select_best(&models) {
//!     println!("best model: {} (score {:.1})", best.name, best.score);
//! }
//! ```

pub mod agent;
pub mod engine;
pub mod error;
pub mod gguf;
pub mod hal;
pub mod hw;
pub mod memory;
pub mod paths;
pub mod registry;
pub mod tools;

/// Crate version string reported by the CLI and the agent banner.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
