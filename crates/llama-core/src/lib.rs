//! Safe Rust wrapper around the llama.cpp C API.
//!
//! RAII-managed model, context and batch types plus the handful of
//! vocabulary and state-file helpers the binding layer drives.

pub mod backend;
pub mod batch;
pub mod context;
pub mod error;
pub mod model;
pub mod session;
pub mod token;

pub use backend::{LlamaBackend, NumaStrategy};
pub use batch::LlamaBatch;
pub use context::{ContextParams, LlamaContext, PerfData};
pub use error::{LlamaError, Result};
pub use model::{LlamaModel, ModelParams, max_devices};
pub use token::{token_to_piece, tokenize};

/// Token id as used by the llama.cpp vocabulary.
pub type LlamaToken = llama_sys::llama_token;
