//! C-linkage binding that drives llama.cpp inference sessions for a host
//! process.
//!
//! The host loads a model into a context handle, allocates a params handle
//! per request and calls `llama_predict`, which runs the whole
//! prompt-evaluation and sampling loop and writes the text back into a
//! caller buffer. See [`ffi`] for the exported symbols.
//!
//! Without the `native` feature the crate builds without llama.cpp: the
//! loop, the samplers and every export except model loading work against
//! any [`Engine`].

pub mod engine;
pub mod error;
pub mod ffi;
pub mod logging;
#[cfg(feature = "native")]
pub mod native;
pub mod options;
pub mod predict;
pub mod sampling;

pub use engine::{Engine, Timings, Token};
pub use error::{BindingError, Result};
#[cfg(feature = "native")]
pub use native::NativeEngine;
pub use options::{ModelOptions, PredictOptions};
pub use predict::{FinishReason, Prediction, eval, predict};
pub use sampling::Sampler;
