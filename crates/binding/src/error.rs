use thiserror::Error;

#[derive(Error, Debug)]
pub enum BindingError {
    #[error("failed to tokenize prompt")]
    EmptyPrompt,

    #[error("failed to eval: {0}")]
    Eval(String),

    #[error("failed to load session file '{path}': {reason}")]
    SessionLoad { path: String, reason: String },

    #[error("invalid {field}: {reason}")]
    InvalidOption { field: &'static str, reason: String },

    #[error("invalid options JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("null pointer passed for {0}")]
    NullPointer(&'static str),

    #[error("{0} is not valid UTF-8")]
    InvalidUtf8(&'static str),

    #[cfg(feature = "native")]
    #[error(transparent)]
    Llama(#[from] llama_core::LlamaError),

    #[error("panic across FFI boundary: {0}")]
    FfiPanic(String),
}

pub type Result<T> = std::result::Result<T, BindingError>;
