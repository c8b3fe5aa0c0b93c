use thiserror::Error;

#[derive(Error, Debug)]
pub enum LlamaError {
    #[error("Failed to load model from '{path}': {reason}")]
    ModelLoadFailed { path: String, reason: String },

    #[error("Failed to create context: {0}")]
    ContextCreationFailed(String),

    #[error("Decode failed with code {0}")]
    DecodeFailed(i32),

    #[error("Context window exceeded: {used} tokens used, {max} maximum")]
    ContextWindowExceeded { used: usize, max: usize },

    #[error("Tokenization failed: {0}")]
    TokenizationFailed(String),

    #[error("Failed to load session file '{0}'")]
    SessionLoadFailed(String),

    #[error("Failed to save session file '{0}'")]
    SessionSaveFailed(String),

    #[error("Invalid parameter: {0}")]
    InvalidParam(String),

    #[error("Path contains a null byte: {0}")]
    InvalidPath(String),
}

pub type Result<T> = std::result::Result<T, LlamaError>;
