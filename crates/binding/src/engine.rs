//! The seam between the session loop and the wrapped inference library.

use std::path::Path;

use crate::error::Result;

/// Vocabulary token id.
pub type Token = i32;

/// Timing counters reported by the engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Timings {
    pub prompt_ms: f64,
    pub prompt_tokens: i32,
    pub eval_ms: f64,
    pub eval_tokens: i32,
}

/// Everything the predict loop needs from a loaded model + context.
///
/// Tokenization, the forward pass and the KV cache stay behind this trait;
/// the loop only moves token ids and reads logits.
pub trait Engine {
    /// Context window in tokens.
    fn n_ctx(&self) -> usize;

    fn token_bos(&self) -> Token;
    fn token_eos(&self) -> Token;
    fn token_nl(&self) -> Token;

    fn tokenize(&self, text: &str, add_bos: bool) -> Result<Vec<Token>>;

    /// Raw bytes of one token; may be an incomplete UTF-8 sequence.
    fn token_to_piece(&self, token: Token) -> Vec<u8>;

    /// Evaluate `tokens` at positions `n_past..`, discarding any cached
    /// state at or beyond `n_past`.
    fn eval(&mut self, tokens: &[Token], n_past: usize, n_threads: i32) -> Result<()>;

    /// Logits of the last evaluated token, one per vocabulary entry.
    fn logits(&self) -> &[f32];

    /// Restore engine state from a session file and return its tokens.
    fn load_session(&mut self, path: &Path, capacity: usize) -> Result<Vec<Token>>;

    fn save_session(&mut self, path: &Path, tokens: &[Token]) -> Result<()>;

    fn timings(&self) -> Timings;
    fn reset_timings(&mut self);
}
