//! Safe wrapper around `llama_batch`.

use crate::LlamaToken;

/// Owned batch of tokens to feed into the decoder (single sequence).
pub struct LlamaBatch {
    inner: llama_sys::llama_batch,
    capacity: usize,
}

impl LlamaBatch {
    /// Allocate a batch with room for `capacity` tokens of sequence 0.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let inner = unsafe { llama_sys::llama_batch_init(capacity as i32, 0, 1) };
        Self { inner, capacity }
    }

    /// Build a batch holding `tokens` at consecutive positions starting at
    /// `start_pos`, with logits requested only for the last token.
    pub fn from_tokens(tokens: &[LlamaToken], start_pos: i32) -> Self {
        let mut batch = Self::new(tokens.len());
        let last = tokens.len().saturating_sub(1);
        for (i, &tok) in tokens.iter().enumerate() {
            batch.add(tok, start_pos + i as i32, i == last);
        }
        batch
    }

    /// Raw batch struct; `llama_decode` takes it by value.
    pub fn raw(&self) -> llama_sys::llama_batch {
        self.inner
    }

    pub fn n_tokens(&self) -> usize {
        self.inner.n_tokens as usize
    }

    /// Push `token` at absolute position `pos` on sequence 0.
    pub fn add(&mut self, token: LlamaToken, pos: i32, logits: bool) {
        let i = self.n_tokens();
        assert!(
            i < self.capacity,
            "LlamaBatch capacity ({}) exceeded",
            self.capacity
        );

        unsafe {
            *self.inner.token.add(i) = token;
            *self.inner.pos.add(i) = pos;
            *self.inner.n_seq_id.add(i) = 1;
            *(*self.inner.seq_id.add(i)) = 0;
            *self.inner.logits.add(i) = i8::from(logits);
        }
        self.inner.n_tokens += 1;
    }
}

impl Drop for LlamaBatch {
    fn drop(&mut self) {
        unsafe { llama_sys::llama_batch_free(self.inner) }
    }
}
