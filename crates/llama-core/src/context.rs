//! Safe RAII wrapper around `llama_context`.

use std::ptr::NonNull;
use std::sync::Arc;

use tracing::debug;

use crate::LlamaToken;
use crate::batch::LlamaBatch;
use crate::error::{LlamaError, Result};
use crate::model::LlamaModel;

/// Owns a `llama_context` pointer and keeps its model alive.
pub struct LlamaContext {
    ptr: NonNull<llama_sys::llama_context>,
    model: Arc<LlamaModel>,
}

// Safety: every mutating call takes &mut self; the context is never shared
// between threads without external synchronisation.
unsafe impl Send for LlamaContext {}

impl LlamaContext {
    pub fn new(model: Arc<LlamaModel>, params: &ContextParams) -> Result<Self> {
        let mut raw = unsafe { llama_sys::llama_context_default_params() };
        raw.n_ctx = params.n_ctx;
        raw.n_batch = params.n_batch;
        raw.n_ubatch = params.n_batch;
        raw.n_threads = params.n_threads;
        raw.n_threads_batch = params.n_threads;
        raw.embeddings = params.embeddings;
        raw.offload_kqv = params.offload_kqv;
        let kv_type = if params.f16_kv {
            llama_sys::ggml_type_GGML_TYPE_F16
        } else {
            llama_sys::ggml_type_GGML_TYPE_F32
        };
        raw.type_k = kv_type;
        raw.type_v = kv_type;

        let ctx = unsafe { llama_sys::llama_init_from_model(model.as_ptr(), raw) };
        let ptr = NonNull::new(ctx).ok_or_else(|| {
            LlamaError::ContextCreationFailed("llama_init_from_model returned null".into())
        })?;

        debug!(n_ctx = params.n_ctx, n_batch = params.n_batch, "Context created");
        Ok(Self { ptr, model })
    }

    pub(crate) fn as_ptr(&self) -> *mut llama_sys::llama_context {
        self.ptr.as_ptr()
    }

    pub fn n_ctx(&self) -> u32 {
        unsafe { llama_sys::llama_n_ctx(self.as_ptr()) }
    }

    pub fn set_n_threads(&mut self, n_threads: i32) {
        unsafe { llama_sys::llama_set_n_threads(self.as_ptr(), n_threads, n_threads) }
    }

    //  Evaluation

    pub fn decode(&mut self, batch: &LlamaBatch) -> Result<()> {
        let rc = unsafe { llama_sys::llama_decode(self.as_ptr(), batch.raw()) };
        if rc != 0 {
            return Err(LlamaError::DecodeFailed(rc));
        }
        Ok(())
    }

    /// Evaluate `tokens` at positions `n_past..`, replacing whatever the
    /// KV cache held from `n_past` onwards.
    pub fn eval(&mut self, tokens: &[LlamaToken], n_past: i32) -> Result<()> {
        if tokens.is_empty() {
            return Ok(());
        }
        let max = self.n_ctx() as usize;
        let used = n_past as usize + tokens.len();
        if used > max {
            return Err(LlamaError::ContextWindowExceeded { used, max });
        }

        self.kv_cache_seq_rm(n_past, -1);
        let batch = LlamaBatch::from_tokens(tokens, n_past);
        self.decode(&batch)
    }

    /// Logits of the last token that requested them.
    pub fn logits_last(&self) -> Option<&[f32]> {
        unsafe {
            let p = llama_sys::llama_get_logits_ith(self.as_ptr(), -1);
            if p.is_null() {
                None
            } else {
                Some(std::slice::from_raw_parts(p, self.model.n_vocab() as usize))
            }
        }
    }

    //  KV cache

    /// Drop sequence-0 cells in `[p0, p1)`; `p1 < 0` means "to the end".
    pub fn kv_cache_seq_rm(&mut self, p0: i32, p1: i32) -> bool {
        unsafe {
            let mem = llama_sys::llama_get_memory(self.as_ptr());
            if mem.is_null() {
                return false;
            }
            llama_sys::llama_memory_seq_rm(mem, 0, p0, p1)
        }
    }

    //  Performance

    pub fn perf(&self) -> PerfData {
        let d = unsafe { llama_sys::llama_perf_context(self.as_ptr()) };
        PerfData {
            t_load_ms: d.t_load_ms,
            t_p_eval_ms: d.t_p_eval_ms,
            t_eval_ms: d.t_eval_ms,
            n_p_eval: d.n_p_eval,
            n_eval: d.n_eval,
        }
    }

    pub fn perf_reset(&mut self) {
        unsafe { llama_sys::llama_perf_context_reset(self.as_ptr()) }
    }
}

impl Drop for LlamaContext {
    fn drop(&mut self) {
        debug!("Freeing llama context");
        unsafe { llama_sys::llama_free(self.as_ptr()) }
    }
}

//  ContextParams

#[derive(Debug, Clone)]
pub struct ContextParams {
    pub n_ctx: u32,
    pub n_batch: u32,
    pub n_threads: i32,
    pub embeddings: bool,
    /// Keep the KV cache in f16 instead of f32.
    pub f16_kv: bool,
    /// Offload the KV cache to the GPU along with the layers.
    pub offload_kqv: bool,
}

impl Default for ContextParams {
    fn default() -> Self {
        let threads = std::thread::available_parallelism()
            .map(|n| n.get() as i32)
            .unwrap_or(4);
        Self {
            n_ctx: 512,
            n_batch: 512,
            n_threads: threads,
            embeddings: false,
            f16_kv: true,
            offload_kqv: true,
        }
    }
}

//  PerfData

#[derive(Debug, Clone, Default)]
pub struct PerfData {
    pub t_load_ms: f64,
    pub t_p_eval_ms: f64,
    pub t_eval_ms: f64,
    pub n_p_eval: i32,
    pub n_eval: i32,
}
