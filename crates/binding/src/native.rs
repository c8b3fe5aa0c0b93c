//! [`Engine`] backed by llama.cpp through `llama-core`.

use std::path::Path;
use std::sync::Arc;

use llama_core::{
    ContextParams, LlamaBackend, LlamaContext, LlamaModel, ModelParams, NumaStrategy,
};
use tracing::{debug, info};

use crate::engine::{Engine, Timings, Token};
use crate::error::Result;
use crate::options::ModelOptions;

/// A loaded model plus the one context the host drives.
pub struct NativeEngine {
    model: Arc<LlamaModel>,
    ctx: LlamaContext,
    n_ctx: usize,
}

impl NativeEngine {
    /// Initialize the backend (once per process), load the model and create
    /// its context.
    pub fn load(opts: &ModelOptions) -> Result<Self> {
        let backend = LlamaBackend::init();
        backend.numa_init(NumaStrategy::from(opts.numa));

        let model_params = ModelParams {
            n_gpu_layers: opts.n_gpu_layers,
            use_mmap: opts.mmap,
            use_mlock: opts.mlock,
            vocab_only: opts.vocab_only,
            main_gpu: opts.main_gpu,
            tensor_split: opts.tensor_split.clone(),
        };
        let model = Arc::new(LlamaModel::load_from_file(
            &backend,
            &opts.model_path,
            &model_params,
        )?);

        let ctx_params = ContextParams {
            n_ctx: opts.context_size,
            n_batch: opts.n_batch.max(1) as u32,
            embeddings: opts.embeddings,
            f16_kv: opts.f16_memory,
            offload_kqv: !opts.low_vram,
            ..Default::default()
        };
        let ctx = LlamaContext::new(Arc::clone(&model), &ctx_params)?;
        let n_ctx = ctx.n_ctx() as usize;

        debug!(seed = opts.seed, "model seed is not used; predictions seed their own sampler");
        debug!(system_info = %backend.system_info(), "llama.cpp system info");
        info!(n_ctx, n_train = model.n_ctx_train(), "Context ready");
        Ok(Self { model, ctx, n_ctx })
    }
}

impl Engine for NativeEngine {
    fn n_ctx(&self) -> usize {
        self.n_ctx
    }

    fn token_bos(&self) -> Token {
        self.model.token_bos()
    }

    fn token_eos(&self) -> Token {
        self.model.token_eos()
    }

    fn token_nl(&self) -> Token {
        self.model.token_nl()
    }

    fn tokenize(&self, text: &str, add_bos: bool) -> Result<Vec<Token>> {
        Ok(llama_core::tokenize(self.model.vocab(), text, add_bos, false)?)
    }

    fn token_to_piece(&self, token: Token) -> Vec<u8> {
        llama_core::token_to_piece(self.model.vocab(), token)
    }

    fn eval(&mut self, tokens: &[Token], n_past: usize, n_threads: i32) -> Result<()> {
        self.ctx.set_n_threads(n_threads);
        Ok(self.ctx.eval(tokens, n_past as i32)?)
    }

    fn logits(&self) -> &[f32] {
        self.ctx.logits_last().unwrap_or(&[])
    }

    fn load_session(&mut self, path: &Path, capacity: usize) -> Result<Vec<Token>> {
        Ok(self.ctx.load_session_file(path, capacity)?)
    }

    fn save_session(&mut self, path: &Path, tokens: &[Token]) -> Result<()> {
        Ok(self.ctx.save_session_file(path, tokens)?)
    }

    fn timings(&self) -> Timings {
        let perf = self.ctx.perf();
        Timings {
            prompt_ms: perf.t_p_eval_ms,
            prompt_tokens: perf.n_p_eval,
            eval_ms: perf.t_eval_ms,
            eval_tokens: perf.n_eval,
        }
    }

    fn reset_timings(&mut self) {
        self.ctx.perf_reset();
    }
}
