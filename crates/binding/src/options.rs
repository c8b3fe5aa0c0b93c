//! Host-facing parameter sets for model loading and prediction.
//!
//! Both structs deserialize from JSON with per-field defaults, and the flat
//! C entry points build them field by field through the `parse_*` helpers.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::engine::Token;
use crate::error::{BindingError, Result};

//  ModelOptions

/// Arguments of `load_model`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelOptions {
    pub model_path: PathBuf,
    #[serde(default = "default_context_size")]
    pub context_size: u32,
    #[serde(default = "default_seed")]
    pub seed: i32,
    #[serde(default = "default_true")]
    pub f16_memory: bool,
    #[serde(default)]
    pub mlock: bool,
    #[serde(default)]
    pub embeddings: bool,
    #[serde(default = "default_true")]
    pub mmap: bool,
    #[serde(default)]
    pub low_vram: bool,
    #[serde(default)]
    pub vocab_only: bool,
    #[serde(default)]
    pub n_gpu_layers: i32,
    #[serde(default = "default_n_batch")]
    pub n_batch: i32,
    #[serde(default)]
    pub main_gpu: Option<i32>,
    #[serde(default)]
    pub tensor_split: Vec<f32>,
    #[serde(default)]
    pub numa: bool,
}

impl ModelOptions {
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            context_size: default_context_size(),
            seed: default_seed(),
            f16_memory: true,
            mlock: false,
            embeddings: false,
            mmap: true,
            low_vram: false,
            vocab_only: false,
            n_gpu_layers: 0,
            n_batch: default_n_batch(),
            main_gpu: None,
            tensor_split: Vec::new(),
            numa: false,
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

//  PredictOptions

/// One inference session's configuration (`llama_allocate_params`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictOptions {
    #[serde(default)]
    pub prompt: String,
    /// `<= 0` seeds from the clock.
    #[serde(default = "default_seed")]
    pub seed: i32,
    /// `<= 0` uses every available core.
    #[serde(default = "default_threads")]
    pub threads: i32,
    /// Tokens to generate; negative = until EOS or a stop word.
    #[serde(default = "default_tokens")]
    pub tokens: i32,
    #[serde(default = "default_top_k")]
    pub top_k: i32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_temp")]
    pub temp: f32,
    #[serde(default = "default_repeat_penalty")]
    pub repeat_penalty: f32,
    #[serde(default = "default_repeat_last_n")]
    pub repeat_last_n: i32,
    #[serde(default)]
    pub ignore_eos: bool,
    #[serde(default = "default_true")]
    pub memory_f16: bool,
    #[serde(default = "default_n_batch")]
    pub n_batch: i32,
    /// Prompt tokens kept across a context swap; negative = whole prompt.
    #[serde(default)]
    pub n_keep: i32,
    #[serde(default)]
    pub antiprompt: Vec<String>,
    #[serde(default = "default_one")]
    pub tfs_z: f32,
    #[serde(default = "default_one")]
    pub typical_p: f32,
    #[serde(default)]
    pub frequency_penalty: f32,
    #[serde(default)]
    pub presence_penalty: f32,
    /// 0 = off, 1 = mirostat, 2 = mirostat v2.
    #[serde(default)]
    pub mirostat: i32,
    #[serde(default = "default_mirostat_eta")]
    pub mirostat_eta: f32,
    #[serde(default = "default_mirostat_tau")]
    pub mirostat_tau: f32,
    #[serde(default = "default_true")]
    pub penalize_nl: bool,
    #[serde(default)]
    pub logit_bias: HashMap<Token, f32>,
    #[serde(default)]
    pub session_file: Option<PathBuf>,
    #[serde(default)]
    pub prompt_cache_all: bool,
    #[serde(default)]
    pub prompt_cache_ro: bool,
    #[serde(default)]
    pub mlock: bool,
    #[serde(default = "default_true")]
    pub mmap: bool,
    #[serde(default)]
    pub main_gpu: Option<i32>,
    #[serde(default)]
    pub tensor_split: Vec<f32>,
}

impl Default for PredictOptions {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            seed: default_seed(),
            threads: default_threads(),
            tokens: default_tokens(),
            top_k: default_top_k(),
            top_p: default_top_p(),
            temp: default_temp(),
            repeat_penalty: default_repeat_penalty(),
            repeat_last_n: default_repeat_last_n(),
            ignore_eos: false,
            memory_f16: true,
            n_batch: default_n_batch(),
            n_keep: 0,
            antiprompt: Vec::new(),
            tfs_z: 1.0,
            typical_p: 1.0,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            mirostat: 0,
            mirostat_eta: default_mirostat_eta(),
            mirostat_tau: default_mirostat_tau(),
            penalize_nl: true,
            logit_bias: HashMap::new(),
            session_file: None,
            prompt_cache_all: false,
            prompt_cache_ro: false,
            mlock: false,
            mmap: true,
            main_gpu: None,
            tensor_split: Vec::new(),
        }
    }
}

impl PredictOptions {
    pub fn from_json(json: &str) -> Result<Self> {
        let opts: Self = serde_json::from_str(json)?;
        Ok(opts.normalized())
    }

    /// Clamp values the loop cannot run with and drop empty paths/stop words.
    pub fn normalized(mut self) -> Self {
        self.n_batch = self.n_batch.max(1);
        if self
            .session_file
            .as_ref()
            .is_some_and(|p| p.as_os_str().is_empty())
        {
            self.session_file = None;
        }
        self.antiprompt.retain(|s| !s.is_empty());
        self
    }

    /// Thread count handed to the engine.
    pub fn effective_threads(&self) -> i32 {
        if self.threads > 0 {
            return self.threads;
        }
        std::thread::available_parallelism()
            .map(|n| n.get() as i32)
            .unwrap_or(4)
    }
}

//  Flat-argument parsers

/// `""` → engine default, otherwise a device index.
pub fn parse_main_gpu(s: &str) -> Result<Option<i32>> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(None);
    }
    s.parse::<i32>()
        .map(Some)
        .map_err(|e| BindingError::InvalidOption {
            field: "main_gpu",
            reason: format!("'{s}': {e}"),
        })
}

/// Proportions separated by runs of `,` or `/`, e.g. `"3,1"` or `"0.6/0.4"`.
pub fn parse_tensor_split(s: &str) -> Result<Vec<f32>> {
    s.split([',', '/'])
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<f32>().map_err(|e| BindingError::InvalidOption {
                field: "tensor_split",
                reason: format!("'{part}': {e}"),
            })
        })
        .collect()
}

/// `<token><sign><value>`, e.g. `"15043+1"` or `"15043 - 1.5"`.
///
/// Text that does not have that shape, including an unparsable value,
/// carries no bias.
pub fn parse_logit_bias(s: &str) -> Option<(Token, f32)> {
    let s = s.trim_start();
    let key_len = s
        .char_indices()
        .take_while(|&(i, c)| c.is_ascii_digit() || (i == 0 && (c == '+' || c == '-')))
        .count();
    let token = s[..key_len].parse::<Token>().ok()?;

    let rest = s[key_len..].trim_start();
    let mut chars = rest.chars();
    let sign = match chars.next() {
        Some('+') => 1.0,
        Some('-') => -1.0,
        _ => return None,
    };
    let value = chars.as_str().trim().parse::<f32>().ok()?;
    Some((token, value * sign))
}

//  serde defaults

fn default_true() -> bool {
    true
}
fn default_one() -> f32 {
    1.0
}
fn default_seed() -> i32 {
    -1
}
fn default_context_size() -> u32 {
    512
}
fn default_threads() -> i32 {
    -1
}
fn default_tokens() -> i32 {
    128
}
fn default_top_k() -> i32 {
    40
}
fn default_top_p() -> f32 {
    0.95
}
fn default_temp() -> f32 {
    0.8
}
fn default_repeat_penalty() -> f32 {
    1.1
}
fn default_repeat_last_n() -> i32 {
    64
}
fn default_n_batch() -> i32 {
    512
}
fn default_mirostat_eta() -> f32 {
    0.1
}
fn default_mirostat_tau() -> f32 {
    5.0
}
