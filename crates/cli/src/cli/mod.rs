pub mod eval;
pub mod generate;

use std::io::Read;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use llama_binding::ModelOptions;
use llama_binding::options::{parse_main_gpu, parse_tensor_split};

#[derive(Parser)]
#[command(
    name = "llama-binding",
    version,
    about = "Run llama.cpp inference sessions through the C binding's loop"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate text from a prompt, streaming tokens to stdout.
    Generate(GenerateArgs),

    /// Evaluate a prompt and report whether it succeeded.
    Eval(EvalArgs),
}

//  Argument structs

#[derive(Debug, clap::Args, Clone)]
pub struct ModelArgs {
    /// Path to a GGUF model file.
    #[arg(short, long, env = "LLAMA_MODEL")]
    pub model: PathBuf,

    /// Context size in tokens.
    #[arg(long, default_value_t = 512)]
    pub ctx_size: u32,

    /// GPU layers (-1 = all, 0 = CPU only).
    #[arg(long, default_value_t = 0)]
    pub n_gpu_layers: i32,

    /// Logical batch size for prompt evaluation.
    #[arg(long, default_value_t = 512)]
    pub batch_size: i32,

    /// Lock the model in memory.
    #[arg(long)]
    pub mlock: bool,

    /// Read the model instead of memory-mapping it.
    #[arg(long)]
    pub no_mmap: bool,

    /// Keep the KV cache off the GPU.
    #[arg(long)]
    pub low_vram: bool,

    #[arg(long)]
    pub numa: bool,

    /// Device for scratch buffers and small tensors.
    #[arg(long, default_value = "")]
    pub main_gpu: String,

    /// Per-device model proportions, e.g. "3,1".
    #[arg(long, default_value = "")]
    pub tensor_split: String,
}

impl ModelArgs {
    pub fn to_options(&self) -> anyhow::Result<ModelOptions> {
        Ok(ModelOptions {
            context_size: self.ctx_size,
            n_gpu_layers: self.n_gpu_layers,
            n_batch: self.batch_size,
            mlock: self.mlock,
            mmap: !self.no_mmap,
            low_vram: self.low_vram,
            numa: self.numa,
            main_gpu: parse_main_gpu(&self.main_gpu)?,
            tensor_split: parse_tensor_split(&self.tensor_split)?,
            ..ModelOptions::new(&self.model)
        })
    }
}

#[derive(Debug, clap::Args, Clone)]
pub struct GenerateArgs {
    #[command(flatten)]
    pub model: ModelArgs,

    /// Prompt text; read from stdin when absent here and in --options.
    #[arg(short, long)]
    pub prompt: Option<String>,

    /// JSON file of prediction options; flags override its fields.
    #[arg(long)]
    pub options: Option<PathBuf>,

    /// Worker threads (-1 = all CPUs).
    #[arg(short, long, default_value_t = -1, allow_negative_numbers = true)]
    pub threads: i32,

    /// Tokens to generate (-1 = until EOS or a stop word).
    #[arg(short = 'n', long, allow_negative_numbers = true)]
    pub tokens: Option<i32>,

    #[arg(long)]
    pub temp: Option<f32>,

    #[arg(long, allow_negative_numbers = true)]
    pub seed: Option<i32>,

    /// Stop when this text is generated (can be repeated).
    #[arg(long = "stop")]
    pub stop: Vec<String>,

    /// Prompt cache file, created on first use.
    #[arg(long)]
    pub session: Option<PathBuf>,

    /// Log timings after generation.
    #[arg(long)]
    pub debug: bool,
}

#[derive(Debug, clap::Args, Clone)]
pub struct EvalArgs {
    #[command(flatten)]
    pub model: ModelArgs,

    /// Text to evaluate; read from stdin when absent.
    #[arg(short, long)]
    pub prompt: Option<String>,

    #[arg(short, long, default_value_t = -1, allow_negative_numbers = true)]
    pub threads: i32,
}

fn read_stdin() -> anyhow::Result<String> {
    let mut buf = String::new();
    std::io::stdin().read_to_string(&mut buf)?;
    Ok(buf)
}
