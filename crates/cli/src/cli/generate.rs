use std::io::{self, Write};

use llama_binding::{NativeEngine, PredictOptions, Prediction, predict};
use tokio::sync::mpsc;
use tracing::info;

use crate::cli::{GenerateArgs, read_stdin};

/// Options file (or defaults) with the command-line overrides applied.
fn build_options(args: &GenerateArgs) -> anyhow::Result<PredictOptions> {
    let mut opts = match &args.options {
        Some(path) => PredictOptions::from_json(&std::fs::read_to_string(path)?)?,
        None => PredictOptions::default(),
    };
    if let Some(prompt) = &args.prompt {
        opts.prompt = prompt.clone();
    }
    opts.threads = args.threads;
    if let Some(tokens) = args.tokens {
        opts.tokens = tokens;
    }
    if let Some(temp) = args.temp {
        opts.temp = temp;
    }
    if let Some(seed) = args.seed {
        opts.seed = seed;
    }
    opts.antiprompt.extend(args.stop.iter().cloned());
    if let Some(session) = &args.session {
        opts.session_file = Some(session.clone());
    }
    Ok(opts.normalized())
}

pub async fn execute(args: GenerateArgs) -> anyhow::Result<()> {
    let mut opts = build_options(&args)?;
    if opts.prompt.is_empty() && opts.session_file.is_none() {
        opts.prompt = read_stdin()?;
    }
    let model_opts = args.model.to_options()?;

    info!(model = %model_opts.model_path.display(), "Loading model…");

    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(64);
    let debug = args.debug;

    // The loop is blocking; pieces come back over the channel.
    let task = tokio::task::spawn_blocking(move || -> anyhow::Result<Prediction> {
        let mut engine = NativeEngine::load(&model_opts)?;
        let prediction = predict(&mut engine, &opts, debug, |piece| {
            tx.blocking_send(piece.to_vec()).is_ok()
        })?;
        Ok(prediction)
    });

    let mut stdout = io::stdout();
    while let Some(piece) = rx.recv().await {
        stdout.write_all(&piece)?;
        stdout.flush()?;
    }

    let prediction = task.await??;
    println!();
    eprintln!(
        "  [{} | prompt: {} tok, gen: {} tok]",
        prediction.finish_reason, prediction.prompt_tokens, prediction.completion_tokens
    );
    Ok(())
}
