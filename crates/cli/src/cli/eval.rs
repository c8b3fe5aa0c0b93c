use llama_binding::{NativeEngine, PredictOptions, eval};
use tracing::info;

use crate::cli::{EvalArgs, read_stdin};

pub async fn execute(args: EvalArgs) -> anyhow::Result<()> {
    let text = match args.prompt {
        Some(p) => p,
        None => read_stdin()?,
    };
    let model_opts = args.model.to_options()?;
    let opts = PredictOptions {
        threads: args.threads,
        ..Default::default()
    };

    info!(model = %model_opts.model_path.display(), "Loading model…");
    tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        let mut engine = NativeEngine::load(&model_opts)?;
        eval(&mut engine, &opts, &text)?;
        Ok(())
    })
    .await??;

    println!("ok");
    Ok(())
}
