mod cli;

use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    //  Logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,llama_binding=info,llama_core=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = cli::Cli::parse();

    match args.command {
        cli::Commands::Generate(gen_args) => cli::generate::execute(gen_args).await,
        cli::Commands::Eval(eval_args) => cli::eval::execute(eval_args).await,
    }
}
