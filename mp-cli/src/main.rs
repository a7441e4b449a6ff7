use clap::Parser;
use mp_cli::app::{Cli, run};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        match err.downcast_ref::<mp_core::Error>() {
            Some(e) => eprintln!("{}: {}", e.code(), e),
            None => eprintln!("error: {err}"),
        }
        std::process::exit(1);
    }
}
