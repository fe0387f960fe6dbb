mod cli;
mod web;

use crate::cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    Cli::parse_args().run().await
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(env_filter).try_init();
}
