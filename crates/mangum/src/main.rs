use anyhow::Result;
use clap::Parser;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

mod aws;
mod build;
mod cli;
mod config;
mod error;
mod package;
mod project;
mod stack;
mod state;
mod template;

fn setup_logging(verbosity: u8) {
    let level = match verbosity {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    // RUST_LOG wins over -v; otherwise the AWS SDK crates stay at warn.
    let filter = match std::env::var("RUST_LOG") {
        Ok(_) => EnvFilter::from_default_env(),
        Err(_) => EnvFilter::new(format!("{level},aws_config=warn,aws_smithy_runtime=warn")),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cmd = cli::RootCmd::parse();
    setup_logging(cmd.verbose);
    cli::run(cmd).await
}
