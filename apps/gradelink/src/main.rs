use clap::Parser;
use gradelink_core::telemetry::logging as logctl;
use gradelink_core::terminal::{app, cli::Cli, error::CliError};
use tracing::debug;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("❌ {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let log_config = cli.logging.to_config();
    logctl::init(&log_config).map_err(|err| CliError::Logging(err.to_string()))?;
    debug!(
        target: "gradelink::cli",
        log_level = ?log_config.level,
        log_file = ?log_config.file,
        "logging configured"
    );
    app::run(cli).await
}
