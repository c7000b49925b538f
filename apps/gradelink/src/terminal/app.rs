use crate::config::Config;
use crate::store::{HttpSessionStore, SharedStore, StoreConfig};
use crate::terminal::cli::{Cli, Command};
use crate::terminal::error::CliError;
use crate::terminal::{accept, demo, open, qr};
use std::sync::Arc;
use tracing::debug;

pub async fn run(cli: Cli) -> Result<(), CliError> {
    let config = Config::from_env()?
        .with_session_store(Some(cli.session_store))
        .with_access_token(cli.access_token);
    debug!(
        target: "gradelink::cli",
        session_store = %config.session_store,
        access_token = config.access_token.is_some(),
        poll_interval_ms = config.poll_interval.as_millis() as u64,
        "configuration loaded"
    );

    match cli.command {
        Command::Open(args) => open::run(&config, http_store(&config)?, args).await,
        Command::Accept(args) => accept::run(http_store(&config)?, args).await,
        Command::Qr(args) => qr::run(args),
        Command::Demo(args) => demo::run(&config, args).await,
    }
}

fn http_store(config: &Config) -> Result<SharedStore, CliError> {
    let store_config =
        StoreConfig::new(&config.session_store)?.with_access_token(config.access_token.clone());
    Ok(Arc::new(HttpSessionStore::new(store_config)?))
}
