//! CodeScope application binary - composition root.
//!
//! 1. Parse CLI arguments and load configuration from TOML
//! 2. Open the local SQLite conversation store
//! 3. Connect the HTTP backend client
//! 4. Optionally open (index) a repository
//! 5. Run the interactive terminal session

mod cli;
mod repl;

use std::sync::Arc;

use clap::Parser;

use codescope_chat::AppState;
use codescope_client::HttpBackend;
use codescope_core::config::{expand_home, CodeScopeConfig};
use codescope_storage::{ConversationStore, Database, SqliteBlobStorage};

use cli::CliArgs;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    let config_file = args.resolve_config_path();
    let mut config = CodeScopeConfig::load_or_default(&config_file);
    config.backend.base_url = args.resolve_server(&config.backend.base_url);
    if let Some(dir) = args.resolve_data_dir() {
        config.general.data_dir = dir;
    }
    let log_level = args.resolve_log_level(&config.general.log_level);

    // Logs go to stderr; stdout carries the transcript.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .init();

    tracing::info!("Starting CodeScope v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), "Configuration loaded");

    // Storage.
    let data_dir = expand_home(&config.general.data_dir);
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::error!(path = %data_dir.display(), error = %e, "Failed to create data directory");
        return Err(e.into());
    }

    let db_path = data_dir.join("codescope.db");
    let db = Arc::new(Database::new(&db_path)?);
    tracing::info!(path = %db_path.display(), "SQLite database opened");

    let store = Arc::new(ConversationStore::open_with_recovery(Arc::new(
        SqliteBlobStorage::new(db),
    ))?);

    // Backend.
    let backend = Arc::new(HttpBackend::new(&config.backend)?);
    tracing::info!(base_url = backend.base_url(), "Backend client ready");

    let repo = args.repo.clone();
    let state = AppState::new(config, store, backend);

    if let Some(repo) = repo {
        match state.open_repository(&repo).await {
            Ok(summary) => println!("{}", summary.message),
            Err(e) => {
                tracing::warn!(repo_path = %repo, error = %e, "Failed to open repository");
                println!("error: {}", e);
            }
        }
    }

    repl::run(state).await?;

    tracing::info!("CodeScope session ended");
    Ok(())
}
