//! `mediahook-dl` binary: one batch run per invocation
//!
//! Usage: `mediahook-dl [config.json]`. Without a config file, settings come from
//! `MEDIAHOOK_*` environment variables (a `.env` file is honored).

use mediahook_dl::config::ENV_URL_FILE;
use mediahook_dl::{Config, Error, FileUrlSource, Orchestrator, run_with_shutdown};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Exit status when the run was stopped by a signal
const EXIT_INTERRUPTED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "mediahook_dl=info".into()),
        )
        .init();

    match run().await {
        Ok(true) => ExitCode::from(EXIT_INTERRUPTED),
        Ok(false) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "run aborted");
            ExitCode::FAILURE
        }
    }
}

/// Returns whether the run was interrupted
async fn run() -> mediahook_dl::Result<bool> {
    let config = match std::env::args_os().nth(1).map(PathBuf::from) {
        Some(path) => Config::from_json_file(&path)?,
        None => Config::from_env()?,
    };

    let url_file = config.url_file.clone().ok_or_else(|| Error::Config {
        message: "no URL file configured".to_string(),
        key: Some(ENV_URL_FILE.to_string()),
    })?;

    let orchestrator = Orchestrator::new(config).await?;
    let summary = run_with_shutdown(orchestrator, &FileUrlSource::new(url_file)).await?;

    tracing::info!(
        skipped = summary.skipped(),
        recorded = summary.recorded(),
        failed = summary.failed(),
        "batch complete"
    );
    Ok(summary.interrupted)
}
