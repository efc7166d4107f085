//! CLI entry point for the transfer queue tool.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use transferq_core::EngineConfig;
use tracing::{debug, info};

mod app_config;
mod cli;
mod commands;

use cli::{Cli, Command, DEFAULT_DB_PATH};
use commands::AppContext;

/// Overrides the config file's `auth_token`.
const TOKEN_ENV_VAR: &str = "TRANSFERQ_TOKEN";

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let cli = Cli::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?cli, "CLI arguments parsed");

    let ctx = build_context(&cli)?;
    debug!(db = %ctx.db_path.display(), base_url = %ctx.engine.base_url, "context resolved");

    match &cli.command {
        Command::Download(args) => commands::run_download_command(&ctx, args).await?,
        Command::Upload(args) => commands::run_upload_command(&ctx, args).await?,
        Command::Run(args) => {
            let summary = commands::run_transfers_command(&ctx, args).await?;
            if !args.json && !cli.quiet {
                eprintln!(
                    "{} completed, {} failed, {} cancelled, {} retries",
                    summary.completed, summary.failed, summary.cancelled, summary.retried
                );
            }
            if summary.interrupted {
                info!("run interrupted; remaining tasks stay queued");
                return Ok(ExitCode::from(130));
            }
            if summary.failed > 0 {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::List(args) => commands::run_list_command(&ctx, args).await?,
        Command::Pause(task) => commands::run_pause_command(&ctx, task.id).await?,
        Command::Resume(task) => commands::run_resume_command(&ctx, task.id).await?,
        Command::Retry(task) => commands::run_retry_command(&ctx, task.id).await?,
        Command::Cancel(task) => commands::run_cancel_command(&ctx, task.id).await?,
        Command::Clear(args) => commands::run_clear_command(&ctx, args).await?,
    }

    Ok(ExitCode::SUCCESS)
}

/// Layers config file values, then environment, over the engine defaults.
fn build_context(cli: &Cli) -> Result<AppContext> {
    let loaded = app_config::load_file_config(cli.config.as_deref())?;
    let mut engine = EngineConfig::default();
    let mut file_db_path: Option<PathBuf> = None;

    if let Some(file_config) = &loaded.config {
        if let Some(path) = &loaded.path {
            debug!(path = %path.display(), "applying config file");
        }
        file_config.apply_to(&mut engine);
        file_db_path.clone_from(&file_config.database_path);
    }

    if let Ok(token) = std::env::var(TOKEN_ENV_VAR)
        && !token.trim().is_empty()
    {
        engine.auth_token = Some(token.trim().to_string());
    }

    let db_path = cli
        .db
        .clone()
        .or(file_db_path)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH));

    Ok(AppContext { db_path, engine })
}
