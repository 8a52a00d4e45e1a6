//! Video transcoding command-line binary.

use std::process::ExitCode;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use v4w_models::{FileState, FileStatus};
use v4w_worker::{metrics, video_settings_from_env, WorkerConfig, WorkerPool};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Colored output for terminals, JSON when LOG_FORMAT=json
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("v4w=info,v4w_worker=info,v4w_media=info"))
        .context("invalid log filter")?;

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    let inputs: Vec<std::path::PathBuf> = std::env::args_os().skip(1).map(Into::into).collect();
    if inputs.is_empty() {
        eprintln!("usage: v4w <video file>...");
        return Ok(ExitCode::from(2));
    }

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    if let Some(addr) = config.metrics_addr {
        metrics::init_metrics(addr)?;
        info!("Serving metrics on {}", addr);
    }

    let settings = video_settings_from_env();
    info!("Video settings: {:?}", settings);

    let pool = WorkerPool::from_config(config);
    pool.submit_all(&inputs, &settings)
        .context("failed to submit files")?;

    tokio::select! {
        _ = pool.wait_idle() => {}
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Received shutdown signal");
            pool.shutdown_all().await;
        }
    }

    let statuses = pool.statuses();
    if std::env::var("V4W_SUMMARY").map(|v| v.eq_ignore_ascii_case("json")).unwrap_or(false) {
        println!("{}", serde_json::to_string_pretty(&statuses)?);
    } else {
        for status in &statuses {
            println!("{}", summary_line(status));
        }
    }

    let failed = statuses.iter().any(|s| s.state == FileState::Failed);
    Ok(if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn summary_line(status: &FileStatus) -> String {
    match status.state {
        FileState::Completed => format!(
            "{:<40} {:<18} {:>10} -> {:>10} ({})",
            status.file_name,
            status.state.label(),
            status.original_size_formatted(),
            status.output_size_formatted(),
            status.savings_formatted()
        ),
        FileState::Failed => format!(
            "{:<40} {:<18} {}",
            status.file_name,
            status.state.label(),
            status.error.as_deref().unwrap_or("")
        ),
        _ => format!("{:<40} {}", status.file_name, status.state.label()),
    }
}
