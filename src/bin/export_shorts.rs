#![forbid(unsafe_code)]

//! Batch entrypoint: reads the configured channel URL list, collects every
//! short-form video per channel through the YouTube Data API and writes one
//! CSV per channel to local disk or Cloud Storage.

use anyhow::Result;
use clap::Parser;
use log::{error, info};
use shorts_tools::config::{self, SettingsOverrides, StorageMode};
use shorts_tools::gcp;
use shorts_tools::pipeline::ChannelPipeline;
use shorts_tools::storage::{GcsStorage, LocalStorage, Storage};
use shorts_tools::youtube::YouTubeClient;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

/// Exports every short-form video of the configured channels as CSV.
#[derive(Debug, Parser)]
#[command(name = "export_shorts", version)]
struct Cli {
    /// Path to the .env file holding the runtime configuration.
    #[arg(long)]
    env_file: Option<PathBuf>,
    /// Overrides LOCAL_INPUT_PATH.
    #[arg(long)]
    input: Option<PathBuf>,
    /// Overrides LOCAL_OUTPUT_PATH.
    #[arg(long)]
    output: Option<PathBuf>,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("fatal: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let settings = config::resolve_settings(SettingsOverrides {
        env_path: cli.env_file,
        input_path: cli.input,
        output_path: cli.output,
    })?;

    info!("=== short-video channel export started ===");

    let (api_key, storage): (String, Box<dyn Storage>) = match settings.storage_mode {
        StorageMode::Local => (
            settings.require_api_key()?.to_string(),
            Box::new(LocalStorage::new(
                &settings.input_path,
                &settings.output_path,
            )?),
        ),
        StorageMode::Cloud => {
            let agent = ureq::AgentBuilder::new()
                .timeout(Duration::from_secs(30))
                .build();
            let token = gcp::fetch_access_token(&agent)?;
            let api_key = match settings.api_key.as_deref() {
                Some(key) if !key.is_empty() => key.to_string(),
                _ => gcp::access_secret(
                    &agent,
                    &token,
                    settings.require_project()?,
                    &settings.secret_name,
                )?,
            };
            (
                api_key,
                Box::new(GcsStorage::new(agent, token, settings.require_bucket()?)),
            )
        }
    };

    let client = YouTubeClient::new(&api_key);
    let pipeline = ChannelPipeline::new(&client, storage.as_ref());
    let summary = pipeline.run()?;

    info!(
        "=== export finished: {} succeeded, {} failed ===",
        summary.succeeded, summary.failed
    );
    Ok(())
}
