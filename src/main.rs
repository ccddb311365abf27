//! Sugoi Bridge
//!
//! Command line entry point: resolves a Sugoi installation, supervises its
//! translation server and translates text given on the command line.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{filter::LevelFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use tracing_appender::{non_blocking, rolling};

use sugoi_bridge::cli::{Args, Commands};
use sugoi_bridge::config::Settings;
use sugoi_bridge::endpoint::{EndpointOptions, SugoiEndpoint, TranslateEndpoint};
use sugoi_bridge::install::{self, ModelFamily};

const DEFAULT_CONFIG_FILE: &str = "sugoi-bridge.toml";

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logging to both console and file
    setup_logging(args.verbose)?;

    let mut settings = match &args.config {
        Some(config_path) => Settings::from_file(config_path)?,
        None => {
            if Path::new(DEFAULT_CONFIG_FILE).exists() {
                info!("Found {} in current directory, loading...", DEFAULT_CONFIG_FILE);
                Settings::from_file(DEFAULT_CONFIG_FILE)?
            } else {
                Settings::default()
            }
        }
    };

    if let Some(install_path) = &args.install_path {
        settings.install_path = install_path.to_string_lossy().to_string();
    }

    match args.command {
        Commands::Translate { text, batch } => {
            let endpoint = SugoiEndpoint::initialize(&settings, EndpointOptions::default()).await?;
            persist_settings_delta(args.config.as_deref(), &mut settings, &endpoint);

            let cancel = CancellationToken::new();
            let ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted, cancelling translation");
                    ctrl_c.cancel();
                }
            });

            let mut texts = vec![text];
            texts.extend(batch);

            let outcome = async {
                if !endpoint.is_ready().await {
                    let spinner = ProgressBar::new_spinner();
                    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
                    spinner.set_message("Waiting for the translation server...");
                    spinner.enable_steady_tick(Duration::from_millis(100));
                    let ready = endpoint.before_translate(&cancel).await;
                    spinner.finish_and_clear();
                    ready?;
                }

                let translated = endpoint.translate_texts(&texts, &cancel).await?;
                for line in translated {
                    println!("{}", line);
                }
                anyhow::Ok(())
            }
            .await;

            endpoint.shutdown().await?;
            outcome?;
        }
        Commands::Resolve => {
            let install_root = settings
                .install_root()
                .ok_or_else(|| anyhow::anyhow!("install_path is not configured; set it or pass --install-path"))?;

            let requested = ModelFamily::from_accelerated(settings.enable_ctranslate2);
            let resolution = install::resolve(&install_root, requested)?;

            println!("\nSugoi installation: {}", install_root.display());
            println!("{}", "-".repeat(65));
            println!("{:<22} {}", "Python runtime", resolution.layout.interpreter_path.display());
            println!("{:<22} {}", "Server directory", resolution.layout.working_directory.display());
            println!(
                "{:<22} {}",
                "CTranslate2 model",
                resolution
                    .layout
                    .accelerated_model_path
                    .as_ref()
                    .map(|path| path.display().to_string())
                    .unwrap_or_else(|| "not installed".to_string())
            );
            println!("{:<22} {}", "Fairseq available", resolution.availability.fairseq_available);
            println!("{:<22} {}", "CTranslate2 available", resolution.availability.accelerated_available);
            println!("{:<22} {}", "Model in use", resolution.family);
            if let Some(fallback) = resolution.fallback {
                println!("{:<22} {} -> {}", "Fallback", fallback.requested, fallback.effective);
            }
        }
        Commands::InitConfig { output } => {
            settings.save_to_file(&output)?;
            info!("Configuration written to {}", output.display());
        }
    }

    Ok(())
}

/// Write back the model family chosen by the fallback so it is not repeated next run
fn persist_settings_delta(config_path: Option<&Path>, settings: &mut Settings, endpoint: &SugoiEndpoint) {
    let delta = endpoint.settings_delta();
    if delta.is_empty() {
        return;
    }

    settings.apply(delta);
    let path = config_path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
    if !path.exists() {
        return;
    }

    if let Err(e) = settings.save_to_file(path) {
        warn!("Failed to persist settings to {}: {}", path.display(), e);
    } else {
        info!("Updated {} with the model actually in use", path.display());
    }
}

fn setup_logging(verbose: bool) -> Result<()> {
    // Create log directory
    let log_dir = std::env::current_dir()?.join(".sugoi-bridge").join("log");
    std::fs::create_dir_all(&log_dir)?;

    // Set up file appender with daily rotation
    let file_appender = rolling::daily(&log_dir, "sugoi-bridge.log");
    let (non_blocking_file, guard) = non_blocking(file_appender);
    // Keep the guard alive for the duration of the program
    std::mem::forget(guard);

    let log_level = if verbose { LevelFilter::DEBUG } else { LevelFilter::INFO };

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(true)
        .with_thread_names(true);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false); // No ANSI colors in file

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    Ok(())
}
