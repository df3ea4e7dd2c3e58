//! Briefwire - personal intelligence briefing engine.
//!
//! # Usage
//!
//! ```bash
//! # One-shot briefing, JSON to stdout
//! briefwire --user alice --prompt "what changed in markets"
//!
//! # Apply feedback to a profile
//! briefwire --user alice --feedback "more geopolitics, less crypto"
//!
//! # Resident mode: periodic briefings, SIGHUP reloads scoring config
//! briefwire --user alice --serve --interval-minutes 60
//! ```
//!
//! # Environment Variables
//!
//! - `BRIEFWIRE_CONFIG_DIR`: directory holding pipelines.json / agents.json / personas.json
//! - `RUST_LOG`: logging filter (default: info)

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use briefwire::analytics::AnalyticsWriter;
use briefwire::config::{self, ConfigSet};
use briefwire::Engine;

#[derive(Parser, Debug)]
#[command(name = "briefwire")]
#[command(about = "Personal intelligence briefing engine")]
#[command(version)]
struct CliArgs {
    /// Directory with pipelines.json, agents.json, personas.json
    #[arg(long, env = "BRIEFWIRE_CONFIG_DIR", default_value = "config")]
    config_dir: PathBuf,

    /// User id for the request
    #[arg(long, default_value = "default")]
    user: String,

    /// Briefing prompt
    #[arg(long, default_value = "")]
    prompt: String,

    /// Maximum items in the briefing
    #[arg(long)]
    max_items: Option<usize>,

    /// Apply feedback text to the user's profile instead of briefing
    #[arg(long)]
    feedback: Option<String>,

    /// Stay resident and produce periodic briefings
    #[arg(long)]
    serve: bool,

    /// Interval between briefings in serve mode
    #[arg(long, default_value = "60")]
    interval_minutes: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = CliArgs::parse();

    let configs = ConfigSet::load_dir(&args.config_dir)
        .with_context(|| format!("loading config from {}", args.config_dir.display()))?;

    let analytics = if configs.pipeline.persistence.enabled {
        let dir = PathBuf::from(&configs.pipeline.persistence.state_dir).join("analytics");
        AnalyticsWriter::spawn(dir)
    } else {
        AnalyticsWriter::disabled()
    };

    let engine = Engine::new(configs, analytics);

    if let Some(feedback) = &args.feedback {
        let changes = engine.apply_user_feedback(&args.user, feedback);
        println!("{}", serde_json::to_string_pretty(&changes)?);
        engine.save_state();
        return Ok(());
    }

    if !args.serve {
        let payload = engine
            .handle_request_payload(&args.user, &args.prompt, HashMap::new(), args.max_items)
            .await;
        match payload {
            Ok(payload) => println!("{}", serde_json::to_string_pretty(&payload)?),
            Err(e) => {
                error!(error = %e, "Request failed");
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    serve(engine, args).await
}

/// Resident mode: periodic briefings until SIGINT/SIGTERM; SIGHUP reloads
/// the scoring config. In-flight work completes and state is persisted
/// before exit.
async fn serve(engine: Engine, args: CliArgs) -> Result<()> {
    let shutdown = CancellationToken::new();
    spawn_signal_handlers(shutdown.clone(), args.config_dir.clone());

    let interval = std::time::Duration::from_secs(args.interval_minutes.max(1) * 60);
    info!(
        user = %args.user,
        interval_minutes = args.interval_minutes,
        "Serve mode started"
    );

    loop {
        match engine
            .handle_request_payload(&args.user, &args.prompt, HashMap::new(), args.max_items)
            .await
        {
            Ok(payload) => info!(
                items = payload.items.len(),
                briefing_type = %payload.briefing_type,
                "Briefing generated"
            ),
            Err(e) => warn!(error = %e, "Briefing failed"),
        }

        tokio::select! {
            () = shutdown.cancelled() => break,
            () = tokio::time::sleep(interval) => {}
        }
    }

    info!("Shutting down: persisting state");
    engine.save_state();
    Ok(())
}

fn spawn_signal_handlers(shutdown: CancellationToken, config_dir: PathBuf) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        tokio::spawn(async move {
            let mut sighup = match signal(SignalKind::hangup()) {
                Ok(s) => s,
                Err(e) => {
                    warn!(error = %e, "SIGHUP handler unavailable");
                    return;
                }
            };
            loop {
                sighup.recv().await;
                // Reload scoring config; a bad file keeps the old config.
                match ConfigSet::load_dir(&config_dir) {
                    Ok(reloaded) => {
                        config::swap_scoring(reloaded.pipeline.scoring.clone());
                        info!("Scoring config reloaded on SIGHUP");
                    }
                    Err(e) => error!(error = %e, "Config reload failed, keeping previous config"),
                }
            }
        });

        tokio::spawn(async move {
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    warn!(error = %e, "SIGTERM handler unavailable");
                    return;
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
            info!("Shutdown signal received");
            shutdown.cancel();
        });
    }

    #[cfg(not(unix))]
    {
        let _ = config_dir;
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown signal received");
                shutdown.cancel();
            }
        });
    }
}
