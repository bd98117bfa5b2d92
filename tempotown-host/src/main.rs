//! Minimal host harness.
//!
//! Loads a config file, starts the Tempotown hook, prints any feedback the
//! orchestrator pushes, and shuts down cleanly on Ctrl-C. There is no real
//! message stream here, so status projection stays disabled.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use tempotown_host::{Hook, HostConfig, TempotownHook, HOOK_NAME};

#[derive(Debug, Parser)]
#[command(name = "tempotown-host", about = "Run the Tempotown hook against an orchestrator")]
struct Args {
    /// Path to the host config JSON.
    #[arg(long, default_value = "tempotown.json")]
    config: PathBuf,

    /// Override the orchestrator endpoint from the config file.
    #[arg(long)]
    endpoint: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut config = if args.config.exists() {
        match HostConfig::from_file(&args.config) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("{err}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        HostConfig::default()
    };

    if let Some(endpoint) = args.endpoint {
        let section = config
            .plugins
            .entry(HOOK_NAME.to_string())
            .or_insert_with(|| serde_json::json!({}));
        if let Some(section) = section.as_object_mut() {
            section.insert(
                "endpoint".to_string(),
                serde_json::Value::String(endpoint),
            );
        }
    }

    let hook = match TempotownHook::from_config(&config, None) {
        Ok(Some(hook)) => Arc::new(hook),
        Ok(None) => {
            tracing::info!("no endpoint configured, nothing to do");
            return ExitCode::SUCCESS;
        }
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };

    let printer = hook.take_feedback().map(|mut feedback| {
        tokio::spawn(async move {
            while let Some(item) = feedback.recv().await {
                println!("[{}] {}", item.source, item.message);
            }
        })
    });

    let runner = {
        let hook = Arc::clone(&hook);
        tokio::spawn(async move { hook.start().await })
    };

    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("shutting down");
    }
    if let Err(err) = hook.stop().await {
        eprintln!("{err}");
    }
    let _ = runner.await;
    if let Some(printer) = printer {
        let _ = printer.await;
    }

    ExitCode::SUCCESS
}
