// src/main.rs

//! The main entry point for the hostctl node agent.

use std::env;
use std::sync::Arc;

use anyhow::Result;
use hostctl::config::Config;
use hostctl::core::errors::HostctlError;
use hostctl::server;
use tracing::error;
use tracing_appender::rolling;
use tracing_subscriber::{filter::EnvFilter, prelude::*, reload};

#[tokio::main]
async fn main() -> Result<()> {
    run_app().await
}

async fn run_app() -> Result<()> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    let args: Vec<String> = env::args().collect();

    if args.contains(&"--version".to_string()) {
        println!("hostctl version {VERSION}");
        return Ok(());
    }

    let config_path = args
        .iter()
        .position(|arg| arg == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
        .unwrap_or("main.yaml");

    let config = match Config::from_file(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration from \"{config_path}\": {e}");
            std::process::exit(e.exit_code());
        }
    };

    let initial_log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    let (filter, reload_handle) = reload::Layer::new(EnvFilter::new(initial_log_level));

    let file_appender = if config.log_rotate_daily {
        rolling::daily(&config.log_directory, "hostctl.log")
    } else {
        rolling::never(&config.log_directory, "hostctl.log")
    };
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().compact().with_ansi(true))
        .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(non_blocking))
        .init();

    let reload_handle = Arc::new(reload_handle);

    if let Err(e) = server::run(config, reload_handle).await {
        error!("node runtime error: {}", e);
        let code = e.downcast_ref::<HostctlError>().map(HostctlError::exit_code).unwrap_or(-1);
        std::process::exit(code);
    }

    Ok(())
}
