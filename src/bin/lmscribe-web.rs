// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! lmscribe Control Panel
//!
//! Standalone web server for the browser control panel.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

use lmscribe::config::{SettingsStore, SETTINGS_FILE};
use lmscribe::processor::{BatchOptions, RetryPolicy, DEFAULT_CANCEL_POLL, DEFAULT_INTER_FILE_DELAY};
use lmscribe::web::{self, ShellOptions};

#[derive(Parser, Debug)]
#[command(name = "lmscribe-web")]
#[command(author = "Jonathan D. A. Jewell <hyperpolymath>")]
#[command(version = "1.0.0")]
#[command(about = "lmscribe browser control panel")]
struct Args {
    /// Path to the settings file
    #[arg(short, long, default_value = SETTINGS_FILE)]
    settings: PathBuf,

    /// Host to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Seconds to wait between files
    #[arg(long, default_value_t = DEFAULT_INTER_FILE_DELAY.as_secs())]
    delay: u64,

    /// Retry timed-out files once with a longer timeout
    #[arg(long)]
    auto_retry: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Open browser automatically
    #[arg(long)]
    open: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _ = dotenvy::dotenv();

    // Initialize tracing
    let filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("lmscribe control panel v1.0.0");

    let store = SettingsStore::new(&args.settings);
    info!("Settings: {}", store.path().display());

    let options = ShellOptions {
        host: args.host,
        port: args.port,
        batch: BatchOptions {
            inter_file_delay: Duration::from_secs(args.delay),
            cancel_poll: DEFAULT_CANCEL_POLL,
        },
        retry: if args.auto_retry { RetryPolicy::auto() } else { RetryPolicy::Never },
        ..ShellOptions::default()
    };

    // Open browser if requested
    if args.open {
        let url = format!("http://{}:{}", options.host, options.port);
        if let Err(e) = open_browser(&url) {
            error!("Failed to open browser: {}", e);
        }
    }

    let addr = format!("{}:{}", options.host, options.port);
    web::start_server(store, options)
        .await
        .with_context(|| format!("control panel on {} stopped", addr))
}

fn open_browser(url: &str) -> std::io::Result<()> {
    #[cfg(target_os = "linux")]
    {
        std::process::Command::new("xdg-open")
            .arg(url)
            .spawn()?;
    }
    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("open")
            .arg(url)
            .spawn()?;
    }
    #[cfg(target_os = "windows")]
    {
        std::process::Command::new("cmd")
            .args(["/c", "start", url])
            .spawn()?;
    }
    Ok(())
}
