// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! lmscribe: batch-annotate text files with a local LLM
//!
//! Terminal front-end: settings management, prompt listing, connection
//! checks and batch runs that stop cleanly on Ctrl+C.

use async_trait::async_trait;
use clap::{Parser, Subcommand, ValueEnum};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};

use lmscribe::config::{validate_document, Settings, SettingsStore, SETTINGS_FILE};
use lmscribe::inference::{CompletionBackend, DEFAULT_CONNECT_TIMEOUT};
use lmscribe::processor::retry::DEFAULT_RETRY_MULTIPLIER;
use lmscribe::processor::{
    self, extended_timeout, parse_timeout, BatchJob, BatchOptions, BatchOutcome, BatchProcessor,
    CancelToken, RetryDecider, RetryPolicy, DEFAULT_CANCEL_POLL, DEFAULT_INTER_FILE_DELAY,
};
use lmscribe::prompts::{list_prompts, reconcile_selection};
use lmscribe::web::{self, ShellOptions};
use lmscribe::{LmscribeError, Result};

/// lmscribe CLI - prepend local LLM completions to text files
#[derive(Parser, Debug)]
#[command(name = "lmscribe")]
#[command(author = "Jonathan D. A. Jewell <hyperpolymath>")]
#[command(version = "1.0.0")]
#[command(about = "Batch-process text files through a local LLM server", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to the settings file (JSON format)
    #[arg(short, long, default_value = SETTINGS_FILE, global = true)]
    settings: PathBuf,

    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable trace logging (most verbose)
    #[arg(long, global = true)]
    trace: bool,

    /// Suppress non-essential output (quiet mode)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Process every file in the files folder with the selected prompt
    Run(RunArgs),

    /// Check that the inference server answers
    TestConnection {
        /// Server port (overrides settings)
        #[arg(short, long)]
        port: Option<String>,
    },

    /// List prompt files
    Prompts {
        /// Clear a saved selection that no longer exists
        #[arg(long)]
        refresh: bool,
    },

    /// Settings management
    Settings {
        #[command(subcommand)]
        action: SettingsCommands,
    },

    /// Serve the browser control panel
    Web {
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
    },
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Folder holding the files to process
    #[arg(short, long)]
    files_folder: Option<PathBuf>,

    /// Folder holding prompt files
    #[arg(long)]
    prompt_folder: Option<PathBuf>,

    /// Prompt file name inside the prompt folder
    #[arg(short = 'P', long)]
    prompt: Option<String>,

    /// Server port
    #[arg(short, long)]
    port: Option<String>,

    /// Search subfolders
    #[arg(short, long)]
    recursive: bool,

    /// Per-request timeout in seconds (minimum 10)
    #[arg(short, long)]
    timeout: Option<String>,

    /// Seconds to wait between files
    #[arg(long, default_value_t = DEFAULT_INTER_FILE_DELAY.as_secs())]
    delay: u64,

    /// What to do when a request times out
    #[arg(long, value_enum, default_value = "never")]
    retry: RetryMode,

    /// Timeout multiplier for retries
    #[arg(long, default_value_t = DEFAULT_RETRY_MULTIPLIER)]
    multiplier: u32,

    /// Persist the overrides given on the command line
    #[arg(long)]
    save: bool,

    /// Do not probe the server before starting
    #[arg(long)]
    skip_connection_check: bool,
}

impl Default for RunArgs {
    /// What `lmscribe run` gets with no flags
    fn default() -> Self {
        #[derive(Parser)]
        struct Bare {
            #[command(flatten)]
            args: RunArgs,
        }
        Bare::parse_from(["lmscribe"]).args
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
enum RetryMode {
    /// Skip files that time out
    #[default]
    Never,
    /// Retry once automatically
    Auto,
    /// Ask on the terminal
    Ask,
}

#[derive(Subcommand, Debug)]
enum SettingsCommands {
    /// Show current settings
    Show,

    /// Write a default settings file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Validate the settings file
    Validate,

    /// Change and save individual settings
    Set {
        #[arg(long)]
        port: Option<String>,
        #[arg(long)]
        log_prompts: Option<bool>,
        #[arg(long)]
        prompt_folder: Option<PathBuf>,
        #[arg(long)]
        files_folder: Option<PathBuf>,
        #[arg(long)]
        prompt: Option<String>,
        #[arg(long)]
        recursive: Option<bool>,
        #[arg(long)]
        timeout: Option<String>,
    },
}

/// Asks on the terminal whether to retry a timed-out file
struct TerminalRetry {
    multiplier: u32,
}

#[async_trait]
impl RetryDecider for TerminalRetry {
    async fn retry_timeout(&self, file: &Path, timed_out_after: Duration) -> Option<Duration> {
        let longer = extended_timeout(timed_out_after, self.multiplier);
        let question = format!(
            "Request for {} timed out after {}s. Retry with a {}s timeout? [y/N] ",
            file.display(),
            timed_out_after.as_secs(),
            longer.as_secs()
        );

        let answer = tokio::task::spawn_blocking(move || {
            print!("{}", question);
            let _ = std::io::stdout().flush();
            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line).map(|_| line)
        })
        .await;

        match answer {
            Ok(Ok(line)) if is_yes(&line) => Some(longer),
            _ => None,
        }
    }
}

fn is_yes(answer: &str) -> bool {
    let answer = answer.trim();
    answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // .env may supply SERVER_PORT
    let _ = dotenvy::dotenv();

    // Initialize tracing
    let filter = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let store = SettingsStore::new(&cli.settings);

    match cli.command {
        Some(Commands::Run(args)) => run_batch(&store, args).await,
        Some(Commands::TestConnection { port }) => run_test_connection(&store, port).await,
        Some(Commands::Prompts { refresh }) => run_prompts(&store, refresh),
        Some(Commands::Settings { action }) => run_settings_command(&store, action),
        Some(Commands::Web { host, port, delay, auto_retry }) => {
            let options = ShellOptions {
                host,
                port,
                batch: batch_options(delay),
                retry: if auto_retry { RetryPolicy::auto() } else { RetryPolicy::Never },
                connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            };
            web::start_server(store, options).await
        }
        None => run_batch(&store, RunArgs::default()).await,
    }
}

fn batch_options(delay_secs: u64) -> BatchOptions {
    let delay = Duration::from_secs(delay_secs);
    BatchOptions {
        inter_file_delay: delay,
        cancel_poll: DEFAULT_CANCEL_POLL,
    }
}

/// Apply command-line overrides to `settings`
fn apply_overrides(settings: &mut Settings, args: &RunArgs) -> Result<()> {
    if let Some(folder) = &args.files_folder {
        settings.files_folder = folder.clone();
    }
    if let Some(folder) = &args.prompt_folder {
        settings.prompt_folder = folder.clone();
    }
    if let Some(prompt) = &args.prompt {
        settings.selected_prompt = prompt.clone();
    }
    if let Some(port) = &args.port {
        settings.server_port = port.clone();
    }
    if args.recursive {
        settings.recursive_search = true;
    }
    if let Some(raw) = &args.timeout {
        settings.timeout_seconds = parse_timeout(raw)?;
    }
    Ok(())
}

/// Run a batch over the configured files folder
async fn run_batch(store: &SettingsStore, args: RunArgs) -> Result<()> {
    let mut settings = store.load();
    apply_overrides(&mut settings, &args)?;

    // The prompt choice and recursion flag always stick; other overrides only with --save.
    let mut persisted = store.load_with_port_override(None);
    if args.save {
        apply_overrides(&mut persisted, &args)?;
    } else {
        persisted.selected_prompt = settings.selected_prompt.clone();
        persisted.recursive_search = settings.recursive_search;
    }
    if let Err(e) = store.save(&persisted) {
        warn!("Could not save settings: {}", e);
    }

    let job = BatchJob::prepare(&settings)?;

    let retry: Arc<dyn RetryDecider> = match args.retry {
        RetryMode::Never => Arc::new(RetryPolicy::Never),
        RetryMode::Auto => Arc::new(RetryPolicy::Auto { multiplier: args.multiplier }),
        RetryMode::Ask => Arc::new(TerminalRetry { multiplier: args.multiplier }),
    };
    let processor = BatchProcessor::for_endpoint(&job.endpoint, DEFAULT_CONNECT_TIMEOUT)?
        .with_retry(retry)
        .with_options(batch_options(args.delay));

    if !args.skip_connection_check {
        info!("Checking server at {}...", job.endpoint);
        if !processor.backend().test_connection().await {
            return Err(LmscribeError::Setup(format!(
                "Cannot reach the inference server at {}. Is LM Studio running with its server enabled?",
                job.endpoint
            )));
        }
    }

    // Setup graceful shutdown
    let cancel = CancelToken::new();
    let stop = cancel.clone();
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                }
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, stopping after the current step..."),
            _ = terminate => info!("Received SIGTERM, stopping after the current step..."),
        }

        stop.cancel();
    });

    let report = processor
        .run(&job, &cancel, |progress| {
            info!(
                "Progress: {:.0}% ({}/{})",
                progress.percent(),
                progress.completed,
                progress.total
            );
        })
        .await;

    println!();
    match report.outcome {
        BatchOutcome::Completed if report.total == 0 => {
            println!("No .md or .txt files found in the selected folder.");
        }
        BatchOutcome::Completed => println!("Processing complete!"),
        BatchOutcome::Cancelled => println!("Processing stopped."),
    }
    println!("  Files: {}", report.total);
    println!("  Processed: {}", report.completed);
    println!("  Updated: {}", report.succeeded);
    println!("  Failed: {}", report.failures.len());
    for failure in &report.failures {
        println!("    {}: {}", failure.path.display(), failure.error);
    }

    Ok(())
}

/// Probe the configured server
async fn run_test_connection(store: &SettingsStore, port: Option<String>) -> Result<()> {
    let mut settings = store.load();
    settings.apply_port_override(port);
    let endpoint = settings.endpoint();

    if processor::test_connection(&endpoint).await {
        println!("Server at {}: reachable", endpoint);
        Ok(())
    } else {
        Err(LmscribeError::Server(format!("server at {} is not reachable", endpoint)))
    }
}

/// List prompts, optionally clearing a stale selection
fn run_prompts(store: &SettingsStore, refresh: bool) -> Result<()> {
    let mut settings = store.load_with_port_override(None);
    let prompts = list_prompts(&settings.prompt_folder);

    if prompts.is_empty() {
        println!("No prompt files found in the selected folder!");
        return Ok(());
    }

    if refresh && reconcile_selection(&mut settings, &prompts) {
        store.save(&settings)?;
        println!("Saved prompt selection no longer exists; cleared it.");
    }

    println!("Prompts in {}:", settings.prompt_folder.display());
    for name in &prompts {
        let marker = if *name == settings.selected_prompt { "→" } else { " " };
        println!("  {} {}", marker, name);
    }

    Ok(())
}

/// Run settings commands
fn run_settings_command(store: &SettingsStore, action: SettingsCommands) -> Result<()> {
    match action {
        SettingsCommands::Show => {
            let json = serde_json::to_string_pretty(&store.load())?;
            println!("{}", json);
        }
        SettingsCommands::Init { force } => {
            if store.path().exists() && !force {
                return Err(LmscribeError::Config(format!(
                    "{} already exists. Use --force to overwrite",
                    store.path().display()
                )));
            }
            store.save(&Settings::default())?;
            println!("Generated settings at {}", store.path().display());
        }
        SettingsCommands::Validate => {
            let content = std::fs::read_to_string(store.path())?;
            let doc: serde_json::Value = serde_json::from_str(&content)?;
            validate_document(&doc)?;

            let settings = store.read()?;
            println!("Settings at {} are valid", store.path().display());
            println!("  Endpoint: {}", settings.endpoint());
            println!("  Files folder: {}", settings.files_folder.display());
            println!("  Prompt: {}", settings.prompt_path().display());
            if !settings.prompt_path().is_file() {
                warn!("Selected prompt {:?} does not exist", settings.prompt_path());
            }
        }
        SettingsCommands::Set {
            port,
            log_prompts,
            prompt_folder,
            files_folder,
            prompt,
            recursive,
            timeout,
        } => {
            let mut settings = store.load_with_port_override(None);
            if let Some(port) = port {
                settings.server_port = port;
            }
            if let Some(flag) = log_prompts {
                settings.log_prompts = flag;
            }
            if let Some(folder) = prompt_folder {
                settings.prompt_folder = folder;
            }
            if let Some(folder) = files_folder {
                settings.files_folder = folder;
            }
            if let Some(prompt) = prompt {
                settings.selected_prompt = prompt;
            }
            if let Some(flag) = recursive {
                settings.recursive_search = flag;
            }
            if let Some(raw) = timeout {
                settings.timeout_seconds = parse_timeout(&raw)?;
            }
            store.save(&settings)?;
            println!("Settings saved successfully!");
        }
    }

    Ok(())
}
