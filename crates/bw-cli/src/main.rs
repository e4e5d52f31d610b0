//! Command-line host for bundlewatch.
//!
//! Watches one or more directories and prints every stabilized change as a
//! JSON line on stdout, for a downstream deployer to act on.
//!
//! # Usage
//!
//! ```bash
//! bundlewatch [OPTIONS] [COMMAND]
//!
//! # Watch ./load (the default) and print changes
//! bundlewatch
//!
//! # Watch two directories, polling every 500ms
//! bundlewatch --dir /srv/load,/srv/hot --poll 500 --disable-events
//!
//! # Extra watches from a config file, re-read every 30 seconds
//! bundlewatch --config bundlewatch.json watch --reload-secs 30
//!
//! # Print what the startup scan would report, then exit
//! bundlewatch scan
//! ```
//!
//! Each change line looks like
//! `{"watch":"initial","path":"/srv/load/app.jar","exists":true}`;
//! `exists` is `false` when the change is a removal.

#![deny(clippy::all)]
#![warn(missing_docs)]

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use bw_core::{
    expand_initial, resolve_properties, Backend, ChangeSet, Config, Environment, SubdirMode,
    WatchProperties, WatchTarget, DIR, DISABLE_EVENTS, FILTER, POLL, SUBDIR_MODE, TMPDIR,
};
use bw_watcher::{
    build_scanner, ChangeConsumer, Readiness, ReadinessFlag, UpsertOutcome, WatchContext,
    WatchError, WatchRegistry,
};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// =============================================================================
// CLI ARGUMENT TYPES
// =============================================================================

/// Watches directories and reports files once they stop changing.
///
/// Settings not given on the command line are taken from the config file's
/// `initial` section, then from `BUNDLEWATCH_*` environment variables.
#[derive(Parser)]
#[command(name = "bundlewatch", version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Command to execute (defaults to `watch`).
    #[command(subcommand)]
    command: Option<Commands>,

    /// JSON config file with `initial` properties and extra `watches`.
    #[arg(short, long, global = true, env = "BUNDLEWATCH_CONFIG")]
    config: Option<Utf8PathBuf>,

    /// Directory to watch; comma-separate several.
    #[arg(short, long, global = true)]
    dir: Option<String>,

    /// Milliseconds between scans.
    #[arg(short, long, global = true)]
    poll: Option<u64>,

    /// Scratch directory handed to consumers.
    #[arg(long, global = true)]
    tmpdir: Option<Utf8PathBuf>,

    /// Regular expression file names must match.
    #[arg(short, long, global = true)]
    filter: Option<String>,

    /// How subdirectories are handled: none, managed, or all.
    #[arg(long, global = true)]
    subdir_mode: Option<SubdirMode>,

    /// Poll instead of using OS file events.
    #[arg(long, global = true)]
    disable_events: bool,

    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Watch until interrupted, printing changes as JSON lines.
    Watch {
        /// Re-read the config file every N seconds and apply its watches.
        #[arg(long, value_name = "N", value_parser = clap::value_parser!(u64).range(1..))]
        reload_secs: Option<u64>,
    },

    /// Run the startup scan once for every watch and exit.
    Scan,

    /// Print the resolved watch targets as JSON and exit.
    Targets,
}

// =============================================================================
// INITIALIZATION FUNCTIONS
// =============================================================================

/// Initializes the tracing subscriber for logging.
///
/// Respects the `RUST_LOG` environment variable if set. Otherwise, uses
/// `debug` level if `--verbose` is set, or `info` level by default. Logs go
/// to stderr so stdout carries only change lines.
fn init_tracing(verbose: bool, no_color: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if verbose { "debug" } else { "info" };
        EnvFilter::new(format!("{level},notify=warn,mio=warn"))
    });

    let use_ansi = !no_color && std::env::var("NO_COLOR").is_err();

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .with_ansi(use_ansi)
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();
}

/// Reads the config file, if one was given.
fn load_config(cli: &Cli) -> color_eyre::Result<Config> {
    match &cli.config {
        Some(path) => Config::from_file(path)
            .map_err(|e| color_eyre::eyre::eyre!("Cannot load config {path}: {e}")),
        None => Ok(Config::default()),
    }
}

/// Collects the properties given as flags.
fn flag_properties(cli: &Cli) -> WatchProperties {
    let mut props = WatchProperties::new();
    if let Some(dir) = &cli.dir {
        props.insert(DIR.to_owned(), dir.clone());
    }
    if let Some(poll) = cli.poll {
        props.insert(POLL.to_owned(), poll.to_string());
    }
    if let Some(tmpdir) = &cli.tmpdir {
        props.insert(TMPDIR.to_owned(), tmpdir.to_string());
    }
    if let Some(filter) = &cli.filter {
        props.insert(FILTER.to_owned(), filter.clone());
    }
    if let Some(mode) = cli.subdir_mode {
        props.insert(SUBDIR_MODE.to_owned(), mode.to_string());
    }
    if cli.disable_events {
        props.insert(DISABLE_EVENTS.to_owned(), "true".to_owned());
    }
    props
}

/// Resolves the host's own properties: flags, then the config file's
/// `initial` section, then the environment.
fn initial_properties(cli: &Cli, config: &Config) -> WatchProperties {
    let explicit = resolve_properties(&flag_properties(cli), &config.initial);
    resolve_properties(&explicit, &Environment)
}

/// Resolves every configured watch into a target.
fn resolve_targets(
    initial: &WatchProperties,
    watches: &BTreeMap<String, WatchProperties>,
) -> color_eyre::Result<Vec<WatchTarget>> {
    expand_initial(initial)
        .iter()
        .map(|(identity, props)| (identity.as_str(), props))
        .chain(watches.iter().map(|(identity, props)| (identity.as_str(), props)))
        .map(|(identity, props)| {
            WatchTarget::from_properties(identity, props)
                .map_err(|e| color_eyre::eyre::eyre!("Watch '{identity}': {e}"))
        })
        .collect()
}

// =============================================================================
// OUTPUT
// =============================================================================

/// One line of output per changed path.
#[derive(Debug, Serialize)]
struct ChangeLine<'a> {
    watch: &'a str,
    path: &'a Utf8Path,
    exists: bool,
}

/// Writes each change as a JSON line on stdout.
#[derive(Debug, Default)]
struct JsonLines;

impl JsonLines {
    fn write(identity: &str, changes: &ChangeSet) -> anyhow::Result<()> {
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        for path in changes {
            let line = ChangeLine {
                watch: identity,
                path,
                exists: path.exists(),
            };
            serde_json::to_writer(&mut handle, &line)?;
            writeln!(handle)?;
        }
        handle.flush()?;
        Ok(())
    }
}

impl ChangeConsumer for JsonLines {
    fn on_changes(&self, identity: &str, changes: &ChangeSet) -> anyhow::Result<()> {
        Self::write(identity, changes)
    }
}

// =============================================================================
// COMMAND IMPLEMENTATIONS
// =============================================================================

/// Starts every watch while holding the startup barrier.
fn bring_up(
    registry: &WatchRegistry,
    initial: &WatchProperties,
    watches: &BTreeMap<String, WatchProperties>,
) {
    let _startup = registry.barrier().hold();

    for (identity, err) in registry.start_initial(initial) {
        error!(identity = %identity, error = %err, "Initial watch not started");
    }
    for (identity, props) in watches {
        if let Err(err) = registry.upsert(identity, props) {
            error!(identity = %identity, error = %err, "Watch not started");
        }
    }

    info!(watches = registry.len(), "Bring-up complete");
}

/// Applies a freshly read `watches` section against the one last applied.
///
/// Only watches whose properties differ from the last attempt are upserted,
/// so a watch rejected for its configuration is not tried again until its
/// properties change. Watches no longer listed are removed. Returns the
/// watches that could not be started.
fn apply_watches(
    registry: &WatchRegistry,
    applied: &BTreeMap<String, WatchProperties>,
    desired: &BTreeMap<String, WatchProperties>,
) -> Vec<(String, WatchError)> {
    for identity in applied.keys().filter(|id| !desired.contains_key(*id)) {
        registry.remove(identity);
    }

    let mut failures = Vec::new();
    for (identity, props) in desired {
        if applied.get(identity) == Some(props) {
            continue;
        }
        match registry.upsert(identity, props) {
            Ok(UpsertOutcome::Unchanged) => {}
            Ok(outcome) => info!(identity = %identity, ?outcome, "Watch updated"),
            Err(err) => failures.push((identity.clone(), err)),
        }
    }
    failures
}

/// Waits for SIGINT, or SIGTERM on Unix.
async fn shutdown_signal() -> color_eyre::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("Received SIGINT, shutting down");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl-C, shutting down");
    }

    Ok(())
}

/// Completes on the next reload tick, or never if reloading is off.
async fn next_reload(ticker: &mut Option<tokio::time::Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Runs the watches until a shutdown signal arrives.
async fn run_watch(cli: &Cli, reload_secs: Option<u64>) -> color_eyre::Result<()> {
    let config = load_config(cli)?;
    let initial = initial_properties(cli, &config);
    let mut applied = config.watches;

    let readiness = Arc::new(ReadinessFlag::new());
    let gate: Arc<dyn Readiness> = Arc::<ReadinessFlag>::clone(&readiness);
    let context = WatchContext::new(Arc::new(JsonLines)).with_readiness(gate);
    let registry = Arc::new(WatchRegistry::new(context));

    {
        let registry = Arc::clone(&registry);
        let watches = applied.clone();
        tokio::task::spawn_blocking(move || bring_up(&registry, &initial, &watches)).await?;
    }
    readiness.set_ready(true);

    if registry.is_empty() && reload_secs.is_none() {
        return Err(color_eyre::eyre::eyre!("No watch could be started"));
    }

    let mut ticker = match (reload_secs, &cli.config) {
        (Some(secs), Some(_)) => {
            let period = Duration::from_secs(secs);
            Some(tokio::time::interval_at(
                tokio::time::Instant::now() + period,
                period,
            ))
        }
        (Some(_), None) => {
            warn!("--reload-secs has no effect without --config");
            None
        }
        (None, _) => None,
    };

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                result?;
                break;
            }
            () = next_reload(&mut ticker) => {
                let config = match load_config(cli) {
                    Ok(config) => config,
                    Err(err) => {
                        warn!(error = %err, "Config reload failed, keeping current watches");
                        continue;
                    }
                };
                let desired = config.watches;
                let registry = Arc::clone(&registry);
                let previous = std::mem::take(&mut applied);
                let next = desired.clone();
                let failures =
                    tokio::task::spawn_blocking(move || apply_watches(&registry, &previous, &next))
                        .await?;
                for (identity, err) in failures {
                    error!(identity = %identity, error = %err, "Watch not updated");
                }
                applied = desired;
            }
        }
    }

    tokio::task::spawn_blocking(move || registry.shutdown()).await?;
    Ok(())
}

/// Runs the startup scan of every watch once.
fn run_scan(cli: &Cli) -> color_eyre::Result<()> {
    let config = load_config(cli)?;
    let initial = initial_properties(cli, &config);

    for target in resolve_targets(&initial, &config.watches)? {
        let target = target.with_backend(Backend::Poll);
        let mut scanner = build_scanner(&target)?;
        match scanner.scan(true) {
            Some(changes) => JsonLines::write(&target.identity, &changes)
                .map_err(|e| color_eyre::eyre::eyre!("Cannot write output: {e}"))?,
            None => warn!(identity = %target.identity, dir = %target.directory, "Directory cannot be listed"),
        }
    }
    Ok(())
}

/// Prints the resolved targets.
fn run_targets(cli: &Cli) -> color_eyre::Result<()> {
    let config = load_config(cli)?;
    let initial = initial_properties(cli, &config);
    let targets = resolve_targets(&initial, &config.watches)?;

    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    serde_json::to_writer_pretty(&mut handle, &targets)?;
    writeln!(handle)?;
    Ok(())
}

// =============================================================================
// MAIN ENTRY POINT
// =============================================================================

/// Application entry point.
#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    // 1. Install color-eyre FIRST (before any potential panics)
    color_eyre::install()?;

    // 2. Parse CLI arguments
    let cli = Cli::parse();

    // 3. Initialize tracing (handles --no-color for log output)
    init_tracing(cli.verbose, cli.no_color);

    // 4. Route to appropriate command
    match &cli.command {
        None => run_watch(&cli, None).await,
        Some(Commands::Watch { reload_secs }) => run_watch(&cli, *reload_secs).await,
        Some(Commands::Scan) => run_scan(&cli),
        Some(Commands::Targets) => run_targets(&cli),
    }
}
