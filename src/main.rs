// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! NPL language client CLI.
//!
//! `serve` hosts the language client over a set of workspace roots and keeps
//! it in sync with their `.npl/settings.json` files. `resolve` and `set`
//! inspect and edit those settings without starting a server.

#![allow(clippy::print_stdout, reason = "CLI tool needs to output to stdout")]

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use npl_client::config::{SettingKey, Settings};
use npl_client::host::{Host, LocalHost};
use npl_client::lsp::{ClientConfiguration, ControllerOptions, ProcessServerManager};
use npl_client::{ActivationContext, App, Command, workspace};

/// Command-line arguments for npl-client.
#[derive(Parser, Debug)]
#[command(name = "npl-client")]
#[command(about = "Language client lifecycle controller for the NPL language server")]
#[command(version = env!("NPL_CLIENT_VERSION"))]
struct Args {
    /// The subcommand to run.
    #[command(subcommand)]
    command: Option<Cli>,

    /// User-level settings file (defaults to ~/.config/npl/settings.json).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Workspace root directories. Can be specified multiple times.
    #[arg(short, long, global = true)]
    root: Vec<PathBuf>,

    /// Directory for server files and other private state.
    #[arg(long, global = true)]
    storage: Option<PathBuf>,

    /// Language server command line, e.g. "npl-language-server --stdio".
    #[arg(short, long, global = true)]
    server: Option<String>,

    /// Pause between stopping and restarting after a settings change.
    #[arg(long, global = true, default_value_t = 500)]
    settle_delay_ms: u64,
}

/// Subcommands supported by npl-client.
#[derive(Subcommand, Debug)]
enum Cli {
    /// Run the language client (default if no subcommand given).
    ///
    /// Reads commands such as `restart` or `select-sources PATH` from stdin,
    /// reloads settings on SIGHUP and shuts down on Ctrl-C or end of input.
    Serve,

    /// Print the workspace folders and initialization options the server
    /// would receive.
    Resolve,

    /// Store a setting in the first root's `.npl/settings.json`.
    Set {
        /// Setting key, e.g. `sources` or `NPL.testSources`.
        key: String,
        /// Value; parsed as JSON when possible, otherwise stored as a string.
        value: String,
    },
}

/// Entry point for the npl-client binary.
///
/// # Errors
///
/// Returns an error if the subcommand fails.
#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("npl_client=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    match &args.command {
        None | Some(Cli::Serve) => run_serve(&args).await,
        Some(Cli::Resolve) => run_resolve(&args),
        Some(Cli::Set { key, value }) => run_set(&args, key, value).await,
    }
}

/// Builds the file-backed host from `--root` and `--config`.
fn local_host(args: &Args) -> Result<LocalHost> {
    // Default to current directory if no roots specified
    let raw_roots = if args.root.is_empty() {
        vec![PathBuf::from(".")]
    } else {
        args.root.clone()
    };
    let roots = raw_roots
        .into_iter()
        .map(|r| {
            r.canonicalize()
                .with_context(|| format!("Invalid workspace root: {}", r.display()))
        })
        .collect::<Result<Vec<_>>>()?;

    let user_file = args.config.clone().or_else(Settings::default_user_file);
    Ok(LocalHost::new(roots, user_file))
}

/// Runs the language client until Ctrl-C or end of input.
///
/// # Errors
///
/// Returns an error if the host cannot be built or activation fails.
async fn run_serve(args: &Args) -> Result<()> {
    let host = Arc::new(local_host(args)?);

    let command = args
        .server
        .as_deref()
        .ok_or_else(|| anyhow!("No language server command given (use --server)"))?;
    let parts: Vec<String> = command.split_whitespace().map(ToString::to_string).collect();
    let manager = Arc::new(ProcessServerManager::from_command(&parts)?);

    let context = ActivationContext {
        storage_dir: args
            .storage
            .clone()
            .or_else(|| dirs::data_local_dir().map(|d| d.join("npl-client")))
            .unwrap_or_default(),
        ..ActivationContext::default()
    };

    info!(
        "Workspace roots: {}",
        host.workspace_roots()
            .iter()
            .map(|r| r.path.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let app = App::new(context, host.clone(), manager).with_controller_options(ControllerOptions {
        settle_delay: Duration::from_millis(args.settle_delay_ms),
        ..ControllerOptions::default()
    });

    app.activate().await?;
    println!("{}", app.controller().state());

    let mut hangup = Hangup::new()?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
            Some(()) = hangup.recv() => {
                info!("Received SIGHUP, reloading settings");
                if let Err(e) = host.reload() {
                    error!("Failed to reload settings: {e:#}");
                }
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    handle_line(&app, &host, line.trim()).await;
                    println!("{}", app.controller().state());
                }
                Ok(None) => {
                    debug!("End of input");
                    break;
                }
                Err(e) => {
                    warn!("Failed to read stdin: {}", e);
                    break;
                }
            },
        }
    }

    info!("Shutting down NPL language client");
    if let Err(e) = app.deactivate().await {
        warn!("Language client did not shut down cleanly: {e:#}");
    }
    Ok(())
}

/// Runs one stdin command line such as `select-sources /path/to/src`.
async fn handle_line(app: &App, host: &LocalHost, line: &str) {
    if line.is_empty() {
        return;
    }
    let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();

    if word == "reload" {
        if let Err(e) = host.reload() {
            error!("Failed to reload settings: {e:#}");
        }
        return;
    }

    let command = match word.parse::<Command>() {
        Ok(command) => command,
        Err(e) => {
            warn!("{e}");
            return;
        }
    };
    if command.setting().is_some() && !rest.is_empty() {
        host.queue_pick(PathBuf::from(rest));
    }
    if let Err(e) = app.execute(command).await {
        error!("Command {} failed: {e:#}", command);
    }
}

/// Prints what the server would be started with.
///
/// # Errors
///
/// Returns an error if there is no workspace root or the settings are
/// unreadable.
fn run_resolve(args: &Args) -> Result<()> {
    let host = local_host(args)?;
    let roots = host.workspace_roots();
    let first = roots
        .first()
        .ok_or_else(|| anyhow!("No workspace folder found"))?;

    let scoped = host.settings(Some(&first.path))?;
    let global = host.settings(None)?;
    let config = ClientConfiguration::new(
        workspace::resolve(
            scoped.sources.as_deref(),
            scoped.test_sources.as_deref(),
            &roots,
        ),
        global.debounce_ms(),
        scoped.contrib_libraries,
    );

    let output = serde_json::json!({
        "workspaceFolders": config.roots(),
        "initializationOptions": config.initialization_options()?,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Persists one setting into the first root's settings file.
///
/// # Errors
///
/// Returns an error if the key is unknown or the file cannot be written.
async fn run_set(args: &Args, key: &str, value: &str) -> Result<()> {
    let key: SettingKey = key.parse()?;
    let value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));

    let host = local_host(args)?;
    let root = host
        .workspace_roots()
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("No workspace folder open to save NPL settings."))?;

    host.update_setting(&root.path, key, value.clone()).await?;
    println!(
        "{} = {} ({})",
        key.qualified(),
        value,
        Settings::folder_file(&root.path).display()
    );
    Ok(())
}

/// SIGHUP listener; never fires where the signal does not exist.
#[cfg(unix)]
struct Hangup(tokio::signal::unix::Signal);

#[cfg(unix)]
impl Hangup {
    fn new() -> Result<Self> {
        let signal = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
            .context("Failed to install SIGHUP handler")?;
        Ok(Self(signal))
    }

    async fn recv(&mut self) -> Option<()> {
        self.0.recv().await
    }
}

#[cfg(not(unix))]
struct Hangup;

#[cfg(not(unix))]
impl Hangup {
    #[allow(clippy::unnecessary_wraps, reason = "Matches the unix signature")]
    const fn new() -> Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) -> Option<()> {
        std::future::pending().await
    }
}
