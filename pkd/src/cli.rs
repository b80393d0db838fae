// pkd/src/cli.rs
//! Defines the command-line argument structure using clap.
use clap::{ArgAction, Parser, Subcommand};
use colored::Colorize;
use pkd_common::catalog::Catalog;
use pkd_common::config::Config;
use pkd_common::error::{PkdError, Result};
use pkd_common::lifecycle::LifecycleEvent;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::debug;

pub mod info;
pub mod install;
pub mod list;
pub mod uninstall;

use crate::cli::info::Info;
use crate::cli::install::InstallArgs;
use crate::cli::list::List;
use crate::cli::uninstall::Uninstall;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, name = "pkd", bin_name = "pkd")]
#[command(propagate_version = true)]
pub struct CliArgs {
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Install(InstallArgs),
    Uninstall(Uninstall),
    Info(Info),
    List(List),
}

impl Command {
    pub async fn run(&self, config: &Config) -> Result<()> {
        match self {
            Self::Install(command) => command.run(config).await,
            Self::Uninstall(command) => command.run(config).await,
            Self::Info(command) => command.run(config).await,
            Self::List(command) => command.run(config).await,
        }
    }
}

/// Loads the descriptor catalog, reporting a failure to the user.
pub(crate) fn load_catalog(config: &Config) -> Result<Catalog> {
    Catalog::load_dir(&config.catalog_dir).inspect_err(|e| report_error(None, e))
}

pub(crate) fn report_error(identifier: Option<&str>, error: &PkdError) {
    match identifier.or_else(|| error.identifier()) {
        Some(id) => eprintln!("{} {}: {}", "✖".red().bold(), id.cyan(), error),
        None => eprintln!("{}: {}", "Error".red().bold(), error),
    }
}

/// Prints user-facing progress lines for lifecycle events until the
/// executor owning the sender is dropped.
pub(crate) fn spawn_progress(mut events: broadcast::Receiver<LifecycleEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    debug!("Progress output skipped {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn print_event(event: &LifecycleEvent) {
    match event {
        LifecycleEvent::DownloadStarted { token, url } => {
            println!("{}Downloading {} from {}", "==> ".bold().blue(), token.cyan(), url);
        }
        LifecycleEvent::DownloadFinished {
            token,
            size_bytes,
            verification,
            ..
        } => {
            if verification.is_verified() {
                println!("{}Verified {} ({} bytes)", "==> ".bold().blue(), token.cyan(), size_bytes);
            } else {
                println!(
                    "{}{} {} is not checksum-verified (sha256 :no_check)",
                    "==> ".bold().blue(),
                    "Warning:".yellow(),
                    token.cyan()
                );
            }
        }
        LifecycleEvent::InstallerStarted { token, pkg } => {
            println!("{}Installing {} for {}", "==> ".bold().blue(), pkg, token.cyan());
        }
        LifecycleEvent::UninstallStarted { token, version } => {
            println!("{}Uninstalling {} {}", "==> ".bold().blue(), token.cyan(), version);
        }
        LifecycleEvent::Transition { .. }
        | LifecycleEvent::Failed { .. }
        | LifecycleEvent::UninstallFinished { .. } => {}
    }
}

/// Reports every failed identifier and returns the first failure, so the
/// process exit code reflects it.
pub(crate) fn first_failure<T>(results: Vec<(String, Result<T>)>) -> Result<()> {
    let mut first = None;
    let total = results.len();
    let mut failed = 0;
    for (id, result) in results {
        if let Err(e) = result {
            report_error(Some(&id), &e);
            failed += 1;
            first.get_or_insert(e);
        }
    }
    match first {
        Some(e) => {
            debug!("{} of {} identifiers failed", failed, total);
            Err(e)
        }
        None => Ok(()),
    }
}
