// pkd/src/cli/install.rs
use clap::Args;
use colored::Colorize;
use futures::future::join_all;
use pkd_common::config::Config;
use pkd_common::error::Result;
use pkd_core::{Executor, InstallOutcome};
use tracing::{debug, instrument};

use crate::cli::{first_failure, load_catalog, report_error, spawn_progress};

#[derive(Debug, Args)]
pub struct InstallArgs {
    /// Identifiers of the descriptors to install
    #[arg(required = true)]
    pub names: Vec<String>,
}

impl InstallArgs {
    #[instrument(skip(self, config), fields(targets = ?self.names))]
    pub async fn run(&self, config: &Config) -> Result<()> {
        let catalog = load_catalog(config)?;
        let executor = Executor::for_host(config.clone()).inspect_err(|e| report_error(None, e))?;
        let progress = spawn_progress(executor.subscribe());

        // One future per identifier; the executor serializes repeated identifiers.
        let installs = self.names.iter().map(|name| {
            let catalog = &catalog;
            let executor = &executor;
            async move {
                let descriptor = catalog.get(name)?;
                debug!("Installing '{}' {}", descriptor.token, descriptor.version);
                executor.install(&descriptor).await
            }
        });
        let results = join_all(installs).await;

        drop(executor);
        if let Err(e) = progress.await {
            debug!("Progress printer stopped: {}", e);
        }

        for (name, result) in self.names.iter().zip(&results) {
            match result {
                Ok(InstallOutcome::Installed(receipt)) => println!(
                    "{} Installed {} {}",
                    "✓".green().bold(),
                    name.green(),
                    receipt.version
                ),
                Ok(InstallOutcome::AlreadyInstalled { version }) => println!(
                    "{} {} {} is already installed",
                    "✓".green(),
                    name.cyan(),
                    version
                ),
                Err(_) => {}
            }
        }
        first_failure(self.names.iter().cloned().zip(results).collect())
    }
}
