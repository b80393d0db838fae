// pkd/src/cli/uninstall.rs
use clap::Args;
use colored::Colorize;
use futures::future::join_all;
use pkd_common::config::Config;
use pkd_common::descriptor::validate_token;
use pkd_common::error::{PkdError, Result};
use pkd_core::{Executor, UninstallOptions};
use tracing::debug;

use crate::cli::{first_failure, report_error, spawn_progress};

#[derive(Args, Debug)]
pub struct Uninstall {
    /// Identifiers of the installed descriptors to remove
    #[arg(required = true)]
    pub names: Vec<String>,
    /// Also run the descriptor's zap directives, removing associated user
    /// data and preferences. Use with caution, data will be lost!
    #[arg(long)]
    pub zap: bool,
}

impl Uninstall {
    pub async fn run(&self, config: &Config) -> Result<()> {
        let executor = Executor::for_host(config.clone()).inspect_err(|e| report_error(None, e))?;
        let progress = spawn_progress(executor.subscribe());
        let options = UninstallOptions { zap: self.zap };

        let removals = self.names.iter().map(|name| {
            let executor = &executor;
            async move {
                // Identifiers become Caskroom paths; reject traversal before touching disk.
                validate_token(name).map_err(PkdError::Generic)?;
                executor.uninstall(name, options).await
            }
        });
        let results = join_all(removals).await;

        drop(executor);
        if let Err(e) = progress.await {
            debug!("Progress printer stopped: {}", e);
        }

        for result in results.iter().flatten() {
            println!(
                "{} Uninstalled {} {} ({} paths removed, {} package receipts forgotten)",
                "✓".green().bold(),
                result.token.green(),
                result.version,
                result.removed.len(),
                result.forgotten.len()
            );
        }
        first_failure(self.names.iter().cloned().zip(results).collect())
    }
}
