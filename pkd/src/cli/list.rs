// pkd/src/cli/list.rs
use std::collections::BTreeMap;

use clap::Args;
use colored::Colorize;
use pkd_common::config::Config;
use pkd_common::error::Result;
use pkd_core::installed_receipts;
use prettytable::{format, Cell, Row, Table};

use crate::cli::{load_catalog, report_error};

#[derive(Args, Debug)]
pub struct List {
    /// Only show installed identifiers
    #[arg(long)]
    pub installed: bool,
}

impl List {
    pub async fn run(&self, config: &Config) -> Result<()> {
        let catalog = load_catalog(config)?;
        // Latest receipt per identifier; receipts come ordered by install time.
        let installed: BTreeMap<String, String> = installed_receipts(config)
            .inspect_err(|e| report_error(None, e))?
            .into_iter()
            .map(|receipt| (receipt.token, receipt.version))
            .collect();

        let mut table = Table::new();
        table.set_format(*format::consts::FORMAT_NO_BORDER_LINE_SEPARATOR);
        table.add_row(Row::new(vec![
            Cell::new("Identifier").style_spec("b"),
            Cell::new("Version").style_spec("b"),
            Cell::new("Installed").style_spec("b"),
        ]));

        let mut shown = 0;
        for descriptor in catalog.iter() {
            let installed_version = installed.get(&descriptor.token);
            if self.installed && installed_version.is_none() {
                continue;
            }
            let marker = match installed_version {
                Some(v) if *v == descriptor.version => "✓".green().to_string(),
                Some(v) => format!("{} ({})", "✓".yellow(), v),
                None => String::new(),
            };
            table.add_row(Row::new(vec![
                Cell::new(&descriptor.token),
                Cell::new(&descriptor.version),
                Cell::new(&marker),
            ]));
            shown += 1;
        }
        // Installed identifiers whose descriptor left the catalog can still be uninstalled.
        for (token, version) in &installed {
            if catalog.get(token).is_err() {
                table.add_row(Row::new(vec![
                    Cell::new(token),
                    Cell::new(version),
                    Cell::new(&format!("{} (not in catalog)", "✓".yellow())),
                ]));
                shown += 1;
            }
        }

        if shown == 0 {
            println!("{}", "No descriptors to show".yellow());
            return Ok(());
        }
        table.printstd();
        println!(
            "{} descriptors in catalog, {} installed",
            catalog.len(),
            installed.len()
        );
        Ok(())
    }
}
