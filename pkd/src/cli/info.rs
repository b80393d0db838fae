// pkd/src/cli/info.rs
use std::time::{Duration, UNIX_EPOCH};

use clap::Args;
use colored::Colorize;
use pkd_common::config::Config;
use pkd_common::error::Result;
use pkd_common::model::{Checksum, Descriptor, RemovalSpec};
use pkd_core::{find_receipt, InstallReceipt};
use prettytable::{format, row, Table};

use crate::cli::{load_catalog, report_error};

#[derive(Args, Debug)]
pub struct Info {
    /// Identifier of the descriptor to show
    pub name: String,
}

impl Info {
    pub async fn run(&self, config: &Config) -> Result<()> {
        let catalog = load_catalog(config)?;
        let descriptor = catalog
            .get(&self.name)
            .inspect_err(|e| report_error(Some(&self.name), e))?;
        let receipt = find_receipt(config, &self.name)
            .inspect_err(|e| report_error(Some(&self.name), e))?;

        print_descriptor(&descriptor);
        if let Some(source) = catalog.source_path(&self.name) {
            println!("{} {}", "From:".bold(), source.display());
        }
        println!();
        match receipt {
            Some(receipt) => print_receipt(&receipt),
            None => println!("{}", "Not installed".yellow()),
        }
        Ok(())
    }
}

fn print_descriptor(descriptor: &Descriptor) {
    println!(
        "{}",
        format!("{}: {}", descriptor.token, descriptor.display_name())
            .green()
            .bold()
    );

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_NO_BORDER_LINE_SEPARATOR);
    if descriptor.names.len() > 1 {
        table.add_row(row!["Also known as", descriptor.names[1..].join(", ")]);
    }
    if let Some(desc) = &descriptor.desc {
        table.add_row(row!["Description", desc]);
    }
    if let Some(homepage) = &descriptor.homepage {
        table.add_row(row!["Homepage", homepage]);
    }
    table.add_row(row!["Version", descriptor.version]);
    table.add_row(row!["Download URL", descriptor.source_url()]);
    if let Some(verified) = &descriptor.url.verified {
        table.add_row(row!["Verified host", verified]);
    }
    let checksum = match &descriptor.sha256 {
        Checksum::Sha256(hex) => hex.clone(),
        Checksum::NoCheck => "no_check (download is not verified)".yellow().to_string(),
    };
    table.add_row(row!["SHA256", checksum]);
    for pkg in &descriptor.pkgs {
        let label = if pkg.allow_untrusted {
            format!("{} (untrusted allowed)", pkg.path)
        } else {
            pkg.path.clone()
        };
        table.add_row(row!["Package", label]);
    }
    add_removal_rows(&mut table, "Uninstall", &descriptor.uninstall);
    if let Some(zap) = &descriptor.zap {
        add_removal_rows(&mut table, "Zap", zap);
    }
    table.printstd();
}

fn add_removal_rows(table: &mut Table, label: &str, spec: &RemovalSpec) {
    let groups = [
        ("pkgutil", &spec.pkgutil),
        ("delete", &spec.delete),
        ("rmdir", &spec.rmdir),
        ("trash", &spec.trash),
    ];
    for (key, values) in groups {
        if !values.is_empty() {
            table.add_row(row![format!("{label} {key}"), values.join(", ")]);
        }
    }
}

fn print_receipt(receipt: &InstallReceipt) {
    let installed_at = UNIX_EPOCH + Duration::from_secs(receipt.installed_at);
    println!("{}", "Installed".green().bold());
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_NO_BORDER_LINE_SEPARATOR);
    table.add_row(row!["Version", receipt.version]);
    table.add_row(row![
        "Installed at",
        humantime::format_rfc3339_seconds(installed_at)
    ]);
    let verification = if receipt.verification.is_verified() {
        "checksum verified".green()
    } else {
        "unverified (sha256 :no_check)".yellow()
    };
    table.add_row(row!["Verification", verification]);
    if !receipt.artifact_sha256.is_empty() {
        table.add_row(row!["Artifact SHA256", receipt.artifact_sha256]);
    }
    table.add_row(row!["Artifacts", receipt.artifacts.len()]);
    table.printstd();
}
