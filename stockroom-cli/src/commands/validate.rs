//! `stockroom validate`: load and check the manifest.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use stockroom_core::{manifest, Manifest};

use super::load_config;

/// Arguments for `stockroom validate`.
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Path to stockroom.yaml (default: ./stockroom.yaml, then ~/.stockroom/config.yaml).
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,
}

#[derive(Tabled)]
struct ProductRow {
    #[tabled(rename = "product")]
    id: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "variants")]
    variants: usize,
    #[tabled(rename = "media")]
    media: usize,
    #[tabled(rename = "catalog id")]
    remote: String,
}

impl ValidateArgs {
    pub fn run(self) -> Result<()> {
        let config = load_config(self.config.as_deref())?;
        let file = manifest::load(&config.manifest).context("manifest is not valid")?;

        if file.migrated_records() > 0 {
            println!(
                "{} {} legacy media records will be rewritten on the next sync",
                "note:".yellow(),
                file.migrated_records()
            );
        }
        print_summary(&file.manifest);
        println!("{} {}", "✓".green(), config.manifest.display());
        Ok(())
    }
}

fn print_summary(m: &Manifest) {
    println!(
        "{} products | {} variants | {} dependencies",
        m.products.len(),
        m.variants.len(),
        m.dependencies.len()
    );
    if m.products.is_empty() {
        return;
    }
    let rows: Vec<ProductRow> = m
        .products
        .iter()
        .map(|p| ProductRow {
            id: p.id.to_string(),
            status: p.sell_status.to_string(),
            variants: m.variant_indices(&p.id).len(),
            media: p.media.iter().filter(|item| !item.is_tombstoned()).count(),
            remote: p.remote_catalog_id.clone().unwrap_or_else(|| "-".to_string()),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}
