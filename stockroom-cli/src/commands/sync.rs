//! `stockroom sync`: run the reconciliation pipeline and print the report.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use stockroom_sync::{pipeline, RunOptions, Stage, SyncReport};

use super::load_config;

/// Arguments for `stockroom sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Path to stockroom.yaml (default: ./stockroom.yaml, then ~/.stockroom/config.yaml).
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Show what would change without calling the CDN, the payment catalog or
    /// the database, and without rewriting the manifest.
    #[arg(long)]
    pub dry_run: bool,

    /// Deactivate every stored product when the manifest lists none.
    #[arg(long)]
    pub allow_empty_sweep: bool,

    /// List remote catalog entities that no product references.
    #[arg(long)]
    pub audit: bool,

    /// Emit the report as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct StageRow {
    #[tabled(rename = "stage")]
    stage: &'static str,
    #[tabled(rename = "changed")]
    changed: String,
    #[tabled(rename = "unchanged")]
    unchanged: usize,
    #[tabled(rename = "errors")]
    errors: usize,
}

#[derive(Tabled)]
struct ErrorRow {
    #[tabled(rename = "stage")]
    stage: String,
    #[tabled(rename = "entity")]
    entity: String,
    #[tabled(rename = "message")]
    message: String,
}

impl SyncArgs {
    pub fn run(self) -> Result<()> {
        let config = load_config(self.config.as_deref())?;
        let options = RunOptions {
            dry_run: self.dry_run,
            allow_empty_sweep: self.allow_empty_sweep,
            audit_orphans: self.audit,
        };
        let report = pipeline::run(&config, &options).context("sync failed")?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to serialize report")?
            );
        } else {
            print_report(&report);
        }
        Ok(())
    }
}

fn print_report(report: &SyncReport) {
    let prefix = if report.dry_run { "[dry-run] " } else { "" };
    let (m, c, p) = (&report.media, &report.catalog, &report.persistence);
    let count = |stage| report.errors_in(stage).count();

    let mut rows = vec![
        StageRow {
            stage: "media",
            changed: format!("{} uploaded, {} deleted", m.uploaded, m.deleted),
            unchanged: m.skipped,
            errors: count(Stage::Media),
        },
        StageRow {
            stage: "catalog",
            changed: format!(
                "{} created, {} updated, {} archived",
                c.created, c.updated, c.archived
            ),
            unchanged: c.unchanged + c.skipped,
            errors: count(Stage::Catalog),
        },
    ];
    if p.ran {
        rows.push(StageRow {
            stage: "persistence",
            changed: format!(
                "{} rows, {} specs, {} dependencies, {} pruned, {} deactivated",
                p.persisted, p.specs_inserted, p.dependencies_inserted, p.pruned, p.deactivated
            ),
            unchanged: p.unchanged,
            errors: count(Stage::Persistence),
        });
    }
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");

    if !p.ran {
        println!("{prefix}persistence skipped");
    }
    if report.manifest_written {
        println!("✎  manifest written");
    }
    if let Some(orphans) = &c.orphans {
        if orphans.is_empty() {
            println!("No orphaned catalog entities.");
        } else {
            println!("{} orphaned catalog entities:", orphans.len());
            for id in orphans {
                println!("  {id}");
            }
        }
    }
    for warning in &report.warnings {
        println!("{} {warning}", "warning:".yellow());
    }

    if report.errors.is_empty() {
        let status = if report.is_noop() { "nothing to do" } else { "done" };
        println!("{prefix}{} {status}", "✓".green());
        return;
    }

    let rows: Vec<ErrorRow> = report
        .errors
        .iter()
        .map(|e| ErrorRow {
            stage: e.stage.to_string(),
            entity: e.entity_id.clone(),
            message: e.message.clone(),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{prefix}{} {} errors", "✗".red(), report.errors.len());
    println!("{table}");
}
