//! Reconciliation pipeline entrypoint used by the CLI.
//!
//! load → media uploads → media tombstones → catalog → manifest write-back →
//! persistence. Only manifest load and write-back failures end a run early.

use std::path::{Path, PathBuf};

use stockroom_core::{manifest, Config};

use crate::catalog::{CatalogSyncer, PaymentCatalog};
use crate::error::SyncError;
use crate::media::{MediaStore, MediaSyncer};
use crate::memory::{MemoryCatalog, MemoryMediaStore};
use crate::persistence::{CatalogStore, PersistenceSyncer};
use crate::remote::{HttpMediaStore, HttpPaymentCatalog};
use crate::report::SyncReport;
use crate::sqlite::SqliteStore;

/// Per-run switches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Record intended remote calls without making them; skip the manifest
    /// write and the persistence stage.
    pub dry_run: bool,
    /// Let the deletion sweep run against a manifest with no products.
    pub allow_empty_sweep: bool,
    /// List active remote entities no product references.
    pub audit_orphans: bool,
}

/// One reconciliation run over a set of collaborators.
pub struct Reconciler<'a> {
    media: &'a dyn MediaStore,
    catalog: &'a dyn PaymentCatalog,
    store: Option<&'a dyn CatalogStore>,
    media_root: PathBuf,
    folder: String,
    currency: String,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        media: &'a dyn MediaStore,
        catalog: &'a dyn PaymentCatalog,
        store: Option<&'a dyn CatalogStore>,
        media_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            media,
            catalog,
            store,
            media_root: media_root.into(),
            folder: "catalog".to_string(),
            currency: "usd".to_string(),
        }
    }

    /// CDN key prefix for uploads.
    pub fn folder(mut self, folder: impl Into<String>) -> Self {
        self.folder = folder.into();
        self
    }

    pub fn currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    pub fn run(&self, manifest_path: &Path, options: &RunOptions) -> Result<SyncReport, SyncError> {
        let mut file = manifest::load(manifest_path)?;
        let mut report = SyncReport {
            dry_run: options.dry_run,
            ..SyncReport::default()
        };
        if file.migrated_records() > 0 {
            tracing::info!(
                "migrated {} legacy media records in {}",
                file.migrated_records(),
                manifest_path.display()
            );
        }

        let media = MediaSyncer::new(self.media, &self.media_root, &self.folder);
        media.upload_pass(&mut file.manifest, &mut report);
        media.tombstone_pass(&mut file.manifest, &mut report);

        let catalog = CatalogSyncer::new(self.catalog, &self.currency);
        catalog.sync_all(&mut file.manifest, &mut report);
        if options.audit_orphans {
            match catalog.audit_orphans(&file.manifest) {
                Ok(orphans) => report.catalog.orphans = Some(orphans),
                Err(e) => report.warn(format!("orphan audit failed: {e}")),
            }
        }

        if options.dry_run {
            if file.is_dirty() {
                tracing::info!("dry run: manifest changes not written");
            }
            return Ok(report);
        }

        report.manifest_written = file.save()?;
        if report.manifest_written {
            tracing::info!("wrote {}", manifest_path.display());
        }

        match self.store {
            Some(store) => PersistenceSyncer::new(store, options.allow_empty_sweep)
                .sync(&file.manifest, &mut report),
            None => report.warn("no relational store configured; persistence skipped"),
        }

        Ok(report)
    }
}

/// Run against the collaborators `config` describes.
///
/// A dry run swaps in the in-memory CDN and catalog and opens no database,
/// so it needs no credentials.
pub fn run(config: &Config, options: &RunOptions) -> Result<SyncReport, SyncError> {
    let options = RunOptions {
        allow_empty_sweep: options.allow_empty_sweep || config.sweep.allow_empty_manifest,
        ..options.clone()
    };

    if options.dry_run {
        let media = MemoryMediaStore::new();
        let catalog = MemoryCatalog::new();
        return Reconciler::new(&media, &catalog, None, &config.media_root)
            .folder(&config.cdn.folder)
            .currency(&config.payments.currency)
            .run(&config.manifest, &options);
    }

    let media = HttpMediaStore::from_config(&config.cdn)?;
    let image_base = format!("{}/v1/assets", config.cdn.base_url.trim_end_matches('/'));
    let catalog = HttpPaymentCatalog::from_config(&config.payments, &image_base)?;
    let store = SqliteStore::open(&config.database)?;
    Reconciler::new(&media, &catalog, Some(&store), &config.media_root)
        .folder(&config.cdn.folder)
        .currency(&config.payments.currency)
        .run(&config.manifest, &options)
}
