//! Relational-store reconciliation.
//!
//! Rows are upserted by primary key; `sold_quantity` belongs to the order
//! fulfillment side and is never written here. Specs and dependencies are
//! keyed rows that are inserted or removed, never updated in place. Rows
//! whose id left the manifest are deactivated, never deleted, so order
//! history keeps its foreign keys.

use stockroom_core::{Dependency, Manifest, Product, ProductId, ProductSpec, Variant, VariantId};

use crate::error::StoreError;
use crate::report::{Stage, SyncReport};

/// Result of a single keyed write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowChange {
    Written,
    Unchanged,
}

/// The relational store collaborator.
pub trait CatalogStore {
    /// Insert or update the product row, preserving `sold_quantity` and
    /// re-activating it if it was swept earlier.
    fn upsert_product(&self, product: &Product) -> Result<RowChange, StoreError>;
    fn upsert_variant(&self, variant: &Variant) -> Result<RowChange, StoreError>;
    /// Insert `(product, label)` unless present.
    fn insert_spec(&self, product_id: &ProductId, spec: &ProductSpec)
        -> Result<RowChange, StoreError>;
    /// Delete spec rows of `product_id` not matching any of `keep` exactly.
    fn prune_specs(&self, product_id: &ProductId, keep: &[ProductSpec])
        -> Result<usize, StoreError>;
    /// Insert `(product, depends_on)` unless present.
    fn insert_dependency(&self, dependency: &Dependency) -> Result<RowChange, StoreError>;
    /// Delete dependency rows of `product_id` not matching any of `keep` exactly.
    fn prune_dependencies(&self, product_id: &ProductId, keep: &[&Dependency])
        -> Result<usize, StoreError>;
    /// Mark every active product not in `keep` inactive. Returns rows changed.
    fn deactivate_products_except(&self, keep: &[ProductId]) -> Result<usize, StoreError>;
    fn deactivate_variants_except(&self, keep: &[VariantId]) -> Result<usize, StoreError>;
}

/// Writes the reconciled manifest into a [`CatalogStore`].
pub struct PersistenceSyncer<'a> {
    store: &'a dyn CatalogStore,
    allow_empty_sweep: bool,
}

impl<'a> PersistenceSyncer<'a> {
    pub fn new(store: &'a dyn CatalogStore, allow_empty_sweep: bool) -> Self {
        Self {
            store,
            allow_empty_sweep,
        }
    }

    /// Products, variants, specs, dependencies, then the deletion sweep.
    pub fn sync(&self, manifest: &Manifest, report: &mut SyncReport) {
        report.persistence.ran = true;

        for product in &manifest.products {
            let result = self.store.upsert_product(product);
            self.count_row(result, product.id.0.as_str(), report);
        }
        for variant in &manifest.variants {
            let result = self.store.upsert_variant(variant);
            self.count_row(result, variant.id.0.as_str(), report);
        }

        for product in &manifest.products {
            self.sync_specs(product, report);
            self.sync_dependencies(product, manifest, report);
        }

        self.sweep(manifest, report);
    }

    fn count_row(&self, result: Result<RowChange, StoreError>, id: &str, report: &mut SyncReport) {
        match result {
            Ok(RowChange::Written) => {
                tracing::info!("persisted {id}");
                report.persistence.persisted += 1;
            }
            Ok(RowChange::Unchanged) => report.persistence.unchanged += 1,
            Err(e) => report.record(Stage::Persistence, id, e),
        }
    }

    fn sync_specs(&self, product: &Product, report: &mut SyncReport) {
        match self.store.prune_specs(&product.id, &product.specs) {
            Ok(n) => report.persistence.pruned += n,
            Err(e) => {
                report.record(Stage::Persistence, product.id.0.as_str(), e);
                return;
            }
        }
        for spec in &product.specs {
            match self.store.insert_spec(&product.id, spec) {
                Ok(RowChange::Written) => report.persistence.specs_inserted += 1,
                Ok(RowChange::Unchanged) => {}
                Err(e) => report.record(
                    Stage::Persistence,
                    product.id.0.as_str(),
                    format!("spec '{}': {e}", spec.label),
                ),
            }
        }
    }

    fn sync_dependencies(&self, product: &Product, manifest: &Manifest, report: &mut SyncReport) {
        let deps: Vec<&Dependency> = manifest
            .dependencies
            .iter()
            .filter(|d| d.product_id == product.id)
            .collect();
        match self.store.prune_dependencies(&product.id, &deps) {
            Ok(n) => report.persistence.pruned += n,
            Err(e) => {
                report.record(Stage::Persistence, product.id.0.as_str(), e);
                return;
            }
        }
        for dep in deps {
            match self.store.insert_dependency(dep) {
                Ok(RowChange::Written) => report.persistence.dependencies_inserted += 1,
                Ok(RowChange::Unchanged) => {}
                Err(e) => report.record(
                    Stage::Persistence,
                    product.id.0.as_str(),
                    format!("dependency on '{}': {e}", dep.depends_on),
                ),
            }
        }
    }

    fn sweep(&self, manifest: &Manifest, report: &mut SyncReport) {
        if manifest.products.is_empty() && !self.allow_empty_sweep {
            report.warn(
                "manifest lists no products; deletion sweep skipped \
                 (enable the empty-manifest sweep to deactivate every product)",
            );
            return;
        }

        let keep: Vec<ProductId> = manifest.products.iter().map(|p| p.id.clone()).collect();
        match self.store.deactivate_products_except(&keep) {
            Ok(n) => {
                if n > 0 {
                    tracing::info!("deactivated {n} product rows no longer in the manifest");
                }
                report.persistence.deactivated += n;
            }
            Err(e) => report.record(Stage::Persistence, "sweep:products", e),
        }

        let keep: Vec<VariantId> = manifest.variants.iter().map(|v| v.id.clone()).collect();
        match self.store.deactivate_variants_except(&keep) {
            Ok(n) => report.persistence.deactivated += n,
            Err(e) => report.record(Stage::Persistence, "sweep:variants", e),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
