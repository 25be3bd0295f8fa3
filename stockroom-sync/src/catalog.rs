//! Product/price reconciliation against the payment catalog.
//!
//! Each product resolves to one of five actions:
//!
//! | remote id | purchasable | action                                    |
//! |-----------|-------------|-------------------------------------------|
//! | none      | yes         | create entity + prices                    |
//! | some      | yes         | update if the payload hash changed, back-fill missing prices |
//! | some      | no          | archive, then forget the remote ids       |
//! | none      | no          | skip                                      |
//!
//! Remote calls produce an [`Outcome`]; identifiers are written onto the
//! manifest only when the whole product operation succeeded.

use std::collections::{BTreeMap, HashSet};

use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};

use stockroom_core::{Manifest, Product, Variant};

use crate::error::RemoteError;
use crate::pagination::{collect_pages, Page};
use crate::report::{Stage, SyncReport};

// ---------------------------------------------------------------------------
// Collaborator
// ---------------------------------------------------------------------------

/// Payload for creating or updating a catalog entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityDraft {
    pub name: String,
    pub description: String,
    pub active: bool,
    /// Remote media asset ids, in display order.
    pub images: Vec<String>,
    pub metadata: BTreeMap<String, String>,
}

impl EntityDraft {
    /// Manifest product id this entity was created for.
    pub fn manifest_id(&self) -> Option<&str> {
        self.metadata.get(MANIFEST_ID_KEY).map(String::as_str)
    }
}

/// Payload for creating a price under an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PriceDraft {
    /// Minor currency units.
    pub unit_amount: i64,
    pub currency: String,
    pub nickname: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

/// A catalog entity as returned by a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntity {
    pub id: String,
    pub active: bool,
    pub manifest_id: Option<String>,
}

/// Metadata key linking remote objects back to manifest ids.
pub const MANIFEST_ID_KEY: &str = "manifest_id";
pub const VARIANT_ID_KEY: &str = "variant_id";

/// The payment-provider catalog collaborator.
pub trait PaymentCatalog {
    fn create_entity(&self, draft: &EntityDraft) -> Result<String, RemoteError>;
    fn update_entity(&self, entity_id: &str, draft: &EntityDraft) -> Result<(), RemoteError>;
    /// Deactivate an entity. Unknown ids yield [`RemoteError::NotFound`].
    fn archive_entity(&self, entity_id: &str) -> Result<(), RemoteError>;
    fn create_price(&self, entity_id: &str, draft: &PriceDraft) -> Result<String, RemoteError>;
    fn archive_price(&self, price_id: &str) -> Result<(), RemoteError>;
    fn list_entities(&self, cursor: Option<&str>) -> Result<Page<RemoteEntity>, RemoteError>;
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogAction {
    Created,
    Updated,
    Unchanged,
    Archived,
    Skipped,
}

/// Identifier writes produced by one product's remote calls.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Outcome {
    action: CatalogAction,
    entity_id: Option<String>,
    product_price: Option<String>,
    /// `(index into manifest.variants, new price id)`
    variant_prices: Vec<(usize, String)>,
    fingerprint: Option<String>,
}

impl Outcome {
    fn simple(action: CatalogAction) -> Self {
        Self {
            action,
            entity_id: None,
            product_price: None,
            variant_prices: Vec::new(),
            fingerprint: None,
        }
    }
}

/// Prices created so far for one product.
#[derive(Default)]
struct CreatedPrices {
    product: Option<String>,
    variants: Vec<(usize, String)>,
}

impl CreatedPrices {
    fn ids(&self) -> impl Iterator<Item = &String> {
        self.product.iter().chain(self.variants.iter().map(|(_, id)| id))
    }
}

/// SHA-256 hex of the serialized draft.
pub fn fingerprint(draft: &EntityDraft) -> String {
    let bytes = serde_json::to_vec(draft).unwrap_or_default();
    hex::encode(Sha256::digest(&bytes))
}

// ---------------------------------------------------------------------------
// CatalogSyncer
// ---------------------------------------------------------------------------

/// Reconciles manifest products with a [`PaymentCatalog`].
pub struct CatalogSyncer<'a> {
    catalog: &'a dyn PaymentCatalog,
    currency: &'a str,
}

impl<'a> CatalogSyncer<'a> {
    pub fn new(catalog: &'a dyn PaymentCatalog, currency: &'a str) -> Self {
        Self { catalog, currency }
    }

    /// Sync every product in manifest order.
    pub fn sync_all(&self, manifest: &mut Manifest, report: &mut SyncReport) {
        for index in 0..manifest.products.len() {
            let product_id = manifest.products[index].id.clone();
            let variant_indices = manifest.variant_indices(&product_id);
            let variants: Vec<(usize, &Variant)> = variant_indices
                .iter()
                .map(|&i| (i, &manifest.variants[i]))
                .collect();

            match self.sync_product(&manifest.products[index], &variants) {
                Ok(outcome) => {
                    match outcome.action {
                        CatalogAction::Created => report.catalog.created += 1,
                        CatalogAction::Updated => report.catalog.updated += 1,
                        CatalogAction::Unchanged => report.catalog.unchanged += 1,
                        CatalogAction::Archived => report.catalog.archived += 1,
                        CatalogAction::Skipped => report.catalog.skipped += 1,
                    }
                    apply(manifest, index, &variant_indices, outcome);
                }
                Err(e) => report.record(Stage::Catalog, product_id.0, e),
            }
        }
    }

    fn sync_product(
        &self,
        product: &Product,
        variants: &[(usize, &Variant)],
    ) -> Result<Outcome, RemoteError> {
        let active = product.sell_status.is_purchasable();
        match (&product.remote_catalog_id, active) {
            (None, true) => self.create(product, variants),
            (Some(id), true) => self.update(id, product, variants),
            (Some(id), false) => self.archive(id, product),
            (None, false) => {
                tracing::debug!("skipping {}: {} and never created", product.id, product.sell_status);
                Ok(Outcome::simple(CatalogAction::Skipped))
            }
        }
    }

    fn create(&self, product: &Product, variants: &[(usize, &Variant)]) -> Result<Outcome, RemoteError> {
        let draft = self.entity_draft(product);
        let entity_id = self.catalog.create_entity(&draft)?;
        tracing::info!("created catalog entity {} for {}", entity_id, product.id);

        let mut prices = CreatedPrices::default();
        if let Err(e) = self.fill_prices(&entity_id, product, variants, &mut prices) {
            if let Err(undo) = self.catalog.archive_entity(&entity_id) {
                tracing::warn!("could not archive half-created entity {entity_id}: {undo}");
            }
            return Err(e);
        }

        Ok(Outcome {
            action: CatalogAction::Created,
            entity_id: Some(entity_id),
            product_price: prices.product,
            variant_prices: prices.variants,
            fingerprint: Some(fingerprint(&draft)),
        })
    }

    fn update(
        &self,
        entity_id: &str,
        product: &Product,
        variants: &[(usize, &Variant)],
    ) -> Result<Outcome, RemoteError> {
        let draft = self.entity_draft(product);
        let digest = fingerprint(&draft);
        let mut changed = false;

        if product.catalog_fingerprint.as_deref() != Some(digest.as_str()) {
            self.catalog.update_entity(entity_id, &draft)?;
            tracing::info!("updated catalog entity {} for {}", entity_id, product.id);
            changed = true;
        }

        let mut prices = CreatedPrices::default();
        if let Err(e) = self.fill_prices(entity_id, product, variants, &mut prices) {
            for price_id in prices.ids() {
                if let Err(undo) = self.catalog.archive_price(price_id) {
                    tracing::warn!("could not archive orphaned price {price_id}: {undo}");
                }
            }
            return Err(e);
        }
        changed |= prices.ids().next().is_some();

        Ok(Outcome {
            action: if changed {
                CatalogAction::Updated
            } else {
                CatalogAction::Unchanged
            },
            entity_id: Some(entity_id.to_string()),
            product_price: prices.product,
            variant_prices: prices.variants,
            fingerprint: Some(digest),
        })
    }

    fn archive(&self, entity_id: &str, product: &Product) -> Result<Outcome, RemoteError> {
        match self.catalog.archive_entity(entity_id) {
            Ok(()) => tracing::info!("archived catalog entity {} for {}", entity_id, product.id),
            Err(RemoteError::NotFound(_)) => {
                tracing::debug!("catalog entity {entity_id} already gone")
            }
            Err(e) => return Err(e),
        }
        Ok(Outcome::simple(CatalogAction::Archived))
    }

    /// Create every price the product is missing. Variants (or a variant-less
    /// product) that already carry a price id are never given a new one.
    fn fill_prices(
        &self,
        entity_id: &str,
        product: &Product,
        variants: &[(usize, &Variant)],
        created: &mut CreatedPrices,
    ) -> Result<(), RemoteError> {
        if product.has_variants {
            for (index, variant) in variants {
                if variant.remote_price_id.is_some() {
                    continue;
                }
                let draft = self.variant_price(product, variant)?;
                let price_id = self.catalog.create_price(entity_id, &draft)?;
                tracing::info!("created price {} for variant {}", price_id, variant.id);
                created.variants.push((*index, price_id));
            }
        } else if product.remote_price_id.is_none() {
            let draft = self.product_price(product);
            let price_id = self.catalog.create_price(entity_id, &draft)?;
            tracing::info!("created price {} for {}", price_id, product.id);
            created.product = Some(price_id);
        }
        Ok(())
    }

    fn entity_draft(&self, product: &Product) -> EntityDraft {
        let mut media: Vec<_> = product
            .media
            .iter()
            .enumerate()
            .filter(|(_, m)| !m.is_tombstoned())
            .filter_map(|(i, m)| m.remote_asset_id.as_ref().map(|id| (m.order, i, id.clone())))
            .collect();
        media.sort();

        let mut metadata = BTreeMap::new();
        metadata.insert(MANIFEST_ID_KEY.to_string(), product.id.0.clone());
        metadata.insert("category".to_string(), product.category.clone());
        metadata.insert("sell_status".to_string(), product.sell_status.to_string());

        EntityDraft {
            name: product.name.clone(),
            description: product.description.clone(),
            active: true,
            images: media.into_iter().map(|(_, _, id)| id).collect(),
            metadata,
        }
    }

    fn product_price(&self, product: &Product) -> PriceDraft {
        let mut metadata = BTreeMap::new();
        metadata.insert(MANIFEST_ID_KEY.to_string(), product.id.0.clone());
        PriceDraft {
            unit_amount: product.base_price,
            currency: self.currency.to_string(),
            nickname: None,
            metadata,
        }
    }

    fn variant_price(
        &self,
        product: &Product,
        variant: &Variant,
    ) -> Result<PriceDraft, RemoteError> {
        let unit_amount = variant.unit_price(product.base_price).ok_or_else(|| {
            RemoteError::Rejected(format!("price of variant {} overflows", variant.id))
        })?;
        let mut metadata = BTreeMap::new();
        metadata.insert(MANIFEST_ID_KEY.to_string(), product.id.0.clone());
        metadata.insert(VARIANT_ID_KEY.to_string(), variant.id.0.clone());
        Ok(PriceDraft {
            unit_amount,
            currency: self.currency.to_string(),
            nickname: Some(variant.label()),
            metadata,
        })
    }

    /// Active remote entities created for a manifest product that no current
    /// product references. Read-only.
    pub fn audit_orphans(&self, manifest: &Manifest) -> Result<Vec<String>, RemoteError> {
        let referenced: HashSet<&str> = manifest
            .products
            .iter()
            .filter_map(|p| p.remote_catalog_id.as_deref())
            .collect();
        let remote = collect_pages(|cursor| self.catalog.list_entities(cursor))?;
        Ok(remote
            .into_iter()
            .filter(|e| e.active && e.manifest_id.is_some() && !referenced.contains(e.id.as_str()))
            .map(|e| e.id)
            .collect())
    }
}

/// Write an outcome's identifiers onto the manifest and stamp `lastSyncedAt`.
fn apply(manifest: &mut Manifest, index: usize, variant_indices: &[usize], outcome: Outcome) {
    match outcome.action {
        CatalogAction::Skipped => {}
        CatalogAction::Archived => {
            let product = &mut manifest.products[index];
            product.remote_catalog_id = None;
            product.remote_price_id = None;
            product.catalog_fingerprint = None;
            for &vi in variant_indices {
                manifest.variants[vi].remote_catalog_parent_id = None;
                manifest.variants[vi].remote_price_id = None;
            }
        }
        CatalogAction::Created | CatalogAction::Updated | CatalogAction::Unchanged => {
            let product = &mut manifest.products[index];
            product.remote_catalog_id = outcome.entity_id.clone();
            if let Some(price) = outcome.product_price {
                product.remote_price_id = Some(price);
            }
            product.catalog_fingerprint = outcome.fingerprint;
            for &vi in variant_indices {
                manifest.variants[vi].remote_catalog_parent_id = outcome.entity_id.clone();
            }
            for (vi, price) in outcome.variant_prices {
                manifest.variants[vi].remote_price_id = Some(price);
            }
        }
    }
    manifest.products[index].last_synced_at = Some(Utc::now());
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{CatalogCall, MemoryCatalog};
    use stockroom_core::{MediaItem, ProductId, SellStatus, VariantId};

    fn product(id: &str, status: SellStatus) -> Product {
        Product {
            id: ProductId::from(id),
            name: id.to_uppercase(),
            description: format!("{id} description"),
            category: "apparel".into(),
            base_price: 2000,
            has_variants: false,
            sell_status: status,
            media: vec![],
            specs: vec![],
            remote_catalog_id: None,
            remote_price_id: None,
            catalog_fingerprint: None,
            last_synced_at: None,
        }
    }

    fn variant(id: &str, product: &str, modifier: i64) -> Variant {
        Variant {
            id: VariantId::from(id),
            product_id: ProductId::from(product),
            variant_type: "size".into(),
            value: id.to_uppercase(),
            price_modifier: modifier,
            remote_catalog_parent_id: None,
            remote_price_id: None,
            media: vec![],
            is_limited_edition: false,
            max_quantity: None,
        }
    }

    fn shirt_manifest() -> Manifest {
        let mut shirt = product("shirt", SellStatus::ForSale);
        shirt.has_variants = true;
        Manifest {
            products: vec![shirt],
            variants: vec![variant("s", "shirt", 0), variant("xl", "shirt", 500)],
            ..Manifest::default()
        }
    }

    fn run(catalog: &MemoryCatalog, manifest: &mut Manifest) -> SyncReport {
        let mut report = SyncReport::default();
        CatalogSyncer::new(catalog, "eur").sync_all(manifest, &mut report);
        report
    }

    #[test]
    fn creates_variantless_product_with_single_price() {
        let catalog = MemoryCatalog::new();
        let mut manifest = Manifest {
            products: vec![product("mug", SellStatus::ForSale)],
            ..Manifest::default()
        };
        let report = run(&catalog, &mut manifest);

        assert_eq!(report.catalog.created, 1);
        let mug = &manifest.products[0];
        assert!(mug.remote_catalog_id.is_some());
        assert!(mug.remote_price_id.is_some());
        assert!(mug.catalog_fingerprint.is_some());
        assert!(mug.last_synced_at.is_some());
        assert_eq!(catalog.price_amounts(), vec![2000]);
    }

    #[test]
    fn creates_one_price_per_variant() {
        let catalog = MemoryCatalog::new();
        let mut manifest = shirt_manifest();
        run(&catalog, &mut manifest);

        let entity = manifest.products[0].remote_catalog_id.clone().unwrap();
        for v in &manifest.variants {
            assert_eq!(v.remote_catalog_parent_id.as_deref(), Some(entity.as_str()));
            assert!(v.remote_price_id.is_some());
        }
        assert!(manifest.products[0].remote_price_id.is_none());
        assert_eq!(catalog.price_amounts(), vec![2000, 2500]);
    }

    #[test]
    fn second_run_is_unchanged() {
        let catalog = MemoryCatalog::new();
        let mut manifest = shirt_manifest();
        run(&catalog, &mut manifest);
        let calls_after_first = catalog.calls().len();

        let report = run(&catalog, &mut manifest);
        assert_eq!(report.catalog.unchanged, 1);
        assert_eq!(report.catalog.created + report.catalog.updated, 0);
        assert_eq!(catalog.calls().len(), calls_after_first);
    }

    #[test]
    fn edited_product_is_updated_and_missing_prices_back_filled() {
        let catalog = MemoryCatalog::new();
        let mut manifest = shirt_manifest();
        run(&catalog, &mut manifest);
        let s_price = manifest.variants[0].remote_price_id.clone();

        manifest.products[0].name = "Shirt v2".into();
        manifest.variants[1].remote_price_id = None;
        let report = run(&catalog, &mut manifest);

        assert_eq!(report.catalog.updated, 1);
        assert_eq!(manifest.variants[0].remote_price_id, s_price);
        assert!(manifest.variants[1].remote_price_id.is_some());
        let creates = catalog
            .calls()
            .into_iter()
            .filter(|c| matches!(c, CatalogCall::CreatePrice { .. }))
            .count();
        assert_eq!(creates, 3);
    }

    #[test]
    fn media_changes_alter_the_fingerprint() {
        let catalog = MemoryCatalog::new();
        let mut manifest = Manifest {
            products: vec![product("mug", SellStatus::ForSale)],
            ..Manifest::default()
        };
        run(&catalog, &mut manifest);
        let mut image = MediaItem::local("mug.jpg");
        image.remote_asset_id = Some("asset-1".into());
        manifest.products[0].media.push(image);

        let report = run(&catalog, &mut manifest);
        assert_eq!(report.catalog.updated, 1);
    }

    #[test]
    fn discontinued_product_is_archived_and_ids_cleared() {
        let catalog = MemoryCatalog::new();
        let mut manifest = shirt_manifest();
        run(&catalog, &mut manifest);
        let entity = manifest.products[0].remote_catalog_id.clone().unwrap();

        manifest.products[0].sell_status = SellStatus::Discontinued;
        let report = run(&catalog, &mut manifest);

        assert_eq!(report.catalog.archived, 1);
        assert!(catalog.calls().contains(&CatalogCall::ArchiveEntity(entity)));
        let shirt = &manifest.products[0];
        assert!(shirt.remote_catalog_id.is_none());
        assert!(shirt.catalog_fingerprint.is_none());
        assert!(manifest
            .variants
            .iter()
            .all(|v| v.remote_price_id.is_none() && v.remote_catalog_parent_id.is_none()));

        // Nothing to do while it stays discontinued.
        let report = run(&catalog, &mut manifest);
        assert_eq!(report.catalog.skipped, 1);
    }

    #[test]
    fn entity_missing_remotely_still_counts_as_archived() {
        let catalog = MemoryCatalog::new();
        let mut manifest = shirt_manifest();
        run(&catalog, &mut manifest);
        let entity = manifest.products[0].remote_catalog_id.clone().unwrap();
        catalog.forget_entity(&entity);

        manifest.products[0].sell_status = SellStatus::Discontinued;
        let report = run(&catalog, &mut manifest);

        assert!(report.errors.is_empty());
        assert_eq!(report.catalog.archived, 1);
        assert!(manifest.products[0].remote_catalog_id.is_none());
        assert!(manifest.variants.iter().all(|v| v.remote_price_id.is_none()));
    }

    #[test]
    fn reactivation_creates_a_fresh_entity() {
        let catalog = MemoryCatalog::new();
        let mut manifest = Manifest {
            products: vec![product("mug", SellStatus::ForSale)],
            ..Manifest::default()
        };
        run(&catalog, &mut manifest);
        let first = manifest.products[0].remote_catalog_id.clone();
        manifest.products[0].sell_status = SellStatus::Internal;
        run(&catalog, &mut manifest);
        manifest.products[0].sell_status = SellStatus::PreOrder;
        let report = run(&catalog, &mut manifest);

        assert_eq!(report.catalog.created, 1);
        assert_ne!(manifest.products[0].remote_catalog_id, first);
    }

    #[test]
    fn internal_product_is_never_created() {
        let catalog = MemoryCatalog::new();
        let mut manifest = Manifest {
            products: vec![product("proto", SellStatus::Internal)],
            ..Manifest::default()
        };
        let report = run(&catalog, &mut manifest);
        assert_eq!(report.catalog.skipped, 1);
        assert!(catalog.calls().is_empty());
        assert!(manifest.products[0].last_synced_at.is_some());
    }

    #[test]
    fn failure_on_one_product_does_not_block_the_next() {
        let catalog = MemoryCatalog::new();
        let mut a = product("a", SellStatus::ForSale);
        a.remote_catalog_id = Some("prod_existing".into());
        a.remote_price_id = Some("price_existing".into());
        a.catalog_fingerprint = Some("stale".into());
        let mut manifest = Manifest {
            products: vec![a.clone(), product("b", SellStatus::ForSale)],
            ..Manifest::default()
        };
        catalog.fail_entity("a");

        let report = run(&catalog, &mut manifest);

        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].entity_id, "a");
        assert_eq!(manifest.products[0], a, "a must be untouched, including lastSyncedAt");
        assert_eq!(report.catalog.created, 1);
        assert!(manifest.products[1].remote_catalog_id.is_some());
    }

    #[test]
    fn price_failure_during_create_writes_no_ids_and_archives_entity() {
        let catalog = MemoryCatalog::new();
        let mut manifest = shirt_manifest();
        catalog.fail_price("xl");

        let report = run(&catalog, &mut manifest);

        assert_eq!(report.errors.len(), 1);
        assert!(manifest.products[0].remote_catalog_id.is_none());
        assert!(manifest.variants.iter().all(|v| v.remote_price_id.is_none()));
        let archived = catalog
            .calls()
            .into_iter()
            .any(|c| matches!(c, CatalogCall::ArchiveEntity(_)));
        assert!(archived, "half-created entity must be archived");
    }

    #[test]
    fn price_failure_during_update_archives_new_prices_and_writes_nothing() {
        let catalog = MemoryCatalog::new();
        let mut manifest = shirt_manifest();
        run(&catalog, &mut manifest);
        let fingerprint = manifest.products[0].catalog_fingerprint.clone();

        manifest.products[0].name = "Shirt v2".into();
        for v in &mut manifest.variants {
            v.remote_price_id = None;
        }
        let before = manifest.clone();
        catalog.fail_price("xl");

        let report = run(&catalog, &mut manifest);

        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.catalog.updated, 0);
        assert_eq!(manifest, before);
        assert_eq!(manifest.products[0].catalog_fingerprint, fingerprint);
        let archived: Vec<CatalogCall> = catalog
            .calls()
            .into_iter()
            .filter(|c| matches!(c, CatalogCall::ArchivePrice(_)))
            .collect();
        assert_eq!(archived.len(), 1, "the price created for 's' must be archived");
        assert!(!catalog
            .calls()
            .iter()
            .any(|c| matches!(c, CatalogCall::ArchiveEntity(_))));
    }

    #[test]
    fn overflowing_variant_price_is_an_entity_error() {
        let catalog = MemoryCatalog::new();
        let mut manifest = shirt_manifest();
        manifest.products[0].base_price = i64::MAX;

        let report = run(&catalog, &mut manifest);

        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].message.contains("overflows"), "{report}");
        assert!(manifest.products[0].remote_catalog_id.is_none());
    }

    #[test]
    fn audit_reports_unreferenced_managed_entities() {
        let catalog = MemoryCatalog::with_page_size(1);
        catalog.seed_entity("prod_gone", Some("old-product"), true);
        catalog.seed_entity("prod_foreign", None, true);
        catalog.seed_entity("prod_archived", Some("older"), false);
        let mut manifest = Manifest {
            products: vec![product("mug", SellStatus::ForSale)],
            ..Manifest::default()
        };
        run(&catalog, &mut manifest);

        let orphans = CatalogSyncer::new(&catalog, "eur")
            .audit_orphans(&manifest)
            .unwrap();
        assert_eq!(orphans, vec!["prod_gone".to_string()]);
    }
}
