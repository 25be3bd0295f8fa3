//! End-to-end reconciliation runs against in-memory collaborators and an
//! in-memory SQLite store.

use std::fs;
use std::path::PathBuf;

use serde_json::json;
use stockroom_core::{Manifest, ProductId};
use stockroom_sync::memory::{CatalogCall, MediaCall, MemoryCatalog, MemoryMediaStore};
use stockroom_sync::{Reconciler, RunOptions, SqliteStore, Stage, SyncReport};
use tempfile::TempDir;

struct Fixture {
    dir: TempDir,
    media: MemoryMediaStore,
    catalog: MemoryCatalog,
    store: SqliteStore,
}

impl Fixture {
    fn new(manifest: serde_json::Value) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = TempDir::new().expect("tempdir");
        fs::create_dir_all(dir.path().join("media")).expect("media dir");
        let fixture = Self {
            dir,
            media: MemoryMediaStore::new(),
            catalog: MemoryCatalog::new(),
            store: SqliteStore::open_in_memory().expect("sqlite"),
        };
        fixture.write_manifest(&manifest);
        fixture
    }

    fn manifest_path(&self) -> PathBuf {
        self.dir.path().join("manifest.json")
    }

    fn media_root(&self) -> PathBuf {
        self.dir.path().join("media")
    }

    fn write_manifest(&self, value: &serde_json::Value) {
        let text = serde_json::to_string_pretty(value).expect("serialize");
        fs::write(self.manifest_path(), text).expect("write manifest");
    }

    fn add_media(&self, rel: &str) {
        let path = self.media_root().join(rel);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, b"\x89PNG").expect("write media");
    }

    fn remove_media(&self, rel: &str) {
        fs::remove_file(self.media_root().join(rel)).expect("remove media");
    }

    fn manifest(&self) -> Manifest {
        let text = fs::read_to_string(self.manifest_path()).expect("read manifest");
        serde_json::from_str(&text).expect("parse manifest")
    }

    fn run_with(&self, options: RunOptions) -> SyncReport {
        Reconciler::new(
            &self.media,
            &self.catalog,
            Some(&self.store),
            self.media_root(),
        )
        .run(&self.manifest_path(), &options)
        .expect("run")
    }

    fn run(&self) -> SyncReport {
        self.run_with(RunOptions::default())
    }
}

fn product(id: &str, status: &str) -> serde_json::Value {
    json!({
        "id": id,
        "name": id.to_uppercase(),
        "basePrice": 2500,
        "sellStatus": status
    })
}

fn manifest(products: Vec<serde_json::Value>) -> serde_json::Value {
    json!({ "version": 1, "products": products, "variants": [], "dependencies": [] })
}

fn active_ids(store: &SqliteStore) -> Vec<String> {
    store.active_product_ids().expect("active ids")
}

// ---------------------------------------------------------------------------
// 1. Creation and idempotence
// ---------------------------------------------------------------------------

#[test]
fn single_for_sale_product_is_created_and_persisted() {
    let fx = Fixture::new(manifest(vec![product("mug", "for-sale")]));

    let report = fx.run();
    assert_eq!(report.catalog.created, 1);
    assert!(!report.has_errors(), "{report}");
    assert!(report.manifest_written);

    let m = fx.manifest();
    let remote_id = m.products[0].remote_catalog_id.clone().expect("remote id");
    assert!(m.products[0].remote_price_id.is_some());
    assert!(m.products[0].last_synced_at.is_some());

    let row = fx
        .store
        .product_row(&ProductId::from("mug"))
        .expect("query")
        .expect("row");
    assert!(row.is_active);
    assert_eq!(row.remote_catalog_id.as_deref(), Some(remote_id.as_str()));
}

#[test]
fn second_run_without_changes_is_a_noop() {
    let mut p = product("lamp", "pre-order");
    p["media"] = json!([{ "localPath": "lamp/front.png" }]);
    p["specs"] = json!([{ "label": "height", "value": "40cm" }]);
    let fx = Fixture::new(manifest(vec![p, product("shade", "for-sale")]));
    fx.add_media("lamp/front.png");

    let first = fx.run();
    assert_eq!(first.media.uploaded, 1);
    assert_eq!(first.catalog.created, 2);
    assert_eq!(first.persistence.persisted, 2);

    let second = fx.run();
    assert!(second.is_noop(), "{second}");
    assert!(!second.has_errors());
    assert_eq!(second.media.skipped, 1);
    assert_eq!(second.catalog.unchanged, 2);
    assert_eq!(second.persistence.unchanged, 2);
}

// ---------------------------------------------------------------------------
// 2. Deletion sweep
// ---------------------------------------------------------------------------

#[test]
fn removed_product_is_deactivated_with_sales_preserved() {
    let fx = Fixture::new(manifest(vec![
        product("a", "for-sale"),
        product("b", "for-sale"),
    ]));
    fx.run();
    fx.store
        .record_sale(&ProductId::from("b"), None, 7)
        .expect("sale");

    let mut m = serde_json::to_value(fx.manifest()).expect("to value");
    m["products"].as_array_mut().expect("array").retain(|p| p["id"] == "a");
    fx.write_manifest(&m);

    let report = fx.run();
    assert_eq!(report.persistence.deactivated, 1);
    let b = fx
        .store
        .product_row(&ProductId::from("b"))
        .expect("query")
        .expect("row kept");
    assert!(!b.is_active);
    assert_eq!(b.sold_quantity, 7);
}

#[test]
fn empty_manifest_sweep_requires_the_gate() {
    let fx = Fixture::new(manifest(vec![
        product("a", "for-sale"),
        product("b", "internal"),
    ]));
    fx.run();
    assert_eq!(active_ids(&fx.store).len(), 2);

    fx.write_manifest(&manifest(vec![]));
    let gated = fx.run();
    assert_eq!(gated.persistence.deactivated, 0);
    assert!(gated.warnings.iter().any(|w| w.contains("sweep skipped")));
    assert_eq!(active_ids(&fx.store).len(), 2);

    let open = fx.run_with(RunOptions {
        allow_empty_sweep: true,
        ..RunOptions::default()
    });
    assert_eq!(open.persistence.deactivated, 2);
    assert!(active_ids(&fx.store).is_empty());
}

// ---------------------------------------------------------------------------
// 3. Prices
// ---------------------------------------------------------------------------

#[test]
fn variant_with_existing_price_never_gets_a_new_one() {
    let mut p = product("tee", "for-sale");
    p["hasVariants"] = json!(true);
    p["remoteCatalogId"] = json!("prod_existing");
    let fx = Fixture::new(json!({
        "version": 1,
        "products": [p],
        "variants": [
            { "id": "tee-s", "productId": "tee", "type": "size", "value": "S",
              "remoteCatalogParentId": "prod_existing", "remotePriceId": "price_old" },
            { "id": "tee-xl", "productId": "tee", "type": "size", "value": "XL",
              "priceModifier": 300 }
        ],
        "dependencies": []
    }));

    let report = fx.run();
    assert!(!report.has_errors(), "{report}");
    assert_eq!(fx.catalog.price_amounts(), vec![2800]);

    let m = fx.manifest();
    assert_eq!(m.variants[0].remote_price_id.as_deref(), Some("price_old"));
    assert!(m.variants[1].remote_price_id.is_some());

    fx.run();
    assert_eq!(fx.catalog.price_amounts().len(), 1);
}

// ---------------------------------------------------------------------------
// 4. Media lifecycle
// ---------------------------------------------------------------------------

#[test]
fn deleted_media_file_is_tombstoned_and_deleted_once() {
    let mut p = product("vase", "for-sale");
    p["media"] = json!([{ "localPath": "vase/side.jpg" }]);
    let fx = Fixture::new(manifest(vec![p]));
    fx.add_media("vase/side.jpg");
    fx.run();
    let asset = fx.manifest().products[0].media[0]
        .remote_asset_id
        .clone()
        .expect("uploaded");

    fx.remove_media("vase/side.jpg");
    let report = fx.run();
    assert_eq!(report.media.deleted, 1);

    let item = fx.manifest().products[0].media[0].clone();
    assert!(item.local_path.is_none());
    assert!(item.remote_asset_id.is_none());
    assert!(item.deleted_at.is_some());

    fx.run();
    let deletes = fx
        .media
        .calls()
        .into_iter()
        .filter(|c| *c == MediaCall::Delete(asset.clone()))
        .count();
    assert_eq!(deletes, 1);
}

#[test]
fn missing_file_never_uploaded_is_an_integrity_error() {
    let mut p = product("clock", "for-sale");
    p["media"] = json!([{ "localPath": "clock/face.jpg" }]);
    let fx = Fixture::new(manifest(vec![p]));

    let report = fx.run();
    let errors: Vec<_> = report.errors_in(Stage::Media).collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].entity_id, "clock");
    assert_eq!(report.catalog.created, 1);

    let item = fx.manifest().products[0].media[0].clone();
    assert_eq!(item.local_path.as_deref(), Some("clock/face.jpg"));
    assert!(item.deleted_at.is_none());
}

#[test]
fn legacy_media_records_are_migrated_and_written_back() {
    let mut p = product("chair", "internal");
    p["media"] = json!(["chair/seat.jpg", { "path": "chair/back.jpg", "order": 2 }]);
    let fx = Fixture::new(manifest(vec![p]));
    fx.add_media("chair/seat.jpg");
    fx.add_media("chair/back.jpg");

    let report = fx.run();
    assert!(report.manifest_written);
    assert_eq!(report.media.uploaded, 2);
    let text = fs::read_to_string(fx.manifest_path()).expect("read");
    assert!(text.contains("\"localPath\": \"chair/back.jpg\""));
}

// ---------------------------------------------------------------------------
// 5. Failure isolation
// ---------------------------------------------------------------------------

#[test]
fn catalog_failure_on_one_product_does_not_stop_the_next() {
    let mut a = product("a", "for-sale");
    a["remoteCatalogId"] = json!("prod_a");
    let fx = Fixture::new(manifest(vec![a, product("b", "for-sale")]));
    fx.catalog.fail_entity("a");

    let report = fx.run();
    let errors: Vec<_> = report.errors_in(Stage::Catalog).collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].entity_id, "a");
    assert_eq!(report.catalog.created, 1);

    let m = fx.manifest();
    assert_eq!(m.products[0].remote_catalog_id.as_deref(), Some("prod_a"));
    assert!(m.products[0].remote_price_id.is_none());
    assert!(m.products[0].last_synced_at.is_none());
    assert!(m.products[1].remote_catalog_id.is_some());
}

#[test]
fn invalid_manifest_is_fatal_and_nothing_is_called() {
    let fx = Fixture::new(json!({
        "version": 1,
        "products": [product("x", "for-sale"), product("x", "for-sale")]
    }));
    let result = Reconciler::new(&fx.media, &fx.catalog, Some(&fx.store), fx.media_root())
        .run(&fx.manifest_path(), &RunOptions::default());
    assert!(result.is_err());
    assert!(fx.catalog.calls().is_empty());
    assert!(active_ids(&fx.store).is_empty());
}

// ---------------------------------------------------------------------------
// 6. Dry run and audit
// ---------------------------------------------------------------------------

#[test]
fn dry_run_leaves_manifest_and_store_untouched() {
    let fx = Fixture::new(manifest(vec![product("desk", "for-sale")]));
    let before = fs::read_to_string(fx.manifest_path()).expect("read");

    let report = fx.run_with(RunOptions {
        dry_run: true,
        ..RunOptions::default()
    });
    assert!(report.dry_run);
    assert_eq!(report.catalog.created, 1);
    assert!(!report.manifest_written);
    assert!(!report.persistence.ran);

    assert_eq!(fs::read_to_string(fx.manifest_path()).expect("read"), before);
    assert!(active_ids(&fx.store).is_empty());
}

#[test]
fn audit_reports_remote_entities_no_product_claims() {
    let fx = Fixture::new(manifest(vec![product("kept", "for-sale")]));
    fx.catalog.seed_entity("prod_stray", Some("gone"), true);
    fx.catalog.seed_entity("prod_foreign", None, true);

    let report = fx.run_with(RunOptions {
        audit_orphans: true,
        ..RunOptions::default()
    });
    assert_eq!(report.catalog.orphans, Some(vec!["prod_stray".to_string()]));
    assert!(fx
        .catalog
        .calls()
        .iter()
        .all(|c| !matches!(c, CatalogCall::ArchiveEntity(_))));
}
