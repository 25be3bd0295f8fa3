//! SQLite-backed [`CatalogStore`].

use std::collections::HashSet;
use std::path::Path;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::json;

use stockroom_core::{
    Dependency, MediaItem, Product, ProductId, ProductSpec, Variant, VariantId,
};

use crate::error::StoreError;
use crate::persistence::{CatalogStore, RowChange};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS products (
    id                TEXT PRIMARY KEY,
    name              TEXT NOT NULL,
    description       TEXT NOT NULL DEFAULT '',
    category          TEXT NOT NULL DEFAULT '',
    base_price        INTEGER NOT NULL,
    has_variants      INTEGER NOT NULL DEFAULT 0,
    sell_status       TEXT NOT NULL,
    remote_catalog_id TEXT,
    remote_price_id   TEXT,
    media_json        TEXT NOT NULL DEFAULT '[]',
    is_active         INTEGER NOT NULL DEFAULT 1,
    sold_quantity     INTEGER NOT NULL DEFAULT 0,
    synced_at         TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS variants (
    id                       TEXT PRIMARY KEY,
    product_id               TEXT NOT NULL REFERENCES products(id),
    variant_type             TEXT NOT NULL,
    value                    TEXT NOT NULL,
    price_modifier           INTEGER NOT NULL DEFAULT 0,
    remote_catalog_parent_id TEXT,
    remote_price_id          TEXT,
    media_json               TEXT NOT NULL DEFAULT '[]',
    is_limited_edition       INTEGER NOT NULL DEFAULT 0,
    max_quantity             INTEGER,
    is_active                INTEGER NOT NULL DEFAULT 1,
    sold_quantity            INTEGER NOT NULL DEFAULT 0,
    synced_at                TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS product_specs (
    product_id TEXT NOT NULL REFERENCES products(id),
    label      TEXT NOT NULL,
    value      TEXT NOT NULL,
    PRIMARY KEY (product_id, label)
);

CREATE TABLE IF NOT EXISTS product_dependencies (
    product_id TEXT NOT NULL REFERENCES products(id),
    depends_on TEXT NOT NULL REFERENCES products(id),
    kind       TEXT NOT NULL,
    PRIMARY KEY (product_id, depends_on)
);
"#;

// The WHERE clause makes an identical row a no-op, so `changes()` tells
// written rows from unchanged ones. `sold_quantity` is never in the SET list.
const UPSERT_PRODUCT: &str = r#"
INSERT INTO products (id, name, description, category, base_price, has_variants,
                      sell_status, remote_catalog_id, remote_price_id, media_json,
                      is_active, synced_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 1, ?11)
ON CONFLICT(id) DO UPDATE SET
    name = excluded.name,
    description = excluded.description,
    category = excluded.category,
    base_price = excluded.base_price,
    has_variants = excluded.has_variants,
    sell_status = excluded.sell_status,
    remote_catalog_id = excluded.remote_catalog_id,
    remote_price_id = excluded.remote_price_id,
    media_json = excluded.media_json,
    is_active = 1,
    synced_at = excluded.synced_at
WHERE products.name IS NOT excluded.name
   OR products.description IS NOT excluded.description
   OR products.category IS NOT excluded.category
   OR products.base_price IS NOT excluded.base_price
   OR products.has_variants IS NOT excluded.has_variants
   OR products.sell_status IS NOT excluded.sell_status
   OR products.remote_catalog_id IS NOT excluded.remote_catalog_id
   OR products.remote_price_id IS NOT excluded.remote_price_id
   OR products.media_json IS NOT excluded.media_json
   OR products.is_active = 0
"#;

const UPSERT_VARIANT: &str = r#"
INSERT INTO variants (id, product_id, variant_type, value, price_modifier,
                      remote_catalog_parent_id, remote_price_id, media_json,
                      is_limited_edition, max_quantity, is_active, synced_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 1, ?11)
ON CONFLICT(id) DO UPDATE SET
    product_id = excluded.product_id,
    variant_type = excluded.variant_type,
    value = excluded.value,
    price_modifier = excluded.price_modifier,
    remote_catalog_parent_id = excluded.remote_catalog_parent_id,
    remote_price_id = excluded.remote_price_id,
    media_json = excluded.media_json,
    is_limited_edition = excluded.is_limited_edition,
    max_quantity = excluded.max_quantity,
    is_active = 1,
    synced_at = excluded.synced_at
WHERE variants.product_id IS NOT excluded.product_id
   OR variants.variant_type IS NOT excluded.variant_type
   OR variants.value IS NOT excluded.value
   OR variants.price_modifier IS NOT excluded.price_modifier
   OR variants.remote_catalog_parent_id IS NOT excluded.remote_catalog_parent_id
   OR variants.remote_price_id IS NOT excluded.remote_price_id
   OR variants.media_json IS NOT excluded.media_json
   OR variants.is_limited_edition IS NOT excluded.is_limited_edition
   OR variants.max_quantity IS NOT excluded.max_quantity
   OR variants.is_active = 0
"#;

/// A product row as stored, including fulfillment-owned columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductRow {
    pub id: String,
    pub name: String,
    pub sell_status: String,
    pub remote_catalog_id: Option<String>,
    pub is_active: bool,
    pub sold_quantity: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantRow {
    pub id: String,
    pub product_id: String,
    pub remote_price_id: Option<String>,
    pub max_quantity: Option<u32>,
    pub is_active: bool,
    pub sold_quantity: i64,
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (creating if needed) the database file and bootstrap the schema.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Add `quantity` to the sold counter of a product, and of the variant
    /// when one is given. Owned by order fulfillment; sync never calls it.
    pub fn record_sale(
        &self,
        product_id: &ProductId,
        variant_id: Option<&VariantId>,
        quantity: u32,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "UPDATE products SET sold_quantity = sold_quantity + ?2 WHERE id = ?1",
            params![product_id.0, quantity],
        )?;
        if let Some(variant_id) = variant_id {
            self.conn.execute(
                "UPDATE variants SET sold_quantity = sold_quantity + ?2 WHERE id = ?1",
                params![variant_id.0, quantity],
            )?;
        }
        Ok(())
    }

    pub fn product_row(&self, id: &ProductId) -> Result<Option<ProductRow>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, name, sell_status, remote_catalog_id, is_active, sold_quantity
                 FROM products WHERE id = ?1",
                params![id.0],
                |row| {
                    Ok(ProductRow {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        sell_status: row.get(2)?,
                        remote_catalog_id: row.get(3)?,
                        is_active: row.get(4)?,
                        sold_quantity: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn variant_row(&self, id: &VariantId) -> Result<Option<VariantRow>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, product_id, remote_price_id, max_quantity, is_active, sold_quantity
                 FROM variants WHERE id = ?1",
                params![id.0],
                |row| {
                    Ok(VariantRow {
                        id: row.get(0)?,
                        product_id: row.get(1)?,
                        remote_price_id: row.get(2)?,
                        max_quantity: row.get(3)?,
                        is_active: row.get(4)?,
                        sold_quantity: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Spec rows of a product, ordered by label.
    pub fn spec_rows(&self, product_id: &ProductId) -> Result<Vec<ProductSpec>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT label, value FROM product_specs WHERE product_id = ?1 ORDER BY label",
        )?;
        let rows = stmt
            .query_map(params![product_id.0], |row| {
                Ok(ProductSpec {
                    label: row.get(0)?,
                    value: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn active_product_ids(&self) -> Result<Vec<String>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM products WHERE is_active = 1 ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    /// Kept ids go through a temp table so the sweep is not bounded by the
    /// bind-variable limit.
    fn deactivate_except(&self, table: &str, keep: &[&str]) -> Result<usize, StoreError> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute_batch(
            "CREATE TEMP TABLE IF NOT EXISTS sweep_keep (id TEXT PRIMARY KEY);
             DELETE FROM sweep_keep;",
        )?;
        {
            let mut insert =
                tx.prepare_cached("INSERT OR IGNORE INTO sweep_keep (id) VALUES (?1)")?;
            for id in keep {
                insert.execute(params![id])?;
            }
        }
        let sql = format!(
            "UPDATE {table} SET is_active = 0 \
             WHERE is_active = 1 AND id NOT IN (SELECT id FROM temp.sweep_keep)"
        );
        let changed = tx.execute(&sql, [])?;
        tx.execute("DELETE FROM sweep_keep", [])?;
        tx.commit()?;
        Ok(changed)
    }
}

/// Live media as stored in the `media_json` column: uploaded items only,
/// in display order.
fn media_json(media: &[MediaItem]) -> Result<String, StoreError> {
    let mut live: Vec<&MediaItem> = media
        .iter()
        .filter(|m| !m.is_tombstoned() && m.remote_asset_id.is_some())
        .collect();
    live.sort_by_key(|m| m.order);
    let items: Vec<serde_json::Value> = live
        .into_iter()
        .map(|m| {
            json!({
                "assetId": m.remote_asset_id,
                "type": m.kind,
                "format": m.format,
                "category": m.category,
                "order": m.order,
            })
        })
        .collect();
    Ok(serde_json::to_string(&items)?)
}

fn written(changes: usize) -> RowChange {
    if changes == 0 {
        RowChange::Unchanged
    } else {
        RowChange::Written
    }
}

impl CatalogStore for SqliteStore {
    fn upsert_product(&self, product: &Product) -> Result<RowChange, StoreError> {
        let changes = self.conn.execute(
            UPSERT_PRODUCT,
            params![
                product.id.0,
                product.name,
                product.description,
                product.category,
                product.base_price,
                product.has_variants,
                product.sell_status.to_string(),
                product.remote_catalog_id,
                product.remote_price_id,
                media_json(&product.media)?,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(written(changes))
    }

    fn upsert_variant(&self, variant: &Variant) -> Result<RowChange, StoreError> {
        let changes = self.conn.execute(
            UPSERT_VARIANT,
            params![
                variant.id.0,
                variant.product_id.0,
                variant.variant_type,
                variant.value,
                variant.price_modifier,
                variant.remote_catalog_parent_id,
                variant.remote_price_id,
                media_json(&variant.media)?,
                variant.is_limited_edition,
                variant.max_quantity,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(written(changes))
    }

    fn insert_spec(
        &self,
        product_id: &ProductId,
        spec: &ProductSpec,
    ) -> Result<RowChange, StoreError> {
        let changes = self.conn.execute(
            "INSERT OR IGNORE INTO product_specs (product_id, label, value) VALUES (?1, ?2, ?3)",
            params![product_id.0, spec.label, spec.value],
        )?;
        Ok(written(changes))
    }

    fn prune_specs(
        &self,
        product_id: &ProductId,
        keep: &[ProductSpec],
    ) -> Result<usize, StoreError> {
        let keep: HashSet<(&str, &str)> = keep
            .iter()
            .map(|s| (s.label.as_str(), s.value.as_str()))
            .collect();
        let stale: Vec<String> = self
            .spec_rows(product_id)?
            .into_iter()
            .filter(|s| !keep.contains(&(s.label.as_str(), s.value.as_str())))
            .map(|s| s.label)
            .collect();
        let mut removed = 0;
        for label in stale {
            removed += self.conn.execute(
                "DELETE FROM product_specs WHERE product_id = ?1 AND label = ?2",
                params![product_id.0, label],
            )?;
        }
        Ok(removed)
    }

    fn insert_dependency(&self, dependency: &Dependency) -> Result<RowChange, StoreError> {
        let changes = self.conn.execute(
            "INSERT OR IGNORE INTO product_dependencies (product_id, depends_on, kind)
             VALUES (?1, ?2, ?3)",
            params![
                dependency.product_id.0,
                dependency.depends_on.0,
                dependency.kind.to_string()
            ],
        )?;
        Ok(written(changes))
    }

    fn prune_dependencies(
        &self,
        product_id: &ProductId,
        keep: &[&Dependency],
    ) -> Result<usize, StoreError> {
        let keep: HashSet<(String, String)> = keep
            .iter()
            .map(|d| (d.depends_on.0.clone(), d.kind.to_string()))
            .collect();
        let mut stmt = self.conn.prepare(
            "SELECT depends_on, kind FROM product_dependencies WHERE product_id = ?1",
        )?;
        let stale: Vec<String> = stmt
            .query_map(params![product_id.0], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .filter(|pair| !keep.contains(pair))
            .map(|(depends_on, _)| depends_on)
            .collect();
        let mut removed = 0;
        for depends_on in stale {
            removed += self.conn.execute(
                "DELETE FROM product_dependencies WHERE product_id = ?1 AND depends_on = ?2",
                params![product_id.0, depends_on],
            )?;
        }
        Ok(removed)
    }

    fn deactivate_products_except(&self, keep: &[ProductId]) -> Result<usize, StoreError> {
        let keep: Vec<&str> = keep.iter().map(|id| id.0.as_str()).collect();
        self.deactivate_except("products", &keep)
    }

    fn deactivate_variants_except(&self, keep: &[VariantId]) -> Result<usize, StoreError> {
        let keep: Vec<&str> = keep.iter().map(|id| id.0.as_str()).collect();
        self.deactivate_except("variants", &keep)
    }
}
