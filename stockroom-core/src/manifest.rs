//! Manifest store: load, migrate, validate and persist the catalog manifest.
//!
//! # Load flow
//!
//! 1. Read the file into a JSON tree.
//! 2. Reject unsupported `version` values.
//! 3. Migrate legacy media records in place (see [`MediaRecord`]).
//! 4. Deserialize into [`Manifest`] (unknown fields rejected).
//! 5. Validate cross-entity invariants, collecting every issue.
//!
//! Any failure is a [`ManifestError`]; callers treat all of them as fatal.
//!
//! # Save
//!
//! [`ManifestFile::save`] only touches disk when the in-memory document
//! differs from what was loaded (or a migration ran). The write is a full
//! overwrite through a `.json.tmp` sibling and `rename`.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{manifest_io, ManifestError};
use crate::types::{Manifest, MediaItem, MediaKind, MANIFEST_VERSION};

// ---------------------------------------------------------------------------
// ManifestFile
// ---------------------------------------------------------------------------

/// A loaded manifest together with the state needed to decide write-back.
#[derive(Debug, Clone)]
pub struct ManifestFile {
    path: PathBuf,
    /// The working document; reconciliation stages mutate this.
    pub manifest: Manifest,
    baseline: Manifest,
    migrated: usize,
}

impl ManifestFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of media records rewritten from a legacy shape during load.
    pub fn migrated_records(&self) -> usize {
        self.migrated
    }

    /// Whether the working document differs from the file on disk.
    pub fn is_dirty(&self) -> bool {
        self.migrated > 0 || self.manifest != self.baseline
    }

    /// Write the working document back if it is dirty.
    ///
    /// Returns `true` when the file was written.
    pub fn save(&mut self) -> Result<bool, ManifestError> {
        if !self.is_dirty() {
            return Ok(false);
        }
        save_at(&self.path, &self.manifest)?;
        self.baseline = self.manifest.clone();
        self.migrated = 0;
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Load, migrate and validate the manifest at `path`.
pub fn load(path: &Path) -> Result<ManifestFile, ManifestError> {
    if !path.exists() {
        return Err(ManifestError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let contents = std::fs::read_to_string(path).map_err(|e| manifest_io(path, e))?;
    let mut doc: Value = serde_json::from_str(&contents).map_err(|e| ManifestError::Parse {
        path: path.to_path_buf(),
        source: e,
    })?;

    if let Some(found) = doc.get("version").and_then(Value::as_u64) {
        if found != u64::from(MANIFEST_VERSION) {
            return Err(ManifestError::UnsupportedVersion {
                path: path.to_path_buf(),
                found: u32::try_from(found).unwrap_or(u32::MAX),
                supported: MANIFEST_VERSION,
            });
        }
    }

    let migrated =
        migrate_media(&mut doc).map_err(|location| ManifestError::UnrecognizedMedia {
            path: path.to_path_buf(),
            location,
        })?;

    let manifest: Manifest = serde_json::from_value(doc).map_err(|e| ManifestError::Parse {
        path: path.to_path_buf(),
        source: e,
    })?;

    let issues = validate(&manifest);
    if !issues.is_empty() {
        return Err(ManifestError::Invalid {
            path: path.to_path_buf(),
            issues,
        });
    }

    Ok(ManifestFile {
        path: path.to_path_buf(),
        baseline: manifest.clone(),
        manifest,
        migrated,
    })
}

// ---------------------------------------------------------------------------
// Media migration
// ---------------------------------------------------------------------------

/// Every shape a media record has been written in.
///
/// Tried in order; a record matching none of them is rejected.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MediaRecord {
    Current(MediaItem),
    Legacy(LegacyMediaItem),
    Bare(String),
}

/// The snake_case shape written by earlier catalog tooling.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LegacyMediaItem {
    #[serde(alias = "path")]
    local_path: Option<String>,
    #[serde(alias = "cloudinary_id")]
    public_id: Option<String>,
    resource_type: Option<MediaKind>,
    format: Option<String>,
    category: Option<String>,
    #[serde(alias = "order")]
    sort_order: Option<u32>,
    uploaded_at: Option<DateTime<Utc>>,
    deleted_at: Option<DateTime<Utc>>,
}

impl From<LegacyMediaItem> for MediaItem {
    fn from(legacy: LegacyMediaItem) -> Self {
        MediaItem {
            local_path: legacy.local_path,
            remote_asset_id: legacy.public_id,
            kind: legacy.resource_type,
            format: legacy.format,
            category: legacy.category,
            order: legacy.sort_order.unwrap_or_default(),
            uploaded_at: legacy.uploaded_at,
            deleted_at: legacy.deleted_at,
        }
    }
}

/// Rewrite legacy media records under `products[*].media` and
/// `variants[*].media` into the current shape.
///
/// Returns the number of rewritten records, or the JSON location of the first
/// record that matches no known shape.
fn migrate_media(doc: &mut Value) -> Result<usize, String> {
    let mut migrated = 0;
    for section in ["products", "variants"] {
        let Some(entities) = doc.get_mut(section).and_then(Value::as_array_mut) else {
            continue;
        };
        for (i, entity) in entities.iter_mut().enumerate() {
            let Some(media) = entity.get_mut("media").and_then(Value::as_array_mut) else {
                continue;
            };
            for (j, record) in media.iter_mut().enumerate() {
                let location = format!("{section}[{i}].media[{j}]");
                let parsed = serde_json::from_value::<MediaRecord>(record.clone())
                    .map_err(|_| location.clone())?;
                let item = match parsed {
                    MediaRecord::Current(_) => continue,
                    MediaRecord::Legacy(legacy) => MediaItem::from(legacy),
                    MediaRecord::Bare(path) => MediaItem::local(path),
                };
                *record = serde_json::to_value(item).map_err(|_| location)?;
                migrated += 1;
            }
        }
    }
    Ok(migrated)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Check cross-entity invariants. Returns every issue found; empty means valid.
pub fn validate(manifest: &Manifest) -> Vec<String> {
    let mut issues = Vec::new();

    let mut product_ids = HashSet::new();
    for product in &manifest.products {
        if product.id.0.trim().is_empty() {
            issues.push("product with empty id".to_string());
        } else if !product_ids.insert(&product.id) {
            issues.push(format!("duplicate product id '{}'", product.id));
        }
        if product.base_price < 0 {
            issues.push(format!("product '{}' has a negative basePrice", product.id));
        }
        let mut labels = HashSet::new();
        for spec in &product.specs {
            if !labels.insert(spec.label.as_str()) {
                issues.push(format!(
                    "product '{}' repeats spec label '{}'",
                    product.id, spec.label
                ));
            }
        }
        check_media(&product.media, &format!("product '{}'", product.id), &mut issues);
    }

    let mut variant_ids = HashSet::new();
    for variant in &manifest.variants {
        if variant.id.0.trim().is_empty() {
            issues.push("variant with empty id".to_string());
        } else if !variant_ids.insert(&variant.id) {
            issues.push(format!("duplicate variant id '{}'", variant.id));
        }
        match manifest.product(&variant.product_id) {
            None => issues.push(format!(
                "variant '{}' references unknown product '{}'",
                variant.id, variant.product_id
            )),
            Some(product) => match variant.unit_price(product.base_price) {
                None => issues.push(format!("variant '{}' price overflows", variant.id)),
                Some(price) if price < 0 => {
                    issues.push(format!("variant '{}' has a negative price", variant.id))
                }
                Some(_) => {}
            },
        }
        check_media(&variant.media, &format!("variant '{}'", variant.id), &mut issues);
    }

    for product in &manifest.products {
        let has_any = manifest
            .variants
            .iter()
            .any(|v| v.product_id == product.id);
        if product.has_variants && !has_any {
            issues.push(format!(
                "product '{}' sets hasVariants but no variant references it",
                product.id
            ));
        }
        if !product.has_variants && has_any {
            issues.push(format!(
                "product '{}' has variants but hasVariants is false",
                product.id
            ));
        }
    }

    for dep in &manifest.dependencies {
        for id in [&dep.product_id, &dep.depends_on] {
            if !product_ids.contains(id) {
                issues.push(format!("dependency references unknown product '{id}'"));
            }
        }
        if dep.product_id == dep.depends_on {
            issues.push(format!("product '{}' depends on itself", dep.product_id));
        }
    }

    issues
}

fn check_media(media: &[MediaItem], owner: &str, issues: &mut Vec<String>) {
    for (i, item) in media.iter().enumerate() {
        if item.is_tombstoned() {
            if item.local_path.is_some() || item.remote_asset_id.is_some() {
                issues.push(format!(
                    "{owner} media[{i}] is deleted but still references a file or asset"
                ));
            }
            continue;
        }
        match (&item.local_path, &item.remote_asset_id) {
            (None, None) => issues.push(format!(
                "{owner} media[{i}] has neither localPath nor remoteAssetId"
            )),
            (Some(path), _) if path.trim().is_empty() => {
                issues.push(format!("{owner} media[{i}] has an empty localPath"))
            }
            (Some(path), _) if escapes_root(path) => {
                issues.push(format!(
                    "{owner} media[{i}] localPath '{path}' must stay inside the media root"
                ))
            }
            _ => {}
        }
    }
}

fn escapes_root(path: &str) -> bool {
    let path = Path::new(path);
    path.is_absolute()
        || path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
}

// ---------------------------------------------------------------------------
// Save (atomic)
// ---------------------------------------------------------------------------

/// Unconditionally write `manifest` to `path`.
///
/// Write flow: serialize → `.json.tmp` sibling → `rename`.
pub fn save_at(path: &Path, manifest: &Manifest) -> Result<(), ManifestError> {
    let mut json = serde_json::to_string_pretty(manifest)?;
    json.push('\n');
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(|e| manifest_io(&tmp, e))?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(manifest_io(path, e));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
