//! Media reconciliation against the CDN.
//!
//! ## Upload pass
//!
//! Live items with a `localPath` and no `remoteAssetId` are uploaded under a
//! key derived only from the local path, so a retried upload lands on the same
//! remote key. Items that already carry a `remoteAssetId` are skipped.
//!
//! ## Tombstone pass
//!
//! Items that were uploaded but whose file has since disappeared get their
//! remote asset deleted and are tombstoned in place.

use std::path::Path;

use chrono::Utc;
use sha2::{Digest, Sha256};

use stockroom_core::{Manifest, MediaItem, MediaKind};

use crate::error::RemoteError;
use crate::report::{Stage, SyncReport};

/// What the CDN returns for a successful upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedAsset {
    pub asset_id: String,
    pub format: Option<String>,
}

/// The CDN collaborator.
pub trait MediaStore {
    /// Upload the file at `local_path` under `key`.
    fn upload(
        &self,
        local_path: &Path,
        key: &str,
        kind: MediaKind,
    ) -> Result<UploadedAsset, RemoteError>;

    /// Delete a previously uploaded asset. Unknown ids yield
    /// [`RemoteError::NotFound`].
    fn delete(&self, asset_id: &str) -> Result<(), RemoteError>;
}

const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "avif", "svg", "heic", "tif", "tiff", "bmp",
];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "webm", "m4v", "avi", "mkv"];

fn extension(local_path: &str) -> Option<String> {
    Path::new(local_path)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
}

/// CDN resource kind for a file, by extension.
pub fn resource_kind_for(local_path: &str) -> MediaKind {
    match extension(local_path).as_deref() {
        Some(ext) if IMAGE_EXTENSIONS.contains(&ext) => MediaKind::Image,
        Some(ext) if VIDEO_EXTENSIONS.contains(&ext) => MediaKind::Video,
        _ => MediaKind::Raw,
    }
}

/// Deterministic remote key for a media-root-relative path.
///
/// `<folder>/<slugged path without extension>-<10 hex chars of sha256(path)>`
pub fn remote_key_for(folder: &str, local_path: &str) -> String {
    let normalized = local_path.replace('\\', "/");
    let normalized = normalized.trim_start_matches("./");
    let stem = match normalized.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.contains('/') => stem,
        _ => normalized,
    };

    let digest = hex::encode(Sha256::digest(normalized.as_bytes()));
    let name = format!("{}-{}", slugify(stem), &digest[..10]);

    let folder = folder.trim_matches('/');
    if folder.is_empty() {
        name
    } else {
        format!("{folder}/{name}")
    }
}

fn slugify(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_matches('-').to_string()
}

/// Every media list in the manifest with its owner id, products first.
fn media_owners(manifest: &mut Manifest) -> impl Iterator<Item = (String, &mut Vec<MediaItem>)> {
    let products = manifest
        .products
        .iter_mut()
        .map(|p| (p.id.0.clone(), &mut p.media));
    let variants = manifest
        .variants
        .iter_mut()
        .map(|v| (v.id.0.clone(), &mut v.media));
    products.chain(variants)
}

/// Reconciles manifest media items with a [`MediaStore`].
pub struct MediaSyncer<'a> {
    store: &'a dyn MediaStore,
    media_root: &'a Path,
    folder: &'a str,
}

impl<'a> MediaSyncer<'a> {
    pub fn new(store: &'a dyn MediaStore, media_root: &'a Path, folder: &'a str) -> Self {
        Self {
            store,
            media_root,
            folder,
        }
    }

    /// Upload every live, not-yet-uploaded item. Products first, then variants.
    pub fn upload_pass(&self, manifest: &mut Manifest, report: &mut SyncReport) {
        for (owner, media) in media_owners(manifest) {
            for item in media.iter_mut() {
                if item.is_tombstoned() {
                    continue;
                }
                if item.remote_asset_id.is_some() {
                    report.media.skipped += 1;
                    continue;
                }
                let Some(local) = item.local_path.clone() else {
                    continue;
                };
                if let Err(message) = self.upload_item(item, &local) {
                    report.record(Stage::Media, owner.as_str(), message);
                } else {
                    report.media.uploaded += 1;
                }
            }
        }
    }

    fn upload_item(&self, item: &mut MediaItem, local: &str) -> Result<(), String> {
        let path = self.media_root.join(local);
        if !path.is_file() {
            return Err(format!("media file not found: {local}"));
        }
        let kind = resource_kind_for(local);
        let key = remote_key_for(self.folder, local);
        let asset = self
            .store
            .upload(&path, &key, kind)
            .map_err(|e| format!("upload of {local} failed: {e}"))?;

        tracing::info!("uploaded {} -> {}", local, asset.asset_id);
        item.remote_asset_id = Some(asset.asset_id);
        item.kind = Some(kind);
        item.format = asset.format.or_else(|| extension(local));
        item.uploaded_at = Some(Utc::now());
        Ok(())
    }

    /// Delete remote assets whose local file is gone and tombstone the items.
    pub fn tombstone_pass(&self, manifest: &mut Manifest, report: &mut SyncReport) {
        for (owner, media) in media_owners(manifest) {
            for item in media.iter_mut() {
                if item.is_tombstoned() {
                    continue;
                }
                let (Some(local), Some(asset_id)) =
                    (item.local_path.clone(), item.remote_asset_id.clone())
                else {
                    continue;
                };
                if self.media_root.join(&local).exists() {
                    continue;
                }
                match self.store.delete(&asset_id) {
                    Ok(()) => tracing::info!("deleted remote asset {asset_id} ({local} removed)"),
                    Err(RemoteError::NotFound(_)) => {
                        tracing::debug!("remote asset {asset_id} already gone")
                    }
                    Err(e) => {
                        report.record(
                            Stage::Media,
                            owner.as_str(),
                            format!("delete of {asset_id} failed: {e}"),
                        );
                        continue;
                    }
                }
                item.tombstone(Utc::now());
                report.media.deleted += 1;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
