//! In-memory collaborators.
//!
//! Used for dry runs (intended calls are recorded, placeholder ids handed
//! out, nothing leaves the process) and as test doubles with failure
//! injection.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use stockroom_core::MediaKind;

use crate::catalog::{EntityDraft, PaymentCatalog, PriceDraft, RemoteEntity, VARIANT_ID_KEY};
use crate::error::RemoteError;
use crate::media::{MediaStore, UploadedAsset};
use crate::pagination::Page;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// Media
// ---------------------------------------------------------------------------

/// A call received by [`MemoryMediaStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaCall {
    Upload { key: String, kind: MediaKind },
    Delete(String),
}

/// Media store that keeps nothing but a call log.
#[derive(Debug, Default)]
pub struct MemoryMediaStore {
    calls: Mutex<Vec<MediaCall>>,
    failing: Mutex<HashSet<String>>,
    gone: Mutex<HashSet<String>>,
}

impl MemoryMediaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make uploads to `key_or_asset` (a remote key) or deletes of it (an
    /// asset id) fail.
    pub fn fail_on(&self, key_or_asset: &str) {
        lock(&self.failing).insert(key_or_asset.to_string());
    }

    /// Answer deletes of `asset_id` with `NotFound`, as if it was removed
    /// out of band.
    pub fn forget(&self, asset_id: &str) {
        lock(&self.gone).insert(asset_id.to_string());
    }

    pub fn calls(&self) -> Vec<MediaCall> {
        lock(&self.calls).clone()
    }

    fn check(&self, key: &str) -> Result<(), RemoteError> {
        if lock(&self.failing).contains(key) {
            return Err(RemoteError::Rejected(format!("injected failure for {key}")));
        }
        Ok(())
    }
}

impl MediaStore for MemoryMediaStore {
    fn upload(
        &self,
        _local_path: &Path,
        key: &str,
        kind: MediaKind,
    ) -> Result<UploadedAsset, RemoteError> {
        self.check(key)?;
        lock(&self.calls).push(MediaCall::Upload {
            key: key.to_string(),
            kind,
        });
        Ok(UploadedAsset {
            asset_id: format!("memory:{key}"),
            format: None,
        })
    }

    fn delete(&self, asset_id: &str) -> Result<(), RemoteError> {
        self.check(asset_id)?;
        if lock(&self.gone).contains(asset_id) {
            return Err(RemoteError::NotFound(asset_id.to_string()));
        }
        lock(&self.calls).push(MediaCall::Delete(asset_id.to_string()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// A call received by [`MemoryCatalog`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogCall {
    CreateEntity {
        manifest_id: Option<String>,
    },
    UpdateEntity(String),
    ArchiveEntity(String),
    CreatePrice {
        entity_id: String,
        unit_amount: i64,
        variant_id: Option<String>,
    },
    ArchivePrice(String),
}

#[derive(Debug, Default)]
struct CatalogState {
    entities: Vec<RemoteEntity>,
    calls: Vec<CatalogCall>,
    failing_entities: HashSet<String>,
    failing_prices: HashSet<String>,
    gone: HashSet<String>,
    next_id: usize,
}

/// Payment catalog that keeps its entities in memory.
///
/// Updates and archives of ids it has never seen are accepted, so a dry run
/// against a manifest that already carries real remote ids behaves like the
/// real catalog would.
#[derive(Debug)]
pub struct MemoryCatalog {
    state: Mutex<CatalogState>,
    page_size: usize,
}

impl Default for MemoryCatalog {
    fn default() -> Self {
        Self::with_page_size(100)
    }
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            state: Mutex::new(CatalogState::default()),
            page_size: page_size.max(1),
        }
    }

    /// Fail entity create/update/archive for manifest product `product_id`.
    pub fn fail_entity(&self, product_id: &str) {
        lock(&self.state)
            .failing_entities
            .insert(product_id.to_string());
    }

    /// Fail price creation for a variant id (or a variant-less product id).
    pub fn fail_price(&self, owner_id: &str) {
        lock(&self.state).failing_prices.insert(owner_id.to_string());
    }

    /// Drop a known entity id, so later updates and archives of it report
    /// `NotFound`.
    pub fn forget_entity(&self, entity_id: &str) {
        let mut state = lock(&self.state);
        state.entities.retain(|e| e.id != entity_id);
        state.gone.insert(entity_id.to_string());
    }

    /// Pre-populate an entity, as if created by an earlier run.
    pub fn seed_entity(&self, id: &str, manifest_id: Option<&str>, active: bool) {
        lock(&self.state).entities.push(RemoteEntity {
            id: id.to_string(),
            active,
            manifest_id: manifest_id.map(str::to_string),
        });
    }

    pub fn calls(&self) -> Vec<CatalogCall> {
        lock(&self.state).calls.clone()
    }

    /// Amounts of every price created, in call order.
    pub fn price_amounts(&self) -> Vec<i64> {
        lock(&self.state)
            .calls
            .iter()
            .filter_map(|c| match c {
                CatalogCall::CreatePrice { unit_amount, .. } => Some(*unit_amount),
                _ => None,
            })
            .collect()
    }

    pub fn entity(&self, id: &str) -> Option<RemoteEntity> {
        lock(&self.state).entities.iter().find(|e| e.id == id).cloned()
    }

    fn rejected(what: &str) -> RemoteError {
        RemoteError::Rejected(format!("injected failure for {what}"))
    }
}

impl CatalogState {
    fn next(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}_mem_{}", self.next_id)
    }

    fn manifest_id_of(&self, entity_id: &str) -> Option<String> {
        self.entities
            .iter()
            .find(|e| e.id == entity_id)
            .and_then(|e| e.manifest_id.clone())
    }

    fn entity_fails(&self, entity_id: &str, draft: Option<&EntityDraft>) -> bool {
        let from_draft = draft.and_then(|d| d.manifest_id().map(str::to_string));
        from_draft
            .or_else(|| self.manifest_id_of(entity_id))
            .is_some_and(|id| self.failing_entities.contains(&id))
    }
}

impl PaymentCatalog for MemoryCatalog {
    fn create_entity(&self, draft: &EntityDraft) -> Result<String, RemoteError> {
        let mut state = lock(&self.state);
        if state.entity_fails("", Some(draft)) {
            return Err(Self::rejected(draft.manifest_id().unwrap_or("entity")));
        }
        let id = state.next("prod");
        state.calls.push(CatalogCall::CreateEntity {
            manifest_id: draft.manifest_id().map(str::to_string),
        });
        state.entities.push(RemoteEntity {
            id: id.clone(),
            active: draft.active,
            manifest_id: draft.manifest_id().map(str::to_string),
        });
        Ok(id)
    }

    fn update_entity(&self, entity_id: &str, draft: &EntityDraft) -> Result<(), RemoteError> {
        let mut state = lock(&self.state);
        if state.entity_fails(entity_id, Some(draft)) {
            return Err(Self::rejected(entity_id));
        }
        if state.gone.contains(entity_id) {
            return Err(RemoteError::NotFound(entity_id.to_string()));
        }
        state.calls.push(CatalogCall::UpdateEntity(entity_id.to_string()));
        if let Some(entity) = state.entities.iter_mut().find(|e| e.id == entity_id) {
            entity.active = draft.active;
        }
        Ok(())
    }

    fn archive_entity(&self, entity_id: &str) -> Result<(), RemoteError> {
        let mut state = lock(&self.state);
        if state.entity_fails(entity_id, None) {
            return Err(Self::rejected(entity_id));
        }
        if state.gone.contains(entity_id) {
            return Err(RemoteError::NotFound(entity_id.to_string()));
        }
        state.calls.push(CatalogCall::ArchiveEntity(entity_id.to_string()));
        if let Some(entity) = state.entities.iter_mut().find(|e| e.id == entity_id) {
            entity.active = false;
        }
        Ok(())
    }

    fn create_price(&self, entity_id: &str, draft: &PriceDraft) -> Result<String, RemoteError> {
        let mut state = lock(&self.state);
        let owner = draft
            .metadata
            .get(VARIANT_ID_KEY)
            .or_else(|| draft.metadata.get(crate::catalog::MANIFEST_ID_KEY))
            .cloned()
            .unwrap_or_default();
        if state.failing_prices.contains(&owner) {
            return Err(Self::rejected(&owner));
        }
        let id = state.next("price");
        state.calls.push(CatalogCall::CreatePrice {
            entity_id: entity_id.to_string(),
            unit_amount: draft.unit_amount,
            variant_id: draft.metadata.get(VARIANT_ID_KEY).cloned(),
        });
        Ok(id)
    }

    fn archive_price(&self, price_id: &str) -> Result<(), RemoteError> {
        lock(&self.state)
            .calls
            .push(CatalogCall::ArchivePrice(price_id.to_string()));
        Ok(())
    }

    fn list_entities(&self, cursor: Option<&str>) -> Result<Page<RemoteEntity>, RemoteError> {
        let state = lock(&self.state);
        let start = match cursor {
            Some(c) => c
                .parse::<usize>()
                .map_err(|_| RemoteError::Rejected(format!("bad cursor {c}")))?,
            None => 0,
        };
        let end = (start + self.page_size).min(state.entities.len());
        let items = state.entities.get(start..end).unwrap_or_default().to_vec();
        let next_cursor = (end < state.entities.len()).then(|| end.to_string());
        Ok(Page { items, next_cursor })
    }
}
