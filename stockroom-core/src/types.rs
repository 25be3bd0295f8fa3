//! Domain types for the Stockroom manifest.
//!
//! JSON field names are camelCase. Every struct rejects unknown fields so a
//! typo in the manifest fails validation instead of being silently dropped.
//! Media paths stay `String` (manifest-relative, forward slashes); they are
//! joined onto the media root only at the filesystem boundary.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Manifest document version this build reads and writes.
pub const MANIFEST_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Operator-assigned, immutable product key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProductId(pub String);

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ProductId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ProductId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Operator-assigned, immutable variant key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VariantId(pub String);

impl fmt::Display for VariantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for VariantId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VariantId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Where a product sits in its commercial lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SellStatus {
    #[default]
    Internal,
    PreOrder,
    ForSale,
    Discontinued,
}

impl SellStatus {
    /// Whether the product should be purchasable in the payment catalog.
    pub fn is_purchasable(self) -> bool {
        matches!(self, SellStatus::PreOrder | SellStatus::ForSale)
    }
}

impl fmt::Display for SellStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SellStatus::Internal => write!(f, "internal"),
            SellStatus::PreOrder => write!(f, "pre-order"),
            SellStatus::ForSale => write!(f, "for-sale"),
            SellStatus::Discontinued => write!(f, "discontinued"),
        }
    }
}

/// CDN resource kind, chosen from the media file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Raw,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Image => write!(f, "image"),
            MediaKind::Video => write!(f, "video"),
            MediaKind::Raw => write!(f, "raw"),
        }
    }
}

/// How strongly one product depends on another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    #[default]
    Requires,
    Recommends,
}

impl fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DependencyKind::Requires => write!(f, "requires"),
            DependencyKind::Recommends => write!(f, "recommends"),
        }
    }
}

// ---------------------------------------------------------------------------
// Domain structs
// ---------------------------------------------------------------------------

/// A media file attached to a product or variant.
///
/// Never removed from the manifest: once its file disappears after upload it
/// becomes a tombstone (`local_path` and `remote_asset_id` cleared,
/// `deleted_at` set).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MediaItem {
    /// Path relative to the media root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_asset_id: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<MediaKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default)]
    pub order: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploaded_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl MediaItem {
    /// A media item pointing at a not-yet-uploaded local file.
    pub fn local(path: impl Into<String>) -> Self {
        Self {
            local_path: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn is_tombstoned(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Clear the file and remote references and stamp the deletion time.
    pub fn tombstone(&mut self, at: DateTime<Utc>) {
        self.local_path = None;
        self.remote_asset_id = None;
        self.deleted_at = Some(at);
    }
}

/// A `label: value` attribute shown on the product page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ProductSpec {
    pub label: String,
    pub value: String,
}

/// A product in the declarative catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    /// Minor currency units.
    pub base_price: i64,
    #[serde(default)]
    pub has_variants: bool,
    #[serde(default)]
    pub sell_status: SellStatus,
    #[serde(default)]
    pub media: Vec<MediaItem>,
    #[serde(default)]
    pub specs: Vec<ProductSpec>,
    /// Set only after a successful remote create.
    #[serde(default)]
    pub remote_catalog_id: Option<String>,
    /// The single price of a variant-less product.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_price_id: Option<String>,
    /// SHA-256 of the catalog payload last pushed for this product.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog_fingerprint: Option<String>,
    #[serde(default)]
    pub last_synced_at: Option<DateTime<Utc>>,
}

/// A purchasable variation of a product (size, colour, edition…).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Variant {
    pub id: VariantId,
    pub product_id: ProductId,
    #[serde(rename = "type")]
    pub variant_type: String,
    pub value: String,
    /// Added to the product's base price; may be negative.
    #[serde(default)]
    pub price_modifier: i64,
    #[serde(default)]
    pub remote_catalog_parent_id: Option<String>,
    #[serde(default)]
    pub remote_price_id: Option<String>,
    #[serde(default)]
    pub media: Vec<MediaItem>,
    #[serde(default)]
    pub is_limited_edition: bool,
    /// `None` means unbounded stock.
    #[serde(default)]
    pub max_quantity: Option<u32>,
}

impl Variant {
    /// Human label used for price nicknames, e.g. `size: XL`.
    pub fn label(&self) -> String {
        format!("{}: {}", self.variant_type, self.value)
    }

    /// Effective price in minor units, `None` on overflow.
    pub fn unit_price(&self, base_price: i64) -> Option<i64> {
        base_price.checked_add(self.price_modifier)
    }
}

/// A relation between two products of the same manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Dependency {
    pub product_id: ProductId,
    pub depends_on: ProductId,
    #[serde(default)]
    pub kind: DependencyKind,
}

/// Root of the manifest JSON document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Manifest {
    pub version: u32,
    #[serde(default)]
    pub products: Vec<Product>,
    #[serde(default)]
    pub variants: Vec<Variant>,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            version: MANIFEST_VERSION,
            products: Vec::new(),
            variants: Vec::new(),
            dependencies: Vec::new(),
        }
    }
}

impl Manifest {
    /// Indices into `variants` of every variant belonging to `product`.
    pub fn variant_indices(&self, product: &ProductId) -> Vec<usize> {
        self.variants
            .iter()
            .enumerate()
            .filter(|(_, v)| &v.product_id == product)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn product(&self, id: &ProductId) -> Option<&Product> {
        self.products.iter().find(|p| &p.id == id)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
