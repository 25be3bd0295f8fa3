//! Stockroom core library: manifest domain types, manifest store, config, errors.
//!
//! - [`types`]: newtypes and manifest structs
//! - [`manifest`]: load / migrate / validate / save
//! - [`config`]: `stockroom.yaml` lookup and loading
//! - [`error`]: [`ManifestError`], [`ConfigError`]

pub mod config;
pub mod error;
pub mod manifest;
pub mod types;

pub use config::Config;
pub use error::{ConfigError, ManifestError};
pub use manifest::ManifestFile;
pub use types::{
    Dependency, DependencyKind, Manifest, MediaItem, MediaKind, Product, ProductId, ProductSpec,
    SellStatus, Variant, VariantId, MANIFEST_VERSION,
};
