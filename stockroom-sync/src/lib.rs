//! # stockroom-sync
//!
//! Reconciles the manifest with the CDN, the payment catalog and the
//! relational store.
//!
//! Call [`pipeline::run`] with a loaded [`stockroom_core::Config`], or build a
//! [`Reconciler`] over your own collaborators.

pub mod catalog;
pub mod error;
pub mod media;
pub mod memory;
pub mod pagination;
pub mod persistence;
pub mod pipeline;
pub mod remote;
pub mod report;
pub mod sqlite;

pub use catalog::{CatalogSyncer, PaymentCatalog};
pub use error::{RemoteError, StoreError, SyncError};
pub use media::{MediaStore, MediaSyncer};
pub use persistence::{CatalogStore, PersistenceSyncer, RowChange};
pub use pipeline::{Reconciler, RunOptions};
pub use report::{EntityError, Stage, SyncReport};
pub use sqlite::SqliteStore;
