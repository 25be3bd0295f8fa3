//! Run report: per-stage counters plus every per-entity failure.

use std::fmt;

use serde::Serialize;

/// Pipeline stage an error was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Media,
    Catalog,
    Persistence,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Media => write!(f, "media"),
            Stage::Catalog => write!(f, "catalog"),
            Stage::Persistence => write!(f, "persistence"),
        }
    }
}

/// One recoverable failure, keyed by the entity that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityError {
    pub stage: Stage,
    pub entity_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MediaReport {
    pub uploaded: usize,
    pub skipped: usize,
    pub deleted: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CatalogReport {
    pub created: usize,
    pub updated: usize,
    pub archived: usize,
    pub unchanged: usize,
    /// Inactive products that were never created remotely.
    pub skipped: usize,
    /// Active remote entities no product references (audit only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orphans: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PersistenceReport {
    /// Product and variant rows inserted or changed.
    pub persisted: usize,
    pub unchanged: usize,
    pub specs_inserted: usize,
    pub dependencies_inserted: usize,
    /// Spec and dependency rows removed because the manifest no longer
    /// lists them in that exact shape.
    pub pruned: usize,
    /// Rows marked inactive by the deletion sweep.
    pub deactivated: usize,
    /// False when the stage did not run (dry run).
    pub ran: bool,
}

/// Aggregated outcome of one reconciliation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub dry_run: bool,
    pub media: MediaReport,
    pub catalog: CatalogReport,
    pub persistence: PersistenceReport,
    pub manifest_written: bool,
    pub errors: Vec<EntityError>,
    pub warnings: Vec<String>,
}

impl SyncReport {
    pub fn record(&mut self, stage: Stage, entity_id: impl Into<String>, message: impl fmt::Display) {
        let error = EntityError {
            stage,
            entity_id: entity_id.into(),
            message: message.to_string(),
        };
        tracing::warn!("[{}] {}: {}", error.stage, error.entity_id, error.message);
        self.errors.push(error);
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("{message}");
        self.warnings.push(message);
    }

    pub fn errors_in(&self, stage: Stage) -> impl Iterator<Item = &EntityError> {
        self.errors.iter().filter(move |e| e.stage == stage)
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// True when the run changed nothing remotely or in the database.
    pub fn is_noop(&self) -> bool {
        self.media.uploaded == 0
            && self.media.deleted == 0
            && self.catalog.created == 0
            && self.catalog.updated == 0
            && self.catalog.archived == 0
            && self.persistence.persisted == 0
            && self.persistence.specs_inserted == 0
            && self.persistence.dependencies_inserted == 0
            && self.persistence.pruned == 0
            && self.persistence.deactivated == 0
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = &self.media;
        let c = &self.catalog;
        let p = &self.persistence;
        writeln!(
            f,
            "media:       {} uploaded, {} skipped, {} deleted",
            m.uploaded, m.skipped, m.deleted
        )?;
        writeln!(
            f,
            "catalog:     {} created, {} updated, {} archived, {} unchanged, {} skipped",
            c.created, c.updated, c.archived, c.unchanged, c.skipped
        )?;
        if p.ran {
            writeln!(
                f,
                "persistence: {} persisted, {} unchanged, {} specs, {} dependencies, {} pruned, {} deactivated",
                p.persisted,
                p.unchanged,
                p.specs_inserted,
                p.dependencies_inserted,
                p.pruned,
                p.deactivated
            )?;
        } else {
            writeln!(f, "persistence: skipped")?;
        }
        if let Some(orphans) = &c.orphans {
            writeln!(f, "orphans:     {}", orphans.len())?;
        }
        for warning in &self.warnings {
            writeln!(f, "warning: {warning}")?;
        }
        if !self.errors.is_empty() {
            writeln!(f, "errors ({}):", self.errors.len())?;
            for e in &self.errors {
                writeln!(f, "  [{}] {}: {}", e.stage, e.entity_id, e.message)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_report_is_noop() {
        assert!(SyncReport::default().is_noop());
    }

    #[test]
    fn display_lists_errors_with_owner() {
        let mut report = SyncReport::default();
        report.record(Stage::Catalog, "mug", "HTTP 500");
        let text = report.to_string();
        assert!(text.contains("errors (1):"));
        assert!(text.contains("[catalog] mug: HTTP 500"));
        assert!(text.contains("persistence: skipped"));
    }

    #[test]
    fn errors_filter_by_stage() {
        let mut report = SyncReport::default();
        report.record(Stage::Media, "a", "missing");
        report.record(Stage::Catalog, "b", "boom");
        assert_eq!(report.errors_in(Stage::Media).count(), 1);
        assert_eq!(report.errors_in(Stage::Persistence).count(), 0);
    }
}
