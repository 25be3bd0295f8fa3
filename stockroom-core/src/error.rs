//! Error types for stockroom-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from loading or saving the manifest.
///
/// Every variant is fatal for a reconciliation run: it is raised before any
/// remote system has been touched.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// Underlying I/O failure, with the offending path.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The manifest file did not exist at the expected path.
    #[error("manifest not found at {path}")]
    NotFound { path: PathBuf },

    /// JSON parse error on load, with serde_json's line/column context.
    #[error("failed to parse manifest at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A media record matched none of the recognized shapes.
    #[error("unrecognized media record at {location} in {path}")]
    UnrecognizedMedia { path: PathBuf, location: String },

    /// The document declares a manifest version this build cannot read.
    #[error("unsupported manifest version {found} in {path} (supported: {supported})")]
    UnsupportedVersion {
        path: PathBuf,
        found: u32,
        supported: u32,
    },

    /// The document parsed but violates one or more manifest invariants.
    #[error("invalid manifest at {path}: {}", .issues.join("; "))]
    Invalid { path: PathBuf, issues: Vec<String> },

    /// JSON serialization error (save path).
    #[error("manifest JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// All errors that can arise from loading the run configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error on load, with serde_yaml's line context.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// YAML serialization error (scaffold path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// No config file in any of the lookup locations.
    #[error("no stockroom.yaml found (looked in: {searched})")]
    NotFound { searched: String },

    /// A credential environment variable named by the config is unset or empty.
    #[error("environment variable {var} is not set (required for {purpose})")]
    MissingSecret { var: String, purpose: &'static str },
}

pub(crate) fn manifest_io(path: impl Into<PathBuf>, source: std::io::Error) -> ManifestError {
    ManifestError::Io {
        path: path.into(),
        source,
    }
}

pub(crate) fn config_io(path: impl Into<PathBuf>, source: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.into(),
        source,
    }
}
