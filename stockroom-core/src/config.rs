//! Run configuration (`stockroom.yaml`).
//!
//! # Lookup order
//!
//! 1. explicit path (`--config`)
//! 2. `<cwd>/stockroom.yaml`
//! 3. `<home>/.stockroom/config.yaml`
//!
//! Relative paths inside the file resolve against the file's directory.
//! Credentials never live in the file: each remote section names the
//! environment variable holding its API key.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{config_io, ConfigError};

pub const CONFIG_FILE_NAME: &str = "stockroom.yaml";

/// Root of `stockroom.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Manifest JSON document.
    pub manifest: PathBuf,
    /// Directory that media `localPath` values are relative to.
    pub media_root: PathBuf,
    /// SQLite database file.
    pub database: PathBuf,
    pub cdn: CdnConfig,
    #[serde(default)]
    pub payments: PaymentsConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CdnConfig {
    pub base_url: String,
    /// Prefix for every remote asset key.
    #[serde(default = "default_cdn_folder")]
    pub folder: String,
    #[serde(default = "default_cdn_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PaymentsConfig {
    #[serde(default = "default_payments_url")]
    pub base_url: String,
    /// ISO 4217 code, lowercase.
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_payments_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for PaymentsConfig {
    fn default() -> Self {
        Self {
            base_url: default_payments_url(),
            currency: default_currency(),
            api_key_env: default_payments_key_env(),
            timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct SweepConfig {
    /// Allow an empty product list to deactivate every persisted product.
    #[serde(default)]
    pub allow_empty_manifest: bool,
}

fn default_cdn_folder() -> String {
    "catalog".to_string()
}
fn default_cdn_key_env() -> String {
    "STOCKROOM_CDN_KEY".to_string()
}
fn default_payments_url() -> String {
    "https://api.stripe.com".to_string()
}
fn default_currency() -> String {
    "usd".to_string()
}
fn default_payments_key_env() -> String {
    "STOCKROOM_PAYMENTS_KEY".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_attempts() -> u32 {
    3
}

impl Config {
    /// Configuration written by `stockroom init`: everything next to the
    /// config file.
    pub fn starter() -> Self {
        Self {
            manifest: PathBuf::from("manifest.json"),
            media_root: PathBuf::from("media"),
            database: PathBuf::from("stockroom.db"),
            cdn: CdnConfig {
                base_url: "https://cdn.example.com".to_string(),
                folder: default_cdn_folder(),
                api_key_env: default_cdn_key_env(),
                timeout_secs: default_timeout_secs(),
                max_attempts: default_max_attempts(),
            },
            payments: PaymentsConfig::default(),
            sweep: SweepConfig::default(),
        }
    }

    fn resolve_paths(&mut self, base: &Path) {
        for path in [&mut self.manifest, &mut self.media_root, &mut self.database] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Lookup + load
// ---------------------------------------------------------------------------

/// `<home>/.stockroom/config.yaml`
pub fn home_config_path_at(home: &Path) -> PathBuf {
    home.join(".stockroom").join("config.yaml")
}

/// Find the config file to use, honouring the lookup order.
pub fn locate_at(
    explicit: Option<&Path>,
    cwd: &Path,
    home: Option<&Path>,
) -> Result<PathBuf, ConfigError> {
    let mut candidates = Vec::new();
    match explicit {
        Some(path) => candidates.push(cwd.join(path)),
        None => {
            candidates.push(cwd.join(CONFIG_FILE_NAME));
            if let Some(home) = home {
                candidates.push(home_config_path_at(home));
            }
        }
    }
    if let Some(found) = candidates.iter().find(|p| p.is_file()) {
        return Ok(found.clone());
    }
    Err(ConfigError::NotFound {
        searched: candidates
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", "),
    })
}

/// `locate_at` convenience wrapper using the process cwd and `dirs::home_dir()`.
pub fn locate(explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
    let cwd = std::env::current_dir().map_err(|e| config_io(".", e))?;
    locate_at(explicit, &cwd, dirs::home_dir().as_deref())
}

/// Load and path-resolve the config at `path`.
pub fn load_at(path: &Path) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| config_io(path, e))?;
    let mut config: Config = serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    config.resolve_paths(base);
    Ok(config)
}

/// Atomically write `config` to `path` (`.yaml.tmp` + rename).
pub fn save_at(path: &Path, config: &Config) -> Result<(), ConfigError> {
    let yaml = serde_yaml::to_string(config)?;
    let tmp = path.with_extension("yaml.tmp");
    std::fs::write(&tmp, yaml).map_err(|e| config_io(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| config_io(path, e))?;
    Ok(())
}

/// Read a credential from the environment variable `var`.
pub fn secret(var: &str, purpose: &'static str) -> Result<String, ConfigError> {
    match std::env::var(var) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::MissingSecret {
            var: var.to_string(),
            purpose,
        }),
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
