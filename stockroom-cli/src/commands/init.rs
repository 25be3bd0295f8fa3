//! `stockroom init <dir>`

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use stockroom_core::{config, manifest, Config, Manifest};

/// Scaffold a stockroom project directory.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Directory to scaffold; created if missing.
    pub dir: PathBuf,
}

impl InitArgs {
    pub fn run(self) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("cannot create '{}'", self.dir.display()))?;

        let starter = Config::starter();
        let config_path = self.dir.join(config::CONFIG_FILE_NAME);
        if config_path.exists() {
            println!("·  {} (exists)", config_path.display());
        } else {
            config::save_at(&config_path, &starter)
                .with_context(|| format!("failed to write '{}'", config_path.display()))?;
            println!("✎  {}", config_path.display());
        }

        let manifest_path = self.dir.join(&starter.manifest);
        if manifest_path.exists() {
            println!("·  {} (exists)", manifest_path.display());
        } else {
            manifest::save_at(&manifest_path, &Manifest::default())
                .with_context(|| format!("failed to write '{}'", manifest_path.display()))?;
            println!("✎  {}", manifest_path.display());
        }

        let media_root = self.dir.join(&starter.media_root);
        std::fs::create_dir_all(&media_root)
            .with_context(|| format!("cannot create '{}'", media_root.display()))?;

        println!(
            "✓ Initialized stockroom in '{}'. Set {} and {} before a real sync.",
            self.dir.display(),
            starter.cdn.api_key_env,
            starter.payments.api_key_env
        );
        Ok(())
    }
}
