pub mod init;
pub mod sync;
pub mod validate;

use std::path::Path;

use anyhow::{Context, Result};
use stockroom_core::{config, Config};

/// Locate and load the config, honouring an explicit `--config`.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let path = config::locate(explicit).context("cannot find a stockroom config")?;
    config::load_at(&path).with_context(|| format!("failed to load '{}'", path.display()))
}
