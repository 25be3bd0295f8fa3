//! CDN client.

use std::path::Path;

use serde::Deserialize;

use stockroom_core::config::{self, CdnConfig};
use stockroom_core::{ConfigError, MediaKind};

use super::{agent, bearer, check, decode, trim_base, RetryPolicy};
use crate::error::{io_err, RemoteError};
use crate::media::{MediaStore, UploadedAsset};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponse {
    asset_id: String,
    #[serde(default)]
    format: Option<String>,
}

/// Uploads raw file bodies to `{base}/v1/assets/{kind}?key=…` and deletes
/// them by asset id.
pub struct HttpMediaStore {
    agent: ureq::Agent,
    base_url: String,
    api_key: String,
    retry: RetryPolicy,
}

impl HttpMediaStore {
    pub fn new(base_url: &str, api_key: String, timeout_secs: u64, retry: RetryPolicy) -> Self {
        Self {
            agent: agent(timeout_secs),
            base_url: trim_base(base_url),
            api_key,
            retry,
        }
    }

    /// Build from config, reading the API key from the configured variable.
    pub fn from_config(cfg: &CdnConfig) -> Result<Self, ConfigError> {
        let api_key = config::secret(&cfg.api_key_env, "CDN uploads")?;
        Ok(Self::new(
            &cfg.base_url,
            api_key,
            cfg.timeout_secs,
            RetryPolicy::new(cfg.max_attempts),
        ))
    }

    fn upload_url(&self, kind: MediaKind) -> String {
        format!("{}/v1/assets/{kind}", self.base_url)
    }

    fn asset_url(&self, asset_id: &str) -> String {
        format!("{}/v1/assets/{}", self.base_url, urlencoding::encode(asset_id))
    }
}

impl MediaStore for HttpMediaStore {
    fn upload(
        &self,
        local_path: &Path,
        key: &str,
        kind: MediaKind,
    ) -> Result<UploadedAsset, RemoteError> {
        let body = std::fs::read(local_path).map_err(|e| io_err(local_path, e))?;
        let url = self.upload_url(kind);
        let response = self.retry.run(&format!("upload {key}"), || {
            check(
                &url,
                self.agent
                    .post(&url)
                    .query("key", key)
                    .set("Authorization", &bearer(&self.api_key))
                    .set("Content-Type", "application/octet-stream")
                    .send_bytes(&body),
            )
        })?;
        let parsed: UploadResponse = decode(&url, response)?;
        tracing::debug!("uploaded {key} as {}", parsed.asset_id);
        Ok(UploadedAsset {
            asset_id: parsed.asset_id,
            format: parsed.format,
        })
    }

    fn delete(&self, asset_id: &str) -> Result<(), RemoteError> {
        let url = self.asset_url(asset_id);
        self.retry.run(&format!("delete {asset_id}"), || {
            check(
                &url,
                self.agent
                    .delete(&url)
                    .set("Authorization", &bearer(&self.api_key))
                    .call(),
            )
        })?;
        Ok(())
    }
}
