//! Payment-catalog client for a Stripe-style form API.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use stockroom_core::config::{self, PaymentsConfig};
use stockroom_core::ConfigError;

use super::{agent, bearer, check, decode, trim_base, RetryPolicy};
use crate::catalog::{EntityDraft, PaymentCatalog, PriceDraft, RemoteEntity, MANIFEST_ID_KEY};
use crate::error::RemoteError;
use crate::pagination::Page;

const PAGE_LIMIT: &str = "100";

static CREATE_SERIES: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Deserialize)]
struct Created {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ListedProduct {
    id: String,
    active: bool,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ProductList {
    data: Vec<ListedProduct>,
    #[serde(default)]
    has_more: bool,
}

impl ProductList {
    fn into_page(self) -> Page<RemoteEntity> {
        let next_cursor = if self.has_more {
            self.data.last().map(|p| p.id.clone())
        } else {
            None
        };
        let items = self
            .data
            .into_iter()
            .map(|p| RemoteEntity {
                manifest_id: p.metadata.get(MANIFEST_ID_KEY).cloned(),
                id: p.id,
                active: p.active,
            })
            .collect();
        Page { items, next_cursor }
    }
}

type Form = Vec<(String, String)>;

fn entity_path(entity_id: &str) -> String {
    format!("products/{}", urlencoding::encode(entity_id))
}

fn push_metadata(form: &mut Form, metadata: &BTreeMap<String, String>) {
    for (k, v) in metadata {
        form.push((format!("metadata[{k}]"), v.clone()));
    }
}

/// Encode an entity payload. Images are resolved to absolute URLs under
/// `image_base`.
fn entity_form(draft: &EntityDraft, image_base: &str) -> Form {
    let mut form: Form = vec![
        ("name".into(), draft.name.clone()),
        ("active".into(), draft.active.to_string()),
    ];
    if !draft.description.is_empty() {
        form.push(("description".into(), draft.description.clone()));
    }
    for (i, image) in draft.images.iter().enumerate() {
        form.push((format!("images[{i}]"), format!("{image_base}/{image}")));
    }
    push_metadata(&mut form, &draft.metadata);
    form
}

fn price_form(entity_id: &str, draft: &PriceDraft) -> Form {
    let mut form: Form = vec![
        ("product".into(), entity_id.to_string()),
        ("unit_amount".into(), draft.unit_amount.to_string()),
        ("currency".into(), draft.currency.clone()),
    ];
    if let Some(nickname) = &draft.nickname {
        form.push(("nickname".into(), nickname.clone()));
    }
    push_metadata(&mut form, &draft.metadata);
    form
}

/// Key for one logical create. The form carries the manifest id, the
/// variant id and the owning entity, so retries of the same call share a key
/// while `series` keeps separate calls apart.
fn idempotency_key(path: &str, form: &Form, series: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    for (k, v) in form {
        hasher.update(k.as_bytes());
        hasher.update([0]);
        hasher.update(v.as_bytes());
        hasher.update([0]);
    }
    hasher.update(series.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("stockroom-{}", &digest[..32])
}

fn next_series() -> String {
    let n = CREATE_SERIES.fetch_add(1, Ordering::Relaxed);
    format!("{}-{}-{n}", std::process::id(), Utc::now().timestamp_millis())
}

pub struct HttpPaymentCatalog {
    agent: ureq::Agent,
    base_url: String,
    api_key: String,
    image_base: String,
    retry: RetryPolicy,
}

impl HttpPaymentCatalog {
    pub fn new(
        base_url: &str,
        api_key: String,
        image_base: &str,
        timeout_secs: u64,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            agent: agent(timeout_secs),
            base_url: trim_base(base_url),
            api_key,
            image_base: trim_base(image_base),
            retry,
        }
    }

    /// Build from config. `image_base` is where uploaded assets are served.
    pub fn from_config(cfg: &PaymentsConfig, image_base: &str) -> Result<Self, ConfigError> {
        let api_key = config::secret(&cfg.api_key_env, "the payment catalog")?;
        Ok(Self::new(
            &cfg.base_url,
            api_key,
            image_base,
            cfg.timeout_secs,
            RetryPolicy::new(cfg.max_attempts),
        ))
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{path}", self.base_url)
    }

    fn post(
        &self,
        path: &str,
        form: &Form,
        idempotency_key: Option<&str>,
    ) -> Result<ureq::Response, RemoteError> {
        let url = self.url(path);
        let pairs: Vec<(&str, &str)> = form.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        self.retry.run(&format!("POST {path}"), || {
            let mut request = self
                .agent
                .post(&url)
                .set("Authorization", &bearer(&self.api_key));
            if let Some(key) = idempotency_key {
                request = request.set("Idempotency-Key", key);
            }
            check(&url, request.send_form(&pairs))
        })
    }

    /// POST a create. Every attempt of the call sends the same
    /// `Idempotency-Key`.
    fn post_created(&self, path: &str, form: &Form) -> Result<String, RemoteError> {
        let key = idempotency_key(path, form, &next_series());
        let response = self.post(path, form, Some(&key))?;
        let created: Created = decode(&self.url(path), response)?;
        Ok(created.id)
    }
}

impl PaymentCatalog for HttpPaymentCatalog {
    fn create_entity(&self, draft: &EntityDraft) -> Result<String, RemoteError> {
        self.post_created("products", &entity_form(draft, &self.image_base))
    }

    fn update_entity(&self, entity_id: &str, draft: &EntityDraft) -> Result<(), RemoteError> {
        let mut form = entity_form(draft, &self.image_base);
        if draft.description.is_empty() {
            // An empty value clears the field on update.
            form.push(("description".into(), String::new()));
        }
        self.post(&entity_path(entity_id), &form, None)?;
        Ok(())
    }

    fn archive_entity(&self, entity_id: &str) -> Result<(), RemoteError> {
        let form = vec![("active".to_string(), "false".to_string())];
        self.post(&entity_path(entity_id), &form, None)?;
        Ok(())
    }

    fn create_price(&self, entity_id: &str, draft: &PriceDraft) -> Result<String, RemoteError> {
        self.post_created("prices", &price_form(entity_id, draft))
    }

    fn archive_price(&self, price_id: &str) -> Result<(), RemoteError> {
        let form = vec![("active".to_string(), "false".to_string())];
        self.post(
            &format!("prices/{}", urlencoding::encode(price_id)),
            &form,
            None,
        )?;
        Ok(())
    }

    fn list_entities(&self, cursor: Option<&str>) -> Result<Page<RemoteEntity>, RemoteError> {
        let url = self.url("products");
        let response = self.retry.run("list products", || {
            let mut request = self
                .agent
                .get(&url)
                .query("limit", PAGE_LIMIT)
                .set("Authorization", &bearer(&self.api_key));
            if let Some(after) = cursor {
                request = request.query("starting_after", after);
            }
            check(&url, request.call())
        })?;
        let list: ProductList = decode(&url, response)?;
        Ok(list.into_page())
    }
}
