//! Vault KV version 2 backend
//!
//! Record bodies live under `<engine>/data/<path>` wrapped in a `data`
//! envelope, listings and permanent deletion go through `<engine>/metadata/<path>`.

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, trace, warn};

use super::{join_path, KvStore};
use crate::config::StoreConfig;
use crate::types::Payload;
use crate::{Error, Result};

const TOKEN_HEADER: &str = "X-Vault-Token";

/// KV v2 read response
#[derive(Debug, Deserialize)]
struct SecretResponse {
    data: Option<SecretData>,
}

#[derive(Debug, Deserialize)]
struct SecretData {
    data: Option<Payload>,
}

/// LIST response
#[derive(Debug, Deserialize)]
struct ListResponse {
    data: ListData,
}

#[derive(Debug, Deserialize)]
struct ListData {
    #[serde(default)]
    keys: Vec<String>,
}

/// Error body returned by Vault
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    errors: Vec<String>,
}

/// Vault-backed coordination store
pub struct VaultStore {
    http_client: reqwest::Client,
    address: String,
    token: Option<String>,
    engine_path: String,
}

impl VaultStore {
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        let token = config.token.clone().filter(|t| !t.is_empty());
        if token.is_none() {
            warn!("No store token configured, relying on agent-provided credentials");
        }

        Ok(Self {
            http_client,
            address: config.address.trim_end_matches('/').to_string(),
            token,
            engine_path: config.engine_path.clone(),
        })
    }

    /// URL of the record body for a logical path
    pub fn data_url(&self, path: &str) -> String {
        format!(
            "{}/v1/{}",
            self.address,
            join_path(&[&self.engine_path, "data", path])
        )
    }

    /// URL of the metadata for a logical path
    pub fn metadata_url(&self, path: &str) -> String {
        format!(
            "{}/v1/{}",
            self.address,
            join_path(&[&self.engine_path, "metadata", path])
        )
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self.http_client.request(method, url);
        match &self.token {
            Some(token) => builder.header(TOKEN_HEADER, token),
            None => builder,
        }
    }

    /// Turn a non-success response into a store error
    async fn failure(&self, what: &str, url: &str, resp: Response) -> Error {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        Error::Store(format!(
            "{} {} returned {}: {}",
            what,
            url,
            status,
            vault_error_message(&body)
        ))
    }

    async fn delete_url(&self, url: &str) -> Result<()> {
        let resp = self.request(Method::DELETE, url).send().await?;
        if resp.status().is_success() || resp.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(self.failure("delete", url, resp).await)
    }
}

#[async_trait]
impl KvStore for VaultStore {
    async fn read(&self, path: &str) -> Result<Option<Payload>> {
        let url = self.data_url(path);
        trace!("GET {}", url);

        let resp = self.request(Method::GET, &url).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            debug!("No record at {}", path);
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(self.failure("read", &url, resp).await);
        }

        let secret: SecretResponse = resp.json().await?;
        // Soft-deleted versions come back with a null data field
        Ok(secret.data.and_then(|d| d.data))
    }

    async fn write(&self, path: &str, data: Payload) -> Result<()> {
        let url = self.data_url(path);
        trace!("POST {}", url);

        let resp = self
            .request(Method::POST, &url)
            .json(&json!({ "data": data }))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(self.failure("write", &url, resp).await);
        }
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.delete_url(&self.data_url(path)).await?;
        self.delete_url(&self.metadata_url(path)).await
    }

    async fn list(&self, path: &str) -> Result<Vec<String>> {
        let url = self.metadata_url(path);
        trace!("LIST {}", url);

        let resp = self
            .request(Method::GET, &url)
            .query(&[("list", "true")])
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !resp.status().is_success() {
            return Err(self.failure("list", &url, resp).await);
        }

        let listing: ListResponse = resp.json().await?;
        Ok(listing
            .data
            .keys
            .into_iter()
            .map(|k| k.trim_end_matches('/').to_string())
            .filter(|k| !k.is_empty())
            .collect())
    }
}

/// Best-effort extraction of Vault's `errors` array
fn vault_error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(parsed) if !parsed.errors.is_empty() => parsed.errors.join("; "),
        _ => body.trim().to_string(),
    }
}
