//! Transport to the remote CI service.

use crate::{SyncError, SyncResult};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// The remote CI service as seen by a synchronizer.
#[async_trait]
pub trait RemoteService: Send + Sync {
    /// GET `path` and decode the body as JSON.
    async fn get_json(&self, path: &str) -> SyncResult<Value>;

    /// POST `properties` to `path` as a form and return the response body.
    async fn post_form_urlencoded(
        &self,
        path: &str,
        properties: &BTreeMap<String, String>,
    ) -> SyncResult<String>;

    /// Absolute URL of `path`, for showing to people.
    fn url(&self, path: &str) -> String;
}

/// HTTP client for the remote CI service.
///
/// Paths are resolved below the base URL, so a service mounted at
/// `http://host/buildbot/` is reached as `http://host/buildbot/builders/...`.
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpRemote {
    pub fn new(base_url: &str) -> SyncResult<Self> {
        Self::with_timeout(base_url, Duration::from_secs(30))
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("buildsync")
            .build()?;
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self { client, base_url })
    }

    fn resolve(&self, path: &str) -> SyncResult<Url> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }
}

#[async_trait]
impl RemoteService for HttpRemote {
    async fn get_json(&self, path: &str) -> SyncResult<Value> {
        let url = self.resolve(path)?;
        debug!(%url, "GET");

        let response = self.client.get(url.clone()).send().await?;
        if !response.status().is_success() {
            return Err(SyncError::Remote(format!(
                "GET {url} returned {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| SyncError::Protocol(format!("GET {url}: {e}")))
    }

    async fn post_form_urlencoded(
        &self,
        path: &str,
        properties: &BTreeMap<String, String>,
    ) -> SyncResult<String> {
        let url = self.resolve(path)?;
        debug!(%url, properties = properties.len(), "POST");

        let response = self
            .client
            .post(url.clone())
            .form(properties)
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(SyncError::Remote(format!("POST {url} returned {status}: {text}")));
        }
        Ok(text)
    }

    fn url(&self, path: &str) -> String {
        match self.resolve(path) {
            Ok(url) => url.to_string(),
            Err(_) => format!("{}{}", self.base_url, path.trim_start_matches('/')),
        }
    }
}
