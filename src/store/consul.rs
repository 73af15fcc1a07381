//! Consul KV backend.
//!
//! Reads list every key under a prefix (`GET /v1/kv/<prefix>?recurse=true`)
//! and flatten the result into one document. Consul has no per-prefix
//! not-found signal: a 404 on a listing simply means no keys, so `get` returns
//! an empty document.
//!
//! Watches use Consul blocking queries: each cycle passes the last seen
//! `X-Consul-Index` and Consul holds the request until the prefix changes or
//! the wait time elapses.

use super::{BackendKind, BackendStore, KvPair, WatchCursor};
use crate::config::{ConsulSettings, WatchConfig};
use crate::credentials::SecretString;
use crate::errors::{Error, Result};
use crate::normalize::{normalize_pairs, Document};
use crate::watch::{StopSignal, WatchEngine, WatchStream};
use async_trait::async_trait;
use base64::Engine;
use reqwest::StatusCode;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, Instrument, Span};

const CONSUL_TOKEN_HEADER: &str = "X-Consul-Token";
const CONSUL_INDEX_HEADER: &str = "X-Consul-Index";

/// Entry of a Consul KV listing.
#[derive(Debug, Deserialize)]
struct ConsulKvEntry {
    #[serde(rename = "Key")]
    key: String,
    /// Base64 payload; null for folder placeholders.
    #[serde(rename = "Value")]
    value: Option<String>,
}

/// Consul KV backend store.
pub struct ConsulStore {
    http: reqwest::Client,
    address: String,
    base: reqwest::Url,
    token: Option<SecretString>,
    wait: Duration,
    watch: WatchConfig,
    span: Span,
}

impl std::fmt::Debug for ConsulStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsulStore")
            .field("address", &self.address)
            .field("token", &self.token)
            .field("wait", &self.wait)
            .finish()
    }
}

impl ConsulStore {
    /// Create a store from validated settings.
    pub fn new(settings: ConsulSettings) -> Result<Self> {
        settings.validate_settings()?;

        let http = reqwest::Client::builder().build().map_err(|e| {
            Error::connection_failed(format!("Failed to create Consul HTTP client: {}", e))
        })?;

        let base = reqwest::Url::parse(&settings.address)
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| {
                Error::config(format!("Invalid Consul address '{}'", settings.address))
            })?;

        let span = crate::store_span!("consul", settings.address);
        span.in_scope(|| debug!(wait_secs = settings.wait_seconds, "Initialized Consul backend"));

        Ok(Self {
            http,
            wait: settings.wait(),
            base,
            address: settings.address,
            token: settings.token,
            watch: settings.watch,
            span,
        })
    }

    /// Create a store from an endpoint list; the first entry is used.
    pub fn from_machines(machines: &[String]) -> Result<Self> {
        Self::new(ConsulSettings::from_env(machines)?)
    }

    /// Log under `span` instead of the default `backend_store` span.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// KV endpoint for `key`, each path segment percent-encoded.
    fn kv_url(&self, key: &str) -> reqwest::Url {
        let mut url = self.base.clone();
        // `base` was checked to be a base URL in `new`.
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["v1", "kv"])
                .extend(key.trim_start_matches('/').split('/'));
        }
        url
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.header(CONSUL_TOKEN_HEADER, token.expose_secret()),
            None => request,
        }
    }

    /// List every pair under `prefix`.
    ///
    /// With `index` set this is a blocking query. Returns the pairs and the
    /// index Consul reported, if any.
    async fn list_pairs(
        &self,
        prefix: &str,
        index: Option<u64>,
    ) -> Result<(Vec<KvPair>, Option<u64>)> {
        let mut request = self.http.get(self.kv_url(prefix)).query(&[("recurse", "true")]);
        if let Some(index) = index {
            let wait = format!("{}s", self.wait.as_secs());
            request = request.query(&[("index", index.to_string()), ("wait", wait)]);
        }

        let response = self.authorize(request).send().await.map_err(|e| {
            error!(error = %e, prefix = %prefix, "Error during Consul list");
            Error::connection_failed(format!("Consul request failed: {}", e))
        })?;

        let next_index = response
            .headers()
            .get(CONSUL_INDEX_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        match response.status() {
            StatusCode::NOT_FOUND => {
                debug!(prefix = %prefix, "No keys under prefix");
                Ok((Vec::new(), next_index))
            }
            StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => {
                let body = response.text().await.unwrap_or_default();
                Err(Error::authentication_failed(format!(
                    "Consul denied access to {}: {}",
                    prefix,
                    body.trim()
                )))
            }
            status if status.is_success() => {
                let entries: Vec<ConsulKvEntry> = response.json().await.map_err(|e| {
                    Error::backend(format!("Invalid Consul listing for {}: {}", prefix, e))
                })?;
                let pairs = entries.into_iter().map(decode_entry).collect::<Result<Vec<_>>>()?;
                debug!(prefix = %prefix, count = pairs.len(), index = ?next_index, "Listed Consul keys");
                Ok((pairs, next_index))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(Error::backend(format!(
                    "Consul returned {} for {}: {}",
                    status,
                    prefix,
                    body.trim()
                )))
            }
        }
    }
}

fn decode_entry(entry: ConsulKvEntry) -> Result<KvPair> {
    let value = match entry.value {
        Some(encoded) => base64::engine::general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(|e| Error::backend(format!("Invalid base64 value for {}: {}", entry.key, e)))?,
        None => Vec::new(),
    };
    Ok(KvPair { key: entry.key, value })
}

#[async_trait]
impl BackendStore for ConsulStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Consul
    }

    async fn fetch(&self, key: &str) -> Result<Document> {
        let (pairs, _) = self.list_pairs(key, None).instrument(self.span.clone()).await?;
        Ok(normalize_pairs(key, &pairs))
    }

    async fn list(&self, _key: &str) -> Result<Vec<KvPair>> {
        Err(Error::not_implemented("list", "consul"))
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let request = self.http.put(self.kv_url(key)).body(value.to_vec());

        let response = self
            .authorize(request)
            .send()
            .instrument(self.span.clone())
            .await
            .map_err(|e| Error::connection_failed(format!("Consul request failed: {}", e)))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if status == StatusCode::FORBIDDEN || status == StatusCode::UNAUTHORIZED {
            return Err(Error::authentication_failed(format!(
                "Consul denied write to {}: {}",
                key,
                body.trim()
            )));
        }
        if !status.is_success() || body.trim() != "true" {
            return Err(Error::backend(format!(
                "Consul rejected write to {} ({}): {}",
                key,
                status,
                body.trim()
            )));
        }

        self.span.in_scope(|| debug!(key = %key, "Stored key in Consul"));
        Ok(())
    }

    async fn poll(&self, key: &str, cursor: &mut WatchCursor) -> Result<Document> {
        let (pairs, index) =
            self.list_pairs(key, cursor.index()).instrument(self.span.clone()).await?;
        match index {
            Some(index) => cursor.advance(index),
            None => cursor.reset(),
        }
        Ok(normalize_pairs(key, &pairs))
    }

    fn watch(self: Arc<Self>, key: &str, stop: StopSignal) -> WatchStream {
        let config = self.watch.clone();
        let span = self.span.in_scope(|| crate::watch_span!(key));
        WatchEngine::new(self, key, &config).with_span(span).spawn(stop)
    }
}
