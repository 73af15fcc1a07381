//! Common test utilities for all integration tests.
//!
//! Provides in-memory backends for driving the watch engine and the
//! credential manager under paused time, plus Consul listing fixtures for the
//! wiremock-based tests.

#![allow(dead_code)]
#![allow(clippy::duplicate_mod)]

use async_trait::async_trait;
use base64::Engine;
use remote_config::config::{VaultAuth, VaultSettings};
use remote_config::credentials::{AuthTransport, SecretString, SessionCredential};
use remote_config::errors::{Error, Result};
use remote_config::normalize::Document;
use remote_config::store::{BackendKind, BackendStore, KvPair, VaultTransport};
use remote_config::watch::{StopSignal, WatchEngine, WatchStream};
use remote_config::WatchConfig;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Build a document from a JSON object literal.
pub fn document(value: Value) -> Document {
    match value {
        Value::Object(map) => Document::from(map),
        other => panic!("expected a JSON object, got {}", other),
    }
}

/// One Consul KV listing entry as served by `/v1/kv/<prefix>?recurse=true`.
pub fn consul_entry(key: &str, value: &str) -> Value {
    json!({
        "Key": key,
        "Value": base64::engine::general_purpose::STANDARD.encode(value),
        "Flags": 0,
        "CreateIndex": 5,
        "ModifyIndex": 7,
        "LockIndex": 0,
    })
}

/// Store whose reads replay a script; an exhausted script fails every read.
#[derive(Debug, Default)]
pub struct FakeStore {
    script: Mutex<VecDeque<Result<Document>>>,
    polls: Mutex<Vec<Instant>>,
    read_delay: Duration,
    watch: WatchConfig,
}

impl FakeStore {
    pub fn new(script: Vec<Result<Document>>) -> Arc<Self> {
        Arc::new(Self { script: Mutex::new(script.into()), ..Default::default() })
    }

    pub fn with_delay(script: Vec<Result<Document>>, read_delay: Duration) -> Arc<Self> {
        Arc::new(Self { script: Mutex::new(script.into()), read_delay, ..Default::default() })
    }

    pub fn push(&self, outcome: Result<Document>) {
        self.script.lock().unwrap().push_back(outcome);
    }

    pub fn polls(&self) -> Vec<Instant> {
        self.polls.lock().unwrap().clone()
    }
}

#[async_trait]
impl BackendStore for FakeStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Consul
    }

    async fn fetch(&self, _key: &str) -> Result<Document> {
        self.polls.lock().unwrap().push(Instant::now());
        if !self.read_delay.is_zero() {
            tokio::time::sleep(self.read_delay).await;
        }
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::backend("script exhausted")))
    }

    async fn list(&self, _key: &str) -> Result<Vec<KvPair>> {
        Err(Error::not_implemented("list", "consul"))
    }

    async fn set(&self, _key: &str, _value: &[u8]) -> Result<()> {
        Err(Error::not_implemented("set", "consul"))
    }

    fn watch(self: Arc<Self>, key: &str, stop: StopSignal) -> WatchStream {
        let config = self.watch.clone();
        WatchEngine::new(self, key, &config).spawn(stop)
    }
}

/// In-memory Vault: secrets by path, AppRole logins and token renewals.
///
/// Every login issues `token-<n>`; reads record the token installed at the
/// time of the read.
pub struct FakeVaultTransport {
    secrets: Mutex<HashMap<String, Map<String, Value>>>,
    current_token: Mutex<Option<String>>,
    read_tokens: Mutex<Vec<String>>,
    pub logins: AtomicU64,
    pub renewals: AtomicU64,
    pub fail_renewals: AtomicBool,
    lease: Duration,
    read_delay: Duration,
}

impl FakeVaultTransport {
    pub fn new(lease: Duration) -> Arc<Self> {
        Self::with_read_delay(lease, Duration::ZERO)
    }

    pub fn with_read_delay(lease: Duration, read_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            secrets: Mutex::new(HashMap::new()),
            current_token: Mutex::new(None),
            read_tokens: Mutex::new(Vec::new()),
            logins: AtomicU64::new(0),
            renewals: AtomicU64::new(0),
            fail_renewals: AtomicBool::new(false),
            lease,
            read_delay,
        })
    }

    pub fn put(&self, path: &str, data: Value) {
        let Value::Object(map) = data else { panic!("secret data must be an object") };
        self.secrets.lock().unwrap().insert(path.to_string(), map);
    }

    pub fn secret(&self, path: &str) -> Option<Map<String, Value>> {
        self.secrets.lock().unwrap().get(path).cloned()
    }

    pub fn current_token(&self) -> Option<String> {
        self.current_token.lock().unwrap().clone()
    }

    pub fn read_tokens(&self) -> Vec<String> {
        self.read_tokens.lock().unwrap().clone()
    }

    pub fn logins(&self) -> u64 {
        self.logins.load(Ordering::SeqCst)
    }

    pub fn renewals(&self) -> u64 {
        self.renewals.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthTransport for FakeVaultTransport {
    async fn login_approle(
        &self,
        _mount: &str,
        role_id: &str,
        secret_id: &SecretString,
    ) -> Result<SessionCredential> {
        if role_id != "role" || secret_id.expose_secret() != "secret" {
            return Err(Error::authentication_failed("invalid role or secret id"));
        }
        let n = self.logins.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(SessionCredential::new(format!("token-{}", n), self.lease, true))
    }

    async fn renew_self(&self, _increment: Option<Duration>) -> Result<SessionCredential> {
        self.renewals.fetch_add(1, Ordering::SeqCst);
        if self.fail_renewals.load(Ordering::SeqCst) {
            return Err(Error::authentication_failed("permission denied"));
        }
        let token = self.current_token().unwrap_or_default();
        Ok(SessionCredential::new(token, self.lease, true))
    }

    fn install_token(&self, token: &SecretString) -> Result<()> {
        *self.current_token.lock().unwrap() = Some(token.expose_secret().to_string());
        Ok(())
    }
}

#[async_trait]
impl VaultTransport for FakeVaultTransport {
    async fn read(&self, path: &str) -> Result<Option<Map<String, Value>>> {
        if !self.read_delay.is_zero() {
            tokio::time::sleep(self.read_delay).await;
        }
        let token = self
            .current_token()
            .ok_or_else(|| Error::authentication_failed("missing client token"))?;
        self.read_tokens.lock().unwrap().push(token);
        Ok(self.secret(path))
    }

    async fn write(&self, path: &str, data: &HashMap<String, String>) -> Result<()> {
        let map = data.iter().map(|(k, v)| (k.clone(), Value::String(v.clone()))).collect();
        self.secrets.lock().unwrap().insert(path.to_string(), map);
        Ok(())
    }
}

/// Vault settings for the in-memory transport.
pub fn vault_settings(auth: VaultAuth) -> VaultSettings {
    VaultSettings::from_lookup(&["http://vault.test:8200".to_string()], |name| match (name, &auth) {
        ("VAULT_ROLE_ID", VaultAuth::AppRole { role_id, .. }) => Some(role_id.clone()),
        ("VAULT_SECRET_ID", VaultAuth::AppRole { secret_id, .. }) => {
            Some(secret_id.expose_secret().to_string())
        }
        ("VAULT_TOKEN", VaultAuth::Token(token)) => Some(token.expose_secret().to_string()),
        _ => None,
    })
    .expect("valid vault settings")
}

pub fn approle() -> VaultAuth {
    VaultAuth::AppRole {
        role_id: "role".to_string(),
        secret_id: SecretString::new("secret"),
        mount: "approle".to_string(),
    }
}
