//! Credential resolution backed by a secret store.
//!
//! A secret bundle is a flat JSON object of strings. The first lookup that
//! misses the cache fetches the whole bundle and merges every key, so sibling
//! keys are served without another round trip. Entries live for the process
//! lifetime and are never refreshed.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use aws_sdk_secretsmanager::error::DisplayErrorContext;
use tracing::{debug, trace};

use crate::aws;

pub const DEFAULT_SECRET_ID: &str = "github_token";
pub const GITHUB_TOKEN_KEY: &str = "GITHUB_TOKEN";
pub const TEMPLATE_URL_KEY: &str = "TEMPLATE_URL";

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("error loading AWS config: {0}")]
    ConfigLoad(String),
    #[error("error fetching secret value: {0}")]
    SecretFetch(String),
    #[error("error unmarshalling secret value: {0}")]
    SecretParse(#[source] serde_json::Error),
    #[error("secret key {0} not found")]
    SecretKeyNotFound(String),
}

pub trait SecretsBackend: Send + Sync {
    /// Returns the raw payload of the secret bundle named `secret_id`.
    fn fetch_secret(&self, secret_id: &str) -> Result<String, CredentialError>;
}

/// Process-wide cache of resolved secret values.
#[derive(Debug, Default)]
pub struct CredentialCache {
    entries: Mutex<BTreeMap<String, String>>,
}

impl CredentialCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.lock().get(key).cloned()
    }

    pub fn merge(&self, bundle: BTreeMap<String, String>) {
        self.lock().extend(bundle);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        // Map operations cannot leave the map half-written.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct CredentialResolver<S> {
    backend: S,
    cache: Arc<CredentialCache>,
    secret_id: String,
}

impl<S: SecretsBackend> CredentialResolver<S> {
    pub fn new(backend: S, cache: Arc<CredentialCache>, secret_id: impl Into<String>) -> Self {
        Self {
            backend,
            cache,
            secret_id: secret_id.into(),
        }
    }

    pub fn resolve(&self, key: &str) -> Result<String, CredentialError> {
        if let Some(value) = self.cache.get(key) {
            trace!(key, "credential cache hit");
            return Ok(value);
        }

        debug!(key, secret_id = %self.secret_id, "credential cache miss, fetching bundle");
        let payload = self.backend.fetch_secret(&self.secret_id)?;
        let bundle = parse_bundle(&payload)?;
        let value = bundle.get(key).cloned();
        self.cache.merge(bundle);

        value.ok_or_else(|| CredentialError::SecretKeyNotFound(key.to_string()))
    }

    pub fn github_token(&self) -> Result<String, CredentialError> {
        self.resolve(GITHUB_TOKEN_KEY)
    }

    pub fn template_url(&self) -> Result<String, CredentialError> {
        self.resolve(TEMPLATE_URL_KEY)
    }

    pub fn cache(&self) -> &Arc<CredentialCache> {
        &self.cache
    }

    pub fn backend(&self) -> &S {
        &self.backend
    }
}

fn parse_bundle(payload: &str) -> Result<BTreeMap<String, String>, CredentialError> {
    serde_json::from_str(payload).map_err(CredentialError::SecretParse)
}

#[derive(Debug, Clone)]
pub struct AwsSecretsManager {
    region: String,
}

impl AwsSecretsManager {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
        }
    }
}

impl SecretsBackend for AwsSecretsManager {
    fn fetch_secret(&self, secret_id: &str) -> Result<String, CredentialError> {
        let rt = aws::runtime()
            .map_err(|e| CredentialError::ConfigLoad(format!("failed to create runtime: {e}")))?;

        rt.block_on(async {
            let config = aws::load_config(&self.region).await;
            if config.credentials_provider().is_none() {
                return Err(CredentialError::ConfigLoad(
                    "no credentials provider configured".to_string(),
                ));
            }
            let client = aws_sdk_secretsmanager::Client::new(&config);

            let output = client
                .get_secret_value()
                .secret_id(secret_id)
                .send()
                .await
                .map_err(|e| CredentialError::SecretFetch(DisplayErrorContext(&e).to_string()))?;

            output.secret_string().map(str::to_string).ok_or_else(|| {
                CredentialError::SecretFetch(format!("secret {secret_id} has no string value"))
            })
        })
    }
}

/// Serves a fixed payload and counts how often it was fetched.
#[derive(Debug, Default)]
pub struct InMemorySecrets {
    payload: String,
    fetches: AtomicUsize,
}

impl InMemorySecrets {
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let bundle: BTreeMap<&str, &str> = pairs.into_iter().collect();
        // A map of strings always serializes.
        let payload = serde_json::to_string(&bundle).unwrap_or_default();
        Self::new(payload)
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl SecretsBackend for InMemorySecrets {
    fn fetch_secret(&self, _secret_id: &str) -> Result<String, CredentialError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.payload.clone())
    }
}
