// Copyright 2026 The Ferry Project
// SPDX-License-Identifier: Apache-2.0

// Issuer key material
//
// A process-wide cache over the issuer's JWKS document. The first lookup
// fetches; later lookups are served from memory until the set expires. A key
// id missing from a fresh set forces one early refetch, rate-limited so a
// flood of tokens with bogus key ids cannot turn into a refetch storm.

use async_trait::async_trait;
use jsonwebtoken::jwk::{Jwk, JwkSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use super::AuthError;

// ---------------------------------------------------------------------------
// Key sources
// ---------------------------------------------------------------------------

/// Where the issuer's key set comes from.
#[async_trait]
pub trait KeySource: Send + Sync {
    async fn fetch(&self) -> Result<JwkSet, AuthError>;
}

/// Fetches the JWKS document over HTTPS.
pub struct HttpKeySource {
    client: reqwest::Client,
    url: String,
}

impl HttpKeySource {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl KeySource for HttpKeySource {
    async fn fetch(&self) -> Result<JwkSet, AuthError> {
        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| AuthError::KeyFetch(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(AuthError::KeyFetch(format!("key set endpoint returned {status}")));
        }

        resp.json::<JwkSet>()
            .await
            .map_err(|e| AuthError::KeyFetch(format!("invalid key set document: {e}")))
    }
}

/// A fixed key set, for deployments that pin keys and for tests.
pub struct StaticKeySource {
    set: JwkSet,
}

impl StaticKeySource {
    pub fn new(set: JwkSet) -> Self {
        Self { set }
    }
}

#[async_trait]
impl KeySource for StaticKeySource {
    async fn fetch(&self) -> Result<JwkSet, AuthError> {
        Ok(self.set.clone())
    }
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

struct CachedKeys {
    set: JwkSet,
    fetched_at: Instant,
}

impl CachedKeys {
    fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }
}

pub struct KeyCache {
    source: Arc<dyn KeySource>,
    ttl: Duration,
    min_refresh: Duration,
    state: RwLock<Option<CachedKeys>>,
}

/// What the cache can say about a key id without fetching.
enum Lookup {
    Found(Jwk),
    /// Fresh set, key id absent, too soon to refetch.
    Unknown,
    NeedsFetch,
}

impl KeyCache {
    pub fn new(source: Arc<dyn KeySource>, ttl: Duration, min_refresh: Duration) -> Self {
        Self {
            source,
            ttl,
            min_refresh,
            state: RwLock::new(None),
        }
    }

    /// The key with the given id, fetching or refreshing the set if needed.
    pub async fn key(&self, kid: &str) -> Result<Jwk, AuthError> {
        {
            let state = self.state.read().await;
            match self.lookup(state.as_ref(), kid) {
                Lookup::Found(jwk) => return Ok(jwk),
                Lookup::Unknown => return Err(AuthError::UnknownKeyId),
                Lookup::NeedsFetch => {}
            }
        }

        // Single flight: whoever takes the write lock first fetches, the
        // rest re-check what it stored.
        let mut state = self.state.write().await;
        match self.lookup(state.as_ref(), kid) {
            Lookup::Found(jwk) => return Ok(jwk),
            Lookup::Unknown => return Err(AuthError::UnknownKeyId),
            Lookup::NeedsFetch => {}
        }

        let set = self.source.fetch().await?;
        tracing::info!(keys = set.keys.len(), "fetched issuer key set");

        let found = set.find(kid).cloned();
        *state = Some(CachedKeys {
            set,
            fetched_at: Instant::now(),
        });
        found.ok_or(AuthError::UnknownKeyId)
    }

    fn lookup(&self, cached: Option<&CachedKeys>, kid: &str) -> Lookup {
        let Some(cached) = cached else {
            return Lookup::NeedsFetch;
        };
        let age = cached.age();
        if age >= self.ttl {
            return Lookup::NeedsFetch;
        }
        match cached.set.find(kid) {
            Some(jwk) => Lookup::Found(jwk.clone()),
            None if age < self.min_refresh => Lookup::Unknown,
            None => Lookup::NeedsFetch,
        }
    }
}
