// Copyright 2026 The Ferry Project
// SPDX-License-Identifier: Apache-2.0

// Identity token validation
//
// Responsibilities:
// - Verify the browser's identity assertion (a signed JWT) against the
//   trusted issuer's key set: signature, expiry, issuer, audience
// - Fail closed: every failure is a rejection, logged by cause, never by
//   token content
// - Decode the forwarded access credential for diagnostics only

mod credential;
mod keys;

pub use credential::{inspect_credential, CredentialSummary};
pub use keys::{HttpKeySource, KeyCache, KeySource, StaticKeySource};

use async_trait::async_trait;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::str::FromStr;
use std::sync::Arc;

use crate::config::AuthConfig;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("malformed token")]
    Malformed,
    #[error("token algorithm {0:?} not accepted")]
    AlgorithmNotAllowed(Algorithm),
    #[error("token has no key id")]
    MissingKeyId,
    #[error("unknown signing key")]
    UnknownKeyId,
    #[error("issuer key set unavailable: {0}")]
    KeyFetch(String),
    #[error("unusable signing key: {0}")]
    Key(String),
    #[error("bad signature")]
    BadSignature,
    #[error("token expired")]
    Expired,
    #[error("token not yet valid")]
    NotYetValid,
    #[error("wrong issuer")]
    WrongIssuer,
    #[error("wrong audience")]
    WrongAudience,
    #[error("missing claim {0}")]
    MissingClaim(String),
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        match e.kind() {
            ErrorKind::InvalidSignature => AuthError::BadSignature,
            ErrorKind::ExpiredSignature => AuthError::Expired,
            ErrorKind::ImmatureSignature => AuthError::NotYetValid,
            ErrorKind::InvalidIssuer => AuthError::WrongIssuer,
            ErrorKind::InvalidAudience => AuthError::WrongAudience,
            ErrorKind::MissingRequiredClaim(claim) => AuthError::MissingClaim(claim.clone()),
            ErrorKind::InvalidAlgorithm => AuthError::Key("algorithm does not match key".into()),
            ErrorKind::InvalidKeyFormat => AuthError::Key(e.to_string()),
            _ => AuthError::Malformed,
        }
    }
}

/// Verified claims of an identity token.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iss: String,
    pub exp: u64,
}

/// Gate for inbound identity assertions.
#[async_trait]
pub trait TokenValidator: Send + Sync {
    /// Validate and return the claims, or the reason for rejection.
    async fn check(&self, token: &str) -> Result<Claims, AuthError>;

    /// Fail-closed yes/no verdict. Logs the rejection cause.
    async fn verify(&self, token: &str) -> bool {
        match self.check(token).await {
            Ok(claims) => {
                tracing::debug!(sub = %claims.sub, "identity token accepted");
                true
            }
            Err(e) => {
                tracing::warn!(reason = %e, "identity token rejected");
                false
            }
        }
    }
}

/// JWT validator backed by the issuer's JWKS.
pub struct JwtValidator {
    config: AuthConfig,
    keys: KeyCache,
}

impl JwtValidator {
    pub fn new(config: AuthConfig, source: Arc<dyn KeySource>) -> Self {
        let keys = KeyCache::new(source, config.jwks_ttl, config.jwks_min_refresh);
        Self { config, keys }
    }

    /// Validator fetching keys from `config.jwks_url`.
    pub fn from_config(config: AuthConfig, client: reqwest::Client) -> Self {
        let source = Arc::new(HttpKeySource::new(client, config.jwks_url.clone()));
        Self::new(config, source)
    }

    fn validation(&self, alg: Algorithm) -> Validation {
        let mut validation = Validation::new(alg);
        validation.leeway = self.config.leeway_secs;
        validation.set_issuer(&[self.config.issuer.as_str()]);
        validation.set_audience(&[self.config.audience.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        validation
    }
}

#[async_trait]
impl TokenValidator for JwtValidator {
    async fn check(&self, token: &str) -> Result<Claims, AuthError> {
        let header = decode_header(token).map_err(|_| AuthError::Malformed)?;

        if !self.config.algorithms.contains(&header.alg) {
            return Err(AuthError::AlgorithmNotAllowed(header.alg));
        }

        let kid = header.kid.as_deref().ok_or(AuthError::MissingKeyId)?;
        let jwk = self.keys.key(kid).await?;

        // A key pinned to one algorithm must not verify tokens signed with
        // another.
        if let Some(key_alg) = &jwk.common.key_algorithm {
            let pinned = Algorithm::from_str(&format!("{key_alg:?}")).ok();
            if pinned != Some(header.alg) {
                return Err(AuthError::AlgorithmNotAllowed(header.alg));
            }
        }

        let key = DecodingKey::from_jwk(&jwk).map_err(|e| AuthError::Key(e.to_string()))?;
        let data = decode::<Claims>(token, &key, &self.validation(header.alg))?;
        Ok(data.claims)
    }
}
