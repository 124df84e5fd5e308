// Copyright 2026 The Ferry Project
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;

use super::ClientError;

/// The pair of tokens every chat request carries.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    /// Identity assertion, sent as `Authorization: Bearer`.
    pub id_token: String,
    /// Forwarded verbatim to the inference service.
    pub access_token: String,
}

impl Credentials {
    pub fn new(id_token: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            id_token: id_token.into(),
            access_token: access_token.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials").finish_non_exhaustive()
    }
}

/// Source of credentials. Asked again before every attempt, so a provider
/// that refreshes behind the scenes is picked up on retry.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn credentials(&self) -> Result<Credentials, ClientError>;
}

pub struct StaticCredentials {
    credentials: Credentials,
}

impl StaticCredentials {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn credentials(&self) -> Result<Credentials, ClientError> {
        Ok(self.credentials.clone())
    }
}

/// Reads `{"idToken": "...", "accessToken": "..."}` from a file on every
/// call. An external sign-in helper keeps the file current.
pub struct FileCredentials {
    path: PathBuf,
}

impl FileCredentials {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CredentialProvider for FileCredentials {
    async fn credentials(&self) -> Result<Credentials, ClientError> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| ClientError::Credentials(format!("{}: {e}", self.path.display())))?;
        serde_json::from_str(&raw)
            .map_err(|e| ClientError::Credentials(format!("{}: {e}", self.path.display())))
    }
}
