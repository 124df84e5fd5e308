// Copyright 2026 The Ferry Project
// SPDX-License-Identifier: Apache-2.0

// Access credential diagnostics
//
// The access credential is forwarded upstream verbatim and never trusted
// here. When it happens to be a JWT, its payload is decoded WITHOUT
// verification so logs can show whose credential it is and when it lapses.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Unverified summary of an access credential. For logging only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialSummary {
    pub sub: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl CredentialSummary {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }
}

#[derive(Deserialize)]
struct UnverifiedPayload {
    sub: Option<String>,
    exp: Option<i64>,
}

/// Decode the payload segment of a JWT-shaped credential. Returns `None`
/// for opaque credentials.
pub fn inspect_credential(credential: &str) -> Option<CredentialSummary> {
    let mut segments = credential.split('.');
    let (_, payload, _) = (segments.next()?, segments.next()?, segments.next()?);
    if segments.next().is_some() {
        return None;
    }

    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: UnverifiedPayload = serde_json::from_slice(&bytes).ok()?;

    Some(CredentialSummary {
        sub: claims.sub,
        expires_at: claims.exp.and_then(|exp| DateTime::from_timestamp(exp, 0)),
    })
}
