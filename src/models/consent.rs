// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Consent grants issued to relying parties.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::profile::ProfileId;
use super::user::UserId;

pub type GrantId = u64;

/// Lifetime of every consent grant and its token.
pub const CONSENT_TTL_SECS: i64 = 5 * 60;

pub fn consent_ttl() -> Duration {
    Duration::seconds(CONSENT_TTL_SECS)
}

/// Time-boxed, attribute-scoped authorization for one profile.
///
/// Immutable after issuance except for `revoked`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentGrant {
    pub id: GrantId,
    pub user_id: UserId,
    pub profile_id: ProfileId,
    /// Relying-party identifier
    pub client_id: String,
    pub scope: String,
    pub granted_attrs: Vec<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    /// Signed token handed to the relying party
    pub token: String,
    #[serde(default)]
    pub version: u64,
}

impl ConsentGrant {
    /// Expiry is computed, never stored as a state.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && !self.is_expired_at(now)
    }

    /// The grant with its bearer token blanked. Only issuance hands the
    /// token out; every later read goes through this.
    pub fn without_token(self) -> Self {
        Self {
            token: String::new(),
            ..self
        }
    }
}

/// Claims embedded in a consent token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentClaims {
    pub sub: UserId,
    pub profile_id: ProfileId,
    pub attrs: Vec<String>,
    pub client_id: String,
    pub scope: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Grant id, for out-of-band status checks
    pub jti: String,
}
