// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! User model for storage and API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type UserId = u64;

/// Account record stored in the identity store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// User ID (also used as document ID)
    pub id: UserId,
    /// Email address, unique across users
    pub email: String,
    /// Credential hash produced by the login layer; opaque here.
    /// Empty after erasure or for federated-only accounts.
    #[serde(default)]
    pub credential_hash: String,
    /// External identities linked to this account
    #[serde(default)]
    pub linked_accounts: Vec<LinkedAccount>,
    /// When the account was created
    pub created_at: DateTime<Utc>,
    /// Set when the account has been erased (GDPR)
    #[serde(default)]
    pub erased_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub version: u64,
}

/// A federated identity attached to a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkedAccount {
    pub id: u64,
    /// Provider name, e.g. "github"
    pub provider: String,
    /// Subject identifier at the provider
    pub provider_id: String,
    pub display_name: Option<String>,
    pub avatar: Option<String>,
    pub profile_url: Option<String>,
}

impl User {
    /// Replacement email written on erasure.
    pub fn anonymized_email(id: UserId) -> String {
        format!("deleted_user_{}@anonymized.local", id)
    }

    pub fn is_erased(&self) -> bool {
        self.erased_at.is_some()
    }

    /// Copy with the credential stripped, for the audit trail.
    pub fn redacted(&self) -> User {
        User {
            credential_hash: String::new(),
            ..self.clone()
        }
    }
}
