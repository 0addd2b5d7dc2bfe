// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Contexts and context membership.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::user::UserId;

pub type ContextId = u64;

/// Minimum length of a context name, in characters.
pub const MIN_CONTEXT_NAME_LEN: usize = 2;

/// A named group of users (work, family, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Context {
    pub id: ContextId,
    /// Unique across all contexts
    pub name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub version: u64,
}

/// Role of a user inside a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Member,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Member => "member",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Membership of a user in a context. Unique per (context, user).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Membership {
    pub context_id: ContextId,
    pub user_id: UserId,
    pub role: Role,
    pub joined_at: DateTime<Utc>,
    /// Bumped on every write; used for optimistic concurrency.
    #[serde(default)]
    pub version: u64,
}

impl Membership {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}
