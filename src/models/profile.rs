// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Profiles (partial identities) and their per-context overrides.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::context::ContextId;
use super::user::UserId;

pub type ProfileId = u64;

/// Disclosure policy of a profile or of a per-context override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Visibility {
    Public,
    #[default]
    Private,
    ContextMembers,
    NotSharable,
}

impl Visibility {
    pub const ALL: [Visibility; 4] = [
        Visibility::Public,
        Visibility::Private,
        Visibility::ContextMembers,
        Visibility::NotSharable,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
            Visibility::ContextMembers => "context-members",
            Visibility::NotSharable => "not-sharable",
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Disclosable attributes carried by a profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileAttributes {
    pub gender: Option<String>,
    pub sexuality: Option<String>,
    pub relationship_status: Option<String>,
    /// Reference to a stored picture (URL or storage key)
    pub profile_picture: Option<String>,
    /// Free-form context label, e.g. "gaming"
    pub context: Option<String>,
}

/// Attribute names a consent grant may carry.
pub const SHAREABLE_ATTRIBUTES: [&str; 8] = [
    "name",
    "label",
    "displayName",
    "gender",
    "sexuality",
    "relationshipStatus",
    "profilePicture",
    "context",
];

pub fn is_shareable_attribute(name: &str) -> bool {
    SHAREABLE_ATTRIBUTES.contains(&name)
}

/// A partial identity owned by one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: ProfileId,
    pub user_id: UserId,
    /// Unique per user
    pub name: String,
    pub label: Option<String>,
    pub display_name: Option<String>,
    /// Default visibility when no context override applies
    pub visibility: Visibility,
    #[serde(default)]
    pub attributes: ProfileAttributes,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub version: u64,
}

/// Per-context presentation of a profile. Unique per (profile, context).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileContext {
    pub profile_id: ProfileId,
    pub context_id: ContextId,
    pub display_name: Option<String>,
    pub visibility: Visibility,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visibility_wire_names() {
        assert_eq!(
            serde_json::to_string(&Visibility::ContextMembers).unwrap(),
            "\"context-members\""
        );
        assert_eq!(
            serde_json::from_str::<Visibility>("\"not-sharable\"").unwrap(),
            Visibility::NotSharable
        );
        for v in Visibility::ALL {
            assert_eq!(serde_json::to_value(v).unwrap(), v.as_str());
        }
        assert!(serde_json::from_str::<Visibility>("\"friends\"").is_err());
    }

    #[test]
    fn test_default_visibility_is_private() {
        assert_eq!(Visibility::default(), Visibility::Private);
    }

    #[test]
    fn test_shareable_attributes() {
        assert!(is_shareable_attribute("displayName"));
        assert!(is_shareable_attribute("gender"));
        assert!(!is_shareable_attribute("email"));
        assert!(!is_shareable_attribute("credentialHash"));
    }
}
