// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Append-only audit trail records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::context::ContextId;
use super::profile::ProfileId;
use super::user::UserId;

/// Audit action tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    ContextCreate,
    ContextRename,
    ContextDelete,
    MemberAdd,
    MemberRemove,
    RoleChange,
    ProfileCreate,
    ProfileUpdate,
    ProfileDelete,
    ConsentGrant,
    ConsentRevoke,
    UserRegister,
    LinkedAccountAdd,
    LinkedAccountDelete,
    GdprExport,
    AccountDelete,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::ContextCreate => "context_create",
            AuditAction::ContextRename => "context_rename",
            AuditAction::ContextDelete => "context_delete",
            AuditAction::MemberAdd => "member_add",
            AuditAction::MemberRemove => "member_remove",
            AuditAction::RoleChange => "role_change",
            AuditAction::ProfileCreate => "profile_create",
            AuditAction::ProfileUpdate => "profile_update",
            AuditAction::ProfileDelete => "profile_delete",
            AuditAction::ConsentGrant => "consent_grant",
            AuditAction::ConsentRevoke => "consent_revoke",
            AuditAction::UserRegister => "user_register",
            AuditAction::LinkedAccountAdd => "linked_account_add",
            AuditAction::LinkedAccountDelete => "linked_account_delete",
            AuditAction::GdprExport => "gdpr_export",
            AuditAction::AccountDelete => "account_delete",
        }
    }
}

/// One immutable audit event.
///
/// `context_id` and `profile_id` may point at records that no longer
/// exist; consumers must tolerate that.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLog {
    pub id: u64,
    pub created_at: DateTime<Utc>,
    /// Acting user
    pub user_id: Option<UserId>,
    pub context_id: Option<ContextId>,
    pub profile_id: Option<ProfileId>,
    pub action: AuditAction,
    /// Target descriptor, e.g. "userId:42"
    pub target: Option<String>,
    pub before: Option<serde_json::Value>,
    pub after: Option<serde_json::Value>,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_serializes_as_tag() {
        let json = serde_json::to_string(&AuditAction::RoleChange).unwrap();
        assert_eq!(json, format!("\"{}\"", AuditAction::RoleChange.as_str()));

        let json = serde_json::to_string(&AuditAction::LinkedAccountDelete).unwrap();
        assert_eq!(json, "\"linked_account_delete\"");
    }
}
