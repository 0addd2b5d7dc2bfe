// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! User accounts: registration, linked identities, export and erasure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use validator::{Validate, ValidateEmail};

use crate::db::{IdKind, IdentityStore, Mutation, Precondition, WriteBatch};
use crate::error::{AppError, Result};
use crate::models::{
    AuditAction, ConsentGrant, ContextId, LinkedAccount, Membership, ProfileId, User, UserId,
};
use crate::services::audit::{AuditEntry, AuditService};
use crate::services::membership::MAX_PAGE_SIZE;
use crate::services::profiles::ProfileDetail;

/// User as returned to API callers. Never carries the credential hash.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: UserId,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub erased: bool,
}

impl From<User> for PublicUser {
    fn from(u: User) -> Self {
        Self {
            erased: u.is_erased(),
            id: u.id,
            email: u.email,
            created_at: u.created_at,
        }
    }
}

/// External identity to attach to an account.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewLinkedAccount {
    #[validate(length(min = 1, max = 64, message = "Provider cannot be empty"))]
    pub provider: String,
    #[validate(length(min = 1, max = 256, message = "Provider id cannot be empty"))]
    pub provider_id: String,
    pub display_name: Option<String>,
    #[validate(url)]
    pub avatar: Option<String>,
    #[validate(url)]
    pub profile_url: Option<String>,
}

/// Everything stored about one user.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserExport {
    pub user: PublicUser,
    pub linked_accounts: Vec<LinkedAccount>,
    pub profiles: Vec<ProfileDetail>,
    pub contexts: Vec<Membership>,
    pub consent_grants: Vec<ConsentGrant>,
    pub exported_at: DateTime<Utc>,
}

fn normalize_email(email: &str) -> Result<String> {
    let email = email.trim().to_ascii_lowercase();
    if !email.validate_email() {
        return Err(AppError::Validation(format!(
            "Invalid email address '{}'",
            email
        )));
    }
    Ok(email)
}

#[derive(Clone)]
pub struct UserService {
    store: Arc<dyn IdentityStore>,
    audit: AuditService,
}

impl UserService {
    pub fn new(store: Arc<dyn IdentityStore>, audit: AuditService) -> Self {
        Self { store, audit }
    }

    async fn require_user(&self, user_id: UserId) -> Result<User> {
        self.store
            .get_user(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))
    }

    /// Create an account. The credential hash is stored as given.
    pub async fn register_user(&self, email: &str, credential_hash: &str) -> Result<User> {
        let email = normalize_email(email)?;
        if self.store.find_user_by_email(&email).await?.is_some() {
            return Err(AppError::Conflict("Email already in use".to_string()));
        }

        let user = User {
            id: self.store.next_id(IdKind::User).await?,
            email,
            credential_hash: credential_hash.to_string(),
            linked_accounts: Vec::new(),
            created_at: Utc::now(),
            erased_at: None,
            version: 1,
        };

        let mut batch = WriteBatch::new();
        batch.push(Mutation::PutUser {
            user: user.clone(),
            precondition: Precondition::Absent,
        });
        let entry = AuditEntry::new(AuditAction::UserRegister, "User registered")
            .actor(user.id)
            .after(&user.redacted())?;
        self.audit.record(&mut batch, entry).await?;
        self.store.commit(batch).await?;

        tracing::info!(user_id = user.id, "User registered");
        Ok(user)
    }

    pub async fn find_one(&self, user_id: UserId) -> Result<User> {
        self.require_user(user_id).await
    }

    pub async fn find_all(&self, skip: usize, take: usize) -> Result<Vec<User>> {
        self.store
            .list_users(skip, take.clamp(1, MAX_PAGE_SIZE))
            .await
    }

    /// Attach an external identity. Linking the same provider subject
    /// twice returns the existing link.
    pub async fn link_account(
        &self,
        user_id: UserId,
        account: NewLinkedAccount,
    ) -> Result<LinkedAccount> {
        let user = self.require_user(user_id).await?;
        if let Some(existing) = user
            .linked_accounts
            .iter()
            .find(|a| a.provider == account.provider && a.provider_id == account.provider_id)
        {
            return Ok(existing.clone());
        }

        let linked = LinkedAccount {
            id: self.store.next_id(IdKind::LinkedAccount).await?,
            provider: account.provider,
            provider_id: account.provider_id,
            display_name: account.display_name,
            avatar: account.avatar,
            profile_url: account.profile_url,
        };
        let mut updated = user.clone();
        updated.linked_accounts.push(linked.clone());
        updated.version = user.version + 1;

        let mut batch = WriteBatch::new();
        batch.push(Mutation::PutUser {
            user: updated,
            precondition: Precondition::Version(user.version),
        });
        let entry = AuditEntry::new(
            AuditAction::LinkedAccountAdd,
            format!("Linked account {}", linked.provider),
        )
        .actor(user_id)
        .target(format!("linkedAccountId:{}", linked.id))
        .after(&linked)?;
        self.audit.record(&mut batch, entry).await?;
        self.store.commit(batch).await?;

        tracing::info!(user_id, provider = %linked.provider, "Linked account added");
        Ok(linked)
    }

    pub async fn list_linked_accounts(&self, user_id: UserId) -> Result<Vec<LinkedAccount>> {
        Ok(self.require_user(user_id).await?.linked_accounts)
    }

    pub async fn delete_linked_account(
        &self,
        user_id: UserId,
        linked_account_id: u64,
    ) -> Result<LinkedAccount> {
        let user = self.require_user(user_id).await?;
        let Some(pos) = user
            .linked_accounts
            .iter()
            .position(|a| a.id == linked_account_id)
        else {
            return Err(AppError::NotFound(format!(
                "Linked account {} not found",
                linked_account_id
            )));
        };

        let mut updated = user.clone();
        let removed = updated.linked_accounts.remove(pos);
        updated.version = user.version + 1;

        let mut batch = WriteBatch::new();
        batch.push(Mutation::PutUser {
            user: updated,
            precondition: Precondition::Version(user.version),
        });
        let entry = AuditEntry::new(
            AuditAction::LinkedAccountDelete,
            format!("Deleted linked account {}", removed.provider),
        )
        .actor(user_id)
        .target(format!("linkedAccountId:{}", removed.id))
        .before(&removed)?;
        self.audit.record(&mut batch, entry).await?;
        self.store.commit(batch).await?;

        tracing::info!(user_id, linked_account_id, "Linked account deleted");
        Ok(removed)
    }

    /// Collect everything stored about the user (GDPR access request).
    pub async fn export_user_data(&self, user_id: UserId) -> Result<UserExport> {
        let user = self.require_user(user_id).await?;

        let mut profiles = Vec::new();
        for profile in self.store.list_user_profiles(user_id).await? {
            let contexts = self.store.list_profile_links(profile.id).await?;
            profiles.push(ProfileDetail { profile, contexts });
        }
        let contexts = self.store.list_user_memberships(user_id).await?;
        let consent_grants = self
            .store
            .list_user_grants(user_id)
            .await?
            .into_iter()
            .map(ConsentGrant::without_token)
            .collect();

        self.audit
            .append(
                AuditEntry::new(AuditAction::GdprExport, "User exported account data")
                    .actor(user_id),
            )
            .await?;

        tracing::info!(user_id, profiles = profiles.len(), "User data exported");
        Ok(UserExport {
            linked_accounts: user.linked_accounts.clone(),
            user: user.into(),
            profiles,
            contexts,
            consent_grants,
            exported_at: Utc::now(),
        })
    }

    /// Erase an account (GDPR). The user row is kept for audit history
    /// with its email anonymized and credential cleared.
    ///
    /// Refused while the user is the last admin of a context that has
    /// other members. Contexts where the user is the only member are
    /// deleted with them.
    pub async fn erase_account(&self, user_id: UserId) -> Result<()> {
        let user = self.require_user(user_id).await?;
        if user.is_erased() {
            return Ok(());
        }

        let memberships = self.store.list_user_memberships(user_id).await?;
        let mut orphaned: Vec<ContextId> = Vec::new();
        for m in &memberships {
            let members = self.store.list_context_members(m.context_id).await?;
            if members.len() == 1 {
                orphaned.push(m.context_id);
                continue;
            }
            if m.is_admin() && !members.iter().any(|o| o.is_admin() && o.user_id != user_id) {
                return Err(AppError::Forbidden(format!(
                    "Cannot delete the last admin of context {}; promote another member first",
                    m.context_id
                )));
            }
        }

        let mut batch = WriteBatch::new();
        let mut links: BTreeSet<(ProfileId, ContextId)> = BTreeSet::new();
        let profiles = self.store.list_user_profiles(user_id).await?;
        for profile in &profiles {
            for link in self.store.list_profile_links(profile.id).await? {
                links.insert((link.profile_id, link.context_id));
            }
        }
        for &context_id in &orphaned {
            for link in self.store.list_context_links(context_id).await? {
                links.insert((link.profile_id, link.context_id));
            }
        }
        for (profile_id, context_id) in links {
            batch.push(Mutation::DeleteProfileContext {
                profile_id,
                context_id,
            });
        }
        for profile in &profiles {
            batch.push(Mutation::DeleteProfile {
                profile_id: profile.id,
            });
        }
        for m in &memberships {
            batch.push(Mutation::DeleteMembership {
                context_id: m.context_id,
                user_id,
                precondition: Precondition::Version(m.version),
            });
        }
        for &context_id in &orphaned {
            batch.push(Mutation::DeleteContext { context_id });
        }
        for grant in self.store.list_user_grants(user_id).await? {
            if grant.revoked {
                continue;
            }
            let version = grant.version;
            batch.push(Mutation::PutGrant {
                grant: ConsentGrant {
                    revoked: true,
                    version: version + 1,
                    ..grant
                },
                precondition: Precondition::Version(version),
            });
        }

        let erased = User {
            email: User::anonymized_email(user_id),
            credential_hash: String::new(),
            linked_accounts: Vec::new(),
            erased_at: Some(Utc::now()),
            version: user.version + 1,
            ..user.clone()
        };
        batch.push(Mutation::PutUser {
            user: erased,
            precondition: Precondition::Version(user.version),
        });
        let entry = AuditEntry::new(AuditAction::AccountDelete, "User deleted (GDPR)")
            .actor(user_id)
            .before(&user.redacted())?;
        self.audit.record(&mut batch, entry).await?;
        self.store.commit(batch).await?;

        tracing::info!(
            user_id,
            profiles = profiles.len(),
            memberships = memberships.len(),
            deleted_contexts = orphaned.len(),
            "Account erased"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_email() {
        assert_eq!(
            normalize_email("  Alice@Example.COM ").unwrap(),
            "alice@example.com"
        );
        assert!(matches!(
            normalize_email("not-an-email"),
            Err(AppError::Validation(_))
        ));
        assert!(normalize_email("").is_err());
    }

    #[test]
    fn test_public_user_hides_credential() {
        let user = User {
            id: 4,
            email: "a@b.example".to_string(),
            credential_hash: "$argon2id$secret".to_string(),
            linked_accounts: Vec::new(),
            created_at: Utc::now(),
            erased_at: None,
            version: 1,
        };
        let json = serde_json::to_string(&PublicUser::from(user)).unwrap();
        assert!(!json.contains("argon2"));
        assert!(json.contains("\"erased\":false"));
    }
}
