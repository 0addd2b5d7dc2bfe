// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Membership authority: contexts, members and roles.
//!
//! Every mutation commits its rows and its audit record as one batch.
//! Read-modify-write paths carry version preconditions, so a concurrent
//! change to the same membership makes the later commit fail with
//! `Conflict` instead of silently overwriting it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::db::{IdKind, IdentityStore, Mutation, Precondition, WriteBatch};
use crate::error::{AppError, Result};
use crate::models::context::MIN_CONTEXT_NAME_LEN;
use crate::models::{AuditAction, Context, ContextId, Membership, Role, UserId};
use crate::services::audit::{AuditEntry, AuditService};

/// Default and maximum page sizes for `find_all`.
pub const DEFAULT_PAGE_SIZE: usize = 25;
pub const MAX_PAGE_SIZE: usize = 100;

/// Member row joined with the user's email.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextMember {
    pub user_id: UserId,
    pub email: Option<String>,
    pub role: Role,
    pub joined_at: DateTime<Utc>,
}

/// Context as captured in the `context_delete` audit record.
#[derive(Serialize)]
struct ContextSnapshot<'a> {
    #[serde(flatten)]
    context: &'a Context,
    members: &'a [Membership],
}

/// Trim and length-check a context name.
pub fn validate_context_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.chars().count() < MIN_CONTEXT_NAME_LEN {
        return Err(AppError::Validation(format!(
            "Context name must be at least {} characters",
            MIN_CONTEXT_NAME_LEN
        )));
    }
    Ok(name.to_string())
}

#[derive(Clone)]
pub struct MembershipService {
    store: Arc<dyn IdentityStore>,
    audit: AuditService,
}

impl MembershipService {
    pub fn new(store: Arc<dyn IdentityStore>, audit: AuditService) -> Self {
        Self { store, audit }
    }

    async fn require_context(&self, context_id: ContextId) -> Result<Context> {
        self.store
            .get_context(context_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Context {} not found", context_id)))
    }

    /// Fail with `Forbidden` unless `user_id` holds any role in the context.
    pub async fn require_member(
        &self,
        context_id: ContextId,
        user_id: UserId,
    ) -> Result<Membership> {
        self.store
            .get_membership(context_id, user_id)
            .await?
            .ok_or_else(|| {
                AppError::Forbidden(format!("Not a member of context {}", context_id))
            })
    }

    // ─── Context Lifecycle ───────────────────────────────────────

    /// Create a context; the creator becomes its first admin.
    pub async fn create_context(&self, name: &str, creator_id: UserId) -> Result<Context> {
        let name = validate_context_name(name)?;
        let now = Utc::now();
        let context = Context {
            id: self.store.next_id(IdKind::Context).await?,
            name,
            created_at: now,
            version: 1,
        };
        let membership = Membership {
            context_id: context.id,
            user_id: creator_id,
            role: Role::Admin,
            joined_at: now,
            version: 1,
        };

        let mut batch = WriteBatch::new();
        batch.push(Mutation::PutContext {
            context: context.clone(),
            precondition: Precondition::Absent,
        });
        batch.push(Mutation::PutMembership {
            membership,
            precondition: Precondition::Absent,
        });
        let entry = AuditEntry::new(
            AuditAction::ContextCreate,
            format!("Created context '{}'", context.name),
        )
        .actor(creator_id)
        .context(context.id);
        self.audit.record(&mut batch, entry).await?;
        self.store.commit(batch).await?;

        tracing::info!(context_id = context.id, creator_id, "Context created");
        Ok(context)
    }

    /// Rename a context. Any member may rename.
    pub async fn rename_context(
        &self,
        context_id: ContextId,
        name: &str,
        requesting_user_id: UserId,
    ) -> Result<Context> {
        let before = self.require_context(context_id).await?;
        self.require_member(context_id, requesting_user_id).await?;
        let name = validate_context_name(name)?;

        let updated = Context {
            name,
            version: before.version + 1,
            ..before.clone()
        };

        let mut batch = WriteBatch::new();
        batch.push(Mutation::PutContext {
            context: updated.clone(),
            precondition: Precondition::Version(before.version),
        });
        let entry = AuditEntry::new(
            AuditAction::ContextRename,
            format!(
                "Renamed context from '{}' to '{}'",
                before.name, updated.name
            ),
        )
        .actor(requesting_user_id)
        .context(context_id)
        .before(&before)?
        .after(&updated)?;
        self.audit.record(&mut batch, entry).await?;
        self.store.commit(batch).await?;

        tracing::info!(context_id, requesting_user_id, "Context renamed");
        Ok(updated)
    }

    /// Delete a context together with its memberships and profile links.
    /// Any member may delete.
    pub async fn delete_context(
        &self,
        context_id: ContextId,
        requesting_user_id: UserId,
    ) -> Result<()> {
        let context = self.require_context(context_id).await?;
        self.require_member(context_id, requesting_user_id).await?;

        let members = self.store.list_context_members(context_id).await?;
        let links = self.store.list_context_links(context_id).await?;

        let mut batch = WriteBatch::new();
        for m in &members {
            batch.push(Mutation::DeleteMembership {
                context_id,
                user_id: m.user_id,
                precondition: Precondition::None,
            });
        }
        for link in &links {
            batch.push(Mutation::DeleteProfileContext {
                profile_id: link.profile_id,
                context_id,
            });
        }
        batch.push(Mutation::DeleteContext { context_id });
        let entry = AuditEntry::new(AuditAction::ContextDelete, "Context deleted")
            .actor(requesting_user_id)
            .context(context_id)
            .before(&ContextSnapshot {
                context: &context,
                members: &members,
            })?;
        self.audit.record(&mut batch, entry).await?;
        self.store.commit(batch).await?;

        tracing::info!(
            context_id,
            requesting_user_id,
            members = members.len(),
            links = links.len(),
            "Context deleted"
        );
        Ok(())
    }

    // ─── Membership ──────────────────────────────────────────────

    /// Add a user as `member`. Adding an existing member returns the
    /// existing row unchanged.
    pub async fn add_member(
        &self,
        context_id: ContextId,
        user_id: UserId,
        actor: Option<UserId>,
    ) -> Result<Membership> {
        let context = self.require_context(context_id).await?;
        if self.store.get_user(user_id).await?.is_none() {
            return Err(AppError::NotFound(format!("User {} not found", user_id)));
        }
        if let Some(existing) = self.store.get_membership(context_id, user_id).await? {
            return Ok(existing);
        }

        let membership = Membership {
            context_id,
            user_id,
            role: Role::Member,
            joined_at: Utc::now(),
            version: 1,
        };

        let mut batch = WriteBatch::new();
        batch
            .push(Mutation::CheckContext {
                context_id,
                version: context.version,
            })
            .push(Mutation::PutMembership {
                membership: membership.clone(),
                precondition: Precondition::Absent,
            });
        let mut entry = AuditEntry::new(
            AuditAction::MemberAdd,
            format!("Added user {} to context", user_id),
        )
        .context(context_id)
        .target(format!("userId:{}", user_id))
        .after(&membership)?;
        if let Some(actor) = actor {
            entry = entry.actor(actor);
        }
        self.audit.record(&mut batch, entry).await?;

        match self.store.commit(batch).await {
            Ok(()) => {}
            // Lost a race with a concurrent add, rename or delete.
            Err(AppError::Conflict(_)) => {
                if let Some(existing) = self.store.get_membership(context_id, user_id).await? {
                    return Ok(existing);
                }
                self.require_context(context_id).await?;
                return Err(AppError::Conflict(format!(
                    "Membership of user {} changed concurrently",
                    user_id
                )));
            }
            Err(e) => return Err(e),
        }

        tracing::info!(context_id, user_id, "Member added");
        Ok(membership)
    }

    /// Remove a membership. Removing an absent membership is a no-op.
    ///
    /// The last admin of a context that still has other members cannot
    /// be removed.
    pub async fn remove_member(
        &self,
        context_id: ContextId,
        user_id: UserId,
        actor: Option<UserId>,
    ) -> Result<()> {
        let Some(existing) = self.store.get_membership(context_id, user_id).await? else {
            return Ok(());
        };

        let mut batch = WriteBatch::new();
        if existing.is_admin() {
            let members = self.store.list_context_members(context_id).await?;
            let other_admins: Vec<&Membership> = members
                .iter()
                .filter(|m| m.is_admin() && m.user_id != user_id)
                .collect();
            if other_admins.is_empty() && members.len() > 1 {
                return Err(AppError::Forbidden(
                    "Cannot remove the last admin of a context".to_string(),
                ));
            }
            // Another admin must still be an admin when this commits.
            for admin in other_admins {
                batch.push(Mutation::CheckMembership {
                    context_id,
                    user_id: admin.user_id,
                    version: admin.version,
                });
            }
        }

        batch.push(Mutation::DeleteMembership {
            context_id,
            user_id,
            precondition: Precondition::Version(existing.version),
        });
        let mut entry = AuditEntry::new(
            AuditAction::MemberRemove,
            format!("Removed user {} from context", user_id),
        )
        .context(context_id)
        .target(format!("userId:{}", user_id))
        .before(&existing)?;
        if let Some(actor) = actor {
            entry = entry.actor(actor);
        }
        self.audit.record(&mut batch, entry).await?;
        self.store.commit(batch).await?;

        tracing::info!(context_id, user_id, "Member removed");
        Ok(())
    }

    /// Change a member's role. Only admins may change roles, and never
    /// their own (promotion included).
    pub async fn set_member_role(
        &self,
        context_id: ContextId,
        target_user_id: UserId,
        requesting_user_id: UserId,
        role: Role,
    ) -> Result<Membership> {
        let requester = self
            .store
            .get_membership(context_id, requesting_user_id)
            .await?
            .filter(Membership::is_admin)
            .ok_or_else(|| AppError::Forbidden("Only admins may change roles".to_string()))?;
        if requesting_user_id == target_user_id {
            return Err(AppError::Forbidden("Cannot demote yourself".to_string()));
        }
        let before = self
            .store
            .get_membership(context_id, target_user_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "User {} is not a member of context {}",
                    target_user_id, context_id
                ))
            })?;

        let after = Membership {
            role,
            version: before.version + 1,
            ..before.clone()
        };

        let mut batch = WriteBatch::new();
        batch.push(Mutation::CheckMembership {
            context_id,
            user_id: requesting_user_id,
            version: requester.version,
        });
        batch.push(Mutation::PutMembership {
            membership: after.clone(),
            precondition: Precondition::Version(before.version),
        });
        let entry = AuditEntry::new(
            AuditAction::RoleChange,
            format!("Set member {} role to {}", target_user_id, role),
        )
        .actor(requesting_user_id)
        .context(context_id)
        .target(format!("userId:{}", target_user_id))
        .before(&before)?
        .after(&after)?;
        self.audit.record(&mut batch, entry).await?;
        self.store.commit(batch).await?;

        tracing::info!(
            context_id,
            target_user_id,
            requesting_user_id,
            role = %role,
            "Member role changed"
        );
        Ok(after)
    }

    // ─── Reads ───────────────────────────────────────────────────

    /// Members in join order, each with the user's email.
    pub async fn list_members(&self, context_id: ContextId) -> Result<Vec<ContextMember>> {
        let memberships = self.store.list_context_members(context_id).await?;
        let mut members = Vec::with_capacity(memberships.len());
        for m in memberships {
            let email = self.store.get_user(m.user_id).await?.map(|u| u.email);
            members.push(ContextMember {
                user_id: m.user_id,
                email,
                role: m.role,
                joined_at: m.joined_at,
            });
        }
        Ok(members)
    }

    /// Contexts the user belongs to, in any role.
    pub async fn find_user_contexts(&self, user_id: UserId) -> Result<Vec<Context>> {
        let memberships = self.store.list_user_memberships(user_id).await?;
        let mut contexts = Vec::with_capacity(memberships.len());
        for m in memberships {
            // A membership can briefly outlive its context under the
            // chunked Firestore fallback; skip those.
            if let Some(context) = self.store.get_context(m.context_id).await? {
                contexts.push(context);
            }
        }
        Ok(contexts)
    }

    pub async fn find_one(&self, context_id: ContextId) -> Result<Context> {
        self.require_context(context_id).await
    }

    pub async fn find_all(&self, skip: usize, take: usize) -> Result<Vec<Context>> {
        self.store
            .list_contexts(skip, take.clamp(1, MAX_PAGE_SIZE))
            .await
    }

    /// Whether the user is admin of at least one context.
    pub async fn is_admin_anywhere(&self, user_id: UserId) -> Result<bool> {
        Ok(self
            .store
            .list_user_memberships(user_id)
            .await?
            .iter()
            .any(Membership::is_admin))
    }
}
