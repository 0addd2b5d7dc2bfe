// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-process identity store.
//!
//! Used for local development and tests. A commit stages every mutation
//! on a copy of the tables under the write lock and swaps it in only if
//! all preconditions and uniqueness checks pass.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use crate::db::{
    check_precondition as check, IdKind, IdentityStore, Mutation, Precondition, WriteBatch,
};
use crate::error::{AppError, Result};
use crate::models::{
    AuditLog, ConsentGrant, Context, ContextId, GrantId, Membership, Profile, ProfileContext,
    ProfileId, User, UserId,
};

#[derive(Debug, Clone, Default)]
struct Tables {
    users: BTreeMap<UserId, User>,
    contexts: BTreeMap<ContextId, Context>,
    memberships: BTreeMap<(ContextId, UserId), Membership>,
    profiles: BTreeMap<ProfileId, Profile>,
    profile_contexts: BTreeMap<(ProfileId, ContextId), ProfileContext>,
    grants: BTreeMap<GrantId, ConsentGrant>,
    audit: Vec<AuditLog>,
}

/// Identity store kept entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    sequences: std::sync::Mutex<HashMap<IdKind, u64>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Tables {
    fn apply(&mut self, mutation: Mutation) -> Result<()> {
        match mutation {
            Mutation::PutUser { user, precondition } => {
                check(
                    precondition,
                    self.users.get(&user.id).map(|u| u.version),
                    "user",
                )?;
                if self
                    .users
                    .values()
                    .any(|u| u.id != user.id && u.email.eq_ignore_ascii_case(&user.email))
                {
                    return Err(AppError::Conflict("Email already in use".to_string()));
                }
                self.users.insert(user.id, user);
            }
            Mutation::PutContext {
                context,
                precondition,
            } => {
                check(
                    precondition,
                    self.contexts.get(&context.id).map(|c| c.version),
                    "context",
                )?;
                if self
                    .contexts
                    .values()
                    .any(|c| c.id != context.id && c.name == context.name)
                {
                    return Err(AppError::Conflict(format!(
                        "Context name '{}' is already taken",
                        context.name
                    )));
                }
                self.contexts.insert(context.id, context);
            }
            Mutation::DeleteContext { context_id } => {
                self.contexts.remove(&context_id);
                self.memberships.retain(|(c, _), _| *c != context_id);
                self.profile_contexts.retain(|(_, c), _| *c != context_id);
            }
            Mutation::CheckContext {
                context_id,
                version,
            } => {
                check(
                    Precondition::Version(version),
                    self.contexts.get(&context_id).map(|c| c.version),
                    "context",
                )?;
            }
            Mutation::PutMembership {
                membership,
                precondition,
            } => {
                let key = (membership.context_id, membership.user_id);
                check(
                    precondition,
                    self.memberships.get(&key).map(|m| m.version),
                    "membership",
                )?;
                self.memberships.insert(key, membership);
            }
            Mutation::DeleteMembership {
                context_id,
                user_id,
                precondition,
            } => {
                let key = (context_id, user_id);
                check(
                    precondition,
                    self.memberships.get(&key).map(|m| m.version),
                    "membership",
                )?;
                self.memberships.remove(&key);
            }
            Mutation::CheckMembership {
                context_id,
                user_id,
                version,
            } => {
                check(
                    Precondition::Version(version),
                    self.memberships.get(&(context_id, user_id)).map(|m| m.version),
                    "membership",
                )?;
            }
            Mutation::PutProfile {
                profile,
                precondition,
            } => {
                check(
                    precondition,
                    self.profiles.get(&profile.id).map(|p| p.version),
                    "profile",
                )?;
                if self.profiles.values().any(|p| {
                    p.id != profile.id && p.user_id == profile.user_id && p.name == profile.name
                }) {
                    return Err(AppError::Conflict(format!(
                        "Profile name '{}' is already used",
                        profile.name
                    )));
                }
                self.profiles.insert(profile.id, profile);
            }
            Mutation::DeleteProfile { profile_id } => {
                self.profiles.remove(&profile_id);
            }
            Mutation::PutProfileContext { link } => {
                self.profile_contexts
                    .insert((link.profile_id, link.context_id), link);
            }
            Mutation::DeleteProfileContext {
                profile_id,
                context_id,
            } => {
                self.profile_contexts.remove(&(profile_id, context_id));
            }
            Mutation::PutGrant {
                grant,
                precondition,
            } => {
                check(
                    precondition,
                    self.grants.get(&grant.id).map(|g| g.version),
                    "consent grant",
                )?;
                self.grants.insert(grant.id, grant);
            }
            Mutation::AppendAudit(entry) => {
                if self.audit.iter().any(|a| a.id == entry.id) {
                    return Err(AppError::Conflict("Duplicate audit id".to_string()));
                }
                self.audit.push(entry);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn next_id(&self, kind: IdKind) -> Result<u64> {
        let mut sequences = self
            .sequences
            .lock()
            .map_err(|_| AppError::Database("id sequence lock poisoned".to_string()))?;
        let next = sequences.entry(kind).or_insert(0);
        *next += 1;
        Ok(*next)
    }

    async fn get_user(&self, user_id: UserId) -> Result<Option<User>> {
        Ok(self.tables.read().await.users.get(&user_id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self
            .tables
            .read()
            .await
            .users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn list_users(&self, skip: usize, take: usize) -> Result<Vec<User>> {
        Ok(self
            .tables
            .read()
            .await
            .users
            .values()
            .skip(skip)
            .take(take)
            .cloned()
            .collect())
    }

    async fn get_context(&self, context_id: ContextId) -> Result<Option<Context>> {
        Ok(self.tables.read().await.contexts.get(&context_id).cloned())
    }

    async fn list_contexts(&self, skip: usize, take: usize) -> Result<Vec<Context>> {
        Ok(self
            .tables
            .read()
            .await
            .contexts
            .values()
            .skip(skip)
            .take(take)
            .cloned()
            .collect())
    }

    async fn get_membership(
        &self,
        context_id: ContextId,
        user_id: UserId,
    ) -> Result<Option<Membership>> {
        Ok(self
            .tables
            .read()
            .await
            .memberships
            .get(&(context_id, user_id))
            .cloned())
    }

    async fn list_context_members(&self, context_id: ContextId) -> Result<Vec<Membership>> {
        let tables = self.tables.read().await;
        let mut members: Vec<Membership> = tables
            .memberships
            .range((context_id, UserId::MIN)..=(context_id, UserId::MAX))
            .map(|(_, m)| m.clone())
            .collect();
        // Join order is the context's member order.
        members.sort_by_key(|m| (m.joined_at, m.user_id));
        Ok(members)
    }

    async fn list_user_memberships(&self, user_id: UserId) -> Result<Vec<Membership>> {
        Ok(self
            .tables
            .read()
            .await
            .memberships
            .values()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn get_profile(&self, profile_id: ProfileId) -> Result<Option<Profile>> {
        Ok(self.tables.read().await.profiles.get(&profile_id).cloned())
    }

    async fn list_user_profiles(&self, user_id: UserId) -> Result<Vec<Profile>> {
        Ok(self
            .tables
            .read()
            .await
            .profiles
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn list_profile_links(&self, profile_id: ProfileId) -> Result<Vec<ProfileContext>> {
        Ok(self
            .tables
            .read()
            .await
            .profile_contexts
            .range((profile_id, ContextId::MIN)..=(profile_id, ContextId::MAX))
            .map(|(_, link)| link.clone())
            .collect())
    }

    async fn list_context_links(&self, context_id: ContextId) -> Result<Vec<ProfileContext>> {
        Ok(self
            .tables
            .read()
            .await
            .profile_contexts
            .values()
            .filter(|link| link.context_id == context_id)
            .cloned()
            .collect())
    }

    async fn get_grant(&self, grant_id: GrantId) -> Result<Option<ConsentGrant>> {
        Ok(self.tables.read().await.grants.get(&grant_id).cloned())
    }

    async fn list_user_grants(&self, user_id: UserId) -> Result<Vec<ConsentGrant>> {
        Ok(self
            .tables
            .read()
            .await
            .grants
            .values()
            .filter(|g| g.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn list_profile_grants(&self, profile_id: ProfileId) -> Result<Vec<ConsentGrant>> {
        Ok(self
            .tables
            .read()
            .await
            .grants
            .values()
            .filter(|g| g.profile_id == profile_id)
            .cloned()
            .collect())
    }

    async fn list_audit(&self, user_id: Option<UserId>, limit: usize) -> Result<Vec<AuditLog>> {
        let tables = self.tables.read().await;
        let mut entries: Vec<AuditLog> = tables
            .audit
            .iter()
            .filter(|a| user_id.is_none() || a.user_id == user_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        entries.truncate(limit);
        Ok(entries)
    }

    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        let mut tables = self.tables.write().await;
        let mut staged = tables.clone();
        for mutation in batch.into_mutations() {
            staged.apply(mutation)?;
        }
        *tables = staged;
        Ok(())
    }
}
