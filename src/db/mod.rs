// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Identity store: the storage seam shared by every service.
//!
//! Reads go straight to the store. Writes are collected into a
//! [`WriteBatch`] and committed atomically, so a mutation and the audit
//! record describing it either both land or neither does.

pub mod firestore;
pub mod ids;
pub mod memory;

pub use firestore::FirestoreStore;
pub use memory::MemoryStore;

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::models::{
    AuditLog, ConsentGrant, Context, ContextId, GrantId, Membership, Profile, ProfileContext,
    ProfileId, User, UserId,
};

/// Collection names as constants.
pub mod collections {
    pub const USERS: &str = "users";
    pub const USER_EMAILS: &str = "user_emails";
    pub const CONTEXTS: &str = "contexts";
    pub const CONTEXT_NAMES: &str = "context_names";
    pub const MEMBERSHIPS: &str = "memberships";
    pub const PROFILES: &str = "profiles";
    pub const PROFILE_CONTEXTS: &str = "profile_contexts";
    pub const CONSENT_GRANTS: &str = "consent_grants";
    pub const AUDIT_LOGS: &str = "audit_logs";
}

/// Record families that draw ids from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdKind {
    User,
    LinkedAccount,
    Context,
    Profile,
    Grant,
    Audit,
}

/// Condition a record must satisfy for the batch to commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    /// Unconditional write
    None,
    /// Record must not exist yet
    Absent,
    /// Record must exist
    Exists,
    /// Record must exist with exactly this version
    Version(u64),
}

/// Check a precondition against the version currently stored, if any.
pub(crate) fn check_precondition(
    precondition: Precondition,
    current: Option<u64>,
    what: &str,
) -> Result<()> {
    let ok = match (precondition, current) {
        (Precondition::None, _) => true,
        (Precondition::Absent, current) => current.is_none(),
        (Precondition::Exists, current) => current.is_some(),
        (Precondition::Version(expected), Some(actual)) => expected == actual,
        (Precondition::Version(_), None) => false,
    };
    if ok {
        Ok(())
    } else {
        Err(AppError::Conflict(format!(
            "{} was modified concurrently or already exists",
            what
        )))
    }
}

/// A single write inside a batch.
#[derive(Debug, Clone)]
pub enum Mutation {
    PutUser {
        user: User,
        precondition: Precondition,
    },
    PutContext {
        context: Context,
        precondition: Precondition,
    },
    /// Also removes any membership or profile link still pointing at
    /// the context when the batch commits.
    DeleteContext {
        context_id: ContextId,
    },
    /// Guard only: the context must still exist at `version`.
    CheckContext {
        context_id: ContextId,
        version: u64,
    },
    PutMembership {
        membership: Membership,
        precondition: Precondition,
    },
    DeleteMembership {
        context_id: ContextId,
        user_id: UserId,
        precondition: Precondition,
    },
    /// Guard only: the membership must still be at `version`.
    CheckMembership {
        context_id: ContextId,
        user_id: UserId,
        version: u64,
    },
    PutProfile {
        profile: Profile,
        precondition: Precondition,
    },
    DeleteProfile {
        profile_id: ProfileId,
    },
    PutProfileContext {
        link: ProfileContext,
    },
    DeleteProfileContext {
        profile_id: ProfileId,
        context_id: ContextId,
    },
    PutGrant {
        grant: ConsentGrant,
        precondition: Precondition,
    },
    AppendAudit(AuditLog),
}

/// Ordered set of mutations committed as one unit.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    mutations: Vec<Mutation>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, mutation: Mutation) -> &mut Self {
        self.mutations.push(mutation);
        self
    }

    pub(crate) fn len(&self) -> usize {
        self.mutations.len()
    }

    pub fn into_mutations(self) -> Vec<Mutation> {
        self.mutations
    }
}

/// Durable storage for every identity record.
///
/// Uniqueness (user email, context name, profile name per user,
/// membership pair, profile-context pair) is enforced at commit time and
/// reported as `AppError::Conflict`, as are failed preconditions.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Allocate a fresh id for a record family.
    async fn next_id(&self, kind: IdKind) -> Result<u64>;

    async fn get_user(&self, user_id: UserId) -> Result<Option<User>>;
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>>;
    async fn list_users(&self, skip: usize, take: usize) -> Result<Vec<User>>;

    async fn get_context(&self, context_id: ContextId) -> Result<Option<Context>>;
    async fn list_contexts(&self, skip: usize, take: usize) -> Result<Vec<Context>>;

    async fn get_membership(
        &self,
        context_id: ContextId,
        user_id: UserId,
    ) -> Result<Option<Membership>>;
    async fn list_context_members(&self, context_id: ContextId) -> Result<Vec<Membership>>;
    async fn list_user_memberships(&self, user_id: UserId) -> Result<Vec<Membership>>;

    async fn get_profile(&self, profile_id: ProfileId) -> Result<Option<Profile>>;
    async fn list_user_profiles(&self, user_id: UserId) -> Result<Vec<Profile>>;
    async fn list_profile_links(&self, profile_id: ProfileId) -> Result<Vec<ProfileContext>>;
    async fn list_context_links(&self, context_id: ContextId) -> Result<Vec<ProfileContext>>;

    async fn get_grant(&self, grant_id: GrantId) -> Result<Option<ConsentGrant>>;
    async fn list_user_grants(&self, user_id: UserId) -> Result<Vec<ConsentGrant>>;
    async fn list_profile_grants(&self, profile_id: ProfileId) -> Result<Vec<ConsentGrant>>;

    /// Audit records newest first, optionally restricted to one actor.
    async fn list_audit(&self, user_id: Option<UserId>, limit: usize) -> Result<Vec<AuditLog>>;

    /// Apply every mutation in the batch, or none of them.
    async fn commit(&self, batch: WriteBatch) -> Result<()>;
}
