// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use async_trait::async_trait;
use persona_contexts::config::Config;
use persona_contexts::db::{FirestoreStore, IdKind, IdentityStore, MemoryStore, WriteBatch};
use persona_contexts::error::Result;
use persona_contexts::middleware::auth::create_jwt;
use persona_contexts::models::{
    AuditAction, AuditLog, ConsentGrant, Context, ContextId, GrantId, Membership, Profile,
    ProfileContext, ProfileId, User, UserId,
};
use persona_contexts::routes::create_router;
use persona_contexts::AppState;
use std::sync::{Arc, Mutex};

/// Check if emulator is available via environment variable.
#[allow(dead_code)]
pub fn emulator_available() -> bool {
    std::env::var("FIRESTORE_EMULATOR_HOST").is_ok()
}

/// Skip test with message if emulator not available.
#[macro_export]
macro_rules! require_emulator {
    () => {
        if !crate::common::emulator_available() {
            eprintln!("⚠️  Skipping: FIRESTORE_EMULATOR_HOST not set");
            return;
        }
    };
}

/// Create a Firestore store against the emulator.
#[allow(dead_code)]
pub async fn test_firestore() -> FirestoreStore {
    FirestoreStore::new("test-project")
        .await
        .expect("Failed to connect to Firestore emulator")
}

/// Shared state over a fresh in-memory store.
#[allow(dead_code)]
pub fn test_state() -> Arc<AppState> {
    let store: Arc<dyn IdentityStore> = Arc::new(MemoryStore::new());
    Arc::new(AppState::new(Config::test_default(), store).expect("state"))
}

/// Create a test app over an in-memory store.
/// Returns the router and the shared state.
#[allow(dead_code)]
pub fn create_test_app() -> (axum::Router, Arc<AppState>) {
    let state = test_state();
    (create_router(state.clone()), state)
}

/// Register a user and return its id.
#[allow(dead_code)]
pub async fn register(state: &AppState, email: &str) -> UserId {
    state
        .users
        .register_user(email, "opaque-credential-hash")
        .await
        .expect("register user")
        .id
}

/// Session token for `user_id`, signed with the test key.
#[allow(dead_code)]
pub fn session_token(state: &AppState, user_id: UserId) -> String {
    create_jwt(user_id, &state.config.session_signing_key).expect("session token")
}

/// Every audit record with `action`, newest first.
#[allow(dead_code)]
pub async fn audit_with(state: &AppState, action: AuditAction) -> Vec<AuditLog> {
    state
        .audit
        .find_all()
        .await
        .expect("audit list")
        .into_iter()
        .filter(|log| log.action == action)
        .collect()
}

/// Memory store that can slip a competing batch in just before the next
/// commit, as if another request had won the race.
#[allow(dead_code)]
#[derive(Default)]
pub struct InterleavingStore {
    inner: MemoryStore,
    pending: Mutex<Option<WriteBatch>>,
}

#[allow(dead_code)]
impl InterleavingStore {
    /// Commit `batch` ahead of whatever the next caller commits.
    pub fn interleave(&self, batch: WriteBatch) {
        *self.pending.lock().unwrap() = Some(batch);
    }
}

#[async_trait]
impl IdentityStore for InterleavingStore {
    async fn next_id(&self, kind: IdKind) -> Result<u64> {
        self.inner.next_id(kind).await
    }
    async fn get_user(&self, user_id: UserId) -> Result<Option<User>> {
        self.inner.get_user(user_id).await
    }
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.inner.find_user_by_email(email).await
    }
    async fn list_users(&self, skip: usize, take: usize) -> Result<Vec<User>> {
        self.inner.list_users(skip, take).await
    }
    async fn get_context(&self, context_id: ContextId) -> Result<Option<Context>> {
        self.inner.get_context(context_id).await
    }
    async fn list_contexts(&self, skip: usize, take: usize) -> Result<Vec<Context>> {
        self.inner.list_contexts(skip, take).await
    }
    async fn get_membership(
        &self,
        context_id: ContextId,
        user_id: UserId,
    ) -> Result<Option<Membership>> {
        self.inner.get_membership(context_id, user_id).await
    }
    async fn list_context_members(&self, context_id: ContextId) -> Result<Vec<Membership>> {
        self.inner.list_context_members(context_id).await
    }
    async fn list_user_memberships(&self, user_id: UserId) -> Result<Vec<Membership>> {
        self.inner.list_user_memberships(user_id).await
    }
    async fn get_profile(&self, profile_id: ProfileId) -> Result<Option<Profile>> {
        self.inner.get_profile(profile_id).await
    }
    async fn list_user_profiles(&self, user_id: UserId) -> Result<Vec<Profile>> {
        self.inner.list_user_profiles(user_id).await
    }
    async fn list_profile_links(&self, profile_id: ProfileId) -> Result<Vec<ProfileContext>> {
        self.inner.list_profile_links(profile_id).await
    }
    async fn list_context_links(&self, context_id: ContextId) -> Result<Vec<ProfileContext>> {
        self.inner.list_context_links(context_id).await
    }
    async fn get_grant(&self, grant_id: GrantId) -> Result<Option<ConsentGrant>> {
        self.inner.get_grant(grant_id).await
    }
    async fn list_user_grants(&self, user_id: UserId) -> Result<Vec<ConsentGrant>> {
        self.inner.list_user_grants(user_id).await
    }
    async fn list_profile_grants(&self, profile_id: ProfileId) -> Result<Vec<ConsentGrant>> {
        self.inner.list_profile_grants(profile_id).await
    }
    async fn list_audit(&self, user_id: Option<UserId>, limit: usize) -> Result<Vec<AuditLog>> {
        self.inner.list_audit(user_id, limit).await
    }
    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        let competing = self.pending.lock().unwrap().take();
        if let Some(competing) = competing {
            self.inner.commit(competing).await.expect("competing batch");
        }
        self.inner.commit(batch).await
    }
}

/// Shared state over an [`InterleavingStore`], returned alongside it.
#[allow(dead_code)]
pub fn interleaving_state() -> (Arc<AppState>, Arc<InterleavingStore>) {
    let store = Arc::new(InterleavingStore::default());
    let dyn_store: Arc<dyn IdentityStore> = store.clone();
    let state = AppState::new(Config::test_default(), dyn_store).expect("state");
    (Arc::new(state), store)
}
