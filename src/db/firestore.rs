// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore-backed identity store.
//!
//! Document layout:
//! - `users/{id}`, `contexts/{id}`, `profiles/{id}`, `consent_grants/{id}`,
//!   `audit_logs/{id}`
//! - `memberships/{context_id}_{user_id}`
//! - `profile_contexts/{profile_id}_{context_id}`
//! - `context_names/{name}` and `user_emails/{email}` as uniqueness keys
//!
//! Preconditions and uniqueness are checked by reading the affected
//! documents before the write transaction opens; the writes themselves go
//! out in a single Firestore transaction. Creates, uniqueness keys and
//! guarded documents also carry a server-side existence precondition, so
//! a writer that slips in between the read and the commit makes the
//! transaction fail instead of being overwritten.

use async_trait::async_trait;
use firestore::{errors::FirestoreError, FirestoreQueryDirection, FirestoreWritePrecondition};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::Arc;

use crate::db::ids::IdGenerator;
use crate::db::{
    check_precondition, collections, IdKind, IdentityStore, Mutation, Precondition, WriteBatch,
};
use crate::error::{AppError, Result};
use crate::models::{
    AuditLog, ConsentGrant, Context, ContextId, GrantId, Membership, Profile, ProfileContext,
    ProfileId, User, UserId,
};

// Firestore limits transactions to 500 writes.
// We use a safe limit of 400 to allow headroom.
const BATCH_SIZE: usize = 400;

/// Owner of a uniqueness key document.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct UniqueKey {
    owner_id: u64,
}

/// Document payload of a pending write.
enum Doc {
    User(User),
    Context(Context),
    Membership(Membership),
    Profile(Profile),
    Link(ProfileContext),
    Grant(ConsentGrant),
    Audit(AuditLog),
    Key(UniqueKey),
}

/// Empty payload for guard writes.
#[derive(Debug, Serialize, Deserialize)]
struct Untouched {}

/// Server-side existence condition on a document write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Guard {
    None,
    Create,
    Exists,
}

impl From<Precondition> for Guard {
    fn from(precondition: Precondition) -> Self {
        match precondition {
            Precondition::None => Guard::None,
            Precondition::Absent => Guard::Create,
            Precondition::Exists | Precondition::Version(_) => Guard::Exists,
        }
    }
}

impl Guard {
    fn precondition(self) -> Option<FirestoreWritePrecondition> {
        match self {
            Guard::None => None,
            Guard::Create => Some(FirestoreWritePrecondition::Exists(false)),
            Guard::Exists => Some(FirestoreWritePrecondition::Exists(true)),
        }
    }
}

enum Write {
    Put {
        collection: &'static str,
        doc_id: String,
        doc: Doc,
        guard: Guard,
    },
    /// Changes no field; fails the transaction unless the document exists.
    Touch {
        collection: &'static str,
        doc_id: String,
    },
    Delete {
        collection: &'static str,
        doc_id: String,
    },
}

fn membership_doc_id(context_id: ContextId, user_id: UserId) -> String {
    format!("{}_{}", context_id, user_id)
}

fn link_doc_id(profile_id: ProfileId, context_id: ContextId) -> String {
    format!("{}_{}", profile_id, context_id)
}

fn name_key(name: &str) -> String {
    urlencoding::encode(name).into_owned()
}

fn email_key(email: &str) -> String {
    urlencoding::encode(&email.to_ascii_lowercase()).into_owned()
}

fn db_err(e: impl std::fmt::Display) -> AppError {
    AppError::Database(e.to_string())
}

/// Server-side precondition failures surface as `Conflict`.
fn commit_err(e: FirestoreError) -> AppError {
    match &e {
        FirestoreError::DataConflictError(_) => {
            AppError::Conflict("Record was modified concurrently".to_string())
        }
        FirestoreError::DatabaseError(err)
            if err.public.code == "FailedPrecondition" || err.public.code == "AlreadyExists" =>
        {
            AppError::Conflict("Record was modified concurrently".to_string())
        }
        _ => AppError::Database(format!("Transaction commit failed: {}", e)),
    }
}

fn page_bound(value: usize, what: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| AppError::Validation(format!("{} is out of range", what)))
}

/// Firestore database client.
#[derive(Clone)]
pub struct FirestoreStore {
    client: Option<firestore::FirestoreDb>,
    ids: Arc<IdGenerator>,
}

impl FirestoreStore {
    /// Create a new Firestore client.
    ///
    /// For local development with emulator, set FIRESTORE_EMULATOR_HOST.
    pub async fn new(project_id: &str) -> Result<Self> {
        if std::env::var("FIRESTORE_EMULATOR_HOST").is_ok() {
            return Self::create_emulator_client(project_id).await;
        }

        let client = firestore::FirestoreDb::new(project_id)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to Firestore: {}", e)))?;

        let ids = Arc::new(IdGenerator::new());
        tracing::info!(
            project = project_id,
            id_node = ids.node(),
            "Connected to Firestore"
        );

        Ok(Self {
            client: Some(client),
            ids,
        })
    }

    /// Create a Firestore client for the emulator with unauthenticated access.
    async fn create_emulator_client(project_id: &str) -> Result<Self> {
        tracing::info!("Using unauthenticated connection for Firestore Emulator");

        let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
            Ok(gcloud_sdk::Token {
                token_type: "Bearer".to_string(),
                token: gcloud_sdk::SecretValue::new(
                    "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJ0ZXN0In0."
                        .to_string()
                        .into(),
                ),
                expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        });

        let options = firestore::FirestoreDbOptions::new(project_id.to_string());

        let client = firestore::FirestoreDb::with_options_token_source(
            options,
            gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
            gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
        )
        .await
        .map_err(|e| {
            AppError::Database(format!("Failed to connect to Firestore Emulator: {}", e))
        })?;

        tracing::info!(
            project = project_id,
            "Connected to Firestore (Emulator/Unauthenticated)"
        );

        Ok(Self {
            client: Some(client),
            ids: Arc::new(IdGenerator::new()),
        })
    }

    /// Draw ids from a fixed node instead of a random one.
    pub fn with_id_node(mut self, node: u8) -> Self {
        self.ids = Arc::new(IdGenerator::with_node(node));
        self
    }

    fn get_client(&self) -> Result<&firestore::FirestoreDb> {
        self.client
            .as_ref()
            .ok_or_else(|| AppError::Database("Database not connected (offline mode)".to_string()))
    }

    // ─── Read Helpers ────────────────────────────────────────────

    async fn get_doc<T>(&self, collection: &str, doc_id: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collection)
            .obj()
            .one(doc_id)
            .await
            .map_err(db_err)
    }

    async fn query_eq<T>(&self, collection: &str, field: &'static str, value: u64) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Send,
    {
        self.get_client()?
            .fluent()
            .select()
            .from(collection)
            .filter(move |q| q.for_all([q.field(field).eq(value)]))
            .obj()
            .query()
            .await
            .map_err(db_err)
    }

    async fn page<T>(&self, collection: &str, skip: usize, take: usize) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Send,
    {
        self.get_client()?
            .fluent()
            .select()
            .from(collection)
            .order_by([("id", FirestoreQueryDirection::Ascending)])
            .offset(page_bound(skip, "skip")?)
            .limit(page_bound(take, "take")?)
            .obj()
            .query()
            .await
            .map_err(db_err)
    }

    /// Claim `key` in a uniqueness collection for `owner_id`.
    async fn claim_key(
        &self,
        collection: &'static str,
        key: String,
        owner_id: u64,
        what: &str,
        writes: &mut Vec<Write>,
    ) -> Result<()> {
        let existing: Option<UniqueKey> = self.get_doc(collection, &key).await?;
        match existing {
            Some(existing) if existing.owner_id == owner_id => {}
            Some(_) => return Err(AppError::Conflict(format!("{} is already taken", what))),
            None => writes.push(Write::Put {
                collection,
                doc_id: key,
                doc: Doc::Key(UniqueKey { owner_id }),
                guard: Guard::Create,
            }),
        }
        Ok(())
    }

    // ─── Commit ──────────────────────────────────────────────────

    /// Validate one mutation against current state and translate it into
    /// document writes.
    async fn plan(&self, mutation: Mutation, writes: &mut Vec<Write>) -> Result<()> {
        match mutation {
            Mutation::PutUser { user, precondition } => {
                let current: Option<User> =
                    self.get_doc(collections::USERS, &user.id.to_string()).await?;
                check_precondition(precondition, current.as_ref().map(|u| u.version), "user")?;
                if let Some(old) =
                    current.filter(|old| !old.email.eq_ignore_ascii_case(&user.email))
                {
                    writes.push(Write::Delete {
                        collection: collections::USER_EMAILS,
                        doc_id: email_key(&old.email),
                    });
                }
                self.claim_key(
                    collections::USER_EMAILS,
                    email_key(&user.email),
                    user.id,
                    "Email",
                    writes,
                )
                .await?;
                writes.push(Write::Put {
                    collection: collections::USERS,
                    doc_id: user.id.to_string(),
                    doc: Doc::User(user),
                    guard: precondition.into(),
                });
            }
            Mutation::PutContext {
                context,
                precondition,
            } => {
                let current: Option<Context> = self
                    .get_doc(collections::CONTEXTS, &context.id.to_string())
                    .await?;
                check_precondition(
                    precondition,
                    current.as_ref().map(|c| c.version),
                    "context",
                )?;
                if let Some(old) = current.filter(|old| old.name != context.name) {
                    writes.push(Write::Delete {
                        collection: collections::CONTEXT_NAMES,
                        doc_id: name_key(&old.name),
                    });
                }
                self.claim_key(
                    collections::CONTEXT_NAMES,
                    name_key(&context.name),
                    context.id,
                    "Context name",
                    writes,
                )
                .await?;
                writes.push(Write::Put {
                    collection: collections::CONTEXTS,
                    doc_id: context.id.to_string(),
                    doc: Doc::Context(context),
                    guard: precondition.into(),
                });
            }
            Mutation::DeleteContext { context_id } => {
                if let Some(old) = self.get_context(context_id).await? {
                    writes.push(Write::Delete {
                        collection: collections::CONTEXT_NAMES,
                        doc_id: name_key(&old.name),
                    });
                }
                // Rows that appeared after the caller listed them.
                for m in self.list_context_members(context_id).await? {
                    push_delete(
                        writes,
                        collections::MEMBERSHIPS,
                        membership_doc_id(context_id, m.user_id),
                    );
                }
                for link in self.list_context_links(context_id).await? {
                    push_delete(
                        writes,
                        collections::PROFILE_CONTEXTS,
                        link_doc_id(link.profile_id, context_id),
                    );
                }
                writes.push(Write::Delete {
                    collection: collections::CONTEXTS,
                    doc_id: context_id.to_string(),
                });
            }
            Mutation::CheckContext {
                context_id,
                version,
            } => {
                let current = self.get_context(context_id).await?;
                check_precondition(
                    Precondition::Version(version),
                    current.map(|c| c.version),
                    "context",
                )?;
                writes.push(Write::Touch {
                    collection: collections::CONTEXTS,
                    doc_id: context_id.to_string(),
                });
            }
            Mutation::PutMembership {
                membership,
                precondition,
            } => {
                let current = self
                    .get_membership(membership.context_id, membership.user_id)
                    .await?;
                check_precondition(
                    precondition,
                    current.map(|m| m.version),
                    "membership",
                )?;
                writes.push(Write::Put {
                    collection: collections::MEMBERSHIPS,
                    doc_id: membership_doc_id(membership.context_id, membership.user_id),
                    doc: Doc::Membership(membership),
                    guard: precondition.into(),
                });
            }
            Mutation::DeleteMembership {
                context_id,
                user_id,
                precondition,
            } => {
                if precondition != Precondition::None {
                    let current = self.get_membership(context_id, user_id).await?;
                    check_precondition(
                        precondition,
                        current.map(|m| m.version),
                        "membership",
                    )?;
                }
                writes.push(Write::Delete {
                    collection: collections::MEMBERSHIPS,
                    doc_id: membership_doc_id(context_id, user_id),
                });
            }
            Mutation::CheckMembership {
                context_id,
                user_id,
                version,
            } => {
                let current = self.get_membership(context_id, user_id).await?;
                check_precondition(
                    Precondition::Version(version),
                    current.map(|m| m.version),
                    "membership",
                )?;
                writes.push(Write::Touch {
                    collection: collections::MEMBERSHIPS,
                    doc_id: membership_doc_id(context_id, user_id),
                });
            }
            Mutation::PutProfile {
                profile,
                precondition,
            } => {
                let current = self.get_profile(profile.id).await?;
                check_precondition(
                    precondition,
                    current.map(|p| p.version),
                    "profile",
                )?;
                let siblings = self.list_user_profiles(profile.user_id).await?;
                if siblings
                    .iter()
                    .any(|p| p.id != profile.id && p.name == profile.name)
                {
                    return Err(AppError::Conflict(format!(
                        "Profile name '{}' is already used",
                        profile.name
                    )));
                }
                writes.push(Write::Put {
                    collection: collections::PROFILES,
                    doc_id: profile.id.to_string(),
                    doc: Doc::Profile(profile),
                    guard: precondition.into(),
                });
            }
            Mutation::DeleteProfile { profile_id } => writes.push(Write::Delete {
                collection: collections::PROFILES,
                doc_id: profile_id.to_string(),
            }),
            Mutation::PutProfileContext { link } => writes.push(Write::Put {
                collection: collections::PROFILE_CONTEXTS,
                doc_id: link_doc_id(link.profile_id, link.context_id),
                doc: Doc::Link(link),
                guard: Guard::None,
            }),
            Mutation::DeleteProfileContext {
                profile_id,
                context_id,
            } => writes.push(Write::Delete {
                collection: collections::PROFILE_CONTEXTS,
                doc_id: link_doc_id(profile_id, context_id),
            }),
            Mutation::PutGrant {
                grant,
                precondition,
            } => {
                let current = self.get_grant(grant.id).await?;
                check_precondition(
                    precondition,
                    current.map(|g| g.version),
                    "consent grant",
                )?;
                writes.push(Write::Put {
                    collection: collections::CONSENT_GRANTS,
                    doc_id: grant.id.to_string(),
                    doc: Doc::Grant(grant),
                    guard: precondition.into(),
                });
            }
            // Audit records are append-only.
            Mutation::AppendAudit(entry) => writes.push(Write::Put {
                collection: collections::AUDIT_LOGS,
                doc_id: entry.id.to_string(),
                doc: Doc::Audit(entry),
                guard: Guard::Create,
            }),
        }
        Ok(())
    }

    /// Write all documents in one transaction.
    ///
    /// Batches beyond Firestore's transaction limit are split into
    /// sequential transactions; the audit record is planned last, so it
    /// lands in the final chunk.
    async fn write_all(&self, writes: Vec<Write>) -> Result<()> {
        let client = self.get_client()?;

        if writes.len() > BATCH_SIZE {
            tracing::warn!(
                writes = writes.len(),
                "Write batch exceeds transaction limit, committing in chunks"
            );
        }

        for chunk in writes.chunks(BATCH_SIZE) {
            let mut transaction = client
                .begin_transaction()
                .await
                .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

            for write in chunk {
                match write {
                    Write::Put {
                        collection,
                        doc_id,
                        doc,
                        guard,
                    } => {
                        let tx = &mut transaction;
                        let guard = *guard;
                        match doc {
                            Doc::User(v) => put(client, tx, collection, doc_id, v, guard)?,
                            Doc::Context(v) => put(client, tx, collection, doc_id, v, guard)?,
                            Doc::Membership(v) => put(client, tx, collection, doc_id, v, guard)?,
                            Doc::Profile(v) => put(client, tx, collection, doc_id, v, guard)?,
                            Doc::Link(v) => put(client, tx, collection, doc_id, v, guard)?,
                            Doc::Grant(v) => put(client, tx, collection, doc_id, v, guard)?,
                            Doc::Audit(v) => put(client, tx, collection, doc_id, v, guard)?,
                            Doc::Key(v) => put(client, tx, collection, doc_id, v, guard)?,
                        }
                    }
                    Write::Touch { collection, doc_id } => {
                        client
                            .fluent()
                            .update()
                            .fields(std::iter::empty::<&str>())
                            .in_col(collection)
                            .precondition(FirestoreWritePrecondition::Exists(true))
                            .document_id(doc_id)
                            .object(&Untouched {})
                            .add_to_transaction(&mut transaction)
                            .map_err(|e| {
                                AppError::Database(format!(
                                    "Failed to add {} guard to transaction: {}",
                                    collection, e
                                ))
                            })?;
                    }
                    Write::Delete { collection, doc_id } => {
                        client
                            .fluent()
                            .delete()
                            .from(*collection)
                            .document_id(doc_id)
                            .add_to_transaction(&mut transaction)
                            .map_err(|e| {
                                AppError::Database(format!(
                                    "Failed to add deletion to transaction for {}: {}",
                                    collection, e
                                ))
                            })?;
                    }
                }
            }

            transaction.commit().await.map_err(commit_err)?;
        }

        Ok(())
    }
}

/// Queue a delete unless the same document is already being deleted.
fn push_delete(writes: &mut Vec<Write>, collection: &'static str, doc_id: String) {
    let queued = writes.iter().any(|w| {
        matches!(w, Write::Delete { collection: c, doc_id: d } if *c == collection && *d == doc_id)
    });
    if !queued {
        writes.push(Write::Delete { collection, doc_id });
    }
}

fn put<T>(
    client: &firestore::FirestoreDb,
    transaction: &mut firestore::FirestoreTransaction<'_>,
    collection: &str,
    doc_id: &str,
    object: &T,
    guard: Guard,
) -> Result<()>
where
    T: Serialize + DeserializeOwned + Sync + Send,
{
    let mut builder = client.fluent().update().in_col(collection);
    if let Some(precondition) = guard.precondition() {
        builder = builder.precondition(precondition);
    }
    builder
        .document_id(doc_id)
        .object(object)
        .add_to_transaction(transaction)
        .map_err(|e| {
            AppError::Database(format!(
                "Failed to add {} write to transaction: {}",
                collection, e
            ))
        })?;
    Ok(())
}

#[async_trait]
impl IdentityStore for FirestoreStore {
    async fn next_id(&self, _kind: IdKind) -> Result<u64> {
        Ok(self.ids.next())
    }

    // ─── User Operations ─────────────────────────────────────────

    async fn get_user(&self, user_id: UserId) -> Result<Option<User>> {
        self.get_doc(collections::USERS, &user_id.to_string()).await
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let key: Option<UniqueKey> = self
            .get_doc(collections::USER_EMAILS, &email_key(email))
            .await?;
        match key {
            Some(key) => self.get_user(key.owner_id).await,
            None => Ok(None),
        }
    }

    async fn list_users(&self, skip: usize, take: usize) -> Result<Vec<User>> {
        self.page(collections::USERS, skip, take).await
    }

    // ─── Context Operations ──────────────────────────────────────

    async fn get_context(&self, context_id: ContextId) -> Result<Option<Context>> {
        self.get_doc(collections::CONTEXTS, &context_id.to_string())
            .await
    }

    async fn list_contexts(&self, skip: usize, take: usize) -> Result<Vec<Context>> {
        self.page(collections::CONTEXTS, skip, take).await
    }

    async fn get_membership(
        &self,
        context_id: ContextId,
        user_id: UserId,
    ) -> Result<Option<Membership>> {
        self.get_doc(
            collections::MEMBERSHIPS,
            &membership_doc_id(context_id, user_id),
        )
        .await
    }

    async fn list_context_members(&self, context_id: ContextId) -> Result<Vec<Membership>> {
        let mut members: Vec<Membership> = self
            .query_eq(collections::MEMBERSHIPS, "contextId", context_id)
            .await?;
        members.sort_by_key(|m| (m.joined_at, m.user_id));
        Ok(members)
    }

    async fn list_user_memberships(&self, user_id: UserId) -> Result<Vec<Membership>> {
        self.query_eq(collections::MEMBERSHIPS, "userId", user_id)
            .await
    }

    // ─── Profile Operations ──────────────────────────────────────

    async fn get_profile(&self, profile_id: ProfileId) -> Result<Option<Profile>> {
        self.get_doc(collections::PROFILES, &profile_id.to_string())
            .await
    }

    async fn list_user_profiles(&self, user_id: UserId) -> Result<Vec<Profile>> {
        let mut profiles: Vec<Profile> = self
            .query_eq(collections::PROFILES, "userId", user_id)
            .await?;
        profiles.sort_by_key(|p| p.id);
        Ok(profiles)
    }

    async fn list_profile_links(&self, profile_id: ProfileId) -> Result<Vec<ProfileContext>> {
        self.query_eq(collections::PROFILE_CONTEXTS, "profileId", profile_id)
            .await
    }

    async fn list_context_links(&self, context_id: ContextId) -> Result<Vec<ProfileContext>> {
        self.query_eq(collections::PROFILE_CONTEXTS, "contextId", context_id)
            .await
    }

    // ─── Consent Grant Operations ────────────────────────────────

    async fn get_grant(&self, grant_id: GrantId) -> Result<Option<ConsentGrant>> {
        self.get_doc(collections::CONSENT_GRANTS, &grant_id.to_string())
            .await
    }

    async fn list_user_grants(&self, user_id: UserId) -> Result<Vec<ConsentGrant>> {
        self.query_eq(collections::CONSENT_GRANTS, "userId", user_id)
            .await
    }

    async fn list_profile_grants(&self, profile_id: ProfileId) -> Result<Vec<ConsentGrant>> {
        self.query_eq(collections::CONSENT_GRANTS, "profileId", profile_id)
            .await
    }

    // ─── Audit Operations ────────────────────────────────────────

    async fn list_audit(&self, user_id: Option<UserId>, limit: usize) -> Result<Vec<AuditLog>> {
        let query = self
            .get_client()?
            .fluent()
            .select()
            .from(collections::AUDIT_LOGS);

        let query = if let Some(user_id) = user_id {
            query.filter(move |q| q.for_all([q.field("userId").eq(user_id)]))
        } else {
            query
        };

        // Ids are time-ordered, so id order is creation order.
        query
            .order_by([("id", FirestoreQueryDirection::Descending)])
            .limit(limit as u32)
            .obj()
            .query()
            .await
            .map_err(db_err)
    }

    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        let mut writes = Vec::with_capacity(batch.len());
        for mutation in batch.into_mutations() {
            self.plan(mutation, &mut writes).await?;
        }
        self.write_all(writes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_bound_rejects_values_past_u32() {
        assert_eq!(page_bound(25, "take").unwrap(), 25);
        assert_eq!(page_bound(u32::MAX as usize, "skip").unwrap(), u32::MAX);
        let too_far = u32::MAX as usize + 1;
        assert!(matches!(
            page_bound(too_far, "skip"),
            Err(AppError::Validation(msg)) if msg.contains("skip")
        ));
    }

    #[test]
    fn test_creates_are_guarded_server_side() {
        assert_eq!(Guard::from(Precondition::Absent), Guard::Create);
        assert_eq!(Guard::from(Precondition::Version(3)), Guard::Exists);
        assert_eq!(Guard::from(Precondition::None), Guard::None);
        assert!(matches!(
            Guard::Create.precondition(),
            Some(FirestoreWritePrecondition::Exists(false))
        ));
        assert!(Guard::None.precondition().is_none());
    }
}
