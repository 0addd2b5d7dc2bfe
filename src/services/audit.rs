// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Audit recorder.
//!
//! Mutating services stage an [`AuditEntry`] into the same
//! [`WriteBatch`] as the change it describes, so the store commits both
//! together.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;

use crate::db::{IdKind, IdentityStore, Mutation, WriteBatch};
use crate::error::{AppError, Result};
use crate::models::{AuditAction, AuditLog, ContextId, ProfileId, UserId};

/// Maximum records returned by the operator view.
pub const AUDIT_LIST_LIMIT: usize = 500;
/// Maximum records returned by the self-service view.
pub const AUDIT_USER_LIMIT: usize = 200;

/// Audit record under construction.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    action: AuditAction,
    message: String,
    user_id: Option<UserId>,
    context_id: Option<ContextId>,
    profile_id: Option<ProfileId>,
    target: Option<String>,
    before: Option<serde_json::Value>,
    after: Option<serde_json::Value>,
}

impl AuditEntry {
    pub fn new(action: AuditAction, message: impl Into<String>) -> Self {
        Self {
            action,
            message: message.into(),
            user_id: None,
            context_id: None,
            profile_id: None,
            target: None,
            before: None,
            after: None,
        }
    }

    pub fn actor(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn context(mut self, context_id: ContextId) -> Self {
        self.context_id = Some(context_id);
        self
    }

    pub fn profile(mut self, profile_id: ProfileId) -> Self {
        self.profile_id = Some(profile_id);
        self
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn before<T: Serialize>(mut self, snapshot: &T) -> Result<Self> {
        self.before = Some(snapshot_value(snapshot)?);
        Ok(self)
    }

    pub fn after<T: Serialize>(mut self, snapshot: &T) -> Result<Self> {
        self.after = Some(snapshot_value(snapshot)?);
        Ok(self)
    }
}

fn snapshot_value<T: Serialize>(snapshot: &T) -> Result<serde_json::Value> {
    serde_json::to_value(snapshot)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("audit snapshot: {}", e)))
}

/// Appends and reads audit records.
#[derive(Clone)]
pub struct AuditService {
    store: Arc<dyn IdentityStore>,
}

impl AuditService {
    pub fn new(store: Arc<dyn IdentityStore>) -> Self {
        Self { store }
    }

    /// Stage `entry` into `batch`. Nothing is written until the batch commits.
    pub async fn record(&self, batch: &mut WriteBatch, entry: AuditEntry) -> Result<AuditLog> {
        let id = self.store.next_id(IdKind::Audit).await?;
        let log = AuditLog {
            id,
            created_at: Utc::now(),
            user_id: entry.user_id,
            context_id: entry.context_id,
            profile_id: entry.profile_id,
            action: entry.action,
            target: entry.target,
            before: entry.before,
            after: entry.after,
            message: entry.message,
        };
        batch.push(Mutation::AppendAudit(log.clone()));
        Ok(log)
    }

    /// Record an event that has no accompanying mutation (e.g. data export).
    pub async fn append(&self, entry: AuditEntry) -> Result<AuditLog> {
        let mut batch = WriteBatch::new();
        let log = self.record(&mut batch, entry).await?;
        self.store.commit(batch).await?;
        Ok(log)
    }

    /// Newest records across all users (operator view).
    pub async fn find_all(&self) -> Result<Vec<AuditLog>> {
        self.store.list_audit(None, AUDIT_LIST_LIMIT).await
    }

    /// Newest records where `user_id` was the actor.
    pub async fn find_by_user(&self, user_id: UserId) -> Result<Vec<AuditLog>> {
        self.store.list_audit(Some(user_id), AUDIT_USER_LIMIT).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;

    #[tokio::test]
    async fn test_record_is_staged_until_commit() {
        let store: Arc<dyn IdentityStore> = Arc::new(MemoryStore::new());
        let audit = AuditService::new(store.clone());

        let mut batch = WriteBatch::new();
        let entry = AuditEntry::new(AuditAction::ContextCreate, "Created context 'Work'")
            .actor(1)
            .context(9);
        audit.record(&mut batch, entry).await.unwrap();

        assert!(audit.find_all().await.unwrap().is_empty());

        store.commit(batch).await.unwrap();
        let logs = audit.find_all().await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].action, AuditAction::ContextCreate);
        assert_eq!(logs[0].context_id, Some(9));
    }

    #[tokio::test]
    async fn test_find_by_user_newest_first() {
        let store: Arc<dyn IdentityStore> = Arc::new(MemoryStore::new());
        let audit = AuditService::new(store);

        for i in 0..3 {
            audit
                .append(AuditEntry::new(AuditAction::GdprExport, format!("export {}", i)).actor(5))
                .await
                .unwrap();
        }
        audit
            .append(AuditEntry::new(AuditAction::GdprExport, "other").actor(6))
            .await
            .unwrap();

        let mine = audit.find_by_user(5).await.unwrap();
        assert_eq!(mine.len(), 3);
        assert_eq!(mine[0].message, "export 2");
        assert_eq!(mine[2].message, "export 0");
        assert_eq!(audit.find_all().await.unwrap().len(), 4);
    }

    #[test]
    fn test_entry_snapshots() {
        #[derive(Serialize)]
        struct Snap {
            role: &'static str,
        }

        let entry = AuditEntry::new(AuditAction::RoleChange, "m")
            .before(&Snap { role: "member" })
            .unwrap()
            .after(&Snap { role: "admin" })
            .unwrap();

        assert_eq!(entry.before.unwrap()["role"], "member");
        assert_eq!(entry.after.unwrap()["role"], "admin");
    }
}
