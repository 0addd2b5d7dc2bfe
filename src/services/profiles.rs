// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Profile management for the owning user.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use validator::Validate;

use crate::db::{IdKind, IdentityStore, Mutation, Precondition, WriteBatch};
use crate::error::{AppError, Result};
use crate::models::{
    AuditAction, ConsentGrant, ContextId, Profile, ProfileAttributes, ProfileContext, ProfileId,
    UserId, Visibility,
};
use crate::services::audit::{AuditEntry, AuditService};

/// Fields for a new profile.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewProfile {
    #[validate(length(min = 1, max = 100, message = "Profile name cannot be empty"))]
    pub name: String,
    pub label: Option<String>,
    pub display_name: Option<String>,
    /// Defaults to `private`
    pub visibility: Option<Visibility>,
    #[serde(default)]
    pub attributes: ProfileAttributes,
    /// Contexts to link immediately, with the profile's visibility
    #[serde(default)]
    pub context_ids: Vec<ContextId>,
}

/// Per-context override in a profile update.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextChange {
    pub context_id: ContextId,
    pub display_name: Option<String>,
    pub visibility: Option<Visibility>,
}

/// Partial profile update. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    #[validate(length(min = 1, max = 100, message = "Profile name cannot be empty"))]
    pub name: Option<String>,
    pub label: Option<String>,
    pub display_name: Option<String>,
    pub visibility: Option<Visibility>,
    pub gender: Option<String>,
    pub sexuality: Option<String>,
    pub relationship_status: Option<String>,
    pub profile_picture: Option<String>,
    pub context: Option<String>,
    /// When present, replaces every context link of the profile
    pub context_changes: Option<Vec<ContextChange>>,
}

/// Profile with all its context links.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileDetail {
    #[serde(flatten)]
    pub profile: Profile,
    pub contexts: Vec<ProfileContext>,
}

#[derive(Clone)]
pub struct ProfileService {
    store: Arc<dyn IdentityStore>,
    audit: AuditService,
}

impl ProfileService {
    pub fn new(store: Arc<dyn IdentityStore>, audit: AuditService) -> Self {
        Self { store, audit }
    }

    async fn owned(&self, user_id: UserId, profile_id: ProfileId) -> Result<Profile> {
        self.store
            .get_profile(profile_id)
            .await?
            .filter(|p| p.user_id == user_id)
            .ok_or_else(|| AppError::NotFound(format!("Profile {} not found", profile_id)))
    }

    /// Guards that keep each context alive until the batch commits.
    async fn context_guards(&self, ids: &[ContextId]) -> Result<Vec<Mutation>> {
        let mut guards = Vec::with_capacity(ids.len());
        for &context_id in ids {
            let context = self
                .store
                .get_context(context_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("Context {} not found", context_id)))?;
            guards.push(Mutation::CheckContext {
                context_id,
                version: context.version,
            });
        }
        Ok(guards)
    }

    /// Commit a batch that links contexts. A conflict caused by one of them
    /// disappearing is reported as `NotFound`.
    async fn commit_linked(&self, batch: WriteBatch, ids: &[ContextId]) -> Result<()> {
        match self.store.commit(batch).await {
            Err(AppError::Conflict(msg)) => {
                self.context_guards(ids).await?;
                Err(AppError::Conflict(msg))
            }
            other => other,
        }
    }

    pub async fn get_profile(
        &self,
        user_id: UserId,
        profile_id: ProfileId,
    ) -> Result<ProfileDetail> {
        let profile = self.owned(user_id, profile_id).await?;
        let contexts = self.store.list_profile_links(profile_id).await?;
        Ok(ProfileDetail { profile, contexts })
    }

    pub async fn create_profile(&self, user_id: UserId, new: NewProfile) -> Result<ProfileDetail> {
        let name = new.name.trim().to_string();
        if name.is_empty() {
            return Err(AppError::Validation("Profile name cannot be empty".to_string()));
        }
        let context_ids: Vec<ContextId> = new
            .context_ids
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let guards = self.context_guards(&context_ids).await?;

        let profile = Profile {
            id: self.store.next_id(IdKind::Profile).await?,
            user_id,
            name,
            label: new.label,
            display_name: new.display_name,
            visibility: new.visibility.unwrap_or_default(),
            attributes: new.attributes,
            created_at: Utc::now(),
            version: 1,
        };
        let contexts: Vec<ProfileContext> = context_ids
            .iter()
            .map(|&context_id| ProfileContext {
                profile_id: profile.id,
                context_id,
                display_name: None,
                visibility: profile.visibility,
            })
            .collect();

        let mut batch = WriteBatch::new();
        batch.push(Mutation::PutProfile {
            profile: profile.clone(),
            precondition: Precondition::Absent,
        });
        for guard in guards {
            batch.push(guard);
        }
        for link in &contexts {
            batch.push(Mutation::PutProfileContext { link: link.clone() });
        }
        let detail = ProfileDetail { profile, contexts };
        let entry = AuditEntry::new(
            AuditAction::ProfileCreate,
            format!(
                "Created profile '{}'",
                detail.profile.label.as_deref().unwrap_or(&detail.profile.name)
            ),
        )
        .actor(user_id)
        .profile(detail.profile.id)
        .after(&detail)?;
        self.audit.record(&mut batch, entry).await?;
        self.commit_linked(batch, &context_ids).await?;

        tracing::info!(user_id, profile_id = detail.profile.id, "Profile created");
        Ok(detail)
    }

    pub async fn update_profile(
        &self,
        user_id: UserId,
        profile_id: ProfileId,
        update: ProfileUpdate,
    ) -> Result<ProfileDetail> {
        let before = self.get_profile(user_id, profile_id).await?;

        let mut profile = before.profile.clone();
        if let Some(name) = update.name {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(AppError::Validation("Profile name cannot be empty".to_string()));
            }
            profile.name = name;
        }
        if update.label.is_some() {
            profile.label = update.label;
        }
        if update.display_name.is_some() {
            profile.display_name = update.display_name;
        }
        if let Some(visibility) = update.visibility {
            profile.visibility = visibility;
        }
        let attrs = &mut profile.attributes;
        for (slot, value) in [
            (&mut attrs.gender, update.gender),
            (&mut attrs.sexuality, update.sexuality),
            (&mut attrs.relationship_status, update.relationship_status),
            (&mut attrs.profile_picture, update.profile_picture),
            (&mut attrs.context, update.context),
        ] {
            if value.is_some() {
                *slot = value;
            }
        }
        profile.version = before.profile.version + 1;

        let mut batch = WriteBatch::new();
        batch.push(Mutation::PutProfile {
            profile: profile.clone(),
            precondition: Precondition::Version(before.profile.version),
        });

        let mut linked: Vec<ContextId> = Vec::new();
        let contexts = match update.context_changes {
            Some(changes) => {
                linked = changes.iter().map(|c| c.context_id).collect();
                linked.sort_unstable();
                linked.dedup();
                for guard in self.context_guards(&linked).await? {
                    batch.push(guard);
                }
                // Later entries for the same context win.
                let mut links: Vec<ProfileContext> = Vec::with_capacity(changes.len());
                for change in changes {
                    links.retain(|l| l.context_id != change.context_id);
                    links.push(ProfileContext {
                        profile_id,
                        context_id: change.context_id,
                        display_name: change
                            .display_name
                            .or_else(|| profile.display_name.clone()),
                        visibility: change.visibility.unwrap_or(profile.visibility),
                    });
                }
                links.sort_by_key(|l| l.context_id);

                for old in &before.contexts {
                    if !links.iter().any(|l| l.context_id == old.context_id) {
                        batch.push(Mutation::DeleteProfileContext {
                            profile_id,
                            context_id: old.context_id,
                        });
                    }
                }
                for link in &links {
                    batch.push(Mutation::PutProfileContext { link: link.clone() });
                }
                links
            }
            None => before.contexts.clone(),
        };

        let after = ProfileDetail { profile, contexts };
        let entry = AuditEntry::new(
            AuditAction::ProfileUpdate,
            format!(
                "Edited profile: {}",
                after.profile.label.as_deref().unwrap_or(&after.profile.name)
            ),
        )
        .actor(user_id)
        .profile(profile_id)
        .before(&before)?
        .after(&after)?;
        self.audit.record(&mut batch, entry).await?;
        self.commit_linked(batch, &linked).await?;

        tracing::info!(user_id, profile_id, "Profile updated");
        Ok(after)
    }

    /// Delete a profile and its context links. Grants for the profile are
    /// revoked, not deleted.
    pub async fn delete_profile(&self, user_id: UserId, profile_id: ProfileId) -> Result<()> {
        let before = self.get_profile(user_id, profile_id).await?;
        let grants = self.store.list_profile_grants(profile_id).await?;

        let mut batch = WriteBatch::new();
        let mut revoked = 0usize;
        for grant in grants.into_iter().filter(|g| !g.revoked) {
            let version = grant.version;
            batch.push(Mutation::PutGrant {
                grant: ConsentGrant {
                    revoked: true,
                    version: version + 1,
                    ..grant
                },
                precondition: Precondition::Version(version),
            });
            revoked += 1;
        }
        for link in &before.contexts {
            batch.push(Mutation::DeleteProfileContext {
                profile_id,
                context_id: link.context_id,
            });
        }
        batch.push(Mutation::DeleteProfile { profile_id });
        let entry = AuditEntry::new(
            AuditAction::ProfileDelete,
            format!("Deleted profile ID {}", profile_id),
        )
        .actor(user_id)
        .profile(profile_id)
        .before(&before)?;
        self.audit.record(&mut batch, entry).await?;
        self.store.commit(batch).await?;

        tracing::info!(user_id, profile_id, revoked_grants = revoked, "Profile deleted");
        Ok(())
    }
}
