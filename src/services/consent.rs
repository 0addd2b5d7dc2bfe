// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Consent authority: time-boxed, attribute-scoped grants for one
//! profile, handed to relying parties as signed tokens.
//!
//! A grant is `active` until revoked; expiry is computed from
//! `expires_at` and never stored. Revoking a grant does not invalidate a
//! token that a relying party verifies offline. Only [`ConsentService::introspect`]
//! reflects revocation.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::db::{IdKind, IdentityStore, Mutation, Precondition, WriteBatch};
use crate::error::{AppError, Result};
use crate::models::profile::is_shareable_attribute;
use crate::models::{
    consent_ttl, AuditAction, ConsentClaims, ConsentGrant, GrantId, Profile, ProfileAttributes,
    ProfileId, UserId, Visibility,
};
use crate::services::audit::{AuditEntry, AuditService};
use crate::services::signer::ConsentSigner;

/// Result of a successful grant issuance.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedGrant {
    pub token: String,
    pub grant_id: GrantId,
    pub expires_at: DateTime<Utc>,
}

/// A profile as offered on the consent screen.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SharableIdentity {
    pub id: ProfileId,
    pub name: String,
    pub label: Option<String>,
    pub display_name: Option<String>,
    pub visibility: Visibility,
    #[serde(flatten)]
    pub attributes: ProfileAttributes,
}

impl From<Profile> for SharableIdentity {
    fn from(p: Profile) -> Self {
        Self {
            id: p.id,
            name: p.name,
            label: p.label,
            display_name: p.display_name,
            visibility: p.visibility,
            attributes: p.attributes,
        }
    }
}

/// A grant joined with its profile, which may since have been deleted.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantWithProfile {
    #[serde(flatten)]
    pub grant: ConsentGrant,
    pub expired: bool,
    pub profile: Option<Profile>,
}

/// Token status for relying parties checking out-of-band.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Introspection {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claims: Option<ConsentClaims>,
}

impl Introspection {
    fn inactive() -> Self {
        Self {
            active: false,
            claims: None,
        }
    }
}

/// Request to issue a grant.
#[derive(Debug, Clone, Default)]
pub struct GrantRequest {
    pub profile_id: ProfileId,
    pub client_id: String,
    pub scope: String,
    pub attributes: Vec<String>,
}

#[derive(Clone)]
pub struct ConsentService {
    store: Arc<dyn IdentityStore>,
    audit: AuditService,
    signer: ConsentSigner,
}

impl ConsentService {
    pub fn new(store: Arc<dyn IdentityStore>, audit: AuditService, signer: ConsentSigner) -> Self {
        Self {
            store,
            audit,
            signer,
        }
    }

    /// Profile owned by `user_id`; absent and foreign look the same.
    async fn owned_profile(&self, user_id: UserId, profile_id: ProfileId) -> Result<Profile> {
        self.store
            .get_profile(profile_id)
            .await?
            .filter(|p| p.user_id == user_id)
            .ok_or_else(|| {
                AppError::NotFound("Profile not found or does not belong to user".to_string())
            })
    }

    /// Issue a grant and its signed token. Both expire five minutes after
    /// issuance.
    pub async fn create_consent_grant(
        &self,
        user_id: UserId,
        request: GrantRequest,
    ) -> Result<IssuedGrant> {
        let profile = self.owned_profile(user_id, request.profile_id).await?;

        let client_id = request.client_id.trim();
        if client_id.is_empty() {
            return Err(AppError::Validation("clientId is required".to_string()));
        }
        if profile.visibility == Visibility::NotSharable {
            return Err(AppError::Validation(
                "Profile is not sharable".to_string(),
            ));
        }
        let mut attrs: Vec<String> = Vec::with_capacity(request.attributes.len());
        for attr in request.attributes {
            if !is_shareable_attribute(&attr) {
                return Err(AppError::Validation(format!(
                    "Unknown attribute '{}'",
                    attr
                )));
            }
            if !attrs.contains(&attr) {
                attrs.push(attr);
            }
        }

        let grant_id = self.store.next_id(IdKind::Grant).await?;
        let issued_at = Utc::now();
        let expires_at = issued_at + consent_ttl();
        let claims = ConsentClaims {
            sub: user_id,
            profile_id: profile.id,
            attrs: attrs.clone(),
            client_id: client_id.to_string(),
            scope: request.scope.clone(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
            jti: grant_id.to_string(),
        };
        let token = self.signer.sign(&claims)?;

        let grant = ConsentGrant {
            id: grant_id,
            user_id,
            profile_id: profile.id,
            client_id: client_id.to_string(),
            scope: request.scope,
            granted_attrs: attrs,
            issued_at,
            expires_at,
            revoked: false,
            token: token.clone(),
            version: 1,
        };

        let mut batch = WriteBatch::new();
        batch.push(Mutation::PutGrant {
            grant: grant.clone(),
            precondition: Precondition::Absent,
        });
        let snapshot = grant.clone().without_token();
        let entry = AuditEntry::new(
            AuditAction::ConsentGrant,
            format!("Granted '{}' access to profile {}", grant.client_id, profile.id),
        )
        .actor(user_id)
        .profile(profile.id)
        .target(format!("grantId:{}", grant_id))
        .after(&snapshot)?;
        self.audit.record(&mut batch, entry).await?;
        self.store.commit(batch).await?;

        tracing::info!(
            user_id,
            profile_id = profile.id,
            grant_id,
            client_id = %grant.client_id,
            "Consent grant issued"
        );
        Ok(IssuedGrant {
            token,
            grant_id,
            expires_at,
        })
    }

    /// The caller's profiles that may be offered to a relying party.
    pub async fn list_sharable_identities(&self, user_id: UserId) -> Result<Vec<SharableIdentity>> {
        Ok(self
            .store
            .list_user_profiles(user_id)
            .await?
            .into_iter()
            .filter(|p| p.visibility != Visibility::NotSharable)
            .map(SharableIdentity::from)
            .collect())
    }

    /// Every grant the user issued, revoked and expired ones included.
    pub async fn list_my_consent_grants(&self, user_id: UserId) -> Result<Vec<GrantWithProfile>> {
        let now = Utc::now();
        let grants = self.store.list_user_grants(user_id).await?;
        let mut out = Vec::with_capacity(grants.len());
        for grant in grants {
            let profile = self.store.get_profile(grant.profile_id).await?;
            out.push(GrantWithProfile {
                expired: grant.is_expired_at(now),
                grant: grant.without_token(),
                profile,
            });
        }
        Ok(out)
    }

    /// Mark a grant revoked. Revoking an already revoked grant re-confirms
    /// it without writing.
    pub async fn revoke_consent_grant(
        &self,
        grant_id: GrantId,
        user_id: UserId,
    ) -> Result<ConsentGrant> {
        let grant = self
            .store
            .get_grant(grant_id)
            .await?
            .filter(|g| g.user_id == user_id)
            .ok_or_else(|| AppError::NotFound("Cannot revoke".to_string()))?;
        if grant.revoked {
            return Ok(grant.without_token());
        }

        let revoked = ConsentGrant {
            revoked: true,
            version: grant.version + 1,
            ..grant.clone()
        };

        let mut batch = WriteBatch::new();
        batch.push(Mutation::PutGrant {
            grant: revoked.clone(),
            precondition: Precondition::Version(grant.version),
        });
        let entry = AuditEntry::new(
            AuditAction::ConsentRevoke,
            format!("Revoked consent grant {}", grant_id),
        )
        .actor(user_id)
        .profile(grant.profile_id)
        .target(format!("grantId:{}", grant_id));
        self.audit.record(&mut batch, entry).await?;

        match self.store.commit(batch).await {
            Ok(()) => {}
            // A concurrent revoke got there first.
            Err(AppError::Conflict(_)) => {
                if let Some(current) = self.store.get_grant(grant_id).await? {
                    if current.revoked {
                        return Ok(current.without_token());
                    }
                }
                return Err(AppError::Conflict(format!(
                    "Grant {} changed concurrently",
                    grant_id
                )));
            }
            Err(e) => return Err(e),
        }

        tracing::info!(user_id, grant_id, "Consent grant revoked");
        Ok(revoked.without_token())
    }

    /// Check a token's signature, expiry and grant record.
    pub async fn introspect(&self, token: &str) -> Result<Introspection> {
        let claims = match self.signer.verify(token) {
            Ok(claims) => claims,
            Err(AppError::InvalidToken) => return Ok(Introspection::inactive()),
            Err(e) => return Err(e),
        };
        let Ok(grant_id) = claims.jti.parse::<GrantId>() else {
            return Ok(Introspection::inactive());
        };

        let active = match self.store.get_grant(grant_id).await? {
            Some(grant) => {
                grant.is_active_at(Utc::now())
                    && grant.user_id == claims.sub
                    && grant.profile_id == claims.profile_id
            }
            None => false,
        };
        if !active {
            return Ok(Introspection::inactive());
        }
        Ok(Introspection {
            active,
            claims: Some(claims),
        })
    }
}
