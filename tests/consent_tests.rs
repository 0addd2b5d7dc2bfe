// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Consent grant lifecycle: issuance, listing, revocation, introspection.

use persona_contexts::error::AppError;
use persona_contexts::models::{consent_ttl, AuditAction, ProfileId, UserId, Visibility};
use persona_contexts::services::{GrantRequest, NewProfile, ProfileUpdate};
use persona_contexts::AppState;

mod common;
use common::{audit_with, register, test_state};

async fn profile(state: &AppState, owner: UserId, visibility: Visibility) -> ProfileId {
    state
        .profiles
        .create_profile(
            owner,
            NewProfile {
                name: "Main".to_string(),
                display_name: Some("Sam".to_string()),
                visibility: Some(visibility),
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .profile
        .id
}

fn request(profile_id: ProfileId, attrs: &[&str]) -> GrantRequest {
    GrantRequest {
        profile_id,
        client_id: "app1".to_string(),
        scope: "profile".to_string(),
        attributes: attrs.iter().map(|a| a.to_string()).collect(),
    }
}

#[tokio::test]
async fn test_issue_then_revoke_scenario() {
    let state = test_state();
    let user = register(&state, "u@example.com").await;
    let p = profile(&state, user, Visibility::Public).await;

    let issued = state
        .consent
        .create_consent_grant(user, request(p, &["displayName", "gender"]))
        .await
        .unwrap();
    state
        .consent
        .revoke_consent_grant(issued.grant_id, user)
        .await
        .unwrap();

    let grants = state.consent.list_my_consent_grants(user).await.unwrap();
    assert_eq!(grants.len(), 1);
    assert!(grants[0].grant.revoked);
    assert_eq!(grants[0].grant.granted_attrs, vec!["displayName", "gender"]);
    assert_eq!(grants[0].grant.client_id, "app1");
    assert_eq!(grants[0].profile.as_ref().map(|p| p.id), Some(p));

    assert_eq!(audit_with(&state, AuditAction::ConsentGrant).await.len(), 1);
    assert_eq!(audit_with(&state, AuditAction::ConsentRevoke).await.len(), 1);
}

#[tokio::test]
async fn test_token_only_leaves_at_issuance() {
    let state = test_state();
    let user = register(&state, "u@example.com").await;
    let p = profile(&state, user, Visibility::Public).await;
    let issued = state
        .consent
        .create_consent_grant(user, request(p, &["displayName"]))
        .await
        .unwrap();
    assert!(!issued.token.is_empty());

    let listed = state.consent.list_my_consent_grants(user).await.unwrap();
    assert!(listed[0].grant.token.is_empty());

    let revoked = state
        .consent
        .revoke_consent_grant(issued.grant_id, user)
        .await
        .unwrap();
    assert!(revoked.token.is_empty());

    let export = state.users.export_user_data(user).await.unwrap();
    assert!(export.consent_grants.iter().all(|g| g.token.is_empty()));
}

#[tokio::test]
async fn test_grant_ttl_is_exactly_five_minutes() {
    let state = test_state();
    let user = register(&state, "u@example.com").await;
    let p = profile(&state, user, Visibility::Public).await;

    for _ in 0..3 {
        state
            .consent
            .create_consent_grant(user, request(p, &["displayName"]))
            .await
            .unwrap();
    }
    for g in state.consent.list_my_consent_grants(user).await.unwrap() {
        assert_eq!(g.grant.expires_at - g.grant.issued_at, consent_ttl());
        assert!(!g.expired);
    }
}

#[tokio::test]
async fn test_token_carries_claims() {
    let state = test_state();
    let user = register(&state, "u@example.com").await;
    let p = profile(&state, user, Visibility::Private).await;

    let issued = state
        .consent
        .create_consent_grant(user, request(p, &["gender", "gender", "context"]))
        .await
        .unwrap();

    let status = state.consent.introspect(&issued.token).await.unwrap();
    assert!(status.active);
    let claims = status.claims.unwrap();
    assert_eq!(claims.sub, user);
    assert_eq!(claims.profile_id, p);
    assert_eq!(claims.attrs, vec!["gender", "context"]);
    assert_eq!(claims.client_id, "app1");
    assert_eq!(claims.scope, "profile");
    assert_eq!(claims.exp - claims.iat, 300);
    assert_eq!(claims.jti, issued.grant_id.to_string());
    assert_eq!(claims.exp, issued.expires_at.timestamp());
}

#[tokio::test]
async fn test_revocation_is_idempotent_and_terminal() {
    let state = test_state();
    let user = register(&state, "u@example.com").await;
    let p = profile(&state, user, Visibility::Public).await;
    let issued = state
        .consent
        .create_consent_grant(user, request(p, &["displayName"]))
        .await
        .unwrap();

    let first = state
        .consent
        .revoke_consent_grant(issued.grant_id, user)
        .await
        .unwrap();
    let second = state
        .consent
        .revoke_consent_grant(issued.grant_id, user)
        .await
        .unwrap();
    assert!(first.revoked);
    assert!(second.revoked);
    assert_eq!(first.version, second.version);

    // The second call neither wrote nor audited.
    assert_eq!(audit_with(&state, AuditAction::ConsentRevoke).await.len(), 1);

    let status = state.consent.introspect(&issued.token).await.unwrap();
    assert!(!status.active);
    assert!(status.claims.is_none());
}

#[tokio::test]
async fn test_foreign_or_missing_records_are_not_found() {
    let state = test_state();
    let owner = register(&state, "owner@example.com").await;
    let other = register(&state, "other@example.com").await;
    let p = profile(&state, owner, Visibility::Public).await;

    assert!(matches!(
        state
            .consent
            .create_consent_grant(other, request(p, &["displayName"]))
            .await,
        Err(AppError::NotFound(_))
    ));
    assert!(matches!(
        state
            .consent
            .create_consent_grant(owner, request(9999, &["displayName"]))
            .await,
        Err(AppError::NotFound(_))
    ));

    let issued = state
        .consent
        .create_consent_grant(owner, request(p, &["displayName"]))
        .await
        .unwrap();
    assert!(matches!(
        state.consent.revoke_consent_grant(issued.grant_id, other).await,
        Err(AppError::NotFound(_))
    ));
    assert!(matches!(
        state.consent.revoke_consent_grant(9999, owner).await,
        Err(AppError::NotFound(_))
    ));
    assert!(state.consent.list_my_consent_grants(other).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_issuance_validation() {
    let state = test_state();
    let user = register(&state, "u@example.com").await;
    let p = profile(&state, user, Visibility::Public).await;

    let unknown = state
        .consent
        .create_consent_grant(user, request(p, &["displayName", "email"]))
        .await;
    assert!(matches!(unknown, Err(AppError::Validation(_))));

    let mut no_client = request(p, &["gender"]);
    no_client.client_id = "   ".to_string();
    assert!(matches!(
        state.consent.create_consent_grant(user, no_client).await,
        Err(AppError::Validation(_))
    ));

    // Nothing was persisted by the failed attempts.
    assert!(state.consent.list_my_consent_grants(user).await.unwrap().is_empty());
    assert!(audit_with(&state, AuditAction::ConsentGrant).await.is_empty());
}

#[tokio::test]
async fn test_not_sharable_profiles_are_excluded() {
    let state = test_state();
    let user = register(&state, "u@example.com").await;
    let p = profile(&state, user, Visibility::Public).await;

    assert_eq!(
        state.consent.list_sharable_identities(user).await.unwrap().len(),
        1
    );

    state
        .profiles
        .update_profile(
            user,
            p,
            ProfileUpdate {
                visibility: Some(Visibility::NotSharable),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert!(state
        .consent
        .list_sharable_identities(user)
        .await
        .unwrap()
        .is_empty());
    assert!(matches!(
        state
            .consent
            .create_consent_grant(user, request(p, &["displayName"]))
            .await,
        Err(AppError::Validation(_))
    ));
}

#[tokio::test]
async fn test_grants_outlive_deleted_profiles() {
    let state = test_state();
    let user = register(&state, "u@example.com").await;
    let p = profile(&state, user, Visibility::Public).await;
    let issued = state
        .consent
        .create_consent_grant(user, request(p, &["displayName"]))
        .await
        .unwrap();

    state.profiles.delete_profile(user, p).await.unwrap();

    let grants = state.consent.list_my_consent_grants(user).await.unwrap();
    assert_eq!(grants.len(), 1);
    assert!(grants[0].grant.revoked);
    assert!(grants[0].profile.is_none());
    assert!(!state.consent.introspect(&issued.token).await.unwrap().active);
}

#[tokio::test]
async fn test_introspect_rejects_garbage() {
    let state = test_state();
    let status = state.consent.introspect("not-a-token").await.unwrap();
    assert!(!status.active);
}
