// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Visibility resolution against stored profiles, contexts and members.

use persona_contexts::models::{ProfileId, UserId, Visibility};
use persona_contexts::services::profiles::ContextChange;
use persona_contexts::services::{NewProfile, ProfileUpdate};
use persona_contexts::AppState;

mod common;
use common::{register, test_state};

async fn profile(
    state: &AppState,
    owner: UserId,
    name: &str,
    visibility: Visibility,
) -> ProfileId {
    state
        .profiles
        .create_profile(
            owner,
            NewProfile {
                name: name.to_string(),
                display_name: Some(format!("{} default", name)),
                visibility: Some(visibility),
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .profile
        .id
}

async fn link(
    state: &AppState,
    owner: UserId,
    profile_id: ProfileId,
    context_id: u64,
    visibility: Visibility,
) {
    state
        .profiles
        .update_profile(
            owner,
            profile_id,
            ProfileUpdate {
                context_changes: Some(vec![ContextChange {
                    context_id,
                    display_name: Some("In context".to_string()),
                    visibility: Some(visibility),
                }]),
                ..Default::default()
            },
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_override_wins_only_with_context_filter() {
    let state = test_state();
    let owner = register(&state, "owner@example.com").await;
    let stranger = register(&state, "stranger@example.com").await;
    let ctx = state.membership.create_context("Club", owner).await.unwrap();

    let p1 = profile(&state, owner, "P1", Visibility::Private).await;
    link(&state, owner, p1, ctx.id, Visibility::Public).await;

    let scoped = state
        .visibility
        .resolve(stranger, owner, Some(ctx.id))
        .await
        .unwrap();
    assert_eq!(scoped.len(), 1);
    assert_eq!(scoped[0].id, p1);
    assert_eq!(scoped[0].visibility, Visibility::Public);
    assert_eq!(scoped[0].display_name.as_deref(), Some("In context"));
    assert_eq!(scoped[0].context.as_deref(), Some("Club"));

    let unscoped = state.visibility.resolve(stranger, owner, None).await.unwrap();
    assert!(unscoped.is_empty());
}

#[tokio::test]
async fn test_context_members_disclosure_requires_membership() {
    let state = test_state();
    let owner = register(&state, "owner@example.com").await;
    let a = register(&state, "a@example.com").await;
    let b = register(&state, "b@example.com").await;
    let z = register(&state, "z@example.com").await;
    let ctx = state.membership.create_context("Work", a).await.unwrap();
    state.membership.add_member(ctx.id, b, None).await.unwrap();

    let p = profile(&state, owner, "Work me", Visibility::Private).await;
    link(&state, owner, p, ctx.id, Visibility::ContextMembers).await;

    for member in [a, b] {
        let views = state
            .visibility
            .resolve(member, owner, Some(ctx.id))
            .await
            .unwrap();
        assert_eq!(views.len(), 1, "member {} should see the profile", member);
    }
    assert!(state
        .visibility
        .resolve(z, owner, Some(ctx.id))
        .await
        .unwrap()
        .is_empty());

    // Membership changes take effect on the next resolution.
    state.membership.remove_member(ctx.id, b, None).await.unwrap();
    assert!(state
        .visibility
        .resolve(b, owner, Some(ctx.id))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_owner_sees_every_profile() {
    let state = test_state();
    let owner = register(&state, "owner@example.com").await;
    let ctx = state.membership.create_context("Family", owner).await.unwrap();

    let mut ids = Vec::new();
    for (i, v) in Visibility::ALL.into_iter().enumerate() {
        ids.push(profile(&state, owner, &format!("P{}", i), v).await);
    }
    link(&state, owner, ids[0], ctx.id, Visibility::NotSharable).await;

    for scope in [None, Some(ctx.id), Some(424242)] {
        let views = state.visibility.resolve(owner, owner, scope).await.unwrap();
        let seen: Vec<ProfileId> = views.iter().map(|v| v.id).collect();
        assert_eq!(seen, ids, "scope {:?}", scope);
    }
}

#[tokio::test]
async fn test_stranger_unscoped_sees_public_only() {
    let state = test_state();
    let owner = register(&state, "owner@example.com").await;
    let stranger = register(&state, "stranger@example.com").await;

    let public = profile(&state, owner, "Public", Visibility::Public).await;
    profile(&state, owner, "Private", Visibility::Private).await;
    profile(&state, owner, "Members", Visibility::ContextMembers).await;
    profile(&state, owner, "Hidden", Visibility::NotSharable).await;

    let views = state.visibility.resolve(stranger, owner, None).await.unwrap();
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].id, public);
    assert_eq!(views[0].display_name.as_deref(), Some("Public default"));
}

#[tokio::test]
async fn test_unknown_context_behaves_as_empty() {
    let state = test_state();
    let owner = register(&state, "owner@example.com").await;
    let viewer = register(&state, "viewer@example.com").await;

    profile(&state, owner, "Public", Visibility::Public).await;
    profile(&state, owner, "Members", Visibility::ContextMembers).await;

    let views = state
        .visibility
        .resolve(viewer, owner, Some(777))
        .await
        .unwrap();
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].visibility, Visibility::Public);
    assert_eq!(views[0].context, None);
}
