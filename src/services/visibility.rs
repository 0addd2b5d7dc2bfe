// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Visibility resolver.
//!
//! [`resolve_visible_profiles`] decides which of an owner's profiles a
//! viewer may see, optionally scoped to one context. It is a pure
//! function of its inputs; [`VisibilityResolver`] only loads those inputs
//! from the store.

use futures_util::{stream, StreamExt, TryStreamExt};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::db::IdentityStore;
use crate::error::{AppError, Result};
use crate::models::{
    ContextId, Profile, ProfileAttributes, ProfileContext, ProfileId, UserId, Visibility,
};

const MAX_CONCURRENT_LOADS: usize = 16;

/// A profile together with all of its per-context overrides.
#[derive(Debug, Clone)]
pub struct ProfileRecord {
    pub profile: Profile,
    pub links: Vec<ProfileContext>,
}

/// The context a resolution is filtered by.
#[derive(Debug, Clone, Default)]
pub struct ContextScope {
    pub context_id: ContextId,
    /// `None` when the context does not exist
    pub context_name: Option<String>,
    pub members: BTreeSet<UserId>,
}

/// Per-context override as exposed to viewers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextOverride {
    pub context_id: ContextId,
    pub display_name: Option<String>,
    pub visibility: Visibility,
}

impl From<&ProfileContext> for ContextOverride {
    fn from(link: &ProfileContext) -> Self {
        Self {
            context_id: link.context_id,
            display_name: link.display_name.clone(),
            visibility: link.visibility,
        }
    }
}

/// A disclosed profile with its effective presentation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileView {
    pub id: ProfileId,
    pub user_id: UserId,
    pub name: String,
    pub label: Option<String>,
    pub display_name: Option<String>,
    pub visibility: Visibility,
    pub context: Option<String>,
    pub attributes: ProfileAttributes,
    pub overrides: Vec<ContextOverride>,
}

/// Whether a profile with `visibility` is disclosed to `viewer`.
fn is_disclosed(
    viewer: UserId,
    owner: UserId,
    visibility: Visibility,
    scope: Option<&ContextScope>,
) -> bool {
    if viewer == owner {
        return true;
    }
    match (scope, visibility) {
        (_, Visibility::Public) => true,
        (Some(scope), Visibility::ContextMembers) => scope.members.contains(&viewer),
        (None, _) | (Some(_), Visibility::Private | Visibility::NotSharable) => false,
    }
}

/// Resolve which of `owner`'s profiles `viewer` may see.
///
/// Without a scope only the profile default visibility counts, so a
/// public override never exposes a private profile. With a scope the
/// scope context's override, if any, replaces the visibility and display
/// name, and the effective context becomes the linked context's name.
/// Output is ordered by profile id. Profiles owned by anyone other than
/// `owner` are ignored.
pub fn resolve_visible_profiles(
    viewer: UserId,
    owner: UserId,
    profiles: &[ProfileRecord],
    scope: Option<&ContextScope>,
) -> Vec<ProfileView> {
    let mut views: Vec<ProfileView> = profiles
        .iter()
        .filter(|record| record.profile.user_id == owner)
        .filter_map(|record| {
            let profile = &record.profile;
            let link = scope.and_then(|s| {
                record
                    .links
                    .iter()
                    .find(|link| link.context_id == s.context_id)
            });

            let (visibility, display_name, context) = match (scope, link) {
                (Some(scope), Some(link)) => (
                    link.visibility,
                    link.display_name
                        .clone()
                        .or_else(|| profile.display_name.clone()),
                    scope.context_name.clone(),
                ),
                _ => (
                    profile.visibility,
                    profile.display_name.clone(),
                    profile.attributes.context.clone(),
                ),
            };

            if !is_disclosed(viewer, owner, visibility, scope) {
                return None;
            }

            let overrides = match scope {
                Some(_) => link.map(ContextOverride::from).into_iter().collect(),
                None => record.links.iter().map(ContextOverride::from).collect(),
            };

            Some(ProfileView {
                id: profile.id,
                user_id: profile.user_id,
                name: profile.name.clone(),
                label: profile.label.clone(),
                display_name,
                visibility,
                context,
                attributes: profile.attributes.clone(),
                overrides,
            })
        })
        .collect();

    views.sort_by_key(|v| v.id);
    views
}

/// Loads resolver inputs from the store.
#[derive(Clone)]
pub struct VisibilityResolver {
    store: Arc<dyn IdentityStore>,
}

impl VisibilityResolver {
    pub fn new(store: Arc<dyn IdentityStore>) -> Self {
        Self { store }
    }

    /// Profiles of `owner` visible to `viewer`, optionally scoped to a
    /// context. An unknown context behaves like one with no members and
    /// no overrides.
    pub async fn resolve(
        &self,
        viewer: UserId,
        owner: UserId,
        context_id: Option<ContextId>,
    ) -> Result<Vec<ProfileView>> {
        let profiles = self.store.list_user_profiles(owner).await?;
        let store = &self.store;
        let records: Vec<ProfileRecord> = stream::iter(profiles)
            .map(|profile| async move {
                let links = store.list_profile_links(profile.id).await?;
                Ok::<_, AppError>(ProfileRecord { profile, links })
            })
            .buffered(MAX_CONCURRENT_LOADS)
            .try_collect()
            .await?;

        let scope = match context_id {
            Some(context_id) => Some(self.load_scope(context_id).await?),
            None => None,
        };

        let views = resolve_visible_profiles(viewer, owner, &records, scope.as_ref());
        tracing::debug!(
            viewer,
            owner,
            context_id = ?context_id,
            total = records.len(),
            visible = views.len(),
            "Resolved visible profiles"
        );
        Ok(views)
    }

    async fn load_scope(&self, context_id: ContextId) -> Result<ContextScope> {
        let Some(context) = self.store.get_context(context_id).await? else {
            return Ok(ContextScope {
                context_id,
                ..ContextScope::default()
            });
        };
        let members = self
            .store
            .list_context_members(context_id)
            .await?
            .into_iter()
            .map(|m| m.user_id)
            .collect();
        Ok(ContextScope {
            context_id,
            context_name: Some(context.name),
            members,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;

    const OWNER: UserId = 1;
    const MEMBER: UserId = 2;
    const STRANGER: UserId = 3;
    const CTX: ContextId = 10;

    fn profile(id: ProfileId, visibility: Visibility) -> Profile {
        Profile {
            id,
            user_id: OWNER,
            name: format!("P{}", id),
            label: None,
            display_name: Some(format!("Default {}", id)),
            visibility,
            attributes: ProfileAttributes {
                context: Some("free-form".to_string()),
                ..Default::default()
            },
            created_at: Utc::now(),
            version: 1,
        }
    }

    fn record(id: ProfileId, visibility: Visibility, link: Option<Visibility>) -> ProfileRecord {
        ProfileRecord {
            profile: profile(id, visibility),
            links: link
                .map(|v| ProfileContext {
                    profile_id: id,
                    context_id: CTX,
                    display_name: Some(format!("Work {}", id)),
                    visibility: v,
                })
                .into_iter()
                .collect(),
        }
    }

    fn scope() -> ContextScope {
        ContextScope {
            context_id: CTX,
            context_name: Some("Work".to_string()),
            members: [OWNER, MEMBER].into_iter().collect(),
        }
    }

    fn ids(views: &[ProfileView]) -> Vec<ProfileId> {
        views.iter().map(|v| v.id).collect()
    }

    #[test]
    fn test_unscoped_stranger_sees_only_public() {
        let records = vec![
            record(1, Visibility::Public, None),
            record(2, Visibility::Private, None),
            record(3, Visibility::ContextMembers, None),
            record(4, Visibility::NotSharable, None),
        ];

        let views = resolve_visible_profiles(STRANGER, OWNER, &records, None);
        assert_eq!(ids(&views), vec![1]);
    }

    #[test]
    fn test_override_wins_only_when_scoped() {
        let records = vec![record(1, Visibility::Private, Some(Visibility::Public))];

        let scoped = resolve_visible_profiles(STRANGER, OWNER, &records, Some(&scope()));
        assert_eq!(ids(&scoped), vec![1]);
        assert_eq!(scoped[0].visibility, Visibility::Public);
        assert_eq!(scoped[0].display_name.as_deref(), Some("Work 1"));
        assert_eq!(scoped[0].context.as_deref(), Some("Work"));

        assert!(resolve_visible_profiles(STRANGER, OWNER, &records, None).is_empty());
    }

    #[test]
    fn test_context_members_requires_membership() {
        let records = vec![record(1, Visibility::Private, Some(Visibility::ContextMembers))];
        let scope = scope();

        assert_eq!(
            ids(&resolve_visible_profiles(MEMBER, OWNER, &records, Some(&scope))),
            vec![1]
        );
        assert!(resolve_visible_profiles(STRANGER, OWNER, &records, Some(&scope)).is_empty());
    }

    #[test]
    fn test_context_members_default_without_override() {
        let records = vec![record(1, Visibility::ContextMembers, None)];

        let views = resolve_visible_profiles(MEMBER, OWNER, &records, Some(&scope()));
        assert_eq!(ids(&views), vec![1]);
        // No override: the profile's own label stays the effective context.
        assert_eq!(views[0].context.as_deref(), Some("free-form"));
        assert!(views[0].overrides.is_empty());
    }

    #[test]
    fn test_not_sharable_hidden_from_members() {
        let records = vec![record(1, Visibility::Public, Some(Visibility::NotSharable))];

        assert!(resolve_visible_profiles(MEMBER, OWNER, &records, Some(&scope())).is_empty());
        assert_eq!(
            ids(&resolve_visible_profiles(OWNER, OWNER, &records, Some(&scope()))),
            vec![1]
        );
    }

    #[test]
    fn test_overrides_listing() {
        let mut rec = record(1, Visibility::Public, Some(Visibility::Public));
        rec.links.push(ProfileContext {
            profile_id: 1,
            context_id: CTX + 1,
            display_name: None,
            visibility: Visibility::Private,
        });
        let records = vec![rec];

        let unscoped = resolve_visible_profiles(STRANGER, OWNER, &records, None);
        assert_eq!(unscoped[0].overrides.len(), 2);

        let scoped = resolve_visible_profiles(STRANGER, OWNER, &records, Some(&scope()));
        assert_eq!(scoped[0].overrides.len(), 1);
        assert_eq!(scoped[0].overrides[0].context_id, CTX);
    }

    #[test]
    fn test_foreign_profiles_ignored() {
        let mut rec = record(1, Visibility::Public, None);
        rec.profile.user_id = STRANGER;

        assert!(resolve_visible_profiles(OWNER, OWNER, &[rec], None).is_empty());
    }

    fn any_visibility() -> impl Strategy<Value = Visibility> {
        prop::sample::select(Visibility::ALL.to_vec())
    }

    fn any_records() -> impl Strategy<Value = Vec<ProfileRecord>> {
        prop::collection::vec(
            (any_visibility(), prop::option::of(any_visibility())),
            0..12,
        )
        .prop_map(|specs| {
            specs
                .into_iter()
                .enumerate()
                .rev()
                .map(|(i, (v, link))| record(i as ProfileId + 1, v, link))
                .collect()
        })
    }

    proptest! {
        #[test]
        fn prop_owner_sees_everything(records in any_records(), scoped in any::<bool>()) {
            let scope = scope();
            let views = resolve_visible_profiles(
                OWNER,
                OWNER,
                &records,
                scoped.then_some(&scope),
            );
            prop_assert_eq!(views.len(), records.len());
        }

        #[test]
        fn prop_unscoped_stranger_sees_only_public_defaults(records in any_records()) {
            let views = resolve_visible_profiles(STRANGER, OWNER, &records, None);
            for view in &views {
                prop_assert_eq!(view.visibility, Visibility::Public);
            }
            let public = records
                .iter()
                .filter(|r| r.profile.visibility == Visibility::Public)
                .count();
            prop_assert_eq!(views.len(), public);
        }

        #[test]
        fn prop_output_sorted_and_deterministic(records in any_records(), viewer in 1u64..4) {
            let scope = scope();
            let a = resolve_visible_profiles(viewer, OWNER, &records, Some(&scope));
            let b = resolve_visible_profiles(viewer, OWNER, &records, Some(&scope));
            prop_assert!(a.windows(2).all(|w| w[0].id < w[1].id));
            prop_assert_eq!(a, b);
        }

        #[test]
        fn prop_stranger_never_sees_hidden(records in any_records()) {
            let views = resolve_visible_profiles(STRANGER, OWNER, &records, Some(&scope()));
            for view in &views {
                prop_assert_eq!(view.visibility, Visibility::Public);
            }
        }
    }
}
