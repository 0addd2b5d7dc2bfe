// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - business logic layer.

pub mod audit;
pub mod consent;
pub mod membership;
pub mod profiles;
pub mod signer;
pub mod users;
pub mod visibility;

pub use audit::{AuditEntry, AuditService};
pub use consent::{ConsentService, GrantRequest, Introspection, IssuedGrant};
pub use membership::{ContextMember, MembershipService};
pub use profiles::{NewProfile, ProfileDetail, ProfileService, ProfileUpdate};
pub use signer::ConsentSigner;
pub use users::{NewLinkedAccount, PublicUser, UserExport, UserService};
pub use visibility::{resolve_visible_profiles, ContextScope, ProfileView, VisibilityResolver};
