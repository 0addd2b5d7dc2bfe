// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the application.

pub mod audit;
pub mod consent;
pub mod context;
pub mod profile;
pub mod user;

pub use audit::{AuditAction, AuditLog};
pub use consent::{consent_ttl, ConsentClaims, ConsentGrant, GrantId, CONSENT_TTL_SECS};
pub use context::{Context, ContextId, Membership, Role};
pub use profile::{Profile, ProfileAttributes, ProfileContext, ProfileId, Visibility};
pub use user::{LinkedAccount, User, UserId};
