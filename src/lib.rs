// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Persona-Contexts: contextual identities with consent-based sharing
//!
//! Users hold several profiles, group other users into contexts and
//! decide per context who sees which profile. Relying parties receive
//! short-lived, attribute-scoped consent tokens. Every state change is
//! recorded in an append-only audit trail.

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;

use config::Config;
use db::IdentityStore;
use services::{
    AuditService, ConsentService, ConsentSigner, MembershipService, ProfileService, UserService,
    VisibilityResolver,
};
use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn IdentityStore>,
    pub audit: AuditService,
    pub membership: MembershipService,
    pub visibility: VisibilityResolver,
    pub consent: ConsentService,
    pub profiles: ProfileService,
    pub users: UserService,
}

impl AppState {
    /// Wire every service to one store handle.
    pub fn new(config: Config, store: Arc<dyn IdentityStore>) -> anyhow::Result<Self> {
        let signer = ConsentSigner::new(&config.consent_key)?;
        tracing::info!(algorithm = ?signer.algorithm(), "Consent signer initialized");
        let audit = AuditService::new(store.clone());
        Ok(Self {
            membership: MembershipService::new(store.clone(), audit.clone()),
            visibility: VisibilityResolver::new(store.clone()),
            consent: ConsentService::new(store.clone(), audit.clone(), signer),
            profiles: ProfileService::new(store.clone(), audit.clone()),
            users: UserService::new(store.clone(), audit.clone()),
            audit,
            store,
            config,
        })
    }
}
