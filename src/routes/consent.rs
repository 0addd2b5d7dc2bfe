// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Consent routes for the identity owner, plus public token introspection
//! for relying parties.

use crate::error::Result;
use crate::middleware::auth::AuthUser;
use crate::models::{ConsentGrant, GrantId, ProfileId};
use crate::services::consent::{GrantWithProfile, SharableIdentity};
use crate::services::{GrantRequest, Introspection, IssuedGrant};
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use validator::Validate;

/// Routes that act on the caller's own grants (auth required).
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/consent/identities", get(sharable_identities))
        .route("/api/consent/grants", get(my_grants).post(create_grant))
        .route("/api/consent/grants/{id}/revoke", post(revoke_grant))
}

/// Public routes for relying parties.
pub fn public_routes() -> Router<Arc<AppState>> {
    Router::new().route("/consent/introspect", post(introspect))
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateGrantRequest {
    pub profile_id: ProfileId,
    #[validate(length(min = 1, max = 200, message = "clientId is required"))]
    pub client_id: String,
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    #[validate(length(max = 16))]
    pub attributes: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct IntrospectRequest {
    pub token: String,
}

async fn sharable_identities(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Vec<SharableIdentity>>> {
    Ok(Json(
        state.consent.list_sharable_identities(user.user_id).await?,
    ))
}

async fn my_grants(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Vec<GrantWithProfile>>> {
    Ok(Json(state.consent.list_my_consent_grants(user.user_id).await?))
}

async fn create_grant(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<CreateGrantRequest>,
) -> Result<(StatusCode, Json<IssuedGrant>)> {
    body.validate()?;
    let issued = state
        .consent
        .create_consent_grant(
            user.user_id,
            GrantRequest {
                profile_id: body.profile_id,
                client_id: body.client_id,
                scope: body.scope,
                attributes: body.attributes,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(issued)))
}

async fn revoke_grant(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<GrantId>,
) -> Result<Json<ConsentGrant>> {
    Ok(Json(state.consent.revoke_consent_grant(id, user.user_id).await?))
}

async fn introspect(
    State(state): State<Arc<AppState>>,
    Json(body): Json<IntrospectRequest>,
) -> Result<Json<Introspection>> {
    Ok(Json(state.consent.introspect(&body.token).await?))
}
