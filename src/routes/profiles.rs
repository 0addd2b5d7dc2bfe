// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Profile routes, including the visibility-resolved profile listing.

use crate::error::Result;
use crate::middleware::auth::AuthUser;
use crate::models::{ContextId, ProfileId, UserId};
use crate::routes::SuccessResponse;
use crate::services::{NewProfile, ProfileDetail, ProfileUpdate, ProfileView};
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use validator::Validate;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/users/{id}/profiles", get(user_profiles))
        .route("/api/profiles", post(create_profile))
        .route(
            "/api/profiles/{id}",
            get(get_profile)
                .patch(update_profile)
                .delete(delete_profile),
        )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VisibilityQuery {
    context_id: Option<ContextId>,
}

/// Profiles of another user, as the caller is allowed to see them.
async fn user_profiles(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(owner): Path<UserId>,
    Query(query): Query<VisibilityQuery>,
) -> Result<Json<Vec<ProfileView>>> {
    Ok(Json(
        state
            .visibility
            .resolve(user.user_id, owner, query.context_id)
            .await?,
    ))
}

async fn create_profile(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<NewProfile>,
) -> Result<(StatusCode, Json<ProfileDetail>)> {
    body.validate()?;
    let profile = state.profiles.create_profile(user.user_id, body).await?;
    Ok((StatusCode::CREATED, Json(profile)))
}

async fn get_profile(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<ProfileId>,
) -> Result<Json<ProfileDetail>> {
    Ok(Json(state.profiles.get_profile(user.user_id, id).await?))
}

async fn update_profile(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<ProfileId>,
    Json(body): Json<ProfileUpdate>,
) -> Result<Json<ProfileDetail>> {
    body.validate()?;
    Ok(Json(
        state
            .profiles
            .update_profile(user.user_id, id, body)
            .await?,
    ))
}

async fn delete_profile(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<ProfileId>,
) -> Result<Json<SuccessResponse>> {
    state.profiles.delete_profile(user.user_id, id).await?;
    Ok(Json(SuccessResponse::ok()))
}
