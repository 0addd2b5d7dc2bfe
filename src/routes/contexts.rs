// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Context, membership and role routes.

use crate::error::Result;
use crate::middleware::auth::AuthUser;
use crate::models::{Context, ContextId, Membership, Role, UserId};
use crate::routes::{PageQuery, SuccessResponse};
use crate::services::ContextMember;
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, patch},
    Extension, Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use validator::Validate;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/contexts", get(list_contexts).post(create_context))
        .route("/api/contexts/me", get(my_contexts))
        .route(
            "/api/contexts/{id}",
            get(get_context).patch(rename_context).delete(delete_context),
        )
        .route(
            "/api/contexts/{id}/members",
            get(list_members).post(add_member),
        )
        .route(
            "/api/contexts/{id}/members/{user_id}",
            delete(remove_member),
        )
        .route(
            "/api/contexts/{id}/members/{user_id}/role",
            patch(set_role),
        )
}

#[derive(Debug, Deserialize, Validate)]
pub struct ContextNameRequest {
    #[validate(length(
        min = 2,
        max = 100,
        message = "Context name must be at least 2 characters"
    ))]
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddMemberRequest {
    pub user_id: UserId,
}

#[derive(Debug, Deserialize)]
pub struct SetRoleRequest {
    pub role: Role,
}

async fn list_contexts(
    State(state): State<Arc<AppState>>,
    Query(page): Query<PageQuery>,
) -> Result<Json<Vec<Context>>> {
    Ok(Json(state.membership.find_all(page.skip, page.take).await?))
}

async fn my_contexts(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Vec<Context>>> {
    Ok(Json(state.membership.find_user_contexts(user.user_id).await?))
}

async fn create_context(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<ContextNameRequest>,
) -> Result<(StatusCode, Json<Context>)> {
    body.validate()?;
    let context = state
        .membership
        .create_context(&body.name, user.user_id)
        .await?;
    Ok((StatusCode::CREATED, Json(context)))
}

async fn get_context(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ContextId>,
) -> Result<Json<Context>> {
    Ok(Json(state.membership.find_one(id).await?))
}

async fn rename_context(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<ContextId>,
    Json(body): Json<ContextNameRequest>,
) -> Result<Json<Context>> {
    body.validate()?;
    Ok(Json(
        state
            .membership
            .rename_context(id, &body.name, user.user_id)
            .await?,
    ))
}

async fn delete_context(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<ContextId>,
) -> Result<Json<SuccessResponse>> {
    state.membership.delete_context(id, user.user_id).await?;
    Ok(Json(SuccessResponse::ok()))
}

async fn list_members(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<ContextId>,
) -> Result<Json<Vec<ContextMember>>> {
    state.membership.find_one(id).await?;
    state.membership.require_member(id, user.user_id).await?;
    Ok(Json(state.membership.list_members(id).await?))
}

/// Members may invite other users into their context.
async fn add_member(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<ContextId>,
    Json(body): Json<AddMemberRequest>,
) -> Result<Json<Membership>> {
    state.membership.find_one(id).await?;
    state.membership.require_member(id, user.user_id).await?;
    Ok(Json(
        state
            .membership
            .add_member(id, body.user_id, Some(user.user_id))
            .await?,
    ))
}

/// Members may remove others; anyone may leave.
async fn remove_member(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path((id, user_id)): Path<(ContextId, UserId)>,
) -> Result<Json<SuccessResponse>> {
    if user_id != user.user_id {
        state.membership.find_one(id).await?;
        state.membership.require_member(id, user.user_id).await?;
    }
    state
        .membership
        .remove_member(id, user_id, Some(user.user_id))
        .await?;
    Ok(Json(SuccessResponse::ok()))
}

async fn set_role(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path((id, user_id)): Path<(ContextId, UserId)>,
    Json(body): Json<SetRoleRequest>,
) -> Result<Json<Membership>> {
    Ok(Json(
        state
            .membership
            .set_member_role(id, user_id, user.user_id, body.role)
            .await?,
    ))
}
