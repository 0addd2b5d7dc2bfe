// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Account, user directory and audit routes.

use crate::error::{AppError, Result};
use crate::middleware::auth::AuthUser;
use crate::models::{AuditLog, LinkedAccount};
use crate::routes::{PageQuery, SuccessResponse};
use crate::services::{NewLinkedAccount, PublicUser, UserExport};
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get},
    Extension, Json, Router,
};
use std::sync::Arc;
use validator::Validate;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/me", get(get_me).delete(delete_account))
        .route("/api/me/export", get(export_data))
        .route(
            "/api/me/linked-accounts",
            get(linked_accounts).post(link_account),
        )
        .route(
            "/api/me/linked-accounts/{id}",
            delete(unlink_account),
        )
        .route("/api/users", get(list_users))
        .route("/api/audit", get(audit_all))
        .route("/api/audit/me", get(audit_mine))
}

// ─── Current User ────────────────────────────────────────────

async fn get_me(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<PublicUser>> {
    Ok(Json(state.users.find_one(user.user_id).await?.into()))
}

/// Export all data held about the caller (GDPR).
async fn export_data(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<UserExport>> {
    Ok(Json(state.users.export_user_data(user.user_id).await?))
}

/// Erase the caller's account (GDPR).
async fn delete_account(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<SuccessResponse>> {
    tracing::info!(user_id = user.user_id, "User-initiated account erasure");
    state.users.erase_account(user.user_id).await?;
    Ok(Json(SuccessResponse::ok()))
}

// ─── Linked Accounts ─────────────────────────────────────────

async fn linked_accounts(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Vec<LinkedAccount>>> {
    Ok(Json(state.users.list_linked_accounts(user.user_id).await?))
}

async fn link_account(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<NewLinkedAccount>,
) -> Result<(StatusCode, Json<LinkedAccount>)> {
    body.validate()?;
    let linked = state.users.link_account(user.user_id, body).await?;
    Ok((StatusCode::CREATED, Json(linked)))
}

async fn unlink_account(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<u64>,
) -> Result<Json<LinkedAccount>> {
    Ok(Json(
        state.users.delete_linked_account(user.user_id, id).await?,
    ))
}

// ─── Directory ───────────────────────────────────────────────

async fn list_users(
    State(state): State<Arc<AppState>>,
    Query(page): Query<PageQuery>,
) -> Result<Json<Vec<PublicUser>>> {
    let users = state.users.find_all(page.skip, page.take).await?;
    Ok(Json(users.into_iter().map(PublicUser::from).collect()))
}

// ─── Audit Trail ─────────────────────────────────────────────

/// Operator view: only admins of at least one context.
async fn audit_all(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Vec<AuditLog>>> {
    if !state.membership.is_admin_anywhere(user.user_id).await? {
        return Err(AppError::Forbidden(
            "Audit trail requires an admin role".to_string(),
        ));
    }
    Ok(Json(state.audit.find_all().await?))
}

async fn audit_mine(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Vec<AuditLog>>> {
    Ok(Json(state.audit.find_by_user(user.user_id).await?))
}
