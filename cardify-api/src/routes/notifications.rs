/// Notification endpoints
///
/// Callers only ever see and change their own notifications.

use crate::{app::AppState, error::{ApiError, ApiResult}};
use axum::{
    extract::{Path, Query, State},
    Json,
};
use cardify_shared::{auth::middleware::AuthContext, models::notification::Notification};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub unread_only: bool,
}

#[derive(Debug, Serialize)]
pub struct MarkAllResponse {
    pub updated: u64,
}

/// Caller's notifications, newest first
pub async fn list_notifications(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<Notification>>> {
    let notifications =
        Notification::list_for_user(&state.db, auth.user_id, query.unread_only).await?;
    Ok(Json(notifications))
}

/// Mark one notification read
///
/// Someone else's notification answers 404, same as a missing one.
pub async fn mark_read(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Notification>> {
    let notification = Notification::mark_read(&state.db, id, auth.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Notification {} not found", id)))?;
    Ok(Json(notification))
}

pub async fn mark_all_read(
    State(state): State<AppState>,
    auth: AuthContext,
) -> ApiResult<Json<MarkAllResponse>> {
    let updated = Notification::mark_all_read(&state.db, auth.user_id).await?;
    tracing::debug!(user_id = %auth.user_id, updated, "Notifications marked read");
    Ok(Json(MarkAllResponse { updated }))
}
