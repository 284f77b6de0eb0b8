/// Role gates for whole route groups
///
/// These run after JWT authentication has put an [`AuthContext`] into the
/// request extensions. Per-resource ownership checks need the resource, so
/// handlers call `require_owner_or_admin` themselves.

use crate::error::ApiError;
use axum::{extract::Request, middleware::Next, response::Response};
use cardify_shared::auth::{
    authorization::{require_admin, require_business},
    middleware::AuthContext,
};

/// Admin only
pub async fn require_admin_layer(
    auth: AuthContext,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    require_admin(&auth).map_err(|e| {
        tracing::debug!(user_id = %auth.user_id, "Admin route refused");
        ApiError::from(e)
    })?;
    Ok(next.run(request).await)
}

/// Business or admin
pub async fn require_business_layer(
    auth: AuthContext,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    require_business(&auth).map_err(|e| {
        tracing::debug!(user_id = %auth.user_id, "Business route refused");
        ApiError::from(e)
    })?;
    Ok(next.run(request).await)
}
