/// User account endpoints
///
/// # Endpoints
///
/// - `POST   /api/users` - Register
/// - `POST   /api/users/login` - Login and get tokens
/// - `POST   /api/users/refresh` - Exchange a refresh token
/// - `GET    /api/users` - List users (admin)
/// - `GET    /api/users/:id` - Profile (owner or admin)
/// - `PUT    /api/users/:id` - Update profile (owner or admin)
/// - `PATCH  /api/users/:id` - Toggle business status (owner or admin)
/// - `DELETE /api/users/:id` - Delete account (owner or admin)

use crate::{
    app::AppState,
    error::{ApiError, ApiResult, ValidationErrorDetail},
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use cardify_shared::{
    auth::{
        authorization::require_owner_or_admin,
        jwt::{self, Claims, TokenType},
        middleware::AuthContext,
        password,
    },
    models::{
        common::{validate_phone, Address, Image, Name},
        user::{CreateUser, UpdateUser, User},
    },
    telemetry::{AnalyticsEvent, EventKind},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 100;

/// Register request
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[validate(nested)]
    pub name: Name,

    #[validate(custom(function = "validate_phone"))]
    pub phone: String,

    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    /// Checked separately for strength
    pub password: String,

    #[validate(nested)]
    #[serde(default)]
    pub image: Image,

    #[validate(nested)]
    pub address: Address,

    #[serde(default)]
    pub is_business: bool,
}

/// Login request
#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    pub password: String,
}

/// Tokens plus the signed-in profile
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    /// Access token (24h)
    pub access_token: String,

    /// Refresh token (30d)
    pub refresh_token: String,

    pub user: User,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub access_token: String,
}

/// Profile update request
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    #[validate(nested)]
    pub name: Name,

    #[validate(custom(function = "validate_phone"))]
    pub phone: String,

    #[validate(nested)]
    #[serde(default)]
    pub image: Image,

    #[validate(nested)]
    pub address: Address,
}

#[derive(Debug, Deserialize)]
pub struct Pagination {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl Pagination {
    /// Clamped `(limit, offset)`
    fn bounds(&self) -> (i64, i64) {
        let limit = self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let offset = self.offset.unwrap_or(0).max(0);
        (limit, offset)
    }
}

#[derive(Debug, Serialize)]
pub struct UserListResponse {
    pub users: Vec<User>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// Business toggle result
///
/// The access token is only minted when callers change their own account,
/// so the new role takes effect without logging in again.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleBusinessResponse {
    pub user: User,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

fn password_strength(password: &str) -> ApiResult<()> {
    password::validate_password_strength(password).map_err(|message| {
        ApiError::ValidationError(vec![ValidationErrorDetail::new("password", message)])
    })
}

async fn load_user(state: &AppState, id: Uuid) -> ApiResult<User> {
    User::find_by_id(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("User {} not found", id)))
}

fn invalid_credentials() -> ApiError {
    ApiError::Unauthorized("Invalid email or password".to_string())
}

fn locked_out(until: chrono::DateTime<Utc>) -> ApiError {
    ApiError::Forbidden(format!(
        "Account locked after repeated failed logins. Try again after {}",
        until.to_rfc3339()
    ))
}

/// Register a new user
///
/// # Errors
///
/// - `409 Conflict`: Email already exists
/// - `422 Unprocessable Entity`: Validation failed
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<AuthResponse>)> {
    req.validate()?;
    password_strength(&req.password)?;

    let password_hash = password::hash_password(&req.password)?;

    let user = User::create(
        &state.db,
        CreateUser {
            name: req.name,
            phone: req.phone,
            email: req.email,
            password_hash,
            image: req.image,
            address: req.address,
            is_business: req.is_business,
        },
    )
    .await?;

    let (access_token, refresh_token) =
        jwt::issue_token_pair(user.id, user.is_business, user.is_admin, state.jwt_secret())?;

    tracing::info!(user_id = %user.id, is_business = user.is_business, "User registered");
    state.telemetry.track(
        AnalyticsEvent::new(EventKind::Action, "user.registered")
            .with_user(user.id)
            .with_property("isBusiness", user.is_business),
    );

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            access_token,
            refresh_token,
            user,
        }),
    ))
}

/// Login
///
/// Three consecutive failures lock the account for 24 hours; a successful
/// login clears the counter.
///
/// # Errors
///
/// - `401 Unauthorized`: Unknown email or wrong password
/// - `403 Forbidden`: Account is locked
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<AuthResponse>> {
    req.validate()?;

    let user = User::find_by_email(&state.db, &req.email)
        .await?
        .ok_or_else(invalid_credentials)?;

    let now = Utc::now();
    if let Some(until) = user.locked_until.filter(|_| user.is_locked(now)) {
        tracing::warn!(user_id = %user.id, "Login attempt on locked account");
        return Err(locked_out(until));
    }

    if !password::verify_password(&req.password, &user.password_hash)? {
        let locked_until = User::record_login_failure(&state.db, user.id).await?;
        tracing::warn!(user_id = %user.id, "Failed login");

        return match locked_until.filter(|until| *until > now) {
            Some(until) => {
                tracing::warn!(user_id = %user.id, locked_until = %until, "Account locked");
                Err(locked_out(until))
            }
            None => Err(invalid_credentials()),
        };
    }

    if user.login_failures > 0 || user.locked_until.is_some() {
        User::reset_login_failures(&state.db, user.id).await?;
    }

    let (access_token, refresh_token) =
        jwt::issue_token_pair(user.id, user.is_business, user.is_admin, state.jwt_secret())?;

    tracing::info!(user_id = %user.id, "User logged in");
    state
        .telemetry
        .track(AnalyticsEvent::new(EventKind::Action, "user.login").with_user(user.id));

    Ok(Json(AuthResponse {
        access_token,
        refresh_token,
        user,
    }))
}

/// Exchange a refresh token for a new access token
///
/// Role flags are reloaded, so a business toggle or promotion shows up in
/// the new token.
pub async fn refresh(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> ApiResult<Json<RefreshResponse>> {
    let claims = jwt::validate_refresh_token(&req.refresh_token, state.jwt_secret())?;

    let user = User::find_by_id(&state.db, claims.sub)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("User no longer exists".to_string()))?;

    let access = Claims::new(user.id, user.is_business, user.is_admin, TokenType::Access);
    let access_token = jwt::create_token(&access, state.jwt_secret())?;

    Ok(Json(RefreshResponse { access_token }))
}

/// List users (admin)
pub async fn list_users(
    State(state): State<AppState>,
    Query(page): Query<Pagination>,
) -> ApiResult<Json<UserListResponse>> {
    let (limit, offset) = page.bounds();

    let users = User::list(&state.db, limit, offset).await?;
    let total = User::count(&state.db).await?;

    Ok(Json(UserListResponse {
        users,
        total,
        limit,
        offset,
    }))
}

pub async fn get_user(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<User>> {
    require_owner_or_admin(&auth, id)?;
    Ok(Json(load_user(&state, id).await?))
}

pub async fn update_user(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateUserRequest>,
) -> ApiResult<Json<User>> {
    require_owner_or_admin(&auth, id)?;
    req.validate()?;

    let user = User::update(
        &state.db,
        id,
        UpdateUser {
            name: req.name,
            phone: req.phone,
            image: req.image,
            address: req.address,
        },
    )
    .await?
    .ok_or_else(|| ApiError::NotFound(format!("User {} not found", id)))?;

    tracing::info!(user_id = %id, updated_by = %auth.user_id, "User updated");
    Ok(Json(user))
}

/// Toggle business status
pub async fn toggle_business(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ToggleBusinessResponse>> {
    require_owner_or_admin(&auth, id)?;

    let user = User::toggle_business(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("User {} not found", id)))?;

    let access_token = if auth.user_id == id {
        let claims = Claims::new(user.id, user.is_business, user.is_admin, TokenType::Access);
        Some(jwt::create_token(&claims, state.jwt_secret())?)
    } else {
        None
    };

    tracing::info!(user_id = %id, is_business = user.is_business, "Business status changed");
    Ok(Json(ToggleBusinessResponse { user, access_token }))
}

/// Delete an account with its cards and notifications
///
/// # Errors
///
/// - `403 Forbidden`: Admins deleting themselves
pub async fn delete_user(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    require_owner_or_admin(&auth, id)?;

    if auth.is_admin && auth.user_id == id {
        return Err(ApiError::Forbidden(
            "Admins cannot delete their own account".to_string(),
        ));
    }

    if !User::delete(&state.db, id).await? {
        return Err(ApiError::NotFound(format!("User {} not found", id)));
    }

    // Their cards are gone too
    state.cache.invalidate_tag(super::cards::CARDS_TAG).await;

    tracing::info!(user_id = %id, deleted_by = %auth.user_id, "User deleted");
    Ok(StatusCode::NO_CONTENT)
}
