/// User model and database operations
///
/// # Schema
///
/// ```sql
/// CREATE TABLE users (
///     id              UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     name            JSONB NOT NULL,          -- {first, middle?, last}
///     phone           VARCHAR(20) NOT NULL,
///     email           VARCHAR(256) NOT NULL,   -- unique on LOWER(email)
///     password_hash   VARCHAR(255) NOT NULL,
///     image           JSONB NOT NULL,          -- {url, alt}
///     address         JSONB NOT NULL,
///     is_business     BOOLEAN NOT NULL DEFAULT FALSE,
///     is_admin        BOOLEAN NOT NULL DEFAULT FALSE,
///     login_failures  INTEGER NOT NULL DEFAULT 0,
///     locked_until    TIMESTAMPTZ,
///     created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     updated_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
/// ```
///
/// # Example
///
/// ```no_run
/// use cardify_shared::models::user::User;
/// use sqlx::PgPool;
///
/// # async fn example(pool: PgPool) -> Result<(), sqlx::Error> {
/// if let Some(user) = User::find_by_email(&pool, "ada@example.com").await? {
///     println!("{} is business: {}", user.email, user.is_business);
/// }
/// # Ok(())
/// # }
/// ```

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::{types::Json, PgPool};
use uuid::Uuid;

use super::common::{normalize_email, Address, Image, Name};
use crate::auth::authorization::Role;

/// Consecutive failed logins that trigger a lockout
pub const MAX_LOGIN_FAILURES: i32 = 3;

/// How long a locked account stays locked
pub fn lockout_duration() -> Duration {
    Duration::hours(24)
}

/// User account
///
/// `password_hash` and the lockout bookkeeping never leave the server.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(rename = "_id")]
    pub id: Uuid,

    pub name: Json<Name>,

    pub phone: String,

    /// Stored lowercased
    pub email: String,

    #[serde(skip_serializing)]
    pub password_hash: String,

    pub image: Json<Image>,

    pub address: Json<Address>,

    pub is_business: bool,

    pub is_admin: bool,

    #[serde(skip_serializing)]
    pub login_failures: i32,

    #[serde(skip_serializing)]
    pub locked_until: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

/// Input for creating a new user
#[derive(Debug, Clone)]
pub struct CreateUser {
    pub name: Name,
    pub phone: String,
    pub email: String,
    /// Argon2id hash, never the plaintext password
    pub password_hash: String,
    pub image: Image,
    pub address: Address,
    pub is_business: bool,
}

/// Profile fields replaced by `PUT /api/users/:id`
#[derive(Debug, Clone)]
pub struct UpdateUser {
    pub name: Name,
    pub phone: String,
    pub image: Image,
    pub address: Address,
}

impl User {
    pub fn role(&self) -> Role {
        Role::from_flags(self.is_business, self.is_admin)
    }

    /// True while a lockout is in effect at `now`
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.map_or(false, |until| until > now)
    }

    /// Inserts a user; the email is normalized first
    ///
    /// # Errors
    ///
    /// A duplicate email surfaces as a database error on
    /// `users_email_lower_key`.
    pub async fn create(pool: &PgPool, data: CreateUser) -> Result<Self, sqlx::Error> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (name, phone, email, password_hash, image, address, is_business)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(Json(data.name))
        .bind(data.phone)
        .bind(normalize_email(&data.email))
        .bind(data.password_hash)
        .bind(Json(data.image))
        .bind(Json(data.address))
        .bind(data.is_business)
        .fetch_one(pool)
        .await?;

        Ok(user)
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Case-insensitive lookup
    pub async fn find_by_email(pool: &PgPool, email: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE LOWER(email) = $1")
            .bind(normalize_email(email))
            .fetch_optional(pool)
            .await
    }

    /// Replaces the editable profile fields
    ///
    /// Returns `None` if the user doesn't exist.
    pub async fn update(
        pool: &PgPool,
        id: Uuid,
        data: UpdateUser,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>(
            r#"
            UPDATE users
            SET name = $2, phone = $3, image = $4, address = $5, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(Json(data.name))
        .bind(data.phone)
        .bind(Json(data.image))
        .bind(Json(data.address))
        .fetch_optional(pool)
        .await
    }

    /// Flips `is_business` and returns the updated row
    pub async fn toggle_business(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>(
            r#"
            UPDATE users
            SET is_business = NOT is_business, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// Deletes a user; their cards and notifications cascade
    ///
    /// Returns true if a row was removed.
    pub async fn delete(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Counts a failed login and locks the account on the threshold
    ///
    /// The counter restarts from zero when the lock is applied. Returns the
    /// resulting `locked_until`.
    pub async fn record_login_failure(
        pool: &PgPool,
        id: Uuid,
    ) -> Result<Option<DateTime<Utc>>, sqlx::Error> {
        let (locked_until,): (Option<DateTime<Utc>>,) = sqlx::query_as(
            r#"
            UPDATE users
            SET login_failures = CASE WHEN login_failures + 1 >= $2 THEN 0 ELSE login_failures + 1 END,
                locked_until   = CASE WHEN login_failures + 1 >= $2 THEN NOW() + make_interval(secs => $3)
                                      ELSE locked_until END
            WHERE id = $1
            RETURNING locked_until
            "#,
        )
        .bind(id)
        .bind(MAX_LOGIN_FAILURES)
        .bind(lockout_duration().num_seconds() as f64)
        .fetch_one(pool)
        .await?;

        Ok(locked_until)
    }

    /// Clears lockout bookkeeping after a successful login
    pub async fn reset_login_failures(pool: &PgPool, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET login_failures = 0, locked_until = NULL WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;

        Ok(())
    }

    /// Lists users, newest first
    pub async fn list(pool: &PgPool, limit: i64, offset: i64) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>(
            "SELECT * FROM users ORDER BY created_at DESC LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
    }

    pub async fn count(pool: &PgPool) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
            .fetch_one(pool)
            .await?;

        Ok(count)
    }
}
