/// Business card model and database operations
///
/// Cards belong to a business (or admin) user. `biz_number` is a unique
/// seven digit number assigned by the server, and `likes` holds the ids of
/// users who liked the card, each at most once.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sqlx::{types::Json, PgPool};
use tracing::{debug, warn};
use uuid::Uuid;

use super::common::{Address, Image};

/// Smallest valid business number
pub const BIZ_NUMBER_MIN: i32 = 1_000_000;

/// Largest valid business number
pub const BIZ_NUMBER_MAX: i32 = 9_999_999;

/// Name of the unique constraint on `cards.biz_number`
pub const BIZ_NUMBER_CONSTRAINT: &str = "cards_biz_number_key";

const BIZ_NUMBER_ATTEMPTS: usize = 5;

/// Business card
///
/// Deserializable so cached copies can be read back.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    #[serde(rename = "_id")]
    pub id: Uuid,

    pub title: String,

    pub subtitle: String,

    pub description: String,

    pub phone: String,

    pub email: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub web: Option<String>,

    pub image: Json<Image>,

    pub address: Json<Address>,

    pub biz_number: i32,

    pub likes: Vec<Uuid>,

    #[serde(rename = "user_id")]
    pub user_id: Uuid,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

/// Editable card fields
#[derive(Debug, Clone)]
pub struct CardFields {
    pub title: String,
    pub subtitle: String,
    pub description: String,
    pub phone: String,
    pub email: String,
    pub web: Option<String>,
    pub image: Image,
    pub address: Address,
}

/// Draws a random business number in the valid range
pub fn generate_biz_number() -> i32 {
    rand::thread_rng().gen_range(BIZ_NUMBER_MIN..=BIZ_NUMBER_MAX)
}

/// True if the error is a duplicate `biz_number`
pub fn is_biz_number_conflict(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db) if db.constraint() == Some(BIZ_NUMBER_CONSTRAINT)
    )
}

impl Card {
    pub fn is_liked_by(&self, user_id: Uuid) -> bool {
        self.likes.contains(&user_id)
    }

    /// Inserts a card owned by `user_id` with a fresh business number
    ///
    /// A colliding number is redrawn a few times before the conflict is
    /// returned to the caller.
    pub async fn create(
        pool: &PgPool,
        user_id: Uuid,
        fields: CardFields,
    ) -> Result<Self, sqlx::Error> {
        let mut attempt = 0;

        loop {
            attempt += 1;
            let biz_number = generate_biz_number();

            let result = sqlx::query_as::<_, Card>(
                r#"
                INSERT INTO cards (title, subtitle, description, phone, email, web,
                                   image, address, biz_number, user_id)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                RETURNING *
                "#,
            )
            .bind(&fields.title)
            .bind(&fields.subtitle)
            .bind(&fields.description)
            .bind(&fields.phone)
            .bind(&fields.email)
            .bind(&fields.web)
            .bind(Json(&fields.image))
            .bind(Json(&fields.address))
            .bind(biz_number)
            .bind(user_id)
            .fetch_one(pool)
            .await;

            match result {
                Err(e) if is_biz_number_conflict(&e) && attempt < BIZ_NUMBER_ATTEMPTS => {
                    debug!(biz_number, attempt, "Business number taken, drawing another");
                }
                Err(e) => {
                    if is_biz_number_conflict(&e) {
                        warn!(attempts = attempt, "Could not find a free business number");
                    }
                    return Err(e);
                }
                Ok(card) => return Ok(card),
            }
        }
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Card>("SELECT * FROM cards WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// All cards, newest first
    pub async fn list_all(pool: &PgPool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Card>("SELECT * FROM cards ORDER BY created_at DESC")
            .fetch_all(pool)
            .await
    }

    pub async fn list_by_user(pool: &PgPool, user_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Card>(
            "SELECT * FROM cards WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(pool)
        .await
    }

    /// Cards whose `likes` contain `user_id`
    pub async fn list_liked_by(pool: &PgPool, user_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Card>(
            "SELECT * FROM cards WHERE $1 = ANY(likes) ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(pool)
        .await
    }

    pub async fn update(
        pool: &PgPool,
        id: Uuid,
        fields: CardFields,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Card>(
            r#"
            UPDATE cards
            SET title = $2, subtitle = $3, description = $4, phone = $5, email = $6,
                web = $7, image = $8, address = $9, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(fields.title)
        .bind(fields.subtitle)
        .bind(fields.description)
        .bind(fields.phone)
        .bind(fields.email)
        .bind(fields.web)
        .bind(Json(fields.image))
        .bind(Json(fields.address))
        .fetch_optional(pool)
        .await
    }

    /// Adds or removes `user_id` from `likes` in one statement
    ///
    /// Returns the updated card, or `None` if it doesn't exist.
    pub async fn toggle_like(
        pool: &PgPool,
        id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Card>(
            r#"
            UPDATE cards
            SET likes = CASE WHEN $2 = ANY(likes) THEN array_remove(likes, $2)
                             ELSE array_append(likes, $2) END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(pool)
        .await
    }

    /// Assigns a specific business number
    ///
    /// # Errors
    ///
    /// A number already in use violates [`BIZ_NUMBER_CONSTRAINT`].
    pub async fn set_biz_number(
        pool: &PgPool,
        id: Uuid,
        biz_number: i32,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Card>(
            "UPDATE cards SET biz_number = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(biz_number)
        .fetch_optional(pool)
        .await
    }

    /// Returns the deleted card so callers can report what was removed
    pub async fn delete(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Card>("DELETE FROM cards WHERE id = $1 RETURNING *")
            .bind(id)
            .fetch_optional(pool)
            .await
    }
}
