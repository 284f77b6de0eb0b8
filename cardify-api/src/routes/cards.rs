/// Business card endpoints
///
/// Public reads go through the cache. Every write invalidates the
/// [`CARDS_TAG`] tag and the card's own tag, so readers never see a card
/// that changed after it was cached.

use crate::{
    app::AppState,
    error::{ApiError, ApiResult, ValidationErrorDetail},
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use cardify_shared::{
    auth::{authorization::require_owner_or_admin, middleware::AuthContext},
    cache::CacheOptions,
    models::{
        card::{Card, CardFields, BIZ_NUMBER_MAX, BIZ_NUMBER_MIN},
        common::{validate_phone, Address, Image},
        notification::{CreateNotification, Notification, NotificationKind},
    },
    telemetry::{AnalyticsEvent, EventKind},
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

/// Tag carried by every cached card read
pub const CARDS_TAG: &str = "cards";

const ALL_CARDS_KEY: &str = "cards:all";

fn card_key(id: Uuid) -> String {
    format!("card:{}", id)
}

/// Card create/update body
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CardRequest {
    #[validate(length(min = 2, max = 256))]
    pub title: String,

    #[validate(length(min = 2, max = 256))]
    pub subtitle: String,

    #[validate(length(min = 2, max = 1024))]
    pub description: String,

    #[validate(custom(function = "validate_phone"))]
    pub phone: String,

    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(url(message = "Invalid website address"))]
    #[serde(default)]
    pub web: Option<String>,

    #[validate(nested)]
    #[serde(default)]
    pub image: Image,

    #[validate(nested)]
    pub address: Address,
}

impl CardRequest {
    /// Treats a blank website as absent
    fn normalized(mut self) -> Self {
        self.web = self.web.filter(|w| !w.trim().is_empty());
        self
    }
}

impl From<CardRequest> for CardFields {
    fn from(req: CardRequest) -> Self {
        CardFields {
            title: req.title,
            subtitle: req.subtitle,
            description: req.description,
            phone: req.phone,
            email: req.email,
            web: req.web,
            image: req.image,
            address: req.address,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BizNumberRequest {
    pub biz_number: i32,
}

fn check_biz_number(n: i32) -> ApiResult<()> {
    if (BIZ_NUMBER_MIN..=BIZ_NUMBER_MAX).contains(&n) {
        Ok(())
    } else {
        Err(ApiError::ValidationError(vec![ValidationErrorDetail::new(
            "bizNumber",
            format!("Must be between {} and {}", BIZ_NUMBER_MIN, BIZ_NUMBER_MAX),
        )]))
    }
}

fn card_not_found(id: Uuid) -> ApiError {
    ApiError::NotFound(format!("Card {} not found", id))
}

async fn load_card(state: &AppState, id: Uuid) -> ApiResult<Card> {
    Card::find_by_id(&state.db, id)
        .await?
        .ok_or_else(|| card_not_found(id))
}

async fn invalidate_card(state: &AppState, id: Uuid) {
    let removed = state.cache.invalidate_tag(CARDS_TAG).await
        + state.cache.invalidate_tag(&card_key(id)).await;
    tracing::debug!(card_id = %id, removed, "Card cache invalidated");
}

/// List all cards
pub async fn list_cards(State(state): State<AppState>) -> ApiResult<Json<Vec<Card>>> {
    let options = CacheOptions::new().tag(CARDS_TAG).persist();
    let db = state.db.clone();
    let cards = state
        .cache
        .get_or_insert_with(ALL_CARDS_KEY, options, || async move {
            Card::list_all(&db).await.map_err(ApiError::from)
        })
        .await?;

    Ok(Json(cards))
}

/// One card by id
pub async fn get_card(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Card>> {
    let key = card_key(id);
    let options = CacheOptions::new().tag(CARDS_TAG).tag(key.clone()).persist();
    let db = state.db.clone();

    // Misses are not cached, so a card created later is found
    let card = state
        .cache
        .get_or_insert_with(&key, options, || async move {
            Card::find_by_id(&db, id)
                .await
                .map_err(ApiError::from)?
                .ok_or_else(|| card_not_found(id))
        })
        .await?;

    Ok(Json(card))
}

/// Cards owned by the caller
pub async fn my_cards(
    State(state): State<AppState>,
    auth: AuthContext,
) -> ApiResult<Json<Vec<Card>>> {
    Ok(Json(Card::list_by_user(&state.db, auth.user_id).await?))
}

/// Cards the caller liked
pub async fn liked_cards(
    State(state): State<AppState>,
    auth: AuthContext,
) -> ApiResult<Json<Vec<Card>>> {
    Ok(Json(Card::list_liked_by(&state.db, auth.user_id).await?))
}

/// Create a card (business or admin)
///
/// The server assigns `bizNumber` and `user_id`.
pub async fn create_card(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CardRequest>,
) -> ApiResult<(StatusCode, Json<Card>)> {
    let req = req.normalized();
    req.validate()?;

    let card = Card::create(&state.db, auth.user_id, req.into()).await?;
    invalidate_card(&state, card.id).await;

    tracing::info!(card_id = %card.id, user_id = %auth.user_id, biz_number = card.biz_number, "Card created");
    state.telemetry.track(
        AnalyticsEvent::new(EventKind::Action, "card.created")
            .with_user(auth.user_id)
            .with_property("cardId", card.id.to_string()),
    );

    Ok((StatusCode::CREATED, Json(card)))
}

/// Update a card (owner or admin)
pub async fn update_card(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
    Json(req): Json<CardRequest>,
) -> ApiResult<Json<Card>> {
    let existing = load_card(&state, id).await?;
    require_owner_or_admin(&auth, existing.user_id)?;
    let req = req.normalized();
    req.validate()?;

    let card = Card::update(&state.db, id, req.into())
        .await?
        .ok_or_else(|| card_not_found(id))?;
    invalidate_card(&state, id).await;

    tracing::info!(card_id = %id, updated_by = %auth.user_id, "Card updated");
    Ok(Json(card))
}

/// Toggle the caller's like
///
/// The owner is notified unless they liked their own card.
pub async fn toggle_like(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Card>> {
    let card = Card::toggle_like(&state.db, id, auth.user_id)
        .await?
        .ok_or_else(|| card_not_found(id))?;
    invalidate_card(&state, id).await;

    let liked = card.is_liked_by(auth.user_id);
    tracing::debug!(card_id = %id, user_id = %auth.user_id, liked, "Like toggled");

    if card.user_id != auth.user_id {
        let (kind, verb) = if liked {
            (NotificationKind::CardLiked, "liked")
        } else {
            (NotificationKind::CardUnliked, "unliked")
        };

        let notification = CreateNotification {
            user_id: card.user_id,
            kind,
            message: format!("Someone {} your card \"{}\"", verb, card.title),
            card_id: Some(card.id),
        };

        // The like already happened; a lost notification is not worth a 500
        if let Err(e) = Notification::create(&state.db, notification).await {
            tracing::warn!(card_id = %id, error = %e, "Could not record like notification");
        }
    }

    state.telemetry.track(
        AnalyticsEvent::new(EventKind::Action, if liked { "card.liked" } else { "card.unliked" })
            .with_user(auth.user_id)
            .with_property("cardId", id.to_string()),
    );

    Ok(Json(card))
}

/// Reassign a business number (admin)
///
/// # Errors
///
/// - `409 Conflict`: Number already in use
/// - `422 Unprocessable Entity`: Number out of range
pub async fn change_biz_number(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<BizNumberRequest>,
) -> ApiResult<Json<Card>> {
    check_biz_number(req.biz_number)?;

    let card = Card::set_biz_number(&state.db, id, req.biz_number)
        .await?
        .ok_or_else(|| card_not_found(id))?;
    invalidate_card(&state, id).await;

    tracing::info!(card_id = %id, biz_number = req.biz_number, "Business number changed");
    Ok(Json(card))
}

/// Delete a card (owner or admin)
///
/// Returns the deleted card.
pub async fn delete_card(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Card>> {
    let existing = load_card(&state, id).await?;
    require_owner_or_admin(&auth, existing.user_id)?;

    let card = Card::delete(&state.db, id)
        .await?
        .ok_or_else(|| card_not_found(id))?;
    invalidate_card(&state, id).await;

    tracing::info!(card_id = %id, deleted_by = %auth.user_id, "Card deleted");
    Ok(Json(card))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn card_body() -> serde_json::Value {
        json!({
            "title": "Bakery",
            "subtitle": "Fresh bread",
            "description": "Open every day from six",
            "phone": "03-1234567",
            "email": "bake@example.com",
            "web": "",
            "address": {
                "country": "Israel",
                "city": "Haifa",
                "street": "Herzl",
                "houseNumber": 3
            }
        })
    }

    #[test]
    fn test_card_request_to_fields() {
        let mut body = card_body();
        body.as_object_mut().unwrap().remove("web");
        let req: CardRequest = serde_json::from_value(body).unwrap();
        assert!(req.validate().is_ok());

        let fields: CardFields = req.into();
        assert_eq!(fields.title, "Bakery");
        assert!(fields.web.is_none());
        assert_eq!(fields.image, Image::default());
    }

    #[test]
    fn test_blank_web_is_dropped() {
        let req: CardRequest = serde_json::from_value(card_body()).unwrap();
        assert!(req.validate().is_err());

        let req = req.normalized();
        assert!(req.web.is_none());
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_invalid_card_fields() {
        let mut body = card_body();
        body["web"] = json!("https://bakery.example.com");
        body["title"] = json!("B");
        body["email"] = json!("not-an-email");

        let req: CardRequest = serde_json::from_value(body).unwrap();
        let errors = req.validate().unwrap_err();
        let fields = errors.field_errors();

        assert!(fields.contains_key("title"));
        assert!(fields.contains_key("email"));
        assert!(!fields.contains_key("web"));
    }

    #[test]
    fn test_biz_number_range() {
        assert!(check_biz_number(1_000_000).is_ok());
        assert!(check_biz_number(9_999_999).is_ok());
        assert!(check_biz_number(999_999).is_err());
        assert!(check_biz_number(10_000_000).is_err());
    }

    #[test]
    fn test_cache_keys() {
        let id = Uuid::nil();
        assert_eq!(card_key(id), "card:00000000-0000-0000-0000-000000000000");
        assert_ne!(card_key(id), ALL_CARDS_KEY);
    }
}
