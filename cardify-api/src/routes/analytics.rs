/// Analytics ingestion
///
/// # Endpoint
///
/// ```text
/// POST /api/analytics/events
/// Content-Type: application/json
///
/// {"events": [{"kind": "page_view", "name": "/cards"}]}
/// ```
///
/// Events are validated, tagged with the caller when a valid token is
/// present, and queued for the background flush. Responds `202 Accepted`.

use crate::{
    app::AppState,
    error::ApiResult,
};
use axum::{extract::State, http::HeaderMap, http::StatusCode, Json};
use cardify_shared::{auth::middleware::authenticate, telemetry::AnalyticsEvent};
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct IngestRequest {
    #[validate(length(min = 1, max = 100, message = "Send between 1 and 100 events"))]
    #[validate(nested)]
    pub events: Vec<AnalyticsEvent>,
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub accepted: usize,
}

pub async fn ingest_events(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<IngestRequest>,
) -> ApiResult<(StatusCode, Json<IngestResponse>)> {
    req.validate()?;

    // Anonymous events are fine, but a signed-in caller can't claim another user
    let caller = authenticate(&headers, state.jwt_secret()).ok();
    let events = req.events.into_iter().map(|mut event| {
        event.user_id = caller.map(|auth| auth.user_id);
        event
    });

    let accepted = events.len();
    state.telemetry.track_many(events);

    tracing::debug!(accepted, pending = state.telemetry.pending(), "Analytics events queued");
    Ok((StatusCode::ACCEPTED, Json(IngestResponse { accepted })))
}
