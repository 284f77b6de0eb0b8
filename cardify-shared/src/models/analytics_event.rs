/// Analytics, error and performance events
///
/// Clients post these in batches; the server and the worker produce their
/// own. Rows land in `analytics_events` through [`AnalyticsEvent::insert_batch`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;
use validator::Validate;

/// Event category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    PageView,
    Action,
    Error,
    Performance,
    Custom,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::PageView => "page_view",
            EventKind::Action => "action",
            EventKind::Error => "error",
            EventKind::Performance => "performance",
            EventKind::Custom => "custom",
        }
    }
}

/// One telemetry event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsEvent {
    pub kind: EventKind,

    #[validate(length(min = 1, max = 128))]
    pub name: String,

    #[validate(length(max = 128))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,

    #[serde(default = "empty_object")]
    pub properties: JsonValue,

    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

fn empty_object() -> JsonValue {
    JsonValue::Object(Map::new())
}

impl AnalyticsEvent {
    pub fn new(kind: EventKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            session_id: None,
            user_id: None,
            properties: empty_object(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Sets one property; non-object `properties` are replaced
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        if !self.properties.is_object() {
            self.properties = empty_object();
        }
        if let JsonValue::Object(map) = &mut self.properties {
            map.insert(key.into(), value.into());
        }
        self
    }

    /// Writes a batch in one multi-row INSERT
    ///
    /// Returns the number of rows written.
    pub async fn insert_batch(pool: &PgPool, events: &[AnalyticsEvent]) -> Result<u64, sqlx::Error> {
        if events.is_empty() {
            return Ok(0);
        }

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO analytics_events (kind, name, session_id, user_id, properties, occurred_at) ",
        );

        builder.push_values(events, |mut row, event| {
            row.push_bind(event.kind.as_str())
                .push_bind(&event.name)
                .push_bind(&event.session_id)
                .push_bind(event.user_id)
                .push_bind(&event.properties)
                .push_bind(event.timestamp);
        });

        let result = builder.build().execute(pool).await?;
        Ok(result.rows_affected())
    }
}
