//! Batch destinations

use async_trait::async_trait;
use serde_json::json;
use sqlx::PgPool;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::analytics_event::AnalyticsEvent;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// 4xx: the collector refused the payload, retrying won't help
    #[error("Collector rejected batch with status {0}")]
    Rejected(u16),

    #[error("Collector returned status {0}")]
    Server(u16),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Receives flushed batches
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    async fn send(&self, events: &[AnalyticsEvent]) -> Result<(), SinkError>;
}

/// Settings for [`HttpSink`]
#[derive(Debug, Clone)]
pub struct HttpSinkConfig {
    /// Collector URL receiving `POST {"events": [...]}`
    pub endpoint: String,

    /// Total attempts per batch, including the first (default 3)
    pub max_attempts: u32,

    /// Delay before the first retry, doubled after each (default 500ms)
    pub base_backoff: Duration,

    /// Per-request timeout (default 10s)
    pub timeout: Duration,
}

impl HttpSinkConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            max_attempts: 3,
            base_backoff: Duration::from_millis(500),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Posts batches to a remote collector
///
/// Transport errors and 5xx responses are retried with exponential backoff;
/// 4xx responses fail immediately.
pub struct HttpSink {
    client: reqwest::Client,
    config: HttpSinkConfig,
}

impl HttpSink {
    pub fn new(config: HttpSinkConfig) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl EventSink for HttpSink {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn send(&self, events: &[AnalyticsEvent]) -> Result<(), SinkError> {
        let body = json!({ "events": events });
        let max_attempts = self.config.max_attempts.max(1);
        let mut backoff = self.config.base_backoff;
        let mut attempt = 0;

        loop {
            attempt += 1;

            let err = match self.client.post(&self.config.endpoint).json(&body).send().await {
                Ok(resp) if resp.status().is_success() => {
                    debug!(count = events.len(), attempt, "Delivered telemetry batch");
                    return Ok(());
                }
                Ok(resp) if resp.status().is_client_error() => {
                    return Err(SinkError::Rejected(resp.status().as_u16()));
                }
                Ok(resp) => SinkError::Server(resp.status().as_u16()),
                Err(e) => SinkError::Request(e),
            };

            if attempt >= max_attempts {
                return Err(err);
            }

            warn!(
                attempt,
                max_attempts,
                error = %err,
                retry_in_ms = backoff.as_millis() as u64,
                "Telemetry delivery failed, retrying"
            );
            tokio::time::sleep(backoff).await;
            backoff *= 2;
        }
    }
}

/// Writes batches to `analytics_events`
pub struct PgEventSink {
    pool: PgPool,
}

impl PgEventSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventSink for PgEventSink {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn send(&self, events: &[AnalyticsEvent]) -> Result<(), SinkError> {
        let written = AnalyticsEvent::insert_batch(&self.pool, events).await?;
        debug!(written, "Stored telemetry batch");
        Ok(())
    }
}

/// Logs each event; used when no collector is configured
pub struct TracingSink;

#[async_trait]
impl EventSink for TracingSink {
    fn name(&self) -> &'static str {
        "tracing"
    }

    async fn send(&self, events: &[AnalyticsEvent]) -> Result<(), SinkError> {
        for event in events {
            info!(
                target: "cardify::telemetry",
                kind = event.kind.as_str(),
                name = %event.name,
                user_id = ?event.user_id,
                session_id = ?event.session_id,
                properties = %event.properties,
                timestamp = %event.timestamp,
                "telemetry event"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::analytics_event::EventKind;
    use httpmock::prelude::*;

    fn sink_for(server: &MockServer) -> HttpSink {
        HttpSink::new(HttpSinkConfig {
            base_backoff: Duration::from_millis(5),
            ..HttpSinkConfig::new(server.url("/collect"))
        })
        .unwrap()
    }

    fn events() -> Vec<AnalyticsEvent> {
        vec![
            AnalyticsEvent::new(EventKind::PageView, "/cards"),
            AnalyticsEvent::new(EventKind::Action, "like"),
        ]
    }

    #[tokio::test]
    async fn test_http_sink_posts_events_envelope() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/collect")
                    .body_contains("\"events\"")
                    .body_contains("\"page_view\"");
                then.status(202);
            })
            .await;

        sink_for(&server).send(&events()).await.unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_http_sink_retries_server_errors() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/collect");
                then.status(503);
            })
            .await;

        let result = sink_for(&server).send(&events()).await;

        assert!(matches!(result, Err(SinkError::Server(503))));
        assert_eq!(mock.hits_async().await, 3);
    }

    #[tokio::test]
    async fn test_http_sink_does_not_retry_client_errors() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/collect");
                then.status(400);
            })
            .await;

        let result = sink_for(&server).send(&events()).await;

        assert!(matches!(result, Err(SinkError::Rejected(400))));
        assert_eq!(mock.hits_async().await, 1);
    }

    #[tokio::test]
    async fn test_tracing_sink_accepts_everything() {
        assert!(TracingSink.send(&events()).await.is_ok());
        assert_eq!(TracingSink.name(), "tracing");
    }
}
