//! Telemetry batching pipeline
//!
//! Analytics, error and performance events are buffered by an
//! [`EventBatcher`] and handed to an [`EventSink`] in batches: when the
//! buffer reaches the batch size, on a fixed interval, and once more at
//! shutdown. A batch the sink can't take is logged and dropped.
//!
//! # Example
//!
//! ```no_run
//! use cardify_shared::models::analytics_event::{AnalyticsEvent, EventKind};
//! use cardify_shared::telemetry::{BatcherConfig, EventBatcher, TracingSink};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() {
//! let batcher = EventBatcher::new(BatcherConfig::default());
//! let cancel = CancellationToken::new();
//! let handle = batcher.spawn(Arc::new(TracingSink), cancel.clone());
//!
//! batcher.track(AnalyticsEvent::new(EventKind::PageView, "/cards"));
//!
//! cancel.cancel();
//! handle.await.ok();
//! # }
//! ```

pub mod batcher;
pub mod sink;

pub use crate::models::analytics_event::{AnalyticsEvent, EventKind};
pub use batcher::{BatcherConfig, BatcherStats, EventBatcher};
pub use sink::{EventSink, HttpSink, HttpSinkConfig, PgEventSink, SinkError, TracingSink};
