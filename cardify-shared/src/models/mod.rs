/// Database models for Cardify
///
/// Each model owns its SQL: static async functions take a `&PgPool` and
/// return `sqlx::Error` on failure.
///
/// - `common`: name, image and address value types stored as JSONB
/// - `user`: accounts, role flags and login lockout
/// - `card`: business cards and likes
/// - `notification`: like notifications for card owners
/// - `analytics_event`: client and server telemetry events

pub mod analytics_event;
pub mod card;
pub mod common;
pub mod notification;
pub mod user;
