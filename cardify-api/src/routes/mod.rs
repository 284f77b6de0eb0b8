/// API route handlers, one module per resource
///
/// - `health`: Health check endpoint
/// - `users`: Accounts, login and tokens
/// - `cards`: Business cards and likes
/// - `notifications`: Like notifications
/// - `analytics`: Client event ingestion

pub mod analytics;
pub mod cards;
pub mod health;
pub mod notifications;
pub mod users;
