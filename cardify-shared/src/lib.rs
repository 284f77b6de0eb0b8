//! # Cardify Shared Library
//!
//! This crate contains shared types, utilities, and business logic used across
//! the Cardify API server and the backup worker.
//!
//! ## Module Organization
//!
//! - `models`: Database models (users, cards, notifications, analytics events)
//! - `auth`: Authentication and role-based authorization
//! - `db`: Connection pool and migrations
//! - `cache`: Two-tier cache manager with tag invalidation
//! - `redis`: Redis client used by the persistent cache tier
//! - `telemetry`: Analytics event batching and delivery

pub mod auth;
pub mod cache;
pub mod db;
pub mod models;
pub mod redis;
pub mod telemetry;

/// Current version of the Cardify shared library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
