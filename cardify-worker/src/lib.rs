//! # Cardify Worker Library
//!
//! Scheduled database backups.
//!
//! ## Modules
//!
//! - `backup`: Dump, restore, list and prune dump files
//! - `scheduler`: Interval loop with telemetry reporting
//! - `config`: Environment configuration

pub mod backup;
pub mod config;
pub mod scheduler;
