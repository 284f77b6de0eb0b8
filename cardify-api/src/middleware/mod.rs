/// Middleware for the API server
///
/// - `security`: security response headers
/// - `rate_limit`: per-caller token bucket
/// - `roles`: admin and business gates layered after authentication

pub mod rate_limit;
pub mod roles;
pub mod security;
