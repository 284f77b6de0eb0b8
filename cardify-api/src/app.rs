/// Application state and router builder
///
/// # Example
///
/// ```no_run
/// use cardify_api::{app::{build_router, AppState}, config::Config};
/// use sqlx::PgPool;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = Config::from_env()?;
/// let pool = PgPool::connect(&config.database.url).await?;
/// let state = AppState::new(pool, config);
/// let app = build_router(state);
/// # Ok(())
/// # }
/// ```

use crate::{
    config::Config,
    middleware::{
        rate_limit::{rate_limit_layer, RateLimiter},
        roles::{require_admin_layer, require_business_layer},
        security::SecurityHeadersLayer,
    },
    routes,
};
use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, patch, post},
    Router,
};
use cardify_shared::{
    auth::middleware::create_jwt_middleware,
    cache::{CacheConfig, CacheManager},
    telemetry::{BatcherConfig, EventBatcher},
};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

/// Shared application state
///
/// Cloned into every handler; all members are cheap handles.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: PgPool,

    /// Application configuration
    pub config: Arc<Config>,

    /// Read cache for cards
    pub cache: Arc<CacheManager>,

    /// Analytics queue, drained by a background task
    pub telemetry: EventBatcher,

    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    /// Builds state with a memory-only cache
    pub fn new(db: PgPool, config: Config) -> Self {
        let cache = CacheManager::new(cache_config(&config));
        Self::with_cache(db, config, cache)
    }

    /// Builds state around an already configured cache
    pub fn with_cache(db: PgPool, config: Config, cache: CacheManager) -> Self {
        let telemetry = EventBatcher::new(BatcherConfig {
            max_batch_size: config.analytics.batch_size,
            flush_interval: config.analytics.flush_interval,
            ..BatcherConfig::default()
        });
        let rate_limiter = RateLimiter::new(config.api.rate_limit_per_minute);

        Self {
            db,
            cache: Arc::new(cache),
            telemetry,
            rate_limiter: Arc::new(rate_limiter),
            config: Arc::new(config),
        }
    }

    /// Gets JWT secret for token operations
    pub fn jwt_secret(&self) -> &str {
        &self.config.jwt.secret
    }
}

/// Memory tier sizing taken from the configuration
pub fn cache_config(config: &Config) -> CacheConfig {
    CacheConfig {
        max_entries: config.cache.max_entries,
        default_ttl: Some(config.cache.ttl),
    }
}

/// Builds the complete router with all routes and middleware
///
/// # Architecture
///
/// ```text
/// /
/// ├── GET /health
/// └── /api
///     ├── /users
///     │   ├── POST   /            register
///     │   ├── POST   /login
///     │   ├── POST   /refresh
///     │   ├── GET    /            admin
///     │   └── GET|PUT|PATCH|DELETE /:id    owner or admin
///     ├── /cards
///     │   ├── GET    /            public, cached
///     │   ├── GET    /:id         public, cached
///     │   ├── GET    /my-cards    authenticated
///     │   ├── GET    /liked       authenticated
///     │   ├── POST   /            business
///     │   ├── PUT    /:id         owner or admin
///     │   ├── PATCH  /:id         like toggle
///     │   ├── PATCH  /biz-number/:id   admin
///     │   └── DELETE /:id         owner or admin
///     ├── /notifications          authenticated
///     └── POST /analytics/events  public
/// ```
///
/// # Middleware Stack
///
/// Outermost first: security headers, CORS, tracing, rate limiting. JWT
/// authentication and role gates are attached per route group with
/// `route_layer`, so unknown paths still answer 404.
pub fn build_router(state: AppState) -> Router {
    let jwt = from_fn(create_jwt_middleware(state.jwt_secret().to_string()));

    // Users
    let user_public = Router::new()
        .route("/", post(routes::users::register))
        .route("/login", post(routes::users::login))
        .route("/refresh", post(routes::users::refresh));

    let user_admin = Router::new()
        .route("/", get(routes::users::list_users))
        .route_layer(from_fn(require_admin_layer))
        .route_layer(jwt.clone());

    let user_private = Router::new()
        .route(
            "/:id",
            get(routes::users::get_user)
                .put(routes::users::update_user)
                .patch(routes::users::toggle_business)
                .delete(routes::users::delete_user),
        )
        .route_layer(jwt.clone());

    // Cards
    let card_public = Router::new()
        .route("/", get(routes::cards::list_cards))
        .route("/:id", get(routes::cards::get_card));

    let card_business = Router::new()
        .route("/", post(routes::cards::create_card))
        .route_layer(from_fn(require_business_layer))
        .route_layer(jwt.clone());

    let card_admin = Router::new()
        .route("/biz-number/:id", patch(routes::cards::change_biz_number))
        .route_layer(from_fn(require_admin_layer))
        .route_layer(jwt.clone());

    let card_private = Router::new()
        .route("/my-cards", get(routes::cards::my_cards))
        .route("/liked", get(routes::cards::liked_cards))
        .route(
            "/:id",
            axum::routing::put(routes::cards::update_card)
                .patch(routes::cards::toggle_like)
                .delete(routes::cards::delete_card),
        )
        .route_layer(jwt.clone());

    // Notifications
    let notification_routes = Router::new()
        .route("/", get(routes::notifications::list_notifications))
        .route("/read-all", patch(routes::notifications::mark_all_read))
        .route("/:id/read", patch(routes::notifications::mark_read))
        .route_layer(jwt);

    // Analytics ingestion is open so signed-out visitors are counted too
    let analytics_routes =
        Router::new().route("/events", post(routes::analytics::ingest_events));

    let api_routes = Router::new()
        .nest(
            "/users",
            user_public.merge(user_admin).merge(user_private),
        )
        .nest(
            "/cards",
            card_public
                .merge(card_business)
                .merge(card_admin)
                .merge(card_private),
        )
        .nest("/notifications", notification_routes)
        .nest("/analytics", analytics_routes)
        .layer(from_fn_with_state(state.clone(), rate_limit_layer));

    Router::new()
        .route("/health", get(routes::health::health_check))
        .nest("/api", api_routes)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_layer(&state.config))
        .layer(SecurityHeadersLayer::new(state.config.api.production))
        .with_state(state)
}

fn cors_layer(config: &Config) -> CorsLayer {
    if config.allows_any_origin() {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = config
        .api
        .cors_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static("x-auth-token"),
        ])
        .allow_credentials(true)
        .max_age(Duration::from_secs(3600))
}
