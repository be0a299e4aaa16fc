use axum::{
    extract::ConnectInfo,
    http::{header, HeaderValue, Method, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Router,
};
use axum_prometheus::PrometheusMetricLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use std::net::SocketAddr;
use std::sync::Arc;

use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};

use companion_server::config::Config;
use companion_server::state::AppState;
use companion_server::websocket::Hub;
use companion_server::{db, handlers, websocket};

/// Middleware that restricts access to the metrics endpoint to loopback connections only.
///
/// When `ConnectInfo` is not available (e.g. in direct oneshot tests), access is
/// denied — the metrics route is not registered in the test app anyway, so this
/// branch is unreachable in practice.
async fn require_loopback(
    connect_info: Option<ConnectInfo<SocketAddr>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    match connect_info {
        Some(ConnectInfo(addr)) if addr.ip().is_loopback() => next.run(req).await,
        Some(_) => StatusCode::NOT_FOUND.into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[tokio::main]
async fn main() {
    // Initialize tracing — JSON in production, human-readable in dev.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "companion_server=info,tower_http=info,sqlx=warn"
            .parse()
            .unwrap()
    });

    if std::env::var("APP_ENV").as_deref() == Ok("production") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!("🚀 Companion Server starting...");

    let config = Config::from_env();
    info!("📝 Configuration loaded");

    // Create database connection pool
    let pool = db::create_pool(&config.database_url)
        .await
        .expect("Failed to create database pool");

    // Apply the idempotent schema on startup.
    db::migrate(&pool)
        .await
        .expect("Failed to run database migrations");
    info!("✅ Database schema applied");

    // Run health check
    db::health_check(&pool)
        .await
        .expect("Database health check failed");
    info!("✅ Database health check passed");

    // CORS: permissive in dev, origin-restricted in production.
    // Set APP_ENV=production and ALLOWED_ORIGINS=https://your-domain.com.
    let cors = if config.is_dev {
        info!("🔓 CORS: permissive (dev mode)");
        CorsLayer::permissive()
    } else {
        let origins: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        if origins.is_empty() {
            tracing::warn!(
                "🔒 CORS: no ALLOWED_ORIGINS configured — all cross-origin requests will be denied"
            );
        } else {
            info!(
                "🔒 CORS: production mode, allowing origins: {:?}",
                config.allowed_origins
            );
        }
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::POST, Method::DELETE])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
    };

    let addr = config.server_addr();

    let app_state = AppState {
        pool,
        session_secret: Arc::from(config.session_secret.as_str()),
        hub: Hub::spawn(),
    };

    // Prometheus metrics layer
    let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();

    // ── Rate limiting ─────────────────────────────────────────────────────────
    // Global limit: 10 requests/second per IP, burst of 20.
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .finish()
            .expect("Invalid global governor configuration"),
    );

    // Stricter limit for authentication endpoints: 2 requests/second per IP,
    // burst of 5. Nested into a sub-router so that `.route_layer()` applies
    // only to these routes.
    let auth_governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(2)
            .burst_size(5)
            .finish()
            .expect("Invalid auth governor configuration"),
    );

    let auth_router = Router::new()
        .route("/api/auth/register", post(handlers::auth::register))
        .route("/api/auth/login", post(handlers::auth::login))
        .route_layer(GovernorLayer {
            config: auth_governor_conf,
        });

    // Build router
    let app = Router::new()
        // Health check + metrics
        .route("/api/health", get(handlers::health_check))
        .route(
            "/metrics",
            get(move || async move { metric_handle.render() })
                .route_layer(middleware::from_fn(require_loopback)),
        )
        // Auth routes (stricter per-IP rate limit, nested via sub-router)
        .merge(auth_router)
        // Conversation routes (protected)
        .route(
            "/api/conversations",
            get(handlers::conversations::list_conversations),
        )
        .route(
            "/api/conversations",
            post(handlers::conversations::create_conversation),
        )
        .route(
            "/api/conversations/:id/messages",
            get(handlers::conversations::list_messages),
        )
        // Event routes (protected)
        .route("/api/events", post(handlers::events::create_event))
        // Join-request routes (protected, nested under event)
        .route(
            "/api/events/:id/chat/requests",
            post(handlers::join_requests::request_join),
        )
        .route(
            "/api/events/:id/chat/requests/:user_id/approve",
            post(handlers::join_requests::approve_join),
        )
        .route(
            "/api/events/:id/chat/requests/:user_id/deny",
            post(handlers::join_requests::deny_join),
        )
        .route(
            "/api/events/:id/chat/members/:user_id",
            delete(handlers::join_requests::remove_member),
        )
        // WebSocket gateway
        .route("/api/ws", get(websocket::websocket_handler))
        // ── Global rate limit (10 req/s per IP, burst 20) ──────────────────
        .layer(GovernorLayer {
            config: governor_conf,
        })
        // ── Security response headers ──────────────────────────────────────
        .layer(SetResponseHeaderLayer::if_not_present(
            header::HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::HeaderName::from_static("x-frame-options"),
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::HeaderName::from_static("referrer-policy"),
            HeaderValue::from_static("strict-origin-when-cross-origin"),
        ))
        // ── Prometheus + CORS ──────────────────────────────────────────────
        .layer(prometheus_layer)
        .layer(cors)
        .with_state(app_state);

    // Start server
    info!("🎧 Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    // `into_make_service_with_connect_info` populates `ConnectInfo<SocketAddr>` in
    // request extensions, needed by:
    //  - GovernorLayer's PeerIpKeyExtractor (per-IP rate limiting)
    //  - require_loopback middleware on /metrics
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Server failed to start");
}
