pub mod admin;
pub mod auth;
pub mod chat;
pub mod error;
pub mod event;
pub mod ingest;
pub mod jwks;
pub mod lead;

use axum::http::{header, HeaderValue, Method};
use axum::routing::{delete, get, patch, post, put};
use axum::{Json, Router};
use tower_http::cors::{AllowOrigin, CorsLayer};

use spark_domain::config::AdminConfig;

use crate::state::AppState;

/// Build the full API router.
///
/// Two surfaces with separate CORS policies:
/// - **widget** — publishable-key auth, wildcard origins, credentials
///   off (security comes from rate limiting + IP-bound sessions, not
///   key secrecy)
/// - **admin** — JWT auth, configured origin list, credentials on
pub fn router(state: AppState) -> Router {
    let widget = Router::new()
        .route("/spark/chat", post(chat::chat))
        .route("/spark/lead", post(lead::capture_lead))
        .route("/spark/event", post(event::record_event))
        .route("/spark/ingest/text", post(ingest::ingest_text))
        .route("/spark/ingest/url", post(ingest::ingest_url))
        .layer(widget_cors());

    let admin = Router::new()
        .route("/spark/admin/me", get(admin::profile::me))
        .route("/spark/admin/settings", patch(admin::profile::update_settings))
        .route("/spark/admin/onboarding", get(admin::profile::get_onboarding))
        .route(
            "/spark/admin/onboarding",
            patch(admin::profile::update_onboarding),
        )
        .route(
            "/spark/admin/orientation",
            get(admin::profile::get_orientation),
        )
        .route(
            "/spark/admin/orientation",
            put(admin::profile::set_orientation),
        )
        .route("/spark/admin/conversations", get(admin::conversations::list))
        .route(
            "/spark/admin/conversations/:id",
            get(admin::conversations::detail),
        )
        .route("/spark/admin/leads", get(admin::leads::list))
        .route("/spark/admin/leads/export", get(admin::leads::export_csv))
        .route("/spark/admin/leads/:id", patch(admin::leads::update))
        .route("/spark/admin/knowledge", get(admin::knowledge::list))
        .route("/spark/admin/knowledge", post(admin::knowledge::create))
        .route("/spark/admin/knowledge/stats", get(admin::knowledge::stats))
        .route("/spark/admin/knowledge/:id", get(admin::knowledge::get))
        .route("/spark/admin/knowledge/:id", patch(admin::knowledge::update))
        .route("/spark/admin/knowledge/:id", delete(admin::knowledge::delete))
        .route("/spark/admin/metrics/summary", get(admin::metrics::summary))
        .route(
            "/spark/admin/metrics/timeseries",
            get(admin::metrics::timeseries),
        )
        .layer(admin_cors(&state.config.admin));

    Router::new()
        .route("/health", get(health))
        .merge(widget)
        .merge(admin)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// `GET /health` — liveness, no auth.
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok", "service": "spark" }))
}

/// Widget CORS: any origin, credentials off. The key is publishable by
/// design and embedded pages live on arbitrary customer domains.
fn widget_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::HeaderName::from_static("x-spark-key"),
        ])
}

/// Admin CORS: exact configured origins with credentials on.
fn admin_cors(cfg: &AdminConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = cfg
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(hv) => Some(hv),
            Err(_) => {
                tracing::warn!(origin = %origin, "invalid admin CORS origin, skipping");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}
