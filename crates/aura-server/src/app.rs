use std::sync::Arc;

use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{routes, state::AppState};

/// Permissive CORS when no origins are configured; otherwise only the listed
/// origins, with credentials so the session cookie travels cross-origin.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring unparseable CORS origin");
                None
            }
        })
        .collect();
    if allowed.is_empty() {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }
    CorsLayer::new()
        .allow_origin(allowed)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

/// Construct the Axum [`Router`] with all routes and middleware attached.
pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(routes::health::health))
        .route("/api/session", get(routes::session::session))
        .route("/api/get-client-ip", get(routes::session::client_ip))
        .route("/api/track/visit", post(routes::funnel::track_visit))
        .route("/api/quiz/start", post(routes::funnel::quiz_start))
        .route("/api/quiz/answer", post(routes::funnel::quiz_answer))
        .route("/api/quiz/complete", post(routes::funnel::quiz_complete))
        .route("/api/leads", post(routes::funnel::submit_lead))
        .route("/api/purchases", post(routes::funnel::confirm_purchase))
        .route("/api/checkout", get(routes::funnel::checkout))
        .route(
            "/api/webhooks/lead-capture",
            post(routes::webhooks::receive_lead_capture),
        )
        .route(
            "/api/webhooks/purchase",
            post(routes::webhooks::receive_purchase),
        )
        .route("/api/webhooks/proxy", post(routes::webhooks::proxy))
        .route("/api/admin/leads", get(routes::admin::list_leads))
        .route("/api/admin/purchases", get(routes::admin::list_purchases))
        .route("/api/admin/metrics", get(routes::admin::metrics))
        .route(
            "/api/webhook-urls",
            get(routes::admin::get_webhook_urls).put(routes::admin::put_webhook_urls),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}
