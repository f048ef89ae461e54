use std::sync::Arc;

use axum::{extract::State, response::AppendHeaders, response::IntoResponse, Json};
use serde_json::json;

use aura_core::geo::GeoResolver;

use crate::client::{ClientIp, Visitor};
use crate::state::AppState;

/// `GET /api/session`: the visitor's session token, its geolocation once
/// resolved, and the current attribution snapshot. Mints the session cookie
/// on first contact.
#[tracing::instrument(skip_all)]
pub async fn session(State(state): State<Arc<AppState>>, visitor: Visitor) -> impl IntoResponse {
    let ctx = &visitor.ctx;
    let body = json!({
        "data": {
            "sessionId": ctx.session,
            "geo": state.geo.cached(&ctx.session),
            "attribution": ctx.attribution,
            "leadSource": ctx.attribution.lead_source(),
            "device": ctx.device,
        }
    });
    (AppendHeaders(visitor.set_cookies()), Json(body))
}

/// `GET /api/get-client-ip`
pub async fn client_ip(ClientIp(ip): ClientIp) -> impl IntoResponse {
    Json(json!({ "ip": ip }))
}
