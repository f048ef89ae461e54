//! Default webhook receivers and the same-origin proxy for cross-origin
//! webhook targets.

use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, Json};
use serde_json::{json, Value};
use tracing::{info, warn};
use url::Url;

use aura_core::webhook::{ProxyRequest, WebhookUrls};

use crate::client::ClientIp;
use crate::error::AppError;
use crate::state::AppState;
use crate::transport::{check_target, forward, ProxyError};

fn text_field<'a>(payload: &'a Value, key: &str) -> Option<&'a str> {
    payload.get(key).and_then(Value::as_str)
}

/// `POST /api/webhooks/lead-capture`
#[tracing::instrument(skip_all)]
pub async fn receive_lead_capture(
    ClientIp(client_ip): ClientIp,
    Json(payload): Json<Value>,
) -> impl IntoResponse {
    let email = text_field(&payload, "email");
    let event_type = text_field(&payload, "eventType");
    info!(
        email = ?email,
        event_type = ?event_type,
        session = ?text_field(&payload, "sessionId"),
        client_ip = ?client_ip,
        "Lead capture webhook received"
    );
    Json(json!({
        "success": true,
        "message": "Lead capture webhook processed successfully",
        "data": {
            "email": email,
            "eventType": event_type,
            "clientIP": client_ip,
        }
    }))
}

/// `POST /api/webhooks/purchase`
#[tracing::instrument(skip_all)]
pub async fn receive_purchase(
    ClientIp(client_ip): ClientIp,
    Json(payload): Json<Value>,
) -> impl IntoResponse {
    let email = text_field(&payload, "email");
    let transaction_id = text_field(&payload, "transactionId");
    let event_type = text_field(&payload, "eventType");
    info!(
        email = ?email,
        transaction_id = ?transaction_id,
        client_ip = ?client_ip,
        "Purchase webhook received"
    );
    Json(json!({
        "success": true,
        "message": "Purchase webhook processed successfully",
        "data": {
            "email": email,
            "transactionId": transaction_id,
            "eventType": event_type,
            "clientIP": client_ip,
        }
    }))
}

/// `POST /api/webhooks/proxy`: `{ target, payload }`.
///
/// Forwards `payload` to `target` when it is one of the configured webhook
/// URLs and a public http(s) endpoint. Answers `{ success, status }` with the
/// target's response status.
#[tracing::instrument(skip_all)]
pub async fn proxy(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ProxyRequest>,
) -> Result<impl IntoResponse, AppError> {
    let urls = WebhookUrls::load(state.db.as_ref()).await;
    let configured = Url::parse(request.target.trim())
        .map(|url| state.webhooks.is_configured_target(&urls, &url))
        .unwrap_or(false);
    if !configured {
        warn!(target = %request.target, "Proxy target is not a configured webhook URL");
        return Err(AppError::TargetRejected(
            "target is not a configured webhook URL".to_string(),
        ));
    }

    let target = check_target(&request.target).await.map_err(|e| match e {
        ProxyError::Rejected(msg) => {
            warn!(target = %request.target, reason = %msg, "Proxy target rejected");
            AppError::TargetRejected(msg)
        }
        ProxyError::Upstream(msg) => AppError::Upstream(msg),
    })?;

    let status = forward(&target, &request.payload, state.config.webhook_timeout())
        .await
        .map_err(|e| AppError::Upstream(e.to_string()))?;
    let success = (200..300).contains(&status);
    info!(target = %target.url, status, success, "Webhook proxied");

    Ok(Json(json!({ "success": success, "status": status })))
}
