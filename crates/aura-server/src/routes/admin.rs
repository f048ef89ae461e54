//! Admin reads and webhook configuration, guarded by `AURA_ADMIN_TOKEN`.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use aura_core::store::FunnelMetrics;
use aura_core::webhook::WebhookUrls;

use crate::error::AppError;
use crate::state::AppState;

const DEFAULT_LIMIT: u32 = 100;
const MAX_LIMIT: u32 = 1000;

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// `403` when no admin token is configured, `401` unless the request carries
/// `Authorization: Bearer <token>`.
pub fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    let expected = state
        .config
        .admin_token
        .as_deref()
        .ok_or(AppError::Forbidden)?;
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(AppError::Unauthorized)?;
    if constant_time_eq(presented.trim().as_bytes(), expected.as_bytes()) {
        Ok(())
    } else {
        Err(AppError::Unauthorized)
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<u32>,
}

impl ListQuery {
    fn limit(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }
}

/// `GET /api/admin/leads`: newest first.
#[tracing::instrument(skip_all)]
pub async fn list_leads(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, AppError> {
    require_admin(&state, &headers)?;
    let leads = state.db.list_leads(query.limit()).await?;
    Ok(Json(json!({ "total": leads.len(), "leads": leads })))
}

/// `GET /api/admin/purchases`: newest first.
#[tracing::instrument(skip_all)]
pub async fn list_purchases(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, AppError> {
    require_admin(&state, &headers)?;
    let purchases = state.db.list_purchases(query.limit()).await?;
    Ok(Json(json!({ "total": purchases.len(), "purchases": purchases })))
}

/// `GET /api/admin/metrics`
#[tracing::instrument(skip_all)]
pub async fn metrics(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    require_admin(&state, &headers)?;
    let totals = state.db.funnel_totals().await?;
    Ok(Json(FunnelMetrics::from(totals)))
}

/// `GET /api/webhook-urls`
#[tracing::instrument(skip_all)]
pub async fn get_webhook_urls(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    require_admin(&state, &headers)?;
    Ok(Json(WebhookUrls::load(state.db.as_ref()).await))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookUrlsUpdate {
    pub lead_capture: Option<String>,
    pub purchase: Option<String>,
}

/// A webhook URL is a path on the funnel's own origin or an absolute http(s)
/// URL.
fn check_webhook_url(field: &str, raw: &str) -> Result<String, AppError> {
    let raw = raw.trim();
    if raw.starts_with('/') && !raw.starts_with("//") {
        return Ok(raw.to_string());
    }
    match url::Url::parse(raw) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.host().is_some() => {
            Ok(raw.to_string())
        }
        _ => Err(AppError::BadRequest(format!(
            "{field} must be a path or an http(s) URL"
        ))),
    }
}

/// `PUT /api/webhook-urls`: fields left out keep their current value.
#[tracing::instrument(skip_all)]
pub async fn put_webhook_urls(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(update): Json<WebhookUrlsUpdate>,
) -> Result<impl IntoResponse, AppError> {
    require_admin(&state, &headers)?;
    let mut urls = WebhookUrls::load(state.db.as_ref()).await;
    if let Some(raw) = update.lead_capture.filter(|v| !v.trim().is_empty()) {
        urls.lead_capture = check_webhook_url("leadCapture", &raw)?;
    }
    if let Some(raw) = update.purchase.filter(|v| !v.trim().is_empty()) {
        urls.purchase = check_webhook_url("purchase", &raw)?;
    }
    urls.save(state.db.as_ref()).await?;
    info!(lead_capture = %urls.lead_capture, purchase = %urls.purchase, "Webhook URLs updated");
    Ok(Json(urls))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webhook_urls_must_be_paths_or_http() {
        assert!(check_webhook_url("purchase", "/api/webhooks/purchase").is_ok());
        assert!(check_webhook_url("purchase", "https://hook.make.com/abc").is_ok());
        assert!(check_webhook_url("purchase", "//evil.example/x").is_err());
        assert!(check_webhook_url("purchase", "javascript:alert(1)").is_err());
    }

    #[test]
    fn token_comparison() {
        assert!(constant_time_eq(b"secret", b"secret"));
        assert!(!constant_time_eq(b"secret", b"secreT"));
        assert!(!constant_time_eq(b"secret", b"secrets"));
    }
}
