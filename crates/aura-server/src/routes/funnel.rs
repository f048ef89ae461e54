//! Funnel step endpoints. Each one resolves the visitor once and records a
//! single [`FunnelEvent`] through the shared recorder.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    response::{AppendHeaders, IntoResponse},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use url::Url;

use aura_core::attribution::AttributionSnapshot;
use aura_core::event::{FunnelEvent, LeadForm, PageVisit, PurchaseConfirmation};
use aura_core::record::QuizAnswer;
use aura_core::recorder::RecordOutcome;

use crate::client::Visitor;
use crate::error::AppError;
use crate::state::AppState;

async fn record(
    state: &AppState,
    visitor: Visitor,
    event: FunnelEvent,
) -> Result<impl IntoResponse, AppError> {
    let outcome: RecordOutcome = state.recorder.record(&visitor.ctx, event).await?;
    Ok((
        AppendHeaders(visitor.set_cookies()),
        Json(json!({ "data": outcome })),
    ))
}

/// `POST /api/track/visit`: `{ url, referrer }` of the page just loaded.
///
/// Attribution parameters in `url` are merged into the attribution cookie
/// before the visit is written.
#[tracing::instrument(skip_all)]
pub async fn track_visit(
    State(state): State<Arc<AppState>>,
    mut visitor: Visitor,
    Json(visit): Json<PageVisit>,
) -> Result<impl IntoResponse, AppError> {
    visitor.ctx.attribution = state
        .attribution
        .capture_from_url(&visitor.cookies, &visit.url);
    if visitor.ctx.current_url.is_none() {
        visitor.ctx.current_url = Some(visit.url.clone());
    }
    record(&state, visitor, FunnelEvent::Visit(visit)).await
}

#[tracing::instrument(skip_all)]
pub async fn quiz_start(
    State(state): State<Arc<AppState>>,
    visitor: Visitor,
) -> Result<impl IntoResponse, AppError> {
    record(&state, visitor, FunnelEvent::QuizStart).await
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerBody {
    pub question_id: u32,
    pub answer: QuizAnswer,
}

/// `POST /api/quiz/answer`: `{ questionId, answer }`, answer being a string
/// or a list of strings.
#[tracing::instrument(skip_all)]
pub async fn quiz_answer(
    State(state): State<Arc<AppState>>,
    visitor: Visitor,
    Json(body): Json<AnswerBody>,
) -> Result<impl IntoResponse, AppError> {
    let event = FunnelEvent::QuizAnswer {
        question_id: body.question_id,
        answer: body.answer,
    };
    record(&state, visitor, event).await
}

#[tracing::instrument(skip_all)]
pub async fn quiz_complete(
    State(state): State<Arc<AppState>>,
    visitor: Visitor,
) -> Result<impl IntoResponse, AppError> {
    record(&state, visitor, FunnelEvent::QuizComplete).await
}

/// `POST /api/leads`: `422` with the first failing field when the form is
/// invalid; otherwise the stored lead and the webhook report.
#[tracing::instrument(skip_all)]
pub async fn submit_lead(
    State(state): State<Arc<AppState>>,
    visitor: Visitor,
    Json(form): Json<LeadForm>,
) -> Result<impl IntoResponse, AppError> {
    record(&state, visitor, FunnelEvent::LeadSubmit(form)).await
}

/// `POST /api/purchases`: purchase confirmation relayed by the checkout page.
/// A repeated transaction id is acknowledged as a duplicate.
#[tracing::instrument(skip_all)]
pub async fn confirm_purchase(
    State(state): State<Arc<AppState>>,
    visitor: Visitor,
    Json(confirmation): Json<PurchaseConfirmation>,
) -> Result<impl IntoResponse, AppError> {
    record(&state, visitor, FunnelEvent::Purchase(confirmation)).await
}

#[derive(Debug, Default, Deserialize)]
pub struct CheckoutQuery {
    pub name: Option<String>,
    pub email: Option<String>,
    pub whatsapp: Option<String>,
}

/// Checkout URL prefilled with the buyer's details and attribution.
///
/// Only the digits of the phone number are passed; the provider expects the
/// number without `+`.
pub fn checkout_url(
    base: &str,
    buyer: &CheckoutQuery,
    attribution: &AttributionSnapshot,
) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(base)?;
    {
        let mut query = url.query_pairs_mut();
        let non_empty = |v: &Option<String>| {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        if let Some(name) = non_empty(&buyer.name) {
            query.append_pair("name", &name);
        }
        if let Some(email) = non_empty(&buyer.email) {
            query.append_pair("email", &email);
        }
        let phone: String = buyer
            .whatsapp
            .as_deref()
            .unwrap_or_default()
            .chars()
            .filter(char::is_ascii_digit)
            .collect();
        if !phone.is_empty() {
            query.append_pair("phonenumber", &phone);
        }
        for key in aura_core::attribution::URL_KEYS
            .iter()
            .chain(aura_core::attribution::AD_COOKIES.iter())
        {
            if let Some(value) = attribution.get(key) {
                query.append_pair(key, value);
            }
        }
    }
    Ok(url)
}

/// `GET /api/checkout`: where to send the buyer, and the offer being sold.
#[tracing::instrument(skip_all)]
pub async fn checkout(
    State(state): State<Arc<AppState>>,
    visitor: Visitor,
    Query(buyer): Query<CheckoutQuery>,
) -> Result<impl IntoResponse, AppError> {
    let url = checkout_url(&state.config.checkout_url, &buyer, &visitor.ctx.attribution)
        .map_err(|e| anyhow::anyhow!("invalid checkout url: {e}"))?;
    tracing::info!(session = %visitor.ctx.session, "Checkout started");

    let offer = &state.config.offer;
    Ok((
        AppendHeaders(visitor.set_cookies()),
        Json(json!({
            "data": {
                "url": url.as_str(),
                "offer": {
                    "value": offer.value,
                    "currency": offer.currency,
                    "contentName": offer.content_name,
                    "contentCategory": offer.content_category,
                    "contentIds": offer.content_ids,
                    "paymentMethod": offer.payment_method,
                }
            }
        })),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkout_url_carries_buyer_and_attribution() {
        let buyer = CheckoutQuery {
            name: Some("Ana Ruiz".to_string()),
            email: Some("ana@x.com".to_string()),
            whatsapp: Some("+57 300 123 4567".to_string()),
        };
        let attribution = AttributionSnapshot {
            utm_source: Some("fb".to_string()),
            fbp: Some("fb.1.2.3".to_string()),
            ..Default::default()
        };
        let url = checkout_url(
            "https://pay.hotmart.com/B1?checkoutMode=2",
            &buyer,
            &attribution,
        )
        .unwrap();

        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        let get = |k: &str| pairs.iter().find(|(key, _)| key == k).map(|(_, v)| v.as_str());
        assert_eq!(get("checkoutMode"), Some("2"));
        assert_eq!(get("name"), Some("Ana Ruiz"));
        assert_eq!(get("phonenumber"), Some("573001234567"));
        assert_eq!(get("utm_source"), Some("fb"));
        assert_eq!(get("_fbp"), Some("fb.1.2.3"));
        assert_eq!(get("utm_medium"), None);
    }
}
