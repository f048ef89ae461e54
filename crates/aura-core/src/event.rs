//! Funnel events and the normalized payload sent to webhooks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::attribution::AttributionSnapshot;
use crate::config::OfferConfig;
use crate::error::ValidationErrors;
use crate::record::{DeviceInfo, FunnelStep, LeadRecord, PurchaseRecord, QuizAnswer, QuizAnswers};
use crate::session::SessionToken;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageVisit {
    /// Full URL or path of the loaded page, query string included.
    pub url: String,
    pub referrer: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeadForm {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    pub whatsapp: Option<String>,
    #[serde(default)]
    pub consent: bool,
    /// Answers snapshot carried by the client; the stored quiz progress is
    /// used when absent.
    #[serde(alias = "quizAnswers")]
    pub quiz_answers: Option<QuizAnswers>,
}

/// A lead form that passed validation, with normalized fields.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidLead {
    pub name: String,
    pub email: String,
    pub whatsapp: Option<String>,
}

impl LeadForm {
    pub fn validate(&self) -> Result<ValidLead, ValidationErrors> {
        let mut errors = ValidationErrors::default();

        let name = self.name.trim();
        if name.is_empty() {
            errors.push("name", "name is required");
        }

        let email = self.email.trim();
        if email.is_empty() {
            errors.push("email", "email is required");
        } else if !is_valid_email(email) {
            errors.push("email", "email is not valid");
        }

        if !self.consent {
            errors.push("consent", "privacy policy must be accepted");
        }

        if !errors.is_empty() {
            return Err(errors);
        }
        Ok(ValidLead {
            name: name.to_string(),
            email: email.to_string(),
            whatsapp: self.whatsapp.as_deref().and_then(normalize_phone),
        })
    }
}

/// `local@domain.tld` shape: no whitespace, a non-empty part before `@`, and a
/// dot inside the part after it.
pub fn is_valid_email(email: &str) -> bool {
    if email.is_empty() || email.chars().any(char::is_whitespace) {
        return false;
    }
    email
        .char_indices()
        .filter(|(_, c)| *c == '@')
        .any(|(at, _)| {
            let domain = &email[at + 1..];
            at > 0
                && domain
                    .char_indices()
                    .any(|(dot, c)| c == '.' && dot > 0 && dot + 1 < domain.len())
        })
}

/// Reduce a phone number to `+` followed by its digits. Empty input yields
/// `None`.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        None
    } else {
        Some(format!("+{digits}"))
    }
}

/// Purchase confirmation as reported by the checkout provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseConfirmation {
    pub transaction_id: Option<String>,
    pub order_id: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub whatsapp: Option<String>,
    pub payment_method: Option<String>,
    /// Raw provider callback, forwarded untouched.
    pub provider_data: Option<serde_json::Value>,
}

impl PurchaseConfirmation {
    /// Transaction id, defaulting to `ORDER_<unix millis>`.
    pub fn transaction_id_or_default(&self, now: DateTime<Utc>) -> String {
        self.transaction_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("ORDER_{}", now.timestamp_millis()))
    }
}

/// Every funnel stage transition the recorder understands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FunnelEvent {
    Visit(PageVisit),
    QuizStart,
    QuizAnswer {
        question_id: u32,
        answer: QuizAnswer,
    },
    QuizComplete,
    LeadSubmit(LeadForm),
    Purchase(PurchaseConfirmation),
}

impl FunnelEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            FunnelEvent::Visit(_) => "visit",
            FunnelEvent::QuizStart => "quiz_start",
            FunnelEvent::QuizAnswer { .. } => "quiz_answer",
            FunnelEvent::QuizComplete => "quiz_complete",
            FunnelEvent::LeadSubmit(_) => "lead_submit",
            FunnelEvent::Purchase(_) => "purchase",
        }
    }

    /// Where the visitor goes after this event; `None` keeps them in place.
    pub fn next_step(&self) -> Option<FunnelStep> {
        match self {
            FunnelEvent::Visit(_) => None,
            FunnelEvent::QuizStart | FunnelEvent::QuizAnswer { .. } => Some(FunnelStep::Quiz),
            FunnelEvent::QuizComplete => Some(FunnelStep::LeadCapture),
            FunnelEvent::LeadSubmit(_) => Some(FunnelStep::Diagnosis),
            FunnelEvent::Purchase(_) => Some(FunnelStep::ThankYou),
        }
    }
}

/// Request-scoped context shared by every write made for one event.
#[derive(Debug, Clone)]
pub struct ClientContext {
    pub session: SessionToken,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub device: DeviceInfo,
    pub attribution: AttributionSnapshot,
    pub current_url: Option<String>,
    pub referrer: Option<String>,
}

impl ClientContext {
    pub fn new(session: SessionToken) -> Self {
        Self {
            session,
            client_ip: None,
            user_agent: None,
            device: DeviceInfo::default(),
            attribution: AttributionSnapshot::default(),
            current_url: None,
            referrer: None,
        }
    }
}

/// JSON body delivered to lead-capture and purchase webhooks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub name: Option<String>,
    pub email: Option<String>,
    pub whatsapp: Option<String>,

    pub session_id: SessionToken,
    #[serde(rename = "session_id")]
    pub session_id_snake: SessionToken,
    pub ip: Option<String>,
    pub country_code: Option<String>,
    pub user_agent: Option<String>,
    pub referrer: Option<String>,
    pub current_url: Option<String>,
    pub timestamp: DateTime<Utc>,

    pub utm_source: Option<String>,
    pub utm_medium: Option<String>,
    pub utm_campaign: Option<String>,
    pub utm_content: Option<String>,
    pub utm_term: Option<String>,
    pub fbclid: Option<String>,
    #[serde(rename = "_fbc")]
    pub fbc: Option<String>,
    #[serde(rename = "_fbp")]
    pub fbp: Option<String>,

    pub quiz_answers: QuizAnswers,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub business_type: Option<String>,

    pub event_type: String,
    pub event_time: i64,
    pub value: f64,
    pub currency: String,
    pub content_name: String,
    pub content_category: String,
    pub content_ids: Vec<String>,
    pub funnel_step: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub lead_source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hotmart_data: Option<serde_json::Value>,
}

impl WebhookPayload {
    fn base(ctx: &ClientContext, offer: &OfferConfig, event_type: &str, at: DateTime<Utc>) -> Self {
        let a = &ctx.attribution;
        Self {
            name: None,
            email: None,
            whatsapp: None,
            session_id: ctx.session.clone(),
            session_id_snake: ctx.session.clone(),
            ip: ctx.client_ip.clone(),
            country_code: None,
            user_agent: ctx.user_agent.clone(),
            referrer: ctx.referrer.clone(),
            current_url: ctx.current_url.clone(),
            timestamp: at,
            utm_source: a.utm_source.clone(),
            utm_medium: a.utm_medium.clone(),
            utm_campaign: a.utm_campaign.clone(),
            utm_content: a.utm_content.clone(),
            utm_term: a.utm_term.clone(),
            fbclid: a.fbclid.clone(),
            fbc: a.fbc.clone(),
            fbp: a.fbp.clone(),
            quiz_answers: QuizAnswers::new(),
            bucket_id: None,
            business_type: None,
            event_type: event_type.to_string(),
            event_time: at.timestamp(),
            value: offer.value,
            currency: offer.currency.clone(),
            content_name: offer.content_name.clone(),
            content_category: offer.content_category.clone(),
            content_ids: offer.content_ids.clone(),
            funnel_step: String::new(),
            lead_source: None,
            transaction_id: None,
            order_id: None,
            payment_method: None,
            hotmart_data: None,
        }
    }

    pub fn for_lead(lead: &LeadRecord, ctx: &ClientContext, offer: &OfferConfig) -> Self {
        let mut payload = Self::base(ctx, offer, lead.event_type.as_str(), lead.created_at);
        payload.name = Some(lead.name.clone());
        payload.email = Some(lead.email.clone());
        payload.whatsapp = lead.whatsapp.clone();
        payload.ip = lead.client_ip.clone();
        payload.country_code = lead.country_code.clone();
        payload.quiz_answers = lead.quiz_answers.clone();
        payload.bucket_id = Some(lead.bucket_id.clone());
        payload.business_type = Some(lead.business_type.clone());
        payload.value = lead.value;
        payload.currency = lead.currency.clone();
        payload.funnel_step = FunnelStep::LeadCapture.webhook_marker().to_string();
        payload.lead_source = Some(lead.attribution.lead_source().to_string());
        payload
    }

    pub fn for_purchase(
        purchase: &PurchaseRecord,
        ctx: &ClientContext,
        offer: &OfferConfig,
        provider_data: Option<serde_json::Value>,
    ) -> Self {
        let mut payload = Self::base(ctx, offer, purchase.event_type.as_str(), purchase.created_at);
        payload.name = purchase.name.clone();
        payload.email = purchase.email.clone();
        payload.whatsapp = purchase.whatsapp.clone();
        payload.ip = purchase.client_ip.clone();
        payload.country_code = purchase.country_code.clone();
        payload.quiz_answers = purchase.quiz_answers.clone();
        payload.value = purchase.value;
        payload.currency = purchase.currency.clone();
        payload.funnel_step = FunnelStep::ThankYou.webhook_marker().to_string();
        payload.transaction_id = Some(purchase.transaction_id.clone());
        payload.order_id = Some(purchase.order_id.clone());
        payload.payment_method = Some(purchase.payment_method.clone());
        payload.hotmart_data = provider_data;
        payload
    }
}
