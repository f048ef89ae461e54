use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::attribution::AttributionSnapshot;
use crate::session::SessionToken;

/// A selected option, or several for multi-select questions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QuizAnswer {
    Single(String),
    Multiple(Vec<String>),
}

impl QuizAnswer {
    /// The first selected option.
    pub fn primary(&self) -> Option<&str> {
        match self {
            QuizAnswer::Single(option) => Some(option.as_str()),
            QuizAnswer::Multiple(options) => options.first().map(String::as_str),
        }
    }
}

/// Question id → answer.
pub type QuizAnswers = BTreeMap<u32, QuizAnswer>;

/// Question whose answer picks the diagnosis bucket.
pub const BUCKET_QUESTION: u32 = 3;
/// Question whose answer describes the visitor's business.
pub const BUSINESS_TYPE_QUESTION: u32 = 1;

pub fn bucket_id(answers: &QuizAnswers) -> String {
    answer_or_unknown(answers, BUCKET_QUESTION)
}

pub fn business_type(answers: &QuizAnswers) -> String {
    answer_or_unknown(answers, BUSINESS_TYPE_QUESTION)
}

fn answer_or_unknown(answers: &QuizAnswers, question: u32) -> String {
    answers
        .get(&question)
        .and_then(QuizAnswer::primary)
        .unwrap_or("unknown")
        .to_string()
}

/// User-agent derived device details.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub browser: Option<String>,
    pub os: Option<String>,
    pub device_type: Option<String>,
}

/// One row per session; page views are counted on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitorRecord {
    pub session_token: SessionToken,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub referrer: Option<String>,
    pub current_path: String,
    pub first_visit: DateTime<Utc>,
    pub last_visit: DateTime<Utc>,
    pub page_views: i64,
    pub attribution: AttributionSnapshot,
    pub country_code: Option<String>,
    #[serde(flatten)]
    pub device: DeviceInfo,
}

/// Input to a visitor upsert.
#[derive(Debug, Clone)]
pub struct VisitUpsert {
    pub session_token: SessionToken,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub referrer: Option<String>,
    pub current_path: String,
    pub attribution: AttributionSnapshot,
    pub country_code: Option<String>,
    pub device: DeviceInfo,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizProgressRecord {
    pub session_token: SessionToken,
    pub started: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub answers: QuizAnswers,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConversionEvent {
    InitiateCheckout,
    Purchase,
}

impl ConversionEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversionEvent::InitiateCheckout => "InitiateCheckout",
            ConversionEvent::Purchase => "Purchase",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "InitiateCheckout" => Some(ConversionEvent::InitiateCheckout),
            "Purchase" => Some(ConversionEvent::Purchase),
            _ => None,
        }
    }
}

/// Append-only lead capture row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadRecord {
    pub id: String,
    pub session_token: SessionToken,
    pub name: String,
    pub email: String,
    pub whatsapp: Option<String>,
    pub client_ip: Option<String>,
    pub country_code: Option<String>,
    pub user_agent: Option<String>,
    pub current_url: Option<String>,
    pub attribution: AttributionSnapshot,
    pub quiz_answers: QuizAnswers,
    pub bucket_id: String,
    pub business_type: String,
    pub event_type: ConversionEvent,
    pub value: f64,
    pub currency: String,
    pub created_at: DateTime<Utc>,
}

/// Purchase confirmation row. `transaction_id` is unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseRecord {
    pub id: String,
    pub session_token: SessionToken,
    pub transaction_id: String,
    pub order_id: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub whatsapp: Option<String>,
    pub client_ip: Option<String>,
    pub country_code: Option<String>,
    pub user_agent: Option<String>,
    pub attribution: AttributionSnapshot,
    pub quiz_answers: QuizAnswers,
    pub payment_method: String,
    pub event_type: ConversionEvent,
    pub value: f64,
    pub currency: String,
    pub created_at: DateTime<Utc>,
}

/// Steps of the funnel a visitor is sent to after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunnelStep {
    Landing,
    Quiz,
    LeadCapture,
    Diagnosis,
    Checkout,
    ThankYou,
}

impl FunnelStep {
    /// Marker sent in webhook payloads.
    pub fn webhook_marker(&self) -> &'static str {
        match self {
            FunnelStep::Landing => "landing",
            FunnelStep::Quiz => "quiz",
            FunnelStep::LeadCapture => "lead_capture",
            FunnelStep::Diagnosis => "diagnosis",
            FunnelStep::Checkout => "checkout",
            FunnelStep::ThankYou => "purchase_completed",
        }
    }
}
