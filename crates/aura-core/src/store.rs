//! Remote datastore abstraction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::record::{
    LeadRecord, PurchaseRecord, QuizAnswer, QuizProgressRecord, VisitUpsert, VisitorRecord,
};
use crate::session::SessionToken;

/// Result of inserting a purchase keyed by transaction id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurchaseInsert {
    Inserted,
    /// A purchase with the same transaction id already exists.
    Duplicate,
}

/// Row counts across the funnel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunnelTotals {
    pub visitors: i64,
    pub page_views: i64,
    pub quiz_started: i64,
    pub quiz_completed: i64,
    pub leads: i64,
    pub purchases: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunnelMetrics {
    pub total_visitors: i64,
    pub total_page_views: i64,
    pub quiz_starts: i64,
    pub quiz_completions: i64,
    pub leads_generated: i64,
    pub purchases: i64,
    /// Purchases per lead, in percent with one decimal.
    pub conversion_rate: f64,
}

impl From<FunnelTotals> for FunnelMetrics {
    fn from(t: FunnelTotals) -> Self {
        Self {
            total_visitors: t.visitors,
            total_page_views: t.page_views,
            quiz_starts: t.quiz_started,
            quiz_completions: t.quiz_completed,
            leads_generated: t.leads,
            purchases: t.purchases,
            conversion_rate: conversion_rate(t.purchases, t.leads),
        }
    }
}

pub fn conversion_rate(purchases: i64, leads: i64) -> f64 {
    if leads <= 0 {
        return 0.0;
    }
    let pct = purchases as f64 / leads as f64 * 100.0;
    (pct * 10.0).round() / 10.0
}

/// Persistence for the funnel's per-session state and append-only events.
///
/// Visitor and quiz rows are unique per session token. Every mutation of them
/// is an upsert that merges into the existing row.
#[async_trait::async_trait]
pub trait FunnelStore: Send + Sync + 'static {
    /// Insert with `page_views = 1`, or increment `page_views` and refresh
    /// `last_visit`/`current_path` on the existing row.
    async fn upsert_visit(&self, visit: &VisitUpsert) -> anyhow::Result<VisitorRecord>;

    async fn get_visitor(&self, session: &SessionToken) -> anyhow::Result<Option<VisitorRecord>>;

    /// Mark the quiz started. An existing `started_at` and answers are kept.
    async fn upsert_quiz_start(
        &self,
        session: &SessionToken,
        at: DateTime<Utc>,
    ) -> anyhow::Result<QuizProgressRecord>;

    /// Set one answer, preserving every other recorded answer.
    async fn merge_quiz_answer(
        &self,
        session: &SessionToken,
        question_id: u32,
        answer: &QuizAnswer,
        at: DateTime<Utc>,
    ) -> anyhow::Result<QuizProgressRecord>;

    async fn mark_quiz_completed(
        &self,
        session: &SessionToken,
        at: DateTime<Utc>,
    ) -> anyhow::Result<QuizProgressRecord>;

    async fn get_quiz_progress(
        &self,
        session: &SessionToken,
    ) -> anyhow::Result<Option<QuizProgressRecord>>;

    async fn insert_lead(&self, lead: &LeadRecord) -> anyhow::Result<()>;

    async fn insert_purchase(&self, purchase: &PurchaseRecord) -> anyhow::Result<PurchaseInsert>;

    /// Newest first.
    async fn list_leads(&self, limit: u32) -> anyhow::Result<Vec<LeadRecord>>;

    /// Newest first.
    async fn list_purchases(&self, limit: u32) -> anyhow::Result<Vec<PurchaseRecord>>;

    async fn funnel_totals(&self) -> anyhow::Result<FunnelTotals>;

    async fn get_setting(&self, key: &str) -> anyhow::Result<Option<String>>;

    async fn set_setting(&self, key: &str, value: &str) -> anyhow::Result<()>;

    async fn ping(&self) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversion_rate_rounds_to_one_decimal() {
        assert_eq!(conversion_rate(0, 0), 0.0);
        assert_eq!(conversion_rate(1, 3), 33.3);
        assert_eq!(conversion_rate(2, 3), 66.7);
        assert_eq!(conversion_rate(5, 5), 100.0);
    }

    #[test]
    fn metrics_serialize_camel_case() {
        let metrics = FunnelMetrics::from(FunnelTotals {
            visitors: 10,
            page_views: 25,
            quiz_started: 6,
            quiz_completed: 4,
            leads: 4,
            purchases: 1,
        });
        let json = serde_json::to_value(metrics).unwrap();
        assert_eq!(json["leadsGenerated"], 4);
        assert_eq!(json["quizStarts"], 6);
        assert_eq!(json["conversionRate"], 25.0);
    }
}
