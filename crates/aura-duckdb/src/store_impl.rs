use async_trait::async_trait;
use chrono::{DateTime, Utc};

use aura_core::record::{
    LeadRecord, PurchaseRecord, QuizAnswer, QuizProgressRecord, VisitUpsert, VisitorRecord,
};
use aura_core::store::{FunnelStore, FunnelTotals, PurchaseInsert};
use aura_core::SessionToken;

use crate::DuckDbBackend;

#[async_trait]
impl FunnelStore for DuckDbBackend {
    async fn upsert_visit(&self, visit: &VisitUpsert) -> anyhow::Result<VisitorRecord> {
        DuckDbBackend::upsert_visit(self, visit).await
    }

    async fn get_visitor(&self, session: &SessionToken) -> anyhow::Result<Option<VisitorRecord>> {
        DuckDbBackend::get_visitor(self, session).await
    }

    async fn upsert_quiz_start(
        &self,
        session: &SessionToken,
        at: DateTime<Utc>,
    ) -> anyhow::Result<QuizProgressRecord> {
        DuckDbBackend::upsert_quiz_start(self, session, at).await
    }

    async fn merge_quiz_answer(
        &self,
        session: &SessionToken,
        question_id: u32,
        answer: &QuizAnswer,
        at: DateTime<Utc>,
    ) -> anyhow::Result<QuizProgressRecord> {
        DuckDbBackend::merge_quiz_answer(self, session, question_id, answer, at).await
    }

    async fn mark_quiz_completed(
        &self,
        session: &SessionToken,
        at: DateTime<Utc>,
    ) -> anyhow::Result<QuizProgressRecord> {
        DuckDbBackend::mark_quiz_completed(self, session, at).await
    }

    async fn get_quiz_progress(
        &self,
        session: &SessionToken,
    ) -> anyhow::Result<Option<QuizProgressRecord>> {
        DuckDbBackend::get_quiz_progress(self, session).await
    }

    async fn insert_lead(&self, lead: &LeadRecord) -> anyhow::Result<()> {
        DuckDbBackend::insert_lead(self, lead).await
    }

    async fn insert_purchase(&self, purchase: &PurchaseRecord) -> anyhow::Result<PurchaseInsert> {
        DuckDbBackend::insert_purchase(self, purchase).await
    }

    async fn list_leads(&self, limit: u32) -> anyhow::Result<Vec<LeadRecord>> {
        DuckDbBackend::list_leads(self, limit).await
    }

    async fn list_purchases(&self, limit: u32) -> anyhow::Result<Vec<PurchaseRecord>> {
        DuckDbBackend::list_purchases(self, limit).await
    }

    async fn funnel_totals(&self) -> anyhow::Result<FunnelTotals> {
        DuckDbBackend::funnel_totals(self).await
    }

    async fn get_setting(&self, key: &str) -> anyhow::Result<Option<String>> {
        DuckDbBackend::get_setting(self, key).await
    }

    async fn set_setting(&self, key: &str, value: &str) -> anyhow::Result<()> {
        DuckDbBackend::set_setting(self, key, value).await
    }

    async fn ping(&self) -> anyhow::Result<()> {
        DuckDbBackend::ping(self).await
    }
}
