//! Non-persistent [`FunnelStore`], kept entirely in process memory.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::bail;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::record::{
    LeadRecord, PurchaseRecord, QuizAnswer, QuizAnswers, QuizProgressRecord, VisitUpsert,
    VisitorRecord,
};
use crate::session::SessionToken;
use crate::store::{FunnelStore, FunnelTotals, PurchaseInsert};

#[derive(Default)]
struct Tables {
    visitors: HashMap<SessionToken, VisitorRecord>,
    quiz: HashMap<SessionToken, QuizProgressRecord>,
    leads: Vec<LeadRecord>,
    purchases: Vec<PurchaseRecord>,
    settings: HashMap<String, String>,
}

/// Every operation runs under one lock, so upserts are atomic.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail, simulating a datastore outage.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> anyhow::Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            bail!("datastore unavailable");
        }
        Ok(())
    }
}

fn new_progress(session: &SessionToken, at: DateTime<Utc>) -> QuizProgressRecord {
    QuizProgressRecord {
        session_token: session.clone(),
        started: false,
        started_at: None,
        answers: QuizAnswers::new(),
        completed: false,
        created_at: at,
        updated_at: at,
    }
}

fn newest_first<T: Clone>(rows: &[T], limit: u32) -> Vec<T> {
    rows.iter().rev().take(limit as usize).cloned().collect()
}

#[async_trait::async_trait]
impl FunnelStore for MemoryStore {
    async fn upsert_visit(&self, visit: &VisitUpsert) -> anyhow::Result<VisitorRecord> {
        self.check()?;
        let mut tables = self.tables.lock().await;
        let record = tables
            .visitors
            .entry(visit.session_token.clone())
            .and_modify(|row| {
                row.page_views += 1;
                row.last_visit = visit.at;
                row.current_path = visit.current_path.clone();
                row.attribution = visit.attribution.clone();
                if visit.country_code.is_some() {
                    row.country_code = visit.country_code.clone();
                }
            })
            .or_insert_with(|| VisitorRecord {
                session_token: visit.session_token.clone(),
                client_ip: visit.client_ip.clone(),
                user_agent: visit.user_agent.clone(),
                referrer: visit.referrer.clone(),
                current_path: visit.current_path.clone(),
                first_visit: visit.at,
                last_visit: visit.at,
                page_views: 1,
                attribution: visit.attribution.clone(),
                country_code: visit.country_code.clone(),
                device: visit.device.clone(),
            });
        Ok(record.clone())
    }

    async fn get_visitor(&self, session: &SessionToken) -> anyhow::Result<Option<VisitorRecord>> {
        self.check()?;
        Ok(self.tables.lock().await.visitors.get(session).cloned())
    }

    async fn upsert_quiz_start(
        &self,
        session: &SessionToken,
        at: DateTime<Utc>,
    ) -> anyhow::Result<QuizProgressRecord> {
        self.check()?;
        let mut tables = self.tables.lock().await;
        let row = tables
            .quiz
            .entry(session.clone())
            .or_insert_with(|| new_progress(session, at));
        row.started = true;
        row.started_at.get_or_insert(at);
        row.updated_at = at;
        Ok(row.clone())
    }

    async fn merge_quiz_answer(
        &self,
        session: &SessionToken,
        question_id: u32,
        answer: &QuizAnswer,
        at: DateTime<Utc>,
    ) -> anyhow::Result<QuizProgressRecord> {
        self.check()?;
        let mut tables = self.tables.lock().await;
        let row = tables
            .quiz
            .entry(session.clone())
            .or_insert_with(|| new_progress(session, at));
        row.answers.insert(question_id, answer.clone());
        row.updated_at = at;
        Ok(row.clone())
    }

    async fn mark_quiz_completed(
        &self,
        session: &SessionToken,
        at: DateTime<Utc>,
    ) -> anyhow::Result<QuizProgressRecord> {
        self.check()?;
        let mut tables = self.tables.lock().await;
        let row = tables
            .quiz
            .entry(session.clone())
            .or_insert_with(|| new_progress(session, at));
        row.completed = true;
        row.updated_at = at;
        Ok(row.clone())
    }

    async fn get_quiz_progress(
        &self,
        session: &SessionToken,
    ) -> anyhow::Result<Option<QuizProgressRecord>> {
        self.check()?;
        Ok(self.tables.lock().await.quiz.get(session).cloned())
    }

    async fn insert_lead(&self, lead: &LeadRecord) -> anyhow::Result<()> {
        self.check()?;
        self.tables.lock().await.leads.push(lead.clone());
        Ok(())
    }

    async fn insert_purchase(&self, purchase: &PurchaseRecord) -> anyhow::Result<PurchaseInsert> {
        self.check()?;
        let mut tables = self.tables.lock().await;
        if tables
            .purchases
            .iter()
            .any(|p| p.transaction_id == purchase.transaction_id)
        {
            return Ok(PurchaseInsert::Duplicate);
        }
        tables.purchases.push(purchase.clone());
        Ok(PurchaseInsert::Inserted)
    }

    async fn list_leads(&self, limit: u32) -> anyhow::Result<Vec<LeadRecord>> {
        self.check()?;
        Ok(newest_first(&self.tables.lock().await.leads, limit))
    }

    async fn list_purchases(&self, limit: u32) -> anyhow::Result<Vec<PurchaseRecord>> {
        self.check()?;
        Ok(newest_first(&self.tables.lock().await.purchases, limit))
    }

    async fn funnel_totals(&self) -> anyhow::Result<FunnelTotals> {
        self.check()?;
        let tables = self.tables.lock().await;
        Ok(FunnelTotals {
            visitors: tables.visitors.len() as i64,
            page_views: tables.visitors.values().map(|v| v.page_views).sum(),
            quiz_started: tables.quiz.values().filter(|q| q.started).count() as i64,
            quiz_completed: tables.quiz.values().filter(|q| q.completed).count() as i64,
            leads: tables.leads.len() as i64,
            purchases: tables.purchases.len() as i64,
        })
    }

    async fn get_setting(&self, key: &str) -> anyhow::Result<Option<String>> {
        self.check()?;
        Ok(self.tables.lock().await.settings.get(key).cloned())
    }

    async fn set_setting(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.check()?;
        self.tables
            .lock()
            .await
            .settings
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn ping(&self) -> anyhow::Result<()> {
        self.check()
    }
}
