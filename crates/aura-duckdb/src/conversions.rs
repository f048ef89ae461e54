//! Append-only lead and purchase rows, plus funnel totals.

use anyhow::Result;
use aura_core::attribution::AttributionSnapshot;
use aura_core::record::{ConversionEvent, LeadRecord, PurchaseRecord};
use aura_core::store::{FunnelTotals, PurchaseInsert};
use tracing::debug;

use crate::backend::{attribution_at, fmt_ts, parse_answers, parse_token, parse_ts, DecodeError};
use crate::DuckDbBackend;

fn parse_event_type(raw: &str) -> Result<ConversionEvent, DecodeError> {
    ConversionEvent::parse(raw).ok_or_else(|| DecodeError::EventType(raw.to_string()))
}

struct LeadRow {
    id: String,
    session_token: String,
    name: String,
    email: String,
    whatsapp: Option<String>,
    client_ip: Option<String>,
    country_code: Option<String>,
    user_agent: Option<String>,
    current_url: Option<String>,
    attribution: AttributionSnapshot,
    quiz_answers: String,
    bucket_id: String,
    business_type: String,
    event_type: String,
    value: f64,
    currency: String,
    created_at: String,
}

impl LeadRow {
    fn into_record(self) -> Result<LeadRecord, DecodeError> {
        Ok(LeadRecord {
            id: self.id,
            session_token: parse_token(&self.session_token)?,
            name: self.name,
            email: self.email,
            whatsapp: self.whatsapp,
            client_ip: self.client_ip,
            country_code: self.country_code,
            user_agent: self.user_agent,
            current_url: self.current_url,
            attribution: self.attribution,
            quiz_answers: parse_answers(&self.quiz_answers)?,
            bucket_id: self.bucket_id,
            business_type: self.business_type,
            event_type: parse_event_type(&self.event_type)?,
            value: self.value,
            currency: self.currency,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

struct PurchaseRow {
    id: String,
    session_token: String,
    transaction_id: String,
    order_id: String,
    name: Option<String>,
    email: Option<String>,
    whatsapp: Option<String>,
    client_ip: Option<String>,
    country_code: Option<String>,
    user_agent: Option<String>,
    attribution: AttributionSnapshot,
    quiz_answers: String,
    payment_method: String,
    event_type: String,
    value: f64,
    currency: String,
    created_at: String,
}

impl PurchaseRow {
    fn into_record(self) -> Result<PurchaseRecord, DecodeError> {
        Ok(PurchaseRecord {
            id: self.id,
            session_token: parse_token(&self.session_token)?,
            transaction_id: self.transaction_id,
            order_id: self.order_id,
            name: self.name,
            email: self.email,
            whatsapp: self.whatsapp,
            client_ip: self.client_ip,
            country_code: self.country_code,
            user_agent: self.user_agent,
            attribution: self.attribution,
            quiz_answers: parse_answers(&self.quiz_answers)?,
            payment_method: self.payment_method,
            event_type: parse_event_type(&self.event_type)?,
            value: self.value,
            currency: self.currency,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

impl DuckDbBackend {
    pub async fn insert_lead(&self, lead: &LeadRecord) -> Result<()> {
        let answers = serde_json::to_string(&lead.quiz_answers)?;
        let a = &lead.attribution;
        let conn = self.conn.lock().await;
        conn.execute(
            r#"INSERT INTO lead_webhooks (
                id, session_token, name, email, whatsapp,
                client_ip, country_code, user_agent, current_url,
                utm_source, utm_medium, utm_campaign, utm_content, utm_term,
                fbclid, fbc, fbp,
                quiz_answers, bucket_id, business_type,
                event_type, value, currency, created_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5,
                ?6, ?7, ?8, ?9,
                ?10, ?11, ?12, ?13, ?14,
                ?15, ?16, ?17,
                ?18, ?19, ?20,
                ?21, ?22, ?23, ?24
            )"#,
            duckdb::params![
                lead.id,
                lead.session_token.as_str(),
                lead.name,
                lead.email,
                lead.whatsapp,
                lead.client_ip,
                lead.country_code,
                lead.user_agent,
                lead.current_url,
                a.utm_source,
                a.utm_medium,
                a.utm_campaign,
                a.utm_content,
                a.utm_term,
                a.fbclid,
                a.fbc,
                a.fbp,
                answers,
                lead.bucket_id,
                lead.business_type,
                lead.event_type.as_str(),
                lead.value,
                lead.currency,
                fmt_ts(lead.created_at),
            ],
        )?;
        debug!(session = %lead.session_token, bucket = %lead.bucket_id, "Lead stored");
        Ok(())
    }

    /// Insert a purchase unless its transaction id is already stored.
    pub async fn insert_purchase(&self, purchase: &PurchaseRecord) -> Result<PurchaseInsert> {
        let answers = serde_json::to_string(&purchase.quiz_answers)?;
        let a = &purchase.attribution;
        let conn = self.conn.lock().await;
        let inserted = conn.execute(
            r#"INSERT INTO purchase_webhooks (
                id, session_token, transaction_id, order_id,
                name, email, whatsapp,
                client_ip, country_code, user_agent,
                utm_source, utm_medium, utm_campaign, utm_content, utm_term,
                fbclid, fbc, fbp,
                quiz_answers, payment_method,
                event_type, value, currency, created_at
            ) VALUES (
                ?1, ?2, ?3, ?4,
                ?5, ?6, ?7,
                ?8, ?9, ?10,
                ?11, ?12, ?13, ?14, ?15,
                ?16, ?17, ?18,
                ?19, ?20,
                ?21, ?22, ?23, ?24
            )
            ON CONFLICT (transaction_id) DO NOTHING"#,
            duckdb::params![
                purchase.id,
                purchase.session_token.as_str(),
                purchase.transaction_id,
                purchase.order_id,
                purchase.name,
                purchase.email,
                purchase.whatsapp,
                purchase.client_ip,
                purchase.country_code,
                purchase.user_agent,
                a.utm_source,
                a.utm_medium,
                a.utm_campaign,
                a.utm_content,
                a.utm_term,
                a.fbclid,
                a.fbc,
                a.fbp,
                answers,
                purchase.payment_method,
                purchase.event_type.as_str(),
                purchase.value,
                purchase.currency,
                fmt_ts(purchase.created_at),
            ],
        )?;
        Ok(if inserted == 0 {
            PurchaseInsert::Duplicate
        } else {
            PurchaseInsert::Inserted
        })
    }

    pub async fn list_leads(&self, limit: u32) -> Result<Vec<LeadRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            r#"
            SELECT
                id, session_token, name, email, whatsapp,
                client_ip, country_code, user_agent, current_url,
                utm_source, utm_medium, utm_campaign, utm_content, utm_term, fbclid, fbc, fbp,
                quiz_answers, bucket_id, business_type,
                event_type, value, currency, CAST(created_at AS VARCHAR)
            FROM lead_webhooks
            ORDER BY created_at DESC, id DESC
            LIMIT ?1
            "#,
        )?;
        let rows = stmt.query_map(duckdb::params![limit as i64], |row| {
            Ok(LeadRow {
                id: row.get(0)?,
                session_token: row.get(1)?,
                name: row.get(2)?,
                email: row.get(3)?,
                whatsapp: row.get(4)?,
                client_ip: row.get(5)?,
                country_code: row.get(6)?,
                user_agent: row.get(7)?,
                current_url: row.get(8)?,
                attribution: attribution_at(row, 9)?,
                quiz_answers: row.get(17)?,
                bucket_id: row.get(18)?,
                business_type: row.get(19)?,
                event_type: row.get(20)?,
                value: row.get(21)?,
                currency: row.get(22)?,
                created_at: row.get(23)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?.into_record()?);
        }
        Ok(out)
    }

    pub async fn list_purchases(&self, limit: u32) -> Result<Vec<PurchaseRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            r#"
            SELECT
                id, session_token, transaction_id, order_id,
                name, email, whatsapp,
                client_ip, country_code, user_agent,
                utm_source, utm_medium, utm_campaign, utm_content, utm_term, fbclid, fbc, fbp,
                quiz_answers, payment_method,
                event_type, value, currency, CAST(created_at AS VARCHAR)
            FROM purchase_webhooks
            ORDER BY created_at DESC, id DESC
            LIMIT ?1
            "#,
        )?;
        let rows = stmt.query_map(duckdb::params![limit as i64], |row| {
            Ok(PurchaseRow {
                id: row.get(0)?,
                session_token: row.get(1)?,
                transaction_id: row.get(2)?,
                order_id: row.get(3)?,
                name: row.get(4)?,
                email: row.get(5)?,
                whatsapp: row.get(6)?,
                client_ip: row.get(7)?,
                country_code: row.get(8)?,
                user_agent: row.get(9)?,
                attribution: attribution_at(row, 10)?,
                quiz_answers: row.get(18)?,
                payment_method: row.get(19)?,
                event_type: row.get(20)?,
                value: row.get(21)?,
                currency: row.get(22)?,
                created_at: row.get(23)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?.into_record()?);
        }
        Ok(out)
    }

    pub async fn funnel_totals(&self) -> Result<FunnelTotals> {
        let conn = self.conn.lock().await;
        let totals = conn.query_row(
            r#"
            SELECT
                (SELECT COUNT(*) FROM visitors),
                (SELECT CAST(COALESCE(SUM(page_views), 0) AS BIGINT) FROM visitors),
                (SELECT COUNT(*) FROM quiz_tracking WHERE quiz_started),
                (SELECT COUNT(*) FROM quiz_tracking WHERE quiz_completed),
                (SELECT COUNT(*) FROM lead_webhooks),
                (SELECT COUNT(*) FROM purchase_webhooks)
            "#,
            [],
            |row| {
                Ok(FunnelTotals {
                    visitors: row.get(0)?,
                    page_views: row.get(1)?,
                    quiz_started: row.get(2)?,
                    quiz_completed: row.get(3)?,
                    leads: row.get(4)?,
                    purchases: row.get(5)?,
                })
            },
        )?;
        Ok(totals)
    }
}
