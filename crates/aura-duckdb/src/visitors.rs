use anyhow::Result;
use aura_core::record::{DeviceInfo, VisitUpsert, VisitorRecord};
use aura_core::SessionToken;
use duckdb::{Connection, OptionalExt};

use crate::backend::{attribution_at, fmt_ts, parse_token, parse_ts, DecodeError};
use crate::DuckDbBackend;

struct VisitorRow {
    session_token: String,
    client_ip: Option<String>,
    user_agent: Option<String>,
    referrer: Option<String>,
    current_path: String,
    first_visit: String,
    last_visit: String,
    page_views: i64,
    attribution: aura_core::attribution::AttributionSnapshot,
    country_code: Option<String>,
    device: DeviceInfo,
}

impl VisitorRow {
    fn into_record(self) -> Result<VisitorRecord, DecodeError> {
        Ok(VisitorRecord {
            session_token: parse_token(&self.session_token)?,
            client_ip: self.client_ip,
            user_agent: self.user_agent,
            referrer: self.referrer,
            current_path: self.current_path,
            first_visit: parse_ts(&self.first_visit)?,
            last_visit: parse_ts(&self.last_visit)?,
            page_views: self.page_views,
            attribution: self.attribution,
            country_code: self.country_code,
            device: self.device,
        })
    }
}

fn select_visitor(conn: &Connection, session: &str) -> Result<Option<VisitorRecord>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT
            session_token, client_ip, user_agent, referrer, current_path,
            CAST(first_visit AS VARCHAR), CAST(last_visit AS VARCHAR), page_views,
            utm_source, utm_medium, utm_campaign, utm_content, utm_term, fbclid, fbc, fbp,
            country_code, browser, os, device_type
        FROM visitors
        WHERE session_token = ?1
        "#,
    )?;
    let row = stmt
        .query_row(duckdb::params![session], |row| {
            Ok(VisitorRow {
                session_token: row.get(0)?,
                client_ip: row.get(1)?,
                user_agent: row.get(2)?,
                referrer: row.get(3)?,
                current_path: row.get(4)?,
                first_visit: row.get(5)?,
                last_visit: row.get(6)?,
                page_views: row.get(7)?,
                attribution: attribution_at(row, 8)?,
                country_code: row.get(16)?,
                device: DeviceInfo {
                    browser: row.get(17)?,
                    os: row.get(18)?,
                    device_type: row.get(19)?,
                },
            })
        })
        .optional()?;
    Ok(row.map(VisitorRow::into_record).transpose()?)
}

impl DuckDbBackend {
    /// Insert the visitor row or count one more page view on it.
    ///
    /// The increment happens inside DuckDB (`page_views + 1`), so concurrent
    /// tabs never lose a page view. A later visit without geo data keeps the
    /// stored country.
    pub async fn upsert_visit(&self, visit: &VisitUpsert) -> Result<VisitorRecord> {
        let conn = self.conn.lock().await;
        let at = fmt_ts(visit.at);
        let a = &visit.attribution;
        conn.execute(
            r#"INSERT INTO visitors (
                session_token, client_ip, user_agent, referrer, current_path,
                first_visit, last_visit, page_views,
                utm_source, utm_medium, utm_campaign, utm_content, utm_term,
                fbclid, fbc, fbp,
                country_code, browser, os, device_type
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5,
                ?6, ?6, 1,
                ?7, ?8, ?9, ?10, ?11,
                ?12, ?13, ?14,
                ?15, ?16, ?17, ?18
            )
            ON CONFLICT (session_token) DO UPDATE SET
                page_views   = visitors.page_views + 1,
                last_visit   = EXCLUDED.last_visit,
                current_path = EXCLUDED.current_path,
                utm_source   = EXCLUDED.utm_source,
                utm_medium   = EXCLUDED.utm_medium,
                utm_campaign = EXCLUDED.utm_campaign,
                utm_content  = EXCLUDED.utm_content,
                utm_term     = EXCLUDED.utm_term,
                fbclid       = EXCLUDED.fbclid,
                fbc          = EXCLUDED.fbc,
                fbp          = EXCLUDED.fbp,
                country_code = COALESCE(EXCLUDED.country_code, visitors.country_code)"#,
            duckdb::params![
                visit.session_token.as_str(),
                visit.client_ip,
                visit.user_agent,
                visit.referrer,
                visit.current_path,
                at,
                a.utm_source,
                a.utm_medium,
                a.utm_campaign,
                a.utm_content,
                a.utm_term,
                a.fbclid,
                a.fbc,
                a.fbp,
                visit.country_code,
                visit.device.browser,
                visit.device.os,
                visit.device.device_type,
            ],
        )?;

        select_visitor(&conn, visit.session_token.as_str())?
            .ok_or_else(|| anyhow::anyhow!("visitor row missing after upsert"))
    }

    pub async fn get_visitor(&self, session: &SessionToken) -> Result<Option<VisitorRecord>> {
        let conn = self.conn.lock().await;
        select_visitor(&conn, session.as_str())
    }
}
