use anyhow::Result;
use aura_core::record::{QuizAnswer, QuizProgressRecord};
use aura_core::SessionToken;
use chrono::{DateTime, Utc};
use duckdb::{Connection, OptionalExt};

use crate::backend::{fmt_ts, parse_answers, parse_token, parse_ts, DecodeError};
use crate::DuckDbBackend;

struct QuizRow {
    session_token: String,
    started: bool,
    started_at: Option<String>,
    answers: String,
    completed: bool,
    created_at: String,
    updated_at: String,
}

impl QuizRow {
    fn into_record(self) -> Result<QuizProgressRecord, DecodeError> {
        Ok(QuizProgressRecord {
            session_token: parse_token(&self.session_token)?,
            started: self.started,
            started_at: self.started_at.as_deref().map(parse_ts).transpose()?,
            answers: parse_answers(&self.answers)?,
            completed: self.completed,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
        })
    }
}

fn select_progress(conn: &Connection, session: &str) -> Result<Option<QuizProgressRecord>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT
            session_token, quiz_started, CAST(start_timestamp AS VARCHAR), answers,
            quiz_completed, CAST(created_at AS VARCHAR), CAST(updated_at AS VARCHAR)
        FROM quiz_tracking
        WHERE session_token = ?1
        "#,
    )?;
    let row = stmt
        .query_row(duckdb::params![session], |row| {
            Ok(QuizRow {
                session_token: row.get(0)?,
                started: row.get(1)?,
                started_at: row.get(2)?,
                answers: row.get(3)?,
                completed: row.get(4)?,
                created_at: row.get(5)?,
                updated_at: row.get(6)?,
            })
        })
        .optional()?;
    Ok(row.map(QuizRow::into_record).transpose()?)
}

fn require_progress(conn: &Connection, session: &str) -> Result<QuizProgressRecord> {
    select_progress(conn, session)?
        .ok_or_else(|| anyhow::anyhow!("quiz_tracking row missing after upsert"))
}

impl DuckDbBackend {
    /// Mark the quiz started. `start_timestamp` is only set when still NULL.
    pub async fn upsert_quiz_start(
        &self,
        session: &SessionToken,
        at: DateTime<Utc>,
    ) -> Result<QuizProgressRecord> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"INSERT INTO quiz_tracking (
                session_token, quiz_started, start_timestamp, answers, quiz_completed,
                created_at, updated_at
            ) VALUES (?1, TRUE, ?2, '{}', FALSE, ?2, ?2)
            ON CONFLICT (session_token) DO UPDATE SET
                quiz_started    = TRUE,
                start_timestamp = COALESCE(quiz_tracking.start_timestamp, EXCLUDED.start_timestamp),
                updated_at      = EXCLUDED.updated_at"#,
            duckdb::params![session.as_str(), fmt_ts(at)],
        )?;
        require_progress(&conn, session.as_str())
    }

    /// Set one answer while keeping every other stored answer.
    ///
    /// Read, merge and write run in one transaction under the connection
    /// lock, so answers arriving out of order never overwrite each other.
    pub async fn merge_quiz_answer(
        &self,
        session: &SessionToken,
        question_id: u32,
        answer: &QuizAnswer,
        at: DateTime<Utc>,
    ) -> Result<QuizProgressRecord> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let stored: Option<String> = tx
            .prepare("SELECT answers FROM quiz_tracking WHERE session_token = ?1")?
            .query_row(duckdb::params![session.as_str()], |row| row.get(0))
            .optional()?;
        let mut answers = match stored {
            Some(raw) => parse_answers(&raw)?,
            None => Default::default(),
        };
        answers.insert(question_id, answer.clone());
        let merged = serde_json::to_string(&answers)?;
        let at = fmt_ts(at);

        tx.execute(
            r#"INSERT INTO quiz_tracking (
                session_token, quiz_started, start_timestamp, answers, quiz_completed,
                created_at, updated_at
            ) VALUES (?1, FALSE, NULL, ?2, FALSE, ?3, ?3)
            ON CONFLICT (session_token) DO UPDATE SET
                answers    = EXCLUDED.answers,
                updated_at = EXCLUDED.updated_at"#,
            duckdb::params![session.as_str(), merged, at],
        )?;
        tx.commit()?;

        require_progress(&conn, session.as_str())
    }

    pub async fn mark_quiz_completed(
        &self,
        session: &SessionToken,
        at: DateTime<Utc>,
    ) -> Result<QuizProgressRecord> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"INSERT INTO quiz_tracking (
                session_token, quiz_started, start_timestamp, answers, quiz_completed,
                created_at, updated_at
            ) VALUES (?1, FALSE, NULL, '{}', TRUE, ?2, ?2)
            ON CONFLICT (session_token) DO UPDATE SET
                quiz_completed = TRUE,
                updated_at     = EXCLUDED.updated_at"#,
            duckdb::params![session.as_str(), fmt_ts(at)],
        )?;
        require_progress(&conn, session.as_str())
    }

    pub async fn get_quiz_progress(
        &self,
        session: &SessionToken,
    ) -> Result<Option<QuizProgressRecord>> {
        let conn = self.conn.lock().await;
        select_progress(&conn, session.as_str())
    }
}
