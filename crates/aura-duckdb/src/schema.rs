/// DuckDB initialization SQL.
///
/// Executed once at database open time via `Connection::execute_batch`.
/// All statements use `IF NOT EXISTS` so they are safe to re-run on every
/// startup.
///
/// `memory_limit` comes from `Config.duckdb_memory_limit` (env
/// `AURA_DUCKDB_MEMORY`, default `"1GB"`).
///
/// DuckDB rejects `ON CONFLICT DO UPDATE` on indexed columns, so the columns
/// rewritten by upserts (`page_views`, `last_visit`, `answers`, ...) carry no
/// secondary index.
pub fn init_sql(memory_limit: &str) -> String {
    format!(
        r#"SET memory_limit = '{memory_limit}';
SET threads = 2;

-- Keys: 'webhook_urls' (JSON {{leadCapture, purchase}})
CREATE TABLE IF NOT EXISTS settings (
    key             VARCHAR PRIMARY KEY,
    value           VARCHAR NOT NULL
);

-- ===========================================
-- VISITORS (one row per session token)
-- ===========================================
CREATE TABLE IF NOT EXISTS visitors (
    session_token   VARCHAR PRIMARY KEY,
    client_ip       VARCHAR,
    user_agent      VARCHAR,
    referrer        VARCHAR,
    current_path    VARCHAR NOT NULL,
    first_visit     TIMESTAMP NOT NULL,
    last_visit      TIMESTAMP NOT NULL,
    page_views      BIGINT NOT NULL DEFAULT 1,
    utm_source      VARCHAR,
    utm_medium      VARCHAR,
    utm_campaign    VARCHAR,
    utm_content     VARCHAR,
    utm_term        VARCHAR,
    fbclid          VARCHAR,
    fbc             VARCHAR,
    fbp             VARCHAR,
    country_code    VARCHAR,
    browser         VARCHAR,
    os              VARCHAR,
    device_type     VARCHAR
);

-- ===========================================
-- QUIZ TRACKING (one row per session token)
-- ===========================================
-- answers: JSON object question id -> option id | [option id]
CREATE TABLE IF NOT EXISTS quiz_tracking (
    session_token   VARCHAR PRIMARY KEY,
    quiz_started    BOOLEAN NOT NULL DEFAULT FALSE,
    start_timestamp TIMESTAMP,
    answers         VARCHAR NOT NULL DEFAULT '{{}}',
    quiz_completed  BOOLEAN NOT NULL DEFAULT FALSE,
    created_at      TIMESTAMP NOT NULL,
    updated_at      TIMESTAMP NOT NULL
);

-- ===========================================
-- LEADS (append-only)
-- ===========================================
CREATE TABLE IF NOT EXISTS lead_webhooks (
    id              VARCHAR PRIMARY KEY,
    session_token   VARCHAR NOT NULL,
    name            VARCHAR NOT NULL,
    email           VARCHAR NOT NULL,
    whatsapp        VARCHAR,
    client_ip       VARCHAR,
    country_code    VARCHAR,
    user_agent      VARCHAR,
    current_url     VARCHAR,
    utm_source      VARCHAR,
    utm_medium      VARCHAR,
    utm_campaign    VARCHAR,
    utm_content     VARCHAR,
    utm_term        VARCHAR,
    fbclid          VARCHAR,
    fbc             VARCHAR,
    fbp             VARCHAR,
    quiz_answers    VARCHAR NOT NULL DEFAULT '{{}}',
    bucket_id       VARCHAR NOT NULL,
    business_type   VARCHAR NOT NULL,
    event_type      VARCHAR NOT NULL,
    value           DOUBLE NOT NULL,
    currency        VARCHAR NOT NULL,
    created_at      TIMESTAMP NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_lead_webhooks_session ON lead_webhooks(session_token);

-- ===========================================
-- PURCHASES (append-only, deduplicated by transaction id)
-- ===========================================
CREATE TABLE IF NOT EXISTS purchase_webhooks (
    id              VARCHAR PRIMARY KEY,
    session_token   VARCHAR NOT NULL,
    transaction_id  VARCHAR NOT NULL UNIQUE,
    order_id        VARCHAR NOT NULL,
    name            VARCHAR,
    email           VARCHAR,
    whatsapp        VARCHAR,
    client_ip       VARCHAR,
    country_code    VARCHAR,
    user_agent      VARCHAR,
    utm_source      VARCHAR,
    utm_medium      VARCHAR,
    utm_campaign    VARCHAR,
    utm_content     VARCHAR,
    utm_term        VARCHAR,
    fbclid          VARCHAR,
    fbc             VARCHAR,
    fbp             VARCHAR,
    quiz_answers    VARCHAR NOT NULL DEFAULT '{{}}',
    payment_method  VARCHAR NOT NULL,
    event_type      VARCHAR NOT NULL,
    value           DOUBLE NOT NULL,
    currency        VARCHAR NOT NULL,
    created_at      TIMESTAMP NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_purchase_webhooks_session ON purchase_webhooks(session_token);
"#
    )
}
