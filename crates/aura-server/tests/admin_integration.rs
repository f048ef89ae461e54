use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use url::Url;

use aura_core::config::{Config, OfferConfig};
use aura_core::geo::{GeoLookup, GeoLookupResponse};
use aura_core::sink::TracingSink;
use aura_core::store::FunnelStore;
use aura_core::webhook::WebhookTransport;
use aura_core::SessionToken;
use aura_duckdb::DuckDbBackend;
use aura_server::app::build_app;
use aura_server::state::{AppState, Services};

const TOKEN: &str = "test-admin-token";

fn test_config(admin_token: Option<&str>) -> Config {
    Config {
        port: 0,
        data_dir: "/tmp/aura-test".to_string(),
        duckdb_memory_limit: "1GB".to_string(),
        https: true,
        public_url: "http://localhost:3000".to_string(),
        backend_url: None,
        cors_origins: vec![],
        geoip_path: "/nonexistent/GeoLite2-City.mmdb".to_string(),
        geo_primary_url: "http://geo.invalid/{ip}/json/".to_string(),
        geo_fallback_url: "http://geo-fallback.invalid/".to_string(),
        geo_timeout_ms: 500,
        webhook_timeout_ms: 500,
        session_cache_hours: 24,
        admin_token: admin_token.map(str::to_string),
        checkout_url: "https://pay.hotmart.com/".to_string(),
        offer: OfferConfig::default(),
    }
}

struct NoGeo;

#[async_trait]
impl GeoLookup for NoGeo {
    fn name(&self) -> &str {
        "none"
    }

    async fn lookup(&self, _ip_hint: Option<&str>) -> anyhow::Result<GeoLookupResponse> {
        anyhow::bail!("offline")
    }
}

struct AcceptAll;

#[async_trait]
impl WebhookTransport for AcceptAll {
    async fn post_json(
        &self,
        _url: &Url,
        _body: &Value,
        read_response: bool,
    ) -> anyhow::Result<Option<u16>> {
        Ok(read_response.then_some(200))
    }
}

fn setup(admin_token: Option<&str>) -> (Arc<AppState>, axum::Router) {
    let db: Arc<dyn FunnelStore> =
        Arc::new(DuckDbBackend::open_in_memory().expect("in-memory DuckDB"));
    let services = Services {
        primary_geo: Arc::new(NoGeo),
        fallback_geo: Arc::new(NoGeo),
        transport: Arc::new(AcceptAll),
        sink: Arc::new(TracingSink),
    };
    let state = Arc::new(
        AppState::with_services(db, test_config(admin_token), services).expect("state"),
    );
    let app = build_app(Arc::clone(&state));
    (state, app)
}

async fn json_body(response: axum::http::Response<Body>) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("parse JSON")
}

fn admin_get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    builder.body(Body::empty()).expect("build request")
}

fn funnel_post(uri: &str, session: &SessionToken, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("cookie", format!("sessionId={session}"))
        .body(Body::from(body.to_string()))
        .expect("build request")
}

#[tokio::test]
async fn test_admin_disabled_without_token() {
    let (_state, app) = setup(None);
    let response = app
        .oneshot(admin_get("/api/admin/leads", Some("anything")))
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let json = json_body(response).await;
    assert_eq!(json["error"]["code"], "forbidden");
}

#[tokio::test]
async fn test_admin_requires_bearer_token() {
    let (_state, app) = setup(Some(TOKEN));

    let missing = app
        .clone()
        .oneshot(admin_get("/api/admin/metrics", None))
        .await
        .expect("request");
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

    let wrong = app
        .clone()
        .oneshot(admin_get("/api/admin/metrics", Some("nope")))
        .await
        .expect("request");
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

    let ok = app
        .oneshot(admin_get("/api/admin/metrics", Some(TOKEN)))
        .await
        .expect("request");
    assert_eq!(ok.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_metrics_count_the_funnel() {
    let (_state, app) = setup(Some(TOKEN));
    let ana = SessionToken::generate();
    let bea = SessionToken::generate();

    for (session, url) in [(&ana, "/"), (&ana, "/quiz"), (&bea, "/")] {
        let response = app
            .clone()
            .oneshot(funnel_post("/api/track/visit", session, json!({ "url": url })))
            .await
            .expect("request");
        assert_eq!(response.status(), StatusCode::OK);
    }
    app.clone()
        .oneshot(funnel_post("/api/quiz/start", &ana, json!({})))
        .await
        .expect("request");
    app.clone()
        .oneshot(funnel_post("/api/quiz/complete", &ana, json!({})))
        .await
        .expect("request");
    for session in [&ana, &bea] {
        let response = app
            .clone()
            .oneshot(funnel_post(
                "/api/leads",
                session,
                json!({ "name": "Ana", "email": "ana@x.com", "consent": true }),
            ))
            .await
            .expect("request");
        assert_eq!(response.status(), StatusCode::OK);
    }
    app.clone()
        .oneshot(funnel_post(
            "/api/purchases",
            &ana,
            json!({ "transactionId": "HP-1" }),
        ))
        .await
        .expect("request");

    let response = app
        .clone()
        .oneshot(admin_get("/api/admin/metrics", Some(TOKEN)))
        .await
        .expect("request");
    let metrics = json_body(response).await;
    assert_eq!(metrics["totalVisitors"], 2);
    assert_eq!(metrics["quizStarts"], 1);
    assert_eq!(metrics["quizCompletions"], 1);
    assert_eq!(metrics["leadsGenerated"], 2);
    assert_eq!(metrics["purchases"], 1);
    assert_eq!(metrics["conversionRate"], 50.0);

    let response = app
        .clone()
        .oneshot(admin_get("/api/admin/leads?limit=1", Some(TOKEN)))
        .await
        .expect("request");
    let leads = json_body(response).await;
    assert_eq!(leads["total"], 1);

    let response = app
        .oneshot(admin_get("/api/admin/purchases", Some(TOKEN)))
        .await
        .expect("request");
    let purchases = json_body(response).await;
    assert_eq!(purchases["total"], 1);
    assert_eq!(purchases["purchases"][0]["transaction_id"], "HP-1");
}

#[tokio::test]
async fn test_webhook_urls_can_be_updated_per_field() {
    let (_state, app) = setup(Some(TOKEN));

    let response = app
        .clone()
        .oneshot(admin_get("/api/webhook-urls", Some(TOKEN)))
        .await
        .expect("request");
    let defaults = json_body(response).await;
    assert_eq!(defaults["leadCapture"], "/api/webhooks/lead-capture");
    assert_eq!(defaults["purchase"], "/api/webhooks/purchase");

    let put = Request::builder()
        .method("PUT")
        .uri("/api/webhook-urls")
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {TOKEN}"))
        .body(Body::from(
            json!({ "leadCapture": "https://hook.make.com/abc" }).to_string(),
        ))
        .expect("build request");
    let response = app.clone().oneshot(put).await.expect("request");
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(admin_get("/api/webhook-urls", Some(TOKEN)))
        .await
        .expect("request");
    let updated = json_body(response).await;
    assert_eq!(updated["leadCapture"], "https://hook.make.com/abc");
    assert_eq!(updated["purchase"], "/api/webhooks/purchase");

    let bad = Request::builder()
        .method("PUT")
        .uri("/api/webhook-urls")
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {TOKEN}"))
        .body(Body::from(json!({ "purchase": "ftp://x" }).to_string()))
        .expect("build request");
    let response = app.oneshot(bad).await.expect("request");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_secure_cookie_when_https() {
    let (_state, app) = setup(None);
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/session")
                .body(Body::empty())
                .expect("build request"),
        )
        .await
        .expect("request");
    let cookie = response
        .headers()
        .get("set-cookie")
        .expect("session cookie")
        .to_str()
        .unwrap();
    assert!(cookie.ends_with("; Secure"));
}
