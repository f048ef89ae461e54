use std::sync::Arc;

use chrono::{Duration, Utc};

use aura_core::attribution::AttributionSnapshot;
use aura_core::record::{
    ConversionEvent, DeviceInfo, LeadRecord, PurchaseRecord, QuizAnswer, QuizAnswers, VisitUpsert,
};
use aura_core::store::{FunnelStore, PurchaseInsert};
use aura_core::webhook::WebhookUrls;
use aura_core::SessionToken;
use aura_duckdb::DuckDbBackend;

fn visit(session: &SessionToken, path: &str, utm_source: Option<&str>) -> VisitUpsert {
    VisitUpsert {
        session_token: session.clone(),
        client_ip: Some("203.0.113.7".to_string()),
        user_agent: Some("Mozilla/5.0".to_string()),
        referrer: None,
        current_path: path.to_string(),
        attribution: AttributionSnapshot {
            utm_source: utm_source.map(str::to_string),
            ..Default::default()
        },
        country_code: Some("CO".to_string()),
        device: DeviceInfo {
            browser: Some("Chrome".to_string()),
            os: Some("Android".to_string()),
            device_type: Some("mobile".to_string()),
        },
        at: Utc::now(),
    }
}

fn answers(pairs: &[(u32, &str)]) -> QuizAnswers {
    pairs
        .iter()
        .map(|(q, a)| (*q, QuizAnswer::Single(a.to_string())))
        .collect()
}

fn lead(session: &SessionToken, email: &str) -> LeadRecord {
    let quiz_answers = answers(&[(1, "marca-emergente"), (3, "fotografia")]);
    LeadRecord {
        id: uuid::Uuid::new_v4().to_string(),
        session_token: session.clone(),
        name: "Ana".to_string(),
        email: email.to_string(),
        whatsapp: Some("+573001234567".to_string()),
        client_ip: Some("203.0.113.7".to_string()),
        country_code: Some("CO".to_string()),
        user_agent: None,
        current_url: Some("https://funnel.test/lead".to_string()),
        attribution: AttributionSnapshot {
            utm_source: Some("fb".to_string()),
            fbclid: Some("123".to_string()),
            ..Default::default()
        },
        bucket_id: aura_core::record::bucket_id(&quiz_answers),
        business_type: aura_core::record::business_type(&quiz_answers),
        quiz_answers,
        event_type: ConversionEvent::InitiateCheckout,
        value: 15.0,
        currency: "USD".to_string(),
        created_at: Utc::now(),
    }
}

fn purchase(session: &SessionToken, transaction_id: &str) -> PurchaseRecord {
    PurchaseRecord {
        id: uuid::Uuid::new_v4().to_string(),
        session_token: session.clone(),
        transaction_id: transaction_id.to_string(),
        order_id: transaction_id.to_string(),
        name: Some("Ana".to_string()),
        email: Some("ana@x.com".to_string()),
        whatsapp: None,
        client_ip: None,
        country_code: None,
        user_agent: None,
        attribution: AttributionSnapshot::default(),
        quiz_answers: QuizAnswers::new(),
        payment_method: "hotmart".to_string(),
        event_type: ConversionEvent::Purchase,
        value: 15.0,
        currency: "USD".to_string(),
        created_at: Utc::now(),
    }
}

#[tokio::test]
async fn visits_increment_a_single_row() {
    let db = DuckDbBackend::open_in_memory().expect("open db");
    let session = SessionToken::generate();

    let first = db.upsert_visit(&visit(&session, "/", Some("fb"))).await.unwrap();
    let second = db.upsert_visit(&visit(&session, "/quiz", Some("fb"))).await.unwrap();

    assert_eq!(first.page_views, 1);
    assert_eq!(second.page_views, 2);
    assert_eq!(second.current_path, "/quiz");
    assert_eq!(second.first_visit, first.first_visit);
    assert_eq!(second.attribution.utm_source.as_deref(), Some("fb"));
    assert_eq!(second.device.device_type.as_deref(), Some("mobile"));

    let conn = db.conn_for_test().await;
    let rows: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM visitors WHERE session_token = ?1",
            aura_duckdb::duckdb::params![session.as_str()],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(rows, 1);
}

#[tokio::test]
async fn concurrent_visits_are_all_counted() {
    let db = Arc::new(DuckDbBackend::open_in_memory().expect("open db"));
    let session = SessionToken::generate();

    let mut handles = Vec::new();
    for i in 0..8 {
        let db = db.clone();
        let session = session.clone();
        handles.push(tokio::spawn(async move {
            db.upsert_visit(&visit(&session, &format!("/page/{i}"), None))
                .await
                .unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let row = db.get_visitor(&session).await.unwrap().unwrap();
    assert_eq!(row.page_views, 8);
}

#[tokio::test]
async fn visit_without_geo_keeps_stored_country() {
    let db = DuckDbBackend::open_in_memory().expect("open db");
    let session = SessionToken::generate();

    db.upsert_visit(&visit(&session, "/", None)).await.unwrap();
    let mut later = visit(&session, "/quiz", None);
    later.country_code = None;
    let row = db.upsert_visit(&later).await.unwrap();

    assert_eq!(row.country_code.as_deref(), Some("CO"));
}

#[tokio::test]
async fn quiz_answers_merge_and_start_is_not_reset() {
    let db = DuckDbBackend::open_in_memory().expect("open db");
    let session = SessionToken::generate();
    let t0 = Utc::now();

    let started = db.upsert_quiz_start(&session, t0).await.unwrap();
    db.merge_quiz_answer(&session, 1, &QuizAnswer::Single("marca-emergente".into()), t0)
        .await
        .unwrap();
    db.merge_quiz_answer(
        &session,
        2,
        &QuizAnswer::Multiple(vec!["ventas".into(), "tiempo".into()]),
        t0,
    )
    .await
    .unwrap();
    db.merge_quiz_answer(&session, 3, &QuizAnswer::Single("fotografia".into()), t0)
        .await
        .unwrap();
    let restarted = db
        .upsert_quiz_start(&session, t0 + Duration::minutes(10))
        .await
        .unwrap();

    assert_eq!(restarted.started_at, started.started_at);
    assert_eq!(restarted.answers.len(), 3);
    assert_eq!(
        restarted.answers[&2],
        QuizAnswer::Multiple(vec!["ventas".into(), "tiempo".into()])
    );
    assert!(!restarted.completed);

    let completed = db.mark_quiz_completed(&session, Utc::now()).await.unwrap();
    assert!(completed.completed);
    assert_eq!(completed.answers.len(), 3);
}

#[tokio::test]
async fn answer_before_start_creates_the_row() {
    let db = DuckDbBackend::open_in_memory().expect("open db");
    let session = SessionToken::generate();

    let progress = db
        .merge_quiz_answer(&session, 3, &QuizAnswer::Single("fotografia".into()), Utc::now())
        .await
        .unwrap();
    assert!(!progress.started);
    assert_eq!(progress.started_at, None);

    let started = db.upsert_quiz_start(&session, Utc::now()).await.unwrap();
    assert!(started.started);
    assert!(started.started_at.is_some());
    assert_eq!(started.answers.len(), 1);
}

#[tokio::test]
async fn concurrent_answers_are_all_kept() {
    let db = Arc::new(DuckDbBackend::open_in_memory().expect("open db"));
    let session = SessionToken::generate();

    let mut handles = Vec::new();
    for q in 1..=6u32 {
        let db = db.clone();
        let session = session.clone();
        handles.push(tokio::spawn(async move {
            db.merge_quiz_answer(&session, q, &QuizAnswer::Single(format!("opt-{q}")), Utc::now())
                .await
                .unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let progress = db.get_quiz_progress(&session).await.unwrap().unwrap();
    assert_eq!(progress.answers.len(), 6);
}

#[tokio::test]
async fn leads_are_append_only() {
    let db = DuckDbBackend::open_in_memory().expect("open db");
    let session = SessionToken::generate();

    db.insert_lead(&lead(&session, "ana@x.com")).await.unwrap();
    db.insert_lead(&lead(&session, "ana@x.com")).await.unwrap();

    let leads = db.list_leads(10).await.unwrap();
    assert_eq!(leads.len(), 2);
    assert_eq!(leads[0].session_token, session);
    assert_eq!(leads[0].bucket_id, "fotografia");
    assert_eq!(leads[0].business_type, "marca-emergente");
    assert_eq!(leads[0].attribution.fbclid.as_deref(), Some("123"));
    assert_eq!(leads[0].event_type, ConversionEvent::InitiateCheckout);
    assert_eq!(leads[0].quiz_answers.len(), 2);
}

#[tokio::test]
async fn purchases_deduplicate_on_transaction_id() {
    let db = DuckDbBackend::open_in_memory().expect("open db");
    let session = SessionToken::generate();

    assert_eq!(
        db.insert_purchase(&purchase(&session, "HP-1")).await.unwrap(),
        PurchaseInsert::Inserted
    );
    assert_eq!(
        db.insert_purchase(&purchase(&session, "HP-1")).await.unwrap(),
        PurchaseInsert::Duplicate
    );
    assert_eq!(
        db.insert_purchase(&purchase(&session, "HP-2")).await.unwrap(),
        PurchaseInsert::Inserted
    );

    let purchases = db.list_purchases(10).await.unwrap();
    assert_eq!(purchases.len(), 2);
    assert_eq!(purchases[0].event_type, ConversionEvent::Purchase);
}

#[tokio::test]
async fn totals_and_conversion_rate() {
    let db = DuckDbBackend::open_in_memory().expect("open db");
    let a = SessionToken::generate();
    let b = SessionToken::generate();

    db.upsert_visit(&visit(&a, "/", None)).await.unwrap();
    db.upsert_visit(&visit(&a, "/quiz", None)).await.unwrap();
    db.upsert_visit(&visit(&b, "/", None)).await.unwrap();
    db.upsert_quiz_start(&a, Utc::now()).await.unwrap();
    db.mark_quiz_completed(&a, Utc::now()).await.unwrap();
    db.insert_lead(&lead(&a, "ana@x.com")).await.unwrap();
    db.insert_lead(&lead(&b, "bea@x.com")).await.unwrap();
    db.insert_lead(&lead(&b, "bea@x.com")).await.unwrap();
    db.insert_purchase(&purchase(&a, "HP-9")).await.unwrap();

    let totals = FunnelStore::funnel_totals(&db).await.unwrap();
    assert_eq!(totals.visitors, 2);
    assert_eq!(totals.page_views, 3);
    assert_eq!(totals.quiz_started, 1);
    assert_eq!(totals.quiz_completed, 1);
    assert_eq!(totals.leads, 3);
    assert_eq!(totals.purchases, 1);

    let metrics = aura_core::store::FunnelMetrics::from(totals);
    assert_eq!(metrics.conversion_rate, 33.3);
}

#[tokio::test]
async fn webhook_urls_persist_in_settings() {
    let db = DuckDbBackend::open_in_memory().expect("open db");
    assert_eq!(WebhookUrls::load(&db).await, WebhookUrls::default());

    let urls = WebhookUrls {
        lead_capture: "https://hooks.example.com/lead".to_string(),
        purchase: "/api/webhooks/purchase".to_string(),
    };
    urls.save(&db).await.unwrap();

    assert_eq!(WebhookUrls::load(&db).await, urls);
}
