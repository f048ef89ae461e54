//! The funnel's state-and-event bus.
//!
//! One exhaustive handler per [`FunnelEvent`] kind. Storage and webhook
//! failures never abort a step: they are logged and surfaced in the returned
//! [`RecordOutcome`]. Only lead validation produces an `Err`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::OfferConfig;
use crate::error::FunnelError;
use crate::event::{ClientContext, FunnelEvent, LeadForm, PageVisit, PurchaseConfirmation, WebhookPayload};
use crate::geo::{GeoRecord, GeoResolver};
use crate::record::{
    bucket_id, business_type, ConversionEvent, FunnelStep, LeadRecord, PurchaseRecord,
    QuizAnswer, QuizAnswers, QuizProgressRecord, VisitUpsert, VisitorRecord,
};
use crate::session::SessionToken;
use crate::sink::{AnalyticsSink, TrackedEvent};
use crate::store::{FunnelStore, PurchaseInsert};
use crate::webhook::{WebhookDispatcher, WebhookReport, WebhookUrls};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WriteStatus {
    Written,
    /// Already recorded for this session; nothing written.
    Skipped,
    /// The datastore already held this record.
    Duplicate,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StoredRecord {
    Visitor(VisitorRecord),
    Quiz(QuizProgressRecord),
    Lead(LeadRecord),
    Purchase(PurchaseRecord),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordOutcome {
    pub kind: &'static str,
    pub write: WriteStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stored: Option<StoredRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook: Option<WebhookReport>,
    pub next_step: Option<FunnelStep>,
}

impl RecordOutcome {
    fn new(event: &FunnelEvent, write: WriteStatus, stored: Option<StoredRecord>) -> Self {
        Self {
            kind: event.kind(),
            write,
            stored,
            webhook: None,
            next_step: event.next_step(),
        }
    }
}

fn write_result<T>(
    session: &SessionToken,
    kind: &str,
    result: anyhow::Result<T>,
) -> (WriteStatus, Option<T>) {
    match result {
        Ok(row) => (WriteStatus::Written, Some(row)),
        Err(e) => {
            let e = FunnelError::Storage(e);
            error!(session = %session, kind, error = %e, "Funnel write failed");
            (
                WriteStatus::Failed {
                    reason: e.to_string(),
                },
                None,
            )
        }
    }
}

/// Path component of a page URL, without query or fragment.
pub fn path_of(page_url: &str) -> String {
    if let Ok(url) = url::Url::parse(page_url) {
        return url.path().to_string();
    }
    let path = page_url
        .split(['?', '#'])
        .next()
        .unwrap_or_default()
        .trim();
    if path.is_empty() {
        "/".to_string()
    } else {
        path.to_string()
    }
}

pub struct EventRecorder {
    store: Arc<dyn FunnelStore>,
    geo: Arc<dyn GeoResolver>,
    webhooks: Arc<WebhookDispatcher>,
    sinks: Vec<Arc<dyn AnalyticsSink>>,
    offer: OfferConfig,
    quiz_started: Mutex<HashMap<SessionToken, Instant>>,
}

impl EventRecorder {
    pub fn new(
        store: Arc<dyn FunnelStore>,
        geo: Arc<dyn GeoResolver>,
        webhooks: Arc<WebhookDispatcher>,
        offer: OfferConfig,
    ) -> Self {
        Self {
            store,
            geo,
            webhooks,
            sinks: Vec::new(),
            offer,
            quiz_started: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn AnalyticsSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn store(&self) -> &Arc<dyn FunnelStore> {
        &self.store
    }

    pub fn offer(&self) -> &OfferConfig {
        &self.offer
    }

    fn track(&self, name: &str, session: &SessionToken, properties: serde_json::Value) {
        let event = TrackedEvent::new(name, session, properties);
        for sink in &self.sinks {
            sink.emit(&event);
        }
    }

    /// Record one funnel event for `ctx.session`.
    #[instrument(skip(self, ctx, event), fields(session = %ctx.session, kind = event.kind()))]
    pub async fn record(
        &self,
        ctx: &ClientContext,
        event: FunnelEvent,
    ) -> Result<RecordOutcome, FunnelError> {
        match &event {
            FunnelEvent::Visit(visit) => Ok(self.record_visit(ctx, &event, visit).await),
            FunnelEvent::QuizStart => Ok(self.record_quiz_start(ctx, &event).await),
            FunnelEvent::QuizAnswer {
                question_id,
                answer,
            } => Ok(self
                .record_quiz_answer(ctx, &event, *question_id, answer)
                .await),
            FunnelEvent::QuizComplete => Ok(self.record_quiz_complete(ctx, &event).await),
            FunnelEvent::LeadSubmit(form) => self.record_lead(ctx, &event, form).await,
            FunnelEvent::Purchase(confirmation) => {
                Ok(self.record_purchase(ctx, &event, confirmation).await)
            }
        }
    }

    async fn record_visit(
        &self,
        ctx: &ClientContext,
        event: &FunnelEvent,
        visit: &PageVisit,
    ) -> RecordOutcome {
        let geo = self.geo.resolve(&ctx.session, ctx.client_ip.as_deref()).await;
        let upsert = VisitUpsert {
            session_token: ctx.session.clone(),
            client_ip: ctx.client_ip.clone().or_else(|| geo.ip.clone()),
            user_agent: ctx.user_agent.clone(),
            referrer: visit.referrer.clone().filter(|r| !r.is_empty()),
            current_path: path_of(&visit.url),
            attribution: ctx.attribution.clone(),
            country_code: geo.country_code.clone(),
            device: ctx.device.clone(),
            at: Utc::now(),
        };
        let (write, row) = write_result(&ctx.session, "visit", self.store.upsert_visit(&upsert).await);
        if let Some(row) = &row {
            debug!(page_views = row.page_views, path = %row.current_path, "Visit recorded");
        }
        self.track(
            "page_view",
            &ctx.session,
            json!({ "path": upsert.current_path, "utm_source": ctx.attribution.utm_source }),
        );
        RecordOutcome::new(event, write, row.map(StoredRecord::Visitor))
    }

    async fn record_quiz_start(&self, ctx: &ClientContext, event: &FunnelEvent) -> RecordOutcome {
        let first = {
            let mut started = self
                .quiz_started
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            match started.get(&ctx.session) {
                Some(_) => false,
                None => {
                    started.insert(ctx.session.clone(), Instant::now());
                    true
                }
            }
        };
        if !first {
            debug!("Quiz start already recorded for session");
            return RecordOutcome::new(event, WriteStatus::Skipped, None);
        }

        let (write, row) = write_result(
            &ctx.session,
            "quiz_start",
            self.store.upsert_quiz_start(&ctx.session, Utc::now()).await,
        );
        if matches!(write, WriteStatus::Failed { .. }) {
            // Nothing was stored, so the next start must retry the write.
            self.quiz_started
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&ctx.session);
        }
        self.track("quiz_start", &ctx.session, json!({ "timestamp": Utc::now() }));
        RecordOutcome::new(event, write, row.map(StoredRecord::Quiz))
    }

    async fn record_quiz_answer(
        &self,
        ctx: &ClientContext,
        event: &FunnelEvent,
        question_id: u32,
        answer: &QuizAnswer,
    ) -> RecordOutcome {
        let (write, row) = write_result(
            &ctx.session,
            "quiz_answer",
            self.store
                .merge_quiz_answer(&ctx.session, question_id, answer, Utc::now())
                .await,
        );
        self.track(
            "quiz_answer",
            &ctx.session,
            json!({ "question_id": question_id, "answer": answer }),
        );
        RecordOutcome::new(event, write, row.map(StoredRecord::Quiz))
    }

    async fn record_quiz_complete(&self, ctx: &ClientContext, event: &FunnelEvent) -> RecordOutcome {
        let (write, row) = write_result(
            &ctx.session,
            "quiz_complete",
            self.store.mark_quiz_completed(&ctx.session, Utc::now()).await,
        );
        let answered = row.as_ref().map(|r| r.answers.len()).unwrap_or_default();
        self.track(
            "quiz_complete",
            &ctx.session,
            json!({ "answers_count": answered }),
        );
        RecordOutcome::new(event, write, row.map(StoredRecord::Quiz))
    }

    /// Answers carried by the request, else those already stored.
    async fn answers_snapshot(
        &self,
        session: &SessionToken,
        carried: Option<&QuizAnswers>,
    ) -> QuizAnswers {
        if let Some(answers) = carried.filter(|a| !a.is_empty()) {
            return answers.clone();
        }
        match self.store.get_quiz_progress(session).await {
            Ok(progress) => progress.map(|p| p.answers).unwrap_or_default(),
            Err(e) => {
                warn!(session = %session, error = %e, "Quiz answers unavailable for snapshot");
                QuizAnswers::new()
            }
        }
    }

    async fn record_lead(
        &self,
        ctx: &ClientContext,
        event: &FunnelEvent,
        form: &LeadForm,
    ) -> Result<RecordOutcome, FunnelError> {
        let valid = match form.validate() {
            Ok(valid) => valid,
            Err(errors) => {
                let fields: Vec<&str> = errors.fields().collect();
                info!(fields = ?fields, "Lead rejected by validation");
                self.track(
                    "lead_submit_attempt",
                    &ctx.session,
                    json!({ "success": false, "errors": fields }),
                );
                return Err(FunnelError::Validation(errors));
            }
        };

        let geo: GeoRecord = self.geo.resolve(&ctx.session, ctx.client_ip.as_deref()).await;
        let answers = self
            .answers_snapshot(&ctx.session, form.quiz_answers.as_ref())
            .await;

        let lead = LeadRecord {
            id: Uuid::new_v4().to_string(),
            session_token: ctx.session.clone(),
            name: valid.name,
            email: valid.email,
            whatsapp: valid.whatsapp,
            client_ip: geo.ip.clone().or_else(|| ctx.client_ip.clone()),
            country_code: geo.country_code.clone(),
            user_agent: ctx.user_agent.clone(),
            current_url: ctx.current_url.clone(),
            attribution: ctx.attribution.clone(),
            bucket_id: bucket_id(&answers),
            business_type: business_type(&answers),
            quiz_answers: answers,
            event_type: ConversionEvent::InitiateCheckout,
            value: self.offer.value,
            currency: self.offer.currency.clone(),
            created_at: Utc::now(),
        };

        let (write, _) = write_result(&ctx.session, "lead_submit", self.store.insert_lead(&lead).await);

        let urls = WebhookUrls::load(self.store.as_ref()).await;
        let payload = WebhookPayload::for_lead(&lead, ctx, &self.offer);
        let report = self.webhooks.dispatch(&urls.lead_capture, &payload).await;

        self.track(
            "lead_submitted",
            &ctx.session,
            json!({
                "success": true,
                "has_whatsapp": lead.whatsapp.is_some(),
                "quiz_answers_count": lead.quiz_answers.len(),
                "webhook_sent": !report.outcome.is_failure(),
                "client_ip": lead.client_ip,
            }),
        );

        let mut outcome = RecordOutcome::new(event, write, Some(StoredRecord::Lead(lead)));
        outcome.webhook = Some(report);
        Ok(outcome)
    }

    async fn record_purchase(
        &self,
        ctx: &ClientContext,
        event: &FunnelEvent,
        confirmation: &PurchaseConfirmation,
    ) -> RecordOutcome {
        let now = Utc::now();
        let transaction_id = confirmation.transaction_id_or_default(now);
        let geo = self.geo.resolve(&ctx.session, ctx.client_ip.as_deref()).await;
        let answers = self.answers_snapshot(&ctx.session, None).await;

        let purchase = PurchaseRecord {
            id: Uuid::new_v4().to_string(),
            session_token: ctx.session.clone(),
            order_id: confirmation
                .order_id
                .clone()
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| transaction_id.clone()),
            transaction_id,
            name: confirmation.name.clone(),
            email: confirmation.email.clone(),
            whatsapp: confirmation
                .whatsapp
                .as_deref()
                .and_then(crate::event::normalize_phone),
            client_ip: geo.ip.clone().or_else(|| ctx.client_ip.clone()),
            country_code: geo.country_code.clone(),
            user_agent: ctx.user_agent.clone(),
            attribution: ctx.attribution.clone(),
            quiz_answers: answers,
            payment_method: confirmation
                .payment_method
                .clone()
                .unwrap_or_else(|| self.offer.payment_method.clone()),
            event_type: ConversionEvent::Purchase,
            value: self.offer.value,
            currency: self.offer.currency.clone(),
            created_at: now,
        };

        let write = match self.store.insert_purchase(&purchase).await {
            Ok(PurchaseInsert::Inserted) => WriteStatus::Written,
            Ok(PurchaseInsert::Duplicate) => {
                info!(transaction_id = %purchase.transaction_id, "Duplicate purchase confirmation ignored");
                return RecordOutcome::new(event, WriteStatus::Duplicate, None);
            }
            Err(e) => write_result::<()>(&ctx.session, "purchase", Err(e)).0,
        };

        let urls = WebhookUrls::load(self.store.as_ref()).await;
        let payload = WebhookPayload::for_purchase(
            &purchase,
            ctx,
            &self.offer,
            confirmation.provider_data.clone(),
        );
        let report = self.webhooks.dispatch(&urls.purchase, &payload).await;

        self.track(
            "purchase",
            &ctx.session,
            json!({
                "transaction_id": purchase.transaction_id,
                "value": purchase.value,
                "currency": purchase.currency,
            }),
        );

        let mut outcome = RecordOutcome::new(event, write, Some(StoredRecord::Purchase(purchase)));
        outcome.webhook = Some(report);
        outcome
    }

    /// Forget quiz-start guards older than `max_age`.
    pub fn prune(&self, max_age: Duration) -> usize {
        let mut started = self
            .quiz_started
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let before = started.len();
        started.retain(|_, at| at.elapsed() < max_age);
        before - started.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::Value;
    use url::Url;

    use super::*;
    use crate::attribution::AttributionSnapshot;
    use crate::geo::{GeoAttributionCache, GeoLookup, GeoLookupResponse};
    use crate::memory::MemoryStore;
    use crate::webhook::WebhookTransport;

    struct FixedGeo;

    #[async_trait]
    impl GeoLookup for FixedGeo {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn lookup(&self, _ip_hint: Option<&str>) -> anyhow::Result<GeoLookupResponse> {
            Ok(GeoLookupResponse {
                ip: Some("203.0.113.7".to_string()),
                country_code: Some("CO".to_string()),
                country_name: None,
            })
        }
    }

    #[derive(Default)]
    struct StubTransport {
        bodies: Mutex<Vec<Value>>,
        fail: bool,
    }

    #[async_trait]
    impl WebhookTransport for StubTransport {
        async fn post_json(&self, _url: &Url, body: &Value, _read: bool) -> anyhow::Result<Option<u16>> {
            self.bodies.lock().unwrap().push(body.clone());
            if self.fail {
                anyhow::bail!("connection reset");
            }
            Ok(Some(200))
        }
    }

    #[derive(Default)]
    struct CountingSink(AtomicUsize);

    impl AnalyticsSink for CountingSink {
        fn name(&self) -> &str {
            "counting"
        }

        fn emit(&self, _event: &TrackedEvent) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Harness {
        recorder: EventRecorder,
        store: Arc<MemoryStore>,
        transport: Arc<StubTransport>,
        sink: Arc<CountingSink>,
    }

    fn harness(fail_webhooks: bool) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let transport = Arc::new(StubTransport {
            fail: fail_webhooks,
            ..Default::default()
        });
        let sink = Arc::new(CountingSink::default());
        let geo = Arc::new(GeoAttributionCache::new(
            Arc::new(FixedGeo),
            Arc::new(FixedGeo),
            Duration::from_millis(3500),
        ));
        let webhooks = Arc::new(WebhookDispatcher::new(
            Url::parse("https://funnel.test").unwrap(),
            None,
            transport.clone(),
            Duration::from_secs(5),
        ));
        let recorder = EventRecorder::new(store.clone(), geo, webhooks, OfferConfig::default())
            .with_sink(sink.clone());
        Harness {
            recorder,
            store,
            transport,
            sink,
        }
    }

    fn ctx() -> ClientContext {
        let mut ctx = ClientContext::new(SessionToken::generate());
        ctx.attribution = AttributionSnapshot {
            utm_source: Some("fb".to_string()),
            fbclid: Some("123".to_string()),
            ..Default::default()
        };
        ctx
    }

    fn lead(name: &str, email: &str) -> FunnelEvent {
        FunnelEvent::LeadSubmit(LeadForm {
            name: name.to_string(),
            email: email.to_string(),
            whatsapp: None,
            consent: true,
            quiz_answers: None,
        })
    }

    fn answer(question_id: u32, option: &str) -> FunnelEvent {
        FunnelEvent::QuizAnswer {
            question_id,
            answer: QuizAnswer::Single(option.to_string()),
        }
    }

    #[tokio::test]
    async fn answers_merge_and_start_is_kept() {
        let h = harness(false);
        let ctx = ctx();

        h.recorder.record(&ctx, FunnelEvent::QuizStart).await.unwrap();
        let started_at = h
            .store
            .get_quiz_progress(&ctx.session)
            .await
            .unwrap()
            .unwrap()
            .started_at;

        h.recorder.record(&ctx, answer(1, "marca-emergente")).await.unwrap();
        h.recorder.record(&ctx, answer(3, "fotografia")).await.unwrap();

        let progress = h.store.get_quiz_progress(&ctx.session).await.unwrap().unwrap();
        assert_eq!(progress.answers.len(), 2);
        assert_eq!(progress.started_at, started_at);
    }

    #[tokio::test]
    async fn quiz_start_is_recorded_once_per_session() {
        let h = harness(false);
        let ctx = ctx();

        let first = h.recorder.record(&ctx, FunnelEvent::QuizStart).await.unwrap();
        let second = h.recorder.record(&ctx, FunnelEvent::QuizStart).await.unwrap();

        assert_eq!(first.write, WriteStatus::Written);
        assert_eq!(second.write, WriteStatus::Skipped);
        assert_eq!(h.sink.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalid_lead_writes_nothing() {
        let h = harness(false);
        let ctx = ctx();

        let err = h.recorder.record(&ctx, lead("", "ana@x.com")).await.unwrap_err();
        assert!(matches!(err, FunnelError::Validation(_)));
        let err = h.recorder.record(&ctx, lead("Ana", "not-an-email")).await.unwrap_err();
        assert!(matches!(err, FunnelError::Validation(_)));

        assert!(h.store.list_leads(10).await.unwrap().is_empty());
        assert!(h.transport.bodies.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn webhook_failure_still_advances_and_stores() {
        let h = harness(true);
        let ctx = ctx();

        let outcome = h.recorder.record(&ctx, lead("Ana", "ana@x.com")).await.unwrap();

        assert_eq!(outcome.next_step, Some(FunnelStep::Diagnosis));
        assert_eq!(outcome.write, WriteStatus::Written);
        assert!(outcome.webhook.unwrap().outcome.is_failure());
        assert_eq!(h.store.list_leads(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn storage_outage_still_advances_and_sends_webhook() {
        let h = harness(false);
        h.store.set_unavailable(true);
        let ctx = ctx();

        let outcome = h.recorder.record(&ctx, lead("Ana", "ana@x.com")).await.unwrap();

        assert!(matches!(outcome.write, WriteStatus::Failed { .. }));
        assert_eq!(outcome.next_step, Some(FunnelStep::Diagnosis));
        assert_eq!(h.transport.bodies.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn lead_takes_answers_from_stored_progress() {
        let h = harness(false);
        let ctx = ctx();

        h.recorder.record(&ctx, answer(1, "marca-emergente")).await.unwrap();
        h.recorder.record(&ctx, answer(3, "fotografia")).await.unwrap();
        let outcome = h.recorder.record(&ctx, lead("Ana", "ana@x.com")).await.unwrap();

        let Some(StoredRecord::Lead(lead)) = outcome.stored else {
            panic!("expected a lead record");
        };
        assert_eq!(lead.bucket_id, "fotografia");
        assert_eq!(lead.business_type, "marca-emergente");
        assert_eq!(lead.country_code.as_deref(), Some("CO"));

        let bodies = h.transport.bodies.lock().unwrap();
        assert_eq!(bodies[0]["eventType"], "InitiateCheckout");
        assert_eq!(bodies[0]["leadSource"], "fb");
        assert_eq!(bodies[0]["funnelStep"], "lead_capture");
        assert_eq!(bodies[0]["sessionId"], ctx.session.as_str());
    }

    #[tokio::test]
    async fn duplicate_purchase_is_acknowledged_once() {
        let h = harness(false);
        let ctx = ctx();
        let confirmation = PurchaseConfirmation {
            transaction_id: Some("HP-1".to_string()),
            ..Default::default()
        };

        let first = h
            .recorder
            .record(&ctx, FunnelEvent::Purchase(confirmation.clone()))
            .await
            .unwrap();
        let second = h
            .recorder
            .record(&ctx, FunnelEvent::Purchase(confirmation))
            .await
            .unwrap();

        assert_eq!(first.write, WriteStatus::Written);
        assert_eq!(second.write, WriteStatus::Duplicate);
        assert_eq!(second.next_step, Some(FunnelStep::ThankYou));
        assert_eq!(h.store.list_purchases(10).await.unwrap().len(), 1);

        let bodies = h.transport.bodies.lock().unwrap();
        assert_eq!(bodies.len(), 1);
        assert_eq!(bodies[0]["eventType"], "Purchase");
        assert_eq!(bodies[0]["orderId"], "HP-1");
        assert_eq!(bodies[0]["paymentMethod"], "hotmart");
    }

    #[tokio::test]
    async fn visits_upsert_one_row() {
        let h = harness(false);
        let ctx = ctx();
        let visit = |url: &str| {
            FunnelEvent::Visit(PageVisit {
                url: url.to_string(),
                referrer: None,
            })
        };

        h.recorder.record(&ctx, visit("/?utm_source=fb")).await.unwrap();
        let outcome = h.recorder.record(&ctx, visit("/quiz")).await.unwrap();

        let Some(StoredRecord::Visitor(row)) = outcome.stored else {
            panic!("expected a visitor record");
        };
        assert_eq!(row.page_views, 2);
        assert_eq!(row.current_path, "/quiz");
        assert_eq!(row.country_code.as_deref(), Some("CO"));
    }

    #[tokio::test]
    async fn quiz_start_retries_after_storage_outage() {
        let h = harness(false);
        let ctx = ctx();

        h.store.set_unavailable(true);
        let first = h.recorder.record(&ctx, FunnelEvent::QuizStart).await.unwrap();
        assert!(matches!(first.write, WriteStatus::Failed { .. }));

        h.store.set_unavailable(false);
        let retry = h.recorder.record(&ctx, FunnelEvent::QuizStart).await.unwrap();
        assert_eq!(retry.write, WriteStatus::Written);

        let progress = h.store.get_quiz_progress(&ctx.session).await.unwrap().unwrap();
        assert!(progress.started);
        assert!(progress.started_at.is_some());

        let again = h.recorder.record(&ctx, FunnelEvent::QuizStart).await.unwrap();
        assert_eq!(again.write, WriteStatus::Skipped);
    }

    #[test]
    fn path_of_strips_query_and_origin() {
        assert_eq!(path_of("https://funnel.test/quiz?utm_source=fb"), "/quiz");
        assert_eq!(path_of("/diagnosis#top"), "/diagnosis");
        assert_eq!(path_of("?fbclid=1"), "/");
    }

    #[test]
    fn prune_forgets_old_quiz_guards() {
        let h = harness(false);
        h.recorder
            .quiz_started
            .lock()
            .unwrap()
            .insert(SessionToken::generate(), Instant::now());
        assert_eq!(h.recorder.prune(Duration::from_secs(60)), 0);
        assert_eq!(h.recorder.prune(Duration::ZERO), 1);
    }
}
