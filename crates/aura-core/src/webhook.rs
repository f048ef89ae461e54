//! Outbound webhook delivery with same-origin / proxied / opaque routing.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use url::Url;

use crate::error::FunnelError;
use crate::store::FunnelStore;

/// Datastore setting holding the configured [`WebhookUrls`].
pub const WEBHOOK_URLS_SETTING: &str = "webhook_urls";
/// Path of the same-origin relay, relative to the proxy base.
pub const PROXY_PATH: &str = "/api/webhooks/proxy";

pub const DEFAULT_LEAD_CAPTURE_URL: &str = "/api/webhooks/lead-capture";
pub const DEFAULT_PURCHASE_URL: &str = "/api/webhooks/purchase";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookUrls {
    pub lead_capture: String,
    pub purchase: String,
}

impl Default for WebhookUrls {
    fn default() -> Self {
        Self {
            lead_capture: DEFAULT_LEAD_CAPTURE_URL.to_string(),
            purchase: DEFAULT_PURCHASE_URL.to_string(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredUrls {
    lead_capture: Option<String>,
    purchase: Option<String>,
}

fn or_default(value: Option<String>, default: &str) -> String {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

impl WebhookUrls {
    /// Parse the stored setting. Missing or empty fields fall back to their
    /// defaults individually; unreadable JSON yields the defaults.
    pub fn from_setting(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return Self::default();
        };
        match serde_json::from_str::<StoredUrls>(raw) {
            Ok(stored) => Self {
                lead_capture: or_default(stored.lead_capture, DEFAULT_LEAD_CAPTURE_URL),
                purchase: or_default(stored.purchase, DEFAULT_PURCHASE_URL),
            },
            Err(e) => {
                warn!(error = %e, "Unreadable webhook URL setting, using defaults");
                Self::default()
            }
        }
    }

    pub async fn load(store: &dyn FunnelStore) -> Self {
        match store.get_setting(WEBHOOK_URLS_SETTING).await {
            Ok(raw) => Self::from_setting(raw.as_deref()),
            Err(e) => {
                warn!(error = %e, "Failed to load webhook URLs, using defaults");
                Self::default()
            }
        }
    }

    pub async fn save(&self, store: &dyn FunnelStore) -> anyhow::Result<()> {
        let raw = serde_json::to_string(self)?;
        store.set_setting(WEBHOOK_URLS_SETTING, &raw).await
    }
}

/// Body accepted by the same-origin relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyRequest {
    pub target: String,
    pub payload: Value,
}

/// HTTP client used to POST webhook bodies.
#[async_trait::async_trait]
pub trait WebhookTransport: Send + Sync {
    /// POST `body` as JSON. Returns the response status when it can be read;
    /// with `read_response == false` the response is not inspected and
    /// `Ok(None)` means the request went out.
    async fn post_json(
        &self,
        url: &Url,
        body: &Value,
        read_response: bool,
    ) -> anyhow::Result<Option<u16>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryRoute {
    /// Target shares the application's (or the proxy's) origin.
    Direct,
    /// Cross-origin target relayed through the proxy.
    Proxied,
    /// Cross-origin target with no proxy; the response cannot be read.
    Opaque,
}

/// What `deliver` could establish about a request that went out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Confirmed { status: u16 },
    Unconfirmed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Succeeded { http_status: u16 },
    /// Sent but unconfirmed.
    Sent,
    Failed { reason: String },
}

impl DeliveryOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, DeliveryOutcome::Failed { .. })
    }
}

/// Delivery report returned to the funnel step that triggered the webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookReport {
    pub url: String,
    pub route: Option<DeliveryRoute>,
    #[serde(flatten)]
    pub outcome: DeliveryOutcome,
}

pub struct WebhookDispatcher {
    app_origin: Url,
    proxy_base: Option<Url>,
    transport: Arc<dyn WebhookTransport>,
    timeout: Duration,
}

impl WebhookDispatcher {
    pub fn new(
        app_origin: Url,
        proxy_base: Option<Url>,
        transport: Arc<dyn WebhookTransport>,
        timeout: Duration,
    ) -> Self {
        Self {
            app_origin,
            proxy_base,
            transport,
            timeout,
        }
    }

    /// Make a configured URL absolute. Relative URLs resolve against the proxy
    /// base when one is configured, otherwise against the application origin.
    pub fn resolve_endpoint(&self, raw: &str) -> Result<Url, FunnelError> {
        let raw = raw.trim();
        if raw.starts_with('/') {
            let base = self.proxy_base.as_ref().unwrap_or(&self.app_origin);
            return base
                .join(raw)
                .map_err(|e| FunnelError::Webhook(format!("invalid webhook url {raw}: {e}")));
        }
        Url::parse(raw).map_err(|e| FunnelError::Webhook(format!("invalid webhook url {raw}: {e}")))
    }

    /// Whether `target` is one of the configured endpoints once resolved.
    /// The relay forwards nothing else.
    pub fn is_configured_target(&self, urls: &WebhookUrls, target: &Url) -> bool {
        [urls.lead_capture.as_str(), urls.purchase.as_str()]
            .into_iter()
            .filter_map(|raw| self.resolve_endpoint(raw).ok())
            .any(|endpoint| &endpoint == target)
    }

    pub fn route_for(&self, target: &Url) -> DeliveryRoute {
        let origin = target.origin();
        let same_origin = origin == self.app_origin.origin()
            || self
                .proxy_base
                .as_ref()
                .is_some_and(|proxy| origin == proxy.origin());
        if same_origin {
            DeliveryRoute::Direct
        } else if self.proxy_base.is_some() {
            DeliveryRoute::Proxied
        } else {
            DeliveryRoute::Opaque
        }
    }

    async fn post(
        &self,
        url: &Url,
        body: &Value,
        read_response: bool,
    ) -> Result<Option<u16>, FunnelError> {
        match tokio::time::timeout(self.timeout, self.transport.post_json(url, body, read_response))
            .await
        {
            Ok(Ok(status)) => Ok(status),
            Ok(Err(e)) => Err(FunnelError::Webhook(e.to_string())),
            Err(_) => Err(FunnelError::Webhook(format!(
                "timed out after {}ms",
                self.timeout.as_millis()
            ))),
        }
    }

    fn confirm(status: Option<u16>) -> Result<Delivery, FunnelError> {
        match status {
            Some(status) if (200..300).contains(&status) => Ok(Delivery::Confirmed { status }),
            Some(status) => Err(FunnelError::Webhook(format!("HTTP {status}"))),
            None => Ok(Delivery::Unconfirmed),
        }
    }

    /// Deliver `payload` to `endpoint` over the route [`Self::route_for`]
    /// selects. A readable non-2xx response is an error.
    pub async fn deliver(&self, endpoint: &Url, payload: &Value) -> Result<Delivery, FunnelError> {
        match self.route_for(endpoint) {
            DeliveryRoute::Direct => Self::confirm(self.post(endpoint, payload, true).await?),
            DeliveryRoute::Proxied => {
                let proxy = self
                    .proxy_base
                    .as_ref()
                    .ok_or_else(|| FunnelError::Webhook("no proxy configured".to_string()))?
                    .join(PROXY_PATH)
                    .map_err(|e| FunnelError::Webhook(format!("invalid proxy url: {e}")))?;
                let body = serde_json::to_value(ProxyRequest {
                    target: endpoint.to_string(),
                    payload: payload.clone(),
                })?;
                Self::confirm(self.post(&proxy, &body, true).await?)
            }
            DeliveryRoute::Opaque => {
                self.post(endpoint, payload, false).await?;
                Ok(Delivery::Unconfirmed)
            }
        }
    }

    /// Resolve and deliver, turning every failure into a logged report.
    pub async fn dispatch<T: Serialize>(&self, endpoint: &str, payload: &T) -> WebhookReport {
        let url = match self.resolve_endpoint(endpoint) {
            Ok(url) => url,
            Err(e) => {
                warn!(endpoint = %endpoint, error = %e, "Webhook not sent");
                return WebhookReport {
                    url: endpoint.to_string(),
                    route: None,
                    outcome: DeliveryOutcome::Failed {
                        reason: e.to_string(),
                    },
                };
            }
        };
        let route = self.route_for(&url);

        let result = match serde_json::to_value(payload) {
            Ok(body) => self.deliver(&url, &body).await,
            Err(e) => Err(FunnelError::from(e)),
        };
        let outcome = match result {
            Ok(Delivery::Confirmed { status }) => {
                info!(endpoint = %url, ?route, status, "Webhook delivered");
                DeliveryOutcome::Succeeded { http_status: status }
            }
            Ok(Delivery::Unconfirmed) => {
                info!(endpoint = %url, ?route, "Webhook sent without confirmation");
                DeliveryOutcome::Sent
            }
            Err(e) => {
                warn!(endpoint = %url, ?route, error = %e, "Webhook delivery failed");
                DeliveryOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        };
        WebhookReport {
            url: url.to_string(),
            route: Some(route),
            outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::memory::MemoryStore;

    #[derive(Default)]
    struct RecordingTransport {
        calls: Mutex<Vec<(String, Value, bool)>>,
        status: Option<u16>,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl WebhookTransport for RecordingTransport {
        async fn post_json(
            &self,
            url: &Url,
            body: &Value,
            read_response: bool,
        ) -> anyhow::Result<Option<u16>> {
            self.calls
                .lock()
                .unwrap()
                .push((url.to_string(), body.clone(), read_response));
            if self.fail {
                anyhow::bail!("connection refused");
            }
            Ok(if read_response { self.status } else { None })
        }
    }

    fn dispatcher(proxy: Option<&str>, transport: Arc<RecordingTransport>) -> WebhookDispatcher {
        WebhookDispatcher::new(
            Url::parse("https://funnel.test").unwrap(),
            proxy.map(|p| Url::parse(p).unwrap()),
            transport,
            Duration::from_secs(5),
        )
    }

    #[test]
    fn relative_urls_resolve_against_proxy_then_app() {
        let transport = Arc::new(RecordingTransport::default());
        let with_proxy = dispatcher(Some("https://api.funnel.test"), transport.clone());
        let without = dispatcher(None, transport);

        assert_eq!(
            with_proxy.resolve_endpoint("/api/webhooks/purchase").unwrap().as_str(),
            "https://api.funnel.test/api/webhooks/purchase"
        );
        assert_eq!(
            without.resolve_endpoint("/api/webhooks/purchase").unwrap().as_str(),
            "https://funnel.test/api/webhooks/purchase"
        );
        assert!(without.resolve_endpoint("not a url").is_err());
    }

    #[test]
    fn only_configured_endpoints_are_relay_targets() {
        let d = dispatcher(Some("https://api.funnel.test"), Arc::default());
        let urls = WebhookUrls {
            lead_capture: "https://hook.make.com/abc".to_string(),
            ..Default::default()
        };
        let allowed = |raw: &str| d.is_configured_target(&urls, &Url::parse(raw).unwrap());

        assert!(allowed("https://hook.make.com/abc"));
        assert!(allowed("https://api.funnel.test/api/webhooks/purchase"));
        assert!(!allowed("https://hook.make.com/other"));
        assert!(!allowed("https://attacker.example/collect"));
    }

    #[test]
    fn route_selection() {
        let transport = Arc::new(RecordingTransport::default());
        let with_proxy = dispatcher(Some("https://api.funnel.test"), transport.clone());
        let without = dispatcher(None, transport);
        let same = Url::parse("https://funnel.test/hook").unwrap();
        let cross = Url::parse("https://hooks.example.com/catch/1").unwrap();

        assert_eq!(with_proxy.route_for(&same), DeliveryRoute::Direct);
        assert_eq!(with_proxy.route_for(&cross), DeliveryRoute::Proxied);
        assert_eq!(without.route_for(&cross), DeliveryRoute::Opaque);
    }

    #[tokio::test]
    async fn cross_origin_goes_through_proxy() {
        let transport = Arc::new(RecordingTransport {
            status: Some(200),
            ..Default::default()
        });
        let d = dispatcher(Some("https://api.funnel.test"), transport.clone());

        let report = d
            .dispatch("https://hooks.example.com/catch/1", &serde_json::json!({"a": 1}))
            .await;

        assert_eq!(report.outcome, DeliveryOutcome::Succeeded { http_status: 200 });
        let calls = transport.calls.lock().unwrap();
        assert_eq!(calls[0].0, "https://api.funnel.test/api/webhooks/proxy");
        assert_eq!(calls[0].1["target"], "https://hooks.example.com/catch/1");
        assert_eq!(calls[0].1["payload"]["a"], 1);
    }

    #[tokio::test]
    async fn opaque_delivery_is_sent_not_succeeded() {
        let transport = Arc::new(RecordingTransport {
            status: Some(200),
            ..Default::default()
        });
        let report = dispatcher(None, transport.clone())
            .dispatch("https://hooks.example.com/catch/1", &serde_json::json!({}))
            .await;

        assert_eq!(report.outcome, DeliveryOutcome::Sent);
        assert_eq!(report.route, Some(DeliveryRoute::Opaque));
        assert!(!transport.calls.lock().unwrap()[0].2);
    }

    #[tokio::test]
    async fn failures_are_reported_not_raised() {
        let rejecting = Arc::new(RecordingTransport {
            status: Some(500),
            ..Default::default()
        });
        let report = dispatcher(None, rejecting)
            .dispatch("/api/webhooks/lead-capture", &serde_json::json!({}))
            .await;
        assert_eq!(
            report.outcome,
            DeliveryOutcome::Failed {
                reason: "webhook delivery failed: HTTP 500".to_string()
            }
        );

        let unreachable = Arc::new(RecordingTransport {
            fail: true,
            ..Default::default()
        });
        let report = dispatcher(None, unreachable)
            .dispatch("/api/webhooks/lead-capture", &serde_json::json!({}))
            .await;
        assert!(report.outcome.is_failure());
    }

    #[tokio::test]
    async fn urls_fall_back_per_field() {
        let store = MemoryStore::new();
        assert_eq!(WebhookUrls::load(&store).await, WebhookUrls::default());

        store
            .set_setting(WEBHOOK_URLS_SETTING, r#"{"leadCapture":"https://hooks.example.com/l","purchase":""}"#)
            .await
            .unwrap();
        let urls = WebhookUrls::load(&store).await;
        assert_eq!(urls.lead_capture, "https://hooks.example.com/l");
        assert_eq!(urls.purchase, DEFAULT_PURCHASE_URL);

        assert_eq!(WebhookUrls::from_setting(Some("{not json")), WebhookUrls::default());
    }
}
