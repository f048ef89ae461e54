use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use url::Url;

use aura_core::attribution::AttributionContext;
use aura_core::config::Config;
use aura_core::geo::{GeoAttributionCache, GeoLookup};
use aura_core::recorder::EventRecorder;
use aura_core::session::SessionIdentity;
use aura_core::sink::{AnalyticsSink, TracingSink};
use aura_core::store::FunnelStore;
use aura_core::webhook::{WebhookDispatcher, WebhookTransport};

use crate::geo::{HttpGeoLookup, MaxMindGeoLookup};
use crate::transport::ReqwestTransport;

/// The outbound services the funnel depends on. Tests swap in stubs.
pub struct Services {
    pub primary_geo: Arc<dyn GeoLookup>,
    pub fallback_geo: Arc<dyn GeoLookup>,
    pub transport: Arc<dyn WebhookTransport>,
    pub sink: Arc<dyn AnalyticsSink>,
}

impl Services {
    /// Real HTTP services. The MaxMind database replaces the fallback HTTP
    /// service when the file exists.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let primary_geo: Arc<dyn GeoLookup> = Arc::new(HttpGeoLookup::new(
            "primary",
            &config.geo_primary_url,
            config.geo_timeout(),
        )?);
        let fallback_geo: Arc<dyn GeoLookup> = match MaxMindGeoLookup::open(&config.geoip_path) {
            Ok(Some(maxmind)) => Arc::new(maxmind),
            Ok(None) => Arc::new(HttpGeoLookup::new(
                "fallback",
                &config.geo_fallback_url,
                config.geo_timeout(),
            )?),
            Err(e) => {
                warn!(path = %config.geoip_path, error = %e, "GeoIP database unreadable, using fallback service");
                Arc::new(HttpGeoLookup::new(
                    "fallback",
                    &config.geo_fallback_url,
                    config.geo_timeout(),
                )?)
            }
        };
        Ok(Self {
            primary_geo,
            fallback_geo,
            transport: Arc::new(ReqwestTransport::new(config.webhook_timeout())?),
            sink: Arc::new(TracingSink),
        })
    }
}

/// Shared application state injected into every Axum handler via
/// [`axum::extract::State`].
pub struct AppState {
    /// The funnel datastore (DuckDB in production).
    pub db: Arc<dyn FunnelStore>,

    /// Parsed configuration, loaded once at startup from environment variables.
    pub config: Arc<Config>,

    pub recorder: Arc<EventRecorder>,

    /// Also consulted by the relay to decide which targets it may forward to.
    pub webhooks: Arc<WebhookDispatcher>,

    /// Per-session geolocation; also read by `GET /api/session`.
    pub geo: Arc<GeoAttributionCache>,

    pub identity: SessionIdentity,
    pub attribution: AttributionContext,
}

impl AppState {
    pub fn new(db: Arc<dyn FunnelStore>, config: Config) -> anyhow::Result<Self> {
        let services = Services::from_config(&config)?;
        Self::with_services(db, config, services)
    }

    pub fn with_services(
        db: Arc<dyn FunnelStore>,
        config: Config,
        services: Services,
    ) -> anyhow::Result<Self> {
        let app_origin = Url::parse(&config.public_url)
            .map_err(|e| anyhow::anyhow!("invalid AURA_PUBLIC_URL {}: {e}", config.public_url))?;
        let proxy_base = config
            .backend_url
            .as_deref()
            .map(Url::parse)
            .transpose()
            .map_err(|e| anyhow::anyhow!("invalid AURA_BACKEND_URL: {e}"))?;

        let geo = Arc::new(GeoAttributionCache::new(
            services.primary_geo,
            services.fallback_geo,
            config.geo_timeout(),
        ));
        let webhooks = Arc::new(WebhookDispatcher::new(
            app_origin,
            proxy_base,
            services.transport,
            config.webhook_timeout(),
        ));
        let recorder = EventRecorder::new(
            Arc::clone(&db),
            geo.clone(),
            Arc::clone(&webhooks),
            config.offer.clone(),
        )
        .with_sink(services.sink);

        let identity = SessionIdentity::new(config.https);
        Ok(Self {
            db,
            recorder: Arc::new(recorder),
            webhooks,
            geo,
            attribution: AttributionContext::new(identity.cookie_options()),
            identity,
            config: Arc::new(config),
        })
    }

    /// Drop per-session state older than the configured retention.
    pub fn prune_sessions(&self) -> usize {
        let ttl = self.config.session_cache_ttl();
        self.geo.prune(ttl) + self.recorder.prune(ttl)
    }

    /// Background loop: prune per-session caches every ten minutes.
    pub async fn run_maintenance_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(Duration::from_secs(600));
        interval.tick().await;
        loop {
            interval.tick().await;
            let pruned = self.prune_sessions();
            if pruned > 0 {
                info!(pruned, "Expired session state pruned");
            } else {
                debug!("No session state to prune");
            }
        }
    }
}
