use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub data_dir: String,
    pub duckdb_memory_limit: String,
    pub https: bool,
    /// Origin the funnel pages are served from.
    pub public_url: String,
    /// Same-origin relay for cross-origin webhooks; also the base for relative
    /// webhook URLs when set.
    pub backend_url: Option<String>,
    pub cors_origins: Vec<String>,
    pub geoip_path: String,
    pub geo_primary_url: String,
    pub geo_fallback_url: String,
    pub geo_timeout_ms: u64,
    pub webhook_timeout_ms: u64,
    pub session_cache_hours: u64,
    pub admin_token: Option<String>,
    pub checkout_url: String,
    pub offer: OfferConfig,
}

/// The product whose conversion is reported to advertising platforms.
#[derive(Debug, Clone, PartialEq)]
pub struct OfferConfig {
    pub value: f64,
    pub currency: String,
    pub content_name: String,
    pub content_category: String,
    pub content_ids: Vec<String>,
    pub payment_method: String,
}

impl Default for OfferConfig {
    fn default() -> Self {
        Self {
            value: 15.0,
            currency: "USD".to_string(),
            content_name: "Workshop Moda Rentable con IA".to_string(),
            content_category: "workshop".to_string(),
            content_ids: vec!["workshop-15usd".to_string()],
            payment_method: "hotmart".to_string(),
        }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let mut offer = OfferConfig::default();
        if let Some(value) = non_empty_var("AURA_OFFER_VALUE").and_then(|v| v.parse().ok()) {
            offer.value = value;
        }
        if let Some(currency) = non_empty_var("AURA_OFFER_CURRENCY") {
            offer.currency = currency;
        }

        Ok(Self {
            port: std::env::var("AURA_PORT")
                .unwrap_or_else(|_| "8001".to_string())
                .parse()
                .map_err(|e| format!("invalid port: {e}"))?,
            data_dir: std::env::var("AURA_DATA_DIR").unwrap_or_else(|_| "./data".to_string()),
            duckdb_memory_limit: std::env::var("AURA_DUCKDB_MEMORY")
                .unwrap_or_else(|_| "1GB".to_string()),
            https: std::env::var("AURA_HTTPS")
                .map(|v| v == "true")
                .unwrap_or(true),
            public_url: std::env::var("AURA_PUBLIC_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            backend_url: non_empty_var("AURA_BACKEND_URL"),
            cors_origins: std::env::var("AURA_CORS_ORIGINS")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            geoip_path: std::env::var("AURA_GEOIP_PATH")
                .unwrap_or_else(|_| "./GeoLite2-City.mmdb".to_string()),
            geo_primary_url: std::env::var("AURA_GEO_PRIMARY_URL")
                .unwrap_or_else(|_| "https://ipapi.co/{ip}/json/".to_string()),
            geo_fallback_url: std::env::var("AURA_GEO_FALLBACK_URL")
                .unwrap_or_else(|_| "https://api.ipify.org?format=json".to_string()),
            geo_timeout_ms: std::env::var("AURA_GEO_TIMEOUT_MS")
                .unwrap_or_else(|_| "3500".to_string())
                .parse()
                .unwrap_or(3500),
            webhook_timeout_ms: std::env::var("AURA_WEBHOOK_TIMEOUT_MS")
                .unwrap_or_else(|_| "5000".to_string())
                .parse()
                .unwrap_or(5000),
            session_cache_hours: std::env::var("AURA_SESSION_CACHE_HOURS")
                .unwrap_or_else(|_| "24".to_string())
                .parse()
                .unwrap_or(24),
            admin_token: non_empty_var("AURA_ADMIN_TOKEN"),
            checkout_url: std::env::var("AURA_CHECKOUT_URL")
                .unwrap_or_else(|_| "https://pay.hotmart.com/".to_string()),
            offer,
        })
    }

    pub fn geo_timeout(&self) -> Duration {
        Duration::from_millis(self.geo_timeout_ms)
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_millis(self.webhook_timeout_ms)
    }

    pub fn session_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.session_cache_hours.saturating_mul(3600))
    }
}
