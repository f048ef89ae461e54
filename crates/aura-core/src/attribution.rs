//! Marketing attribution captured from landing URLs and ad cookies.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::session::{ClientStore, CookieOptions};

/// Cookie holding the persisted snapshot.
pub const ATTRIBUTION_COOKIE: &str = "aura_attribution";

/// Query parameters captured from the URL.
pub const URL_KEYS: [&str; 6] = [
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_content",
    "utm_term",
    "fbclid",
];

/// Longest value kept per key, in bytes. Eight capped values still fit the
/// encoded snapshot inside the 4 KiB browser cookie limit.
pub const MAX_VALUE_LEN: usize = 256;

/// First-party ad cookies set by the Meta pixel.
pub const AD_COOKIES: [&str; 2] = ["_fbc", "_fbp"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributionSnapshot {
    pub utm_source: Option<String>,
    pub utm_medium: Option<String>,
    pub utm_campaign: Option<String>,
    pub utm_content: Option<String>,
    pub utm_term: Option<String>,
    pub fbclid: Option<String>,
    #[serde(rename = "_fbc")]
    pub fbc: Option<String>,
    #[serde(rename = "_fbp")]
    pub fbp: Option<String>,
}

impl AttributionSnapshot {
    fn slot(&mut self, key: &str) -> Option<&mut Option<String>> {
        match key {
            "utm_source" => Some(&mut self.utm_source),
            "utm_medium" => Some(&mut self.utm_medium),
            "utm_campaign" => Some(&mut self.utm_campaign),
            "utm_content" => Some(&mut self.utm_content),
            "utm_term" => Some(&mut self.utm_term),
            "fbclid" => Some(&mut self.fbclid),
            "_fbc" => Some(&mut self.fbc),
            "_fbp" => Some(&mut self.fbp),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        match key {
            "utm_source" => self.utm_source.as_deref(),
            "utm_medium" => self.utm_medium.as_deref(),
            "utm_campaign" => self.utm_campaign.as_deref(),
            "utm_content" => self.utm_content.as_deref(),
            "utm_term" => self.utm_term.as_deref(),
            "fbclid" => self.fbclid.as_deref(),
            "_fbc" => self.fbc.as_deref(),
            "_fbp" => self.fbp.as_deref(),
            _ => None,
        }
    }

    /// Overwrite `key` with a non-empty value, truncated to
    /// [`MAX_VALUE_LEN`] bytes. Unknown keys are ignored.
    pub fn set(&mut self, key: &str, value: &str) {
        let mut value = value.trim();
        if value.is_empty() {
            return;
        }
        if value.len() > MAX_VALUE_LEN {
            let mut end = MAX_VALUE_LEN;
            while !value.is_char_boundary(end) {
                end -= 1;
            }
            value = &value[..end];
        }
        if let Some(slot) = self.slot(key) {
            *slot = Some(value.to_string());
        }
    }

    /// Apply recognised parameters from a raw query string.
    ///
    /// Present keys overwrite stored values; absent or empty keys leave them
    /// untouched. When a key repeats, its first non-empty occurrence counts.
    pub fn merge_query(&mut self, query: &str) {
        let mut seen: Vec<&str> = Vec::new();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            let Some(known) = URL_KEYS.iter().find(|k| **k == key) else {
                continue;
            };
            if seen.contains(known) || value.trim().is_empty() {
                continue;
            }
            seen.push(known);
            self.set(known, &value);
        }
    }

    /// `utm_source`, or `"direct"` when the visit carried none.
    pub fn lead_source(&self) -> &str {
        self.utm_source.as_deref().unwrap_or("direct")
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        Ok(URL_SAFE_NO_PAD.encode(serde_json::to_vec(self)?))
    }

    pub fn decode(raw: &str) -> Option<Self> {
        let bytes = URL_SAFE_NO_PAD.decode(raw.trim()).ok()?;
        serde_json::from_slice(&bytes).ok()
    }
}

/// Return the query component of a URL or path (between `?` and `#`).
fn query_of(page_url: &str) -> Option<&str> {
    let (_, rest) = page_url.split_once('?')?;
    Some(rest.split('#').next().unwrap_or(rest))
}

/// Captures attribution from each page load and persists it in the
/// visitor's cookie jar.
#[derive(Debug, Clone, Copy)]
pub struct AttributionContext {
    options: CookieOptions,
}

impl AttributionContext {
    pub fn new(options: CookieOptions) -> Self {
        Self { options }
    }

    fn stored(&self, store: &dyn ClientStore) -> AttributionSnapshot {
        match store.get(ATTRIBUTION_COOKIE) {
            Some(raw) => AttributionSnapshot::decode(&raw).unwrap_or_else(|| {
                warn!("Unreadable attribution cookie, starting from an empty snapshot");
                AttributionSnapshot::default()
            }),
            None => AttributionSnapshot::default(),
        }
    }

    fn overlay_ad_cookies(snapshot: &mut AttributionSnapshot, store: &dyn ClientStore) {
        for name in AD_COOKIES {
            if let Some(value) = store.get(name) {
                snapshot.set(name, &value);
            }
        }
    }

    /// Merge the URL's parameters and the current ad cookies into the stored
    /// snapshot, persist it when it changed, and return it.
    pub fn capture_from_url(&self, store: &dyn ClientStore, page_url: &str) -> AttributionSnapshot {
        let stored = self.stored(store);
        let mut merged = stored.clone();
        if let Some(query) = query_of(page_url) {
            merged.merge_query(query);
        }
        Self::overlay_ad_cookies(&mut merged, store);

        if merged != stored {
            match merged.encode() {
                Ok(encoded) => {
                    if let Err(e) = store.set(ATTRIBUTION_COOKIE, &encoded, self.options) {
                        warn!(error = %e, "Attribution cookie not persisted");
                    }
                }
                Err(e) => warn!(error = %e, "Attribution snapshot not serializable"),
            }
        }
        merged
    }

    /// The persisted snapshot with live ad cookies applied.
    pub fn get_snapshot(&self, store: &dyn ClientStore) -> AttributionSnapshot {
        let mut snapshot = self.stored(store);
        Self::overlay_ad_cookies(&mut snapshot, store);
        snapshot
    }
}
