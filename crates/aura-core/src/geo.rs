//! Per-session IP geolocation with a single resolution per session.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::session::SessionToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeoSource {
    Primary,
    Fallback,
}

/// Geolocation resolved for one session. Never mutated once cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoRecord {
    pub ip: Option<String>,
    pub country_code: Option<String>,
    pub source: GeoSource,
    pub resolved_at: DateTime<Utc>,
}

impl GeoRecord {
    /// The degraded record cached when every lookup failed.
    pub fn unresolved() -> Self {
        Self {
            ip: None,
            country_code: None,
            source: GeoSource::Fallback,
            resolved_at: Utc::now(),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.ip.is_some() || self.country_code.is_some()
    }
}

/// What a single geolocation service answered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoLookupResponse {
    pub ip: Option<String>,
    pub country_code: Option<String>,
    pub country_name: Option<String>,
}

impl GeoLookupResponse {
    pub fn is_empty(&self) -> bool {
        self.ip.is_none() && self.country_code.is_none()
    }
}

/// One external IP-geolocation service.
#[async_trait]
pub trait GeoLookup: Send + Sync {
    fn name(&self) -> &str;

    /// `ip_hint` is the client address seen by the server, when known.
    async fn lookup(&self, ip_hint: Option<&str>) -> anyhow::Result<GeoLookupResponse>;
}

/// Injectable geo resolution seam used by the event recorder.
#[async_trait]
pub trait GeoResolver: Send + Sync {
    async fn resolve(&self, session: &SessionToken, ip_hint: Option<&str>) -> GeoRecord;

    /// The record already cached for `session`, without triggering a lookup.
    fn cached(&self, session: &SessionToken) -> Option<GeoRecord>;
}

struct CacheEntry {
    created: Instant,
    cell: Arc<OnceCell<GeoRecord>>,
}

/// Session-keyed geo cache.
///
/// Concurrent `resolve` calls for the same session share one in-flight
/// resolution. A resolution is at most one primary lookup plus one fallback
/// lookup, each bounded by `timeout`. The outcome, failure included, stays
/// cached until the entry is pruned.
pub struct GeoAttributionCache {
    primary: Arc<dyn GeoLookup>,
    fallback: Arc<dyn GeoLookup>,
    timeout: Duration,
    entries: Mutex<HashMap<SessionToken, CacheEntry>>,
}

impl GeoAttributionCache {
    pub fn new(primary: Arc<dyn GeoLookup>, fallback: Arc<dyn GeoLookup>, timeout: Duration) -> Self {
        Self {
            primary,
            fallback,
            timeout,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn cell_for(&self, session: &SessionToken) -> Arc<OnceCell<GeoRecord>> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .entry(session.clone())
            .or_insert_with(|| CacheEntry {
                created: Instant::now(),
                cell: Arc::new(OnceCell::new()),
            })
            .cell
            .clone()
    }

    async fn attempt(
        &self,
        lookup: &dyn GeoLookup,
        ip_hint: Option<&str>,
    ) -> Result<GeoLookupResponse, String> {
        match tokio::time::timeout(self.timeout, lookup.lookup(ip_hint)).await {
            Ok(Ok(response)) if !response.is_empty() => Ok(response),
            Ok(Ok(_)) => Err("empty response".to_string()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("timed out after {}ms", self.timeout.as_millis())),
        }
    }

    async fn lookup_chain(&self, session: &SessionToken, ip_hint: Option<&str>) -> GeoRecord {
        let primary_error = match self.attempt(self.primary.as_ref(), ip_hint).await {
            Ok(response) => return to_record(response, GeoSource::Primary),
            Err(e) => e,
        };
        warn!(
            session = %session,
            lookup = self.primary.name(),
            error = %primary_error,
            "Primary geo lookup failed, trying fallback"
        );

        match self.attempt(self.fallback.as_ref(), ip_hint).await {
            Ok(response) => to_record(response, GeoSource::Fallback),
            Err(e) => {
                warn!(
                    session = %session,
                    lookup = self.fallback.name(),
                    error = %e,
                    "Fallback geo lookup failed, caching unresolved record"
                );
                GeoRecord::unresolved()
            }
        }
    }

    /// Drop entries older than `max_age`. Returns how many were removed.
    pub fn prune(&self, max_age: Duration) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, entry| entry.created.elapsed() < max_age);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn to_record(response: GeoLookupResponse, source: GeoSource) -> GeoRecord {
    GeoRecord {
        ip: response.ip,
        country_code: response.country_code.map(|c| c.to_ascii_uppercase()),
        source,
        resolved_at: Utc::now(),
    }
}

#[async_trait]
impl GeoResolver for GeoAttributionCache {
    async fn resolve(&self, session: &SessionToken, ip_hint: Option<&str>) -> GeoRecord {
        let cell = self.cell_for(session);
        if let Some(record) = cell.get() {
            debug!(session = %session, "Geo cache hit");
            return record.clone();
        }
        cell.get_or_init(|| self.lookup_chain(session, ip_hint))
            .await
            .clone()
    }

    fn cached(&self, session: &SessionToken) -> Option<GeoRecord> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.get(session).and_then(|entry| entry.cell.get().cloned())
    }
}
