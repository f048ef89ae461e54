//! Geolocation services behind [`GeoLookup`]: ipapi-style HTTP endpoints and
//! a local MaxMind database.

use std::net::IpAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use aura_core::geo::{GeoLookup, GeoLookupResponse};

/// Substitute `{ip}` in `template`. Without an IP the `{ip}/` segment is
/// dropped, so `https://ipapi.co/{ip}/json/` becomes the caller-IP endpoint.
pub fn lookup_url(template: &str, ip_hint: Option<&str>) -> String {
    match ip_hint {
        Some(ip) => template.replace("{ip}", ip),
        None => template.replace("{ip}/", "").replace("{ip}", ""),
    }
}

fn string_field(body: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| body.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

/// Read an ipapi/ipify-style JSON body.
pub fn parse_geo_body(body: &Value) -> anyhow::Result<GeoLookupResponse> {
    if body.get("error").and_then(Value::as_bool) == Some(true) {
        let reason = string_field(body, &["reason", "message"]).unwrap_or_default();
        anyhow::bail!("geolocation service error: {reason}");
    }
    Ok(GeoLookupResponse {
        ip: string_field(body, &["ip"]),
        country_code: string_field(body, &["country_code", "country"]),
        country_name: string_field(body, &["country_name"]),
    })
}

/// A JSON geolocation endpoint queried with a GET.
pub struct HttpGeoLookup {
    name: String,
    url_template: String,
    client: reqwest::Client,
}

impl HttpGeoLookup {
    pub fn new(name: &str, url_template: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            name: name.to_string(),
            url_template: url_template.to_string(),
            client,
        })
    }
}

#[async_trait]
impl GeoLookup for HttpGeoLookup {
    fn name(&self) -> &str {
        &self.name
    }

    async fn lookup(&self, ip_hint: Option<&str>) -> anyhow::Result<GeoLookupResponse> {
        let url = lookup_url(&self.url_template, ip_hint);
        let body: Value = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let mut response = parse_geo_body(&body)?;
        if response.ip.is_none() {
            response.ip = ip_hint.map(str::to_string);
        }
        debug!(service = %self.name, country = ?response.country_code, "Geo lookup answered");
        Ok(response)
    }
}

/// Country lookup against a GeoLite2/GeoIP2 City database on disk.
pub struct MaxMindGeoLookup {
    reader: maxminddb::Reader<Vec<u8>>,
}

impl MaxMindGeoLookup {
    /// Open the database, or `None` when the file does not exist.
    pub fn open(path: &str) -> anyhow::Result<Option<Self>> {
        if !Path::new(path).exists() {
            return Ok(None);
        }
        let reader = maxminddb::Reader::open_readfile(path)?;
        Ok(Some(Self { reader }))
    }
}

#[async_trait]
impl GeoLookup for MaxMindGeoLookup {
    fn name(&self) -> &str {
        "maxmind"
    }

    async fn lookup(&self, ip_hint: Option<&str>) -> anyhow::Result<GeoLookupResponse> {
        let ip = ip_hint.ok_or_else(|| anyhow::anyhow!("client IP unknown"))?;
        let ip_addr = IpAddr::from_str(ip)?;
        let record: maxminddb::geoip2::City = self.reader.lookup(ip_addr)?;

        let country = record.country.as_ref();
        Ok(GeoLookupResponse {
            ip: Some(ip.to_string()),
            country_code: country.and_then(|c| c.iso_code).map(str::to_string),
            country_name: country
                .and_then(|c| c.names.as_ref())
                .and_then(|names| names.get("en"))
                .map(|s| s.to_string()),
        })
    }
}
