//! Outbound webhook HTTP: the dispatcher's transport and the guarded
//! forwarding used by the same-origin proxy.

use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use url::{Host, Url};

use aura_core::webhook::WebhookTransport;

/// reqwest-backed [`WebhookTransport`].
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebhookTransport for ReqwestTransport {
    async fn post_json(
        &self,
        url: &Url,
        body: &Value,
        read_response: bool,
    ) -> anyhow::Result<Option<u16>> {
        let response = self.client.post(url.clone()).json(body).send().await?;
        if read_response {
            Ok(Some(response.status().as_u16()))
        } else {
            Ok(None)
        }
    }
}

#[derive(Debug, Error)]
pub enum ProxyError {
    /// The target is not a public http(s) endpoint.
    #[error("{0}")]
    Rejected(String),
    #[error("{0}")]
    Upstream(String),
}

/// A proxy target that passed validation, with the addresses it resolved to.
#[derive(Debug)]
pub struct CheckedTarget {
    pub url: Url,
    pub host: String,
    pub addrs: Vec<SocketAddr>,
}

/// Validate a proxy target: http or https, no credentials, not localhost, and
/// every resolved address public.
pub async fn check_target(target: &str) -> Result<CheckedTarget, ProxyError> {
    let url = Url::parse(target.trim())
        .map_err(|_| ProxyError::Rejected("invalid webhook url".to_string()))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ProxyError::Rejected(
            "webhook url must use http or https".to_string(),
        ));
    }
    if !url.username().is_empty() || url.password().is_some() {
        return Err(ProxyError::Rejected(
            "webhook url must not carry credentials".to_string(),
        ));
    }
    let port = url
        .port_or_known_default()
        .ok_or_else(|| ProxyError::Rejected("webhook url missing port".to_string()))?;

    let (host, addrs) = match url.host() {
        None => {
            return Err(ProxyError::Rejected(
                "webhook url missing host".to_string(),
            ))
        }
        Some(Host::Ipv4(v4)) => (v4.to_string(), vec![SocketAddr::new(IpAddr::V4(v4), port)]),
        Some(Host::Ipv6(v6)) => (v6.to_string(), vec![SocketAddr::new(IpAddr::V6(v6), port)]),
        Some(Host::Domain(domain)) => {
            if domain.eq_ignore_ascii_case("localhost")
                || domain.to_ascii_lowercase().ends_with(".localhost")
            {
                return Err(ProxyError::Rejected(
                    "webhook target host is not allowed".to_string(),
                ));
            }
            let host_for_dns = domain.to_string();
            let resolved: Vec<SocketAddr> = tokio::task::spawn_blocking(move || {
                (host_for_dns.as_str(), port)
                    .to_socket_addrs()
                    .map(|iter| iter.collect::<Vec<_>>())
            })
            .await
            .map_err(|e| ProxyError::Upstream(format!("webhook dns task join failed: {e}")))?
            .map_err(|e| ProxyError::Upstream(format!("webhook dns resolve failed: {e}")))?;
            (domain.to_string(), resolved)
        }
    };

    if addrs.is_empty() {
        return Err(ProxyError::Upstream(
            "webhook dns resolve returned no addresses".to_string(),
        ));
    }
    if addrs.iter().any(|addr| is_disallowed_ip(addr.ip())) {
        return Err(ProxyError::Rejected(
            "webhook target resolves to non-public address".to_string(),
        ));
    }
    Ok(CheckedTarget { url, host, addrs })
}

/// POST `payload` to a checked target, pinned to the addresses that passed
/// validation and without following redirects. Returns the response status.
pub async fn forward(
    target: &CheckedTarget,
    payload: &Value,
    timeout: Duration,
) -> Result<u16, ProxyError> {
    let mut builder = reqwest::Client::builder()
        .connect_timeout(timeout.min(Duration::from_secs(3)))
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::none());
    if target.host.parse::<IpAddr>().is_err() {
        for addr in &target.addrs {
            builder = builder.resolve(target.host.as_str(), *addr);
        }
    }
    let client = builder
        .build()
        .map_err(|e| ProxyError::Upstream(format!("webhook client build failed: {e}")))?;
    let response = client
        .post(target.url.clone())
        .header("content-type", "application/json")
        .body(payload.to_string())
        .send()
        .await
        .map_err(|e| ProxyError::Upstream(format!("webhook send failed: {e}")))?;
    Ok(response.status().as_u16())
}

fn is_disallowed_v4(v4: std::net::Ipv4Addr) -> bool {
    v4.is_private()
        || v4.is_loopback()
        || v4.is_link_local()
        || v4.is_multicast()
        || v4.is_broadcast()
        || v4.is_unspecified()
        || v4.octets()[0] == 0
}

pub fn is_disallowed_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_disallowed_v4(v4),
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                || v6.is_unique_local()
                || v6.is_unicast_link_local()
                || v6.is_multicast()
                || v6.to_ipv4().map(is_disallowed_v4).unwrap_or(false)
        }
    }
}
