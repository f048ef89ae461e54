//! Per-request visitor context: session token, client IP, device and
//! attribution, resolved once and shared by every write of the request.

use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::{header, request::Parts, HeaderMap, HeaderName};

use aura_core::event::ClientContext;
use aura_core::record::DeviceInfo;

use crate::cookies::RequestCookies;
use crate::state::AppState;

/// Extract the real client IP.
///
/// Order: `X-Real-IP`, the first `X-Forwarded-For` entry, then the TCP peer
/// address when the server was started with connect info.
pub fn extract_client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    let from_header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.split(',').next())
            .map(str::trim)
            .filter(|s| s.parse::<IpAddr>().is_ok())
            .map(str::to_string)
    };
    from_header("x-real-ip")
        .or_else(|| from_header("x-forwarded-for"))
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
}

/// Parse a `User-Agent` string via the `woothee` crate.
///
/// woothee reports unknown values as `"UNKNOWN"`; those become `None`.
pub fn parse_user_agent(user_agent: &str) -> DeviceInfo {
    let Some(result) = woothee::parser::Parser::new().parse(user_agent) else {
        return DeviceInfo::default();
    };
    let known = |s: &str| (!s.is_empty() && s != "UNKNOWN").then(|| s.to_string());

    let device_type = match result.category {
        "smartphone" | "mobilephone" => "mobile",
        "tablet" => "tablet",
        _ => "desktop",
    };

    DeviceInfo {
        browser: known(result.name),
        os: known(result.os),
        device_type: Some(device_type.to_string()),
    }
}

/// Everything a funnel handler needs about the caller.
pub struct Visitor {
    pub ctx: ClientContext,
    pub cookies: RequestCookies,
}

impl Visitor {
    /// `Set-Cookie` headers to attach to the response.
    pub fn set_cookies(&self) -> Vec<(HeaderName, String)> {
        self.cookies.set_cookie_headers()
    }
}

impl FromRequestParts<Arc<AppState>> for Visitor {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let cookies = RequestCookies::from_headers(&parts.headers);
        let session = state.identity.get_or_create_session_token(&cookies);

        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        let user_agent = parts
            .headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let current_url = parts
            .headers
            .get(header::REFERER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut ctx = ClientContext::new(session);
        ctx.client_ip = extract_client_ip(&parts.headers, peer);
        ctx.device = user_agent
            .as_deref()
            .map(parse_user_agent)
            .unwrap_or_default();
        ctx.user_agent = user_agent;
        ctx.attribution = state.attribution.get_snapshot(&cookies);
        ctx.current_url = current_url;

        Ok(Self { ctx, cookies })
    }
}

/// Client IP only, for handlers that do not touch the session.
pub struct ClientIp(pub Option<String>);

impl<S: Send + Sync> FromRequestParts<S> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Ok(Self(extract_client_ip(&parts.headers, peer)))
    }
}
