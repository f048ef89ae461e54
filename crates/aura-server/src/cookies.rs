//! Cookie jar backing [`ClientStore`] for one HTTP request.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use axum::http::{header, HeaderMap, HeaderName};

use aura_core::session::{ClientStore, CookieOptions};

/// Cookies sent with a request plus every cookie written while serving it.
///
/// Writes are visible to later reads on the same jar, so the session token
/// minted by one component is the token every other component sees.
#[derive(Debug, Default)]
pub struct RequestCookies {
    values: Mutex<HashMap<String, String>>,
    pending: Mutex<Vec<String>>,
}

impl RequestCookies {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let values = headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|raw| raw.split(';'))
            .filter_map(|pair| {
                let (name, value) = pair.trim().split_once('=')?;
                let name = name.trim();
                if name.is_empty() {
                    return None;
                }
                Some((name.to_string(), value.trim().trim_matches('"').to_string()))
            })
            .collect();
        Self {
            values: Mutex::new(values),
            pending: Mutex::new(Vec::new()),
        }
    }

    /// `Set-Cookie` headers for every cookie written on this jar.
    pub fn set_cookie_headers(&self) -> Vec<(HeaderName, String)> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|cookie| (header::SET_COOKIE, cookie.clone()))
            .collect()
    }
}

fn is_cookie_safe(value: &str) -> bool {
    value
        .bytes()
        .all(|b| b.is_ascii_graphic() && !matches!(b, b'"' | b',' | b';' | b'\\'))
}

fn build_cookie(name: &str, value: &str, options: CookieOptions) -> String {
    let secure = if options.secure { "; Secure" } else { "" };
    format!("{name}={value}; Path=/; SameSite=Lax{secure}")
}

impl ClientStore for RequestCookies {
    fn get(&self, name: &str) -> Option<String> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .filter(|v| !v.is_empty())
            .cloned()
    }

    fn set(&self, name: &str, value: &str, options: CookieOptions) -> anyhow::Result<()> {
        if !is_cookie_safe(name) || !is_cookie_safe(value) {
            anyhow::bail!("cookie {name} has characters not allowed in a cookie");
        }
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), value.to_string());
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let prefix = format!("{name}=");
        pending.retain(|c| !c.starts_with(&prefix));
        pending.push(build_cookie(name, value, options));
        Ok(())
    }
}
