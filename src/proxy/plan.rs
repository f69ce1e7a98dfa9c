use axum::http::{HeaderMap, HeaderName, HeaderValue};

use crate::middleware::TENANT_HEADER;

/// Headers that are meaningful per-hop and must not be forwarded either
/// direction. `host` is set by the client library for the upstream target.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "proxy-connection",
    "keep-alive",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
];

/// Everything the transport step needs to execute one proxied request.
/// Computed fresh per request; holds no shared state.
#[derive(Debug)]
pub struct ProxyPlan {
    /// Full upstream URL, tenant segment removed, query string intact.
    pub url: String,
    /// Outbound headers: inbound headers minus hop-by-hop, plus the tenant
    /// identity header when resolution succeeded. Cookies pass through
    /// verbatim.
    pub headers: HeaderMap,
    /// Client asked for a protocol upgrade (e.g. websocket).
    pub upgrade: bool,
}

pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.iter().any(|h| name.as_str() == *h)
}

/// Remove the first path segment equal to the tenant id; the rest of the
/// path is untouched. `/acme/dashboard/d/1` with tenant `acme` becomes
/// `/dashboard/d/1`.
pub fn rewrite_path(original: &str, tenant: &str) -> String {
    let mut segments: Vec<&str> = original.split('/').collect();
    if let Some(pos) = segments.iter().position(|s| *s == tenant) {
        segments.remove(pos);
    }
    let joined = segments.join("/");
    if joined.is_empty() || !joined.starts_with('/') {
        format!("/{}", joined.trim_start_matches('/'))
    } else {
        joined
    }
}

fn wants_upgrade(headers: &HeaderMap) -> bool {
    headers.contains_key("upgrade")
        && headers
            .get("connection")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_ascii_lowercase().contains("upgrade"))
            .unwrap_or(false)
}

/// Pure planning step: `(incoming request, resolved tenant) -> directive`.
/// The transport that executes the plan lives in the parent module and can
/// be exercised separately.
pub fn plan_request(
    base_url: &str,
    path: &str,
    query: Option<&str>,
    tenant: Option<&str>,
    inbound: &HeaderMap,
) -> ProxyPlan {
    let rewritten = match tenant {
        Some(id) => rewrite_path(path, id),
        None => path.to_string(),
    };

    let url = match query {
        Some(q) => format!("{}{}?{}", base_url, rewritten, q),
        None => format!("{}{}", base_url, rewritten),
    };

    let upgrade = wants_upgrade(inbound);

    let mut headers = HeaderMap::new();
    for (name, value) in inbound.iter() {
        // Upgrade negotiation headers must survive for websocket proxying
        let keep_for_upgrade =
            upgrade && (name.as_str() == "upgrade" || name.as_str() == "connection");
        if keep_for_upgrade || !is_hop_by_hop(name) {
            headers.append(name.clone(), value.clone());
        }
    }

    if let Some(id) = tenant {
        if let Ok(value) = HeaderValue::from_str(id) {
            headers.insert(TENANT_HEADER, value);
        }
    }

    ProxyPlan { url, headers, upgrade }
}
