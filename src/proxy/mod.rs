pub mod plan;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{Method, Response, StatusCode},
    response::IntoResponse,
};
use hyper_util::rt::TokioIo;

use crate::app::AppState;
use crate::error::GatewayError;
use crate::middleware::TenantContext;
use self::plan::{is_hop_by_hop, plan_request, ProxyPlan};

/// ANY /:tenant/dashboard/* and ANY /dashboard/*
///
/// Strict routes arrive here with a bound `TenantContext`; the permissive
/// fallback may arrive unbound, in which case the request is forwarded
/// anonymously (no tenant header at all). Upstream connectivity failures
/// become a 502 with the `Grafana service unavailable` category.
pub async fn dashboard(
    State(state): State<AppState>,
    mut request: Request,
) -> Result<axum::response::Response, GatewayError> {
    let tenant = request
        .extensions()
        .get::<TenantContext>()
        .map(|t| t.id.clone());

    let plan = plan_request(
        &state.config.proxy.grafana_url,
        request.uri().path(),
        request.uri().query(),
        tenant.as_deref(),
        request.headers(),
    );

    tracing::debug!(
        tenant = tenant.as_deref().unwrap_or("-"),
        upstream = %plan.url,
        upgrade = plan.upgrade,
        "proxying dashboard request"
    );

    if plan.upgrade {
        proxy_upgrade(&state, request, plan).await
    } else {
        proxy_http(&state, request, plan).await
    }
}

/// Plain request/response relay with streamed bodies in both directions.
async fn proxy_http(
    state: &AppState,
    request: Request,
    plan: ProxyPlan,
) -> Result<axum::response::Response, GatewayError> {
    let (parts, body) = request.into_parts();
    let has_body = !matches!(parts.method, Method::GET | Method::HEAD);

    // The client's connect timeout bounds reaching the upstream; once the
    // response starts, the body may stream for as long as it needs.
    let mut upstream_request = state
        .http
        .request(parts.method, plan.url)
        .headers(plan.headers);
    if has_body {
        upstream_request =
            upstream_request.body(reqwest::Body::wrap_stream(body.into_data_stream()));
    }

    let upstream = upstream_request
        .send()
        .await
        .map_err(|e| GatewayError::UpstreamUnavailable(e.to_string()))?;

    relay_response(upstream)
}

/// Relay status, headers (every `set-cookie` included, verbatim) and the
/// body stream of an upstream response back to the client.
fn relay_response(upstream: reqwest::Response) -> Result<axum::response::Response, GatewayError> {
    let mut builder = Response::builder().status(upstream.status());
    if let Some(headers) = builder.headers_mut() {
        for (name, value) in upstream.headers() {
            if !is_hop_by_hop(name) {
                headers.append(name.clone(), value.clone());
            }
        }
    }

    builder
        .body(Body::from_stream(upstream.bytes_stream()))
        .map_err(|e| GatewayError::Internal(format!("failed to assemble proxy response: {}", e)))
}

/// Websocket (or any 101) passthrough: complete the upgrade on both sides
/// and splice the raw byte streams. Nothing is buffered; the 101 response
/// is returned to the client immediately so hyper can hand us the
/// connection.
async fn proxy_upgrade(
    state: &AppState,
    mut request: Request,
    plan: ProxyPlan,
) -> Result<axum::response::Response, GatewayError> {
    let client_upgrade = request.extensions_mut().remove::<hyper::upgrade::OnUpgrade>();
    let (parts, _body) = request.into_parts();

    let upstream = state
        .http
        .request(parts.method, plan.url)
        .headers(plan.headers)
        .send()
        .await
        .map_err(|e| GatewayError::UpstreamUnavailable(e.to_string()))?;

    if upstream.status() != StatusCode::SWITCHING_PROTOCOLS {
        // Upstream declined the upgrade; relay its answer as-is
        return relay_response(upstream);
    }

    let Some(client_upgrade) = client_upgrade else {
        return Err(GatewayError::Internal(
            "connection is not upgradable".to_string(),
        ));
    };

    let mut response = Response::builder().status(StatusCode::SWITCHING_PROTOCOLS);
    if let Some(headers) = response.headers_mut() {
        for (name, value) in upstream.headers() {
            // The upgrade handshake headers must reach the client
            if name.as_str() == "upgrade" || name.as_str() == "connection" || !is_hop_by_hop(name) {
                headers.append(name.clone(), value.clone());
            }
        }
    }
    let response = response
        .body(Body::empty())
        .map_err(|e| GatewayError::Internal(format!("failed to assemble upgrade response: {}", e)))?;

    tokio::spawn(async move {
        let upstream_io = match upstream.upgrade().await {
            Ok(io) => io,
            Err(e) => {
                tracing::warn!("upstream upgrade failed: {}", e);
                return;
            }
        };
        let client_io = match client_upgrade.await {
            Ok(io) => io,
            Err(e) => {
                tracing::warn!("client upgrade failed: {}", e);
                return;
            }
        };

        let mut client_io = TokioIo::new(client_io);
        let mut upstream_io = upstream_io;
        match tokio::io::copy_bidirectional(&mut client_io, &mut upstream_io).await {
            Ok((up, down)) => {
                tracing::debug!("upgraded stream closed: {} bytes up, {} bytes down", up, down)
            }
            Err(e) => tracing::debug!("upgraded stream ended with error: {}", e),
        }
    });

    Ok(response.into_response())
}
