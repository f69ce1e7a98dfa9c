use axum::{
    extract::{RawPathParams, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};

use crate::app::AppState;
use crate::error::GatewayError;

/// Route parameter checked first.
pub const TENANT_PARAM: &str = "tenant";
/// Query string parameter checked second.
pub const TENANT_QUERY: &str = "tenant";
/// Request header checked last.
pub const TENANT_HEADER: &str = "x-tenant-id";

/// Resolved tenant id, injected as a request extension by the resolution
/// middleware. Exactly one of these is bound per request, and only on
/// successful resolution.
#[derive(Clone, Debug)]
pub struct TenantContext {
    pub id: String,
}

/// Pick the tenant id candidate from the three accepted sources.
/// First non-empty wins: path parameter, then query parameter, then header.
/// The order is a contract, not an accident; see the precedence test below.
pub fn candidate_from(
    path_param: Option<&str>,
    query: Option<&str>,
    headers: &HeaderMap,
) -> Option<String> {
    let from_query = || {
        query.and_then(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .find(|(k, _)| k == TENANT_QUERY)
                .map(|(_, v)| v.into_owned())
        })
    };
    let from_header = || {
        headers
            .get(TENANT_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string())
    };

    let non_empty = |v: String| if v.is_empty() { None } else { Some(v) };

    path_param
        .map(|v| v.to_string())
        .and_then(non_empty)
        .or_else(|| from_query().and_then(non_empty))
        .or_else(|| from_header().and_then(non_empty))
}

fn candidate(params: &RawPathParams, request: &Request) -> Option<String> {
    let path_param = params
        .iter()
        .find(|(name, _)| *name == TENANT_PARAM)
        .map(|(_, value)| value);
    candidate_from(path_param, request.uri().query(), request.headers())
}

/// Strict resolution: the request is rejected unless a registered tenant id
/// is present. Handlers behind this middleware can rely on `TenantContext`
/// being bound.
pub async fn resolve_tenant_strict(
    State(state): State<AppState>,
    params: RawPathParams,
    mut request: Request,
    next: Next,
) -> Result<Response, GatewayError> {
    let id = candidate(&params, &request).ok_or(GatewayError::MissingTenant)?;

    if !state.registry.exists(&id) {
        tracing::warn!("Rejected request for unregistered tenant '{}'", id);
        return Err(GatewayError::UnknownTenant(id));
    }

    request.extensions_mut().insert(TenantContext { id });
    Ok(next.run(request).await)
}

/// Permissive resolution: bind the tenant when one is present and valid,
/// otherwise let the request through unbound. Never produces an error
/// response itself.
pub async fn resolve_tenant_permissive(
    State(state): State<AppState>,
    params: RawPathParams,
    mut request: Request,
    next: Next,
) -> Response {
    if let Some(id) = candidate(&params, &request) {
        if state.registry.exists(&id) {
            request.extensions_mut().insert(TenantContext { id });
        }
    }
    next.run(request).await
}
