use axum::{
    extract::State,
    http::{HeaderValue, StatusCode},
    middleware,
    routing::{any, get},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::config::AppConfig;
use crate::database::PoolManager;
use crate::handlers::{clients, metrics};
use crate::middleware::tenant::{resolve_tenant_permissive, resolve_tenant_strict};
use crate::proxy;
use crate::registry::TenantRegistry;

/// Everything a handler can reach. Cloned per request; all members are
/// shared handles.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub registry: Arc<TenantRegistry>,
    pub pools: Arc<PoolManager>,
    pub http: reqwest::Client,
}

pub fn app(state: AppState) -> Router {
    let cors = cors_layer(&state.config);

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/clients", get(clients::list))
        .merge(metrics_routes(state.clone()))
        .merge(dashboard_routes(state.clone()))
        .fallback(not_found)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Tenant-scoped metric endpoints; strict resolution, so handlers always
/// see a bound tenant.
fn metrics_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/api/:tenant/funnel", get(metrics::funnel))
        .route("/api/:tenant/daily", get(metrics::daily))
        .route("/api/:tenant/hourly", get(metrics::hourly))
        .route("/api/:tenant/leads", get(metrics::leads))
        .route("/api/:tenant/handoffs", get(metrics::handoffs))
        .route("/api/:tenant/conversations", get(metrics::conversations))
        .route("/api/:tenant/link-clicks", get(metrics::link_clicks))
        .route("/api/:tenant/overview", get(metrics::overview))
        .route("/api/:tenant/test", get(metrics::connectivity))
        .route_layer(middleware::from_fn_with_state(state, resolve_tenant_strict))
}

/// Dashboard proxying: tenant-scoped routes require resolution, the plain
/// /dashboard fallback forwards anonymously when no tenant can be resolved.
fn dashboard_routes(state: AppState) -> Router<AppState> {
    let scoped = Router::new()
        .route("/:tenant/dashboard", any(proxy::dashboard))
        .route("/:tenant/dashboard/*rest", any(proxy::dashboard))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            resolve_tenant_strict,
        ));

    let fallback = Router::new()
        .route("/dashboard", any(proxy::dashboard))
        .route("/dashboard/*rest", any(proxy::dashboard))
        .route_layer(middleware::from_fn_with_state(
            state,
            resolve_tenant_permissive,
        ));

    scoped.merge(fallback)
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    if config.server.cors_origins.iter().any(|o| o == "*") {
        return CorsLayer::permissive();
    }
    let origins: Vec<HeaderValue> = config
        .server
        .cors_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

async fn root(State(state): State<AppState>) -> Json<Value> {
    let version = env!("CARGO_PKG_VERSION");

    Json(json!({
        "success": true,
        "data": {
            "name": "Botmetrics Gateway",
            "version": version,
            "description": "Multi-tenant gateway for chatbot funnel metrics and dashboard proxying",
            "tenants": state.registry.len(),
            "endpoints": {
                "home": "/ (public)",
                "health": "/health (public)",
                "clients": "/clients (public)",
                "metrics": "/api/:tenant/{funnel,daily,hourly,leads,handoffs,conversations,link-clicks,overview,test}",
                "dashboard": "/:tenant/dashboard/* and /dashboard/* (proxied)",
            }
        }
    }))
}

async fn health() -> Json<Value> {
    Json(json!({
        "success": true,
        "data": {
            "status": "ok",
            "timestamp": chrono::Utc::now(),
        }
    }))
}

async fn not_found() -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "Not found",
            "message": "Unknown route",
            "code": "NOT_FOUND",
            "endpoints": ["/", "/health", "/clients", "/api/:tenant/*", "/:tenant/dashboard/*", "/dashboard/*"],
        })),
    )
}
