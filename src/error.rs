// HTTP API Error Types
use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Value};

use crate::database::manager::PoolError;
use crate::registry::RegistryError;

/// Gateway error taxonomy with appropriate status codes and client-safe bodies.
///
/// This is the single place where error kinds map to HTTP statuses; handlers
/// and middleware return this type instead of building responses themselves.
#[derive(Debug)]
pub enum GatewayError {
    // 400 Bad Request - no tenant id supplied where one is required
    MissingTenant,

    // 404 Not Found - tenant id supplied but not registered
    UnknownTenant(String),

    // 503 Service Unavailable - tenant database unreachable or auth failed
    ConnectionError { tenant: String, detail: String },

    // 500 Internal Server Error - query failed against a live connection
    QueryError {
        tenant: String,
        operation: &'static str,
        detail: String,
    },

    // 502 Bad Gateway - visualization upstream unreachable
    UpstreamUnavailable(String),

    // 500 Internal Server Error - anything uncategorized
    Internal(String),
}

impl GatewayError {
    /// Get HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::MissingTenant => StatusCode::BAD_REQUEST,
            GatewayError::UnknownTenant(_) => StatusCode::NOT_FOUND,
            GatewayError::ConnectionError { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::QueryError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable category, surfaced as the `error` field
    pub fn category(&self) -> &'static str {
        match self {
            GatewayError::MissingTenant => "Missing tenant id",
            GatewayError::UnknownTenant(_) => "Unknown tenant",
            GatewayError::ConnectionError { .. } => "Database unavailable",
            GatewayError::QueryError { .. } => "Query failed",
            GatewayError::UpstreamUnavailable(_) => "Grafana service unavailable",
            GatewayError::Internal(_) => "Internal server error",
        }
    }

    /// Stable error code for client handling
    pub fn error_code(&self) -> &'static str {
        match self {
            GatewayError::MissingTenant => "MISSING_TENANT",
            GatewayError::UnknownTenant(_) => "UNKNOWN_TENANT",
            GatewayError::ConnectionError { .. } => "CONNECTION_ERROR",
            GatewayError::QueryError { .. } => "QUERY_ERROR",
            GatewayError::UpstreamUnavailable(_) => "UPSTREAM_UNAVAILABLE",
            GatewayError::Internal(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    /// Convert to JSON response body
    pub fn to_json(&self) -> Value {
        let mut body = json!({
            "error": self.category(),
            "message": self.message(),
            "code": self.error_code(),
        });

        match self {
            GatewayError::MissingTenant => {
                body["sources"] = json!(["path parameter", "query parameter", "x-tenant-id header"]);
            }
            GatewayError::UnknownTenant(id) => {
                body["tenant"] = json!(id);
            }
            GatewayError::ConnectionError { tenant, .. } => {
                body["tenant"] = json!(tenant);
            }
            GatewayError::QueryError { tenant, operation, .. } => {
                body["tenant"] = json!(tenant);
                body["operation"] = json!(operation);
            }
            _ => {}
        }

        body
    }

    /// Client-safe human-readable message. Transport/SQL detail is logged,
    /// and only echoed to the client in development mode.
    pub fn message(&self) -> String {
        match self {
            GatewayError::MissingTenant => {
                "Tenant id is required; supply it as a path parameter, a ?tenant query parameter, or an x-tenant-id header".to_string()
            }
            GatewayError::UnknownTenant(id) => format!("Tenant '{}' is not registered", id),
            GatewayError::ConnectionError { tenant, detail } => {
                if crate::is_development!() {
                    format!("Could not connect to database for tenant '{}': {}", tenant, detail)
                } else {
                    format!("Database for tenant '{}' is temporarily unavailable", tenant)
                }
            }
            GatewayError::QueryError { tenant, operation, detail } => {
                if crate::is_development!() {
                    format!("Query '{}' failed for tenant '{}': {}", operation, tenant, detail)
                } else {
                    "An error occurred while processing your request".to_string()
                }
            }
            GatewayError::UpstreamUnavailable(detail) => {
                if crate::is_development!() {
                    format!("Grafana upstream is unreachable: {}", detail)
                } else {
                    "The dashboard service is temporarily unavailable".to_string()
                }
            }
            GatewayError::Internal(detail) => {
                if crate::is_development!() {
                    detail.clone()
                } else {
                    "An unexpected error occurred".to_string()
                }
            }
        }
    }
}

impl From<PoolError> for GatewayError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::UnknownTenant(id) => GatewayError::UnknownTenant(id),
            PoolError::TargetMissing { tenant, var } => {
                tracing::error!("Connection target env var '{}' not set for tenant '{}'", var, tenant);
                GatewayError::ConnectionError {
                    tenant,
                    detail: format!("connection target '{}' not configured", var),
                }
            }
            PoolError::Connect { tenant, source } => {
                tracing::error!("Connection to tenant '{}' database failed: {}", tenant, source);
                GatewayError::ConnectionError {
                    tenant,
                    detail: source.to_string(),
                }
            }
            PoolError::Timeout(tenant) => {
                tracing::error!("Connection to tenant '{}' database timed out", tenant);
                GatewayError::ConnectionError {
                    tenant,
                    detail: "connection timed out".to_string(),
                }
            }
        }
    }
}

impl From<RegistryError> for GatewayError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::UnknownTenant(id) => GatewayError::UnknownTenant(id),
            RegistryError::DuplicateTenant(id) => {
                GatewayError::Internal(format!("duplicate tenant id in registry: {}", id))
            }
        }
    }
}

// Standard error trait implementations
impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for GatewayError {}

// Automatic HTTP response conversion for Axum
impl IntoResponse for GatewayError {
    fn into_response(self) -> axum::response::Response {
        (self.status_code(), Json(self.to_json())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_matches_taxonomy() {
        assert_eq!(GatewayError::MissingTenant.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            GatewayError::UnknownTenant("acme".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            GatewayError::ConnectionError { tenant: "acme".into(), detail: String::new() }
                .status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            GatewayError::UpstreamUnavailable(String::new()).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn missing_tenant_body_names_all_sources() {
        let body = GatewayError::MissingTenant.to_json();
        let sources = body["sources"].as_array().unwrap();
        assert_eq!(sources.len(), 3);
        assert_eq!(body["code"], "MISSING_TENANT");
    }

    #[test]
    fn upstream_category_is_grafana_unavailable() {
        let body = GatewayError::UpstreamUnavailable("refused".into()).to_json();
        assert_eq!(body["error"], "Grafana service unavailable");
    }
}
