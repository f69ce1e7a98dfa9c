use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::app::AppState;

/// GET /clients - every registered tenant, in registration order
pub async fn list(State(state): State<AppState>) -> Json<Value> {
    let clients: Vec<Value> = state
        .registry
        .iter()
        .map(|tenant| {
            json!({
                "id": tenant.id,
                "name": tenant.name,
                "domain": tenant.domain,
                "grafana_org_id": tenant.grafana_org_id,
            })
        })
        .collect();

    Json(json!({
        "success": true,
        "data": {
            "count": clients.len(),
            "clients": clients,
        }
    }))
}
