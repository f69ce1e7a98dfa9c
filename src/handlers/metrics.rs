use axum::{
    extract::{Extension, Query, State},
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::{PgPool, Row};
use std::future::Future;

use crate::app::AppState;
use crate::error::GatewayError;
use crate::middleware::TenantContext;

/// Default trailing window for per-day aggregates.
const DEFAULT_WINDOW_DAYS: i32 = 30;
/// Default trailing window for the hour-of-day distribution.
const DEFAULT_HOURLY_DAYS: i32 = 7;

#[derive(Debug, Deserialize)]
pub struct DateRangeQuery {
    #[serde(rename = "startDate")]
    pub start_date: Option<NaiveDate>,
    #[serde(rename = "endDate")]
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct WindowQuery {
    pub days: Option<i32>,
}

/// Resolve the tenant's pool and timezone in one step. Handlers behind the
/// strict middleware always have a `TenantContext`.
async fn tenant_pool(state: &AppState, tenant: &str) -> Result<(PgPool, String), GatewayError> {
    let timezone = state.registry.lookup(tenant)?.timezone.clone();
    let pool = state.pools.acquire(tenant).await?;
    Ok((pool, timezone))
}

/// Run one aggregate query and surface its rows as JSON values.
///
/// Every statement projects through `row_to_json` so the handler never needs
/// per-operation row structs; numeric rounding and timezone conversion both
/// happen inside the SQL. Days with no rows are absent from per-day series
/// (callers zero-fill client-side if they need a dense axis).
async fn fetch_rows(
    pool: &PgPool,
    tenant: &str,
    operation: &'static str,
    query: sqlx::query::Query<'_, sqlx::Postgres, sqlx::postgres::PgArguments>,
) -> Result<Vec<Value>, GatewayError> {
    let rows = query
        .fetch_all(pool)
        .await
        .map_err(|e| GatewayError::QueryError {
            tenant: tenant.to_string(),
            operation,
            detail: e.to_string(),
        })?;

    Ok(rows
        .iter()
        .map(|row| row.try_get::<Value, _>("row").unwrap_or(Value::Null))
        .collect())
}

const FUNNEL_SQL: &str = r#"
    SELECT row_to_json(t) AS row FROM (
        SELECT
            count(*)                                            AS sessions_started,
            count(*) FILTER (WHERE message_count > 0)           AS sessions_engaged,
            count(*) FILTER (WHERE lead_captured)               AS leads_captured,
            count(*) FILTER (WHERE handoff_requested)           AS handoffs_requested,
            ROUND(100.0 * count(*) FILTER (WHERE message_count > 0)
                  / NULLIF(count(*), 0), 2)                     AS engagement_pct,
            ROUND(100.0 * count(*) FILTER (WHERE lead_captured)
                  / NULLIF(count(*), 0), 2)                     AS conversion_pct,
            ROUND(100.0 * count(*) FILTER (WHERE handoff_requested)
                  / NULLIF(count(*), 0), 2)                     AS handoff_pct
        FROM chat_sessions
        WHERE (started_at AT TIME ZONE $1)::date
              BETWEEN COALESCE($2, (now() AT TIME ZONE $1)::date - 30)
                  AND COALESCE($3, (now() AT TIME ZONE $1)::date)
    ) t
"#;

const DAILY_SQL: &str = r#"
    SELECT row_to_json(t) AS row FROM (
        SELECT
            (started_at AT TIME ZONE $1)::date            AS day,
            count(*)                                      AS sessions,
            COALESCE(sum(message_count), 0)               AS messages,
            count(*) FILTER (WHERE lead_captured)         AS leads
        FROM chat_sessions
        WHERE started_at >= now() - make_interval(days => $2)
        GROUP BY 1
        ORDER BY 1
    ) t
"#;

const HOURLY_SQL: &str = r#"
    SELECT row_to_json(t) AS row FROM (
        SELECT
            extract(hour FROM started_at AT TIME ZONE $1)::int AS hour,
            count(*)                                           AS sessions,
            ROUND(100.0 * count(*) / sum(count(*)) OVER (), 2) AS share_pct
        FROM chat_sessions
        WHERE started_at >= now() - make_interval(days => $2)
        GROUP BY 1
        ORDER BY 1
    ) t
"#;

const LEADS_SQL: &str = r#"
    SELECT row_to_json(t) AS row FROM (
        SELECT
            (created_at AT TIME ZONE $1)::date AS day,
            count(*)                           AS leads,
            count(DISTINCT session_id)         AS sessions
        FROM leads
        WHERE created_at >= now() - make_interval(days => $2)
        GROUP BY 1
        ORDER BY 1
    ) t
"#;

const HANDOFFS_SQL: &str = r#"
    SELECT row_to_json(t) AS row FROM (
        SELECT
            (requested_at AT TIME ZONE $1)::date                        AS day,
            count(*)                                                    AS requested,
            count(completed_at)                                         AS completed,
            ROUND(100.0 * count(completed_at) / NULLIF(count(*), 0), 2) AS completion_pct
        FROM handoff_requests
        WHERE requested_at >= now() - make_interval(days => $2)
        GROUP BY 1
        ORDER BY 1
    ) t
"#;

const CONVERSATIONS_SQL: &str = r#"
    SELECT row_to_json(t) AS row FROM (
        SELECT
            (started_at AT TIME ZONE $1)::date                                AS day,
            count(*)                                                          AS conversations,
            ROUND(avg(message_count)::numeric, 2)                             AS avg_messages,
            ROUND(avg(extract(epoch FROM ended_at - started_at))::numeric, 2) AS avg_duration_secs
        FROM chat_sessions
        WHERE ended_at IS NOT NULL
          AND started_at >= now() - make_interval(days => $2)
        GROUP BY 1
        ORDER BY 1
    ) t
"#;

// No timezone parameter: link totals are not grouped by day.
const LINK_CLICKS_SQL: &str = r#"
    SELECT row_to_json(t) AS row FROM (
        SELECT
            url,
            count(*)                   AS clicks,
            count(DISTINCT session_id) AS sessions
        FROM link_clicks
        WHERE clicked_at >= now() - make_interval(days => $1)
        GROUP BY url
        ORDER BY clicks DESC
    ) t
"#;

const CONNECTIVITY_SQL: &str = r#"
    SELECT row_to_json(t) AS row FROM (
        SELECT now() AS server_time, version() AS server_version
    ) t
"#;

async fn run_funnel(
    pool: &PgPool,
    tenant: &str,
    tz: &str,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<Vec<Value>, GatewayError> {
    let query = sqlx::query(FUNNEL_SQL).bind(tz).bind(start).bind(end);
    fetch_rows(pool, tenant, "funnel", query).await
}

async fn run_windowed(
    pool: &PgPool,
    tenant: &str,
    operation: &'static str,
    sql: &'static str,
    tz: &str,
    days: i32,
) -> Result<Vec<Value>, GatewayError> {
    let query = sqlx::query(sql).bind(tz).bind(days);
    fetch_rows(pool, tenant, operation, query).await
}

async fn run_link_clicks(
    pool: &PgPool,
    tenant: &str,
    days: i32,
) -> Result<Vec<Value>, GatewayError> {
    let query = sqlx::query(LINK_CLICKS_SQL).bind(days);
    fetch_rows(pool, tenant, "link_clicks", query).await
}

fn envelope(data: impl Into<Value>) -> Json<Value> {
    Json(json!({ "success": true, "data": data.into() }))
}

/// GET /api/:tenant/funnel - engagement milestones over a date range
pub async fn funnel(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantContext>,
    Query(range): Query<DateRangeQuery>,
) -> Result<Json<Value>, GatewayError> {
    let (pool, tz) = tenant_pool(&state, &tenant.id).await?;
    let rows = run_funnel(&pool, &tenant.id, &tz, range.start_date, range.end_date).await?;
    Ok(envelope(rows))
}

/// GET /api/:tenant/daily - per-day sessions/messages/leads series
pub async fn daily(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantContext>,
    Query(window): Query<WindowQuery>,
) -> Result<Json<Value>, GatewayError> {
    let (pool, tz) = tenant_pool(&state, &tenant.id).await?;
    let days = window.days.unwrap_or(DEFAULT_WINDOW_DAYS);
    let rows = run_windowed(&pool, &tenant.id, "daily", DAILY_SQL, &tz, days).await?;
    Ok(envelope(rows))
}

/// GET /api/:tenant/hourly - hour-of-day distribution
pub async fn hourly(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantContext>,
    Query(window): Query<WindowQuery>,
) -> Result<Json<Value>, GatewayError> {
    let (pool, tz) = tenant_pool(&state, &tenant.id).await?;
    let days = window.days.unwrap_or(DEFAULT_HOURLY_DAYS);
    let rows = run_windowed(&pool, &tenant.id, "hourly", HOURLY_SQL, &tz, days).await?;
    Ok(envelope(rows))
}

/// GET /api/:tenant/leads - captured leads per day
pub async fn leads(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantContext>,
    Query(window): Query<WindowQuery>,
) -> Result<Json<Value>, GatewayError> {
    let (pool, tz) = tenant_pool(&state, &tenant.id).await?;
    let days = window.days.unwrap_or(DEFAULT_WINDOW_DAYS);
    let rows = run_windowed(&pool, &tenant.id, "leads", LEADS_SQL, &tz, days).await?;
    Ok(envelope(rows))
}

/// GET /api/:tenant/handoffs - agent handoff stats per day
pub async fn handoffs(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantContext>,
    Query(window): Query<WindowQuery>,
) -> Result<Json<Value>, GatewayError> {
    let (pool, tz) = tenant_pool(&state, &tenant.id).await?;
    let days = window.days.unwrap_or(DEFAULT_WINDOW_DAYS);
    let rows = run_windowed(&pool, &tenant.id, "handoffs", HANDOFFS_SQL, &tz, days).await?;
    Ok(envelope(rows))
}

/// GET /api/:tenant/conversations - conversation stats per day
pub async fn conversations(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantContext>,
    Query(window): Query<WindowQuery>,
) -> Result<Json<Value>, GatewayError> {
    let (pool, tz) = tenant_pool(&state, &tenant.id).await?;
    let days = window.days.unwrap_or(DEFAULT_WINDOW_DAYS);
    let rows =
        run_windowed(&pool, &tenant.id, "conversations", CONVERSATIONS_SQL, &tz, days).await?;
    Ok(envelope(rows))
}

/// GET /api/:tenant/link-clicks - click totals per tracked link
pub async fn link_clicks(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantContext>,
    Query(window): Query<WindowQuery>,
) -> Result<Json<Value>, GatewayError> {
    let (pool, _) = tenant_pool(&state, &tenant.id).await?;
    let days = window.days.unwrap_or(DEFAULT_WINDOW_DAYS);
    let rows = run_link_clicks(&pool, &tenant.id, days).await?;
    Ok(envelope(rows))
}

/// Fail-fast join over the five overview branches: the first branch error
/// aborts the whole operation and no partial result survives.
async fn join_overview<Fu, Da, Le, Ha, Co>(
    funnel: Fu,
    daily: Da,
    leads: Le,
    handoffs: Ha,
    conversations: Co,
) -> Result<Value, GatewayError>
where
    Fu: Future<Output = Result<Vec<Value>, GatewayError>>,
    Da: Future<Output = Result<Vec<Value>, GatewayError>>,
    Le: Future<Output = Result<Vec<Value>, GatewayError>>,
    Ha: Future<Output = Result<Vec<Value>, GatewayError>>,
    Co: Future<Output = Result<Vec<Value>, GatewayError>>,
{
    let (funnel, daily, leads, handoffs, conversations) =
        tokio::try_join!(funnel, daily, leads, handoffs, conversations)?;

    Ok(json!({
        "funnel": funnel,
        "daily": daily,
        "leads": leads,
        "handoffs": handoffs,
        "conversations": conversations,
    }))
}

/// GET /api/:tenant/overview - concurrent fan-out over the core aggregates
pub async fn overview(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantContext>,
) -> Result<Json<Value>, GatewayError> {
    let (pool, tz) = tenant_pool(&state, &tenant.id).await?;
    let id = tenant.id.as_str();

    let composite = join_overview(
        run_funnel(&pool, id, &tz, None, None),
        run_windowed(&pool, id, "daily", DAILY_SQL, &tz, DEFAULT_WINDOW_DAYS),
        run_windowed(&pool, id, "leads", LEADS_SQL, &tz, DEFAULT_WINDOW_DAYS),
        run_windowed(&pool, id, "handoffs", HANDOFFS_SQL, &tz, DEFAULT_WINDOW_DAYS),
        run_windowed(&pool, id, "conversations", CONVERSATIONS_SQL, &tz, DEFAULT_WINDOW_DAYS),
    )
    .await?;

    Ok(envelope(composite))
}

/// GET /api/:tenant/test - round-trip connectivity check
pub async fn connectivity(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantContext>,
) -> Result<Json<Value>, GatewayError> {
    let (pool, _) = tenant_pool(&state, &tenant.id).await?;
    let query = sqlx::query(CONNECTIVITY_SQL);
    let rows = fetch_rows(&pool, &tenant.id, "connectivity", query).await?;
    Ok(envelope(json!({
        "tenant": tenant.id,
        "database": rows.into_iter().next().unwrap_or(Value::Null),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn branch_ok(label: &'static str) -> impl Future<Output = Result<Vec<Value>, GatewayError>> {
        async move { Ok(vec![json!({ "op": label })]) }
    }

    fn branch_err(
        operation: &'static str,
    ) -> impl Future<Output = Result<Vec<Value>, GatewayError>> {
        async move {
            Err(GatewayError::QueryError {
                tenant: "acme".to_string(),
                operation,
                detail: "relation does not exist".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn overview_join_combines_all_branches() {
        let composite = join_overview(
            branch_ok("funnel"),
            branch_ok("daily"),
            branch_ok("leads"),
            branch_ok("handoffs"),
            branch_ok("conversations"),
        )
        .await
        .unwrap();

        for key in ["funnel", "daily", "leads", "handoffs", "conversations"] {
            assert_eq!(composite[key][0]["op"], key);
        }
    }

    #[tokio::test]
    async fn overview_join_fails_fast_without_partial_results() {
        let err = join_overview(
            branch_ok("funnel"),
            branch_ok("daily"),
            branch_err("leads"),
            branch_ok("handoffs"),
            branch_ok("conversations"),
        )
        .await
        .unwrap_err();

        match &err {
            GatewayError::QueryError { tenant, operation, .. } => {
                assert_eq!(tenant, "acme");
                assert_eq!(*operation, "leads");
            }
            other => panic!("expected QueryError, got {:?}", other),
        }

        // The failing branch's error is the whole response; none of the
        // successful branches leak through.
        let body = err.to_json();
        assert_eq!(body["code"], "QUERY_ERROR");
        assert_eq!(body["operation"], "leads");
        assert!(body.get("data").is_none());
        assert!(body.get("funnel").is_none());
    }

    #[test]
    fn statements_reference_exactly_the_parameters_they_bind() {
        // Timezone ($1) and window ($2)
        for sql in [DAILY_SQL, HOURLY_SQL, LEADS_SQL, HANDOFFS_SQL, CONVERSATIONS_SQL] {
            assert!(sql.contains("$1") && sql.contains("$2"));
        }
        // Window only
        assert!(LINK_CLICKS_SQL.contains("$1"));
        assert!(!LINK_CLICKS_SQL.contains("$2"));
        // Timezone and optional date range
        assert!(FUNNEL_SQL.contains("$1") && FUNNEL_SQL.contains("$2") && FUNNEL_SQL.contains("$3"));
    }
}
