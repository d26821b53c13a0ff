use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use finding_registry::CanonicalAlertV1;
use patrol_core::model::{ApprovalRequest, InvestigationSession, RemediationPlan};
use patrol_core::normalize;
use patrol_core::store::FindingsStore;
use tracing::warn;

pub trait AlertAdapter: Send + Sync + 'static {
    fn parse(&self, payload: &serde_json::Value) -> Result<CanonicalAlertV1, String>;
}

/// Accepts loosely-shaped alert payloads and maps them onto the
/// canonical record. Validation happens in the normalizer, not here.
pub struct GenericAdapter;

impl AlertAdapter for GenericAdapter {
    fn parse(&self, payload: &serde_json::Value) -> Result<CanonicalAlertV1, String> {
        let alert = CanonicalAlertV1 {
            schema: "alert.v1".into(),
            id: payload
                .get("id")
                .or_else(|| payload.get("alert_id"))
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default()
                .to_string(),
            alert_type: payload
                .get("alert_type")
                .or_else(|| payload.get("type"))
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default()
                .to_string(),
            level: payload
                .get("level")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("warning")
                .to_string(),
            resource_id: payload
                .get("resource_id")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default()
                .to_string(),
            resource_name: payload
                .get("resource_name")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default()
                .to_string(),
            resource_type: payload
                .get("resource_type")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("guest")
                .to_string(),
            message: payload
                .get("message")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default()
                .to_string(),
            value: payload
                .get("value")
                .and_then(serde_json::Value::as_f64)
                .unwrap_or(0.0),
            threshold: payload
                .get("threshold")
                .and_then(serde_json::Value::as_f64)
                .unwrap_or(0.0),
            started_at: payload
                .get("started_at")
                .and_then(serde_json::Value::as_i64)
                .unwrap_or_else(now_ts),
        };
        Ok(alert)
    }
}

pub fn ingest_router(store: FindingsStore) -> Router {
    Router::new()
        .route("/ingest/alerts", post(handle_alerts))
        .route("/ingest/alerts/clear", post(handle_alerts_clear))
        .route("/ingest/patrol", post(handle_patrol))
        .route("/ingest/plans", post(handle_plans))
        .route("/ingest/approvals", post(handle_approvals))
        .route("/ingest/sessions", post(handle_sessions))
        .with_state(store)
}

async fn handle_alerts(
    State(store): State<FindingsStore>,
    Json(payload): Json<serde_json::Value>,
) -> StatusCode {
    let Some(items) = payload.as_array() else {
        return StatusCode::BAD_REQUEST;
    };
    let now = now_ts();
    let adapter = GenericAdapter;
    let mut alerts = Vec::new();
    for item in items {
        match adapter.parse(item) {
            Ok(alert) => alerts.push(alert),
            Err(err) => warn!("skipping unparseable alert payload: {err}"),
        }
    }

    let batch = normalize::normalize_alert_batch(&alerts, now);
    store_findings(&store, batch.findings, now)
}

async fn handle_alerts_clear(
    State(store): State<FindingsStore>,
    Json(payload): Json<serde_json::Value>,
) -> StatusCode {
    let Some(ids) = payload.as_array() else {
        return StatusCode::BAD_REQUEST;
    };
    let now = now_ts();
    for id in ids.iter().filter_map(serde_json::Value::as_str) {
        if let Err(err) = store.resolve_by_alert(id, now) {
            warn!("failed to resolve finding for cleared alert {id}: {err}");
            return StatusCode::SERVICE_UNAVAILABLE;
        }
    }
    StatusCode::ACCEPTED
}

async fn handle_patrol(
    State(store): State<FindingsStore>,
    Json(payload): Json<serde_json::Value>,
) -> StatusCode {
    let Some(items) = payload.as_array() else {
        return StatusCode::BAD_REQUEST;
    };
    let batch = normalize::normalize_patrol_batch(items);
    store_findings(&store, batch.findings, now_ts())
}

async fn handle_plans(
    State(store): State<FindingsStore>,
    Json(payload): Json<serde_json::Value>,
) -> StatusCode {
    ingest_docs::<RemediationPlan>(payload, "plan", |plan| store.put_plan(&plan))
}

async fn handle_approvals(
    State(store): State<FindingsStore>,
    Json(payload): Json<serde_json::Value>,
) -> StatusCode {
    ingest_docs::<ApprovalRequest>(payload, "approval", |approval| {
        store.put_approval(&approval)
    })
}

async fn handle_sessions(
    State(store): State<FindingsStore>,
    Json(payload): Json<serde_json::Value>,
) -> StatusCode {
    ingest_docs::<InvestigationSession>(payload, "session", |session| {
        store.put_session(&session)
    })
}

fn store_findings(
    store: &FindingsStore,
    findings: Vec<patrol_core::model::UnifiedFinding>,
    now: i64,
) -> StatusCode {
    for finding in findings {
        if let Err(err) = store.upsert_finding(finding, now) {
            warn!("failed to store finding: {err}");
            return StatusCode::SERVICE_UNAVAILABLE;
        }
    }
    StatusCode::ACCEPTED
}

fn ingest_docs<T: serde::de::DeserializeOwned>(
    payload: serde_json::Value,
    what: &str,
    put: impl Fn(T) -> Result<(), String>,
) -> StatusCode {
    let Some(items) = payload.as_array() else {
        return StatusCode::BAD_REQUEST;
    };
    for item in items {
        match serde_json::from_value::<T>(item.clone()) {
            Ok(doc) => {
                if let Err(err) = put(doc) {
                    warn!("failed to store {what}: {err}");
                    return StatusCode::SERVICE_UNAVAILABLE;
                }
            }
            Err(err) => warn!("skipping malformed {what} record: {err}"),
        }
    }
    StatusCode::ACCEPTED
}

fn now_ts() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    let Ok(duration) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    duration.as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generic_adapter_maps_aliases_and_defaults() {
        let payload = serde_json::json!({
            "alert_id": "a-1",
            "type": "cpu",
            "level": "critical",
            "resource_id": "vm-101",
            "resource_name": "web-01",
            "value": 97.0,
            "threshold": 90.0,
            "started_at": 1700000000
        });
        let alert = GenericAdapter.parse(&payload).expect("parse");
        assert_eq!(alert.id, "a-1");
        assert_eq!(alert.alert_type, "cpu");
        assert_eq!(alert.level, "critical");
        assert_eq!(alert.resource_type, "guest");
        assert_eq!(alert.started_at, 1700000000);
    }

    #[test]
    fn adapter_output_feeds_the_normalizer() {
        let payload = serde_json::json!({
            "id": "a-2",
            "alert_type": "memory",
            "resource_id": "ct-200",
            "resource_name": "db-01",
            "resource_type": "container"
        });
        let alert = GenericAdapter.parse(&payload).expect("parse");
        let batch = normalize::normalize_alert_batch(&[alert], 1700000000);
        assert_eq!(batch.findings.len(), 1);
        assert_eq!(batch.skipped, 0);
        assert!(batch.findings[0].is_threshold);
    }

    #[test]
    fn blank_alert_is_rejected_by_validation_not_the_adapter() {
        let alert = GenericAdapter
            .parse(&serde_json::json!({}))
            .expect("parse is lenient");
        let batch = normalize::normalize_alert_batch(&[alert], 1700000000);
        assert!(batch.findings.is_empty());
        assert_eq!(batch.skipped, 1);
    }
}
