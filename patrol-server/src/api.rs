use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use patrol_core::backend::{run_approved_fix, simulated_runner};
use patrol_core::model::{
    ApprovalRequest, DismissReason, ExecutionResult, InvestigationSession, RemediationPlan,
    UnifiedFinding,
};
use patrol_core::store::{FindingsStore, FindingsSummary};

type ApiError = (StatusCode, String);

pub fn api_router(store: FindingsStore) -> Router {
    Router::new()
        .route("/api/findings", get(list_findings))
        .route("/api/findings/summary", get(findings_summary))
        .route("/api/findings/:id/investigation", get(get_investigation))
        .route("/api/findings/:id/acknowledge", post(acknowledge))
        .route("/api/findings/:id/dismiss", post(dismiss))
        .route("/api/findings/:id/snooze", post(snooze))
        .route("/api/findings/:id/note", post(set_note))
        .route("/api/findings/:id/reapprove", post(reapprove))
        .route("/api/plans", get(list_plans))
        .route("/api/plans/:id/approve", post(approve_plan))
        .route("/api/plans/:id/execute", post(execute_plan))
        .route("/api/approvals", get(list_approvals))
        .route("/api/approvals/:id/approve", post(approve))
        .route("/api/approvals/:id/deny", post(deny))
        .with_state(store)
}

async fn list_findings(
    State(store): State<FindingsStore>,
) -> Result<Json<Vec<UnifiedFinding>>, ApiError> {
    store.all_findings().map(Json).map_err(unavailable)
}

async fn findings_summary(
    State(store): State<FindingsStore>,
) -> Result<Json<FindingsSummary>, ApiError> {
    store.summary(now_ts()).map(Json).map_err(unavailable)
}

async fn get_investigation(
    State(store): State<FindingsStore>,
    Path(id): Path<String>,
) -> Result<Json<InvestigationSession>, ApiError> {
    match store.session_for_finding(&id) {
        Ok(Some(session)) => Ok(Json(session)),
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            format!("no investigation session for finding '{id}'"),
        )),
        Err(err) => Err(unavailable(err)),
    }
}

async fn acknowledge(
    State(store): State<FindingsStore>,
    Path(id): Path<String>,
) -> Result<Json<bool>, ApiError> {
    store
        .acknowledge(&id, now_ts())
        .map(Json)
        .map_err(unavailable)
}

async fn dismiss(
    State(store): State<FindingsStore>,
    Path(id): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<bool>, ApiError> {
    let reason_raw = body
        .get("reason")
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default();
    let Some(reason) = DismissReason::parse(reason_raw) else {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("invalid dismiss reason '{reason_raw}'"),
        ));
    };
    let note = body.get("note").and_then(serde_json::Value::as_str);
    store
        .dismiss(&id, reason, note, now_ts())
        .map(Json)
        .map_err(unavailable)
}

async fn snooze(
    State(store): State<FindingsStore>,
    Path(id): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<bool>, ApiError> {
    let hours = body
        .get("hours")
        .and_then(serde_json::Value::as_u64)
        .unwrap_or(0);
    if hours == 0 {
        return Err((
            StatusCode::BAD_REQUEST,
            "snooze duration must be positive".into(),
        ));
    }
    store
        .snooze(&id, hours as u32, now_ts())
        .map(Json)
        .map_err(unavailable)
}

async fn set_note(
    State(store): State<FindingsStore>,
    Path(id): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<bool>, ApiError> {
    let note = body
        .get("note")
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default();
    store
        .set_note(&id, note, now_ts())
        .map(Json)
        .map_err(unavailable)
}

/// The distinct re-approval path for a queued fix whose approval lapsed.
async fn reapprove(
    State(store): State<FindingsStore>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    store
        .reissue_approval(&id, now_ts())
        .map(|approval| Json(serde_json::json!({ "approval_id": approval.id })))
        .map_err(|err| (StatusCode::CONFLICT, err))
}

async fn list_plans(
    State(store): State<FindingsStore>,
) -> Result<Json<Vec<RemediationPlan>>, ApiError> {
    store.all_plans().map(Json).map_err(unavailable)
}

async fn approve_plan(
    State(store): State<FindingsStore>,
    Path(id): Path<String>,
) -> Result<Json<RemediationPlan>, ApiError> {
    store
        .approve_plan(&id, now_ts())
        .map(Json)
        .map_err(|err| (StatusCode::CONFLICT, err))
}

async fn execute_plan(
    State(store): State<FindingsStore>,
    Path(id): Path<String>,
) -> Result<Json<RemediationPlan>, ApiError> {
    store
        .execute_plan(&id, now_ts())
        .map(Json)
        .map_err(|err| (StatusCode::CONFLICT, err))
}

async fn list_approvals(
    State(store): State<FindingsStore>,
) -> Result<Json<Vec<ApprovalRequest>>, ApiError> {
    store
        .pending_approvals(now_ts())
        .map(Json)
        .map_err(unavailable)
}

async fn approve(
    State(store): State<FindingsStore>,
    Path(id): Path<String>,
) -> Result<Json<ExecutionResult>, ApiError> {
    let now = now_ts();
    let approval = store
        .decide_approval(&id, true, now)
        .map_err(|err| (StatusCode::CONFLICT, err))?;
    run_approved_fix(&store, &approval, &simulated_runner, now)
        .map(Json)
        .map_err(unavailable)
}

async fn deny(State(store): State<FindingsStore>, Path(id): Path<String>) -> Result<StatusCode, ApiError> {
    store
        .decide_approval(&id, false, now_ts())
        .map(|_| StatusCode::NO_CONTENT)
        .map_err(|err| (StatusCode::CONFLICT, err))
}

fn unavailable(err: String) -> ApiError {
    (StatusCode::SERVICE_UNAVAILABLE, err)
}

fn now_ts() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    let Ok(duration) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    duration.as_secs() as i64
}
