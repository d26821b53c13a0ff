use crate::state::AppState;
use patrol_core::correlate::RemediationDisplay;
use patrol_core::engine::BadgeCounts;
use patrol_core::model::{DismissReason, ExecutionResult};
use patrol_core::prioritize::{FindingQuery, SortBy, StatusBucket};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FindingRow {
    pub id: String,
    pub title: String,
    pub source: String,
    pub severity: String,
    pub status: String,
    pub acknowledged: bool,
    pub out_of_scope: bool,
    pub resource_id: String,
    pub resource_name: String,
    pub detected_at: i64,
    pub regression_count: u32,
    pub investigation_status: Option<String>,
    pub investigation_outcome: Option<String>,
    pub user_note: Option<String>,
    pub action_in_flight: bool,
    pub remediation: Option<RemediationDto>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RemediationDto {
    pub kind: String,
    pub reference: String,
    pub risk_level: String,
    pub command: Option<String>,
    pub summary: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LifecycleRow {
    pub at: i64,
    pub kind: String,
    pub from: Option<String>,
    pub to: Option<String>,
    pub message: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FindingListRequest {
    pub sort_by: Option<String>,
    pub bucket: Option<String>,
    pub resource_id: Option<String>,
    pub ids: Option<Vec<String>>,
    pub max_items: Option<usize>,
    #[serde(default)]
    pub patrol_only: bool,
}

pub fn list_findings(
    state: &AppState,
    request: FindingListRequest,
) -> Result<Vec<FindingRow>, String> {
    let query = to_query(&request)?;
    let now = now_ts();
    let scope = state.scope.borrow();

    let rows = state
        .engine
        .select(&query, now)
        .into_iter()
        .map(|finding| {
            let remediation = state
                .engine
                .remediation_for(&finding.id, now)
                .map(remediation_to_dto);
            FindingRow {
                out_of_scope: scope.out_of_scope(&finding),
                action_in_flight: state.engine.in_flight_action(&finding.id).is_some(),
                status: finding.status(now).as_str().to_string(),
                acknowledged: finding.is_acknowledged(),
                id: finding.id,
                title: finding.title,
                source: finding.source.as_str().to_string(),
                severity: finding.severity.as_str().to_string(),
                resource_id: finding.resource_id,
                resource_name: finding.resource_name,
                detected_at: finding.detected_at,
                regression_count: finding.regression_count,
                investigation_status: finding
                    .investigation_status
                    .map(|s| s.as_str().to_string()),
                investigation_outcome: finding.investigation_outcome,
                user_note: finding.user_note,
                remediation,
            }
        })
        .collect();
    Ok(rows)
}

/// Last `limit` lifecycle entries, newest first.
pub fn get_lifecycle(state: &AppState, id: &str, limit: usize) -> Vec<LifecycleRow> {
    state
        .engine
        .lifecycle_tail(id, limit)
        .into_iter()
        .map(|event| LifecycleRow {
            at: event.at,
            kind: event.kind.as_str().to_string(),
            from: event.from,
            to: event.to,
            message: event.message,
        })
        .collect()
}

pub fn get_summary(state: &AppState) -> BadgeCounts {
    state.engine.badge_counts(now_ts())
}

pub fn set_scope(state: &AppState, resource_ids: Vec<String>, resource_types: Vec<String>) {
    let mut scope = state.scope.borrow_mut();
    scope.resource_ids = resource_ids.into_iter().collect();
    scope.resource_types = resource_types.into_iter().collect();
}

pub async fn refresh(state: &AppState) -> Result<(), String> {
    let now = now_ts();
    state.engine.refresh(now).await?;
    state.engine.hydrate_sessions(now).await
}

pub async fn acknowledge_finding(state: &AppState, id: &str) -> Result<(), String> {
    state.engine.acknowledge(id, now_ts()).await
}

pub async fn snooze_finding(state: &AppState, id: &str, hours: u32) -> Result<(), String> {
    state.engine.snooze(id, hours, now_ts()).await
}

pub async fn dismiss_finding(
    state: &AppState,
    id: &str,
    reason: &str,
    note: Option<&str>,
) -> Result<(), String> {
    let Some(reason) = DismissReason::parse(reason) else {
        return Err(format!("invalid dismiss reason '{reason}'"));
    };
    state.engine.dismiss(id, reason, note, now_ts()).await
}

pub async fn set_finding_note(state: &AppState, id: &str, note: &str) -> Result<(), String> {
    state.engine.set_note(id, note, now_ts()).await
}

pub async fn approve_fix(state: &AppState, id: &str) -> Result<ExecutionResult, String> {
    state.engine.approve_fix(id, now_ts()).await
}

pub async fn deny_fix(state: &AppState, id: &str) -> Result<(), String> {
    state.engine.deny_fix(id, now_ts()).await
}

pub async fn reapprove_and_execute(
    state: &AppState,
    id: &str,
) -> Result<ExecutionResult, String> {
    state.engine.reapprove_and_execute(id, now_ts()).await
}

fn to_query(request: &FindingListRequest) -> Result<FindingQuery, String> {
    let sort_by = match request.sort_by.as_deref() {
        None | Some("severity") => SortBy::Severity,
        Some("time") => SortBy::Time,
        Some(other) => return Err(format!("invalid sort key '{other}'")),
    };
    let bucket = match request.bucket.as_deref() {
        None => None,
        Some("active") => Some(StatusBucket::Active),
        Some("resolved") => Some(StatusBucket::Resolved),
        Some("attention") => Some(StatusBucket::Attention),
        Some("approvals") => Some(StatusBucket::Approvals),
        Some(other) => return Err(format!("invalid bucket '{other}'")),
    };
    Ok(FindingQuery {
        sort_by,
        bucket,
        resource_id: request.resource_id.clone(),
        ids: request
            .ids
            .as_ref()
            .map(|ids| ids.iter().cloned().collect::<BTreeSet<String>>()),
        max_items: request.max_items,
        patrol_only: request.patrol_only,
    })
}

fn remediation_to_dto(display: RemediationDisplay) -> RemediationDto {
    match display {
        RemediationDisplay::LiveApproval(approval) => RemediationDto {
            kind: "approval".into(),
            reference: approval.id,
            risk_level: approval.risk_level.as_str().to_string(),
            command: Some(approval.command),
            summary: approval.context,
        },
        RemediationDisplay::ProposedFix { session_id, fix } => RemediationDto {
            kind: "proposed_fix".into(),
            reference: session_id,
            risk_level: fix.risk_level.as_str().to_string(),
            command: Some(fix.command),
            summary: fix.context,
        },
        RemediationDisplay::Plan(plan) => RemediationDto {
            kind: "plan".into(),
            reference: plan.id,
            risk_level: plan.risk_level.as_str().to_string(),
            command: plan.steps.iter().find_map(|s| s.command.clone()),
            summary: plan.title,
        },
    }
}

fn now_ts() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    let Ok(duration) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    duration.as_secs() as i64
}
