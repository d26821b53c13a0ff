pub mod commands;
pub mod runtime;
pub mod state;

use crate::state::AppState;
use finding_registry::CanonicalAlertV1;
use patrol_core::backend::StoreBackend;
use patrol_core::engine::FindingsEngine;
use patrol_core::model::{
    InvestigationSession, InvestigationStatus, PlanStatus, PlanStep, ProposedFix, RemediationPlan,
    RiskLevel,
};
use patrol_core::normalize;
use patrol_core::scope::ScopeSelection;
use patrol_core::store::FindingsStore;
use std::cell::RefCell;
use std::rc::Rc;

pub fn build_state(db_path: &str) -> Result<AppState, String> {
    let store = FindingsStore::open(db_path)?;
    let engine = FindingsEngine::new(StoreBackend::new(store.clone()));
    Ok(AppState {
        engine,
        store,
        scope: Rc::new(RefCell::new(ScopeSelection::default())),
    })
}

pub fn run() -> Result<(), String> {
    let state = build_state("findings.db")?;
    futures::executor::block_on(commands::refresh(&state))?;
    let _ = commands::list_findings(&state, commands::FindingListRequest::default())?;
    Ok(())
}

pub fn run_demo() -> Result<(), String> {
    let state = build_state("findings.db")?;
    seed_demo_data(&state)?;
    futures::executor::block_on(commands::refresh(&state))?;

    let summary = commands::get_summary(&state);
    println!("summary:\n{}", pretty(&summary)?);

    let rows = commands::list_findings(&state, commands::FindingListRequest::default())?;
    println!("findings:\n{}", pretty(&rows)?);

    if let Some(first) = rows.first() {
        let history = commands::get_lifecycle(&state, &first.id, 10);
        println!("lifecycle of {}:\n{}", first.id, pretty(&history)?);
    }

    Ok(())
}

fn seed_demo_data(state: &AppState) -> Result<(), String> {
    let now = now_ts();

    let alert = CanonicalAlertV1 {
        schema: "alert.v1".into(),
        id: "cpu-vm-101".into(),
        alert_type: "cpu".into(),
        level: "critical".into(),
        resource_id: "vm-101".into(),
        resource_name: "web-01".into(),
        resource_type: "vm".into(),
        message: "CPU usage has been above the threshold for 10 minutes".into(),
        value: 97.0,
        threshold: 90.0,
        started_at: now - 600,
    };
    let batch = normalize::normalize_alert_batch(&[alert], now);
    for finding in batch.findings {
        state.store.upsert_finding(finding, now)?;
    }

    let patrol_records = vec![
        serde_json::json!({
            "id": "patrol-ct-200-restarts",
            "source": "ai-patrol",
            "severity": "critical",
            "resource_id": "ct-200",
            "resource_type": "container",
            "resource_name": "db-01",
            "title": "Container stuck in a restart loop",
            "detected_at": now - 300,
            "investigation_status": "completed",
            "investigation_outcome": "fix_failed"
        }),
        serde_json::json!({
            "id": "patrol-vm-101-journal",
            "source": "ai-patrol",
            "severity": "warning",
            "resource_id": "vm-101",
            "resource_type": "vm",
            "resource_name": "web-01",
            "title": "Journal logs filling /var",
            "detected_at": now - 1200,
            "investigation_status": "completed",
            "investigation_outcome": "fix_queued"
        }),
    ];
    let batch = normalize::normalize_patrol_batch(&patrol_records);
    for finding in batch.findings {
        state.store.upsert_finding(finding, now)?;
    }

    state.store.put_session(&InvestigationSession {
        id: "sess-journal-1".into(),
        finding_id: "patrol-vm-101-journal".into(),
        status: InvestigationStatus::Completed,
        outcome: Some("fix_queued".into()),
        proposed_fix: Some(ProposedFix {
            command: "journalctl --vacuum-size=200M".into(),
            context: "journal logs dominate /var usage".into(),
            risk_level: RiskLevel::Low,
        }),
        evidence: vec!["du -sh /var/log/journal = 3.2G".into()],
    })?;

    state.store.put_plan(&RemediationPlan {
        id: "plan-cpu-1".into(),
        finding_id: "alert-cpu-vm-101".into(),
        title: "Throttle the secondary backup job".into(),
        risk_level: RiskLevel::Low,
        status: PlanStatus::Pending,
        steps: vec![PlanStep {
            order: 1,
            action: "Pause the secondary backup timer".into(),
            command: Some("systemctl stop backup-secondary.timer".into()),
            rollback_command: Some("systemctl start backup-secondary.timer".into()),
        }],
        created_at: now - 500,
    })?;

    Ok(())
}

fn pretty<T: serde::Serialize>(value: &T) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| e.to_string())
}

fn now_ts() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    let Ok(duration) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    duration.as_secs() as i64
}
