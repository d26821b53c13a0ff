use crate::model::{
    ApprovalRequest, DismissReason, ExecutionResult, InvestigationOutcome, InvestigationSession,
    InvestigationStatus, RemediationPlan, UnifiedFinding,
};
use crate::store::FindingsStore;
use futures::future::LocalBoxFuture;
use std::rc::Rc;

/// The remote collaborators of the engine. Every method is a suspension
/// point; any transport error surfaces as `Err(String)` and is treated
/// the same as a timeout.
pub trait PatrolBackend {
    fn load_findings(&self) -> LocalBoxFuture<'_, Result<Vec<UnifiedFinding>, String>>;
    fn load_plans(&self) -> LocalBoxFuture<'_, Result<Vec<RemediationPlan>, String>>;
    fn load_pending_approvals(&self) -> LocalBoxFuture<'_, Result<Vec<ApprovalRequest>, String>>;
    fn acknowledge_finding<'a>(&'a self, id: &'a str) -> LocalBoxFuture<'a, Result<bool, String>>;
    fn dismiss_finding<'a>(
        &'a self,
        id: &'a str,
        reason: DismissReason,
        note: Option<&'a str>,
    ) -> LocalBoxFuture<'a, Result<bool, String>>;
    fn snooze_finding<'a>(
        &'a self,
        id: &'a str,
        hours: u32,
    ) -> LocalBoxFuture<'a, Result<bool, String>>;
    fn set_finding_note<'a>(
        &'a self,
        id: &'a str,
        note: &'a str,
    ) -> LocalBoxFuture<'a, Result<bool, String>>;
    fn approve_fix<'a>(
        &'a self,
        approval_id: &'a str,
    ) -> LocalBoxFuture<'a, Result<ExecutionResult, String>>;
    fn deny_fix<'a>(&'a self, approval_id: &'a str) -> LocalBoxFuture<'a, Result<(), String>>;
    /// Re-issues a fresh approval for the finding's proposed fix and
    /// returns the new approval id.
    fn reapprove_fix<'a>(
        &'a self,
        finding_id: &'a str,
    ) -> LocalBoxFuture<'a, Result<String, String>>;
    fn load_investigation<'a>(
        &'a self,
        finding_id: &'a str,
    ) -> LocalBoxFuture<'a, Result<Option<InvestigationSession>, String>>;
}

pub type CommandRunner = Rc<dyn Fn(&ApprovalRequest) -> ExecutionResult>;

/// Reference backend over the local findings store. Fix execution goes
/// through an injected runner so hosts decide how commands actually run;
/// the default runner only simulates.
pub struct StoreBackend {
    store: FindingsStore,
    runner: CommandRunner,
}

impl StoreBackend {
    pub fn new(store: FindingsStore) -> StoreBackend {
        StoreBackend::with_runner(store, Rc::new(simulated_runner))
    }

    pub fn with_runner(store: FindingsStore, runner: CommandRunner) -> StoreBackend {
        StoreBackend { store, runner }
    }
}

/// Default runner: pretends the command ran. Hosts that can actually
/// reach the target inject their own.
pub fn simulated_runner(approval: &ApprovalRequest) -> ExecutionResult {
    ExecutionResult {
        success: true,
        output: Some(format!("executed: {}", approval.command)),
        error: None,
    }
}

/// Runs an already-approved fix and records the execution outcome on the
/// target finding.
pub fn run_approved_fix(
    store: &FindingsStore,
    approval: &ApprovalRequest,
    runner: &dyn Fn(&ApprovalRequest) -> ExecutionResult,
    now: i64,
) -> Result<ExecutionResult, String> {
    let result = runner(approval);
    if let Some(mut finding) = store.get_finding(&approval.target_id)? {
        finding.investigation_status = Some(InvestigationStatus::Completed);
        finding.investigation_outcome = Some(
            if result.success {
                InvestigationOutcome::FixExecuted
            } else {
                InvestigationOutcome::FixFailed
            }
            .as_str()
            .to_string(),
        );
        finding.last_investigated_at = Some(now);
        store.save_finding(&finding, now)?;
    }
    Ok(result)
}

impl PatrolBackend for StoreBackend {
    fn load_findings(&self) -> LocalBoxFuture<'_, Result<Vec<UnifiedFinding>, String>> {
        Box::pin(async move { self.store.all_findings() })
    }

    fn load_plans(&self) -> LocalBoxFuture<'_, Result<Vec<RemediationPlan>, String>> {
        Box::pin(async move { self.store.all_plans() })
    }

    fn load_pending_approvals(&self) -> LocalBoxFuture<'_, Result<Vec<ApprovalRequest>, String>> {
        Box::pin(async move { self.store.pending_approvals(now_ts()) })
    }

    fn acknowledge_finding<'a>(&'a self, id: &'a str) -> LocalBoxFuture<'a, Result<bool, String>> {
        Box::pin(async move { self.store.acknowledge(id, now_ts()) })
    }

    fn dismiss_finding<'a>(
        &'a self,
        id: &'a str,
        reason: DismissReason,
        note: Option<&'a str>,
    ) -> LocalBoxFuture<'a, Result<bool, String>> {
        Box::pin(async move { self.store.dismiss(id, reason, note, now_ts()) })
    }

    fn snooze_finding<'a>(
        &'a self,
        id: &'a str,
        hours: u32,
    ) -> LocalBoxFuture<'a, Result<bool, String>> {
        Box::pin(async move { self.store.snooze(id, hours, now_ts()) })
    }

    fn set_finding_note<'a>(
        &'a self,
        id: &'a str,
        note: &'a str,
    ) -> LocalBoxFuture<'a, Result<bool, String>> {
        Box::pin(async move { self.store.set_note(id, note, now_ts()) })
    }

    fn approve_fix<'a>(
        &'a self,
        approval_id: &'a str,
    ) -> LocalBoxFuture<'a, Result<ExecutionResult, String>> {
        Box::pin(async move {
            let now = now_ts();
            let approval = self.store.decide_approval(approval_id, true, now)?;
            run_approved_fix(&self.store, &approval, &*self.runner, now)
        })
    }

    fn deny_fix<'a>(&'a self, approval_id: &'a str) -> LocalBoxFuture<'a, Result<(), String>> {
        Box::pin(async move {
            self.store.decide_approval(approval_id, false, now_ts())?;
            Ok(())
        })
    }

    fn reapprove_fix<'a>(
        &'a self,
        finding_id: &'a str,
    ) -> LocalBoxFuture<'a, Result<String, String>> {
        Box::pin(async move {
            self.store
                .reissue_approval(finding_id, now_ts())
                .map(|approval| approval.id)
        })
    }

    fn load_investigation<'a>(
        &'a self,
        finding_id: &'a str,
    ) -> LocalBoxFuture<'a, Result<Option<InvestigationSession>, String>> {
        Box::pin(async move { self.store.session_for_finding(finding_id) })
    }
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
    use crate::model::{
        ApprovalStatus, ApprovalTool, FindingSource, ProposedFix, RiskLevel, Severity,
    };
    use futures::executor::block_on;

    fn db_path(name: &str) -> String {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time")
            .as_nanos();
        format!("/tmp/patrol-desk-tests/{name}-{nanos}.db")
    }

    fn seeded_store(name: &str) -> FindingsStore {
        let store = FindingsStore::open(&db_path(name)).expect("open");
        store
            .upsert_finding(
                UnifiedFinding::new(
                    "f-1",
                    FindingSource::AiPatrol,
                    Severity::Warning,
                    "vm-101",
                    "vm",
                    "web-01",
                    "disk filling up",
                    1000,
                ),
                1000,
            )
            .expect("seed finding");
        store
            .put_approval(&ApprovalRequest {
                id: "ap-1".into(),
                target_id: "f-1".into(),
                tool: ApprovalTool::InvestigationFix,
                risk_level: RiskLevel::Low,
                command: "journalctl --vacuum-size=200M".into(),
                context: String::new(),
                status: ApprovalStatus::Pending,
                requested_at: 1000,
                expires_at: i64::MAX,
            })
            .expect("seed approval");
        store
    }

    #[test]
    fn approve_fix_records_executed_outcome() {
        let store = seeded_store("backend-approve");
        let backend = StoreBackend::new(store.clone());

        let result = block_on(backend.approve_fix("ap-1")).expect("approve");
        assert!(result.success);

        let finding = store.get_finding("f-1").expect("get").expect("present");
        assert_eq!(
            finding.investigation_outcome.as_deref(),
            Some("fix_executed")
        );
        assert_eq!(
            finding.investigation_status,
            Some(InvestigationStatus::Completed)
        );
    }

    #[test]
    fn failed_runner_records_fix_failed() {
        let store = seeded_store("backend-approve-fail");
        let backend = StoreBackend::with_runner(
            store.clone(),
            Rc::new(|_approval: &ApprovalRequest| ExecutionResult {
                success: false,
                output: None,
                error: Some("exit status 1".into()),
            }),
        );

        let result = block_on(backend.approve_fix("ap-1")).expect("approve");
        assert!(!result.success);

        let finding = store.get_finding("f-1").expect("get").expect("present");
        assert_eq!(finding.investigation_outcome.as_deref(), Some("fix_failed"));
    }

    #[test]
    fn deny_fix_consumes_the_approval() {
        let store = seeded_store("backend-deny");
        let backend = StoreBackend::new(store.clone());

        block_on(backend.deny_fix("ap-1")).expect("deny");
        assert_eq!(
            store.get_approval("ap-1").expect("get").expect("present").status,
            ApprovalStatus::Denied
        );
        assert!(block_on(backend.deny_fix("ap-1")).is_err());
    }

    #[test]
    fn reapprove_returns_fresh_approval_id() {
        let store = seeded_store("backend-reapprove");
        store
            .put_session(&InvestigationSession {
                id: "sess-1".into(),
                finding_id: "f-1".into(),
                status: InvestigationStatus::Completed,
                outcome: Some("fix_queued".into()),
                proposed_fix: Some(ProposedFix {
                    command: "journalctl --vacuum-size=200M".into(),
                    context: String::new(),
                    risk_level: RiskLevel::Low,
                }),
                evidence: Vec::new(),
            })
            .expect("session");
        let backend = StoreBackend::new(store.clone());

        let approval_id = block_on(backend.reapprove_fix("f-1")).expect("reapprove");
        assert_ne!(approval_id, "ap-1");
        assert!(store
            .get_approval(&approval_id)
            .expect("get")
            .expect("present")
            .is_live(now_ts()));
    }
}
