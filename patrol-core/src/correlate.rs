use crate::model::{
    ApprovalRequest, ApprovalTool, FindingStatus, InvestigationOutcome, InvestigationSession,
    ProposedFix, RemediationPlan, UnifiedFinding,
};
use std::collections::BTreeMap;

/// The single remediation affordance shown for a finding. Precedence:
/// a live pending approval beats the proposed fix recovered from an
/// expired approval, which beats a legacy remediation plan.
#[derive(Clone, Debug, PartialEq)]
pub enum RemediationDisplay {
    LiveApproval(ApprovalRequest),
    ProposedFix { session_id: String, fix: ProposedFix },
    Plan(RemediationPlan),
}

/// Most recent plan for the finding; ties on `created_at` break by plan
/// id so the selection is deterministic.
pub fn latest_plan<'a>(
    finding_id: &str,
    plans: &'a [RemediationPlan],
) -> Option<&'a RemediationPlan> {
    plans
        .iter()
        .filter(|p| p.finding_id == finding_id)
        .max_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)))
}

/// The live investigation-fix approval targeting the finding. Legacy
/// plan-review approvals use a separate path and are never returned
/// here.
pub fn live_fix_approval<'a>(
    finding_id: &str,
    approvals: &'a [ApprovalRequest],
    now: i64,
) -> Option<&'a ApprovalRequest> {
    approvals
        .iter()
        .filter(|a| {
            a.target_id == finding_id && a.tool == ApprovalTool::InvestigationFix && a.is_live(now)
        })
        .max_by(|a, b| a.requested_at.cmp(&b.requested_at).then_with(|| a.id.cmp(&b.id)))
}

/// A fix was queued but its approval lapsed: the investigation session
/// holds the proposed fix and is worth fetching once.
pub fn wants_session_fetch(
    finding: &UnifiedFinding,
    approvals: &[ApprovalRequest],
    now: i64,
) -> bool {
    finding.status(now) == FindingStatus::Active
        && finding.settled_outcome() == Some(InvestigationOutcome::FixQueued)
        && live_fix_approval(&finding.id, approvals, now).is_none()
}

/// Resolves at most one remediation artifact for an active finding.
/// Artifacts referencing findings that are gone are simply never asked
/// about, so orphans disappear from display without ceremony.
pub fn resolve_remediation(
    finding: &UnifiedFinding,
    plans: &[RemediationPlan],
    approvals: &[ApprovalRequest],
    sessions: &BTreeMap<String, InvestigationSession>,
    now: i64,
) -> Option<RemediationDisplay> {
    if finding.status(now) != FindingStatus::Active {
        return None;
    }

    if let Some(approval) = live_fix_approval(&finding.id, approvals, now) {
        return Some(RemediationDisplay::LiveApproval(approval.clone()));
    }

    if wants_session_fetch(finding, approvals, now) {
        if let Some(session) = sessions.get(&finding.id) {
            if let Some(fix) = &session.proposed_fix {
                return Some(RemediationDisplay::ProposedFix {
                    session_id: session.id.clone(),
                    fix: fix.clone(),
                });
            }
        }
    }

    latest_plan(&finding.id, plans).map(|plan| RemediationDisplay::Plan(plan.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        ApprovalStatus, FindingSource, InvestigationStatus, PlanStatus, RiskLevel, Severity,
    };

    fn finding() -> UnifiedFinding {
        let mut f = UnifiedFinding::new(
            "f-1",
            FindingSource::AiPatrol,
            Severity::Warning,
            "vm-101",
            "vm",
            "web-01",
            "disk filling up",
            1000,
        );
        f.investigation_status = Some(InvestigationStatus::Completed);
        f.investigation_outcome = Some("fix_queued".into());
        f
    }

    fn plan(id: &str, created_at: i64) -> RemediationPlan {
        RemediationPlan {
            id: id.into(),
            finding_id: "f-1".into(),
            title: "clear journal logs".into(),
            risk_level: RiskLevel::Low,
            status: PlanStatus::Pending,
            steps: Vec::new(),
            created_at,
        }
    }

    fn approval(id: &str, tool: ApprovalTool, expires_at: i64) -> ApprovalRequest {
        ApprovalRequest {
            id: id.into(),
            target_id: "f-1".into(),
            tool,
            risk_level: RiskLevel::Low,
            command: "journalctl --vacuum-size=200M".into(),
            context: String::new(),
            status: ApprovalStatus::Pending,
            requested_at: 1000,
            expires_at,
        }
    }

    fn session_with_fix() -> BTreeMap<String, InvestigationSession> {
        let mut sessions = BTreeMap::new();
        sessions.insert(
            "f-1".to_string(),
            InvestigationSession {
                id: "sess-9".into(),
                finding_id: "f-1".into(),
                status: InvestigationStatus::Completed,
                outcome: Some("fix_queued".into()),
                proposed_fix: Some(ProposedFix {
                    command: "journalctl --vacuum-size=200M".into(),
                    context: "journal logs dominate /var".into(),
                    risk_level: RiskLevel::Low,
                }),
                evidence: vec!["du -sh /var/log/journal = 3.2G".into()],
            },
        );
        sessions
    }

    #[test]
    fn latest_plan_breaks_ties_by_id() {
        let plans = vec![plan("plan-b", 500), plan("plan-a", 500), plan("plan-old", 100)];
        assert_eq!(latest_plan("f-1", &plans).expect("plan").id, "plan-b");
        // Deterministic across reordering.
        let reordered = vec![plan("plan-a", 500), plan("plan-old", 100), plan("plan-b", 500)];
        assert_eq!(latest_plan("f-1", &reordered).expect("plan").id, "plan-b");
    }

    #[test]
    fn plan_review_approvals_are_not_conflated() {
        let approvals = vec![approval("ap-legacy", ApprovalTool::PlanReview, 9999)];
        assert!(live_fix_approval("f-1", &approvals, 1500).is_none());
    }

    #[test]
    fn live_approval_outranks_everything() {
        let plans = vec![plan("plan-a", 500)];
        let approvals = vec![approval("ap-1", ApprovalTool::InvestigationFix, 9999)];
        let display =
            resolve_remediation(&finding(), &plans, &approvals, &session_with_fix(), 1500)
                .expect("display");
        assert!(matches!(display, RemediationDisplay::LiveApproval(a) if a.id == "ap-1"));
    }

    #[test]
    fn expired_approval_falls_back_to_session_fix() {
        let plans = vec![plan("plan-a", 500)];
        let approvals = vec![approval("ap-1", ApprovalTool::InvestigationFix, 1200)];
        let display =
            resolve_remediation(&finding(), &plans, &approvals, &session_with_fix(), 1500)
                .expect("display");
        assert!(
            matches!(display, RemediationDisplay::ProposedFix { session_id, .. } if session_id == "sess-9")
        );
    }

    #[test]
    fn plan_is_last_resort() {
        let plans = vec![plan("plan-a", 500)];
        let display =
            resolve_remediation(&finding(), &plans, &[], &BTreeMap::new(), 1500).expect("display");
        assert!(matches!(display, RemediationDisplay::Plan(p) if p.id == "plan-a"));
    }

    #[test]
    fn no_affordance_for_non_active_findings() {
        let mut f = finding();
        f.resolved_at = Some(1400);
        let plans = vec![plan("plan-a", 500)];
        assert!(resolve_remediation(&f, &plans, &[], &session_with_fix(), 1500).is_none());
    }

    #[test]
    fn session_fetch_wanted_only_for_queued_fix_without_live_approval() {
        let f = finding();
        assert!(wants_session_fetch(&f, &[], 1500));

        let live = vec![approval("ap-1", ApprovalTool::InvestigationFix, 9999)];
        assert!(!wants_session_fetch(&f, &live, 1500));

        let mut running = finding();
        running.investigation_status = Some(InvestigationStatus::Running);
        assert!(!wants_session_fetch(&running, &[], 1500));
    }
}
