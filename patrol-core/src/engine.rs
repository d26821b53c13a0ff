use crate::backend::PatrolBackend;
use crate::correlate::{self, RemediationDisplay};
use crate::lifecycle;
use crate::model::{
    ApprovalRequest, DismissReason, ExecutionResult, FindingStatus, InvestigationOutcome,
    InvestigationSession, InvestigationStatus, LifecycleEvent, LifecycleEventKind,
    RemediationPlan, Severity, UnifiedFinding,
};
use crate::prioritize::{self, FindingQuery};
use serde::Serialize;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PendingAction {
    Acknowledge,
    Snooze,
    Dismiss,
    SetNote,
    ApproveFix,
    DenyFix,
    Reapprove,
}

/// Counts are derived from the current finding set on every call.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BadgeCounts {
    pub active: usize,
    pub critical: usize,
    pub warning: usize,
    pub watch: usize,
    pub info: usize,
    pub attention: usize,
    pub approvals: usize,
}

#[derive(Default)]
struct EngineState {
    findings: BTreeMap<String, UnifiedFinding>,
    plans: Vec<RemediationPlan>,
    approvals: Vec<ApprovalRequest>,
    // Investigation sessions cached by finding id.
    sessions: BTreeMap<String, InvestigationSession>,
    in_flight: BTreeMap<String, PendingAction>,
    // Authoritative copies a refresh could not apply because an action
    // was in flight; applied when the action resolves.
    deferred: BTreeMap<String, UnifiedFinding>,
    closed: bool,
}

enum Guard {
    Proceed,
    AlreadyDone,
    Reject(String),
}

/// The client-side findings engine. Single-threaded and cooperatively
/// scheduled: all shared state lives behind one `RefCell`, no borrow is
/// held across an await, and the in-flight arena serializes work per
/// finding id.
pub struct FindingsEngine<B: PatrolBackend> {
    backend: Rc<B>,
    state: Rc<RefCell<EngineState>>,
}

impl<B: PatrolBackend> Clone for FindingsEngine<B> {
    fn clone(&self) -> Self {
        FindingsEngine {
            backend: Rc::clone(&self.backend),
            state: Rc::clone(&self.state),
        }
    }
}

impl<B: PatrolBackend> FindingsEngine<B> {
    pub fn new(backend: B) -> FindingsEngine<B> {
        FindingsEngine {
            backend: Rc::new(backend),
            state: Rc::new(RefCell::new(EngineState::default())),
        }
    }

    /// A discarded view calls this; anything still in flight resolves as
    /// a no-op afterwards.
    pub fn close(&self) {
        self.state.borrow_mut().closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.state.borrow().closed
    }

    /// Background refresh. Fetched results fully replace local copies,
    /// except findings with an in-flight action (their copies are
    /// deferred) and findings that disappeared server-side (implicit
    /// resolution, no notice).
    pub async fn refresh(&self, now: i64) -> Result<(), String> {
        if self.is_closed() {
            return Ok(());
        }
        let findings = self.backend.load_findings().await?;
        let plans = self.backend.load_plans().await?;
        let approvals = self.backend.load_pending_approvals().await?;

        let state = &mut *self.state.borrow_mut();
        if state.closed {
            return Ok(());
        }

        let mut fetched_ids = BTreeSet::new();
        for fetched in findings {
            fetched_ids.insert(fetched.id.clone());
            if state.in_flight.contains_key(&fetched.id) {
                state.deferred.insert(fetched.id.clone(), fetched);
                continue;
            }
            let reconciled = reconcile_regression(state.findings.get(&fetched.id), fetched, now);
            state.findings.insert(reconciled.id.clone(), reconciled);
        }

        for (id, finding) in state.findings.iter_mut() {
            if fetched_ids.contains(id) || state.in_flight.contains_key(id) {
                continue;
            }
            if finding.status(now) != FindingStatus::Resolved {
                debug!("finding {id} disappeared from the feed; treating as resolved");
                let _ = lifecycle::resolve(finding, true, now);
            }
        }

        state.plans = plans;
        state.approvals = approvals;
        Ok(())
    }

    /// Fetches and caches investigation sessions for findings whose
    /// queued fix lost its approval. Each session is fetched at most
    /// once; fetch failures are non-fatal.
    pub async fn hydrate_sessions(&self, now: i64) -> Result<(), String> {
        let wanted: Vec<String> = {
            let state = self.state.borrow();
            if state.closed {
                return Ok(());
            }
            state
                .findings
                .values()
                .filter(|f| {
                    correlate::wants_session_fetch(f, &state.approvals, now)
                        && !state.sessions.contains_key(&f.id)
                })
                .map(|f| f.id.clone())
                .collect()
        };

        for finding_id in wanted {
            if self.is_closed() {
                return Ok(());
            }
            match self.backend.load_investigation(&finding_id).await {
                Ok(Some(session)) => {
                    self.state.borrow_mut().sessions.insert(finding_id, session);
                }
                Ok(None) => {}
                Err(err) => debug!("investigation fetch failed for {finding_id}: {err}"),
            }
        }
        Ok(())
    }

    pub async fn acknowledge(&self, id: &str, now: i64) -> Result<(), String> {
        self.begin(id, PendingAction::Acknowledge)?;
        match self.guard(id, |finding| match finding.status(now) {
            FindingStatus::Active if finding.is_acknowledged() => Guard::AlreadyDone,
            FindingStatus::Active => Guard::Proceed,
            other => Guard::Reject(format!("cannot acknowledge a {} finding", other.as_str())),
        }) {
            Ok(()) => {}
            Err(outcome) => return outcome,
        }

        let result = self.backend.acknowledge_finding(id).await;
        self.settle(id, result, |finding| {
            let _ = lifecycle::acknowledge(finding, now);
        })
    }

    pub async fn snooze(&self, id: &str, hours: u32, now: i64) -> Result<(), String> {
        if hours == 0 {
            return Err("snooze duration must be positive".into());
        }
        self.begin(id, PendingAction::Snooze)?;
        match self.guard(id, |finding| match finding.status(now) {
            FindingStatus::Active => Guard::Proceed,
            other => Guard::Reject(format!("cannot snooze a {} finding", other.as_str())),
        }) {
            Ok(()) => {}
            Err(outcome) => return outcome,
        }

        let result = self.backend.snooze_finding(id, hours).await;
        self.settle(id, result, |finding| {
            let _ = lifecycle::snooze(finding, hours, now);
        })
    }

    pub async fn dismiss(
        &self,
        id: &str,
        reason: DismissReason,
        note: Option<&str>,
        now: i64,
    ) -> Result<(), String> {
        self.begin(id, PendingAction::Dismiss)?;
        match self.guard(id, |finding| match finding.status(now) {
            FindingStatus::Active => Guard::Proceed,
            other => Guard::Reject(format!("cannot dismiss a {} finding", other.as_str())),
        }) {
            Ok(()) => {}
            Err(outcome) => return outcome,
        }

        let result = self.backend.dismiss_finding(id, reason, note).await;
        self.settle(id, result, |finding| {
            let _ = lifecycle::dismiss(finding, reason, note, now);
        })
    }

    pub async fn set_note(&self, id: &str, note: &str, now: i64) -> Result<(), String> {
        self.begin(id, PendingAction::SetNote)?;
        match self.guard(id, |finding| match finding.status(now) {
            FindingStatus::Resolved => Guard::Reject("cannot annotate a resolved finding".into()),
            _ => Guard::Proceed,
        }) {
            Ok(()) => {}
            Err(outcome) => return outcome,
        }

        let result = self.backend.set_finding_note(id, note).await;
        self.settle(id, result, |finding| {
            let _ = lifecycle::set_note(finding, note, now);
        })
    }

    /// Approves the live investigation-fix approval targeting the
    /// finding and records the execution outcome locally.
    pub async fn approve_fix(&self, finding_id: &str, now: i64) -> Result<ExecutionResult, String> {
        self.begin(finding_id, PendingAction::ApproveFix)?;
        let approval_id = {
            let state = self.state.borrow();
            correlate::live_fix_approval(finding_id, &state.approvals, now).map(|a| a.id.clone())
        };
        let Some(approval_id) = approval_id else {
            self.release(finding_id);
            return Err(format!("no live fix approval for finding '{finding_id}'"));
        };

        let result = self.backend.approve_fix(&approval_id).await;
        self.settle_execution(finding_id, &approval_id, result, now)
    }

    pub async fn deny_fix(&self, finding_id: &str, now: i64) -> Result<(), String> {
        self.begin(finding_id, PendingAction::DenyFix)?;
        let approval_id = {
            let state = self.state.borrow();
            correlate::live_fix_approval(finding_id, &state.approvals, now).map(|a| a.id.clone())
        };
        let Some(approval_id) = approval_id else {
            self.release(finding_id);
            return Err(format!("no live fix approval for finding '{finding_id}'"));
        };

        let result = self.backend.deny_fix(&approval_id).await;

        let state = &mut *self.state.borrow_mut();
        state.in_flight.remove(finding_id);
        if state.closed {
            state.deferred.remove(finding_id);
            return Ok(());
        }
        let outcome = result.map(|()| {
            state.approvals.retain(|a| a.id != approval_id);
        });
        if let Some(fetched) = state.deferred.remove(finding_id) {
            state.findings.insert(fetched.id.clone(), fetched);
        }
        outcome
    }

    /// The re-approve path for an expired approval: issues a fresh
    /// approval from the cached proposed fix and immediately attempts
    /// execution, all under one in-flight marker.
    pub async fn reapprove_and_execute(
        &self,
        finding_id: &str,
        now: i64,
    ) -> Result<ExecutionResult, String> {
        self.begin(finding_id, PendingAction::Reapprove)?;
        let has_fix = {
            let state = self.state.borrow();
            state
                .sessions
                .get(finding_id)
                .map_or(false, |s| s.proposed_fix.is_some())
        };
        if !has_fix {
            self.release(finding_id);
            return Err(format!(
                "no cached proposed fix for finding '{finding_id}'"
            ));
        }

        let approval_id = match self.backend.reapprove_fix(finding_id).await {
            Ok(approval_id) => approval_id,
            Err(err) => {
                self.release_with_deferred(finding_id);
                return Err(err);
            }
        };

        let result = self.backend.approve_fix(&approval_id).await;
        self.settle_execution(finding_id, &approval_id, result, now)
    }

    pub fn snapshot(&self) -> Vec<UnifiedFinding> {
        self.state.borrow().findings.values().cloned().collect()
    }

    pub fn finding(&self, id: &str) -> Option<UnifiedFinding> {
        self.state.borrow().findings.get(id).cloned()
    }

    pub fn in_flight_action(&self, id: &str) -> Option<PendingAction> {
        self.state.borrow().in_flight.get(id).copied()
    }

    /// Active findings whose investigation needs a human: failed or
    /// flagged runs, and settled outcomes in the two most urgent ranks.
    pub fn attention_ids(&self, now: i64) -> BTreeSet<String> {
        let state = self.state.borrow();
        state
            .findings
            .values()
            .filter(|f| f.status(now) == FindingStatus::Active)
            .filter(|f| {
                matches!(
                    f.investigation_status,
                    Some(InvestigationStatus::NeedsAttention) | Some(InvestigationStatus::Failed)
                ) || f.settled_outcome().map_or(false, |o| o.urgency() <= 1)
            })
            .map(|f| f.id.clone())
            .collect()
    }

    /// Findings with a live investigation-fix approval. Approvals whose
    /// target is unknown are orphans and never surface.
    pub fn approval_target_ids(&self, now: i64) -> BTreeSet<String> {
        let state = self.state.borrow();
        state
            .findings
            .values()
            .filter(|f| correlate::live_fix_approval(&f.id, &state.approvals, now).is_some())
            .map(|f| f.id.clone())
            .collect()
    }

    /// Filtered, deterministically ordered view of the current findings.
    pub fn select(&self, query: &FindingQuery, now: i64) -> Vec<UnifiedFinding> {
        let attention = self.attention_ids(now);
        let approvals = self.approval_target_ids(now);
        let state = self.state.borrow();
        prioritize::select(state.findings.values(), query, now, &attention, &approvals)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn remediation_for(&self, id: &str, now: i64) -> Option<RemediationDisplay> {
        let state = self.state.borrow();
        let finding = state.findings.get(id)?;
        correlate::resolve_remediation(
            finding,
            &state.plans,
            &state.approvals,
            &state.sessions,
            now,
        )
    }

    pub fn lifecycle_tail(&self, id: &str, limit: usize) -> Vec<LifecycleEvent> {
        self.state
            .borrow()
            .findings
            .get(id)
            .map(|f| f.lifecycle_tail(limit).into_iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn badge_counts(&self, now: i64) -> BadgeCounts {
        let attention = self.attention_ids(now).len();
        let approvals = self.approval_target_ids(now).len();
        let state = self.state.borrow();
        let mut counts = BadgeCounts {
            attention,
            approvals,
            ..BadgeCounts::default()
        };
        for finding in state.findings.values() {
            if finding.status(now) != FindingStatus::Active {
                continue;
            }
            counts.active += 1;
            match finding.severity {
                Severity::Critical => counts.critical += 1,
                Severity::Warning => counts.warning += 1,
                Severity::Watch => counts.watch += 1,
                Severity::Info => counts.info += 1,
            }
        }
        counts
    }

    fn begin(&self, id: &str, action: PendingAction) -> Result<(), String> {
        let mut state = self.state.borrow_mut();
        if state.closed {
            return Err("engine is closed".into());
        }
        if state.in_flight.contains_key(id) {
            return Err(format!(
                "another action is already in flight for finding '{id}'"
            ));
        }
        if !state.findings.contains_key(id) {
            return Err(format!("unknown finding '{id}'"));
        }
        state.in_flight.insert(id.to_string(), action);
        Ok(())
    }

    fn guard(
        &self,
        id: &str,
        check: impl FnOnce(&UnifiedFinding) -> Guard,
    ) -> Result<(), Result<(), String>> {
        let verdict = {
            let state = self.state.borrow();
            match state.findings.get(id) {
                Some(finding) => check(finding),
                None => Guard::Reject(format!("unknown finding '{id}'")),
            }
        };
        match verdict {
            Guard::Proceed => Ok(()),
            Guard::AlreadyDone => {
                self.release(id);
                Err(Ok(()))
            }
            Guard::Reject(message) => {
                self.release(id);
                Err(Err(message))
            }
        }
    }

    fn release(&self, id: &str) {
        self.state.borrow_mut().in_flight.remove(id);
    }

    fn release_with_deferred(&self, id: &str) {
        let state = &mut *self.state.borrow_mut();
        state.in_flight.remove(id);
        if state.closed {
            state.deferred.remove(id);
            return;
        }
        if let Some(fetched) = state.deferred.remove(id) {
            state.findings.insert(fetched.id.clone(), fetched);
        }
    }

    /// Clears the marker, commits on success, surfaces stale-state and
    /// transport failures, then lets any deferred authoritative copy
    /// win.
    fn settle(
        &self,
        id: &str,
        result: Result<bool, String>,
        commit: impl FnOnce(&mut UnifiedFinding),
    ) -> Result<(), String> {
        let state = &mut *self.state.borrow_mut();
        state.in_flight.remove(id);
        if state.closed {
            state.deferred.remove(id);
            return Ok(());
        }

        let outcome = match result {
            Ok(true) => {
                if let Some(finding) = state.findings.get_mut(id) {
                    commit(finding);
                }
                Ok(())
            }
            Ok(false) => Err(format!(
                "finding '{id}' changed on the server; action not applied"
            )),
            Err(err) => Err(err),
        };

        if let Some(fetched) = state.deferred.remove(id) {
            state.findings.insert(fetched.id.clone(), fetched);
        }
        outcome
    }

    fn settle_execution(
        &self,
        finding_id: &str,
        approval_id: &str,
        result: Result<ExecutionResult, String>,
        now: i64,
    ) -> Result<ExecutionResult, String> {
        let state = &mut *self.state.borrow_mut();
        state.in_flight.remove(finding_id);
        if state.closed {
            state.deferred.remove(finding_id);
            return result;
        }

        let outcome = match result {
            Ok(execution) => {
                state.approvals.retain(|a| a.id != approval_id);
                if let Some(finding) = state.findings.get_mut(finding_id) {
                    finding.investigation_status = Some(InvestigationStatus::Completed);
                    finding.investigation_outcome = Some(
                        if execution.success {
                            InvestigationOutcome::FixExecuted
                        } else {
                            InvestigationOutcome::FixFailed
                        }
                        .as_str()
                        .to_string(),
                    );
                    finding.last_investigated_at = Some(now);
                }
                Ok(execution)
            }
            Err(err) => Err(err),
        };

        if let Some(fetched) = state.deferred.remove(finding_id) {
            state.findings.insert(fetched.id.clone(), fetched);
        }
        outcome
    }
}

/// A dismissed finding coming back active means the backend re-detected
/// it. If the server copy does not already carry the regression, add the
/// bookkeeping locally so the transition is never lost.
fn reconcile_regression(
    local: Option<&UnifiedFinding>,
    mut fetched: UnifiedFinding,
    now: i64,
) -> UnifiedFinding {
    let Some(local) = local else {
        return fetched;
    };
    if local.status(now) == FindingStatus::Dismissed
        && fetched.status(now) == FindingStatus::Active
        && fetched.regression_count <= local.regression_count
    {
        fetched.regression_count = local.regression_count + 1;
        fetched.last_regression_at = Some(now);
        fetched.lifecycle.push(LifecycleEvent {
            at: now,
            kind: LifecycleEventKind::Regressed,
            from: Some(FindingStatus::Dismissed.as_str().to_string()),
            to: Some(FindingStatus::Active.as_str().to_string()),
            message: None,
        });
    }
    fetched
}
