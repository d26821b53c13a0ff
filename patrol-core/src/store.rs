use crate::lifecycle;
use crate::model::{
    ApprovalRequest, ApprovalStatus, ApprovalTool, DismissReason, FindingStatus,
    InvestigationSession, PlanStatus, RemediationPlan, UnifiedFinding,
};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const DEFAULT_APPROVAL_TTL_SECS: i64 = 300;

/// SQLite-backed store for findings and their remediation artifacts.
/// Rows are JSON documents; connections are short-lived, one per
/// operation.
#[derive(Clone)]
pub struct FindingsStore {
    db_path: Arc<PathBuf>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FindingsSummary {
    pub total: usize,
    pub active: usize,
    pub critical: usize,
    pub warning: usize,
    pub watch: usize,
    pub info: usize,
    pub by_source: BTreeMap<String, usize>,
}

impl FindingsStore {
    pub fn open(path: &str) -> Result<Self, String> {
        let db_path = PathBuf::from(path);
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
            }
        }

        let conn = Connection::open(&db_path).map_err(|e| e.to_string())?;
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            CREATE TABLE IF NOT EXISTS findings (
                id TEXT PRIMARY KEY,
                resource_id TEXT NOT NULL,
                doc TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_findings_resource ON findings(resource_id);
            CREATE TABLE IF NOT EXISTS plans (
                id TEXT PRIMARY KEY,
                finding_id TEXT NOT NULL,
                doc TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_plans_finding ON plans(finding_id);
            CREATE TABLE IF NOT EXISTS approvals (
                id TEXT PRIMARY KEY,
                target_id TEXT NOT NULL,
                doc TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                finding_id TEXT NOT NULL,
                doc TEXT NOT NULL
            );
            ",
        )
        .map_err(|e| e.to_string())?;

        Ok(Self {
            db_path: Arc::new(db_path),
        })
    }

    fn conn(&self) -> Result<Connection, String> {
        Connection::open(&*self.db_path).map_err(|e| e.to_string())
    }

    /// Inserts a new finding or merges an incoming record into the
    /// existing one. A re-fired resolved finding reopens; a re-detected
    /// dismissed finding regresses back to active; severity only moves
    /// upward on merge. Returns true for a brand-new finding.
    pub fn upsert_finding(&self, incoming: UnifiedFinding, now: i64) -> Result<bool, String> {
        let Some(mut current) = self.get_finding(&incoming.id)? else {
            let mut finding = incoming;
            if finding.times_raised == 0 {
                finding.times_raised = 1;
            }
            if finding.last_seen_at == 0 {
                finding.last_seen_at = now;
            }
            self.save_finding(&finding, now)?;
            return Ok(true);
        };

        current.title = incoming.title;
        if !incoming.description.is_empty() {
            current.description = incoming.description;
        }
        if !incoming.evidence.is_empty() {
            current.evidence = incoming.evidence;
        }
        if incoming.severity.rank() < current.severity.rank() {
            current.severity = incoming.severity;
        }
        current.last_seen_at = now;
        current.times_raised += 1;

        current.investigation_session_id = incoming.investigation_session_id;
        current.investigation_status = incoming.investigation_status;
        current.investigation_outcome = incoming.investigation_outcome;
        current.investigation_attempts = incoming.investigation_attempts;
        current.last_investigated_at = incoming.last_investigated_at;
        if !incoming.correlated_finding_ids.is_empty() {
            current.correlated_finding_ids = incoming.correlated_finding_ids;
        }

        if current.resolved_at.is_some() {
            current.resolved_at = None;
            current.auto_resolved = false;
        }
        if current.status(now) == FindingStatus::Dismissed {
            lifecycle::regress(&mut current, now)?;
        }

        self.save_finding(&current, now)?;
        Ok(false)
    }

    pub fn save_finding(&self, finding: &UnifiedFinding, now: i64) -> Result<(), String> {
        let doc = serde_json::to_string(finding).map_err(|e| e.to_string())?;
        self.conn()?
            .execute(
                "INSERT INTO findings (id, resource_id, doc, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                     resource_id = excluded.resource_id,
                     doc = excluded.doc,
                     updated_at = excluded.updated_at",
                params![finding.id, finding.resource_id, doc, now],
            )
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    pub fn get_finding(&self, id: &str) -> Result<Option<UnifiedFinding>, String> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT doc FROM findings WHERE id = ?1")
            .map_err(|e| e.to_string())?;
        let mut rows = stmt
            .query_map(params![id], |row| row.get::<_, String>(0))
            .map_err(|e| e.to_string())?;

        match rows.next() {
            Some(doc) => {
                let doc = doc.map_err(|e| e.to_string())?;
                serde_json::from_str(&doc).map(Some).map_err(|e| e.to_string())
            }
            None => Ok(None),
        }
    }

    pub fn all_findings(&self) -> Result<Vec<UnifiedFinding>, String> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT doc FROM findings ORDER BY id ASC")
            .map_err(|e| e.to_string())?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| e.to_string())?;

        let mut findings = Vec::new();
        for row in rows {
            let doc = row.map_err(|e| e.to_string())?;
            findings.push(serde_json::from_str(&doc).map_err(|e| e.to_string())?);
        }
        Ok(findings)
    }

    /// Guard-failed or unknown-id requests report false; callers surface
    /// that as a harmless stale-state notice.
    pub fn acknowledge(&self, id: &str, now: i64) -> Result<bool, String> {
        self.apply(id, now, |finding| lifecycle::acknowledge(finding, now))
    }

    pub fn dismiss(
        &self,
        id: &str,
        reason: DismissReason,
        note: Option<&str>,
        now: i64,
    ) -> Result<bool, String> {
        self.apply(id, now, |finding| lifecycle::dismiss(finding, reason, note, now))
    }

    pub fn snooze(&self, id: &str, hours: u32, now: i64) -> Result<bool, String> {
        self.apply(id, now, |finding| lifecycle::snooze(finding, hours, now))
    }

    pub fn set_note(&self, id: &str, note: &str, now: i64) -> Result<bool, String> {
        self.apply(id, now, |finding| lifecycle::set_note(finding, note, now))
    }

    pub fn resolve(&self, id: &str, auto: bool, now: i64) -> Result<bool, String> {
        self.apply(id, now, |finding| lifecycle::resolve(finding, auto, now))
    }

    pub fn resolve_by_alert(&self, alert_id: &str, now: i64) -> Result<bool, String> {
        for finding in self.all_findings()? {
            if finding.alert_id.as_deref() == Some(alert_id) {
                return self.resolve(&finding.id, true, now);
            }
        }
        Ok(false)
    }

    fn apply(
        &self,
        id: &str,
        now: i64,
        transition: impl FnOnce(&mut UnifiedFinding) -> Result<bool, String>,
    ) -> Result<bool, String> {
        let Some(mut finding) = self.get_finding(id)? else {
            return Ok(false);
        };
        match transition(&mut finding) {
            Ok(changed) => {
                if changed {
                    self.save_finding(&finding, now)?;
                }
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    /// Deletes resolved findings older than the cutoff.
    pub fn cleanup(&self, max_age_secs: i64, now: i64) -> Result<usize, String> {
        let cutoff = now - max_age_secs;
        let mut removed = 0;
        for finding in self.all_findings()? {
            if finding.resolved_at.map_or(false, |at| at < cutoff) {
                self.conn()?
                    .execute("DELETE FROM findings WHERE id = ?1", params![finding.id])
                    .map_err(|e| e.to_string())?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Counts are derived from the rows on every call; there is no
    /// separately maintained counter to drift.
    pub fn summary(&self, now: i64) -> Result<FindingsSummary, String> {
        let mut summary = FindingsSummary::default();
        for finding in self.all_findings()? {
            summary.total += 1;
            if finding.status(now) != FindingStatus::Active {
                continue;
            }
            summary.active += 1;
            *summary
                .by_source
                .entry(finding.source.as_str().to_string())
                .or_insert(0) += 1;
            match finding.severity {
                crate::model::Severity::Critical => summary.critical += 1,
                crate::model::Severity::Warning => summary.warning += 1,
                crate::model::Severity::Watch => summary.watch += 1,
                crate::model::Severity::Info => summary.info += 1,
            }
        }
        Ok(summary)
    }

    pub fn put_plan(&self, plan: &RemediationPlan) -> Result<(), String> {
        let doc = serde_json::to_string(plan).map_err(|e| e.to_string())?;
        self.conn()?
            .execute(
                "INSERT INTO plans (id, finding_id, doc, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                     finding_id = excluded.finding_id,
                     doc = excluded.doc,
                     created_at = excluded.created_at",
                params![plan.id, plan.finding_id, doc, plan.created_at],
            )
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    pub fn all_plans(&self) -> Result<Vec<RemediationPlan>, String> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT doc FROM plans ORDER BY id ASC")
            .map_err(|e| e.to_string())?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| e.to_string())?;

        let mut plans = Vec::new();
        for row in rows {
            let doc = row.map_err(|e| e.to_string())?;
            plans.push(serde_json::from_str(&doc).map_err(|e| e.to_string())?);
        }
        Ok(plans)
    }

    /// Legacy plan approvals live on their own path; they never touch
    /// the investigation-fix approval machinery.
    pub fn approve_plan(&self, plan_id: &str, _now: i64) -> Result<RemediationPlan, String> {
        let Some(mut plan) = self.all_plans()?.into_iter().find(|p| p.id == plan_id) else {
            return Err(format!("plan '{plan_id}' not found"));
        };
        if plan.status != PlanStatus::Pending {
            return Err(format!("plan '{plan_id}' is not pending"));
        }
        plan.status = PlanStatus::Approved;
        self.put_plan(&plan)?;
        Ok(plan)
    }

    pub fn execute_plan(&self, plan_id: &str, _now: i64) -> Result<RemediationPlan, String> {
        let Some(mut plan) = self.all_plans()?.into_iter().find(|p| p.id == plan_id) else {
            return Err(format!("plan '{plan_id}' not found"));
        };
        if plan.status != PlanStatus::Approved {
            return Err(format!("plan '{plan_id}' has not been approved"));
        }
        plan.status = PlanStatus::Completed;
        self.put_plan(&plan)?;
        Ok(plan)
    }

    pub fn put_approval(&self, approval: &ApprovalRequest) -> Result<(), String> {
        let doc = serde_json::to_string(approval).map_err(|e| e.to_string())?;
        self.conn()?
            .execute(
                "INSERT INTO approvals (id, target_id, doc, expires_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                     target_id = excluded.target_id,
                     doc = excluded.doc,
                     expires_at = excluded.expires_at",
                params![approval.id, approval.target_id, doc, approval.expires_at],
            )
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    fn all_approvals(&self) -> Result<Vec<ApprovalRequest>, String> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT doc FROM approvals ORDER BY id ASC")
            .map_err(|e| e.to_string())?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| e.to_string())?;

        let mut approvals = Vec::new();
        for row in rows {
            let doc = row.map_err(|e| e.to_string())?;
            approvals.push(serde_json::from_str(&doc).map_err(|e| e.to_string())?);
        }
        Ok(approvals)
    }

    pub fn get_approval(&self, id: &str) -> Result<Option<ApprovalRequest>, String> {
        Ok(self.all_approvals()?.into_iter().find(|a| a.id == id))
    }

    /// Sweeps expiry as a side effect: anything pending past its
    /// deadline is marked expired and no longer returned.
    pub fn pending_approvals(&self, now: i64) -> Result<Vec<ApprovalRequest>, String> {
        let mut live = Vec::new();
        for mut approval in self.all_approvals()? {
            if approval.status != ApprovalStatus::Pending {
                continue;
            }
            if approval.expires_at <= now {
                approval.status = ApprovalStatus::Expired;
                self.put_approval(&approval)?;
                continue;
            }
            live.push(approval);
        }
        Ok(live)
    }

    /// Single-use: deciding anything but a live pending approval is an
    /// error.
    pub fn decide_approval(
        &self,
        id: &str,
        approve: bool,
        now: i64,
    ) -> Result<ApprovalRequest, String> {
        let Some(mut approval) = self.get_approval(id)? else {
            return Err(format!("approval '{id}' not found"));
        };
        if !approval.is_live(now) {
            return Err(format!("approval '{id}' is no longer pending"));
        }
        approval.status = if approve {
            ApprovalStatus::Approved
        } else {
            ApprovalStatus::Denied
        };
        self.put_approval(&approval)?;
        Ok(approval)
    }

    /// The re-approval path: mints a fresh pending approval from the
    /// proposed fix recorded on the finding's investigation session.
    pub fn reissue_approval(&self, finding_id: &str, now: i64) -> Result<ApprovalRequest, String> {
        let Some(session) = self.session_for_finding(finding_id)? else {
            return Err(format!("no investigation session for finding '{finding_id}'"));
        };
        let Some(fix) = session.proposed_fix else {
            return Err(format!("investigation for '{finding_id}' has no proposed fix"));
        };

        let seq = self
            .all_approvals()?
            .iter()
            .filter(|a| a.target_id == finding_id)
            .count()
            + 1;
        let approval = ApprovalRequest {
            id: format!("ap-{finding_id}-{seq}"),
            target_id: finding_id.to_string(),
            tool: ApprovalTool::InvestigationFix,
            risk_level: fix.risk_level,
            command: fix.command,
            context: fix.context,
            status: ApprovalStatus::Pending,
            requested_at: now,
            expires_at: now + DEFAULT_APPROVAL_TTL_SECS,
        };
        self.put_approval(&approval)?;
        Ok(approval)
    }

    pub fn put_session(&self, session: &InvestigationSession) -> Result<(), String> {
        let doc = serde_json::to_string(session).map_err(|e| e.to_string())?;
        self.conn()?
            .execute(
                "INSERT INTO sessions (id, finding_id, doc)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET
                     finding_id = excluded.finding_id,
                     doc = excluded.doc",
                params![session.id, session.finding_id, doc],
            )
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    pub fn session_for_finding(
        &self,
        finding_id: &str,
    ) -> Result<Option<InvestigationSession>, String> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT doc FROM sessions WHERE finding_id = ?1 ORDER BY id DESC")
            .map_err(|e| e.to_string())?;
        let mut rows = stmt
            .query_map(params![finding_id], |row| row.get::<_, String>(0))
            .map_err(|e| e.to_string())?;

        match rows.next() {
            Some(doc) => {
                let doc = doc.map_err(|e| e.to_string())?;
                serde_json::from_str(&doc).map(Some).map_err(|e| e.to_string())
            }
            None => Ok(None),
        }
    }
}
