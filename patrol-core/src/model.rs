use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
    Watch,
    Info,
}

impl Severity {
    pub fn parse(value: &str) -> Option<Severity> {
        match value.to_lowercase().as_str() {
            "critical" => Some(Severity::Critical),
            "warning" => Some(Severity::Warning),
            "watch" => Some(Severity::Watch),
            "info" => Some(Severity::Info),
            _ => None,
        }
    }

    /// Lower ranks sort first.
    pub fn rank(self) -> u8 {
        match self {
            Severity::Critical => 0,
            Severity::Warning => 1,
            Severity::Watch => 2,
            Severity::Info => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Warning => "warning",
            Severity::Watch => "watch",
            Severity::Info => "info",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FindingSource {
    Threshold,
    AiPatrol,
    Anomaly,
    AiChat,
    Correlation,
    Forecast,
}

impl FindingSource {
    pub fn parse(value: &str) -> Option<FindingSource> {
        match value.to_lowercase().as_str() {
            "threshold" => Some(FindingSource::Threshold),
            "ai-patrol" => Some(FindingSource::AiPatrol),
            "anomaly" => Some(FindingSource::Anomaly),
            "ai-chat" => Some(FindingSource::AiChat),
            "correlation" => Some(FindingSource::Correlation),
            "forecast" => Some(FindingSource::Forecast),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FindingSource::Threshold => "threshold",
            FindingSource::AiPatrol => "ai-patrol",
            FindingSource::Anomaly => "anomaly",
            FindingSource::AiChat => "ai-chat",
            FindingSource::Correlation => "correlation",
            FindingSource::Forecast => "forecast",
        }
    }
}

/// Derived from the timestamp fields, never stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FindingStatus {
    Active,
    Snoozed,
    Dismissed,
    Resolved,
}

impl FindingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FindingStatus::Active => "active",
            FindingStatus::Snoozed => "snoozed",
            FindingStatus::Dismissed => "dismissed",
            FindingStatus::Resolved => "resolved",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DismissReason {
    NotAnIssue,
    ExpectedBehavior,
    WillFixLater,
}

impl DismissReason {
    pub fn parse(value: &str) -> Option<DismissReason> {
        match value {
            "not_an_issue" => Some(DismissReason::NotAnIssue),
            "expected_behavior" => Some(DismissReason::ExpectedBehavior),
            "will_fix_later" => Some(DismissReason::WillFixLater),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DismissReason::NotAnIssue => "not_an_issue",
            DismissReason::ExpectedBehavior => "expected_behavior",
            DismissReason::WillFixLater => "will_fix_later",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvestigationStatus {
    Pending,
    Running,
    Completed,
    Failed,
    NeedsAttention,
}

impl InvestigationStatus {
    pub fn parse(value: &str) -> Option<InvestigationStatus> {
        match value {
            "pending" => Some(InvestigationStatus::Pending),
            "running" => Some(InvestigationStatus::Running),
            "completed" => Some(InvestigationStatus::Completed),
            "failed" => Some(InvestigationStatus::Failed),
            "needs_attention" => Some(InvestigationStatus::NeedsAttention),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InvestigationStatus::Pending => "pending",
            InvestigationStatus::Running => "running",
            InvestigationStatus::Completed => "completed",
            InvestigationStatus::Failed => "failed",
            InvestigationStatus::NeedsAttention => "needs_attention",
        }
    }
}

/// The wire value set is open; everything unrecognized collapses into
/// `Unknown` so no caller compares raw strings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvestigationOutcome {
    FixQueued,
    FixExecuted,
    FixFailed,
    FixVerified,
    FixVerificationFailed,
    FixVerificationUnknown,
    TimedOut,
    CannotFix,
    NeedsAttention,
    Resolved,
    Unknown,
}

impl InvestigationOutcome {
    pub fn parse(value: &str) -> InvestigationOutcome {
        match value {
            "fix_queued" => InvestigationOutcome::FixQueued,
            "fix_executed" => InvestigationOutcome::FixExecuted,
            "fix_failed" => InvestigationOutcome::FixFailed,
            "fix_verified" => InvestigationOutcome::FixVerified,
            "fix_verification_failed" => InvestigationOutcome::FixVerificationFailed,
            "fix_verification_unknown" => InvestigationOutcome::FixVerificationUnknown,
            "timed_out" => InvestigationOutcome::TimedOut,
            "cannot_fix" => InvestigationOutcome::CannotFix,
            "needs_attention" => InvestigationOutcome::NeedsAttention,
            "resolved" => InvestigationOutcome::Resolved,
            _ => InvestigationOutcome::Unknown,
        }
    }

    /// Primary sort weight. Lower is more urgent.
    pub fn urgency(self) -> u8 {
        match self {
            InvestigationOutcome::FixVerificationFailed | InvestigationOutcome::FixFailed => 0,
            InvestigationOutcome::FixVerificationUnknown
            | InvestigationOutcome::TimedOut
            | InvestigationOutcome::NeedsAttention
            | InvestigationOutcome::CannotFix => 1,
            InvestigationOutcome::FixQueued => 2,
            _ => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InvestigationOutcome::FixQueued => "fix_queued",
            InvestigationOutcome::FixExecuted => "fix_executed",
            InvestigationOutcome::FixFailed => "fix_failed",
            InvestigationOutcome::FixVerified => "fix_verified",
            InvestigationOutcome::FixVerificationFailed => "fix_verification_failed",
            InvestigationOutcome::FixVerificationUnknown => "fix_verification_unknown",
            InvestigationOutcome::TimedOut => "timed_out",
            InvestigationOutcome::CannotFix => "cannot_fix",
            InvestigationOutcome::NeedsAttention => "needs_attention",
            InvestigationOutcome::Resolved => "resolved",
            InvestigationOutcome::Unknown => "unknown",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEventKind {
    Acknowledged,
    Snoozed,
    Dismissed,
    Resolved,
    AutoResolved,
    Regressed,
    NoteUpdated,
    ReinvestigateRequested,
}

impl LifecycleEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleEventKind::Acknowledged => "acknowledged",
            LifecycleEventKind::Snoozed => "snoozed",
            LifecycleEventKind::Dismissed => "dismissed",
            LifecycleEventKind::Resolved => "resolved",
            LifecycleEventKind::AutoResolved => "auto_resolved",
            LifecycleEventKind::Regressed => "regressed",
            LifecycleEventKind::NoteUpdated => "note_updated",
            LifecycleEventKind::ReinvestigateRequested => "reinvestigate_requested",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub at: i64,
    pub kind: LifecycleEventKind,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UnifiedFinding {
    pub id: String,
    pub source: FindingSource,
    pub severity: Severity,
    pub resource_id: String,
    pub resource_type: String,
    pub resource_name: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub evidence: String,
    pub detected_at: i64,
    #[serde(default)]
    pub last_seen_at: i64,
    #[serde(default)]
    pub resolved_at: Option<i64>,
    #[serde(default)]
    pub auto_resolved: bool,
    #[serde(default)]
    pub acknowledged_at: Option<i64>,
    #[serde(default)]
    pub snoozed_until: Option<i64>,
    #[serde(default)]
    pub dismissed_reason: Option<DismissReason>,
    #[serde(default)]
    pub user_note: Option<String>,
    #[serde(default)]
    pub alert_id: Option<String>,
    #[serde(default)]
    pub alert_type: Option<String>,
    #[serde(default)]
    pub is_threshold: bool,
    #[serde(default)]
    pub investigation_session_id: Option<String>,
    #[serde(default)]
    pub investigation_status: Option<InvestigationStatus>,
    #[serde(default)]
    pub investigation_outcome: Option<String>,
    #[serde(default)]
    pub investigation_attempts: u32,
    #[serde(default)]
    pub last_investigated_at: Option<i64>,
    #[serde(default)]
    pub regression_count: u32,
    #[serde(default)]
    pub last_regression_at: Option<i64>,
    #[serde(default)]
    pub correlated_finding_ids: Vec<String>,
    #[serde(default)]
    pub times_raised: u32,
    #[serde(default)]
    pub lifecycle: Vec<LifecycleEvent>,
}

impl UnifiedFinding {
    pub fn new(
        id: impl Into<String>,
        source: FindingSource,
        severity: Severity,
        resource_id: impl Into<String>,
        resource_type: impl Into<String>,
        resource_name: impl Into<String>,
        title: impl Into<String>,
        detected_at: i64,
    ) -> UnifiedFinding {
        UnifiedFinding {
            id: id.into(),
            source,
            severity,
            resource_id: resource_id.into(),
            resource_type: resource_type.into(),
            resource_name: resource_name.into(),
            title: title.into(),
            description: String::new(),
            evidence: String::new(),
            detected_at,
            last_seen_at: detected_at,
            resolved_at: None,
            auto_resolved: false,
            acknowledged_at: None,
            snoozed_until: None,
            dismissed_reason: None,
            user_note: None,
            alert_id: None,
            alert_type: None,
            is_threshold: false,
            investigation_session_id: None,
            investigation_status: None,
            investigation_outcome: None,
            investigation_attempts: 0,
            last_investigated_at: None,
            regression_count: 0,
            last_regression_at: None,
            correlated_finding_ids: Vec::new(),
            times_raised: 1,
            lifecycle: Vec::new(),
        }
    }

    /// Status is a pure function of the timestamp fields. A set
    /// `resolved_at` wins over a dismissal, which wins over an unexpired
    /// snooze.
    pub fn status(&self, now: i64) -> FindingStatus {
        if self.resolved_at.is_some() {
            FindingStatus::Resolved
        } else if self.dismissed_reason.is_some() {
            FindingStatus::Dismissed
        } else if self.snoozed_until.map_or(false, |until| until > now) {
            FindingStatus::Snoozed
        } else {
            FindingStatus::Active
        }
    }

    pub fn is_acknowledged(&self) -> bool {
        self.acknowledged_at.is_some()
    }

    /// True for findings produced by the patrol subsystems rather than
    /// the threshold alert pipeline.
    pub fn is_patrol(&self) -> bool {
        self.source != FindingSource::Threshold && self.alert_id.is_none() && !self.is_threshold
    }

    /// The parsed outcome, or nothing while an investigation is still
    /// pending/running (a lingering outcome string from a previous run is
    /// stale and must not drive any logic).
    pub fn settled_outcome(&self) -> Option<InvestigationOutcome> {
        match self.investigation_status {
            Some(InvestigationStatus::Pending) | Some(InvestigationStatus::Running) => None,
            _ => self
                .investigation_outcome
                .as_deref()
                .map(InvestigationOutcome::parse),
        }
    }

    /// Last `limit` lifecycle entries, newest first.
    pub fn lifecycle_tail(&self, limit: usize) -> Vec<&LifecycleEvent> {
        self.lifecycle.iter().rev().take(limit).collect()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn parse(value: &str) -> Option<RiskLevel> {
        match value.to_lowercase().as_str() {
            "low" => Some(RiskLevel::Low),
            "medium" => Some(RiskLevel::Medium),
            "high" => Some(RiskLevel::High),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanStatus {
    Pending,
    Approved,
    Executing,
    Completed,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub order: u32,
    pub action: String,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub rollback_command: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RemediationPlan {
    pub id: String,
    pub finding_id: String,
    pub title: String,
    pub risk_level: RiskLevel,
    pub status: PlanStatus,
    pub steps: Vec<PlanStep>,
    pub created_at: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalTool {
    InvestigationFix,
    PlanReview,
    Unknown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Denied,
    Expired,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: String,
    pub target_id: String,
    pub tool: ApprovalTool,
    pub risk_level: RiskLevel,
    pub command: String,
    #[serde(default)]
    pub context: String,
    pub status: ApprovalStatus,
    pub requested_at: i64,
    pub expires_at: i64,
}

impl ApprovalRequest {
    /// A live approval is still pending and has not lapsed.
    pub fn is_live(&self, now: i64) -> bool {
        self.status == ApprovalStatus::Pending && self.expires_at > now
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProposedFix {
    pub command: String,
    #[serde(default)]
    pub context: String,
    pub risk_level: RiskLevel,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InvestigationSession {
    pub id: String,
    pub finding_id: String,
    pub status: InvestigationStatus,
    #[serde(default)]
    pub outcome: Option<String>,
    #[serde(default)]
    pub proposed_fix: Option<ProposedFix>,
    #[serde(default)]
    pub evidence: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}
