use crate::model::{
    DismissReason, FindingStatus, InvestigationStatus, LifecycleEvent, LifecycleEventKind,
    UnifiedFinding,
};

/// Transition functions for a single finding. Each checks its guard,
/// mutates the timestamp fields, and appends one lifecycle event. The
/// returned bool reports whether anything changed; guard violations are
/// errors.
pub fn acknowledge(finding: &mut UnifiedFinding, now: i64) -> Result<bool, String> {
    match finding.status(now) {
        FindingStatus::Active => {
            if finding.is_acknowledged() {
                return Ok(false);
            }
            finding.acknowledged_at = Some(now);
            push_event(
                finding,
                LifecycleEventKind::Acknowledged,
                FindingStatus::Active,
                FindingStatus::Active,
                None,
                now,
            );
            Ok(true)
        }
        other => Err(format!("cannot acknowledge a {} finding", other.as_str())),
    }
}

pub fn snooze(finding: &mut UnifiedFinding, hours: u32, now: i64) -> Result<bool, String> {
    if hours == 0 {
        return Err("snooze duration must be positive".into());
    }
    let from = finding.status(now);
    if from != FindingStatus::Active {
        return Err(format!("cannot snooze a {} finding", from.as_str()));
    }
    finding.snoozed_until = Some(now + i64::from(hours) * 3600);
    push_event(
        finding,
        LifecycleEventKind::Snoozed,
        from,
        FindingStatus::Snoozed,
        Some(format!("snoozed for {hours}h")),
        now,
    );
    Ok(true)
}

pub fn dismiss(
    finding: &mut UnifiedFinding,
    reason: DismissReason,
    note: Option<&str>,
    now: i64,
) -> Result<bool, String> {
    let from = finding.status(now);
    if from != FindingStatus::Active {
        return Err(format!("cannot dismiss a {} finding", from.as_str()));
    }
    finding.dismissed_reason = Some(reason);
    if let Some(note) = note.filter(|n| !n.trim().is_empty()) {
        finding.user_note = Some(note.to_string());
    }
    // Dismissal implies acknowledgment.
    if finding.acknowledged_at.is_none() {
        finding.acknowledged_at = Some(now);
    }
    let message = note
        .filter(|n| !n.trim().is_empty())
        .map(ToString::to_string)
        .unwrap_or_else(|| reason.as_str().to_string());
    push_event(
        finding,
        LifecycleEventKind::Dismissed,
        from,
        FindingStatus::Dismissed,
        Some(message),
        now,
    );
    Ok(true)
}

pub fn resolve(finding: &mut UnifiedFinding, auto: bool, now: i64) -> Result<bool, String> {
    let from = finding.status(now);
    if from == FindingStatus::Resolved {
        return Ok(false);
    }
    finding.resolved_at = Some(now);
    finding.auto_resolved = auto;
    // Keep the derived status unambiguous: a resolved finding is not
    // also snoozed.
    finding.snoozed_until = None;
    let kind = if auto {
        LifecycleEventKind::AutoResolved
    } else {
        LifecycleEventKind::Resolved
    };
    push_event(finding, kind, from, FindingStatus::Resolved, None, now);
    Ok(true)
}

/// Re-detection of a dismissed finding brings it back to active.
pub fn regress(finding: &mut UnifiedFinding, now: i64) -> Result<bool, String> {
    if finding.status(now) != FindingStatus::Dismissed {
        return Ok(false);
    }
    finding.dismissed_reason = None;
    finding.regression_count += 1;
    finding.last_regression_at = Some(now);
    push_event(
        finding,
        LifecycleEventKind::Regressed,
        FindingStatus::Dismissed,
        FindingStatus::Active,
        None,
        now,
    );
    Ok(true)
}

pub fn set_note(finding: &mut UnifiedFinding, note: &str, now: i64) -> Result<bool, String> {
    if finding.status(now) == FindingStatus::Resolved {
        return Err("cannot annotate a resolved finding".into());
    }
    let trimmed = note.trim();
    finding.user_note = if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    };
    let status = finding.status(now);
    push_event(finding, LifecycleEventKind::NoteUpdated, status, status, None, now);
    Ok(true)
}

/// Orthogonal to status: queues another investigation run without
/// touching the finding's lifecycle state. The stale outcome string may
/// linger; `settled_outcome` neutralizes it while the run is pending.
pub fn reset_investigation(finding: &mut UnifiedFinding, now: i64) -> Result<bool, String> {
    finding.investigation_status = Some(InvestigationStatus::Pending);
    let status = finding.status(now);
    push_event(
        finding,
        LifecycleEventKind::ReinvestigateRequested,
        status,
        status,
        None,
        now,
    );
    Ok(true)
}

fn push_event(
    finding: &mut UnifiedFinding,
    kind: LifecycleEventKind,
    from: FindingStatus,
    to: FindingStatus,
    message: Option<String>,
    at: i64,
) {
    finding.lifecycle.push(LifecycleEvent {
        at,
        kind,
        from: Some(from.as_str().to_string()),
        to: Some(to.as_str().to_string()),
        message,
    });
}
