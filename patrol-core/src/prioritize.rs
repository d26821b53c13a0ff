use crate::model::{FindingStatus, UnifiedFinding};
use std::cmp::Ordering;
use std::collections::BTreeSet;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortBy {
    Severity,
    Time,
}

/// `Resolved` is the history bucket: resolved, dismissed, and snoozed
/// findings are all grouped under it. `Attention` and `Approvals` are
/// membership tests against derived id sets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusBucket {
    Active,
    Resolved,
    Attention,
    Approvals,
}

#[derive(Clone, Debug)]
pub struct FindingQuery {
    pub sort_by: SortBy,
    pub bucket: Option<StatusBucket>,
    pub resource_id: Option<String>,
    pub ids: Option<BTreeSet<String>>,
    pub max_items: Option<usize>,
    pub patrol_only: bool,
}

impl Default for FindingQuery {
    fn default() -> Self {
        FindingQuery {
            sort_by: SortBy::Severity,
            bucket: None,
            resource_id: None,
            ids: None,
            max_items: None,
            patrol_only: false,
        }
    }
}

fn outcome_urgency(finding: &UnifiedFinding, now: i64) -> u8 {
    if finding.status(now) != FindingStatus::Active {
        return 3;
    }
    finding
        .settled_outcome()
        .map(|outcome| outcome.urgency())
        .unwrap_or(3)
}

/// The display comparator. Outcome urgency always dominates; severity
/// and the acknowledged flag only matter under severity sort; detection
/// time (newest first) breaks every remaining tie.
pub fn compare(a: &UnifiedFinding, b: &UnifiedFinding, sort_by: SortBy, now: i64) -> Ordering {
    outcome_urgency(a, now)
        .cmp(&outcome_urgency(b, now))
        .then_with(|| match sort_by {
            SortBy::Severity => a
                .severity
                .rank()
                .cmp(&b.severity.rank())
                .then_with(|| a.is_acknowledged().cmp(&b.is_acknowledged())),
            SortBy::Time => Ordering::Equal,
        })
        .then_with(|| b.detected_at.cmp(&a.detected_at))
}

fn in_bucket(
    finding: &UnifiedFinding,
    bucket: StatusBucket,
    now: i64,
    attention_ids: &BTreeSet<String>,
    approval_ids: &BTreeSet<String>,
) -> bool {
    match bucket {
        StatusBucket::Active => finding.status(now) == FindingStatus::Active,
        StatusBucket::Resolved => matches!(
            finding.status(now),
            FindingStatus::Resolved | FindingStatus::Dismissed | FindingStatus::Snoozed
        ),
        StatusBucket::Attention => attention_ids.contains(&finding.id),
        StatusBucket::Approvals => approval_ids.contains(&finding.id),
    }
}

/// Filter, stable-sort, truncate. Pure: never mutates the findings, and
/// identical inputs yield an identical order.
pub fn select<'a>(
    findings: impl IntoIterator<Item = &'a UnifiedFinding>,
    query: &FindingQuery,
    now: i64,
    attention_ids: &BTreeSet<String>,
    approval_ids: &BTreeSet<String>,
) -> Vec<&'a UnifiedFinding> {
    let mut selected: Vec<&UnifiedFinding> = findings
        .into_iter()
        .filter(|f| {
            if let Some(resource_id) = &query.resource_id {
                if &f.resource_id != resource_id {
                    return false;
                }
            }
            if let Some(bucket) = query.bucket {
                if !in_bucket(f, bucket, now, attention_ids, approval_ids) {
                    return false;
                }
            }
            if let Some(ids) = &query.ids {
                if !ids.contains(&f.id) {
                    return false;
                }
            }
            if query.patrol_only && !f.is_patrol() {
                return false;
            }
            true
        })
        .collect();

    selected.sort_by(|a, b| compare(a, b, query.sort_by, now));

    if let Some(max_items) = query.max_items {
        selected.truncate(max_items);
    }
    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FindingSource, InvestigationStatus, Severity};

    fn finding(id: &str, severity: Severity, detected_at: i64) -> UnifiedFinding {
        UnifiedFinding::new(
            id,
            FindingSource::AiPatrol,
            severity,
            "vm-101",
            "vm",
            "web-01",
            format!("finding {id}"),
            detected_at,
        )
    }

    fn with_outcome(mut f: UnifiedFinding, outcome: &str) -> UnifiedFinding {
        f.investigation_status = Some(InvestigationStatus::Completed);
        f.investigation_outcome = Some(outcome.into());
        f
    }

    const NOW: i64 = 10_000;

    #[test]
    fn failed_fix_outranks_queued_fix_regardless_of_sort() {
        let failed = with_outcome(finding("a", Severity::Info, 1000), "fix_failed");
        let queued = with_outcome(finding("b", Severity::Critical, 9000), "fix_queued");
        let all = [queued.clone(), failed.clone()];

        for sort_by in [SortBy::Severity, SortBy::Time] {
            let query = FindingQuery {
                sort_by,
                ..FindingQuery::default()
            };
            let order = select(&all, &query, NOW, &BTreeSet::new(), &BTreeSet::new());
            assert_eq!(order[0].id, "a", "sort_by {sort_by:?}");
            assert_eq!(order[1].id, "b");
        }
    }

    #[test]
    fn outcome_urgency_dominates_severity() {
        // A critical finding with a failed fix detected earlier still
        // beats a critical finding without an outcome detected just now.
        let a = with_outcome(finding("a", Severity::Critical, NOW - 600), "fix_failed");
        let b = finding("b", Severity::Critical, NOW - 60);
        let all = [b, a];
        let order = select(
            &all,
            &FindingQuery::default(),
            NOW,
            &BTreeSet::new(),
            &BTreeSet::new(),
        );
        assert_eq!(order[0].id, "a");
        assert_eq!(order[1].id, "b");
    }

    #[test]
    fn stale_outcome_does_not_boost_urgency() {
        let mut f = with_outcome(finding("a", Severity::Info, 1000), "fix_failed");
        f.investigation_status = Some(InvestigationStatus::Running);
        let fresh = finding("b", Severity::Critical, 2000);
        let all = [f, fresh];
        let order = select(
            &all,
            &FindingQuery::default(),
            NOW,
            &BTreeSet::new(),
            &BTreeSet::new(),
        );
        assert_eq!(order[0].id, "b");
    }

    #[test]
    fn severity_sort_places_unacknowledged_first() {
        let mut acked = finding("a", Severity::Warning, 5000);
        acked.acknowledged_at = Some(6000);
        let unacked = finding("b", Severity::Warning, 1000);
        let all = [acked, unacked];
        let order = select(
            &all,
            &FindingQuery::default(),
            NOW,
            &BTreeSet::new(),
            &BTreeSet::new(),
        );
        assert_eq!(order[0].id, "b");
    }

    #[test]
    fn newest_detection_breaks_final_ties() {
        let older = finding("a", Severity::Warning, 1000);
        let newer = finding("b", Severity::Warning, 2000);
        let all = [older, newer];
        let order = select(
            &all,
            &FindingQuery::default(),
            NOW,
            &BTreeSet::new(),
            &BTreeSet::new(),
        );
        assert_eq!(order[0].id, "b");
    }

    #[test]
    fn sorting_is_deterministic_across_runs() {
        let all: Vec<UnifiedFinding> = (0..8)
            .map(|i| {
                let severity = if i % 2 == 0 {
                    Severity::Warning
                } else {
                    Severity::Critical
                };
                finding(&format!("f-{i}"), severity, 1000 + i)
            })
            .collect();
        let query = FindingQuery::default();
        let first: Vec<&str> = select(&all, &query, NOW, &BTreeSet::new(), &BTreeSet::new())
            .iter()
            .map(|f| f.id.as_str())
            .collect();
        let second: Vec<&str> = select(&all, &query, NOW, &BTreeSet::new(), &BTreeSet::new())
            .iter()
            .map(|f| f.id.as_str())
            .collect();
        assert_eq!(first, second);
    }

    #[test]
    fn resolved_bucket_groups_history_statuses() {
        let active = finding("active", Severity::Warning, 1000);
        let mut resolved = finding("resolved", Severity::Warning, 1000);
        resolved.resolved_at = Some(2000);
        let mut dismissed = finding("dismissed", Severity::Warning, 1000);
        dismissed.dismissed_reason = Some(crate::model::DismissReason::WillFixLater);
        let mut snoozed = finding("snoozed", Severity::Warning, 1000);
        snoozed.snoozed_until = Some(NOW + 3600);

        let all = [active, resolved, dismissed, snoozed];
        let query = FindingQuery {
            bucket: Some(StatusBucket::Resolved),
            ..FindingQuery::default()
        };
        let ids: BTreeSet<&str> = select(&all, &query, NOW, &BTreeSet::new(), &BTreeSet::new())
            .iter()
            .map(|f| f.id.as_str())
            .collect();
        assert_eq!(
            ids,
            BTreeSet::from(["resolved", "dismissed", "snoozed"])
        );
    }

    #[test]
    fn attention_and_approval_buckets_use_membership_sets() {
        let a = finding("a", Severity::Warning, 1000);
        let b = finding("b", Severity::Warning, 1000);
        let all = [a, b];
        let attention = BTreeSet::from(["a".to_string()]);
        let approvals = BTreeSet::from(["b".to_string()]);

        let query = FindingQuery {
            bucket: Some(StatusBucket::Attention),
            ..FindingQuery::default()
        };
        let order = select(&all, &query, NOW, &attention, &approvals);
        assert_eq!(order.len(), 1);
        assert_eq!(order[0].id, "a");

        let query = FindingQuery {
            bucket: Some(StatusBucket::Approvals),
            ..FindingQuery::default()
        };
        let order = select(&all, &query, NOW, &attention, &approvals);
        assert_eq!(order.len(), 1);
        assert_eq!(order[0].id, "b");
    }

    #[test]
    fn patrol_only_excludes_threshold_findings() {
        let patrol = finding("patrol", Severity::Warning, 1000);
        let mut threshold = finding("threshold", Severity::Warning, 1000);
        threshold.source = FindingSource::Threshold;
        threshold.is_threshold = true;
        let mut alert_tagged = finding("alert-tagged", Severity::Warning, 1000);
        alert_tagged.alert_id = Some("a-1".into());

        let all = [patrol, threshold, alert_tagged];
        let query = FindingQuery {
            patrol_only: true,
            ..FindingQuery::default()
        };
        let order = select(&all, &query, NOW, &BTreeSet::new(), &BTreeSet::new());
        assert_eq!(order.len(), 1);
        assert_eq!(order[0].id, "patrol");
    }

    #[test]
    fn resource_filter_allow_list_and_truncation_compose() {
        let mut other = finding("other", Severity::Critical, 9000);
        other.resource_id = "vm-999".into();
        let all = [
            finding("a", Severity::Warning, 1000),
            finding("b", Severity::Warning, 2000),
            finding("c", Severity::Warning, 3000),
            other,
        ];
        let query = FindingQuery {
            resource_id: Some("vm-101".into()),
            ids: Some(BTreeSet::from(["a".to_string(), "b".to_string()])),
            max_items: Some(1),
            ..FindingQuery::default()
        };
        let order = select(&all, &query, NOW, &BTreeSet::new(), &BTreeSet::new());
        assert_eq!(order.len(), 1);
        assert_eq!(order[0].id, "b");
    }
}
