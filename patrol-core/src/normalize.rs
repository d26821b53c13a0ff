use crate::model::{
    DismissReason, FindingSource, InvestigationStatus, LifecycleEvent, Severity, UnifiedFinding,
};
use finding_registry::{validate_alert_v1, CanonicalAlertV1};
use tracing::warn;

pub struct NormalizedBatch {
    pub findings: Vec<UnifiedFinding>,
    pub skipped: usize,
}

/// Converts a validated threshold alert into a unified finding.
pub fn alert_to_finding(alert: &CanonicalAlertV1, now: i64) -> UnifiedFinding {
    let severity = if alert.level.eq_ignore_ascii_case("critical") {
        Severity::Critical
    } else {
        Severity::Warning
    };

    let mut finding = UnifiedFinding::new(
        format!("alert-{}", alert.id),
        FindingSource::Threshold,
        severity,
        alert.resource_id.clone(),
        alert.resource_type.clone(),
        alert.resource_name.clone(),
        alert_title(alert),
        alert.started_at,
    );
    finding.last_seen_at = now;
    finding.description = alert.message.clone();
    finding.evidence = format!(
        "threshold alert: {} = {:.1} (threshold {:.1})",
        alert.alert_type, alert.value, alert.threshold
    );
    finding.alert_id = Some(alert.id.clone());
    finding.alert_type = Some(alert.alert_type.clone());
    finding.is_threshold = true;
    finding
}

pub fn normalize_alert_batch(alerts: &[CanonicalAlertV1], now: i64) -> NormalizedBatch {
    let mut findings = Vec::new();
    let mut skipped = 0;
    for alert in alerts {
        match validate_alert_v1(alert) {
            Ok(()) => findings.push(alert_to_finding(alert, now)),
            Err(err) => {
                warn!("skipping malformed alert record: {err}");
                skipped += 1;
            }
        }
    }
    NormalizedBatch { findings, skipped }
}

/// Maps one raw patrol-feed record into a unified finding. Every required
/// field must be present and well-formed or the record is rejected.
pub fn patrol_record_to_finding(raw: &serde_json::Value) -> Result<UnifiedFinding, String> {
    let id = required_str(raw, "id")?;
    let source_raw = required_str(raw, "source")?;
    let source = FindingSource::parse(source_raw)
        .ok_or_else(|| format!("unknown source '{source_raw}'"))?;
    let severity_raw = required_str(raw, "severity")?;
    let severity = Severity::parse(severity_raw)
        .ok_or_else(|| format!("unknown severity '{severity_raw}'"))?;
    let resource_id = required_str(raw, "resource_id")?;
    let resource_type = required_str(raw, "resource_type")?;
    let resource_name = required_str(raw, "resource_name")?;
    let detected_at = raw
        .get("detected_at")
        .and_then(serde_json::Value::as_i64)
        .ok_or_else(|| "detected_at is required".to_string())?;

    let title = opt_str(raw, "title")
        .unwrap_or_else(|| format!("{} finding on {resource_name}", source.as_str()));

    let mut finding = UnifiedFinding::new(
        id,
        source,
        severity,
        resource_id,
        resource_type,
        resource_name,
        title,
        detected_at,
    );

    if let Some(description) = opt_str(raw, "description") {
        finding.description = description;
    }
    if let Some(evidence) = opt_str(raw, "evidence") {
        finding.evidence = evidence;
    }
    finding.last_seen_at = opt_i64(raw, "last_seen_at").unwrap_or(detected_at);
    finding.resolved_at = opt_i64(raw, "resolved_at");
    finding.auto_resolved = raw
        .get("auto_resolved")
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false);
    finding.acknowledged_at = opt_i64(raw, "acknowledged_at");
    finding.snoozed_until = opt_i64(raw, "snoozed_until");
    finding.dismissed_reason = opt_str(raw, "dismissed_reason")
        .as_deref()
        .and_then(DismissReason::parse);
    finding.user_note = opt_str(raw, "user_note");

    finding.investigation_session_id = opt_str(raw, "investigation_session_id");
    finding.investigation_status = opt_str(raw, "investigation_status")
        .as_deref()
        .and_then(InvestigationStatus::parse);
    finding.investigation_outcome = opt_str(raw, "investigation_outcome");
    finding.investigation_attempts = opt_i64(raw, "investigation_attempts").unwrap_or(0) as u32;
    finding.last_investigated_at = opt_i64(raw, "last_investigated_at");
    finding.regression_count = opt_i64(raw, "regression_count").unwrap_or(0) as u32;
    finding.last_regression_at = opt_i64(raw, "last_regression_at");
    finding.times_raised = opt_i64(raw, "times_raised").unwrap_or(1) as u32;

    finding.correlated_finding_ids = raw
        .get("correlated_finding_ids")
        .and_then(serde_json::Value::as_array)
        .map(|xs| {
            xs.iter()
                .filter_map(serde_json::Value::as_str)
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default();
    finding.lifecycle = raw
        .get("lifecycle")
        .and_then(|v| serde_json::from_value::<Vec<LifecycleEvent>>(v.clone()).ok())
        .unwrap_or_default();

    Ok(finding)
}

/// One malformed record never aborts the batch.
pub fn normalize_patrol_batch(records: &[serde_json::Value]) -> NormalizedBatch {
    let mut findings = Vec::new();
    let mut skipped = 0;
    for record in records {
        match patrol_record_to_finding(record) {
            Ok(finding) => findings.push(finding),
            Err(err) => {
                warn!("skipping malformed patrol record: {err}");
                skipped += 1;
            }
        }
    }
    NormalizedBatch { findings, skipped }
}

fn alert_title(alert: &CanonicalAlertV1) -> String {
    match alert.alert_type.as_str() {
        "cpu" => format!("High CPU usage on {} ({:.0}%)", alert.resource_name, alert.value),
        "memory" => format!(
            "High memory usage on {} ({:.0}%)",
            alert.resource_name, alert.value
        ),
        "disk" => format!(
            "High disk usage on {} ({:.0}%)",
            alert.resource_name, alert.value
        ),
        "usage" | "storage" => format!(
            "High storage usage on {} ({:.0}%)",
            alert.resource_name, alert.value
        ),
        "temperature" => format!(
            "High temperature on {} ({:.0}C)",
            alert.resource_name, alert.value
        ),
        "offline" | "nodeOffline" => format!("{} is offline", alert.resource_name),
        "poweredOff" => format!("{} is powered off", alert.resource_name),
        other => format!("{other} alert on {}", alert.resource_name),
    }
}

fn required_str<'a>(raw: &'a serde_json::Value, key: &str) -> Result<&'a str, String> {
    raw.get(key)
        .and_then(serde_json::Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| format!("{key} is required"))
}

fn opt_str(raw: &serde_json::Value, key: &str) -> Option<String> {
    raw.get(key)
        .and_then(serde_json::Value::as_str)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}

fn opt_i64(raw: &serde_json::Value, key: &str) -> Option<i64> {
    raw.get(key).and_then(serde_json::Value::as_i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FindingStatus;

    fn raw_patrol_record() -> serde_json::Value {
        serde_json::json!({
            "id": "patrol-vm-101-disk",
            "source": "ai-patrol",
            "severity": "warning",
            "resource_id": "vm-101",
            "resource_type": "vm",
            "resource_name": "web-01",
            "title": "Disk filling up",
            "detected_at": 1700000000,
            "investigation_status": "completed",
            "investigation_outcome": "fix_queued"
        })
    }

    #[test]
    fn alert_conversion_tags_threshold_source() {
        let alert = CanonicalAlertV1 {
            schema: "alert.v1".into(),
            id: "a-1".into(),
            alert_type: "cpu".into(),
            level: "critical".into(),
            resource_id: "vm-101".into(),
            resource_name: "web-01".into(),
            resource_type: "vm".into(),
            message: "CPU above threshold".into(),
            value: 97.0,
            threshold: 90.0,
            started_at: 1700000000,
        };
        let finding = alert_to_finding(&alert, 1700000100);
        assert_eq!(finding.id, "alert-a-1");
        assert_eq!(finding.source, FindingSource::Threshold);
        assert_eq!(finding.severity, Severity::Critical);
        assert_eq!(finding.alert_id.as_deref(), Some("a-1"));
        assert!(finding.is_threshold);
        assert!(!finding.is_patrol());
        assert_eq!(finding.status(1700000100), FindingStatus::Active);
        assert!(finding.title.contains("High CPU usage"));
    }

    #[test]
    fn patrol_record_maps_all_fields() {
        let finding = patrol_record_to_finding(&raw_patrol_record()).expect("normalize");
        assert_eq!(finding.id, "patrol-vm-101-disk");
        assert_eq!(finding.source, FindingSource::AiPatrol);
        assert_eq!(
            finding.investigation_status,
            Some(InvestigationStatus::Completed)
        );
        assert_eq!(finding.investigation_outcome.as_deref(), Some("fix_queued"));
        assert!(finding.is_patrol());
    }

    #[test]
    fn missing_required_field_rejects_single_record() {
        let mut record = raw_patrol_record();
        record.as_object_mut().expect("object").remove("resource_id");
        assert!(patrol_record_to_finding(&record).is_err());
    }

    #[test]
    fn batch_skips_bad_records_and_keeps_the_rest() {
        let good = raw_patrol_record();
        let mut bad = raw_patrol_record();
        bad.as_object_mut().expect("object").remove("severity");
        let batch = normalize_patrol_batch(&[bad, good]);
        assert_eq!(batch.findings.len(), 1);
        assert_eq!(batch.skipped, 1);
    }

    #[test]
    fn unknown_severity_rejects_the_record() {
        let mut record = raw_patrol_record();
        record["severity"] = serde_json::json!("purple");
        assert!(patrol_record_to_finding(&record).is_err());
    }
}
