use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CanonicalAlertV1 {
    pub schema: String,
    pub id: String,
    pub alert_type: String,
    pub level: String,
    pub resource_id: String,
    pub resource_name: String,
    pub resource_type: String,
    pub message: String,
    pub value: f64,
    pub threshold: f64,
    pub started_at: i64,
}

pub fn validate_alert_v1(alert: &CanonicalAlertV1) -> Result<(), String> {
    if alert.schema != "alert.v1" {
        return Err(format!("unsupported schema '{}'", alert.schema));
    }
    if alert.id.trim().is_empty() {
        return Err("id is required".into());
    }
    if alert.alert_type.trim().is_empty() {
        return Err("alert_type is required".into());
    }
    if alert.resource_id.trim().is_empty() {
        return Err("resource_id is required".into());
    }
    if alert.resource_name.trim().is_empty() {
        return Err("resource_name is required".into());
    }
    match alert.level.to_lowercase().as_str() {
        "warning" | "critical" => {}
        other => return Err(format!("invalid alert level '{other}'")),
    }
    Ok(())
}
