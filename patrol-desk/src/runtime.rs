use crate::state::AppState;
use patrol_core::model::FindingStatus;
use std::collections::BTreeMap;
use tracing::warn;

pub trait EventSink {
    fn emit_json(&self, event: &str, payload: serde_json::Value);
}

pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit_json(&self, _event: &str, _payload: serde_json::Value) {}
}

#[derive(Clone, Copy, PartialEq, Eq)]
struct FindingDigest {
    status: FindingStatus,
    regression_count: u32,
    attention: bool,
}

/// One background refresh cycle: sync the engine, then emit change
/// events and the derived badge counts.
pub async fn tick(state: &AppState, sink: &impl EventSink) -> Result<(), String> {
    let now = now_ts();
    let before = digests(state, now);

    state.engine.refresh(now).await?;
    state.engine.hydrate_sessions(now).await?;

    let after = digests(state, now);
    for (id, digest) in &after {
        let previous = before.get(id);
        if digest.status == FindingStatus::Resolved
            && previous.map_or(false, |p| p.status != FindingStatus::Resolved)
        {
            sink.emit_json("finding-resolved", serde_json::json!({ "finding_id": id }));
        }
        if previous.map_or(false, |p| digest.regression_count > p.regression_count) {
            sink.emit_json("finding-regressed", serde_json::json!({ "finding_id": id }));
        }
        if digest.attention && !previous.map_or(false, |p| p.attention) {
            sink.emit_json("attention-required", serde_json::json!({ "finding_id": id }));
        }
    }

    let badges = state.engine.badge_counts(now);
    sink.emit_json(
        "findings-updated",
        serde_json::to_value(&badges).map_err(|e| e.to_string())?,
    );
    Ok(())
}

/// Drives ticks on an interval on the current thread; the engine never
/// leaves it. `max_ticks` bounds demo runs.
pub fn run_blocking(
    state: &AppState,
    sink: &impl EventSink,
    interval_ms: u64,
    max_ticks: Option<usize>,
) {
    let mut ticks = 0;
    loop {
        if let Err(err) = futures::executor::block_on(tick(state, sink)) {
            warn!("background refresh failed: {err}");
        }
        ticks += 1;
        if max_ticks.map_or(false, |max| ticks >= max) {
            return;
        }
        std::thread::sleep(std::time::Duration::from_millis(interval_ms));
    }
}

fn digests(state: &AppState, now: i64) -> BTreeMap<String, FindingDigest> {
    let attention = state.engine.attention_ids(now);
    state
        .engine
        .snapshot()
        .into_iter()
        .map(|finding| {
            let digest = FindingDigest {
                status: finding.status(now),
                regression_count: finding.regression_count,
                attention: attention.contains(&finding.id),
            };
            (finding.id, digest)
        })
        .collect()
}

fn now_ts() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    let Ok(duration) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    duration.as_secs() as i64
}
