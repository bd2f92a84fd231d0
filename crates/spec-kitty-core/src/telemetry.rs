//! Per-feature execution telemetry.
//!
//! Agent invocations append `ExecutionEvent` records to a feature's
//! `execution.events.jsonl`, separate from status events. Emission is
//! fail-safe: a telemetry write failure is logged and never fails the
//! action that produced it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};
use crate::feature::FeatureDir;
use crate::sync::clock::LamportClock;

/// One agent-invocation telemetry record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionEvent {
    pub event_id: String,
    pub event_type: String,
    pub run_id: String,
    pub wp_id: String,
    pub agent: String,
    /// `implementer` or `reviewer`.
    pub role: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub input_tokens: Option<u64>,
    #[serde(default)]
    pub output_tokens: Option<u64>,
    #[serde(default)]
    pub cost_usd: Option<f64>,
    pub duration_secs: f64,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    pub lamport_clock: u64,
    pub at: DateTime<Utc>,
}

/// Builder-ish input for [`emit_execution_event`].
#[derive(Debug, Clone)]
pub struct ExecutionRecord {
    pub run_id: String,
    pub wp_id: String,
    pub agent: String,
    pub role: String,
    pub model: Option<String>,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub cost_usd: Option<f64>,
    pub duration_secs: f64,
    pub success: bool,
    pub error: Option<String>,
}

/// Append a telemetry record, ticking the feature's clock slot.
///
/// Never raises to the caller: failures are logged once and swallowed.
pub fn emit_execution_event(feature: &FeatureDir, record: &ExecutionRecord) {
    if let Err(err) = try_emit(feature, record) {
        warn!(%err, wp_id = %record.wp_id, "failed to emit execution event");
    }
}

fn try_emit(feature: &FeatureDir, record: &ExecutionRecord) -> Result<()> {
    let mut clock = LamportClock::load(feature.telemetry_clock_path());
    let tick = clock.tick()?;

    let event = ExecutionEvent {
        event_id: ulid::Ulid::new().to_string(),
        event_type: "ExecutionEvent".to_string(),
        run_id: record.run_id.clone(),
        wp_id: record.wp_id.clone(),
        agent: record.agent.clone(),
        role: record.role.clone(),
        model: record.model.clone(),
        input_tokens: record.input_tokens,
        output_tokens: record.output_tokens,
        cost_usd: record.cost_usd,
        duration_secs: record.duration_secs,
        success: record.success,
        error: record.error.clone(),
        lamport_clock: tick,
        at: Utc::now(),
    };

    let path = feature.execution_events_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    let line = serde_json::to_string(&event)?;
    use std::io::Write as _;
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| Error::io(&path, e))?;
    writeln!(file, "{line}").map_err(|e| Error::io(&path, e))?;
    Ok(())
}

/// Read all telemetry records, skipping corrupt lines.
pub fn read_execution_events(feature: &FeatureDir) -> Result<Vec<ExecutionEvent>> {
    let path = feature.execution_events_path();
    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(Error::io(&path, err)),
    };
    Ok(raw
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| serde_json::from_str(l).ok())
        .collect())
}
