//! Canonical event envelopes and cross-ecosystem id acceptance.
//!
//! Three id forms are accepted for `event_id`, `causation_id`, and
//! `correlation_id`: a 26-char Crockford-base32 ULID (normalized to upper
//! case), a 36-char hyphenated UUID (normalized to lower case), and a
//! 32-char bare UUID (normalized to hyphenated lower case). Everything else
//! is rejected, including 26-char strings using the Crockford-excluded
//! characters I, L, O, and U.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Characters legal in a Crockford base32 ULID (I, L, O, U excluded).
const CROCKFORD: &str = "0123456789ABCDEFGHJKMNPQRSTVWXYZ";

/// Canonical envelope emitted for every significant mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: String,
    pub event_type: String,
    pub aggregate_id: String,
    pub aggregate_type: String,
    pub payload: serde_json::Value,
    pub node_id: String,
    pub lamport_clock: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub team_slug: String,
}

/// Normalize an envelope id to canonical form, or reject it.
///
/// - 26 chars, all Crockford base32 → upper-cased ULID
/// - 36 chars with hyphens at 8/13/18/23 → lower-cased UUID
/// - 32 hex chars → hyphenated lower-cased UUID
#[must_use]
pub fn normalize_envelope_id(raw: &str) -> Option<String> {
    match raw.len() {
        26 => {
            let upper = raw.to_ascii_uppercase();
            if upper.chars().all(|c| CROCKFORD.contains(c)) {
                Some(upper)
            } else {
                None
            }
        }
        36 => {
            // Hyphens must sit exactly where RFC 4122 puts them; uuid's
            // parser enforces that.
            if raw.chars().filter(|c| *c == '-').count() != 4 {
                return None;
            }
            uuid::Uuid::try_parse(raw)
                .ok()
                .map(|parsed| parsed.hyphenated().to_string())
        }
        32 => uuid::Uuid::try_parse(raw)
            .ok()
            .map(|parsed| parsed.hyphenated().to_string()),
        _ => None,
    }
}

impl EventEnvelope {
    /// Normalize the envelope's ids in place; `false` means the envelope is
    /// invalid and must be discarded.
    #[must_use]
    pub fn normalize_ids(&mut self) -> bool {
        match normalize_envelope_id(&self.event_id) {
            Some(normalized) => self.event_id = normalized,
            None => return false,
        }
        for id in [&mut self.causation_id, &mut self.correlation_id] {
            if let Some(raw) = id.as_deref() {
                match normalize_envelope_id(raw) {
                    Some(normalized) => *id = Some(normalized),
                    None => return false,
                }
            }
        }
        true
    }
}
