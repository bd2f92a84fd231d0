//! Canonical JSON envelopes for machine consumers.
//!
//! Every command that runs with `--json` prints exactly one envelope.
//! Failures use
//! `{success:false, error_code, data:{message,...}, command, timestamp,
//! correlation_id, contract_version}`; parser errors are USAGE_ERROR with a
//! non-zero exit.

use serde::Serialize;
use spec_kitty_core::Error as CoreError;

/// Envelope schema version consumers pin against.
pub const CONTRACT_VERSION: &str = "1.0";

#[derive(Debug, Serialize)]
pub struct Envelope {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    pub data: serde_json::Value,
    pub command: String,
    pub timestamp: String,
    pub correlation_id: String,
    pub contract_version: String,
}

impl Envelope {
    #[must_use]
    pub fn success(command: &str, data: serde_json::Value) -> Self {
        Self {
            success: true,
            error_code: None,
            data,
            command: command.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            correlation_id: ulid::Ulid::new().to_string(),
            contract_version: CONTRACT_VERSION.to_string(),
        }
    }

    #[must_use]
    pub fn failure(command: &str, error_code: &str, data: serde_json::Value) -> Self {
        Self {
            success: false,
            error_code: Some(error_code.to_string()),
            data,
            command: command.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            correlation_id: ulid::Ulid::new().to_string(),
            contract_version: CONTRACT_VERSION.to_string(),
        }
    }

    /// Print to stdout as pretty JSON.
    pub fn print(&self) {
        match serde_json::to_string_pretty(self) {
            Ok(raw) => println!("{raw}"),
            Err(_) => println!(
                r#"{{"success":false,"error_code":"SYSTEM_ERROR","data":{{"message":"envelope serialization failed"}}}}"#
            ),
        }
    }
}

/// Envelope for a parser/argument failure.
#[must_use]
pub fn usage_error(command: &str, message: &str) -> Envelope {
    Envelope::failure(
        command,
        "USAGE_ERROR",
        serde_json::json!({
            "message": message,
            "hint": "Use --help to view valid flags and arguments",
        }),
    )
}

/// Envelope for a core error, carrying its taxonomy code.
#[must_use]
pub fn core_error(command: &str, error: &CoreError) -> Envelope {
    let mut data = serde_json::json!({ "message": error.to_string() });
    // Preflight failures carry their full payload verbatim so agents and
    // humans see the remediation commands.
    if let CoreError::Preflight(payload) = error {
        if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(payload) {
            data = parsed;
        }
    }
    Envelope::failure(command, error.error_code(), data)
}
