//! Batched gzipped delivery to the upstream events endpoint.
//!
//! Drains up to a batch of pending events, serializes them as
//! `{"events": [...]}`, gzip-compresses the body, and POSTs it with the
//! caller's bearer token. Partial-success responses carry per-event
//! dispositions: delivered events leave the queue, errored ones stay
//! pending with an incremented retry counter. 401 keeps events and surfaces
//! an auth error; 5xx keeps events and backs off.

use std::io::Write as _;

use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::sync::queue::OfflineQueue;

/// Default number of events drained per batch.
pub const DEFAULT_BATCH_SIZE: u32 = 100;

/// Outcome of one batch sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSyncResult {
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
}

/// Result of probing the batch endpoint for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectivityStatus {
    /// 2xx: reachable and the token is valid.
    Connected,
    /// 401: token rejected.
    AuthenticationFailed,
    /// 403: authenticated but not permitted.
    PermissionDenied,
    /// Transport-level failure; events stay queued for later sync.
    Unreachable(String),
}

#[derive(Debug, Deserialize)]
struct BatchResponse {
    #[serde(default)]
    results: Vec<EventResult>,
}

#[derive(Debug, Deserialize)]
struct EventResult {
    event_id: String,
    status: String,
    #[serde(default)]
    #[allow(dead_code)]
    error: Option<String>,
}

fn batch_endpoint(server_url: &str) -> String {
    format!("{}/api/v1/events/batch", server_url.trim_end_matches('/'))
}

fn gzip_body(raw: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(raw)
        .and_then(|()| encoder.finish())
        .map_err(|e| Error::Network(format!("gzip encoding failed: {e}")))
}

/// Drain up to `batch_size` pending events for a scope and deliver them.
pub async fn batch_sync(
    client: &reqwest::Client,
    queue: &OfflineQueue,
    scope: &str,
    server_url: &str,
    access_token: &str,
    batch_size: u32,
) -> Result<BatchSyncResult> {
    let pending = queue.pending(scope, batch_size).await?;
    if pending.is_empty() {
        return Ok(BatchSyncResult::default());
    }

    let envelopes: Vec<_> = pending.iter().map(|p| &p.envelope).collect();
    let body = serde_json::to_vec(&serde_json::json!({ "events": envelopes }))?;
    let compressed = gzip_body(&body)?;

    let response = client
        .post(batch_endpoint(server_url))
        .bearer_auth(access_token)
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .header(reqwest::header::CONTENT_ENCODING, "gzip")
        .body(compressed)
        .send()
        .await
        .map_err(|e| Error::Network(format!("batch POST failed: {e}")))?;

    let status = response.status();
    if status.as_u16() == 401 {
        return Err(Error::Auth(
            "Batch endpoint rejected the access token (401)".to_string(),
        ));
    }
    if status.is_server_error() {
        return Err(Error::Network(format!(
            "Batch endpoint unavailable ({status}); events kept for retry"
        )));
    }
    if !status.is_success() {
        return Err(Error::Network(format!(
            "Batch endpoint returned unexpected status {status}"
        )));
    }

    let parsed: BatchResponse = response
        .json()
        .await
        .map_err(|e| Error::Network(format!("invalid batch response: {e}")))?;

    let mut delivered: Vec<String> = Vec::new();
    let mut errored: Vec<String> = Vec::new();
    for result in parsed.results {
        if result.status == "success" {
            delivered.push(result.event_id);
        } else {
            errored.push(result.event_id);
        }
    }
    debug!(
        scope,
        delivered = delivered.len(),
        errored = errored.len(),
        "batch sync pass complete"
    );

    queue.mark_delivered(scope, &delivered).await?;
    queue.mark_retry(scope, &errored).await?;

    Ok(BatchSyncResult {
        attempted: pending.len(),
        delivered: delivered.len(),
        failed: errored.len(),
    })
}

/// Probe the batch endpoint with the caller's real access token.
pub async fn check_connectivity(
    client: &reqwest::Client,
    server_url: &str,
    access_token: &str,
) -> ConnectivityStatus {
    let empty = serde_json::json!({ "events": [] }).to_string();
    let compressed = match gzip_body(empty.as_bytes()) {
        Ok(body) => body,
        Err(err) => return ConnectivityStatus::Unreachable(err.to_string()),
    };
    let response = client
        .post(batch_endpoint(server_url))
        .bearer_auth(access_token)
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .header(reqwest::header::CONTENT_ENCODING, "gzip")
        .body(compressed)
        .send()
        .await;

    match response {
        Ok(resp) => match resp.status().as_u16() {
            200..=299 => ConnectivityStatus::Connected,
            401 => ConnectivityStatus::AuthenticationFailed,
            403 => ConnectivityStatus::PermissionDenied,
            other => ConnectivityStatus::Unreachable(format!("unexpected status {other}")),
        },
        Err(err) => ConnectivityStatus::Unreachable(err.to_string()),
    }
}
