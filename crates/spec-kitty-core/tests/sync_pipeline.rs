//! Offline queue persistence and batch delivery, end to end.
//!
//! Runs a minimal in-process HTTP endpoint that accepts the gzipped batch
//! body and acknowledges every event, so the full emit -> queue ->
//! restart -> drain cycle is exercised without a network.

#![allow(clippy::unwrap_used)]

use std::io::Read as _;
use std::sync::Arc;

use spec_kitty_core::sync::{
    AccountScope, AuthClient, BackgroundSyncService, CredentialStore, Credentials, EventEmitter,
    LamportClock, OfflineQueue,
};
use spec_kitty_core::status::lane::Lane;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Accept batch POSTs on a local port; reply success for every event.
async fn spawn_batch_server() -> (String, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut buf: Vec<u8> = Vec::new();
                let mut chunk = [0u8; 4096];
                let (headers_end, header_text) = loop {
                    let n = match socket.read(&mut chunk).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => n,
                    };
                    buf.extend_from_slice(&chunk[..n]);
                    if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                        break (pos + 4, String::from_utf8_lossy(&buf[..pos]).into_owned());
                    }
                };
                let content_length: usize = header_text
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse().ok())?
                    })
                    .unwrap_or(0);
                while buf.len() < headers_end + content_length {
                    let n = match socket.read(&mut chunk).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => n,
                    };
                    buf.extend_from_slice(&chunk[..n]);
                }

                let body = &buf[headers_end..headers_end + content_length];
                let mut decoder = flate2::read::GzDecoder::new(body);
                let mut decompressed = String::new();
                let _ = decoder.read_to_string(&mut decompressed);
                let parsed: serde_json::Value =
                    serde_json::from_str(&decompressed).unwrap_or_default();
                let results: Vec<serde_json::Value> = parsed["events"]
                    .as_array()
                    .map(|events| {
                        events
                            .iter()
                            .map(|e| {
                                serde_json::json!({
                                    "event_id": e["event_id"],
                                    "status": "success",
                                })
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                let response_body =
                    serde_json::json!({ "results": results }).to_string();
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    response_body.len(),
                    response_body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    (format!("http://{addr}"), handle)
}

fn scope(server_url: &str) -> AccountScope {
    AccountScope {
        server_url: server_url.to_string(),
        username: "alice".to_string(),
        team_slug: "test-team".to_string(),
    }
}

fn credentials(server_url: &str) -> Credentials {
    Credentials {
        server_url: server_url.to_string(),
        username: "alice".to_string(),
        team_slug: "test-team".to_string(),
        access_token: "token-abc".to_string(),
        refresh_token: None,
    }
}

#[tokio::test]
async fn offline_queue_survives_restart_and_drains_on_reconnect() {
    // S6: emit three events with the endpoint unreachable, restart, then
    // deliver them all.
    let tmp = tempfile::tempdir().unwrap();
    let db_path = tmp.path().join("queue.db");
    let scope_key = scope("http://unused.invalid").key();

    // Credentials exist from the start; only connectivity is missing.
    let store = CredentialStore::new(tmp.path());
    store.save(&credentials("http://unused.invalid")).unwrap();
    let creds_before = std::fs::read_to_string(tmp.path().join("credentials.json")).unwrap();

    // "First process": emit three WPStatusChanged events with no transport.
    {
        let queue = Arc::new(OfflineQueue::open(&db_path).await.unwrap());
        let auth = Arc::new(AuthClient::new(CredentialStore::new(tmp.path())));
        let clock = LamportClock::new(0, "abc123def456", tmp.path().join("clock.json"));
        let emitter = EventEmitter::new(
            scope("http://unused.invalid"),
            Arc::clone(&queue),
            auth,
            clock,
        );
        for (from, to) in [
            (Lane::Planned, Lane::Claimed),
            (Lane::Claimed, Lane::InProgress),
            (Lane::InProgress, Lane::ForReview),
        ] {
            let event = emitter
                .emit_wp_status_changed("WP01", from, to, "alice", Some("001-test"), None)
                .await;
            assert!(event.is_some());
        }
        assert_eq!(queue.size(&scope_key).await.unwrap(), 3);
    }

    // "Restart": a fresh handle sees the same three events.
    let queue = Arc::new(OfflineQueue::open(&db_path).await.unwrap());
    assert_eq!(queue.size(&scope_key).await.unwrap(), 3);

    // Reconnect: point the same scope at a live endpoint and flush.
    let (server_url, server) = spawn_batch_server().await;
    let auth = Arc::new(AuthClient::new(CredentialStore::new(tmp.path())));
    let service = BackgroundSyncService::new(
        Arc::clone(&queue),
        auth,
        scope_key.clone(),
        server_url,
    );
    let result = service.sync_now().await.unwrap();
    assert_eq!(result.delivered, 3);
    assert_eq!(result.failed, 0);
    assert_eq!(queue.size(&scope_key).await.unwrap(), 0);

    // The account-scope file is untouched by the whole cycle.
    let creds_after = std::fs::read_to_string(tmp.path().join("credentials.json")).unwrap();
    assert_eq!(creds_before, creds_after);

    server.abort();
}

#[tokio::test]
async fn lamport_clock_is_monotone_across_emitters() {
    let tmp = tempfile::tempdir().unwrap();
    let db_path = tmp.path().join("queue.db");
    let clock_path = tmp.path().join("clock.json");
    let scope_key = scope("http://unused.invalid").key();

    let emit_two = |queue: Arc<OfflineQueue>| async {
        let auth = Arc::new(AuthClient::new(CredentialStore::new(tmp.path())));
        let clock = LamportClock::load(&clock_path);
        let emitter =
            EventEmitter::new(scope("http://unused.invalid"), queue, auth, clock);
        for _ in 0..2 {
            emitter
                .emit_wp_status_changed(
                    "WP01",
                    Lane::Planned,
                    Lane::InProgress,
                    "alice",
                    None,
                    None,
                )
                .await
                .unwrap();
        }
    };

    let queue = Arc::new(OfflineQueue::open(&db_path).await.unwrap());
    emit_two(Arc::clone(&queue)).await;
    // A second emitter (new process) continues from the persisted clock.
    emit_two(Arc::clone(&queue)).await;

    let pending = queue.pending(&scope_key, 10).await.unwrap();
    let clocks: Vec<u64> = pending.iter().map(|p| p.envelope.lamport_clock).collect();
    assert_eq!(clocks, vec![1, 2, 3, 4]);
}
