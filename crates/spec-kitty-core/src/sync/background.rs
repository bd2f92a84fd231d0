//! Background sync service with exponential backoff.
//!
//! A daemon task wakes on a timer and drains one batch per firing. On
//! success the interval resets to its base (0.5 s); on failure it doubles,
//! capped at 30 s. `sync_now()` bypasses the timer and drains everything it
//! can before returning.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::sync::auth::AuthClient;
use crate::sync::batch::{batch_sync, BatchSyncResult, DEFAULT_BATCH_SIZE};
use crate::sync::queue::OfflineQueue;

/// Base interval between sync passes.
pub const BASE_INTERVAL: Duration = Duration::from_millis(500);

/// Upper bound for the failure backoff.
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Pure backoff progression: double on failure, cap at [`MAX_BACKOFF`].
#[must_use]
pub fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(MAX_BACKOFF)
}

/// Background drain service bound to one scope.
pub struct BackgroundSyncService {
    queue: Arc<OfflineQueue>,
    auth: Arc<AuthClient>,
    scope_key: String,
    server_url: String,
    client: reqwest::Client,
    base_interval: Duration,
    backoff: Mutex<Duration>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl BackgroundSyncService {
    #[must_use]
    pub fn new(
        queue: Arc<OfflineQueue>,
        auth: Arc<AuthClient>,
        scope_key: String,
        server_url: String,
    ) -> Self {
        Self::with_interval(queue, auth, scope_key, server_url, BASE_INTERVAL)
    }

    /// Construct with an explicit base interval (fast intervals for tests).
    #[must_use]
    pub fn with_interval(
        queue: Arc<OfflineQueue>,
        auth: Arc<AuthClient>,
        scope_key: String,
        server_url: String,
        base_interval: Duration,
    ) -> Self {
        Self {
            queue,
            auth,
            scope_key,
            server_url,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            base_interval,
            backoff: Mutex::new(base_interval),
            shutdown: Mutex::new(None),
            handle: Mutex::new(None),
        }
    }

    /// Whether the daemon task is running.
    pub async fn is_running(&self) -> bool {
        self.shutdown.lock().await.is_some()
    }

    /// Start the daemon timer. Idempotent.
    pub async fn start(self: &Arc<Self>) {
        let mut shutdown_slot = self.shutdown.lock().await;
        if shutdown_slot.is_some() {
            return;
        }
        let (tx, mut rx) = watch::channel(false);
        *shutdown_slot = Some(tx);
        drop(shutdown_slot);

        let service = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                let wait = *service.backoff.lock().await;
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = rx.changed() => {
                        if *rx.borrow() {
                            break;
                        }
                    }
                }
                service.perform_sync().await;
            }
        });
        *self.handle.lock().await = Some(handle);
    }

    /// Stop the daemon. Idempotent; safe to call twice.
    pub async fn stop(&self) {
        let sender = self.shutdown.lock().await.take();
        if let Some(sender) = sender {
            let _ = sender.send(true);
        }
        let handle = self.handle.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// One timed sync pass: adjusts the backoff according to the outcome.
    pub async fn perform_sync(&self) -> Option<BatchSyncResult> {
        match self.sync_once().await {
            Ok(result) => {
                *self.backoff.lock().await = self.base_interval;
                Some(result)
            }
            Err(err) => {
                let mut backoff = self.backoff.lock().await;
                *backoff = next_backoff(*backoff);
                warn!(%err, backoff_secs = backoff.as_secs_f64(), "background sync failed; backing off");
                None
            }
        }
    }

    async fn sync_once(&self) -> Result<BatchSyncResult> {
        let token = self
            .auth
            .get_access_token()
            .ok_or_else(|| Error::Auth("No access token available".to_string()))?;
        batch_sync(
            &self.client,
            &self.queue,
            &self.scope_key,
            &self.server_url,
            &token,
            DEFAULT_BATCH_SIZE,
        )
        .await
    }

    /// Explicit flush: drain batches until the queue is empty or a pass
    /// makes no progress.
    pub async fn sync_now(&self) -> Result<BatchSyncResult> {
        let mut total = BatchSyncResult::default();
        loop {
            let pass = self.sync_once().await?;
            total.attempted += pass.attempted;
            total.delivered += pass.delivered;
            total.failed += pass.failed;
            let remaining = self.queue.size(&self.scope_key).await?;
            if remaining == 0 || pass.delivered == 0 {
                break;
            }
            debug!(remaining, "sync_now continuing drain");
        }
        *self.backoff.lock().await = self.base_interval;
        Ok(total)
    }

    /// Current backoff value, for diagnostics.
    pub async fn current_backoff(&self) -> Duration {
        *self.backoff.lock().await
    }
}
