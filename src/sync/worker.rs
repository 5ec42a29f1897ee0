use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use super::engine::SyncEngine;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

/// Serialized polling loop: each pass runs to completion before the next
/// delay starts, so passes never overlap even when a pass takes longer
/// than the interval. A failed pass yields no update; the next one retries.
pub async fn sync_loop(engine: Arc<SyncEngine>, interval: Duration, cancel_token: CancellationToken) {
    loop {
        match engine.sync_once().await {
            Ok(()) => log_info!("sync pass complete"),
            Err(err) => log_warn!("sync pass failed: {err:#}"),
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = cancel_token.cancelled() => {
                log_info!("sync loop shutting down");
                break;
            }
        }
    }
}

/// Owns the sync loop task: start spawns it, stop cancels at the next loop
/// boundary and joins.
pub struct SyncController {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl SyncController {
    pub fn new() -> Self {
        Self {
            handle: None,
            cancel_token: None,
        }
    }

    pub fn start(&mut self, engine: Arc<SyncEngine>, interval: Duration) -> Result<()> {
        if self.handle.is_some() {
            bail!("sync already active");
        }

        let cancel_token = CancellationToken::new();
        let token_clone = cancel_token.clone();

        let handle = tokio::spawn(sync_loop(engine, interval, token_clone));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("sync loop task failed to join")
                .map(|_| ())
        } else {
            Ok(())
        }
    }
}

impl Default for SyncController {
    fn default() -> Self {
        Self::new()
    }
}
