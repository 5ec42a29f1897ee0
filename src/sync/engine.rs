use std::collections::HashMap;

use anyhow::{Context, Result};
use log::{debug, warn};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::consolidate::{run_consolidation, ConsolidationConfig};
use crate::db::Database;
use crate::snapshot::{
    device_from_active_file, device_from_history_file, history_file_name, ActiveSessionFile,
    DeviceSnapshot, SnapshotSession,
};
use crate::timer::{EventBus, SharedState, StopwatchEvent};

use super::remote::{RemoteEntry, RemoteStorage};

/// Periodic bidirectional reconciliation with the shared storage backend.
///
/// One engine instance serves one device. It owns a transient cache of the
/// other devices' active-session records; ledger truth always lives in the
/// store.
pub struct SyncEngine {
    pub(crate) db: Database,
    pub(crate) remote: Arc<dyn RemoteStorage>,
    pub(crate) self_uuid: String,
    pub(crate) state: SharedState,
    pub(crate) events: EventBus,
    pub(crate) active_sessions: Mutex<HashMap<String, ActiveSessionFile>>,
    cursor: Mutex<Option<String>>,
    consolidation: ConsolidationConfig,
}

impl SyncEngine {
    pub fn new(
        db: Database,
        remote: Arc<dyn RemoteStorage>,
        self_uuid: String,
        state: SharedState,
        events: EventBus,
        consolidation: ConsolidationConfig,
    ) -> Self {
        Self {
            db,
            remote,
            self_uuid,
            state,
            events,
            active_sessions: Mutex::new(HashMap::new()),
            cursor: Mutex::new(None),
            consolidation,
        }
    }

    /// One full sync pass: poll changed files, reconcile each one
    /// independently, re-evaluate the cross-device active session, then
    /// consolidate. Transport failure aborts the pass; the next poll
    /// retries from the stored cursor.
    pub async fn sync_once(&self) -> Result<()> {
        let cursor = self.load_cursor().await;
        let changes = self
            .remote
            .list_changes(cursor.as_deref())
            .await
            .context("remote listing failed")?;
        self.store_cursor(changes.cursor).await;

        let mut data_changed = false;
        for entry in changes.entries {
            match self.process_entry(&entry).await {
                Ok(changed) => data_changed |= changed,
                // One bad file must not block the rest of the batch.
                Err(err) => warn!("Sync: skipping {}: {err:#}", entry.name),
            }
        }

        self.check_running_remote().await;

        if data_changed {
            self.notify_base_time().await;
        }

        match run_consolidation(&self.db, &self.self_uuid, &self.consolidation).await {
            Ok(true) => debug!("Post-sync consolidation applied changes"),
            Ok(false) => {}
            Err(err) => warn!("Post-sync consolidation failed: {err:#}"),
        }

        Ok(())
    }

    async fn load_cursor(&self) -> Option<String> {
        if let Some(cursor) = self.cursor.lock().await.clone() {
            return Some(cursor);
        }
        match self.db.get_sync_cursor(&self.self_uuid).await {
            Ok(cursor) => cursor,
            Err(err) => {
                warn!("Failed to read sync cursor: {err:#}");
                None
            }
        }
    }

    async fn store_cursor(&self, cursor: String) {
        let mut guard = self.cursor.lock().await;
        if guard.as_deref() == Some(cursor.as_str()) {
            return;
        }
        *guard = Some(cursor.clone());
        drop(guard);

        if let Err(err) = self
            .db
            .set_sync_cursor(&self.self_uuid, Some(cursor))
            .await
        {
            warn!("Failed to persist sync cursor: {err:#}");
        }
    }

    /// Reconcile one changed remote file. Returns whether local history
    /// data changed (active-session files never count unless they end one
    /// of our own sessions).
    async fn process_entry(&self, entry: &RemoteEntry) -> Result<bool> {
        if let Some(device) = device_from_active_file(&entry.name) {
            let device = device.to_string();
            if entry.is_deleted {
                self.handle_active_deleted(&device).await;
                return Ok(false);
            }
            let bytes = self.remote.download(&entry.path).await?;
            let file = match ActiveSessionFile::from_bytes(&bytes) {
                Ok(file) => file,
                Err(err) => {
                    // Ambiguous record: treat as absent rather than guess.
                    warn!("Undecodable active-session file {}: {err:#}", entry.name);
                    self.handle_active_deleted(&device).await;
                    return Ok(false);
                }
            };
            return self.apply_active_file(&device, file).await;
        }

        let Some(device) = device_from_history_file(&entry.name) else {
            return Ok(false);
        };

        if device == self.self_uuid {
            return Ok(false);
        }

        if entry.is_deleted {
            // TODO: decide whether a deleted snapshot should drop the
            // device row and its sessions here.
            debug!("Ignoring deleted history snapshot {}", entry.name);
            return Ok(false);
        }

        let bytes = self.remote.download(&entry.path).await?;
        let snapshot = DeviceSnapshot::from_bytes(&bytes)?;
        self.reconcile_snapshot(snapshot).await
    }

    /// Apply a foreign device's snapshot to the local store. The remote is
    /// authoritative for its own history: differing durations are adopted,
    /// local-only sessions deleted, remote-only sessions inserted.
    async fn reconcile_snapshot(&self, snapshot: DeviceSnapshot) -> Result<bool> {
        if snapshot.uuid == self.self_uuid {
            return Ok(false);
        }

        let device = self.db.get_or_create_device(&snapshot.uuid).await?;
        let mut changed = false;

        if device.base_hours != snapshot.base_hours {
            self.db
                .set_base_hours(&snapshot.uuid, snapshot.base_hours)
                .await?;
            changed = true;
        }

        // Join on start time at millisecond precision.
        let mut remote_by_start: HashMap<i64, &SnapshotSession> = snapshot
            .sessions
            .iter()
            .map(|s| (s.start_time.timestamp_millis(), s))
            .collect();

        let local_sessions = self.db.list_sessions_for_device(&snapshot.uuid).await?;
        for local in &local_sessions {
            let key = local.start_time.timestamp_millis();
            match remote_by_start.remove(&key) {
                Some(remote) => {
                    if remote.minutes != local.duration_minutes {
                        self.db
                            .update_session_minutes(local.id, remote.minutes)
                            .await?;
                        changed = true;
                    }
                }
                None => {
                    self.db.delete_session(local.id).await?;
                    changed = true;
                }
            }
        }

        for remote in remote_by_start.into_values() {
            self.db
                .insert_session(&snapshot.uuid, remote.start_time, remote.minutes)
                .await?;
            changed = true;
        }

        Ok(changed)
    }

    /// Serialize this device's ledger and base hours to its remote slot,
    /// replacing any previous snapshot.
    pub async fn upload_snapshot(&self) -> Result<()> {
        let Some(device) = self.db.get_device(&self.self_uuid).await? else {
            // Nothing persisted yet, nothing to publish.
            return Ok(());
        };

        let sessions = self.db.list_sessions_for_device(&self.self_uuid).await?;
        let snapshot = DeviceSnapshot {
            uuid: device.uuid,
            base_hours: device.base_hours,
            sessions: sessions.iter().map(SnapshotSession::from).collect(),
        };

        self.remote
            .upload(&history_file_name(&self.self_uuid), snapshot.to_bytes()?)
            .await
    }

    /// Recompute the shared total and broadcast it.
    pub(crate) async fn notify_base_time(&self) {
        match self.db.total_time().await {
            Ok(total) => {
                self.state.lock().await.base_hours = total;
                self.events.emit(StopwatchEvent::BaseTimeUpdated(total));
            }
            Err(err) => warn!("Failed to recompute total time: {err:#}"),
        }
    }
}
