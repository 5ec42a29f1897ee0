//! Active-session coordination across devices.
//!
//! At most one device holds a live (end-less) active-session record at a
//! time, eventually. When two appear live at once the later start wins and
//! the earlier session is force-ended by writing an `endTime` into its
//! record. Remote active state is mirrored into the local device rows so a
//! fresh launch can pick it up before the first poll.

use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{info, warn};

use crate::db::models::Direction;
use crate::snapshot::{active_file_name, ActiveSessionFile};
use crate::timer::StopwatchEvent;

use super::engine::SyncEngine;

impl SyncEngine {
    /// Seed the active-session cache from the device rows persisted by a
    /// previous run, so a running remote session shows up before the first
    /// poll completes.
    pub async fn bootstrap(&self) -> Result<()> {
        let devices = self.db.list_devices().await?;
        let mut any = false;

        {
            let mut cache = self.active_sessions.lock().await;
            for device in devices {
                if device.uuid == self.self_uuid {
                    continue;
                }
                if let (Some(since), Some(direction)) =
                    (device.active_session_since, device.active_session_direction)
                {
                    cache.insert(device.uuid.clone(), ActiveSessionFile::live(since, direction));
                    any = true;
                }
            }
        }

        if any {
            self.check_running_remote().await;
        }
        Ok(())
    }

    /// Publish our new running session. Any other device's live record is
    /// force-ended (`endTime = our start`) and re-uploaded first, so two
    /// devices never keep running side by side.
    pub async fn publish_active_session(
        &self,
        started_at: DateTime<Utc>,
        direction: Direction,
    ) -> Result<()> {
        let mut preempted = Vec::new();
        {
            let mut cache = self.active_sessions.lock().await;
            for (device, file) in cache.iter_mut() {
                if device != &self.self_uuid && file.is_live() {
                    file.end_time = Some(started_at);
                    preempted.push((device.clone(), file.clone()));
                }
            }
        }

        if !preempted.is_empty() {
            self.write_remote_sessions_to_db().await;
        }

        for (device, ended) in preempted {
            match ended.to_bytes() {
                Ok(bytes) => {
                    if let Err(err) = self.remote.upload(&active_file_name(&device), bytes).await {
                        warn!("Failed to pre-empt session on {device}: {err:#}");
                    } else {
                        info!("Pre-empted running session on {device}");
                    }
                }
                Err(err) => warn!("Failed to encode pre-empted session for {device}: {err:#}"),
            }

            if self.state.lock().await.clear_remote(&device) {
                self.events
                    .emit(StopwatchEvent::RemoteSessionStopped { device });
            }
        }

        let own = ActiveSessionFile::live(started_at, direction);
        let bytes = own.to_bytes()?;
        self.active_sessions
            .lock()
            .await
            .insert(self.self_uuid.clone(), own);

        self.remote
            .upload(&active_file_name(&self.self_uuid), bytes)
            .await
    }

    /// Remove our active-session record from the shared storage.
    pub async fn clear_own_active(&self) -> Result<()> {
        self.active_sessions
            .lock()
            .await
            .remove(&self.self_uuid);
        self.remote
            .delete(&active_file_name(&self.self_uuid))
            .await
    }

    /// Ask the currently displayed remote session to stop now: its record
    /// gains `endTime = now` and a zero-minute marker session is logged
    /// locally so consolidation and upload still run.
    pub async fn end_displayed_remote_session(&self) -> Result<()> {
        let now = Utc::now();

        let target = {
            let cache = self.active_sessions.lock().await;
            cache
                .iter()
                .find(|(device, file)| *device != &self.self_uuid && file.is_live())
                .map(|(device, file)| (device.clone(), file.clone()))
        };

        if let Some((device, mut file)) = target {
            file.end_time = Some(now);
            let bytes = file.to_bytes()?;
            self.remote
                .upload(&active_file_name(&device), bytes)
                .await?;
            self.active_sessions
                .lock()
                .await
                .insert(device.clone(), file);

            if self.state.lock().await.clear_remote(&device) {
                self.events
                    .emit(StopwatchEvent::RemoteSessionStopped { device });
            }
            self.write_remote_sessions_to_db().await;
        }

        self.db.append_session(&self.self_uuid, now, 0.0).await;
        self.upload_snapshot().await
    }

    /// A changed active-session file arrived. Returns whether local ledger
    /// data changed (only possible for our own record gaining an end time).
    pub(crate) async fn apply_active_file(
        &self,
        device: &str,
        file: ActiveSessionFile,
    ) -> Result<bool> {
        if device == self.self_uuid {
            return self.apply_own_active_file(file).await;
        }

        self.active_sessions
            .lock()
            .await
            .insert(device.to_string(), file);
        self.write_remote_sessions_to_db().await;
        Ok(false)
    }

    /// Our own record came back from the shared storage. If another device
    /// wrote an end time we did not produce, the interval becomes a
    /// completed ledger session here and the local timer stops without
    /// logging a duplicate.
    async fn apply_own_active_file(&self, file: ActiveSessionFile) -> Result<bool> {
        let running_local = self.state.lock().await.is_running_local();

        if !running_local {
            // Stale leftover record; nobody is timing here.
            if file.is_live() {
                self.clear_own_active().await?;
            }
            return Ok(false);
        }

        if file.is_live() {
            self.active_sessions
                .lock()
                .await
                .insert(self.self_uuid.clone(), file);
            return Ok(false);
        }

        if let Some(minutes) = file.ended_minutes() {
            self.db
                .append_session(&self.self_uuid, file.start_time, minutes)
                .await;
        }

        self.state.lock().await.end_local();
        self.active_sessions.lock().await.remove(&self.self_uuid);
        if let Err(err) = self.db.clear_active_session(&self.self_uuid).await {
            warn!("Failed to clear persisted active session: {err:#}");
        }
        if let Err(err) = self.upload_snapshot().await {
            warn!("Failed to upload snapshot after remote end: {err:#}");
        }

        Ok(true)
    }

    /// An active-session file disappeared remotely: that device stopped.
    pub(crate) async fn handle_active_deleted(&self, device: &str) {
        self.active_sessions.lock().await.remove(device);

        if self.state.lock().await.clear_remote(device) {
            self.events.emit(StopwatchEvent::RemoteSessionStopped {
                device: device.to_string(),
            });
        }

        if device != self.self_uuid {
            self.write_remote_sessions_to_db().await;
        }
    }

    /// Enforce the tie-break over everything currently believed live: a
    /// remote session older than our local one is force-ended with
    /// `endTime = local start`; a newer one becomes the displayed session.
    pub(crate) async fn check_running_remote(&self) {
        let live: Vec<(String, ActiveSessionFile)> = {
            let cache = self.active_sessions.lock().await;
            cache
                .iter()
                .filter(|(device, file)| *device != &self.self_uuid && file.is_live())
                .map(|(device, file)| (device.clone(), file.clone()))
                .collect()
        };

        let mut remote_sessions_changed = false;

        for (device, file) in live {
            let local = self.state.lock().await.local;
            let local_wins = local
                .map(|l| l.started_at > file.start_time)
                .unwrap_or(false);

            if local_wins {
                let mut ended = file.clone();
                ended.end_time = local.map(|l| l.started_at);
                match ended.to_bytes() {
                    Ok(bytes) => {
                        match self.remote.upload(&active_file_name(&device), bytes).await {
                            Ok(()) => {
                                info!("Force-ended older session on {device}");
                                self.active_sessions
                                    .lock()
                                    .await
                                    .insert(device.clone(), ended);
                                remote_sessions_changed = true;
                                if self.state.lock().await.clear_remote(&device) {
                                    self.events.emit(StopwatchEvent::RemoteSessionStopped {
                                        device: device.clone(),
                                    });
                                }
                            }
                            Err(err) => {
                                warn!("Failed to force-end session on {device}: {err:#}")
                            }
                        }
                    }
                    Err(err) => warn!("Failed to encode ended session for {device}: {err:#}"),
                }
            } else {
                let changed = self
                    .state
                    .lock()
                    .await
                    .set_remote(&device, file.start_time, file.direction);
                if changed {
                    self.events.emit(StopwatchEvent::RemoteSessionStarted {
                        device,
                        started_at: file.start_time,
                        direction: file.direction,
                    });
                }
            }
        }

        if remote_sessions_changed {
            self.write_remote_sessions_to_db().await;
        }
    }

    /// Mirror the cached remote active sessions into the device rows. Our
    /// own row is managed directly by the timing controller.
    pub(crate) async fn write_remote_sessions_to_db(&self) {
        let devices = match self.db.list_devices().await {
            Ok(devices) => devices,
            Err(err) => {
                warn!("Failed to list devices for active-session mirror: {err:#}");
                return;
            }
        };

        let cache = self.active_sessions.lock().await.clone();

        for device in devices {
            if device.uuid == self.self_uuid {
                continue;
            }

            let live = cache.get(&device.uuid).filter(|file| file.is_live());
            let result = match live {
                Some(file) => {
                    if device.active_session_since != Some(file.start_time)
                        || device.active_session_direction != Some(file.direction)
                    {
                        self.db
                            .set_active_session(&device.uuid, file.start_time, file.direction)
                            .await
                    } else {
                        Ok(())
                    }
                }
                None => {
                    if device.active_session_since.is_some()
                        || device.active_session_direction.is_some()
                    {
                        self.db.clear_active_session(&device.uuid).await
                    } else {
                        Ok(())
                    }
                }
            };

            if let Err(err) = result {
                warn!(
                    "Failed to mirror active session for {}: {err:#}",
                    device.uuid
                );
            }
        }
    }
}
