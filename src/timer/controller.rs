//! Local stopwatch control.
//!
//! Start/pause drive the shared state, the persisted device row and the
//! shared-storage active record together. Ledger writes and uploads are
//! best effort where losing them only costs a later reconciliation pass.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use log::warn;

use crate::consolidate::{run_consolidation, ConsolidationConfig};
use crate::db::{Database, Direction};
use crate::sync::SyncEngine;
use crate::timer::{EventBus, RunState, SharedState, StopwatchEvent};

pub struct TimingController {
    db: Database,
    engine: Arc<SyncEngine>,
    state: SharedState,
    events: EventBus,
    self_uuid: String,
    consolidation: ConsolidationConfig,
}

impl TimingController {
    /// Ensures the device row exists and seeds the shared total from the
    /// store. A failed total read starts the display at zero; the first
    /// sync pass corrects it.
    pub async fn init(
        db: Database,
        engine: Arc<SyncEngine>,
        state: SharedState,
        events: EventBus,
        self_uuid: String,
        consolidation: ConsolidationConfig,
    ) -> Result<Self> {
        db.get_or_create_device(&self_uuid).await?;

        match db.total_time().await {
            Ok(total) => state.lock().await.base_hours = total,
            Err(err) => warn!("Failed to load accumulated total: {err:#}"),
        }

        Ok(Self {
            db,
            engine,
            state,
            events,
            self_uuid,
            consolidation,
        })
    }

    pub async fn run_state(&self) -> RunState {
        self.state.lock().await.run_state()
    }

    /// The displayed total right now, including the running session.
    pub async fn current_total_hours(&self) -> f64 {
        self.state.lock().await.current_total_hours(Utc::now())
    }

    /// Start timing in `direction`. A session already running here is
    /// paused first, so two local intervals never overlap.
    pub async fn start_session(&self, direction: Direction) -> Result<()> {
        if self.state.lock().await.is_running_local() {
            self.pause_session().await?;
        }

        let now = Utc::now();
        self.state.lock().await.begin_local(now, direction);

        if let Err(err) = self.db.set_active_session(&self.self_uuid, now, direction).await {
            warn!("Failed to persist active session: {err:#}");
        }
        if let Err(err) = self.engine.publish_active_session(now, direction).await {
            warn!("Failed to publish active session: {err:#}");
        }

        Ok(())
    }

    /// Stop the running local session and fold its elapsed time into the
    /// total as a signed ledger entry.
    pub async fn pause_session(&self) -> Result<()> {
        let Some(session) = self.state.lock().await.end_local() else {
            return Ok(());
        };

        let now = Utc::now();
        let elapsed = (now - session.started_at).num_milliseconds() as f64 / 60_000.0;
        let minutes = elapsed.max(0.0) * session.direction.signum();

        self.db
            .append_session(&self.self_uuid, session.started_at, minutes)
            .await;
        if let Err(err) = self.db.clear_active_session(&self.self_uuid).await {
            warn!("Failed to clear persisted active session: {err:#}");
        }

        {
            let mut state = self.state.lock().await;
            state.base_hours += minutes / 60.0;
        }

        if let Err(err) = self.engine.clear_own_active().await {
            warn!("Failed to remove active-session record: {err:#}");
        }
        if let Err(err) = self.engine.upload_snapshot().await {
            warn!("Failed to upload snapshot: {err:#}");
        }

        match run_consolidation(&self.db, &self.self_uuid, &self.consolidation).await {
            Ok(true) => {
                // Folding moved minutes into base hours; re-read the total.
                match self.db.total_time().await {
                    Ok(total) => self.state.lock().await.base_hours = total,
                    Err(err) => warn!("Failed to re-read total after consolidation: {err:#}"),
                }
            }
            Ok(false) => {}
            Err(err) => warn!("Consolidation after pause failed: {err:#}"),
        }

        let total = self.state.lock().await.base_hours;
        self.events.emit(StopwatchEvent::BaseTimeUpdated(total));

        Ok(())
    }

    /// Abandon the running local session without logging any time.
    pub async fn discard_running_session(&self) -> Result<()> {
        if self.state.lock().await.end_local().is_none() {
            return Ok(());
        }

        if let Err(err) = self.db.clear_active_session(&self.self_uuid).await {
            warn!("Failed to clear persisted active session: {err:#}");
        }
        self.engine.clear_own_active().await
    }

    /// Pick up a session that was running when the process last exited,
    /// using the active fields persisted on our own device row.
    pub async fn resume_persisted_session(&self) -> Result<bool> {
        let Some(device) = self.db.get_device(&self.self_uuid).await? else {
            return Ok(false);
        };
        let (Some(since), Some(direction)) =
            (device.active_session_since, device.active_session_direction)
        else {
            return Ok(false);
        };

        self.state.lock().await.begin_local(since, direction);
        Ok(true)
    }

    /// Stop the remote session currently driving the display.
    pub async fn pause_remote_session(&self) -> Result<()> {
        self.engine.end_displayed_remote_session().await
    }
}
