//! Remote synchronization: shared-storage backend abstraction, the
//! reconciliation engine, active-session coordination and the polling
//! worker.

mod active;
mod engine;
pub mod remote;
mod worker;

pub use engine::SyncEngine;
pub use remote::{ChangeList, DirRemote, RemoteEntry, RemoteStorage};
pub use worker::{sync_loop, SyncController};

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};

    use crate::consolidate::ConsolidationConfig;
    use crate::db::testing::open_temp_db;
    use crate::db::{Database, Direction};
    use crate::snapshot::{active_file_name, history_file_name, ActiveSessionFile};
    use crate::sync::remote::memory::MemoryRemote;
    use crate::timer::{EventBus, SharedState, StopwatchEvent, StopwatchState};

    use super::*;

    fn build_engine(
        db: Database,
        remote: Arc<MemoryRemote>,
        uuid: &str,
    ) -> (Arc<SyncEngine>, SharedState, EventBus) {
        let state: SharedState = Arc::new(tokio::sync::Mutex::new(StopwatchState::new()));
        let events = EventBus::default();
        let engine = Arc::new(SyncEngine::new(
            db,
            remote,
            uuid.to_string(),
            state.clone(),
            events.clone(),
            ConsolidationConfig::default(),
        ));
        (engine, state, events)
    }

    #[tokio::test]
    async fn snapshot_round_trips_between_devices() {
        let remote = Arc::new(MemoryRemote::new());

        let (db_a, _dir_a) = open_temp_db();
        db_a.get_or_create_device("dev-a").await.unwrap();
        db_a.set_base_hours("dev-a", 3.5).await.unwrap();
        let start = Utc::now() - Duration::hours(2);
        db_a.insert_session("dev-a", start, 30.0).await.unwrap();
        db_a.insert_session("dev-a", start + Duration::hours(1), -10.0)
            .await
            .unwrap();

        let (engine_a, _, _) = build_engine(db_a, remote.clone(), "dev-a");
        engine_a.upload_snapshot().await.unwrap();

        let (db_b, _dir_b) = open_temp_db();
        db_b.get_or_create_device("dev-b").await.unwrap();
        let (engine_b, _, _) = build_engine(db_b.clone(), remote, "dev-b");
        engine_b.sync_once().await.unwrap();

        let device_a = db_b.get_device("dev-a").await.unwrap().unwrap();
        assert_eq!(device_a.base_hours, 3.5);

        let sessions = db_b.list_sessions_for_device("dev-a").await.unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].duration_minutes, 30.0);
        assert_eq!(sessions[1].duration_minutes, -10.0);
        assert_eq!(
            sessions[0].start_time.timestamp_millis(),
            start.timestamp_millis()
        );
    }

    #[tokio::test]
    async fn reconciliation_updates_deletes_and_inserts() {
        let remote = Arc::new(MemoryRemote::new());
        let start = Utc::now() - Duration::hours(3);

        // Device A's authoritative state: one session, updated duration.
        let (db_a, _dir_a) = open_temp_db();
        db_a.get_or_create_device("dev-a").await.unwrap();
        db_a.insert_session("dev-a", start, 25.0).await.unwrap();
        let (engine_a, _, _) = build_engine(db_a, remote.clone(), "dev-a");
        engine_a.upload_snapshot().await.unwrap();

        // Device B holds a stale copy: wrong duration plus a session that
        // no longer exists remotely.
        let (db_b, _dir_b) = open_temp_db();
        db_b.get_or_create_device("dev-b").await.unwrap();
        db_b.get_or_create_device("dev-a").await.unwrap();
        db_b.insert_session("dev-a", start, 99.0).await.unwrap();
        db_b.insert_session("dev-a", start + Duration::hours(1), 5.0)
            .await
            .unwrap();

        let (engine_b, _, _) = build_engine(db_b.clone(), remote, "dev-b");
        engine_b.sync_once().await.unwrap();

        let sessions = db_b.list_sessions_for_device("dev-a").await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].duration_minutes, 25.0);
    }

    #[tokio::test]
    async fn newer_local_session_force_ends_older_remote() {
        let remote = Arc::new(MemoryRemote::new());
        let remote_start = Utc::now() - Duration::minutes(30);
        let local_start = Utc::now() - Duration::minutes(10);

        let record = ActiveSessionFile::live(remote_start, Direction::Forward);
        remote
            .upload(&active_file_name("dev-b"), record.to_bytes().unwrap())
            .await
            .unwrap();

        let (db_a, _dir_a) = open_temp_db();
        db_a.get_or_create_device("dev-a").await.unwrap();
        let (engine, state, _) = build_engine(db_a, remote.clone(), "dev-a");
        state
            .lock()
            .await
            .begin_local(local_start, Direction::Forward);

        engine.sync_once().await.unwrap();

        let bytes = remote.contents(&active_file_name("dev-b")).unwrap();
        let ended = ActiveSessionFile::from_bytes(&bytes).unwrap();
        assert_eq!(
            ended.end_time.map(|t| t.timestamp_millis()),
            Some(local_start.timestamp_millis())
        );

        // Display stays on the local session.
        let guard = state.lock().await;
        assert!(guard.is_running_local());
        assert!(guard.remote.is_none());
    }

    #[tokio::test]
    async fn older_local_session_displays_newer_remote() {
        let remote = Arc::new(MemoryRemote::new());
        let local_start = Utc::now() - Duration::minutes(30);
        let remote_start = Utc::now() - Duration::minutes(10);

        let record = ActiveSessionFile::live(remote_start, Direction::Backward);
        remote
            .upload(&active_file_name("dev-b"), record.to_bytes().unwrap())
            .await
            .unwrap();

        let (db_a, _dir_a) = open_temp_db();
        db_a.get_or_create_device("dev-a").await.unwrap();
        let (engine, state, events) = build_engine(db_a, remote.clone(), "dev-a");
        let mut rx = events.subscribe();
        state
            .lock()
            .await
            .begin_local(local_start, Direction::Forward);

        engine.sync_once().await.unwrap();

        let guard = state.lock().await;
        let displayed = guard.displayed_session().unwrap();
        assert_eq!(
            displayed.started_at.timestamp_millis(),
            remote_start.timestamp_millis()
        );
        assert_eq!(displayed.direction, Direction::Backward);
        drop(guard);

        // The remote record was not force-ended.
        let bytes = remote.contents(&active_file_name("dev-b")).unwrap();
        assert!(ActiveSessionFile::from_bytes(&bytes).unwrap().is_live());

        let event = rx.try_recv().unwrap();
        assert!(matches!(
            event,
            StopwatchEvent::RemoteSessionStarted { ref device, .. } if device == "dev-b"
        ));
    }

    #[tokio::test]
    async fn own_record_ended_remotely_becomes_ledger_session() {
        let remote = Arc::new(MemoryRemote::new());
        let start = Utc::now() - Duration::minutes(45);
        let end = Utc::now() - Duration::minutes(15);

        let mut record = ActiveSessionFile::live(start, Direction::Forward);
        record.end_time = Some(end);
        remote
            .upload(&active_file_name("dev-a"), record.to_bytes().unwrap())
            .await
            .unwrap();

        let (db_a, _dir_a) = open_temp_db();
        db_a.get_or_create_device("dev-a").await.unwrap();
        let (engine, state, _) = build_engine(db_a.clone(), remote, "dev-a");
        state.lock().await.begin_local(start, Direction::Forward);

        engine.sync_once().await.unwrap();

        // Exactly one session, spanning [start, end), and the timer is idle.
        let sessions = db_a.list_sessions_for_device("dev-a").await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert!((sessions[0].duration_minutes - 30.0).abs() < 0.01);
        assert!(!state.lock().await.is_running_local());
    }

    #[tokio::test]
    async fn deleted_active_file_stops_displayed_remote_session() {
        let remote = Arc::new(MemoryRemote::new());
        let remote_start = Utc::now() - Duration::minutes(5);

        let record = ActiveSessionFile::live(remote_start, Direction::Forward);
        remote
            .upload(&active_file_name("dev-b"), record.to_bytes().unwrap())
            .await
            .unwrap();

        let (db_a, _dir_a) = open_temp_db();
        db_a.get_or_create_device("dev-a").await.unwrap();
        let (engine, state, events) = build_engine(db_a, remote.clone(), "dev-a");
        engine.sync_once().await.unwrap();
        assert!(state.lock().await.remote.is_some());

        let mut rx = events.subscribe();
        remote.delete(&active_file_name("dev-b")).await.unwrap();
        engine.sync_once().await.unwrap();

        assert!(state.lock().await.remote.is_none());
        let stopped = rx.try_recv().unwrap();
        assert!(matches!(
            stopped,
            StopwatchEvent::RemoteSessionStopped { ref device } if device == "dev-b"
        ));
    }

    #[tokio::test]
    async fn corrupt_file_does_not_block_the_batch() {
        let remote = Arc::new(MemoryRemote::new());
        let start = Utc::now() - Duration::hours(1);

        remote
            .upload(&history_file_name("dev-c"), b"not json".to_vec())
            .await
            .unwrap();

        let (db_b, _dir_b) = open_temp_db();
        db_b.get_or_create_device("dev-b").await.unwrap();
        db_b.insert_session("dev-b", start, 12.0).await.unwrap();
        let (engine_b, _, _) = build_engine(db_b, remote.clone(), "dev-b");
        engine_b.upload_snapshot().await.unwrap();

        let (db_a, _dir_a) = open_temp_db();
        db_a.get_or_create_device("dev-a").await.unwrap();
        let (engine, _, _) = build_engine(db_a.clone(), remote, "dev-a");
        engine.sync_once().await.unwrap();

        // The valid snapshot still landed.
        let sessions = db_a.list_sessions_for_device("dev-b").await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].duration_minutes, 12.0);
    }

    #[tokio::test]
    async fn publish_preempts_other_live_records() {
        let remote = Arc::new(MemoryRemote::new());
        let other_start = Utc::now() - Duration::minutes(20);

        let record = ActiveSessionFile::live(other_start, Direction::Forward);
        remote
            .upload(&active_file_name("dev-b"), record.to_bytes().unwrap())
            .await
            .unwrap();

        let (db_a, _dir_a) = open_temp_db();
        db_a.get_or_create_device("dev-a").await.unwrap();
        let (engine, state, _) = build_engine(db_a, remote.clone(), "dev-a");
        engine.sync_once().await.unwrap();

        let now = Utc::now();
        state.lock().await.begin_local(now, Direction::Forward);
        engine
            .publish_active_session(now, Direction::Forward)
            .await
            .unwrap();

        let theirs = ActiveSessionFile::from_bytes(
            &remote.contents(&active_file_name("dev-b")).unwrap(),
        )
        .unwrap();
        assert_eq!(
            theirs.end_time.map(|t| t.timestamp_millis()),
            Some(now.timestamp_millis())
        );

        let ours = ActiveSessionFile::from_bytes(
            &remote.contents(&active_file_name("dev-a")).unwrap(),
        )
        .unwrap();
        assert!(ours.is_live());
        assert_eq!(
            ours.start_time.timestamp_millis(),
            now.timestamp_millis()
        );
    }

    #[tokio::test]
    async fn stale_own_active_file_is_deleted_when_idle() {
        let remote = Arc::new(MemoryRemote::new());
        let record = ActiveSessionFile::live(Utc::now() - Duration::hours(2), Direction::Forward);
        remote
            .upload(&active_file_name("dev-a"), record.to_bytes().unwrap())
            .await
            .unwrap();

        let (db_a, _dir_a) = open_temp_db();
        db_a.get_or_create_device("dev-a").await.unwrap();
        let (engine, _, _) = build_engine(db_a, remote.clone(), "dev-a");
        engine.sync_once().await.unwrap();

        assert!(remote.contents(&active_file_name("dev-a")).is_none());
    }

    #[tokio::test]
    async fn bootstrap_restores_remote_session_from_device_rows() {
        let (db_a, _dir_a) = open_temp_db();
        db_a.get_or_create_device("dev-a").await.unwrap();
        db_a.get_or_create_device("dev-b").await.unwrap();
        let since = Utc::now() - Duration::minutes(8);
        db_a.set_active_session("dev-b", since, Direction::Backward)
            .await
            .unwrap();

        let remote = Arc::new(MemoryRemote::new());
        let (engine, state, _) = build_engine(db_a, remote, "dev-a");
        engine.bootstrap().await.unwrap();

        let guard = state.lock().await;
        let (device, session) = guard.remote.as_ref().unwrap();
        assert_eq!(device, "dev-b");
        assert_eq!(session.direction, Direction::Backward);
    }
}
