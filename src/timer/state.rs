use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::db::models::Direction;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum RunState {
    Idle,
    RunningLocal,
    RunningRemote,
}

/// A running session as seen by this process, local or remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunningSession {
    pub started_at: DateTime<Utc>,
    pub direction: Direction,
}

/// Shared stopwatch state.
///
/// Local and remote running sessions are tracked independently: during a
/// cross-device handoff both can briefly exist, and the one with the later
/// start time is the authoritative one. The loser is ended through sync,
/// not by dropping it here.
#[derive(Debug, Clone, Default)]
pub struct StopwatchState {
    /// Accumulated total in hours, excluding any currently running session.
    pub base_hours: f64,
    pub local: Option<RunningSession>,
    pub remote: Option<(String, RunningSession)>,
}

pub type SharedState = Arc<Mutex<StopwatchState>>;

impl StopwatchState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running_local(&self) -> bool {
        self.local.is_some()
    }

    /// The session currently driving the display: of the sessions known to
    /// be running, the one that started last wins.
    pub fn displayed_session(&self) -> Option<RunningSession> {
        match (self.local, self.remote.as_ref().map(|(_, s)| *s)) {
            (Some(local), Some(remote)) => {
                if local.started_at >= remote.started_at {
                    Some(local)
                } else {
                    Some(remote)
                }
            }
            (Some(local), None) => Some(local),
            (None, Some(remote)) => Some(remote),
            (None, None) => None,
        }
    }

    pub fn run_state(&self) -> RunState {
        match (self.local, &self.remote) {
            (None, None) => RunState::Idle,
            (Some(local), Some((_, remote))) if remote.started_at > local.started_at => {
                RunState::RunningRemote
            }
            (Some(_), _) => RunState::RunningLocal,
            (None, Some(_)) => RunState::RunningRemote,
        }
    }

    /// Total hours including the elapsed time of the displayed session.
    pub fn current_total_hours(&self, now: DateTime<Utc>) -> f64 {
        let running = self
            .displayed_session()
            .map(|session| {
                let minutes = (now - session.started_at).num_milliseconds() as f64 / 60_000.0;
                minutes.max(0.0) * session.direction.signum() / 60.0
            })
            .unwrap_or(0.0);
        self.base_hours + running
    }

    pub fn begin_local(&mut self, started_at: DateTime<Utc>, direction: Direction) {
        self.local = Some(RunningSession {
            started_at,
            direction,
        });
    }

    pub fn end_local(&mut self) -> Option<RunningSession> {
        self.local.take()
    }

    pub fn set_remote(
        &mut self,
        device: &str,
        started_at: DateTime<Utc>,
        direction: Direction,
    ) -> bool {
        let session = RunningSession {
            started_at,
            direction,
        };
        let changed = self
            .remote
            .as_ref()
            .map(|(d, s)| d != device || *s != session)
            .unwrap_or(true);
        self.remote = Some((device.to_string(), session));
        changed
    }

    /// Clear the tracked remote session if it belongs to `device`.
    pub fn clear_remote(&mut self, device: &str) -> bool {
        if self.remote.as_ref().is_some_and(|(d, _)| d == device) {
            self.remote = None;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, 0).unwrap()
    }

    #[test]
    fn later_session_wins_display() {
        let mut state = StopwatchState::new();
        state.begin_local(at(10, 0), Direction::Forward);
        state.set_remote("dev-b", at(10, 5), Direction::Backward);

        let displayed = state.displayed_session().unwrap();
        assert_eq!(displayed.started_at, at(10, 5));
        assert_eq!(state.run_state(), RunState::RunningRemote);

        // Flip the ordering: local started later, local wins.
        state.begin_local(at(10, 10), Direction::Forward);
        let displayed = state.displayed_session().unwrap();
        assert_eq!(displayed.started_at, at(10, 10));
        assert_eq!(state.run_state(), RunState::RunningLocal);
    }

    #[test]
    fn current_total_counts_direction() {
        let mut state = StopwatchState::new();
        state.base_hours = 2.0;
        state.begin_local(at(10, 0), Direction::Backward);

        let total = state.current_total_hours(at(10, 30));
        assert!((total - 1.5).abs() < 1e-9);
    }

    #[test]
    fn clear_remote_only_matches_owner() {
        let mut state = StopwatchState::new();
        state.set_remote("dev-b", at(10, 0), Direction::Forward);

        assert!(!state.clear_remote("dev-c"));
        assert!(state.clear_remote("dev-b"));
        assert_eq!(state.run_state(), RunState::Idle);
    }
}
