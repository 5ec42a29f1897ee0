use chrono::{DateTime, Utc};

use crate::db::models::LedgerSession;

use super::config::ConsolidationConfig;
use super::overlap::truncate_overlaps;

/// Mutations one consolidation pass wants to apply. Applied atomically so a
/// partial failure can never fold a session into base hours while leaving
/// its row behind.
#[derive(Debug, Default)]
pub struct ConsolidationPlan {
    /// Truncated own sessions still inside the retention window: their
    /// shortened duration is persisted without deleting the row.
    pub write_backs: Vec<(i64, f64)>,
    /// Own sessions old enough to fold: deleted after their net duration
    /// moves into `base_hours`.
    pub fold_ids: Vec<i64>,
    pub fold_minutes: f64,
}

impl ConsolidationPlan {
    pub fn is_empty(&self) -> bool {
        self.write_backs.is_empty() && self.fold_ids.is_empty()
    }
}

/// Pure planning step over the full ledger (all devices, sorted by start).
///
/// Foreign sessions participate in overlap truncation but are never folded
/// or rewritten here; their owning device will reconcile them itself.
pub fn plan_consolidation(
    mut sessions: Vec<LedgerSession>,
    self_uuid: &str,
    now: DateTime<Utc>,
    config: &ConsolidationConfig,
) -> ConsolidationPlan {
    sessions.sort_by_key(|s| s.start_time);
    let truncated = truncate_overlaps(&mut sessions);

    let fold_before = now - config.retention;
    let mut plan = ConsolidationPlan::default();

    for session in sessions {
        if session.device_uuid != self_uuid {
            continue;
        }

        if session.end_time() <= fold_before {
            plan.fold_minutes += session.duration_minutes;
            plan.fold_ids.push(session.id);
        } else if truncated.contains(&session.id) {
            plan.write_backs.push((session.id, session.duration_minutes));
        }
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn session(id: i64, device: &str, start: DateTime<Utc>, minutes: f64) -> LedgerSession {
        LedgerSession {
            id,
            device_uuid: device.into(),
            start_time: start,
            duration_minutes: minutes,
        }
    }

    #[test]
    fn old_sessions_fold_recent_ones_stay() {
        let now = Utc::now();
        let config = ConsolidationConfig::default();
        let sessions = vec![
            session(1, "me", now - Duration::days(8), 30.0),
            session(2, "me", now - Duration::days(3), 45.0),
        ];

        let plan = plan_consolidation(sessions, "me", now, &config);
        assert_eq!(plan.fold_ids, vec![1]);
        assert_eq!(plan.fold_minutes, 30.0);
        assert!(plan.write_backs.is_empty());
    }

    #[test]
    fn foreign_sessions_are_never_folded() {
        let now = Utc::now();
        let config = ConsolidationConfig::default();
        let sessions = vec![session(1, "other", now - Duration::days(30), 30.0)];

        let plan = plan_consolidation(sessions, "me", now, &config);
        assert!(plan.is_empty());
    }

    #[test]
    fn truncated_recent_session_is_written_back() {
        let now = Utc::now();
        let config = ConsolidationConfig::default();
        let start = now - Duration::days(2);
        let sessions = vec![
            session(1, "me", start, 60.0),
            session(2, "other", start + Duration::minutes(20), 10.0),
        ];

        let plan = plan_consolidation(sessions, "me", now, &config);
        assert!(plan.fold_ids.is_empty());
        assert_eq!(plan.write_backs, vec![(1, 20.0)]);
    }

    #[test]
    fn truncation_applies_before_folding() {
        let now = Utc::now();
        let config = ConsolidationConfig::default();
        let start = now - Duration::days(10);
        let sessions = vec![
            session(1, "me", start, 60.0),
            session(2, "other", start + Duration::minutes(15), 5.0),
        ];

        let plan = plan_consolidation(sessions, "me", now, &config);
        // The own session folds with its truncated 15 minutes, not 60.
        assert_eq!(plan.fold_ids, vec![1]);
        assert_eq!(plan.fold_minutes, 15.0);
    }
}
