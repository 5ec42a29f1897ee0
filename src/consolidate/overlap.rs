//! Overlap resolution between ledger sessions.
//!
//! The rule is "whichever session started next wins": if a session began
//! while an earlier one was still running, the earlier one was interrupted
//! at that moment and is truncated, regardless of which device owns either
//! session or which direction they count in.

use crate::db::models::LedgerSession;

/// Truncate every session interrupted by its successor, in place.
/// `sessions` must be sorted by start time ascending. Returns the ids of
/// sessions whose duration actually changed.
pub fn truncate_overlaps(sessions: &mut [LedgerSession]) -> Vec<i64> {
    let mut truncated = Vec::new();

    for i in 0..sessions.len().saturating_sub(1) {
        let next_start = sessions[i + 1].start_time;
        let current = &mut sessions[i];
        if next_start < current.end_time() {
            current.set_end_time(next_start);
            truncated.push(current.id);
        }
    }

    truncated
}

/// Net signed hours of a session list after overlap resolution.
pub fn merged_net_hours(mut sessions: Vec<LedgerSession>) -> f64 {
    sessions.sort_by_key(|s| s.start_time);
    truncate_overlaps(&mut sessions);
    sessions.iter().map(|s| s.hours()).sum()
}
