use chrono::Duration;

/// Tuning for the consolidation pass.
#[derive(Debug, Clone)]
pub struct ConsolidationConfig {
    /// Sessions whose end lies inside this window stay in the ledger so
    /// offline devices can still reconcile them by start time.
    pub retention: Duration,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            retention: Duration::days(7),
        }
    }
}

impl ConsolidationConfig {
    pub fn with_retention_days(days: i64) -> Self {
        Self {
            retention: Duration::days(days),
        }
    }
}
