//! Session consolidation: folds this device's old ledger sessions into its
//! base hours and resolves overlaps so the shared total never double-counts.

mod config;
mod overlap;
mod plan;

pub use config::ConsolidationConfig;
pub use overlap::{merged_net_hours, truncate_overlaps};
pub use plan::{plan_consolidation, ConsolidationPlan};

use anyhow::Result;
use chrono::Utc;
use log::{debug, info};
use rusqlite::params;

use crate::db::Database;

/// Run one consolidation pass for `self_uuid`. Returns whether anything in
/// the ledger changed. The plan is applied in a single transaction; on
/// failure the ledger stays unoptimized but correct, and the next pass
/// retries.
pub async fn run_consolidation(
    db: &Database,
    self_uuid: &str,
    config: &ConsolidationConfig,
) -> Result<bool> {
    db.get_or_create_device(self_uuid).await?;
    let sessions = db.list_sessions_ordered().await?;
    let plan = plan_consolidation(sessions, self_uuid, Utc::now(), config);

    if plan.is_empty() {
        debug!("Consolidation: nothing to do");
        return Ok(false);
    }

    let uuid = self_uuid.to_string();
    let folded = plan.fold_ids.len();
    db.execute(move |conn| {
        let tx = conn.transaction()?;

        for (id, minutes) in &plan.write_backs {
            tx.execute(
                "UPDATE sessions SET duration_minutes = ?1 WHERE id = ?2",
                params![minutes, id],
            )?;
        }

        for id in &plan.fold_ids {
            tx.execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
        }

        if !plan.fold_ids.is_empty() {
            tx.execute(
                "UPDATE devices SET base_hours = base_hours + ?1 WHERE uuid = ?2",
                params![plan.fold_minutes / 60.0, uuid],
            )?;
        }

        tx.commit()?;
        Ok(())
    })
    .await?;

    if folded > 0 {
        info!("Consolidated {folded} sessions");
    }

    Ok(true)
}
