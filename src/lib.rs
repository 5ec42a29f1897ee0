//! Two-directional stopwatch with a shared total across devices.
//!
//! Each device keeps its own SQLite ledger of signed session intervals and
//! publishes it as a JSON snapshot to a shared storage folder; a polling
//! sync engine reconciles foreign snapshots, coordinates the single running
//! session across devices, and folds old sessions into per-device base
//! hours.

pub mod consolidate;
pub mod db;
pub mod device;
pub mod settings;
pub mod snapshot;
pub mod sync;
pub mod timer;
mod utils;

pub use consolidate::{run_consolidation, ConsolidationConfig};
pub use db::{Database, Device, Direction, LedgerSession};
pub use settings::{SettingsStore, SyncSettings};
pub use sync::{DirRemote, RemoteStorage, SyncController, SyncEngine};
pub use timer::{EventBus, RunState, StopwatchEvent, TimingController};
