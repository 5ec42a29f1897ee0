use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, sync::RwLock, time::Duration};

const DEFAULT_SYNC_INTERVAL_SECS: u64 = 300;
const DEBUG_SYNC_INTERVAL_SECS: u64 = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Shared directory all devices read and write. When unset, the binary
    /// falls back to `shared/` inside its data directory.
    pub remote_dir: Option<PathBuf>,
    pub interval_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            remote_dir: None,
            interval_secs: DEFAULT_SYNC_INTERVAL_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UserSettings {
    sync: SyncSettings,
    retention_days: i64,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            sync: SyncSettings::default(),
            retention_days: 7,
        }
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<UserSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_default()
        } else {
            UserSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn sync(&self) -> SyncSettings {
        self.data.read().unwrap().sync.clone()
    }

    pub fn retention_days(&self) -> i64 {
        self.data.read().unwrap().retention_days
    }

    /// The effective polling interval. `TWOWATCH_DEBUG=1` shortens it for
    /// watching two instances hand a session back and forth.
    pub fn sync_interval(&self) -> Duration {
        if std::env::var("TWOWATCH_DEBUG").as_deref() == Ok("1") {
            return Duration::from_secs(DEBUG_SYNC_INTERVAL_SECS);
        }
        Duration::from_secs(self.data.read().unwrap().sync.interval_secs)
    }

    pub fn update_sync(&self, settings: SyncSettings) -> Result<()> {
        {
            let mut guard = self.data.write().unwrap();
            guard.sync = settings;
            self.persist(&guard)?;
        }
        Ok(())
    }

    fn persist(&self, data: &UserSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let store = SettingsStore::new(dir.path().join("settings.json")).unwrap();
        assert!(store.sync().remote_dir.is_none());
        assert_eq!(store.sync().interval_secs, 300);
        assert_eq!(store.retention_days(), 7);
    }

    #[test]
    fn update_persists_and_reloads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");

        let store = SettingsStore::new(path.clone()).unwrap();
        store
            .update_sync(SyncSettings {
                remote_dir: Some(dir.path().join("shared")),
                interval_secs: 60,
            })
            .unwrap();

        let reopened = SettingsStore::new(path).unwrap();
        assert_eq!(reopened.sync().interval_secs, 60);
        assert_eq!(reopened.sync().remote_dir, Some(dir.path().join("shared")));
    }

    #[test]
    fn corrupt_file_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "not json").unwrap();

        let store = SettingsStore::new(path).unwrap();
        assert_eq!(store.retention_days(), 7);
    }
}
