use std::{fs, path::Path};

use anyhow::{Context, Result};
use uuid::Uuid;

/// Stable identity of this installation. Created once and reused across
/// launches; every file in the shared storage is keyed by it.
pub fn load_or_create_device_id(path: &Path) -> Result<String> {
    if path.exists() {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read device id from {}", path.display()))?;
        let id = contents.trim();
        if !id.is_empty() {
            return Ok(id.to_string());
        }
    }

    let id = Uuid::new_v4().to_string();
    fs::write(path, &id)
        .with_context(|| format!("Failed to write device id to {}", path.display()))?;
    Ok(id)
}
