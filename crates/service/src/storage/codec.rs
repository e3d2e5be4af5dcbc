use std::{collections::HashMap, path::{Path, PathBuf}};
use tokio::fs;

use crate::errors::ServiceError;

/// Immutable copy of the whole map at one point in time.
///
/// `generation` orders snapshots taken from the same store; it is not part of
/// the on-disk format, so a decoded snapshot always starts at 0.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    entries: HashMap<String, String>,
    generation: u64,
}

impl Snapshot {
    pub fn new(entries: HashMap<String, String>, generation: u64) -> Self {
        Self { entries, generation }
    }

    pub fn entries(&self) -> &HashMap<String, String> {
        &self.entries
    }

    pub fn into_entries(self) -> HashMap<String, String> {
        self.entries
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Serialize to a flat JSON object of string keys to string values.
pub fn encode(snapshot: &Snapshot) -> Result<Vec<u8>, ServiceError> {
    serde_json::to_vec(&snapshot.entries).map_err(|e| ServiceError::Persistence(e.to_string()))
}

pub fn decode(bytes: &[u8]) -> Result<Snapshot, ServiceError> {
    let entries: HashMap<String, String> =
        serde_json::from_slice(bytes).map_err(|e| ServiceError::StartupLoad(e.to_string()))?;
    Ok(Snapshot::new(entries, 0))
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Encode and replace the file wholesale. Writes a sibling temp file first and
/// renames it over the target, so readers see either the old or the new document.
/// Returns the number of bytes written.
pub async fn write_snapshot(path: &Path, snapshot: &Snapshot) -> Result<usize, ServiceError> {
    let data = encode(snapshot)?;
    let tmp = temp_path(path);
    fs::write(&tmp, &data)
        .await
        .map_err(|e| ServiceError::Persistence(format!("write {}: {e}", tmp.display())))?;
    fs::rename(&tmp, path)
        .await
        .map_err(|e| ServiceError::Persistence(format!("rename onto {}: {e}", path.display())))?;
    Ok(data.len())
}

/// Read the persisted snapshot. A missing file is `Ok(None)`; anything else
/// that prevents a clean decode is a `StartupLoad` error.
pub async fn load_snapshot(path: &Path) -> Result<Option<Snapshot>, ServiceError> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(ServiceError::StartupLoad(format!("read {}: {e}", path.display()))),
    };
    decode(&bytes)
        .map(Some)
        .map_err(|e| ServiceError::StartupLoad(format!("decode {}: {}", path.display(), e.public_message())))
}
