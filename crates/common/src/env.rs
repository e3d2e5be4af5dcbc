//! Environment/runtime helpers
//!
//! Small sanity checks run before the store is opened.

use std::path::Path;

use tracing::debug;

/// Ensure the directory holding `file` exists so the first snapshot write can land.
pub async fn ensure_parent_dir(file: &Path) -> anyhow::Result<()> {
    let Some(parent) = file.parent() else { return Ok(()) };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    tokio::fs::create_dir_all(parent)
        .await
        .map_err(|e| anyhow::anyhow!("cannot create {}: {e}", parent.display()))?;
    debug!(dir = %parent.display(), "data directory ready");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn creates_missing_parent() -> anyhow::Result<()> {
        let dir = std::env::temp_dir().join(format!("kv_env_{}", uuid::Uuid::new_v4()));
        let file = dir.join("nested").join("cache.json");
        ensure_parent_dir(&file).await?;
        assert!(tokio::fs::metadata(dir.join("nested")).await?.is_dir());
        let _ = tokio::fs::remove_dir_all(&dir).await;
        Ok(())
    }

    #[tokio::test]
    async fn bare_file_name_needs_no_dir() -> anyhow::Result<()> {
        ensure_parent_dir(Path::new("cache.json")).await?;
        Ok(())
    }
}
