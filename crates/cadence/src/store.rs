//! Snapshot persistence in a single JSON file.

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use cadence_core::{EngineError, StateSnapshot, StateStore};

/// Keeps the latest snapshot in one file, replaced atomically on every save.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Write `bytes` next to `path` and rename over it.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), EngineError> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    file.write_all(bytes)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| EngineError::Io(e.error))?;
    Ok(())
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load(&self) -> Result<Option<StateSnapshot>, EngineError> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let snapshot: StateSnapshot = serde_json::from_str(&text)?;
        info!(
            path = %self.path.display(),
            saved_at = %snapshot.saved_at,
            jobs = snapshot.jobs.len(),
            "loaded saved state"
        );
        Ok(Some(snapshot))
    }

    async fn save(&self, snapshot: &StateSnapshot) -> Result<(), EngineError> {
        let bytes = serde_json::to_vec_pretty(snapshot)?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
            .await
            .map_err(|e| EngineError::Store(e.to_string()))??;
        debug!(path = %self.path.display(), "saved state");
        Ok(())
    }
}
