use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tempfile::NamedTempFile;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

use super::{sanitize_file_stem, validate_journey_id, ArtifactKind, AuditEntry, JourneyStore};
use crate::config::StorageConfig;
use crate::error::{StorageError, StorageResult};
use crate::journey::{Journey, JourneyStatus};

const REQUESTS_DIR: &str = "requests";
const AUDIT_FILE: &str = "audit.log";

/// Filesystem-backed journey store
pub struct FileJourneyStore {
    root: PathBuf,
    init: OnceCell<()>,
    audit: Mutex<Option<fs::File>>,
}

impl FileJourneyStore {
    /// Create a store rooted at `root`. Nothing is touched until first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            init: OnceCell::new(),
            audit: Mutex::new(None),
        }
    }

    /// Create a store from configuration
    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(config.log_dir.clone())
    }

    /// Storage root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the shared audit trail
    pub fn audit_path(&self) -> PathBuf {
        self.root.join(AUDIT_FILE)
    }

    /// Path of a journey's full document
    pub fn journey_path(&self, id: &str) -> PathBuf {
        self.root.join(REQUESTS_DIR).join(format!("{}.json", id))
    }

    /// Path of an auxiliary document. The name is never shortened.
    pub fn artifact_path(&self, kind: ArtifactKind, name: &str) -> PathBuf {
        self.root
            .join(kind.dir_name())
            .join(format!("{}.json", sanitize_file_stem(name)))
    }

    async fn create_layout(&self) -> StorageResult<()> {
        let mut dirs = vec![self.root.clone(), self.root.join(REQUESTS_DIR)];
        dirs.extend(ArtifactKind::ALL.iter().map(|k| self.root.join(k.dir_name())));

        for dir in dirs {
            fs::create_dir_all(&dir)
                .await
                .map_err(|e| StorageError::io(&dir, e))?;
        }

        info!(root = %self.root.display(), "Journey storage initialized");
        Ok(())
    }

    async fn remove_artifacts(&self, id: &str) -> StorageResult<()> {
        let prefix = format!("{}_", id);
        for kind in ArtifactKind::ALL {
            let dir = self.root.join(kind.dir_name());
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(StorageError::io(&dir, e)),
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| StorageError::io(&dir, e))?
            {
                if entry.file_name().to_string_lossy().starts_with(&prefix) {
                    let path = entry.path();
                    fs::remove_file(&path)
                        .await
                        .map_err(|e| StorageError::io(&path, e))?;
                }
            }
        }
        Ok(())
    }
}

/// Write `bytes` to a uniquely named temp file beside `path`, then rename it
/// over the target.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

async fn write_replace(path: &Path, bytes: Vec<u8>) -> StorageResult<()> {
    let target = path.to_path_buf();
    tokio::task::spawn_blocking(move || write_atomic(&target, &bytes))
        .await
        .map_err(|e| StorageError::io(path, std::io::Error::new(std::io::ErrorKind::Other, e)))?
        .map_err(|e| StorageError::io(path, e))
}

#[async_trait]
impl JourneyStore for FileJourneyStore {
    async fn initialize(&self) -> StorageResult<()> {
        self.init
            .get_or_try_init(|| self.create_layout())
            .await?;
        Ok(())
    }

    async fn save_journey(&self, journey: &Journey) -> StorageResult<()> {
        validate_journey_id(&journey.id)?;
        self.initialize().await?;

        let bytes = serde_json::to_vec_pretty(journey)?;
        write_replace(&self.journey_path(&journey.id), bytes).await?;

        debug!(journey_id = %journey.id, stages = journey.stages.len(), "Journey persisted");
        Ok(())
    }

    async fn load_journey(&self, id: &str) -> StorageResult<Option<Journey>> {
        validate_journey_id(id)?;
        let path = self.journey_path(id);

        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::io(&path, e)),
        };

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StorageError::CorruptRecord {
                journey_id: id.to_string(),
                message: e.to_string(),
            })
    }

    async fn journey_ids(&self) -> StorageResult<Vec<String>> {
        let dir = self.root.join(REQUESTS_DIR);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io(&dir, e)),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::io(&dir, e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(id) = name.strip_suffix(".json") {
                if validate_journey_id(id).is_ok() {
                    ids.push(id.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn save_artifact(
        &self,
        kind: ArtifactKind,
        name: &str,
        body: &serde_json::Value,
    ) -> StorageResult<()> {
        self.initialize().await?;

        let bytes = serde_json::to_vec_pretty(body)?;
        write_replace(&self.artifact_path(kind, name), bytes).await
    }

    async fn append_audit(&self, entry: &AuditEntry) -> StorageResult<()> {
        self.initialize().await?;

        let path = self.audit_path();
        let mut guard = self.audit.lock().await;
        if guard.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
                .map_err(|e| StorageError::io(&path, e))?;
            *guard = Some(file);
        }

        let mut line = entry.to_line();
        line.push('\n');

        if let Some(file) = guard.as_mut() {
            let written = async {
                file.write_all(line.as_bytes()).await?;
                file.flush().await
            }
            .await;
            if let Err(e) = written {
                // Reopen on the next append rather than reuse a broken handle.
                *guard = None;
                return Err(StorageError::io(&path, e));
            }
        }
        Ok(())
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>) -> StorageResult<usize> {
        let mut removed = 0;
        for id in self.journey_ids().await? {
            let journey = match self.load_journey(&id).await {
                Ok(Some(journey)) => journey,
                Ok(None) => continue,
                Err(e) => {
                    warn!(journey_id = %id, error = %e, "Skipping unreadable journey during prune");
                    continue;
                }
            };

            if journey.status == JourneyStatus::InProgress || journey.started_at >= cutoff {
                continue;
            }

            let path = self.journey_path(&id);
            fs::remove_file(&path)
                .await
                .map_err(|e| StorageError::io(&path, e))?;
            self.remove_artifacts(&id).await?;
            removed += 1;
        }

        info!(removed, cutoff = %cutoff, "Pruned expired journeys");
        Ok(removed)
    }
}
