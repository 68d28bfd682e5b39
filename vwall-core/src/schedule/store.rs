//! Job persistence.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::WallError;
use crate::schedule::job::{DeploymentJob, JobId};

/// Durable home of deployment jobs.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert or overwrite.
    async fn save(&self, job: &DeploymentJob) -> Result<(), WallError>;

    async fn load_all(&self) -> Result<Vec<DeploymentJob>, WallError>;

    /// Removing an unknown job is not an error.
    async fn remove(&self, id: &JobId) -> Result<(), WallError>;
}

// ── MemoryJobStore ───────────────────────────────────────────────

/// Keeps jobs for the life of the process only.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: DashMap<JobId, DeploymentJob>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn save(&self, job: &DeploymentJob) -> Result<(), WallError> {
        self.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<DeploymentJob>, WallError> {
        let mut jobs: Vec<_> = self.jobs.iter().map(|j| j.value().clone()).collect();
        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs)
    }

    async fn remove(&self, id: &JobId) -> Result<(), WallError> {
        self.jobs.remove(id);
        Ok(())
    }
}

// ── JsonDirJobStore ──────────────────────────────────────────────

/// One `<job-id>.json` file per job.
///
/// Writes go to a temporary file that is renamed into place, so a crash
/// never leaves a half-written job behind.
#[derive(Debug, Clone)]
pub struct JsonDirJobStore {
    dir: PathBuf,
}

impl JsonDirJobStore {
    /// Opens (and creates if needed) the directory.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, WallError> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| WallError::Store(format!("create {}: {e}", dir.display())))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &JobId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }
}

#[async_trait]
impl JobStore for JsonDirJobStore {
    async fn save(&self, job: &DeploymentJob) -> Result<(), WallError> {
        let path = self.path_for(&job.id);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(job)?;
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| WallError::Store(format!("write {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| WallError::Store(format!("rename {}: {e}", path.display())))?;
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<DeploymentJob>, WallError> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| WallError::Store(format!("read {}: {e}", self.dir.display())))?;

        let mut jobs = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| WallError::Store(format!("read {}: {e}", self.dir.display())))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let parsed = match tokio::fs::read(&path).await {
                Ok(bytes) => serde_json::from_slice::<DeploymentJob>(&bytes).map_err(WallError::from),
                Err(e) => Err(WallError::Store(e.to_string())),
            };
            match parsed {
                Ok(job) => jobs.push(job),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable job file"),
            }
        }
        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs)
    }

    async fn remove(&self, id: &JobId) -> Result<(), WallError> {
        match tokio::fs::remove_file(self.path_for(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(WallError::Store(format!("remove job {id}: {e}"))),
        }
    }
}
