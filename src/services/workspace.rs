//! Per-job directories under the upload root.
//!
//! A workspace path is always `<root>/<job id>`; nothing supplied by the
//! client ever contributes to it.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// Random 128-bit identifier of a single job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(Uuid);

impl JobId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// First eight hex digits, used in default output names.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for JobId {
    type Err = AppError;

    /// Anything that is not a UUID cannot name a workspace, so it is
    /// reported as an expired or unknown job.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(JobId)
            .map_err(|_| AppError::not_found(None))
    }
}

/// The directory owned by one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    job_id: JobId,
    path: PathBuf,
}

impl Workspace {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of `filename` inside this workspace. Callers pass names they
    /// generated or sanitized themselves.
    pub fn join(&self, filename: &str) -> PathBuf {
        self.path.join(filename)
    }
}

#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the workspace of `job_id` lives, whether or not it exists.
    pub fn path_for(&self, job_id: JobId) -> PathBuf {
        self.root.join(job_id.to_string())
    }

    /// Create a fresh directory for `job_id`. Fails if it already exists,
    /// since a workspace is never shared between jobs.
    pub fn create(&self, job_id: JobId) -> AppResult<Workspace> {
        std::fs::create_dir_all(&self.root).map_err(|e| {
            AppError::internal(format!(
                "Upload root {} is not writable: {}",
                self.root.display(),
                e
            ))
        })?;

        let path = self.path_for(job_id);
        std::fs::create_dir(&path).map_err(|e| {
            AppError::internal(format!("Failed to create workspace for job {}: {}", job_id, e))
        })?;

        debug!(job_id = %job_id, path = %path.display(), "Workspace created");
        Ok(Workspace { job_id, path })
    }

    /// Recursively remove a workspace. Already-absent paths are fine.
    pub fn destroy(&self, path: &Path) -> io::Result<()> {
        match std::fs::remove_dir_all(path) {
            Ok(()) => {
                info!(path = %path.display(), "Workspace destroyed");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}
