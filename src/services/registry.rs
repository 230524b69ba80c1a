//! Bookkeeping for results that may be downloaded.
//!
//! Paths are computed from the job id and a sanitized filename; the map only
//! remembers what each job produced (tool, name, MIME type) so the download
//! side never has to guess from the filename.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tracing::{debug, info};

use crate::error::{AppError, AppResult};
use crate::models::Tool;
use crate::services::stager::sanitize_filename;
use crate::services::workspace::{JobId, WorkspaceManager};

/// A finished output, ready to hand to the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultArtifact {
    pub filename: String,
    pub path: PathBuf,
    pub mime_type: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredResult {
    pub tool: Tool,
    pub filename: String,
    pub mime_type: &'static str,
    pub registered_at: DateTime<Utc>,
}

/// A registry hit whose file is present on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedResult {
    pub job_id: JobId,
    pub tool: Tool,
    pub filename: String,
    pub mime_type: &'static str,
    pub path: PathBuf,
}

#[derive(Debug)]
pub struct ResultRegistry {
    workspaces: WorkspaceManager,
    entries: RwLock<HashMap<JobId, RegisteredResult>>,
    ttl: ChronoDuration,
}

impl ResultRegistry {
    pub fn new(workspaces: WorkspaceManager, ttl: std::time::Duration) -> Self {
        Self {
            workspaces,
            entries: RwLock::new(HashMap::new()),
            ttl: ChronoDuration::from_std(ttl).unwrap_or(ChronoDuration::MAX),
        }
    }

    /// Deterministic location of `filename` for `job_id`.
    pub fn resolve(&self, job_id: JobId, filename: &str) -> PathBuf {
        self.workspaces
            .path_for(job_id)
            .join(sanitize_filename(filename))
    }

    pub fn exists(&self, path: &std::path::Path) -> bool {
        path.is_file()
    }

    /// Expose `artifact` for download. Must only be called once the producing
    /// transform has returned and the file is flushed.
    pub fn register(&self, job_id: JobId, tool: Tool, artifact: &ResultArtifact) {
        let now = Utc::now();
        let mut entries = self.entries.write().unwrap_or_else(|p| p.into_inner());

        let ttl = self.ttl;
        let before = entries.len();
        entries.retain(|_, entry| now - entry.registered_at < ttl);
        if entries.len() < before {
            debug!(evicted = before - entries.len(), "Evicted expired registry entries");
        }

        entries.insert(
            job_id,
            RegisteredResult {
                tool,
                filename: artifact.filename.clone(),
                mime_type: artifact.mime_type,
                registered_at: now,
            },
        );
        info!(job_id = %job_id, tool = %tool, filename = %artifact.filename, "Result registered");
    }

    /// Find a downloadable result. Unknown jobs, mismatched names and files
    /// that have already been reclaimed all come back as `NotFound`.
    pub fn lookup(&self, job_id: JobId, filename: &str) -> AppResult<ResolvedResult> {
        let requested = sanitize_filename(filename);
        let entry = self
            .entries
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(&job_id)
            .cloned();

        let Some(entry) = entry else {
            debug!(job_id = %job_id, "No registered result for job");
            return Err(AppError::not_found(None));
        };

        if requested.is_empty() || requested != entry.filename {
            debug!(job_id = %job_id, requested = %requested, "Requested filename does not match result");
            return Err(AppError::not_found(Some(entry.tool.page())));
        }

        let path = self.resolve(job_id, &requested);
        if !self.exists(&path) {
            self.entries
                .write()
                .unwrap_or_else(|p| p.into_inner())
                .remove(&job_id);
            debug!(job_id = %job_id, "Result file already reclaimed");
            return Err(AppError::not_found(Some(entry.tool.page())));
        }

        Ok(ResolvedResult {
            job_id,
            tool: entry.tool,
            filename: entry.filename,
            mime_type: entry.mime_type,
            path,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn setup() -> (TempDir, WorkspaceManager, ResultRegistry) {
        let root = TempDir::new().unwrap();
        let manager = WorkspaceManager::new(root.path());
        let registry = ResultRegistry::new(manager.clone(), Duration::from_secs(3600));
        (root, manager, registry)
    }

    fn artifact(workspace: &crate::services::workspace::Workspace, name: &str) -> ResultArtifact {
        let path = workspace.join(name);
        std::fs::write(&path, b"%PDF-1.5").unwrap();
        ResultArtifact {
            filename: name.to_string(),
            path,
            mime_type: "application/pdf",
        }
    }

    #[test]
    fn resolve_never_leaves_the_workspace() {
        let (_root, manager, registry) = setup();
        let job_id = JobId::generate();
        let path = registry.resolve(job_id, "../../etc/passwd");
        assert_eq!(path.parent().unwrap(), manager.path_for(job_id));
        assert!(path.ends_with("etc_passwd"));
    }

    #[test]
    fn registered_result_is_found_with_its_descriptor() {
        let (_root, manager, registry) = setup();
        let job_id = JobId::generate();
        let workspace = manager.create(job_id).unwrap();
        let artifact = artifact(&workspace, "split-report-split.zip");

        registry.register(job_id, Tool::Merge, &artifact);
        let hit = registry.lookup(job_id, "split-report-split.zip").unwrap();

        // The stored tool wins over anything the name suggests.
        assert_eq!(hit.tool, Tool::Merge);
        assert_eq!(hit.path, artifact.path);
        assert_eq!(hit.mime_type, "application/pdf");
    }

    #[test]
    fn misses_are_not_found() {
        let (_root, manager, registry) = setup();
        let job_id = JobId::generate();
        let workspace = manager.create(job_id).unwrap();
        let artifact = artifact(&workspace, "merged.pdf");

        assert!(matches!(
            registry.lookup(job_id, "merged.pdf"),
            Err(AppError::NotFound { redirect: None, .. })
        ));

        registry.register(job_id, Tool::Merge, &artifact);
        match registry.lookup(job_id, "other.pdf") {
            Err(AppError::NotFound { redirect, .. }) => {
                assert_eq!(redirect.as_deref(), Some("/merge-pdf"))
            }
            other => panic!("expected NotFound, got {other:?}"),
        }

        manager.destroy(workspace.path()).unwrap();
        assert!(registry.lookup(job_id, "merged.pdf").is_err());
        assert!(registry.is_empty());
    }
}
