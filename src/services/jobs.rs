//! The job lifecycle: workspace, staging, transform, registration and
//! cleanup, for every tool.

use std::any::Any;
use std::fs::File;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::models::{JobResponse, Tool, ToolRequest, TransformStats, UploadedFile};
use crate::services::cleanup::CleanupScheduler;
use crate::services::registry::ResultRegistry;
use crate::services::stager::{StagedFile, UploadStager};
use crate::services::transforms::{TransformInput, TransformOutput, TransformSet};
use crate::services::workspace::{JobId, Workspace, WorkspaceManager};

/// Outcome of a successful submission.
#[derive(Debug, Clone)]
pub struct JobResult {
    pub job_id: JobId,
    pub tool: Tool,
    pub filename: String,
    pub message: String,
    pub stats: TransformStats,
    pub elapsed: Duration,
}

impl JobResult {
    pub fn download_url(&self) -> String {
        format!("/api/pdf/download/{}/{}", self.job_id, self.filename)
    }

    pub fn into_response(self) -> JobResponse {
        JobResponse {
            success: true,
            job_id: self.job_id.to_string(),
            tool: self.tool,
            download_url: self.download_url(),
            filename: self.filename,
            message: self.message,
            stats: self.stats,
            processing_time_ms: self.elapsed.as_millis() as u64,
        }
    }
}

/// A result opened for download; its workspace is already scheduled for
/// removal. The open handle keeps the file readable until it is dropped.
#[derive(Debug)]
pub struct DownloadTicket {
    pub job_id: JobId,
    pub tool: Tool,
    pub filename: String,
    pub mime_type: &'static str,
    pub size: u64,
    pub file: File,
}

struct Inner {
    config: Config,
    workspaces: WorkspaceManager,
    stager: UploadStager,
    registry: ResultRegistry,
    transforms: TransformSet,
    scheduler: CleanupScheduler,
}

#[derive(Clone)]
pub struct JobService {
    inner: Arc<Inner>,
}

impl JobService {
    pub fn new(config: Config, scheduler: CleanupScheduler) -> Self {
        let transforms = TransformSet::from_config(&config);
        Self::with_transforms(config, scheduler, transforms)
    }

    pub fn with_transforms(
        config: Config,
        scheduler: CleanupScheduler,
        transforms: TransformSet,
    ) -> Self {
        let workspaces = WorkspaceManager::new(config.upload_root.clone());
        let registry = ResultRegistry::new(workspaces.clone(), config.result_ttl());
        Self {
            inner: Arc::new(Inner {
                config,
                workspaces,
                stager: UploadStager::new(),
                registry,
                transforms,
                scheduler,
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn registry(&self) -> &ResultRegistry {
        &self.inner.registry
    }

    pub fn workspaces(&self) -> &WorkspaceManager {
        &self.inner.workspaces
    }

    /// Run one job to completion. Blocking; call it from `spawn_blocking`.
    ///
    /// On success the result is registered, inputs and intermediates are
    /// removed, and the workspace is scheduled for removal after the result
    /// TTL. On any failure the workspace is removed before returning.
    pub fn submit(&self, request: ToolRequest, uploads: Vec<UploadedFile>) -> AppResult<JobResult> {
        let started = Instant::now();
        let tool = request.tool();
        let transform = self.inner.transforms.get(tool)?;
        let policy = transform.policy();

        // Reject unusable batches before touching the filesystem.
        policy.select(&uploads)?;

        let job_id = JobId::generate();
        let workspace = self.inner.workspaces.create(job_id)?;
        info!(job_id = %job_id, tool = %tool, uploads = uploads.len(), "Job started");

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let staged = self.inner.stager.stage(&uploads, &workspace, &policy)?;
            let input = TransformInput {
                job_id,
                workspace: &workspace,
                staged: &staged,
                options: &request.options,
                output_filename: request.output_filename.as_deref(),
            };
            let output = transform.run(&input)?;
            Ok::<_, AppError>((staged, output))
        }))
        .unwrap_or_else(|payload| {
            error!(
                job_id = %job_id,
                tool = %tool,
                panic = %panic_message(&*payload),
                "Transform panicked"
            );
            Err(AppError::processing(format!(
                "Unexpected error while running {}",
                tool
            )))
        });

        match outcome {
            Ok((staged, output)) => {
                Ok(self.complete(job_id, tool, &workspace, staged, output, started))
            }
            Err(e) => {
                warn!(job_id = %job_id, tool = %tool, error = %e, "Job failed, removing workspace");
                if let Err(io_error) = self.inner.workspaces.destroy(workspace.path()) {
                    debug!(job_id = %job_id, error = %io_error, "Workspace removal failed, ignoring");
                }
                Err(e)
            }
        }
    }

    fn complete(
        &self,
        job_id: JobId,
        tool: Tool,
        workspace: &Workspace,
        staged: Vec<StagedFile>,
        output: TransformOutput,
        started: Instant,
    ) -> JobResult {
        let TransformOutput {
            artifact,
            message,
            stats,
            intermediates,
        } = output;

        self.inner.registry.register(job_id, tool, &artifact);

        let leftovers: Vec<PathBuf> = staged
            .into_iter()
            .map(|file| file.path)
            .chain(intermediates)
            .filter(|path| *path != artifact.path)
            .collect();
        self.inner.scheduler.schedule(leftovers, Duration::ZERO);
        self.inner.scheduler.schedule(
            vec![workspace.path().to_path_buf()],
            self.inner.config.result_ttl(),
        );

        let elapsed = started.elapsed();
        info!(
            job_id = %job_id,
            tool = %tool,
            filename = %artifact.filename,
            elapsed_ms = elapsed.as_millis() as u64,
            "Job completed"
        );

        JobResult {
            job_id,
            tool,
            filename: artifact.filename,
            message,
            stats,
            elapsed,
        }
    }

    /// Open a registered result and schedule its workspace for removal after
    /// the configured delay. Blocking.
    pub fn download(&self, job_id: &str, filename: &str) -> AppResult<DownloadTicket> {
        let job_id: JobId = job_id.parse()?;
        let resolved = self.inner.registry.lookup(job_id, filename)?;

        let opened = File::open(&resolved.path).and_then(|file| {
            let size = file.metadata()?.len();
            Ok((file, size))
        });
        let (file, size) = opened.map_err(|e| {
            warn!(job_id = %job_id, error = %e, "Registered result could not be opened");
            AppError::not_found(Some(resolved.tool.page()))
        })?;

        let delay = self.inner.config.cleanup_delay();
        self.inner
            .scheduler
            .schedule(vec![self.inner.workspaces.path_for(job_id)], delay);
        info!(
            job_id = %job_id,
            filename = %resolved.filename,
            bytes = size,
            cleanup_in_secs = delay.as_secs(),
            "Result opened for download"
        );

        Ok(DownloadTicket {
            job_id,
            tool: resolved.tool,
            filename: resolved.filename,
            mime_type: resolved.mime_type,
            size,
            file,
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
