pub mod cleanup;
pub mod jobs;
pub mod pdf;
pub mod registry;
pub mod stager;
pub mod transforms;
pub mod workspace;

pub use cleanup::CleanupScheduler;
pub use jobs::{DownloadTicket, JobResult, JobService};
pub use registry::{ResultArtifact, ResultRegistry};
pub use stager::{StagedFile, UploadPolicy, UploadStager};
pub use transforms::{Transform, TransformSet};
pub use workspace::{JobId, Workspace, WorkspaceManager};
