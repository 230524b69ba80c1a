use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};
use crate::models::UploadedFile;
use crate::services::workspace::Workspace;

pub const PDF_EXTENSIONS: &[&str] = &["pdf"];
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "tiff", "webp"];
pub const WORD_EXTENSIONS: &[&str] = &["docx", "doc"];

/// What a tool accepts from an upload batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadPolicy {
    pub allowed_extensions: &'static [&'static str],
    pub min_count: usize,
    pub max_count: Option<usize>,
    /// Human-readable kind used in messages, e.g. "PDF".
    pub kind: &'static str,
}

impl UploadPolicy {
    pub const fn single(allowed_extensions: &'static [&'static str], kind: &'static str) -> Self {
        Self {
            allowed_extensions,
            min_count: 1,
            max_count: Some(1),
            kind,
        }
    }

    pub const fn at_least(
        allowed_extensions: &'static [&'static str],
        min_count: usize,
        kind: &'static str,
    ) -> Self {
        Self {
            allowed_extensions,
            min_count,
            max_count: None,
            kind,
        }
    }

    pub fn allows(&self, upload: &UploadedFile) -> bool {
        if upload.name.trim().is_empty() {
            return false;
        }
        upload
            .extension()
            .map(|ext| self.allowed_extensions.contains(&ext.as_str()))
            .unwrap_or(false)
    }

    /// Keep the acceptable uploads, in their original order, or explain why
    /// the batch cannot be used.
    pub fn select<'a>(&self, uploads: &'a [UploadedFile]) -> AppResult<Vec<&'a UploadedFile>> {
        let valid: Vec<&UploadedFile> = uploads.iter().filter(|u| self.allows(u)).collect();

        if valid.len() < self.min_count {
            let message = if self.min_count <= 1 {
                format!(
                    "No valid {} file found. Supported formats: {}",
                    self.kind,
                    self.allowed_extensions.join(", ")
                )
            } else {
                format!(
                    "At least {} valid {} files are required",
                    self.min_count, self.kind
                )
            };
            return Err(AppError::validation(message));
        }

        if let Some(max) = self.max_count {
            if valid.len() > max {
                return Err(AppError::validation(if max == 1 {
                    format!("Please select only one {} file", self.kind)
                } else {
                    format!("Please select at most {} {} files", max, self.kind)
                }));
            }
        }

        Ok(valid)
    }
}

/// An upload persisted inside a workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub original_name: String,
    pub path: PathBuf,
    pub extension: String,
    pub size: u64,
}

impl StagedFile {
    /// Original filename without its extension.
    pub fn stem(&self) -> &str {
        match self.original_name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => &self.original_name,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct UploadStager;

impl UploadStager {
    pub fn new() -> Self {
        Self
    }

    /// Validate `uploads` against `policy` and write the accepted ones into
    /// `workspace` as `temp_<ordinal>_<sanitized name>.<ext>`.
    pub fn stage(
        &self,
        uploads: &[UploadedFile],
        workspace: &Workspace,
        policy: &UploadPolicy,
    ) -> AppResult<Vec<StagedFile>> {
        let selected = policy.select(uploads).map_err(|e| {
            warn!(
                job_id = %workspace.job_id(),
                uploads = uploads.len(),
                error = %e,
                "Upload batch rejected"
            );
            e
        })?;

        let mut staged = Vec::with_capacity(selected.len());
        for (ordinal, upload) in selected.into_iter().enumerate() {
            // `allows` guarantees an extension.
            let extension = upload.extension().unwrap_or_default();
            let stem = match sanitize_filename(upload.stem()) {
                s if s.is_empty() => "file".to_string(),
                s => s,
            };
            let path = workspace.join(&format!("temp_{}_{}.{}", ordinal, stem, extension));

            let mut file = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .map_err(|e| AppError::processing(format!("Failed to save uploaded file: {}", e)))?;
            file.write_all(&upload.content)
                .map_err(|e| AppError::processing(format!("Failed to save uploaded file: {}", e)))?;

            debug!(
                job_id = %workspace.job_id(),
                original = %upload.name,
                staged = %path.display(),
                bytes = upload.size,
                "Upload staged"
            );

            staged.push(StagedFile {
                original_name: upload.name.clone(),
                path,
                extension,
                size: upload.content.len() as u64,
            });
        }

        info!(job_id = %workspace.job_id(), count = staged.len(), "Uploads staged");
        Ok(staged)
    }
}

/// Reduce a client-supplied name to `[A-Za-z0-9_.-]`, with path separators
/// and whitespace runs turned into `_` and no leading or trailing dots.
pub fn sanitize_filename(name: &str) -> String {
    let spaced: String = name
        .chars()
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();
    let joined = spaced.split_whitespace().collect::<Vec<_>>().join("_");
    let filtered: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();
    filtered.trim_matches(|c| c == '.' || c == '_').to_string()
}
