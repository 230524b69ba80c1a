//! One transform per tool, all behind the same contract: staged inputs and
//! options in, a single flushed artifact inside the workspace out.

use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::NamedTempFile;
use tracing::debug;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::models::{Tool, ToolOptions, TransformStats};
use crate::services::registry::ResultArtifact;
use crate::services::stager::{sanitize_filename, StagedFile, UploadPolicy};
use crate::services::workspace::{JobId, Workspace};

pub mod compress;
pub mod image_to_pdf;
pub mod merge;
pub mod pdf_to_word;
pub mod split;
pub mod word_to_pdf;

pub use compress::CompressTransform;
pub use image_to_pdf::ImageToPdfTransform;
pub use merge::MergeTransform;
pub use pdf_to_word::PdfToWordTransform;
pub use split::SplitTransform;
pub use word_to_pdf::{HeuristicStyle, StyleInference, WordToPdfTransform};

pub const PDF_MIME: &str = "application/pdf";
pub const ZIP_MIME: &str = "application/zip";
pub const DOCX_MIME: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Staged names start with this; outputs must never reuse it.
const STAGED_PREFIX: &str = "temp_";

pub struct TransformInput<'a> {
    pub job_id: JobId,
    pub workspace: &'a Workspace,
    pub staged: &'a [StagedFile],
    pub options: &'a ToolOptions,
    pub output_filename: Option<&'a str>,
}

impl TransformInput<'_> {
    /// The only staged file of a single-input tool.
    pub fn single(&self) -> AppResult<&StagedFile> {
        match self.staged {
            [file] => Ok(file),
            _ => Err(AppError::internal(format!(
                "Expected exactly one staged file, got {}",
                self.staged.len()
            ))),
        }
    }

    fn options_mismatch(&self, tool: Tool) -> AppError {
        AppError::internal(format!(
            "{} transform received options for {}",
            tool,
            self.options.tool()
        ))
    }
}

#[derive(Debug)]
pub struct TransformOutput {
    pub artifact: ResultArtifact,
    pub message: String,
    pub stats: TransformStats,
    /// Files created along the way that are not part of the result.
    pub intermediates: Vec<PathBuf>,
}

pub trait Transform: Send + Sync {
    fn tool(&self) -> Tool;

    fn policy(&self) -> UploadPolicy;

    fn run(&self, input: &TransformInput<'_>) -> AppResult<TransformOutput>;
}

/// The transform registered for each tool.
#[derive(Clone)]
pub struct TransformSet {
    transforms: HashMap<Tool, Arc<dyn Transform>>,
}

impl TransformSet {
    pub fn from_config(config: &Config) -> Self {
        let mut set = Self {
            transforms: HashMap::new(),
        };
        set.insert(Arc::new(MergeTransform));
        set.insert(Arc::new(SplitTransform));
        set.insert(Arc::new(CompressTransform::new(
            config.pdfium_library_path.clone(),
        )));
        set.insert(Arc::new(ImageToPdfTransform));
        set.insert(Arc::new(PdfToWordTransform));
        set.insert(Arc::new(WordToPdfTransform::new(HeuristicStyle)));
        set
    }

    /// Replace the transform for its tool.
    pub fn insert(&mut self, transform: Arc<dyn Transform>) {
        self.transforms.insert(transform.tool(), transform);
    }

    pub fn get(&self, tool: Tool) -> AppResult<Arc<dyn Transform>> {
        self.transforms
            .get(&tool)
            .cloned()
            .ok_or_else(|| AppError::unsupported(format!("No transform registered for {}", tool)))
    }
}

/// Stem used when neither the request nor the upload yields a usable name.
pub const FALLBACK_STEM: &str = "document";

/// Final output name: the client's choice when it survives sanitizing,
/// otherwise the sanitized `default_stem`, always ending in `.extension`.
/// Default stems are often derived from upload names, so they go through the
/// same sanitizing as requested names.
pub fn output_name(requested: Option<&str>, default_stem: &str, extension: &str) -> String {
    let suffix = format!(".{}", extension);
    let usable = |stem: &String| !stem.trim_matches(|c| c == '.' || c == '_').is_empty();
    let stem = requested
        .map(sanitize_filename)
        .map(|name| match name.to_lowercase().strip_suffix(&suffix) {
            Some(_) => name[..name.len() - suffix.len()].to_string(),
            None => name,
        })
        .filter(usable)
        .or_else(|| Some(sanitize_filename(default_stem)).filter(usable))
        .unwrap_or_else(|| FALLBACK_STEM.to_string());

    if stem.starts_with(STAGED_PREFIX) {
        format!("result-{}{}", stem, suffix)
    } else {
        format!("{}{}", stem, suffix)
    }
}

/// Write `bytes` to `path` so that the file only appears once it is complete
/// and synced to disk. Returns the final size.
pub fn write_artifact(path: &Path, bytes: &[u8]) -> AppResult<u64> {
    write_artifact_with(path, |file| {
        file.write_all(bytes)?;
        Ok(())
    })
}

/// Like [`write_artifact`], with the content produced by `fill`.
pub fn write_artifact_with<F>(path: &Path, fill: F) -> AppResult<u64>
where
    F: FnOnce(&mut File) -> AppResult<()>,
{
    let dir = path
        .parent()
        .ok_or_else(|| AppError::internal(format!("Output path {} has no parent", path.display())))?;

    let mut temp = NamedTempFile::new_in(dir)?;
    fill(temp.as_file_mut())?;
    temp.as_file_mut().flush()?;
    temp.as_file().sync_all()?;
    let file = temp
        .persist(path)
        .map_err(|e| AppError::processing(format!("Failed to save output file: {}", e.error)))?;

    let size = file.metadata()?.len();
    debug!(path = %path.display(), bytes = size, "Artifact written");
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn output_name_sanitizes_and_enforces_extension() {
        assert_eq!(output_name(None, "merged-document", "pdf"), "merged-document.pdf");
        assert_eq!(output_name(Some("report"), "x", "pdf"), "report.pdf");
        assert_eq!(output_name(Some("Report.PDF"), "x", "pdf"), "Report.pdf");
        assert_eq!(output_name(Some("../../etc/passwd"), "x", "pdf"), "etc_passwd.pdf");
        assert_eq!(output_name(Some("///"), "fallback", "pdf"), "fallback.pdf");
        assert_eq!(output_name(Some("notes.txt"), "x", "docx"), "notes.txt.docx");
    }

    #[test]
    fn default_stems_are_sanitized_too() {
        assert_eq!(
            output_name(None, "../../escaped_compressed", "pdf"),
            "escaped_compressed.pdf"
        );
        assert_eq!(output_name(None, "my report", "docx"), "my_report.docx");
        assert_eq!(output_name(None, "r\u{e9}sum\u{e9} final", "pdf"), "rsum_final.pdf");
        assert_eq!(output_name(None, "\u{65e5}\u{672c}", "docx"), "document.docx");
        assert_eq!(output_name(Some("///"), "..", "pdf"), "document.pdf");
    }

    #[test]
    fn output_name_never_shadows_staged_inputs() {
        assert_eq!(
            output_name(Some("temp_0_input.pdf"), "x", "pdf"),
            "result-temp_0_input.pdf"
        );
    }

    #[test]
    fn write_artifact_replaces_atomically() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.pdf");
        std::fs::write(&path, b"old").unwrap();

        let size = write_artifact(&path, b"%PDF-1.5 new").unwrap();
        assert_eq!(size, 12);
        assert_eq!(std::fs::read(&path).unwrap(), b"%PDF-1.5 new");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn failed_fill_leaves_nothing_behind() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.pdf");

        let result = write_artifact_with(&path, |_| Err(AppError::processing("boom")));
        assert!(result.is_err());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn every_tool_has_a_transform() {
        let set = TransformSet::from_config(&Config::for_root("uploads"));
        for tool in [
            Tool::Merge,
            Tool::Split,
            Tool::Compress,
            Tool::ImageToPdf,
            Tool::PdfToWord,
            Tool::WordToPdf,
        ] {
            assert_eq!(set.get(tool).unwrap().tool(), tool);
        }
    }
}
