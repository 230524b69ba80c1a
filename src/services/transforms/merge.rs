use tracing::{info, instrument};

use super::{output_name, write_artifact, Transform, TransformInput, TransformOutput, PDF_MIME};
use crate::error::AppResult;
use crate::models::{Tool, ToolOptions, TransformStats};
use crate::services::pdf;
use crate::services::registry::ResultArtifact;
use crate::services::stager::{UploadPolicy, PDF_EXTENSIONS};

/// Concatenates two or more PDFs, keeping upload order and page order.
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeTransform;

impl Transform for MergeTransform {
    fn tool(&self) -> Tool {
        Tool::Merge
    }

    fn policy(&self) -> UploadPolicy {
        UploadPolicy::at_least(PDF_EXTENSIONS, 2, "PDF")
    }

    #[instrument(skip_all, fields(job_id = %input.job_id, files = input.staged.len()))]
    fn run(&self, input: &TransformInput<'_>) -> AppResult<TransformOutput> {
        if !matches!(input.options, ToolOptions::Merge) {
            return Err(input.options_mismatch(self.tool()));
        }

        let mut sources = Vec::with_capacity(input.staged.len());
        let mut total_pages = 0;
        for file in input.staged {
            let document = pdf::load(&file.path, &file.original_name)?;
            let pages = pdf::page_count(&document) as u32;
            total_pages += pages as usize;
            sources.push((document, (1..=pages).collect()));
        }

        let mut merged = pdf::assemble(sources)?;
        let bytes = pdf::to_bytes(&mut merged)?;

        let filename = output_name(input.output_filename, "merged-document", "pdf");
        let path = input.workspace.join(&filename);
        let size = write_artifact(&path, &bytes)?;

        info!(pages = total_pages, bytes = size, filename = %filename, "PDFs merged");

        Ok(TransformOutput {
            artifact: ResultArtifact {
                filename,
                path,
                mime_type: PDF_MIME,
            },
            message: "PDF files merged successfully!".to_string(),
            stats: TransformStats::pages(total_pages),
            intermediates: Vec::new(),
        })
    }
}
