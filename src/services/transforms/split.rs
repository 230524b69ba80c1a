use std::collections::HashSet;
use std::fs::File;
use std::io;

use tracing::{debug, info, instrument};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::{
    write_artifact, write_artifact_with, Transform, TransformInput, TransformOutput, ZIP_MIME,
};
use crate::error::{AppError, AppResult};
use crate::models::{ResolvedRange, SplitMode, Tool, ToolOptions, TransformStats};
use crate::services::pdf;
use crate::services::registry::ResultArtifact;
use crate::services::stager::{sanitize_filename, UploadPolicy, PDF_EXTENSIONS};

/// Splits one PDF into single pages or user-chosen ranges and zips the parts.
#[derive(Debug, Clone, Copy, Default)]
pub struct SplitTransform;

impl Transform for SplitTransform {
    fn tool(&self) -> Tool {
        Tool::Split
    }

    fn policy(&self) -> UploadPolicy {
        UploadPolicy::single(PDF_EXTENSIONS, "PDF")
    }

    #[instrument(skip_all, fields(job_id = %input.job_id))]
    fn run(&self, input: &TransformInput<'_>) -> AppResult<TransformOutput> {
        let ToolOptions::Split(mode) = input.options else {
            return Err(input.options_mismatch(self.tool()));
        };
        let file = input.single()?;
        let document = pdf::load(&file.path, &file.original_name)?;
        let page_count = pdf::page_count(&document) as u32;
        if page_count == 0 {
            return Err(AppError::processing(format!(
                "Error processing PDF file {}: the document has no pages",
                file.original_name
            )));
        }

        let ranges = plan(mode, page_count)?;
        let prefix = part_prefix(input.output_filename, file.stem());
        debug!(parts = ranges.len(), prefix = %prefix, "Split planned");

        let mut used = HashSet::new();
        let mut parts = Vec::with_capacity(ranges.len());
        for range in &ranges {
            let pages: Vec<u32> = (range.start..=range.end).collect();
            let mut part = pdf::assemble(vec![(document.clone(), pages)])?;
            let bytes = pdf::to_bytes(&mut part)?;

            let name = unique_name(&mut used, &format!("{}-{}", prefix, range.describe()), "pdf");
            let path = input.workspace.join(&name);
            write_artifact(&path, &bytes)?;
            parts.push((name, path));
        }

        let filename = format!("{}-split.zip", prefix);
        let path = input.workspace.join(&filename);
        let size = write_artifact_with(&path, |out| {
            let mut zip = ZipWriter::new(out);
            let options =
                SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
            for (name, part_path) in &parts {
                zip.start_file(name.as_str(), options)?;
                io::copy(&mut File::open(part_path)?, &mut zip)?;
            }
            zip.finish()?;
            Ok(())
        })?;

        info!(parts = parts.len(), bytes = size, filename = %filename, "PDF split");

        Ok(TransformOutput {
            artifact: ResultArtifact {
                filename,
                path,
                mime_type: ZIP_MIME,
            },
            message: format!("PDF split successfully into {} files!", parts.len()),
            stats: TransformStats::split(parts.len()),
            intermediates: parts.into_iter().map(|(_, path)| path).collect(),
        })
    }
}

/// Resolve the requested split against the actual page count.
pub fn plan(mode: &SplitMode, page_count: u32) -> AppResult<Vec<ResolvedRange>> {
    match mode {
        SplitMode::Pages => Ok((1..=page_count)
            .map(|page| ResolvedRange {
                start: page,
                end: page,
                single: true,
            })
            .collect()),
        SplitMode::Ranges(ranges) => ranges.iter().map(|r| r.resolve(page_count)).collect(),
    }
}

fn part_prefix(requested: Option<&str>, stem: &str) -> String {
    let from_request = requested.map(|name| {
        let name = sanitize_filename(name);
        let lower = name.to_lowercase();
        match [".zip", ".pdf"].iter().find(|ext| lower.ends_with(*ext)) {
            Some(ext) => name[..name.len() - ext.len()].to_string(),
            None => name,
        }
    });

    from_request
        .filter(|p| !p.is_empty())
        .or_else(|| Some(sanitize_filename(stem)).filter(|p| !p.is_empty()))
        .unwrap_or_else(|| "split-pdf".to_string())
}

/// `base.ext`, or `base-2.ext`, `base-3.ext`, ... when already taken.
fn unique_name(used: &mut HashSet<String>, base: &str, extension: &str) -> String {
    let mut candidate = format!("{}.{}", base, extension);
    let mut ordinal = 2;
    while !used.insert(candidate.clone()) {
        candidate = format!("{}-{}.{}", base, ordinal, extension);
        ordinal += 1;
    }
    candidate
}
