use std::path::{Path, PathBuf};

use image::{DynamicImage, RgbaImage};
use lopdf::{Document, Object};
use pdfium_render::prelude::*;
use tracing::{debug, info, instrument, warn};

use super::{output_name, write_artifact, Transform, TransformInput, TransformOutput, PDF_MIME};
use crate::error::{AppError, AppResult};
use crate::models::{CompressionLevel, Tool, ToolOptions, TransformStats};
use crate::services::pdf::{self, DocumentBuilder, Placement};
use crate::services::registry::ResultArtifact;
use crate::services::stager::{UploadPolicy, PDF_EXTENSIONS};

pub const STRATEGY_RASTERIZED: &str = "rasterized";
pub const STRATEGY_OPTIMIZED: &str = "optimized";

/// Shrinks a PDF by re-rendering every page as a JPEG at the preset DPI, or,
/// when PDFium is not available, by dropping annotations and forms and
/// deflating what is left.
#[derive(Debug, Clone, Default)]
pub struct CompressTransform {
    pdfium_library_path: Option<PathBuf>,
}

impl CompressTransform {
    pub fn new(pdfium_library_path: Option<PathBuf>) -> Self {
        Self {
            pdfium_library_path,
        }
    }

    /// Name reported by `/ready` for the strategy this process can use.
    pub fn strategy(&self) -> &'static str {
        match bind_pdfium(self.pdfium_library_path.as_deref()) {
            Ok(_) => STRATEGY_RASTERIZED,
            Err(_) => STRATEGY_OPTIMIZED,
        }
    }

    fn rasterize(&self, path: &Path, level: CompressionLevel) -> AppResult<Vec<u8>> {
        let pdfium = bind_pdfium(self.pdfium_library_path.as_deref())?;
        let source = pdfium
            .load_pdf_from_file(path, None)
            .map_err(|e| AppError::processing(format!("PDFium could not open the file: {:?}", e)))?;

        let render = PdfRenderConfig::new().scale_page_by_factor(level.dpi() / 72.0);
        let mut builder = DocumentBuilder::new();

        for (index, page) in source.pages().iter().enumerate() {
            let bitmap = page.render_with_config(&render).map_err(|e| {
                AppError::processing(format!("Failed to render page {}: {:?}", index + 1, e))
            })?;
            let (pixel_width, pixel_height) = (bitmap.width() as u32, bitmap.height() as u32);
            let rgba = RgbaImage::from_raw(pixel_width, pixel_height, bitmap.as_rgba_bytes())
                .ok_or_else(|| {
                    AppError::processing(format!("Page {} rendered to an invalid bitmap", index + 1))
                })?;

            let jpeg = pdf::encode_jpeg(&DynamicImage::ImageRgba8(rgba), level.quality())?;
            let image_id = builder.add_jpeg(jpeg, pixel_width, pixel_height);

            let (width, height) = (page.width().value, page.height().value);
            builder.add_image_page(
                image_id,
                width,
                height,
                Placement {
                    x: 0.0,
                    y: 0.0,
                    width,
                    height,
                },
            )?;
        }

        debug!(pages = builder.page_count(), dpi = level.dpi(), "Pages rasterized");
        pdf::to_bytes(&mut builder.finish())
    }
}

impl Transform for CompressTransform {
    fn tool(&self) -> Tool {
        Tool::Compress
    }

    fn policy(&self) -> UploadPolicy {
        UploadPolicy::single(PDF_EXTENSIONS, "PDF")
    }

    #[instrument(skip_all, fields(job_id = %input.job_id))]
    fn run(&self, input: &TransformInput<'_>) -> AppResult<TransformOutput> {
        let ToolOptions::Compress(level) = input.options else {
            return Err(input.options_mismatch(self.tool()));
        };
        let level = *level;
        let file = input.single()?;

        let original = std::fs::read(&file.path)?;
        let original_size = original.len() as u64;
        let document = pdf::load(&file.path, &file.original_name)?;
        let page_count = pdf::page_count(&document);

        let (strategy, compressed) = with_fallback(self.rasterize(&file.path, level), document)?;

        // Never hand back something bigger than what was uploaded.
        let output = if (compressed.len() as u64) < original_size {
            compressed
        } else {
            debug!(
                original = original_size,
                compressed = compressed.len(),
                "Compressed output not smaller, keeping original"
            );
            original
        };

        let filename = output_name(
            input.output_filename,
            &format!("{}_compressed", file.stem()),
            "pdf",
        );
        let path = input.workspace.join(&filename);
        let size = write_artifact(&path, &output)?;

        let mut stats = TransformStats::compression(original_size, size, strategy);
        stats.page_count = Some(page_count);
        let reduction = stats.compression_ratio.unwrap_or_default();

        info!(
            original = original_size,
            compressed = size,
            ratio = reduction,
            strategy,
            level = ?level,
            "PDF compressed"
        );

        Ok(TransformOutput {
            artifact: ResultArtifact {
                filename,
                path,
                mime_type: PDF_MIME,
            },
            message: format!(
                "PDF compressed successfully! Size reduced by {:.1}%",
                reduction
            ),
            stats,
            intermediates: Vec::new(),
        })
    }
}

/// Use the rasterized output, or optimize structurally when PDFium is not
/// available. Failures while rendering a page are real errors and pass through.
fn with_fallback(
    rasterized: AppResult<Vec<u8>>,
    document: Document,
) -> AppResult<(&'static str, Vec<u8>)> {
    match rasterized {
        Ok(bytes) => Ok((STRATEGY_RASTERIZED, bytes)),
        Err(AppError::Unsupported { feature }) => {
            warn!(reason = %feature, "Rasterizing unavailable, falling back to structural optimization");
            Ok((STRATEGY_OPTIMIZED, optimize(document)?))
        }
        Err(e) => Err(e),
    }
}

/// Bind PDFium from the configured directory, the working directory, or the
/// system library path, in that order.
fn bind_pdfium(library_dir: Option<&Path>) -> AppResult<Pdfium> {
    let from_config = match library_dir {
        Some(dir) => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir)),
        None => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./")),
    };
    let bindings = from_config
        .or_else(|_| Pdfium::bind_to_system_library())
        .map_err(|e| AppError::unsupported(format!("PDFium library not available: {:?}", e)))?;
    Ok(Pdfium::new(bindings))
}

/// Structural compression: strip annotations and interactive forms, drop
/// unreferenced objects, deflate streams.
pub fn optimize(mut document: Document) -> AppResult<Vec<u8>> {
    let page_ids: Vec<_> = document.get_pages().into_values().collect();
    for page_id in page_ids {
        if let Ok(page) = document.get_object_mut(page_id).and_then(Object::as_dict_mut) {
            page.remove(b"Annots");
        }
    }

    if let Ok(root_id) = document.trailer.get(b"Root").and_then(Object::as_reference) {
        if let Ok(catalog) = document.get_object_mut(root_id).and_then(Object::as_dict_mut) {
            catalog.remove(b"AcroForm");
        }
    }

    let pruned = document.prune_objects();
    debug!(pruned = pruned.len(), "Unreferenced objects removed");
    document.compress();
    pdf::to_bytes(&mut document)
}
