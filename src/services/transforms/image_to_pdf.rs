use image::io::Reader as ImageReader;
use tracing::{debug, info, instrument};

use super::{output_name, write_artifact, Transform, TransformInput, TransformOutput, PDF_MIME};
use crate::error::{AppError, AppResult};
use crate::models::{MarginSize, Tool, ToolOptions, TransformStats};
use crate::services::pdf::{self, DocumentBuilder, Placement, A4_HEIGHT, A4_WIDTH};
use crate::services::registry::ResultArtifact;
use crate::services::stager::{UploadPolicy, IMAGE_EXTENSIONS};

const JPEG_QUALITY: u8 = 95;

/// One A4 page per uploaded image, in upload order.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageToPdfTransform;

impl Transform for ImageToPdfTransform {
    fn tool(&self) -> Tool {
        Tool::ImageToPdf
    }

    fn policy(&self) -> UploadPolicy {
        UploadPolicy::at_least(IMAGE_EXTENSIONS, 1, "image")
    }

    #[instrument(skip_all, fields(job_id = %input.job_id, images = input.staged.len()))]
    fn run(&self, input: &TransformInput<'_>) -> AppResult<TransformOutput> {
        let ToolOptions::ImageToPdf(margin) = input.options else {
            return Err(input.options_mismatch(self.tool()));
        };

        let mut builder = DocumentBuilder::new();
        for file in input.staged {
            let failed = |e: String| {
                AppError::processing(format!("Error processing image {}: {}", file.original_name, e))
            };
            let image = ImageReader::open(&file.path)
                .map_err(|e| failed(e.to_string()))?
                .with_guessed_format()
                .map_err(|e| failed(e.to_string()))?
                .decode()
                .map_err(|e| failed(e.to_string()))?;

            let (pixel_width, pixel_height) = (image.width(), image.height());
            let jpeg = pdf::encode_jpeg(&image, JPEG_QUALITY)?;
            let image_id = builder.add_jpeg(jpeg, pixel_width, pixel_height);
            let placement = placement(pixel_width, pixel_height, *margin);
            builder.add_image_page(image_id, A4_WIDTH, A4_HEIGHT, placement)?;

            debug!(
                image = %file.original_name,
                pixel_width,
                pixel_height,
                width = placement.width,
                height = placement.height,
                "Image placed"
            );
        }

        let count = builder.page_count();
        let bytes = pdf::to_bytes(&mut builder.finish())?;

        let default_stem = format!("images-to-pdf-{}", input.job_id.short());
        let filename = output_name(input.output_filename, &default_stem, "pdf");
        let path = input.workspace.join(&filename);
        let size = write_artifact(&path, &bytes)?;

        info!(images = count, bytes = size, margin = ?margin, "Images converted to PDF");

        Ok(TransformOutput {
            artifact: ResultArtifact {
                filename,
                path,
                mime_type: PDF_MIME,
            },
            message: format!("Successfully converted {} images to PDF", count),
            stats: TransformStats::pages(count),
            intermediates: Vec::new(),
        })
    }
}

/// Position of an image on an A4 page. Without a margin the image is
/// stretched over the whole page; otherwise it is scaled uniformly to fit the
/// inner area and centered.
pub fn placement(pixel_width: u32, pixel_height: u32, margin: MarginSize) -> Placement {
    let margin = margin.points();
    if margin <= 0.0 || pixel_width == 0 || pixel_height == 0 {
        return Placement {
            x: 0.0,
            y: 0.0,
            width: A4_WIDTH,
            height: A4_HEIGHT,
        };
    }

    let available_width = A4_WIDTH - 2.0 * margin;
    let available_height = A4_HEIGHT - 2.0 * margin;
    let scale = (available_width / pixel_width as f32).min(available_height / pixel_height as f32);
    let width = pixel_width as f32 * scale;
    let height = pixel_height as f32 * scale;

    Placement {
        x: (A4_WIDTH - width) / 2.0,
        y: (A4_HEIGHT - height) / 2.0,
        width,
        height,
    }
}
