use axum::{
    extract::{multipart::MultipartError, Multipart, State},
    http::StatusCode,
    response::Json,
};
use std::time::Instant;
use tracing::{debug, error, info};

use crate::error::{AppError, AppResult};
use crate::models::{
    CompressionLevel, JobResponse, MarginSize, SplitMode, Tool, ToolOptions, ToolRequest,
    UploadedFile,
};
use crate::services::JobService;

pub async fn merge_handler(
    State(service): State<JobService>,
    multipart: Multipart,
) -> AppResult<Json<JobResponse>> {
    run_tool(service, Tool::Merge, multipart).await
}

pub async fn split_handler(
    State(service): State<JobService>,
    multipart: Multipart,
) -> AppResult<Json<JobResponse>> {
    run_tool(service, Tool::Split, multipart).await
}

pub async fn compress_handler(
    State(service): State<JobService>,
    multipart: Multipart,
) -> AppResult<Json<JobResponse>> {
    run_tool(service, Tool::Compress, multipart).await
}

pub async fn image_to_pdf_handler(
    State(service): State<JobService>,
    multipart: Multipart,
) -> AppResult<Json<JobResponse>> {
    run_tool(service, Tool::ImageToPdf, multipart).await
}

pub async fn pdf_to_word_handler(
    State(service): State<JobService>,
    multipart: Multipart,
) -> AppResult<Json<JobResponse>> {
    run_tool(service, Tool::PdfToWord, multipart).await
}

pub async fn word_to_pdf_handler(
    State(service): State<JobService>,
    multipart: Multipart,
) -> AppResult<Json<JobResponse>> {
    run_tool(service, Tool::WordToPdf, multipart).await
}

async fn run_tool(
    service: JobService,
    tool: Tool,
    mut multipart: Multipart,
) -> AppResult<Json<JobResponse>> {
    let start = Instant::now();
    let request_id = uuid::Uuid::new_v4().to_string()[..8].to_string();

    info!(request_id = %request_id, tool = %tool, "Starting tool request");

    let limit_mb = service.config().max_content_length_mb;
    let form = ToolForm::read(&mut multipart, limit_mb).await?;
    info!(
        request_id = %request_id,
        files = form.files.len(),
        bytes = form.files.iter().map(|f| f.size).sum::<usize>(),
        "Multipart form read"
    );

    let request = form.request(tool)?;
    let uploads = form.files;
    if uploads.is_empty() {
        return Err(AppError::MissingFile);
    }

    let result = tokio::task::spawn_blocking(move || service.submit(request, uploads))
        .await
        .map_err(|e| {
            error!(request_id = %request_id, error = %e, "Job task failed");
            AppError::internal(format!("Job task failed: {}", e))
        })??;

    info!(
        request_id = %request_id,
        job_id = %result.job_id,
        total_time_ms = start.elapsed().as_millis() as u64,
        "Request completed successfully"
    );

    Ok(Json(result.into_response()))
}

/// Fields of a tool form. Unknown fields are ignored.
#[derive(Debug, Default)]
pub struct ToolForm {
    pub files: Vec<UploadedFile>,
    pub output_filename: Option<String>,
    pub split_type: Option<String>,
    pub page_ranges: Vec<String>,
    pub compression_level: Option<String>,
    pub margin_size: Option<String>,
}

impl ToolForm {
    pub async fn read(multipart: &mut Multipart, limit_mb: usize) -> AppResult<Self> {
        let mut form = ToolForm::default();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| multipart_error(e, limit_mb))?
        {
            let name = field.name().unwrap_or("").to_string();
            match name.as_str() {
                "file" | "files" | "files[]" => {
                    let file_name = field.file_name().unwrap_or("").to_string();
                    let content_type = field.content_type().map(|ct| ct.to_string());
                    let data = field.bytes().await.map_err(|e| multipart_error(e, limit_mb))?;

                    let mut file = UploadedFile::new(file_name, data);
                    if let Some(mime_type) = content_type {
                        file = file.with_mime_type(mime_type);
                    }
                    debug!(
                        "Received file: {} ({} bytes, type: {:?})",
                        file.name, file.size, file.mime_type
                    );
                    form.files.push(file);
                }
                "page_ranges" | "page_ranges[]" => {
                    form.page_ranges.push(text(field, limit_mb).await?);
                }
                "output_filename" => form.output_filename = Some(text(field, limit_mb).await?),
                "split_type" => form.split_type = Some(text(field, limit_mb).await?),
                "compression_level" => form.compression_level = Some(text(field, limit_mb).await?),
                "margin_size" => form.margin_size = Some(text(field, limit_mb).await?),
                other => debug!(field = other, "Ignoring unknown form field"),
            }
        }

        Ok(form)
    }

    /// Validate the tool options. Runs before anything touches the disk.
    pub fn request(&self, tool: Tool) -> AppResult<ToolRequest> {
        let options = match tool {
            Tool::Merge => ToolOptions::Merge,
            Tool::Split => {
                ToolOptions::Split(SplitMode::parse(self.split_type.as_deref(), &self.page_ranges)?)
            }
            Tool::Compress => ToolOptions::Compress(CompressionLevel::parse_option(
                self.compression_level.as_deref(),
            )?),
            Tool::ImageToPdf => {
                ToolOptions::ImageToPdf(MarginSize::parse_option(self.margin_size.as_deref())?)
            }
            Tool::PdfToWord => ToolOptions::PdfToWord,
            Tool::WordToPdf => ToolOptions::WordToPdf,
        };

        let request = ToolRequest::new(options);
        Ok(match &self.output_filename {
            Some(name) => request.with_output_filename(name.as_str()),
            None => request,
        })
    }
}

async fn text(field: axum::extract::multipart::Field<'_>, limit_mb: usize) -> AppResult<String> {
    field.text().await.map_err(|e| multipart_error(e, limit_mb))
}

fn multipart_error(e: MultipartError, limit_mb: usize) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::FileTooLarge { limit: limit_mb }
    } else {
        AppError::validation(format!("Failed to read multipart field: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form() -> ToolForm {
        ToolForm::default()
    }

    #[test]
    fn options_default_when_missing() {
        let request = form().request(Tool::Compress).unwrap();
        assert_eq!(request.options, ToolOptions::Compress(CompressionLevel::Medium));

        let request = form().request(Tool::ImageToPdf).unwrap();
        assert_eq!(request.options, ToolOptions::ImageToPdf(MarginSize::Medium));

        let request = form().request(Tool::Split).unwrap();
        assert_eq!(request.options, ToolOptions::Split(SplitMode::Pages));
    }

    #[test]
    fn unknown_option_values_are_rejected() {
        let mut f = form();
        f.compression_level = Some("extreme".to_string());
        assert!(matches!(
            f.request(Tool::Compress),
            Err(AppError::ValidationError { .. })
        ));

        let mut f = form();
        f.split_type = Some("chapters".to_string());
        assert!(f.request(Tool::Split).is_err());

        let mut f = form();
        f.split_type = Some("ranges".to_string());
        f.page_ranges = vec!["1-a".to_string()];
        assert!(f.request(Tool::Split).is_err());
    }

    #[test]
    fn output_filename_is_carried_over() {
        let mut f = form();
        f.output_filename = Some("combined".to_string());
        let request = f.request(Tool::Merge).unwrap();
        assert_eq!(request.output_filename.as_deref(), Some("combined"));

        f.output_filename = Some("  ".to_string());
        assert_eq!(f.request(Tool::Merge).unwrap().output_filename, None);
    }
}
