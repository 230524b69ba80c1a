use axum::{
    body::Body,
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
};
use tokio_util::io::ReaderStream;
use tracing::{error, info};

use crate::error::{AppError, AppResult};
use crate::services::JobService;

/// Stream a registered result as an attachment. The job's workspace is
/// removed a few seconds later.
pub async fn download_handler(
    State(service): State<JobService>,
    Path((job_id, filename)): Path<(String, String)>,
) -> AppResult<Response> {
    let ticket = tokio::task::spawn_blocking(move || service.download(&job_id, &filename))
        .await
        .map_err(|e| {
            error!(error = %e, "Download task failed");
            AppError::internal(format!("Download task failed: {}", e))
        })??;

    info!(
        job_id = %ticket.job_id,
        tool = %ticket.tool,
        filename = %ticket.filename,
        bytes = ticket.size,
        "Serving result"
    );

    // Registered names are already restricted to [A-Za-z0-9_.-].
    let disposition = format!("attachment; filename=\"{}\"", ticket.filename);
    let body = Body::from_stream(ReaderStream::new(tokio::fs::File::from_std(ticket.file)));
    Ok((
        [
            (header::CONTENT_TYPE, ticket.mime_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
            (header::CONTENT_LENGTH, ticket.size.to_string()),
        ],
        body,
    )
        .into_response())
}
