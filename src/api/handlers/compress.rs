use crate::AppState;
use crate::api::error::AppError;
use crate::models::{
    BatchError, CompressionRequest, FitPolicy, OutputFormat, ResizeSpec,
};
use crate::services::batch;
use crate::services::staging::StagedFile;
use crate::utils::validation::{validate_file_size, validate_format_match, validate_upload};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, State, multipart::Field},
    http::header,
    response::Response,
};
use futures::TryStreamExt;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use std::path::Path;
use tokio::io::AsyncReadExt;
use tokio_util::io::StreamReader;

/// Raw multipart form fields shared by the single and batch endpoints.
#[derive(Default)]
struct FormFields {
    format: Option<String>,
    quality: Option<String>,
    width: Option<String>,
    height: Option<String>,
    fit: Option<String>,
}

impl FormFields {
    async fn absorb(&mut self, name: &str, field: Field<'_>) -> Result<bool, AppError> {
        let slot = match name {
            "format" => &mut self.format,
            "quality" => &mut self.quality,
            "width" => &mut self.width,
            "height" => &mut self.height,
            "fit" => &mut self.fit,
            _ => return Ok(false),
        };
        *slot = Some(
            field
                .text()
                .await
                .map_err(|e| AppError::BadRequest(e.to_string()))?,
        );
        Ok(true)
    }

    fn output_format(&self) -> Result<OutputFormat, AppError> {
        self.format
            .as_deref()
            .ok_or_else(|| AppError::BadRequest("'format' field is required".to_string()))?
            .parse()
            .map_err(AppError::BadRequest)
    }

    fn resize_spec(&self) -> Result<Option<ResizeSpec>, AppError> {
        let parse_dim = |raw: &Option<String>, name: &str| -> Result<Option<u32>, AppError> {
            match raw {
                None => Ok(None),
                Some(v) => v
                    .trim()
                    .parse::<u32>()
                    .ok()
                    .filter(|d| *d > 0)
                    .map(Some)
                    .ok_or_else(|| {
                        AppError::BadRequest(format!("'{}' must be a positive integer", name))
                    }),
            }
        };

        match (parse_dim(&self.width, "width")?, parse_dim(&self.height, "height")?) {
            (None, None) => Ok(None),
            (Some(width), Some(height)) => {
                let fit = match self.fit.as_deref() {
                    None => FitPolicy::Cover,
                    Some(raw) => raw.parse().map_err(AppError::BadRequest)?,
                };
                Ok(Some(ResizeSpec { width, height, fit }))
            }
            _ => Err(AppError::BadRequest(
                "resize requires both 'width' and 'height'".to_string(),
            )),
        }
    }
}

/// Validates one multipart file field and streams it into staging. The first
/// kilobyte is peeked for magic-byte verification before any staging write.
async fn stage_field(state: &AppState, field: Field<'_>) -> Result<StagedFile, AppError> {
    let original_filename = field.file_name().unwrap_or("unnamed").to_string();
    let content_type = field.content_type().map(|s| s.to_string());

    let body_with_io_error = field.map_err(std::io::Error::other);
    let mut reader = StreamReader::new(body_with_io_error);

    let mut header_buffer = [0u8; 1024];
    let n = reader
        .read(&mut header_buffer)
        .await
        .map_err(|e| AppError::Internal(format!("read error: {}", e)))?;
    let header = &header_buffer[..n];

    let filename = validate_upload(&original_filename, content_type.as_deref(), header)
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    // Put the peeked header back in front of the remaining stream, capped at
    // one byte over the ceiling so an oversize body is cut off mid-stream
    // instead of being written to staging in full
    let header_cursor = std::io::Cursor::new(header.to_vec());
    let chained_reader = header_cursor
        .chain(reader)
        .take(state.config.max_file_size as u64 + 1);

    let staged = state
        .executor
        .staging()
        .stage(
            &filename,
            content_type.as_deref().unwrap_or("application/octet-stream"),
            chained_reader,
        )
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;

    // Anything that filled the capped reader past the ceiling is oversize
    validate_file_size(staged.size_bytes as usize, state.config.max_file_size)
        .map_err(|e| AppError::PayloadTooLarge(e.to_string()))?;

    Ok(staged)
}

fn attachment_name(original: &str, format: OutputFormat) -> String {
    let stem = Path::new(original)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("file");
    format!("{}-compressed.{}", stem, format.extension())
}

#[utoipa::path(
    post,
    path = "/api/compress",
    request_body(content = String, content_type = "multipart/form-data", description = "One 'file' field plus 'format', optional 'quality', 'width', 'height', 'fit'"),
    responses(
        (status = 200, description = "Compressed file bytes with size metadata headers"),
        (status = 400, description = "Validation failure"),
        (status = 413, description = "File exceeds the size ceiling"),
        (status = 503, description = "Document tool unavailable")
    ),
    tag = "compression"
)]
pub async fn compress_single(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let mut fields = FormFields::default();
    let mut staged: Option<StagedFile> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            staged = Some(stage_field(&state, field).await?);
        } else {
            fields.absorb(&name, field).await?;
        }
    }

    let format = fields.output_format()?;
    let staged =
        staged.ok_or_else(|| AppError::BadRequest("'file' field is required".to_string()))?;

    validate_format_match(&staged.mime_type, format)
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let request = CompressionRequest {
        format,
        quality: fields.quality.clone(),
        resize: fields.resize_spec()?,
    };

    // Single-file mode: any codec failure fails the whole request. The staged
    // input's guard still runs, so its artifact is reclaimed either way.
    let result = state.executor.compress(&staged, &request).await?;

    let payload = tokio::fs::read(&result.output_path).await;
    // The payload is in memory now; nothing can race the deletion
    state.executor.staging().janitor().discard(&result.output_path);
    let payload = payload.map_err(|e| AppError::Internal(e.to_string()))?;

    let filename = attachment_name(&staged.original_name, format);
    let encoded_name = utf8_percent_encode(&filename, NON_ALPHANUMERIC);

    let mut response = Response::builder()
        .header(header::CONTENT_TYPE, format.mime_type())
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename*=UTF-8''{}", encoded_name),
        )
        .header("x-original-size", result.input_size)
        .header("x-compressed-size", result.output_size)
        .header(
            "x-reduction-percent",
            format!("{:.2}", result.reduction_percent),
        )
        .header("x-duration-ms", result.duration_ms);

    if let Some((width, height)) = result.dimensions {
        response = response
            .header("x-image-width", width)
            .header("x-image-height", height);
    }

    response
        .body(Body::from(payload))
        .map_err(|e| AppError::Internal(e.to_string()))
}

#[utoipa::path(
    post,
    path = "/api/compress/batch",
    request_body(content = String, content_type = "multipart/form-data", description = "Repeated 'files' fields plus 'format' and optional 'quality'"),
    responses(
        (status = 200, description = "Batch report", body = crate::models::BatchReport),
        (status = 400, description = "Validation failure or batch over the admission ceiling")
    ),
    tag = "compression"
)]
pub async fn compress_batch(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<crate::models::BatchReport>, AppError> {
    let mut fields = FormFields::default();
    let mut staged: Vec<StagedFile> = Vec::new();
    let mut rejected: Vec<BatchError> = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == "files" || name == "file" {
            // Clients usually send the format field first; once it is known
            // the format-specific ceiling stops further files from ever
            // being staged. Until then the larger bound applies and the
            // post-loop check settles the rest.
            let ceiling = match fields
                .format
                .as_deref()
                .and_then(|f| f.parse::<OutputFormat>().ok())
            {
                Some(f) if f.is_image() => state.config.max_batch_images,
                Some(_) => state.config.max_batch_documents,
                None => state
                    .config
                    .max_batch_images
                    .max(state.config.max_batch_documents),
            };
            if staged.len() + rejected.len() >= ceiling {
                return Err(AppError::BadRequest(format!(
                    "batch exceeds the {} file ceiling",
                    ceiling
                )));
            }
            let filename = field.file_name().unwrap_or("unnamed").to_string();
            match stage_field(&state, field).await {
                Ok(file) => staged.push(file),
                // Item-level validation failures are isolated, not fatal
                Err(AppError::BadRequest(msg)) | Err(AppError::PayloadTooLarge(msg)) => {
                    rejected.push(BatchError {
                        filename,
                        message: msg,
                    });
                }
                Err(e) => return Err(e),
            }
        } else {
            fields.absorb(&name, field).await?;
        }
    }

    let format = fields.output_format()?;

    let ceiling = if format.is_image() {
        state.config.max_batch_images
    } else {
        state.config.max_batch_documents
    };
    if staged.len() + rejected.len() > ceiling {
        return Err(AppError::BadRequest(format!(
            "batch exceeds the {} file ceiling for {} requests",
            ceiling,
            format.extension()
        )));
    }
    if staged.is_empty() && rejected.is_empty() {
        return Err(AppError::BadRequest(
            "at least one 'files' field is required".to_string(),
        ));
    }

    // Inputs of the wrong family fail individually, like any other bad item
    let (admitted, mismatched): (Vec<_>, Vec<_>) = staged
        .into_iter()
        .partition(|file| validate_format_match(&file.mime_type, format).is_ok());
    for file in mismatched {
        rejected.push(BatchError {
            filename: file.original_name.clone(),
            message: format!(
                "'{}' input cannot be compressed to {}",
                file.mime_type,
                format.extension()
            ),
        });
        // guard drop reclaims the staged input
    }

    let request = CompressionRequest {
        format,
        quality: fields.quality.clone(),
        resize: fields.resize_spec()?,
    };

    let mut report = batch::run(&state.executor, admitted, &request).await;
    report.errors.extend(rejected);
    report.error_count = report.errors.len();

    Ok(Json(report))
}
