//! One file's transform: resize + re-encode for images (in-process), a
//! Ghostscript rewrite with a hard timeout for documents.

use image::GenericImageView;
use image::imageops::FilterType as ResizeFilter;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::time::{Duration, timeout};
use tracing::{debug, warn};

use crate::config::CompressionConfig;
use crate::models::{CompressionRequest, CompressionResult, FitPolicy, OutputFormat, ResizeSpec};
use crate::services::settings::{self, CodecParams, PngEffort};
use crate::services::staging::{StagedFile, Staging};

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("processing tool exited with an error: {0}")]
    Process(String),

    #[error("processing timed out after {0} seconds")]
    Timeout(u64),

    #[error("processing completed but produced no output")]
    OutputMissing,

    #[error("compression tool is not installed or not on PATH")]
    ToolUnavailable,

    #[error("could not decode input image: {0}")]
    Decode(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Executes one compression at a time. Document rewrites fork an external
/// tool, so they are additionally capped by a semaphore shared across all
/// concurrent requests.
pub struct Executor {
    config: CompressionConfig,
    staging: Staging,
    document_slots: Arc<Semaphore>,
}

impl Executor {
    pub fn new(config: CompressionConfig, staging: Staging) -> Self {
        let document_slots = Arc::new(Semaphore::new(config.max_concurrent_documents.max(1)));
        Self {
            config,
            staging,
            document_slots,
        }
    }

    pub fn staging(&self) -> &Staging {
        &self.staging
    }

    /// Transforms one staged file per the request and reports size/dimension
    /// metadata. On any error the partially written output (if any) has
    /// already been handed to the janitor.
    pub async fn compress(
        &self,
        input: &StagedFile,
        request: &CompressionRequest,
    ) -> Result<CompressionResult, CodecError> {
        let started = Instant::now();
        let params = settings::resolve(request.format, request.quality.as_deref());

        let result = match params {
            CodecParams::Pdf { preset } => self.compress_document(input, preset).await,
            _ => {
                self.compress_image(input, request.format, params, request.resize)
                    .await
            }
        };

        result.map(|mut r| {
            r.duration_ms = started.elapsed().as_millis() as u64;
            debug!(
                "Compressed {} ({} -> {} bytes, {:.1}%) in {}ms",
                input.original_name, r.input_size, r.output_size, r.reduction_percent, r.duration_ms
            );
            r
        })
    }

    async fn compress_image(
        &self,
        input: &StagedFile,
        format: OutputFormat,
        params: CodecParams,
        resize: Option<ResizeSpec>,
    ) -> Result<CompressionResult, CodecError> {
        let data = tokio::fs::read(&input.path).await?;
        let input_size = input.size_bytes;

        // Pixel work blocks; keep it off the async runtime
        let (encoded, dimensions) =
            tokio::task::spawn_blocking(move || -> Result<(Vec<u8>, (u32, u32)), CodecError> {
                let img = image::load_from_memory(&data)
                    .map_err(|e| CodecError::Decode(e.to_string()))?;

                // Metadata must come from the pristine source, before any
                // transform touches it
                let dimensions = img.dimensions();

                let img = match resize {
                    Some(spec) => apply_resize(img, spec),
                    None => img,
                };

                Ok((encode_image(&img, params)?, dimensions))
            })
            .await
            .map_err(|e| CodecError::Process(format!("image task panicked: {}", e)))??;

        let output_path = self.staging.output_path(format.extension());
        tokio::fs::write(&output_path, &encoded).await?;

        let output_size = match verify_output(&output_path).await {
            Ok(size) => size,
            Err(e) => {
                self.staging.janitor().discard(&output_path);
                return Err(e);
            }
        };

        Ok(CompressionResult {
            input_size,
            output_size,
            reduction_percent: CompressionResult::reduction(input_size, output_size),
            dimensions: Some(dimensions),
            output_path,
            duration_ms: 0,
        })
    }

    async fn compress_document(
        &self,
        input: &StagedFile,
        preset: settings::DocumentPreset,
    ) -> Result<CompressionResult, CodecError> {
        let output_path = self.staging.output_path("pdf");

        let result = self.run_ghostscript(input, preset, &output_path).await;
        if let Err(e) = result {
            self.staging.janitor().discard(&output_path);
            return Err(e);
        }

        let output_size = match verify_output(&output_path).await {
            Ok(size) => size,
            Err(e) => {
                self.staging.janitor().discard(&output_path);
                return Err(e);
            }
        };

        Ok(CompressionResult {
            input_size: input.size_bytes,
            output_size,
            reduction_percent: CompressionResult::reduction(input.size_bytes, output_size),
            dimensions: None,
            output_path,
            duration_ms: 0,
        })
    }

    async fn run_ghostscript(
        &self,
        input: &StagedFile,
        preset: settings::DocumentPreset,
        output_path: &Path,
    ) -> Result<(), CodecError> {
        // Bound fork/exec fan-out across all concurrent requests
        let _permit = self
            .document_slots
            .acquire()
            .await
            .map_err(|_| CodecError::Process("document slot pool closed".to_string()))?;

        let timeout_secs = self.config.document_timeout_secs;
        let child = Command::new(&self.config.ghostscript_bin)
            .arg("-sDEVICE=pdfwrite")
            .arg("-dCompatibilityLevel=1.4")
            .arg(format!("-dPDFSETTINGS={}", preset.gs_setting()))
            .arg("-dNOPAUSE")
            .arg("-dQUIET")
            .arg("-dBATCH")
            .arg(format!("-sOutputFile={}", output_path.display()))
            .arg(&input.path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    CodecError::ToolUnavailable
                } else {
                    CodecError::Io(e)
                }
            })?;

        // Dropping the wait future on expiry kills the child (kill_on_drop),
        // so one malformed document cannot stall the pipeline
        let output = match timeout(Duration::from_secs(timeout_secs), child.wait_with_output()).await
        {
            Ok(result) => result?,
            Err(_) => {
                warn!(
                    "Document rewrite of {} exceeded {}s, killed",
                    input.original_name, timeout_secs
                );
                return Err(CodecError::Timeout(timeout_secs));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = stderr.trim();
            let detail = if detail.is_empty() {
                format!("exit status {}", output.status)
            } else {
                detail.to_string()
            };
            return Err(CodecError::Process(detail));
        }

        Ok(())
    }

    /// Probes the external document tool. Used by the health endpoint.
    pub async fn tool_health(&self) -> (bool, Option<String>) {
        let probe = Command::new(&self.config.ghostscript_bin)
            .arg("--version")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        match timeout(Duration::from_secs(5), probe).await {
            Ok(Ok(output)) if output.status.success() => {
                let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
                (true, (!version.is_empty()).then_some(version))
            }
            _ => (false, None),
        }
    }
}

/// A zero-exit tool that silently produced nothing is a failure, not a
/// degenerate success.
async fn verify_output(path: &Path) -> Result<u64, CodecError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() && meta.len() > 0 => Ok(meta.len()),
        _ => Err(CodecError::OutputMissing),
    }
}

/// Applies a resize under the requested fit policy, before the quality-keyed
/// encode.
fn apply_resize(img: image::DynamicImage, spec: ResizeSpec) -> image::DynamicImage {
    let (width, height) = (spec.width.max(1), spec.height.max(1));

    match spec.fit {
        FitPolicy::Cover => img.resize_to_fill(width, height, ResizeFilter::Lanczos3),
        FitPolicy::Fill => img.resize_exact(width, height, ResizeFilter::Lanczos3),
        FitPolicy::Inside => img.resize(width, height, ResizeFilter::Lanczos3),
        FitPolicy::Outside => {
            let (iw, ih) = img.dimensions();
            let scale = f64::max(width as f64 / iw as f64, height as f64 / ih as f64);
            let tw = ((iw as f64 * scale).round() as u32).max(1);
            let th = ((ih as f64 * scale).round() as u32).max(1);
            img.resize_exact(tw, th, ResizeFilter::Lanczos3)
        }
        FitPolicy::Contain => {
            let resized = img.resize(width, height, ResizeFilter::Lanczos3);
            let mut canvas = image::RgbaImage::from_pixel(
                width,
                height,
                image::Rgba([255, 255, 255, 255]),
            );
            let x = (width - resized.width()) / 2;
            let y = (height - resized.height()) / 2;
            image::imageops::overlay(&mut canvas, &resized.to_rgba8(), x as i64, y as i64);
            image::DynamicImage::ImageRgba8(canvas)
        }
    }
}

fn encode_image(img: &image::DynamicImage, params: CodecParams) -> Result<Vec<u8>, CodecError> {
    let mut output = Vec::new();

    match params {
        CodecParams::Jpeg { quality } => {
            // JPEG has no alpha channel
            let rgb = img.to_rgb8();
            let mut encoder =
                image::codecs::jpeg::JpegEncoder::new_with_quality(&mut output, quality);
            encoder
                .encode_image(&rgb)
                .map_err(|e| CodecError::Process(format!("JPEG encoding failed: {}", e)))?;
        }
        CodecParams::Png { effort } => {
            use image::ImageEncoder;
            let compression = match effort {
                PngEffort::Best => image::codecs::png::CompressionType::Best,
                PngEffort::Default => image::codecs::png::CompressionType::Default,
                PngEffort::Fast => image::codecs::png::CompressionType::Fast,
            };
            let rgba = img.to_rgba8();
            let encoder = image::codecs::png::PngEncoder::new_with_quality(
                &mut output,
                compression,
                image::codecs::png::FilterType::Adaptive,
            );
            encoder
                .write_image(
                    &rgba,
                    rgba.width(),
                    rgba.height(),
                    image::ColorType::Rgba8,
                )
                .map_err(|e| CodecError::Process(format!("PNG encoding failed: {}", e)))?;
        }
        CodecParams::Webp { quality } => {
            let rgba = image::DynamicImage::ImageRgba8(img.to_rgba8());
            let webp_data = webp::Encoder::from_image(&rgba)
                .map_err(|e| CodecError::Process(format!("WebP encoding failed: {}", e)))?
                .encode(quality);
            output.extend_from_slice(&webp_data);
        }
        CodecParams::Pdf { .. } => {
            return Err(CodecError::Process(
                "document parameters routed to the image codec".to_string(),
            ));
        }
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::janitor::Janitor;
    use std::path::PathBuf;

    fn gradient_png(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
        });
        let mut data = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(
                &mut std::io::Cursor::new(&mut data),
                image::ImageFormat::Png,
            )
            .unwrap();
        data
    }

    fn executor_in(dir: &Path, config: CompressionConfig) -> Executor {
        let staging = Staging::new(dir.to_path_buf(), Janitor::spawn());
        Executor::new(config, staging)
    }

    async fn stage_bytes(executor: &Executor, name: &str, mime: &str, data: &[u8]) -> StagedFile {
        executor.staging().stage(name, mime, data).await.unwrap()
    }

    fn image_request(format: OutputFormat, quality: &str) -> CompressionRequest {
        CompressionRequest {
            format,
            quality: Some(quality.to_string()),
            resize: None,
        }
    }

    #[tokio::test]
    async fn test_jpeg_compression_reports_pristine_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let executor = executor_in(dir.path(), CompressionConfig::development());
        let data = gradient_png(64, 48);
        let staged = stage_bytes(&executor, "photo.png", "image/png", &data).await;

        let result = executor
            .compress(&staged, &image_request(OutputFormat::Jpeg, "0.8"))
            .await
            .unwrap();

        assert_eq!(result.dimensions, Some((64, 48)));
        assert_eq!(result.input_size, data.len() as u64);
        assert!(result.output_size > 0);
        assert!(result.reduction_percent.is_finite());
        assert!(result.output_path.exists());
        assert_eq!(result.output_path.extension().unwrap(), "jpg");
    }

    #[tokio::test]
    async fn test_webp_and_png_outputs_are_nonempty() {
        let dir = tempfile::tempdir().unwrap();
        let executor = executor_in(dir.path(), CompressionConfig::development());
        let data = gradient_png(32, 32);

        for (format, quality) in [(OutputFormat::Webp, "0.5"), (OutputFormat::Png, "0.3")] {
            let staged = stage_bytes(&executor, "img.png", "image/png", &data).await;
            let result = executor
                .compress(&staged, &image_request(format, quality))
                .await
                .unwrap();
            assert!(result.output_size > 0, "{:?} produced empty output", format);
        }
    }

    #[tokio::test]
    async fn test_undecodable_image_is_a_decode_failure() {
        let dir = tempfile::tempdir().unwrap();
        let executor = executor_in(dir.path(), CompressionConfig::development());
        let staged = stage_bytes(&executor, "broken.png", "image/png", b"not an image").await;

        let err = executor
            .compress(&staged, &image_request(OutputFormat::Png, "0.5"))
            .await
            .unwrap_err();
        assert!(matches!(err, CodecError::Decode(_)));
    }

    #[test]
    fn test_fit_policies_produce_expected_dimensions() {
        let img = image::DynamicImage::ImageRgb8(image::RgbImage::new(100, 50));
        let spec = |fit| ResizeSpec {
            width: 40,
            height: 40,
            fit,
        };

        assert_eq!(apply_resize(img.clone(), spec(FitPolicy::Cover)).dimensions(), (40, 40));
        assert_eq!(apply_resize(img.clone(), spec(FitPolicy::Fill)).dimensions(), (40, 40));
        assert_eq!(apply_resize(img.clone(), spec(FitPolicy::Inside)).dimensions(), (40, 20));
        assert_eq!(apply_resize(img.clone(), spec(FitPolicy::Contain)).dimensions(), (40, 40));
        // Outside bounds the smaller dimension: scale = max(40/100, 40/50)
        assert_eq!(apply_resize(img, spec(FitPolicy::Outside)).dimensions(), (80, 40));
    }

    #[cfg(unix)]
    fn fake_tool(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-gs");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn pdf_request(quality: &str) -> CompressionRequest {
        CompressionRequest {
            format: OutputFormat::Pdf,
            quality: Some(quality.to_string()),
            resize: None,
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_document_timeout_is_a_distinct_failure() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(dir.path(), "sleep 30");
        let config = CompressionConfig {
            ghostscript_bin: tool.display().to_string(),
            document_timeout_secs: 1,
            ..CompressionConfig::development()
        };
        let executor = executor_in(dir.path(), config);
        let staged = stage_bytes(&executor, "slow.pdf", "application/pdf", b"%PDF-1.5").await;

        let err = executor.compress(&staged, &pdf_request("low")).await.unwrap_err();
        assert!(matches!(err, CodecError::Timeout(1)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_zero_exit_without_output_is_output_missing() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(dir.path(), "exit 0");
        let config = CompressionConfig {
            ghostscript_bin: tool.display().to_string(),
            ..CompressionConfig::development()
        };
        let executor = executor_in(dir.path(), config);
        let staged = stage_bytes(&executor, "empty.pdf", "application/pdf", b"%PDF-1.5").await;

        let err = executor.compress(&staged, &pdf_request("medium")).await.unwrap_err();
        assert!(matches!(err, CodecError::OutputMissing));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_carries_tool_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(dir.path(), "echo 'corrupt xref table' >&2; exit 1");
        let config = CompressionConfig {
            ghostscript_bin: tool.display().to_string(),
            ..CompressionConfig::development()
        };
        let executor = executor_in(dir.path(), config);
        let staged = stage_bytes(&executor, "bad.pdf", "application/pdf", b"%PDF-1.5").await;

        match executor.compress(&staged, &pdf_request("high")).await.unwrap_err() {
            CodecError::Process(detail) => assert!(detail.contains("corrupt xref table")),
            other => panic!("expected Process, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_tool_is_tool_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let config = CompressionConfig {
            ghostscript_bin: "definitely-not-a-real-gs-binary".to_string(),
            ..CompressionConfig::development()
        };
        let executor = executor_in(dir.path(), config);
        let staged = stage_bytes(&executor, "doc.pdf", "application/pdf", b"%PDF-1.5").await;

        let err = executor.compress(&staged, &pdf_request("low")).await.unwrap_err();
        assert!(matches!(err, CodecError::ToolUnavailable));

        let (available, version) = executor.tool_health().await;
        assert!(!available);
        assert!(version.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_fake_tool_success_path_writes_output() {
        let dir = tempfile::tempdir().unwrap();
        // Last argument is the input path; output path arrives as -sOutputFile=…
        let tool = fake_tool(
            dir.path(),
            r#"for a in "$@"; do case "$a" in -sOutputFile=*) out="${a#-sOutputFile=}";; esac; done; printf '%%PDF-1.4 shrunk' > "$out""#,
        );
        let config = CompressionConfig {
            ghostscript_bin: tool.display().to_string(),
            ..CompressionConfig::development()
        };
        let executor = executor_in(dir.path(), config);
        let staged = stage_bytes(
            &executor,
            "report.pdf",
            "application/pdf",
            &vec![0x25u8; 4096],
        )
        .await;

        let result = executor.compress(&staged, &pdf_request("low")).await.unwrap();
        assert!(result.output_size > 0);
        assert!(result.reduction_percent > 0.0);
        assert_eq!(result.dimensions, None);
    }
}
