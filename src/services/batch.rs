//! Drives the executor across an admission-bounded batch with per-item
//! failure isolation. Every item's staged input and any produced output are
//! handed to the janitor before the report is returned.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::stream::{self, StreamExt};
use tracing::info;

use crate::models::{BatchError, BatchItem, BatchReport, CompressionRequest};
use crate::services::executor::{CodecError, Executor};
use crate::services::staging::StagedFile;

/// Item-level parallelism inside one batch. External-process fan-out is
/// additionally capped by the executor's document semaphore.
const BATCH_WORKERS: usize = 4;

/// Runs the executor once per staged file. A failure on one item never
/// aborts or corrupts the others; each input ends up in exactly one of
/// `items` or `errors`.
pub async fn run(
    executor: &Executor,
    staged: Vec<StagedFile>,
    request: &CompressionRequest,
) -> BatchReport {
    let total = staged.len();

    let outcomes = stream::iter(staged)
        .map(|file| async move {
            let name = file.original_name.clone();
            let outcome = process_one(executor, &file, request).await;
            // `file` drops here, scheduling input cleanup regardless of outcome
            (name, outcome)
        })
        .buffer_unordered(BATCH_WORKERS)
        .collect::<Vec<_>>()
        .await;

    let mut report = BatchReport {
        processed_count: 0,
        error_count: 0,
        items: Vec::new(),
        errors: Vec::new(),
    };

    for (name, outcome) in outcomes {
        match outcome {
            Ok(item) => report.items.push(item),
            Err(e) => report.errors.push(BatchError {
                filename: name,
                message: e.to_string(),
            }),
        }
    }

    report.processed_count = report.items.len();
    report.error_count = report.errors.len();

    info!(
        "Batch finished: {}/{} succeeded, {} failed",
        report.processed_count, total, report.error_count
    );

    report
}

async fn process_one(
    executor: &Executor,
    file: &StagedFile,
    request: &CompressionRequest,
) -> Result<BatchItem, CodecError> {
    let result = executor.compress(file, request).await?;

    // Read the payload into memory, then the artifact is no longer needed
    let bytes = tokio::fs::read(&result.output_path).await;
    executor.staging().janitor().discard(&result.output_path);
    let bytes = bytes?;

    Ok(BatchItem {
        original_name: file.original_name.clone(),
        original_size: result.input_size,
        compressed_size: result.output_size,
        reduction_percent: result.reduction_percent,
        width: result.dimensions.map(|(w, _)| w),
        height: result.dimensions.map(|(_, h)| h),
        data: BASE64.encode(&bytes),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompressionConfig;
    use crate::models::OutputFormat;
    use crate::services::janitor::Janitor;
    use crate::services::staging::Staging;
    use std::collections::HashSet;
    use std::path::Path;
    use std::time::Duration;
    use tokio::time::sleep;

    fn png_bytes(side: u32) -> Vec<u8> {
        let img = image::RgbImage::from_fn(side, side, |x, y| {
            image::Rgb([(x * 3 % 256) as u8, (y * 5 % 256) as u8, 128])
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

    async fn staging_dir_empty(dir: &Path) -> bool {
        for _ in 0..100 {
            let mut entries = tokio::fs::read_dir(dir).await.unwrap();
            if entries.next_entry().await.unwrap().is_none() {
                return true;
            }
            sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_batch_isolates_the_one_malformed_item() {
        let dir = tempfile::tempdir().unwrap();
        let staging = Staging::new(dir.path().to_path_buf(), Janitor::spawn());
        let executor = Executor::new(CompressionConfig::development(), staging.clone());

        let mut staged = Vec::new();
        for i in 0..3 {
            staged.push(
                staging
                    .stage(&format!("ok-{}.png", i), "image/png", &png_bytes(16)[..])
                    .await
                    .unwrap(),
            );
        }
        staged.push(
            staging
                .stage("broken.png", "image/png", &b"garbage, not a png"[..])
                .await
                .unwrap(),
        );

        let request = CompressionRequest {
            format: OutputFormat::Jpeg,
            quality: Some("0.7".to_string()),
            resize: None,
        };
        let report = run(&executor, staged, &request).await;

        assert_eq!(report.processed_count, 3);
        assert_eq!(report.error_count, 1);
        assert_eq!(report.items.len(), 3);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].filename, "broken.png");
        assert!(
            report
                .items
                .iter()
                .all(|item| item.original_name != "broken.png")
        );

        // Exactly one outcome per input, no duplicates
        let mut names: HashSet<&str> = HashSet::new();
        for item in &report.items {
            assert!(names.insert(&item.original_name));
        }
        for err in &report.errors {
            assert!(names.insert(&err.filename));
        }
        assert_eq!(names.len(), 4);

        // Payloads decode back to real bytes
        for item in &report.items {
            let decoded = BASE64.decode(&item.data).unwrap();
            assert_eq!(decoded.len() as u64, item.compressed_size);
            assert!(!decoded.is_empty());
        }

        // Inputs and outputs alike are reclaimed before long
        assert!(staging_dir_empty(dir.path()).await);
    }

    #[tokio::test]
    async fn test_empty_batch_yields_empty_report() {
        let dir = tempfile::tempdir().unwrap();
        let staging = Staging::new(dir.path().to_path_buf(), Janitor::spawn());
        let executor = Executor::new(CompressionConfig::development(), staging);

        let request = CompressionRequest {
            format: OutputFormat::Png,
            quality: None,
            resize: None,
        };
        let report = run(&executor, Vec::new(), &request).await;

        assert_eq!(report.processed_count, 0);
        assert_eq!(report.error_count, 0);
    }
}
