//! Staging of uploaded files onto the transient filesystem area.
//!
//! Every staged input is wrapped in a [`StagedFile`] guard whose drop
//! schedules deletion through the janitor, so cleanup holds on every exit
//! path of a request without per-handler bookkeeping.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rand::Rng;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncWriteExt};
use uuid::Uuid;

use crate::services::janitor::Janitor;

/// Transient uploaded artifact, exclusively owned by the handling request.
/// Dropping the guard hands the path to the janitor; explicit deletion earlier
/// is fine since the janitor's delete is idempotent.
#[derive(Debug)]
pub struct StagedFile {
    pub id: String,
    pub original_name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub mime_type: String,
    pub created_at: DateTime<Utc>,
    janitor: Janitor,
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        self.janitor.discard(&self.path);
    }
}

/// Factory for staged files, bound to the configured staging directory.
#[derive(Clone)]
pub struct Staging {
    dir: PathBuf,
    janitor: Janitor,
}

impl Staging {
    pub fn new(dir: PathBuf, janitor: Janitor) -> Self {
        Self { dir, janitor }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn janitor(&self) -> &Janitor {
        &self.janitor
    }

    /// Collision-resistant name for a shared staging directory: millisecond
    /// timestamp plus a random suffix, keeping the original extension.
    fn unique_name(original_name: &str, tag: &str) -> String {
        let suffix: u32 = rand::thread_rng().r#gen();
        let ext = Path::new(original_name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("bin")
            .to_lowercase();
        format!(
            "{}-{}-{:08x}.{}",
            tag,
            Utc::now().timestamp_millis(),
            suffix,
            ext
        )
    }

    /// Streams an upload to a uniquely named staging file and returns its
    /// guard. A partial file left by a failed copy is removed before the
    /// error propagates.
    pub async fn stage<R>(
        &self,
        original_name: &str,
        mime_type: &str,
        mut reader: R,
    ) -> Result<StagedFile>
    where
        R: AsyncRead + Unpin,
    {
        let path = self.dir.join(Self::unique_name(original_name, "in"));

        let size = async {
            let mut file = tokio::fs::File::create(&path)
                .await
                .with_context(|| format!("failed to create staging file {}", path.display()))?;
            let size = tokio::io::copy(&mut reader, &mut file)
                .await
                .context("failed to write upload to staging")?;
            file.flush().await?;
            Ok::<u64, anyhow::Error>(size)
        }
        .await;

        let size = match size {
            Ok(size) => size,
            Err(e) => {
                self.janitor.discard(&path);
                return Err(e);
            }
        };

        Ok(StagedFile {
            id: Uuid::new_v4().to_string(),
            original_name: original_name.to_string(),
            path,
            size_bytes: size,
            mime_type: mime_type.to_string(),
            created_at: Utc::now(),
            janitor: self.janitor.clone(),
        })
    }

    /// Unique path for a compression output artifact.
    pub fn output_path(&self, extension: &str) -> PathBuf {
        self.dir
            .join(Self::unique_name(&format!("out.{}", extension), "out"))
    }
}
