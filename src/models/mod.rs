use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use utoipa::ToSchema;

/// Output format of a compression request. Closed set; anything else is
/// rejected at the HTTP boundary before staging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Jpeg,
    Png,
    Webp,
    Pdf,
}

impl OutputFormat {
    pub fn is_image(self) -> bool {
        !matches!(self, OutputFormat::Pdf)
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Png => "image/png",
            OutputFormat::Webp => "image/webp",
            OutputFormat::Pdf => "application/pdf",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Png => "png",
            OutputFormat::Webp => "webp",
            OutputFormat::Pdf => "pdf",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "jpeg" | "jpg" => Ok(OutputFormat::Jpeg),
            "png" => Ok(OutputFormat::Png),
            "webp" => Ok(OutputFormat::Webp),
            "pdf" => Ok(OutputFormat::Pdf),
            other => Err(format!("unsupported format '{}'", other)),
        }
    }
}

/// Resize semantics relative to the target dimensions, matching the
/// cover/contain/fill/inside/outside vocabulary of common image tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum FitPolicy {
    /// Crop to fill the target aspect ratio.
    Cover,
    /// Letterbox so the whole image fits inside the target box.
    Contain,
    /// Stretch to the exact target, ignoring aspect ratio.
    Fill,
    /// Shrink so both dimensions fit within the target, preserving aspect.
    Inside,
    /// Scale so both dimensions cover the target, preserving aspect, no crop.
    Outside,
}

impl FromStr for FitPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cover" => Ok(FitPolicy::Cover),
            "contain" => Ok(FitPolicy::Contain),
            "fill" => Ok(FitPolicy::Fill),
            "inside" => Ok(FitPolicy::Inside),
            "outside" => Ok(FitPolicy::Outside),
            other => Err(format!("unknown fit policy '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ResizeSpec {
    pub width: u32,
    pub height: u32,
    pub fit: FitPolicy,
}

/// Immutable per-request compression parameters, validated once at the HTTP
/// boundary and applied uniformly to every file in the request.
///
/// `quality` carries the raw client string; the settings resolver owns the
/// parsing and falls back to a balanced default on anything unrecognized.
#[derive(Debug, Clone)]
pub struct CompressionRequest {
    pub format: OutputFormat,
    pub quality: Option<String>,
    pub resize: Option<ResizeSpec>,
}

/// Outcome of one successful compression, including the transient path of the
/// produced artifact. The path is only valid until the janitor reclaims it.
#[derive(Debug, Clone)]
pub struct CompressionResult {
    pub input_size: u64,
    pub output_size: u64,
    /// (input − output) / input × 100. Negative when the codec enlarged a
    /// pathological input; surfaced as-is, never clamped.
    pub reduction_percent: f64,
    /// Pristine source dimensions, captured before any transform. None for
    /// documents.
    pub dimensions: Option<(u32, u32)>,
    pub output_path: PathBuf,
    pub duration_ms: u64,
}

impl CompressionResult {
    pub fn reduction(input: u64, output: u64) -> f64 {
        if input == 0 {
            return 0.0;
        }
        (input as f64 - output as f64) / input as f64 * 100.0
    }
}

/// One succeeded item in a batch report, with the compressed bytes inlined as
/// base64 for JSON transport. Memory-heavy for large batches, which is why
/// admission caps the batch size.
#[derive(Debug, Serialize, ToSchema)]
pub struct BatchItem {
    pub original_name: String,
    pub original_size: u64,
    pub compressed_size: u64,
    pub reduction_percent: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    /// Base64-encoded compressed bytes.
    pub data: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BatchError {
    pub filename: String,
    pub message: String,
}

/// Aggregate over a whole batch: every admitted input appears in exactly one
/// of `items` or `errors`.
#[derive(Debug, Serialize, ToSchema)]
pub struct BatchReport {
    pub processed_count: usize,
    pub error_count: usize,
    pub items: Vec<BatchItem>,
    pub errors: Vec<BatchError>,
}
