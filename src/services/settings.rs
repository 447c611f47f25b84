//! Pure mapping from (quality level, target format) to concrete codec
//! parameters. Total by construction: unrecognized quality values resolve to
//! the balanced default instead of erroring.

use crate::models::OutputFormat;

/// Balanced default for image quality when the client sends nothing usable
pub const DEFAULT_IMAGE_QUALITY: f32 = 0.8;

/// PNG effort tier. The codec quality knob for PNG is CPU effort, not loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PngEffort {
    /// Maximum effort, smallest output
    Best,
    /// Balanced
    Default,
    /// Light and fast
    Fast,
}

/// Discrete document preset, mirroring Ghostscript's PDFSETTINGS tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentPreset {
    /// /screen, 72 dpi raster targets
    Low,
    /// /ebook, 150 dpi
    Medium,
    /// /printer, 300 dpi
    High,
    /// /prepress, 300 dpi with high-fidelity settings
    Maximum,
}

impl DocumentPreset {
    pub fn gs_setting(self) -> &'static str {
        match self {
            DocumentPreset::Low => "/screen",
            DocumentPreset::Medium => "/ebook",
            DocumentPreset::High => "/printer",
            DocumentPreset::Maximum => "/prepress",
        }
    }

    pub fn raster_dpi(self) -> u16 {
        match self {
            DocumentPreset::Low => 72,
            DocumentPreset::Medium => 150,
            DocumentPreset::High | DocumentPreset::Maximum => 300,
        }
    }

    /// Unrecognized presets fall back to the balanced /ebook tier.
    pub fn parse_or_default(s: Option<&str>) -> Self {
        match s.map(|s| s.trim().to_lowercase()).as_deref() {
            Some("low") => DocumentPreset::Low,
            Some("medium") => DocumentPreset::Medium,
            Some("high") => DocumentPreset::High,
            Some("maximum") => DocumentPreset::Maximum,
            _ => DocumentPreset::Medium,
        }
    }
}

/// Concrete parameters handed to the executor, one variant per output format
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CodecParams {
    Jpeg { quality: u8 },
    Png { effort: PngEffort },
    Webp { quality: f32 },
    Pdf { preset: DocumentPreset },
}

/// Clamp-and-default image quality parsing. Out-of-range and unparsable
/// values resolve to the balanced default rather than erroring.
fn image_quality(raw: Option<&str>) -> f32 {
    raw.and_then(|s| s.trim().parse::<f32>().ok())
        .filter(|q| (0.0..=1.0).contains(q))
        .unwrap_or(DEFAULT_IMAGE_QUALITY)
}

/// Codec quality on the conventional 0–100 scale
pub fn scaled_quality(q: f32) -> u8 {
    (q * 100.0).round() as u8
}

fn png_effort(q: f32) -> PngEffort {
    if q < 0.5 {
        PngEffort::Best
    } else if q < 0.8 {
        PngEffort::Default
    } else {
        PngEffort::Fast
    }
}

/// Resolve a raw client quality string into codec parameters for `format`.
pub fn resolve(format: OutputFormat, quality: Option<&str>) -> CodecParams {
    match format {
        OutputFormat::Jpeg => CodecParams::Jpeg {
            quality: scaled_quality(image_quality(quality)),
        },
        OutputFormat::Png => CodecParams::Png {
            effort: png_effort(image_quality(quality)),
        },
        OutputFormat::Webp => CodecParams::Webp {
            quality: scaled_quality(image_quality(quality)) as f32,
        },
        OutputFormat::Pdf => CodecParams::Pdf {
            preset: DocumentPreset::parse_or_default(quality),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scaled_quality_rounds() {
        assert_eq!(scaled_quality(0.0), 0);
        assert_eq!(scaled_quality(0.8), 80);
        assert_eq!(scaled_quality(0.555), 56);
        assert_eq!(scaled_quality(1.0), 100);
    }

    #[test]
    fn test_scaled_quality_monotonic() {
        let mut last = 0;
        for i in 0..=1000 {
            let q = i as f32 / 1000.0;
            let scaled = scaled_quality(q);
            assert!(scaled >= last, "quality regressed at q={}", q);
            last = scaled;
        }
        assert_eq!(last, 100);
    }

    #[test]
    fn test_image_quality_fallback() {
        assert_eq!(image_quality(None), DEFAULT_IMAGE_QUALITY);
        assert_eq!(image_quality(Some("not-a-number")), DEFAULT_IMAGE_QUALITY);
        assert_eq!(image_quality(Some("1.5")), DEFAULT_IMAGE_QUALITY);
        assert_eq!(image_quality(Some("-0.1")), DEFAULT_IMAGE_QUALITY);
        assert_eq!(image_quality(Some("0.3")), 0.3);
    }

    #[test]
    fn test_png_effort_tiers() {
        assert_eq!(png_effort(0.0), PngEffort::Best);
        assert_eq!(png_effort(0.49), PngEffort::Best);
        assert_eq!(png_effort(0.5), PngEffort::Default);
        assert_eq!(png_effort(0.79), PngEffort::Default);
        assert_eq!(png_effort(0.8), PngEffort::Fast);
        assert_eq!(png_effort(1.0), PngEffort::Fast);
    }

    #[test]
    fn test_document_presets() {
        assert_eq!(DocumentPreset::Low.raster_dpi(), 72);
        assert_eq!(DocumentPreset::Medium.raster_dpi(), 150);
        assert_eq!(DocumentPreset::High.raster_dpi(), 300);
        assert_eq!(DocumentPreset::Maximum.raster_dpi(), 300);

        assert_eq!(DocumentPreset::Low.gs_setting(), "/screen");
        assert_eq!(DocumentPreset::Medium.gs_setting(), "/ebook");
        assert_eq!(DocumentPreset::High.gs_setting(), "/printer");
        assert_eq!(DocumentPreset::Maximum.gs_setting(), "/prepress");
    }

    #[test]
    fn test_unknown_preset_falls_back_to_ebook() {
        assert_eq!(
            DocumentPreset::parse_or_default(Some("ultra")),
            DocumentPreset::Medium
        );
        assert_eq!(DocumentPreset::parse_or_default(None), DocumentPreset::Medium);
        assert_eq!(
            DocumentPreset::parse_or_default(Some("")).raster_dpi(),
            150
        );
    }

    #[test]
    fn test_resolve_is_total() {
        // Any quality string resolves to something usable for every format
        for q in [None, Some("garbage"), Some("0.9"), Some("low")] {
            for format in [
                OutputFormat::Jpeg,
                OutputFormat::Png,
                OutputFormat::Webp,
                OutputFormat::Pdf,
            ] {
                let _ = resolve(format, q);
            }
        }

        assert_eq!(
            resolve(OutputFormat::Jpeg, Some("0.8")),
            CodecParams::Jpeg { quality: 80 }
        );
        assert_eq!(
            resolve(OutputFormat::Pdf, Some("low")),
            CodecParams::Pdf {
                preset: DocumentPreset::Low
            }
        );
    }
}
