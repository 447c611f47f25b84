use anyhow::{Result, anyhow};
use std::path::Path;

use crate::models::OutputFormat;

/// MIME types the pipeline accepts as input
pub const ALLOWED_MIME_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/webp",
    "application/pdf",
];

/// Magic byte signatures for input type verification. WebP is handled
/// separately: RIFF is a generic container and needs the fourcc at offset 8.
const MAGIC_SIGNATURES: &[(&[u8], &str)] = &[
    (&[0xFF, 0xD8, 0xFF], "image/jpeg"),            // JPEG
    (&[0x89, 0x50, 0x4E, 0x47], "image/png"),       // PNG
    (&[0x25, 0x50, 0x44, 0x46], "application/pdf"), // %PDF
];

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub code: &'static str,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Validates file size against maximum limit
pub fn validate_file_size(size: usize, max_size: usize) -> Result<()> {
    if size > max_size {
        return Err(anyhow!(ValidationError {
            code: "FILE_TOO_LARGE",
            message: format!(
                "File size {} bytes exceeds maximum allowed {} bytes ({} MB)",
                size,
                max_size,
                max_size / 1024 / 1024
            ),
        }));
    }
    Ok(())
}

/// Validates the declared MIME type against the supported set
pub fn validate_mime_type(content_type: &str) -> Result<()> {
    let normalized = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_lowercase();

    // "image/jpg" shows up in the wild even though it was never registered
    let normalized = if normalized == "image/jpg" {
        "image/jpeg".to_string()
    } else {
        normalized
    };

    if ALLOWED_MIME_TYPES
        .iter()
        .any(|&allowed| allowed == normalized)
    {
        return Ok(());
    }

    Err(anyhow!(ValidationError {
        code: "INVALID_MIME_TYPE",
        message: format!(
            "MIME type '{}' is not supported. Only JPEG, PNG, WebP and PDF are accepted.",
            content_type
        ),
    }))
}

/// The input MIME type must belong to the family the requested output format
/// transforms: images for jpeg/png/webp, PDF for pdf.
pub fn validate_format_match(content_type: &str, format: OutputFormat) -> Result<()> {
    let is_image_input = content_type.starts_with("image/");
    if is_image_input != format.is_image() {
        return Err(anyhow!(ValidationError {
            code: "FORMAT_MISMATCH",
            message: format!(
                "'{}' input cannot be compressed to {}",
                content_type,
                format.extension()
            ),
        }));
    }
    Ok(())
}

/// Sanitizes filename to prevent path traversal and injection attacks
/// Returns the sanitized filename or an error if the name is invalid
pub fn sanitize_filename(filename: &str) -> Result<String> {
    // Get only the filename component (remove any path)
    let name = Path::new(filename)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");

    if name.is_empty() {
        return Err(anyhow!(ValidationError {
            code: "INVALID_FILENAME",
            message: "Filename cannot be empty".to_string(),
        }));
    }

    if filename.contains("..") || filename.contains('/') || filename.contains('\\') {
        tracing::warn!("Path traversal attempt detected: {}", filename);
    }

    // Remove dangerous characters, keep only safe ones
    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_control()
                || c == '/'
                || c == '\\'
                || c == ':'
                || c == '*'
                || c == '?'
                || c == '"'
                || c == '<'
                || c == '>'
                || c == '|'
                || c == ';'
            {
                '_'
            } else {
                c
            }
        })
        .collect();

    // Limit length safely for UTF-8
    let sanitized = if sanitized.len() > 255 {
        let mut end = 255;
        while !sanitized.is_char_boundary(end) {
            end -= 1;
        }
        sanitized[..end].to_string()
    } else {
        sanitized
    };

    // Prevent hidden files
    if sanitized.starts_with('.') {
        return Err(anyhow!(ValidationError {
            code: "HIDDEN_FILE",
            message: "Hidden files (starting with '.') are not allowed".to_string(),
        }));
    }

    Ok(sanitized)
}

/// Checks magic bytes to verify actual file type matches claimed type
pub fn verify_magic_bytes(header: &[u8], claimed_mime: &str) -> Result<()> {
    if header.is_empty() {
        return Err(anyhow!(ValidationError {
            code: "EMPTY_FILE",
            message: "File appears to be empty".to_string(),
        }));
    }

    // RIFF alone also opens WAV/AVI files; only the WEBP variant is an image
    if header.starts_with(b"RIFF") {
        let is_webp = header.len() >= 12 && &header[8..12] == b"WEBP";
        if is_webp && claimed_mime.starts_with("image/") {
            return Ok(());
        }
        return Err(anyhow!(ValidationError {
            code: "MAGIC_MISMATCH",
            message: if is_webp {
                format!("File content looks like 'image/webp' but was declared as '{}'", claimed_mime)
            } else {
                "RIFF container is not a WebP image".to_string()
            },
        }));
    }

    for (signature, mime_type) in MAGIC_SIGNATURES {
        if header.len() >= signature.len() && header.starts_with(signature) {
            if claimed_mime.contains(mime_type) || mime_type.contains(claimed_mime) {
                return Ok(());
            }

            // jpg/jpeg aliasing and similar family matches
            let claimed_category = claimed_mime.split('/').next().unwrap_or("");
            let detected_category = mime_type.split('/').next().unwrap_or("");
            if claimed_category == detected_category {
                return Ok(());
            }

            return Err(anyhow!(ValidationError {
                code: "MAGIC_MISMATCH",
                message: format!(
                    "File content looks like '{}' but was declared as '{}'",
                    mime_type, claimed_mime
                ),
            }));
        }
    }

    Err(anyhow!(ValidationError {
        code: "UNRECOGNIZED_CONTENT",
        message: "File content does not match any supported format".to_string(),
    }))
}

/// Validation pipeline for one uploaded file. Runs before any byte is
/// written to the staging area. The format-family check happens separately
/// once the request's output format is known, since multipart fields arrive
/// in arbitrary order.
pub fn validate_upload(
    filename: &str,
    content_type: Option<&str>,
    header: &[u8],
) -> Result<String> {
    // 1. Sanitize filename
    let sanitized_filename = sanitize_filename(filename)?;

    // 2. MIME type check
    let mime = content_type.unwrap_or("application/octet-stream");
    validate_mime_type(mime)?;

    // 3. Magic bytes verification
    verify_magic_bytes(header, mime)?;

    Ok(sanitized_filename)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_file_size() {
        assert!(validate_file_size(1024, 50 * 1024 * 1024).is_ok());
        assert!(validate_file_size(100, 100).is_ok());
        assert!(validate_file_size(101, 100).is_err());
    }

    #[test]
    fn test_validate_mime_type() {
        assert!(validate_mime_type("image/jpeg").is_ok());
        assert!(validate_mime_type("image/jpg").is_ok());
        assert!(validate_mime_type("image/png; charset=binary").is_ok());
        assert!(validate_mime_type("application/pdf").is_ok());

        assert!(validate_mime_type("image/gif").is_err());
        assert!(validate_mime_type("application/zip").is_err());
        assert!(validate_mime_type("text/html").is_err());
    }

    #[test]
    fn test_validate_format_match() {
        assert!(validate_format_match("image/jpeg", OutputFormat::Webp).is_ok());
        assert!(validate_format_match("application/pdf", OutputFormat::Pdf).is_ok());
        assert!(validate_format_match("image/png", OutputFormat::Pdf).is_err());
        assert!(validate_format_match("application/pdf", OutputFormat::Jpeg).is_err());
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("photo.jpg").unwrap(), "photo.jpg");
        assert_eq!(sanitize_filename("my scan.pdf").unwrap(), "my scan.pdf");
        assert_eq!(
            sanitize_filename("bad<name>.png").unwrap(),
            "bad_name_.png"
        );
        assert_eq!(sanitize_filename("测试.png").unwrap(), "测试.png");

        // Path traversal
        assert_eq!(sanitize_filename("../../../etc/passwd").unwrap(), "passwd");

        // Hidden files
        assert!(sanitize_filename(".htaccess").is_err());
        assert!(sanitize_filename("").is_err());
    }

    #[test]
    fn test_verify_magic_bytes() {
        assert!(verify_magic_bytes(&[0xFF, 0xD8, 0xFF, 0xE0], "image/jpeg").is_ok());
        assert!(verify_magic_bytes(&[0x89, 0x50, 0x4E, 0x47], "image/png").is_ok());
        assert!(verify_magic_bytes(b"%PDF-1.5", "application/pdf").is_ok());
        assert!(verify_magic_bytes(b"RIFF....WEBP", "image/webp").is_ok());

        // PDF disguised as image
        assert!(verify_magic_bytes(b"%PDF-1.5", "image/jpeg").is_err());
        // Unrecognized content
        assert!(verify_magic_bytes(b"MZ\x00\x00", "image/jpeg").is_err());
        // Empty
        assert!(verify_magic_bytes(&[], "image/png").is_err());
    }

    #[test]
    fn test_riff_container_must_carry_webp_fourcc() {
        assert!(verify_magic_bytes(b"RIFF\x24\x00\x00\x00WEBPVP8 ", "image/webp").is_ok());

        // Other RIFF containers are not images, whatever the declared type
        assert!(verify_magic_bytes(b"RIFF\x24\x00\x00\x00WAVEfmt ", "image/webp").is_err());
        assert!(verify_magic_bytes(b"RIFF\x24\x00\x00\x00AVI LIST", "image/webp").is_err());

        // Too short to carry the fourcc
        assert!(verify_magic_bytes(b"RIFF", "image/webp").is_err());

        // WebP content declared as PDF
        assert!(verify_magic_bytes(b"RIFF\x24\x00\x00\x00WEBPVP8 ", "application/pdf").is_err());
    }
}
