//! Upload admission checks and presentation helpers for stored files.
//!
//! Validation only looks at the caller-declared content type and the byte
//! length. File contents are never sniffed.

use thiserror::Error;

pub const ALLOWED_CONTENT_TYPES: &[&str] = &["application/pdf", "image/jpeg", "image/png"];

/// Default ceiling when files land on local disk.
pub const LOCAL_MAX_UPLOAD_BYTES: u64 = 5 * 1024 * 1024;
/// Default ceiling when files land in remote object storage.
pub const REMOTE_MAX_UPLOAD_BYTES: u64 = 50 * 1024 * 1024;

const SIZE_UNITS: &[&str] = &["Bytes", "KB", "MB", "GB"];

const MONTH_NAMES: [&str; 12] = [
    "Januari",
    "Februari",
    "Maret",
    "April",
    "Mei",
    "Juni",
    "Juli",
    "Agustus",
    "September",
    "Oktober",
    "November",
    "Desember",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UploadRejection {
    #[error("unsupported file type '{content_type}'; use PDF, JPG or PNG")]
    UnsupportedType { content_type: String },
    #[error(
        "file is too large ({}); maximum is {}",
        format_file_size(*size),
        format_file_size(*max)
    )]
    TooLarge { size: u64, max: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadPolicy {
    pub max_size_bytes: u64,
}

impl UploadPolicy {
    pub fn new(max_size_bytes: u64) -> Self {
        Self { max_size_bytes }
    }

    /// Type is checked before size, so an unsupported oversized file reports
    /// the type problem.
    pub fn validate(&self, content_type: &str, size: u64) -> Result<(), UploadRejection> {
        if !is_allowed_content_type(content_type) {
            return Err(UploadRejection::UnsupportedType {
                content_type: content_type.to_string(),
            });
        }

        if size > self.max_size_bytes {
            return Err(UploadRejection::TooLarge {
                size,
                max: self.max_size_bytes,
            });
        }

        Ok(())
    }
}

/// Lowercases and strips parameters (`application/pdf; charset=binary`).
pub fn normalize_content_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

pub fn is_allowed_content_type(content_type: &str) -> bool {
    let normalized = normalize_content_type(content_type);
    ALLOWED_CONTENT_TYPES.contains(&normalized.as_str())
}

/// Human readable size in base-1024 units, rounded to two decimals.
pub fn format_file_size(bytes: u64) -> String {
    if bytes == 0 {
        return "0 Bytes".to_string();
    }

    let mut scaled = bytes as f64;
    let mut unit = 0;
    while scaled >= 1024.0 && unit < SIZE_UNITS.len() - 1 {
        scaled /= 1024.0;
        unit += 1;
    }

    let rounded = (scaled * 100.0).round() / 100.0;
    format!("{rounded} {}", SIZE_UNITS[unit])
}

pub fn month_name(month: i32) -> Option<&'static str> {
    usize::try_from(month)
        .ok()
        .and_then(|m| m.checked_sub(1))
        .and_then(|idx| MONTH_NAMES.get(idx).copied())
}
