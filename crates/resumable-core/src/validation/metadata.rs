//! Upload metadata validation
//!
//! Provides validation for initiation input:
//! - Declared length: non-zero and within the ceiling for the target kind
//! - Key rules: pattern, max length
//! - Per-target schema (a new file needs a title, a replacement does not)

use anyhow::{Context, Result};
use regex::Regex;
use validator::Validate;

use crate::config::UploadConfig;
use crate::error::{UploadError, UploadResult};
use crate::models::{TargetKind, UploadMetadata};

/// Maximum length for metadata key names (64 characters)
pub const MAX_METADATA_KEY_LENGTH: usize = 64;

/// Maximum length for decoded metadata values (1024 bytes)
pub const MAX_METADATA_VALUE_LENGTH: usize = 1024;

/// Maximum number of metadata keys per upload
pub const MAX_METADATA_KEYS: usize = 32;

/// Schema for uploads that create a new resource
#[derive(Debug, Validate)]
struct NewFileMetadata {
    #[validate(length(
        min = 1,
        max = 255,
        message = "Title must be between 1 and 255 characters"
    ))]
    title: String,
    #[validate(length(
        min = 1,
        max = 255,
        message = "Filename must be between 1 and 255 characters"
    ))]
    filename: Option<String>,
    #[validate(length(max = 100, message = "Category must be at most 100 characters"))]
    category: Option<String>,
    #[validate(length(max = 50, message = "Semester must be at most 50 characters"))]
    semester: Option<String>,
}

/// Schema for uploads that replace an existing resource's content
#[derive(Debug, Validate)]
struct ReplacementMetadata {
    #[validate(length(
        min = 1,
        max = 255,
        message = "Title must be between 1 and 255 characters"
    ))]
    title: Option<String>,
    #[validate(length(
        min = 1,
        max = 255,
        message = "Filename must be between 1 and 255 characters"
    ))]
    filename: Option<String>,
}

/// Validate a metadata key name
///
/// Rules:
/// - Must match pattern: `^[a-zA-Z0-9_\\-\\.]+$`
/// - Maximum 64 characters
pub fn validate_metadata_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(anyhow::anyhow!("Metadata key cannot be empty"));
    }

    if key.len() > MAX_METADATA_KEY_LENGTH {
        return Err(anyhow::anyhow!(
            "Metadata key '{}' exceeds maximum length of {} characters",
            key,
            MAX_METADATA_KEY_LENGTH
        ));
    }

    let pattern = Regex::new(r"^[a-zA-Z0-9_\-\.]+$")
        .context("Failed to compile metadata key validation regex")?;

    if !pattern.is_match(key) {
        return Err(anyhow::anyhow!(
            "Metadata key '{}' contains invalid characters. Allowed: letters, digits, underscore (_), hyphen (-), dot (.)",
            key
        ));
    }

    Ok(())
}

pub fn validate_metadata_value(value: &str) -> Result<()> {
    if value.len() > MAX_METADATA_VALUE_LENGTH {
        return Err(anyhow::anyhow!(
            "Metadata value exceeds maximum length of {} bytes",
            MAX_METADATA_VALUE_LENGTH
        ));
    }
    Ok(())
}

/// Validate the declared length against the ceiling for the target kind.
pub fn validate_declared_length(
    config: &UploadConfig,
    target: &TargetKind,
    declared_length: u64,
) -> UploadResult<()> {
    if declared_length == 0 {
        return Err(UploadError::Validation(
            "Upload-Length must be greater than zero".to_string(),
        ));
    }

    let max = config.max_length_for(target);
    if declared_length > max {
        return Err(UploadError::Validation(format!(
            "Upload-Length {} exceeds the maximum of {} bytes for {} uploads",
            declared_length,
            max,
            target.as_str()
        )));
    }

    Ok(())
}

/// Validate metadata for the given target kind.
///
/// Metadata must be non-empty, every key and value must pass the generic
/// rules, and the well-known keys must satisfy the target's schema. Unknown
/// keys are allowed and passed through to the finalize callback.
pub fn validate_metadata(target: &TargetKind, metadata: &UploadMetadata) -> UploadResult<()> {
    if metadata.is_empty() {
        return Err(UploadError::Validation(
            "Upload-Metadata must not be empty".to_string(),
        ));
    }

    if metadata.len() > MAX_METADATA_KEYS {
        return Err(UploadError::Validation(format!(
            "Upload-Metadata contains {} keys, but maximum allowed is {}",
            metadata.len(),
            MAX_METADATA_KEYS
        )));
    }

    for (key, value) in metadata.iter() {
        validate_metadata_key(key)
            .and_then(|_| {
                validate_metadata_value(value)
                    .with_context(|| format!("Invalid metadata value for key '{}'", key))
            })
            .map_err(|e| UploadError::Validation(format!("{:#}", e)))?;
    }

    let field = |key: &str| metadata.get(key).map(str::to_string);

    match target {
        TargetKind::NewFile => {
            let title = field("title").ok_or_else(|| {
                UploadError::Validation("Metadata field 'title' is required".to_string())
            })?;
            NewFileMetadata {
                title,
                filename: field("filename"),
                category: field("category"),
                semester: field("semester"),
            }
            .validate()?;
        }
        TargetKind::Replace { .. } => {
            ReplacementMetadata {
                title: field("title"),
                filename: field("filename"),
            }
            .validate()?;
        }
    }

    Ok(())
}
