use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

use crate::error::{UploadError, UploadResult};

/// Client-supplied key/value metadata attached to an upload at initiation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UploadMetadata(BTreeMap<String, String>);

impl UploadMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a TUS `Upload-Metadata` header value.
    ///
    /// The value is a comma-separated list of `key base64value` pairs. A key
    /// may appear without a value, in which case it maps to an empty string.
    /// Duplicate keys are rejected.
    pub fn from_tus_header(header: &str) -> UploadResult<Self> {
        let mut map = BTreeMap::new();

        for pair in header.split(',') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }

            let mut parts = pair.splitn(2, ' ');
            let key = parts.next().unwrap_or_default().trim();
            if key.is_empty() {
                return Err(UploadError::Validation(
                    "Upload-Metadata contains an empty key".to_string(),
                ));
            }

            let value = match parts.next().map(str::trim) {
                Some(encoded) if !encoded.is_empty() => {
                    let bytes = STANDARD.decode(encoded).map_err(|_| {
                        UploadError::Validation(format!(
                            "Upload-Metadata value for '{}' is not valid base64",
                            key
                        ))
                    })?;
                    String::from_utf8(bytes).map_err(|_| {
                        UploadError::Validation(format!(
                            "Upload-Metadata value for '{}' is not valid UTF-8",
                            key
                        ))
                    })?
                }
                _ => String::new(),
            };

            if map.insert(key.to_string(), value).is_some() {
                return Err(UploadError::Validation(format!(
                    "Upload-Metadata contains duplicate key '{}'",
                    key
                )));
            }
        }

        Ok(Self(map))
    }

    /// Render back into TUS `Upload-Metadata` header form.
    pub fn to_tus_header(&self) -> String {
        self.0
            .iter()
            .map(|(key, value)| {
                if value.is_empty() {
                    key.clone()
                } else {
                    format!("{} {}", key, STANDARD.encode(value.as_bytes()))
                }
            })
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.0
    }
}

impl From<BTreeMap<String, String>> for UploadMetadata {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for UploadMetadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tus_header() {
        // "title" -> "Lecture 1", "filename" -> "notes.pdf"
        let header = "title TGVjdHVyZSAx,filename bm90ZXMucGRm,draft";
        let metadata = UploadMetadata::from_tus_header(header).unwrap();
        assert_eq!(metadata.get("title"), Some("Lecture 1"));
        assert_eq!(metadata.get("filename"), Some("notes.pdf"));
        assert_eq!(metadata.get("draft"), Some(""));
        assert_eq!(metadata.len(), 3);
    }

    #[test]
    fn test_parse_rejects_bad_base64() {
        let result = UploadMetadata::from_tus_header("title !!!");
        assert!(matches!(result, Err(UploadError::Validation(_))));
    }

    #[test]
    fn test_parse_rejects_duplicate_keys() {
        let result = UploadMetadata::from_tus_header("title YQ==,title Yg==");
        assert!(matches!(result, Err(UploadError::Validation(_))));
    }

    #[test]
    fn test_header_rendering_parses_back() {
        let metadata: UploadMetadata = [("title", "Week 3"), ("category", "")]
            .into_iter()
            .collect();
        let parsed = UploadMetadata::from_tus_header(&metadata.to_tus_header()).unwrap();
        assert_eq!(parsed, metadata);
    }

    #[test]
    fn test_empty_header_is_empty_metadata() {
        let metadata = UploadMetadata::from_tus_header("").unwrap();
        assert!(metadata.is_empty());
    }
}
