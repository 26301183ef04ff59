//! Inbound media decoding and validation
//!
//! Media arrives as base64 text. Checks run in a fixed order so that a caller
//! can tell an oversized payload apart from a corrupt one.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{MediaError, Result};

/// Maximum encoded (base64 text) payload size: 15 MiB
pub const MAX_ENCODED_BYTES: usize = 15 * 1024 * 1024;

/// Maximum decoded file size: 5 MiB
pub const MAX_DECODED_BYTES: usize = 5 * 1024 * 1024;

const MAX_DECODED_HUMAN: &str = "5 MB";

/// Supported media MIME types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaKind {
    #[serde(rename = "image/jpeg")]
    Jpeg,
    #[serde(rename = "image/png")]
    Png,
    #[serde(rename = "image/gif")]
    Gif,
}

impl MediaKind {
    pub const ALL: [MediaKind; 3] = [MediaKind::Jpeg, MediaKind::Png, MediaKind::Gif];

    /// Parse MIME type from a MIME string (e.g., "image/jpeg")
    pub fn from_mime_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "image/jpeg" => Some(MediaKind::Jpeg),
            "image/png" => Some(MediaKind::Png),
            "image/gif" => Some(MediaKind::Gif),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Jpeg => "image/jpeg",
            MediaKind::Png => "image/png",
            MediaKind::Gif => "image/gif",
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A base64-encoded media payload as received from the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaItem {
    pub data: String,
    pub media_type: MediaKind,
}

/// Decoded media ready for upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedMedia {
    pub bytes: Vec<u8>,
    pub kind: MediaKind,
}

/// Decode and validate a media item
///
/// # Errors
///
/// - `MediaError::PayloadTooLarge` if the encoded text exceeds 15 MiB
/// - `MediaError::InvalidEncoding` if the text is not canonical base64
/// - `MediaError::FileTooLarge` if the decoded bytes exceed 5 MiB
pub fn normalize(item: &MediaItem) -> Result<NormalizedMedia> {
    let encoded = item.data.as_str();

    if encoded.len() > MAX_ENCODED_BYTES {
        return Err(MediaError::PayloadTooLarge {
            size: encoded.len(),
            limit: MAX_ENCODED_BYTES,
        }
        .into());
    }

    let bytes = STANDARD
        .decode(encoded)
        .map_err(|_| MediaError::InvalidEncoding)?;

    if STANDARD.encode(&bytes) != encoded {
        return Err(MediaError::InvalidEncoding.into());
    }

    if bytes.len() > MAX_DECODED_BYTES {
        return Err(MediaError::FileTooLarge {
            size: bytes.len(),
            human_limit: MAX_DECODED_HUMAN.to_string(),
        }
        .into());
    }

    tracing::debug!("Normalized {} media: {} bytes", item.media_type, bytes.len());

    Ok(NormalizedMedia {
        bytes,
        kind: item.media_type,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChirpgateError;

    fn item(data: String) -> MediaItem {
        MediaItem {
            data,
            media_type: MediaKind::Png,
        }
    }

    #[test]
    fn test_valid_payload_decodes() {
        let payload = STANDARD.encode(b"\x89PNG\r\n\x1a\nrest-of-image");
        let media = normalize(&item(payload)).unwrap();
        assert_eq!(media.bytes, b"\x89PNG\r\n\x1a\nrest-of-image");
        assert_eq!(media.kind, MediaKind::Png);
    }

    #[test]
    fn test_invalid_base64_rejected() {
        let result = normalize(&item("not base64 at all!!".to_string()));
        assert!(matches!(
            result,
            Err(ChirpgateError::Media(MediaError::InvalidEncoding))
        ));
    }

    #[test]
    fn test_non_canonical_padding_rejected() {
        // Missing padding decodes leniently in some engines but never round-trips
        let result = normalize(&item("aGVsbG8".to_string()));
        assert!(matches!(
            result,
            Err(ChirpgateError::Media(MediaError::InvalidEncoding))
        ));
    }

    #[test]
    fn test_embedded_newlines_rejected() {
        let payload = format!("{}\n{}", STANDARD.encode(b"abc"), STANDARD.encode(b"def"));
        let result = normalize(&item(payload));
        assert!(matches!(
            result,
            Err(ChirpgateError::Media(MediaError::InvalidEncoding))
        ));
    }

    #[test]
    fn test_decoded_size_limit() {
        let payload = STANDARD.encode(vec![0u8; 6 * 1024 * 1024]);
        assert!(payload.len() < MAX_ENCODED_BYTES);

        match normalize(&item(payload)) {
            Err(ChirpgateError::Media(MediaError::FileTooLarge { size, human_limit })) => {
                assert_eq!(size, 6 * 1024 * 1024);
                assert_eq!(human_limit, "5 MB");
            }
            other => panic!("Expected FileTooLarge, got {:?}", other),
        }
    }

    #[test]
    fn test_decoded_size_at_limit_is_accepted() {
        let payload = STANDARD.encode(vec![7u8; MAX_DECODED_BYTES]);
        assert_eq!(normalize(&item(payload)).unwrap().bytes.len(), MAX_DECODED_BYTES);
    }

    #[test]
    fn test_encoded_size_limit_checked_before_decode() {
        // 16 MiB of characters that are not even valid base64
        let payload = "!".repeat(16 * 1024 * 1024);
        match normalize(&item(payload)) {
            Err(ChirpgateError::Media(MediaError::PayloadTooLarge { size, limit })) => {
                assert_eq!(size, 16 * 1024 * 1024);
                assert_eq!(limit, MAX_ENCODED_BYTES);
            }
            other => panic!("Expected PayloadTooLarge, got {:?}", other),
        }
    }

    #[test]
    fn test_mime_parsing() {
        assert_eq!(MediaKind::from_mime_str("image/jpeg"), Some(MediaKind::Jpeg));
        assert_eq!(MediaKind::from_mime_str("IMAGE/PNG"), Some(MediaKind::Png));
        assert_eq!(MediaKind::from_mime_str("image/gif"), Some(MediaKind::Gif));
        assert_eq!(MediaKind::from_mime_str("image/webp"), None);
        assert_eq!(MediaKind::Gif.to_string(), "image/gif");
    }

    #[test]
    fn test_media_item_deserializes_mime_string() {
        let item: MediaItem =
            serde_json::from_str(r#"{"data":"aGVsbG8=","media_type":"image/jpeg"}"#).unwrap();
        assert_eq!(item.media_type, MediaKind::Jpeg);
        assert!(serde_json::from_str::<MediaItem>(
            r#"{"data":"aGVsbG8=","media_type":"video/mp4"}"#
        )
        .is_err());
    }
}
