//! Validation of inbound tool arguments
//!
//! These checks run before the broker sees a request, so an invalid call
//! never consumes quota.

use crate::error::{ChirpgateError, Result};
use crate::types::{PostRequest, SearchRequest};

pub const MAX_POST_CHARS: usize = 280;
pub const MAX_MEDIA_ITEMS: usize = 4;
pub const MIN_SEARCH_COUNT: u32 = 10;
pub const MAX_SEARCH_COUNT: u32 = 100;

fn invalid(message: impl Into<String>) -> ChirpgateError {
    ChirpgateError::Validation(message.into())
}

/// Check text length (in characters, not bytes), reply id and media count
pub fn validate_post(request: &PostRequest) -> Result<()> {
    let chars = request.text.chars().count();
    if chars == 0 {
        return Err(invalid("text cannot be empty"));
    }
    if chars > MAX_POST_CHARS {
        return Err(invalid(format!(
            "text exceeds {} characters (got {})",
            MAX_POST_CHARS, chars
        )));
    }

    if let Some(reply_to) = &request.reply_to {
        validate_post_id(reply_to)?;
    }

    if request.media.len() > MAX_MEDIA_ITEMS {
        return Err(invalid(format!(
            "at most {} media items are allowed (got {})",
            MAX_MEDIA_ITEMS,
            request.media.len()
        )));
    }

    Ok(())
}

pub fn validate_search(request: &SearchRequest) -> Result<()> {
    if request.query.trim().is_empty() {
        return Err(invalid("query cannot be empty"));
    }
    if !(MIN_SEARCH_COUNT..=MAX_SEARCH_COUNT).contains(&request.max_results) {
        return Err(invalid(format!(
            "count must be between {} and {} (got {})",
            MIN_SEARCH_COUNT, MAX_SEARCH_COUNT, request.max_results
        )));
    }
    Ok(())
}

/// Post ids are numeric strings
pub fn validate_post_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(invalid("tweet id cannot be empty"));
    }
    if !id.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid(format!("'{}' is not a valid tweet id", id)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{MediaItem, MediaKind};

    fn search(query: &str, count: u32) -> SearchRequest {
        SearchRequest {
            query: query.to_string(),
            max_results: count,
        }
    }

    #[test]
    fn test_post_text_bounds() {
        assert!(validate_post(&PostRequest::new("Hello world!")).is_ok());
        assert!(validate_post(&PostRequest::new("")).is_err());
        assert!(validate_post(&PostRequest::new("a".repeat(280))).is_ok());
        assert!(validate_post(&PostRequest::new("a".repeat(281))).is_err());
    }

    #[test]
    fn test_post_length_counts_characters() {
        // 280 multi-byte characters are still within the limit
        assert!(validate_post(&PostRequest::new("é".repeat(280))).is_ok());
    }

    #[test]
    fn test_media_count() {
        let item = MediaItem {
            data: "AAAA".to_string(),
            media_type: MediaKind::Png,
        };
        let mut request = PostRequest::new("pics");
        request.media = vec![item.clone(); 4];
        assert!(validate_post(&request).is_ok());
        request.media.push(item);
        assert!(validate_post(&request).is_err());
    }

    #[test]
    fn test_reply_id_must_be_numeric() {
        let mut request = PostRequest::new("reply");
        request.reply_to = Some("1460323737035677698".to_string());
        assert!(validate_post(&request).is_ok());
        request.reply_to = Some("abc".to_string());
        assert!(validate_post(&request).is_err());
    }

    #[test]
    fn test_search_count_range() {
        assert!(validate_search(&search("rust", 10)).is_ok());
        assert!(validate_search(&search("rust", 100)).is_ok());

        let error = validate_search(&search("rust", 5)).unwrap_err();
        assert_eq!(error.code(), "VALIDATION_ERROR");
        assert!(error.to_string().contains("between 10 and 100"));

        assert!(validate_search(&search("rust", 101)).is_err());
        assert!(validate_search(&search("   ", 10)).is_err());
    }

    #[test]
    fn test_post_id() {
        assert!(validate_post_id("1").is_ok());
        assert!(validate_post_id("").is_err());
        assert!(validate_post_id("12a").is_err());
    }
}
