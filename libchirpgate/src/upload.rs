//! Media uploaders for the two API generations
//!
//! OAuth 1.0a sessions upload through the legacy v1.1 endpoint; OAuth 2.0
//! sessions must use the versioned endpoint, which has its own multipart
//! shape and a less stable response format.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::api::{ApiRequest, HttpTransport, MultipartField};
use crate::config::{AuthScheme, Endpoints};
use crate::error::{ChirpgateError, Result};
use crate::media::NormalizedMedia;
use crate::rate_limiter::{EndpointKey, RateGovernor};
use crate::session::RequestAuth;

/// Uploads one normalized media item and returns its platform id
#[async_trait]
pub trait MediaUploader: Send + Sync {
    async fn upload(&self, auth: RequestAuth<'_>, media: &NormalizedMedia) -> Result<String>;

    fn name(&self) -> &str;
}

/// Pick the uploader matching the session's scheme
pub fn for_scheme(
    scheme: AuthScheme,
    transport: Arc<dyn HttpTransport>,
    governor: Arc<RateGovernor>,
    endpoints: &Endpoints,
) -> Box<dyn MediaUploader> {
    match scheme {
        AuthScheme::OAuth1 => Box::new(LegacyUploader::new(
            transport,
            governor,
            endpoints.upload_v1.clone(),
        )),
        AuthScheme::OAuth2 => Box::new(ModernUploader::new(
            transport,
            governor,
            endpoints.upload_v2.clone(),
        )),
    }
}

/// Report any failure past the quota check as an upload error
fn as_upload_error(error: ChirpgateError) -> ChirpgateError {
    match error {
        ChirpgateError::Upload(_) | ChirpgateError::Quota(_) => error,
        other => ChirpgateError::Upload(other.to_string()),
    }
}

fn file_field(media: &NormalizedMedia) -> MultipartField {
    MultipartField::File {
        name: "media".to_string(),
        file_name: "media".to_string(),
        mime: media.kind.as_str().to_string(),
        bytes: media.bytes.clone(),
    }
}

/// v1.1 `media/upload.json`, OAuth 1.0a signed
pub struct LegacyUploader {
    transport: Arc<dyn HttpTransport>,
    governor: Arc<RateGovernor>,
    url: String,
}

impl LegacyUploader {
    pub fn new(transport: Arc<dyn HttpTransport>, governor: Arc<RateGovernor>, url: String) -> Self {
        Self {
            transport,
            governor,
            url,
        }
    }
}

#[async_trait]
impl MediaUploader for LegacyUploader {
    async fn upload(&self, auth: RequestAuth<'_>, media: &NormalizedMedia) -> Result<String> {
        self.governor.check_and_record(EndpointKey::UploadMedia)?;

        let request = ApiRequest::post(&self.url).multipart(vec![file_field(media)]);
        let response = self
            .transport
            .execute(request, auth)
            .await
            .map_err(as_upload_error)?;

        if !response.is_success() {
            return Err(ChirpgateError::Upload(format!(
                "status {}: {}",
                response.status, response.body
            )));
        }

        let body: Value = serde_json::from_str(&response.body).map_err(|_| {
            ChirpgateError::Upload(format!("unreadable response: {}", response.body))
        })?;
        match body["media_id_string"].as_str() {
            Some(id) if !id.is_empty() => {
                tracing::debug!("Uploaded {} bytes of {} as {}", media.bytes.len(), media.kind, id);
                Ok(id.to_string())
            }
            _ => Err(ChirpgateError::Upload(format!(
                "no media_id_string in response: {}",
                response.body
            ))),
        }
    }

    fn name(&self) -> &str {
        "legacy"
    }
}

/// v2 `media/upload`, bearer token
pub struct ModernUploader {
    transport: Arc<dyn HttpTransport>,
    governor: Arc<RateGovernor>,
    url: String,
}

impl ModernUploader {
    pub fn new(transport: Arc<dyn HttpTransport>, governor: Arc<RateGovernor>, url: String) -> Self {
        Self {
            transport,
            governor,
            url,
        }
    }
}

/// Upload category for a MIME type
pub fn media_category(mime: &str) -> &'static str {
    if mime.starts_with("image/") {
        "tweet_image"
    } else {
        "tweet_video"
    }
}

/// Find the media id in a v2 upload response
///
/// The response shape has varied; the first non-empty candidate wins.
fn extract_media_id(body: &Value) -> Option<String> {
    let candidates = [
        &body["data"]["id"],
        &body["data"]["media_key"],
        &body["media_id_string"],
        &body["media_id"],
        &body["id"],
    ];

    candidates.iter().find_map(|value| match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

#[async_trait]
impl MediaUploader for ModernUploader {
    async fn upload(&self, auth: RequestAuth<'_>, media: &NormalizedMedia) -> Result<String> {
        self.governor.check_and_record(EndpointKey::UploadMedia)?;

        let mime = media.kind.as_str();
        let request = ApiRequest::post(&self.url).multipart(vec![
            file_field(media),
            MultipartField::Text {
                name: "media_type".to_string(),
                value: mime.to_string(),
            },
            MultipartField::Text {
                name: "media_category".to_string(),
                value: media_category(mime).to_string(),
            },
        ]);

        let response = self
            .transport
            .execute(request, auth)
            .await
            .map_err(as_upload_error)?;
        if !response.is_success() {
            return Err(ChirpgateError::Upload(format!(
                "status {}: {}",
                response.status, response.body
            )));
        }

        let body: Value = serde_json::from_str(&response.body).map_err(|_| {
            ChirpgateError::Upload(format!("unreadable response: {}", response.body))
        })?;

        extract_media_id(&body)
            .ok_or_else(|| ChirpgateError::Upload(format!("no media id in response: {}", response.body)))
    }

    fn name(&self) -> &str {
        "modern"
    }
}

/// Point the user at the missing permission when an upload looks like a scope failure
///
/// This is a heuristic on the message text. Other errors pass through.
pub fn explain_upload_error(error: ChirpgateError, scheme: AuthScheme) -> ChirpgateError {
    let ChirpgateError::Upload(message) = error else {
        return error;
    };

    let lowered = message.to_lowercase();
    if !(lowered.contains("scope") || lowered.contains("403")) {
        return ChirpgateError::Upload(message);
    }

    let hint = match scheme {
        AuthScheme::OAuth2 => "the OAuth 2.0 token is missing the media.write scope",
        AuthScheme::OAuth1 => "the app needs \"Read and Write\" permissions for OAuth 1.0a uploads",
    };
    ChirpgateError::Upload(format!("{} ({})", hint, message))
}
