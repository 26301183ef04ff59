//! Error types for Chirpgate

use thiserror::Error;

use crate::rate_limiter::EndpointKey;

pub type Result<T> = std::result::Result<T, ChirpgateError>;

#[derive(Error, Debug)]
pub enum ChirpgateError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("{0}")]
    Quota(#[from] QuotaError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("Platform error ({code}, status {status}): {message}")]
    Platform {
        code: String,
        status: u16,
        message: String,
    },

    #[error("Delete failed: {0}")]
    FallbackExhausted(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ChirpgateError {
    /// Stable machine-readable code for this error
    pub fn code(&self) -> &str {
        match self {
            ChirpgateError::Validation(_) => "VALIDATION_ERROR",
            ChirpgateError::Quota(QuotaError::RateLimited { .. }) => "RATE_LIMITED",
            ChirpgateError::Quota(QuotaError::DailyLimitExceeded { .. }) => "DAILY_LIMIT_EXCEEDED",
            ChirpgateError::Media(_) => "MEDIA_ERROR",
            ChirpgateError::Upload(_) => "UPLOAD_ERROR",
            ChirpgateError::Platform { code, .. } => code,
            ChirpgateError::FallbackExhausted(_) => "DELETE_FALLBACK_UNAVAILABLE",
            ChirpgateError::Config(_) => "CONFIG_ERROR",
            ChirpgateError::Credential(_) => "CREDENTIAL_ERROR",
            ChirpgateError::Http(_) => "HTTP_ERROR",
            ChirpgateError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP-like status associated with this error
    pub fn status(&self) -> u16 {
        match self {
            ChirpgateError::Validation(_) | ChirpgateError::Media(_) => 400,
            ChirpgateError::Quota(_) => 429,
            ChirpgateError::Platform { status, .. } => *status,
            ChirpgateError::Http(e) => e.status().map(|s| s.as_u16()).unwrap_or(500),
            ChirpgateError::Upload(_)
            | ChirpgateError::FallbackExhausted(_)
            | ChirpgateError::Config(_)
            | ChirpgateError::Credential(_)
            | ChirpgateError::Internal(_) => 500,
        }
    }

    /// Quota errors are presented as "please wait", not as failures
    pub fn is_quota(&self) -> bool {
        matches!(self, ChirpgateError::Quota(_))
    }

    /// Returns the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            ChirpgateError::Validation(_) => 3,
            ChirpgateError::Config(_) | ChirpgateError::Credential(_) => 2,
            _ => 1,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QuotaError {
    #[error("Rate limit: wait {wait_secs} seconds before calling {key} again")]
    RateLimited { key: EndpointKey, wait_secs: u64 },

    #[error("Daily limit exceeded for {key}: resets in {hours} hours")]
    DailyLimitExceeded { key: EndpointKey, hours: u64 },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("Payload too large: encoded media is {size} bytes, limit is {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("Invalid encoding: media payload is not valid base64")]
    InvalidEncoding,

    #[error("File too large: decoded media is {size} bytes, limit is {human_limit}")]
    FileTooLarge { size: usize, human_limit: String },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Missing {scheme} credentials: {}", .fields.join(", "))]
    MissingCredentials { scheme: String, fields: Vec<String> },

    #[error("Token refresh failed: {0}. Run the OAuth 2.0 setup again to obtain new tokens")]
    RefreshFailed(String),
}

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("Credential not found: {0}")]
    NotFound(String),

    #[error("OS keyring unavailable: {0}")]
    KeyringUnavailable(String),

    #[error("Keyring error: {0}")]
    Keyring(String),

    #[error("Credential file error: {0}")]
    Io(#[from] std::io::Error),
}
