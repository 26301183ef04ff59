//! Configuration management for Chirpgate
//!
//! Configuration is read from an optional TOML file and then overlaid with
//! environment variables, which always win. Credentials normally come from the
//! environment; the file is mostly useful for limits and endpoint overrides.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::credentials::CredentialConfig;
use crate::error::{ConfigError, Result};
use crate::rate_limiter::{EndpointKey, EndpointLimit, LimitTable};

pub const ENV_AUTH_TYPE: &str = "AUTH_TYPE";
pub const ENV_API_KEY: &str = "X_API_KEY";
pub const ENV_API_SECRET: &str = "X_API_SECRET";
pub const ENV_ACCESS_TOKEN: &str = "X_ACCESS_TOKEN";
pub const ENV_ACCESS_TOKEN_SECRET: &str = "X_ACCESS_TOKEN_SECRET";
pub const ENV_OAUTH2_ACCESS_TOKEN: &str = "X_OAUTH2_ACCESS_TOKEN";
pub const ENV_OAUTH2_REFRESH_TOKEN: &str = "X_OAUTH2_REFRESH_TOKEN";
pub const ENV_OAUTH2_EXPIRES_AT: &str = "X_OAUTH2_EXPIRES_AT";
pub const ENV_CLIENT_ID: &str = "X_CLIENT_ID";
pub const ENV_CLIENT_SECRET: &str = "X_CLIENT_SECRET";
pub const ENV_DEBUG: &str = "DEBUG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub endpoints: Endpoints,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub delete: DeletePolicy,
    #[serde(default)]
    pub credentials: CredentialConfig,
    /// Emit credential diagnostics (scheme choice, truncated token previews)
    #[serde(default)]
    pub debug: bool,
}

/// Authentication scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthScheme {
    /// OAuth 1.0a with four signing credentials
    #[default]
    OAuth1,
    /// OAuth 2.0 bearer token, optionally refreshable
    OAuth2,
}

impl AuthScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthScheme::OAuth1 => "oauth1",
            AuthScheme::OAuth2 => "oauth2",
        }
    }
}

impl std::str::FromStr for AuthScheme {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "oauth1" => Ok(AuthScheme::OAuth1),
            "oauth2" => Ok(AuthScheme::OAuth2),
            other => Err(ConfigError::InvalidValue {
                field: ENV_AUTH_TYPE.to_string(),
                message: format!("'{}' is not one of: oauth1, oauth2", other),
            }),
        }
    }
}

impl std::fmt::Display for AuthScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub scheme: AuthScheme,
    #[serde(default)]
    pub oauth1: OAuth1Config,
    #[serde(default)]
    pub oauth2: OAuth2Config,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OAuth1Config {
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub access_token: Option<String>,
    pub access_token_secret: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OAuth2Config {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Per-endpoint overrides of the default limits
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LimitsConfig {
    pub create_post: Option<LimitOverride>,
    pub delete_post: Option<LimitOverride>,
    pub lookup_post: Option<LimitOverride>,
    pub search_posts: Option<LimitOverride>,
    pub upload_media: Option<LimitOverride>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LimitOverride {
    pub interval_secs: Option<i64>,
    pub daily_ceiling: Option<u32>,
}

impl LimitsConfig {
    fn override_for(&self, key: EndpointKey) -> Option<&LimitOverride> {
        match key {
            EndpointKey::CreatePost => self.create_post.as_ref(),
            EndpointKey::DeletePost => self.delete_post.as_ref(),
            EndpointKey::LookupPost => self.lookup_post.as_ref(),
            EndpointKey::SearchPosts => self.search_posts.as_ref(),
            EndpointKey::UploadMedia => self.upload_media.as_ref(),
        }
    }

    /// Build the governor limit table, starting from the free-tier defaults
    pub fn to_limit_table(&self) -> Result<LimitTable> {
        let mut table = LimitTable::default();
        for key in EndpointKey::ALL {
            let Some(over) = self.override_for(key) else {
                continue;
            };
            let Some(base) = table.get(key).copied() else {
                continue;
            };
            let min_interval = match over.interval_secs {
                Some(secs) => Duration::try_seconds(secs)
                    .filter(|interval| *interval >= Duration::zero())
                    .ok_or_else(|| ConfigError::InvalidValue {
                        field: format!("limits.{}.interval_secs", key.as_str().replace('-', "_")),
                        message: format!("{} is out of range", secs),
                    })?,
                None => base.min_interval,
            };
            table.set(
                key,
                EndpointLimit {
                    min_interval,
                    daily_ceiling: over.daily_ceiling.or(base.daily_ceiling),
                },
            );
        }
        Ok(table)
    }
}

/// Base URLs for every platform endpoint the broker talks to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    /// Versioned (v2) API root
    pub api_v2: String,
    /// Legacy (v1.1) API root
    pub api_v1: String,
    /// Legacy media upload endpoint
    pub upload_v1: String,
    /// Versioned media upload endpoint
    pub upload_v2: String,
    /// OAuth 2.0 token endpoint
    pub token: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            api_v2: "https://api.twitter.com/2".to_string(),
            api_v1: "https://api.twitter.com/1.1".to_string(),
            upload_v1: "https://upload.twitter.com/1.1/media/upload.json".to_string(),
            upload_v2: "https://api.x.com/2/media/upload".to_string(),
            token: "https://api.x.com/2/oauth2/token".to_string(),
        }
    }
}

impl Endpoints {
    pub fn create_post(&self) -> String {
        format!("{}/tweets", self.api_v2)
    }

    pub fn post(&self, id: &str) -> String {
        format!("{}/tweets/{}", self.api_v2, id)
    }

    pub fn search_recent(&self) -> String {
        format!("{}/tweets/search/recent", self.api_v2)
    }

    pub fn legacy_destroy(&self, id: &str) -> String {
        format!("{}/statuses/destroy/{}.json", self.api_v1, id)
    }

    fn validate(&self) -> Result<()> {
        let fields = [
            ("endpoints.api_v2", &self.api_v2),
            ("endpoints.api_v1", &self.api_v1),
            ("endpoints.upload_v1", &self.upload_v1),
            ("endpoints.upload_v2", &self.upload_v2),
            ("endpoints.token", &self.token),
        ];
        for (field, value) in fields {
            url::Url::parse(value).map_err(|e| ConfigError::InvalidValue {
                field: field.to_string(),
                message: e.to_string(),
            })?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// When the versioned delete endpoint may be abandoned for the legacy one
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletePolicy {
    /// Statuses from the versioned delete that trigger the fallback
    #[serde(default = "default_fallback_statuses")]
    pub fallback_statuses: Vec<u16>,
    /// Treat the versioned delete as failing without calling it
    #[serde(default)]
    pub modern_delete_broken: bool,
}

fn default_fallback_statuses() -> Vec<u16> {
    vec![500]
}

impl Default for DeletePolicy {
    fn default() -> Self {
        Self {
            fallback_statuses: default_fallback_statuses(),
            modern_delete_broken: false,
        }
    }
}

impl Config {
    /// Load configuration from the default location, then apply the environment
    ///
    /// A missing config file is not an error: everything can come from the
    /// environment.
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        let mut config = if config_path.exists() {
            Self::load_from_path(&config_path)?
        } else {
            Self::default()
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Load configuration from a specific path (no environment overlay)
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        Ok(config)
    }

    /// Overlay process environment variables
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|name| std::env::var(name).ok())
    }

    /// Overlay variables from an arbitrary lookup; empty values are ignored
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(scheme) = var(ENV_AUTH_TYPE) {
            self.auth.scheme = scheme.parse()?;
        }

        let oauth1 = &mut self.auth.oauth1;
        overlay(&mut oauth1.api_key, var(ENV_API_KEY));
        overlay(&mut oauth1.api_secret, var(ENV_API_SECRET));
        overlay(&mut oauth1.access_token, var(ENV_ACCESS_TOKEN));
        overlay(&mut oauth1.access_token_secret, var(ENV_ACCESS_TOKEN_SECRET));

        let oauth2 = &mut self.auth.oauth2;
        overlay(&mut oauth2.access_token, var(ENV_OAUTH2_ACCESS_TOKEN));
        overlay(&mut oauth2.refresh_token, var(ENV_OAUTH2_REFRESH_TOKEN));
        overlay(&mut oauth2.client_id, var(ENV_CLIENT_ID));
        overlay(&mut oauth2.client_secret, var(ENV_CLIENT_SECRET));

        if let Some(raw) = var(ENV_OAUTH2_EXPIRES_AT) {
            oauth2.expires_at = Some(parse_expiry(&raw)?);
        }

        if let Some(debug) = var(ENV_DEBUG) {
            self.debug = matches!(debug.to_lowercase().as_str(), "1" | "true" | "yes");
        }

        Ok(())
    }

    /// Validate everything except credential completeness
    ///
    /// Credential completeness is checked when the session is built, so that
    /// the error can name the missing fields of the selected scheme.
    pub fn validate(&self) -> Result<()> {
        self.endpoints.validate()?;
        self.limits.to_limit_table()?;
        if self.http.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "http.timeout_secs".to_string(),
                message: "must be greater than zero".to_string(),
            }
            .into());
        }
        self.credentials.validate()?;
        Ok(())
    }
}

fn overlay(slot: &mut Option<String>, value: Option<String>) {
    if value.is_some() {
        *slot = value;
    }
}

/// Parse an expiry given as epoch milliseconds or RFC 3339
fn parse_expiry(raw: &str) -> Result<DateTime<Utc>> {
    let invalid = |message: String| ConfigError::InvalidValue {
        field: ENV_OAUTH2_EXPIRES_AT.to_string(),
        message,
    };

    if let Ok(millis) = raw.trim().parse::<i64>() {
        return Utc
            .timestamp_millis_opt(millis)
            .single()
            .ok_or_else(|| invalid(format!("{} is out of range", millis)).into());
    }

    DateTime::parse_from_rfc3339(raw.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| invalid(e.to_string()).into())
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("CHIRPGATE_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("chirpgate").join("config.toml"))
}
