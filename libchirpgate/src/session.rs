//! Credential provider: turns validated configuration into a session handle
//!
//! The session is the only place secrets live after startup. It is built once
//! from `Config` and replaced wholesale when an OAuth 2.0 token is rotated.

use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};

use crate::config::{
    AuthScheme, Config, OAuth2Config, ENV_ACCESS_TOKEN, ENV_ACCESS_TOKEN_SECRET, ENV_API_KEY,
    ENV_API_SECRET, ENV_OAUTH2_ACCESS_TOKEN,
};
use crate::error::{ConfigError, Result};

/// Four signing credentials for OAuth 1.0a
#[derive(Debug)]
pub struct OAuth1Credentials {
    pub api_key: SecretString,
    pub api_secret: SecretString,
    pub access_token: SecretString,
    pub access_token_secret: SecretString,
}

/// Immutable snapshot of OAuth 2.0 credentials
#[derive(Debug)]
pub struct OAuth2Credentials {
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
    pub client_id: Option<String>,
    pub client_secret: Option<SecretString>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl OAuth2Credentials {
    fn from_config(config: &OAuth2Config) -> Option<Self> {
        let access_token = non_empty(&config.access_token)?;
        Some(Self {
            access_token: SecretString::from(access_token.to_string()),
            refresh_token: non_empty(&config.refresh_token)
                .map(|t| SecretString::from(t.to_string())),
            client_id: non_empty(&config.client_id).map(String::from),
            client_secret: non_empty(&config.client_secret)
                .map(|s| SecretString::from(s.to_string())),
            expires_at: config.expires_at,
        })
    }

    /// Whether the token should be refreshed before use at `now`
    ///
    /// Only tokens with both a refresh token and a recorded expiry qualify.
    pub fn needs_refresh(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        match (&self.refresh_token, self.expires_at) {
            (Some(_), Some(expires_at)) => expires_at - now <= margin,
            _ => false,
        }
    }
}

/// Authentication attached to a single outgoing request
#[derive(Debug, Clone, Copy)]
pub enum RequestAuth<'a> {
    OAuth1(&'a OAuth1Credentials),
    Bearer(&'a SecretString),
    Basic {
        username: &'a str,
        password: &'a SecretString,
    },
}

#[derive(Debug)]
enum Credentials {
    OAuth1(OAuth1Credentials),
    OAuth2(OAuth2Credentials),
}

/// Scheme-specific session handle owned by the broker
#[derive(Debug)]
pub struct Session {
    credentials: Credentials,
}

impl Session {
    /// Build a session from configuration
    ///
    /// No network call is made.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingCredentials` naming every missing variable
    /// of the selected scheme.
    pub fn from_config(config: &Config) -> Result<Self> {
        let scheme = config.auth.scheme;
        let missing = missing_fields(config);
        if !missing.is_empty() {
            return Err(ConfigError::MissingCredentials {
                scheme: scheme.to_string(),
                fields: missing,
            }
            .into());
        }

        let credentials = match scheme {
            AuthScheme::OAuth1 => {
                let oauth1 = &config.auth.oauth1;
                let secret = |value: &Option<String>| {
                    SecretString::from(value.clone().unwrap_or_default())
                };
                Credentials::OAuth1(OAuth1Credentials {
                    api_key: secret(&oauth1.api_key),
                    api_secret: secret(&oauth1.api_secret),
                    access_token: secret(&oauth1.access_token),
                    access_token_secret: secret(&oauth1.access_token_secret),
                })
            }
            AuthScheme::OAuth2 => {
                let oauth2 = OAuth2Credentials::from_config(&config.auth.oauth2).ok_or_else(
                    || ConfigError::MissingCredentials {
                        scheme: scheme.to_string(),
                        fields: vec![ENV_OAUTH2_ACCESS_TOKEN.to_string()],
                    },
                )?;
                if config.debug {
                    tracing::debug!(
                        "OAuth 2.0 token {} (refreshable: {}, expires: {:?})",
                        preview(oauth2.access_token.expose_secret()),
                        oauth2.refresh_token.is_some(),
                        oauth2.expires_at
                    );
                }
                Credentials::OAuth2(oauth2)
            }
        };

        if config.debug {
            tracing::debug!("Using {} authentication", scheme);
        }

        Ok(Self { credentials })
    }

    /// Build an OAuth 2.0 session from a fresh credential snapshot
    pub fn from_oauth2(credentials: OAuth2Credentials) -> Self {
        Self {
            credentials: Credentials::OAuth2(credentials),
        }
    }

    pub fn scheme(&self) -> AuthScheme {
        match self.credentials {
            Credentials::OAuth1(_) => AuthScheme::OAuth1,
            Credentials::OAuth2(_) => AuthScheme::OAuth2,
        }
    }

    /// Authentication for platform API requests
    pub fn auth(&self) -> RequestAuth<'_> {
        match &self.credentials {
            Credentials::OAuth1(creds) => RequestAuth::OAuth1(creds),
            Credentials::OAuth2(creds) => RequestAuth::Bearer(&creds.access_token),
        }
    }

    pub fn oauth2(&self) -> Option<&OAuth2Credentials> {
        match &self.credentials {
            Credentials::OAuth2(creds) => Some(creds),
            Credentials::OAuth1(_) => None,
        }
    }
}

/// Names of the variables the selected scheme still needs
pub fn missing_fields(config: &Config) -> Vec<String> {
    let fields: Vec<(&str, &Option<String>)> = match config.auth.scheme {
        AuthScheme::OAuth1 => {
            let oauth1 = &config.auth.oauth1;
            vec![
                (ENV_API_KEY, &oauth1.api_key),
                (ENV_API_SECRET, &oauth1.api_secret),
                (ENV_ACCESS_TOKEN, &oauth1.access_token),
                (ENV_ACCESS_TOKEN_SECRET, &oauth1.access_token_secret),
            ]
        }
        AuthScheme::OAuth2 => vec![(ENV_OAUTH2_ACCESS_TOKEN, &config.auth.oauth2.access_token)],
    };

    fields
        .into_iter()
        .filter(|(_, value)| non_empty(value).is_none())
        .map(|(name, _)| name.to_string())
        .collect()
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Truncated preview of a secret for diagnostics
pub(crate) fn preview(secret: &str) -> String {
    let head: String = secret.chars().take(8).collect();
    format!("{}...", head)
}
