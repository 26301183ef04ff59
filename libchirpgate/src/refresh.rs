//! OAuth 2.0 token refresh
//!
//! The platform rotates refresh tokens on every use, so a successful refresh
//! is only useful if the new pair is persisted before anything else happens.

use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::sync::Arc;

use crate::api::{ApiRequest, HttpTransport};
use crate::config::{ENV_OAUTH2_ACCESS_TOKEN, ENV_OAUTH2_EXPIRES_AT, ENV_OAUTH2_REFRESH_TOKEN};
use crate::credentials::{CredentialStore, CONSUMED_REFRESH_TOKEN_KEY};
use crate::error::{ConfigError, Result};
use crate::session::{preview, OAuth2Credentials, RequestAuth};

/// Refresh when the token expires within this many minutes
pub const REFRESH_MARGIN_MINUTES: i64 = 5;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

pub struct TokenRefresher {
    transport: Arc<dyn HttpTransport>,
    token_url: String,
    debug: bool,
}

impl TokenRefresher {
    pub fn new(transport: Arc<dyn HttpTransport>, token_url: String, debug: bool) -> Self {
        Self {
            transport,
            token_url,
            debug,
        }
    }

    pub fn needs_refresh(&self, credentials: &OAuth2Credentials, now: DateTime<Utc>) -> bool {
        credentials.needs_refresh(now, Duration::minutes(REFRESH_MARGIN_MINUTES))
    }

    /// Exchange the refresh token for a new credential snapshot
    ///
    /// Client id and secret carry over unchanged. If the platform does not
    /// return a new refresh token the old one is kept.
    ///
    /// # Errors
    ///
    /// Every failure is reported as `ConfigError::RefreshFailed`.
    pub async fn refresh(
        &self,
        credentials: &OAuth2Credentials,
        now: DateTime<Utc>,
    ) -> Result<OAuth2Credentials> {
        let failed = |message: String| ConfigError::RefreshFailed(message);

        let refresh_token = credentials
            .refresh_token
            .as_ref()
            .ok_or_else(|| failed("no refresh token available".to_string()))?;
        let (client_id, client_secret) =
            match (&credentials.client_id, &credentials.client_secret) {
                (Some(id), Some(secret)) => (id.as_str(), secret),
                _ => {
                    return Err(failed(
                        "X_CLIENT_ID and X_CLIENT_SECRET are required to refresh tokens"
                            .to_string(),
                    )
                    .into())
                }
            };

        if self.debug {
            tracing::debug!(
                "Refreshing OAuth 2.0 token {} (expires: {:?})",
                preview(credentials.access_token.expose_secret()),
                credentials.expires_at
            );
        }

        let request = ApiRequest::post(&self.token_url).form(vec![
            ("grant_type".to_string(), "refresh_token".to_string()),
            (
                "refresh_token".to_string(),
                refresh_token.expose_secret().to_string(),
            ),
            ("client_id".to_string(), client_id.to_string()),
        ]);

        let auth = RequestAuth::Basic {
            username: client_id,
            password: client_secret,
        };

        let response = self
            .transport
            .execute(request, auth)
            .await
            .map_err(|e| failed(e.to_string()))?;

        if !response.is_success() {
            return Err(failed(format!("status {}: {}", response.status, response.body)).into());
        }

        let token: TokenResponse = serde_json::from_str(&response.body)
            .map_err(|e| failed(format!("unreadable token response: {}", e)))?;

        if token.access_token.is_empty() {
            return Err(failed("token response has an empty access_token".to_string()).into());
        }

        let refresh_token = match token.refresh_token.filter(|t| !t.is_empty()) {
            Some(rotated) => SecretString::from(rotated),
            None => SecretString::from(refresh_token.expose_secret().to_string()),
        };

        let expires_at = match token.expires_in {
            Some(secs) => Some(
                Duration::try_seconds(secs)
                    .and_then(|lifetime| now.checked_add_signed(lifetime))
                    .ok_or_else(|| failed(format!("expires_in {} is out of range", secs)))?,
            ),
            None => None,
        };

        let refreshed = OAuth2Credentials {
            access_token: SecretString::from(token.access_token),
            refresh_token: Some(refresh_token),
            client_id: credentials.client_id.clone(),
            client_secret: Some(SecretString::from(
                client_secret.expose_secret().to_string(),
            )),
            expires_at,
        };

        if self.debug {
            tracing::debug!(
                "Refreshed OAuth 2.0 token {} (expires: {:?})",
                preview(refreshed.access_token.expose_secret()),
                refreshed.expires_at
            );
        }
        tracing::info!("OAuth 2.0 access token refreshed");

        Ok(refreshed)
    }
}

/// Write a refreshed snapshot to the credential store
///
/// Expiry is stored as epoch milliseconds. `consumed` is the refresh token
/// that was exchanged for this snapshot.
pub fn persist(
    store: &dyn CredentialStore,
    credentials: &OAuth2Credentials,
    consumed: Option<&str>,
) -> Result<()> {
    store.store(
        ENV_OAUTH2_ACCESS_TOKEN,
        credentials.access_token.expose_secret(),
    )?;
    if let Some(refresh_token) = &credentials.refresh_token {
        store.store(ENV_OAUTH2_REFRESH_TOKEN, refresh_token.expose_secret())?;
    }
    if let Some(expires_at) = credentials.expires_at {
        store.store(
            ENV_OAUTH2_EXPIRES_AT,
            &expires_at.timestamp_millis().to_string(),
        )?;
    }
    if let Some(consumed) = consumed {
        store.store(CONSUMED_REFRESH_TOKEN_KEY, consumed)?;
    }
    tracing::debug!("Persisted refreshed tokens to {}", store.backend_name());
    Ok(())
}
