//! Credential persistence for rotated OAuth 2.0 tokens
//!
//! Chirpgate only writes credentials in one situation: after a successful
//! token refresh, the new access token, refresh token and expiry must survive
//! a restart because the platform rotates refresh tokens on every use.
//!
//! # Backends
//!
//! - `KeyringStore`: OS-native secure storage
//! - `EnvFileStore`: a dotenv-style `KEY=VALUE` file, rewritten in place
//! - `MemoryStore`: in-process map, used by tests and `storage = "none"`
//!
//! Keys are the environment variable names the values would otherwise come
//! from (e.g. `X_OAUTH2_ACCESS_TOKEN`), so an env file written here can be
//! sourced directly.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::config::{
    AuthScheme, Config, ENV_OAUTH2_ACCESS_TOKEN, ENV_OAUTH2_EXPIRES_AT, ENV_OAUTH2_REFRESH_TOKEN,
};
use crate::error::{ConfigError, CredentialError, Result};

const KEYRING_SERVICE: &str = "chirpgate";

/// Store key for the refresh token that the stored pair was obtained with
pub const CONSUMED_REFRESH_TOKEN_KEY: &str = "X_OAUTH2_CONSUMED_REFRESH_TOKEN";

/// Trait for credential storage backends
pub trait CredentialStore: Send + Sync {
    /// Store (or overwrite) a credential
    fn store(&self, key: &str, value: &str) -> Result<()>;

    /// Retrieve a credential
    ///
    /// # Errors
    ///
    /// Returns `CredentialError::NotFound` if no value is stored under `key`.
    fn retrieve(&self, key: &str) -> Result<String>;

    /// Name of the backend, for diagnostics
    fn backend_name(&self) -> &str;
}

/// OS keyring storage backend
///
/// Entries live under the `chirpgate` service with the variable name as the
/// account. The keyring may be unavailable on headless systems, in which case
/// `new()` fails with `CredentialError::KeyringUnavailable`.
pub struct KeyringStore;

impl KeyringStore {
    pub fn new() -> Result<Self> {
        match keyring::Entry::new(KEYRING_SERVICE, "availability_check") {
            Ok(_) => Ok(Self),
            Err(e) => Err(CredentialError::KeyringUnavailable(format!(
                "OS keyring not accessible: {}",
                e
            ))
            .into()),
        }
    }

    fn entry(key: &str) -> Result<keyring::Entry> {
        keyring::Entry::new(KEYRING_SERVICE, key)
            .map_err(|e| CredentialError::KeyringUnavailable(e.to_string()).into())
    }
}

impl CredentialStore for KeyringStore {
    fn store(&self, key: &str, value: &str) -> Result<()> {
        Self::entry(key)?
            .set_password(value)
            .map_err(|e| CredentialError::Keyring(e.to_string()))?;
        tracing::debug!("Stored {} in OS keyring", key);
        Ok(())
    }

    fn retrieve(&self, key: &str) -> Result<String> {
        match Self::entry(key)?.get_password() {
            Ok(value) => Ok(value),
            Err(keyring::Error::NoEntry) => Err(CredentialError::NotFound(key.to_string()).into()),
            Err(e) => Err(CredentialError::Keyring(e.to_string()).into()),
        }
    }

    fn backend_name(&self) -> &str {
        "keyring"
    }
}

/// Validate that a path is not a symlink
///
/// Credential files must be regular files so that a rewrite cannot be
/// redirected to some other location.
pub fn validate_not_symlink(path: &Path) -> Result<()> {
    let metadata = std::fs::symlink_metadata(path).map_err(|e| {
        CredentialError::Io(std::io::Error::new(
            e.kind(),
            format!("Failed to read metadata for '{}': {}", path.display(), e),
        ))
    })?;

    if metadata.is_symlink() {
        return Err(CredentialError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!(
                "Credential file '{}' is a symbolic link; use a regular file instead",
                path.display()
            ),
        ))
        .into());
    }

    Ok(())
}

/// Dotenv-style file backend
///
/// Existing lines, comments and ordering are preserved; a stored key replaces
/// its line in place or is appended at the end. On Unix the file is written
/// with mode 600.
pub struct EnvFileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl EnvFileStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_lines(&self) -> Result<Vec<String>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        validate_not_symlink(&self.path)?;
        let content = std::fs::read_to_string(&self.path).map_err(CredentialError::Io)?;
        Ok(content.lines().map(String::from).collect())
    }

    fn write_lines(&self, lines: &[String]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(CredentialError::Io)?;
            }
        }

        let tmp = self.path.with_extension("tmp");
        let mut content = lines.join("\n");
        content.push('\n');
        std::fs::write(&tmp, content).map_err(CredentialError::Io)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&tmp, perms).map_err(CredentialError::Io)?;
        }

        std::fs::rename(&tmp, &self.path).map_err(CredentialError::Io)?;
        Ok(())
    }
}

fn split_assignment(line: &str) -> Option<(&str, &str)> {
    let trimmed = line.trim_start();
    if trimmed.starts_with('#') {
        return None;
    }
    let trimmed = trimmed.strip_prefix("export ").unwrap_or(trimmed);
    let (key, value) = trimmed.split_once('=')?;
    Some((key.trim(), value.trim().trim_matches('"')))
}

impl CredentialStore for EnvFileStore {
    fn store(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut lines = self.read_lines()?;
        let assignment = format!("{}={}", key, value);

        match lines
            .iter()
            .position(|line| split_assignment(line).map(|(k, _)| k) == Some(key))
        {
            Some(index) => lines[index] = assignment,
            None => lines.push(assignment),
        }

        self.write_lines(&lines)?;
        tracing::debug!("Stored {} in {}", key, self.path.display());
        Ok(())
    }

    fn retrieve(&self, key: &str) -> Result<String> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        self.read_lines()?
            .iter()
            .filter_map(|line| split_assignment(line))
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.to_string())
            .ok_or_else(|| CredentialError::NotFound(key.to_string()).into())
    }

    fn backend_name(&self) -> &str {
        "env_file"
    }
}

/// In-memory backend
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryStore {
    fn store(&self, key: &str, value: &str) -> Result<()> {
        self.values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn retrieve(&self, key: &str) -> Result<String> {
        self.values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
            .ok_or_else(|| CredentialError::NotFound(key.to_string()).into())
    }

    fn backend_name(&self) -> &str {
        "memory"
    }
}

/// Storage backend type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// OS-native keyring (macOS Keychain, Windows Credential Manager, Linux Secret Service)
    Keyring,
    /// Dotenv-style file
    #[default]
    EnvFile,
    /// Keep refreshed tokens in memory only
    None,
}

/// Credential storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialConfig {
    #[serde(default)]
    pub storage: StorageBackend,

    /// Path of the env file (keyring doesn't use files)
    #[serde(default = "default_credential_path")]
    pub path: String,
}

fn default_credential_path() -> String {
    "~/.config/chirpgate/credentials.env".to_string()
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            storage: StorageBackend::default(),
            path: default_credential_path(),
        }
    }
}

impl CredentialConfig {
    pub fn validate(&self) -> Result<()> {
        if self.storage == StorageBackend::EnvFile && self.path.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "credentials.path".to_string(),
                message: "cannot be empty when storage = \"envfile\"".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Expand ~ and environment variables in the credential path
    pub fn expand_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.path).to_string())
    }

    /// Open the configured backend
    pub fn open(&self) -> Result<Arc<dyn CredentialStore>> {
        let store: Arc<dyn CredentialStore> = match self.storage {
            StorageBackend::Keyring => Arc::new(KeyringStore::new()?),
            StorageBackend::EnvFile => Arc::new(EnvFileStore::new(self.expand_path())),
            StorageBackend::None => Arc::new(MemoryStore::new()),
        };
        tracing::debug!("Credential store: {}", store.backend_name());
        Ok(store)
    }
}

/// Open the token store for the configured scheme and apply stored tokens
///
/// OAuth 1.0a credentials never rotate, so those sessions get an in-memory
/// store and the configured backend is not touched.
pub fn open_token_store(config: &mut Config) -> Result<Arc<dyn CredentialStore>> {
    match config.auth.scheme {
        AuthScheme::OAuth1 => Ok(Arc::new(MemoryStore::new())),
        AuthScheme::OAuth2 => {
            let store = config.credentials.open()?;
            apply_stored_tokens(config, store.as_ref())?;
            Ok(store)
        }
    }
}

/// Overlay previously persisted OAuth 2.0 tokens onto the configuration
///
/// Stored tokens normally win: once a refresh has succeeded, the refresh
/// token in the environment is consumed. The exception is a configured
/// refresh token that is neither the stored one nor the one the stored pair
/// was obtained with. That pair comes from a newer setup and is kept.
pub fn apply_stored_tokens(config: &mut Config, store: &dyn CredentialStore) -> Result<()> {
    if config.auth.scheme != AuthScheme::OAuth2 {
        return Ok(());
    }
    let oauth2 = &mut config.auth.oauth2;

    if let (Some(configured), Some(consumed)) = (
        oauth2.refresh_token.as_deref(),
        retrieve_optional(store, CONSUMED_REFRESH_TOKEN_KEY)?,
    ) {
        let stored = retrieve_optional(store, ENV_OAUTH2_REFRESH_TOKEN)?;
        if configured != consumed && Some(configured) != stored.as_deref() {
            tracing::info!(
                "Configured OAuth 2.0 tokens are newer than {} contents; ignoring stored tokens",
                store.backend_name()
            );
            return Ok(());
        }
    }

    if let Some(token) = retrieve_optional(store, ENV_OAUTH2_ACCESS_TOKEN)? {
        oauth2.access_token = Some(token);
    }
    if let Some(token) = retrieve_optional(store, ENV_OAUTH2_REFRESH_TOKEN)? {
        oauth2.refresh_token = Some(token);
    }
    if let Some(raw) = retrieve_optional(store, ENV_OAUTH2_EXPIRES_AT)? {
        let millis = raw.parse::<i64>().map_err(|e| ConfigError::InvalidValue {
            field: ENV_OAUTH2_EXPIRES_AT.to_string(),
            message: e.to_string(),
        })?;
        oauth2.expires_at = chrono::DateTime::from_timestamp_millis(millis);
    }

    Ok(())
}

fn retrieve_optional(store: &dyn CredentialStore, key: &str) -> Result<Option<String>> {
    match store.retrieve(key) {
        Ok(value) if !value.is_empty() => Ok(Some(value)),
        Ok(_) => Ok(None),
        Err(crate::error::ChirpgateError::Credential(CredentialError::NotFound(_))) => Ok(None),
        Err(e) => Err(e),
    }
}
