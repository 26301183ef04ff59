//! Chirpgate - a rate-governed X (Twitter) request broker
//!
//! This library brokers post, search and delete operations against the X API
//! for both OAuth 1.0a and OAuth 2.0 sessions, picking the right API
//! generation per operation, enforcing free-tier limits client-side and
//! validating inbound media before anything reaches the network.

pub mod api;
pub mod broker;
pub mod config;
pub mod credentials;
pub mod error;
pub mod logging;
pub mod media;
pub mod rate_limiter;
pub mod refresh;
pub mod session;
pub mod types;
pub mod upload;
pub mod validation;

// Re-export commonly used types
pub use broker::Broker;
pub use config::{AuthScheme, Config};
pub use credentials::{CredentialConfig, CredentialStore, StorageBackend};
pub use error::{ChirpgateError, Result};
pub use media::{MediaItem, MediaKind};
pub use rate_limiter::{EndpointKey, RateGovernor};
pub use session::Session;
pub use types::{
    Author, DeleteOutcome, DeleteRoute, PostDetails, PostMetrics, PostRequest, PostedItem,
    SearchRequest, SearchResults,
};
