//! Mock transport for testing
//!
//! Responses are scripted up front and matched against outgoing requests by
//! method and URL suffix. Every request is recorded, together with the kind
//! of authentication it carried, so tests can assert on exactly what would
//! have been sent to the platform.

use async_trait::async_trait;
use secrecy::ExposeSecret;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::{ApiRequest, ApiResponse, HttpTransport, Method};
use crate::error::{ChirpgateError, Result};
use crate::session::RequestAuth;

/// Authentication observed on a recorded request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedAuth {
    OAuth1,
    Bearer(String),
    Basic { username: String },
}

/// A request the mock received
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub request: ApiRequest,
    pub auth: RecordedAuth,
}

#[derive(Debug, Clone)]
struct Scripted {
    method: Method,
    url_suffix: String,
    response: ApiResponse,
}

/// Transport that replays scripted responses
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    script: Arc<Mutex<VecDeque<Scripted>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for the next request matching `method` and `url_suffix`
    pub fn respond(&self, method: Method, url_suffix: &str, status: u16, body: &str) -> &Self {
        self.script.lock().unwrap().push_back(Scripted {
            method,
            url_suffix: url_suffix.to_string(),
            response: ApiResponse::new(status, body),
        });
        self
    }

    /// All requests received so far
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Requests whose URL ends with `url_suffix`
    pub fn requests_to(&self, url_suffix: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.request.url.ends_with(url_suffix))
            .collect()
    }

    /// Number of scripted responses not yet consumed
    pub fn pending(&self) -> usize {
        self.script.lock().unwrap().len()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn execute(&self, request: ApiRequest, auth: RequestAuth<'_>) -> Result<ApiResponse> {
        let recorded_auth = match auth {
            RequestAuth::OAuth1(_) => RecordedAuth::OAuth1,
            RequestAuth::Bearer(token) => RecordedAuth::Bearer(token.expose_secret().to_string()),
            RequestAuth::Basic { username, .. } => RecordedAuth::Basic {
                username: username.to_string(),
            },
        };

        self.requests.lock().unwrap().push(RecordedRequest {
            request: request.clone(),
            auth: recorded_auth,
        });

        let mut script = self.script.lock().unwrap();
        let position = script
            .iter()
            .position(|s| s.method == request.method && request.url.ends_with(&s.url_suffix));

        match position.and_then(|i| script.remove(i)) {
            Some(scripted) => Ok(scripted.response),
            None => Err(ChirpgateError::Internal(format!(
                "No scripted response for {} {}",
                request.method, request.url
            ))),
        }
    }
}
