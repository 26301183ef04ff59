//! HTTP transport abstraction
//!
//! The broker and the uploaders describe requests as plain data (`ApiRequest`)
//! and hand them to an `HttpTransport` together with the authentication to
//! apply. The real transport is `http::ReqwestTransport`; tests script
//! responses through `mock::MockTransport` without any network access.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{ChirpgateError, Result};
use crate::session::RequestAuth;

pub mod http;
pub mod oauth1;

// Mock transport is available for all builds (not just tests) to support integration tests
pub mod mock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MultipartField {
    Text {
        name: String,
        value: String,
    },
    File {
        name: String,
        file_name: String,
        mime: String,
        bytes: Vec<u8>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    Json(Value),
    /// URL-encoded form; these parameters take part in OAuth 1.0a signatures
    Form(Vec<(String, String)>),
    Multipart(Vec<MultipartField>),
}

/// A platform request described as data
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    /// URL without query string
    pub url: String,
    pub query: Vec<(String, String)>,
    pub body: RequestBody,
}

impl ApiRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            query: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::Post, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::Delete, url)
    }

    pub fn query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    pub fn form(mut self, fields: Vec<(String, String)>) -> Self {
        self.body = RequestBody::Form(fields);
        self
    }

    pub fn multipart(mut self, fields: Vec<MultipartField>) -> Self {
        self.body = RequestBody::Multipart(fields);
        self
    }

    /// Parameters covered by an OAuth 1.0a signature: query plus form fields
    pub fn signature_params(&self) -> Vec<(String, String)> {
        let mut params = self.query.clone();
        if let RequestBody::Form(fields) = &self.body {
            params.extend(fields.iter().cloned());
        }
        params
    }
}

/// Raw platform response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Parse the body as JSON; an empty body parses as `null`
    pub fn json(&self) -> Result<Value> {
        if self.body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&self.body).map_err(|e| ChirpgateError::Platform {
            code: "INVALID_RESPONSE".to_string(),
            status: self.status,
            message: format!("Response is not valid JSON: {}", e),
        })
    }

    /// Pass successful responses through, turn everything else into a platform error
    pub fn error_for_status(self) -> Result<Self> {
        if self.is_success() {
            return Ok(self);
        }
        Err(self.to_platform_error())
    }

    /// Build a structured platform error from a failed response
    ///
    /// Understands both the v2 problem shape (`title`/`detail`) and the v1.1
    /// `errors` array; anything else keeps the raw body as the message.
    pub fn to_platform_error(&self) -> ChirpgateError {
        let parsed: Option<Value> = serde_json::from_str(&self.body).ok();

        let (code, message) = match &parsed {
            Some(v) if v["title"].is_string() || v["detail"].is_string() => (
                v["title"].as_str().map(String::from),
                v["detail"]
                    .as_str()
                    .or(v["title"].as_str())
                    .map(String::from),
            ),
            Some(v) if v["errors"].is_array() => {
                let first = &v["errors"][0];
                let code = match &first["code"] {
                    Value::Number(n) => Some(n.to_string()),
                    Value::String(s) => Some(s.clone()),
                    _ => first["title"].as_str().map(String::from),
                };
                let message = first["message"]
                    .as_str()
                    .or(first["detail"].as_str())
                    .map(String::from);
                (code, message)
            }
            _ => (None, None),
        };

        ChirpgateError::Platform {
            code: code.unwrap_or_else(|| format!("HTTP_{}", self.status)),
            status: self.status,
            message: message.unwrap_or_else(|| self.body.clone()),
        }
    }
}

/// Executes platform requests
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send `request` with `auth` applied and return the raw response
    ///
    /// Non-success statuses are returned as responses, not errors; only
    /// failures to get a response at all are errors.
    async fn execute(&self, request: ApiRequest, auth: RequestAuth<'_>) -> Result<ApiResponse>;
}
