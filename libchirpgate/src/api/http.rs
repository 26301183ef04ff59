//! reqwest-backed transport

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder};
use secrecy::ExposeSecret;
use std::time::Duration;

use super::{oauth1, ApiRequest, ApiResponse, HttpTransport, Method, MultipartField, RequestBody};
use crate::config::HttpConfig;
use crate::error::Result;
use crate::session::RequestAuth;

pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("chirpgate/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    fn builder(&self, method: Method, url: &str) -> RequestBuilder {
        match method {
            Method::Get => self.client.get(url),
            Method::Post => self.client.post(url),
            Method::Delete => self.client.delete(url),
        }
    }
}

fn multipart_form(fields: Vec<MultipartField>) -> Result<Form> {
    let mut form = Form::new();
    for field in fields {
        form = match field {
            MultipartField::Text { name, value } => form.text(name, value),
            MultipartField::File {
                name,
                file_name,
                mime,
                bytes,
            } => form.part(name, Part::bytes(bytes).file_name(file_name).mime_str(&mime)?),
        };
    }
    Ok(form)
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: ApiRequest, auth: RequestAuth<'_>) -> Result<ApiResponse> {
        let mut builder = self.builder(request.method, &request.url);

        builder = match auth {
            RequestAuth::OAuth1(credentials) => {
                let header = oauth1::authorization_header(
                    credentials,
                    request.method.as_str(),
                    &request.url,
                    &request.signature_params(),
                );
                builder.header(reqwest::header::AUTHORIZATION, header)
            }
            RequestAuth::Bearer(token) => builder.bearer_auth(token.expose_secret()),
            RequestAuth::Basic { username, password } => {
                builder.basic_auth(username, Some(password.expose_secret()))
            }
        };

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }

        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(&value),
            RequestBody::Form(fields) => builder.form(&fields),
            RequestBody::Multipart(fields) => builder.multipart(multipart_form(fields)?),
        };

        tracing::debug!("{} {}", request.method, request.url);

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        tracing::debug!("{} {} -> {}", request.method, request.url, status);

        Ok(ApiResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_builds_with_default_config() {
        assert!(ReqwestTransport::new(&HttpConfig::default()).is_ok());
    }

    #[test]
    fn test_multipart_rejects_bad_mime() {
        let result = multipart_form(vec![MultipartField::File {
            name: "media".to_string(),
            file_name: "media".to_string(),
            mime: "not a mime type".to_string(),
            bytes: vec![1, 2, 3],
        }]);
        assert!(result.is_err());
    }

    #[test]
    fn test_multipart_accepts_image_mime() {
        let result = multipart_form(vec![
            MultipartField::File {
                name: "media".to_string(),
                file_name: "media".to_string(),
                mime: "image/png".to_string(),
                bytes: vec![1, 2, 3],
            },
            MultipartField::Text {
                name: "media_category".to_string(),
                value: "tweet_image".to_string(),
            },
        ]);
        assert!(result.is_ok());
    }
}
