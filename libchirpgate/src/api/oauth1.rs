//! OAuth 1.0a HMAC-SHA1 request signing

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::distributions::Alphanumeric;
use rand::Rng;
use secrecy::ExposeSecret;
use sha1::Sha1;

use crate::session::OAuth1Credentials;

fn encode(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

/// Random alphanumeric nonce
pub fn generate_nonce() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

/// Compute the base64 HMAC-SHA1 signature for a request
pub fn signature(
    credentials: &OAuth1Credentials,
    method: &str,
    url: &str,
    params: &[(String, String)],
    oauth_params: &[(String, String)],
) -> String {
    let mut all_params: Vec<(String, String)> = params
        .iter()
        .chain(oauth_params.iter())
        .map(|(k, v)| (encode(k), encode(v)))
        .collect();
    all_params.sort();

    let param_string = all_params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");

    let base_string = format!(
        "{}&{}&{}",
        method.to_uppercase(),
        encode(url),
        encode(&param_string)
    );

    let signing_key = format!(
        "{}&{}",
        encode(credentials.api_secret.expose_secret()),
        encode(credentials.access_token_secret.expose_secret())
    );

    let mut mac = <Hmac<Sha1> as Mac>::new_from_slice(signing_key.as_bytes())
        .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any length"));
    mac.update(base_string.as_bytes());
    STANDARD.encode(mac.finalize().into_bytes())
}

/// Build the `Authorization` header with an explicit nonce and timestamp
pub fn authorization_header_with(
    credentials: &OAuth1Credentials,
    method: &str,
    url: &str,
    params: &[(String, String)],
    nonce: &str,
    timestamp: i64,
) -> String {
    let mut oauth_params = vec![
        (
            "oauth_consumer_key".to_string(),
            credentials.api_key.expose_secret().to_string(),
        ),
        ("oauth_nonce".to_string(), nonce.to_string()),
        ("oauth_signature_method".to_string(), "HMAC-SHA1".to_string()),
        ("oauth_timestamp".to_string(), timestamp.to_string()),
        (
            "oauth_token".to_string(),
            credentials.access_token.expose_secret().to_string(),
        ),
        ("oauth_version".to_string(), "1.0".to_string()),
    ];

    let signature = signature(credentials, method, url, params, &oauth_params);
    oauth_params.push(("oauth_signature".to_string(), signature));
    oauth_params.sort();

    let header_parts: Vec<String> = oauth_params
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", encode(k), encode(v)))
        .collect();

    format!("OAuth {}", header_parts.join(", "))
}

/// Build the `Authorization` header for a request made now
pub fn authorization_header(
    credentials: &OAuth1Credentials,
    method: &str,
    url: &str,
    params: &[(String, String)],
) -> String {
    authorization_header_with(
        credentials,
        method,
        url,
        params,
        &generate_nonce(),
        chrono::Utc::now().timestamp(),
    )
}
