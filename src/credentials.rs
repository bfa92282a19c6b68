//! Request credentials for the hosted backend.
//!
//! Public pages authenticate with the project's publishable API key; admin
//! sessions carry a bearer token obtained out of band. Credentials are
//! applied to both HTTP fetches and the WebSocket handshake.

use crate::error::LinkError;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::http::Request;

pub(crate) const API_KEY_HEADER: &str = "x-api-key";

/// How requests against the backend are authenticated.
#[derive(Debug, Clone, Default)]
pub enum Credentials {
    /// No credentials (self-hosted backends without auth).
    #[default]
    None,
    /// Publishable project key, sent as `x-api-key`.
    ApiKey(String),
    /// Bearer token, sent as `Authorization: Bearer ...`.
    Bearer(String),
}

impl Credentials {
    pub fn api_key(key: impl Into<String>) -> Self {
        Self::ApiKey(key.into())
    }

    pub fn bearer(token: impl Into<String>) -> Self {
        Self::Bearer(token.into())
    }

    /// Apply to an outgoing HTTP request.
    pub(crate) fn apply_http(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self {
            Self::None => builder,
            Self::ApiKey(key) => builder.header(API_KEY_HEADER, key),
            Self::Bearer(token) => builder.bearer_auth(token),
        }
    }

    /// Apply to a WebSocket handshake request.
    pub(crate) fn apply_ws<T>(&self, request: &mut Request<T>) -> Result<(), LinkError> {
        match self {
            Self::None => {}
            Self::ApiKey(key) => {
                request.headers_mut().insert(API_KEY_HEADER, header_value(key)?);
            }
            Self::Bearer(token) => {
                request
                    .headers_mut()
                    .insert(AUTHORIZATION, header_value(&format!("Bearer {}", token))?);
            }
        }
        Ok(())
    }
}

fn header_value(value: &str) -> Result<HeaderValue, LinkError> {
    HeaderValue::from_str(value).map_err(|_| {
        LinkError::Configuration("credentials contain characters not valid in a header".into())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_ws_sets_api_key_header() {
        let mut request = Request::builder()
            .uri("ws://localhost:3000/v1/content/feed")
            .body(())
            .unwrap();
        Credentials::api_key("pk_123").apply_ws(&mut request).unwrap();
        assert_eq!(
            request.headers().get(API_KEY_HEADER).unwrap(),
            &HeaderValue::from_static("pk_123")
        );
    }

    #[test]
    fn test_apply_ws_sets_bearer_header() {
        let mut request = Request::builder()
            .uri("ws://localhost:3000/v1/content/feed")
            .body(())
            .unwrap();
        Credentials::bearer("tok").apply_ws(&mut request).unwrap();
        assert_eq!(
            request.headers().get(AUTHORIZATION).unwrap(),
            &HeaderValue::from_static("Bearer tok")
        );
    }

    #[test]
    fn test_invalid_header_value_is_a_configuration_error() {
        let mut request = Request::builder()
            .uri("ws://localhost:3000/v1/content/feed")
            .body(())
            .unwrap();
        let result = Credentials::bearer("bad\ntoken").apply_ws(&mut request);
        assert!(matches!(result, Err(LinkError::Configuration(_))));
    }
}
