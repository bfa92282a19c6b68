//! Production backend speaking HTTP (one-shot reads) and WebSocket (change
//! feed) to the hosted content service.
//!
//! Each change-feed channel opens its own WebSocket; sharing across
//! consumers happens one level up, in the
//! [`ChannelRegistry`](crate::registry::ChannelRegistry), which guarantees
//! at most one channel per filtered resource.

mod ws;

use crate::backend::{Backend, FeedHandle};
use crate::credentials::Credentials;
use crate::descriptor::{Filter, Projection, ResourceDescriptor};
use crate::error::{ChannelError, FetchError, LinkError};
use crate::event::ChangeEvent;
use crate::row::Row;
use crate::timeouts::LinkTimeouts;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use ws::{ClientFrame, FilterSpec};

/// Query endpoint on the backend.
const QUERY_PATH: &str = "/v1/content/query";

static SUBSCRIPTION_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Serialize)]
struct QueryRequest {
    resource: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<FilterSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    columns: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    rows: Vec<Map<String, Value>>,
    #[serde(default)]
    error: Option<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

fn filter_spec(filter: &Filter) -> Option<FilterSpec> {
    match filter {
        Filter::All => None,
        Filter::Eq { column, value } => Some(FilterSpec {
            column: column.clone(),
            value: value.clone(),
        }),
    }
}

/// HTTP + WebSocket client for the hosted content backend.
pub struct RemoteBackend {
    base_url: String,
    http: reqwest::Client,
    credentials: Credentials,
    timeouts: LinkTimeouts,
}

impl RemoteBackend {
    /// Build a backend client for `base_url` (e.g. `https://content.aula.example`).
    pub fn new(
        base_url: impl Into<String>,
        credentials: Credentials,
        timeouts: LinkTimeouts,
    ) -> Result<Self, LinkError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        reqwest::Url::parse(&base_url)
            .map_err(|e| LinkError::Configuration(format!("invalid base URL '{}': {}", base_url, e)))?;

        let mut builder = reqwest::Client::builder();
        if !timeouts.connect_timeout.is_zero() {
            builder = builder.connect_timeout(timeouts.connect_timeout);
        }
        if !timeouts.fetch_timeout.is_zero() {
            builder = builder.timeout(timeouts.fetch_timeout);
        }
        let http = builder
            .build()
            .map_err(|e| LinkError::Network(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url,
            http,
            credentials,
            timeouts,
        })
    }

    fn next_subscription_id(resource: &str) -> String {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let counter = SUBSCRIPTION_COUNTER.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}-{}", resource, nanos, counter)
    }
}

#[async_trait]
impl Backend for RemoteBackend {
    async fn fetch(&self, descriptor: &ResourceDescriptor) -> Result<Vec<Row>, FetchError> {
        let resource = descriptor.resource();
        let request = QueryRequest {
            resource: resource.to_string(),
            filter: filter_spec(descriptor.filter()),
            columns: match descriptor.projection() {
                Projection::All => None,
                Projection::Columns(columns) => Some(columns.clone()),
            },
        };

        let url = format!("{}{}", self.base_url, QUERY_PATH);
        log::debug!("fetching '{}' from {}", resource, url);
        let builder = self.credentials.apply_http(self.http.post(&url).json(&request));

        let response = builder
            .send()
            .await
            .map_err(|e| FetchError::new(resource, e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<QueryResponse>(&body)
                .ok()
                .and_then(|parsed| parsed.error)
                .map(|detail| detail.message)
                .unwrap_or(body);
            return Err(FetchError::new(
                resource,
                format!("backend returned {}: {}", status, message),
            ));
        }

        let parsed: QueryResponse = response
            .json()
            .await
            .map_err(|e| FetchError::new(resource, format!("malformed response: {}", e)))?;
        if let Some(detail) = parsed.error {
            return Err(FetchError::new(resource, detail.message));
        }
        Ok(parsed.rows.into_iter().map(Row::from).collect())
    }

    async fn subscribe(
        &self,
        resource: &str,
        filter: &Filter,
        events: mpsc::Sender<ChangeEvent>,
    ) -> Result<FeedHandle, ChannelError> {
        let url = ws::resolve_ws_url(&self.base_url)
            .map_err(|e| ChannelError::persistent(e.to_string()))?;
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| ChannelError::persistent(format!("failed to build feed request: {}", e)))?;
        self.credentials
            .apply_ws(&mut request)
            .map_err(|e| ChannelError::persistent(e.to_string()))?;

        let mut stream = ws::connect_ws(request, self.timeouts.connect_timeout).await?;

        let subscription_id = Self::next_subscription_id(resource);
        ws::send_frame(
            &mut stream,
            &ClientFrame::Subscribe {
                id: subscription_id.clone(),
                resource: resource.to_string(),
                filter: filter_spec(filter),
            },
        )
        .await?;
        ws::wait_for_subscribed(
            &mut stream,
            &subscription_id,
            &events,
            self.timeouts.subscribe_timeout,
        )
        .await?;
        log::debug!("feed '{}' subscribed", subscription_id);

        let (stop_tx, stop_rx) = oneshot::channel();
        tokio::spawn(ws::reader_loop(
            stream,
            subscription_id,
            events,
            stop_rx,
            self.timeouts.keepalive_interval,
            self.timeouts.pong_timeout,
        ));

        Ok(FeedHandle::new(move || {
            let _ = stop_tx.send(());
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_rejects_bad_base_url() {
        assert!(RemoteBackend::new("not a url", Credentials::None, LinkTimeouts::default()).is_err());
    }

    #[test]
    fn test_new_trims_trailing_slash() {
        let backend =
            RemoteBackend::new("http://localhost:3000/", Credentials::None, LinkTimeouts::default())
                .unwrap();
        assert_eq!(backend.base_url, "http://localhost:3000");
    }

    #[test]
    fn test_query_request_omits_empty_filter_and_columns() {
        let request = QueryRequest {
            resource: "news".to_string(),
            filter: None,
            columns: None,
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"resource": "news"})
        );
    }

    #[test]
    fn test_subscription_ids_are_unique() {
        let a = RemoteBackend::next_subscription_id("news");
        let b = RemoteBackend::next_subscription_id("news");
        assert_ne!(a, b);
        assert!(a.starts_with("news-"));
    }
}
