//! Thin authenticated HTTP transport for the Splunk HTTP Event Collector.

use crate::error::SinkError;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use std::time::Duration;
use uuid::Uuid;

const AUTH_SCHEME: &str = "Splunk";
const REQUEST_CHANNEL_HEADER: &str = "X-Splunk-Request-Channel";
/// Path segment whose presence in the configured host means the caller
/// already picked a collector endpoint.
const COLLECTOR_PATH_MARKER: &str = "services/collector";
/// Default endpoint appended when the host carries no collector path.
const DEFAULT_EVENT_COLLECTOR_PATH: &str = "services/collector/event";

/// HTTP status codes the collector documents as application errors.
/// Resending an identical payload cannot succeed, so these are permanent.
const APPLICATION_ERROR_STATUSES: [u16; 3] = [400, 403, 405];

/// A request that outlives this surfaces as a transient failure rather
/// than stalling the batching worker.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Tri-state result of one delivery attempt. Drives the batching
/// engine's retry/discard decision; deliberately not a boolean.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Accepted,
    RejectedPermanently(u16),
    RejectedTransiently(String),
}

impl DeliveryOutcome {
    pub fn from_status(status: u16) -> Self {
        if (200..300).contains(&status) {
            DeliveryOutcome::Accepted
        } else if APPLICATION_ERROR_STATUSES.contains(&status) {
            DeliveryOutcome::RejectedPermanently(status)
        } else {
            DeliveryOutcome::RejectedTransiently(format!("status {status}"))
        }
    }
}

/// Resolve the full collector URL from the configured host.
///
/// A host that already contains the collector path is used verbatim;
/// otherwise the default event endpoint is appended, tolerating a single
/// trailing slash.
pub fn resolve_endpoint(host: &str) -> String {
    if host.contains(COLLECTOR_PATH_MARKER) {
        host.to_string()
    } else {
        format!(
            "{}/{}",
            host.trim_end_matches('/'),
            DEFAULT_EVENT_COLLECTOR_PATH
        )
    }
}

/// Seam between the batching engine and the real HTTP client, so tests
/// can inject fault-scripted transports.
#[async_trait]
pub trait HecTransport: Send + Sync {
    /// Deliver one multi-event payload. The payload is never logged; it
    /// may contain sensitive data.
    async fn send(&self, payload: String) -> DeliveryOutcome;
}

/// Authenticated `reqwest` client for one collector endpoint.
///
/// The `Authorization` and request-channel headers are attached once as
/// client defaults. The channel identifier is generated at construction
/// and stays stable for the life of the client, which lets the collector
/// attribute and deduplicate the request stream.
pub struct EventCollectorClient {
    client: reqwest::Client,
    endpoint: String,
    channel: String,
}

impl EventCollectorClient {
    pub fn new(host: &str, token: &str) -> Result<Self, SinkError> {
        Self::with_channel(host, token, Uuid::new_v4().to_string())
    }

    /// Build a client with a caller-supplied channel identifier; used
    /// when a channel has already been assigned and must not be replaced.
    pub fn with_channel(host: &str, token: &str, channel: String) -> Result<Self, SinkError> {
        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("{AUTH_SCHEME} {token}"))
            .map_err(|e| SinkError::InvalidConfig(format!("event collector token: {e}")))?;
        headers.insert(AUTHORIZATION, auth);
        let channel_value = HeaderValue::from_str(&channel)
            .map_err(|e| SinkError::InvalidConfig(format!("request channel: {e}")))?;
        headers.insert(REQUEST_CHANNEL_HEADER, channel_value);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SinkError::InvalidConfig(e.to_string()))?;

        Ok(EventCollectorClient {
            client,
            endpoint: resolve_endpoint(host),
            channel,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

#[async_trait]
impl HecTransport for EventCollectorClient {
    async fn send(&self, payload: String) -> DeliveryOutcome {
        match self.client.post(&self.endpoint).body(payload).send().await {
            Ok(response) => DeliveryOutcome::from_status(response.status().as_u16()),
            Err(err) => DeliveryOutcome::RejectedTransiently(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_host_gets_default_path() {
        assert_eq!(
            resolve_endpoint("https://splunk:8088"),
            "https://splunk:8088/services/collector/event"
        );
    }

    #[test]
    fn trailing_slash_is_normalized() {
        assert_eq!(
            resolve_endpoint("https://splunk:8088/"),
            "https://splunk:8088/services/collector/event"
        );
    }

    #[test]
    fn embedded_collector_path_is_used_verbatim() {
        assert_eq!(
            resolve_endpoint("https://splunk:8088/services/collector"),
            "https://splunk:8088/services/collector"
        );
        assert_eq!(
            resolve_endpoint("https://splunk:8088/services/collector/event"),
            "https://splunk:8088/services/collector/event"
        );
    }

    #[test]
    fn status_classification() {
        assert_eq!(DeliveryOutcome::from_status(200), DeliveryOutcome::Accepted);
        assert_eq!(
            DeliveryOutcome::from_status(400),
            DeliveryOutcome::RejectedPermanently(400)
        );
        assert_eq!(
            DeliveryOutcome::from_status(403),
            DeliveryOutcome::RejectedPermanently(403)
        );
        assert_eq!(
            DeliveryOutcome::from_status(405),
            DeliveryOutcome::RejectedPermanently(405)
        );
        assert!(matches!(
            DeliveryOutcome::from_status(503),
            DeliveryOutcome::RejectedTransiently(_)
        ));
        assert!(matches!(
            DeliveryOutcome::from_status(429),
            DeliveryOutcome::RejectedTransiently(_)
        ));
    }

    #[test]
    fn channel_is_stable_per_client() {
        let client = EventCollectorClient::new("https://splunk:8088", "token").unwrap();
        let channel = client.channel().to_string();
        assert_eq!(client.channel(), channel);

        let other = EventCollectorClient::new("https://splunk:8088", "token").unwrap();
        assert_ne!(other.channel(), channel);
    }

    #[test]
    fn supplied_channel_is_not_replaced() {
        let client =
            EventCollectorClient::with_channel("https://splunk:8088", "token", "chan-1".into())
                .unwrap();
        assert_eq!(client.channel(), "chan-1");
    }
}
