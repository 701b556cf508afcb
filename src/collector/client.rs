/**
 * ============================================================================
 * COLLECTOR HTTP CLIENT MODULE
 * ============================================================================
 *
 * PURPOSE: Talk to the collector's JSON API
 *
 * PROTOCOL:
 * - POST /api/events               body {"events": [...]}, success is HTTP 200
 * - GET  /api/blocked_sites?hostname=<h>   response {"blocked": [...]}
 * Both carry "Authorization: Bearer <auth_key>". 401/403 mean a bad key.
 *
 * The sender and the reconciler only see the EventTransport and
 * BlockListSource traits, so tests can swap in scripted collectors.
 *
 * ============================================================================
 */

use crate::collector::types::{DeliveryError, EventsPayload};
use crate::events::Event;
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;

/// Anything that can carry a batch of events to the collector.
#[async_trait]
pub trait EventTransport: Send + Sync {
    async fn send_events(&self, events: &[Event]) -> Result<(), DeliveryError>;

    /// Human-readable destination for logs and status.
    fn endpoint(&self) -> String;
}

/// Anything that can report the block-list for a host.
#[async_trait]
pub trait BlockListSource: Send + Sync {
    async fn fetch_block_list(&self, hostname: &str) -> Result<Vec<String>, DeliveryError>;
}

/**
 * HTTP client for the collector
 * One reqwest::Client is shared by event delivery and block-list polling
 */
pub struct CollectorClient {
    http: reqwest::Client,
    base_url: String,
    auth_key: String,
    events_timeout: Duration,
    blocklist_timeout: Duration,
}

impl CollectorClient {
    /**
     * Create a client for base_url (scheme://host:port, no trailing path)
     */
    pub fn new(
        base_url: impl Into<String>,
        auth_key: impl Into<String>,
        events_timeout: Duration,
        blocklist_timeout: Duration,
    ) -> Result<Self, DeliveryError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("spiego-agent/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        let auth_key = auth_key.into();
        log::info!(
            "Collector client for {} (auth key length: {})",
            base_url,
            auth_key.len()
        );

        Ok(Self {
            http,
            base_url,
            auth_key,
            events_timeout,
            blocklist_timeout,
        })
    }

    pub fn events_url(&self) -> String {
        format!("{}/api/events", self.base_url)
    }

    pub fn blocked_sites_url(&self) -> String {
        format!("{}/api/blocked_sites", self.base_url)
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.auth_key)
    }
}

#[async_trait]
impl EventTransport for CollectorClient {
    async fn send_events(&self, events: &[Event]) -> Result<(), DeliveryError> {
        let response = self
            .http
            .post(self.events_url())
            .header("Authorization", self.bearer())
            .timeout(self.events_timeout)
            .json(&EventsPayload { events })
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::OK {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        log::debug!("Collector answered {}: {}", status, truncate(&body, 200));
        Err(DeliveryError::from_status(status.as_u16()))
    }

    fn endpoint(&self) -> String {
        self.events_url()
    }
}

#[async_trait]
impl BlockListSource for CollectorClient {
    async fn fetch_block_list(&self, hostname: &str) -> Result<Vec<String>, DeliveryError> {
        let response = self
            .http
            .get(self.blocked_sites_url())
            .query(&[("hostname", hostname)])
            .header("Authorization", self.bearer())
            .timeout(self.blocklist_timeout)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(DeliveryError::from_status(status.as_u16()));
        }

        let body = response.text().await?;
        parse_block_list(&body)
    }
}

/**
 * Extract the domain list from a block-list response body
 * Non-string entries are skipped; anything else malformed is an error
 */
pub fn parse_block_list(body: &str) -> Result<Vec<String>, DeliveryError> {
    let value: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| DeliveryError::Malformed(format!("invalid JSON: {}", e)))?;

    let blocked = value
        .get("blocked")
        .and_then(|b| b.as_array())
        .ok_or_else(|| DeliveryError::Malformed("missing 'blocked' array".to_string()))?;

    Ok(blocked
        .iter()
        .filter_map(|entry| entry.as_str().map(str::to_string))
        .collect())
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use chrono::Utc;

    fn client_for(server: &mockito::ServerGuard) -> CollectorClient {
        CollectorClient::new(
            server.url(),
            "test-key",
            Duration::from_secs(5),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn sample_events() -> Vec<Event> {
        vec![Event::new(
            Utc::now(),
            "desk-01",
            EventKind::AfkStart { idle_seconds: 21 },
        )]
    }

    #[test]
    fn test_parse_block_list() {
        let domains = parse_block_list(r#"{"blocked": ["a.com", 3, "b.org"]}"#).unwrap();
        assert_eq!(domains, vec!["a.com".to_string(), "b.org".to_string()]);

        assert!(parse_block_list("<html>").is_err());
        assert!(parse_block_list(r#"{"sites": []}"#).is_err());
        assert!(parse_block_list(r#"["a.com"]"#).is_err());
    }

    #[tokio::test]
    async fn test_send_events_posts_bearer_json() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/events")
            .match_header("authorization", "Bearer test-key")
            .match_header("content-type", "application/json")
            .match_body(mockito::Matcher::Regex(r#""type":"afk_start""#.to_string()))
            .with_status(200)
            .with_body(r#"{"status":"success","received":1}"#)
            .create_async()
            .await;

        let client = client_for(&server);
        client.send_events(&sample_events()).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_send_events_classifies_statuses() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/events")
            .with_status(401)
            .create_async()
            .await;

        let client = client_for(&server);
        let err = client.send_events(&sample_events()).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Unauthorized { code: 401 }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_non_200_success_is_still_failure() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/events")
            .with_status(202)
            .create_async()
            .await;

        let client = client_for(&server);
        let err = client.send_events(&sample_events()).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Status { code: 202 }));
    }

    #[tokio::test]
    async fn test_fetch_block_list_sends_hostname() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/blocked_sites")
            .match_query(mockito::Matcher::UrlEncoded(
                "hostname".to_string(),
                "desk 01".to_string(),
            ))
            .match_header("authorization", "Bearer test-key")
            .with_status(200)
            .with_body(r#"{"blocked": ["example.com"]}"#)
            .create_async()
            .await;

        let client = client_for(&server);
        let domains = client.fetch_block_list("desk 01").await.unwrap();
        assert_eq!(domains, vec!["example.com".to_string()]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_unreachable_collector_is_transport_error() {
        // Port 9 (discard) on localhost is almost never listening
        let client = CollectorClient::new(
            "http://127.0.0.1:9",
            "k",
            Duration::from_secs(2),
            Duration::from_secs(2),
        )
        .unwrap();
        let err = client.send_events(&sample_events()).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Transport(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("hi", 10), "hi");
    }
}
