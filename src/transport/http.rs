// Copyright 2025 coScene
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// HTTP transport posting JSON batches to the collector endpoint

use super::{Transport, TransportError};
use crate::config::TransportConfig;
use crate::protocol::DeliveryPayload;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

pub struct HttpTransport {
    client: Client,
    endpoint: String,
    beacon_max_bytes: usize,
}

impl HttpTransport {
    pub fn new(endpoint: String, config: &TransportConfig) -> Result<Self> {
        reqwest::Url::parse(&endpoint)
            .with_context(|| format!("Endpoint '{}' is not an absolute URL", endpoint))?;

        let client = reqwest::ClientBuilder::new()
            .pool_max_idle_per_host(2)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            endpoint,
            beacon_max_bytes: config.beacon_max_bytes,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post(client: &Client, endpoint: &str, body: Vec<u8>) -> Result<(), TransportError> {
        let response = client
            .post(endpoint)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status { status, body });
        }

        Ok(())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, payload: &DeliveryPayload) -> Result<(), TransportError> {
        let body = payload.to_body()?;
        debug!(
            "Posting {} events ({} bytes) to {}",
            payload.events.len(),
            body.len(),
            self.endpoint
        );
        Self::post(&self.client, &self.endpoint, body).await
    }

    fn send_reliable(&self, payload: &DeliveryPayload) -> bool {
        let body = match payload.to_body() {
            Ok(body) => body,
            Err(e) => {
                warn!("Failed to encode unload payload: {}", e);
                return false;
            }
        };

        if body.len() > self.beacon_max_bytes {
            debug!(
                "Unload payload of {} bytes exceeds the {} byte limit",
                body.len(),
                self.beacon_max_bytes
            );
            return false;
        }

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!("No async runtime available for unload delivery");
                return false;
            }
        };

        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        let count = payload.events.len();
        handle.spawn(async move {
            match Self::post(&client, &endpoint, body).await {
                Ok(()) => debug!("Unload delivery of {} events completed", count),
                Err(e) => warn!("Unload delivery of {} events failed: {}", count, e),
            }
        });

        true
    }

    fn transport_type(&self) -> &str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Event, EventData};
    use serde_json::json;

    fn payload(events: usize, size: usize) -> DeliveryPayload {
        DeliveryPayload {
            api_key: "k".to_string(),
            session_id: "s".to_string(),
            user_id: "u".to_string(),
            events: (0..events)
                .map(|_| Event::new(EventData::custom("blob", json!("x".repeat(size))), "s", "u", 0))
                .collect(),
        }
    }

    fn transport(beacon_max_bytes: usize) -> HttpTransport {
        let config = TransportConfig {
            timeout_seconds: 1,
            beacon_max_bytes,
        };
        // Port 9 (discard) on localhost is not expected to accept HTTP
        HttpTransport::new("http://127.0.0.1:9/events".to_string(), &config).unwrap()
    }

    #[test]
    fn test_relative_endpoint_is_refused() {
        assert!(HttpTransport::new("/events".to_string(), &TransportConfig::default()).is_err());
    }

    #[test]
    fn test_reliable_send_without_runtime_is_rejected() {
        assert!(!transport(64 * 1024).send_reliable(&payload(1, 10)));
    }

    #[tokio::test]
    async fn test_reliable_send_rejects_oversized_payload() {
        assert!(!transport(1024).send_reliable(&payload(4, 1024)));
    }

    #[tokio::test]
    async fn test_reliable_send_accepts_within_limit() {
        assert!(transport(64 * 1024).send_reliable(&payload(2, 10)));
    }

    #[tokio::test]
    async fn test_send_to_unreachable_endpoint_fails() {
        let result = transport(64 * 1024).send(&payload(1, 10)).await;
        assert!(matches!(result, Err(TransportError::Network(_))));
    }
}
