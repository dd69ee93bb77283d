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

// In-memory transport that records deliveries instead of sending them.
// Clones share the same record and failure switches.

use super::{Transport, TransportError};
use crate::event::Event;
use crate::protocol::DeliveryPayload;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryChannel {
    Send,
    Reliable,
}

#[derive(Clone, Default)]
pub struct MemoryTransport {
    delivered: Arc<Mutex<Vec<(DeliveryChannel, DeliveryPayload)>>>,
    fail_sends: Arc<AtomicBool>,
    reject_reliable: Arc<AtomicBool>,
    log_deliveries: bool,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport that logs each accepted batch at info level
    pub fn logging() -> Self {
        Self {
            log_deliveries: true,
            ..Self::default()
        }
    }

    /// Make ordinary sends fail with a 503
    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Make the unload channel reject every payload
    pub fn set_reject_reliable(&self, reject: bool) {
        self.reject_reliable.store(reject, Ordering::SeqCst);
    }

    pub fn deliveries(&self) -> Vec<(DeliveryChannel, DeliveryPayload)> {
        self.lock().clone()
    }

    /// Every delivered event, in delivery order
    pub fn delivered_events(&self) -> Vec<Event> {
        self.lock()
            .iter()
            .flat_map(|(_, payload)| payload.events.iter().cloned())
            .collect()
    }

    pub fn delivery_count(&self) -> usize {
        self.lock().len()
    }

    fn record(&self, channel: DeliveryChannel, payload: &DeliveryPayload) {
        if self.log_deliveries {
            info!(
                "Delivered {} events via {:?} for session {}",
                payload.events.len(),
                channel,
                payload.session_id
            );
        }
        self.lock().push((channel, payload.clone()));
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(DeliveryChannel, DeliveryPayload)>> {
        // A panicking test thread must not hide what was delivered
        self.delivered
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, payload: &DeliveryPayload) -> Result<(), TransportError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Status {
                status: 503,
                body: "collector unavailable".to_string(),
            });
        }
        self.record(DeliveryChannel::Send, payload);
        Ok(())
    }

    fn send_reliable(&self, payload: &DeliveryPayload) -> bool {
        if self.reject_reliable.load(Ordering::SeqCst) {
            return false;
        }
        self.record(DeliveryChannel::Reliable, payload);
        true
    }

    fn transport_type(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> DeliveryPayload {
        DeliveryPayload {
            api_key: "k".to_string(),
            session_id: "s".to_string(),
            user_id: "u".to_string(),
            events: vec![],
        }
    }

    #[tokio::test]
    async fn test_records_and_fails_on_demand() {
        let transport = MemoryTransport::new();
        transport.send(&payload()).await.unwrap();
        assert!(transport.send_reliable(&payload()));

        transport.set_fail_sends(true);
        transport.set_reject_reliable(true);
        assert!(transport.send(&payload()).await.is_err());
        assert!(!transport.send_reliable(&payload()));

        let channels: Vec<DeliveryChannel> =
            transport.deliveries().into_iter().map(|(c, _)| c).collect();
        assert_eq!(channels, vec![DeliveryChannel::Send, DeliveryChannel::Reliable]);
    }
}
