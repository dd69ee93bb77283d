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

// Durable store for the pending-event backlog, user identity and session
//
// Every operation is best-effort: backend failures are logged and swallowed
// so that losing durability degrades to in-memory operation instead of
// failing the caller.

use super::backend::{KeyValueBackend, StoreError};
use crate::clock::Clock;
use crate::event::Event;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

pub const PENDING_EVENTS_KEY: &str = "tracker_pending_events";
pub const USER_IDENTITY_KEY: &str = "tracker_user_identity";
pub const SESSION_DATA_KEY: &str = "tracker_session";
pub const SESSION_TOKEN_KEY: &str = "tracker_session_id";

/// Ceiling for the serialized backlog envelope
pub const MAX_STORAGE_BYTES: usize = 4 * 1024 * 1024;

/// Backlogs older than this are discarded instead of replayed
pub const RETENTION_WINDOW_MS: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedEnvelope {
    pub events: Vec<Event>,
    pub timestamp: i64,
}

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    events: &'a [Event],
    timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdentity {
    pub user_id: String,
    pub created_at: i64,
    pub visit_count: u32,
    pub last_seen_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub session_id: String,
    pub started_at: i64,
    pub last_activity_at: i64,
    pub page_views: u32,
}

pub struct DurableStore {
    backend: Arc<dyn KeyValueBackend>,
    clock: Arc<dyn Clock>,
    max_bytes: usize,
}

impl DurableStore {
    pub fn new(backend: Arc<dyn KeyValueBackend>, clock: Arc<dyn Clock>) -> Self {
        Self::with_max_bytes(backend, clock, MAX_STORAGE_BYTES)
    }

    pub fn with_max_bytes(
        backend: Arc<dyn KeyValueBackend>,
        clock: Arc<dyn Clock>,
        max_bytes: usize,
    ) -> Self {
        Self {
            backend,
            clock,
            max_bytes,
        }
    }

    pub fn backend_type(&self) -> &str {
        self.backend.backend_type()
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    // --- pending-event backlog ---

    /// Persist `events` as the backlog, dropping the oldest events until the
    /// envelope fits the byte ceiling (at least one event is always kept).
    /// Returns how many events were written; 0 when the write failed.
    pub fn save_events(&self, events: &[Event]) -> usize {
        match self.try_save_events(events) {
            Ok(kept) => kept,
            Err(e) => {
                warn!("Failed to persist {} pending events: {}", events.len(), e);
                0
            }
        }
    }

    fn try_save_events(&self, events: &[Event]) -> Result<usize, StoreError> {
        let timestamp = self.clock.now_ms();

        // The compact envelope is `{"events":[e1,e2,...],"timestamp":T}`, so
        // its length is the empty envelope plus each event plus separators.
        let overhead = serde_json::to_string(&EnvelopeRef {
            events: &[],
            timestamp,
        })?
        .len();
        let sizes = events
            .iter()
            .map(|event| serde_json::to_string(event).map(|s| s.len()))
            .collect::<Result<Vec<_>, _>>()?;

        let mut total = overhead + sizes.iter().sum::<usize>() + sizes.len().saturating_sub(1);
        let mut start = 0;
        while total > self.max_bytes && events.len() - start > 1 {
            total -= sizes[start] + 1;
            start += 1;
        }

        if start > 0 {
            warn!(
                "Pending backlog exceeds {} bytes, dropped {} oldest events",
                self.max_bytes, start
            );
        }

        let payload = serde_json::to_string(&EnvelopeRef {
            events: &events[start..],
            timestamp,
        })?;
        self.backend.set(PENDING_EVENTS_KEY, &payload)?;

        debug!(
            "Persisted {} pending events ({} bytes)",
            events.len() - start,
            payload.len()
        );
        Ok(events.len() - start)
    }

    /// Load the backlog. Unparseable or expired envelopes are deleted and
    /// read as empty.
    pub fn get_events(&self) -> Vec<Event> {
        let stored = match self.backend.get(PENDING_EVENTS_KEY) {
            Ok(Some(stored)) => stored,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!("Failed to read pending events: {}", e);
                return Vec::new();
            }
        };

        let envelope: PersistedEnvelope = match serde_json::from_str(&stored) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Discarding malformed pending-event envelope: {}", e);
                self.clear_events();
                return Vec::new();
            }
        };

        let age = self.clock.now_ms() - envelope.timestamp;
        if age > RETENTION_WINDOW_MS {
            warn!(
                "Discarding {} pending events persisted {} ms ago",
                envelope.events.len(),
                age
            );
            self.clear_events();
            return Vec::new();
        }

        envelope.events
    }

    pub fn clear_events(&self) {
        self.remove(PENDING_EVENTS_KEY);
    }

    // --- user identity ---

    pub fn get_user_identity(&self) -> Option<UserIdentity> {
        self.read_json(USER_IDENTITY_KEY)
    }

    pub fn set_user_identity(&self, identity: &UserIdentity) {
        self.write_json(USER_IDENTITY_KEY, identity);
    }

    /// Bump `visit_count` and refresh `last_seen_at`
    pub fn increment_visit_count(&self) -> Option<UserIdentity> {
        let mut identity = self.get_user_identity()?;
        identity.visit_count += 1;
        identity.last_seen_at = self.clock.now_ms();
        self.set_user_identity(&identity);
        Some(identity)
    }

    // --- session ---

    pub fn get_session_data(&self) -> Option<SessionRecord> {
        self.read_json(SESSION_DATA_KEY)
    }

    pub fn set_session_data(&self, session: &SessionRecord) {
        self.write_json(SESSION_DATA_KEY, session);
    }

    pub fn update_session_activity(&self) -> Option<SessionRecord> {
        let mut session = self.get_session_data()?;
        session.last_activity_at = self.clock.now_ms();
        self.set_session_data(&session);
        Some(session)
    }

    pub fn increment_page_views(&self) -> Option<SessionRecord> {
        let mut session = self.get_session_data()?;
        session.page_views += 1;
        session.last_activity_at = self.clock.now_ms();
        self.set_session_data(&session);
        Some(session)
    }

    /// True when there is no session or it has been idle longer than
    /// `timeout_ms`
    pub fn is_session_expired(&self, timeout_ms: i64) -> bool {
        match self.get_session_data() {
            Some(session) => self.clock.now_ms() - session.last_activity_at > timeout_ms,
            None => true,
        }
    }

    pub fn clear_session(&self) {
        self.remove(SESSION_DATA_KEY);
        self.remove(SESSION_TOKEN_KEY);
    }

    pub fn get_session_token(&self) -> Option<String> {
        match self.backend.get(SESSION_TOKEN_KEY) {
            Ok(token) => token,
            Err(e) => {
                warn!("Failed to read session token: {}", e);
                None
            }
        }
    }

    pub fn set_session_token(&self, session_id: &str) {
        if let Err(e) = self.backend.set(SESSION_TOKEN_KEY, session_id) {
            warn!("Failed to write session token: {}", e);
        }
    }

    fn read_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        let stored = match self.backend.get(key) {
            Ok(stored) => stored?,
            Err(e) => {
                warn!("Failed to read '{}': {}", key, e);
                return None;
            }
        };
        match serde_json::from_str(&stored) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Ignoring malformed record under '{}': {}", key, e);
                None
            }
        }
    }

    fn write_json<T: Serialize>(&self, key: &str, value: &T) {
        let result = serde_json::to_string(value)
            .map_err(StoreError::from)
            .and_then(|payload| self.backend.set(key, &payload));
        if let Err(e) = result {
            warn!("Failed to write '{}': {}", key, e);
        }
    }

    fn remove(&self, key: &str) {
        if let Err(e) = self.backend.remove(key) {
            warn!("Failed to remove '{}': {}", key, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::event::EventData;
    use crate::storage::MemoryBackend;
    use serde_json::json;

    fn store() -> (DurableStore, MemoryBackend, ManualClock) {
        let backend = MemoryBackend::new();
        let clock = ManualClock::new(1_000_000);
        let store = DurableStore::new(Arc::new(backend.clone()), Arc::new(clock.clone()));
        (store, backend, clock)
    }

    fn events(n: usize) -> Vec<Event> {
        (0..n)
            .map(|i| Event::new(EventData::custom("e", json!({ "i": i })), "s", "u", i as i64))
            .collect()
    }

    #[test]
    fn test_missing_records_read_as_absent() {
        let (store, _, _) = store();
        assert!(store.get_events().is_empty());
        assert!(store.get_user_identity().is_none());
        assert!(store.get_session_data().is_none());
        assert!(store.get_session_token().is_none());
        assert!(store.increment_visit_count().is_none());
        assert!(store.update_session_activity().is_none());
    }

    #[test]
    fn test_envelope_size_estimate_is_exact() {
        let (store, backend, _) = store();
        let evs = events(5);
        store.save_events(&evs);
        let raw = backend.raw(PENDING_EVENTS_KEY).unwrap();
        let expected = serde_json::to_string(&EnvelopeRef {
            events: &evs,
            timestamp: 1_000_000,
        })
        .unwrap();
        assert_eq!(raw, expected);
    }

    #[test]
    fn test_malformed_envelope_is_cleared() {
        let (store, backend, _) = store();
        backend.set(PENDING_EVENTS_KEY, "{not json").unwrap();
        assert!(store.get_events().is_empty());
        assert!(backend.raw(PENDING_EVENTS_KEY).is_none());
    }

    #[test]
    fn test_session_token_round_trip() {
        let (store, _, _) = store();
        store.set_session_token("abc");
        assert_eq!(store.get_session_token().as_deref(), Some("abc"));
        store.clear_session();
        assert!(store.get_session_token().is_none());
    }
}
