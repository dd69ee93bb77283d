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

use std::collections::VecDeque;
use tracing::{debug, warn};

use crate::event::{Event, EventData};

/// Bounded, insertion-ordered buffer of captured events
///
/// Every mutating method is synchronous and runs to completion, so a drain
/// can never observe a half-applied append.
pub struct EventQueue {
    events: VecDeque<Event>,
    max_size: usize,
    session_id: String,
    user_id: String,

    // Statistics
    total_appended: u64,
    total_evicted: u64,
}

impl EventQueue {
    pub fn new(max_size: usize, session_id: String, user_id: String) -> Self {
        Self {
            events: VecDeque::new(),
            max_size: max_size.max(1),
            session_id,
            user_id,
            total_appended: 0,
            total_evicted: 0,
        }
    }

    /// Bind subsequently appended events to a different session/user
    pub fn rebind(&mut self, session_id: &str, user_id: &str) {
        self.session_id = session_id.to_string();
        self.user_id = user_id.to_string();
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Build an event bound to the current session and push it to the tail
    pub fn append(&mut self, data: EventData, timestamp: i64) {
        let event = Event::new(data, &self.session_id, &self.user_id, timestamp);
        self.events.push_back(event);
        self.total_appended += 1;
        self.enforce_capacity();
    }

    /// Reinsert previously persisted events ahead of everything queued,
    /// keeping their relative order
    pub fn prepend_raw(&mut self, events: Vec<Event>) {
        if events.is_empty() {
            return;
        }
        debug!("Prepending {} recovered events", events.len());
        for event in events.into_iter().rev() {
            self.events.push_front(event);
        }
        self.enforce_capacity();
    }

    /// Take every queued event, leaving the queue empty
    pub fn drain(&mut self) -> Vec<Event> {
        self.events.drain(..).collect()
    }

    /// Copy of the queued events; the queue is left untouched
    pub fn snapshot(&self) -> Vec<Event> {
        self.events.iter().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_size
    }

    /// Get statistics: (appended, evicted)
    pub fn stats(&self) -> (u64, u64) {
        (self.total_appended, self.total_evicted)
    }

    fn enforce_capacity(&mut self) {
        while self.events.len() > self.max_size {
            self.evict_one();
        }
    }

    /// Drop the oldest non-checkpoint event, or the head if every queued
    /// event is a checkpoint
    fn evict_one(&mut self) {
        let victim = self
            .events
            .iter()
            .position(|event| !event.is_checkpoint())
            .unwrap_or(0);

        if let Some(evicted) = self.events.remove(victim) {
            self.total_evicted += 1;
            warn!(
                "Event queue over capacity ({}), evicted '{}' event {}",
                self.max_size,
                evicted.event_type(),
                evicted.id
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn queue(max: usize) -> EventQueue {
        EventQueue::new(max, "sess".to_string(), "user".to_string())
    }

    #[test]
    fn test_append_binds_session_and_user() {
        let mut q = queue(10);
        q.append(EventData::custom("click", json!({})), 5);
        let event = q.snapshot().remove(0);
        assert_eq!(event.session_id, "sess");
        assert_eq!(event.user_id, "user");
        assert_eq!(event.timestamp, 5);

        q.rebind("sess-2", "user");
        q.append(EventData::custom("click", json!({})), 6);
        let event = q.snapshot().remove(1);
        assert_eq!(event.session_id, "sess-2");
    }

    #[test]
    fn test_drain_empties_queue() {
        let mut q = queue(10);
        q.append(EventData::custom("a", json!(1)), 1);
        q.append(EventData::custom("b", json!(2)), 2);
        let drained = q.drain();
        assert_eq!(drained.len(), 2);
        assert!(q.is_empty());
        assert!(q.drain().is_empty());
    }

    #[test]
    fn test_snapshot_keeps_events() {
        let mut q = queue(10);
        q.append(EventData::custom("a", json!(1)), 1);
        assert_eq!(q.snapshot().len(), 1);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_eviction_skips_checkpoint_at_head() {
        let mut q = queue(2);
        q.append(EventData::ReplayCheckpoint(json!({"full": true})), 1);
        q.append(EventData::custom("a", json!(1)), 2);
        q.append(EventData::custom("b", json!(2)), 3);

        let types: Vec<String> = q.snapshot().iter().map(|e| e.event_type().to_string()).collect();
        assert_eq!(types, vec!["rrweb_checkout", "b"]);
        assert_eq!(q.stats(), (3, 1));
    }

    #[test]
    fn test_eviction_all_checkpoints_drops_head() {
        let mut q = queue(2);
        for ts in 1..=3 {
            q.append(EventData::ReplayCheckpoint(json!({"n": ts})), ts);
        }
        let stamps: Vec<i64> = q.snapshot().iter().map(|e| e.timestamp).collect();
        assert_eq!(stamps, vec![2, 3]);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut q = queue(0);
        q.append(EventData::custom("a", json!(1)), 1);
        assert_eq!(q.len(), 1);
        assert_eq!(q.capacity(), 1);
    }
}
