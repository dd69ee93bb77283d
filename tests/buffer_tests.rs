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

use page_tracker::{EventData, EventQueue, CHECKPOINT_EVENT_TYPE};
use serde_json::json;

fn checkpoint() -> EventData {
    EventData::ReplayCheckpoint(json!({"type": 2, "data": {"node": {}}}))
}

fn replay(n: i64) -> EventData {
    EventData::Replay(json!({"type": 3, "seq": n}))
}

#[test]
fn test_length_never_exceeds_capacity() {
    let mut queue = EventQueue::new(5, "s".to_string(), "u".to_string());

    for i in 0..50 {
        queue.append(replay(i), i);
        assert!(queue.len() <= queue.capacity());
    }

    assert_eq!(queue.len(), 5);
    assert_eq!(queue.stats(), (50, 45));

    // The newest events survive
    let seqs: Vec<i64> = queue.snapshot().iter().map(|e| e.timestamp).collect();
    assert_eq!(seqs, vec![45, 46, 47, 48, 49]);
}

#[test]
fn test_checkpoint_survives_while_other_events_exist() {
    let mut queue = EventQueue::new(3, "s".to_string(), "u".to_string());
    queue.append(checkpoint(), 0);

    for i in 1..20 {
        queue.append(replay(i), i);
        let events = queue.snapshot();
        assert_eq!(events[0].event_type(), CHECKPOINT_EVENT_TYPE);
        assert!(events.len() <= 3);
    }

    let types: Vec<String> = queue
        .snapshot()
        .iter()
        .map(|e| e.event_type().to_string())
        .collect();
    assert_eq!(types, vec![CHECKPOINT_EVENT_TYPE, "rrweb", "rrweb"]);
}

#[test]
fn test_all_checkpoints_evicts_head() {
    let mut queue = EventQueue::new(2, "s".to_string(), "u".to_string());
    queue.append(checkpoint(), 1);
    queue.append(checkpoint(), 2);
    queue.append(checkpoint(), 3);

    let timestamps: Vec<i64> = queue.snapshot().iter().map(|e| e.timestamp).collect();
    assert_eq!(timestamps, vec![2, 3]);
}

#[test]
fn test_prepend_keeps_recovered_events_ahead_in_order() {
    let mut source = EventQueue::new(10, "old".to_string(), "u".to_string());
    source.append(EventData::custom("a", json!({})), 1);
    source.append(EventData::custom("b", json!({})), 2);
    let recovered = source.drain();
    let recovered_ids: Vec<String> = recovered.iter().map(|e| e.id.clone()).collect();

    let mut queue = EventQueue::new(10, "new".to_string(), "u".to_string());
    queue.append(EventData::custom("c", json!({})), 3);
    queue.prepend_raw(recovered);

    let events = queue.snapshot();
    assert_eq!(events.len(), 3);
    assert_eq!(events[0].id, recovered_ids[0]);
    assert_eq!(events[1].id, recovered_ids[1]);
    assert_eq!(events[2].event_type(), "c");

    // Recovered events keep the session they were captured in
    assert_eq!(events[0].session_id, "old");
    assert_eq!(events[2].session_id, "new");
}

#[test]
fn test_prepend_enforces_capacity() {
    let mut source = EventQueue::new(10, "s".to_string(), "u".to_string());
    for i in 0..6 {
        source.append(replay(i), i);
    }

    let mut queue = EventQueue::new(4, "s".to_string(), "u".to_string());
    queue.append(checkpoint(), 100);
    queue.prepend_raw(source.drain());

    assert_eq!(queue.len(), 4);
    let events = queue.snapshot();
    assert!(events.iter().any(|e| e.is_checkpoint()));
    assert_eq!(events.last().unwrap().timestamp, 100);
}

#[test]
fn test_drain_empties_and_snapshot_does_not() {
    let mut queue = EventQueue::new(10, "s".to_string(), "u".to_string());
    queue.append(replay(1), 1);
    queue.append(replay(2), 2);

    assert_eq!(queue.snapshot().len(), 2);
    assert_eq!(queue.len(), 2);

    let drained = queue.drain();
    assert_eq!(drained.len(), 2);
    assert!(queue.is_empty());
    assert!(queue.drain().is_empty());
}

#[test]
fn test_rebind_applies_to_later_events_only() {
    let mut queue = EventQueue::new(10, "s1".to_string(), "u1".to_string());
    queue.append(replay(1), 1);
    queue.rebind("s2", "u1");
    queue.append(replay(2), 2);

    let events = queue.snapshot();
    assert_eq!(events[0].session_id, "s1");
    assert_eq!(events[1].session_id, "s2");
    assert_eq!(queue.session_id(), "s2");
}

#[test]
fn test_zero_capacity_is_clamped() {
    let mut queue = EventQueue::new(0, "s".to_string(), "u".to_string());
    queue.append(replay(1), 1);
    assert_eq!(queue.capacity(), 1);
    assert_eq!(queue.len(), 1);
}
