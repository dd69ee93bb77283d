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

use async_trait::async_trait;
use page_tracker::event::SensorKind;
use page_tracker::storage::{DurableStore, MemoryBackend};
use page_tracker::transport::TransportError;
use page_tracker::{
    Agent, Collector, CollectorSet, DeliveryPayload, EventData, EventSink, FlushOutcome,
    ManualClock, MemoryTransport, OneShotCollector, PageContext, PageSignal, Tracker,
    TrackerConfig, TrackerService, TrackerState, Transport, UnloadOutcome,
};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn config(flush_interval_ms: u64) -> TrackerConfig {
    let mut config = TrackerConfig::default();
    config.tracker.api_key = "test-key".to_string();
    config.tracker.flush_interval_ms = flush_interval_ms;
    config.collectors.time_on_page = false;
    config.collectors.visibility = false;
    config
}

const START_MS: i64 = 1_700_000_000_000;

fn tracker(config: &TrackerConfig, transport: &MemoryTransport) -> Tracker {
    Tracker::new(
        config,
        Arc::new(MemoryBackend::new()),
        Arc::new(transport.clone()),
        Arc::new(ManualClock::new(START_MS)),
    )
}

/// Transport whose ordinary send never completes and whose unload channel
/// rejects everything
struct StalledTransport;

#[async_trait]
impl Transport for StalledTransport {
    async fn send(&self, _payload: &DeliveryPayload) -> Result<(), TransportError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }

    fn send_reliable(&self, _payload: &DeliveryPayload) -> bool {
        false
    }

    fn transport_type(&self) -> &str {
        "stalled"
    }
}

/// Streaming collector that emits one reading on start and keeps its sink
struct DeviceCollector {
    name: &'static str,
    started: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
    sink: Arc<Mutex<Option<EventSink>>>,
}

impl DeviceCollector {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            started: Arc::new(AtomicBool::new(false)),
            stopped: Arc::new(AtomicBool::new(false)),
            sink: Arc::new(Mutex::new(None)),
        }
    }
}

impl Collector for DeviceCollector {
    fn name(&self) -> &str {
        self.name
    }

    fn start(&mut self, sink: EventSink) {
        self.started.store(true, Ordering::SeqCst);
        sink.emit(EventData::Sensor {
            kind: SensorKind::Device,
            payload: json!({"screen": "1920x1080"}),
        });
        *self.sink.lock().unwrap() = Some(sink);
    }

    fn stop(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

struct BatteryReading {
    level: Option<f64>,
}

#[async_trait]
impl OneShotCollector for BatteryReading {
    fn name(&self) -> &str {
        "battery"
    }

    async fn collect(&self) -> Option<EventData> {
        let level = self.level?;
        Some(EventData::Sensor {
            kind: SensorKind::Battery,
            payload: json!({ "level": level }),
        })
    }
}

#[tokio::test]
async fn test_track_and_explicit_flush() {
    let transport = MemoryTransport::new();
    let config = config(60_000);
    let handle = TrackerService::spawn(
        tracker(&config, &transport),
        PageContext::default(),
        CollectorSet::new(),
    );

    assert!(handle.track("signup", json!({"plan": "pro"})));
    assert!(handle.identify("customer-42", Some(json!({"tier": "gold"}))));
    assert_eq!(handle.flush().await, Some(FlushOutcome::Delivered(5)));

    let types: Vec<String> = transport
        .delivered_events()
        .iter()
        .map(|e| e.event_type().to_string())
        .collect();
    assert_eq!(
        types,
        vec!["pageview", "user_identified", "session_started", "signup", "identify"]
    );

    handle.destroy().await;
}

#[tokio::test]
async fn test_periodic_flush_runs_on_interval() {
    let transport = MemoryTransport::new();
    let config = config(20);
    let handle = TrackerService::spawn(
        tracker(&config, &transport),
        PageContext::default(),
        CollectorSet::new(),
    );

    for _ in 0..50 {
        if transport.delivery_count() > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(transport.delivery_count() > 0);
    assert_eq!(handle.status().await.unwrap().queued_events, 0);

    handle.destroy().await;
}

#[tokio::test]
async fn test_collectors_respect_enable_flags_and_stop_on_destroy() {
    let transport = MemoryTransport::new();
    let config = config(60_000);

    let device = DeviceCollector::new("device");
    let location = DeviceCollector::new("location");
    let (device_started, device_stopped) = (device.started.clone(), device.stopped.clone());
    let device_sink = device.sink.clone();
    let location_started = location.started.clone();

    let collectors = CollectorSet::new()
        .with_collector(Box::new(device))
        .with_collector(Box::new(location))
        .with_one_shot(Arc::new(BatteryReading { level: Some(0.8) }))
        .with_one_shot(Arc::new(BatteryReading { level: None }));

    let handle = TrackerService::spawn(
        tracker(&config, &transport),
        PageContext::default(),
        collectors,
    );

    assert!(device_started.load(Ordering::SeqCst));
    assert!(!location_started.load(Ordering::SeqCst));

    // Let the one-shot readings resolve
    for _ in 0..50 {
        if handle.status().await.unwrap().queued_events >= 5 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(handle.destroy().await, Some(FlushOutcome::Delivered(5)));
    assert!(device_stopped.load(Ordering::SeqCst));

    let delivered = transport.delivered_events();
    assert!(delivered.iter().any(|e| e.event_type() == "device"));
    assert!(delivered.iter().any(|e| e.event_type() == "battery"));

    // Emitting after teardown is a silent no-op
    let sink = device_sink.lock().unwrap().take().unwrap();
    assert!(!sink.is_live());
    assert!(!sink.emit(EventData::custom("late", json!({}))));
}

#[tokio::test]
async fn test_unload_signal_through_handle() {
    let transport = MemoryTransport::new();
    let config = config(60_000);
    let handle = TrackerService::spawn(
        tracker(&config, &transport),
        PageContext::default(),
        CollectorSet::new(),
    );

    assert_eq!(
        handle.signal(PageSignal::BeforeUnload).await,
        Some(UnloadOutcome::Delivered(3))
    );
    let status = handle.status().await.unwrap();
    assert_eq!(status.state, TrackerState::Terminating);
    assert_eq!(status.queued_events, 0);

    assert!(handle.notify(PageSignal::PageShow));
    assert_eq!(handle.status().await.unwrap().state, TrackerState::Running);

    assert_eq!(handle.destroy().await, Some(FlushOutcome::Empty));
}

#[tokio::test]
async fn test_agent_reinit_destroys_previous_instance() {
    let first_transport = MemoryTransport::new();
    let second_transport = MemoryTransport::new();
    let config = config(60_000);
    let mut agent = Agent::new();

    let first = agent
        .init(
            tracker(&config, &first_transport),
            PageContext::default(),
            CollectorSet::new(),
        )
        .await;
    first.track("before", json!({}));
    let sink = first.sink();

    agent
        .init(
            tracker(&config, &second_transport),
            PageContext::default(),
            CollectorSet::new(),
        )
        .await;

    // First instance flushed on teardown and no longer accepts events
    assert_eq!(first_transport.delivered_events().len(), 4);
    assert!(!sink.emit(EventData::custom("late", json!({}))));

    let status = agent.instance().unwrap().status().await.unwrap();
    assert_eq!(status.state, TrackerState::Running);
    assert_eq!(status.queued_events, 3);

    assert_eq!(agent.destroy().await, Some(FlushOutcome::Delivered(3)));
    assert!(agent.instance().is_none());
    assert_eq!(agent.destroy().await, None);
}

#[tokio::test]
async fn test_unload_is_served_while_a_send_is_pending() {
    let config = config(20);
    let backend = MemoryBackend::new();
    let tracker = Tracker::new(
        &config,
        Arc::new(backend.clone()),
        Arc::new(StalledTransport),
        Arc::new(ManualClock::new(START_MS)),
    );
    let handle = TrackerService::spawn(tracker, PageContext::default(), CollectorSet::new());

    // First periodic flush takes the activation events and never returns
    for _ in 0..100 {
        if handle.status().await.unwrap().queued_events == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(handle.status().await.unwrap().queued_events, 0);

    assert!(handle.track("after_drain", json!({})));
    let outcome = tokio::time::timeout(
        Duration::from_secs(2),
        handle.signal(PageSignal::BeforeUnload),
    )
    .await
    .expect("unload signal waited behind the pending send");
    assert_eq!(outcome, Some(UnloadOutcome::Persisted(4)));

    let store = DurableStore::new(Arc::new(backend), Arc::new(ManualClock::new(START_MS)));
    let persisted: Vec<String> = store
        .get_events()
        .iter()
        .map(|e| e.event_type().to_string())
        .collect();
    assert_eq!(
        persisted,
        vec!["pageview", "user_identified", "session_started", "after_drain"]
    );
}

#[tokio::test]
async fn test_events_emitted_during_shutdown_are_delivered() {
    let transport = MemoryTransport::new();
    let config = config(60_000);
    let handle = TrackerService::spawn(
        tracker(&config, &transport),
        PageContext::default(),
        CollectorSet::new(),
    );
    let sink = handle.sink();

    let (outcome, accepted) = tokio::join!(handle.destroy(), async {
        sink.emit(EventData::custom("late", json!({})))
    });

    assert!(accepted);
    assert_eq!(outcome, Some(FlushOutcome::Delivered(4)));
    assert_eq!(
        transport.delivered_events().last().unwrap().event_type(),
        "late"
    );
    assert!(!sink.emit(EventData::custom("later", json!({}))));
}
