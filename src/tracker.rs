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

// Delivery controller
//
// Owns the event queue, the durable store and the session manager, and
// reconciles periodic flush, unload-time reliable delivery and startup
// recovery. Every method takes `&mut self` and runs to completion. A flush
// is split in two: `begin_flush` drains the queue into the in-flight batch
// and `complete_flush` applies the transport result, so the owner can keep
// serving unload signals while the send is pending.
//
// Backlog invariant: every persisted event is also queued or in flight.
// Recovery leaves the backlog in place, a failed flush re-queues its batch,
// and a confirmed delivery only removes backlog entries that are no longer
// queued.

use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::buffer::EventQueue;
use crate::clock::Clock;
use crate::collectors::TimeOnPage;
use crate::config::{CollectorToggles, TrackerConfig, TrackerSettings};
use crate::event::{
    Event, EventData, IdentifyData, PageviewData, SessionStartedData, UserIdentifiedData,
    VisibilityChange, VisibilityData,
};
use crate::protocol::DeliveryPayload;
use crate::session::{ActivityOutcome, SessionManager};
use crate::storage::{DurableStore, KeyValueBackend, UserIdentity};
use crate::transport::{Transport, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    Idle,
    Running,
    Terminating,
}

/// Interaction signals that count as session activity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionKind {
    Click,
    KeyDown,
    Scroll,
    TouchStart,
}

/// Page lifecycle and interaction signals delivered by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSignal {
    Hidden,
    Visible,
    Focus,
    Blur,
    BeforeUnload,
    PageHide,
    /// Page restored from the back/forward cache
    PageShow,
    Interaction(InteractionKind),
}

/// Page the tracker is activated on, reported in the `pageview` event
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageContext {
    pub url: String,
    pub referrer: String,
    pub title: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Not running; nothing attempted
    Skipped,
    Empty,
    Delivered(usize),
    /// Delivery failed; the batch was persisted and re-queued
    Persisted(usize),
    /// The batch was handed to the unload transport while the send was
    /// pending; its result no longer matters
    Superseded,
}

/// First half of a flush
#[derive(Debug)]
pub enum FlushStart {
    /// Batch drained and marked in flight; send it, then `complete_flush`
    Ready(DeliveryPayload),
    Done(FlushOutcome),
}

impl FlushStart {
    pub fn is_ready(&self) -> bool {
        matches!(self, FlushStart::Ready(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnloadOutcome {
    Empty,
    /// Accepted by the reliable transport; queue and backlog cleared
    Delivered(usize),
    /// Rejected; the queue snapshot was persisted for the next activation
    Persisted(usize),
}

pub struct Tracker {
    settings: TrackerSettings,
    collectors: CollectorToggles,
    state: TrackerState,
    queue: EventQueue,
    store: DurableStore,
    sessions: SessionManager,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    identity: Option<UserIdentity>,
    visit_count: u32,
    time_on_page: Option<TimeOnPage>,
    in_flight: Option<Vec<Event>>,
}

impl Tracker {
    pub fn new(
        config: &TrackerConfig,
        backend: Arc<dyn KeyValueBackend>,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let settings = config.tracker.clone();
        let sessions = SessionManager::new(
            settings.session_timeout_ms(),
            settings.activity_throttle_ms as i64,
        );

        Self {
            queue: EventQueue::new(settings.max_queue_size, String::new(), String::new()),
            store: DurableStore::new(backend, clock.clone()),
            collectors: config.collectors.clone(),
            state: TrackerState::Idle,
            sessions,
            transport,
            clock,
            identity: None,
            visit_count: 0,
            time_on_page: None,
            in_flight: None,
            settings,
        }
    }

    /// Recover the persisted backlog, resolve identity and session, and emit
    /// the activation events. Activating twice is a no-op.
    pub fn activate(&mut self, page: PageContext) {
        if self.state != TrackerState::Idle {
            warn!("Tracker already activated");
            return;
        }

        let recovered = self.store.get_events();
        if !recovered.is_empty() {
            info!("Recovering {} events from storage", recovered.len());
            self.queue.prepend_raw(recovered);
        }

        let identity = self.sessions.resolve_identity(&self.store);
        let session = self.sessions.resolve_session(&self.store, &identity);
        self.queue
            .rebind(&session.session.session_id, &identity.identity.user_id);
        self.visit_count = session.visit_count;

        let now = self.clock.now_ms();
        self.queue.append(
            EventData::Pageview(PageviewData {
                url: page.url,
                referrer: page.referrer,
                title: page.title,
            }),
            now,
        );
        if identity.is_new_user {
            self.queue.append(
                EventData::UserIdentified(UserIdentifiedData {
                    created_at: identity.identity.created_at,
                    visit_count: identity.identity.visit_count,
                }),
                now,
            );
        }
        if session.is_new_session {
            self.queue.append(
                EventData::SessionStarted(SessionStartedData {
                    started_at: session.session.started_at,
                    visit_count: session.visit_count,
                }),
                now,
            );
        }

        if self.collectors.time_on_page {
            self.time_on_page = Some(TimeOnPage::new(now));
        }

        self.identity = Some(identity.identity);
        self.state = TrackerState::Running;

        info!(
            "Tracker activated: user {} session {} ({} events queued)",
            self.user_id(),
            self.session_id(),
            self.queue.len()
        );
    }

    /// Append a payload produced by a collector or the host
    pub fn capture(&mut self, data: EventData) {
        if self.state == TrackerState::Idle {
            debug!("Dropping '{}' event captured before activation", data.event_type());
            return;
        }
        self.queue.append(data, self.clock.now_ms());
    }

    pub fn track(&mut self, name: &str, data: Value) {
        self.capture(EventData::custom(name, data));
    }

    pub fn identify(&mut self, user_id: &str, traits: Option<Value>) {
        self.capture(EventData::Identify(IdentifyData {
            user_id: user_id.to_string(),
            traits,
        }));
    }

    pub fn handle_signal(&mut self, signal: PageSignal) -> Option<UnloadOutcome> {
        if self.state == TrackerState::Idle {
            return None;
        }
        let now = self.clock.now_ms();

        match signal {
            PageSignal::Interaction(_) => {
                self.record_activity();
                None
            }
            PageSignal::Hidden => {
                if let Some(top) = self.time_on_page.as_mut() {
                    top.mark_idle(now);
                }
                self.capture_visibility(VisibilityChange::Visibility, Some("hidden"), now);
                Some(self.unload_flush())
            }
            PageSignal::Visible => {
                if let Some(top) = self.time_on_page.as_mut() {
                    top.mark_active(now);
                }
                self.capture_visibility(VisibilityChange::Visibility, Some("visible"), now);
                None
            }
            PageSignal::Focus => {
                if let Some(top) = self.time_on_page.as_mut() {
                    top.mark_active(now);
                }
                self.capture_visibility(VisibilityChange::Focus, None, now);
                None
            }
            PageSignal::Blur => {
                if let Some(top) = self.time_on_page.as_mut() {
                    top.mark_idle(now);
                }
                self.capture_visibility(VisibilityChange::Blur, None, now);
                None
            }
            PageSignal::BeforeUnload | PageSignal::PageHide => {
                let outcome = self.unload_flush();
                if self.state == TrackerState::Running {
                    debug!("Page unloading, periodic flush suspended");
                    self.state = TrackerState::Terminating;
                }
                Some(outcome)
            }
            PageSignal::PageShow => {
                if let Some(top) = self.time_on_page.as_mut() {
                    top.mark_active(now);
                }
                if self.state == TrackerState::Terminating {
                    info!("Page restored, resuming tracker");
                    self.state = TrackerState::Running;
                }
                None
            }
        }
    }

    /// Periodic flush: drain the queue and deliver it. On failure the batch
    /// is persisted and put back at the head of the queue.
    pub async fn flush(&mut self) -> FlushOutcome {
        match self.begin_flush() {
            FlushStart::Ready(payload) => {
                let result = self.transport.send(&payload).await;
                self.complete_flush(result)
            }
            FlushStart::Done(outcome) => outcome,
        }
    }

    /// Drain the queue into the in-flight batch. Skipped unless running and
    /// no other batch is in flight.
    pub fn begin_flush(&mut self) -> FlushStart {
        if self.state != TrackerState::Running {
            return FlushStart::Done(FlushOutcome::Skipped);
        }
        if self.in_flight.is_some() {
            debug!("Previous batch still in flight, skipping flush");
            return FlushStart::Done(FlushOutcome::Skipped);
        }
        match self.take_batch() {
            Some(payload) => FlushStart::Ready(payload),
            None => FlushStart::Done(FlushOutcome::Empty),
        }
    }

    /// Apply the transport result for the in-flight batch
    pub fn complete_flush(&mut self, result: Result<(), TransportError>) -> FlushOutcome {
        let batch = match self.in_flight.take() {
            Some(batch) => batch,
            None => {
                debug!("Flush finished after its batch went out with the unload transport");
                return FlushOutcome::Superseded;
            }
        };
        let count = batch.len();

        match result {
            Ok(()) => {
                self.settle_backlog();
                debug!("Successfully sent {} events", count);
                FlushOutcome::Delivered(count)
            }
            Err(e) => {
                warn!("Failed to send {} events, persisting for retry: {}", count, e);
                self.queue.prepend_raw(batch);
                self.store.save_events(&self.queue.snapshot());
                FlushOutcome::Persisted(count)
            }
        }
    }

    pub fn has_flush_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Unload-time delivery over the reliable transport. Never awaits. A
    /// batch still in flight goes out ahead of the queue.
    pub fn unload_flush(&mut self) -> UnloadOutcome {
        self.capture_time_on_page();

        let mut events = self.in_flight.clone().unwrap_or_default();
        events.extend(self.queue.snapshot());
        if events.is_empty() {
            return UnloadOutcome::Empty;
        }

        let payload = self.payload(events);
        let count = payload.events.len();

        if self.transport.send_reliable(&payload) {
            self.queue.clear();
            self.store.clear_events();
            self.in_flight = None;
            debug!("Unload transport accepted {} events", count);
            UnloadOutcome::Delivered(count)
        } else {
            warn!(
                "Unload transport rejected {} events, persisting for next activation",
                count
            );
            self.store.save_events(&payload.events);
            UnloadOutcome::Persisted(count)
        }
    }

    /// Explicit shutdown: final readings and one last ordinary flush
    pub async fn teardown(&mut self) -> FlushOutcome {
        if self.state == TrackerState::Idle {
            return FlushOutcome::Skipped;
        }
        self.state = TrackerState::Terminating;
        if let Some(batch) = self.in_flight.take() {
            warn!("Tearing down with {} unconfirmed events, resending", batch.len());
            self.queue.prepend_raw(batch);
        }
        self.capture_time_on_page();
        self.time_on_page = None;

        let outcome = self.deliver_queue().await;
        info!("Tracker torn down: {:?}", outcome);
        outcome
    }

    /// Append the current time-on-page reading, if that collector is on
    pub fn report_time_on_page(&mut self) {
        if self.state == TrackerState::Running {
            self.capture_time_on_page();
        }
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    pub fn session_id(&self) -> &str {
        self.queue.session_id()
    }

    pub fn user_id(&self) -> &str {
        self.queue.user_id()
    }

    pub fn identity(&self) -> Option<&UserIdentity> {
        self.identity.as_ref()
    }

    pub fn visit_count(&self) -> u32 {
        self.visit_count
    }

    pub fn queue(&self) -> &EventQueue {
        &self.queue
    }

    pub fn store(&self) -> &DurableStore {
        &self.store
    }

    pub fn settings(&self) -> &TrackerSettings {
        &self.settings
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        self.transport.clone()
    }

    pub fn collectors(&self) -> &CollectorToggles {
        &self.collectors
    }

    async fn deliver_queue(&mut self) -> FlushOutcome {
        match self.take_batch() {
            Some(payload) => {
                let result = self.transport.send(&payload).await;
                self.complete_flush(result)
            }
            None => FlushOutcome::Empty,
        }
    }

    fn take_batch(&mut self) -> Option<DeliveryPayload> {
        if self.queue.is_empty() {
            return None;
        }
        let batch = self.queue.drain();
        debug!("Flushing {} events", batch.len());
        self.in_flight = Some(batch.clone());
        Some(self.payload(batch))
    }

    /// After a confirmed delivery keep only backlog entries still queued
    fn settle_backlog(&mut self) {
        let pending = self.store.get_events();
        if pending.is_empty() {
            return;
        }
        let queued: HashSet<&str> = self.queue.iter().map(|e| e.id.as_str()).collect();
        let remaining: Vec<Event> = pending
            .into_iter()
            .filter(|e| queued.contains(e.id.as_str()))
            .collect();
        if remaining.is_empty() {
            self.store.clear_events();
        } else {
            self.store.save_events(&remaining);
        }
    }

    fn payload(&self, events: Vec<Event>) -> DeliveryPayload {
        DeliveryPayload {
            api_key: self.settings.api_key.clone(),
            session_id: self.queue.session_id().to_string(),
            user_id: self.queue.user_id().to_string(),
            events,
        }
    }

    fn capture_time_on_page(&mut self) {
        if let Some(top) = self.time_on_page.as_ref() {
            let reading = top.reading(self.clock.now_ms());
            self.queue.append(EventData::TimeOnPage(reading), self.clock.now_ms());
        }
    }

    fn capture_visibility(&mut self, change: VisibilityChange, state: Option<&str>, now: i64) {
        if !self.collectors.visibility {
            return;
        }
        self.queue.append(
            EventData::Visibility(VisibilityData {
                change,
                state: state.map(str::to_string),
                timestamp: now,
            }),
            now,
        );
    }

    fn record_activity(&mut self) {
        match self.sessions.record_activity(&self.store, self.visit_count) {
            ActivityOutcome::Throttled | ActivityOutcome::Refreshed => {}
            ActivityOutcome::Rotated(session) => {
                let user_id = self.queue.user_id().to_string();
                self.queue.rebind(&session.session.session_id, &user_id);
                self.visit_count = session.visit_count;
                self.queue.append(
                    EventData::SessionStarted(SessionStartedData {
                        started_at: session.session.started_at,
                        visit_count: session.visit_count,
                    }),
                    session.session.started_at,
                );
            }
        }
    }
}
