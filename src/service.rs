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

// Running tracker service
//
// One task owns the `Tracker`; collectors, timers and the host reach it only
// through messages, so queue and store mutations are serialized and never
// re-entered. Network sends run in their own task and report back into the
// loop, which keeps serving unload signals in the meantime.

use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::collectors::{Collector, EventSink, OneShotCollector};
use crate::event::EventData;
use crate::tracker::{
    FlushOutcome, FlushStart, PageContext, PageSignal, Tracker, TrackerState, UnloadOutcome,
};
use crate::transport::TransportError;

/// Messages accepted by the tracker task
pub enum TrackerMessage {
    Capture(EventData),
    Track {
        name: String,
        data: Value,
    },
    Identify {
        user_id: String,
        traits: Option<Value>,
    },
    Signal {
        signal: PageSignal,
        reply: Option<oneshot::Sender<Option<UnloadOutcome>>>,
    },
    Flush(oneshot::Sender<FlushOutcome>),
    Status(oneshot::Sender<TrackerStatus>),
    Shutdown(oneshot::Sender<FlushOutcome>),
}

/// Point-in-time view of the running tracker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerStatus {
    pub state: TrackerState,
    pub session_id: String,
    pub user_id: String,
    pub visit_count: u32,
    pub queued_events: usize,
}

/// Collector adapters to start with the tracker
#[derive(Default)]
pub struct CollectorSet {
    streaming: Vec<Box<dyn Collector>>,
    one_shot: Vec<Arc<dyn OneShotCollector>>,
}

impl CollectorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_collector(mut self, collector: Box<dyn Collector>) -> Self {
        self.streaming.push(collector);
        self
    }

    pub fn with_one_shot(mut self, collector: Arc<dyn OneShotCollector>) -> Self {
        self.one_shot.push(collector);
        self
    }
}

pub struct TrackerService;

impl TrackerService {
    /// Activate `tracker`, start the enabled collectors and spawn the task
    /// that owns it. Must be called from within a Tokio runtime.
    pub fn spawn(mut tracker: Tracker, page: PageContext, collectors: CollectorSet) -> TrackerHandle {
        tracker.activate(page);

        let (tx, rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(tx.clone());

        let mut started = Vec::new();
        for mut collector in collectors.streaming {
            if !tracker.collectors().is_enabled(collector.name()) {
                debug!("Collector '{}' disabled", collector.name());
                continue;
            }
            debug!("Starting collector '{}'", collector.name());
            collector.start(sink.clone());
            started.push(collector);
        }

        for collector in collectors.one_shot {
            if !tracker.collectors().is_enabled(collector.name()) {
                debug!("Collector '{}' disabled", collector.name());
                continue;
            }
            let sink = sink.clone();
            tokio::spawn(async move {
                match collector.collect().await {
                    Some(data) => {
                        if !sink.emit(data) {
                            debug!("Collector '{}' resolved after teardown", collector.name());
                        }
                    }
                    None => debug!("Collector '{}' had nothing to report", collector.name()),
                }
            });
        }

        let task = tokio::spawn(Self::run(tracker, started, rx));

        TrackerHandle { tx, task }
    }

    async fn run(
        mut tracker: Tracker,
        mut collectors: Vec<Box<dyn Collector>>,
        mut rx: mpsc::UnboundedReceiver<TrackerMessage>,
    ) {
        let flush_every = tracker.settings().flush_interval();
        let mut flush_timer = interval_at(Instant::now() + flush_every, flush_every);
        flush_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut report_timer = if tracker.collectors().time_on_page {
            tracker.settings().time_on_page_report_interval().map(|every| {
                let mut timer = interval_at(Instant::now() + every, every);
                timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
                timer
            })
        } else {
            None
        };

        info!(
            "Tracker running: flushing every {:?}, {} collectors",
            flush_every,
            collectors.len()
        );

        let mut flight: Option<Flight> = None;
        let mut shutdown_replies = Vec::new();

        loop {
            tokio::select! {
                _ = flush_timer.tick() => {
                    Self::start_flush(&mut tracker, &mut flight, None);
                }
                joined = flight_done(&mut flight) => {
                    if let Some(done) = flight.take() {
                        Self::finish_flush(&mut tracker, done.waiters, joined);
                    }
                }
                _ = tick_optional(&mut report_timer) => {
                    tracker.report_time_on_page();
                }
                message = rx.recv() => match message {
                    Some(TrackerMessage::Shutdown(reply)) => {
                        shutdown_replies.push(reply);
                        break;
                    }
                    Some(message) => Self::handle(&mut tracker, &mut flight, message),
                    None => break,
                }
            }
        }

        // Stop producers before the final reading and flush
        for collector in collectors.iter_mut() {
            collector.stop();
        }

        // Anything accepted before the close is still applied
        rx.close();
        while let Ok(message) = rx.try_recv() {
            match message {
                TrackerMessage::Shutdown(reply) => shutdown_replies.push(reply),
                message => Self::handle(&mut tracker, &mut flight, message),
            }
        }

        if let Some(pending) = flight.take() {
            debug!("Waiting for in-flight batch before teardown");
            let joined = pending.task.await;
            Self::finish_flush(&mut tracker, pending.waiters, joined);
        }

        let outcome = tracker.teardown().await;
        for reply in shutdown_replies {
            let _ = reply.send(outcome);
        }
    }

    fn handle(tracker: &mut Tracker, flight: &mut Option<Flight>, message: TrackerMessage) {
        match message {
            TrackerMessage::Capture(data) => tracker.capture(data),
            TrackerMessage::Track { name, data } => tracker.track(&name, data),
            TrackerMessage::Identify { user_id, traits } => tracker.identify(&user_id, traits),
            TrackerMessage::Signal { signal, reply } => {
                let outcome = tracker.handle_signal(signal);
                if let Some(outcome) = outcome {
                    debug!("Signal {:?}: {:?}", signal, outcome);
                }
                if let Some(reply) = reply {
                    let _ = reply.send(outcome);
                }
            }
            TrackerMessage::Flush(reply) => Self::start_flush(tracker, flight, Some(reply)),
            TrackerMessage::Status(reply) => {
                let _ = reply.send(TrackerStatus {
                    state: tracker.state(),
                    session_id: tracker.session_id().to_string(),
                    user_id: tracker.user_id().to_string(),
                    visit_count: tracker.visit_count(),
                    queued_events: tracker.queue().len(),
                });
            }
            TrackerMessage::Shutdown(_) => {
                error!("Shutdown must be handled by the run loop");
            }
        }
    }

    /// Drain the queue and hand the send to its own task. A flush requested
    /// while a batch is pending is answered with that batch's outcome.
    fn start_flush(
        tracker: &mut Tracker,
        flight: &mut Option<Flight>,
        waiter: Option<oneshot::Sender<FlushOutcome>>,
    ) {
        if let Some(pending) = flight.as_mut() {
            pending.waiters.extend(waiter);
            return;
        }

        match tracker.begin_flush() {
            FlushStart::Ready(payload) => {
                let transport = tracker.transport();
                let task = tokio::spawn(async move { transport.send(&payload).await });
                *flight = Some(Flight {
                    task,
                    waiters: waiter.into_iter().collect(),
                });
            }
            FlushStart::Done(outcome) => {
                if let Some(waiter) = waiter {
                    let _ = waiter.send(outcome);
                }
            }
        }
    }

    fn finish_flush(
        tracker: &mut Tracker,
        waiters: Vec<oneshot::Sender<FlushOutcome>>,
        joined: Result<Result<(), TransportError>, JoinError>,
    ) {
        let result = joined.unwrap_or_else(|e| Err(TransportError::Aborted(e.to_string())));
        let outcome = tracker.complete_flush(result);
        debug!("Flush: {:?}", outcome);
        for waiter in waiters {
            let _ = waiter.send(outcome);
        }
    }
}

/// Transport send running outside the owning task
struct Flight {
    task: JoinHandle<Result<(), TransportError>>,
    waiters: Vec<oneshot::Sender<FlushOutcome>>,
}

async fn flight_done(
    flight: &mut Option<Flight>,
) -> Result<Result<(), TransportError>, JoinError> {
    match flight {
        Some(pending) => (&mut pending.task).await,
        None => std::future::pending().await,
    }
}

async fn tick_optional(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Owner-side handle of a running tracker
///
/// Collectors hold their own senders, so dropping the handle does not stop
/// the tracker; call `destroy`.
pub struct TrackerHandle {
    tx: mpsc::UnboundedSender<TrackerMessage>,
    task: JoinHandle<()>,
}

impl TrackerHandle {
    /// Sink for collectors registered after start
    pub fn sink(&self) -> EventSink {
        EventSink::new(self.tx.clone())
    }

    pub fn capture(&self, data: EventData) -> bool {
        self.tx.send(TrackerMessage::Capture(data)).is_ok()
    }

    pub fn track(&self, name: &str, data: Value) -> bool {
        self.tx
            .send(TrackerMessage::Track {
                name: name.to_string(),
                data,
            })
            .is_ok()
    }

    pub fn identify(&self, user_id: &str, traits: Option<Value>) -> bool {
        self.tx
            .send(TrackerMessage::Identify {
                user_id: user_id.to_string(),
                traits,
            })
            .is_ok()
    }

    /// Deliver a page signal and wait until it has been applied
    pub async fn signal(&self, signal: PageSignal) -> Option<UnloadOutcome> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(TrackerMessage::Signal {
                signal,
                reply: Some(reply),
            })
            .ok()?;
        rx.await.ok().flatten()
    }

    /// Deliver a page signal without waiting, as a DOM listener would
    pub fn notify(&self, signal: PageSignal) -> bool {
        self.tx
            .send(TrackerMessage::Signal {
                signal,
                reply: None,
            })
            .is_ok()
    }

    /// Run a flush now instead of waiting for the timer
    pub async fn flush(&self) -> Option<FlushOutcome> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(TrackerMessage::Flush(reply)).ok()?;
        rx.await.ok()
    }

    pub async fn status(&self) -> Option<TrackerStatus> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(TrackerMessage::Status(reply)).ok()?;
        rx.await.ok()
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop the timer and collectors, take final readings and flush once
    pub async fn destroy(self) -> Option<FlushOutcome> {
        let (reply, rx) = oneshot::channel();
        let outcome = match self.tx.send(TrackerMessage::Shutdown(reply)) {
            Ok(()) => rx.await.ok(),
            Err(_) => None,
        };
        if let Err(e) = self.task.await {
            error!("Tracker task failed: {}", e);
        }
        outcome
    }
}

/// Owner of the single active tracker. Initializing again destroys the
/// previous instance first.
#[derive(Default)]
pub struct Agent {
    current: Option<TrackerHandle>,
}

impl Agent {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn init(
        &mut self,
        tracker: Tracker,
        page: PageContext,
        collectors: CollectorSet,
    ) -> &TrackerHandle {
        if let Some(previous) = self.current.take() {
            info!("Replacing running tracker");
            previous.destroy().await;
        }
        self.current.insert(TrackerService::spawn(tracker, page, collectors))
    }

    pub fn instance(&self) -> Option<&TrackerHandle> {
        self.current.as_ref()
    }

    pub async fn destroy(&mut self) -> Option<FlushOutcome> {
        match self.current.take() {
            Some(handle) => handle.destroy().await,
            None => None,
        }
    }
}
