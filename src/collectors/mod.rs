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

// Collector adapter contract
//
// Adapters are external producers: the tracker only starts and stops them
// and receives their payloads through an `EventSink`. Streaming adapters
// push whenever they have data; one-shot adapters resolve a single
// optional payload and report `None` when the capability is missing.

pub mod time_on_page;

pub use time_on_page::TimeOnPage;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;

use crate::event::EventData;
use crate::service::TrackerMessage;

/// Handle through which adapters feed events to the running tracker
#[derive(Clone)]
pub struct EventSink {
    tx: UnboundedSender<TrackerMessage>,
}

impl EventSink {
    pub(crate) fn new(tx: UnboundedSender<TrackerMessage>) -> Self {
        Self { tx }
    }

    /// Queue a payload. Returns false once the tracker has been torn down,
    /// in which case the payload is dropped.
    pub fn emit(&self, data: EventData) -> bool {
        self.tx.send(TrackerMessage::Capture(data)).is_ok()
    }

    pub fn is_live(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Adapter that emits events asynchronously between `start` and `stop`
pub trait Collector: Send {
    /// Name matched against the collector enable flags
    fn name(&self) -> &str;

    fn start(&mut self, sink: EventSink);

    fn stop(&mut self);
}

/// Adapter that produces at most one payload
#[async_trait]
pub trait OneShotCollector: Send + Sync {
    fn name(&self) -> &str;

    async fn collect(&self) -> Option<EventData>;
}
