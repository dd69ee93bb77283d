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

// Page tracker agent core
//
// Telemetry agent for a single page lifetime:
// - Buffers events in a bounded queue that protects replay checkpoints
// - Persists the undelivered backlog, user identity and session record
// - Resolves identity and sessions with an inactivity timeout
// - Flushes periodically, hands the queue to a reliable transport on
//   unload and recovers the backlog on the next activation

pub mod buffer;
pub mod clock;
pub mod collectors;
pub mod config;
pub mod event;
pub mod protocol;
pub mod service;
pub mod session;
pub mod storage;
pub mod tracker;
pub mod transport;

// Re-export main types
pub use buffer::EventQueue;
pub use clock::{Clock, ManualClock, SystemClock};
pub use collectors::{Collector, EventSink, OneShotCollector};
pub use config::{load_config, load_config_with_env, TrackerConfig};
pub use event::{Event, EventData, SensorKind, CHECKPOINT_EVENT_TYPE};
pub use protocol::{DeliveryPayload, HostMessage, HostSignal};
pub use service::{Agent, CollectorSet, TrackerHandle, TrackerService, TrackerStatus};
pub use session::SessionManager;
pub use storage::{BackendFactory, DurableStore, KeyValueBackend, MemoryBackend};
pub use tracker::{
    FlushOutcome, FlushStart, InteractionKind, PageContext, PageSignal, Tracker, TrackerState,
    UnloadOutcome,
};
pub use transport::{HttpTransport, MemoryTransport, Transport};
