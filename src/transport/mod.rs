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

// Delivery transports
//
// Two channels per transport: an ordinary awaited send used by the periodic
// flush, and a fire-and-forget reliable send used while the page unloads,
// which only reports whether it accepted the payload.

pub mod http;
pub mod memory;

pub use http::HttpTransport;
pub use memory::{DeliveryChannel, MemoryTransport};

use crate::protocol::DeliveryPayload;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("collector responded with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("failed to encode payload: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("delivery task aborted: {0}")]
    Aborted(String),
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver one batch; any non-success outcome is an error
    async fn send(&self, payload: &DeliveryPayload) -> Result<(), TransportError>;

    /// Hand a batch to a channel that survives page teardown. Returns
    /// whether it was accepted; there is no later confirmation. Must not
    /// block or await.
    fn send_reliable(&self, payload: &DeliveryPayload) -> bool;

    /// Get transport type identifier
    fn transport_type(&self) -> &str;
}
