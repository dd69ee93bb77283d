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

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event::Event;
use crate::tracker::{InteractionKind, PageSignal};

/// Request body of one delivery to the collector endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryPayload {
    pub api_key: String,
    pub session_id: String,
    pub user_id: String,
    pub events: Vec<Event>,
}

impl DeliveryPayload {
    pub fn to_body(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// Page signal names accepted from the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostSignal {
    Hidden,
    Visible,
    Focus,
    Blur,
    BeforeUnload,
    PageHide,
    PageShow,
    Click,
    KeyDown,
    Scroll,
    TouchStart,
}

impl From<HostSignal> for PageSignal {
    fn from(signal: HostSignal) -> Self {
        match signal {
            HostSignal::Hidden => PageSignal::Hidden,
            HostSignal::Visible => PageSignal::Visible,
            HostSignal::Focus => PageSignal::Focus,
            HostSignal::Blur => PageSignal::Blur,
            HostSignal::BeforeUnload => PageSignal::BeforeUnload,
            HostSignal::PageHide => PageSignal::PageHide,
            HostSignal::PageShow => PageSignal::PageShow,
            HostSignal::Click => PageSignal::Interaction(InteractionKind::Click),
            HostSignal::KeyDown => PageSignal::Interaction(InteractionKind::KeyDown),
            HostSignal::Scroll => PageSignal::Interaction(InteractionKind::Scroll),
            HostSignal::TouchStart => PageSignal::Interaction(InteractionKind::TouchStart),
        }
    }
}

/// One line of host input for the headless agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum HostMessage {
    Track {
        name: String,
        #[serde(default)]
        data: Value,
    },
    Identify {
        user_id: String,
        #[serde(default)]
        traits: Option<Value>,
    },
    /// Payload from an external collector, tagged with its event type
    Capture {
        #[serde(rename = "type")]
        event_type: String,
        #[serde(default)]
        data: Value,
    },
    Signal {
        signal: HostSignal,
    },
    Flush,
}
