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

// Captured events and their payloads
//
// On the wire an event is `{id, type, timestamp, sessionId, userId, data}`.
// In memory the `type` string is derived from the `EventData` variant, so a
// payload can never disagree with its tag.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Wire tag of the full-state replay snapshot. Never evicted while any
/// other event is queued.
pub const CHECKPOINT_EVENT_TYPE: &str = "rrweb_checkout";

pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// A single captured observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "WireEvent", into = "WireEvent")]
pub struct Event {
    pub id: String,
    pub timestamp: i64,
    pub session_id: String,
    pub user_id: String,
    pub data: EventData,
}

impl Event {
    pub fn new(data: EventData, session_id: &str, user_id: &str, timestamp: i64) -> Self {
        Self {
            id: generate_id(),
            timestamp,
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            data,
        }
    }

    pub fn event_type(&self) -> &str {
        self.data.event_type()
    }

    pub fn is_checkpoint(&self) -> bool {
        self.data.is_checkpoint()
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    timestamp: i64,
    session_id: String,
    #[serde(default)]
    user_id: String,
    #[serde(default)]
    data: Value,
}

impl From<WireEvent> for Event {
    fn from(wire: WireEvent) -> Self {
        Self {
            id: wire.id,
            timestamp: wire.timestamp,
            session_id: wire.session_id,
            user_id: wire.user_id,
            data: EventData::from_wire(&wire.event_type, wire.data),
        }
    }
}

impl From<Event> for WireEvent {
    fn from(event: Event) -> Self {
        Self {
            event_type: event.data.event_type().to_string(),
            data: event.data.into_value(),
            id: event.id,
            timestamp: event.timestamp,
            session_id: event.session_id,
            user_id: event.user_id,
        }
    }
}

/// Sensor-style producers whose payload shape the core does not interpret
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorKind {
    Device,
    Connection,
    Location,
    Performance,
    Permissions,
    Battery,
    Orientation,
    Motion,
    Click,
}

impl SensorKind {
    pub const ALL: [SensorKind; 9] = [
        SensorKind::Device,
        SensorKind::Connection,
        SensorKind::Location,
        SensorKind::Performance,
        SensorKind::Permissions,
        SensorKind::Battery,
        SensorKind::Orientation,
        SensorKind::Motion,
        SensorKind::Click,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SensorKind::Device => "device",
            SensorKind::Connection => "connection",
            SensorKind::Location => "location",
            SensorKind::Performance => "performance",
            SensorKind::Permissions => "permissions",
            SensorKind::Battery => "battery",
            SensorKind::Orientation => "orientation",
            SensorKind::Motion => "motion",
            SensorKind::Click => "click",
        }
    }

    pub fn from_type(event_type: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == event_type)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageviewData {
    pub url: String,
    #[serde(default)]
    pub referrer: String,
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdentifiedData {
    pub created_at: i64,
    pub visit_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStartedData {
    pub started_at: i64,
    pub visit_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifyData {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traits: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeOnPageData {
    pub total_time: i64,
    pub active_time: i64,
    pub idle_time: i64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisibilityChange {
    Visibility,
    Focus,
    Blur,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisibilityData {
    #[serde(rename = "type")]
    pub change: VisibilityChange,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    pub timestamp: i64,
}

/// Event payload, one variant per producer kind
#[derive(Debug, Clone, PartialEq)]
pub enum EventData {
    Pageview(PageviewData),
    UserIdentified(UserIdentifiedData),
    SessionStarted(SessionStartedData),
    Identify(IdentifyData),
    TimeOnPage(TimeOnPageData),
    Visibility(VisibilityData),
    Sensor { kind: SensorKind, payload: Value },
    Replay(Value),
    ReplayCheckpoint(Value),
    Custom { name: String, payload: Value },
}

impl EventData {
    pub fn custom(name: impl Into<String>, payload: Value) -> Self {
        EventData::Custom {
            name: name.into(),
            payload,
        }
    }

    pub fn event_type(&self) -> &str {
        match self {
            EventData::Pageview(_) => "pageview",
            EventData::UserIdentified(_) => "user_identified",
            EventData::SessionStarted(_) => "session_started",
            EventData::Identify(_) => "identify",
            EventData::TimeOnPage(_) => "time_on_page",
            EventData::Visibility(_) => "visibility",
            EventData::Sensor { kind, .. } => kind.as_str(),
            EventData::Replay(_) => "rrweb",
            EventData::ReplayCheckpoint(_) => CHECKPOINT_EVENT_TYPE,
            EventData::Custom { name, .. } => name.as_str(),
        }
    }

    pub fn is_checkpoint(&self) -> bool {
        matches!(self, EventData::ReplayCheckpoint(_))
    }

    /// Rebuild a payload from its wire tag. Typed kinds are only used when
    /// the typed struct reproduces the payload exactly; anything else
    /// (unparseable, extra or defaulted fields) is kept verbatim as `Custom`
    /// under the same tag.
    pub fn from_wire(event_type: &str, data: Value) -> Self {
        fn typed<T: serde::de::DeserializeOwned + Serialize>(
            event_type: &str,
            data: Value,
            wrap: fn(T) -> EventData,
        ) -> EventData {
            match serde_json::from_value::<T>(data.clone()) {
                Ok(parsed) if serde_json::to_value(&parsed).ok().as_ref() == Some(&data) => {
                    wrap(parsed)
                }
                _ => EventData::custom(event_type, data),
            }
        }

        match event_type {
            "pageview" => typed(event_type, data, EventData::Pageview),
            "user_identified" => typed(event_type, data, EventData::UserIdentified),
            "session_started" => typed(event_type, data, EventData::SessionStarted),
            "identify" => typed(event_type, data, EventData::Identify),
            "time_on_page" => typed(event_type, data, EventData::TimeOnPage),
            "visibility" => typed(event_type, data, EventData::Visibility),
            "rrweb" => EventData::Replay(data),
            CHECKPOINT_EVENT_TYPE => EventData::ReplayCheckpoint(data),
            other => match SensorKind::from_type(other) {
                Some(kind) => EventData::Sensor {
                    kind,
                    payload: data,
                },
                None => EventData::custom(other, data),
            },
        }
    }

    pub fn into_value(self) -> Value {
        let value = match self {
            EventData::Pageview(data) => serde_json::to_value(data),
            EventData::UserIdentified(data) => serde_json::to_value(data),
            EventData::SessionStarted(data) => serde_json::to_value(data),
            EventData::Identify(data) => serde_json::to_value(data),
            EventData::TimeOnPage(data) => serde_json::to_value(data),
            EventData::Visibility(data) => serde_json::to_value(data),
            EventData::Sensor { payload, .. }
            | EventData::Replay(payload)
            | EventData::ReplayCheckpoint(payload)
            | EventData::Custom { payload, .. } => Ok(payload),
        };
        // Plain structs of strings and integers always serialize
        value.unwrap_or(Value::Null)
    }
}
