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

// Storage module
//
// A trait-based key-value backend abstraction (memory, filesystem) and the
// durable store that keeps the pending-event backlog, user identity and
// session record on top of it, each under its own key.

pub mod backend;
pub mod durable;
pub mod factory;
pub mod filesystem;
pub mod memory;

pub use backend::{KeyValueBackend, StoreError};
pub use durable::{
    DurableStore, PersistedEnvelope, SessionRecord, UserIdentity, MAX_STORAGE_BYTES,
    PENDING_EVENTS_KEY, RETENTION_WINDOW_MS, SESSION_DATA_KEY, SESSION_TOKEN_KEY,
    USER_IDENTITY_KEY,
};
pub use factory::BackendFactory;
pub use filesystem::FilesystemBackend;
pub use memory::MemoryBackend;
