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

// In-memory backend
//
// Clones share one map, which is how two activations (or two tabs) see the
// same storage. A byte quota and an on/off switch model the browser's
// size-capped, sometimes-disabled storage.

use super::backend::{KeyValueBackend, StoreError};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct MemoryBackend {
    entries: Arc<DashMap<String, String>>,
    quota_bytes: Arc<AtomicUsize>,
    disabled: Arc<AtomicBool>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend that rejects any write leaving more than `quota_bytes` stored
    pub fn with_quota(quota_bytes: usize) -> Self {
        let backend = Self::default();
        backend.set_quota(Some(quota_bytes));
        backend
    }

    pub fn set_quota(&self, quota_bytes: Option<usize>) {
        self.quota_bytes
            .store(quota_bytes.unwrap_or(0), Ordering::SeqCst);
    }

    /// Make every operation fail, as when storage is blocked by the user agent
    pub fn set_disabled(&self, disabled: bool) {
        self.disabled.store(disabled, Ordering::SeqCst);
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|v| v.value().clone())
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    fn stored_bytes_excluding(&self, key: &str) -> usize {
        self.entries
            .iter()
            .filter(|e| e.key() != key)
            .map(|e| e.key().len() + e.value().len())
            .sum()
    }

    fn check_enabled(&self) -> Result<(), StoreError> {
        if self.disabled.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory backend disabled".to_string()));
        }
        Ok(())
    }
}

impl KeyValueBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check_enabled()?;
        Ok(self.raw(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.check_enabled()?;

        let quota = self.quota_bytes.load(Ordering::SeqCst);
        if quota > 0 {
            let size = self.stored_bytes_excluding(key) + key.len() + value.len();
            if size > quota {
                return Err(StoreError::QuotaExceeded {
                    key: key.to_string(),
                    size,
                });
            }
        }

        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.check_enabled()?;
        self.entries.remove(key);
        Ok(())
    }

    fn backend_type(&self) -> &str {
        "memory"
    }
}
