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

// Backend factory for creating storage backends from configuration

use super::backend::KeyValueBackend;
use super::filesystem::FilesystemBackend;
use super::memory::MemoryBackend;
use crate::config::StorageConfig;
use anyhow::{bail, Context, Result};
use std::sync::Arc;

pub struct BackendFactory;

impl BackendFactory {
    /// Create storage backend from configuration
    pub fn create(config: &StorageConfig) -> Result<Arc<dyn KeyValueBackend>> {
        match config.backend.as_str() {
            "memory" => Ok(Arc::new(MemoryBackend::new())),

            "filesystem" => {
                let backend_config = config
                    .filesystem
                    .as_ref()
                    .ok_or_else(|| anyhow::anyhow!("Filesystem config missing"))?;

                let backend = FilesystemBackend::new(backend_config.clone())
                    .context("Failed to initialize filesystem backend")?;
                Ok(Arc::new(backend))
            }

            unknown => bail!(
                "Unknown storage backend: '{}'. Supported: memory, filesystem",
                unknown
            ),
        }
    }
}
