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

// Filesystem backend implementation

use super::backend::{KeyValueBackend, StoreError};
use crate::config::FilesystemConfig;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::PathBuf;
use tracing::{debug, info};

/// Filesystem backend storing one file per key under a base directory
pub struct FilesystemBackend {
    base_path: PathBuf,
}

impl FilesystemBackend {
    pub fn new(config: FilesystemConfig) -> Result<Self, StoreError> {
        let base_path = PathBuf::from(&config.base_path);

        info!(
            "Initializing filesystem backend at: {}",
            base_path.display()
        );

        if !base_path.exists() {
            info!("Creating base directory: {}", base_path.display());
            fs::create_dir_all(&base_path)?;
        }

        Ok(Self { base_path })
    }

    /// Get the file path for a given key
    fn key_path(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.base_path.join(format!("{}.json", file_name))
    }
}

impl KeyValueBackend for FilesystemBackend {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(self.key_path(key)) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let path = self.key_path(key);
        let tmp_path = path.with_extension("json.tmp");

        debug!("Writing {} bytes to {}", value.len(), path.display());

        // Write then rename so readers never see a torn record
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(value.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp_path, &path)?;

        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.key_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn backend_type(&self) -> &str {
        "filesystem"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_backend() -> (FilesystemBackend, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config = FilesystemConfig {
            base_path: temp_dir.path().join("store").to_string_lossy().to_string(),
        };
        let backend = FilesystemBackend::new(config).unwrap();
        (backend, temp_dir)
    }

    #[test]
    fn test_creates_base_directory() {
        let (backend, _temp_dir) = create_test_backend();
        assert!(backend.base_path.is_dir());
    }

    #[test]
    fn test_set_get_remove() {
        let (backend, _temp_dir) = create_test_backend();

        assert!(backend.get("tracker_session").unwrap().is_none());

        backend.set("tracker_session", "{\"a\":1}").unwrap();
        assert_eq!(
            backend.get("tracker_session").unwrap().as_deref(),
            Some("{\"a\":1}")
        );

        backend.set("tracker_session", "{\"a\":2}").unwrap();
        assert_eq!(
            backend.get("tracker_session").unwrap().as_deref(),
            Some("{\"a\":2}")
        );

        backend.remove("tracker_session").unwrap();
        assert!(backend.get("tracker_session").unwrap().is_none());
        // Removing a missing key is fine
        backend.remove("tracker_session").unwrap();
    }

    #[test]
    fn test_key_sanitization() {
        let (backend, _temp_dir) = create_test_backend();
        let path = backend.key_path("../escape/key");
        assert_eq!(path.parent().unwrap(), backend.base_path.as_path());
        backend.set("../escape/key", "x").unwrap();
        assert_eq!(backend.get("../escape/key").unwrap().as_deref(), Some("x"));
    }

    #[test]
    fn test_persists_across_instances() {
        let temp_dir = TempDir::new().unwrap();
        let config = FilesystemConfig {
            base_path: temp_dir.path().to_string_lossy().to_string(),
        };
        FilesystemBackend::new(config.clone())
            .unwrap()
            .set("k", "v")
            .unwrap();
        let reopened = FilesystemBackend::new(config).unwrap();
        assert_eq!(reopened.get("k").unwrap().as_deref(), Some("v"));
    }
}
