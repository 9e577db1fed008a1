//! # Discovery Record
//!
//! The small JSON file through which clients learn where the menu host listens:
//! `{ "port": 49152, "apiVersion": 1 }`.
//!
//! Writes go to a temp file in the same directory and are renamed into place,
//! so readers never observe a half-written record. A missing or unparsable
//! file means the host is not running.
//!
//! - **Version**: 1.0.0
//! - **Since**: 2.0.0

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryRecord {
    pub port: u16,
    pub api_version: u32,
}

impl DiscoveryRecord {
    pub fn new(port: u16, api_version: u32) -> Self {
        DiscoveryRecord { port, api_version }
    }

    /// Read the record, treating any failure as "host not running"
    pub fn load(path: &Path) -> Option<Self> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) => {
                debug!("No discovery record at {}: {}", path.display(), e);
                return None;
            }
        };

        match serde_json::from_str(&contents) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Ignoring unparsable discovery record {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Atomically replace the record at `path`, overwriting any stale one
    pub fn store(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let temp_path = path.with_extension(format!("json.{}.tmp", std::process::id()));
        let serialized = serde_json::to_string(self).map_err(std::io::Error::other)?;

        let written = (|| {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(serialized.as_bytes())?;
            file.sync_all()?;
            fs::rename(&temp_path, path)
        })();

        if written.is_err() {
            let _ = fs::remove_file(&temp_path);
        }
        written
    }

    /// Remove the record only if it still points at `port`
    pub fn remove_if_owned(path: &Path, port: u16) -> bool {
        match Self::load(path) {
            Some(record) if record.port == port => match fs::remove_file(path) {
                Ok(()) => true,
                Err(e) => {
                    warn!("Failed to remove discovery record {}: {}", path.display(), e);
                    false
                }
            },
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_store_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("ipc-info.json");

        DiscoveryRecord::new(4242, 1).store(&path).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        assert_eq!(raw, r#"{"port":4242,"apiVersion":1}"#);
        assert_eq!(DiscoveryRecord::load(&path), Some(DiscoveryRecord::new(4242, 1)));
    }

    #[test]
    fn test_stale_record_overwritten() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ipc-info.json");

        DiscoveryRecord::new(1000, 1).store(&path).unwrap();
        DiscoveryRecord::new(2000, 1).store(&path).unwrap();

        assert_eq!(DiscoveryRecord::load(&path).map(|r| r.port), Some(2000));
        // No temp files left behind
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_missing_or_garbage_is_none() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ipc-info.json");
        assert_eq!(DiscoveryRecord::load(&path), None);

        fs::write(&path, "{\"port\": \"nope\"}").unwrap();
        assert_eq!(DiscoveryRecord::load(&path), None);

        fs::write(&path, "{\"port\": 70000, \"apiVersion\": 1}").unwrap();
        assert_eq!(DiscoveryRecord::load(&path), None);
    }

    #[test]
    fn test_remove_if_owned() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ipc-info.json");
        DiscoveryRecord::new(3000, 1).store(&path).unwrap();

        assert!(!DiscoveryRecord::remove_if_owned(&path, 3001));
        assert!(path.exists());
        assert!(DiscoveryRecord::remove_if_owned(&path, 3000));
        assert!(!path.exists());
    }
}
