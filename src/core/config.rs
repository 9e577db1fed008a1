//! # Configuration
//!
//! Environment-driven settings shared by the menu host and its clients.
//!
//! | Variable                     | Default                          |
//! |------------------------------|----------------------------------|
//! | `PIE_IPC_DIR`                | `<config dir>/pie-menu`          |
//! | `PIE_IPC_CONNECT_TIMEOUT_MS` | `5000`                           |

use log::warn;
use std::path::PathBuf;
use std::time::Duration;

/// Per-application directory name below the platform config dir
pub const APP_DIR_NAME: &str = "pie-menu";

/// File name of the discovery record
pub const DISCOVERY_FILE_NAME: &str = "ipc-info.json";

/// Default time allowed for a client to finish the WebSocket handshake
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpcConfig {
    /// Directory holding the discovery record
    pub discovery_dir: PathBuf,
    pub connect_timeout: Duration,
}

impl IpcConfig {
    /// Build the configuration from the environment, falling back to defaults
    pub fn from_env() -> Self {
        let discovery_dir = std::env::var_os("PIE_IPC_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(default_discovery_dir);
        let connect_timeout = parse_timeout(std::env::var("PIE_IPC_CONNECT_TIMEOUT_MS").ok());

        IpcConfig {
            discovery_dir,
            connect_timeout,
        }
    }

    /// Configuration rooted at an explicit directory
    pub fn with_discovery_dir(discovery_dir: impl Into<PathBuf>) -> Self {
        IpcConfig {
            discovery_dir: discovery_dir.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Full path of the discovery record
    pub fn discovery_path(&self) -> PathBuf {
        self.discovery_dir.join(DISCOVERY_FILE_NAME)
    }
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self::with_discovery_dir(default_discovery_dir())
    }
}

fn default_discovery_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR_NAME)
}

fn parse_timeout(raw: Option<String>) -> Duration {
    match raw {
        None => DEFAULT_CONNECT_TIMEOUT,
        Some(value) => match value.trim().parse::<u64>() {
            Ok(ms) if ms > 0 => Duration::from_millis(ms),
            _ => {
                warn!(
                    "Ignoring invalid PIE_IPC_CONNECT_TIMEOUT_MS={:?}, using {:?}",
                    value, DEFAULT_CONNECT_TIMEOUT
                );
                DEFAULT_CONNECT_TIMEOUT
            }
        },
    }
}
