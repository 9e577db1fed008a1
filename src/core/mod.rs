//! # Core Module
//!
//! Configuration shared by the menu host and the IPC clients.
//!
//! - **Version**: 1.0.0
//! - **Since**: 1.0.0

pub mod config;

pub use config::{IpcConfig, DISCOVERY_FILE_NAME};
