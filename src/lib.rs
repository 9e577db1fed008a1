// Core layer - shared configuration
pub mod core;

// IPC layer - menu protocol, server and clients
pub mod ipc;

pub use core::IpcConfig;

pub use ipc::{
    ClientEvent, HostEvent, InteractionTarget, IpcError, IpcServer, MenuItem, MenuOptions,
    ObserverCallbacks, ObserverClient, ShowMenuClient, API_VERSION,
};
