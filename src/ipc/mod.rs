//! # IPC Module
//!
//! Local protocol through which other processes ask the pie-menu host to show
//! menus and observe how they are used.
//!
//! - **Version**: 2.0.0
//! - **Since**: 1.0.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 2.0.0: Persistent observers, interaction targets, WebSocket transport
//! - 1.0.0: Initial IPC implementation

pub mod client;
pub mod discovery;
pub mod emitter;
pub mod error;
pub mod observer;
pub mod protocol;
pub mod server;
pub mod session;
pub mod transport;

pub use client::{ClientEvent, ClientEventKind, ShowMenuClient};
pub use discovery::DiscoveryRecord;
pub use emitter::{EmitterEvent, EventEmitter, ListenerId};
pub use error::IpcError;
pub use observer::ObserverClient;
pub use protocol::{
    decode_event, decode_request, encode_message, DecodeError, ErrorReason, InteractionTarget,
    MenuEvent, MenuItem, MenuOptions, MenuRequest, API_VERSION,
};
pub use server::{HostEvent, HostEventKind, IpcServer, ObserverCallbacks};
pub use session::{ObserverId, ONE_TIME_OBSERVER_ID};
pub use transport::{PlatformTransport, Transport, TransportError, TransportHandler};
