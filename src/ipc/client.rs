//! # IPC Clients
//!
//! Client side of the menu protocol. [`ShowMenuClient`] asks the host to display
//! one menu and hears back how that menu was used; the observer client in
//! [`crate::ipc::observer`] shares the connection plumbing defined here.
//!
//! Connection failures surface from `init()`. Everything after that (server
//! errors, malformed frames, calls made without a connection) arrives as a
//! [`ClientEvent::Error`] on the client's emitter, and the end of the
//! connection arrives as [`ClientEvent::Closed`].
//!
//! - **Version**: 2.1.0
//! - **Since**: 1.0.0
//!
//! ## Changelog
//! - 2.1.0: Closed event, show-menu display options
//! - 2.0.0: Split show-menu and observer clients, WebSocket transport
//! - 1.0.0: Initial IPC implementation

use crate::core::IpcConfig;
use crate::ipc::discovery::DiscoveryRecord;
use crate::ipc::emitter::{EmitterEvent, EventEmitter, ListenerId};
use crate::ipc::error::IpcError;
use crate::ipc::protocol::{
    decode_event, encode_message, ErrorReason, InteractionTarget, MenuEvent, MenuItem, MenuOptions,
    MenuRequest, API_VERSION,
};
use crate::ipc::transport::{PlatformTransport, Transport, TransportError, TransportHandler};
use log::{debug, error, info, warn};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;

/// Interaction events delivered to client listeners
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Open,
    Select {
        target: InteractionTarget,
        path: Vec<usize>,
    },
    Hover {
        target: InteractionTarget,
        path: Vec<usize>,
    },
    Cancel,
    Error {
        reason: ErrorReason,
        description: String,
    },
    /// The connection to the host ended, from either side
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientEventKind {
    Open,
    Select,
    Hover,
    Cancel,
    Error,
    Closed,
}

impl EmitterEvent for ClientEvent {
    type Kind = ClientEventKind;

    fn kind(&self) -> ClientEventKind {
        match self {
            ClientEvent::Open => ClientEventKind::Open,
            ClientEvent::Select { .. } => ClientEventKind::Select,
            ClientEvent::Hover { .. } => ClientEventKind::Hover,
            ClientEvent::Cancel => ClientEventKind::Cancel,
            ClientEvent::Error { .. } => ClientEventKind::Error,
            ClientEvent::Closed => ClientEventKind::Closed,
        }
    }
}

impl ClientEvent {
    fn error(reason: ErrorReason, description: impl Into<String>) -> Self {
        ClientEvent::Error {
            reason,
            description: description.into(),
        }
    }
}

impl From<MenuEvent> for ClientEvent {
    fn from(event: MenuEvent) -> Self {
        match event {
            MenuEvent::OpenMenu => ClientEvent::Open,
            MenuEvent::CancelMenu => ClientEvent::Cancel,
            MenuEvent::SelectItem { target, path } => ClientEvent::Select { target, path },
            MenuEvent::HoverItem { target, path } => ClientEvent::Hover { target, path },
            MenuEvent::Error {
                reason,
                description,
            } => ClientEvent::Error {
                reason,
                description,
            },
        }
    }
}

/// Typed subscriptions for client events
impl EventEmitter<ClientEvent> {
    pub fn on_open<F>(&self, handler: F) -> ListenerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on(ClientEventKind::Open, move |_| handler())
    }

    pub fn on_select<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(InteractionTarget, &[usize]) + Send + Sync + 'static,
    {
        self.on(ClientEventKind::Select, move |event| {
            if let ClientEvent::Select { target, path } = event {
                handler(*target, path);
            }
        })
    }

    pub fn on_hover<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(InteractionTarget, &[usize]) + Send + Sync + 'static,
    {
        self.on(ClientEventKind::Hover, move |event| {
            if let ClientEvent::Hover { target, path } = event {
                handler(*target, path);
            }
        })
    }

    pub fn on_cancel<F>(&self, handler: F) -> ListenerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on(ClientEventKind::Cancel, move |_| handler())
    }

    pub fn on_error<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(ErrorReason, &str) + Send + Sync + 'static,
    {
        self.on(ClientEventKind::Error, move |event| {
            if let ClientEvent::Error {
                reason,
                description,
            } = event
            {
                handler(*reason, description);
            }
        })
    }

    pub fn on_closed<F>(&self, handler: F) -> ListenerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on(ClientEventKind::Closed, move |_| handler())
    }
}

// ============================================================================
// Shared connection plumbing
// ============================================================================

/// Turns inbound frames into client events
struct EventForwarder {
    emitter: Arc<EventEmitter<ClientEvent>>,
    forward_open: bool,
}

impl TransportHandler for EventForwarder {
    fn on_message(&self, text: String) {
        let event = match decode_event(&text) {
            Ok(MenuEvent::OpenMenu) if !self.forward_open => {
                debug!("Ignoring open-menu frame");
                return;
            }
            Ok(event) => ClientEvent::from(event),
            Err(e) => {
                warn!("Malformed frame from menu host: {}", e);
                ClientEvent::error(ErrorReason::MalformedRequest, e.to_string())
            }
        };
        self.emitter.emit(&event);
    }

    fn on_error(&self, error: TransportError) {
        warn!("IPC transport error: {}", error);
        self.emitter
            .emit(&ClientEvent::error(ErrorReason::ConnectionFailed, error.to_string()));
    }

    fn on_close(&self) {
        debug!("IPC transport closed");
        self.emitter.emit(&ClientEvent::Closed);
    }
}

/// Connection state shared by both client kinds
pub(crate) struct ClientConnection {
    port: u16,
    api_version: u32,
    connect_timeout: Duration,
    forward_open: bool,
    emitter: Arc<EventEmitter<ClientEvent>>,
    transport: Mutex<Option<PlatformTransport>>,
}

impl ClientConnection {
    pub(crate) fn new(port: u16, api_version: u32, connect_timeout: Duration, forward_open: bool) -> Self {
        ClientConnection {
            port,
            api_version,
            connect_timeout,
            forward_open,
            emitter: Arc::new(EventEmitter::new()),
            transport: Mutex::new(None),
        }
    }

    pub(crate) fn discover(config: &IpcConfig, forward_open: bool) -> Result<Self, IpcError> {
        let path = config.discovery_path();
        let record = DiscoveryRecord::load(&path).ok_or_else(|| {
            IpcError::ConnectionFailed(format!("no menu host found at {}", path.display()))
        })?;
        Ok(Self::new(
            record.port,
            record.api_version,
            config.connect_timeout,
            forward_open,
        ))
    }

    fn lock(&self) -> MutexGuard<'_, Option<PlatformTransport>> {
        self.transport.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn port(&self) -> u16 {
        self.port
    }

    pub(crate) fn emitter(&self) -> &EventEmitter<ClientEvent> {
        &self.emitter
    }

    pub(crate) fn events(&self) -> mpsc::UnboundedReceiver<ClientEvent> {
        self.emitter.events()
    }

    pub(crate) async fn init(&self) -> Result<(), IpcError> {
        if self.api_version != API_VERSION {
            return Err(IpcError::VersionNotSupported {
                expected: API_VERSION,
                found: self.api_version,
            });
        }

        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, self.port));
        let handler = Arc::new(EventForwarder {
            emitter: self.emitter.clone(),
            forward_open: self.forward_open,
        });
        let transport = PlatformTransport::connect(addr, self.connect_timeout, handler)
            .await
            .map_err(|e| IpcError::ConnectionFailed(e.to_string()))?;

        info!("Connected to menu host at {}", addr);
        if let Some(previous) = self.lock().replace(transport) {
            previous.close();
        }
        Ok(())
    }

    /// Send a request, or emit a local `not-connected` error without any I/O
    pub(crate) fn send(&self, request: &MenuRequest) -> bool {
        let text = match encode_message(request) {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to encode request: {}", e);
                return false;
            }
        };

        let outcome = match self.lock().as_ref() {
            Some(transport) if transport.is_open() => transport.send(text),
            _ => Err(TransportError::Closed),
        };

        match outcome {
            Ok(()) => true,
            Err(e) => {
                debug!("Request not sent: {}", e);
                self.emitter.emit(&ClientEvent::error(
                    ErrorReason::NotConnected,
                    "not connected to the menu host",
                ));
                false
            }
        }
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.lock().as_ref().map_or(false, |transport| transport.is_open())
    }

    pub(crate) fn close(&self) {
        let transport = self.lock().take();
        if let Some(transport) = transport {
            transport.close();
            debug!("Closed connection to port {}", self.port);
        }
    }
}

// ============================================================================
// Show-menu client
// ============================================================================

/// Requests a single menu and receives the interaction events for it
pub struct ShowMenuClient {
    connection: ClientConnection,
}

impl ShowMenuClient {
    /// Client for a host reporting `(port, api_version)` in its discovery record
    pub fn new(port: u16, api_version: u32) -> Self {
        Self::with_config(port, api_version, &IpcConfig::default())
    }

    pub fn with_config(port: u16, api_version: u32, config: &IpcConfig) -> Self {
        ShowMenuClient {
            connection: ClientConnection::new(port, api_version, config.connect_timeout, false),
        }
    }

    /// Client for whichever host published the discovery record under `config`
    pub fn discover(config: &IpcConfig) -> Result<Self, IpcError> {
        Ok(ShowMenuClient {
            connection: ClientConnection::discover(config, false)?,
        })
    }

    /// Connect to the host. Fails without touching the network on a version mismatch.
    pub async fn init(&self) -> Result<(), IpcError> {
        self.connection.init().await
    }

    /// Ask the host to display `menu`; returns whether the request was sent
    pub fn show_menu(&self, menu: &MenuItem) -> bool {
        self.show_menu_with(menu, MenuOptions::default())
    }

    pub fn show_menu_with(&self, menu: &MenuItem, options: MenuOptions) -> bool {
        self.connection.send(&MenuRequest::ShowMenu {
            menu: menu.clone(),
            options,
        })
    }

    pub fn close(&self) {
        self.connection.close();
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn port(&self) -> u16 {
        self.connection.port()
    }

    pub fn emitter(&self) -> &EventEmitter<ClientEvent> {
        self.connection.emitter()
    }

    pub fn events(&self) -> mpsc::UnboundedReceiver<ClientEvent> {
        self.connection.events()
    }

    pub fn on_select<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(InteractionTarget, &[usize]) + Send + Sync + 'static,
    {
        self.emitter().on_select(handler)
    }

    pub fn on_hover<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(InteractionTarget, &[usize]) + Send + Sync + 'static,
    {
        self.emitter().on_hover(handler)
    }

    pub fn on_cancel<F>(&self, handler: F) -> ListenerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.emitter().on_cancel(handler)
    }

    pub fn on_error<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(ErrorReason, &str) + Send + Sync + 'static,
    {
        self.emitter().on_error(handler)
    }

    pub fn on_closed<F>(&self, handler: F) -> ListenerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.emitter().on_closed(handler)
    }
}

impl Drop for ShowMenuClient {
    fn drop(&mut self) {
        self.connection.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::protocol::MenuItem;
    use tempfile::TempDir;

    fn forwarder(forward_open: bool) -> (EventForwarder, mpsc::UnboundedReceiver<ClientEvent>) {
        let emitter = Arc::new(EventEmitter::new());
        let rx = emitter.events();
        (
            EventForwarder {
                emitter,
                forward_open,
            },
            rx,
        )
    }

    #[test]
    fn test_forwarder_decodes_events() {
        let (forwarder, mut rx) = forwarder(true);
        forwarder.on_message(r#"{"type":"open-menu"}"#.to_string());
        forwarder.on_message(r#"{"type":"select-item","target":"item","path":[1,2]}"#.to_string());

        assert_eq!(rx.try_recv().unwrap(), ClientEvent::Open);
        assert_eq!(
            rx.try_recv().unwrap(),
            ClientEvent::Select {
                target: InteractionTarget::Item,
                path: vec![1, 2]
            }
        );
    }

    #[test]
    fn test_forwarder_drops_open_for_show_menu_clients() {
        let (forwarder, mut rx) = forwarder(false);
        forwarder.on_message(r#"{"type":"open-menu"}"#.to_string());
        forwarder.on_message(r#"{"type":"cancel-menu"}"#.to_string());

        assert_eq!(rx.try_recv().unwrap(), ClientEvent::Cancel);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_forwarder_reports_close() {
        let (forwarder, mut rx) = forwarder(false);
        forwarder.on_close();
        assert_eq!(rx.try_recv().unwrap(), ClientEvent::Closed);
    }

    #[test]
    fn test_forwarder_reports_malformed_frames() {
        let (forwarder, mut rx) = forwarder(true);
        forwarder.on_message("{\"invalid\":\"data\"}".to_string());
        forwarder.on_message(r#"{"type":"start-observing"}"#.to_string());

        for _ in 0..2 {
            match rx.try_recv().unwrap() {
                ClientEvent::Error { reason, .. } => {
                    assert_eq!(reason, ErrorReason::MalformedRequest)
                }
                other => panic!("Expected error, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_version_mismatch_fails_before_connecting() {
        let client = ShowMenuClient::new(1, API_VERSION + 1);
        let err = client.init().await.unwrap_err();
        assert!(matches!(
            err,
            IpcError::VersionNotSupported { expected: 1, found: 2 }
        ));
        assert!(!client.is_connected());
    }

    #[test]
    fn test_show_menu_without_connection_emits_not_connected() {
        let client = ShowMenuClient::new(1, API_VERSION);
        let mut rx = client.events();

        let menu = MenuItem::new("submenu", "Root", "apps");
        assert!(!client.show_menu(&menu));

        match rx.try_recv().unwrap() {
            ClientEvent::Error { reason, .. } => assert_eq!(reason, ErrorReason::NotConnected),
            other => panic!("Expected error, got {:?}", other),
        }
        client.close();
        client.close();
    }

    #[test]
    fn test_discover_without_record() {
        let dir = TempDir::new().unwrap();
        let config = IpcConfig::with_discovery_dir(dir.path());
        assert!(matches!(
            ShowMenuClient::discover(&config),
            Err(IpcError::ConnectionFailed(_))
        ));

        DiscoveryRecord::new(4321, API_VERSION)
            .store(&config.discovery_path())
            .unwrap();
        let client = ShowMenuClient::discover(&config).unwrap();
        assert_eq!(client.port(), 4321);
    }
}
