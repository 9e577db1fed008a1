//! # IPC Server
//!
//! Loopback WebSocket server through which external processes drive the pie menu.
//!
//! The server binds `127.0.0.1` on an OS-assigned port, publishes the port in the
//! discovery record and serves every connection on its own task. Inbound frames
//! are decoded and routed through the [`SessionRegistry`]; the host application
//! learns about requests through [`HostEvent`]s and answers with the
//! [`ObserverCallbacks`] it is handed.
//!
//! - **Version**: 2.0.0
//! - **Since**: 1.0.0
//!
//! ## Changelog
//! - 2.0.0: Multiple observers with explicit start/stop and interaction targets
//! - 1.0.0: Initial IPC implementation

use crate::core::IpcConfig;
use crate::ipc::discovery::DiscoveryRecord;
use crate::ipc::emitter::{EmitterEvent, EventEmitter, ListenerId};
use crate::ipc::error::IpcError;
use crate::ipc::protocol::{
    decode_request, encode_message, ErrorReason, InteractionTarget, MenuEvent, MenuItem,
    MenuOptions, MenuRequest, API_VERSION,
};
use crate::ipc::session::{
    ConnectionId, Delivery, ObserverId, Registration, ScopeToken, SessionRegistry,
};
use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

// ============================================================================
// Host-facing events
// ============================================================================

/// Requests surfaced to the host application
#[derive(Debug, Clone)]
pub enum HostEvent {
    /// Display `menu`; report its interaction through `callbacks` (observer 0)
    ShowMenu {
        menu: MenuItem,
        options: MenuOptions,
        callbacks: ObserverCallbacks,
    },
    /// A persistent observer registered
    StartObserving {
        observer_id: ObserverId,
        callbacks: ObserverCallbacks,
    },
    /// An observer stopped, was replaced, finished its one-time scope or disconnected
    StopObserving { observer_id: ObserverId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostEventKind {
    ShowMenu,
    StartObserving,
    StopObserving,
}

impl EmitterEvent for HostEvent {
    type Kind = HostEventKind;

    fn kind(&self) -> HostEventKind {
        match self {
            HostEvent::ShowMenu { .. } => HostEventKind::ShowMenu,
            HostEvent::StartObserving { .. } => HostEventKind::StartObserving,
            HostEvent::StopObserving { .. } => HostEventKind::StopObserving,
        }
    }
}

struct ServerShared {
    sessions: SessionRegistry,
    emitter: EventEmitter<HostEvent>,
}

impl ServerShared {
    fn reply_error(&self, conn: ConnectionId, reason: ErrorReason, description: String) {
        match encode_message(&MenuEvent::error(reason, description)) {
            Ok(text) => {
                if !self.sessions.send(conn, text) {
                    debug!("Could not deliver {} error to {}", reason, conn);
                }
            }
            Err(e) => error!("Failed to encode error reply: {}", e),
        }
    }

    fn stop_observing(&self, observer_id: ObserverId) {
        self.emitter.emit(&HostEvent::StopObserving { observer_id });
    }
}

// ============================================================================
// Interaction callbacks
// ============================================================================

/// Sends interaction events to the one connection that owns a registration.
///
/// Calls made after the registration ended (stop, disconnect, a newer
/// `show-menu` scope) do nothing and return `false`.
#[derive(Clone)]
pub struct ObserverCallbacks {
    observer_id: ObserverId,
    connection: ConnectionId,
    scope: ScopeToken,
    shared: Weak<ServerShared>,
}

impl std::fmt::Debug for ObserverCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverCallbacks")
            .field("observer_id", &self.observer_id)
            .field("connection", &self.connection)
            .finish()
    }
}

impl ObserverCallbacks {
    fn new(shared: &Arc<ServerShared>, connection: ConnectionId, registration: Registration) -> Self {
        ObserverCallbacks {
            observer_id: registration.observer_id,
            connection,
            scope: registration.scope,
            shared: Arc::downgrade(shared),
        }
    }

    pub fn observer_id(&self) -> ObserverId {
        self.observer_id
    }

    /// Whether events sent through these callbacks still reach a client
    pub fn is_active(&self) -> bool {
        self.shared
            .upgrade()
            .map_or(false, |shared| shared.sessions.is_current(self.connection, self.scope))
    }

    pub fn on_open(&self) -> bool {
        self.deliver(MenuEvent::OpenMenu)
    }

    pub fn on_select(&self, target: InteractionTarget, path: &[usize]) -> bool {
        self.deliver(MenuEvent::SelectItem {
            target,
            path: path.to_vec(),
        })
    }

    pub fn on_hover(&self, target: InteractionTarget, path: &[usize]) -> bool {
        self.deliver(MenuEvent::HoverItem {
            target,
            path: path.to_vec(),
        })
    }

    pub fn on_cancel(&self) -> bool {
        self.deliver(MenuEvent::CancelMenu)
    }

    fn deliver(&self, event: MenuEvent) -> bool {
        let Some(shared) = self.shared.upgrade() else {
            return false;
        };
        let text = match encode_message(&event) {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to encode event: {}", e);
                return false;
            }
        };

        match shared
            .sessions
            .deliver(self.connection, self.scope, text, event.is_terminal())
        {
            Delivery::Sent => true,
            Delivery::SentAndEnded(observer_id) => {
                debug!("One-time observer on {} finished", self.connection);
                shared.stop_observing(observer_id);
                true
            }
            Delivery::Stale => {
                debug!(
                    "Dropping event for inactive observer {} on {}",
                    self.observer_id, self.connection
                );
                false
            }
        }
    }
}

// ============================================================================
// Server
// ============================================================================

struct Running {
    addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
}

/// IPC server handle owned by the host application
pub struct IpcServer {
    config: IpcConfig,
    shared: Arc<ServerShared>,
    running: Mutex<Option<Running>>,
    /// Serializes `start` so only one listener is ever bound
    starting: tokio::sync::Mutex<()>,
}

impl IpcServer {
    /// Create a new IPC server (does not start listening yet)
    pub fn new(config: IpcConfig) -> Self {
        IpcServer {
            config,
            shared: Arc::new(ServerShared {
                sessions: SessionRegistry::new(),
                emitter: EventEmitter::new(),
            }),
            running: Mutex::new(None),
            starting: tokio::sync::Mutex::new(()),
        }
    }

    fn lock_running(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscription surface for host events
    pub fn emitter(&self) -> &EventEmitter<HostEvent> {
        &self.shared.emitter
    }

    pub fn on_show_menu<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(&MenuItem, &MenuOptions, &ObserverCallbacks) + Send + Sync + 'static,
    {
        self.shared.emitter.on(HostEventKind::ShowMenu, move |event| {
            if let HostEvent::ShowMenu {
                menu,
                options,
                callbacks,
            } = event
            {
                handler(menu, options, callbacks);
            }
        })
    }

    pub fn on_start_observing<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(ObserverId, &ObserverCallbacks) + Send + Sync + 'static,
    {
        self.shared
            .emitter
            .on(HostEventKind::StartObserving, move |event| {
                if let HostEvent::StartObserving {
                    observer_id,
                    callbacks,
                } = event
                {
                    handler(*observer_id, callbacks);
                }
            })
    }

    pub fn on_stop_observing<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(ObserverId) + Send + Sync + 'static,
    {
        self.shared
            .emitter
            .on(HostEventKind::StopObserving, move |event| {
                if let HostEvent::StopObserving { observer_id } = event {
                    handler(*observer_id);
                }
            })
    }

    /// All host events as a channel
    pub fn events(&self) -> mpsc::UnboundedReceiver<HostEvent> {
        self.shared.emitter.events()
    }

    /// Bind the loopback socket, publish the discovery record and start accepting.
    ///
    /// Returns the bound address. Calling it on a running server returns the
    /// existing address.
    pub async fn start(&self) -> Result<SocketAddr, IpcError> {
        let _starting = self.starting.lock().await;
        if let Some(running) = self.lock_running().as_ref() {
            return Ok(running.addr);
        }

        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .map_err(IpcError::Bind)?;
        let addr = listener.local_addr().map_err(IpcError::Bind)?;

        let path = self.config.discovery_path();
        DiscoveryRecord::new(addr.port(), API_VERSION)
            .store(&path)
            .map_err(|source| IpcError::Discovery {
                path: path.clone(),
                source,
            })?;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let accept_task = tokio::spawn(accept_loop(listener, self.shared.clone(), shutdown_rx));

        info!(
            "IPC server listening on {} (discovery record: {})",
            addr,
            path.display()
        );
        *self.lock_running() = Some(Running {
            addr,
            shutdown,
            accept_task,
        });
        Ok(addr)
    }

    /// Stop accepting, release the socket and close every connection. Idempotent.
    pub fn stop(&self) {
        let Some(running) = self.lock_running().take() else {
            return;
        };

        let _ = running.shutdown.send(true);
        running.accept_task.abort();
        DiscoveryRecord::remove_if_owned(&self.config.discovery_path(), running.addr.port());
        info!("IPC server on {} stopped", running.addr);
    }

    pub fn is_running(&self) -> bool {
        self.lock_running().is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lock_running().as_ref().map(|running| running.addr)
    }

    pub fn discovery_path(&self) -> PathBuf {
        self.config.discovery_path()
    }

    /// Currently open connections
    pub fn connection_count(&self) -> usize {
        self.shared.sessions.len()
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn accept_loop(
    listener: TcpListener,
    shared: Arc<ServerShared>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let shared = shared.clone();
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(shared, stream, peer, shutdown).await {
                            debug!("Connection from {} ended: {}", peer, e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept IPC connection: {}", e);
                }
            },
            _ = shutdown.changed() => break,
        }
    }
    debug!("IPC accept loop stopped");
}

/// Serve one connection until it closes or the server shuts down
async fn handle_connection(
    shared: Arc<ServerShared>,
    stream: TcpStream,
    peer: SocketAddr,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let ws = accept_async(stream).await?;
    let (mut sink, mut source) = ws.split();

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
    let conn = shared.sessions.open(outbound_tx);
    info!(
        "IPC client {} connected from {} (total: {})",
        conn,
        peer,
        shared.sessions.len()
    );

    // Writer task: frames leave in the order they were queued
    let writer = tokio::spawn(async move {
        while let Some(text) = outbound_rx.recv().await {
            if let Err(e) = sink.send(Message::Text(text)).await {
                debug!("Failed to write to client: {}", e);
                break;
            }
        }
        let _ = sink.close().await;
    });

    if !*shutdown.borrow() {
        loop {
            tokio::select! {
                frame = source.next() => match frame {
                    Some(Ok(Message::Text(text))) => handle_frame(&shared, conn, &text),
                    Some(Ok(Message::Binary(bytes))) => {
                        handle_frame(&shared, conn, &String::from_utf8_lossy(&bytes))
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("Read error on {}: {}", conn, e);
                        break;
                    }
                },
                _ = shutdown.changed() => {
                    debug!("Closing {} for shutdown", conn);
                    break;
                }
            }
        }
    }

    // Removing the session drops the last sender, so the writer drains and closes
    if let Some(observer_id) = shared.sessions.close(conn) {
        debug!("Observer {} on {} disconnected", observer_id, conn);
        shared.stop_observing(observer_id);
    }
    let _ = writer.await;
    info!("IPC client {} disconnected", conn);
    Ok(())
}

/// Decode and route one inbound frame
fn handle_frame(shared: &Arc<ServerShared>, conn: ConnectionId, text: &str) {
    let request = match decode_request(text) {
        Ok(request) => request,
        Err(e) => {
            warn!("Malformed request on {}: {}", conn, e);
            shared.reply_error(conn, ErrorReason::MalformedRequest, e.to_string());
            return;
        }
    };

    match request {
        MenuRequest::ShowMenu { menu, options } => {
            let Some(registration) = shared.sessions.begin_one_time(conn) else {
                return;
            };
            if let Some(observer_id) = registration.displaced {
                debug!("show-menu on {} replaces observer {}", conn, observer_id);
                shared.stop_observing(observer_id);
            }

            debug!("{} requested menu '{}'", conn, menu.name);
            let callbacks = ObserverCallbacks::new(shared, conn, registration);
            let event = HostEvent::ShowMenu {
                menu,
                options,
                callbacks,
            };
            if shared.emitter.emit(&event) == 0 {
                warn!("No host handler for show-menu from {}", conn);
            }
        }
        MenuRequest::StartObserving => match shared.sessions.start_observing(conn) {
            Ok(registration) => {
                info!("{} is now observer {}", conn, registration.observer_id);
                let callbacks = ObserverCallbacks::new(shared, conn, registration);
                shared.emitter.emit(&HostEvent::StartObserving {
                    observer_id: registration.observer_id,
                    callbacks,
                });
            }
            Err(e) => reply_with(shared, conn, e),
        },
        MenuRequest::StopObserving => match shared.sessions.stop_observing(conn) {
            Ok(observer_id) => {
                info!("{} stopped observing (observer {})", conn, observer_id);
                shared.stop_observing(observer_id);
            }
            Err(e) => reply_with(shared, conn, e),
        },
    }
}

fn reply_with(shared: &ServerShared, conn: ConnectionId, error: IpcError) {
    match error.reason() {
        Some(reason) => {
            debug!("Rejecting request on {}: {}", conn, error);
            shared.reply_error(conn, reason, error.to_string());
        }
        None => error!("Request on {} failed: {}", conn, error),
    }
}
