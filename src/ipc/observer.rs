//! # Observer Client
//!
//! Registers explicitly for the interaction events of every menu the host
//! shows, until it stops observing or disconnects.
//!
//! - **Version**: 1.0.0
//! - **Since**: 2.0.0

use crate::core::IpcConfig;
use crate::ipc::client::{ClientConnection, ClientEvent};
use crate::ipc::emitter::{EventEmitter, ListenerId};
use crate::ipc::error::IpcError;
use crate::ipc::protocol::{ErrorReason, InteractionTarget, MenuRequest};
use tokio::sync::mpsc;

pub struct ObserverClient {
    connection: ClientConnection,
}

impl ObserverClient {
    pub fn new(port: u16, api_version: u32) -> Self {
        Self::with_config(port, api_version, &IpcConfig::default())
    }

    pub fn with_config(port: u16, api_version: u32, config: &IpcConfig) -> Self {
        ObserverClient {
            connection: ClientConnection::new(port, api_version, config.connect_timeout, true),
        }
    }

    pub fn discover(config: &IpcConfig) -> Result<Self, IpcError> {
        Ok(ObserverClient {
            connection: ClientConnection::discover(config, true)?,
        })
    }

    pub async fn init(&self) -> Result<(), IpcError> {
        self.connection.init().await
    }

    /// Register as a persistent observer; the host answers with events or an error
    pub fn start_observing(&self) -> bool {
        self.connection.send(&MenuRequest::StartObserving)
    }

    pub fn stop_observing(&self) -> bool {
        self.connection.send(&MenuRequest::StopObserving)
    }

    /// Disconnect; the host drops the registration on its own
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

    pub fn on_open<F>(&self, handler: F) -> ListenerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.emitter().on_open(handler)
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

impl Drop for ObserverClient {
    fn drop(&mut self) {
        self.connection.close();
    }
}
