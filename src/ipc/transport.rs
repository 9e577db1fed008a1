//! # Client Transport
//!
//! The small surface clients need from a socket: `connect`, `send`, `close`,
//! plus handler callbacks for open/message/error/close. There is exactly one
//! implementation per target, picked at build time through [`PlatformTransport`].
//!
//! - **Version**: 1.0.0
//! - **Since**: 2.0.0

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use log::debug;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

/// Transport used by the reference clients on this target
pub type PlatformTransport = WsTransport;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("could not connect: {0}")]
    Connect(String),

    #[error("no connection within {0:?}")]
    Timeout(Duration),

    #[error("transport is closed")]
    Closed,

    #[error("transport error: {0}")]
    Protocol(String),
}

/// Receives transport lifecycle callbacks, all invoked from the transport's tasks
pub trait TransportHandler: Send + Sync + 'static {
    fn on_open(&self) {}

    /// One complete text frame
    fn on_message(&self, text: String);

    /// Failure after the connection was established
    fn on_error(&self, error: TransportError);

    fn on_close(&self) {}
}

#[async_trait]
pub trait Transport: Send + Sync + Sized {
    /// Resolves once the connection is established or has failed
    async fn connect(
        addr: SocketAddr,
        connect_timeout: Duration,
        handler: Arc<dyn TransportHandler>,
    ) -> Result<Self, TransportError>;

    fn send(&self, text: String) -> Result<(), TransportError>;

    /// Release the connection; safe to call repeatedly
    fn close(&self);

    fn is_open(&self) -> bool;
}

enum Outgoing {
    Text(String),
    Close,
}

/// WebSocket transport over loopback TCP
pub struct WsTransport {
    outbound: mpsc::UnboundedSender<Outgoing>,
    open: Arc<AtomicBool>,
    peer: SocketAddr,
}

impl WsTransport {
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(
        addr: SocketAddr,
        connect_timeout: Duration,
        handler: Arc<dyn TransportHandler>,
    ) -> Result<Self, TransportError> {
        let url = format!("ws://{}", addr);
        let stream = match timeout(connect_timeout, connect_async(url)).await {
            Err(_) => return Err(TransportError::Timeout(connect_timeout)),
            Ok(Err(e)) => return Err(TransportError::Connect(e.to_string())),
            Ok(Ok((stream, _response))) => stream,
        };

        debug!("WebSocket connected to {}", addr);
        let open = Arc::new(AtomicBool::new(true));
        handler.on_open();

        let (mut sink, mut source) = stream.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Outgoing>();

        // Writer task
        tokio::spawn(async move {
            while let Some(outgoing) = outbound_rx.recv().await {
                match outgoing {
                    Outgoing::Text(text) => {
                        if let Err(e) = sink.send(Message::Text(text)).await {
                            debug!("Failed to write frame: {}", e);
                            break;
                        }
                    }
                    Outgoing::Close => break,
                }
            }
            let _ = sink.close().await;
        });

        // Reader task
        let reader_open = open.clone();
        tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                match frame {
                    Ok(Message::Text(text)) => handler.on_message(text),
                    Ok(Message::Binary(bytes)) => {
                        handler.on_message(String::from_utf8_lossy(&bytes).into_owned())
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        if reader_open.load(Ordering::SeqCst) {
                            handler.on_error(TransportError::Protocol(e.to_string()));
                        }
                        break;
                    }
                }
            }
            reader_open.store(false, Ordering::SeqCst);
            handler.on_close();
        });

        Ok(WsTransport {
            outbound,
            open,
            peer: addr,
        })
    }

    fn send(&self, text: String) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        self.outbound
            .send(Outgoing::Text(text))
            .map_err(|_| TransportError::Closed)
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            let _ = self.outbound.send(Outgoing::Close);
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.outbound.is_closed()
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.close();
    }
}
