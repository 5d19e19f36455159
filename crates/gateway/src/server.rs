//! WebSocket server: accepts control-panel clients and bridges their JSON
//! frames onto the control plane.
//!
//! Each connection gets a reader task (request frames in) and a writer
//! task (response and push frames out) joined by a bounded channel. A
//! subscribed connection additionally runs a forwarder task copying hub
//! events into that channel; a client too slow to drain it backpressures
//! only its own forwarder, which in turn lets the hub drop or evict that
//! one subscriber.

use crate::error::GatewayError;
use crate::messages::{ClientFrame, ServerFrame};
use control_plane::SessionManager;
use futures::{SinkExt, StreamExt};
use rcon_client::RconConnector;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Outbound frames queued per connection before the writer backpressures.
const OUTBOUND_QUEUE: usize = 64;

/// The WebSocket surface over one [`SessionManager`].
pub struct Gateway<C: RconConnector> {
    listener: TcpListener,
    manager: Arc<SessionManager<C>>,
}

impl<C: RconConnector> Gateway<C> {
    /// Binds the listen socket. The accept loop starts with [`run`].
    ///
    /// [`run`]: Gateway::run
    pub async fn bind(
        addr: &str,
        manager: Arc<SessionManager<C>>,
    ) -> Result<Self, GatewayError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| GatewayError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        Ok(Self { listener, manager })
    }

    /// The bound address (useful when binding port 0).
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts clients until the task is cancelled. Each connection is
    /// served by its own task; a failing connection never affects others.
    pub async fn run(self) {
        if let Ok(addr) = self.listener.local_addr() {
            info!("🌐 Gateway listening on {}", addr);
        }
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    let manager = self.manager.clone();
                    tokio::spawn(async move {
                        handle_client(stream, addr, manager).await;
                    });
                }
                Err(e) => {
                    warn!("🌐 Accept failed: {}", e);
                }
            }
        }
    }
}

/// Serves one control-panel connection from handshake to close.
async fn handle_client<C: RconConnector>(
    stream: TcpStream,
    addr: SocketAddr,
    manager: Arc<SessionManager<C>>,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            error!("🌐 Handshake with {} failed: {}", addr, e);
            return;
        }
    };
    info!("🌐 Control panel connected from {}", addr);

    let (mut sink, mut receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::channel::<ServerFrame>(OUTBOUND_QUEUE);

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let json = match serde_json::to_string(&frame) {
                Ok(json) => json,
                Err(e) => {
                    error!("🌐 Failed to serialize outbound frame: {}", e);
                    continue;
                }
            };
            if sink.send(Message::text(json)).await.is_err() {
                break;
            }
        }
        let _ = sink.send(Message::Close(None)).await;
    });

    let mut subscription: Option<(Uuid, JoinHandle<()>)> = None;

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let frame = match serde_json::from_str::<ClientFrame>(text.as_str()) {
                    Ok(frame) => frame,
                    Err(e) => {
                        debug!("🌐 Malformed frame from {}: {}", addr, e);
                        if tx
                            .send(ServerFrame::error("malformed_frame", e.to_string()))
                            .await
                            .is_err()
                        {
                            break;
                        }
                        continue;
                    }
                };
                if handle_frame(frame, &manager, &tx, &mut subscription)
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Ok(Message::Close(_)) => {
                debug!("🌐 {} requested close", addr);
                break;
            }
            // Pings are answered by the protocol layer on the next write.
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(_) => {
                warn!("🌐 Unsupported message type from {}", addr);
            }
            Err(e) => {
                debug!("🌐 Connection error from {}: {}", addr, e);
                break;
            }
        }
    }

    if let Some((id, forwarder)) = subscription.take() {
        manager.hub().unsubscribe_id(id);
        forwarder.abort();
    }
    drop(tx);
    let _ = writer.await;
    info!("🌐 Control panel at {} disconnected", addr);
}

/// Dispatches one request frame. `Err` means the connection is gone.
async fn handle_frame<C: RconConnector>(
    frame: ClientFrame,
    manager: &Arc<SessionManager<C>>,
    tx: &mpsc::Sender<ServerFrame>,
    subscription: &mut Option<(Uuid, JoinHandle<()>)>,
) -> Result<(), ()> {
    let response = match frame {
        ClientFrame::RegisterServer { name, config } => match manager.register(&name, config) {
            Ok(()) => ServerFrame::Registered { name },
            Err(e) => e.into(),
        },
        ClientFrame::DeregisterServer { name } => match manager.deregister(&name).await {
            Ok(()) => ServerFrame::Deregistered { name },
            Err(e) => e.into(),
        },
        ClientFrame::RunCommand {
            name,
            command,
            correlation_id,
        } => {
            let correlation_id =
                correlation_id.unwrap_or_else(|| Uuid::new_v4().to_string());
            match manager.execute(&name, &command, &correlation_id).await {
                Ok(result) => ServerFrame::CommandResult { result },
                Err(e) => e.into(),
            }
        }
        ClientFrame::GetStatus { name } => match manager.current_state(&name) {
            Ok(snapshot) => ServerFrame::ServerStatus { snapshot },
            Err(e) => e.into(),
        },
        ClientFrame::ListServers => ServerFrame::ServerList {
            servers: manager.list_servers(),
        },
        ClientFrame::Subscribe => {
            if subscription.is_none() {
                *subscription = Some(spawn_forwarder(manager, tx.clone()));
            }
            ServerFrame::Subscribed
        }
        ClientFrame::Ping => ServerFrame::Pong {
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
    };

    tx.send(response).await.map_err(|_| ())
}

/// Attaches the connection to the hub and copies events into its
/// outbound queue until the hub closes the subscription or the
/// connection goes away.
fn spawn_forwarder<C: RconConnector>(
    manager: &Arc<SessionManager<C>>,
    tx: mpsc::Sender<ServerFrame>,
) -> (Uuid, JoinHandle<()>) {
    let mut handle = manager.hub().subscribe();
    let id = handle.id();

    let task = tokio::spawn(async move {
        while let Some(event) = handle.recv().await {
            if handle.take_missed_events()
                && tx.send(ServerFrame::MissedEvents).await.is_err()
            {
                return;
            }
            if tx.send(ServerFrame::Event { event }).await.is_err() {
                return;
            }
        }
        // The hub closed the queue: this subscriber was evicted for
        // falling too far behind.
        let _ = tx.send(ServerFrame::MissedEvents).await;
    });

    (id, task)
}
