//! TCP transport for the remote-console protocol.
//!
//! One `TcpTransport` is one authenticated session to one backend. The
//! control plane guarantees that only a single command is in flight per
//! transport, so the read path never has to demultiplex interleaved
//! responses.

use crate::packet::{Packet, PacketType};
use crate::{RconConnector, RconError, RconTransport};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Default time allowed for the TCP connect itself.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connector producing real TCP transports.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    connect_timeout: Duration,
}

impl TcpConnector {
    /// Creates a connector with the default connect timeout.
    pub fn new() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Overrides the time allowed for establishing the TCP connection.
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RconConnector for TcpConnector {
    type Transport = TcpTransport;

    async fn connect(&self, host: &str, port: u16) -> Result<TcpTransport, RconError> {
        let addr = format!("{host}:{port}");
        debug!("🔌 Connecting to backend at {}", addr);

        let stream = match timeout(self.connect_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(RconError::Connect(format!("{addr}: {e}"))),
            Err(_) => {
                return Err(RconError::Connect(format!(
                    "{addr}: connect timed out after {:?}",
                    self.connect_timeout
                )))
            }
        };

        // Command responses are small and latency matters more than
        // throughput on an admin channel.
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY for {}: {}", addr, e);
        }

        Ok(TcpTransport {
            stream: Some(stream),
            next_request_id: 1,
        })
    }
}

/// One live TCP remote-console session.
pub struct TcpTransport {
    /// The connection, or `None` once closed.
    stream: Option<TcpStream>,
    /// Monotonically increasing request id; the backend echoes it back.
    next_request_id: i32,
}

impl TcpTransport {
    fn take_request_id(&mut self) -> i32 {
        let id = self.next_request_id;
        // Wrap positive: negative ids collide with the auth-refusal marker.
        self.next_request_id = if id == i32::MAX { 1 } else { id + 1 };
        id
    }

    /// Writes one packet and reads one packet, all under `limit`.
    async fn round_trip(&mut self, request: Packet, limit: Duration) -> Result<Packet, RconError> {
        let stream = self.stream.as_mut().ok_or(RconError::Closed)?;
        let bytes = request.encode()?;

        let exchange = async {
            stream
                .write_all(&bytes)
                .await
                .map_err(|e| RconError::Protocol(format!("write failed: {e}")))?;

            let mut prefix = [0u8; 4];
            stream
                .read_exact(&mut prefix)
                .await
                .map_err(|e| RconError::Protocol(format!("read failed: {e}")))?;
            let length = Packet::validate_length(prefix)?;

            let mut body = vec![0u8; length];
            stream
                .read_exact(&mut body)
                .await
                .map_err(|e| RconError::Protocol(format!("read failed: {e}")))?;
            Packet::decode(&body)
        };

        match timeout(limit, exchange).await {
            Ok(result) => result,
            Err(_) => {
                // The response may still arrive later and would desync the
                // session, so a timed-out transport must not be reused.
                self.stream = None;
                Err(RconError::Timeout(limit))
            }
        }
    }
}

#[async_trait]
impl RconTransport for TcpTransport {
    async fn authenticate(&mut self, secret: &str, limit: Duration) -> Result<(), RconError> {
        let request_id = self.take_request_id();
        let mut response = self
            .round_trip(Packet::auth(request_id, secret), limit)
            .await?;

        // Some backends send an empty RESPONSE_VALUE before the actual
        // auth response; skip past it.
        if response.packet_type == PacketType::ResponseValue {
            let stream = self.stream.as_mut().ok_or(RconError::Closed)?;
            let follow_up = async {
                let mut prefix = [0u8; 4];
                stream
                    .read_exact(&mut prefix)
                    .await
                    .map_err(|e| RconError::Protocol(format!("read failed: {e}")))?;
                let length = Packet::validate_length(prefix)?;
                let mut body = vec![0u8; length];
                stream
                    .read_exact(&mut body)
                    .await
                    .map_err(|e| RconError::Protocol(format!("read failed: {e}")))?;
                Packet::decode(&body)
            };
            response = match timeout(limit, follow_up).await {
                Ok(result) => result?,
                Err(_) => {
                    self.stream = None;
                    return Err(RconError::Timeout(limit));
                }
            };
        }

        if response.packet_type != PacketType::ExecOrAuthResponse {
            return Err(RconError::Protocol(format!(
                "expected auth response, got {:?}",
                response.packet_type
            )));
        }
        if response.request_id == -1 {
            self.close().await;
            return Err(RconError::Auth);
        }
        if response.request_id != request_id {
            return Err(RconError::Protocol(format!(
                "auth response id {} does not match request id {}",
                response.request_id, request_id
            )));
        }

        debug!("🔑 Backend authentication succeeded");
        Ok(())
    }

    async fn send(&mut self, command: &str, limit: Duration) -> Result<String, RconError> {
        let request_id = self.take_request_id();
        let response = self
            .round_trip(Packet::exec(request_id, command), limit)
            .await?;

        if response.packet_type != PacketType::ResponseValue {
            return Err(RconError::Protocol(format!(
                "expected command response, got {:?}",
                response.packet_type
            )));
        }
        if response.request_id != request_id {
            return Err(RconError::Protocol(format!(
                "response id {} does not match request id {}",
                response.request_id, request_id
            )));
        }

        Ok(response.body)
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
            debug!("👋 Remote-console session closed");
        }
    }
}
