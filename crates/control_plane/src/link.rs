//! Backend link: one remote-console session to one backend.
//!
//! A link performs the handshake, executes exactly one command at a time,
//! and tags its own connection state. It never retries: retry and backoff
//! policy belong to the Session Manager, which is the only component that
//! can serialize attempts against other commands and that knows the
//! per-backend schedule.

use crate::types::{BackendConfig, LinkState};
use rcon_client::{RconConnector, RconError, RconTransport};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// One backend's remote-console session and its state tag.
///
/// Exclusively owned by the Session Manager behind the per-backend
/// serialization slot; nothing else mutates the connection state.
pub struct BackendLink<C: RconConnector> {
    identity: String,
    config: BackendConfig,
    connector: Arc<C>,
    state: LinkState,
    transport: Option<C::Transport>,
}

impl<C: RconConnector> BackendLink<C> {
    /// Creates a link in `Disconnected` state; no network activity.
    pub fn new(identity: impl Into<String>, config: BackendConfig, connector: Arc<C>) -> Self {
        Self {
            identity: identity.into(),
            config,
            connector,
            state: LinkState::Disconnected,
            transport: None,
        }
    }

    /// Current connection state.
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// This link's configuration.
    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// Establishes the connection and performs the authentication
    /// handshake. Any existing session is torn down first, so this also
    /// serves as the reconnect path (state resets, identity persists).
    ///
    /// Fails with `Connect` (refused / unreachable / connect timeout) or
    /// `Auth` (rejected secret); on success the link is `Ready`.
    pub async fn connect(&mut self) -> Result<(), RconError> {
        if let Some(mut old) = self.transport.take() {
            old.close().await;
        }
        self.state = LinkState::Connecting;

        let mut transport = match self
            .connector
            .connect(&self.config.host, self.config.port)
            .await
        {
            Ok(transport) => transport,
            Err(e) => {
                self.state = LinkState::Disconnected;
                return Err(e);
            }
        };

        if let Err(e) = transport
            .authenticate(&self.config.password, self.config.command_timeout())
            .await
        {
            transport.close().await;
            self.state = LinkState::Disconnected;
            warn!("🔒 Backend '{}' rejected or failed handshake: {}", self.identity, e);
            return Err(e);
        }

        self.transport = Some(transport);
        self.state = LinkState::Ready;
        info!(
            "🔗 Backend '{}' connected at {}:{}",
            self.identity, self.config.host, self.config.port
        );
        Ok(())
    }

    /// Executes one command with the configured timeout.
    ///
    /// `Timeout` marks the link `Degraded` (not closed - the caller
    /// decides whether to reconnect); `Protocol` tears the session down
    /// because the framing can no longer be trusted; calling while not
    /// `Ready` is `Closed`.
    pub async fn execute(&mut self, command: &str) -> Result<String, RconError> {
        if self.state != LinkState::Ready {
            return Err(RconError::Closed);
        }
        let transport = self.transport.as_mut().ok_or(RconError::Closed)?;

        match transport.send(command, self.config.command_timeout()).await {
            Ok(payload) => Ok(payload),
            Err(e @ RconError::Timeout(_)) => {
                self.state = LinkState::Degraded;
                Err(e)
            }
            Err(e @ RconError::Protocol(_)) => {
                if let Some(mut broken) = self.transport.take() {
                    broken.close().await;
                }
                self.state = LinkState::Disconnected;
                Err(e)
            }
            Err(e) => {
                self.state = LinkState::Disconnected;
                Err(e)
            }
        }
    }

    /// Lightweight health check: runs the configured probe command and
    /// reports the round-trip latency. Same failure modes as [`execute`].
    /// Used exclusively by the status poller.
    ///
    /// [`execute`]: BackendLink::execute
    pub async fn probe(&mut self) -> Result<(Duration, String), RconError> {
        let probe_command = self.config.probe_command.clone();
        let started = Instant::now();
        let payload = self.execute(&probe_command).await?;
        Ok((started.elapsed(), payload))
    }

    /// Releases the connection. Idempotent and safe from any state.
    pub async fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close().await;
            debug!("🔌 Backend '{}' link closed", self.identity);
        }
        self.state = LinkState::Closed;
    }
}
