//! Scripted in-memory connector for exercising the session layer without
//! a real backend.
//!
//! Behavior is driven by two script queues (connect attempts and command
//! exchanges) plus a default for each once its queue runs dry. A
//! [`FakeHandle`] cloned off the connector lets a test re-script mid-run
//! and inspect what the control plane actually did on the wire.

use async_trait::async_trait;
use rcon_client::{RconConnector, RconError, RconTransport};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What one connect attempt should do.
#[derive(Debug, Clone)]
pub enum ConnectScript {
    /// TCP connect and handshake both succeed.
    Accept,
    /// The connect itself fails (refused / unreachable).
    RefuseConnect,
    /// The connect succeeds but the handshake is rejected.
    RefuseAuth,
}

/// What one command exchange should do.
#[derive(Debug, Clone)]
pub enum CommandScript {
    /// Answer with `payload` after holding the exchange for `latency`.
    Reply { payload: String, latency: Duration },
    /// Report a command timeout.
    TimeOut,
    /// Report a framing violation.
    Garble,
}

struct Inner {
    connects: Mutex<VecDeque<ConnectScript>>,
    default_connect: Mutex<ConnectScript>,
    commands: Mutex<VecDeque<CommandScript>>,
    default_command: Mutex<CommandScript>,
    connect_attempts: AtomicU32,
    executed: Mutex<Vec<String>>,
}

impl Inner {
    fn next_connect(&self) -> ConnectScript {
        self.connects
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default_connect.lock().unwrap().clone())
    }

    fn next_command(&self) -> CommandScript {
        self.commands
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default_command.lock().unwrap().clone())
    }
}

/// Scripted stand-in for `rcon_client::TcpConnector`.
pub struct FakeConnector {
    inner: Arc<Inner>,
}

impl FakeConnector {
    /// A connector that accepts every connect and echoes every command
    /// with no latency, until scripted otherwise.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                connects: Mutex::new(VecDeque::new()),
                default_connect: Mutex::new(ConnectScript::Accept),
                commands: Mutex::new(VecDeque::new()),
                default_command: Mutex::new(CommandScript::Reply {
                    payload: "ok".to_string(),
                    latency: Duration::ZERO,
                }),
                connect_attempts: AtomicU32::new(0),
                executed: Mutex::new(Vec::new()),
            }),
        }
    }

    /// A control handle that stays usable after the connector moves into
    /// the session manager.
    pub fn handle(&self) -> FakeHandle {
        FakeHandle {
            inner: self.inner.clone(),
        }
    }
}

/// Scripting and inspection side of a [`FakeConnector`].
#[derive(Clone)]
pub struct FakeHandle {
    inner: Arc<Inner>,
}

#[allow(dead_code)]
impl FakeHandle {
    /// Queues the behavior of the next connect attempt.
    pub fn script_connect(&self, script: ConnectScript) {
        self.inner.connects.lock().unwrap().push_back(script);
    }

    /// Sets the behavior of connect attempts once the queue is empty.
    pub fn set_default_connect(&self, script: ConnectScript) {
        *self.inner.default_connect.lock().unwrap() = script;
    }

    /// Queues the behavior of the next command exchange.
    pub fn script_command(&self, script: CommandScript) {
        self.inner.commands.lock().unwrap().push_back(script);
    }

    /// Sets the behavior of command exchanges once the queue is empty.
    pub fn set_default_command(&self, script: CommandScript) {
        *self.inner.default_command.lock().unwrap() = script;
    }

    /// Shorthand: every command answers `payload` after `latency`.
    pub fn reply_with(&self, payload: &str, latency: Duration) {
        self.set_default_command(CommandScript::Reply {
            payload: payload.to_string(),
            latency,
        });
    }

    /// Total connect attempts observed so far.
    pub fn connect_attempts(&self) -> u32 {
        self.inner.connect_attempts.load(Ordering::SeqCst)
    }

    /// Commands that reached a transport, in execution order.
    pub fn executed(&self) -> Vec<String> {
        self.inner.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl RconConnector for FakeConnector {
    type Transport = FakeTransport;

    async fn connect(&self, _host: &str, _port: u16) -> Result<Self::Transport, RconError> {
        self.inner.connect_attempts.fetch_add(1, Ordering::SeqCst);
        match self.inner.next_connect() {
            ConnectScript::Accept => Ok(FakeTransport {
                inner: self.inner.clone(),
                refuse_auth: false,
            }),
            ConnectScript::RefuseConnect => {
                Err(RconError::Connect("connection refused".to_string()))
            }
            ConnectScript::RefuseAuth => Ok(FakeTransport {
                inner: self.inner.clone(),
                refuse_auth: true,
            }),
        }
    }
}

/// Transport half of the scripted connector.
pub struct FakeTransport {
    inner: Arc<Inner>,
    refuse_auth: bool,
}

#[async_trait]
impl RconTransport for FakeTransport {
    async fn authenticate(&mut self, _secret: &str, _timeout: Duration) -> Result<(), RconError> {
        if self.refuse_auth {
            Err(RconError::Auth)
        } else {
            Ok(())
        }
    }

    async fn send(&mut self, command: &str, timeout: Duration) -> Result<String, RconError> {
        self.inner.executed.lock().unwrap().push(command.to_string());
        match self.inner.next_command() {
            CommandScript::Reply { payload, latency } => {
                tokio::time::sleep(latency).await;
                Ok(payload)
            }
            CommandScript::TimeOut => Err(RconError::Timeout(timeout)),
            CommandScript::Garble => {
                Err(RconError::Protocol("unexpected packet type".to_string()))
            }
        }
    }

    async fn close(&mut self) {}
}
