//! Caller-input error taxonomy for the session layer.
//!
//! These are the errors surfaced synchronously to the calling request.
//! Link-layer failures (connect, auth, timeout, protocol) are deliberately
//! absent: those are absorbed into backoff state and reported through
//! [`crate::types::CommandOutcome`], never as a `Result` error.

use thiserror::Error;

/// Errors a caller can provoke against the Session Manager.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProxyError {
    /// A backend with this identity is already registered.
    #[error("backend '{0}' is already registered")]
    DuplicateBackend(String),

    /// No backend with this identity is registered.
    #[error("backend '{0}' is not registered")]
    UnknownBackend(String),

    /// The backend was deregistered while this command was queued or in
    /// flight; the command did not complete.
    #[error("backend '{0}' was removed while the command was pending")]
    BackendRemoved(String),
}
