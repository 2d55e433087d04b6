//! Handshake state machine types
//!
//! The engine itself runs the TLS handshake; this module holds the states a
//! session moves through and the renegotiation hook the safe OpenSSL
//! wrapper does not expose.

use foreign_types_shared::ForeignTypeRef;
use openssl::error::ErrorStack;
use openssl::ssl::SslRef;
use std::fmt;

/// Which side of the handshake a session plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Initiates the handshake
    Client,
    /// Accepts the handshake and presents the certificate chain
    Server,
}

/// Session lifecycle state
///
/// `Fresh -> Handshaking -> Established -> ShuttingDown -> Closed`, with
/// `Failed` reachable from any state once a non-retryable error occurs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Fresh,
    Handshaking,
    Established,
    ShuttingDown,
    Closed,
    Failed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Fresh => "Fresh",
            SessionState::Handshaking => "Handshaking",
            SessionState::Established => "Established",
            SessionState::ShuttingDown => "ShuttingDown",
            SessionState::Closed => "Closed",
            SessionState::Failed => "Failed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of the closing handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownStatus {
    /// Our close notification is out; the peer's has not arrived yet
    Incomplete,
    /// Both close notifications exchanged (or the transport is gone)
    Complete,
}

extern "C" {
    fn SSL_renegotiate(s: *mut openssl_sys::SSL) -> libc::c_int;
}

/// Mark `ssl` for renegotiation. No I/O happens until the next handshake call.
pub(crate) fn mark_renegotiation(ssl: &SslRef) -> Result<(), ErrorStack> {
    let r = unsafe { SSL_renegotiate(ssl.as_ptr()) };
    if r == 1 {
        Ok(())
    } else {
        Err(ErrorStack::get())
    }
}
