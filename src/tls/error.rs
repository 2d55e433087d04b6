//! TLS error taxonomy
//!
//! This module defines the errors returned by factories and sessions, and
//! the translation from OpenSSL result codes into them.

use super::handshake::SessionState;
use crate::transport::Interest;
use openssl::error::ErrorStack;
use openssl::ssl::{self, ErrorCode};
use std::os::raw::c_int;

/// TLS errors
///
/// `WouldBlockRead` and `WouldBlockWrite` are retry signals, not failures.
/// Any other error returned by a session operation leaves the session
/// unusable.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("TLS engine error: {0}")]
    Engine(String),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Operation would block until the transport is readable")]
    WouldBlockRead,

    #[error("Operation would block until the transport is writable")]
    WouldBlockWrite,

    #[error("Connection closed without a TLS close notification")]
    ConnectionClosed,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{operation} is not allowed in state {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    #[error("Peer presented no certificate")]
    NoPeerCertificate,

    #[error("Certificate is not yet valid")]
    CertificateNotYetValid,

    #[error("Certificate has expired")]
    CertificateExpired,

    #[error("Wrong number of certificates in peer chain: {0}")]
    WrongChainLength(usize),

    #[error("No distinct identity certificate found")]
    NoDistinctIdentityCertificate,

    #[error("Connection certificate is not signed by the identity key")]
    SignatureVerificationFailed,
}

impl TlsError {
    /// Whether this is a retry signal rather than a failure
    pub fn is_would_block(&self) -> bool {
        matches!(self, TlsError::WouldBlockRead | TlsError::WouldBlockWrite)
    }

    /// Readiness to wait for before retrying, for would-block errors
    pub fn interest(&self) -> Option<Interest> {
        match self {
            TlsError::WouldBlockRead => Some(Interest::Read),
            TlsError::WouldBlockWrite => Some(Interest::Write),
            _ => None,
        }
    }

    pub(crate) fn would_block(interest: Interest) -> Self {
        match interest {
            Interest::Read => TlsError::WouldBlockRead,
            Interest::Write => TlsError::WouldBlockWrite,
        }
    }

    pub(crate) fn engine(stack: ErrorStack) -> Self {
        TlsError::Engine(stack.to_string())
    }
}

/// Why an engine call did not complete
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Interrupted {
    /// The peer sent a close notification
    ZeroReturn,
    /// The transport hit EOF or a reset without a close notification
    TransportClosed,
    /// The engine needs transport readiness before it can make progress
    WouldBlock(Interest),
    /// Unrecoverable engine failure
    Fatal(String),
}

/// Classify an OpenSSL error returned by a handshake, record or shutdown call
pub(crate) fn classify(err: &ssl::Error) -> Interrupted {
    match err.code() {
        ErrorCode::ZERO_RETURN => Interrupted::ZeroReturn,
        ErrorCode::WANT_READ => Interrupted::WouldBlock(Interest::Read),
        ErrorCode::WANT_WRITE => Interrupted::WouldBlock(Interest::Write),
        ErrorCode::SYSCALL => Interrupted::TransportClosed,
        ErrorCode::SSL if is_unexpected_eof(err) => Interrupted::TransportClosed,
        _ => Interrupted::Fatal(err.to_string()),
    }
}

/// `ERR_LIB_SSL`
const LIB_SSL: c_int = 20;
/// `SSL_R_UNEXPECTED_EOF_WHILE_READING`, OpenSSL 3 only
const UNEXPECTED_EOF_WHILE_READING: c_int = 294;

// OpenSSL 3 reports a bare EOF as a protocol error instead of SYSCALL.
fn is_unexpected_eof(err: &ssl::Error) -> bool {
    err.ssl_error().map_or(false, |stack| {
        stack
            .errors()
            .iter()
            .any(|e| is_unexpected_eof_code(e.library_code(), e.reason_code()))
    })
}

fn is_unexpected_eof_code(library: c_int, reason: c_int) -> bool {
    library == LIB_SSL && reason == UNEXPECTED_EOF_WHILE_READING
}
