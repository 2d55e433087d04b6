//! Non-blocking TLS sessions with identity verification
//!
//! This module wraps OpenSSL with the connection lifecycle used between
//! relay nodes. Every operation is a single non-blocking attempt; when the
//! engine needs the socket to become readable or writable the operation
//! returns [`TlsError::WouldBlockRead`] or [`TlsError::WouldBlockWrite`] and
//! the caller polls the descriptor before calling again.
//!
//! # Architecture
//!
//! 1. `ConnectionFactory` holds the shared engine configuration (cipher
//!    policy, certificate chain, private key, DH parameters)
//! 2. `Session` owns one engine instance bound to a borrowed socket and
//!    runs the `Fresh -> Handshaking -> Established -> ShuttingDown -> Closed`
//!    state machine
//! 3. `cert` implements the two-certificate identity check: the peer
//!    presents a short-lived connection certificate signed by its long-term
//!    identity key
//!
//! # Examples
//!
//! ```no_run
//! use relay_tls::tls::{ConnectionFactory, Role, TlsError};
//! use std::net::TcpStream;
//!
//! let factory = ConnectionFactory::client().unwrap();
//! let stream = TcpStream::connect("10.0.0.1:48099").unwrap();
//! stream.set_nonblocking(true).unwrap();
//!
//! let mut session = factory.create_session(&stream, Role::Client, false).unwrap();
//! loop {
//!     match session.drive_handshake() {
//!         Ok(()) => break,
//!         Err(e) if e.is_would_block() => {
//!             session.wait_for(&e, None).unwrap();
//!         }
//!         Err(e) => panic!("handshake failed: {}", e),
//!     }
//! }
//!
//! let identity = session.verify_identity_chain().unwrap();
//! println!("peer identity: {:02x?}", identity.digest().unwrap());
//! ```

pub mod cert;
pub mod config;
pub mod error;
pub mod handshake;
pub mod info;
pub mod keys;
pub mod session;

#[cfg(test)]
pub(crate) mod test_support;

pub use cert::{CertInfo, CertificateLifetime};
pub use config::{ConnectionFactory, FactoryConfig};
pub use error::TlsError;
pub use handshake::{Role, SessionState, ShutdownStatus};
pub use info::SessionInfo;
pub use keys::{PrivateKey, PublicKey};
pub use session::{ByteCounters, Session};

/// Result type for TLS operations
pub type Result<T> = std::result::Result<T, TlsError>;
