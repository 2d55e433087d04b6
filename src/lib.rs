//! relay-tls - TLS session management for a message-relay network
//!
//! This crate wraps OpenSSL with a non-blocking connection lifecycle
//! (handshake, read, write, renegotiation, shutdown) and a two-certificate
//! identity protocol that binds a per-connection key to a long-term
//! identity key.

pub mod tls;
pub mod transport;
