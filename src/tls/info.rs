//! Negotiated session parameters
//!
//! A snapshot of what the handshake agreed on, logged when a session is
//! established and available to callers for diagnostics.

use super::cert::{presented_chain, CertInfo};
use super::handshake::Role;
use openssl::ssl::SslRef;

/// Parameters of an established session
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Negotiated TLS version (e.g., "TLSv1.2")
    pub version: String,

    /// Negotiated cipher suite
    pub cipher: String,

    /// Certificates presented by the peer (index 0 is the leaf)
    pub peer_chain: Vec<CertInfo>,
}

impl SessionInfo {
    pub fn from_ssl(ssl: &SslRef, role: Role) -> Self {
        SessionInfo {
            version: ssl.version_str().to_string(),
            cipher: ssl
                .current_cipher()
                .map(|c| c.name().to_string())
                .unwrap_or_else(|| "<none>".to_string()),
            peer_chain: presented_chain(ssl, role)
                .iter()
                .map(|cert| CertInfo::from_x509_ref(cert))
                .collect(),
        }
    }
}
