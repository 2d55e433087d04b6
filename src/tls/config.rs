//! TLS configuration
//!
//! This module provides the connection factory: the shared, immutable engine
//! configuration every session is created from, and its builder.

use super::handshake::Role;
use super::keys::PrivateKey;
use super::session::Session;
use super::{Result, TlsError};
use crate::transport::FdTransport;
use log::{debug, trace};
use openssl::dh::Dh;
use openssl::error::ErrorStack;
use openssl::pkey::Params;
use openssl::ssl::{
    SslContext, SslContextBuilder, SslMethod, SslMode, SslOptions, SslSessionCacheMode,
    SslVerifyMode, SslVersion,
};
use openssl::x509::X509;
use std::fs::File;
use std::io::Read;
use std::os::fd::AsFd;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// The single ephemeral-DH, authenticated suite offered by default
pub const DHE_CIPHER: &str = "DHE-RSA-AES128-GCM-SHA256";

/// Non-ephemeral fallback accepted by servers that allow legacy clients
pub const LEGACY_CIPHER: &str = "AES128-GCM-SHA256";

// SSL_OP_ALLOW_CLIENT_RENEGOTIATION (OpenSSL 3 refuses client-initiated
// renegotiation without it; the bit is unused by earlier versions).
const ALLOW_CLIENT_RENEGOTIATION: u64 = 0x0000_0100;

fn read_file(path: &Path) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    File::open(path)
        .and_then(|mut f| f.read_to_end(&mut data))
        .map_err(|e| TlsError::Configuration(format!("{}: {}", path.display(), e)))?;
    Ok(data)
}

fn config_err(what: &'static str) -> impl FnOnce(ErrorStack) -> TlsError {
    move |e| TlsError::Configuration(format!("{}: {}", what, e))
}

/// Factory configuration builder
///
/// A builder with a certificate chain yields a server-capable factory;
/// without one the factory can only create client sessions.
#[derive(Default)]
pub struct FactoryConfig {
    chain: Vec<X509>,
    key: Option<PrivateKey>,
    dh: Option<Dh<Params>>,
    request_peer_certificate: bool,
}

impl FactoryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the certificate chain presented to peers (leaf first)
    pub fn certificate_chain(mut self, chain: Vec<X509>) -> Self {
        self.chain = chain;
        self
    }

    /// Load the certificate chain from a PEM file (leaf first)
    pub fn certificate_chain_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self> {
        let pem = read_file(path.as_ref())?;
        let chain = X509::stack_from_pem(&pem).map_err(config_err("Failed to load certificate chain"))?;
        if chain.is_empty() {
            return Err(TlsError::Configuration(format!(
                "{}: no certificates found",
                path.as_ref().display()
            )));
        }
        self.chain = chain;
        Ok(self)
    }

    /// Set the private key matching the leaf certificate
    pub fn private_key(mut self, key: PrivateKey) -> Self {
        self.key = Some(key);
        self
    }

    /// Load the private key from a PEM file
    pub fn private_key_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self> {
        let pem = read_file(path.as_ref())?;
        self.key = Some(PrivateKey::from_pem(&pem)?);
        Ok(self)
    }

    /// Set Diffie-Hellman parameters for the ephemeral-DH suite
    pub fn dh_params(mut self, dh: Dh<Params>) -> Self {
        self.dh = Some(dh);
        self
    }

    /// Load Diffie-Hellman parameters from a PEM file
    pub fn dh_params_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self> {
        let pem = read_file(path.as_ref())?;
        let dh = Dh::params_from_pem(&pem).map_err(config_err("Failed to load DH parameters"))?;
        self.dh = Some(dh);
        Ok(self)
    }

    /// Ask peers for their certificate without rejecting any
    ///
    /// Servers then receive the client's chain for the identity protocol.
    /// Verification is never done by the engine itself.
    pub fn request_peer_certificate(mut self, request: bool) -> Self {
        self.request_peer_certificate = request;
        self
    }

    /// Build the factory
    pub fn build(mut self) -> Result<ConnectionFactory> {
        match (self.chain.is_empty(), self.key.is_some()) {
            (true, true) => {
                return Err(TlsError::Configuration(
                    "private key given without a certificate chain".to_string(),
                ))
            }
            (false, false) => {
                return Err(TlsError::Configuration(
                    "certificate chain given without a private key".to_string(),
                ))
            }
            _ => {}
        }

        let server_capable = !self.chain.is_empty();
        let dh = match (self.dh.take(), server_capable) {
            (Some(dh), _) => Some(dh),
            (None, true) => Some(Dh::get_2048_256().map_err(config_err("Failed to load built-in DH group"))?),
            (None, false) => None,
        };

        let ctx = self.context(DHE_CIPHER, dh.as_ref())?;
        let legacy_ctx = if server_capable {
            let ciphers = format!("{}:{}", DHE_CIPHER, LEGACY_CIPHER);
            Some(self.context(&ciphers, dh.as_ref())?)
        } else {
            None
        };

        debug!(
            "Built {} TLS factory (chain length {})",
            if server_capable { "server-capable" } else { "client-only" },
            self.chain.len()
        );

        Ok(ConnectionFactory {
            inner: Arc::new(FactoryInner {
                ctx,
                legacy_ctx,
                live_sessions: AtomicUsize::new(0),
            }),
        })
    }

    fn context(&self, ciphers: &str, dh: Option<&Dh<Params>>) -> Result<SslContext> {
        let server_capable = !self.chain.is_empty();
        let method = if server_capable {
            SslMethod::tls()
        } else {
            SslMethod::tls_client()
        };

        let mut builder =
            SslContextBuilder::new(method).map_err(config_err("Failed to create SSL context"))?;

        // The identity protocol depends on TLS 1.2 renegotiation and DHE suites.
        builder
            .set_min_proto_version(Some(SslVersion::TLS1_2))
            .map_err(config_err("Failed to set min proto version"))?;
        builder
            .set_max_proto_version(Some(SslVersion::TLS1_2))
            .map_err(config_err("Failed to set max proto version"))?;

        let mut options = SslOptions::NO_SSLV2
            | SslOptions::NO_SSLV3
            | SslOptions::NO_TICKET
            | SslOptions::SINGLE_DH_USE
            | SslOptions::SINGLE_ECDH_USE;
        if server_capable {
            options |= SslOptions::from_bits_retain(ALLOW_CLIENT_RENEGOTIATION);
        }
        builder.set_options(options);

        builder
            .set_cipher_list(ciphers)
            .map_err(config_err("Failed to set cipher list"))?;
        builder.set_session_cache_mode(SslSessionCacheMode::OFF);
        builder.set_mode(SslMode::ENABLE_PARTIAL_WRITE | SslMode::ACCEPT_MOVING_WRITE_BUFFER);

        if self.request_peer_certificate {
            builder.set_verify_callback(SslVerifyMode::PEER, |_, _| true);
        } else {
            builder.set_verify(SslVerifyMode::NONE);
        }

        if let Some((leaf, rest)) = self.chain.split_first() {
            builder
                .set_certificate(leaf)
                .map_err(config_err("Failed to use certificate"))?;
            for cert in rest {
                builder
                    .add_extra_chain_cert(cert.clone())
                    .map_err(config_err("Failed to add chain certificate"))?;
            }
        }

        if let Some(key) = &self.key {
            builder
                .set_private_key(key.as_pkey())
                .map_err(config_err("Failed to use private key"))?;
            builder
                .check_private_key()
                .map_err(config_err("Private key does not match the leaf certificate"))?;
        }

        if let (Some(dh), true) = (dh, server_capable) {
            builder
                .set_tmp_dh(dh)
                .map_err(config_err("Failed to set DH parameters"))?;
        }

        Ok(builder.build())
    }
}

struct FactoryInner {
    ctx: SslContext,
    legacy_ctx: Option<SslContext>,
    live_sessions: AtomicUsize,
}

/// Shared TLS configuration that manufactures sessions
///
/// Cheap to clone; every clone and every session refers to the same
/// configuration.
#[derive(Clone)]
pub struct ConnectionFactory {
    inner: Arc<FactoryInner>,
}

impl ConnectionFactory {
    /// Create a new configuration builder
    pub fn builder() -> FactoryConfig {
        FactoryConfig::new()
    }

    /// A client-only factory (no certificate)
    pub fn client() -> Result<Self> {
        FactoryConfig::new().build()
    }

    /// A server-capable factory presenting `chain`
    pub fn server(chain: Vec<X509>, key: PrivateKey, dh: Option<Dh<Params>>) -> Result<Self> {
        let mut config = FactoryConfig::new().certificate_chain(chain).private_key(key);
        if let Some(dh) = dh {
            config = config.dh_params(dh);
        }
        config.build()
    }

    /// Whether this factory holds a certificate and can accept connections
    pub fn is_server_capable(&self) -> bool {
        self.inner.legacy_ctx.is_some()
    }

    /// Number of sessions created by this factory that are still alive
    pub fn live_sessions(&self) -> usize {
        self.inner.live_sessions.load(Ordering::SeqCst)
    }

    /// Create a session on an already-connected, non-blocking socket.
    ///
    /// The socket is borrowed, not owned: it stays open for the life of the
    /// session and the caller closes it afterwards. For server sessions,
    /// `server_allows_legacy_ciphers` also accepts the non-ephemeral
    /// fallback suite.
    pub fn create_session<'a, S: AsFd>(
        &self,
        transport: &'a S,
        role: Role,
        server_allows_legacy_ciphers: bool,
    ) -> Result<Session<'a>> {
        let ctx = match (role, &self.inner.legacy_ctx) {
            (Role::Server, None) => {
                return Err(TlsError::InvalidArgument(
                    "server sessions need a factory with a certificate".to_string(),
                ))
            }
            (Role::Server, Some(legacy)) if server_allows_legacy_ciphers => legacy,
            _ => &self.inner.ctx,
        };
        if role == Role::Client && server_allows_legacy_ciphers {
            trace!("Legacy cipher fallback ignored for client session");
        }

        let session = Session::new(self.clone(), ctx, FdTransport::new(transport), role)?;
        self.inner.live_sessions.fetch_add(1, Ordering::SeqCst);
        Ok(session)
    }

    pub(crate) fn session_released(&self) {
        self.inner.live_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}
