//! TLS session
//!
//! A `Session` owns one OpenSSL engine instance bound to a borrowed,
//! non-blocking socket. Each call makes a single attempt; would-block
//! results tell the caller which readiness to poll for before calling again.

use super::cert::{self, presented_chain, CertificateLifetime};
use super::config::ConnectionFactory;
use super::error::{classify, Interrupted};
use super::handshake::{mark_renegotiation, Role, SessionState, ShutdownStatus};
use super::info::SessionInfo;
use super::keys::PublicKey;
use super::{Result, TlsError};
use crate::transport::{self, FdTransport};
use log::{debug, trace, warn};
use openssl::ssl::{ShutdownResult, Ssl, SslContext, SslStream};
use openssl::x509::X509;
use std::io;
use std::os::fd::RawFd;
use std::time::{Duration, SystemTime};

/// Ciphertext traffic seen on the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ByteCounters {
    pub read: u64,
    pub written: u64,
}

impl ByteCounters {
    pub fn total(&self) -> u64 {
        self.read + self.written
    }
}

/// One TLS connection
///
/// Operations take `&mut self`, so at most one engine call is ever in
/// flight. Dropping a session in any state is safe and never closes the
/// socket. The session borrows the socket it was created on, so the socket
/// cannot be closed while the session is alive:
///
/// ```compile_fail
/// use relay_tls::tls::{ConnectionFactory, Role};
/// use std::net::TcpStream;
///
/// let factory = ConnectionFactory::client().unwrap();
/// let stream = TcpStream::connect("127.0.0.1:48099").unwrap();
/// let mut session = factory.create_session(&stream, Role::Client, false).unwrap();
/// drop(stream);
/// let _ = session.drive_handshake();
/// ```
pub struct Session<'a> {
    stream: SslStream<FdTransport<'a>>,
    factory: ConnectionFactory,
    role: Role,
    state: SessionState,
    renegotiation_requested: bool,
}

impl<'a> Session<'a> {
    pub(crate) fn new(
        factory: ConnectionFactory,
        ctx: &SslContext,
        transport: FdTransport<'a>,
        role: Role,
    ) -> Result<Self> {
        match transport.is_nonblocking() {
            Ok(true) => {}
            Ok(false) => warn!("fd {} is in blocking mode; TLS calls will block", transport.fd()),
            Err(e) => warn!("Cannot query blocking mode of fd {}: {}", transport.fd(), e),
        }

        let mut ssl = Ssl::new(ctx).map_err(TlsError::engine)?;
        match role {
            Role::Client => ssl.set_connect_state(),
            Role::Server => ssl.set_accept_state(),
        }
        let stream = SslStream::new(ssl, transport).map_err(TlsError::engine)?;

        trace!("Created {:?} session on fd {}", role, stream.get_ref().fd());

        Ok(Session {
            stream,
            factory,
            role,
            state: SessionState::Fresh,
            renegotiation_requested: false,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// The factory this session was created from
    pub fn factory(&self) -> &ConnectionFactory {
        &self.factory
    }

    /// Whether a renegotiation is waiting for the next `drive_handshake`
    pub fn renegotiation_requested(&self) -> bool {
        self.renegotiation_requested
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            debug!(
                "fd {}: {} -> {}",
                self.transport_descriptor(),
                self.state,
                next
            );
            self.state = next;
        }
    }

    fn fail<T>(&mut self, err: TlsError) -> Result<T> {
        warn!("fd {}: {}", self.transport_descriptor(), err);
        self.transition(SessionState::Failed);
        Err(err)
    }

    fn require(&self, state: SessionState, operation: &'static str) -> Result<()> {
        if self.state == state {
            Ok(())
        } else {
            Err(TlsError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    /// Make one attempt at the handshake (client: connect, server: accept).
    ///
    /// Also performs a renegotiation requested with
    /// [`request_renegotiation`](Self::request_renegotiation). Returns `Ok`
    /// once the session is established; on `WouldBlockRead` or
    /// `WouldBlockWrite` wait for the socket and call again.
    pub fn drive_handshake(&mut self) -> Result<()> {
        match self.state {
            SessionState::Fresh => self.transition(SessionState::Handshaking),
            SessionState::Handshaking => {}
            SessionState::Established if self.renegotiation_requested => {
                self.transition(SessionState::Handshaking)
            }
            SessionState::Established => return Ok(()),
            state => {
                return Err(TlsError::InvalidState {
                    operation: "drive_handshake",
                    state,
                })
            }
        }

        match self.stream.do_handshake() {
            Ok(()) => {
                self.renegotiation_requested = false;
                self.transition(SessionState::Established);
                if log::log_enabled!(log::Level::Debug) {
                    let info = SessionInfo::from_ssl(self.stream.ssl(), self.role);
                    debug!(
                        "fd {}: handshake complete ({}, {}, peer chain {:?})",
                        self.transport_descriptor(),
                        info.version,
                        info.cipher,
                        info.peer_chain
                    );
                }
                Ok(())
            }
            Err(e) => match classify(&e) {
                Interrupted::WouldBlock(interest) => {
                    trace!("fd {}: handshake waiting for {:?}", self.transport_descriptor(), interest);
                    Err(TlsError::would_block(interest))
                }
                Interrupted::ZeroReturn | Interrupted::TransportClosed => self.fail(
                    TlsError::Handshake("connection closed by peer during handshake".to_string()),
                ),
                Interrupted::Fatal(reason) => self.fail(TlsError::Handshake(reason)),
            },
        }
    }

    /// Mark the session for renegotiation.
    ///
    /// No I/O happens here; the next [`drive_handshake`](Self::drive_handshake)
    /// performs it. Only client-initiated renegotiation behaves as the
    /// protocol intends; a server-initiated one may complete later than the
    /// server's handshake call suggests.
    pub fn request_renegotiation(&mut self) -> Result<()> {
        self.require(SessionState::Established, "request_renegotiation")?;
        if let Err(stack) = mark_renegotiation(self.stream.ssl()) {
            return self.fail(TlsError::engine(stack));
        }
        self.renegotiation_requested = true;
        Ok(())
    }

    /// Read up to `buf.len()` bytes of plaintext.
    ///
    /// `Ok(0)` means the peer closed the connection cleanly. An abrupt EOF
    /// or reset is `ConnectionClosed`. A renegotiation may run inside the
    /// read, so it can block on either direction.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.require(SessionState::Established, "read")?;
        if buf.is_empty() {
            return Err(TlsError::InvalidArgument("read buffer is empty".to_string()));
        }

        match self.stream.ssl_read(buf) {
            Ok(n) => Ok(n),
            Err(e) => match classify(&e) {
                Interrupted::ZeroReturn => {
                    debug!("fd {}: peer sent close notify", self.transport_descriptor());
                    Ok(0)
                }
                Interrupted::WouldBlock(interest) => Err(TlsError::would_block(interest)),
                Interrupted::TransportClosed => self.fail(TlsError::ConnectionClosed),
                Interrupted::Fatal(reason) => self.fail(TlsError::Engine(reason)),
            },
        }
    }

    /// Write plaintext; returns how many bytes were accepted.
    ///
    /// Partial writes are normal: resubmit the unwritten tail on a later
    /// call. `Ok(0)` means the session has started shutting down.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.require(SessionState::Established, "write")?;
        if buf.is_empty() {
            return Err(TlsError::InvalidArgument("write buffer is empty".to_string()));
        }

        match self.stream.ssl_write(buf) {
            Ok(n) => Ok(n),
            Err(e) => match classify(&e) {
                Interrupted::ZeroReturn => Ok(0),
                Interrupted::WouldBlock(interest) => Err(TlsError::would_block(interest)),
                Interrupted::TransportClosed => self.fail(TlsError::ConnectionClosed),
                Interrupted::Fatal(reason) => self.fail(TlsError::Engine(reason)),
            },
        }
    }

    /// Start or continue the closing handshake.
    ///
    /// `Incomplete` means our close notification went out and the peer's has
    /// not arrived; poll for readability and call again. A failed session
    /// may also be shut down; if the engine cannot send anything the session
    /// is simply closed.
    pub fn shutdown(&mut self) -> Result<ShutdownStatus> {
        let failed = match self.state {
            SessionState::Established | SessionState::ShuttingDown => false,
            SessionState::Failed => true,
            state => {
                return Err(TlsError::InvalidState {
                    operation: "shutdown",
                    state,
                })
            }
        };

        match self.stream.shutdown() {
            Ok(ShutdownResult::Received) => {
                self.transition(SessionState::Closed);
                Ok(ShutdownStatus::Complete)
            }
            Ok(ShutdownResult::Sent) => {
                if !failed {
                    self.transition(SessionState::ShuttingDown);
                }
                Ok(ShutdownStatus::Incomplete)
            }
            Err(e) => match classify(&e) {
                Interrupted::WouldBlock(interest) => {
                    if !failed {
                        self.transition(SessionState::ShuttingDown);
                    }
                    Err(TlsError::would_block(interest))
                }
                Interrupted::ZeroReturn | Interrupted::TransportClosed => {
                    debug!(
                        "fd {}: transport gone during shutdown",
                        self.transport_descriptor()
                    );
                    self.transition(SessionState::Closed);
                    Ok(ShutdownStatus::Complete)
                }
                Interrupted::Fatal(reason) if failed => {
                    debug!(
                        "fd {}: no close notify after failure: {}",
                        self.transport_descriptor(),
                        reason
                    );
                    self.transition(SessionState::Closed);
                    Ok(ShutdownStatus::Complete)
                }
                Interrupted::Fatal(reason) => self.fail(TlsError::Engine(reason)),
            },
        }
    }

    /// Decrypted bytes that can be read without touching the socket
    pub fn pending_bytes(&self) -> Result<usize> {
        self.require(SessionState::Established, "pending_bytes")?;
        Ok(self.stream.ssl().pending())
    }

    /// The socket descriptor, for readiness polling
    pub fn transport_descriptor(&self) -> RawFd {
        self.stream.get_ref().fd()
    }

    /// Ciphertext bytes read and written on the socket so far
    pub fn raw_byte_counters(&self) -> ByteCounters {
        let transport = self.stream.get_ref();
        ByteCounters {
            read: transport.bytes_read(),
            written: transport.bytes_written(),
        }
    }

    /// Block until the socket is ready for the retry `err` asks for.
    ///
    /// Returns `Ok(false)` on timeout. Fails with `InvalidInput` if `err` is
    /// not a would-block signal.
    pub fn wait_for(&self, err: &TlsError, timeout: Option<Duration>) -> io::Result<bool> {
        match err.interest() {
            Some(interest) => transport::wait_ready(self.transport_descriptor(), interest, timeout),
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("not a would-block error: {}", err),
            )),
        }
    }

    /// Negotiated parameters of the established session
    pub fn info(&self) -> Result<SessionInfo> {
        self.require(SessionState::Established, "info")?;
        Ok(SessionInfo::from_ssl(self.stream.ssl(), self.role))
    }

    fn peer_leaf(&self, operation: &'static str) -> Result<X509> {
        self.require(SessionState::Established, operation)?;
        self.stream
            .ssl()
            .peer_certificate()
            .ok_or(TlsError::NoPeerCertificate)
    }

    /// Public key of the peer's leaf (connection) certificate
    pub fn peer_public_key(&self) -> Result<PublicKey> {
        let leaf = self.peer_leaf("peer_public_key")?;
        PublicKey::from_certificate(&leaf)
    }

    /// Fail unless the current time lies inside the peer leaf's validity
    /// window. The engine does not check this itself.
    pub fn check_certificate_validity_window(&self) -> Result<()> {
        let leaf = self.peer_leaf("check_certificate_validity_window")?;
        cert::check_validity_window(&leaf, SystemTime::now())
    }

    /// notBefore and notAfter of the peer leaf certificate
    pub fn certificate_lifetime(&self) -> Result<CertificateLifetime> {
        let leaf = self.peer_leaf("certificate_lifetime")?;
        Ok(CertificateLifetime::from_x509_ref(&leaf))
    }

    /// Check the peer's two-certificate chain and return its identity key.
    ///
    /// The chain must be exactly the connection certificate and an identity
    /// certificate whose key signed it. Any error means the peer is not
    /// authenticated and the connection should be abandoned.
    pub fn verify_identity_chain(&self) -> Result<PublicKey> {
        let leaf = self.peer_leaf("verify_identity_chain")?;
        let chain = presented_chain(self.stream.ssl(), self.role);
        let identity = cert::verify_identity_chain(&leaf, &chain)?;
        debug!(
            "fd {}: peer identity verified ({} certificates)",
            self.transport_descriptor(),
            chain.len()
        );
        Ok(identity)
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        trace!(
            "Releasing {:?} session on fd {} in state {}",
            self.role,
            self.transport_descriptor(),
            self.state
        );
        self.factory.session_released();
    }
}
