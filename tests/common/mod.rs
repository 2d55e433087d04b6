//! Shared helpers for TLS session integration tests.
//!
//! Import from test files via `mod common;`.

#![allow(unused)]

use openssl::asn1::{Asn1Time, Asn1TimeRef};
use openssl::bn::{BigNum, MsbOption};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::x509::{X509Builder, X509NameBuilder, X509};
use relay_tls::tls::{ConnectionFactory, PrivateKey, Role, Session, SessionState, TlsError};
use socket2::{Domain, Socket, Type};
use std::time::{SystemTime, UNIX_EPOCH};

/// Upper bound on handshake/transfer loop iterations before a test gives up
pub const MAX_ROUNDS: usize = 10_000;

pub fn init_logging() {
    let _ = env_logger::try_init();
}

pub fn unix_now() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as i64
}

/// Connected, non-blocking loopback socket pair
pub fn socket_pair() -> (Socket, Socket) {
    let (a, b) = Socket::pair(Domain::UNIX, Type::STREAM, None).unwrap();
    a.set_nonblocking(true).unwrap();
    b.set_nonblocking(true).unwrap();
    (a, b)
}

pub fn build_cert(
    subject: &str,
    subject_key: &PrivateKey,
    issuer: &str,
    signer: &PrivateKey,
    not_before: &Asn1TimeRef,
    not_after: &Asn1TimeRef,
) -> X509 {
    let mut builder = X509Builder::new().unwrap();
    builder.set_version(2).unwrap();

    let mut serial = BigNum::new().unwrap();
    serial.rand(64, MsbOption::MAYBE_ZERO, false).unwrap();
    builder
        .set_serial_number(&serial.to_asn1_integer().unwrap())
        .unwrap();

    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_nid(Nid::COMMONNAME, subject).unwrap();
    builder.set_subject_name(&name.build()).unwrap();

    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_nid(Nid::COMMONNAME, issuer).unwrap();
    builder.set_issuer_name(&name.build()).unwrap();

    builder.set_pubkey(subject_key.as_pkey()).unwrap();
    builder.set_not_before(not_before).unwrap();
    builder.set_not_after(not_after).unwrap();
    builder
        .sign(signer.as_pkey(), MessageDigest::sha256())
        .unwrap();
    builder.build()
}

/// A relay node: long-term identity key plus a connection key it certifies
pub struct Node {
    pub name: String,
    pub identity_key: PrivateKey,
    pub identity_cert: X509,
    pub connection_key: PrivateKey,
    pub connection_cert: X509,
}

impl Node {
    pub fn generate(name: &str) -> Self {
        let now = unix_now();
        Self::generate_with_window(name, now - 3600, now + 30 * 86400)
    }

    /// Node whose connection certificate is valid from `start` to `end`
    /// (unix seconds)
    pub fn generate_with_window(name: &str, start: i64, end: i64) -> Self {
        let identity_key = PrivateKey::generate_rsa(2048).unwrap();
        let connection_key = PrivateKey::generate_rsa(2048).unwrap();

        let now = unix_now();
        let identity_name = format!("{} <identity>", name);
        let identity_cert = build_cert(
            &identity_name,
            &identity_key,
            &identity_name,
            &identity_key,
            &Asn1Time::from_unix((now - 86400) as libc::time_t).unwrap(),
            &Asn1Time::from_unix((now + 365 * 86400) as libc::time_t).unwrap(),
        );
        let connection_cert = build_cert(
            name,
            &connection_key,
            &identity_name,
            &identity_key,
            &Asn1Time::from_unix(start as libc::time_t).unwrap(),
            &Asn1Time::from_unix(end as libc::time_t).unwrap(),
        );

        Node {
            name: name.to_string(),
            identity_key,
            identity_cert,
            connection_key,
            connection_cert,
        }
    }

    /// The chain relay nodes present: connection certificate, then identity
    pub fn chain(&self) -> Vec<X509> {
        vec![self.connection_cert.clone(), self.identity_cert.clone()]
    }

    pub fn server_factory(&self) -> ConnectionFactory {
        ConnectionFactory::server(self.chain(), self.connection_key.clone(), None).unwrap()
    }

    /// Server factory presenting an arbitrary chain with this node's
    /// connection key
    pub fn factory_with_chain(&self, chain: Vec<X509>) -> ConnectionFactory {
        ConnectionFactory::server(chain, self.connection_key.clone(), None).unwrap()
    }
}

fn step(session: &mut Session<'_>) -> bool {
    match session.drive_handshake() {
        Ok(()) => true,
        Err(e) if e.is_would_block() => false,
        Err(e) => panic!("{:?} handshake failed: {}", session.role(), e),
    }
}

/// Drive both sides until each is established
pub fn handshake(client: &mut Session<'_>, server: &mut Session<'_>) {
    for _ in 0..MAX_ROUNDS {
        let client_done = step(client);
        let server_done = step(server);
        if client_done && server_done {
            assert_eq!(client.state(), SessionState::Established);
            assert_eq!(server.state(), SessionState::Established);
            return;
        }
    }
    panic!("handshake did not complete");
}

/// Client/server sessions over `sockets` (from [`socket_pair`]), already
/// established
pub fn established<'a>(
    client_factory: &ConnectionFactory,
    server_factory: &ConnectionFactory,
    sockets: &'a (Socket, Socket),
) -> (Session<'a>, Session<'a>) {
    let mut client = client_factory
        .create_session(&sockets.0, Role::Client, false)
        .unwrap();
    let mut server = server_factory
        .create_session(&sockets.1, Role::Server, false)
        .unwrap();
    handshake(&mut client, &mut server);
    (client, server)
}

/// Send `data` from `writer` to `reader`, resubmitting unwritten tails and
/// draining the reader, until every byte has arrived.
pub fn transfer(writer: &mut Session<'_>, reader: &mut Session<'_>, data: &[u8]) -> Vec<u8> {
    let mut sent = 0;
    let mut received = Vec::with_capacity(data.len());
    let mut buf = vec![0u8; 16 * 1024];

    for _ in 0..MAX_ROUNDS {
        if sent < data.len() {
            match writer.write(&data[sent..]) {
                Ok(n) => {
                    assert!(n > 0, "writer began shutting down");
                    sent += n;
                }
                Err(e) if e.is_would_block() => {}
                Err(e) => panic!("write failed: {}", e),
            }
        }

        loop {
            match reader.read(&mut buf) {
                Ok(0) => panic!("reader saw clean close mid-transfer"),
                Ok(n) => received.extend_from_slice(&buf[..n]),
                Err(e) if e.is_would_block() => break,
                Err(e) => panic!("read failed: {}", e),
            }
            if reader.pending_bytes().unwrap() == 0 && received.len() == data.len() {
                break;
            }
        }

        if received.len() == data.len() {
            return received;
        }
    }
    panic!("transfer stalled after {} of {} bytes", received.len(), data.len());
}

/// Read until `want` bytes arrive or the reader would block for too long
pub fn read_exact(reader: &mut Session<'_>, want: usize) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = vec![0u8; want.max(1)];
    for _ in 0..MAX_ROUNDS {
        match reader.read(&mut buf[..want - out.len()]) {
            Ok(0) => panic!("unexpected clean close"),
            Ok(n) => out.extend_from_slice(&buf[..n]),
            Err(e) if e.is_would_block() => {
                reader.wait_for(&e, Some(std::time::Duration::from_millis(10))).unwrap();
            }
            Err(e) => panic!("read failed: {}", e),
        }
        if out.len() == want {
            return out;
        }
    }
    panic!("read_exact stalled");
}

pub fn expect_err<T: std::fmt::Debug>(result: Result<T, TlsError>) -> TlsError {
    match result {
        Ok(v) => panic!("expected an error, got Ok({:?})", v),
        Err(e) => e,
    }
}
