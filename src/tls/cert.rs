//! Certificate handling and the identity protocol
//!
//! Relay nodes authenticate with a two-certificate chain: a short-lived
//! connection certificate (the TLS leaf) and an identity certificate whose
//! key signs it. There is no CA hierarchy; the signature binding the two is
//! the whole trust statement.

use super::handshake::Role;
use super::keys::PublicKey;
use super::{Result, TlsError};
use openssl::asn1::Asn1Time;
use openssl::nid::Nid;
use openssl::ssl::SslRef;
use openssl::x509::{X509NameRef, X509Ref, X509};
use std::cmp::Ordering;
use std::time::{SystemTime, UNIX_EPOCH};

/// Certificate information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertInfo {
    /// Certificate subject (Common Name)
    pub subject: String,
    /// Certificate issuer (Common Name)
    pub issuer: String,
}

impl CertInfo {
    /// Extract certificate information from an X.509 certificate reference
    pub fn from_x509_ref(cert: &X509Ref) -> Self {
        CertInfo {
            subject: Self::get_cn(cert.subject_name()),
            issuer: Self::get_cn(cert.issuer_name()),
        }
    }

    /// Get Common Name from X509_NAME
    ///
    /// Names are written as UTF8String; anything else decodes lossily.
    fn get_cn(name: &X509NameRef) -> String {
        name.entries_by_nid(Nid::COMMONNAME)
            .next()
            .map(|entry| String::from_utf8_lossy(entry.data().as_slice()).into_owned())
            .unwrap_or_else(|| "<undef>".to_string())
    }
}

/// A certificate's validity window, as printed by the engine
/// (e.g. `Jan  2 03:04:05 2031 GMT`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateLifetime {
    pub not_before: String,
    pub not_after: String,
}

impl CertificateLifetime {
    pub fn from_x509_ref(cert: &X509Ref) -> Self {
        CertificateLifetime {
            not_before: cert.not_before().to_string(),
            not_after: cert.not_after().to_string(),
        }
    }
}

fn asn1_time_at(at: SystemTime) -> Result<Asn1Time> {
    let secs = match at.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(e) => -(e.duration().as_secs() as i64),
    };
    Asn1Time::from_unix(secs as libc::time_t).map_err(TlsError::engine)
}

/// Check that `at` lies inside the certificate's validity window.
///
/// Both bounds are inclusive: the instant equal to notBefore or notAfter
/// is valid.
pub fn check_validity_window(cert: &X509Ref, at: SystemTime) -> Result<()> {
    let now = asn1_time_at(at)?;

    let starts = cert.not_before().compare(&now).map_err(TlsError::engine)?;
    if starts == Ordering::Greater {
        return Err(TlsError::CertificateNotYetValid);
    }

    let ends = cert.not_after().compare(&now).map_err(TlsError::engine)?;
    if ends == Ordering::Less {
        return Err(TlsError::CertificateExpired);
    }

    Ok(())
}

/// Verify a peer's identity chain and return its identity key.
///
/// `chain` must hold exactly two certificates, one of which is `leaf`. The
/// other is taken as the identity certificate, and its key must have signed
/// `leaf`.
pub fn verify_identity_chain(leaf: &X509Ref, chain: &[X509]) -> Result<PublicKey> {
    if chain.len() != 2 {
        return Err(TlsError::WrongChainLength(chain.len()));
    }

    let leaf_der = leaf.to_der().map_err(TlsError::engine)?;
    let mut identity = None;
    for cert in chain {
        if cert.to_der().map_err(TlsError::engine)? != leaf_der {
            identity = Some(cert);
            break;
        }
    }
    let identity = identity.ok_or(TlsError::NoDistinctIdentityCertificate)?;

    let key = PublicKey::from_certificate(identity)?;
    match leaf.verify(key.as_pkey()) {
        Ok(true) => Ok(key),
        _ => Err(TlsError::SignatureVerificationFailed),
    }
}

/// The certificates the peer presented, leaf first.
///
/// OpenSSL includes the leaf in the peer chain on the client side only, so
/// server-side sessions put it back in front.
pub fn presented_chain(ssl: &SslRef, role: Role) -> Vec<X509> {
    let mut chain: Vec<X509> = ssl
        .peer_cert_chain()
        .map(|stack| stack.iter().map(|cert| cert.to_owned()).collect())
        .unwrap_or_default();

    if role == Role::Server {
        if let Some(leaf) = ssl.peer_certificate() {
            chain.insert(0, leaf);
        }
    }

    chain
}
