//! Certificate fixtures for unit tests

use super::keys::PrivateKey;
use openssl::asn1::{Asn1Time, Asn1TimeRef};
use openssl::bn::{BigNum, MsbOption};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::x509::{X509Builder, X509NameBuilder, X509};
use std::time::{SystemTime, UNIX_EPOCH};

/// Build a certificate for `subject_key`, signed by `signer`
pub(crate) fn build_cert(
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

/// A relay node's keys: a long-term identity and a connection key it signs
pub(crate) struct NodeKeys {
    pub identity_key: PrivateKey,
    pub identity_cert: X509,
    pub connection_key: PrivateKey,
    pub connection_cert: X509,
}

impl NodeKeys {
    pub fn generate(name: &str) -> Self {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as libc::time_t;
        let not_before = Asn1Time::from_unix(now - 3600).unwrap();
        let not_after = Asn1Time::days_from_now(30).unwrap();
        let identity_key = PrivateKey::generate_rsa(2048).unwrap();
        let connection_key = PrivateKey::generate_rsa(2048).unwrap();

        let identity_name = format!("{} <identity>", name);
        let identity_cert = build_cert(
            &identity_name,
            &identity_key,
            &identity_name,
            &identity_key,
            &not_before,
            &not_after,
        );
        let connection_cert = build_cert(
            name,
            &connection_key,
            &identity_name,
            &identity_key,
            &not_before,
            &not_after,
        );

        NodeKeys {
            identity_key,
            identity_cert,
            connection_key,
            connection_cert,
        }
    }

    /// Leaf first, then the identity certificate
    pub fn chain(&self) -> Vec<X509> {
        vec![self.connection_cert.clone(), self.identity_cert.clone()]
    }
}
